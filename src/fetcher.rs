use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use feed_rs::model::Entry;
use feed_rs::parser;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::NewsError;
use crate::normalizer::{self, Article, RawFeedEntry};
use crate::sources::Source;

/// Outcome of one attempt to fetch a single source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceFetchResult {
    pub source_id: String,
    pub success: bool,
    pub articles: Vec<Article>,
    pub error: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

impl SourceFetchResult {
    pub fn succeeded(source_id: &str, articles: Vec<Article>) -> Self {
        Self {
            source_id: source_id.to_string(),
            success: true,
            articles,
            error: None,
            fetched_at: Utc::now(),
        }
    }

    pub fn failed(source_id: &str, error: impl ToString) -> Self {
        Self {
            source_id: source_id.to_string(),
            success: false,
            articles: Vec::new(),
            error: Some(error.to_string()),
            fetched_at: Utc::now(),
        }
    }
}

/// Values the feed parser doesn't keep apart, pulled from the raw item XML.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemExtras {
    pub enclosure_url: Option<String>,
    pub creator: Option<String>,
}

pub struct Fetcher {
    client: Client,
    timeout: Duration,
}

impl Fetcher {
    pub fn new(timeout: Duration, user_agent: &str) -> anyhow::Result<Self> {
        let client = Client::builder().user_agent(user_agent).build()?;

        Ok(Self { client, timeout })
    }

    /// Fetch and normalize one source. Every failure, including running past
    /// the timeout, comes back as an unsuccessful result.
    pub async fn fetch(&self, source: &Source) -> SourceFetchResult {
        info!("Fetching feed from {} ({})", source.name, source.feed_url);

        let outcome = match tokio::time::timeout(self.timeout, self.fetch_articles(source)).await {
            Ok(result) => result,
            Err(_) => Err(NewsError::Timeout(self.timeout)),
        };

        match outcome {
            Ok(articles) => {
                info!(
                    "Successfully fetched {} articles from {}",
                    articles.len(),
                    source.name
                );
                SourceFetchResult::succeeded(&source.id, articles)
            }
            Err(e) => {
                error!("Error fetching feed from {}: {}", source.name, e);
                SourceFetchResult::failed(&source.id, e)
            }
        }
    }

    async fn fetch_articles(&self, source: &Source) -> Result<Vec<Article>, NewsError> {
        let response = self
            .client
            .get(&source.feed_url)
            .send()
            .await?
            .error_for_status()?;
        let bytes = response.bytes().await?;

        Self::parse_articles(&bytes, source, Utc::now())
    }

    /// Parse a feed document and normalize its entries for `source`.
    pub fn parse_articles(
        bytes: &[u8],
        source: &Source,
        now: DateTime<Utc>,
    ) -> Result<Vec<Article>, NewsError> {
        let extras = Self::extract_item_extras(bytes);
        let parsed = parser::parse(bytes)?;

        let mut articles = Vec::with_capacity(parsed.entries.len());
        for entry in parsed.entries {
            let link = entry.links.first().map(|l| l.href.clone());
            let raw = Self::raw_entry(entry, link.as_ref().and_then(|l| extras.get(l)));

            match normalizer::normalize(&raw, source, now) {
                Some(article) => articles.push(article),
                None => warn!(
                    "Skipping entry with no link from {}: {}",
                    source.name,
                    raw.title.as_deref().unwrap_or("Untitled")
                ),
            }
        }

        Ok(articles)
    }

    /// Map a parsed entry onto the optional-field shape the normalizer reads.
    pub fn raw_entry(entry: Entry, extras: Option<&ItemExtras>) -> RawFeedEntry {
        let media_url = entry.media.iter().find_map(|m| {
            m.content
                .iter()
                .find_map(|c| c.url.as_ref().map(|u| u.to_string()))
                .or_else(|| m.thumbnails.first().map(|t| t.image.uri.clone()))
        });

        RawFeedEntry {
            title: entry.title.map(|t| t.content),
            link: entry.links.first().map(|l| l.href.clone()),
            published: entry.published.map(|dt| dt.to_rfc2822()),
            iso_date: entry.updated.map(|dt| dt.to_rfc3339()),
            content_snippet: None,
            summary: None,
            content: entry.summary.map(|s| s.content),
            content_encoded: entry.content.and_then(|c| c.body),
            enclosure_url: extras.and_then(|x| x.enclosure_url.clone()),
            media_url,
            creator: extras.and_then(|x| x.creator.clone()),
            author: entry.authors.first().map(|a| a.name.clone()),
            categories: entry.categories.into_iter().map(|c| c.term).collect(),
        }
    }

    /// Scan raw RSS XML for each item's `<enclosure url="...">` and
    /// `<dc:creator>`, keyed by the item's `<link>`.
    pub fn extract_item_extras(xml_bytes: &[u8]) -> HashMap<String, ItemExtras> {
        let mut extras_map = HashMap::new();
        let xml_str = match std::str::from_utf8(xml_bytes) {
            Ok(s) => s,
            Err(_) => return extras_map,
        };

        for item_block in xml_str.split("<item").skip(1) {
            // Skip lookalikes such as <itemCount>
            if !item_block.starts_with(|c: char| c == '>' || c.is_whitespace()) {
                continue;
            }
            let item_end = item_block.find("</item>").unwrap_or(item_block.len());
            let item = &item_block[..item_end];

            let Some(link) = Self::extract_xml_element(item, "link") else {
                continue;
            };
            let extras = ItemExtras {
                enclosure_url: Self::extract_xml_attribute(item, "enclosure", "url"),
                creator: Self::extract_xml_element(item, "dc:creator"),
            };

            if extras != ItemExtras::default() {
                extras_map.insert(link.replace("&amp;", "&"), extras);
            }
        }

        extras_map
    }

    pub fn extract_xml_element(xml: &str, tag: &str) -> Option<String> {
        let start_tag = format!("<{}>", tag);
        let end_tag = format!("</{}>", tag);

        let start = xml.find(&start_tag)? + start_tag.len();
        let end = xml[start..].find(&end_tag)? + start;

        let text = xml[start..end].trim();
        let text = text
            .strip_prefix("<![CDATA[")
            .and_then(|t| t.strip_suffix("]]>"))
            .unwrap_or(text);

        Some(text.trim().to_string())
    }

    pub fn extract_xml_attribute(xml: &str, tag: &str, attr: &str) -> Option<String> {
        let open = format!("<{}", tag);
        let mut rest = xml;

        while let Some(pos) = rest.find(&open) {
            let after = &rest[pos + open.len()..];
            let tag_end = after.find('>')?;
            if after.starts_with(char::is_whitespace) {
                let attrs = &after[..tag_end];
                for quote in ['"', '\''] {
                    let needle = format!("{}={}", attr, quote);
                    if let Some(value_start) = attrs.find(&needle).map(|i| i + needle.len()) {
                        let value_end = attrs[value_start..].find(quote)? + value_start;
                        return Some(attrs[value_start..value_end].replace("&amp;", "&"));
                    }
                }
            }
            rest = &after[tag_end..];
        }

        None
    }
}
