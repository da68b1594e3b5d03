use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::sources::Source;

pub const DESCRIPTION_LIMIT: usize = 300;
pub const ELLIPSIS: &str = "...";
pub const ARTICLE_ID_LENGTH: usize = 32;
pub const DEFAULT_IMAGE_URL: &str =
    "https://images.unsplash.com/photo-1550751827-4bd374c3f58b?w=800&h=400&fit=crop";

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").unwrap());
static IMG_SRC_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"<img[^>]+src="([^">]+)""#).unwrap());

/// One feed item as the parser hands it over. Nothing is guaranteed present.
#[derive(Debug, Clone, Default)]
pub struct RawFeedEntry {
    pub title: Option<String>,
    pub link: Option<String>,
    pub published: Option<String>,
    pub iso_date: Option<String>,
    pub content_snippet: Option<String>,
    pub summary: Option<String>,
    pub content: Option<String>,
    pub content_encoded: Option<String>,
    pub enclosure_url: Option<String>,
    pub media_url: Option<String>,
    pub creator: Option<String>,
    pub author: Option<String>,
    pub categories: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub id: String,
    pub title: String,
    pub description: String,
    pub source_id: String,
    pub source_name: String,
    pub url: String,
    pub image_url: String,
    pub published_at: DateTime<Utc>,
    pub author: Option<String>,
    pub categories: Vec<String>,
}

type ImageStep = (fn(&RawFeedEntry) -> bool, fn(&RawFeedEntry) -> Option<String>);

/// Image sources in priority order; the first step whose predicate holds and
/// whose extractor yields a URL wins.
const IMAGE_CHAIN: [ImageStep; 4] = [
    (
        |e: &RawFeedEntry| present(&e.enclosure_url).is_some(),
        |e: &RawFeedEntry| present(&e.enclosure_url),
    ),
    (
        |e: &RawFeedEntry| present(&e.media_url).is_some(),
        |e: &RawFeedEntry| present(&e.media_url),
    ),
    (
        |e: &RawFeedEntry| mentions_img(&e.content),
        |e: &RawFeedEntry| first_img_src(&e.content),
    ),
    (
        |e: &RawFeedEntry| mentions_img(&e.content_encoded),
        |e: &RawFeedEntry| first_img_src(&e.content_encoded),
    ),
];

/// Convert one raw entry into an [`Article`]. Entries without a link are
/// dropped since the article id is derived from it.
pub fn normalize(entry: &RawFeedEntry, source: &Source, now: DateTime<Utc>) -> Option<Article> {
    let url = present(&entry.link)?;

    Some(Article {
        id: article_id(&url),
        title: present(&entry.title).unwrap_or_else(|| "Untitled".to_string()),
        description: derive_description(entry),
        source_id: source.id.clone(),
        source_name: source.name.clone(),
        url,
        image_url: extract_image(entry, source),
        published_at: resolve_published(entry, now),
        author: present(&entry.creator).or_else(|| present(&entry.author)),
        categories: entry.categories.clone(),
    })
}

/// Base64 of the URL bytes, cut to a fixed length. Equal URLs always map to
/// the same id; distinct URLs sharing a long prefix can collide.
pub fn article_id(url: &str) -> String {
    STANDARD.encode(url).chars().take(ARTICLE_ID_LENGTH).collect()
}

pub fn extract_image(entry: &RawFeedEntry, source: &Source) -> String {
    IMAGE_CHAIN
        .iter()
        .filter(|(applies, _)| applies(entry))
        .find_map(|(_, extract)| extract(entry))
        .or_else(|| present(&source.default_image))
        .unwrap_or_else(|| DEFAULT_IMAGE_URL.to_string())
}

pub fn derive_description(entry: &RawFeedEntry) -> String {
    let raw = [&entry.content_snippet, &entry.summary, &entry.content]
        .into_iter()
        .find_map(present)
        .unwrap_or_default();

    truncate(&clean_text(&raw), DESCRIPTION_LIMIT)
}

/// Strip markup, decode the handful of entities feeds commonly leave behind,
/// and trim.
pub fn clean_text(html: &str) -> String {
    TAG_RE
        .replace_all(html, "")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .trim()
        .to_string()
}

pub fn truncate(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}{}", &text[..cut], ELLIPSIS),
        None => text.to_string(),
    }
}

/// Published date, else the alternate date, else `now`. A date that is
/// present but unreadable sorts as the Unix epoch.
pub fn resolve_published(entry: &RawFeedEntry, now: DateTime<Utc>) -> DateTime<Utc> {
    match present(&entry.published).or_else(|| present(&entry.iso_date)) {
        Some(text) => parse_timestamp(&text).unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
        None => now,
    }
}

pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    DateTime::parse_from_rfc2822(text)
        .or_else(|_| DateTime::parse_from_rfc3339(text))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn present(field: &Option<String>) -> Option<String> {
    field
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn mentions_img(field: &Option<String>) -> bool {
    field.as_deref().is_some_and(|html| html.contains("<img"))
}

fn first_img_src(field: &Option<String>) -> Option<String> {
    let html = field.as_deref()?;
    IMG_SRC_RE
        .captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::Category;
    use chrono::TimeZone;

    fn test_source(default_image: Option<&str>) -> Source {
        Source {
            id: "krebsonsecurity".to_string(),
            name: "Krebs on Security".to_string(),
            feed_url: "https://krebsonsecurity.com/feed/".to_string(),
            website_url: "https://krebsonsecurity.com".to_string(),
            description: String::new(),
            category: Category::Analysis,
            enabled: true,
            default_image: default_image.map(str::to_string),
        }
    }

    fn entry(link: &str) -> RawFeedEntry {
        RawFeedEntry {
            title: Some("Patch Tuesday".to_string()),
            link: Some(link.to_string()),
            ..Default::default()
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 12, 10, 8, 0, 0).unwrap()
    }

    mod id_tests {
        use super::*;

        #[test]
        fn test_same_url_same_id() {
            let url = "https://krebsonsecurity.com/2024/12/patch-tuesday/";
            assert_eq!(article_id(url), article_id(url));
        }

        #[test]
        fn test_different_urls_different_ids() {
            assert_ne!(article_id("https://a.com/1"), article_id("https://b.com/2"));
        }

        #[test]
        fn test_id_is_truncated_base64() {
            let url = "https://krebsonsecurity.com/2024/12/patch-tuesday/";
            let id = article_id(url);
            assert_eq!(id.len(), ARTICLE_ID_LENGTH);
            assert!(STANDARD.encode(url).starts_with(&id));
        }

        #[test]
        fn test_short_url_keeps_full_encoding() {
            assert_eq!(article_id("a"), "YQ==");
        }
    }

    mod image_tests {
        use super::*;

        #[test]
        fn test_enclosure_wins() {
            let mut e = entry("https://x.com/1");
            e.enclosure_url = Some("https://img.com/enclosure.jpg".to_string());
            e.media_url = Some("https://img.com/media.jpg".to_string());
            e.content = Some(r#"<img src="https://img.com/content.jpg">"#.to_string());
            assert_eq!(extract_image(&e, &test_source(None)), "https://img.com/enclosure.jpg");
        }

        #[test]
        fn test_media_before_content() {
            let mut e = entry("https://x.com/1");
            e.media_url = Some("https://img.com/media.jpg".to_string());
            e.content = Some(r#"<img src="https://img.com/content.jpg">"#.to_string());
            assert_eq!(extract_image(&e, &test_source(None)), "https://img.com/media.jpg");
        }

        #[test]
        fn test_img_scanned_from_content() {
            let mut e = entry("https://x.com/1");
            e.content = Some(
                r#"<p>Intro</p><img class="hero" src="https://img.com/a.png" alt=""><img src="https://img.com/b.png">"#
                    .to_string(),
            );
            assert_eq!(extract_image(&e, &test_source(None)), "https://img.com/a.png");
        }

        #[test]
        fn test_img_scanned_from_encoded_content() {
            let mut e = entry("https://x.com/1");
            e.content = Some("<p>No pictures here</p>".to_string());
            e.content_encoded = Some(r#"<div><img src="https://img.com/enc.png"/></div>"#.to_string());
            assert_eq!(extract_image(&e, &test_source(None)), "https://img.com/enc.png");
        }

        #[test]
        fn test_unquoted_img_falls_through_to_encoded() {
            let mut e = entry("https://x.com/1");
            e.content = Some("<img src=https://img.com/unquoted.png>".to_string());
            e.content_encoded = Some(r#"<img src="https://img.com/enc.png">"#.to_string());
            assert_eq!(extract_image(&e, &test_source(None)), "https://img.com/enc.png");
        }

        #[test]
        fn test_source_default_then_global_default() {
            let e = entry("https://x.com/1");
            assert_eq!(
                extract_image(&e, &test_source(Some("https://img.com/krebs.jpg"))),
                "https://img.com/krebs.jpg"
            );
            assert_eq!(extract_image(&e, &test_source(None)), DEFAULT_IMAGE_URL);
        }

        #[test]
        fn test_blank_enclosure_ignored() {
            let mut e = entry("https://x.com/1");
            e.enclosure_url = Some("  ".to_string());
            e.media_url = Some("https://img.com/media.jpg".to_string());
            assert_eq!(extract_image(&e, &test_source(None)), "https://img.com/media.jpg");
        }
    }

    mod description_tests {
        use super::*;

        #[test]
        fn test_prefers_snippet_then_summary_then_content() {
            let mut e = entry("https://x.com/1");
            e.content = Some("content".to_string());
            assert_eq!(derive_description(&e), "content");

            e.summary = Some("summary".to_string());
            assert_eq!(derive_description(&e), "summary");

            e.content_snippet = Some("snippet".to_string());
            assert_eq!(derive_description(&e), "snippet");
        }

        #[test]
        fn test_empty_when_nothing_present() {
            assert_eq!(derive_description(&entry("https://x.com/1")), "");
        }

        #[test]
        fn test_strips_tags_and_entities() {
            let mut e = entry("https://x.com/1");
            e.content = Some(
                "  <p>Attackers&nbsp;abuse <b>CVE-2024-1</b> &amp; more &lt;fast&gt;</p>\n".to_string(),
            );
            assert_eq!(derive_description(&e), "Attackers abuse CVE-2024-1 & more <fast>");
        }

        #[test]
        fn test_long_content_truncated_with_ellipsis() {
            let mut e = entry("https://x.com/1");
            e.content = Some("a".repeat(500));
            let description = derive_description(&e);
            assert_eq!(description.chars().count(), 303);
            assert!(description.ends_with("..."));
            assert!(description.starts_with(&"a".repeat(300)));
        }

        #[test]
        fn test_exact_limit_not_marked() {
            let mut e = entry("https://x.com/1");
            e.content = Some("b".repeat(300));
            assert_eq!(derive_description(&e), "b".repeat(300));
        }

        #[test]
        fn test_truncation_counts_characters() {
            let text = "é".repeat(301);
            let cut = truncate(&text, 300);
            assert_eq!(cut.chars().count(), 303);
        }
    }

    mod date_tests {
        use super::*;

        #[test]
        fn test_prefers_published() {
            let mut e = entry("https://x.com/1");
            e.published = Some("Mon, 09 Dec 2024 12:00:00 GMT".to_string());
            e.iso_date = Some("2024-12-01T00:00:00Z".to_string());
            assert_eq!(
                resolve_published(&e, now()),
                Utc.with_ymd_and_hms(2024, 12, 9, 12, 0, 0).unwrap()
            );
        }

        #[test]
        fn test_falls_back_to_iso_date() {
            let mut e = entry("https://x.com/1");
            e.iso_date = Some("2024-12-01T06:30:00+02:00".to_string());
            assert_eq!(
                resolve_published(&e, now()),
                Utc.with_ymd_and_hms(2024, 12, 1, 4, 30, 0).unwrap()
            );
        }

        #[test]
        fn test_falls_back_to_now() {
            assert_eq!(resolve_published(&entry("https://x.com/1"), now()), now());
        }

        #[test]
        fn test_unparseable_date_is_epoch() {
            let mut e = entry("https://x.com/1");
            e.published = Some("sometime last week".to_string());
            assert_eq!(resolve_published(&e, now()), DateTime::<Utc>::UNIX_EPOCH);
        }
    }

    mod normalize_tests {
        use super::*;

        #[test]
        fn test_full_entry() {
            let e = RawFeedEntry {
                title: Some("Patch Tuesday".to_string()),
                link: Some("https://krebsonsecurity.com/2024/12/patch/".to_string()),
                published: Some("Tue, 10 Dec 2024 07:00:00 GMT".to_string()),
                content: Some("<p>Microsoft fixed 70 bugs.</p>".to_string()),
                creator: Some("BrianKrebs".to_string()),
                author: Some("someone@example.com".to_string()),
                categories: vec!["Patches".to_string(), "Microsoft".to_string()],
                ..Default::default()
            };

            let article = normalize(&e, &test_source(None), now()).unwrap();

            assert_eq!(article.id, article_id("https://krebsonsecurity.com/2024/12/patch/"));
            assert_eq!(article.title, "Patch Tuesday");
            assert_eq!(article.description, "Microsoft fixed 70 bugs.");
            assert_eq!(article.source_id, "krebsonsecurity");
            assert_eq!(article.source_name, "Krebs on Security");
            assert_eq!(article.image_url, DEFAULT_IMAGE_URL);
            assert_eq!(article.author.as_deref(), Some("BrianKrebs"));
            assert_eq!(article.categories, vec!["Patches", "Microsoft"]);
        }

        #[test]
        fn test_author_fallback_and_absence() {
            let mut e = entry("https://x.com/1");
            assert_eq!(normalize(&e, &test_source(None), now()).unwrap().author, None);

            e.author = Some("Jane".to_string());
            assert_eq!(
                normalize(&e, &test_source(None), now()).unwrap().author.as_deref(),
                Some("Jane")
            );
        }

        #[test]
        fn test_missing_title_and_categories() {
            let e = RawFeedEntry {
                link: Some("https://x.com/1".to_string()),
                ..Default::default()
            };
            let article = normalize(&e, &test_source(None), now()).unwrap();
            assert_eq!(article.title, "Untitled");
            assert!(article.categories.is_empty());
        }

        #[test]
        fn test_entry_without_link_dropped() {
            let e = RawFeedEntry {
                title: Some("Orphan".to_string()),
                ..Default::default()
            };
            assert!(normalize(&e, &test_source(None), now()).is_none());
        }

        #[test]
        fn test_serializes_camel_case() {
            let article = normalize(&entry("https://x.com/1"), &test_source(None), now()).unwrap();
            let json = serde_json::to_value(&article).unwrap();
            assert_eq!(json["sourceId"], "krebsonsecurity");
            assert_eq!(json["sourceName"], "Krebs on Security");
            assert_eq!(json["imageUrl"], DEFAULT_IMAGE_URL);
            assert_eq!(json["publishedAt"], "2024-12-10T08:00:00Z");
            assert!(json["author"].is_null());
        }
    }
}
