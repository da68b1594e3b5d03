use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::error::{NewsError, Result};
use crate::fetcher::{Fetcher, SourceFetchResult};
use crate::normalizer::Article;
use crate::sources::{Category, Source, SourceRegistry};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateSummary {
    pub total_articles: usize,
    pub successful_source_count: usize,
    pub failed_source_count: usize,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateResult {
    pub articles: Vec<Article>,
    pub sources: Vec<SourceFetchResult>,
    pub summary: AggregateSummary,
}

impl AggregateResult {
    /// Merge per-source results (already in declaration order) into one
    /// newest-first article list.
    pub fn merge(sources: Vec<SourceFetchResult>) -> Self {
        let mut articles: Vec<Article> = sources
            .iter()
            .filter(|r| r.success)
            .flat_map(|r| r.articles.iter().cloned())
            .collect();
        sort_newest_first(&mut articles);

        let successful_source_count = sources.iter().filter(|r| r.success).count();
        let summary = AggregateSummary {
            total_articles: articles.len(),
            successful_source_count,
            failed_source_count: sources.len() - successful_source_count,
            fetched_at: Utc::now(),
        };

        Self {
            articles,
            sources,
            summary,
        }
    }
}

/// Stable: articles published at the same instant keep their merge order.
pub fn sort_newest_first(articles: &mut [Article]) {
    articles.sort_by(|a, b| b.published_at.cmp(&a.published_at));
}

pub struct Aggregator {
    registry: Arc<SourceRegistry>,
    fetcher: Arc<Fetcher>,
}

impl Aggregator {
    pub fn new(registry: Arc<SourceRegistry>, fetcher: Arc<Fetcher>) -> Self {
        Self { registry, fetcher }
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    /// Fetch every enabled source concurrently and merge what succeeded.
    pub async fn fetch_all(&self) -> AggregateResult {
        let sources = self.registry.list_enabled();
        info!("Fetching feeds from {} sources", sources.len());

        self.aggregate(sources).await
    }

    /// Same as [`fetch_all`](Self::fetch_all), limited to one category.
    pub async fn fetch_category(&self, category: Category) -> AggregateResult {
        let sources = self.registry.list_by_category(category);
        info!(
            "Fetching feeds from {} sources in category '{}'",
            sources.len(),
            category
        );

        self.aggregate(sources).await
    }

    /// Fetch a single source, bypassing the fan-out.
    pub async fn fetch_one(&self, source_id: &str) -> Result<SourceFetchResult> {
        let source = self.registry.get_by_id(source_id)?;
        if !source.enabled {
            return Err(NewsError::Disabled(source_id.to_string()));
        }

        Ok(self.fetcher.fetch(source).await)
    }

    async fn aggregate(&self, sources: Vec<&Source>) -> AggregateResult {
        let handles: Vec<_> = sources
            .iter()
            .map(|source| {
                let fetcher = self.fetcher.clone();
                let source = (*source).clone();
                tokio::spawn(async move { fetcher.fetch(&source).await })
            })
            .collect();

        // Wait for every task; a panicked task still yields a result.
        let results: Vec<SourceFetchResult> = join_all(handles)
            .await
            .into_iter()
            .zip(&sources)
            .map(|(joined, source)| {
                joined.unwrap_or_else(|e| {
                    error!("Fetch task for {} did not complete: {}", source.name, e);
                    SourceFetchResult::failed(&source.id, e)
                })
            })
            .collect();

        let aggregate = AggregateResult::merge(results);
        info!(
            "Feed fetch complete: {} successful, {} failed, {} total articles",
            aggregate.summary.successful_source_count,
            aggregate.summary.failed_source_count,
            aggregate.summary.total_articles
        );

        aggregate
    }
}
