use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::aggregator::{AggregateResult, Aggregator};
use crate::cache::{CacheStats, ResponseCache};
use crate::config::Config;
use crate::error::Result;
use crate::fetcher::{Fetcher, SourceFetchResult};
use crate::sources::{Category, SourceRegistry};

pub const ALL_NEWS_KEY: &str = "news:all";

pub fn source_key(source_id: &str) -> String {
    format!("news:source:{}", source_id)
}

pub fn category_key(category: Category) -> String {
    format!("news:category:{}", category)
}

/// Application context: created once at startup and shared by every request.
pub struct NewsService {
    aggregator: Aggregator,
    cache: Arc<ResponseCache>,
    cache_ttl: Duration,
}

impl NewsService {
    pub fn new(aggregator: Aggregator, cache: Arc<ResponseCache>, cache_ttl: Duration) -> Self {
        Self {
            aggregator,
            cache,
            cache_ttl,
        }
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let registry = Arc::new(SourceRegistry::from_configs(&config.sources)?);
        let fetcher = Arc::new(Fetcher::new(config.fetch_timeout(), &config.user_agent)?);
        info!(
            "Loaded {} sources ({} enabled), cache TTL {}s, fetch timeout {}s",
            registry.len(),
            registry.list_enabled().len(),
            config.cache_ttl,
            config.fetch_timeout
        );

        Ok(Self::new(
            Aggregator::new(registry, fetcher),
            Arc::new(ResponseCache::new()),
            config.cache_ttl(),
        ))
    }

    pub fn registry(&self) -> &SourceRegistry {
        self.aggregator.registry()
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub async fn fetch_all(&self) -> Arc<AggregateResult> {
        self.cache
            .get_or_compute(ALL_NEWS_KEY, self.cache_ttl, || self.aggregator.fetch_all())
            .await
    }

    /// Unknown or disabled sources fail without touching the cache, so request
    /// errors are never stored.
    pub async fn fetch_one(&self, source_id: &str) -> Result<Arc<SourceFetchResult>> {
        self.cache
            .try_get_or_compute(&source_key(source_id), self.cache_ttl, || {
                self.aggregator.fetch_one(source_id)
            })
            .await
    }

    pub async fn fetch_category(&self, category: Category) -> Arc<AggregateResult> {
        self.cache
            .get_or_compute(&category_key(category), self.cache_ttl, || {
                self.aggregator.fetch_category(category)
            })
            .await
    }

    pub async fn stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    pub async fn keys(&self) -> Vec<String> {
        self.cache.keys().await
    }

    pub async fn flush(&self) -> usize {
        self.cache.invalidate_all().await
    }
}
