use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::SourceConfig;
use crate::error::{NewsError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    News,
    Analysis,
    Threats,
    Research,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::News => "news",
            Category::Analysis => "analysis",
            Category::Threats => "threats",
            Category::Research => "research",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = NewsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "news" => Ok(Category::News),
            "analysis" => Ok(Category::Analysis),
            "threats" => Ok(Category::Threats),
            "research" => Ok(Category::Research),
            _ => Err(NewsError::UnknownCategory(s.to_string())),
        }
    }
}

/// One syndication feed provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    pub id: String,
    pub name: String,
    #[serde(rename = "url")]
    pub feed_url: String,
    #[serde(rename = "website")]
    pub website_url: String,
    pub description: String,
    pub category: Category,
    pub enabled: bool,
    #[serde(skip)]
    pub default_image: Option<String>,
}

impl From<&SourceConfig> for Source {
    fn from(config: &SourceConfig) -> Self {
        Self {
            id: config.id.clone(),
            name: config.name.clone(),
            feed_url: config.url.clone(),
            website_url: config.website.clone(),
            description: config.description.clone(),
            category: config.category,
            enabled: config.enabled,
            default_image: config.default_image.clone(),
        }
    }
}

/// Immutable set of sources in declaration order.
#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    sources: Vec<Source>,
}

impl SourceRegistry {
    pub fn new(sources: Vec<Source>) -> anyhow::Result<Self> {
        let mut seen = HashSet::new();
        for source in &sources {
            if !seen.insert(source.id.as_str()) {
                anyhow::bail!("Duplicate source id in configuration: {}", source.id);
            }
        }
        Ok(Self { sources })
    }

    pub fn from_configs(configs: &[SourceConfig]) -> anyhow::Result<Self> {
        Self::new(configs.iter().map(Source::from).collect())
    }

    pub fn list_all(&self) -> &[Source] {
        &self.sources
    }

    pub fn list_enabled(&self) -> Vec<&Source> {
        self.sources.iter().filter(|s| s.enabled).collect()
    }

    pub fn list_by_category(&self, category: Category) -> Vec<&Source> {
        self.sources
            .iter()
            .filter(|s| s.enabled && s.category == category)
            .collect()
    }

    /// Looks up a source regardless of whether it is enabled.
    pub fn get_by_id(&self, id: &str) -> Result<&Source> {
        self.sources
            .iter()
            .find(|s| s.id == id)
            .ok_or_else(|| NewsError::NotFound(id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}
