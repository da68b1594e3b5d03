use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NewsError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Failed to parse feed: {0}")]
    Parse(String),

    #[error("Source not found: {0}")]
    NotFound(String),

    #[error("Source is disabled: {0}")]
    Disabled(String),

    #[error("Unknown category: {0}")]
    UnknownCategory(String),

    #[error("Cache error: {0}")]
    Cache(String),
}

impl From<reqwest::Error> for NewsError {
    fn from(err: reqwest::Error) -> Self {
        NewsError::Network(err.to_string())
    }
}

impl From<feed_rs::parser::ParseFeedError> for NewsError {
    fn from(err: feed_rs::parser::ParseFeedError) -> Self {
        NewsError::Parse(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, NewsError>;
