//! SecNews - A cybersecurity news feed aggregator
//!
//! Fetches RSS/Atom feeds from many sources in parallel, normalizes their
//! entries into a common article shape, and serves the merged, newest-first
//! list from a time-bounded in-memory cache.

pub mod aggregator;
pub mod cache;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod normalizer;
pub mod routes;
pub mod service;
pub mod sources;
