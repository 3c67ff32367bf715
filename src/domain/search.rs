use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

use crate::constants::search::MAX_FINGERPRINT_LEN;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueryValidationError {
    #[error("Query must not be empty")]
    EmptyQuery,

    #[error("Query exceeds maximum length of {max} characters")]
    QueryTooLong { max: usize },

    #[error("Page must be at least 1")]
    InvalidPage,

    #[error("Page size must be between 1 and {max}")]
    InvalidPageSize { max: u32 },
}

/// A free-text search request with 1-based pagination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub text: String,
    pub page: u32,
    pub page_size: u32,
}

impl SearchQuery {
    #[must_use]
    pub fn new(text: impl Into<String>, page: u32, page_size: u32) -> Self {
        Self {
            text: text.into(),
            page,
            page_size,
        }
    }

    /// Checks bounds before anything is fingerprinted or looked up.
    pub fn validate(
        &self,
        max_page_size: u32,
        max_query_length: usize,
    ) -> Result<(), QueryValidationError> {
        let trimmed = self.text.trim();
        if trimmed.is_empty() {
            return Err(QueryValidationError::EmptyQuery);
        }
        if trimmed.chars().count() > max_query_length {
            return Err(QueryValidationError::QueryTooLong {
                max: max_query_length,
            });
        }
        if self.page < 1 {
            return Err(QueryValidationError::InvalidPage);
        }
        if self.page_size < 1 || self.page_size > max_page_size {
            return Err(QueryValidationError::InvalidPageSize { max: max_page_size });
        }
        Ok(())
    }

    #[must_use]
    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.page_size)
    }

    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(self)
    }
}

/// Canonical cache key for a query and its pagination.
///
/// Case and inner whitespace do not matter: `"Rust  Async"` and
/// `" rust async"` map to the same fingerprint. Overlong keys are replaced by
/// their SHA-256 so every key fits the cache's primary key column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    #[must_use]
    pub fn of(query: &SearchQuery) -> Self {
        let normalized = normalize_text(&query.text);
        let key = format!("search:{normalized}:p{}:s{}", query.page, query.page_size);
        if key.len() <= MAX_FINGERPRINT_LEN {
            return Self(key);
        }

        let digest = Sha256::digest(normalized.as_bytes());
        Self(format!(
            "search:h{}:p{}:s{}",
            hex::encode(digest),
            query.page,
            query.page_size
        ))
    }

    #[must_use]
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub url: String,
    pub title: String,
    pub snippet: String,
    pub domain: String,
    pub crawl_date: Option<String>,
    pub score: f64,
}

/// One ranked page of index results. This is the cached payload.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SearchPage {
    pub total: u64,
    pub hits: Vec<SearchHit>,
}

impl SearchPage {
    #[must_use]
    pub fn total_pages(&self, page_size: u32) -> u64 {
        if page_size == 0 {
            return 0;
        }
        self.total.div_ceil(u64::from(page_size))
    }
}
