// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! External data sources.
//!
//! - [`SourceClient`]: the seam the sync jobs fetch through
//! - [`catalog`]: per-source capability table (breaker, endpoints, fetch plan, transform)
//! - [`resilient::ResilientClient`]: retry inside a circuit breaker
//! - [`http::HttpSourceClient`]: reqwest implementation of [`SourceClient`]

pub mod catalog;
pub mod http;
pub mod resilient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::context::SyncContext;
use crate::error::SyncError;
use crate::item::{ExternalId, ExternalRecord};

/// Free-form request parameters (`offset`, `limit`, `cities`, ...)
pub type FetchParams = Map<String, Value>;

/// Cursor information attached to a page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationMetadata {
    /// Total records reported by the source
    pub count: u64,
    pub next: Option<String>,
    pub previous: Option<String>,
    pub has_next: bool,
    pub has_prev: bool,
}

impl PaginationMetadata {
    #[must_use]
    pub fn new(count: u64, next: Option<String>, previous: Option<String>) -> Self {
        let has_next = next.as_deref().is_some_and(|n| !n.is_empty());
        let has_prev = previous.as_deref().is_some_and(|p| !p.is_empty());
        Self {
            count,
            next,
            previous,
            has_next,
            has_prev,
        }
    }

    /// A page with no neighbours.
    #[must_use]
    pub fn single(count: u64) -> Self {
        Self::new(count, None, None)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaginatedResponse {
    pub items: Vec<ExternalRecord>,
    pub pagination: Option<PaginationMetadata>,
}

#[async_trait]
pub trait SourceClient: Send + Sync {
    async fn fetch(
        &self,
        ctx: &SyncContext,
        api_source: &str,
        operation: &str,
        params: &FetchParams,
    ) -> Result<Vec<ExternalRecord>, SyncError>;

    async fn fetch_paginated(
        &self,
        ctx: &SyncContext,
        api_source: &str,
        operation: &str,
        params: &FetchParams,
    ) -> Result<PaginatedResponse, SyncError>;

    async fn fetch_by_id(
        &self,
        ctx: &SyncContext,
        api_source: &str,
        id: &ExternalId,
    ) -> Result<ExternalRecord, SyncError>;
}

/// Read a non-negative integer parameter. Accepts JSON numbers (floats are
/// truncated) and numeric strings.
#[must_use]
pub fn param_u64(params: &FetchParams, key: &str) -> Option<u64> {
    match params.get(key)? {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite() && *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Read a non-empty string parameter.
#[must_use]
pub fn param_str<'a>(params: &'a FetchParams, key: &str) -> Option<&'a str> {
    params.get(key)?.as_str().map(str::trim).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> FetchParams {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_param_u64_accepts_numbers_and_strings() {
        let p = params(json!({"a": 20, "b": 40.0, "c": "60", "d": -1, "e": true}));
        assert_eq!(param_u64(&p, "a"), Some(20));
        assert_eq!(param_u64(&p, "b"), Some(40));
        assert_eq!(param_u64(&p, "c"), Some(60));
        assert_eq!(param_u64(&p, "d"), None);
        assert_eq!(param_u64(&p, "e"), None);
        assert_eq!(param_u64(&p, "missing"), None);
    }

    #[test]
    fn test_param_str() {
        let p = params(json!({"cities": " Jakarta,Bandung ", "empty": "  ", "n": 1}));
        assert_eq!(param_str(&p, "cities"), Some("Jakarta,Bandung"));
        assert_eq!(param_str(&p, "empty"), None);
        assert_eq!(param_str(&p, "n"), None);
    }

    #[test]
    fn test_pagination_metadata_flags() {
        let meta = PaginationMetadata::new(100, Some("https://x/?offset=20".into()), None);
        assert!(meta.has_next);
        assert!(!meta.has_prev);

        let empty_next = PaginationMetadata::new(100, Some(String::new()), None);
        assert!(!empty_next.has_next);
        assert!(!PaginationMetadata::single(1).has_next);
    }
}
