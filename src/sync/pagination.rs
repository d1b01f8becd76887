// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Offset/limit pagination over a [`SourceClient`].
//!
//! [`PaginationStrategy::fetch_all`] walks a source page by page and stops on
//! the first of:
//! 1. an empty page
//! 2. no next cursor (`pagination` absent or `has_next == false`)
//! 3. a page shorter than the limit requested for it
//!
//! The next request's window is read from the `offset` / `limit` query
//! parameters of the cursor URL. When the cursor cannot be read the strategy
//! advances by `offset += limit` and logs a warning.

use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::context::SyncContext;
use crate::error::SyncError;
use crate::item::ExternalRecord;
use crate::source::{param_u64, FetchParams, SourceClient};

pub const DEFAULT_PAGE_LIMIT: u64 = 20;

/// One fetch against a source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncRequest {
    pub source: String,
    pub operation: String,
    #[serde(default)]
    pub params: FetchParams,
}

impl SyncRequest {
    pub fn new(source: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            operation: operation.into(),
            params: FetchParams::new(),
        }
    }

    #[must_use]
    pub fn with_params(mut self, params: FetchParams) -> Self {
        self.params = params;
        self
    }

    /// Starting window from params, defaulting to offset 0 / limit 20.
    fn window(&self) -> (u64, u64) {
        let offset = param_u64(&self.params, "offset").unwrap_or(0);
        let limit = param_u64(&self.params, "limit").unwrap_or(DEFAULT_PAGE_LIMIT).max(1);
        (offset, limit)
    }

    fn params_for(&self, offset: u64, limit: u64) -> FetchParams {
        let mut params = self.params.clone();
        params.insert("offset".to_string(), offset.into());
        params.insert("limit".to_string(), limit.into());
        params
    }
}

/// Read `(offset, limit)` from a next-page URL.
///
/// A missing `limit` defaults to 20. A missing or non-numeric `offset` is an
/// error, as is a string that does not parse as a URL.
pub fn parse_next_url(next: &str) -> Result<(u64, u64), SyncError> {
    let url = Url::parse(next).map_err(|e| SyncError::InvalidRequest(format!("invalid next url '{next}': {e}")))?;

    let mut offset = None;
    let mut limit = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "offset" => offset = Some(value.into_owned()),
            "limit" => limit = Some(value.into_owned()),
            _ => {}
        }
    }

    let offset = offset
        .ok_or_else(|| SyncError::InvalidRequest(format!("next url '{next}' has no offset")))?
        .parse::<u64>()
        .map_err(|e| SyncError::InvalidRequest(format!("next url '{next}' has a bad offset: {e}")))?;
    let limit = limit
        .and_then(|l| l.parse::<u64>().ok())
        .unwrap_or(DEFAULT_PAGE_LIMIT)
        .max(1);

    Ok((offset, limit))
}

#[derive(Clone)]
pub struct PaginationStrategy {
    client: Arc<dyn SourceClient>,
}

impl PaginationStrategy {
    #[must_use]
    pub fn new(client: Arc<dyn SourceClient>) -> Self {
        Self { client }
    }

    /// Walk every page. A fetch error aborts the walk; records gathered so far
    /// are discarded.
    pub async fn fetch_all(&self, ctx: &SyncContext, request: &SyncRequest) -> Result<Vec<ExternalRecord>, SyncError> {
        let (mut offset, mut limit) = request.window();
        let mut records = Vec::new();
        let mut pages: u64 = 0;

        loop {
            ctx.check()?;

            let requested = limit;
            let response = self
                .client
                .fetch_paginated(ctx, &request.source, &request.operation, &request.params_for(offset, limit))
                .await?;
            pages += 1;

            let page_len = response.items.len() as u64;
            debug!(source = %request.source, offset, limit, page_len, "Fetched page");
            if page_len == 0 {
                break;
            }
            records.extend(response.items);

            let Some(cursor) = response.pagination.filter(|p| p.has_next) else {
                break;
            };

            match cursor.next.as_deref().filter(|n| !n.is_empty()).map(parse_next_url) {
                Some(Ok((next_offset, next_limit))) => {
                    offset = next_offset;
                    limit = next_limit;
                }
                Some(Err(err)) => {
                    warn!(source = %request.source, error = %err, "Unreadable next cursor, advancing by limit");
                    offset += limit;
                }
                None => {
                    warn!(source = %request.source, "Next page advertised without cursor, advancing by limit");
                    offset += limit;
                }
            }

            if page_len < requested {
                break;
            }
        }

        info!(source = %request.source, pages, records = records.len(), "Pagination complete");
        Ok(records)
    }

    /// Exactly one page at the request's offset/limit.
    pub async fn fetch(&self, ctx: &SyncContext, request: &SyncRequest) -> Result<Vec<ExternalRecord>, SyncError> {
        let (offset, limit) = request.window();
        let response = self
            .client
            .fetch_paginated(ctx, &request.source, &request.operation, &request.params_for(offset, limit))
            .await?;
        Ok(response.items)
    }
}
