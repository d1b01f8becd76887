// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! reqwest implementation of [`SourceClient`].
//!
//! One pooled `reqwest::Client` serves every source. The client timeout is the
//! per-attempt bound; the job's [`SyncContext`] deadline bounds the whole call
//! including retries.

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::Url;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use super::catalog::{self, SourceEndpoint, SourceProfile};
use super::resilient::ResilientClient;
use super::{FetchParams, PaginatedResponse, SourceClient};
use crate::context::SyncContext;
use crate::error::SyncError;
use crate::item::{ExternalId, ExternalRecord};
use crate::metrics::LatencyTimer;

#[derive(Debug, Clone, PartialEq)]
pub struct HttpClientConfig {
    /// Per-attempt request timeout
    pub timeout: Duration,
    pub pool_idle_timeout: Duration,
    pub pool_max_idle_per_host: usize,
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            pool_idle_timeout: Duration::from_secs(30),
            pool_max_idle_per_host: 10,
            user_agent: concat!("item-sync/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

pub struct HttpSourceClient {
    http: reqwest::Client,
    resilient: ResilientClient,
    endpoints: HashMap<String, SourceEndpoint>,
}

impl HttpSourceClient {
    /// Build the pooled client. Every built-in source starts at its default endpoint.
    pub fn new(config: &HttpClientConfig, resilient: ResilientClient) -> Result<Self, SyncError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .pool_idle_timeout(config.pool_idle_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| SyncError::Config(format!("failed to build HTTP client: {e}")))?;

        let endpoints = catalog::profiles()
            .iter()
            .map(|p| (p.name.to_string(), p.default_endpoint()))
            .collect();

        Ok(Self {
            http,
            resilient,
            endpoints,
        })
    }

    /// Override where a source is reached (base URL, API key).
    #[must_use]
    pub fn with_endpoint(mut self, api_source: impl Into<String>, endpoint: SourceEndpoint) -> Self {
        self.endpoints.insert(api_source.into(), endpoint);
        self
    }

    #[must_use]
    pub fn endpoint(&self, api_source: &str) -> Option<&SourceEndpoint> {
        self.endpoints.get(api_source)
    }

    fn resolve(&self, api_source: &str) -> Result<(&'static SourceProfile, &SourceEndpoint), SyncError> {
        let profile = catalog::profile(api_source).ok_or_else(|| SyncError::UnsupportedSource(api_source.to_string()))?;
        let endpoint = self
            .endpoints
            .get(api_source)
            .ok_or_else(|| SyncError::Config(format!("no endpoint configured for '{api_source}'")))?;
        Ok((profile, endpoint))
    }

    async fn get_json(&self, ctx: &SyncContext, profile: &SourceProfile, url: Url) -> Result<Value, SyncError> {
        let _timer = LatencyTimer::new(profile.name);
        self.resilient.call(ctx, profile.breaker, || self.send(url.clone())).await
    }

    async fn send(&self, url: Url) -> Result<Value, SyncError> {
        // Path only; the query may carry an API key
        debug!(host = url.host_str().unwrap_or_default(), path = url.path(), "GET");

        let response = self.http.get(url).header(ACCEPT, "application/json").send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Http {
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("unexpected status").to_string(),
            });
        }

        Ok(response.json::<Value>().await?)
    }

    async fn fetch_page(
        &self,
        ctx: &SyncContext,
        api_source: &str,
        operation: &str,
        params: &FetchParams,
    ) -> Result<PaginatedResponse, SyncError> {
        let (profile, endpoint) = self.resolve(api_source)?;
        let url = (profile.list_url)(endpoint, operation, params)?;
        let body = self.get_json(ctx, profile, url).await?;
        let page = (profile.decode_page)(body)?;
        crate::metrics::record_page_fetched(api_source);
        Ok(page)
    }
}

#[async_trait]
impl SourceClient for HttpSourceClient {
    async fn fetch(
        &self,
        ctx: &SyncContext,
        api_source: &str,
        operation: &str,
        params: &FetchParams,
    ) -> Result<Vec<ExternalRecord>, SyncError> {
        Ok(self.fetch_page(ctx, api_source, operation, params).await?.items)
    }

    async fn fetch_paginated(
        &self,
        ctx: &SyncContext,
        api_source: &str,
        operation: &str,
        params: &FetchParams,
    ) -> Result<PaginatedResponse, SyncError> {
        self.fetch_page(ctx, api_source, operation, params).await
    }

    async fn fetch_by_id(
        &self,
        ctx: &SyncContext,
        api_source: &str,
        id: &ExternalId,
    ) -> Result<ExternalRecord, SyncError> {
        let (profile, endpoint) = self.resolve(api_source)?;
        let detail = profile.detail.ok_or_else(|| SyncError::UnsupportedOperation {
            api_source: api_source.to_string(),
            operation: "fetch_by_id".to_string(),
        })?;

        let url = (detail.url)(endpoint, id)?;
        match self.get_json(ctx, profile, url).await {
            Ok(body) => (detail.decode)(body),
            Err(SyncError::Http { status: 404, .. }) => Err(SyncError::NotFound(format!("{api_source} item {id}"))),
            Err(err) => Err(err),
        }
    }
}
