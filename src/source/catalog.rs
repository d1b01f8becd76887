// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Capability table for the built-in sources.
//!
//! Each [`SourceProfile`] bundles everything source-specific: the breaker
//! target, how to build request URLs, how a sync job should walk the source
//! ([`FetchPlan`]) and how to turn a response body into [`ExternalRecord`]s.
//! Adding a source means adding a profile here; nothing else branches on
//! source names.
//!
//! | Source        | Breaker           | Plan                              | By id |
//! |---------------|-------------------|-----------------------------------|-------|
//! | `pokemon`     | `pokemon-api`     | paginated `list`                  | yes   |
//! | `openweather` | `openweather-api` | per city (`cities`, 3 defaults)   | no    |

use reqwest::Url;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{param_str, param_u64, FetchParams, PaginatedResponse, PaginationMetadata};
use crate::error::SyncError;
use crate::item::{ExternalId, ExternalRecord};

/// Where a source lives and how to authenticate against it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEndpoint {
    pub base_url: String,
    pub api_key: Option<String>,
}

impl SourceEndpoint {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
        }
    }

    #[must_use]
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|k| !k.trim().is_empty());
        self
    }

    fn url(&self, path: &str) -> Result<Url, SyncError> {
        let raw = format!("{}/{}", self.base_url.trim_end_matches('/'), path.trim_start_matches('/'));
        Url::parse(&raw).map_err(|e| SyncError::InvalidRequest(format!("invalid url '{raw}': {e}")))
    }
}

/// How a sync job walks a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPlan {
    /// Offset/limit pages following the source's next cursor
    Paginated { operation: &'static str },
    /// One request per region; regions come from a comma-separated parameter
    /// or the defaults
    PerRegion {
        operation: &'static str,
        regions_param: &'static str,
        region_param: &'static str,
        defaults: &'static [&'static str],
    },
}

impl FetchPlan {
    #[must_use]
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Paginated { operation } | Self::PerRegion { operation, .. } => *operation,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DetailLookup {
    pub url: fn(&SourceEndpoint, &ExternalId) -> Result<Url, SyncError>,
    pub decode: fn(Value) -> Result<ExternalRecord, SyncError>,
}

#[derive(Debug, Clone, Copy)]
pub struct SourceProfile {
    pub name: &'static str,
    /// Circuit breaker target shared by every call to this source
    pub breaker: &'static str,
    pub default_base_url: &'static str,
    pub plan: FetchPlan,
    pub list_url: fn(&SourceEndpoint, &str, &FetchParams) -> Result<Url, SyncError>,
    pub decode_page: fn(Value) -> Result<PaginatedResponse, SyncError>,
    pub detail: Option<DetailLookup>,
}

impl SourceProfile {
    #[must_use]
    pub fn default_endpoint(&self) -> SourceEndpoint {
        SourceEndpoint::new(self.default_base_url)
    }

    /// Regions to visit for a [`FetchPlan::PerRegion`] source; empty otherwise.
    #[must_use]
    pub fn regions(&self, params: &FetchParams) -> Vec<String> {
        let FetchPlan::PerRegion { regions_param, defaults, .. } = self.plan else {
            return Vec::new();
        };

        let configured: Vec<String> = param_str(params, regions_param)
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        if configured.is_empty() {
            defaults.iter().map(|r| r.to_string()).collect()
        } else {
            configured
        }
    }
}

const POKEMON: SourceProfile = SourceProfile {
    name: "pokemon",
    breaker: "pokemon-api",
    default_base_url: "https://pokeapi.co/api/v2",
    plan: FetchPlan::Paginated { operation: "list" },
    list_url: pokemon::list_url,
    decode_page: pokemon::decode_page,
    detail: Some(DetailLookup {
        url: pokemon::detail_url,
        decode: pokemon::decode_detail,
    }),
};

const OPENWEATHER: SourceProfile = SourceProfile {
    name: "openweather",
    breaker: "openweather-api",
    default_base_url: "https://api.openweathermap.org/data/2.5",
    plan: FetchPlan::PerRegion {
        operation: "weather",
        regions_param: "cities",
        region_param: "city",
        defaults: &["Jakarta", "Bandung", "Surabaya"],
    },
    list_url: openweather::list_url,
    decode_page: openweather::decode_page,
    detail: None,
};

static PROFILES: &[SourceProfile] = &[POKEMON, OPENWEATHER];

/// Look up a built-in source by name.
#[must_use]
pub fn profile(name: &str) -> Option<&'static SourceProfile> {
    PROFILES.iter().find(|p| p.name == name)
}

#[must_use]
pub fn profiles() -> &'static [SourceProfile] {
    PROFILES
}

fn unsupported(api_source: &str, operation: &str) -> SyncError {
    SyncError::UnsupportedOperation {
        api_source: api_source.to_string(),
        operation: operation.to_string(),
    }
}

fn decode<T: for<'de> Deserialize<'de>>(value: Value) -> Result<T, SyncError> {
    serde_json::from_value(value).map_err(SyncError::from)
}

mod pokemon {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct ListResponse {
        #[serde(default)]
        count: u64,
        next: Option<String>,
        previous: Option<String>,
        #[serde(default)]
        results: Vec<Resource>,
    }

    #[derive(Debug, Deserialize)]
    struct Resource {
        name: String,
        url: String,
    }

    #[derive(Debug, Deserialize)]
    struct Detail {
        id: i64,
        name: String,
    }

    pub(super) fn list_url(endpoint: &SourceEndpoint, operation: &str, params: &FetchParams) -> Result<Url, SyncError> {
        if operation != "list" {
            return Err(unsupported("pokemon", operation));
        }

        let mut url = endpoint.url("pokemon")?;
        let pairs: Vec<(&str, String)> = [("limit", param_u64(params, "limit")), ("offset", param_u64(params, "offset"))]
            .into_iter()
            .filter_map(|(k, v)| v.map(|v| (k, v.to_string())))
            .collect();
        if !pairs.is_empty() {
            url.query_pairs_mut().extend_pairs(pairs);
        }
        Ok(url)
    }

    pub(super) fn decode_page(body: Value) -> Result<PaginatedResponse, SyncError> {
        let page: ListResponse = decode(body)?;

        let items = page
            .results
            .into_iter()
            .map(|resource| {
                // Resources whose URL carries no numeric id fall back to their name
                let id = extract_id(&resource.url)
                    .map(ExternalId::Int)
                    .unwrap_or_else(|| ExternalId::Text(resource.name.clone()));
                ExternalRecord::new(id, resource.name.clone())
                    .with_attribute("raw_data", json!({"name": resource.name, "url": resource.url}))
            })
            .collect();

        Ok(PaginatedResponse {
            items,
            pagination: Some(PaginationMetadata::new(page.count, page.next, page.previous)),
        })
    }

    pub(super) fn detail_url(endpoint: &SourceEndpoint, id: &ExternalId) -> Result<Url, SyncError> {
        endpoint.url(&format!("pokemon/{id}"))
    }

    pub(super) fn decode_detail(body: Value) -> Result<ExternalRecord, SyncError> {
        let detail: Detail = decode(body)?;
        Ok(ExternalRecord::new(detail.id, detail.name.clone())
            .with_attribute("raw_data", json!({"id": detail.id, "name": detail.name})))
    }

    /// Numeric id from `.../pokemon/{id}/`
    pub(super) fn extract_id(url: &str) -> Option<i64> {
        let (_, rest) = url.split_once("/pokemon/")?;
        let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
        digits.parse().ok()
    }
}

mod openweather {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct Current {
        id: i64,
        name: String,
        main: Main,
        #[serde(default)]
        weather: Vec<Condition>,
    }

    #[derive(Debug, Deserialize)]
    struct Main {
        temp: f64,
        humidity: f64,
    }

    #[derive(Debug, Deserialize)]
    struct Condition {
        main: String,
        description: String,
    }

    pub(super) fn list_url(endpoint: &SourceEndpoint, operation: &str, params: &FetchParams) -> Result<Url, SyncError> {
        if operation != "weather" {
            return Err(unsupported("openweather", operation));
        }
        let city = param_str(params, "city")
            .ok_or_else(|| SyncError::InvalidRequest("openweather requires a 'city' parameter".into()))?;
        let api_key = endpoint
            .api_key
            .as_deref()
            .ok_or_else(|| SyncError::Config("openweather api key is not configured".into()))?;

        let mut url = endpoint.url("weather")?;
        url.query_pairs_mut()
            .append_pair("q", city)
            .append_pair("appid", api_key)
            .append_pair("units", "metric");
        Ok(url)
    }

    pub(super) fn decode_page(body: Value) -> Result<PaginatedResponse, SyncError> {
        let current: Current = decode(body.clone())?;
        let (weather_main, description) = current
            .weather
            .first()
            .map(|c| (c.main.clone(), c.description.clone()))
            .unwrap_or_default();

        let record = ExternalRecord::new(current.id, current.name)
            .with_attribute("api_source", "openweather")
            .with_attribute("temperature", current.main.temp)
            .with_attribute("humidity", current.main.humidity)
            .with_attribute("weather_main", weather_main)
            .with_attribute("description", description)
            .with_attribute("raw_data", body);

        Ok(PaginatedResponse {
            items: vec![record],
            pagination: Some(PaginationMetadata::single(1)),
        })
    }
}
