// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Fetch-and-store pipeline.
//!
//! [`SyncJob`] pulls every record of one source through [`PaginationStrategy`]
//! (or region by region) and upserts each into the [`ItemStore`](crate::storage::traits::ItemStore).
//! [`RunGuard`] owns the run record so every run ends with exactly one
//! terminal update.

pub mod job;
pub mod pagination;

pub use job::{RunGuard, SyncJob};
pub use pagination::{parse_next_url, PaginationStrategy, SyncRequest, DEFAULT_PAGE_LIMIT};
