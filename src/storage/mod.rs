// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Storage backends.
//!
//! - [`sql::SqlStore`]: SQLite or MySQL through the sqlx `Any` driver
//! - [`memory::InMemoryStore`] / [`memory::InMemoryCache`]: DashMap-backed, for tests and
//!   deployments without a database
//! - [`redis::RedisCache`]: JSON values with `SET EX`

pub mod memory;
pub mod redis;
pub mod sql;
pub mod traits;
