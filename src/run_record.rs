// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Persisted outcome of one job execution.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

/// Item tallies for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
}

/// One row of the `sync_jobs` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: i64,
    pub job_name: String,
    pub api_source: String,
    pub status: RunStatus,
    /// Epoch millis
    pub started_at: i64,
    pub completed_at: Option<i64>,
    pub counts: RunCounts,
    pub error_message: Option<String>,
    pub execution_time_ms: Option<i64>,
}

impl RunRecord {
    /// A fresh record in `running` state.
    pub fn started(id: i64, job_name: impl Into<String>, api_source: impl Into<String>, started_at: i64) -> Self {
        Self {
            id,
            job_name: job_name.into(),
            api_source: api_source.into(),
            status: RunStatus::Running,
            started_at,
            completed_at: None,
            counts: RunCounts::default(),
            error_message: None,
            execution_time_ms: None,
        }
    }

    /// Apply a terminal update.
    pub fn apply(&mut self, update: &RunUpdate, completed_at: i64) {
        self.status = update.status;
        self.completed_at = Some(completed_at);
        self.counts = update.counts;
        self.error_message = update.error_message.clone();
        self.execution_time_ms = Some(update.execution_time_ms());
    }
}

/// Terminal update written once per run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunUpdate {
    pub status: RunStatus,
    pub counts: RunCounts,
    pub error_message: Option<String>,
    pub execution_time: Duration,
}

impl RunUpdate {
    #[must_use]
    pub fn execution_time_ms(&self) -> i64 {
        i64::try_from(self.execution_time.as_millis()).unwrap_or(i64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [RunStatus::Running, RunStatus::Completed, RunStatus::Failed] {
            assert_eq!(status.as_str().parse::<RunStatus>().unwrap(), status);
        }
        assert!("paused".parse::<RunStatus>().is_err());
    }

    #[test]
    fn test_apply_terminal_update() {
        let mut record = RunRecord::started(7, "pokemon-sync", "pokemon", 1_000);
        assert!(!record.status.is_terminal());

        record.apply(
            &RunUpdate {
                status: RunStatus::Completed,
                counts: RunCounts {
                    processed: 5,
                    succeeded: 5,
                    failed: 0,
                },
                error_message: None,
                execution_time: Duration::from_millis(1234),
            },
            2_234,
        );

        assert_eq!(record.status, RunStatus::Completed);
        assert_eq!(record.completed_at, Some(2_234));
        assert_eq!(record.counts.succeeded, 5);
        assert_eq!(record.execution_time_ms, Some(1234));
    }
}
