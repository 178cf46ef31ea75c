//! Sweep run history.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepKind {
    Renewal,
    DueSoon,
    Overdue,
}

impl SweepKind {
    pub const ALL: [SweepKind; 3] = [SweepKind::Renewal, SweepKind::DueSoon, SweepKind::Overdue];

    pub fn as_str(&self) -> &'static str {
        match self {
            SweepKind::Renewal => "renewal",
            SweepKind::DueSoon => "due_soon",
            SweepKind::Overdue => "overdue",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepRunStatus {
    Running,
    Completed,
    Failed,
}

impl SweepRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SweepRunStatus::Running => "running",
            SweepRunStatus::Completed => "completed",
            SweepRunStatus::Failed => "failed",
        }
    }
}

/// Counters produced by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub scanned: u32,
    pub updated: u32,
    pub notified: u32,
    pub skipped: u32,
    pub failed: u32,
}

/// One (kind, date) execution; the pair is unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepRun {
    pub id: Uuid,
    pub kind: SweepKind,
    pub run_date: NaiveDate,
    pub status: SweepRunStatus,
    pub started_utc: DateTime<Utc>,
    pub finished_utc: Option<DateTime<Utc>>,
    pub report: Option<SweepReport>,
    pub error_message: Option<String>,
}
