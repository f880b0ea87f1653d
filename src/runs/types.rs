// Run history types
//
// Runs arrive in two shapes: flat `flowrun` records from the data platform
// and nested run objects from the orchestration API. Both normalize to
// `RunRecord`.

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::utils::serde_helpers::{lenient_datetime, parse_timestamp};

/// Outcome of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Succeeded,
    Failed,
    Running,
    Cancelled,
    Other(String),
}

impl RunStatus {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "Succeeded" => RunStatus::Succeeded,
            "Failed" => RunStatus::Failed,
            "Running" => RunStatus::Running,
            "Cancelled" => RunStatus::Cancelled,
            other => RunStatus::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            RunStatus::Succeeded => "Succeeded",
            RunStatus::Failed => "Failed",
            RunStatus::Running => "Running",
            RunStatus::Cancelled => "Cancelled",
            RunStatus::Other(other) => other,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for RunStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// One execution of a flow
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunRecord {
    /// Run id within its flow
    pub name: String,
    pub status: RunStatus,
    #[serde(with = "lenient_datetime")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(with = "lenient_datetime")]
    pub end_time: Option<DateTime<Utc>>,
}

fn str_at<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    let mut current = value;
    for key in path {
        current = current.get(*key)?;
    }
    current.as_str().filter(|s| !s.is_empty())
}

impl RunRecord {
    /// Normalize a data-platform `flowrun` record (`name, status, starttime, endtime`)
    pub fn from_data_platform(record: &Value) -> Self {
        Self {
            name: str_at(record, &["name"]).unwrap_or_default().to_string(),
            status: RunStatus::parse(str_at(record, &["status"]).unwrap_or("Unknown")),
            start_time: str_at(record, &["starttime"]).and_then(parse_timestamp),
            end_time: str_at(record, &["endtime"]).and_then(parse_timestamp),
        }
    }

    /// Normalize an orchestration API run, preferring `properties.*` over top-level fields
    pub fn from_orchestration(run: &Value) -> Self {
        let field = |nested: &str, flat: &str| {
            str_at(run, &["properties", nested]).or_else(|| str_at(run, &[flat]))
        };
        Self {
            name: str_at(run, &["name"]).unwrap_or_default().to_string(),
            status: RunStatus::parse(field("status", "status").unwrap_or("Unknown")),
            start_time: field("startTime", "startTime").and_then(parse_timestamp),
            end_time: field("endTime", "endTime").and_then(parse_timestamp),
        }
    }
}
