// Core flow types for Flow Monitor
//
// Flow records as returned by the Dataverse `workflows` entity set, and the
// classified rows the scanner derives from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::serde_helpers::{lenient_datetime, loose_bool, loose_i64};
use crate::utils::{encode_component, strip_braces};

/// Default maker portal base URL
pub const DEFAULT_MAKER_BASE_URL: &str = "https://make.powerautomate.com";

/// Lifecycle state of a flow (`statecode`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FlowStatus {
    Draft,
    Active,
    Unknown(Option<i64>),
}

impl FlowStatus {
    pub fn from_state_code(code: Option<i64>) -> Self {
        match code {
            Some(0) => FlowStatus::Draft,
            Some(1) => FlowStatus::Active,
            other => FlowStatus::Unknown(other),
        }
    }
}

impl std::fmt::Display for FlowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlowStatus::Draft => write!(f, "Draft"),
            FlowStatus::Active => write!(f, "Active"),
            FlowStatus::Unknown(Some(code)) => write!(f, "Unknown ({})", code),
            FlowStatus::Unknown(None) => write!(f, "Unknown"),
        }
    }
}

/// One cloud flow record
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FlowRecord {
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Legacy workflow id
    #[serde(default)]
    pub workflowid: Option<String>,
    /// Unique id used by the maker portal and the flow service
    #[serde(default)]
    pub workflowidunique: Option<String>,
    /// Raw JSON-encoded definition
    #[serde(default)]
    pub clientdata: Option<String>,
    /// 0 = Draft, 1 = Active
    #[serde(default, deserialize_with = "loose_i64")]
    pub statecode: Option<i64>,
    /// Whether the flow ships in a managed solution
    #[serde(default, deserialize_with = "loose_bool")]
    pub ismanaged: bool,
    /// Last modification time
    #[serde(default, with = "lenient_datetime")]
    pub modifiedon: Option<DateTime<Utc>>,
}

impl FlowRecord {
    pub fn status(&self) -> FlowStatus {
        FlowStatus::from_state_code(self.statecode)
    }

    /// Id used by the maker portal: unique id, falling back to the legacy id
    pub fn maker_id(&self) -> String {
        let id = self
            .workflowidunique
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(self.workflowid.as_deref())
            .unwrap_or("");
        strip_braces(id)
    }

    /// Legacy id, braces stripped
    pub fn alternate_id(&self) -> String {
        strip_braces(self.workflowid.as_deref().unwrap_or(""))
    }

    /// Heuristic for flows authored by Microsoft
    pub fn is_system_flow(&self) -> bool {
        if !self.ismanaged {
            return false;
        }
        let lower = self.name.to_lowercase();
        self.name.starts_with("[Flow]")
            || lower.contains("microsoft copilot studio")
            || lower.contains("microsoft dataverse")
            || ["microsoft", "dynamics", "system", "default"]
                .iter()
                .any(|prefix| lower.starts_with(prefix))
    }
}

/// Environment context needed to build deep links
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanContext {
    pub environment_id: Option<String>,
    pub maker_base_url: String,
}

impl ScanContext {
    pub fn new(environment_id: Option<String>) -> Self {
        Self {
            environment_id,
            maker_base_url: DEFAULT_MAKER_BASE_URL.to_string(),
        }
    }

    pub fn with_maker_base_url(mut self, url: impl Into<String>) -> Self {
        self.maker_base_url = url.into();
        self
    }

    fn environment_segment(&self) -> Option<String> {
        self.environment_id
            .as_deref()
            .filter(|env| !env.is_empty())
            .map(encode_component)
    }

    /// Run history page of a flow; empty when either id is missing
    pub fn runs_url(&self, flow_id: &str) -> String {
        match self.environment_segment() {
            Some(env) if !flow_id.is_empty() => format!(
                "{}/environments/{}/solutions/~preferred/flows/{}/runs",
                self.maker_base_url.trim_end_matches('/'),
                env,
                flow_id
            ),
            _ => String::new(),
        }
    }

    /// Page of a single run; empty when any id is missing
    pub fn run_url(&self, flow_id: &str, run_name: &str) -> String {
        let base = self.runs_url(flow_id);
        if base.is_empty() || run_name.is_empty() {
            return String::new();
        }
        format!("{}/{}", base, run_name)
    }
}

/// Fields every classified row carries
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowSummary {
    pub name: String,
    pub status: String,
    pub flow_id_maker: String,
    pub flow_id_alt: String,
    pub run_history_url: String,
    pub is_system: bool,
}

impl FlowSummary {
    pub fn from_record(flow: &FlowRecord, ctx: &ScanContext) -> Self {
        let flow_id_maker = flow.maker_id();
        Self {
            name: flow.name.clone(),
            status: flow.status().to_string(),
            run_history_url: ctx.runs_url(&flow_id_maker),
            flow_id_alt: flow.alternate_id(),
            flow_id_maker,
            is_system: flow.is_system_flow(),
        }
    }
}

/// Classification-specific part of a row
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RowDetail {
    Trigger { change_type: String },
    Update { operations: String, fields: String },
    Retrieve { operations: String, columns: String },
}

/// A flow's relationship to the scanned entity
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassifiedRow {
    #[serde(flatten)]
    pub summary: FlowSummary,
    #[serde(flatten)]
    pub detail: RowDetail,
}

/// Output of a full scan
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ScanReport {
    pub triggers: Vec<ClassifiedRow>,
    pub updates: Vec<ClassifiedRow>,
    pub retrieves: Vec<ClassifiedRow>,
}

impl ScanReport {
    pub fn total(&self) -> usize {
        self.triggers.len() + self.updates.len() + self.retrieves.len()
    }
}
