//! Flow Monitor Library
//!
//! Finds the Power Automate cloud flows that trigger on, update, or read a
//! Dataverse entity, and searches a flow's run history for the runs that
//! touched one record.

pub mod bridge;
pub mod client;
pub mod config;
pub mod error;
pub mod flow;
pub mod runs;
pub mod utils;

// Re-export main types for convenience
pub use client::{ApiClient, DataverseClient, FlowServiceClient, TokenCache};
pub use config::{ConfigManager, FlowMonitorConfig};
pub use error::{FlowMonitorError, Result};
pub use flow::{scan_all, ScanContext, ScanReport};
pub use runs::{list_all_runs_for_flow, RecordMatcher, RunSearch, SearchEvent, SearchSlot};
