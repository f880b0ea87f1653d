// Flow analysis module
//
// Parses cloud flow definitions and classifies how each flow relates to a
// Dataverse entity.

pub mod change_type;
pub mod classifier;
pub mod definition;
pub mod scanner;
pub mod types;
pub mod walker;

pub use change_type::{decode_change_type, ChangeType};
pub use definition::{ActionNode, TriggerNode, WorkflowDefinition};
pub use scanner::{scan_all, scan_retrieves, scan_triggers, scan_updates, RowFilter, StatusFilter};
pub use types::{ClassifiedRow, FlowRecord, FlowStatus, FlowSummary, RowDetail, ScanContext, ScanReport};
pub use walker::walk;
