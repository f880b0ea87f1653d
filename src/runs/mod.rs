// Run history module for Flow Monitor
//
// Bulk listing of a flow's latest runs, and the streaming search that finds
// runs mentioning one record.

pub mod bulk;
pub mod relevance;
pub mod stream;
pub mod types;

pub use bulk::list_all_runs_for_flow;
pub use relevance::RecordMatcher;
pub use stream::{RunSearch, SearchEvent, SearchRequest, SearchSession, SearchSlot};
pub use types::{RunRecord, RunStatus};
