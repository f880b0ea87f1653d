// API client module for Flow Monitor
//
// Token acquisition, the authenticated fetch layer, and the Dataverse and
// orchestration API clients built on it.

pub mod dataverse;
pub mod flow_service;
pub mod http;
pub mod token;

// Re-export commonly used types
pub use dataverse::{DataPlatform, DataverseClient, RecordPage};
pub use flow_service::{FlowServiceClient, ListRunsRequest, RunHistoryApi, RunPage};
pub use http::{ApiClient, ApiClientConfig};
pub use token::{InteractiveTokenProvider, StaticTokenProvider, TokenCache, TokenProvider};
