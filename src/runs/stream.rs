// Streaming run history search
//
// Pages through a flow's runs on the orchestration API and probes each run
// for the record, reporting matches and progress over a channel as they
// happen. Cancellation is observed between pages only.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::relevance::RecordMatcher;
use super::types::RunRecord;
use crate::client::flow_service::{ListRunsRequest, RunHistoryApi};
use crate::error::FlowMonitorError;

/// Runs requested per orchestration page
pub const STREAM_PAGE_SIZE: u32 = 250;

/// Default bound on concurrent run probes
pub const DEFAULT_MAX_CONCURRENT_PROBES: usize = 250;

/// Update emitted while a search runs
#[derive(Debug, Clone, PartialEq)]
pub enum SearchEvent {
    /// A run mentioning the record
    RunFound {
        run: RunRecord,
        /// Flow id the run was listed under
        flow_id: String,
    },
    /// A page has been fully probed
    Progress { scanned: usize, has_more: bool },
    /// The search stopped on an error
    Error(FlowMonitorError),
    /// Always the last event of a search
    Finished { scanned: usize, cancelled: bool },
}

/// What to search for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub env_id: Option<String>,
    /// Maker id of the flow
    pub primary_id: String,
    /// Tried once when the primary id has no runs at all
    pub fallback_id: Option<String>,
    /// OData filter passed through to the run listing
    pub filter: Option<String>,
    pub page_size: u32,
    pub max_concurrent_probes: usize,
}

impl SearchRequest {
    pub fn new(env_id: Option<String>, primary_id: impl Into<String>) -> Self {
        Self {
            env_id,
            primary_id: primary_id.into(),
            fallback_id: None,
            filter: None,
            page_size: STREAM_PAGE_SIZE,
            max_concurrent_probes: DEFAULT_MAX_CONCURRENT_PROBES,
        }
    }

    pub fn with_fallback(mut self, fallback_id: Option<String>) -> Self {
        self.fallback_id = fallback_id.filter(|id| !id.is_empty());
        self
    }

    pub fn with_filter(mut self, filter: Option<String>) -> Self {
        self.filter = filter.filter(|f| !f.is_empty());
        self
    }

    pub fn with_max_concurrent_probes(mut self, limit: usize) -> Self {
        self.max_concurrent_probes = limit.max(1);
        self
    }
}

/// Mutable state of one search
#[derive(Debug, Default)]
pub struct SearchSession {
    cancel: CancellationToken,
    scanned: usize,
    cursor: Option<String>,
}

impl SearchSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel_token(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ..Self::default()
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Runs probed so far
    pub fn scanned(&self) -> usize {
        self.scanned
    }
}

/// Record-scoped run search over a run-history API
#[derive(Clone)]
pub struct RunSearch {
    api: Arc<dyn RunHistoryApi>,
    matcher: RecordMatcher,
}

impl RunSearch {
    pub fn new(api: Arc<dyn RunHistoryApi>, matcher: RecordMatcher) -> Self {
        Self { api, matcher }
    }

    pub fn matcher(&self) -> &RecordMatcher {
        &self.matcher
    }

    /// Run the search to completion or cancellation.
    ///
    /// Always sends exactly one `Finished` event, last.
    pub async fn run(
        &self,
        session: &mut SearchSession,
        request: &SearchRequest,
        events: &mpsc::UnboundedSender<SearchEvent>,
    ) {
        let cancelled = self.search_pages(session, request, events).await;
        info!(
            "Run search for {} finished: {} scanned{}",
            request.primary_id,
            session.scanned,
            if cancelled { ", cancelled" } else { "" }
        );
        let _ = events.send(SearchEvent::Finished {
            scanned: session.scanned,
            cancelled,
        });
    }

    /// Returns whether the loop stopped because of cancellation
    async fn search_pages(
        &self,
        session: &mut SearchSession,
        request: &SearchRequest,
        events: &mpsc::UnboundedSender<SearchEvent>,
    ) -> bool {
        let Some(env_id) = request.env_id.as_deref().filter(|id| !id.is_empty()) else {
            let _ = events.send(SearchEvent::Error(FlowMonitorError::Config(
                "Environment ID missing".to_string(),
            )));
            return false;
        };

        let mut flow_id = request.primary_id.clone();
        let mut tried_fallback = false;

        loop {
            if session.is_cancelled() {
                return true;
            }

            let list_request = ListRunsRequest {
                env_id: env_id.to_string(),
                maker_id: flow_id.clone(),
                top: Some(request.page_size),
                next_link: session.cursor.clone(),
                filter: request.filter.clone(),
            };
            let page = match self.api.list_runs(&list_request).await {
                Ok(page) => page,
                Err(e) => {
                    warn!("Run listing for {} failed: {}", flow_id, e);
                    let _ = events.send(SearchEvent::Error(e));
                    return false;
                }
            };

            let first_page = session.cursor.is_none() && session.scanned == 0;
            if first_page && page.runs.is_empty() && !tried_fallback {
                if let Some(fallback) = request
                    .fallback_id
                    .as_deref()
                    .filter(|id| *id != request.primary_id)
                {
                    debug!("No runs under {}, restarting with {}", flow_id, fallback);
                    flow_id = fallback.to_string();
                    tried_fallback = true;
                    continue;
                }
            }

            self.probe_page(env_id, &flow_id, &page.runs, request.max_concurrent_probes, events)
                .await;
            session.scanned += page.runs.len();

            let has_more = page.has_more();
            let _ = events.send(SearchEvent::Progress {
                scanned: session.scanned,
                has_more,
            });

            if !has_more {
                return false;
            }
            session.cursor = page.next_link;
        }
    }

    async fn probe_page(
        &self,
        env_id: &str,
        flow_id: &str,
        runs: &[Value],
        limit: usize,
        events: &mpsc::UnboundedSender<SearchEvent>,
    ) {
        let mut probes = stream::iter(runs.iter().cloned())
            .map(|run: Value| async move {
                self.matcher
                    .is_relevant(self.api.as_ref(), env_id, flow_id, &run)
                    .await
                    .then(|| RunRecord::from_orchestration(&run))
            })
            .buffer_unordered(limit.max(1));

        while let Some(found) = probes.next().await {
            if let Some(run) = found {
                debug!("Run {} mentions {}", run.name, self.matcher.record_id());
                let _ = events.send(SearchEvent::RunFound {
                    run,
                    flow_id: flow_id.to_string(),
                });
            }
        }
    }
}

/// At most one active search; starting another replaces it
#[derive(Default)]
pub struct SearchSlot {
    active: Option<(CancellationToken, JoinHandle<()>)>,
}

impl SearchSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel and await the current search, then spawn `search`
    pub async fn start(
        &mut self,
        search: RunSearch,
        request: SearchRequest,
        events: mpsc::UnboundedSender<SearchEvent>,
    ) {
        self.stop().await;

        let mut session = SearchSession::new();
        let cancel = session.cancel_token();
        let handle = tokio::spawn(async move {
            search.run(&mut session, &request, &events).await;
        });
        self.active = Some((cancel, handle));
    }

    /// Cancel the current search and wait for it to settle
    pub async fn stop(&mut self) {
        if let Some((cancel, handle)) = self.active.take() {
            cancel.cancel();
            if let Err(e) = handle.await {
                warn!("Run search task ended abnormally: {}", e);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.active
            .as_ref()
            .map(|(_, handle)| !handle.is_finished())
            .unwrap_or(false)
    }
}
