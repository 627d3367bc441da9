//! Replay recorded browser activity through the detector
//!
//! A trace is a JSON-lines file. Each line carries `at_ms` (milliseconds since
//! the start of the trace) and a `kind`:
//!
//! ```text
//! {"at_ms": 0,    "kind": "open_tab", "tab": 1, "site": "claude.ai", "page": {...}}
//! {"at_ms": 200,  "kind": "page", "tab": 1, "page": {"present": ["..."], "title": "Chat"}}
//! {"at_ms": 300,  "kind": "request_started", "tab": 1, "request": "r1", "url": "https://..."}
//! {"at_ms": 4000, "kind": "request_completed", "request": "r1"}
//! {"at_ms": 4100, "kind": "focus", "tab": 1, "active": true}
//! {"at_ms": 9000, "kind": "close_tab", "tab": 1}
//! ```
//!
//! Blank lines and lines starting with `#` are ignored.

use anyhow::{Context, bail};
use async_trait::async_trait;
use chime_detect::{Host, HostEvent, LivePage, PageSnapshot, SiteAdapter, Source, TabHandle, TabId};
use chime_notify::{Completion, Notifier, Settings, WebhookTestResult};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

/// How long to keep running after the last event so pending checks settle
pub const DEFAULT_TAIL: Duration = Duration::from_secs(10);

/// One line of a trace
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TraceEntry {
    pub at_ms: u64,
    #[serde(flatten)]
    pub event: TraceEvent,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceEvent {
    /// A supported page finished loading in a tab
    OpenTab {
        tab: TabId,
        /// Site key or hostname
        site: String,
        #[serde(default)]
        active: bool,
        #[serde(default)]
        page: PageSnapshot,
    },
    /// The tab's page changed
    Page { tab: TabId, page: PageSnapshot },
    RequestStarted {
        tab: TabId,
        request: String,
        url: String,
    },
    RequestCompleted { request: String },
    RequestFailed { request: String },
    /// The tab gained or lost focus
    Focus { tab: TabId, active: bool },
    CloseTab { tab: TabId },
}

/// Parse a trace, ordering entries by time
pub fn parse_trace(input: &str) -> anyhow::Result<Vec<TraceEntry>> {
    let mut entries = Vec::new();
    for (index, line) in input.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let entry: TraceEntry = serde_json::from_str(line)
            .with_context(|| format!("line {}: invalid trace entry", index + 1))?;
        entries.push(entry);
    }
    // stable, so same-time events keep file order
    entries.sort_by_key(|e| e.at_ms);
    Ok(entries)
}

/// A host event and when it happened, relative to the trace start
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayEvent {
    pub at: Duration,
    pub event: HostEvent,
}

impl std::fmt::Display for ReplayEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ms = self.at.as_millis();
        match &self.event {
            HostEvent::Notified {
                source, completion, ..
            } => write!(
                f,
                "[{:>7}ms] {} answer complete ({}): {}",
                ms,
                completion.site_label(),
                source_name(*source),
                completion.tab_title
            ),
            HostEvent::Skipped {
                tab_id,
                source,
                reason,
            } => write!(
                f,
                "[{:>7}ms] tab {}: {} completion skipped ({})",
                ms,
                tab_id,
                source_name(*source),
                reason
            ),
            HostEvent::TabClosed { tab_id } => write!(f, "[{:>7}ms] tab {} closed", ms, tab_id),
        }
    }
}

fn source_name(source: Source) -> &'static str {
    match source {
        Source::Page => "page",
        Source::Network => "network",
    }
}

struct ReplayTab {
    page: LivePage,
    handle: TabHandle,
}

/// Drives a [`Host`] from a trace in real time
pub struct Replayer {
    host: Arc<Host>,
    events: broadcast::Receiver<HostEvent>,
    tabs: HashMap<TabId, ReplayTab>,
    started: Instant,
    recorded: Vec<ReplayEvent>,
}

impl Replayer {
    /// The host's message loop must already be running
    pub fn new(host: Arc<Host>) -> Self {
        let events = host.subscribe();
        Self {
            host,
            events,
            tabs: HashMap::new(),
            started: Instant::now(),
            recorded: Vec::new(),
        }
    }

    /// Play every entry, then wait `tail` for late completions
    pub async fn run(
        mut self,
        entries: Vec<TraceEntry>,
        tail: Duration,
    ) -> anyhow::Result<Vec<ReplayEvent>> {
        self.started = Instant::now();
        let mut end = self.started;
        for entry in entries {
            let at = self.started + Duration::from_millis(entry.at_ms);
            self.wait_until(at).await;
            self.apply(entry.event)
                .await
                .with_context(|| format!("event at {}ms", entry.at_ms))?;
            end = at;
        }
        self.wait_until(end + tail).await;
        self.host.shutdown();
        Ok(self.recorded)
    }

    async fn wait_until(&mut self, deadline: Instant) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return,
                event = self.events.recv() => match event {
                    Ok(event) => self.record(event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("Replay missed {} host events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tokio::time::sleep_until(deadline).await;
                        return;
                    }
                },
            }
        }
    }

    fn record(&mut self, event: HostEvent) {
        let event = ReplayEvent {
            at: self.started.elapsed(),
            event,
        };
        tracing::debug!("{}", event);
        self.recorded.push(event);
    }

    fn tab(&self, tab: TabId) -> anyhow::Result<&ReplayTab> {
        match self.tabs.get(&tab) {
            Some(t) => Ok(t),
            None => bail!("tab {} is not open", tab),
        }
    }

    async fn apply(&mut self, event: TraceEvent) -> anyhow::Result<()> {
        match event {
            TraceEvent::OpenTab {
                tab,
                site,
                active,
                page,
            } => {
                let Some(adapter) = SiteAdapter::for_hostname(&site) else {
                    bail!("unsupported site '{}'", site);
                };
                let page = LivePage::new(page);
                let handle = self
                    .host
                    .open_tab(tab, adapter, Arc::new(page.clone()), active);
                self.tabs.insert(tab, ReplayTab { page, handle });
            }
            TraceEvent::Page { tab, page } => {
                let title = page.title.clone();
                let t = self.tab(tab)?;
                t.page.replace(page);
                t.handle.notify_mutation();
                self.host.set_title(tab, title);
            }
            TraceEvent::RequestStarted { tab, request, url } => {
                if !self.host.request_started(&request, tab, &url) {
                    tracing::debug!("Request {} is not an answer stream", request);
                }
            }
            TraceEvent::RequestCompleted { request } => {
                self.host.request_completed(&request).await;
            }
            TraceEvent::RequestFailed { request } => self.host.request_failed(&request),
            TraceEvent::Focus { tab, active } => {
                let t = self.tab(tab)?;
                t.page.update(|s| s.visible = active);
                t.handle.notify_mutation();
                self.host.set_active(tab, active);
            }
            TraceEvent::CloseTab { tab } => {
                self.tabs.remove(&tab);
                self.host.close_tab(tab);
            }
        }
        Ok(())
    }
}

/// Prints completions instead of playing sounds or posting
pub struct DryRunNotifier;

#[async_trait]
impl Notifier for DryRunNotifier {
    async fn notify(&self, completion: &Completion, _settings: &Settings) {
        tracing::info!("Dry run: would notify for {}", completion.site);
    }

    fn test_sound(&self, _site: &str, _settings: &Settings) -> chime_notify::Result<Option<String>> {
        Ok(None)
    }

    async fn test_webhook(&self, _url: &str) -> WebhookTestResult {
        WebhookTestResult {
            ok: false,
            status: None,
            error: Some("dry run".to_string()),
        }
    }
}
