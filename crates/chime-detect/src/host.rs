//! Process-wide registry of tabs, keep-alives and network-side completions
//!
//! The host owns every tab's driver handle, relays keep-alive pulses to tabs
//! whose site needs them, tracks streaming requests and enforces the per-tab
//! notification cooldown shared by both detection paths.

use chime_notify::{
    Completion, Notifier, Settings, SettingsSource, WebhookTestResult, load_or_default,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::adapter::SiteAdapter;
use crate::driver::{HostEnvelope, TabDriver};
use crate::engine::Timings;
use crate::events::{HostMessage, NetworkFinished, TabId, TabMessage};
use crate::handle::TabHandle;
use crate::page::Page;
use crate::tracker::NetworkStreamTracker;

/// Minimum spacing between two notifications for the same tab
pub const TAB_NOTIFY_COOLDOWN: Duration = Duration::from_millis(5000);

/// Keep-alive pulse period
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(1000);

/// Which detection path produced a completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Page,
    Network,
}

/// Observable host activity
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    Notified {
        tab_id: Option<TabId>,
        source: Source,
        completion: Completion,
    },
    Skipped {
        tab_id: TabId,
        source: Source,
        reason: &'static str,
    },
    TabClosed {
        tab_id: TabId,
    },
}

/// What the host knows about an open tab
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabInfo {
    pub adapter: SiteAdapter,
    pub title: String,
    /// Whether the tab is the focused tab of its window
    pub active: bool,
}

struct TabEntry {
    handle: TabHandle,
    info: TabInfo,
}

/// Host configuration
#[derive(Debug, Clone, Copy)]
pub struct HostConfig {
    pub cooldown: Duration,
    pub heartbeat_interval: Duration,
    pub timings: Timings,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            cooldown: TAB_NOTIFY_COOLDOWN,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            timings: Timings::default(),
        }
    }
}

pub struct Host {
    config: HostConfig,
    settings: Arc<dyn SettingsSource>,
    notifier: Arc<dyn Notifier>,
    tabs: Mutex<HashMap<TabId, TabEntry>>,
    last_notified: Mutex<HashMap<TabId, Instant>>,
    heartbeats: Mutex<HashMap<TabId, CancellationToken>>,
    tracker: Mutex<NetworkStreamTracker>,
    outbox: mpsc::UnboundedSender<HostEnvelope>,
    inbox: Mutex<Option<mpsc::UnboundedReceiver<HostEnvelope>>>,
    events: broadcast::Sender<HostEvent>,
    shutdown: CancellationToken,
}

impl Host {
    pub fn new(settings: Arc<dyn SettingsSource>, notifier: Arc<dyn Notifier>) -> Arc<Self> {
        Self::with_config(HostConfig::default(), settings, notifier)
    }

    pub fn with_config(
        config: HostConfig,
        settings: Arc<dyn SettingsSource>,
        notifier: Arc<dyn Notifier>,
    ) -> Arc<Self> {
        let (outbox, inbox) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            config,
            settings,
            notifier,
            tabs: Mutex::new(HashMap::new()),
            last_notified: Mutex::new(HashMap::new()),
            heartbeats: Mutex::new(HashMap::new()),
            tracker: Mutex::new(NetworkStreamTracker::new()),
            outbox,
            inbox: Mutex::new(Some(inbox)),
            events,
            shutdown: CancellationToken::new(),
        })
    }

    /// Replace the request tracker, e.g. to change the endpoint list
    pub fn set_tracker(&self, tracker: NetworkStreamTracker) {
        *self.tracker.lock() = tracker;
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HostEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: HostEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    /// Process tab messages until [`Host::shutdown`]
    ///
    /// Returns `None` if the loop was already started.
    pub fn start(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let mut inbox = self.inbox.lock().take()?;
        let host = Arc::clone(self);
        Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = host.shutdown.cancelled() => break,
                    envelope = inbox.recv() => {
                        let Some(HostEnvelope { tab_id, message }) = envelope else {
                            break;
                        };
                        host.handle_message(Some(tab_id), message).await;
                    }
                }
            }
        }))
    }

    /// Close every tab and stop the message loop
    pub fn shutdown(&self) {
        let tabs: Vec<TabId> = self.tabs.lock().keys().copied().collect();
        for tab_id in tabs {
            self.close_tab(tab_id);
        }
        self.shutdown.cancel();
    }

    // ------------------------------------------------------------------------
    // Tabs
    // ------------------------------------------------------------------------

    /// Start detecting on a loaded page
    ///
    /// Opening an id that is already open replaces its engine, as a
    /// navigation does.
    pub fn open_tab(
        self: &Arc<Self>,
        tab_id: TabId,
        adapter: SiteAdapter,
        page: Arc<dyn Page>,
        active: bool,
    ) -> TabHandle {
        if self.is_open(tab_id) {
            self.close_tab(tab_id);
        }
        let handle = TabDriver::spawn_with_timings(
            tab_id,
            adapter,
            self.config.timings,
            Arc::clone(&page),
            Arc::clone(&self.settings),
            self.outbox.clone(),
        );
        let info = TabInfo {
            adapter,
            title: page.title(),
            active,
        };
        self.tabs.lock().insert(
            tab_id,
            TabEntry {
                handle: handle.clone(),
                info,
            },
        );
        handle
    }

    /// Tear a tab down: engine, keep-alive, cooldown and pending requests
    pub fn close_tab(&self, tab_id: TabId) {
        let entry = self.tabs.lock().remove(&tab_id);
        self.stop_heartbeat(tab_id);
        self.last_notified.lock().remove(&tab_id);
        self.tracker.lock().forget_tab(tab_id);
        if let Some(entry) = entry {
            entry.handle.close();
            tracing::debug!(tab = %tab_id, "Tab closed");
            self.emit(HostEvent::TabClosed { tab_id });
        }
    }

    pub fn is_open(&self, tab_id: TabId) -> bool {
        self.tabs.lock().contains_key(&tab_id)
    }

    pub fn tab_info(&self, tab_id: TabId) -> Option<TabInfo> {
        self.tabs.lock().get(&tab_id).map(|e| e.info.clone())
    }

    pub fn handle(&self, tab_id: TabId) -> Option<TabHandle> {
        self.tabs.lock().get(&tab_id).map(|e| e.handle.clone())
    }

    /// Record a focus change
    pub fn set_active(&self, tab_id: TabId, active: bool) {
        if let Some(entry) = self.tabs.lock().get_mut(&tab_id) {
            entry.info.active = active;
        }
    }

    pub fn set_title(&self, tab_id: TabId, title: impl Into<String>) {
        if let Some(entry) = self.tabs.lock().get_mut(&tab_id) {
            entry.info.title = title.into();
        }
    }

    // ------------------------------------------------------------------------
    // Keep-alive
    // ------------------------------------------------------------------------

    pub fn heartbeat_active(&self, tab_id: TabId) -> bool {
        self.heartbeats.lock().contains_key(&tab_id)
    }

    fn start_heartbeat(self: &Arc<Self>, tab_id: TabId) {
        let Some(handle) = self.handle(tab_id) else {
            tracing::debug!(tab = %tab_id, "Keep-alive requested by unknown tab");
            return;
        };
        let token = {
            let mut heartbeats = self.heartbeats.lock();
            if heartbeats.contains_key(&tab_id) {
                return;
            }
            let token = self.shutdown.child_token();
            heartbeats.insert(tab_id, token.clone());
            token
        };
        tracing::debug!(tab = %tab_id, "Keep-alive started");

        let host: Weak<Self> = Arc::downgrade(self);
        let period = self.config.heartbeat_interval;
        tokio::spawn(async move {
            let mut pulses = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = pulses.tick() => {
                        if handle.send(TabMessage::Pulse).is_err() {
                            tracing::debug!(tab = %tab_id, "Pulse undeliverable, tab gone");
                            if let Some(host) = host.upgrade() {
                                host.close_tab(tab_id);
                            }
                            break;
                        }
                    }
                }
            }
        });
    }

    fn stop_heartbeat(&self, tab_id: TabId) {
        if let Some(token) = self.heartbeats.lock().remove(&tab_id) {
            token.cancel();
            tracing::debug!(tab = %tab_id, "Keep-alive stopped");
        }
    }

    // ------------------------------------------------------------------------
    // Notifications
    // ------------------------------------------------------------------------

    /// Check-and-set the per-tab cooldown
    ///
    /// Only open tabs can claim. The tabs lock is held across the insert so a
    /// concurrent `close_tab` always removes the entry afterwards.
    fn try_claim(&self, tab_id: TabId, now: Instant) -> bool {
        let tabs = self.tabs.lock();
        if !tabs.contains_key(&tab_id) {
            return false;
        }
        let mut last = self.last_notified.lock();
        let cooling = last
            .get(&tab_id)
            .is_some_and(|at| now.saturating_duration_since(*at) < self.config.cooldown);
        if cooling {
            return false;
        }
        last.insert(tab_id, now);
        true
    }

    fn in_cooldown(&self, tab_id: TabId, now: Instant) -> bool {
        self.last_notified
            .lock()
            .get(&tab_id)
            .is_some_and(|at| now.saturating_duration_since(*at) < self.config.cooldown)
    }

    async fn settings(&self) -> Settings {
        load_or_default(self.settings.as_ref()).await
    }

    /// Handle one message from a tab
    ///
    /// `tab_id` is `None` for messages from outside any tab, such as the
    /// settings page. Returns the result of a webhook test.
    pub async fn handle_message(
        self: &Arc<Self>,
        tab_id: Option<TabId>,
        message: HostMessage,
    ) -> Option<WebhookTestResult> {
        match message {
            HostMessage::AnswerDone { .. } => {
                if let Some(completion) = message.into_completion() {
                    self.on_answer_done(tab_id, completion).await;
                }
                None
            }
            HostMessage::StartHeartbeat => {
                if let Some(tab_id) = tab_id {
                    self.start_heartbeat(tab_id);
                }
                None
            }
            HostMessage::StopHeartbeat => {
                if let Some(tab_id) = tab_id {
                    self.stop_heartbeat(tab_id);
                }
                None
            }
            HostMessage::PlayTestSound { site } => {
                let settings = self.settings().await;
                if let Err(e) = self.notifier.test_sound(&site, &settings) {
                    tracing::warn!("Test sound for {} failed: {}", site, e);
                }
                None
            }
            HostMessage::TestWebhook { webhook_url } => {
                Some(self.notifier.test_webhook(&webhook_url).await)
            }
        }
    }

    async fn on_answer_done(&self, tab_id: Option<TabId>, completion: Completion) {
        if let Some(tab_id) = tab_id {
            // A late message from a closed tab must not leave a cooldown entry behind
            if !self.is_open(tab_id) {
                tracing::debug!(tab = %tab_id, "Skipped page completion: tab gone");
                self.emit(HostEvent::Skipped {
                    tab_id,
                    source: Source::Page,
                    reason: "tab gone",
                });
                return;
            }
            if !self.try_claim(tab_id, Instant::now()) {
                tracing::debug!(tab = %tab_id, "Skipped page completion: tab cooldown");
                self.emit(HostEvent::Skipped {
                    tab_id,
                    source: Source::Page,
                    reason: "cooldown",
                });
                return;
            }
        }

        let settings = self.settings().await;
        tracing::info!("{} answer complete: {}", completion.site_label(), completion.tab_title);
        self.notifier.notify(&completion, &settings).await;
        self.emit(HostEvent::Notified {
            tab_id,
            source: Source::Page,
            completion,
        });
    }

    // ------------------------------------------------------------------------
    // Network
    // ------------------------------------------------------------------------

    /// A request left a tab; returns whether it is a tracked answer stream
    pub fn request_started(&self, request_id: &str, tab_id: TabId, url: &str) -> bool {
        self.tracker
            .lock()
            .on_request_started(request_id, tab_id, url, Instant::now())
    }

    pub fn request_failed(&self, request_id: &str) {
        self.tracker.lock().on_request_failed(request_id);
    }

    /// A request finished; returns whether it produced a notification
    pub async fn request_completed(self: &Arc<Self>, request_id: &str) -> bool {
        let finished = self
            .tracker
            .lock()
            .on_request_completed(request_id, Instant::now());
        match finished {
            Some(finished) => self.on_network_finished(finished).await,
            None => false,
        }
    }

    async fn on_network_finished(&self, finished: NetworkFinished) -> bool {
        let NetworkFinished { tab_id, site, duration } = finished;
        tracing::debug!(tab = %tab_id, "{} stream finished after {:?}", site, duration);

        let skip = |reason: &'static str| {
            tracing::debug!(tab = %tab_id, "Skipped network completion: {}", reason);
            self.emit(HostEvent::Skipped {
                tab_id,
                source: Source::Network,
                reason,
            });
            false
        };

        if self.in_cooldown(tab_id, Instant::now()) {
            return skip("cooldown");
        }

        let settings = self.settings().await;
        let Some(info) = self.tab_info(tab_id) else {
            return skip("tab gone");
        };
        // The page engine handles focused tabs itself
        if !settings.always_notify && info.active {
            return skip("tab active");
        }
        if !self.try_claim(tab_id, Instant::now()) {
            return skip("cooldown");
        }

        let completion = Completion::now(site.key(), info.title);
        tracing::info!("{} answer complete (network): {}", site.label(), completion.tab_title);
        self.notifier.notify(&completion, &settings).await;

        let delivered = self
            .handle(tab_id)
            .is_some_and(|handle| handle.send(TabMessage::NetworkDone).is_ok());
        if !delivered {
            self.close_tab(tab_id);
        }

        self.emit(HostEvent::Notified {
            tab_id: Some(tab_id),
            source: Source::Network,
            completion,
        });
        true
    }
}
