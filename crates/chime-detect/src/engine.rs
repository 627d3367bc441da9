//! Per-tab completion state machine
//!
//! ```text
//!   IDLE → GENERATING → SETTLING → PENDING_COMPLETION → DONE → IDLE
//!              ↑  flicker  ↓
//!          GENERATING ← SETTLING
//! ```
//!
//! The engine never reads a clock or sleeps. Every entry point takes `now`,
//! and side effects come back as [`EngineAction`]s for the caller to carry
//! out. All timing decisions compare timestamps on a tick, so a throttled
//! timer only delays a decision, it never skips one.

use chime_notify::Completion;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

use crate::adapter::SiteAdapter;
use crate::page::Page;

/// Fallback tick period
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Timing windows of the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// How long "not generating" must hold before it is trusted
    pub grace: Duration,
    /// How long the answer text must stay unchanged
    pub stability: Duration,
    /// Minimum time spent in DONE, and between two completions
    pub done_cooldown: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            grace: Duration::from_millis(2000),
            stability: Duration::from_millis(1500),
            done_cooldown: Duration::from_millis(3000),
        }
    }
}

/// Machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineState {
    Idle,
    Generating,
    Settling,
    /// Locked while the completion check waits on settings
    PendingCompletion,
    Done,
}

/// Side effects requested by the engine
#[derive(Debug, Clone, PartialEq)]
pub enum EngineAction {
    /// Ask the host for keep-alive pulses
    StartHeartbeat,
    /// Release the keep-alive request
    StopHeartbeat,
    /// Read settings, then call [`CompletionEngine::resolve_completion`]
    CheckCompletion,
    /// Announce a finished answer
    Notify(Completion),
}

/// One tab's detector
#[derive(Debug)]
pub struct CompletionEngine {
    adapter: SiteAdapter,
    timings: Timings,
    loaded_at: Instant,
    state: EngineState,
    last_notified_at: Option<Instant>,

    // SETTLING
    settle_started_at: Option<Instant>,
    settle_grace_elapsed: bool,
    stable_text: Option<String>,
    stable_check_at: Option<Instant>,

    // DONE
    done_entered_at: Option<Instant>,

    network_suppressed: bool,
    heartbeat_active: bool,
}

impl CompletionEngine {
    /// Create an engine for a page that finished loading at `loaded_at`
    pub fn new(adapter: SiteAdapter, loaded_at: Instant) -> Self {
        Self::with_timings(adapter, Timings::default(), loaded_at)
    }

    pub fn with_timings(adapter: SiteAdapter, timings: Timings, loaded_at: Instant) -> Self {
        Self {
            adapter,
            timings,
            loaded_at,
            state: EngineState::Idle,
            last_notified_at: None,
            settle_started_at: None,
            settle_grace_elapsed: false,
            stable_text: None,
            stable_check_at: None,
            done_entered_at: None,
            network_suppressed: false,
            heartbeat_active: false,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn adapter(&self) -> SiteAdapter {
        self.adapter
    }

    pub fn timings(&self) -> Timings {
        self.timings
    }

    pub fn is_network_suppressed(&self) -> bool {
        self.network_suppressed
    }

    pub fn heartbeat_active(&self) -> bool {
        self.heartbeat_active
    }

    pub fn last_notified_at(&self) -> Option<Instant> {
        self.last_notified_at
    }

    fn transition(&mut self, to: EngineState) {
        if self.state == to {
            return;
        }
        tracing::debug!(site = %self.adapter.site(), "State: {:?} → {:?}", self.state, to);
        self.state = to;
    }

    fn start_heartbeat(&mut self, actions: &mut Vec<EngineAction>) {
        if !self.adapter.needs_heartbeat() || self.heartbeat_active {
            return;
        }
        self.heartbeat_active = true;
        actions.push(EngineAction::StartHeartbeat);
    }

    fn stop_heartbeat(&mut self, actions: &mut Vec<EngineAction>) {
        if !self.heartbeat_active {
            return;
        }
        self.heartbeat_active = false;
        actions.push(EngineAction::StopHeartbeat);
    }

    fn within_cooldown(&self, now: Instant) -> bool {
        self.last_notified_at
            .is_some_and(|at| now.saturating_duration_since(at) < self.timings.done_cooldown)
    }

    /// Evaluate the page once
    pub fn tick(&mut self, page: &dyn Page, now: Instant) -> Vec<EngineAction> {
        let mut actions = Vec::new();
        let since_load = now.saturating_duration_since(self.loaded_at);
        let generating = self.adapter.is_generating(page, since_load);

        match self.state {
            EngineState::Idle => {
                // After a network completion, wait for a clean idle signal
                // before a new cycle may start.
                if self.network_suppressed {
                    if !generating {
                        self.network_suppressed = false;
                        tracing::debug!("Network suppression cleared, clean idle confirmed");
                    }
                } else if generating {
                    self.transition(EngineState::Generating);
                    self.start_heartbeat(&mut actions);
                }
            }

            EngineState::Generating => {
                if !generating {
                    self.transition(EngineState::Settling);
                    self.settle_started_at = Some(now);
                    self.settle_grace_elapsed = false;
                    self.stable_text = None;
                    self.stable_check_at = None;
                }
            }

            EngineState::Settling => self.settle(page, generating, now, &mut actions),

            EngineState::PendingCompletion => {}

            EngineState::Done => {
                let entered = self.done_entered_at.unwrap_or(now);
                if now.saturating_duration_since(entered) >= self.timings.done_cooldown {
                    self.transition(EngineState::Idle);
                }
                if generating {
                    self.transition(EngineState::Generating);
                    self.start_heartbeat(&mut actions);
                }
            }
        }

        actions
    }

    fn settle(
        &mut self,
        page: &dyn Page,
        generating: bool,
        now: Instant,
        actions: &mut Vec<EngineAction>,
    ) {
        if generating {
            tracing::debug!("Signal flickered, returning to GENERATING");
            self.transition(EngineState::Generating);
            self.settle_grace_elapsed = false;
            self.start_heartbeat(actions);
            return;
        }

        if !self.settle_grace_elapsed {
            let started = self.settle_started_at.unwrap_or(now);
            if now.saturating_duration_since(started) >= self.timings.grace {
                self.settle_grace_elapsed = true;
                self.stable_text = self.adapter.last_response_text(page);
                self.stable_check_at = Some(now);
                tracing::debug!("Signal off confirmed, checking text stability");
            }
            return;
        }

        let checked = self.stable_check_at.unwrap_or(now);
        if now.saturating_duration_since(checked) < self.timings.stability {
            return;
        }
        let current = self.adapter.last_response_text(page);
        if current == self.stable_text {
            self.begin_completion(now, actions);
        } else {
            tracing::debug!("Text still changing, rechecking");
            self.stable_text = current;
            self.stable_check_at = Some(now);
        }
    }

    fn begin_completion(&mut self, now: Instant, actions: &mut Vec<EngineAction>) {
        self.transition(EngineState::PendingCompletion);

        if self.within_cooldown(now) {
            tracing::debug!("Skipped: cooldown active");
            self.stop_heartbeat(actions);
            self.transition(EngineState::Idle);
            return;
        }

        if self.network_suppressed {
            tracing::debug!("Skipped: already notified by network for this cycle");
            self.stop_heartbeat(actions);
            self.transition(EngineState::Idle);
            return;
        }

        actions.push(EngineAction::CheckCompletion);
    }

    /// Finish a completion check once settings have been read
    ///
    /// Does nothing unless the engine is still in `PENDING_COMPLETION`; a
    /// network completion that arrived meanwhile wins.
    pub fn resolve_completion(
        &mut self,
        page: &dyn Page,
        always_notify: bool,
        now: Instant,
    ) -> Vec<EngineAction> {
        let mut actions = Vec::new();
        if self.state != EngineState::PendingCompletion {
            return actions;
        }

        if !always_notify && page.is_visible() {
            tracing::debug!("Skipped: tab visible (always_notify off)");
            self.stop_heartbeat(&mut actions);
            self.transition(EngineState::Idle);
            return actions;
        }

        self.last_notified_at = Some(now);
        self.stop_heartbeat(&mut actions);

        let completion = Completion::now(self.adapter.primary_hostname(), page.title())
            .with_preview(self.stable_text.clone());
        tracing::info!("Answer complete: {}", completion.site);
        actions.push(EngineAction::Notify(completion));

        self.transition(EngineState::Done);
        self.done_entered_at = Some(now);
        actions
    }

    /// The network tracker already announced this cycle
    pub fn on_network_done(&mut self, now: Instant) -> Vec<EngineAction> {
        let mut actions = Vec::new();
        tracing::debug!("Network handled notification, suppressing this cycle");
        self.stop_heartbeat(&mut actions);
        self.network_suppressed = true;
        self.last_notified_at = Some(now);
        self.transition(EngineState::Idle);
        actions
    }
}
