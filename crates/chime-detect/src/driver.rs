//! The per-tab tick loop around a [`CompletionEngine`]

use chime_notify::{SettingsSource, load_or_default};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, sleep_until};

use crate::adapter::SiteAdapter;
use crate::engine::{CompletionEngine, EngineAction, POLL_INTERVAL, Timings};
use crate::events::{HostMessage, TabId, TabMessage};
use crate::handle::{TabHandle, TabInbox};
use crate::page::Page;

/// One rendering frame; mutation bursts inside it share a tick
pub const FRAME: Duration = Duration::from_millis(16);

/// A message from a tab to the host, tagged with its sender
#[derive(Debug, Clone, PartialEq)]
pub struct HostEnvelope {
    pub tab_id: TabId,
    pub message: HostMessage,
}

/// Runs one tab's engine
///
/// Ticks come from a fixed 500ms timer, from coalesced DOM mutations and from
/// keep-alive pulses. All of them run on this one task, so two ticks for the
/// same tab never overlap.
pub struct TabDriver {
    tab_id: TabId,
    engine: CompletionEngine,
    page: Arc<dyn Page>,
    settings: Arc<dyn SettingsSource>,
    outbox: mpsc::UnboundedSender<HostEnvelope>,
}

impl TabDriver {
    pub fn new(
        tab_id: TabId,
        engine: CompletionEngine,
        page: Arc<dyn Page>,
        settings: Arc<dyn SettingsSource>,
        outbox: mpsc::UnboundedSender<HostEnvelope>,
    ) -> Self {
        Self {
            tab_id,
            engine,
            page,
            settings,
            outbox,
        }
    }

    /// Start a driver for a freshly loaded page
    pub fn spawn(
        tab_id: TabId,
        adapter: SiteAdapter,
        page: Arc<dyn Page>,
        settings: Arc<dyn SettingsSource>,
        outbox: mpsc::UnboundedSender<HostEnvelope>,
    ) -> TabHandle {
        Self::spawn_with_timings(tab_id, adapter, Timings::default(), page, settings, outbox)
    }

    pub fn spawn_with_timings(
        tab_id: TabId,
        adapter: SiteAdapter,
        timings: Timings,
        page: Arc<dyn Page>,
        settings: Arc<dyn SettingsSource>,
        outbox: mpsc::UnboundedSender<HostEnvelope>,
    ) -> TabHandle {
        let engine = CompletionEngine::with_timings(adapter, timings, Instant::now());
        let driver = Self::new(tab_id, engine, page, settings, outbox);
        let (handle, inbox) = TabHandle::new(tab_id);
        tokio::spawn(driver.run(inbox));
        tracing::debug!(tab = %tab_id, "Engine ready for {}", adapter.primary_hostname());
        handle
    }

    async fn run(mut self, inbox: TabInbox) {
        let TabInbox {
            mut messages,
            mutations,
            cancel,
        } = inbox;

        let mut poll = tokio::time::interval(POLL_INTERVAL);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Deadline of the tick owed to a mutation burst
        let mut next_frame: Option<Instant> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = poll.tick() => self.tick().await,
                _ = mutations.notified() => {
                    next_frame.get_or_insert_with(|| Instant::now() + FRAME);
                }
                _ = sleep_until(next_frame.unwrap_or_else(Instant::now)), if next_frame.is_some() => {
                    next_frame = None;
                    self.tick().await;
                }
                message = messages.recv() => match message {
                    Some(TabMessage::Pulse) => self.tick().await,
                    Some(TabMessage::NetworkDone) => {
                        let actions = self.engine.on_network_done(Instant::now());
                        self.apply(actions).await;
                    }
                    None => break,
                },
            }
            if self.outbox.is_closed() {
                break;
            }
        }

        // The host releases this tab's keep-alive when it closes the tab; a
        // late StopHeartbeat here could hit a reopened tab with the same id.
        tracing::debug!(tab = %self.tab_id, "Engine stopped");
    }

    async fn tick(&mut self) {
        let actions = self.engine.tick(self.page.as_ref(), Instant::now());
        self.apply(actions).await;
    }

    async fn apply(&mut self, actions: Vec<EngineAction>) {
        let mut queue: VecDeque<EngineAction> = actions.into();
        while let Some(action) = queue.pop_front() {
            match action {
                EngineAction::StartHeartbeat => self.send(HostMessage::StartHeartbeat),
                EngineAction::StopHeartbeat => self.send(HostMessage::StopHeartbeat),
                EngineAction::Notify(completion) => self.send(completion.into()),
                EngineAction::CheckCompletion => {
                    let settings = load_or_default(self.settings.as_ref()).await;
                    queue.extend(self.engine.resolve_completion(
                        self.page.as_ref(),
                        settings.always_notify,
                        Instant::now(),
                    ));
                }
            }
        }
    }

    fn send(&self, message: HostMessage) {
        let envelope = HostEnvelope {
            tab_id: self.tab_id,
            message,
        };
        if self.outbox.send(envelope).is_err() {
            tracing::debug!(tab = %self.tab_id, "Host gone, message dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{LivePage, PageSnapshot};
    use chime_notify::{Settings, StaticSettings};

    const STOP: &str = r#"button[aria-label="Stop response"]"#;
    const ANSWER: &str = ".font-claude-message";

    fn settings(always_notify: bool) -> Arc<dyn SettingsSource> {
        Arc::new(StaticSettings(Settings {
            always_notify,
            ..Settings::default()
        }))
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<HostEnvelope>) -> Vec<HostMessage> {
        let mut out = Vec::new();
        while let Ok(envelope) = rx.try_recv() {
            out.push(envelope.message);
        }
        out
    }

    fn answers(messages: &[HostMessage]) -> usize {
        messages
            .iter()
            .filter(|m| matches!(m, HostMessage::AnswerDone { .. }))
            .count()
    }

    fn spawn_claude(
        page: &LivePage,
        settings: Arc<dyn SettingsSource>,
    ) -> (TabHandle, mpsc::UnboundedReceiver<HostEnvelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = TabDriver::spawn(
            TabId(1),
            SiteAdapter::Claude,
            Arc::new(page.clone()),
            settings,
            tx,
        );
        (handle, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_generation_cycle_produces_one_answer() {
        let page = LivePage::new(
            PageSnapshot::new("Claude chat")
                .with_visible(false)
                .with_texts(ANSWER, ["streaming..."]),
        );
        let (_handle, mut rx) = spawn_claude(&page, settings(true));

        page.update(|s| {
            s.present.insert(STOP.into());
        });
        tokio::time::sleep(Duration::from_millis(4000)).await;
        page.update(|s| {
            s.present.remove(STOP);
            s.texts.insert(ANSWER.into(), vec!["done".into()]);
        });
        tokio::time::sleep(Duration::from_millis(8000)).await;

        let messages = drain(&mut rx);
        assert_eq!(answers(&messages), 1);
        assert_eq!(messages.first(), Some(&HostMessage::StartHeartbeat));
        assert!(messages.contains(&HostMessage::StopHeartbeat));
        let done = messages
            .into_iter()
            .find_map(HostMessage::into_completion)
            .unwrap();
        assert_eq!(done.site, "claude.ai");
        assert_eq!(done.tab_title, "Claude chat");
        assert_eq!(done.preview.as_deref(), Some("done"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_visible_tab_not_announced_without_always_notify() {
        let page = LivePage::new(PageSnapshot::new("t").with_visible(true));
        let (_handle, mut rx) = spawn_claude(&page, settings(false));

        page.update(|s| {
            s.present.insert(STOP.into());
        });
        tokio::time::sleep(Duration::from_millis(2000)).await;
        page.update(|s| {
            s.present.remove(STOP);
        });
        tokio::time::sleep(Duration::from_millis(8000)).await;

        let messages = drain(&mut rx);
        assert_eq!(answers(&messages), 0);
        assert_eq!(
            messages,
            vec![HostMessage::StartHeartbeat, HostMessage::StopHeartbeat]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_done_suppresses_stale_flicker() {
        let page = LivePage::new(PageSnapshot::new("t").with_visible(false));
        let (handle, mut rx) = spawn_claude(&page, settings(true));
        tokio::time::sleep(Duration::from_millis(100)).await;

        handle.send(TabMessage::NetworkDone).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        page.update(|s| {
            s.present.insert(STOP.into());
        });
        handle.notify_mutation();
        tokio::time::sleep(Duration::from_millis(1900)).await;
        page.update(|s| {
            s.present.remove(STOP);
        });
        handle.notify_mutation();
        tokio::time::sleep(Duration::from_millis(10_000)).await;

        assert_eq!(answers(&drain(&mut rx)), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_stops_driver() {
        let page = LivePage::new(PageSnapshot::new("t").with_element(STOP));
        let (handle, mut rx) = spawn_claude(&page, settings(true));
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(drain(&mut rx), vec![HostMessage::StartHeartbeat]);

        handle.close();
        page.update(|s| s.present.clear());
        tokio::time::sleep(Duration::from_millis(8000)).await;
        assert!(drain(&mut rx).is_empty());
        assert!(handle.send(TabMessage::Pulse).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pulse_triggers_tick() {
        // the next timer tick is 490ms away, so only the pulse can see this
        let page = LivePage::new(PageSnapshot::new("t"));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = TabDriver::spawn(
            TabId(2),
            SiteAdapter::Claude,
            Arc::new(page.clone()),
            settings(true),
            tx,
        );
        // consume the immediate first timer tick
        tokio::time::sleep(Duration::from_millis(10)).await;
        page.update(|s| {
            s.present.insert(STOP.into());
        });
        handle.send(TabMessage::Pulse).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(drain(&mut rx), vec![HostMessage::StartHeartbeat]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_frame_does_not_hold_up_messages() {
        let page = LivePage::new(PageSnapshot::new("t"));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = TabDriver::spawn(
            TabId(3),
            SiteAdapter::Claude,
            Arc::new(page.clone()),
            settings(true),
            tx,
        );
        tokio::time::sleep(Duration::from_millis(10)).await;

        // a frame is now owed; the pulse must still be handled inside it
        handle.notify_mutation();
        tokio::time::sleep(Duration::from_millis(2)).await;
        page.update(|s| {
            s.present.insert(STOP.into());
        });
        handle.send(TabMessage::Pulse).unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(drain(&mut rx), vec![HostMessage::StartHeartbeat]);

        // and close is honoured before the frame tick fires
        handle.notify_mutation();
        handle.close();
        page.update(|s| s.present.clear());
        tokio::time::sleep(Duration::from_millis(8000)).await;
        assert!(drain(&mut rx).is_empty());
    }
}
