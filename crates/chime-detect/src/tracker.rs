//! Network-side detection: streaming requests to known answer endpoints

use chime_notify::Site;
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::events::{NetworkFinished, TabId};

/// Requests shorter than this are not answer streams
pub const MIN_STREAM_DURATION: Duration = Duration::from_millis(1000);

/// Streaming endpoints, `*` matching any run of characters
pub const STREAM_URL_PATTERNS: &[&str] = &[
    "https://chatgpt.com/backend-api/f/conversation",
    "https://claude.ai/api/*/completion",
    "https://gemini.google.com/_/BardChatUi/data/assistant.lamda.BardFrontendService/StreamGenerate*",
    "https://gemini.google.com/u/*/BardChatUi/data/assistant.lamda.BardFrontendService/StreamGenerate*",
    "https://www.perplexity.ai/rest/sse/perplexity_ask*",
];

/// Browser request identifier
pub type RequestId = String;

/// A compiled endpoint pattern
#[derive(Debug, Clone)]
pub struct StreamPattern {
    pub site: Site,
    regex: Regex,
}

impl StreamPattern {
    /// Compile a URL template; the site is inferred from the template
    pub fn new(pattern: &str) -> Result<Self> {
        let site = Site::from_url(pattern).ok_or_else(|| Error::InvalidPattern {
            pattern: pattern.to_string(),
            reason: "no known site in pattern".to_string(),
        })?;
        let body = pattern
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        // Query strings are not part of the endpoint identity
        let regex = Regex::new(&format!(r"^{}(?:\?.*)?$", body)).map_err(|e| Error::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { site, regex })
    }

    pub fn matches(&self, url: &str) -> bool {
        self.regex.is_match(url)
    }
}

static DEFAULT_PATTERNS: LazyLock<Vec<StreamPattern>> = LazyLock::new(|| {
    STREAM_URL_PATTERNS
        .iter()
        .filter_map(|p| StreamPattern::new(p).ok())
        .collect()
});

/// An in-flight streaming request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub tab_id: TabId,
    pub site: Site,
    pub started_at: Instant,
}

/// Tracks streaming requests from start to completion
///
/// Each request id has at most one live entry. Entries leave the table on
/// completion, on error, or when their tab goes away.
#[derive(Debug)]
pub struct NetworkStreamTracker {
    patterns: Vec<StreamPattern>,
    min_duration: Duration,
    pending: HashMap<RequestId, PendingRequest>,
}

impl Default for NetworkStreamTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkStreamTracker {
    /// Tracker over the built-in endpoint list
    pub fn new() -> Self {
        Self::with_patterns(DEFAULT_PATTERNS.clone())
    }

    pub fn with_patterns(patterns: Vec<StreamPattern>) -> Self {
        Self {
            patterns,
            min_duration: MIN_STREAM_DURATION,
            pending: HashMap::new(),
        }
    }

    pub fn with_min_duration(mut self, min_duration: Duration) -> Self {
        self.min_duration = min_duration;
        self
    }

    /// The site whose streaming endpoint `url` is, if any
    pub fn match_url(&self, url: &str) -> Option<Site> {
        self.patterns.iter().find(|p| p.matches(url)).map(|p| p.site)
    }

    /// Number of requests currently in flight
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, request_id: &str) -> bool {
        self.pending.contains_key(request_id)
    }

    /// A request left the browser; returns whether it is now tracked
    pub fn on_request_started(
        &mut self,
        request_id: impl Into<RequestId>,
        tab_id: TabId,
        url: &str,
        now: Instant,
    ) -> bool {
        if !tab_id.is_tab() {
            return false;
        }
        let Some(site) = self.match_url(url) else {
            return false;
        };
        let request_id = request_id.into();
        tracing::debug!("{} stream started (tab {}, req {})", site, tab_id, request_id);
        self.pending.insert(
            request_id,
            PendingRequest {
                tab_id,
                site,
                started_at: now,
            },
        );
        true
    }

    /// A request finished; long enough streams become a [`NetworkFinished`]
    pub fn on_request_completed(&mut self, request_id: &str, now: Instant) -> Option<NetworkFinished> {
        let tracked = self.pending.remove(request_id)?;
        let duration = now.saturating_duration_since(tracked.started_at);
        if duration < self.min_duration {
            tracing::debug!(
                "{} request finished after {:?}, too short to be an answer",
                tracked.site,
                duration
            );
            return None;
        }
        Some(NetworkFinished {
            tab_id: tracked.tab_id,
            site: tracked.site,
            duration,
        })
    }

    /// A request errored or was aborted; it never produces a completion
    pub fn on_request_failed(&mut self, request_id: &str) {
        if self.pending.remove(request_id).is_some() {
            tracing::debug!("Stream request {} failed, dropped", request_id);
        }
    }

    /// Drop everything in flight for a tab
    pub fn forget_tab(&mut self, tab_id: TabId) {
        self.pending.retain(|_, p| p.tab_id != tab_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_default_patterns_all_compile() {
        assert_eq!(DEFAULT_PATTERNS.len(), STREAM_URL_PATTERNS.len());
    }

    #[test]
    fn test_pattern_matching() {
        let t = NetworkStreamTracker::new();
        assert_eq!(
            t.match_url("https://chatgpt.com/backend-api/f/conversation"),
            Some(Site::ChatGpt)
        );
        assert_eq!(
            t.match_url("https://claude.ai/api/organizations/abc/chat_conversations/def/completion"),
            Some(Site::Claude)
        );
        assert_eq!(
            t.match_url("https://gemini.google.com/u/1/BardChatUi/data/assistant.lamda.BardFrontendService/StreamGenerate?bl=x&rt=c"),
            Some(Site::Gemini)
        );
        assert_eq!(
            t.match_url("https://www.perplexity.ai/rest/sse/perplexity_ask"),
            Some(Site::Perplexity)
        );
        assert_eq!(t.match_url("https://chatgpt.com/backend-api/f/conversation/init"), None);
        assert_eq!(t.match_url("https://claude.ai/api/organizations"), None);
        assert_eq!(t.match_url("https://example.com/"), None);
    }

    #[test]
    fn test_pattern_needs_known_site() {
        assert!(StreamPattern::new("https://example.com/*").is_err());
    }

    #[test]
    fn test_long_stream_emits_finished() {
        let mut t = NetworkStreamTracker::new();
        let t0 = Instant::now();
        assert!(t.on_request_started(
            "r1",
            TabId(7),
            "https://chatgpt.com/backend-api/f/conversation",
            t0
        ));
        let finished = t.on_request_completed("r1", t0 + ms(4200)).unwrap();
        assert_eq!(finished.tab_id, TabId(7));
        assert_eq!(finished.site, Site::ChatGpt);
        assert_eq!(finished.duration, ms(4200));
        assert_eq!(t.pending_len(), 0);
    }

    #[test]
    fn test_short_request_discarded() {
        let mut t = NetworkStreamTracker::new();
        let t0 = Instant::now();
        t.on_request_started("r1", TabId(1), "https://chatgpt.com/backend-api/f/conversation", t0);
        assert!(t.on_request_completed("r1", t0 + ms(400)).is_none());
        assert!(!t.is_pending("r1"));
    }

    #[test]
    fn test_exactly_minimum_duration_counts() {
        let mut t = NetworkStreamTracker::new();
        let t0 = Instant::now();
        t.on_request_started("r1", TabId(1), "https://chatgpt.com/backend-api/f/conversation", t0);
        assert!(t.on_request_completed("r1", t0 + ms(1000)).is_some());
    }

    #[test]
    fn test_failed_request_never_completes() {
        let mut t = NetworkStreamTracker::new();
        let t0 = Instant::now();
        t.on_request_started("r1", TabId(1), "https://claude.ai/api/x/completion", t0);
        t.on_request_failed("r1");
        assert!(t.on_request_completed("r1", t0 + ms(5000)).is_none());
    }

    #[test]
    fn test_non_tab_and_unknown_requests_ignored() {
        let mut t = NetworkStreamTracker::new();
        let t0 = Instant::now();
        assert!(!t.on_request_started("r1", TabId(-1), "https://claude.ai/api/x/completion", t0));
        assert!(!t.on_request_started("r2", TabId(1), "https://claude.ai/login", t0));
        assert_eq!(t.pending_len(), 0);
        assert!(t.on_request_completed("unknown", t0 + ms(5000)).is_none());
    }

    #[test]
    fn test_restart_with_same_id_keeps_one_entry() {
        let mut t = NetworkStreamTracker::new();
        let t0 = Instant::now();
        let url = "https://claude.ai/api/x/completion";
        t.on_request_started("r1", TabId(1), url, t0);
        t.on_request_started("r1", TabId(1), url, t0 + ms(3000));
        assert_eq!(t.pending_len(), 1);
        // measured from the latest start
        assert!(t.on_request_completed("r1", t0 + ms(3500)).is_none());
    }

    #[test]
    fn test_forget_tab() {
        let mut t = NetworkStreamTracker::new();
        let t0 = Instant::now();
        let url = "https://claude.ai/api/x/completion";
        t.on_request_started("a", TabId(1), url, t0);
        t.on_request_started("b", TabId(2), url, t0);
        t.forget_tab(TabId(1));
        assert!(!t.is_pending("a"));
        assert!(t.is_pending("b"));
    }
}
