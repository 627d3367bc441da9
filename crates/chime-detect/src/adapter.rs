//! Per-site "is it still generating?" heuristics

use chime_notify::Site;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::page::Page;

/// Markup heuristics for one chat site
///
/// Generating checks are ordered strongest evidence first and the first match
/// wins. Response selectors are tried in order; the last element of the first
/// selector with non-empty text is the answer fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteAdapter {
    ChatGpt,
    Claude,
    Gemini,
    Perplexity,
}

const CHATGPT_GENERATING: &[&str] = &[
    ".result-streaming",
    r#"button[data-testid="stop-button"]"#,
    r#"button[aria-label*="Stop"]"#,
    "main svg.animate-spin",
];

const CHATGPT_RESPONSE: &[&str] = &[
    r#"[data-message-author-role="assistant"]"#,
    "div.agent-turn",
    r#"article[data-testid*="conversation-turn"]"#,
    "main .markdown",
];

const CLAUDE_GENERATING: &[&str] = &[
    r#"button[aria-label="Stop response"]"#,
    r#"button[aria-label="응답 중지"]"#,
    r#"button[data-testid="stop-button"]"#,
    r#"[data-is-streaming="true"]"#,
];

const CLAUDE_RESPONSE: &[&str] = &[
    ".font-claude-message",
    r#"[data-message-author="assistant"]"#,
    r#"[data-role="assistant"]"#,
    ".prose, .markdown",
];

const GEMINI_GENERATING: &[&str] = &[
    r#"button[aria-label*="Stop"]"#,
    r#"button[aria-label*="중지"]"#,
    "mat-progress-bar, .mat-mdc-progress-bar",
    r#"[data-is-streaming="true"]"#,
];

const GEMINI_RESPONSE: &[&str] = &[
    "model-response .model-response-text",
    r#"[data-test-id="model-response-text"]"#,
    ".markdown",
    "message-content",
];

// The spinner class is a generic utility class, so it only counts inside the
// answer area.
const PERPLEXITY_GENERATING: &[&str] = &[
    r#"button[aria-label*="Stop"]"#,
    r#"button[aria-label*="중지"]"#,
    r#"[data-testid="streaming-indicator"]"#,
    r#"[class*="prose"] .animate-spin, [class*="answer"] .animate-spin, main .animate-spin"#,
];

const PERPLEXITY_RESPONSE: &[&str] = &[".prose", ".markdown", ".markdown-body"];

impl SiteAdapter {
    /// Every adapter
    pub const ALL: [SiteAdapter; 4] = [
        SiteAdapter::ChatGpt,
        SiteAdapter::Claude,
        SiteAdapter::Gemini,
        SiteAdapter::Perplexity,
    ];

    /// The adapter for a site
    pub fn for_site(site: Site) -> Self {
        match site {
            Site::ChatGpt => SiteAdapter::ChatGpt,
            Site::Claude => SiteAdapter::Claude,
            Site::Gemini => SiteAdapter::Gemini,
            Site::Perplexity => SiteAdapter::Perplexity,
        }
    }

    /// Find the adapter serving a hostname (subdomains such as `www.` included)
    pub fn for_hostname(host: &str) -> Option<Self> {
        let host = host.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|a| {
            a.hostnames()
                .iter()
                .any(|h| host == *h || host.ends_with(&format!(".{}", h)))
        })
    }

    pub fn site(&self) -> Site {
        match self {
            SiteAdapter::ChatGpt => Site::ChatGpt,
            SiteAdapter::Claude => Site::Claude,
            SiteAdapter::Gemini => Site::Gemini,
            SiteAdapter::Perplexity => Site::Perplexity,
        }
    }

    /// Hostnames this adapter runs on; the first one labels notifications
    pub fn hostnames(&self) -> &'static [&'static str] {
        match self {
            SiteAdapter::ChatGpt => &["chatgpt.com", "chat.openai.com"],
            SiteAdapter::Claude => &["claude.ai"],
            SiteAdapter::Gemini => &["gemini.google.com"],
            SiteAdapter::Perplexity => &["perplexity.ai"],
        }
    }

    pub fn primary_hostname(&self) -> &'static str {
        self.hostnames()[0]
    }

    /// Window after page load during which the generating signal is ignored
    ///
    /// Gemini and Perplexity show progress indicators while the page itself
    /// loads.
    pub fn init_grace(&self) -> Duration {
        match self {
            SiteAdapter::ChatGpt | SiteAdapter::Claude => Duration::ZERO,
            SiteAdapter::Gemini | SiteAdapter::Perplexity => Duration::from_millis(5000),
        }
    }

    /// Whether the site's own polling stalls in background tabs
    pub fn needs_heartbeat(&self) -> bool {
        !matches!(self, SiteAdapter::ChatGpt)
    }

    fn generating_selectors(&self) -> &'static [&'static str] {
        match self {
            SiteAdapter::ChatGpt => CHATGPT_GENERATING,
            SiteAdapter::Claude => CLAUDE_GENERATING,
            SiteAdapter::Gemini => GEMINI_GENERATING,
            SiteAdapter::Perplexity => PERPLEXITY_GENERATING,
        }
    }

    fn response_selectors(&self) -> &'static [&'static str] {
        match self {
            SiteAdapter::ChatGpt => CHATGPT_RESPONSE,
            SiteAdapter::Claude => CLAUDE_RESPONSE,
            SiteAdapter::Gemini => GEMINI_RESPONSE,
            SiteAdapter::Perplexity => PERPLEXITY_RESPONSE,
        }
    }

    /// Whether the page is still streaming an answer
    ///
    /// `since_load` is the time since the page loaded; inside the init grace
    /// window this is always false.
    pub fn is_generating(&self, page: &dyn Page, since_load: Duration) -> bool {
        if since_load < self.init_grace() {
            return false;
        }
        self.generating_selectors()
            .iter()
            .any(|selector| page.exists(selector))
    }

    /// Trimmed text of the latest answer, used only to detect changes
    pub fn last_response_text(&self, page: &dyn Page) -> Option<String> {
        self.response_selectors().iter().find_map(|selector| {
            let texts = page.texts(selector);
            let text = texts.last()?.trim();
            (!text.is_empty()).then(|| text.to_string())
        })
    }
}
