//! Core types shared by detection and notification

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Supported AI chat sites
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Site {
    #[serde(rename = "chatgpt.com")]
    ChatGpt,
    #[serde(rename = "claude.ai")]
    Claude,
    #[serde(rename = "gemini.google.com")]
    Gemini,
    #[serde(rename = "perplexity.ai")]
    Perplexity,
}

impl Site {
    /// Every supported site, in display order
    pub const ALL: [Site; 4] = [Site::ChatGpt, Site::Claude, Site::Gemini, Site::Perplexity];

    /// Stable key used in settings and wire messages
    pub fn key(&self) -> &'static str {
        match self {
            Site::ChatGpt => "chatgpt.com",
            Site::Claude => "claude.ai",
            Site::Gemini => "gemini.google.com",
            Site::Perplexity => "perplexity.ai",
        }
    }

    /// Get a human-readable name for this site
    pub fn label(&self) -> &'static str {
        match self {
            Site::ChatGpt => "ChatGPT",
            Site::Claude => "Claude",
            Site::Gemini => "Gemini",
            Site::Perplexity => "Perplexity",
        }
    }

    /// Look a site up by its settings key
    pub fn from_key(key: &str) -> Option<Site> {
        Site::ALL.into_iter().find(|s| s.key() == key)
    }

    /// Resolve the site a URL belongs to
    pub fn from_url(url: &str) -> Option<Site> {
        if url.contains("chatgpt.com") {
            Some(Site::ChatGpt)
        } else if url.contains("claude.ai") {
            Some(Site::Claude)
        } else if url.contains("gemini.google.com") {
            Some(Site::Gemini)
        } else if url.contains("perplexity.ai") {
            Some(Site::Perplexity)
        } else {
            None
        }
    }
}

impl std::fmt::Display for Site {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// Display label for a site key, falling back to the raw key
pub fn site_label(key: &str) -> &str {
    Site::from_key(key).map(|s| s.label()).unwrap_or(key)
}

/// A finished answer, ready to be announced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Completion {
    /// Site key (the detecting adapter's primary hostname)
    pub site: String,
    /// Title of the tab the answer appeared in
    pub tab_title: String,
    /// When the completion was decided
    pub timestamp: DateTime<Utc>,
    /// Last rendered answer text, if the detector captured one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
}

impl Completion {
    /// Create a completion stamped with the current time
    pub fn now(site: impl Into<String>, tab_title: impl Into<String>) -> Self {
        Self {
            site: site.into(),
            tab_title: tab_title.into(),
            timestamp: Utc::now(),
            preview: None,
        }
    }

    /// Attach an answer preview
    pub fn with_preview(mut self, preview: Option<String>) -> Self {
        self.preview = preview;
        self
    }

    /// Human-readable site label
    pub fn site_label(&self) -> &str {
        site_label(&self.site)
    }
}
