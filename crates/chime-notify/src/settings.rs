//! User-facing notification settings and how they are read

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::Result;
use crate::types::Site;

/// Sound file played when nothing else is configured
pub const DEFAULT_SOUND: &str = "default.wav";

/// Bundled notification sounds
pub const SOUND_FILES: &[&str] = &[
    "default.wav",
    "bell1.mp3",
    "bell2.mp3",
    "bell3.mp3",
    "bell4.mp3",
    "coin.mp3",
    "ding.mp3",
    "honk1.mp3",
    "honk2.mp3",
    "honk3.mp3",
    "honk4.mp3",
    "water_drop.mp3",
];

/// Per-site sound values that mean "stay silent"
const SILENT_SOUNDS: &[&str] = &["none", "disabled"];

/// Everything the detector and dispatcher read at notification time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Playback volume, 0.0 to 1.0
    pub volume: f32,
    /// Sound file per site key
    pub sounds: BTreeMap<String, String>,
    /// Notify even when the answering tab is visible
    pub always_notify: bool,
    /// Directory the sound files live in
    pub sound_dir: Option<PathBuf>,
    /// Webhook delivery
    pub webhook: WebhookSettings,
    /// Verbose logging
    pub debug: bool,
}

/// Webhook delivery settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookSettings {
    pub enabled: bool,
    pub url: String,
    /// Per-site opt-in, keyed by site key; missing sites are enabled
    pub sites: BTreeMap<String, bool>,
    /// Characters of answer text to include, 0 to leave it out
    pub preview_length: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            volume: 0.7,
            sounds: Site::ALL
                .iter()
                .map(|s| (s.key().to_string(), DEFAULT_SOUND.to_string()))
                .collect(),
            always_notify: true,
            sound_dir: None,
            webhook: WebhookSettings::default(),
            debug: false,
        }
    }
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            sites: Site::ALL.iter().map(|s| (s.key().to_string(), true)).collect(),
            preview_length: 0,
        }
    }
}

impl Settings {
    /// Volume clamped into the playable range
    pub fn effective_volume(&self) -> f32 {
        if self.volume.is_nan() {
            return Settings::default().volume;
        }
        self.volume.clamp(0.0, 1.0)
    }

    /// Sound file to play for a site, or `None` when the site is silenced
    pub fn sound_for(&self, site: &str) -> Option<&str> {
        let file = self
            .sounds
            .get(site)
            .map(String::as_str)
            .filter(|f| !f.is_empty())
            .unwrap_or(DEFAULT_SOUND);
        if SILENT_SOUNDS.contains(&file) {
            None
        } else {
            Some(file)
        }
    }

    /// Sites configured with a sound that is not a bundled file
    ///
    /// Always empty when a custom `sound_dir` is set, since any file there
    /// may be used.
    pub fn unknown_sounds(&self) -> Vec<(&str, &str)> {
        if self.sound_dir.is_some() {
            return Vec::new();
        }
        self.sounds
            .keys()
            .filter_map(|site| self.sound_for(site).map(|file| (site.as_str(), file)))
            .filter(|(_, file)| !SOUND_FILES.contains(file))
            .collect()
    }
}

impl WebhookSettings {
    /// Whether a completion for this site should be posted
    pub fn should_deliver(&self, site: &str) -> bool {
        self.enabled && !self.url.is_empty() && self.sites.get(site).copied().unwrap_or(true)
    }
}

/// Where settings come from
///
/// Implementations are read on every notification, so edits take effect
/// without restarting.
#[async_trait]
pub trait SettingsSource: Send + Sync {
    /// Read the current settings
    async fn load(&self) -> Result<Settings>;
}

/// Read settings, degrading to defaults on failure
pub async fn load_or_default(source: &dyn SettingsSource) -> Settings {
    match source.load().await {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!("Failed to read settings, using defaults: {}", e);
            Settings::default()
        }
    }
}

/// Fixed in-memory settings
#[derive(Debug, Clone, Default)]
pub struct StaticSettings(pub Settings);

#[async_trait]
impl SettingsSource for StaticSettings {
    async fn load(&self) -> Result<Settings> {
        Ok(self.0.clone())
    }
}

#[async_trait]
impl<T: SettingsSource + ?Sized> SettingsSource for Arc<T> {
    async fn load(&self) -> Result<Settings> {
        (**self).load().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    struct BrokenSource;

    #[async_trait]
    impl SettingsSource for BrokenSource {
        async fn load(&self) -> Result<Settings> {
            Err(Error::Settings("storage offline".into()))
        }
    }

    #[test]
    fn test_defaults() {
        let s = Settings::default();
        assert_eq!(s.volume, 0.7);
        assert!(s.always_notify);
        assert!(!s.webhook.enabled);
        assert_eq!(s.sound_for("claude.ai"), Some(DEFAULT_SOUND));
    }

    #[test]
    fn test_sound_disabled_values() {
        let mut s = Settings::default();
        s.sounds.insert("claude.ai".into(), "none".into());
        s.sounds.insert("gemini.google.com".into(), "disabled".into());
        s.sounds.insert("chatgpt.com".into(), "coin.mp3".into());
        assert_eq!(s.sound_for("claude.ai"), None);
        assert_eq!(s.sound_for("gemini.google.com"), None);
        assert_eq!(s.sound_for("chatgpt.com"), Some("coin.mp3"));
        // Unknown sites fall back to the default sound
        assert_eq!(s.sound_for("example.com"), Some(DEFAULT_SOUND));
    }

    #[test]
    fn test_unknown_sounds() {
        let mut s = Settings::default();
        assert!(s.unknown_sounds().is_empty());

        s.sounds.insert("claude.ai".into(), "none".into());
        s.sounds.insert("chatgpt.com".into(), "airhorn.mp3".into());
        assert_eq!(s.unknown_sounds(), vec![("chatgpt.com", "airhorn.mp3")]);

        s.sound_dir = Some(PathBuf::from("/tmp/sounds"));
        assert!(s.unknown_sounds().is_empty());
    }

    #[test]
    fn test_volume_clamped() {
        let mut s = Settings::default();
        s.volume = 3.0;
        assert_eq!(s.effective_volume(), 1.0);
        s.volume = -1.0;
        assert_eq!(s.effective_volume(), 0.0);
        s.volume = f32::NAN;
        assert_eq!(s.effective_volume(), 0.7);
    }

    #[test]
    fn test_webhook_site_gate() {
        let mut w = WebhookSettings {
            enabled: true,
            url: "https://discord.com/api/webhooks/1/abc".into(),
            ..Default::default()
        };
        assert!(w.should_deliver("claude.ai"));
        w.sites.insert("claude.ai".into(), false);
        assert!(!w.should_deliver("claude.ai"));
        assert!(w.should_deliver("example.com"));
        w.url.clear();
        assert!(!w.should_deliver("chatgpt.com"));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let s: Settings = serde_json::from_str(r#"{"always_notify": false}"#).unwrap();
        assert!(!s.always_notify);
        assert_eq!(s.volume, 0.7);
        assert_eq!(s.sounds.len(), 4);
    }

    #[tokio::test]
    async fn test_load_or_default_on_failure() {
        let s = load_or_default(&BrokenSource).await;
        assert_eq!(s, Settings::default());
    }
}
