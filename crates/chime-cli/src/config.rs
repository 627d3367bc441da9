//! Configuration file support

use async_trait::async_trait;
use chime_notify::{Settings, SettingsSource, WebhookSettings};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Configuration for chime
///
/// Every field is optional; anything left out takes the built-in default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Playback volume, 0.0 to 1.0
    pub volume: Option<f32>,
    /// Notify even when the answering tab is in front
    pub always_notify: Option<bool>,
    /// Verbose logging
    pub debug: Option<bool>,
    /// Directory the sound files live in
    pub sound_dir: Option<PathBuf>,
    /// Sound file per site key ("none" silences a site)
    pub sounds: BTreeMap<String, String>,
    /// Webhook delivery
    pub webhook: WebhookConfig,
}

/// Webhook section of the config file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub enabled: Option<bool>,
    pub url: Option<String>,
    /// Characters of answer text to include, 0 to leave it out
    pub preview_length: Option<usize>,
    /// Per-site opt-out, keyed by site key
    pub sites: BTreeMap<String, bool>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("chime")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        // CHIME_CONFIG_PATH wins over the platform location
        if let Ok(path) = std::env::var("CHIME_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Parse a config file; a missing file is an empty config
    pub fn read_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load config from file
    pub fn load() -> Self {
        let path = Self::config_path();
        match Self::read_from(&path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: Failed to load config file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Save config to a file, creating its directory
    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, content)
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        Self::init_at(&path)?;
        Ok(path)
    }

    pub fn init_at(path: &Path) -> std::io::Result<()> {
        if path.exists() {
            return Ok(());
        }
        Config::from(&Settings::default()).save_to(path)
    }

    /// The settings this config describes
    pub fn settings(&self) -> Settings {
        let defaults = Settings::default();
        let mut sounds = defaults.sounds;
        sounds.extend(self.sounds.clone());

        let hook = WebhookSettings::default();
        let mut sites = hook.sites;
        sites.extend(self.webhook.sites.clone());

        Settings {
            volume: self.volume.unwrap_or(defaults.volume),
            sounds,
            always_notify: self.always_notify.unwrap_or(defaults.always_notify),
            sound_dir: self.sound_dir.clone().or(defaults.sound_dir),
            webhook: WebhookSettings {
                enabled: self.webhook.enabled.unwrap_or(hook.enabled),
                url: self.webhook.url.clone().unwrap_or(hook.url),
                sites,
                preview_length: self.webhook.preview_length.unwrap_or(hook.preview_length),
            },
            debug: self.debug.unwrap_or(defaults.debug),
        }
    }
}

impl From<&Settings> for Config {
    fn from(settings: &Settings) -> Self {
        Self {
            volume: Some(settings.volume),
            always_notify: Some(settings.always_notify),
            debug: Some(settings.debug),
            sound_dir: settings.sound_dir.clone(),
            sounds: settings.sounds.clone(),
            webhook: WebhookConfig {
                enabled: Some(settings.webhook.enabled),
                url: (!settings.webhook.url.is_empty()).then(|| settings.webhook.url.clone()),
                preview_length: Some(settings.webhook.preview_length),
                sites: settings.webhook.sites.clone(),
            },
        }
    }
}

/// Settings read from the config file on every request
///
/// Edits to the file apply to the next completion without a restart.
#[derive(Debug, Clone)]
pub struct FileSettings {
    path: PathBuf,
}

impl FileSettings {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SettingsSource for FileSettings {
    async fn load(&self) -> chime_notify::Result<Settings> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Settings::default());
            }
            Err(e) => {
                return Err(chime_notify::Error::Settings(format!(
                    "{}: {}",
                    self.path.display(),
                    e
                )));
            }
        };
        let config: Config = toml::from_str(&content).map_err(|e| {
            chime_notify::Error::Settings(format!("{}: {}", self.path.display(), e))
        })?;
        Ok(config.settings())
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# chime configuration file
# Place at ~/.config/chime/config.toml (Linux), ~/Library/Application Support/chime/config.toml (Mac)
# or %APPDATA%\chime\config.toml (Windows). CHIME_CONFIG_PATH overrides the location.

# Playback volume, 0.0 to 1.0
volume = 0.7

# Notify even when the tab that finished is the one you are looking at
always_notify = true

# Verbose logging (same as --verbose)
debug = false

# Directory holding the sound files (default: current directory)
# sound_dir = "/usr/share/chime/sounds"

# Sound per site: default.wav, bell1.mp3 .. bell4.mp3, coin.mp3, ding.mp3,
# honk1.mp3 .. honk4.mp3, water_drop.mp3, or "none" to stay silent
[sounds]
"chatgpt.com" = "default.wav"
"claude.ai" = "default.wav"
"gemini.google.com" = "default.wav"
"perplexity.ai" = "default.wav"

# Discord webhook
[webhook]
enabled = false
# url = "https://discord.com/api/webhooks/..."

# Characters of the answer to include in the message (0 = none)
preview_length = 0

# Per-site switch; sites not listed are posted
[webhook.sites]
# "perplexity.ai" = false
"#
}
