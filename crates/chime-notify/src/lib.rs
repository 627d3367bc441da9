//! chime-notify: completion notification fan-out
//!
//! This crate holds the site catalogue and settings shared with the detector,
//! and delivers finished-answer notifications as a sound and a webhook post.

pub mod dispatcher;
pub mod error;
pub mod settings;
pub mod sound;
pub mod types;
pub mod webhook;

pub use dispatcher::{DispatchReport, Dispatcher, Notifier};
pub use error::{Error, Result};
pub use settings::{Settings, SettingsSource, StaticSettings, WebhookSettings, load_or_default};
pub use sound::{BellSurface, LazySurface, PlayRequest, SoundSurface};
pub use types::*;
pub use webhook::{DeliveryOutcome, WebhookClient, WebhookNotifier, WebhookTestResult};
