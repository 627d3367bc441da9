//! Fan a completion out to sound and webhook

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::Result;
use crate::settings::Settings;
use crate::sound::{LazySurface, PlayRequest, SoundSurface};
use crate::types::Completion;
use crate::webhook::{DeliveryOutcome, ReqwestClient, WebhookNotifier, WebhookTestResult};

/// Receives completions decided by the detector
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Announce a completion; must not fail or block on slow delivery
    async fn notify(&self, completion: &Completion, settings: &Settings);

    /// Play a site's sound on request from the settings page
    fn test_sound(&self, site: &str, settings: &Settings) -> Result<Option<String>>;

    /// Post a test message to `url` and report how it went
    async fn test_webhook(&self, url: &str) -> WebhookTestResult;
}

/// What each side effect did
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchReport {
    /// Sound file that was started, if any
    pub sound: Option<String>,
    /// Playback error, if playback was attempted and failed
    pub sound_error: Option<String>,
    pub webhook: DeliveryOutcome,
}

/// Sound plus webhook fan-out
///
/// The two side effects are independent: a playback failure never prevents
/// the webhook post and vice versa.
#[derive(Clone)]
pub struct Dispatcher {
    sound: Arc<dyn SoundSurface>,
    webhook: WebhookNotifier,
}

impl Dispatcher {
    pub fn new(sound: Arc<dyn SoundSurface>, webhook: WebhookNotifier) -> Self {
        Self { sound, webhook }
    }

    /// Platform sound surface and a reqwest webhook client
    pub fn with_defaults() -> Self {
        Self::new(
            Arc::new(LazySurface::platform_default()),
            WebhookNotifier::new(Arc::new(ReqwestClient::new())),
        )
    }

    pub fn webhook(&self) -> &WebhookNotifier {
        &self.webhook
    }

    /// Play the configured sound for a site
    ///
    /// Returns the file that was started, or `None` when the site is silenced.
    pub fn play_sound(&self, site: &str, settings: &Settings) -> Result<Option<String>> {
        let Some(file) = settings.sound_for(site) else {
            tracing::debug!("Sound disabled for {}", site);
            return Ok(None);
        };
        let request = PlayRequest::new(
            settings.sound_dir.as_deref(),
            file,
            settings.effective_volume(),
        );
        self.sound.play(&request)?;
        Ok(Some(file.to_string()))
    }

    /// Run both side effects and wait for the webhook to settle
    pub async fn dispatch(&self, completion: &Completion, settings: &Settings) -> DispatchReport {
        let (sound, sound_error) = match self.play_sound(&completion.site, settings) {
            Ok(sound) => (sound, None),
            Err(e) => {
                tracing::warn!("Sound playback failed for {}: {}", completion.site, e);
                (None, Some(e.to_string()))
            }
        };
        let webhook = self.webhook.deliver(completion, &settings.webhook).await;
        DispatchReport {
            sound,
            sound_error,
            webhook,
        }
    }
}

#[async_trait]
impl Notifier for Dispatcher {
    async fn notify(&self, completion: &Completion, settings: &Settings) {
        if let Err(e) = self.play_sound(&completion.site, settings) {
            tracing::warn!("Sound playback failed for {}: {}", completion.site, e);
        }

        // Rate-limit retries may sleep for seconds; keep them off the caller.
        let webhook = self.webhook.clone();
        let completion = completion.clone();
        let webhook_settings = settings.webhook.clone();
        tokio::spawn(async move {
            webhook.deliver(&completion, &webhook_settings).await;
        });
    }

    fn test_sound(&self, site: &str, settings: &Settings) -> Result<Option<String>> {
        self.play_sound(site, settings)
    }

    async fn test_webhook(&self, url: &str) -> WebhookTestResult {
        self.webhook.test(url).await
    }
}
