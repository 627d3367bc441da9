//! Webhook delivery (Discord-compatible)

use async_trait::async_trait;
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::settings::WebhookSettings;
use crate::types::Completion;

/// Accepted webhook URL prefix
pub const WEBHOOK_URL_PREFIX: &str = "https://discord.com/api/webhooks/";

/// Name the messages are posted under
pub const WEBHOOK_USERNAME: &str = "AI Answer Notifier";

/// Delay used when a rate-limit response does not say how long to wait
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Upper bound on a server-requested delay
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(300);

/// JSON body posted to the webhook
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub username: String,
    pub content: String,
}

impl WebhookPayload {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            username: WEBHOOK_USERNAME.to_string(),
            content: content.into(),
        }
    }
}

/// Raw response from a webhook endpoint
#[derive(Debug, Clone, Default)]
pub struct WebhookResponse {
    pub status: u16,
    /// Value of the `Retry-After` header, if any
    pub retry_after_header: Option<String>,
    pub body: String,
}

/// Transport for webhook posts
#[async_trait]
pub trait WebhookClient: Send + Sync {
    /// POST the payload as JSON and return whatever the server answered
    async fn post(&self, url: &str, payload: &WebhookPayload) -> Result<WebhookResponse>;
}

/// reqwest-backed webhook client
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for ReqwestClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WebhookClient for ReqwestClient {
    async fn post(&self, url: &str, payload: &WebhookPayload) -> Result<WebhookResponse> {
        tracing::debug!("Webhook POST {}", redact(url));
        let response = self.client.post(url).json(payload).send().await?;
        let status = response.status().as_u16();
        let retry_after_header = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.unwrap_or_default();
        Ok(WebhookResponse {
            status,
            retry_after_header,
            body,
        })
    }
}

/// Strip the token part of a webhook URL for logging
fn redact(url: &str) -> String {
    match url.strip_prefix(WEBHOOK_URL_PREFIX) {
        Some(rest) => {
            let id = rest.split('/').next().unwrap_or_default();
            format!("{}{}/***", WEBHOOK_URL_PREFIX, id)
        }
        None => "<invalid url>".to_string(),
    }
}

/// Reject URLs that are not webhook endpoints
pub fn validate_url(url: &str) -> Result<()> {
    if url.starts_with(WEBHOOK_URL_PREFIX) && url.len() > WEBHOOK_URL_PREFIX.len() {
        Ok(())
    } else {
        Err(Error::InvalidWebhookUrl)
    }
}

/// How long a rate-limited response asks us to wait
///
/// Prefers the JSON `retry_after` field (seconds, may be fractional), then
/// the `Retry-After` header, then [`DEFAULT_RETRY_DELAY`].
pub fn retry_delay(response: &WebhookResponse) -> Duration {
    #[derive(Deserialize)]
    struct RateLimitBody {
        retry_after: Option<f64>,
    }

    let from_body = serde_json::from_str::<RateLimitBody>(&response.body)
        .ok()
        .and_then(|b| b.retry_after);
    let from_header = response
        .retry_after_header
        .as_deref()
        .and_then(|h| h.trim().parse::<f64>().ok());

    from_body
        .or(from_header)
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(|secs| Duration::from_secs_f64(secs).min(MAX_RETRY_DELAY))
        .unwrap_or(DEFAULT_RETRY_DELAY)
}

/// Map a raw response onto success or a typed error
fn classify(response: &WebhookResponse) -> Result<u16> {
    match response.status {
        200..=299 => Ok(response.status),
        429 => Err(Error::RateLimited {
            retry_after: retry_delay(response),
        }),
        status => Err(Error::Status { status }),
    }
}

/// Render the chat message for a completion
pub fn format_message(completion: &Completion, preview_length: usize) -> String {
    let time = completion.timestamp.with_timezone(&Local).format("%H:%M");
    let mut content = format!(
        "✅ **{}** answer complete — {} ({})",
        completion.site_label(),
        completion.tab_title,
        time
    );
    if let Some(preview) = completion.preview.as_deref() {
        if let Some(snippet) = truncate_preview(preview, preview_length) {
            content.push_str("\n> ");
            content.push_str(&snippet);
        }
    }
    content
}

fn truncate_preview(text: &str, max_chars: usize) -> Option<String> {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if max_chars == 0 || flat.is_empty() {
        return None;
    }
    if flat.chars().count() <= max_chars {
        return Some(flat);
    }
    let mut cut: String = flat.chars().take(max_chars).collect();
    cut.push('…');
    Some(cut)
}

/// What happened to one completion's webhook delivery
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    /// Webhooks disabled, no URL, or the site opted out
    Skipped,
    /// Posted successfully
    Sent { attempts: u32 },
    /// Gave up; the error has been logged
    Failed { attempts: u32, error: String },
}

/// Result of a test post, shown to whoever configured the URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookTestResult {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Posts completion messages and handles rate limiting
#[derive(Clone)]
pub struct WebhookNotifier {
    client: Arc<dyn WebhookClient>,
    max_rate_limit_retries: u32,
}

impl WebhookNotifier {
    /// Create a notifier; rate-limited posts are retried once
    pub fn new(client: Arc<dyn WebhookClient>) -> Self {
        Self {
            client,
            max_rate_limit_retries: 1,
        }
    }

    /// Set the rate-limit retry cap
    pub fn with_max_rate_limit_retries(mut self, retries: u32) -> Self {
        self.max_rate_limit_retries = retries;
        self
    }

    /// Post once and classify the response
    pub async fn send(&self, url: &str, payload: &WebhookPayload) -> Result<u16> {
        validate_url(url)?;
        let response = self.client.post(url, payload).await?;
        classify(&response)
    }

    /// Deliver a completion according to the webhook settings
    pub async fn deliver(
        &self,
        completion: &Completion,
        settings: &WebhookSettings,
    ) -> DeliveryOutcome {
        if !settings.should_deliver(&completion.site) {
            return DeliveryOutcome::Skipped;
        }
        if validate_url(&settings.url).is_err() {
            tracing::warn!("Webhook: invalid webhook URL");
            return DeliveryOutcome::Failed {
                attempts: 0,
                error: Error::InvalidWebhookUrl.to_string(),
            };
        }

        let payload = WebhookPayload::new(format_message(completion, settings.preview_length));
        let mut attempts = 0u32;
        let mut retries = 0u32;

        loop {
            attempts += 1;
            match self.send(&settings.url, &payload).await {
                Ok(_) => {
                    tracing::info!("Webhook: sent ({})", completion.site_label());
                    return DeliveryOutcome::Sent { attempts };
                }
                Err(Error::RateLimited { retry_after }) if retries < self.max_rate_limit_retries => {
                    tracing::warn!("Webhook: rate limited, retrying in {:?}", retry_after);
                    retries += 1;
                    tokio::time::sleep(retry_after).await;
                }
                Err(e) => {
                    tracing::warn!("Webhook: delivery failed after {} attempt(s): {}", attempts, e);
                    return DeliveryOutcome::Failed {
                        attempts,
                        error: e.to_string(),
                    };
                }
            }
        }
    }

    /// Post a test message to `url`
    pub async fn test(&self, url: &str) -> WebhookTestResult {
        let payload =
            WebhookPayload::new("🔔 Test message — AI Answer Notifier is connected!");
        match self.send(url, &payload).await {
            Ok(status) => WebhookTestResult {
                ok: true,
                status: Some(status),
                error: None,
            },
            Err(e) => WebhookTestResult {
                ok: false,
                status: e.status(),
                error: Some(e.to_string()),
            },
        }
    }
}
