//! Messages exchanged between tabs and the host

use chime_notify::{Completion, Site};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Browser tab identifier; negative ids mean "not a tab"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(pub i64);

impl TabId {
    /// Whether this id refers to a real tab
    pub fn is_tab(&self) -> bool {
        self.0 >= 0
    }
}

impl std::fmt::Display for TabId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Messages a tab sends to the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum HostMessage {
    /// The tab's engine decided an answer finished
    AnswerDone {
        site: String,
        tab_title: String,
        timestamp: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        preview: Option<String>,
    },
    /// Deliver keep-alive pulses to this tab
    StartHeartbeat,
    /// Stop delivering keep-alive pulses
    StopHeartbeat,
    /// Play the configured sound for a site
    PlayTestSound { site: String },
    /// Post a test message to a webhook URL
    #[serde(rename = "TEST_DISCORD")]
    TestWebhook { webhook_url: String },
}

impl HostMessage {
    /// Build the completion this message announces, if it is one
    pub fn into_completion(self) -> Option<Completion> {
        match self {
            HostMessage::AnswerDone {
                site,
                tab_title,
                timestamp,
                preview,
            } => Some(Completion {
                site,
                tab_title,
                timestamp,
                preview,
            }),
            _ => None,
        }
    }
}

impl From<Completion> for HostMessage {
    fn from(c: Completion) -> Self {
        HostMessage::AnswerDone {
            site: c.site,
            tab_title: c.tab_title,
            timestamp: c.timestamp,
            preview: c.preview,
        }
    }
}

/// Messages the host sends to a tab
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TabMessage {
    /// Keep-alive tick
    Pulse,
    /// The network tracker already announced this answer
    NetworkDone,
}

/// A streaming request to a known endpoint finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkFinished {
    pub tab_id: TabId,
    pub site: Site,
    pub duration: std::time::Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_answer_done_wire_shape() {
        let msg: HostMessage = Completion::now("claude.ai", "Chat").into();
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "ANSWER_DONE");
        assert_eq!(value["site"], "claude.ai");
        assert_eq!(value["tabTitle"], "Chat");
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn test_control_messages_parse() {
        let msg: HostMessage = serde_json::from_str(r#"{"type":"START_HEARTBEAT"}"#).unwrap();
        assert_eq!(msg, HostMessage::StartHeartbeat);
        let msg: HostMessage =
            serde_json::from_str(r#"{"type":"TEST_DISCORD","webhookUrl":"x"}"#).unwrap();
        assert_eq!(
            msg,
            HostMessage::TestWebhook {
                webhook_url: "x".into()
            }
        );
        let msg: TabMessage = serde_json::from_str(r#"{"type":"NETWORK_DONE"}"#).unwrap();
        assert_eq!(msg, TabMessage::NetworkDone);
    }

    #[test]
    fn test_into_completion() {
        let completion = Completion::now("gemini.google.com", "G").with_preview(Some("hi".into()));
        let msg: HostMessage = completion.clone().into();
        assert_eq!(msg.into_completion(), Some(completion));
        assert_eq!(HostMessage::StopHeartbeat.into_completion(), None);
    }

    #[test]
    fn test_tab_id_validity() {
        assert!(TabId(0).is_tab());
        assert!(!TabId(-1).is_tab());
    }
}
