//! Slack incoming-webhook notifier.
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Url};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::{info, warn};

use crate::gate;
use crate::humanize;
use crate::model::{Room, Supply};

pub const WARNING_COLOR: &str = "warning";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlackAttachment {
    pub color: String,
    pub fallback: String,
    pub text: String,
    pub mrkdwn_in: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumb_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlackMessage {
    pub attachments: Vec<SlackAttachment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
    /// Always empty; the attachment carries the content.
    pub text: String,
}

impl SlackMessage {
    pub fn new(attachment: SlackAttachment, icon_url: Option<String>) -> Self {
        Self {
            attachments: vec![attachment],
            icon_url,
            text: String::new(),
        }
    }
}

/// Build the single attachment announcing `supply` was requested in `room`.
pub fn format_attachment(
    room: &Room,
    supply: &Supply,
    requested: DateTime<Utc>,
    now: DateTime<Utc>,
) -> SlackAttachment {
    let ago = humanize::time_ago(gate::display_time(requested, now), now);
    SlackAttachment {
        color: WARNING_COLOR.to_string(),
        fallback: format!("{} requested in {} {}", supply.name, room.name, ago),
        text: format!("*{}* requested in *{}* _{}_", supply.name, room.name, ago),
        mrkdwn_in: vec!["text".to_string()],
        thumb_url: supply.image_url.clone().filter(|url| !url.is_empty()),
    }
}

#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn deliver(&self, message: &SlackMessage) -> Result<()>;
}

#[derive(Clone)]
pub struct SlackWebhook {
    http: Client,
    url: Url,
}

impl fmt::Debug for SlackWebhook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The webhook path is the credential.
        f.debug_struct("SlackWebhook")
            .field("host", &self.url.host_str())
            .finish_non_exhaustive()
    }
}

impl SlackWebhook {
    pub fn new(webhook_url: &str, timeout: Duration) -> Result<Self> {
        let url = Url::parse(webhook_url).context("invalid Slack webhook URL")?;
        let http = Client::builder()
            .user_agent("supply-watchbot/0.1")
            .timeout(timeout)
            .build()
            .context("failed to build Slack client")?;
        Ok(Self { http, url })
    }

    pub fn build_request(&self, message: &SlackMessage) -> Result<reqwest::Request> {
        self.http
            .post(self.url.clone())
            .json(message)
            .build()
            .context("failed to build Slack request")
    }
}

#[async_trait]
impl MessageSink for SlackWebhook {
    async fn deliver(&self, message: &SlackMessage) -> Result<()> {
        let request = self.build_request(message)?;
        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach Slack")?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            warn!(%status, %body, "Slack rejected message");
            return Err(anyhow!("slack error {}: {}", status, body));
        }
        info!("Slack accepted message");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use serde_json::json;

    fn kitchen() -> Room {
        Room {
            name: "Kitchen".into(),
        }
    }

    fn towels(image_url: Option<&str>) -> Supply {
        Supply {
            name: "Paper Towels".into(),
            image_url: image_url.map(str::to_string),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000).unwrap()
    }

    #[test]
    fn attachment_uses_fixed_template() {
        let requested = now() - ChronoDuration::minutes(5);
        let attachment = format_attachment(&kitchen(), &towels(None), requested, now());
        assert_eq!(attachment.color, "warning");
        assert_eq!(attachment.fallback, "Paper Towels requested in Kitchen 5 minutes ago");
        assert_eq!(attachment.text, "*Paper Towels* requested in *Kitchen* _5 minutes ago_");
        assert_eq!(attachment.mrkdwn_in, vec!["text".to_string()]);
        assert_eq!(attachment.thumb_url, None);
    }

    #[test]
    fn future_request_reads_as_just_now() {
        let requested = now() + ChronoDuration::minutes(10);
        let attachment = format_attachment(&kitchen(), &towels(None), requested, now());
        assert_eq!(attachment.fallback, "Paper Towels requested in Kitchen a few seconds ago");
        assert!(!attachment.fallback.contains(" in 10"));
    }

    #[test]
    fn image_becomes_thumbnail() {
        let attachment = format_attachment(
            &kitchen(),
            &towels(Some("https://cdn.example.com/towels.png")),
            now(),
            now(),
        );
        assert_eq!(
            attachment.thumb_url.as_deref(),
            Some("https://cdn.example.com/towels.png")
        );
    }

    #[test]
    fn message_serialises_with_empty_text() {
        let attachment = format_attachment(&kitchen(), &towels(None), now(), now());
        let message = SlackMessage::new(attachment, Some("https://example.com/icon.png".into()));
        let body = serde_json::to_value(&message).unwrap();
        assert_eq!(body["text"], json!(""));
        assert_eq!(body["icon_url"], json!("https://example.com/icon.png"));
        assert_eq!(body["attachments"].as_array().unwrap().len(), 1);
        assert_eq!(body["attachments"][0]["mrkdwn_in"], json!(["text"]));
        assert!(body["attachments"][0].get("thumb_url").is_none());
    }

    #[test]
    fn build_request_posts_json() {
        let hook = SlackWebhook::new(
            "https://hooks.slack.com/services/T/B/X",
            Duration::from_secs(5),
        )
        .unwrap();
        let message = SlackMessage::new(
            format_attachment(&kitchen(), &towels(None), now(), now()),
            None,
        );
        let request = hook.build_request(&message).unwrap();
        assert_eq!(request.method(), reqwest::Method::POST);
        assert_eq!(request.url().path(), "/services/T/B/X");
        assert_eq!(
            request
                .headers()
                .get("Content-Type")
                .and_then(|h| h.to_str().ok())
                .unwrap(),
            "application/json"
        );
        assert!(!format!("{hook:?}").contains("/services/"));
    }
}
