// Telegram Bot API: one sendMessage per job.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{retry_after_secs, OutboundSink, SendOutcome, SinkError};

pub const TELEGRAM_API_URL: &str = "https://api.telegram.org";

#[derive(Debug, Default, Deserialize)]
struct ApiReply {
    #[serde(default)]
    ok: Option<bool>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    parameters: Option<ErrorParameters>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorParameters {
    // Seconds.
    retry_after: Option<u64>,
}

pub struct TelegramSink {
    client: Client,
    api_url: String,
    bot_token: String,
    chat_id: String,
}

impl TelegramSink {
    pub fn new(client: Client, bot_token: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            client,
            api_url: TELEGRAM_API_URL.to_string(),
            bot_token: bot_token.into(),
            chat_id: chat_id.into(),
        }
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    async fn post(&self, text: &str) -> Result<SendOutcome, SinkError> {
        let url = format!("{}/bot{}/sendMessage", self.api_url.trim_end_matches('/'), self.bot_token);
        let resp = self
            .client
            .post(&url)
            .json(&json!({
                "chat_id": self.chat_id,
                "text": text,
                "disable_web_page_preview": true,
            }))
            .send()
            .await
            // The URL carries the bot token.
            .map_err(|e| SinkError::Http(e.without_url()))?;

        let status = resp.status();
        let header = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp.text().await.unwrap_or_default();
        classify(status, header.as_deref(), &body)
    }
}

/// Maps a Bot API response onto a dispatch outcome.
fn classify(status: StatusCode, retry_after_header: Option<&str>, body: &str) -> Result<SendOutcome, SinkError> {
    let parsed: ApiReply = serde_json::from_str(body).unwrap_or_default();
    if status.is_success() && parsed.ok != Some(false) {
        return Ok(SendOutcome::Sent);
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = parsed
            .parameters
            .and_then(|p| p.retry_after)
            .map(Duration::from_secs)
            .or_else(|| retry_after_secs(retry_after_header));
        debug!(?retry_after, "telegram rate limited");
        return Ok(SendOutcome::RateLimited { retry_after });
    }
    Err(SinkError::Rejected {
        channel: "telegram",
        status: status.as_u16(),
        body: if parsed.description.is_empty() { body.to_string() } else { parsed.description },
    })
}

#[async_trait::async_trait]
impl OutboundSink for TelegramSink {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send(&self, text: &str) -> SendOutcome {
        self.post(text).await.unwrap_or_else(|e| SendOutcome::Fatal(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success() {
        assert_eq!(classify(StatusCode::OK, None, r#"{"ok":true,"result":{}}"#).unwrap(), SendOutcome::Sent);
        assert!(classify(StatusCode::OK, None, r#"{"ok":false,"description":"odd"}"#).is_err());
    }

    #[test]
    fn test_rate_limit_body_wins_over_header() {
        let body = r#"{"ok":false,"error_code":429,"description":"Too Many Requests: retry after 5","parameters":{"retry_after":5}}"#;
        assert_eq!(
            classify(StatusCode::TOO_MANY_REQUESTS, Some("9"), body).unwrap(),
            SendOutcome::RateLimited { retry_after: Some(Duration::from_secs(5)) }
        );
        assert_eq!(
            classify(StatusCode::TOO_MANY_REQUESTS, Some("9"), "not json").unwrap(),
            SendOutcome::RateLimited { retry_after: Some(Duration::from_secs(9)) }
        );
        assert_eq!(
            classify(StatusCode::TOO_MANY_REQUESTS, None, "{}").unwrap(),
            SendOutcome::RateLimited { retry_after: None }
        );
    }

    #[test]
    fn test_rejection_is_error() {
        let body = r#"{"ok":false,"error_code":400,"description":"Bad Request: chat not found"}"#;
        let err = classify(StatusCode::BAD_REQUEST, None, body).unwrap_err();
        assert!(err.to_string().contains("chat not found"));
    }
}
