// X (Twitter) v2 create-post endpoint. Posting needs user context: OAuth 1.0a
// app + access keys, or an OAuth 2.0 user bearer token.

use std::fmt;
use std::time::Duration;

use reqwest::header::{HeaderMap, AUTHORIZATION};
use reqwest::{Client, StatusCode};
use serde_json::json;

use super::{retry_after_secs, OutboundSink, SendOutcome, SinkError};
use crate::market_data::normaliser::now_ms;

pub const X_API_URL: &str = "https://api.twitter.com";

#[derive(Clone, PartialEq, Eq)]
pub enum XCredentials {
    /// Consumer key/secret plus the posting account's access token/secret.
    OAuth1 {
        api_key: String,
        api_secret: String,
        access_token: String,
        access_secret: String,
    },
    Bearer(String),
}

// Secrets stay out of logs.
impl fmt::Debug for XCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            XCredentials::OAuth1 { .. } => f.write_str("XCredentials::OAuth1(..)"),
            XCredentials::Bearer(_) => f.write_str("XCredentials::Bearer(..)"),
        }
    }
}

impl XCredentials {
    /// `Authorization` header value for a body-less-signature POST to `url`.
    /// JSON bodies are not part of the OAuth 1.0a signature base string.
    pub fn authorization(&self, url: &str) -> String {
        match self {
            XCredentials::OAuth1 { api_key, api_secret, access_token, access_secret } => {
                let token = oauth1_request::Token::from_parts(
                    api_key.as_str(),
                    api_secret.as_str(),
                    access_token.as_str(),
                    access_secret.as_str(),
                );
                oauth1_request::post(url, &(), &token, oauth1_request::HMAC_SHA1)
            }
            XCredentials::Bearer(token) => format!("Bearer {token}"),
        }
    }
}

pub struct XSink {
    client: Client,
    api_url: String,
    credentials: XCredentials,
}

impl XSink {
    pub fn new(client: Client, credentials: XCredentials) -> Self {
        Self {
            client,
            api_url: X_API_URL.to_string(),
            credentials,
        }
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    async fn post(&self, text: &str) -> Result<SendOutcome, SinkError> {
        let url = format!("{}/2/tweets", self.api_url.trim_end_matches('/'));
        let resp = self
            .client
            .post(&url)
            .header(AUTHORIZATION, self.credentials.authorization(&url))
            .json(&json!({ "text": text }))
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = rate_limit_wait(resp.headers(), now_ms() / 1000);
            return Ok(SendOutcome::RateLimited { retry_after });
        }
        if status.is_success() {
            return Ok(SendOutcome::Sent);
        }
        Err(SinkError::Rejected {
            channel: "x",
            status: status.as_u16(),
            body: resp.text().await.unwrap_or_default(),
        })
    }
}

/// `x-rate-limit-reset` is the epoch second the window reopens; fall back to `Retry-After`.
fn rate_limit_wait(headers: &HeaderMap, now_secs: u64) -> Option<Duration> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    header("x-rate-limit-reset")
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(|reset| Duration::from_secs(reset.saturating_sub(now_secs)))
        .or_else(|| retry_after_secs(header("retry-after")))
}

#[async_trait::async_trait]
impl OutboundSink for XSink {
    fn name(&self) -> &str {
        "x"
    }

    async fn send(&self, text: &str) -> SendOutcome {
        self.post(text).await.unwrap_or_else(|e| SendOutcome::Fatal(e.to_string()))
    }
}
