// Outbound channels. A sink turns one rendered line into one post and
// reports how it went; pacing and retries belong to the dispatcher.

use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::info;

pub mod telegram;
pub mod x;

pub use telegram::TelegramSink;
pub use x::XSink;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// Channel asked us to back off; `None` when it gave no usable hint.
    RateLimited { retry_after: Option<Duration> },
    /// Not worth retrying (bad credentials, rejected payload, transport failure).
    Fatal(String),
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{channel} rejected post ({status}): {body}")]
    Rejected {
        channel: &'static str,
        status: u16,
        body: String,
    },
}

#[async_trait::async_trait]
pub trait OutboundSink: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, text: &str) -> SendOutcome;
}

/// Parses a `Retry-After` header given in whole seconds.
pub(crate) fn retry_after_secs(header: Option<&str>) -> Option<Duration> {
    header
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Logs instead of posting. Used with `--dry-run` and for channels without credentials.
#[derive(Debug)]
pub struct DryRunSink {
    name: String,
    sent: Mutex<Vec<String>>,
}

impl DryRunSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), sent: Mutex::new(Vec::new()) }
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }
}

#[async_trait::async_trait]
impl OutboundSink for DryRunSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, text: &str) -> SendOutcome {
        info!(channel = %self.name, "[dry-run] {}", text);
        self.sent.lock().push(text.to_string());
        SendOutcome::Sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dry_run_records() {
        let sink = DryRunSink::new("telegram");
        assert_eq!(sink.send("hello").await, SendOutcome::Sent);
        assert_eq!(sink.name(), "telegram");
        assert_eq!(sink.sent(), vec!["hello".to_string()]);
    }

    #[test]
    fn test_retry_after_header() {
        assert_eq!(retry_after_secs(Some(" 7 ")), Some(Duration::from_secs(7)));
        assert_eq!(retry_after_secs(Some("Wed, 21 Oct 2015 07:28:00 GMT")), None);
        assert_eq!(retry_after_secs(None), None);
    }
}
