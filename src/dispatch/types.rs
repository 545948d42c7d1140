use serde::Deserialize;

/// A rendered notification waiting in one channel's queue.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchJob {
    pub rendered_text: String,
    /// USD notional of the event; higher sends first.
    pub priority_key: f64,
    /// Tie-break only: among equal priorities the newest wins.
    pub enqueued_at_ms: u64,
}

impl DispatchJob {
    pub fn new(rendered_text: impl Into<String>, notional_usd: f64, enqueued_at_ms: u64) -> Self {
        Self {
            rendered_text: rendered_text.into(),
            priority_key: if notional_usd.is_finite() { notional_usd } else { 0.0 },
            enqueued_at_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnqueueOutcome {
    pub added: bool,
    /// The job that left the queue because of this call: the previous minimum
    /// when `added`, otherwise the rejected incoming job.
    pub evicted: Option<DispatchJob>,
}

/// How a channel reports jobs pushed out by capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionLog {
    #[default]
    Silent,
    Warn,
}
