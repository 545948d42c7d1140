//! Rate-limited drain of one channel's [`BoundedPriorityQueue`].
//!
//! A [`Dispatcher`] is a cheap handle; cloning it shares the queue and the
//! single drain task. The drain loop:
//!
//! 1. waits out any rate-limit pause (`paused_until`),
//! 2. waits until `min_interval` has passed since the last successful send,
//! 3. dequeues the highest-priority job or idles until the next enqueue,
//! 4. sends it. A rate-limited job goes back into the queue with its original
//!    priority and pauses the channel; a fatal failure drops the job.
//!
//! At most one send is in flight per channel.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::dispatch::queue::BoundedPriorityQueue;
use crate::dispatch::sinks::{OutboundSink, SendOutcome};
use crate::dispatch::types::{DispatchJob, EnqueueOutcome, EvictionLog};
use crate::market_data::normaliser::now_ms;

pub const DEFAULT_FALLBACK_RETRY_AFTER: Duration = Duration::from_secs(60);
/// Upper bound on a server-requested pause.
pub const MAX_RATE_LIMIT_PAUSE: Duration = Duration::from_secs(6 * 60 * 60);

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub capacity: usize,
    pub min_interval: Duration,
    /// Pause applied when the channel rate-limits us without saying for how long.
    pub fallback_retry_after: Duration,
    pub eviction_log: EvictionLog,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            capacity: 500,
            min_interval: Duration::from_millis(1200),
            fallback_retry_after: DEFAULT_FALLBACK_RETRY_AFTER,
            eviction_log: EvictionLog::Silent,
        }
    }
}

#[derive(Debug, Default)]
struct DrainState {
    paused_until: Option<Instant>,
    last_sent: Option<Instant>,
}

struct Shared {
    channel: String,
    config: DispatcherConfig,
    queue: Mutex<BoundedPriorityQueue>,
    state: Mutex<DrainState>,
    wake: Notify,
    stop: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    fn record_depth(&self, depth: usize) {
        metrics::gauge!("liqfeed_queue_depth", "channel" => self.channel.clone()).set(depth as f64);
    }

    fn report_eviction(&self, outcome: &EnqueueOutcome) {
        let Some(evicted) = outcome.evicted.as_ref() else { return };
        let reason = if outcome.added { "evicted" } else { "rejected" };
        metrics::counter!(
            "liqfeed_dispatch_dropped_total",
            "channel" => self.channel.clone(),
            "reason" => reason
        )
        .increment(1);
        match self.config.eviction_log {
            EvictionLog::Warn => warn!(
                channel = %self.channel,
                notional = evicted.priority_key,
                reason,
                "queue full, dropped: {}",
                evicted.rendered_text
            ),
            EvictionLog::Silent => debug!(channel = %self.channel, notional = evicted.priority_key, reason, "queue full"),
        }
    }

    fn push(&self, job: DispatchJob) -> EnqueueOutcome {
        let (outcome, depth) = {
            let mut q = self.queue.lock();
            let outcome = q.enqueue(job);
            (outcome, q.len())
        };
        self.report_eviction(&outcome);
        self.record_depth(depth);
        outcome
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    shared: Arc<Shared>,
}

impl Dispatcher {
    /// Creates the channel queue and starts its drain task on the current runtime.
    pub fn spawn(sink: Arc<dyn OutboundSink>, config: DispatcherConfig) -> Self {
        let (stop, stop_rx) = watch::channel(false);
        let shared = Arc::new(Shared {
            channel: sink.name().to_string(),
            queue: Mutex::new(BoundedPriorityQueue::new(config.capacity)),
            config,
            state: Mutex::new(DrainState::default()),
            wake: Notify::new(),
            stop,
            task: Mutex::new(None),
        });

        let handle = tokio::spawn(drain(shared.clone(), sink, stop_rx));
        *shared.task.lock() = Some(handle);
        Self { shared }
    }

    pub fn channel(&self) -> &str {
        &self.shared.channel
    }

    /// Queues a rendered line with `notional_usd` as its priority.
    pub fn enqueue(&self, rendered_text: impl Into<String>, notional_usd: f64) -> EnqueueOutcome {
        let outcome = self.shared.push(DispatchJob::new(rendered_text, notional_usd, now_ms()));
        if outcome.added {
            self.shared.wake.notify_one();
        }
        outcome
    }

    pub fn len(&self) -> usize {
        self.shared.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.queue.lock().is_empty()
    }

    /// Queued jobs, highest priority first.
    pub fn snapshot(&self) -> Vec<DispatchJob> {
        self.shared.queue.lock().iter_ordered().cloned().collect()
    }

    pub fn paused_until(&self) -> Option<Instant> {
        self.shared.state.lock().paused_until
    }

    /// Stops the drain task and discards whatever is still queued.
    pub async fn shutdown(&self) {
        self.shared.stop.send_replace(true);
        let handle = self.shared.task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(channel = %self.shared.channel, error = %e, "drain task ended abnormally");
            }
        }
        let discarded = self.shared.queue.lock().clear();
        self.shared.record_depth(0);
        info!(channel = %self.shared.channel, discarded, "dispatcher stopped");
    }
}

/// `now + wait`, falling back to `now + fallback` (then `now`) if the clock would overflow.
fn pause_until(now: Instant, wait: Duration, fallback: Duration) -> (Duration, Instant) {
    match now.checked_add(wait) {
        Some(until) => (wait, until),
        None => match now.checked_add(fallback) {
            Some(until) => (fallback, until),
            None => (Duration::ZERO, now),
        },
    }
}

async fn drain(shared: Arc<Shared>, sink: Arc<dyn OutboundSink>, mut stop: watch::Receiver<bool>) {
    let channel = shared.channel.clone();
    debug!(channel = %channel, "drain loop started");

    loop {
        if *stop.borrow() {
            break;
        }

        // Rate-limit pause.
        let paused_until = shared.state.lock().paused_until;
        if let Some(until) = paused_until {
            if until > Instant::now() {
                tokio::select! {
                    _ = sleep_until(until) => continue,
                    _ = stop.changed() => break,
                }
            }
        }

        // Spacing between successful sends.
        let last_sent = shared.state.lock().last_sent;
        if let Some(last) = last_sent {
            let next = last + shared.config.min_interval;
            if next > Instant::now() {
                tokio::select! {
                    _ = sleep_until(next) => continue,
                    _ = stop.changed() => break,
                }
            }
        }

        let next_job = {
            let mut q = shared.queue.lock();
            q.dequeue().map(|job| (job, q.len()))
        };
        let (job, depth) = match next_job {
            Some(next) => next,
            None => {
                // Idle until an enqueue or shutdown; the stop flag is checked at the top.
                tokio::select! {
                    _ = shared.wake.notified() => {}
                    _ = stop.changed() => {}
                }
                continue;
            }
        };
        shared.record_depth(depth);

        match sink.send(&job.rendered_text).await {
            SendOutcome::Sent => {
                shared.state.lock().last_sent = Some(Instant::now());
                metrics::counter!("liqfeed_dispatch_sent_total", "channel" => channel.clone()).increment(1);
                debug!(channel = %channel, notional = job.priority_key, "sent");
            }
            SendOutcome::RateLimited { retry_after } => {
                let fallback = shared.config.fallback_retry_after;
                let wait = retry_after.unwrap_or(fallback).min(MAX_RATE_LIMIT_PAUSE);
                let (wait, until) = pause_until(Instant::now(), wait, fallback);
                shared.state.lock().paused_until = Some(until);
                metrics::counter!("liqfeed_dispatch_rate_limited_total", "channel" => channel.clone()).increment(1);
                warn!(channel = %channel, wait_ms = wait.as_millis() as u64, "rate limited, pausing channel");
                shared.push(job);
            }
            SendOutcome::Fatal(reason) => {
                metrics::counter!(
                    "liqfeed_dispatch_dropped_total",
                    "channel" => channel.clone(),
                    "reason" => "fatal"
                )
                .increment(1);
                error!(channel = %channel, notional = job.priority_key, reason = %reason, "send failed, dropping job");
            }
        }
    }

    debug!(channel = %channel, "drain loop stopped");
}
