pub mod dispatcher;
pub mod queue;
pub mod sinks;
pub mod types;

pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use queue::BoundedPriorityQueue;
pub use sinks::{DryRunSink, OutboundSink, SendOutcome};
pub use types::{DispatchJob, EnqueueOutcome, EvictionLog};
