//! Probing, status transitions and scheduling

pub mod prober;
pub mod scheduler;
pub mod transition;

pub use prober::{CheckOutcome, Prober};
pub use scheduler::{effective_interval, is_due, Scheduler};
pub use transition::{apply_transition, Observation, Transition};

use std::time::Duration;

/// Scheduler clock period
pub const DEFAULT_TICK: Duration = Duration::from_secs(5);

/// Interval used for services without a positive configured interval
pub const FALLBACK_INTERVAL: Duration = Duration::from_secs(10);

/// Timeout used for services without a positive configured timeout
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);
