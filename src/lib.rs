//! Upwatch: HTTP Uptime Monitor
//!
//! Periodically probes HTTP endpoints, keeps the latest up/down status of
//! each one, records every check, and raises an alert exactly once per
//! status flip. Status changes are pushed to live WebSocket subscribers.
//!
//! # Components
//!
//! - **Scheduler**: coarse tick; dispatches each service whose interval has elapsed
//! - **Prober**: one HTTP request per check, classified by exact status code
//! - **Status transitions**: compare-and-upsert under a per-service lock, with alerts
//! - **Status hub**: single-owner fan-out of live updates, never blocks a check
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use upwatch::hub::StatusHub;
//! use upwatch::model::Service;
//! use upwatch::monitor::{Prober, Scheduler};
//! use upwatch::source::FileServiceSource;
//! use upwatch::storage::MemoryStore;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() {
//! let shutdown = CancellationToken::new();
//! let hub = StatusHub::new(64, 32);
//! let prober = Arc::new(Prober::new(Arc::new(MemoryStore::new()), hub.handle()));
//! hub.start(shutdown.clone());
//!
//! let source = Arc::new(FileServiceSource::from_services(vec![
//!     Service::new(1, "https://example.com/health").with_interval_sec(30),
//! ]));
//! Scheduler::new(source, prober).start(shutdown.clone());
//! # }
//! ```

pub mod api;
pub mod config;
pub mod hub;
pub mod model;
pub mod monitor;
pub mod source;
pub mod storage;

// Re-export commonly used types
pub use config::{Config, ConfigError};
pub use model::{Alert, AlertKind, CheckResult, Service, ServiceId, ServiceStatus, StatusMessage};
pub use monitor::{apply_transition, CheckOutcome, Prober, Scheduler};
pub use storage::{MemoryStore, Store, StoreError};
