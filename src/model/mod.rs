//! Core data model shared by the scheduler, prober, store and live feed

pub mod alert;
pub mod check;
pub mod service;

pub use alert::{Alert, AlertKind, NewAlert};
pub use check::{CheckResult, NewCheck, ServiceStatus, StatusMessage, UptimeSummary};
pub use service::{Service, ServiceId};
