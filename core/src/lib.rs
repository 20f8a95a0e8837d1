//! ABOUTME: Core types, errors, clock, and tracing utilities
//! ABOUTME: Foundation crate used by all other jobslib components

pub mod error;
pub mod id;
pub mod telemetry;
pub mod time;

pub use error::{Error, Result};
pub use id::Id;
pub use time::{now_unix, to_local, to_utc, MonotonicTimer};
