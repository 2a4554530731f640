//! Logging infrastructure: structured logging via `tracing`, applied
//! directly through its macros rather than a domain port (§10.4) — there is
//! no `Logger` trait to implement, since nothing in this crate needs to
//! swap the logging backend at a seam.
//!
//! - `logger`: subscriber construction (JSON/pretty, file + stdout)
//! - `config`: `LogConfig` and its `LoggingConfig` conversion
//! - `secret_scrubbing`: a `tracing_subscriber::Layer` that redacts API
//!   keys, bearer tokens, and passwords before they reach a sink
//! - `rotation`: size/time-based log file cleanup
//! - `audit`: append-only JSON audit trail for security-relevant events

pub mod audit;
pub mod config;
pub mod logger;
pub mod rotation;
pub mod secret_scrubbing;

pub use config::{LogConfig, LogFormat, RotationPolicy};
pub use logger::LoggerImpl;
