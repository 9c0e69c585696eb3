//! Process-level helpers for the gateway binary.
//!
//! | Module | Description | Feature |
//! |--------|-------------|---------|
//! | [`sig_down`] | Graceful shutdown on SIGTERM / SIGINT | - |
//! | [`telemetry`] | Log subscriber, optional OpenTelemetry export, HTTP trace layer | `telemetry` adds OTLP |

pub mod sig_down;
pub mod telemetry;

pub use sig_down::*;
pub use telemetry::*;
