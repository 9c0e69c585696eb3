//! x402 payment gateway.
//!
//! An HTTP server that sits in front of an existing API and charges for selected routes
//! using the [x402](https://www.x402.org) `402 Payment Required` flow. Requests without
//! a valid payment get a JSON challenge. Paid requests are verified and settled through a
//! remote facilitator, then proxied upstream with an `X-PAYMENT-RESPONSE` receipt.
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`config`] | CLI arguments and JSON configuration, price table construction |
//! | [`proxy`] | Forwarding of admitted requests to the upstream API |
//! | [`run`] | Server initialization and runtime |
//! | [`util`] | Shutdown signals and telemetry |
//!
//! ```bash
//! # Run with the default ./config.json
//! cargo run
//!
//! # Export traces and metrics over OTLP
//! OTEL_EXPORTER_OTLP_ENDPOINT=http://localhost:4318 cargo run --features telemetry
//!
//! # Custom config
//! cargo run -- --config /path/to/config.json
//! ```
//!
//! The gate itself lives in [`paygate_axum`], protocol types in [`paygate_types`].

pub mod config;
pub mod proxy;
pub mod run;
pub mod util;

pub use run::run;
