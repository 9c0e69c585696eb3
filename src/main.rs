//! x402 payment gateway entrypoint.
//!
//! Endpoints:
//! - `GET /health` – Liveness, never priced
//! - anything else – Priced per the configured routes, then proxied to the upstream
//!
//! Environment:
//! - `.env` values loaded at startup
//! - `CONFIG` selects the config file, `HOST` and `PORT` the bind address
//! - `RUST_LOG` controls log verbosity, `OTEL_*` enables export with the `telemetry` feature

use std::process;

use x402_paygate::run;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("{e}");
        process::exit(1)
    }
}
