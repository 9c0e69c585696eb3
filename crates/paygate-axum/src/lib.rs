//! Axum/tower payment gate for [x402](https://www.x402.org) v1.
//!
//! A [`PriceTable`] maps `"METHOD /path"` patterns to the payment options a route accepts.
//! The [`Paygate`] evaluates every request against it, asks a [`Facilitator`] to verify and
//! settle the `X-PAYMENT` proof, and [`PaygateLayer`] turns the outcome into either the
//! protected handler's response (with an `X-PAYMENT-RESPONSE` receipt when settled) or a
//! `402 Payment Required` challenge.
//!
//! ## Quickstart
//!
//! ```rust,no_run
//! use axum::{Router, routing::get, Json};
//! use paygate_axum::{ExemptOrigins, FacilitatorClient, Paygate, PaygateLayer, PaymentOption, PriceTable, RouteConfig};
//! use serde_json::json;
//!
//! let price_table = PriceTable::try_new([(
//!     "GET /reports/*",
//!     RouteConfig::new(vec![PaymentOption::exact(
//!         "base",
//!         "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913",
//!         "0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045",
//!         "25000".parse().unwrap(),
//!     )])
//!     .with_description("Report {path}"),
//! )])
//! .unwrap();
//!
//! let gate = Paygate::new(
//!     FacilitatorClient::try_from("https://facilitator.example.com/").unwrap(),
//!     price_table,
//! )
//! .with_exempt_origins(ExemptOrigins::new(["https://app.example.com"]));
//!
//! let app: Router = Router::new()
//!     .route("/reports/{id}", get(|| async { Json(json!({ "hello": "world" })) }))
//!     .layer(PaygateLayer::new(gate));
//! ```
//!
//! Facilitator failures never open the gate: a verify error is a rejected payment, a settle
//! error serves the request without a receipt. See [`paygate`] for the full state machine.
//!
//! [`Facilitator`]: paygate_types::facilitator::Facilitator

pub mod challenge;
pub mod exemption;
pub mod facilitator_client;
pub mod layer;
pub mod paygate;
pub mod price_table;
pub mod receipt;

pub use challenge::{PaymentRequiredResponse, ResourceUrl, build_challenge};
pub use exemption::ExemptOrigins;
pub use facilitator_client::{FacilitatorClient, FacilitatorClientError};
pub use layer::{PaygateLayer, PaygateService};
pub use paygate::{GateOutcome, GateState, Paygate, X_PAYMENT};
pub use price_table::{PaymentOption, PriceTable, PriceTableError, RouteConfig};
pub use receipt::{ReceiptError, SettlementReceipt, X_PAYMENT_RESPONSE};
