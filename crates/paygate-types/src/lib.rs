#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Core types for an x402 payment gateway.
//!
//! A gateway answers unpaid requests to priced resources with `402 Payment Required`
//! and a machine-readable challenge. Clients retry with an `X-PAYMENT` proof, which
//! the gateway hands to a facilitator for verification and settlement.
//!
//! # Modules
//!
//! - [`config`] - `$VAR` / `${VAR}` aware configuration values
//! - [`facilitator`] - verify/settle interface with fail-closed helpers
//! - [`networks`] - known USDC deployments
//! - [`proto`] - x402 v1 wire format
//! - [`timestamp`] - ISO-8601 receipt timestamps
//! - [`util`] - base64 bytes and money amounts

pub mod config;
pub mod facilitator;
pub mod networks;
pub mod proto;
pub mod timestamp;
pub mod util;
