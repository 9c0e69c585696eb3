//! Helper types shared by the gateway crates.
//!
//! - [`b64`] - base64 wrapper used for receipt headers
//! - [`money_amount`] - human-readable prices such as `"$0.01"`

pub mod b64;
pub mod money_amount;

pub use b64::*;
pub use money_amount::*;
