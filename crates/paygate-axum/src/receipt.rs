//! The `X-PAYMENT-RESPONSE` receipt attached to responses of settled requests.
//!
//! A receipt is JSON `{success, txHash, networkId, timestamp}` encoded with standard
//! base64. The timestamp is taken when the receipt is created, never from the facilitator.

use http::header::InvalidHeaderValue;
use http::{HeaderName, HeaderValue};
use paygate_types::timestamp::IsoTimestamp;
use paygate_types::util::Base64Bytes;
use serde::{Deserialize, Serialize};

/// `X-PAYMENT-RESPONSE`, the response header carrying the encoded receipt.
pub const X_PAYMENT_RESPONSE: HeaderName = HeaderName::from_static("x-payment-response");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementReceipt {
    pub success: bool,
    pub tx_hash: String,
    pub network_id: String,
    pub timestamp: IsoTimestamp,
}

#[derive(Debug, thiserror::Error)]
pub enum ReceiptError {
    #[error("Receipt is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Receipt is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Receipt cannot be used as a header value: {0}")]
    HeaderValue(#[from] InvalidHeaderValue),
}

impl SettlementReceipt {
    /// Receipt for a successful settlement, stamped with the current time.
    pub fn from_settlement(tx_hash: impl Into<String>, network_id: impl Into<String>) -> Self {
        Self {
            success: true,
            tx_hash: tx_hash.into(),
            network_id: network_id.into(),
            timestamp: IsoTimestamp::now(),
        }
    }

    /// JSON, then standard base64.
    pub fn encode(&self) -> Result<String, ReceiptError> {
        let json = serde_json::to_vec(self)?;
        Ok(Base64Bytes::encode(json).to_string())
    }

    pub fn decode(encoded: &str) -> Result<Self, ReceiptError> {
        let json = Base64Bytes::from(encoded.trim()).decode()?;
        Ok(serde_json::from_slice(&json)?)
    }

    pub fn to_header_value(&self) -> Result<HeaderValue, ReceiptError> {
        Ok(HeaderValue::from_str(&self.encode()?)?)
    }
}
