//! Wire format types exchanged between the gateway, paying clients and the facilitator.
//!
//! Everything here serializes to camelCase JSON following x402 protocol version 1:
//!
//! - [`PaymentRequirements`] - one accepted way to pay for a resource
//! - [`PaymentRequired`] - the body of a `402 Payment Required` challenge
//! - [`FacilitatorRequest`] - body of both `POST /verify` and `POST /settle`
//! - [`VerificationResult`] / [`SettlementResult`] - facilitator answers
//!
//! Amounts are carried as [`TokenAmount`], a decimal string of the asset's smallest unit.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::fmt::Display;
use std::str::FromStr;

/// The only payment scheme the gateway offers.
pub const EXACT_SCHEME: &str = "exact";

/// Default MIME type advertised for protected resources.
pub const DEFAULT_MIME_TYPE: &str = "application/json";

/// Version marker for x402 protocol version 1.
///
/// Serializes as the integer `1`, refuses anything else on the way in.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct X402Version1;

impl X402Version1 {
    pub const VALUE: u8 = 1;
}

impl Serialize for X402Version1 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(Self::VALUE)
    }
}

impl<'de> Deserialize<'de> for X402Version1 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let num = u8::deserialize(deserializer)?;
        if num == Self::VALUE {
            Ok(X402Version1)
        } else {
            Err(serde::de::Error::custom(format!(
                "expected x402Version {}, got {}",
                Self::VALUE,
                num
            )))
        }
    }
}

impl Display for X402Version1 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Self::VALUE)
    }
}

/// A non-negative integer amount in the smallest unit of an asset, kept as a decimal string.
///
/// The value never goes through a float. Only ASCII digits are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TokenAmount(String);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TokenAmountError {
    #[error("Token amount must not be empty")]
    Empty,
    #[error("Token amount must contain only digits, got {0:?}")]
    NotDigits(String),
}

impl TokenAmount {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for TokenAmount {
    type Err = TokenAmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(TokenAmountError::Empty);
        }
        if !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(TokenAmountError::NotDigits(s.to_string()));
        }
        Ok(TokenAmount(s.to_string()))
    }
}

impl From<u128> for TokenAmount {
    fn from(value: u128) -> Self {
        TokenAmount(value.to_string())
    }
}

impl Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for TokenAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for TokenAmount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// One accepted way to pay for a resource.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    /// Payment scheme, currently always [`EXACT_SCHEME`].
    pub scheme: String,
    /// Network name, e.g. `"base"` or `"solana"`.
    pub network: String,
    pub max_amount_required: TokenAmount,
    /// Absolute URL of the protected resource, query string included.
    pub resource: String,
    pub description: String,
    pub mime_type: String,
    /// Recipient address on [`Self::network`].
    pub pay_to: String,
    /// Contract or mint address of the payment asset.
    pub asset: String,
    pub max_timeout_seconds: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<serde_json::Value>,
}

/// Body of a `402 Payment Required` response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequired {
    pub x402_version: X402Version1,
    pub error: String,
    pub accepts: Vec<PaymentRequirements>,
}

/// Body sent to the facilitator for both verification and settlement.
///
/// `payment_header` is the raw `X-PAYMENT` value, forwarded without interpretation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FacilitatorRequest {
    pub x402_version: X402Version1,
    pub payment_header: String,
    pub payment_requirements: PaymentRequirements,
}

impl FacilitatorRequest {
    pub fn new(payment_header: impl Into<String>, payment_requirements: PaymentRequirements) -> Self {
        Self {
            x402_version: X402Version1,
            payment_header: payment_header.into(),
            payment_requirements,
        }
    }
}

/// Facilitator verdict on a payment proof.
///
/// `invalidReason` is present on the wire exactly when `isValid` is false.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationResult {
    Valid {
        payer: Option<String>,
    },
    Invalid {
        reason: String,
        payer: Option<String>,
    },
}

impl VerificationResult {
    pub fn invalid(reason: impl Into<String>) -> Self {
        VerificationResult::Invalid {
            reason: reason.into(),
            payer: None,
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, VerificationResult::Valid { .. })
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerificationResultWire {
    is_valid: bool,
    #[serde(default)]
    invalid_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payer: Option<String>,
}

impl Serialize for VerificationResult {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let wire = match self {
            VerificationResult::Valid { payer } => VerificationResultWire {
                is_valid: true,
                invalid_reason: None,
                payer: payer.clone(),
            },
            VerificationResult::Invalid { reason, payer } => VerificationResultWire {
                is_valid: false,
                invalid_reason: Some(reason.clone()),
                payer: payer.clone(),
            },
        };
        wire.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for VerificationResult {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let wire = VerificationResultWire::deserialize(deserializer)?;
        if wire.is_valid {
            Ok(VerificationResult::Valid { payer: wire.payer })
        } else {
            let reason = wire
                .invalid_reason
                .ok_or_else(|| serde::de::Error::missing_field("invalidReason"))?;
            Ok(VerificationResult::Invalid {
                reason,
                payer: wire.payer,
            })
        }
    }
}

/// Facilitator outcome of an on-chain settlement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementResult {
    Success { tx_hash: String, network_id: String },
    Failure { error: String },
}

impl SettlementResult {
    /// Used when a facilitator reports `success: false` without saying why.
    pub const UNKNOWN_FAILURE: &'static str = "Settlement failed";

    pub fn failure(error: impl Into<String>) -> Self {
        SettlementResult::Failure {
            error: error.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, SettlementResult::Success { .. })
    }
}

/// Accepts both the gateway field names and the ones standard x402 facilitators answer with.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettlementResultWire {
    success: bool,
    #[serde(default, alias = "transaction", skip_serializing_if = "Option::is_none")]
    tx_hash: Option<String>,
    #[serde(default, alias = "network", skip_serializing_if = "Option::is_none")]
    network_id: Option<String>,
    #[serde(default, alias = "errorReason", skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl Serialize for SettlementResult {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let wire = match self {
            SettlementResult::Success {
                tx_hash,
                network_id,
            } => SettlementResultWire {
                success: true,
                tx_hash: Some(tx_hash.clone()),
                network_id: Some(network_id.clone()),
                error: None,
            },
            SettlementResult::Failure { error } => SettlementResultWire {
                success: false,
                tx_hash: None,
                network_id: None,
                error: Some(error.clone()),
            },
        };
        wire.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SettlementResult {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let wire = SettlementResultWire::deserialize(deserializer)?;
        if wire.success {
            let tx_hash = wire
                .tx_hash
                .ok_or_else(|| serde::de::Error::missing_field("txHash"))?;
            let network_id = wire
                .network_id
                .ok_or_else(|| serde::de::Error::missing_field("networkId"))?;
            Ok(SettlementResult::Success {
                tx_hash,
                network_id,
            })
        } else {
            let error = wire
                .error
                .unwrap_or_else(|| Self::UNKNOWN_FAILURE.to_string());
            Ok(SettlementResult::Failure { error })
        }
    }
}
