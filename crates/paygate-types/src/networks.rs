//! Known USDC deployments, used to turn a human price into an on-chain amount.
//!
//! Network names follow the x402 v1 convention (`"base"`, `"base-sepolia"`, `"solana"`,
//! `"solana-devnet"`).
//!
//! ```rust
//! use paygate_types::networks::UsdcDeployment;
//! use paygate_types::util::MoneyAmount;
//!
//! let usdc = UsdcDeployment::by_network("base").unwrap();
//! let amount = usdc.parse(&MoneyAmount::parse("$0.01").unwrap()).unwrap();
//! assert_eq!(amount.as_str(), "10000");
//! ```

use serde_json::json;

use crate::proto::TokenAmount;
use crate::util::{MoneyAmount, MoneyAmountParseError};

/// EIP-712 domain parameters an EVM client needs to sign an `exact` payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Eip712Domain {
    pub name: &'static str,
    pub version: &'static str,
}

/// A USDC token on a specific network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsdcDeployment {
    pub network: &'static str,
    /// Contract address (EVM) or mint address (Solana).
    pub asset: &'static str,
    pub decimals: u32,
    pub eip712: Option<Eip712Domain>,
}

pub static KNOWN_USDC: &[UsdcDeployment] = &[
    UsdcDeployment {
        network: "base",
        asset: "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913",
        decimals: 6,
        eip712: Some(Eip712Domain {
            name: "USD Coin",
            version: "2",
        }),
    },
    UsdcDeployment {
        network: "base-sepolia",
        asset: "0x036CbD53842c5426634e7929541eC2318f3dCF7e",
        decimals: 6,
        eip712: Some(Eip712Domain {
            name: "USDC",
            version: "2",
        }),
    },
    UsdcDeployment {
        network: "polygon",
        asset: "0x3c499c542cEF5E3811e1192ce70d8cC03d5c3359",
        decimals: 6,
        eip712: Some(Eip712Domain {
            name: "USDC",
            version: "2",
        }),
    },
    UsdcDeployment {
        network: "polygon-amoy",
        asset: "0x41E94Eb019C0762f9Bfcf9Fb1E58725BfB0e7582",
        decimals: 6,
        eip712: Some(Eip712Domain {
            name: "USDC",
            version: "2",
        }),
    },
    UsdcDeployment {
        network: "avalanche",
        asset: "0xB97EF9Ef8734C71904D8002F8b6Bc66Dd9c48a6E",
        decimals: 6,
        eip712: Some(Eip712Domain {
            name: "USD Coin",
            version: "2",
        }),
    },
    UsdcDeployment {
        network: "solana",
        asset: "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v",
        decimals: 6,
        eip712: None,
    },
    UsdcDeployment {
        network: "solana-devnet",
        asset: "4zMMC9srt5Ri5X14GAgXhaHii3GnPAEERYPJgZJDncDU",
        decimals: 6,
        eip712: None,
    },
];

impl UsdcDeployment {
    pub fn by_network(network: &str) -> Option<&'static UsdcDeployment> {
        KNOWN_USDC.iter().find(|d| d.network == network)
    }

    /// Converts a human price into this token's smallest unit.
    pub fn parse(&self, money: &MoneyAmount) -> Result<TokenAmount, MoneyAmountParseError> {
        money.to_token_units(self.decimals)
    }

    /// The `extra` object advertised in payment requirements: EIP-712 name and version on EVM.
    pub fn extra(&self) -> Option<serde_json::Value> {
        self.eip712.map(|domain| {
            json!({
                "name": domain.name,
                "version": domain.version,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn looks_up_by_network_name() {
        let base = UsdcDeployment::by_network("base").unwrap();
        assert_eq!(base.asset, "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913");
        assert!(UsdcDeployment::by_network("base-mainnet").is_none());
        assert!(UsdcDeployment::by_network("BASE").is_none());
    }

    #[test]
    fn evm_deployments_carry_eip712_extra() {
        let sepolia = UsdcDeployment::by_network("base-sepolia").unwrap();
        assert_eq!(
            sepolia.extra(),
            Some(json!({"name": "USDC", "version": "2"}))
        );
        assert_eq!(UsdcDeployment::by_network("solana").unwrap().extra(), None);
    }

    #[test]
    fn network_names_are_unique() {
        for (i, a) in KNOWN_USDC.iter().enumerate() {
            for b in &KNOWN_USDC[i + 1..] {
                assert_ne!(a.network, b.network);
            }
        }
    }
}
