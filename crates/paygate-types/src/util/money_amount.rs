//! Human-readable prices.
//!
//! Route prices are configured as strings like `"$0.01"`, `"1,000"` or `"0.5"`. A
//! [`MoneyAmount`] keeps the exact decimal so it can be scaled to an asset's smallest
//! unit without rounding, see [`MoneyAmount::to_token_units`].
//!
//! ```rust
//! use paygate_types::util::MoneyAmount;
//!
//! let amount = MoneyAmount::parse("$10.50").unwrap();
//! assert_eq!(amount.scale(), 2);
//! assert_eq!(amount.mantissa(), 1050);
//! assert_eq!(amount.to_token_units(6).unwrap().to_string(), "10500000");
//! ```

use regex::Regex;
use rust_decimal::Decimal;
use std::fmt;
use std::fmt::Display;
use std::str::FromStr;
use std::sync::LazyLock;

use crate::proto::TokenAmount;

/// A non-negative decimal amount of money, precision preserved.
#[derive(Debug, Clone, PartialEq)]
pub struct MoneyAmount(pub Decimal);

/// Errors that can occur when parsing or scaling a monetary amount.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MoneyAmountParseError {
    #[error("Invalid number format")]
    InvalidFormat,
    #[error(
        "Amount must be between {} and {}",
        constants::MIN_STR,
        constants::MAX_STR
    )]
    OutOfRange,
    #[error("Negative value is not allowed")]
    Negative,
    /// The amount has more fractional digits than the asset can represent.
    #[error("Too big of a precision: {money} vs {token} on token")]
    WrongPrecision { money: u32, token: u32 },
}

mod constants {
    use super::*;

    pub const MIN_STR: &str = "0.000000001";
    pub const MAX_STR: &str = "999999999";

    pub static MIN: LazyLock<Decimal> = LazyLock::new(|| Decimal::new(1, 9));
    pub static MAX: LazyLock<Decimal> = LazyLock::new(|| Decimal::from(999_999_999u32));
}

/// Anything that is not a digit, a dot or a minus sign: currency symbols, separators, spaces.
static NOISE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\d\.\-]+").expect("static pattern compiles"));

impl MoneyAmount {
    /// Number of fractional digits as written, `"10.50"` has scale 2.
    pub fn scale(&self) -> u32 {
        self.0.scale()
    }

    /// The digits without the decimal point, `"10.50"` gives 1050.
    pub fn mantissa(&self) -> u128 {
        self.0.mantissa().unsigned_abs()
    }

    /// Parses a price string, ignoring currency symbols, thousand separators and whitespace.
    pub fn parse(input: &str) -> Result<Self, MoneyAmountParseError> {
        let cleaned = NOISE.replace_all(input, "").to_string();

        let parsed =
            Decimal::from_str(&cleaned).map_err(|_| MoneyAmountParseError::InvalidFormat)?;

        if parsed.is_sign_negative() {
            return Err(MoneyAmountParseError::Negative);
        }

        if parsed < *constants::MIN || parsed > *constants::MAX {
            return Err(MoneyAmountParseError::OutOfRange);
        }

        Ok(MoneyAmount(parsed))
    }

    /// Converts the amount into the smallest unit of an asset with `decimals` fractional digits.
    ///
    /// Computes `mantissa * 10^(decimals - scale)`. Fails with
    /// [`MoneyAmountParseError::WrongPrecision`] when the amount is finer than the asset allows.
    pub fn to_token_units(&self, decimals: u32) -> Result<TokenAmount, MoneyAmountParseError> {
        let scale = self.scale();
        if scale > decimals {
            return Err(MoneyAmountParseError::WrongPrecision {
                money: scale,
                token: decimals,
            });
        }
        let multiplier = 10u128
            .checked_pow(decimals - scale)
            .ok_or(MoneyAmountParseError::OutOfRange)?;
        let units = self
            .mantissa()
            .checked_mul(multiplier)
            .ok_or(MoneyAmountParseError::OutOfRange)?;
        Ok(TokenAmount::from(units))
    }
}

impl FromStr for MoneyAmount {
    type Err = MoneyAmountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MoneyAmount::parse(s)
    }
}

impl TryFrom<&str> for MoneyAmount {
    type Error = MoneyAmountParseError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        MoneyAmount::from_str(value)
    }
}

impl Display for MoneyAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_symbols_and_separators() {
        assert_eq!(MoneyAmount::parse("$0.01").unwrap().to_string(), "0.01");
        assert_eq!(MoneyAmount::parse("1,000.50").unwrap().mantissa(), 100050);
        assert_eq!(MoneyAmount::parse(" 20 USD ").unwrap().to_string(), "20");
    }

    #[test]
    fn rejects_bad_input() {
        assert_eq!(
            MoneyAmount::parse("free"),
            Err(MoneyAmountParseError::InvalidFormat)
        );
        assert_eq!(
            MoneyAmount::parse("-1"),
            Err(MoneyAmountParseError::Negative)
        );
        assert_eq!(
            MoneyAmount::parse("0"),
            Err(MoneyAmountParseError::OutOfRange)
        );
        assert_eq!(
            MoneyAmount::parse("1000000000"),
            Err(MoneyAmountParseError::OutOfRange)
        );
    }

    #[test]
    fn scales_to_usdc_units() {
        let cent = MoneyAmount::parse("$0.01").unwrap();
        assert_eq!(cent.to_token_units(6).unwrap().as_str(), "10000");

        let whole = MoneyAmount::parse("3").unwrap();
        assert_eq!(whole.to_token_units(6).unwrap().as_str(), "3000000");

        let exact = MoneyAmount::parse("0.000001").unwrap();
        assert_eq!(exact.to_token_units(6).unwrap().as_str(), "1");
    }

    #[test]
    fn refuses_precision_finer_than_asset() {
        let tiny = MoneyAmount::parse("0.0000001").unwrap();
        assert_eq!(
            tiny.to_token_units(6),
            Err(MoneyAmountParseError::WrongPrecision { money: 7, token: 6 })
        );
    }
}
