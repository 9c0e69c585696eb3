//! Configuration values that may come from the environment.
//!
//! A [`LiteralOrEnv`] field accepts either a literal or a reference to an environment
//! variable, so secrets and per-deployment values stay out of the config file:
//!
//! ```json
//! {
//!   "facilitator": { "url": "$FACILITATOR_URL" },
//!   "recipients": { "base": "${BASE_PAY_TO}", "solana": "9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin" }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::ops::Deref;
use std::str::FromStr;

/// A value given literally or as `$VAR` / `${VAR}`, resolved once at deserialization time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiteralOrEnv<T>(T);

impl<T> LiteralOrEnv<T> {
    pub fn from_literal(value: T) -> Self {
        Self(value)
    }

    pub fn inner(&self) -> &T {
        &self.0
    }

    pub fn into_inner(self) -> T {
        self.0
    }
}

/// Returns the variable name when `s` is written as `$VAR` or `${VAR}`.
fn env_var_name(s: &str) -> Option<&str> {
    if let Some(braced) = s.strip_prefix("${") {
        return braced.strip_suffix('}').filter(|name| !name.is_empty());
    }
    let bare = s.strip_prefix('$')?;
    let is_identifier = !bare.is_empty() && bare.chars().all(|c| c.is_alphanumeric() || c == '_');
    is_identifier.then_some(bare)
}

impl<T> Deref for LiteralOrEnv<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<'de, T> Deserialize<'de> for LiteralOrEnv<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        let value = match env_var_name(&raw) {
            Some(name) => std::env::var(name).map_err(|_| {
                serde::de::Error::custom(format!(
                    "Environment variable '{name}' not found (referenced as '{raw}')"
                ))
            })?,
            None => raw,
        };
        value
            .parse::<T>()
            .map(LiteralOrEnv)
            .map_err(|e| serde::de::Error::custom(format!("Failed to parse value: {e}")))
    }
}

impl<T: Serialize> Serialize for LiteralOrEnv<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.0.serialize(serializer)
    }
}
