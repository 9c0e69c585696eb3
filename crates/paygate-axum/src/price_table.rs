//! Which routes cost money, and how they can be paid for.
//!
//! A [`PriceTable`] is built once at startup from entries keyed `"METHOD /pattern"`
//! (or just `"/pattern"` for any method) and is immutable afterwards. Patterns are
//! either exact paths or a prefix ending in `/*`, which matches any path with at least
//! one more segment below the prefix.
//!
//! Construction rejects tables where two entries could claim the same request, so a
//! lookup never depends on entry order.
//!
//! ```rust
//! use http::Method;
//! use paygate_axum::price_table::{PaymentOption, PriceTable, RouteConfig};
//!
//! let option = PaymentOption::exact(
//!     "base",
//!     "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913",
//!     "0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045",
//!     "10000".parse().unwrap(),
//! );
//! let table = PriceTable::try_new([("GET /reports/*", RouteConfig::new(vec![option]))]).unwrap();
//! assert!(table.lookup(&Method::GET, "/reports/2024").is_some());
//! assert!(table.lookup(&Method::GET, "/reports").is_none());
//! ```

use http::Method;
use paygate_types::proto::{DEFAULT_MIME_TYPE, EXACT_SCHEME, TokenAmount};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Display;

/// Used when a payment option does not say how long a client may take to pay.
pub const DEFAULT_MAX_TIMEOUT_SECONDS: u64 = 300;

/// One accepted way to pay for a route: network, asset, recipient and amount.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentOption {
    #[serde(default = "defaults::scheme")]
    pub scheme: String,
    pub network: String,
    pub asset: String,
    pub pay_to: String,
    /// Amount in the asset's smallest unit.
    pub amount: TokenAmount,
    #[serde(default = "defaults::max_timeout_seconds")]
    pub max_timeout_seconds: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

mod defaults {
    pub fn scheme() -> String {
        super::EXACT_SCHEME.to_string()
    }

    pub fn max_timeout_seconds() -> u64 {
        super::DEFAULT_MAX_TIMEOUT_SECONDS
    }
}

impl PaymentOption {
    /// An `exact` scheme option with the default timeout and no extra metadata.
    pub fn exact(
        network: impl Into<String>,
        asset: impl Into<String>,
        pay_to: impl Into<String>,
        amount: TokenAmount,
    ) -> Self {
        Self {
            scheme: EXACT_SCHEME.to_string(),
            network: network.into(),
            asset: asset.into(),
            pay_to: pay_to.into(),
            amount,
            max_timeout_seconds: DEFAULT_MAX_TIMEOUT_SECONDS,
            extra: None,
        }
    }

    pub fn with_extra(mut self, extra: serde_json::Value) -> Self {
        self.extra = Some(extra);
        self
    }

    pub fn with_max_timeout_seconds(mut self, seconds: u64) -> Self {
        self.max_timeout_seconds = seconds;
        self
    }
}

/// Everything needed to build a challenge for one priced route.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteConfig {
    /// Offered options, in the order they appear in the challenge.
    pub accepts: Vec<PaymentOption>,
    /// Description template, `{path}` is replaced by the request path.
    pub description: String,
    pub mime_type: String,
    pub output_schema: Option<serde_json::Value>,
}

impl RouteConfig {
    pub fn new(accepts: Vec<PaymentOption>) -> Self {
        Self {
            accepts,
            description: String::new(),
            mime_type: DEFAULT_MIME_TYPE.to_string(),
            output_schema: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }

    pub fn with_output_schema(mut self, output_schema: serde_json::Value) -> Self {
        self.output_schema = Some(output_schema);
        self
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PriceTableError {
    #[error("Malformed route key {key:?}: {reason}")]
    MalformedKey { key: String, reason: &'static str },
    #[error("Route {key:?} has no payment options")]
    NoPaymentOptions { key: String },
    #[error("Routes {first:?} and {second:?} can match the same request")]
    Overlap { first: String, second: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum MethodFilter {
    Any,
    Only(Method),
}

impl MethodFilter {
    fn matches(&self, method: &Method) -> bool {
        match self {
            MethodFilter::Any => true,
            MethodFilter::Only(only) => only == method,
        }
    }

    fn intersects(&self, other: &MethodFilter) -> bool {
        match (self, other) {
            (MethodFilter::Only(a), MethodFilter::Only(b)) => a == b,
            _ => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PathPattern {
    Exact(String),
    /// Prefix including its trailing slash, `"/api/*"` is stored as `"/api/"`.
    Subtree(String),
}

impl PathPattern {
    fn parse(pattern: &str) -> Result<Self, &'static str> {
        if !pattern.starts_with('/') {
            return Err("path must start with '/'");
        }
        if pattern.contains('?') || pattern.contains('#') {
            return Err("path must not contain a query or fragment");
        }
        match pattern.strip_suffix('*') {
            Some(prefix) if prefix.ends_with('/') && !prefix.contains('*') => {
                Ok(PathPattern::Subtree(prefix.to_string()))
            }
            Some(_) => Err("'*' is only allowed as a trailing '/*' segment"),
            None if pattern.contains('*') => Err("'*' is only allowed as a trailing '/*' segment"),
            None => Ok(PathPattern::Exact(pattern.to_string())),
        }
    }

    fn matches(&self, path: &str) -> bool {
        match self {
            PathPattern::Exact(exact) => exact == path,
            PathPattern::Subtree(prefix) => is_below(prefix, path),
        }
    }

    fn overlaps(&self, other: &PathPattern) -> bool {
        match (self, other) {
            (PathPattern::Exact(a), PathPattern::Exact(b)) => a == b,
            (PathPattern::Exact(exact), PathPattern::Subtree(prefix))
            | (PathPattern::Subtree(prefix), PathPattern::Exact(exact)) => is_below(prefix, exact),
            (PathPattern::Subtree(a), PathPattern::Subtree(b)) => {
                a.starts_with(b.as_str()) || b.starts_with(a.as_str())
            }
        }
    }
}

fn is_below(prefix: &str, path: &str) -> bool {
    path.len() > prefix.len() && path.starts_with(prefix)
}

/// Parses `"GET /path"` or `"/path"` into a method filter and a path pattern.
fn parse_route_key(key: &str) -> Result<(MethodFilter, PathPattern), PriceTableError> {
    let malformed = |reason| PriceTableError::MalformedKey {
        key: key.to_string(),
        reason,
    };
    let trimmed = key.trim();
    let (method, pattern) = match trimmed.split_once(char::is_whitespace) {
        Some((method, pattern)) => {
            if !method.bytes().all(|b| b.is_ascii_alphabetic()) {
                return Err(malformed("method must be alphabetic"));
            }
            let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
                .map_err(|_| malformed("invalid method"))?;
            (MethodFilter::Only(method), pattern.trim())
        }
        None => (MethodFilter::Any, trimmed),
    };
    let pattern = PathPattern::parse(pattern).map_err(malformed)?;
    Ok((method, pattern))
}

#[derive(Debug, Clone)]
struct PriceEntry {
    key: String,
    method: MethodFilter,
    pattern: PathPattern,
    route: RouteConfig,
}

/// Immutable route → price lookup, validated at construction.
#[derive(Debug, Clone, Default)]
pub struct PriceTable {
    entries: Vec<PriceEntry>,
}

impl PriceTable {
    /// Builds a table, rejecting malformed keys, routes without options, and overlaps.
    pub fn try_new<I, K>(entries: I) -> Result<Self, PriceTableError>
    where
        I: IntoIterator<Item = (K, RouteConfig)>,
        K: AsRef<str>,
    {
        let mut table: Vec<PriceEntry> = Vec::new();
        for (key, route) in entries {
            let key = key.as_ref().trim().to_string();
            let (method, pattern) = parse_route_key(&key)?;
            if route.accepts.is_empty() {
                return Err(PriceTableError::NoPaymentOptions { key });
            }
            if let Some(existing) = table
                .iter()
                .find(|e| e.method.intersects(&method) && e.pattern.overlaps(&pattern))
            {
                return Err(PriceTableError::Overlap {
                    first: existing.key.clone(),
                    second: key,
                });
            }
            table.push(PriceEntry {
                key,
                method,
                pattern,
                route,
            });
        }
        Ok(Self { entries: table })
    }

    /// Finds the route config for a request, `None` means the route is free.
    ///
    /// `path` is the request path without its query string.
    pub fn lookup(&self, method: &Method, path: &str) -> Option<&RouteConfig> {
        self.entries
            .iter()
            .find(|e| e.method.matches(method) && e.pattern.matches(path))
            .map(|e| &e.route)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Configured keys, in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.key.as_str())
    }
}

impl Display for PriceTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<&str> = self.keys().collect();
        write!(f, "[{}]", keys.join(", "))
    }
}
