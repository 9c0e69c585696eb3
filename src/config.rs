//! Configuration of the payment gateway.
//!
//! Loaded from a JSON file given by `--config` (or `$CONFIG`), `config.json` by default.
//! Values written as `$VAR` or `${VAR}` are read from the environment, see [`LiteralOrEnv`].
//!
//! ```json
//! {
//!   "port": 8080,
//!   "baseUrl": "https://api.example.com",
//!   "upstream": "http://127.0.0.1:3000",
//!   "facilitator": { "url": "$FACILITATOR_URL", "timeoutSeconds": 10 },
//!   "exemptOrigins": ["https://app.example.com"],
//!   "recipients": { "base": "$BASE_PAY_TO" },
//!   "routes": {
//!     "GET /premium": { "price": "$0.01", "networks": ["base"], "description": "Premium data" }
//!   }
//! }
//! ```

use clap::Parser;
use http::header::{InvalidHeaderName, InvalidHeaderValue};
use http::{HeaderMap, HeaderName, HeaderValue};
use paygate_axum::{ExemptOrigins, PaymentOption, PriceTable, PriceTableError, RouteConfig};
use paygate_types::config::LiteralOrEnv;
use paygate_types::networks::UsdcDeployment;
use paygate_types::util::{MoneyAmount, MoneyAmountParseError};
use serde::Deserialize;
use serde_with::{DurationSeconds, MapPreventDuplicates, serde_as};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// CLI arguments for the payment gateway.
#[derive(Parser, Debug)]
#[command(name = "x402-paygate")]
#[command(about = "HTTP 402 payment gateway in front of an upstream API")]
struct CliArgs {
    /// Path to the JSON configuration file
    #[arg(long, short, env = "CONFIG", default_value = "config.json")]
    config: PathBuf,
}

/// Gateway configuration.
///
/// `host` and `port` fall back to `$HOST` / `$PORT`, then to hardcoded defaults.
#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "config_defaults::default_port")]
    port: u16,
    #[serde(default = "config_defaults::default_host")]
    host: IpAddr,
    /// Public origin clients use to reach the gateway.
    #[serde(default)]
    base_url: Option<LiteralOrEnv<Url>>,
    upstream: LiteralOrEnv<Url>,
    facilitator: FacilitatorConfig,
    #[serde(default)]
    exempt_origins: Vec<String>,
    /// Network name to recipient address.
    #[serde(default)]
    recipients: HashMap<String, LiteralOrEnv<String>>,
    /// `"METHOD /pattern"` to pricing. A key listed twice is a parse error.
    #[serde(default)]
    #[serde_as(as = "MapPreventDuplicates<_, _>")]
    routes: BTreeMap<String, RouteSettings>,
}

#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FacilitatorConfig {
    url: LiteralOrEnv<Url>,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "config_defaults::default_facilitator_timeout")]
    timeout_seconds: Duration,
    /// Sent with every facilitator call, e.g. an API key.
    #[serde(default)]
    headers: BTreeMap<String, LiteralOrEnv<String>>,
}

impl FacilitatorConfig {
    pub fn url(&self) -> &Url {
        self.url.inner()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout_seconds
    }

    pub fn headers(&self) -> Result<HeaderMap, ConfigError> {
        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            let header_name = HeaderName::try_from(name.as_str())
                .map_err(|e| ConfigError::HeaderName(name.clone(), e))?;
            let header_value = HeaderValue::try_from(value.inner().as_str())
                .map_err(|e| ConfigError::HeaderValue(name.clone(), e))?;
            headers.insert(header_name, header_value);
        }
        Ok(headers)
    }
}

/// Pricing of one route.
///
/// Either a human `price` charged in USDC on each of `networks`, or an explicit `accepts`
/// list of payment options. Both may be combined; `accepts` entries come first.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RouteSettings {
    #[serde(default)]
    price: Option<String>,
    #[serde(default)]
    networks: Vec<String>,
    #[serde(default)]
    accepts: Vec<PaymentOption>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    output_schema: Option<serde_json::Value>,
    /// Applies to the options derived from `price`.
    #[serde(default)]
    max_timeout_seconds: Option<u64>,
}

pub mod config_defaults {
    use std::env;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    pub const DEFAULT_PORT: u16 = 8080;
    pub const DEFAULT_HOST: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
    pub const DEFAULT_FACILITATOR_TIMEOUT: Duration = Duration::from_secs(10);

    /// `$PORT`, else 8080.
    pub fn default_port() -> u16 {
        env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PORT)
    }

    /// `$HOST`, else `0.0.0.0`.
    pub fn default_host() -> IpAddr {
        env::var("HOST")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_HOST)
    }

    pub fn default_facilitator_timeout() -> Duration {
        DEFAULT_FACILITATOR_TIMEOUT
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {0}: {1}")]
    FileRead(PathBuf, std::io::Error),
    #[error("Failed to parse config file: {0}")]
    JsonParse(#[from] serde_json::Error),
    #[error("Route {route:?}: invalid price: {source}")]
    Price {
        route: String,
        source: MoneyAmountParseError,
    },
    #[error("Route {route:?}: no known USDC deployment on network {network:?}")]
    UnknownNetwork { route: String, network: String },
    #[error("Route {route:?}: no recipient configured for network {network:?}")]
    MissingRecipient { route: String, network: String },
    #[error("Route {route:?}: networks are listed but no price is set")]
    MissingPrice { route: String },
    #[error("Invalid facilitator header name {0:?}: {1}")]
    HeaderName(String, InvalidHeaderName),
    #[error("Invalid value for facilitator header {0:?}: {1}")]
    HeaderValue(String, InvalidHeaderValue),
    #[error(transparent)]
    PriceTable(#[from] PriceTableError),
}

impl Config {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn host(&self) -> IpAddr {
        self.host
    }

    pub fn base_url(&self) -> Option<&Url> {
        self.base_url.as_ref().map(|url| url.inner())
    }

    pub fn upstream(&self) -> &Url {
        self.upstream.inner()
    }

    pub fn facilitator(&self) -> &FacilitatorConfig {
        &self.facilitator
    }

    pub fn exempt_origins(&self) -> ExemptOrigins {
        ExemptOrigins::new(self.exempt_origins.iter().cloned())
    }

    /// Builds the validated price table.
    ///
    /// Fails on unknown networks, missing recipients, prices finer than the token allows,
    /// routes without options and overlapping routes.
    pub fn price_table(&self) -> Result<PriceTable, ConfigError> {
        let mut entries = Vec::with_capacity(self.routes.len());
        for (key, settings) in &self.routes {
            let mut route = RouteConfig::new(self.payment_options(key, settings)?)
                .with_description(settings.description.clone());
            if let Some(mime_type) = &settings.mime_type {
                route = route.with_mime_type(mime_type.clone());
            }
            if let Some(output_schema) = &settings.output_schema {
                route = route.with_output_schema(output_schema.clone());
            }
            entries.push((key.as_str(), route));
        }
        Ok(PriceTable::try_new(entries)?)
    }

    fn payment_options(
        &self,
        key: &str,
        settings: &RouteSettings,
    ) -> Result<Vec<PaymentOption>, ConfigError> {
        let mut options = settings.accepts.clone();
        let Some(price) = &settings.price else {
            if !settings.networks.is_empty() {
                return Err(ConfigError::MissingPrice {
                    route: key.to_string(),
                });
            }
            return Ok(options);
        };
        let money = MoneyAmount::parse(price).map_err(|source| ConfigError::Price {
            route: key.to_string(),
            source,
        })?;
        for network in &settings.networks {
            let usdc =
                UsdcDeployment::by_network(network).ok_or_else(|| ConfigError::UnknownNetwork {
                    route: key.to_string(),
                    network: network.clone(),
                })?;
            let pay_to =
                self.recipients
                    .get(network)
                    .ok_or_else(|| ConfigError::MissingRecipient {
                        route: key.to_string(),
                        network: network.clone(),
                    })?;
            let amount = usdc.parse(&money).map_err(|source| ConfigError::Price {
                route: key.to_string(),
                source,
            })?;
            let mut option =
                PaymentOption::exact(network.as_str(), usdc.asset, pay_to.inner().as_str(), amount);
            if let Some(extra) = usdc.extra() {
                option = option.with_extra(extra);
            }
            if let Some(seconds) = settings.max_timeout_seconds {
                option = option.with_max_timeout_seconds(seconds);
            }
            options.push(option);
        }
        Ok(options)
    }

    /// Loads configuration from the CLI-selected file.
    ///
    /// Values missing from the file are resolved via environment variables or defaults
    /// during deserialization.
    pub fn load() -> Result<Self, ConfigError> {
        let cli_args = CliArgs::parse();
        let config_path = Path::new(&cli_args.config)
            .canonicalize()
            .map_err(|e| ConfigError::FileRead(cli_args.config, e))?;
        Self::load_from_path(config_path)
    }

    fn load_from_path(path: PathBuf) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(&path).map_err(|e| ConfigError::FileRead(path, e))?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }
}
