//! A [`Facilitator`] that talks to a _remote_ x402 facilitator over HTTP.
//!
//! [`FacilitatorClient`] posts the same JSON body to `{base}/verify` and `{base}/settle`
//! and parses the answers into [`VerificationResult`] and [`SettlementResult`].
//!
//! ```rust
//! use paygate_axum::facilitator_client::FacilitatorClient;
//! use std::time::Duration;
//!
//! let facilitator = FacilitatorClient::try_from("https://facilitator.x402.rs")
//!     .unwrap()
//!     .with_timeout(Duration::from_secs(5));
//! assert_eq!(facilitator.verify_url().as_str(), "https://facilitator.x402.rs/verify");
//! ```
//!
//! Every call is bounded by a timeout (10 seconds unless configured). There are no
//! retries: transport errors, timeouts, non-2xx statuses and bodies that do not parse
//! all surface as [`FacilitatorClientError`], which the gate turns into a negative result.

use http::{HeaderMap, StatusCode};
use paygate_types::facilitator::Facilitator;
use paygate_types::proto::{FacilitatorRequest, SettlementResult, VerificationResult};
use reqwest::Client;
use std::fmt::Display;
use std::time::Duration;
use tracing::Span;
use url::Url;

#[cfg(feature = "telemetry")]
use tracing::Instrument;

/// A client for a remote x402 facilitator.
#[derive(Clone, Debug)]
pub struct FacilitatorClient {
    /// Base URL of the facilitator (e.g. `https://facilitator.example/`)
    base_url: Url,
    /// Full URL to `POST /verify` requests
    verify_url: Url,
    /// Full URL to `POST /settle` requests
    settle_url: Url,
    /// Shared, internally pooled HTTP client
    client: Client,
    /// Custom headers sent with each request, e.g. an API key
    headers: HeaderMap,
    timeout: Duration,
}

impl Facilitator for FacilitatorClient {
    type Error = FacilitatorClientError;

    #[cfg(feature = "telemetry")]
    async fn verify(
        &self,
        request: &FacilitatorRequest,
    ) -> Result<VerificationResult, FacilitatorClientError> {
        FacilitatorClient::verify(self, request)
            .instrument(tracing::info_span!(
                "paygate.facilitator_client.verify",
                timeout = ?self.timeout,
                otel.status_code = tracing::field::Empty,
                error.message = tracing::field::Empty,
            ))
            .await
    }

    #[cfg(not(feature = "telemetry"))]
    async fn verify(
        &self,
        request: &FacilitatorRequest,
    ) -> Result<VerificationResult, FacilitatorClientError> {
        FacilitatorClient::verify(self, request).await
    }

    #[cfg(feature = "telemetry")]
    async fn settle(
        &self,
        request: &FacilitatorRequest,
    ) -> Result<SettlementResult, FacilitatorClientError> {
        FacilitatorClient::settle(self, request)
            .instrument(tracing::info_span!(
                "paygate.facilitator_client.settle",
                timeout = ?self.timeout,
                otel.status_code = tracing::field::Empty,
                error.message = tracing::field::Empty,
            ))
            .await
    }

    #[cfg(not(feature = "telemetry"))]
    async fn settle(
        &self,
        request: &FacilitatorRequest,
    ) -> Result<SettlementResult, FacilitatorClientError> {
        FacilitatorClient::settle(self, request).await
    }
}

/// Errors that can occur while interacting with a remote facilitator.
#[derive(Debug, thiserror::Error)]
pub enum FacilitatorClientError {
    #[error("URL parse error: {context}: {source}")]
    UrlParse {
        context: &'static str,
        #[source]
        source: url::ParseError,
    },
    #[error("HTTP error: {context}: {source}")]
    Http {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("Failed to deserialize JSON: {context}: {source}")]
    JsonDeserialization {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("Unexpected HTTP status {status}: {context}: {body}")]
    HttpStatus {
        context: &'static str,
        status: StatusCode,
        body: String,
    },
    #[error("Failed to read response body as text: {context}: {source}")]
    ResponseBodyRead {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
}

impl FacilitatorClient {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Returns the computed `./verify` URL relative to [`FacilitatorClient::base_url`].
    pub fn verify_url(&self) -> &Url {
        &self.verify_url
    }

    /// Returns the computed `./settle` URL relative to [`FacilitatorClient::base_url`].
    pub fn settle_url(&self) -> &Url {
        &self.settle_url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Constructs a client from a base URL, resolving `./verify` and `./settle` against it.
    ///
    /// A missing trailing `/` is added so that a path prefix like `/x402` is preserved.
    pub fn try_new(mut base_url: Url) -> Result<Self, FacilitatorClientError> {
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let verify_url =
            base_url
                .join("./verify")
                .map_err(|e| FacilitatorClientError::UrlParse {
                    context: "Failed to construct ./verify URL",
                    source: e,
                })?;
        let settle_url =
            base_url
                .join("./settle")
                .map_err(|e| FacilitatorClientError::UrlParse {
                    context: "Failed to construct ./settle URL",
                    source: e,
                })?;
        Ok(Self {
            client: Client::new(),
            base_url,
            verify_url,
            settle_url,
            headers: HeaderMap::new(),
            timeout: Self::DEFAULT_TIMEOUT,
        })
    }

    /// Attaches custom headers to all future requests.
    pub fn with_headers(&self, headers: HeaderMap) -> Self {
        let mut this = self.clone();
        this.headers = headers;
        this
    }

    /// Bounds every future request by `timeout`.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let mut this = self.clone();
        this.timeout = timeout;
        this
    }

    /// Sends a `POST /verify` request to the facilitator.
    pub async fn verify(
        &self,
        request: &FacilitatorRequest,
    ) -> Result<VerificationResult, FacilitatorClientError> {
        self.post_json(&self.verify_url, "POST /verify", request)
            .await
    }

    /// Sends a `POST /settle` request to the facilitator.
    pub async fn settle(
        &self,
        request: &FacilitatorRequest,
    ) -> Result<SettlementResult, FacilitatorClientError> {
        self.post_json(&self.settle_url, "POST /settle", request)
            .await
    }

    /// POSTs `payload` as JSON and parses a JSON answer from any 2xx response.
    ///
    /// `context` names the call in errors and logs (e.g. `"POST /verify"`).
    async fn post_json<T, R>(
        &self,
        url: &Url,
        context: &'static str,
        payload: &T,
    ) -> Result<R, FacilitatorClientError>
    where
        T: serde::Serialize + ?Sized,
        R: serde::de::DeserializeOwned,
    {
        let mut req = self
            .client
            .post(url.clone())
            .json(payload)
            .timeout(self.timeout);
        for (key, value) in self.headers.iter() {
            req = req.header(key, value);
        }
        let http_response = req
            .send()
            .await
            .map_err(|e| FacilitatorClientError::Http { context, source: e });

        let result = match http_response {
            Ok(http_response) if http_response.status().is_success() => http_response
                .json::<R>()
                .await
                .map_err(|e| FacilitatorClientError::JsonDeserialization { context, source: e }),
            Ok(http_response) => {
                let status = http_response.status();
                match http_response.text().await {
                    Ok(body) => Err(FacilitatorClientError::HttpStatus {
                        context,
                        status,
                        body,
                    }),
                    Err(e) => Err(FacilitatorClientError::ResponseBodyRead { context, source: e }),
                }
            }
            Err(err) => Err(err),
        };

        record_result_on_span(&result);

        result
    }
}

/// Parses a base URL, normalizing it to exactly one trailing slash.
impl TryFrom<&str> for FacilitatorClient {
    type Error = FacilitatorClientError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let mut normalized = value.trim_end_matches('/').to_string();
        normalized.push('/');
        let url = Url::parse(&normalized).map_err(|e| FacilitatorClientError::UrlParse {
            context: "Failed to parse base url",
            source: e,
        })?;
        FacilitatorClient::try_new(url)
    }
}

impl TryFrom<String> for FacilitatorClient {
    type Error = FacilitatorClientError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        FacilitatorClient::try_from(value.as_str())
    }
}

/// Records the outcome of a call on the current span and logs failures.
fn record_result_on_span<R, E: Display>(result: &Result<R, E>) {
    let span = Span::current();
    match result {
        Ok(_) => {
            span.record("otel.status_code", "OK");
        }
        Err(err) => {
            span.record("otel.status_code", "ERROR");
            span.record("error.message", tracing::field::display(err));
            tracing::error!(error = %err, "Request to facilitator failed");
        }
    }
}
