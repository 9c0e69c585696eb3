//! Builds the `402 Payment Required` challenge for a priced route.

use axum_core::response::{IntoResponse, Response};
use http::header::{CONTENT_TYPE, HOST};
use http::{HeaderMap, HeaderValue, StatusCode, Uri};
use paygate_types::proto::{PaymentRequired, PaymentRequirements, X402Version1};
use std::fmt;
use std::fmt::Display;
use url::Url;

use crate::price_table::RouteConfig;

/// Error text of every challenge issued by the gate.
pub const PAYMENT_HEADER_REQUIRED: &str = "X-PAYMENT header is required";

/// Placeholder in description templates.
pub const PATH_PLACEHOLDER: &str = "{path}";

/// Absolute URL of the resource a client attempted, query string included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceUrl(String);

impl ResourceUrl {
    /// Reconstructs the URL the client requested.
    ///
    /// An absolute-form request target is used verbatim. Otherwise the path and query
    /// are appended, unmodified, to the origin of `base_url`, or to `http://{Host}`
    /// when no base URL is configured.
    pub fn from_request(base_url: Option<&Url>, uri: &Uri, headers: &HeaderMap) -> Self {
        if uri.scheme().is_some() && uri.authority().is_some() {
            return ResourceUrl(uri.to_string());
        }
        let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        let origin = match base_url.map(Url::origin) {
            Some(origin) if origin.is_tuple() => origin.ascii_serialization(),
            _ => {
                let host = headers
                    .get(HOST)
                    .and_then(|h| h.to_str().ok())
                    .unwrap_or("localhost");
                format!("http://{host}")
            }
        };
        ResourceUrl(format!("{origin}{path_and_query}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ResourceUrl {
    fn from(value: &str) -> Self {
        ResourceUrl(value.to_string())
    }
}

impl Display for ResourceUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fills a description template with the request path.
///
/// A template without [`PATH_PLACEHOLDER`] gets `": {path}"` appended, and an empty
/// template becomes `"Access to {path}"`, so the path always appears.
pub fn render_description(template: &str, path: &str) -> String {
    if template.trim().is_empty() {
        format!("Access to {path}")
    } else if template.contains(PATH_PLACEHOLDER) {
        template.replace(PATH_PLACEHOLDER, path)
    } else {
        format!("{template}: {path}")
    }
}

/// One [`PaymentRequirements`] per option of `route`, in configuration order.
pub fn build_challenge(
    resource_url: &ResourceUrl,
    path: &str,
    route: &RouteConfig,
    error: &str,
) -> PaymentRequired {
    let description = render_description(&route.description, path);
    let accepts = route
        .accepts
        .iter()
        .map(|option| PaymentRequirements {
            scheme: option.scheme.clone(),
            network: option.network.clone(),
            max_amount_required: option.amount.clone(),
            resource: resource_url.to_string(),
            description: description.clone(),
            mime_type: route.mime_type.clone(),
            pay_to: option.pay_to.clone(),
            asset: option.asset.clone(),
            max_timeout_seconds: option.max_timeout_seconds,
            extra: option.extra.clone(),
            output_schema: route.output_schema.clone(),
        })
        .collect();
    PaymentRequired {
        x402_version: X402Version1,
        error: error.to_string(),
        accepts,
    }
}

/// Renders a challenge as `402 Payment Required` with a JSON body.
#[derive(Debug, Clone)]
pub struct PaymentRequiredResponse(pub PaymentRequired);

impl IntoResponse for PaymentRequiredResponse {
    fn into_response(self) -> Response {
        match serde_json::to_vec(&self.0) {
            Ok(body) => (
                StatusCode::PAYMENT_REQUIRED,
                [(CONTENT_TYPE, HeaderValue::from_static("application/json"))],
                body,
            )
                .into_response(),
            Err(err) => {
                tracing::error!(error = %err, "Failed to serialize payment challenge");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}
