//! Forwards requests that made it through the gate to the upstream API.

use axum::Json;
use axum::body::{Body, to_bytes};
use axum::extract::{Request, State};
use axum::response::{IntoResponse, Response};
use http::{HeaderMap, StatusCode, Uri};
use paygate_axum::X_PAYMENT;
use serde_json::json;
use std::sync::Arc;
use url::Url;

/// Request headers never forwarded upstream: hop-by-hop headers, the payment proof, and
/// `content-length` which is recomputed.
const HEADERS_TO_STRIP: &[&str] = &[
    "host",
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

/// Upstream response headers passed back to the client. Everything else is dropped.
const ALLOWED_RESPONSE_HEADERS: &[&str] = &[
    "content-type",
    "content-encoding",
    "content-language",
    "content-disposition",
    "cache-control",
    "etag",
    "expires",
    "last-modified",
    "location",
    "date",
    "vary",
    "x-request-id",
    "x-ratelimit-limit",
    "x-ratelimit-remaining",
    "x-ratelimit-reset",
];

/// Maximum upstream response body size (10 MiB).
pub const MAX_RESPONSE_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Maximum request body forwarded upstream (10 MiB).
pub const MAX_REQUEST_BODY_SIZE: usize = 10 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("Failed to read request body: {0}")]
    RequestBody(axum::Error),
    #[error("Upstream request failed: {0}")]
    Upstream(#[source] reqwest::Error),
    #[error("Failed to read upstream response: {0}")]
    UpstreamBody(#[source] reqwest::Error),
    #[error("Upstream response too large (max {max} bytes)")]
    ResponseTooLarge { max: usize },
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = match &self {
            ProxyError::RequestBody(_) => StatusCode::BAD_REQUEST,
            ProxyError::Upstream(_)
            | ProxyError::UpstreamBody(_)
            | ProxyError::ResponseTooLarge { .. } => StatusCode::BAD_GATEWAY,
        };
        tracing::error!(error = %self, status = status.as_u16(), "Proxy request failed");
        let body = Json(json!({
            "error": status.canonical_reason().unwrap_or("Bad Gateway"),
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}

/// The upstream origin plus the client used to reach it.
#[derive(Debug, Clone)]
pub struct UpstreamProxy {
    client: reqwest::Client,
    upstream: Url,
}

impl UpstreamProxy {
    pub fn new(client: reqwest::Client, upstream: Url) -> Self {
        Self { client, upstream }
    }

    pub fn upstream(&self) -> &Url {
        &self.upstream
    }

    /// Request path and query appended to the upstream URL, whose own path acts as a prefix.
    pub fn target_url(&self, uri: &Uri) -> Url {
        let mut target = self.upstream.clone();
        let prefix = self.upstream.path().trim_end_matches('/');
        target.set_path(&format!("{prefix}{}", uri.path()));
        target.set_query(uri.query());
        target
    }

    pub async fn forward(&self, request: Request) -> Result<Response, ProxyError> {
        let (parts, body) = request.into_parts();
        let target = self.target_url(&parts.uri);
        let body = to_bytes(body, MAX_REQUEST_BODY_SIZE)
            .await
            .map_err(ProxyError::RequestBody)?;

        let mut builder = self
            .client
            .request(parts.method.clone(), target.as_str())
            .headers(forwarded_headers(&parts.headers));
        if !body.is_empty() {
            builder = builder.body(body);
        }

        tracing::debug!(method = %parts.method, target = %target, "Proxying request");
        let mut response = builder.send().await.map_err(ProxyError::Upstream)?;

        if response
            .content_length()
            .is_some_and(|length| length > MAX_RESPONSE_BODY_SIZE as u64)
        {
            return Err(ProxyError::ResponseTooLarge {
                max: MAX_RESPONSE_BODY_SIZE,
            });
        }

        let status = response.status();
        let headers = allowed_response_headers(response.headers());
        let mut buffer = Vec::with_capacity(
            response
                .content_length()
                .map(|length| length as usize)
                .unwrap_or(8192)
                .min(MAX_RESPONSE_BODY_SIZE),
        );
        while let Some(chunk) = response.chunk().await.map_err(ProxyError::UpstreamBody)? {
            if buffer.len() + chunk.len() > MAX_RESPONSE_BODY_SIZE {
                return Err(ProxyError::ResponseTooLarge {
                    max: MAX_RESPONSE_BODY_SIZE,
                });
            }
            buffer.extend_from_slice(&chunk);
        }

        let mut proxied = Response::new(Body::from(buffer));
        *proxied.status_mut() = status;
        *proxied.headers_mut() = headers;
        Ok(proxied)
    }
}

fn forwarded_headers(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if *name == X_PAYMENT || HEADERS_TO_STRIP.contains(&name.as_str()) {
            continue;
        }
        forwarded.append(name.clone(), value.clone());
    }
    forwarded
}

fn allowed_response_headers(headers: &HeaderMap) -> HeaderMap {
    let mut allowed = HeaderMap::new();
    for (name, value) in headers {
        if ALLOWED_RESPONSE_HEADERS.contains(&name.as_str()) {
            allowed.append(name.clone(), value.clone());
        }
    }
    allowed
}

/// Axum handler forwarding any request to the upstream.
pub async fn forward(
    State(proxy): State<Arc<UpstreamProxy>>,
    request: Request,
) -> Result<Response, ProxyError> {
    proxy.forward(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;
    use wiremock::matchers::{body_string, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn proxy(upstream: &str) -> UpstreamProxy {
        UpstreamProxy::new(reqwest::Client::new(), Url::parse(upstream).unwrap())
    }

    #[test]
    fn target_keeps_upstream_prefix_and_query() {
        let proxy = proxy("http://api.internal:3000/v1/");
        let uri: Uri = "/reports/2024?format=csv".parse().unwrap();
        assert_eq!(
            proxy.target_url(&uri).as_str(),
            "http://api.internal:3000/v1/reports/2024?format=csv"
        );

        let proxy = self::proxy("http://api.internal:3000");
        let uri: Uri = "/".parse().unwrap();
        assert_eq!(proxy.target_url(&uri).as_str(), "http://api.internal:3000/");
    }

    #[test]
    fn strips_hop_by_hop_and_payment_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-payment", HeaderValue::from_static("proof"));
        headers.insert("connection", HeaderValue::from_static("keep-alive"));
        headers.insert("host", HeaderValue::from_static("gateway.local"));
        headers.insert("authorization", HeaderValue::from_static("Bearer t"));
        headers.insert("accept", HeaderValue::from_static("application/json"));

        let forwarded = forwarded_headers(&headers);
        assert!(forwarded.get("x-payment").is_none());
        assert!(forwarded.get("connection").is_none());
        assert!(forwarded.get("host").is_none());
        assert_eq!(forwarded.get("authorization").unwrap(), "Bearer t");
        assert_eq!(forwarded.get("accept").unwrap(), "application/json");
    }

    #[tokio::test]
    async fn forwards_method_path_query_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/items"))
            .and(query_param("page", "2"))
            .and(header("content-type", "application/json"))
            .and(body_string(r#"{"name":"x"}"#))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("x-powered-by", "internal")
                    .insert_header("etag", "\"v1\"")
                    .set_body_raw(r#"{"id":1}"#, "application/json"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let proxy = proxy(&format!("{}/api", server.uri()));
        let request = http::Request::builder()
            .method("POST")
            .uri("/items?page=2")
            .header("content-type", "application/json")
            .header("x-payment", "proof")
            .body(Body::from(r#"{"name":"x"}"#))
            .unwrap();
        let response = proxy.forward(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers().get("etag").unwrap(), "\"v1\"");
        assert!(response.headers().get("x-powered-by").is_none());
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], br#"{"id":1}"#);

        let received = server.received_requests().await.unwrap();
        assert!(received[0].headers.get("x-payment").is_none());
    }

    #[tokio::test]
    async fn oversized_upstream_response_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'a'; MAX_RESPONSE_BODY_SIZE + 1]))
            .mount(&server)
            .await;

        let request = http::Request::builder().uri("/big").body(Body::empty()).unwrap();
        let result = proxy(&server.uri()).forward(request).await;
        assert!(matches!(result, Err(ProxyError::ResponseTooLarge { .. })));
    }

    #[tokio::test]
    async fn unreachable_upstream_is_bad_gateway() {
        let request = http::Request::builder().uri("/x").body(Body::empty()).unwrap();
        let error = proxy("http://127.0.0.1:9").forward(request).await.unwrap_err();
        assert!(matches!(error, ProxyError::Upstream(_)));

        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "Bad Gateway");
    }
}
