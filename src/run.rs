//! Gateway server initialization and runtime.

use axum::routing::get;
use axum::{Json, Router};
use dotenvy::dotenv;
use paygate_axum::{FacilitatorClient, Paygate, PaygateLayer, X_PAYMENT_RESPONSE};
use paygate_types::facilitator::Facilitator;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors;

use crate::config::Config;
use crate::proxy::{self, UpstreamProxy};
use crate::util::{SigDown, Telemetry};

/// `GET /health` is answered by the gateway itself; every other request, including other
/// methods on `/health`, goes through the gate and, when allowed, to the upstream.
pub fn app<F>(gate: Paygate<F>, upstream: UpstreamProxy) -> Router
where
    F: Facilitator + Send + Sync + 'static,
{
    let gated = Router::new()
        .fallback(proxy::forward)
        .with_state(Arc::new(upstream))
        .layer(PaygateLayer::new(gate));
    Router::new()
        .route("/health", get(health).fallback_service(gated.clone()))
        .merge(gated)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Starts the payment gateway.
///
/// - Loads `.env` variables and installs the log subscriber.
/// - Reads the configuration and builds the price table, failing on invalid pricing.
/// - Serves until SIGTERM or SIGINT, then drains in-flight requests.
pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    rustls::crypto::CryptoProvider::install_default(rustls::crypto::ring::default_provider())
        .map_err(|_| "Failed to initialize rustls crypto provider")?;

    dotenv().ok();

    let telemetry = Telemetry::init();

    let config = Config::load()?;
    let price_table = config.price_table()?;
    tracing::info!(routes = price_table.len(), "Loaded price table: {price_table}");

    let facilitator = FacilitatorClient::try_new(config.facilitator().url().clone())?
        .with_headers(config.facilitator().headers()?)
        .with_timeout(config.facilitator().timeout());
    tracing::info!(
        facilitator = %facilitator.base_url(),
        timeout = ?facilitator.timeout(),
        upstream = %config.upstream(),
        "Configured facilitator and upstream"
    );

    let mut gate = Paygate::new(facilitator, price_table).with_exempt_origins(config.exempt_origins());
    if let Some(base_url) = config.base_url() {
        gate = gate.with_base_url(base_url.clone());
    }
    let upstream = UpstreamProxy::new(reqwest::Client::new(), config.upstream().clone());

    let http_endpoints = app(gate, upstream)
        .layer(telemetry.http_tracing())
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods(cors::Any)
                .allow_headers(cors::Any)
                .expose_headers([X_PAYMENT_RESPONSE]),
        );

    let addr = SocketAddr::new(config.host(), config.port());
    tracing::info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .inspect_err(|e| tracing::error!("Failed to bind to {}: {}", addr, e))?;

    let sig_down = SigDown::try_new()?;
    axum::serve(listener, http_endpoints)
        .with_graceful_shutdown(sig_down.shutdown())
        .await?;
    sig_down.recv().await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use http::StatusCode;
    use paygate_axum::{PaymentOption, PriceTable, RouteConfig, SettlementReceipt};
    use tower::ServiceExt;
    use url::Url;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn gateway(facilitator: &MockServer, upstream: &MockServer) -> Router {
        let price_table = PriceTable::try_new([(
            "GET /premium",
            RouteConfig::new(vec![PaymentOption::exact(
                "base",
                "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913",
                "0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045",
                "10000".parse().unwrap(),
            )]),
        )])
        .unwrap();
        let gate = Paygate::new(
            FacilitatorClient::try_from(facilitator.uri()).unwrap(),
            price_table,
        );
        let upstream = UpstreamProxy::new(
            reqwest::Client::new(),
            Url::parse(&upstream.uri()).unwrap(),
        );
        app(gate, upstream)
    }

    fn request(uri: &str) -> http::Request<Body> {
        http::Request::builder()
            .uri(uri)
            .header("host", "gateway.local")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn health_is_never_gated() {
        let facilitator = MockServer::start().await;
        let upstream = MockServer::start().await;
        let response = gateway(&facilitator, &upstream)
            .await
            .oneshot(request("/health"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(upstream.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn other_methods_on_health_reach_upstream() {
        let facilitator = MockServer::start().await;
        let upstream = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_body_string("upstream"))
            .expect(1)
            .mount(&upstream)
            .await;

        let mut post = request("/health");
        *post.method_mut() = http::Method::POST;
        let response = gateway(&facilitator, &upstream)
            .await
            .oneshot(post)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"upstream");
    }

    #[tokio::test]
    async fn free_routes_are_proxied() {
        let facilitator = MockServer::start().await;
        let upstream = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/free"))
            .respond_with(ResponseTemplate::new(200).set_body_string("free"))
            .expect(1)
            .mount(&upstream)
            .await;

        let response = gateway(&facilitator, &upstream)
            .await
            .oneshot(request("/free"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"free");
        assert!(facilitator.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unpaid_request_never_reaches_upstream() {
        let facilitator = MockServer::start().await;
        let upstream = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&upstream)
            .await;

        let response = gateway(&facilitator, &upstream)
            .await
            .oneshot(request("/premium?q=1"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let challenge: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            challenge["accepts"][0]["resource"],
            "http://gateway.local/premium?q=1"
        );
    }

    #[tokio::test]
    async fn paid_request_is_proxied_with_receipt() {
        let facilitator = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/verify"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"isValid": true})))
            .expect(1)
            .mount(&facilitator)
            .await;
        Mock::given(method("POST"))
            .and(path("/settle"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "txHash": "0xabc",
                "networkId": "base"
            })))
            .expect(1)
            .mount(&facilitator)
            .await;
        let upstream = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/premium"))
            .and(header("accept", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": 42})))
            .expect(1)
            .mount(&upstream)
            .await;

        let mut paid = request("/premium");
        paid.headers_mut()
            .insert("x-payment", "proof".parse().unwrap());
        paid.headers_mut()
            .insert("accept", "application/json".parse().unwrap());
        let response = gateway(&facilitator, &upstream)
            .await
            .oneshot(paid)
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let receipt = response.headers().get(X_PAYMENT_RESPONSE).unwrap();
        let receipt = SettlementReceipt::decode(receipt.to_str().unwrap()).unwrap();
        assert_eq!(receipt.tx_hash, "0xabc");
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body, json!({"data": 42}));

        let forwarded = upstream.received_requests().await.unwrap();
        assert!(forwarded[0].headers.get("x-payment").is_none());
    }
}
