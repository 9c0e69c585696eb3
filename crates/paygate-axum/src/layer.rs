//! Tower integration of the [`Paygate`].
//!
//! [`PaygateLayer`] wraps any axum service. Per request it runs [`Paygate::evaluate`] and then:
//!
//! - forwards the request untouched for pass-through outcomes,
//! - forwards it and adds `X-PAYMENT-RESPONSE` to the response once the payment settled,
//! - answers `402 Payment Required` without calling the inner service otherwise.
//!
//! ```rust,no_run
//! use axum::{Router, routing::get};
//! use paygate_axum::{FacilitatorClient, PaygateLayer, Paygate, PaymentOption, PriceTable, RouteConfig};
//!
//! let price_table = PriceTable::try_new([(
//!     "GET /premium",
//!     RouteConfig::new(vec![PaymentOption::exact(
//!         "base-sepolia",
//!         "0x036CbD53842c5426634e7929541eC2318f3dCF7e",
//!         "0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045",
//!         "10000".parse().unwrap(),
//!     )]),
//! )])
//! .unwrap();
//! let facilitator = FacilitatorClient::try_from("https://facilitator.x402.rs").unwrap();
//!
//! let app: Router = Router::new()
//!     .route("/premium", get(|| async { "This is VIP content!" }))
//!     .layer(PaygateLayer::new(Paygate::new(facilitator, price_table)));
//! ```

use axum_core::extract::Request;
use axum_core::response::{IntoResponse, Response};
use paygate_types::facilitator::Facilitator;
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::util::BoxCloneSyncService;
use tower::{Layer, Service};
#[cfg(feature = "telemetry")]
use tracing::Instrument;

use crate::challenge::PaymentRequiredResponse;
use crate::paygate::{GateOutcome, Paygate};
use crate::receipt::X_PAYMENT_RESPONSE;

/// Applies a shared [`Paygate`] to the wrapped service.
#[derive(Debug)]
pub struct PaygateLayer<F> {
    gate: Arc<Paygate<F>>,
}

impl<F> Clone for PaygateLayer<F> {
    fn clone(&self) -> Self {
        Self {
            gate: self.gate.clone(),
        }
    }
}

impl<F> PaygateLayer<F> {
    pub fn new(gate: Paygate<F>) -> Self {
        Self {
            gate: Arc::new(gate),
        }
    }

    pub fn gate(&self) -> &Paygate<F> {
        &self.gate
    }
}

impl<F> From<Arc<Paygate<F>>> for PaygateLayer<F> {
    fn from(gate: Arc<Paygate<F>>) -> Self {
        Self { gate }
    }
}

impl<S, F> Layer<S> for PaygateLayer<F>
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
{
    type Service = PaygateService<F>;

    fn layer(&self, inner: S) -> Self::Service {
        PaygateService {
            gate: self.gate.clone(),
            inner: BoxCloneSyncService::new(inner),
        }
    }
}

pub struct PaygateService<F> {
    gate: Arc<Paygate<F>>,
    inner: BoxCloneSyncService<Request, Response, Infallible>,
}

impl<F> Clone for PaygateService<F> {
    fn clone(&self) -> Self {
        Self {
            gate: self.gate.clone(),
            inner: self.inner.clone(),
        }
    }
}

impl<F> Service<Request> for PaygateService<F>
where
    F: Facilitator + Send + Sync + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let gate = self.gate.clone();
        // The clone is not ready yet; keep it and hand the driven one to this request.
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);
        Box::pin(handle_request(gate, inner, req))
    }
}

#[cfg_attr(
    feature = "telemetry",
    tracing::instrument(name = "paygate.handle_request", skip_all, fields(method = %req.method(), path = req.uri().path()))
)]
async fn handle_request<F>(
    gate: Arc<Paygate<F>>,
    inner: BoxCloneSyncService<Request, Response, Infallible>,
    req: Request,
) -> Result<Response, Infallible>
where
    F: Facilitator + Sync,
{
    let outcome = gate.evaluate(&req).await;
    match outcome {
        GateOutcome::PassThrough { .. } => call_inner(inner, req).await,
        GateOutcome::PassThroughWithReceipt { receipt } => {
            let mut response = call_inner(inner, req).await?;
            match receipt.to_header_value() {
                Ok(header_value) => {
                    response
                        .headers_mut()
                        .insert(X_PAYMENT_RESPONSE, header_value);
                }
                Err(err) => {
                    tracing::error!(error = %err, tx_hash = %receipt.tx_hash, "Failed to encode settlement receipt");
                }
            }
            Ok(response)
        }
        GateOutcome::Respond { challenge, .. } => {
            Ok(PaymentRequiredResponse(challenge).into_response())
        }
    }
}

async fn call_inner(
    mut inner: BoxCloneSyncService<Request, Response, Infallible>,
    req: Request,
) -> Result<Response, Infallible> {
    #[cfg(feature = "telemetry")]
    {
        inner
            .call(req)
            .instrument(tracing::info_span!("inner"))
            .await
    }
    #[cfg(not(feature = "telemetry"))]
    {
        inner.call(req).await
    }
}
