//! The per-request payment state machine.
//!
//! [`Paygate::evaluate`] walks a request through
//! `Exempt | Unprotected | Challenge | Verifying → Settling → Settled | VerifyFailed | SettleFailed`
//! and returns a [`GateOutcome`] telling the caller what to do with it. The gate never
//! calls the protected handler itself; see [`crate::layer`] for the tower integration.
//!
//! The only suspension points are the two facilitator calls, made in sequence: exactly one
//! `verify`, and a `settle` only after the payment verified.

use http::{HeaderMap, HeaderName, Method};
use paygate_types::facilitator::Facilitator;
use paygate_types::proto::{
    FacilitatorRequest, PaymentRequired, SettlementResult, VerificationResult,
};
use std::fmt;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use url::Url;

use crate::challenge::{PAYMENT_HEADER_REQUIRED, ResourceUrl, build_challenge};
use crate::exemption::ExemptOrigins;
use crate::price_table::PriceTable;
use crate::receipt::SettlementReceipt;

/// `X-PAYMENT`, the request header carrying the opaque payment proof.
pub const X_PAYMENT: HeaderName = HeaderName::from_static("x-payment");

/// Terminal state reached by one run of the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GateState {
    Exempt,
    Unprotected,
    Challenge,
    VerifyFailed,
    Settled,
    SettleFailed,
}

impl GateState {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateState::Exempt => "exempt",
            GateState::Unprotected => "unprotected",
            GateState::Challenge => "challenge",
            GateState::VerifyFailed => "verify_failed",
            GateState::Settled => "settled",
            GateState::SettleFailed => "settle_failed",
        }
    }
}

impl Display for GateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the caller must do with the request.
#[derive(Debug, Clone, PartialEq)]
pub enum GateOutcome {
    /// Forward to the handler and return its response untouched.
    PassThrough { state: GateState },
    /// Forward to the handler and attach `receipt` as `X-PAYMENT-RESPONSE`.
    PassThroughWithReceipt { receipt: SettlementReceipt },
    /// Do not call the handler; answer `402` with `challenge`.
    Respond {
        state: GateState,
        challenge: PaymentRequired,
    },
}

impl GateOutcome {
    pub fn state(&self) -> GateState {
        match self {
            GateOutcome::PassThrough { state } => *state,
            GateOutcome::PassThroughWithReceipt { .. } => GateState::Settled,
            GateOutcome::Respond { state, .. } => *state,
        }
    }
}

/// Everything decided before the first facilitator call.
enum Precheck {
    Decided(GateOutcome),
    Pay(PendingPayment),
}

struct PendingPayment {
    method: Method,
    path: String,
    challenge: PaymentRequired,
    request: FacilitatorRequest,
}

/// Payment enforcement for a set of priced routes.
///
/// Cheap to share: wrap it in an [`Arc`] and hand it to as many services as needed.
#[derive(Debug, Clone)]
pub struct Paygate<F> {
    facilitator: F,
    price_table: Arc<PriceTable>,
    exempt_origins: ExemptOrigins,
    base_url: Option<Url>,
}

impl<F> Paygate<F> {
    pub fn new(facilitator: F, price_table: impl Into<Arc<PriceTable>>) -> Self {
        Self {
            facilitator,
            price_table: price_table.into(),
            exempt_origins: ExemptOrigins::default(),
            base_url: None,
        }
    }

    pub fn with_exempt_origins(mut self, exempt_origins: ExemptOrigins) -> Self {
        self.exempt_origins = exempt_origins;
        self
    }

    /// Public origin used to render `resource` URLs. Without it the `Host` header is used.
    pub fn with_base_url(mut self, base_url: Url) -> Self {
        self.base_url = Some(base_url);
        self
    }

    pub fn facilitator(&self) -> &F {
        &self.facilitator
    }

    pub fn price_table(&self) -> &PriceTable {
        &self.price_table
    }

    pub fn exempt_origins(&self) -> &ExemptOrigins {
        &self.exempt_origins
    }

    pub fn base_url(&self) -> Option<&Url> {
        self.base_url.as_ref()
    }

    fn precheck<B>(&self, request: &http::Request<B>) -> Precheck {
        let method = request.method();
        let path = request.uri().path();

        if self.exempt_origins.is_exempt_request(request.headers()) {
            tracing::info!(state = %GateState::Exempt, %method, path, "Request from exempt origin");
            return Precheck::Decided(GateOutcome::PassThrough {
                state: GateState::Exempt,
            });
        }

        let Some(route) = self.price_table.lookup(method, path) else {
            tracing::debug!(state = %GateState::Unprotected, %method, path, "No price for route");
            return Precheck::Decided(GateOutcome::PassThrough {
                state: GateState::Unprotected,
            });
        };

        let resource_url =
            ResourceUrl::from_request(self.base_url.as_ref(), request.uri(), request.headers());
        let challenge = build_challenge(&resource_url, path, route, PAYMENT_HEADER_REQUIRED);

        let payment_header = payment_header(request.headers());
        let (Some(payment_header), Some(requirements)) =
            (payment_header, challenge.accepts.first().cloned())
        else {
            tracing::info!(
                state = %GateState::Challenge,
                %method,
                path,
                reason = PAYMENT_HEADER_REQUIRED,
                "Payment required"
            );
            return Precheck::Decided(GateOutcome::Respond {
                state: GateState::Challenge,
                challenge,
            });
        };

        Precheck::Pay(PendingPayment {
            method: method.clone(),
            path: path.to_string(),
            challenge,
            request: FacilitatorRequest::new(payment_header, requirements),
        })
    }
}

impl<F> Paygate<F>
where
    F: Facilitator + Sync,
{
    /// Runs the state machine for one request.
    ///
    /// Only the request head is read, and nothing from it is held across the facilitator
    /// calls, so the returned future is `Send` whatever the body type.
    pub fn evaluate<'a, B>(
        &'a self,
        request: &http::Request<B>,
    ) -> impl Future<Output = GateOutcome> + Send + use<'a, F, B> {
        let precheck = self.precheck(request);
        async move {
            match precheck {
                Precheck::Decided(outcome) => outcome,
                Precheck::Pay(pending) => self.pay(pending).await,
            }
        }
    }

    async fn pay(&self, pending: PendingPayment) -> GateOutcome {
        let PendingPayment {
            method,
            path,
            challenge,
            request,
        } = pending;

        match self.facilitator.verify_or_reject(&request).await {
            VerificationResult::Valid { payer } => {
                tracing::debug!(%method, %path, payer = payer.as_deref(), "Payment verified");
            }
            VerificationResult::Invalid { reason, payer } => {
                tracing::warn!(
                    state = %GateState::VerifyFailed,
                    %method,
                    %path,
                    %reason,
                    payer = payer.as_deref(),
                    "Payment rejected"
                );
                return GateOutcome::Respond {
                    state: GateState::VerifyFailed,
                    challenge,
                };
            }
        }

        match self.facilitator.settle_or_fail(&request).await {
            SettlementResult::Success {
                tx_hash,
                network_id,
            } => {
                tracing::info!(
                    state = %GateState::Settled,
                    %method,
                    %path,
                    %tx_hash,
                    network = %network_id,
                    "Payment settled"
                );
                GateOutcome::PassThroughWithReceipt {
                    receipt: SettlementReceipt::from_settlement(tx_hash, network_id),
                }
            }
            SettlementResult::Failure { error } => {
                tracing::warn!(
                    state = %GateState::SettleFailed,
                    %method,
                    %path,
                    reason = %error,
                    "Settlement failed, serving request without receipt"
                );
                GateOutcome::PassThrough {
                    state: GateState::SettleFailed,
                }
            }
        }
    }
}

/// Trimmed `X-PAYMENT` value; empty, whitespace-only or non-UTF-8 values count as absent.
fn payment_header(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(X_PAYMENT)?.to_str().ok()?.trim();
    (!value.is_empty()).then(|| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::price_table::{PaymentOption, RouteConfig};
    use http::HeaderValue;
    use http::header::{HOST, ORIGIN, REFERER};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Recorder {
        verify_calls: AtomicUsize,
        settle_calls: AtomicUsize,
        last_request: Mutex<Option<FacilitatorRequest>>,
    }

    struct FakeFacilitator {
        verify: Result<VerificationResult, String>,
        settle: Result<SettlementResult, String>,
        recorder: Arc<Recorder>,
    }

    impl FakeFacilitator {
        fn new(
            verify: Result<VerificationResult, String>,
            settle: Result<SettlementResult, String>,
        ) -> (Self, Arc<Recorder>) {
            let recorder = Arc::new(Recorder::default());
            let fake = Self {
                verify,
                settle,
                recorder: recorder.clone(),
            };
            (fake, recorder)
        }

        fn approving() -> (Self, Arc<Recorder>) {
            Self::new(
                Ok(VerificationResult::Valid {
                    payer: Some("0xpayer".to_string()),
                }),
                Ok(SettlementResult::Success {
                    tx_hash: "0xabc".to_string(),
                    network_id: "base".to_string(),
                }),
            )
        }
    }

    impl Facilitator for FakeFacilitator {
        type Error = String;

        async fn verify(&self, request: &FacilitatorRequest) -> Result<VerificationResult, String> {
            self.recorder.verify_calls.fetch_add(1, Ordering::SeqCst);
            *self.recorder.last_request.lock().unwrap() = Some(request.clone());
            self.verify.clone()
        }

        async fn settle(&self, request: &FacilitatorRequest) -> Result<SettlementResult, String> {
            self.recorder.settle_calls.fetch_add(1, Ordering::SeqCst);
            *self.recorder.last_request.lock().unwrap() = Some(request.clone());
            self.settle.clone()
        }
    }

    fn price_table() -> PriceTable {
        PriceTable::try_new([
            (
                "GET /premium",
                RouteConfig::new(vec![
                    PaymentOption::exact(
                        "base",
                        "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913",
                        "0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045",
                        "10000".parse().unwrap(),
                    ),
                    PaymentOption::exact(
                        "solana",
                        "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v",
                        "9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin",
                        "10000".parse().unwrap(),
                    ),
                ])
                .with_description("Premium data"),
            ),
            (
                "/reports/*",
                RouteConfig::new(vec![PaymentOption::exact(
                    "base-sepolia",
                    "0x036CbD53842c5426634e7929541eC2318f3dCF7e",
                    "0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045",
                    "500".parse().unwrap(),
                )]),
            ),
        ])
        .unwrap()
    }

    fn gate(facilitator: FakeFacilitator) -> Paygate<FakeFacilitator> {
        Paygate::new(facilitator, price_table())
            .with_exempt_origins(ExemptOrigins::new(["https://app.example.com"]))
            .with_base_url(Url::parse("https://api.example.com").unwrap())
    }

    fn request(method: Method, uri: &str) -> http::Request<()> {
        http::Request::builder()
            .method(method)
            .uri(uri)
            .body(())
            .unwrap()
    }

    fn with_header(mut request: http::Request<()>, name: HeaderName, value: &str) -> http::Request<()> {
        request
            .headers_mut()
            .insert(name, HeaderValue::from_str(value).unwrap());
        request
    }

    #[tokio::test]
    async fn exempt_origin_passes_without_facilitator() {
        let (facilitator, recorder) = FakeFacilitator::approving();
        let gate = gate(facilitator);

        let req = with_header(request(Method::GET, "/premium"), ORIGIN, "https://app.example.com");
        assert_eq!(
            gate.evaluate(&req).await,
            GateOutcome::PassThrough {
                state: GateState::Exempt
            }
        );

        let req = with_header(
            request(Method::GET, "/premium"),
            REFERER,
            "https://app.example.com/dashboard",
        );
        assert_eq!(gate.evaluate(&req).await.state(), GateState::Exempt);
        assert_eq!(recorder.verify_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn exemption_wins_over_payment_header() {
        let (facilitator, recorder) = FakeFacilitator::approving();
        let gate = gate(facilitator);
        let req = with_header(request(Method::GET, "/premium"), X_PAYMENT, "proof");
        let req = with_header(req, ORIGIN, "https://app.example.com");
        assert_eq!(gate.evaluate(&req).await.state(), GateState::Exempt);
        assert_eq!(recorder.verify_calls.load(Ordering::SeqCst), 0);
        assert_eq!(recorder.settle_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unpriced_route_is_unprotected() {
        let (facilitator, recorder) = FakeFacilitator::approving();
        let gate = gate(facilitator);
        for req in [
            request(Method::GET, "/free"),
            request(Method::POST, "/premium"),
            request(Method::GET, "/reports"),
        ] {
            assert_eq!(
                gate.evaluate(&req).await,
                GateOutcome::PassThrough {
                    state: GateState::Unprotected
                }
            );
        }
        assert_eq!(recorder.verify_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_or_blank_header_is_challenged() {
        let (facilitator, recorder) = FakeFacilitator::approving();
        let gate = gate(facilitator);

        for req in [
            request(Method::GET, "/premium?x=1"),
            with_header(request(Method::GET, "/premium?x=1"), X_PAYMENT, ""),
            with_header(request(Method::GET, "/premium?x=1"), X_PAYMENT, "   "),
        ] {
            let GateOutcome::Respond { state, challenge } = gate.evaluate(&req).await else {
                panic!("expected a challenge");
            };
            assert_eq!(state, GateState::Challenge);
            assert_eq!(challenge.error, "X-PAYMENT header is required");
            assert_eq!(challenge.accepts.len(), 2);
            assert_eq!(
                challenge.accepts[0].resource,
                "https://api.example.com/premium?x=1"
            );
            assert_eq!(challenge.accepts[0].description, "Premium data: /premium");
        }
        assert_eq!(recorder.verify_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn header_name_is_case_insensitive() {
        let (facilitator, recorder) = FakeFacilitator::approving();
        let gate = gate(facilitator);
        let req = http::Request::builder()
            .uri("/premium")
            .header("X-Payment", "proof")
            .body(())
            .unwrap();
        assert_eq!(gate.evaluate(&req).await.state(), GateState::Settled);
        assert_eq!(recorder.verify_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn valid_payment_settles_and_yields_receipt() {
        let (facilitator, recorder) = FakeFacilitator::approving();
        let gate = gate(facilitator);
        let req = with_header(request(Method::GET, "/premium"), X_PAYMENT, " proof ");

        let GateOutcome::PassThroughWithReceipt { receipt } = gate.evaluate(&req).await else {
            panic!("expected a receipt");
        };
        assert!(receipt.success);
        assert_eq!(receipt.tx_hash, "0xabc");
        assert_eq!(receipt.network_id, "base");
        assert_eq!(recorder.verify_calls.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.settle_calls.load(Ordering::SeqCst), 1);

        let sent = recorder.last_request.lock().unwrap().clone().unwrap();
        assert_eq!(sent.payment_header, "proof");
        assert_eq!(sent.payment_requirements.network, "base");
        assert_eq!(
            sent.payment_requirements.resource,
            "https://api.example.com/premium"
        );
    }

    #[tokio::test]
    async fn invalid_payment_is_challenged_again_without_settling() {
        let (facilitator, recorder) = FakeFacilitator::new(
            Ok(VerificationResult::invalid("insufficient_funds")),
            Ok(SettlementResult::failure("unused")),
        );
        let gate = gate(facilitator);

        let unpaid = gate.evaluate(&request(Method::GET, "/premium")).await;
        let paid = gate
            .evaluate(&with_header(request(Method::GET, "/premium"), X_PAYMENT, "proof"))
            .await;

        let GateOutcome::Respond { state, challenge } = paid else {
            panic!("expected a challenge");
        };
        assert_eq!(state, GateState::VerifyFailed);
        let GateOutcome::Respond {
            challenge: unpaid_challenge,
            ..
        } = unpaid
        else {
            panic!("expected a challenge");
        };
        assert_eq!(challenge, unpaid_challenge);
        assert_eq!(recorder.verify_calls.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.settle_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unreachable_facilitator_fails_closed_on_verify() {
        let (facilitator, recorder) = FakeFacilitator::new(
            Err("connection refused".to_string()),
            Err("connection refused".to_string()),
        );
        let gate = gate(facilitator);
        let req = with_header(request(Method::GET, "/reports/2024/q1"), X_PAYMENT, "proof");
        assert_eq!(gate.evaluate(&req).await.state(), GateState::VerifyFailed);
        assert_eq!(recorder.settle_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_settlement_passes_through_without_receipt() {
        for settle in [
            Ok(SettlementResult::failure("nonce already used")),
            Err("timeout".to_string()),
        ] {
            let (facilitator, recorder) =
                FakeFacilitator::new(Ok(VerificationResult::Valid { payer: None }), settle);
            let gate = gate(facilitator);
            let req = with_header(request(Method::GET, "/premium"), X_PAYMENT, "proof");
            assert_eq!(
                gate.evaluate(&req).await,
                GateOutcome::PassThrough {
                    state: GateState::SettleFailed
                }
            );
            assert_eq!(recorder.verify_calls.load(Ordering::SeqCst), 1);
            assert_eq!(recorder.settle_calls.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn host_header_is_used_without_base_url() {
        let (facilitator, _) = FakeFacilitator::approving();
        let gate = Paygate::new(facilitator, price_table());
        let req = with_header(request(Method::GET, "/reports/x?y=1"), HOST, "gw.local:8080");
        let GateOutcome::Respond { challenge, .. } = gate.evaluate(&req).await else {
            panic!("expected a challenge");
        };
        assert_eq!(challenge.accepts[0].resource, "http://gw.local:8080/reports/x?y=1");
        assert_eq!(challenge.accepts[0].description, "Access to /reports/x");
    }

    #[test]
    fn blank_and_opaque_headers_are_absent() {
        let mut headers = HeaderMap::new();
        assert_eq!(payment_header(&headers), None);
        headers.insert(X_PAYMENT, HeaderValue::from_static(" \t "));
        assert_eq!(payment_header(&headers), None);
        headers.insert(X_PAYMENT, HeaderValue::from_bytes(b"proof\xff").unwrap());
        assert_eq!(payment_header(&headers), None);
        headers.insert(X_PAYMENT, HeaderValue::from_static("eyJ4IjoxfQ=="));
        assert_eq!(payment_header(&headers).as_deref(), Some("eyJ4IjoxfQ=="));
    }
}
