//! The interface the payment gate uses to reach a facilitator.
//!
//! A facilitator verifies payment proofs and settles them on-chain. The gate never
//! interprets a proof itself, it forwards the raw `X-PAYMENT` value together with the
//! [`PaymentRequirements`](crate::proto::PaymentRequirements) it was offered against.
//!
//! Call sites in the gate only use the fail-closed helpers
//! [`Facilitator::verify_or_reject`] and [`Facilitator::settle_or_fail`]: every
//! error becomes an ordinary negative result.

use std::fmt::{Debug, Display};
use std::sync::Arc;

use crate::proto::{FacilitatorRequest, SettlementResult, VerificationResult};

/// Asynchronous verify/settle interface of an x402 facilitator.
pub trait Facilitator {
    /// The error type returned by this facilitator.
    type Error: Debug + Display;

    /// Asks the facilitator whether the payment proof satisfies the requirements.
    fn verify(
        &self,
        request: &FacilitatorRequest,
    ) -> impl Future<Output = Result<VerificationResult, Self::Error>> + Send;

    /// Asks the facilitator to execute the payment on-chain.
    fn settle(
        &self,
        request: &FacilitatorRequest,
    ) -> impl Future<Output = Result<SettlementResult, Self::Error>> + Send;

    /// Like [`Facilitator::verify`], with any error turned into [`VerificationResult::Invalid`].
    fn verify_or_reject(
        &self,
        request: &FacilitatorRequest,
    ) -> impl Future<Output = VerificationResult> + Send
    where
        Self: Sync,
    {
        async move {
            match self.verify(request).await {
                Ok(result) => result,
                Err(err) => {
                    tracing::warn!(error = %err, "Facilitator verify call failed");
                    VerificationResult::invalid(format!("Facilitator unavailable: {err}"))
                }
            }
        }
    }

    /// Like [`Facilitator::settle`], with any error turned into [`SettlementResult::Failure`].
    fn settle_or_fail(
        &self,
        request: &FacilitatorRequest,
    ) -> impl Future<Output = SettlementResult> + Send
    where
        Self: Sync,
    {
        async move {
            match self.settle(request).await {
                Ok(result) => result,
                Err(err) => {
                    tracing::warn!(error = %err, "Facilitator settle call failed");
                    SettlementResult::failure(format!("Facilitator unavailable: {err}"))
                }
            }
        }
    }
}

impl<T: Facilitator> Facilitator for Arc<T> {
    type Error = T::Error;

    fn verify(
        &self,
        request: &FacilitatorRequest,
    ) -> impl Future<Output = Result<VerificationResult, Self::Error>> + Send {
        self.as_ref().verify(request)
    }

    fn settle(
        &self,
        request: &FacilitatorRequest,
    ) -> impl Future<Output = Result<SettlementResult, Self::Error>> + Send {
        self.as_ref().settle(request)
    }
}
