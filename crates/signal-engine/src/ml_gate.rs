//! Learned-score gate.
//!
//! The score itself comes from an external inference collaborator; this module
//! only applies the probability and expected-R thresholds.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use market_core::types::{FeatureVector, MlDecision, ModelScore, Signal};
use market_core::{Error, Result};
use tokio::time::timeout;
use tracing::{info, warn};
use uuid::Uuid;

pub const DEFAULT_MIN_PROBABILITY: f64 = 0.60;
pub const DEFAULT_MIN_EXPECTED_R: f64 = 1.8;

/// External model that scores a feature vector.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn score(&self, features: &FeatureVector) -> anyhow::Result<ModelScore>;
}

/// Threshold gate over model scores.
#[derive(Debug, Clone, Copy)]
pub struct MlGate {
    pub min_probability: f64,
    pub min_expected_r: f64,
    pub inference_timeout: Duration,
}

impl Default for MlGate {
    fn default() -> Self {
        Self {
            min_probability: DEFAULT_MIN_PROBABILITY,
            min_expected_r: DEFAULT_MIN_EXPECTED_R,
            inference_timeout: Duration::from_secs(2),
        }
    }
}

impl MlGate {
    pub fn new(min_probability: f64, min_expected_r: f64, inference_timeout: Duration) -> Self {
        Self {
            min_probability,
            min_expected_r,
            inference_timeout,
        }
    }

    /// Accept iff probability and expected R both meet their thresholds.
    pub fn decide(&self, signal_ref: Uuid, score: ModelScore) -> MlDecision {
        let prob_ok = score.probability >= self.min_probability;
        let r_ok = score.expected_r >= self.min_expected_r;

        let reason = match (prob_ok, r_ok) {
            (true, true) => "accepted".to_string(),
            (false, true) => format!(
                "probability {:.3} below {:.2}",
                score.probability, self.min_probability
            ),
            (true, false) => format!(
                "expected R {:.2} below {:.2}",
                score.expected_r, self.min_expected_r
            ),
            (false, false) => format!(
                "probability {:.3} below {:.2} and expected R {:.2} below {:.2}",
                score.probability, self.min_probability, score.expected_r, self.min_expected_r
            ),
        };

        MlDecision {
            signal_ref,
            probability: score.probability,
            expected_r: score.expected_r,
            executed: prob_ok && r_ok,
            reason,
            decided_at: Utc::now(),
        }
    }

    /// Score `signal` through `client` and decide.
    ///
    /// A slow or failing collaborator yields `StaleData` and no decision.
    pub async fn evaluate(
        &self,
        client: &dyn InferenceClient,
        signal: &Signal,
        features: &FeatureVector,
    ) -> Result<MlDecision> {
        let score = match timeout(self.inference_timeout, client.score(features)).await {
            Ok(Ok(score)) => score,
            Ok(Err(e)) => {
                warn!(signal_id = %signal.id, symbol = %signal.symbol, error = %e, "Inference failed");
                return Err(Error::StaleData(format!("inference failed: {}", e)));
            }
            Err(_) => {
                warn!(
                    signal_id = %signal.id,
                    symbol = %signal.symbol,
                    timeout_ms = self.inference_timeout.as_millis() as u64,
                    "Inference timed out"
                );
                return Err(Error::StaleData(format!(
                    "inference exceeded {}ms",
                    self.inference_timeout.as_millis()
                )));
            }
        };

        if !(score.probability.is_finite() && score.expected_r.is_finite()) {
            return Err(Error::InvalidInputs("non-finite model score".to_string()));
        }

        let decision = self.decide(signal.id, score);
        info!(
            signal_id = %signal.id,
            symbol = %signal.symbol,
            probability = decision.probability,
            expected_r = decision.expected_r,
            executed = decision.executed,
            reason = %decision.reason,
            "ML gate decision"
        );
        Ok(decision)
    }
}
