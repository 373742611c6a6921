//! Signal Engine
//!
//! Indicators, regime classification, strategy signals and the learned-score gate.

pub mod features;
pub mod indicators;
pub mod ml_gate;
pub mod regime;
pub mod strategy;

pub use features::FeatureExtractor;
pub use indicators::{IndicatorEngine, WARMUP_BARS};
pub use ml_gate::{InferenceClient, MlGate};
pub use regime::{RegimeClassifier, RegimeTracker};
pub use strategy::{
    Candidate, MeanReversionEngine, SignalBook, SignalEngine, SignalGenerator, TrendFollowingEngine,
};
