//! Signal module
//!
//! Scored opportunities produced from candle history each cycle

mod classifier;
mod types;

pub use classifier::{Classifier, TrendClassifier};
pub use types::{Action, Side, Signal, Strength, MAX_REASONS};
