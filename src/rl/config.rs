//! RL Configuration
//!
//! Hyperparameters for the tabular policy.

use serde::{Deserialize, Serialize};

use super::core::StateEncoderConfig;

/// Policy engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Step size of the value update (alpha)
    pub learning_rate: f64,
    /// Weight on the next state's value estimate (gamma)
    pub discount_factor: f64,
    /// Probability of ignoring the learned policy (epsilon)
    pub exploration_rate: f64,
    /// How candles map to table keys
    pub state_encoder: StateEncoderConfig,
    /// Fixed RNG seed for reproducible exploration
    pub seed: Option<u64>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            discount_factor: 0.9,
            exploration_rate: 0.1,
            state_encoder: StateEncoderConfig::LastClose,
            seed: None,
        }
    }
}

impl PolicyConfig {
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();
        for (name, value) in [
            ("learning_rate", self.learning_rate),
            ("discount_factor", self.discount_factor),
            ("exploration_rate", self.exploration_rate),
        ] {
            if !(0.0..=1.0).contains(&value) {
                errors.push(format!("policy.{name} must be between 0 and 1, got {value}"));
            }
        }
        if let StateEncoderConfig::BinnedClose { bin_width } = self.state_encoder {
            if !bin_width.is_finite() || bin_width <= 0.0 {
                errors.push("policy.state_encoder.bin_width must be positive".to_string());
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
