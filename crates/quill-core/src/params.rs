//! Sampling parameters shared by every backend.

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Upper bound on generated tokens accepted from configuration.
pub const MAX_NEW_TOKENS_LIMIT: u32 = 4096;

/// Sampling parameters for one generation call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    /// Maximum tokens to generate (1..=4096)
    pub max_new_tokens: u32,

    /// Sampling temperature (0.0..=2.0)
    pub temperature: f32,

    /// Nucleus-sampling probability mass (0.0 exclusive ..= 1.0)
    pub top_p: f32,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            max_new_tokens: 200,
            temperature: 0.1,
            top_p: 0.95,
        }
    }
}

impl ModelParams {
    /// Check every field against its allowed range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_new_tokens == 0 || self.max_new_tokens > MAX_NEW_TOKENS_LIMIT {
            return Err(ConfigError::ParamOutOfRange {
                name: "max_new_tokens",
                value: self.max_new_tokens.to_string(),
                expected: "1..=4096",
            });
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ParamOutOfRange {
                name: "temperature",
                value: self.temperature.to_string(),
                expected: "0.0..=2.0",
            });
        }

        // NaN fails both comparisons and is rejected here
        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            return Err(ConfigError::ParamOutOfRange {
                name: "top_p",
                value: self.top_p.to_string(),
                expected: "(0.0, 1.0]",
            });
        }

        Ok(())
    }
}
