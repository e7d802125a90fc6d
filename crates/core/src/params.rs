use serde::{Deserialize, Serialize};

/// Stop sequence(s) forwarded to the provider as-is.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Stop {
    One(String),
    Many(Vec<String>),
}

impl Default for Stop {
    fn default() -> Self {
        Stop::One("\n".to_string())
    }
}

/// Fully populated generation parameters for one upstream request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompletionParams {
    pub top_p: f32,
    pub max_tokens: u32,
    pub stop: Stop,
    pub temperature: f32,
}

impl Default for CompletionParams {
    fn default() -> Self {
        Self {
            top_p: 1.0,
            max_tokens: 512,
            stop: Stop::default(),
            temperature: 0.7,
        }
    }
}

/// Caller-supplied partial parameters. Absent fields fall back to the
/// provider defaults in [`CompletionParams::resolve`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParamOverrides {
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
    pub stop: Option<Stop>,
    pub temperature: Option<f32>,
}

impl CompletionParams {
    /// Shallow field-by-field merge. Values are passed through without
    /// clamping; the provider is the one that rejects out-of-range input.
    pub fn resolve(overrides: &ParamOverrides, defaults: &CompletionParams) -> CompletionParams {
        CompletionParams {
            top_p: overrides.top_p.unwrap_or(defaults.top_p),
            max_tokens: overrides.max_tokens.unwrap_or(defaults.max_tokens),
            stop: overrides
                .stop
                .clone()
                .unwrap_or_else(|| defaults.stop.clone()),
            temperature: overrides.temperature.unwrap_or(defaults.temperature),
        }
    }

    /// Applies overrides on top of `self`, used for config-file defaults.
    pub fn with_overrides(&self, overrides: &ParamOverrides) -> CompletionParams {
        Self::resolve(overrides, self)
    }
}
