//! Inference provider contract.
//!
//! One process hosts exactly one active provider at a time, but the variants
//! are interchangeable: weights loaded in-process ([`local::LocalProvider`])
//! or a remote HTTP endpoint ([`remote::RemoteProvider`]). The service only
//! sees this trait.

pub mod local;
pub mod remote;

use crate::config::GenerationOverrides;
use crate::error::Result;
use crate::prompt::Prompt;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Load state of a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    NotLoaded,
    Loading,
    Loaded,
    Error,
}

/// Where generations actually execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Gpu,
    Cpu,
    Remote,
}

impl ExecutionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gpu => "gpu",
            Self::Cpu => "cpu",
            Self::Remote => "remote",
        }
    }
}

/// Requested translation quality. Unknown values normalise to `Standard`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityMode {
    Fast,
    #[default]
    Standard,
    High,
}

impl QualityMode {
    pub fn from_wire(value: Option<&str>) -> Self {
        match value {
            Some("fast") => Self::Fast,
            Some("high") => Self::High,
            _ => Self::Standard,
        }
    }
}

/// Generation parameters handed to a provider.
///
/// Each provider maps the subset its backend understands; the remote wire
/// formats carry all of them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationParams {
    pub temperature: f64,
    pub top_p: f64,
    pub num_beams: u32,
    pub do_sample: bool,
    pub min_new_tokens: u32,
    pub max_new_tokens: u32,
    pub repetition_penalty: f64,
    pub no_repeat_ngram_size: u32,
    pub early_stopping: bool,
}

impl GenerationParams {
    /// Built-in defaults per quality mode.
    pub fn for_quality(quality: QualityMode) -> Self {
        let (temperature, top_p, num_beams, do_sample, max_new_tokens) = match quality {
            QualityMode::Fast => (0.7, 0.9, 1, true, 128),
            QualityMode::Standard => (0.5, 0.85, 1, true, 256),
            QualityMode::High => (0.3, 0.8, 4, false, 512),
        };
        let mut params = Self {
            temperature,
            top_p,
            num_beams,
            do_sample,
            min_new_tokens: 1,
            max_new_tokens,
            repetition_penalty: 1.5,
            no_repeat_ngram_size: 3,
            early_stopping: false,
        };
        params.normalise();
        params
    }

    /// Apply configured or caller overrides on top of the defaults.
    pub fn apply_overrides(&mut self, overrides: &GenerationOverrides) {
        if let Some(v) = overrides.temperature {
            self.temperature = v;
        }
        if let Some(v) = overrides.top_p {
            self.top_p = v;
        }
        if let Some(v) = overrides.num_beams {
            self.num_beams = v;
        }
        if let Some(v) = overrides.do_sample {
            self.do_sample = v;
        }
        if let Some(v) = overrides.min_new_tokens {
            self.min_new_tokens = v;
        }
        if let Some(v) = overrides.max_new_tokens {
            self.max_new_tokens = v;
        }
        if let Some(v) = overrides.repetition_penalty {
            self.repetition_penalty = v;
        }
        if let Some(v) = overrides.no_repeat_ngram_size {
            self.no_repeat_ngram_size = v;
        }
        self.normalise();
    }

    /// Beam search and sampling are mutually exclusive: more than one beam
    /// forces greedy decoding with early stopping.
    fn normalise(&mut self) {
        if self.num_beams > 1 {
            self.do_sample = false;
            self.early_stopping = true;
        }
    }
}

/// Callback invoked with `(progress ∈ [0,100], message)` during a load.
pub type ProgressFn = Arc<dyn Fn(f32, &str) + Send + Sync>;

/// The polymorphic capability every model host variant implements.
#[async_trait]
pub trait InferenceProvider: Send + Sync {
    /// Bring the model up. Idempotent once loaded; a second concurrent call
    /// observes `Loading` and refuses rather than re-entering.
    async fn load(&self) -> Result<()>;

    /// Run one generation. Fails with `MODEL_NOT_LOADED` unless loaded.
    async fn generate(&self, prompt: &Prompt, params: &GenerationParams) -> Result<String>;

    /// Release all resources. Safe to call repeatedly.
    async fn unload(&self);

    fn status(&self) -> ProviderStatus;

    fn execution_mode(&self) -> ExecutionMode;

    /// Load progress in `[0, 100]`.
    fn loading_progress(&self) -> f32;

    fn error_message(&self) -> Option<String>;

    /// Install a progress callback. Providers without progressive load keep
    /// the default no-op.
    fn set_progress_callback(&self, _callback: ProgressFn) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_defaults_match_table() {
        let fast = GenerationParams::for_quality(QualityMode::Fast);
        assert_eq!(fast.temperature, 0.7);
        assert_eq!(fast.top_p, 0.9);
        assert_eq!(fast.num_beams, 1);
        assert!(fast.do_sample);
        assert_eq!(fast.max_new_tokens, 128);

        let standard = GenerationParams::for_quality(QualityMode::Standard);
        assert_eq!(standard.temperature, 0.5);
        assert_eq!(standard.top_p, 0.85);
        assert_eq!(standard.max_new_tokens, 256);

        let high = GenerationParams::for_quality(QualityMode::High);
        assert_eq!(high.temperature, 0.3);
        assert_eq!(high.num_beams, 4);
        assert!(!high.do_sample);
        assert_eq!(high.max_new_tokens, 512);
        assert!(high.early_stopping);
    }

    #[test]
    fn beams_force_greedy_decoding() {
        let mut params = GenerationParams::for_quality(QualityMode::Fast);
        params.apply_overrides(&GenerationOverrides {
            num_beams: Some(4),
            do_sample: Some(true),
            ..GenerationOverrides::default()
        });
        assert!(!params.do_sample);
        assert!(params.early_stopping);
    }

    #[test]
    fn overrides_replace_individual_fields() {
        let mut params = GenerationParams::for_quality(QualityMode::Standard);
        params.apply_overrides(&GenerationOverrides {
            temperature: Some(0.9),
            max_new_tokens: Some(64),
            ..GenerationOverrides::default()
        });
        assert_eq!(params.temperature, 0.9);
        assert_eq!(params.max_new_tokens, 64);
        // Untouched fields keep the quality defaults.
        assert_eq!(params.top_p, 0.85);
    }

    #[test]
    fn invalid_quality_normalises_to_standard() {
        assert_eq!(QualityMode::from_wire(Some("extreme")), QualityMode::Standard);
        assert_eq!(QualityMode::from_wire(None), QualityMode::Standard);
        assert_eq!(QualityMode::from_wire(Some("fast")), QualityMode::Fast);
        assert_eq!(QualityMode::from_wire(Some("high")), QualityMode::High);
    }
}
