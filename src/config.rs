//! Configuration types for the translation gateway.
//!
//! Three documents are consumed: application limits (`app.yaml`), model and
//! prompt settings (`model.yaml`) and the language table (`languages.yaml`).
//! Missing files or malformed YAML fall back to the built-in defaults with a
//! warning so the gateway always starts.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Top-level configuration for the gateway.
#[derive(Debug, Clone, Default)]
pub struct GatewayConfig {
    /// Application limits and server settings.
    pub app: AppConfig,
    /// Model provider, prompt and generation settings.
    pub model: ModelConfig,
    /// Language table and defaults.
    pub languages: LanguagesConfig,
}

impl GatewayConfig {
    /// Load all three documents from `config_dir`.
    ///
    /// A missing or unreadable document is replaced by its defaults; the
    /// gateway never refuses to start over configuration.
    pub fn load(config_dir: &Path) -> Self {
        Self {
            app: load_yaml_or_default(&config_dir.join("app.yaml")),
            model: load_yaml_or_default(&config_dir.join("model.yaml")),
            languages: load_yaml_or_default(&config_dir.join("languages.yaml")),
        }
    }
}

fn load_yaml_or_default<T: serde::de::DeserializeOwned + Default>(path: &Path) -> T {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => {
            warn!("config file missing, using defaults: {}", path.display());
            return T::default();
        }
    };
    match serde_yaml::from_str(&content) {
        Ok(v) => v,
        Err(e) => {
            warn!("config parse failed ({}), using defaults: {e}", path.display());
            T::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Application config
// ---------------------------------------------------------------------------

/// Application configuration (`app.yaml`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub translation: TranslationLimits,
    pub concurrency: ConcurrencyConfig,
    pub admin_access: AdminAccessConfig,
    pub paths: PathsConfig,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 8100,
        }
    }
}

/// Per-request limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslationLimits {
    /// Maximum input length in code points.
    pub max_text_length: usize,
    /// Wall-clock budget for one provider generation, in seconds.
    pub timeout_secs: u64,
}

impl Default for TranslationLimits {
    fn default() -> Self {
        Self {
            max_text_length: 10_000,
            timeout_secs: 120,
        }
    }
}

/// Queue bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    pub max_concurrent: usize,
    pub max_queue_size: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 100,
            max_queue_size: 100,
        }
    }
}

/// Admin endpoint access control.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminAccessConfig {
    /// CIDR blocks allowed to reach `/api/v1/admin/*`.
    ///
    /// An explicitly empty list denies all admin access.
    pub allowed_ips: Vec<String>,
}

impl Default for AdminAccessConfig {
    fn default() -> Self {
        Self {
            allowed_ips: vec![
                "127.0.0.1/32".to_owned(),
                "10.0.0.0/8".to_owned(),
                "172.16.0.0/12".to_owned(),
                "192.168.0.0/16".to_owned(),
            ],
        }
    }
}

/// Filesystem roots.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// One subdirectory per model; directory name is the model id.
    pub models_dir: PathBuf,
    /// Rotated log files.
    pub logs_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            models_dir: PathBuf::from("models"),
            logs_dir: PathBuf::from("logs"),
        }
    }
}

// ---------------------------------------------------------------------------
// Model config
// ---------------------------------------------------------------------------

/// Model configuration (`model.yaml`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub provider: ProviderConfig,
    pub prompts: PromptConfig,
    pub generation: GenerationConfig,
    pub switching: SwitchingConfig,
}

/// Which inference provider hosts the model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    /// Weights loaded in-process from a local directory.
    #[default]
    Local,
    /// OpenAI-style completions endpoint.
    Openai,
    /// Hosted inference endpoint (HuggingFace-style).
    Huggingface,
}

/// Provider selection plus per-variant settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    #[serde(rename = "type")]
    pub provider_type: ProviderType,
    pub local: LocalProviderConfig,
    pub openai: OpenAiProviderConfig,
    pub huggingface: HuggingFaceProviderConfig,
}

/// Local weights variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalProviderConfig {
    /// Default model id when no switch has happened yet.
    pub default_model_id: String,
    /// Never use the GPU even when one is present.
    pub force_cpu: bool,
    /// Override the automatic 4-bit decision (auto: VRAM ≤ 12 GiB).
    pub enable_4bit: Option<bool>,
    /// GGUF file inside the model directory, when the weights are GGUF.
    pub gguf_file: Option<String>,
    /// Tokenizer repo/path override for GGUF models.
    pub tokenizer_id: Option<String>,
}

impl Default for LocalProviderConfig {
    fn default() -> Self {
        Self {
            default_model_id: "TAIDE-LX-7B-Chat".to_owned(),
            force_cpu: false,
            enable_4bit: None,
            gguf_file: None,
            tokenizer_id: None,
        }
    }
}

/// OpenAI-style completions endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiProviderConfig {
    pub api_base: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for OpenAiProviderConfig {
    fn default() -> Self {
        Self {
            api_base: "http://localhost:8000/v1".to_owned(),
            api_key: None,
            model: "taide/TAIDE-LX-7B".to_owned(),
            timeout_secs: 120,
            max_retries: 2,
        }
    }
}

/// Hosted inference endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HuggingFaceProviderConfig {
    pub endpoint_url: String,
    pub api_token: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for HuggingFaceProviderConfig {
    fn default() -> Self {
        Self {
            endpoint_url: String::new(),
            api_token: None,
            timeout_secs: 120,
            max_retries: 2,
        }
    }
}

/// Which prompt representation the builder emits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptFormat {
    /// Single instruction-block string.
    #[default]
    Template,
    /// Structured chat envelope rendered by the provider.
    Chat,
}

/// Prompt construction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    pub format_type: PromptFormat,
    /// Override for the translation template. Placeholders:
    /// `{source_language}`, `{target_language}`, `{text}`.
    pub translation: Option<String>,
    /// Override for the language-detection prompt. Placeholder: `{text}`.
    pub language_detection: Option<String>,
    /// System preamble for the chat form.
    pub system_preamble: Option<String>,
    /// Whether the active model family accepts a `system` role. When false
    /// the preamble is inlined into the first user message.
    pub system_role_supported: bool,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            format_type: PromptFormat::Template,
            translation: None,
            language_detection: None,
            system_preamble: None,
            system_role_supported: true,
        }
    }
}

/// Per-quality generation parameter overrides.
///
/// Any field left unset falls back to the built-in table for that quality.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationOverrides {
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub num_beams: Option<u32>,
    pub do_sample: Option<bool>,
    pub min_new_tokens: Option<u32>,
    pub max_new_tokens: Option<u32>,
    pub repetition_penalty: Option<f64>,
    pub no_repeat_ngram_size: Option<u32>,
}

/// Per-quality overrides keyed by quality mode.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub fast: GenerationOverrides,
    pub standard: GenerationOverrides,
    pub high: GenerationOverrides,
}

/// How the gateway reacts to a request naming a non-active model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwitchPolicy {
    /// Auto-switch on demand when idle.
    #[default]
    Lazy,
    /// Only the explicit switch endpoint may change the active model.
    Explicit,
}

/// Model-switching policy.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchingConfig {
    pub policy: SwitchPolicy,
}

// ---------------------------------------------------------------------------
// Language config
// ---------------------------------------------------------------------------

/// One language row from `languages.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageSpec {
    /// Stable code, e.g. `zh-TW`, `en`.
    pub code: String,
    /// Prompt-facing display name.
    pub name: String,
    /// English display name.
    pub name_en: String,
    #[serde(default = "default_true")]
    pub is_enabled: bool,
    #[serde(default)]
    pub sort_order: i32,
}

fn default_true() -> bool {
    true
}

/// Default source/target language codes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LanguageDefaults {
    pub source_language: String,
    pub target_language: String,
}

impl Default for LanguageDefaults {
    fn default() -> Self {
        Self {
            source_language: "auto".to_owned(),
            target_language: "zh-TW".to_owned(),
        }
    }
}

/// Language configuration (`languages.yaml`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LanguagesConfig {
    pub languages: Vec<LanguageSpec>,
    pub defaults: LanguageDefaults,
}

impl Default for LanguagesConfig {
    fn default() -> Self {
        let table: [(&str, &str, &str, i32); 8] = [
            ("zh-TW", "繁體中文", "Traditional Chinese", 1),
            ("zh-CN", "簡體中文", "Simplified Chinese", 2),
            ("en", "英文", "English", 3),
            ("ja", "日文", "Japanese", 4),
            ("ko", "韓文", "Korean", 5),
            ("fr", "法文", "French", 6),
            ("de", "德文", "German", 7),
            ("es", "西班牙文", "Spanish", 8),
        ];
        Self {
            languages: table
                .into_iter()
                .map(|(code, name, name_en, sort_order)| LanguageSpec {
                    code: code.to_owned(),
                    name: name.to_owned(),
                    name_en: name_en.to_owned(),
                    is_enabled: true,
                    sort_order,
                })
                .collect(),
            defaults: LanguageDefaults::default(),
        }
    }
}
