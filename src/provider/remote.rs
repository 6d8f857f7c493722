//! Remote HTTP inference provider.
//!
//! Speaks one of two wire protocols, chosen at construction:
//!
//! - *OpenAI-style completions*: `POST {base}/completions`, answer in
//!   `choices[0].text`.
//! - *Hosted inference endpoint*: `POST {base}/` with
//!   `{inputs, parameters}`, answer in `generated_text` (array-wrapped or
//!   bare).
//!
//! Timeouts, non-2xx responses and parse failures all surface as
//! `INTERNAL_ERROR` with a descriptive message; transport failures are
//! retried up to the configured budget.

use crate::config::{HuggingFaceProviderConfig, OpenAiProviderConfig};
use crate::error::{ErrorCode, GatewayError, Result};
use crate::prompt::Prompt;
use crate::provider::{ExecutionMode, GenerationParams, InferenceProvider, ProviderStatus};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, error, info};

/// Which wire protocol the endpoint speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteProtocol {
    /// `POST /completions` with an OpenAI-style body.
    OpenAiCompletions,
    /// `POST /` with `{inputs, parameters}`.
    HostedInference,
}

/// Remote API provider.
pub struct RemoteProvider {
    protocol: RemoteProtocol,
    base_url: String,
    api_key: Option<String>,
    /// Model name for protocols that carry one in the body.
    model_name: Option<String>,
    max_retries: u32,
    client: reqwest::Client,
    status: Mutex<ProviderStatus>,
    last_error: Mutex<Option<String>>,
}

impl RemoteProvider {
    pub fn openai(config: &OpenAiProviderConfig) -> Self {
        Self::new(
            RemoteProtocol::OpenAiCompletions,
            config.api_base.clone(),
            config.api_key.clone(),
            Some(config.model.clone()),
            config.timeout_secs,
            config.max_retries,
        )
    }

    pub fn huggingface(config: &HuggingFaceProviderConfig) -> Self {
        Self::new(
            RemoteProtocol::HostedInference,
            config.endpoint_url.clone(),
            config.api_token.clone(),
            None,
            config.timeout_secs,
            config.max_retries,
        )
    }

    fn new(
        protocol: RemoteProtocol,
        base_url: String,
        api_key: Option<String>,
        model_name: Option<String>,
        timeout_secs: u64,
        max_retries: u32,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();

        Self {
            protocol,
            base_url,
            api_key,
            model_name,
            max_retries,
            client,
            status: Mutex::new(ProviderStatus::NotLoaded),
            last_error: Mutex::new(None),
        }
    }

    fn endpoint_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        match self.protocol {
            RemoteProtocol::OpenAiCompletions => format!("{base}/completions"),
            RemoteProtocol::HostedInference => format!("{base}/"),
        }
    }

    fn build_body(&self, prompt: &Prompt, params: &GenerationParams) -> Value {
        let text = prompt.flatten();
        match self.protocol {
            RemoteProtocol::OpenAiCompletions => build_completions_body(
                self.model_name.as_deref(),
                &text,
                params,
            ),
            RemoteProtocol::HostedInference => build_inference_body(&text, params),
        }
    }

    fn parse_response(&self, value: &Value) -> Result<String> {
        let text = match self.protocol {
            RemoteProtocol::OpenAiCompletions => parse_completions_response(value),
            RemoteProtocol::HostedInference => parse_inference_response(value),
        };
        text.ok_or_else(|| {
            GatewayError::with_message(
                ErrorCode::InternalError,
                format!("unexpected remote response shape: {value}"),
            )
        })
    }

    async fn post_with_retry(&self, body: &Value) -> Result<Value> {
        let url = self.endpoint_url();
        let mut last_transport_error = String::new();

        for attempt in 0..=self.max_retries {
            let mut request = self.client.post(&url).json(body);
            if let Some(key) = &self.api_key {
                request = request.bearer_auth(key);
            }

            let response = match request.send().await {
                Ok(r) => r,
                Err(e) => {
                    last_transport_error = e.to_string();
                    debug!(attempt, "remote request transport failure: {e}");
                    continue;
                }
            };

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                error!("remote endpoint returned {status}: {body}");
                return Err(GatewayError::with_message(
                    ErrorCode::InternalError,
                    format!("遠端 API 請求失敗: {status}"),
                ));
            }

            return response.json::<Value>().await.map_err(|e| {
                GatewayError::with_message(
                    ErrorCode::InternalError,
                    format!("remote response parse failed: {e}"),
                )
            });
        }

        Err(GatewayError::with_message(
            ErrorCode::InternalError,
            format!("遠端 API 請求逾時或連線失敗: {last_transport_error}"),
        ))
    }
}

#[async_trait]
impl InferenceProvider for RemoteProvider {
    async fn load(&self) -> Result<()> {
        let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
        if *status == ProviderStatus::Loaded {
            return Ok(());
        }
        // The HTTP client is already constructed; the first generate call
        // validates the connection.
        *status = ProviderStatus::Loaded;
        *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = None;
        info!(
            "remote provider ready ({:?}) at {}",
            self.protocol, self.base_url
        );
        Ok(())
    }

    async fn generate(&self, prompt: &Prompt, params: &GenerationParams) -> Result<String> {
        if self.status() != ProviderStatus::Loaded {
            return Err(GatewayError::new(ErrorCode::ModelNotLoaded));
        }

        let body = self.build_body(prompt, params);
        let value = self.post_with_retry(&body).await?;
        let text = self.parse_response(&value)?;
        debug!("remote generation done | preview={:?}", text.chars().take(80).collect::<String>());
        Ok(text.trim().to_owned())
    }

    async fn unload(&self) {
        *self.status.lock().unwrap_or_else(|e| e.into_inner()) = ProviderStatus::NotLoaded;
        info!("remote provider closed ({:?})", self.protocol);
    }

    fn status(&self) -> ProviderStatus {
        *self.status.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Remote
    }

    fn loading_progress(&self) -> f32 {
        match self.status() {
            ProviderStatus::Loaded => 100.0,
            _ => 0.0,
        }
    }

    fn error_message(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

fn build_completions_body(model: Option<&str>, prompt: &str, params: &GenerationParams) -> Value {
    let mut body = json!({
        "prompt": prompt,
        "max_tokens": params.max_new_tokens,
        "temperature": params.temperature,
        "top_p": params.top_p,
        "n": 1,
        "stream": false,
    });
    if let Some(model) = model {
        body["model"] = json!(model);
    }
    body
}

fn build_inference_body(prompt: &str, params: &GenerationParams) -> Value {
    json!({
        "inputs": prompt,
        "parameters": {
            "max_new_tokens": params.max_new_tokens,
            "temperature": params.temperature,
            "top_p": params.top_p,
            "do_sample": params.do_sample,
            "num_beams": params.num_beams,
            "repetition_penalty": params.repetition_penalty,
            "return_full_text": false,
        }
    })
}

fn parse_completions_response(value: &Value) -> Option<String> {
    value["choices"][0]["text"].as_str().map(str::to_owned)
}

fn parse_inference_response(value: &Value) -> Option<String> {
    // Array-wrapped or bare `generated_text`.
    let field = match value {
        Value::Array(items) => items.first()?.get("generated_text")?,
        other => other.get("generated_text")?,
    };
    field.as_str().map(str::to_owned)
}
