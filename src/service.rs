//! Translation service: the request pipeline.
//!
//! `translate` never fails the transport — every outcome, including
//! validation errors and provider failures, becomes a response the HTTP
//! layer can render. Pipeline order: validate → model resolution → ensure
//! loaded → admission → source detection → generate → post-process →
//! plausibility retry → release slot → record statistics.
//!
//! Lock ordering: the queue slot is always released before statistics are
//! touched, never the reverse.

use crate::catalog;
use crate::config::{GatewayConfig, GenerationOverrides, SwitchPolicy};
use crate::error::{ErrorCode, GatewayError, Result};
use crate::langid;
use crate::languages::{LanguageRegistry, AUTO};
use crate::model_host::{ActiveModel, ModelHost};
use crate::postprocess;
use crate::prompt::{PromptBuilder, TranslationPromptSpec};
use crate::provider::{ExecutionMode, QualityMode};
use crate::queue::{Admission, TranslationQueue};
use crate::shutdown::ShutdownCoordinator;
use crate::stats::StatsWindow;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

/// Code points sampled for the model-based detection prompt.
const DETECTION_SAMPLE: usize = 200;

/// One translation request, owned by the handler for the duration of a call.
#[derive(Debug, Clone)]
pub struct TranslationRequest {
    pub request_id: String,
    pub text: String,
    pub source_language: String,
    pub target_language: String,
    pub quality: QualityMode,
    pub model_id: Option<String>,
    pub client_ip: String,
    pub received_at: DateTime<Utc>,
}

impl TranslationRequest {
    pub fn new(
        text: String,
        source_language: String,
        target_language: String,
        quality: QualityMode,
        model_id: Option<String>,
        client_ip: String,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            text,
            source_language,
            target_language,
            quality,
            model_id,
            client_ip,
            received_at: Utc::now(),
        }
    }
}

/// Terminal status of a translation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TranslationStatus {
    Completed,
    Pending,
    Failed,
    Rejected,
}

/// Result of one translation call.
#[derive(Debug, Clone)]
pub struct TranslationResponse {
    pub request_id: String,
    pub status: TranslationStatus,
    pub processing_time_ms: u64,
    pub execution_mode: ExecutionMode,
    pub translated_text: Option<String>,
    pub detected_language: Option<String>,
    pub confidence_score: Option<f64>,
    pub queue_position: Option<usize>,
    pub estimated_wait_seconds: Option<u64>,
    pub error: Option<GatewayError>,
}

impl TranslationResponse {
    fn base(request_id: &str, status: TranslationStatus, mode: ExecutionMode) -> Self {
        Self {
            request_id: request_id.to_owned(),
            status,
            processing_time_ms: 0,
            execution_mode: mode,
            translated_text: None,
            detected_language: None,
            confidence_score: None,
            queue_position: None,
            estimated_wait_seconds: None,
            error: None,
        }
    }
}

struct TranslationOutput {
    text: String,
    detected_language: Option<String>,
    confidence_score: Option<f64>,
}

/// The core request pipeline.
pub struct TranslationService {
    registry: Arc<LanguageRegistry>,
    host: Arc<ModelHost>,
    queue: Arc<TranslationQueue>,
    stats: Arc<StatsWindow>,
    shutdown: Arc<ShutdownCoordinator>,
    prompts: PromptBuilder,
    max_text_length: usize,
    generation_timeout: Duration,
}

impl TranslationService {
    pub fn new(
        config: &GatewayConfig,
        registry: Arc<LanguageRegistry>,
        host: Arc<ModelHost>,
        queue: Arc<TranslationQueue>,
        stats: Arc<StatsWindow>,
        shutdown: Arc<ShutdownCoordinator>,
    ) -> Self {
        Self {
            registry,
            host,
            queue,
            stats,
            shutdown,
            prompts: PromptBuilder::from_config(&config.model.prompts),
            max_text_length: config.app.translation.max_text_length,
            generation_timeout: Duration::from_secs(config.app.translation.timeout_secs),
        }
    }

    /// Run one translation. All failures become a failed response.
    pub async fn translate(&self, request: TranslationRequest) -> TranslationResponse {
        let started = Instant::now();

        match self.run(&request, started).await {
            Ok(response) => response,
            Err(e) => {
                let elapsed = elapsed_ms(started);
                self.stats.record(false, elapsed);
                warn!(
                    request_id = %request.request_id,
                    code = %e.code,
                    "translation failed"
                );
                let mut response = TranslationResponse::base(
                    &request.request_id,
                    TranslationStatus::Failed,
                    self.host.execution_mode(),
                );
                response.processing_time_ms = elapsed;
                response.error = Some(e);
                response
            }
        }
    }

    async fn run(
        &self,
        request: &TranslationRequest,
        started: Instant,
    ) -> Result<TranslationResponse> {
        if self.shutdown.is_shutting_down() {
            return Err(GatewayError::new(ErrorCode::ServiceUnavailable));
        }

        self.validate(request)?;
        self.resolve_model(request).await?;
        let active = self.host.ensure_loaded().await?;

        match self.queue.acquire_slot(&request.request_id) {
            Admission::Rejected => {
                // Rejections are not completed calls; no statistics record.
                let mut response = TranslationResponse::base(
                    &request.request_id,
                    TranslationStatus::Rejected,
                    active.provider.execution_mode(),
                );
                response.processing_time_ms = elapsed_ms(started);
                response.error = Some(GatewayError::new(ErrorCode::QueueFull));
                Ok(response)
            }
            Admission::Pending {
                queue_position,
                estimated_wait_seconds,
            } => {
                let mut response = TranslationResponse::base(
                    &request.request_id,
                    TranslationStatus::Pending,
                    active.provider.execution_mode(),
                );
                response.queue_position = Some(queue_position);
                response.estimated_wait_seconds = Some(estimated_wait_seconds);
                Ok(response)
            }
            Admission::Processing => {
                let result = self.perform(request, &active).await;
                // Release the slot before touching statistics.
                self.queue.release_slot(&request.request_id);

                let output = result?;
                let elapsed = elapsed_ms(started);
                self.stats.record(true, elapsed);
                info!(
                    target: "lingo::translation",
                    request_id = %request.request_id,
                    source = %request.source_language,
                    target = %request.target_language,
                    chars = request.text.chars().count(),
                    elapsed_ms = elapsed,
                    "translation completed"
                );

                let mut response = TranslationResponse::base(
                    &request.request_id,
                    TranslationStatus::Completed,
                    active.provider.execution_mode(),
                );
                response.processing_time_ms = elapsed;
                response.translated_text = Some(output.text);
                response.detected_language = output.detected_language;
                response.confidence_score = output.confidence_score;
                Ok(response)
            }
        }
    }

    fn validate(&self, request: &TranslationRequest) -> Result<()> {
        if request.text.trim().is_empty() {
            return Err(GatewayError::new(ErrorCode::ValidationEmptyText));
        }
        if request.text.chars().count() > self.max_text_length {
            return Err(GatewayError::new(ErrorCode::ValidationTextTooLong));
        }
        if !self.registry.is_valid_code(&request.source_language) {
            return Err(GatewayError::new(ErrorCode::ValidationInvalidLanguage));
        }
        if request.target_language == AUTO
            || !self.registry.is_valid_code(&request.target_language)
        {
            return Err(GatewayError::new(ErrorCode::ValidationInvalidLanguage));
        }
        if request.source_language != AUTO
            && request.source_language == request.target_language
        {
            return Err(GatewayError::new(ErrorCode::ValidationSameLanguage));
        }
        Ok(())
    }

    /// Honour an explicit `model_id` hint against the switching policy.
    async fn resolve_model(&self, request: &TranslationRequest) -> Result<()> {
        let Some(requested) = request.model_id.as_deref() else {
            return Ok(());
        };
        let requested = catalog::validate_model_id(requested)?;
        if self.host.active_model_id().as_deref() == Some(requested) {
            return Ok(());
        }

        catalog::find_model(self.host.models_dir(), requested)?;
        match self.host.switching_policy() {
            SwitchPolicy::Explicit => Err(GatewayError::new(ErrorCode::ModelSwitchRejected)),
            SwitchPolicy::Lazy => {
                self.host
                    .switch_model(requested, false, &self.queue)
                    .await
            }
        }
    }

    async fn perform(
        &self,
        request: &TranslationRequest,
        active: &ActiveModel,
    ) -> Result<TranslationOutput> {
        let mut detected_language = None;
        let mut confidence_score = None;

        let source_code = if request.source_language == AUTO {
            let (code, confidence) = self.detect_language(&request.text, active).await;
            detected_language = Some(code.clone());
            confidence_score = Some(confidence);
            code
        } else {
            request.source_language.clone()
        };

        if source_code == request.target_language {
            return Err(GatewayError::new(ErrorCode::ValidationSameLanguage));
        }

        let raw = self
            .generate_translation(request, active, &source_code, false, None)
            .await?;
        let mut cleaned = postprocess::clean_output(&raw);

        // Wrong-language output gets exactly one retry with the
        // force-output-only prompt; the retry is kept only if it passes.
        if !langid::looks_like_target(&cleaned, &request.target_language) {
            warn!(
                request_id = %request.request_id,
                "output failed target-language check, retrying once"
            );
            let overrides = retry_overrides();
            let retry_raw = self
                .generate_translation(request, active, &source_code, true, Some(&overrides))
                .await?;
            let retry_cleaned = postprocess::clean_output(&retry_raw);
            if langid::looks_like_target(&retry_cleaned, &request.target_language) {
                cleaned = retry_cleaned;
            } else {
                return Err(GatewayError::with_message(
                    ErrorCode::InternalError,
                    "翻譯結果與目標語言不符",
                ));
            }
        }

        // Single-line inputs must yield single-line outputs.
        if !request.text.contains('\n') {
            cleaned = postprocess::first_nonempty_line(&cleaned);
        }

        if cleaned.is_empty() {
            return Err(GatewayError::with_message(
                ErrorCode::InternalError,
                "模型輸出為空",
            ));
        }

        Ok(TranslationOutput {
            text: cleaned,
            detected_language,
            confidence_score,
        })
    }

    async fn generate_translation(
        &self,
        request: &TranslationRequest,
        active: &ActiveModel,
        source_code: &str,
        force_output_only: bool,
        overrides: Option<&GenerationOverrides>,
    ) -> Result<String> {
        let prompt = self.prompts.translation(&TranslationPromptSpec {
            text: &request.text,
            source_name: self.registry.prompt_name(source_code),
            target_name: self.registry.prompt_name(&request.target_language),
            source_code,
            target_code: &request.target_language,
            force_output_only,
        });

        let mut params = self.host.generation_params(request.quality);
        if let Some(overrides) = overrides {
            params.apply_overrides(overrides);
        }

        let generation = active.provider.generate(&prompt, &params);
        match tokio::time::timeout(self.generation_timeout, generation).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::new(ErrorCode::TranslationTimeout)),
        }
    }

    /// Ask the provider for a `code:confidence` line; fall back to the
    /// character-range heuristic when the answer is unusable.
    async fn detect_language(&self, text: &str, active: &ActiveModel) -> (String, f64) {
        let sample: String = text.chars().take(DETECTION_SAMPLE).collect();
        let prompt = self.prompts.detection(&sample);
        let params = self.host.generation_params(QualityMode::Fast);

        let answer =
            match tokio::time::timeout(self.generation_timeout, active.provider.generate(&prompt, &params))
                .await
            {
                Ok(Ok(answer)) => answer,
                Ok(Err(e)) => {
                    warn!("language detection failed: {e}");
                    return self.fallback_detection(text);
                }
                Err(_) => {
                    warn!("language detection timed out");
                    return self.fallback_detection(text);
                }
            };

        if let Some((code, confidence)) = parse_detection_answer(&answer) {
            if code != AUTO && self.registry.is_valid_code(&code) {
                return (code, confidence);
            }
        }
        self.fallback_detection(text)
    }

    fn fallback_detection(&self, text: &str) -> (String, f64) {
        match langid::rule_based_detection(text) {
            Some((code, confidence)) => (code.to_owned(), confidence),
            None => ("zh-TW".to_owned(), 0.5),
        }
    }
}

/// Parse `code:confidence`. An unparseable confidence defaults to 0.8,
/// clamped to `[0, 1]`.
fn parse_detection_answer(answer: &str) -> Option<(String, f64)> {
    let answer = answer.trim();
    let (code, confidence_part) = answer.split_once(':')?;
    let code = code.trim().to_owned();
    if code.is_empty() {
        return None;
    }
    let confidence = confidence_part.trim().parse::<f64>().unwrap_or(0.8);
    Some((code, confidence.clamp(0.0, 1.0)))
}

/// Fixed parameter overrides for the wrong-language retry.
fn retry_overrides() -> GenerationOverrides {
    GenerationOverrides {
        temperature: Some(0.5),
        top_p: Some(0.9),
        num_beams: Some(1),
        do_sample: Some(true),
        min_new_tokens: Some(5),
        max_new_tokens: Some(64),
        repetition_penalty: Some(1.1),
        no_repeat_ngram_size: None,
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    (started.elapsed().as_millis() as u64).max(1)
}
