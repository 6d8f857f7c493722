//! Local weights provider backed by `mistralrs` (in-process inference).
//!
//! Loads a model from a directory under the models root and serves
//! generations without any external service. Load progress is reported at
//! declared checkpoints; while the blocking engine build runs, a cooperative
//! background smoother advances the value in small steps, capped below the
//! next real checkpoint. The smoother is cancelled and awaited before every
//! checkpoint transition, so a real checkpoint always wins.

use crate::config::LocalProviderConfig;
use crate::error::{ErrorCode, GatewayError, Result};
use crate::prompt::{ChatRole, Prompt};
use crate::provider::{
    ExecutionMode, GenerationParams, InferenceProvider, ProgressFn, ProviderStatus,
};
use async_trait::async_trait;
use mistralrs::{
    GgufModelBuilder, IsqType, Model, RequestBuilder, TextMessageRole, TextMessages,
    TextModelBuilder,
};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// VRAM bound (GiB) under which the 4-bit quantised load is preferred.
const QUANTIZE_VRAM_GIB: f64 = 12.0;

/// Seconds between smoother increments during the engine build.
const SMOOTH_INTERVAL_SECS: u64 = 5;

#[derive(Debug)]
struct LoadState {
    status: ProviderStatus,
    error_message: Option<String>,
    mode: ExecutionMode,
}

/// In-process inference provider.
pub struct LocalProvider {
    config: LocalProviderConfig,
    model_dir: PathBuf,
    state: Mutex<LoadState>,
    model: RwLock<Option<Arc<Model>>>,
    progress: Arc<AtomicU32>,
    progress_callback: Arc<Mutex<Option<ProgressFn>>>,
}

impl LocalProvider {
    /// Provider for the model directory `models_dir/model_id`.
    pub fn new(config: LocalProviderConfig, models_dir: &Path, model_id: &str) -> Self {
        Self {
            config,
            model_dir: models_dir.join(model_id),
            state: Mutex::new(LoadState {
                status: ProviderStatus::NotLoaded,
                error_message: None,
                mode: ExecutionMode::Cpu,
            }),
            model: RwLock::new(None),
            progress: Arc::new(AtomicU32::new(0)),
            progress_callback: Arc::new(Mutex::new(None)),
        }
    }

    fn report_progress(&self, percent: u32, message: &str) {
        self.progress.store(percent, Ordering::SeqCst);
        info!("model load progress: {percent}% - {message}");
        let callback = self
            .progress_callback
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(cb) = callback {
            cb(percent as f32, message);
        }
    }

    fn start_smoother(&self, cap: u32, message: &'static str) -> ProgressSmoother {
        ProgressSmoother::start(
            Arc::clone(&self.progress),
            Arc::clone(&self.progress_callback),
            cap,
            Duration::from_secs(SMOOTH_INTERVAL_SECS),
            message,
        )
    }

    fn set_mode(&self, mode: ExecutionMode) {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).mode = mode;
    }

    /// Whether the loaded weights belong to the structured-content translate
    /// model family (no system role, array-shaped user content).
    fn is_translate_family(&self) -> bool {
        self.model_dir
            .to_string_lossy()
            .to_lowercase()
            .contains("translategemma")
    }

    async fn build_model(&self, quantize: bool) -> Result<Model> {
        let dir = self.model_dir.to_string_lossy().to_string();

        if let Some(gguf_file) = &self.config.gguf_file {
            let mut builder = GgufModelBuilder::new(&dir, vec![gguf_file.clone()]).with_logging();
            if let Some(tokenizer_id) = &self.config.tokenizer_id {
                builder = builder.with_tok_model_id(tokenizer_id);
            }
            return builder.build().await.map_err(|e| {
                GatewayError::with_message(
                    ErrorCode::InternalError,
                    format!("GGUF model build failed: {e}"),
                )
            });
        }

        let mut builder = TextModelBuilder::new(&dir).with_logging();
        if quantize {
            builder = builder.with_isq(IsqType::Q4K);
        }
        builder.build().await.map_err(|e| {
            GatewayError::with_message(
                ErrorCode::InternalError,
                format!("model build failed: {e}"),
            )
        })
    }

    fn build_messages(&self, prompt: &Prompt) -> TextMessages {
        let mut messages = TextMessages::new().enable_thinking(false);

        match prompt {
            Prompt::Plain(text) => {
                messages = messages.add_message(TextMessageRole::User, text.clone());
            }
            Prompt::Chat(chat) if self.is_translate_family() => {
                // This family takes the translation parameters as a
                // structured content payload in a single user turn.
                let source = normalize_translate_family_code(
                    Some(&chat.extras.source_lang_code),
                    "en",
                );
                let target = normalize_translate_family_code(
                    Some(&chat.extras.target_lang_code),
                    "zh-TW",
                );
                let payload = serde_json::json!([{
                    "type": "text",
                    "source_lang_code": source,
                    "target_lang_code": target,
                    "text": chat.extras.text,
                }]);
                messages = messages.add_message(TextMessageRole::User, payload.to_string());
            }
            Prompt::Chat(chat) => {
                for message in &chat.messages {
                    let role = match message.role {
                        ChatRole::System => TextMessageRole::System,
                        ChatRole::User => TextMessageRole::User,
                        ChatRole::Assistant => TextMessageRole::Assistant,
                    };
                    messages = messages.add_message(role, message.content.clone());
                }
            }
        }

        messages
    }
}

#[async_trait]
impl InferenceProvider for LocalProvider {
    async fn load(&self) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            match state.status {
                ProviderStatus::Loaded => {
                    info!("model already loaded, skipping");
                    return Ok(());
                }
                ProviderStatus::Loading => {
                    warn!("model load already in progress");
                    return Err(GatewayError::new(ErrorCode::ModelNotLoaded));
                }
                _ => {
                    state.status = ProviderStatus::Loading;
                    state.error_message = None;
                }
            }
        }
        self.progress.store(0, Ordering::SeqCst);
        self.report_progress(5, "初始化配置");

        let result = self.load_inner().await;
        match result {
            Ok(()) => {
                self.state.lock().unwrap_or_else(|e| e.into_inner()).status =
                    ProviderStatus::Loaded;
                self.report_progress(100, "模型載入完成");
                Ok(())
            }
            Err(e) => {
                {
                    let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                    state.status = ProviderStatus::Error;
                    state.error_message = Some(e.message.clone());
                }
                self.progress.store(0, Ordering::SeqCst);
                error!("model load failed: {e}");
                Err(e)
            }
        }
    }

    async fn generate(&self, prompt: &Prompt, params: &GenerationParams) -> Result<String> {
        if self.status() != ProviderStatus::Loaded {
            return Err(GatewayError::new(ErrorCode::ModelNotLoaded));
        }
        let model = {
            let slot = self.model.read().unwrap_or_else(|e| e.into_inner());
            slot.clone()
        }
        .ok_or_else(|| GatewayError::new(ErrorCode::ModelNotLoaded))?;

        let messages = self.build_messages(prompt);
        let request = RequestBuilder::from(messages)
            .set_sampler_temperature(params.temperature)
            .set_sampler_topp(params.top_p)
            .set_sampler_max_len(params.max_new_tokens as usize)
            .enable_thinking(false);

        let response = model.send_chat_request(request).await.map_err(|e| {
            GatewayError::with_message(ErrorCode::InternalError, format!("文字生成失敗: {e}"))
        })?;

        let text = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.as_deref())
            .unwrap_or_default()
            .trim()
            .to_owned();

        debug!(
            "local generation done | preview={:?}",
            text.chars().take(80).collect::<String>()
        );
        Ok(text)
    }

    async fn unload(&self) {
        {
            let mut slot = self.model.write().unwrap_or_else(|e| e.into_inner());
            *slot = None;
        }
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.status = ProviderStatus::NotLoaded;
            state.error_message = None;
        }
        self.progress.store(0, Ordering::SeqCst);
        info!("local model unloaded");
    }

    fn status(&self) -> ProviderStatus {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).status
    }

    fn execution_mode(&self) -> ExecutionMode {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).mode
    }

    fn loading_progress(&self) -> f32 {
        self.progress.load(Ordering::SeqCst) as f32
    }

    fn error_message(&self) -> Option<String> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .error_message
            .clone()
    }

    fn set_progress_callback(&self, callback: ProgressFn) {
        *self
            .progress_callback
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(callback);
    }
}

impl LocalProvider {
    async fn load_inner(&self) -> Result<()> {
        self.report_progress(10, "尋找模型路徑");
        if !self.model_dir.is_dir() {
            return Err(GatewayError::with_message(
                ErrorCode::InternalError,
                format!("模型路徑不存在: {}", self.model_dir.display()),
            ));
        }

        self.report_progress(15, "偵測執行裝置");
        let gpu_vram_gib = if self.config.force_cpu {
            None
        } else {
            probe_gpu_vram_gib()
        };

        let quantize = match gpu_vram_gib {
            Some(vram) => {
                self.set_mode(ExecutionMode::Gpu);
                info!("CUDA GPU detected, VRAM: {vram:.2} GiB");
                self.report_progress(20, "使用 GPU 模式，載入模型");
                // Small cards get the 4-bit load unless config overrides.
                self.config.enable_4bit.unwrap_or(vram <= QUANTIZE_VRAM_GIB)
            }
            None => {
                self.set_mode(ExecutionMode::Cpu);
                info!("no usable GPU, using CPU");
                self.report_progress(20, "使用 CPU 模式，載入模型");
                self.config.enable_4bit.unwrap_or(false)
            }
        };

        if quantize {
            self.report_progress(25, "4-bit 量化載入中");
        } else {
            self.report_progress(25, "模型權重載入中");
        }

        // The engine build blocks for a long time; smooth the reported value
        // up to just below the next checkpoint while it runs.
        let smoother = self.start_smoother(74, "模型權重載入中");
        let built = self.build_model(quantize).await;
        smoother.stop().await;
        let model = built?;

        self.report_progress(75, "載入 Tokenizer");
        {
            let mut slot = self.model.write().unwrap_or_else(|e| e.into_inner());
            *slot = Some(Arc::new(model));
        }

        self.report_progress(95, "模型初始化中");
        info!(
            "model loaded, execution mode: {}",
            self.execution_mode().as_str()
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Progress smoother
// ---------------------------------------------------------------------------

/// Cooperative task that nudges the reported progress forward while a
/// blocking load step runs. [`ProgressSmoother::stop`] cancels the task and
/// waits for it to finish, so no increment can land after a real checkpoint.
struct ProgressSmoother {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl ProgressSmoother {
    fn start(
        progress: Arc<AtomicU32>,
        callback: Arc<Mutex<Option<ProgressFn>>>,
        cap: u32,
        interval: Duration,
        message: &'static str,
    ) -> Self {
        let token = CancellationToken::new();
        let child = token.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                let current = progress.load(Ordering::SeqCst);
                if current >= cap {
                    continue;
                }
                let next = current + 1;
                progress.store(next, Ordering::SeqCst);
                let cb = callback.lock().unwrap_or_else(|e| e.into_inner()).clone();
                if let Some(cb) = cb {
                    cb(next as f32, message);
                }
            }
        });
        Self { token, handle }
    }

    /// Cancel and wait. Must complete before the next checkpoint is stored.
    async fn stop(self) {
        self.token.cancel();
        let _ = self.handle.await;
    }
}

// ---------------------------------------------------------------------------
// Device probing
// ---------------------------------------------------------------------------

/// Best-effort CUDA VRAM probe. `None` means no usable GPU.
fn probe_gpu_vram_gib() -> Option<f64> {
    let out = Command::new("nvidia-smi")
        .args(["--query-gpu=memory.total", "--format=csv,noheader,nounits"])
        .output()
        .ok()?;
    if !out.status.success() {
        return None;
    }
    let stdout = String::from_utf8(out.stdout).ok()?;
    let mib: f64 = stdout.lines().next()?.trim().parse().ok()?;
    Some(mib / 1024.0)
}

/// Map gateway language codes onto the vocabulary the structured-content
/// translate family accepts: its table has `zh-Hans` for simplified and
/// `zh-TW` for traditional variants, and no `auto`.
fn normalize_translate_family_code(code: Option<&str>, fallback: &str) -> String {
    let Some(code) = code else {
        return fallback.to_owned();
    };
    let normalized = code.trim().replace('_', "-");
    if normalized.is_empty() {
        return fallback.to_owned();
    }
    let lower = normalized.to_lowercase();

    if lower == "auto" {
        return fallback.to_owned();
    }

    const SIMPLIFIED: [&str; 6] = [
        "zh-cn",
        "zh-hans",
        "zh-hans-cn",
        "zh-hans-hk",
        "zh-hans-mo",
        "zh-hans-sg",
    ];
    if SIMPLIFIED.contains(&lower.as_str()) {
        return "zh-Hans".to_owned();
    }

    const TRADITIONAL: [&str; 5] = ["zh-tw", "zh-hant", "zh-hant-hk", "zh-hant-mo", "zh-hant-my"];
    if TRADITIONAL.contains(&lower.as_str()) {
        return "zh-TW".to_owned();
    }

    normalized
}
