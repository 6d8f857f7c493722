//! Process-wide model lifecycle.
//!
//! The host owns the single *active* provider slot. All mutation goes
//! through [`ModelHost::switch_model`], [`ModelHost::ensure_loaded`] and
//! [`ModelHost::unload`]; readers only ever observe a complete
//! [`ActiveModel`] or none. A switch in progress is tracked by an atomic
//! flag so a second switch refuses instead of racing.

use crate::catalog;
use crate::config::{GenerationConfig, ModelConfig, ProviderType, SwitchPolicy};
use crate::error::{ErrorCode, GatewayError, Result};
use crate::provider::local::LocalProvider;
use crate::provider::remote::RemoteProvider;
use crate::provider::{
    ExecutionMode, GenerationParams, InferenceProvider, ProviderStatus, QualityMode,
};
use crate::queue::TranslationQueue;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{error, info, warn};

/// Builds a provider for a given model id. Injected so tests can substitute
/// stub providers for the real engines.
pub type ProviderFactory = Arc<dyn Fn(&str) -> Arc<dyn InferenceProvider> + Send + Sync>;

/// The provider currently bound, with the model id it serves.
#[derive(Clone)]
pub struct ActiveModel {
    pub model_id: String,
    pub provider: Arc<dyn InferenceProvider>,
}

impl std::fmt::Debug for ActiveModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveModel")
            .field("model_id", &self.model_id)
            .finish_non_exhaustive()
    }
}

/// Owner of the active-provider slot.
pub struct ModelHost {
    models_dir: PathBuf,
    default_model_id: String,
    policy: SwitchPolicy,
    generation: GenerationConfig,
    factory: ProviderFactory,
    active: RwLock<Option<ActiveModel>>,
    switching: AtomicBool,
}

impl ModelHost {
    /// Host with the real provider factory derived from configuration.
    pub fn from_config(model_config: &ModelConfig, models_dir: &Path) -> Self {
        let factory = real_factory(model_config, models_dir);
        let default_model_id = default_model_id(model_config);
        Self::with_factory(model_config, models_dir, default_model_id, factory)
    }

    /// Host with an injected provider factory (tests use stubs here).
    pub fn with_factory(
        model_config: &ModelConfig,
        models_dir: &Path,
        default_model_id: String,
        factory: ProviderFactory,
    ) -> Self {
        Self {
            models_dir: models_dir.to_path_buf(),
            default_model_id,
            policy: model_config.switching.policy,
            generation: model_config.generation.clone(),
            factory,
            active: RwLock::new(None),
            switching: AtomicBool::new(false),
        }
    }

    pub fn switching_policy(&self) -> SwitchPolicy {
        self.policy
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Current active model, if any.
    pub fn active(&self) -> Option<ActiveModel> {
        self.active
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn active_model_id(&self) -> Option<String> {
        self.active().map(|a| a.model_id)
    }

    pub fn status(&self) -> ProviderStatus {
        match self.active() {
            Some(active) => active.provider.status(),
            None => ProviderStatus::NotLoaded,
        }
    }

    pub fn execution_mode(&self) -> ExecutionMode {
        match self.active() {
            Some(active) => active.provider.execution_mode(),
            None => ExecutionMode::Cpu,
        }
    }

    pub fn loading_progress(&self) -> f32 {
        match self.active() {
            Some(active) => active.provider.loading_progress(),
            None => 0.0,
        }
    }

    pub fn error_message(&self) -> Option<String> {
        self.active().and_then(|a| a.provider.error_message())
    }

    pub fn is_loaded(&self) -> bool {
        self.status() == ProviderStatus::Loaded
    }

    /// Generation parameters for a quality mode: built-in table, then
    /// configured per-quality overrides.
    pub fn generation_params(&self, quality: QualityMode) -> GenerationParams {
        let mut params = GenerationParams::for_quality(quality);
        let overrides = match quality {
            QualityMode::Fast => &self.generation.fast,
            QualityMode::Standard => &self.generation.standard,
            QualityMode::High => &self.generation.high,
        };
        params.apply_overrides(overrides);
        params
    }

    /// Make sure some provider is loaded, constructing the default one on
    /// first use. Fail-closed: if a load or switch is already in progress
    /// this returns `MODEL_NOT_LOADED` immediately instead of queueing
    /// behind a long load.
    pub async fn ensure_loaded(&self) -> Result<ActiveModel> {
        if let Some(active) = self.active() {
            if active.provider.status() == ProviderStatus::Loaded {
                return Ok(active);
            }
        }

        let _guard = SwitchGuard::acquire(&self.switching)
            .ok_or_else(|| GatewayError::new(ErrorCode::ModelNotLoaded))?;

        // Someone else may have finished while we acquired the guard.
        if let Some(active) = self.active() {
            if active.provider.status() == ProviderStatus::Loaded {
                return Ok(active);
            }
            active.provider.load().await.map_err(|e| {
                warn!("model load failed: {e}");
                GatewayError::new(ErrorCode::ModelNotLoaded)
            })?;
            return Ok(active);
        }

        let model_id = self.default_model_id.clone();
        info!("loading default model: {model_id}");
        let provider = (self.factory)(&model_id);
        provider.load().await.map_err(|e| {
            warn!("default model load failed: {e}");
            GatewayError::new(ErrorCode::ModelNotLoaded)
        })?;

        let active = ActiveModel { model_id, provider };
        *self.active.write().unwrap_or_else(|e| e.into_inner()) = Some(active.clone());
        Ok(active)
    }

    /// Switch the active provider to `model_id`.
    ///
    /// Fails with `MODEL_SWITCH_IN_PROGRESS` when another switch holds the
    /// flag, `MODEL_SWITCH_REJECTED` when in-flight work exists and `force`
    /// is not set, and `MODEL_SWITCH_FAILED` when the new provider will not
    /// load — in which case the active slot is left empty.
    pub async fn switch_model(
        &self,
        model_id: &str,
        force: bool,
        queue: &TranslationQueue,
    ) -> Result<()> {
        let model_id = catalog::validate_model_id(model_id)?.to_owned();

        let _guard = SwitchGuard::acquire(&self.switching)
            .ok_or_else(|| GatewayError::new(ErrorCode::ModelSwitchInProgress))?;

        if !force && queue.active_count() > 0 {
            return Err(GatewayError::new(ErrorCode::ModelSwitchRejected));
        }

        catalog::find_model(&self.models_dir, &model_id)?;

        // Unload whatever is active; from here on the slot is empty until
        // the new provider loads.
        let previous = self
            .active
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(previous) = previous {
            info!("unloading active model: {}", previous.model_id);
            previous.provider.unload().await;
        }

        info!("switching active model to: {model_id}");
        let provider = (self.factory)(&model_id);
        if let Err(e) = provider.load().await {
            error!("model switch failed: {e}");
            return Err(GatewayError::with_message(
                ErrorCode::ModelSwitchFailed,
                format!("{}（{model_id}）", ErrorCode::ModelSwitchFailed.message()),
            ));
        }

        *self.active.write().unwrap_or_else(|e| e.into_inner()) = Some(ActiveModel {
            model_id: model_id.clone(),
            provider,
        });
        info!("model switch complete: {model_id}");
        Ok(())
    }

    /// Unload and drop the active provider. Safe when none is active.
    pub async fn unload(&self) {
        let previous = self
            .active
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(previous) = previous {
            info!("unloading model: {}", previous.model_id);
            previous.provider.unload().await;
        }
    }
}

/// Clears the switching flag on every exit path.
struct SwitchGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> SwitchGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for SwitchGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

fn default_model_id(model_config: &ModelConfig) -> String {
    match model_config.provider.provider_type {
        ProviderType::Local => model_config.provider.local.default_model_id.clone(),
        ProviderType::Openai => model_config.provider.openai.model.clone(),
        ProviderType::Huggingface => "inference-endpoint".to_owned(),
    }
}

fn real_factory(model_config: &ModelConfig, models_dir: &Path) -> ProviderFactory {
    let provider_config = model_config.provider.clone();
    let models_dir = models_dir.to_path_buf();
    Arc::new(move |model_id: &str| -> Arc<dyn InferenceProvider> {
        match provider_config.provider_type {
            ProviderType::Local => Arc::new(LocalProvider::new(
                provider_config.local.clone(),
                &models_dir,
                model_id,
            )),
            ProviderType::Openai => Arc::new(RemoteProvider::openai(&provider_config.openai)),
            ProviderType::Huggingface => {
                Arc::new(RemoteProvider::huggingface(&provider_config.huggingface))
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::Prompt;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    /// Provider stub with scriptable load behavior.
    struct StubProvider {
        fail_load: bool,
        status: Mutex<ProviderStatus>,
        loads: AtomicUsize,
    }

    impl StubProvider {
        fn new(fail_load: bool) -> Self {
            Self {
                fail_load,
                status: Mutex::new(ProviderStatus::NotLoaded),
                loads: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl InferenceProvider for StubProvider {
        async fn load(&self) -> Result<()> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if self.fail_load {
                *self.status.lock().unwrap() = ProviderStatus::Error;
                return Err(GatewayError::with_message(
                    ErrorCode::InternalError,
                    "stub load failure",
                ));
            }
            *self.status.lock().unwrap() = ProviderStatus::Loaded;
            Ok(())
        }

        async fn generate(&self, _prompt: &Prompt, _params: &GenerationParams) -> Result<String> {
            Ok("stub".to_owned())
        }

        async fn unload(&self) {
            *self.status.lock().unwrap() = ProviderStatus::NotLoaded;
        }

        fn status(&self) -> ProviderStatus {
            *self.status.lock().unwrap()
        }

        fn execution_mode(&self) -> ExecutionMode {
            ExecutionMode::Cpu
        }

        fn loading_progress(&self) -> f32 {
            100.0
        }

        fn error_message(&self) -> Option<String> {
            None
        }
    }

    fn host_with_stub(fail_load: bool, models_dir: &Path) -> ModelHost {
        let factory: ProviderFactory =
            Arc::new(move |_id: &str| Arc::new(StubProvider::new(fail_load)) as _);
        ModelHost::with_factory(
            &ModelConfig::default(),
            models_dir,
            "default-model".to_owned(),
            factory,
        )
    }

    fn make_model(root: &Path, name: &str) {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("config.json"), "{}").unwrap();
    }

    #[tokio::test]
    async fn ensure_loaded_boots_the_default_model() {
        let dir = tempfile::tempdir().unwrap();
        let host = host_with_stub(false, dir.path());
        assert!(!host.is_loaded());

        let active = host.ensure_loaded().await.unwrap();
        assert_eq!(active.model_id, "default-model");
        assert!(host.is_loaded());
        assert_eq!(host.active_model_id().as_deref(), Some("default-model"));
    }

    #[tokio::test]
    async fn ensure_loaded_failure_reports_model_not_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let host = host_with_stub(true, dir.path());
        let err = host.ensure_loaded().await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ModelNotLoaded);
        assert!(host.active().is_none());
    }

    #[tokio::test]
    async fn switch_to_catalog_model_publishes_it() {
        let dir = tempfile::tempdir().unwrap();
        make_model(dir.path(), "m1");
        let host = host_with_stub(false, dir.path());
        let queue = TranslationQueue::new(1, 1);

        host.switch_model("m1", false, &queue).await.unwrap();
        assert_eq!(host.active_model_id().as_deref(), Some("m1"));
        assert!(host.is_loaded());
    }

    #[tokio::test]
    async fn switch_to_unknown_model_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let host = host_with_stub(false, dir.path());
        let queue = TranslationQueue::new(1, 1);
        let err = host.switch_model("ghost", false, &queue).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ModelNotFound);
    }

    #[tokio::test]
    async fn switch_with_invalid_id_is_rejected_before_io() {
        let dir = tempfile::tempdir().unwrap();
        let host = host_with_stub(false, dir.path());
        let queue = TranslationQueue::new(1, 1);
        let err = host
            .switch_model("../escape", false, &queue)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ModelInvalidId);
    }

    #[tokio::test]
    async fn switch_under_load_is_rejected_without_force() {
        let dir = tempfile::tempdir().unwrap();
        make_model(dir.path(), "m1");
        let host = host_with_stub(false, dir.path());
        let queue = TranslationQueue::new(2, 2);
        queue.acquire_slot("busy");

        let err = host.switch_model("m1", false, &queue).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ModelSwitchRejected);

        // force overrides the busy check.
        host.switch_model("m1", true, &queue).await.unwrap();
        assert_eq!(host.active_model_id().as_deref(), Some("m1"));
    }

    #[tokio::test]
    async fn failed_switch_leaves_slot_empty() {
        let dir = tempfile::tempdir().unwrap();
        make_model(dir.path(), "m1");
        make_model(dir.path(), "m2");
        let host = host_with_stub(false, dir.path());
        let queue = TranslationQueue::new(1, 1);
        host.switch_model("m1", false, &queue).await.unwrap();

        // Swap the factory path by building a failing host sharing the slot
        // is not possible; emulate by switching with a failing factory host.
        let failing = host_with_stub(true, dir.path());
        let err = failing.switch_model("m2", false, &queue).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ModelSwitchFailed);
        assert!(failing.active().is_none());
        assert_eq!(failing.status(), ProviderStatus::NotLoaded);
    }

    #[tokio::test]
    async fn unload_empties_the_slot() {
        let dir = tempfile::tempdir().unwrap();
        let host = host_with_stub(false, dir.path());
        host.ensure_loaded().await.unwrap();
        host.unload().await;
        assert!(host.active().is_none());
        assert_eq!(host.status(), ProviderStatus::NotLoaded);
        // Repeated unload is a no-op.
        host.unload().await;
    }

    #[test]
    fn generation_params_pick_up_config_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ModelConfig::default();
        config.generation.high.max_new_tokens = Some(1024);
        let factory: ProviderFactory =
            Arc::new(|_id: &str| Arc::new(StubProvider::new(false)) as _);
        let host = ModelHost::with_factory(&config, dir.path(), "d".to_owned(), factory);

        let params = host.generation_params(QualityMode::High);
        assert_eq!(params.max_new_tokens, 1024);
        assert_eq!(params.num_beams, 4);
    }
}
