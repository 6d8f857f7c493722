//! Model catalog: on-demand scan of the models directory.
//!
//! A model is one subdirectory of the models root whose name passes
//! [`validate_model_id`] and which contains a readable `config.json`. The
//! catalog never caches — every call re-scans, so dropping a directory in or
//! out takes effect immediately.

use crate::error::{ErrorCode, GatewayError, Result};
use serde::Serialize;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Metadata file a model directory must carry to be listed.
const REQUIRED_CONFIG_FILENAME: &str = "config.json";

/// Characters that would make a model id unsafe as a single path segment.
const WINDOWS_RESERVED: [char; 7] = [':', '<', '>', '"', '|', '?', '*'];

/// One entry of the catalog.
#[derive(Debug, Clone, Serialize)]
pub struct ModelEntry {
    pub model_id: String,
    pub display_name: String,
    pub has_config: bool,
    #[serde(skip)]
    pub path: PathBuf,
}

/// Validate that `model_id` is safe to use as a single directory name.
///
/// Rejects empty ids, `.`/`..`, path separators, NUL bytes, reserved
/// characters and home-directory shorthand.
pub fn validate_model_id(model_id: &str) -> Result<&str> {
    let model_id = model_id.trim();
    if model_id.is_empty() {
        return Err(GatewayError::with_message(
            ErrorCode::ModelInvalidId,
            "model_id 不可為空",
        ));
    }
    if model_id == "." || model_id == ".." || model_id.contains("..") {
        return Err(GatewayError::with_message(
            ErrorCode::ModelInvalidId,
            "model_id 不可包含 ..",
        ));
    }
    if model_id.contains('/') || model_id.contains('\\') || model_id.contains('\0') {
        return Err(GatewayError::with_message(
            ErrorCode::ModelInvalidId,
            "model_id 不可包含路徑分隔符",
        ));
    }
    if model_id.contains(WINDOWS_RESERVED) {
        return Err(GatewayError::with_message(
            ErrorCode::ModelInvalidId,
            "model_id 包含不允許的字元",
        ));
    }
    if model_id.starts_with('~') {
        return Err(GatewayError::with_message(
            ErrorCode::ModelInvalidId,
            "model_id 不可為絕對或特殊路徑",
        ));
    }
    Ok(model_id)
}

/// Enumerate available models under `models_dir`, sorted case-insensitively.
pub fn list_models(models_dir: &Path) -> Vec<ModelEntry> {
    let entries = match std::fs::read_dir(models_dir) {
        Ok(entries) => entries,
        Err(_) => {
            warn!("models directory unavailable: {}", models_dir.display());
            return Vec::new();
        }
    };

    let mut dirs: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort_by_key(|p| {
        p.file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default()
    });

    let mut models = Vec::new();
    for dir in dirs {
        let Some(name) = dir.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };

        let model_id = match validate_model_id(&name) {
            Ok(id) => id.to_owned(),
            Err(_) => {
                warn!("skipping invalid model directory name: {name}");
                continue;
            }
        };

        let config_path = dir.join(REQUIRED_CONFIG_FILENAME);
        if !config_path.is_file() || File::open(&config_path).is_err() {
            continue;
        }

        models.push(ModelEntry {
            display_name: model_id.clone(),
            model_id,
            has_config: true,
            path: dir,
        });
    }

    models
}

/// Look up one model by id. Validates the id before touching the filesystem.
pub fn find_model(models_dir: &Path, model_id: &str) -> Result<ModelEntry> {
    let model_id = validate_model_id(model_id)?;
    list_models(models_dir)
        .into_iter()
        .find(|m| m.model_id == model_id)
        .ok_or_else(|| GatewayError::new(ErrorCode::ModelNotFound))
}
