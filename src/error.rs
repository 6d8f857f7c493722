//! Error taxonomy for the translation gateway.
//!
//! Every failure that crosses the service boundary is a [`GatewayError`]
//! carrying a stable [`ErrorCode`], a pre-localised operator message and the
//! HTTP status the code maps to. Handlers render the error envelope from it;
//! nothing else escapes the service.

use serde::Serialize;

/// Stable error codes with their canonical HTTP mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation (400)
    ValidationEmptyText,
    ValidationTextTooLong,
    ValidationSameLanguage,
    ValidationInvalidLanguage,
    InvalidJson,
    ModelInvalidId,

    // Not found (404)
    RequestNotFound,
    ModelNotFound,

    // Conflict (409)
    ModelSwitchInProgress,
    ModelSwitchRejected,

    // Forbidden (403)
    AccessDenied,

    // Unavailable (503) / gateway timeout (504)
    QueueFull,
    ServiceUnavailable,
    ModelNotLoaded,
    NetworkError,
    TranslationTimeout,

    // Internal (500)
    ModelSwitchFailed,
    InternalError,
}

impl ErrorCode {
    /// Wire identifier, e.g. `"QUEUE_FULL"`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ValidationEmptyText => "VALIDATION_EMPTY_TEXT",
            Self::ValidationTextTooLong => "VALIDATION_TEXT_TOO_LONG",
            Self::ValidationSameLanguage => "VALIDATION_SAME_LANGUAGE",
            Self::ValidationInvalidLanguage => "VALIDATION_INVALID_LANGUAGE",
            Self::InvalidJson => "INVALID_JSON",
            Self::ModelInvalidId => "MODEL_INVALID_ID",
            Self::RequestNotFound => "REQUEST_NOT_FOUND",
            Self::ModelNotFound => "MODEL_NOT_FOUND",
            Self::ModelSwitchInProgress => "MODEL_SWITCH_IN_PROGRESS",
            Self::ModelSwitchRejected => "MODEL_SWITCH_REJECTED",
            Self::AccessDenied => "ACCESS_DENIED",
            Self::QueueFull => "QUEUE_FULL",
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            Self::ModelNotLoaded => "MODEL_NOT_LOADED",
            Self::NetworkError => "NETWORK_ERROR",
            Self::TranslationTimeout => "TRANSLATION_TIMEOUT",
            Self::ModelSwitchFailed => "MODEL_SWITCH_FAILED",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Canonical operator-facing message for the code.
    pub fn message(self) -> &'static str {
        match self {
            Self::ValidationEmptyText => "請輸入要翻譯的文字",
            Self::ValidationTextTooLong => "文字長度超過 10,000 字元，請縮短後再試",
            Self::ValidationSameLanguage => "來源語言與目標語言不可相同",
            Self::ValidationInvalidLanguage => "無效的語言代碼",
            Self::InvalidJson => "請求格式錯誤，無法解析 JSON",
            Self::ModelInvalidId => "模型識別不合法",
            Self::RequestNotFound => "找不到指定的請求",
            Self::ModelNotFound => "找不到指定模型",
            Self::ModelSwitchInProgress => "模型切換中，請稍後再試",
            Self::ModelSwitchRejected => "模型切換被拒絕，請稍後再試",
            Self::AccessDenied => "IP 位址不在白名單中",
            Self::QueueFull => "系統繁忙，請稍後再試",
            Self::ServiceUnavailable => "翻譯服務暫時無法使用，請稍後再試",
            Self::ModelNotLoaded => "翻譯模型尚未載入，請稍後再試",
            Self::NetworkError => "網路連線失敗，請檢查網路狀態",
            Self::TranslationTimeout => "翻譯逾時，請嘗試縮短文字長度或稍後再試",
            Self::ModelSwitchFailed => "模型切換失敗",
            Self::InternalError => "系統內部錯誤，請聯繫管理員",
        }
    }

    /// HTTP status the code maps to.
    pub fn http_status(self) -> u16 {
        match self {
            Self::ValidationEmptyText
            | Self::ValidationTextTooLong
            | Self::ValidationSameLanguage
            | Self::ValidationInvalidLanguage
            | Self::InvalidJson
            | Self::ModelInvalidId => 400,
            Self::RequestNotFound | Self::ModelNotFound => 404,
            Self::ModelSwitchInProgress | Self::ModelSwitchRejected => 409,
            Self::AccessDenied => 403,
            Self::QueueFull
            | Self::ServiceUnavailable
            | Self::ModelNotLoaded
            | Self::NetworkError => 503,
            Self::TranslationTimeout => 504,
            Self::ModelSwitchFailed | Self::InternalError => 500,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The one failure type that crosses the service boundary.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{}: {message}", .code.as_str())]
pub struct GatewayError {
    pub code: ErrorCode,
    pub message: String,
}

impl GatewayError {
    /// Error with the code's canonical message.
    pub fn new(code: ErrorCode) -> Self {
        Self {
            code,
            message: code.message().to_owned(),
        }
    }

    /// Error with a more specific message than the canonical one.
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn http_status(&self) -> u16 {
        self.code.http_status()
    }
}

impl From<ErrorCode> for GatewayError {
    fn from(code: ErrorCode) -> Self {
        Self::new(code)
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(e: std::io::Error) -> Self {
        Self::with_message(ErrorCode::InternalError, format!("I/O error: {e}"))
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_map_to_expected_status() {
        assert_eq!(ErrorCode::ValidationEmptyText.http_status(), 400);
        assert_eq!(ErrorCode::RequestNotFound.http_status(), 404);
        assert_eq!(ErrorCode::ModelSwitchRejected.http_status(), 409);
        assert_eq!(ErrorCode::AccessDenied.http_status(), 403);
        assert_eq!(ErrorCode::QueueFull.http_status(), 503);
        assert_eq!(ErrorCode::TranslationTimeout.http_status(), 504);
        assert_eq!(ErrorCode::ModelSwitchFailed.http_status(), 500);
    }

    #[test]
    fn canonical_message_is_attached() {
        let err = GatewayError::new(ErrorCode::QueueFull);
        assert_eq!(err.message, "系統繁忙，請稍後再試");
        assert_eq!(err.http_status(), 503);
    }

    #[test]
    fn custom_message_overrides_canonical() {
        let err = GatewayError::with_message(ErrorCode::ModelNotFound, "no such model: x");
        assert_eq!(err.code.as_str(), "MODEL_NOT_FOUND");
        assert_eq!(err.message, "no such model: x");
    }

    #[test]
    fn wire_identifiers_are_screaming_snake() {
        assert_eq!(
            ErrorCode::ModelSwitchInProgress.as_str(),
            "MODEL_SWITCH_IN_PROGRESS"
        );
        assert_eq!(ErrorCode::InvalidJson.as_str(), "INVALID_JSON");
    }
}
