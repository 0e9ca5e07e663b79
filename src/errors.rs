/// Domain-specific error types for hala
///
/// `HalaError` covers infrastructure failures (storage, providers, configuration).
/// Pipeline rejections are not errors: they are reported as `Rejection` values
/// carrying an `ErrorCode` and a bilingual message so callers can show them to users.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, thiserror::Error)]
pub enum HalaError {
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>
    },

    #[error("Record not found: {id}")]
    NotFound {
        id: String
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for HalaError {
    fn from(e: sqlx::Error) -> Self {
        HalaError::Storage(e.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for HalaError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        HalaError::Storage(format!("Migration failed: {}", e))
    }
}

impl From<crate::embedding::EmbeddingError> for HalaError {
    fn from(e: crate::embedding::EmbeddingError) -> Self {
        HalaError::Embedding(e.to_string())
    }
}

impl From<crate::llm::LlmError> for HalaError {
    fn from(e: crate::llm::LlmError) -> Self {
        HalaError::Llm(e.to_string())
    }
}

impl HalaError {
    /// Helper to create validation errors with field names
    ///
    /// Example:
    /// ```
    /// use hala_ai::errors::HalaError;
    /// let err = HalaError::validation("prompt", "Prompt cannot be empty");
    /// ```
    pub fn validation(field: &str, message: &str) -> Self {
        HalaError::Validation {
            message: message.to_string(),
            field: Some(field.to_string()),
        }
    }
}

/// Standardized error codes surfaced to API consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InjectionDetected,
    OutOfScope,
    SafetyViolation,
    RagFailure,
    LlmFailure,
    ProviderNotFound,
    ValidationError,
    InternalError,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::InjectionDetected => "INJECTION_DETECTED",
            ErrorCode::OutOfScope => "OUT_OF_SCOPE",
            ErrorCode::SafetyViolation => "SAFETY_VIOLATION",
            ErrorCode::RagFailure => "RAG_FAILURE",
            ErrorCode::LlmFailure => "LLM_FAILURE",
            ErrorCode::ProviderNotFound => "PROVIDER_NOT_FOUND",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        };
        write!(f, "{}", s)
    }
}

/// Message in Indonesian (`id`) and English (`en`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BilingualMessage {
    pub id: String,
    pub en: String,
}

impl BilingualMessage {
    pub fn new(id: impl Into<String>, en: impl Into<String>) -> Self {
        BilingualMessage { id: id.into(), en: en.into() }
    }
}

/// A user-facing refusal produced by a pipeline layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rejection {
    pub code: ErrorCode,
    pub message: BilingualMessage,
    pub suggested_action: Option<String>,
}

impl Rejection {
    pub fn new(
        code: ErrorCode,
        message_id: impl Into<String>,
        message_en: impl Into<String>,
        suggested_action: impl Into<String>,
    ) -> Self {
        Rejection {
            code,
            message: BilingualMessage::new(message_id, message_en),
            suggested_action: Some(suggested_action.into()),
        }
    }

    /// Rejection used when a layer fails for infrastructure reasons.
    pub fn internal(code: ErrorCode, detail: &str) -> Self {
        let (id, en, action) = match code {
            ErrorCode::RagFailure => (
                "Gagal mengambil konteks yang relevan dari basis pengetahuan.",
                "Failed to retrieve relevant context from knowledge base.",
                "Please try again or rephrase your question.",
            ),
            ErrorCode::LlmFailure => (
                "Gagal menghasilkan perjalanan. Silakan coba lagi.",
                "Failed to generate journey. Please try again.",
                "Please try again in a few moments.",
            ),
            _ => (
                "Terjadi kesalahan internal. Silakan coba lagi.",
                "An internal error occurred. Please try again.",
                "Please try again in a few moments.",
            ),
        };
        tracing::debug!(code = %code, detail, "Internal rejection");
        Rejection::new(code, id, en, action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_serializes_screaming_snake() {
        let json = serde_json::to_string(&ErrorCode::OutOfScope).unwrap();
        assert_eq!(json, "\"OUT_OF_SCOPE\"");
        assert_eq!(ErrorCode::InjectionDetected.to_string(), "INJECTION_DETECTED");
    }

    #[test]
    fn test_internal_rejection_uses_code_specific_message() {
        let r = Rejection::internal(ErrorCode::RagFailure, "connection refused");
        assert_eq!(r.code, ErrorCode::RagFailure);
        assert!(r.message.en.contains("knowledge base"));
        assert!(r.suggested_action.is_some());
    }
}
