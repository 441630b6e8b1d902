use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{DocumentId, MessageId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidCredentials,
    NoActiveSession,
    UnknownDocument,
    NotFound,
    Conflict,
    Validation,
    TransportFailure,
    Persistence,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Why an analysis lookup came back empty. Views render "still processing"
/// differently from "no such document".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotFoundReason {
    Unknown,
    Processing,
    Failed,
}

impl fmt::Display for NotFoundReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            NotFoundReason::Unknown => "unknown document",
            NotFoundReason::Processing => "analysis still processing",
            NotFoundReason::Failed => "analysis failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("no active session")]
    NoActiveSession,
    #[error("unknown document {0}")]
    UnknownDocument(DocumentId),
    #[error("analysis for document {document_id} not available: {reason}")]
    NotFound {
        document_id: DocumentId,
        reason: NotFoundReason,
    },
    #[error("document {0} has already been resolved")]
    AlreadyResolved(DocumentId),
    #[error("an upload is already in flight for document {0}")]
    UploadInFlight(DocumentId),
    #[error("unknown message {message_id} in conversation for document {document_id}")]
    UnknownMessage {
        document_id: DocumentId,
        message_id: MessageId,
    },
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("transport failure: {0}")]
    TransportFailure(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl CoreError {
    pub fn not_found(document_id: DocumentId, reason: NotFoundReason) -> Self {
        Self::NotFound {
            document_id,
            reason,
        }
    }

    /// Wraps a collaborator failure, keeping the full context chain.
    pub fn transport(err: impl fmt::Display) -> Self {
        Self::TransportFailure(format!("{err:#}"))
    }

    pub fn persistence(err: impl fmt::Display) -> Self {
        Self::Persistence(format!("{err:#}"))
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            CoreError::InvalidCredentials => ErrorCode::InvalidCredentials,
            CoreError::NoActiveSession => ErrorCode::NoActiveSession,
            CoreError::UnknownDocument(_) => ErrorCode::UnknownDocument,
            CoreError::NotFound { .. } | CoreError::UnknownMessage { .. } => ErrorCode::NotFound,
            CoreError::AlreadyResolved(_) | CoreError::UploadInFlight(_) => ErrorCode::Conflict,
            CoreError::Validation(_) => ErrorCode::Validation,
            CoreError::TransportFailure(_) => ErrorCode::TransportFailure,
            CoreError::Persistence(_) => ErrorCode::Persistence,
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(value: CoreError) -> Self {
        Self {
            code: value.code(),
            message: value.to_string(),
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
