// ABOUTME: Error types for the mirror engine and the remote billing client
// ABOUTME: Remote failures are classified once, at the HTTP boundary, into RemoteErrorKind

use std::fmt;

use mirror_store::StoreError;
use serde::Deserialize;
use thiserror::Error;

use crate::entity::EntityKind;

/// Classification of a failed provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    InvalidCard,
    RateLimited,
    InvalidRequest,
    Authentication,
    Connection,
    Provider,
}

impl RemoteErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteErrorKind::InvalidCard => "invalid-card",
            RemoteErrorKind::RateLimited => "rate-limited",
            RemoteErrorKind::InvalidRequest => "invalid-request",
            RemoteErrorKind::Authentication => "authentication-failure",
            RemoteErrorKind::Connection => "connection-failure",
            RemoteErrorKind::Provider => "provider-error",
        }
    }
}

impl fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A provider failure with everything the provider told us about it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub status: Option<u16>,
    pub error_type: Option<String>,
    pub code: Option<String>,
    pub param: Option<String>,
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(rename = "type")]
    error_type: Option<String>,
    code: Option<String>,
    param: Option<String>,
    message: Option<String>,
}

impl RemoteError {
    /// Build a classified error from a non-success HTTP answer.
    ///
    /// The provider's `type` field wins over the status code when both are
    /// present; a body that is not the provider's error envelope is kept
    /// verbatim as the message.
    pub fn classify(status: u16, body: &str) -> Self {
        let parsed = serde_json::from_str::<ErrorEnvelope>(body)
            .ok()
            .map(|envelope| envelope.error);

        let error_type = parsed.as_ref().and_then(|b| b.error_type.clone());
        let kind = match error_type.as_deref() {
            Some("card_error") => RemoteErrorKind::InvalidCard,
            Some("rate_limit_error") => RemoteErrorKind::RateLimited,
            Some("authentication_error") => RemoteErrorKind::Authentication,
            Some("invalid_request_error") => RemoteErrorKind::InvalidRequest,
            Some("api_connection_error") => RemoteErrorKind::Connection,
            _ => match status {
                402 => RemoteErrorKind::InvalidCard,
                429 => RemoteErrorKind::RateLimited,
                401 => RemoteErrorKind::Authentication,
                400 | 404 => RemoteErrorKind::InvalidRequest,
                _ => RemoteErrorKind::Provider,
            },
        };

        let message = match parsed.as_ref().and_then(|b| b.message.clone()) {
            Some(message) => message,
            None if body.trim().is_empty() => format!("provider answered HTTP {}", status),
            None => body.trim().to_string(),
        };

        Self {
            kind,
            status: Some(status),
            error_type,
            code: parsed.as_ref().and_then(|b| b.code.clone()),
            param: parsed.and_then(|b| b.param),
            message,
        }
    }

    /// Transport-level failure: the request never produced an HTTP answer.
    pub fn connection(message: impl Into<String>) -> Self {
        Self {
            kind: RemoteErrorKind::Connection,
            status: None,
            error_type: None,
            code: None,
            param: None,
            message: message.into(),
        }
    }

    /// The provider answered, but not with something we could read.
    pub fn provider(message: impl Into<String>) -> Self {
        Self {
            kind: RemoteErrorKind::Provider,
            status: None,
            error_type: None,
            code: None,
            param: None,
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == RemoteErrorKind::InvalidRequest && self.status == Some(404)
    }
}

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("mirror store error: {0}")]
    Store(#[from] StoreError),

    /// The remote object lacks a field its flattening depends on.
    #[error("{kind} object is missing required field `{field}`")]
    MissingField { kind: EntityKind, field: String },

    #[error("{kind} object has no usable key")]
    MissingKey { kind: EntityKind },

    /// Another full sync of the same kind took over an expired lease.
    #[error("full sync of {kind} lost its lease to another run")]
    LeaseLost { kind: EntityKind },

    #[error("unknown sync selector(s): {given}; valid selectors are: {valid}")]
    UnknownSelector { given: String, valid: String },

    #[error("{0}")]
    Unsupported(String),

    #[error("malformed payload: {0}")]
    Json(#[from] serde_json::Error),
}

impl MirrorError {
    /// Contract violations are programming errors and are never worth retrying.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            MirrorError::MissingField { .. } | MirrorError::MissingKey { .. }
        )
    }

    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            MirrorError::Remote(err) => Some(err),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, MirrorError>;
