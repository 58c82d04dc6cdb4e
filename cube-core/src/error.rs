// Copyright 2026 the Cube authors. MIT license.

use thiserror::Error;

/// The error kinds of §7: every failure mode a dispatcher can observe when
/// driving a Worker. Dispatchers translate these to HTTP status codes;
/// `require` callers see them as thrown script exceptions.
#[derive(Debug, Error)]
pub enum CubeError {
    #[error("artifact not found: {name} ({kind})")]
    NotFound { name: String, kind: &'static str },

    #[error("method not allowed")]
    MethodNotAllowed,

    #[error("service unavailable")]
    ServiceUnavailable,

    #[error("{0}")]
    Timeout(&'static str),

    #[error("{0}")]
    Cancelled(&'static str),

    #[error("{message}")]
    ScriptException { code: String, message: String },

    #[error("native error: {0}")]
    Native(#[from] anyhow::Error),

    #[error("internal panic: {0}")]
    InternalPanic(String),

    #[error(transparent)]
    Store(#[from] rusqlite::Error),
}

impl CubeError {
    /// The `(code, message)` pair the HTTP dispatcher writes into the error
    /// envelope (§6, §7). A plain `ScriptException` thrown as `{code, message}`
    /// overrides the defaults; everything else maps to a fixed code.
    pub fn envelope(&self) -> (String, String) {
        match self {
            CubeError::ScriptException { code, message } => (code.clone(), message.clone()),
            other => ("1".to_string(), other.to_string()),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, CubeError::Timeout(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, CubeError::Cancelled(_))
    }
}

pub type CubeResult<T> = Result<T, CubeError>;
