use tmpl_engine::{DocumentError, ParamError, RenderError};

use crate::gitops::GitError;
use crate::store::{ObjectKey, StoreError};

/// How a failed reconcile is handled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Malformed spec; fixed only by editing the resource
    Validation,
    /// Referenced template does not exist
    Reference,
    /// Target object already exists
    Conflict,
    /// Retried with backoff
    Transient,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error(transparent)]
    Param(#[from] ParamError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error("invalid object: {0}")]
    Document(#[from] DocumentError),
    #[error("{kind} {name} not found")]
    TemplateNotFound { kind: &'static str, name: String },
    #[error("{0} already exists")]
    AlreadyExists(ObjectKey),
    #[error("gitops: {0}")]
    Git(#[from] GitError),
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AlreadyExists(key) => Error::AlreadyExists(key),
            other => Error::Store(other),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Store(StoreError::Codec(err))
    }
}

impl Error {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::BadRequest(_)
            | Error::Param(_)
            | Error::Render(_)
            | Error::Document(_) => ErrorCategory::Validation,
            Error::TemplateNotFound { .. } => ErrorCategory::Reference,
            Error::AlreadyExists(_) => ErrorCategory::Conflict,
            Error::Store(StoreError::Codec(_) | StoreError::UnknownKind { .. }) => {
                ErrorCategory::Validation
            }
            Error::Git(_) | Error::Store(_) => ErrorCategory::Transient,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.category() != ErrorCategory::Transient
    }

    /// Machine-readable reason written into status conditions.
    pub fn reason(&self) -> &'static str {
        match self {
            Error::BadRequest(_) => "BadRequest",
            Error::Param(ParamError::MissingRequired(_)) => "MissingParameter",
            Error::Param(ParamError::RegexMismatch { .. }) => "RegexMismatch",
            Error::Param(_) => "InvalidParameter",
            Error::Render(_) => "RenderFailed",
            Error::Document(_) => "InvalidObject",
            Error::TemplateNotFound { .. } => "TemplateNotFound",
            Error::AlreadyExists(_) => "AlreadyExists",
            Error::Git(_) => "GitPushFailed",
            Error::Store(StoreError::UnknownKind { .. }) => "UnknownKind",
            Error::Store(_) => "ApplyFailed",
        }
    }
}
