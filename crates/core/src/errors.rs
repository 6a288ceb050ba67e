use thiserror::Error;

use crate::catalog::CatalogError;
use crate::config::ConfigError;

/// Failure talking to a generative or embedding backend over the wire.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("backend `{backend}` transport failure: {message}")]
    Transport { backend: &'static str, message: String },
    #[error("backend `{backend}` returned status {status}: {body}")]
    Status { backend: &'static str, status: u16, body: String },
    #[error("backend `{backend}` returned malformed output: {message}")]
    MalformedOutput { backend: &'static str, message: String },
}

impl BackendError {
    pub fn backend(&self) -> &'static str {
        match self {
            Self::Transport { backend, .. }
            | Self::Status { backend, .. }
            | Self::MalformedOutput { backend, .. } => backend,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EmbeddingError {
    #[error("embedding backend unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("embedding backend returned {got} vectors for {expected} inputs")]
    CountMismatch { expected: usize, got: usize },
    #[error("embedding worker pool failure: {0}")]
    Worker(String),
}

/// Error taxonomy of the routing core. Only `Configuration` ever reaches a
/// caller; the other variants are recovered inside the stage that raised them.
#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Configuration(#[from] CatalogError),
    #[error(transparent)]
    EmbeddingBackendUnavailable(#[from] EmbeddingError),
    #[error("classifier backend failure: {0}")]
    ClassifierBackendFailure(BackendError),
    #[error("generation backend failure: {0}")]
    GenerationBackendFailure(BackendError),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("unauthorized: {message}")]
    Unauthorized { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn bad_request(message: impl Into<String>, correlation_id: impl Into<String>) -> Self {
        Self::BadRequest { message: message.into(), correlation_id: correlation_id.into() }
    }

    pub fn unauthorized(correlation_id: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: "missing or invalid admin token".to_owned(),
            correlation_id: correlation_id.into(),
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::Unauthorized { .. } => "This operation requires an administrator token.",
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::Unauthorized { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::Unauthorized { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let unassigned = "unassigned".to_owned();
        match value {
            ApplicationError::Config(error) => {
                Self::Internal { message: error.to_string(), correlation_id: unassigned }
            }
            ApplicationError::Configuration(error) => {
                Self::Internal { message: error.to_string(), correlation_id: unassigned }
            }
            ApplicationError::EmbeddingBackendUnavailable(error) => {
                Self::ServiceUnavailable { message: error.to_string(), correlation_id: unassigned }
            }
            ApplicationError::ClassifierBackendFailure(error)
            | ApplicationError::GenerationBackendFailure(error) => {
                Self::ServiceUnavailable { message: error.to_string(), correlation_id: unassigned }
            }
        }
    }
}
