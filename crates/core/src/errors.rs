use thiserror::Error;

use crate::domain::session::SessionState;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid session transition from {from:?} to {to:?}")]
    InvalidSessionTransition { from: SessionState, to: SessionState },
    #[error("session is closed and accepts no further mutations")]
    SessionClosed,
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("concurrent update conflict on session {0}")]
    Conflict(String),
    #[error("session {0} is busy processing another message")]
    SessionBusy(String),
    #[error("interpretation failure: {0}")]
    Interpretation(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("retryable: {message}")]
    Retryable { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    /// Safe to echo back over the chat channel. Never contains internal
    /// detail; the correlation id is what operators grep the logs for.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "No pude procesar ese mensaje. Intenta reformularlo, por favor."
            }
            Self::Retryable { .. } => {
                "Estoy procesando otro mensaje tuyo. Envíalo de nuevo en un momento."
            }
            Self::ServiceUnavailable { .. } => {
                "El servicio no está disponible por el momento. Intenta de nuevo en unos minutos."
            }
            Self::Internal { .. } => "Ocurrió un error inesperado. Ya estamos revisándolo.",
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::Retryable { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        match value {
            ApplicationError::Domain(_) => Self::BadRequest {
                message: "request failed domain validation".to_owned(),
                correlation_id: "unassigned".to_owned(),
            },
            ApplicationError::Conflict(session) => Self::Retryable {
                message: format!("conflict on session {session}"),
                correlation_id: "unassigned".to_owned(),
            },
            ApplicationError::SessionBusy(session) => Self::Retryable {
                message: format!("session {session} busy"),
                correlation_id: "unassigned".to_owned(),
            },
            ApplicationError::Persistence(message)
            | ApplicationError::Interpretation(message)
            | ApplicationError::Integration(message) => {
                Self::ServiceUnavailable { message, correlation_id: "unassigned".to_owned() }
            }
            ApplicationError::Configuration(message) => {
                Self::Internal { message, correlation_id: "unassigned".to_owned() }
            }
        }
    }
}
