//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation. Bus-protocol
//! failures that are reported as values travel as [`Status`]; this enum covers
//! the failures that abort an operation instead.

use super::status::Status;
use thiserror::Error;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the bridge.
#[derive(Error, Debug)]
pub enum Error {
    /// A managed reference that must be present was null.
    #[error("null reference: {0}")]
    NullReference(String),

    /// A managed exception is pending on the current thread. No further boundary
    /// calls are made until it is cleared.
    #[error("managed exception pending: {0}")]
    ExceptionPending(String),

    /// A required reflective entry point (class, method, field) could not be resolved.
    #[error("unresolved entry point: {0}")]
    Resolution(String),

    /// Native allocation failure.
    #[error("out of memory: {0}")]
    OutOfMemory(String),

    /// A value could not be converted between the managed and native type systems.
    #[error("marshal error: {0}")]
    Marshal(String),

    /// Malformed type signature.
    #[error("invalid signature: {0}")]
    Signature(String),

    /// Bus-protocol failure surfaced as a thrown error.
    #[error("bus error: {0}")]
    Bus(Status),

    /// Remote peer replied with the generic bus exception.
    #[error("bus exception: {0}")]
    BusException(String),

    /// Remote peer replied with a named error.
    #[error("error reply {name}: {message}")]
    ErrorReply { name: String, message: String },

    /// Validation errors.
    #[error("validation error: {0}")]
    Validation(String),

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid adapter state transition.
    #[error("state transition error: {0}")]
    StateTransition(String),

    /// Internal errors.
    #[error("internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Convert to the closest bus status code.
    pub fn to_status(&self) -> Status {
        match self {
            Error::Bus(status) => *status,
            Error::OutOfMemory(_) => Status::OutOfMemory,
            Error::Marshal(_) => Status::BusBadValue,
            Error::Signature(_) => Status::BusBadSignature,
            Error::BusException(_) | Error::ErrorReply { .. } => Status::BusReplyIsErrorMessage,
            Error::NotFound(_) => Status::BusNoSuchObject,
            Error::NullReference(_)
            | Error::ExceptionPending(_)
            | Error::Resolution(_)
            | Error::Validation(_)
            | Error::StateTransition(_)
            | Error::Internal(_)
            | Error::Serialization(_)
            | Error::Io(_) => Status::Fail,
        }
    }
}

// Convenience constructors
impl Error {
    pub fn null_reference(msg: impl Into<String>) -> Self {
        Self::NullReference(msg.into())
    }

    pub fn exception_pending(msg: impl Into<String>) -> Self {
        Self::ExceptionPending(msg.into())
    }

    pub fn resolution(msg: impl Into<String>) -> Self {
        Self::Resolution(msg.into())
    }

    pub fn marshal(msg: impl Into<String>) -> Self {
        Self::Marshal(msg.into())
    }

    pub fn signature(msg: impl Into<String>) -> Self {
        Self::Signature(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn state_transition(msg: impl Into<String>) -> Self {
        Self::StateTransition(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl From<Status> for Error {
    fn from(status: Status) -> Self {
        Error::Bus(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_status_passes_bus_status_through() {
        let err = Error::Bus(Status::BusNoSession);
        assert_eq!(err.to_status(), Status::BusNoSession);
    }

    #[test]
    fn test_error_reply_display_carries_name() {
        let err = Error::ErrorReply {
            name: "org.example.Error.Denied".to_string(),
            message: "nope".to_string(),
        };
        assert_eq!(err.to_string(), "error reply org.example.Error.Denied: nope");
        assert_eq!(err.to_status(), Status::BusReplyIsErrorMessage);
    }

    #[test]
    fn test_boundary_failures_map_to_fail() {
        assert_eq!(Error::exception_pending("x").to_status(), Status::Fail);
        assert_eq!(Error::resolution("x").to_status(), Status::Fail);
        assert_eq!(Error::marshal("x").to_status(), Status::BusBadValue);
    }
}
