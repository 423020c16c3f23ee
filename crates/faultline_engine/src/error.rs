//! Error types for the faulting engine.

use faultline_codec::CodecError;
use faultline_store::{ObjectId, StoreError};
use thiserror::Error;

/// Result type for engine operations.
pub type FaultResult<T> = Result<T, FaultError>;

/// Result type for representation mapping.
pub type MappingResult<T> = Result<T, MappingError>;

/// A response could not be mapped onto the model.
///
/// Mapping errors abort the merge transaction they occur in; nothing from
/// that response is written.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MappingError {
    /// The representation carries no usable resource identifier.
    #[error("{entity} representation has no resource identifier")]
    MissingIdentifier {
        /// Entity name.
        entity: String,
    },

    /// A value does not have the attribute's declared type.
    #[error("{entity}.{attribute} expects {expected}, found {found}")]
    TypeMismatch {
        /// Entity name.
        entity: String,
        /// Attribute name.
        attribute: String,
        /// Declared type.
        expected: String,
        /// Kind of the value received.
        found: String,
    },

    /// The client produced an attribute the entity does not declare.
    #[error("{entity} has no attribute {attribute}")]
    UnknownAttribute {
        /// Entity name.
        entity: String,
        /// Attribute name.
        attribute: String,
    },

    /// The client produced a relationship the entity does not declare.
    #[error("{entity} has no relationship {relationship}")]
    UnknownRelationship {
        /// Entity name.
        entity: String,
        /// Relationship name.
        relationship: String,
    },

    /// A relationship value has the wrong shape for its cardinality.
    #[error("{entity}.{relationship} is {expected} but the response holds {found}")]
    ArityMismatch {
        /// Entity name.
        entity: String,
        /// Relationship name.
        relationship: String,
        /// Expected cardinality.
        expected: &'static str,
        /// What the response held.
        found: String,
    },

    /// The body or a nested value has an unusable shape.
    #[error("invalid {entity} representation: {message}")]
    InvalidRepresentation {
        /// Entity name.
        entity: String,
        /// Description of the problem.
        message: String,
    },
}

impl MappingError {
    /// Create an invalid representation error.
    pub fn invalid(entity: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidRepresentation {
            entity: entity.into(),
            message: message.into(),
        }
    }
}

/// Errors surfaced by the faulting engine.
///
/// Errors are `Clone` so one fetch outcome can be delivered to every caller
/// waiting on the same fault.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FaultError {
    /// Invalid configuration (empty store type, invalid model, bad URL).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The resource client does not provide a request builder.
    #[error("resource client does not implement {method}")]
    Unimplemented {
        /// Name of the missing operation.
        method: &'static str,
    },

    /// Network or transport failure.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the request can be retried.
        retryable: bool,
    },

    /// The server answered with a non-success status.
    #[error("request to {url} failed with status {status}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Requested URL or path.
        url: String,
    },

    /// The response could not be mapped.
    #[error("mapping error: {0}")]
    Mapping(#[from] MappingError),

    /// The local store rejected an operation.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A response body could not be decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The entity is not part of the model.
    #[error("unknown entity: {0}")]
    UnknownEntity(String),

    /// The relationship is not declared on the entity.
    #[error("unknown relationship {entity}.{relationship}")]
    UnknownRelationship {
        /// Entity name.
        entity: String,
        /// Relationship name.
        relationship: String,
    },

    /// The object does not exist locally.
    #[error("object not found: {0}")]
    ObjectNotFound(ObjectId),

    /// The fetch task ended without reporting an outcome.
    #[error("fetch abandoned before completion")]
    Abandoned,
}

/// Broad classification of a [`FaultError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Misconfiguration or misuse; fails immediately.
    Configuration,
    /// Request building, transport or server failure.
    Client,
    /// The response did not fit the model.
    Mapping,
    /// The local store failed.
    Store,
}

impl FaultError {
    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Classifies this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            FaultError::Configuration(_)
            | FaultError::Unimplemented { .. }
            | FaultError::UnknownEntity(_)
            | FaultError::UnknownRelationship { .. } => ErrorKind::Configuration,
            FaultError::Transport { .. }
            | FaultError::Status { .. }
            | FaultError::Codec(_)
            | FaultError::Abandoned => ErrorKind::Client,
            FaultError::Mapping(_) => ErrorKind::Mapping,
            FaultError::Store(_) | FaultError::ObjectNotFound(_) => ErrorKind::Store,
        }
    }

    /// Returns true if repeating the request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            FaultError::Transport { retryable, .. } => *retryable,
            FaultError::Status { status, .. } => *status >= 500 || *status == 429,
            FaultError::Abandoned => true,
            _ => false,
        }
    }
}
