//! Error types for the local store.

use crate::id::ObjectId;
use faultline_codec::CodecError;
use std::io;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in local store operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Record payload could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// I/O error while reading or writing a snapshot file.
    #[error("I/O error: {message}")]
    Io {
        /// Description of the failure.
        message: String,
    },

    /// The model failed validation.
    #[error("invalid model: {message}")]
    InvalidModel {
        /// Description of the problem.
        message: String,
    },

    /// Entity is not declared in the model.
    #[error("unknown entity: {entity}")]
    UnknownEntity {
        /// Entity name.
        entity: String,
    },

    /// Attribute is not declared on the entity.
    #[error("unknown attribute {entity}.{attribute}")]
    UnknownAttribute {
        /// Entity name.
        entity: String,
        /// Attribute name.
        attribute: String,
    },

    /// Relationship is not declared on the entity.
    #[error("unknown relationship {entity}.{relationship}")]
    UnknownRelationship {
        /// Entity name.
        entity: String,
        /// Relationship name.
        relationship: String,
    },

    /// A record violates its entity schema.
    #[error("schema violation on {entity}: {message}")]
    SchemaViolation {
        /// Entity name.
        entity: String,
        /// Description of the violation.
        message: String,
    },

    /// Object does not exist.
    #[error("object not found: {0}")]
    ObjectNotFound(ObjectId),

    /// A resource identifier is already bound to a different object.
    #[error("resource {entity}/{resource_id} already bound to {existing}")]
    DuplicateResource {
        /// Entity name.
        entity: String,
        /// Resource identifier.
        resource_id: String,
        /// Object currently holding the identifier.
        existing: ObjectId,
    },

    /// Snapshot bytes are malformed or were written for another model.
    #[error("invalid snapshot: {message}")]
    InvalidSnapshot {
        /// Description of the problem.
        message: String,
    },
}

impl StoreError {
    /// Create an invalid model error.
    pub fn invalid_model(message: impl Into<String>) -> Self {
        Self::InvalidModel {
            message: message.into(),
        }
    }

    /// Create a schema violation error.
    pub fn schema_violation(entity: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SchemaViolation {
            entity: entity.into(),
            message: message.into(),
        }
    }

    /// Create an invalid snapshot error.
    pub fn invalid_snapshot(message: impl Into<String>) -> Self {
        Self::InvalidSnapshot {
            message: message.into(),
        }
    }

    /// Create an unknown entity error.
    pub fn unknown_entity(entity: impl Into<String>) -> Self {
        Self::UnknownEntity {
            entity: entity.into(),
        }
    }
}

impl From<io::Error> for StoreError {
    fn from(err: io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}
