//! Error types for the schema crate.

use thiserror::Error;

/// Result type for schema operations.
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Errors that can occur while building schemas or validating projections.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// A schema description could not be interpreted.
    #[error("invalid schema at '{path}': {message}")]
    InvalidSchema {
        /// Slash-joined location inside the description.
        path: String,
        /// Description of the problem.
        message: String,
    },

    /// A leaf type name is not recognised.
    #[error("unknown field type: {name}")]
    UnknownType {
        /// The offending type name.
        name: String,
    },

    /// A mask description could not be interpreted.
    #[error("invalid mask: {message}")]
    InvalidMask {
        /// Description of the problem.
        message: String,
    },

    /// A read path or mask does not match the schema.
    #[error("projection does not match schema at '{path}': {message}")]
    ProjectionMismatch {
        /// Slash-joined location of the mismatch.
        path: String,
        /// Description of the mismatch.
        message: String,
    },
}

impl SchemaError {
    /// Creates an invalid schema error.
    pub fn invalid_schema(path: &[String], message: impl Into<String>) -> Self {
        Self::InvalidSchema {
            path: path.join("/"),
            message: message.into(),
        }
    }

    /// Creates an unknown type error.
    pub fn unknown_type(name: impl Into<String>) -> Self {
        Self::UnknownType { name: name.into() }
    }

    /// Creates an invalid mask error.
    pub fn invalid_mask(message: impl Into<String>) -> Self {
        Self::InvalidMask {
            message: message.into(),
        }
    }

    /// Creates a projection mismatch error.
    pub fn projection_mismatch(path: &[String], message: impl Into<String>) -> Self {
        Self::ProjectionMismatch {
            path: path.join("/"),
            message: message.into(),
        }
    }
}
