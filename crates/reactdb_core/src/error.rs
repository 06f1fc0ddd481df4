//! Error types for ReactDB core.

use reactdb_schema::SchemaError;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in ReactDB core operations.
///
/// These are usage errors. Data that does not fit a store's schema is never
/// an error; it is refused field by field and reported as a
/// [`Diagnostic`](crate::Diagnostic).
#[derive(Debug, Error)]
pub enum CoreError {
    /// Schema description or projection error.
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    /// No store is registered under this name.
    #[error("store not found: {name}")]
    UnknownStore {
        /// Name of the store.
        name: String,
    },

    /// A store is already registered under this name.
    #[error("store already registered: {name}")]
    DuplicateStore {
        /// Name of the store.
        name: String,
    },

    /// A path did not start with a store name.
    #[error("path is empty")]
    EmptyPath,

    /// A flush was requested while another is still outstanding.
    #[error("only one flush request is supported at a time")]
    FlushInProgress,

    /// A watch was added through a watcher outside its compute pass.
    #[error("watcher {watcher} is read-only")]
    ReadOnlyWatcher {
        /// The watcher's identifier.
        watcher: u64,
    },

    /// A server-data operation was called on an ordinary store.
    #[error("store is not server synced: {name}")]
    NotServerSynced {
        /// Name of the store.
        name: String,
    },

    /// An ordinary client change was attempted on a server-synced store.
    #[error("store is server synced, use the client or server change entry points: {name}")]
    ServerSyncedStore {
        /// Name of the store.
        name: String,
    },

    /// A schema-only operation was called on a store without a schema.
    #[error("store has no schema: {name}")]
    NoSchema {
        /// Name of the store.
        name: String,
    },

    /// `toggle_bool` was called on a value that is not a boolean.
    #[error("value at '{path}' is not a boolean")]
    NotABoolean {
        /// Slash-joined path of the value.
        path: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates an unknown store error.
    pub fn unknown_store(name: impl Into<String>) -> Self {
        Self::UnknownStore { name: name.into() }
    }

    /// Creates a not-server-synced error.
    pub fn not_server_synced(name: impl Into<String>) -> Self {
        Self::NotServerSynced { name: name.into() }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = CoreError::unknown_store("Drafts");
        assert_eq!(err.to_string(), "store not found: Drafts");

        let err = CoreError::ReadOnlyWatcher { watcher: 7 };
        assert_eq!(err.to_string(), "watcher 7 is read-only");
    }

    #[test]
    fn schema_error_converts() {
        let err: CoreError = SchemaError::unknown_type("FLOAT").into();
        assert!(matches!(err, CoreError::Schema(_)));
    }
}
