//! Structured reporting of soft failures.
//!
//! Merges never fail loudly on bad data. Each refused field or dropped
//! operation becomes a [`Diagnostic`], which is logged through `tracing` and
//! handed to the registry's [`DiagnosticSink`], if one is installed.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// How serious a diagnostic is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Expected under normal feed skew; the operation was skipped.
    Warning,
    /// Data or usage that should not happen; the offending part was refused.
    Error,
}

/// Why a diagnostic was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticReason {
    /// A field is not described by the schema and forward feed is off.
    UnknownField,
    /// A value does not validate against its schema type.
    TypeMismatch,
    /// A create walked through a missing schema'd intermediate node.
    MissingObjectInPath,
    /// A create targeted a path that already holds data.
    PathAlreadyExists,
    /// The target of a create is not an object.
    NotAContainer,
    /// A create was given fields that are not an object.
    NonObjectFields,
    /// An update targeted a missing path without upsert semantics.
    MissingPath,
    /// An update carried a sub-object where sub-object creation is off.
    SubObjectNotAllowed,
    /// A remove walked through a missing schema'd parent.
    MissingParent,
    /// A masked read does not match the store's schema.
    ProjectionMismatch,
    /// An unmasked read copied a large object.
    LargeUnmaskedRead,
    /// Recomputing a watched projection was slow.
    SlowProjection,
}

impl DiagnosticReason {
    /// Returns the default severity for this reason.
    pub fn severity(self) -> Severity {
        match self {
            DiagnosticReason::MissingObjectInPath
            | DiagnosticReason::PathAlreadyExists
            | DiagnosticReason::MissingPath
            | DiagnosticReason::MissingParent
            | DiagnosticReason::LargeUnmaskedRead
            | DiagnosticReason::SlowProjection => Severity::Warning,
            DiagnosticReason::UnknownField
            | DiagnosticReason::TypeMismatch
            | DiagnosticReason::NotAContainer
            | DiagnosticReason::NonObjectFields
            | DiagnosticReason::SubObjectNotAllowed
            | DiagnosticReason::ProjectionMismatch => Severity::Error,
        }
    }

    /// Returns the snake_case name of this reason.
    pub fn as_str(self) -> &'static str {
        match self {
            DiagnosticReason::UnknownField => "unknown_field",
            DiagnosticReason::TypeMismatch => "type_mismatch",
            DiagnosticReason::MissingObjectInPath => "missing_object_in_path",
            DiagnosticReason::PathAlreadyExists => "path_already_exists",
            DiagnosticReason::NotAContainer => "not_a_container",
            DiagnosticReason::NonObjectFields => "non_object_fields",
            DiagnosticReason::MissingPath => "missing_path",
            DiagnosticReason::SubObjectNotAllowed => "sub_object_not_allowed",
            DiagnosticReason::MissingParent => "missing_parent",
            DiagnosticReason::ProjectionMismatch => "projection_mismatch",
            DiagnosticReason::LargeUnmaskedRead => "large_unmasked_read",
            DiagnosticReason::SlowProjection => "slow_projection",
        }
    }
}

impl fmt::Display for DiagnosticReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single soft failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// How serious the failure is.
    pub severity: Severity,
    /// The operation that raised it, such as `merge.update` or `store.get_data`.
    pub operation: String,
    /// Slash-joined path the operation targeted.
    pub path: String,
    /// Why it was raised.
    pub reason: DiagnosticReason,
    /// Key of the client that issued the change, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_key: Option<String>,
    /// Extra context, such as the refused value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

impl Diagnostic {
    /// Creates a diagnostic with the reason's default severity.
    pub fn new(operation: impl Into<String>, path: impl Into<String>, reason: DiagnosticReason) -> Self {
        Self {
            severity: reason.severity(),
            operation: operation.into(),
            path: path.into(),
            reason,
            client_key: None,
            detail: None,
        }
    }

    /// Sets the client key.
    #[must_use]
    pub fn with_client_key(mut self, client_key: Option<&str>) -> Self {
        self.client_key = client_key.map(str::to_string);
        self
    }

    /// Sets the extra context.
    #[must_use]
    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }

    /// Logs this diagnostic and hands it to `sink`.
    pub fn emit(self, sink: Option<&dyn DiagnosticSink>) {
        match self.severity {
            Severity::Warning => tracing::warn!(
                operation = %self.operation,
                path = %self.path,
                reason = %self.reason,
                client_key = ?self.client_key,
                "{}",
                self.reason
            ),
            Severity::Error => tracing::error!(
                operation = %self.operation,
                path = %self.path,
                reason = %self.reason,
                client_key = ?self.client_key,
                "{}",
                self.reason
            ),
        }
        if let Some(sink) = sink {
            sink.report(&self);
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        write!(f, "{level}: {} at '{}': {}", self.operation, self.path, self.reason)
    }
}

/// Receives every diagnostic raised by a registry.
///
/// Merge diagnostics are reported while the registry is locked, so a sink
/// must not call back into the store that raised them.
pub trait DiagnosticSink: Send + Sync {
    /// Called once per diagnostic, after it has been logged.
    fn report(&self, diagnostic: &Diagnostic);
}

/// A sink that keeps every diagnostic in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    entries: Mutex<Vec<Diagnostic>>,
}

impl CollectingSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns everything collected so far.
    pub fn take(&self) -> Vec<Diagnostic> {
        std::mem::take(&mut *self.entries.lock())
    }

    /// Returns a copy of everything collected so far.
    pub fn snapshot(&self) -> Vec<Diagnostic> {
        self.entries.lock().clone()
    }

    /// Returns the number of collected diagnostics.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if nothing was collected.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Returns the reasons of everything collected so far, in order.
    pub fn reasons(&self) -> Vec<DiagnosticReason> {
        self.entries.lock().iter().map(|d| d.reason).collect()
    }
}

impl DiagnosticSink for CollectingSink {
    fn report(&self, diagnostic: &Diagnostic) {
        self.entries.lock().push(diagnostic.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn collecting_sink_records() {
        let sink = CollectingSink::new();
        Diagnostic::new("merge.create", "s/x", DiagnosticReason::PathAlreadyExists)
            .with_client_key(Some("c1"))
            .emit(Some(&sink));
        Diagnostic::new("merge.update", "s/x/count", DiagnosticReason::TypeMismatch)
            .with_detail(json!("five"))
            .emit(Some(&sink));

        assert_eq!(sink.len(), 2);
        assert_eq!(
            sink.reasons(),
            vec![DiagnosticReason::PathAlreadyExists, DiagnosticReason::TypeMismatch]
        );
        let all = sink.take();
        assert_eq!(all[0].severity, Severity::Warning);
        assert_eq!(all[0].client_key.as_deref(), Some("c1"));
        assert_eq!(all[1].severity, Severity::Error);
        assert!(sink.is_empty());
    }

    #[test]
    fn serializes_snake_case() {
        let d = Diagnostic::new("merge.remove", "s/a", DiagnosticReason::MissingParent);
        let v = serde_json::to_value(&d).unwrap();
        assert_eq!(v["reason"], json!("missing_parent"));
        assert_eq!(v["severity"], json!("warning"));
        assert!(v.get("client_key").is_none());
    }

    #[test]
    fn display() {
        let d = Diagnostic::new("merge.update", "s/x", DiagnosticReason::MissingPath);
        assert_eq!(d.to_string(), "warning: merge.update at 's/x': missing_path");
    }
}
