//! CLI command implementations.

pub mod defaults;
pub mod replay;
pub mod validate;

use reactdb_core::CoreError;
use reactdb_schema::{SchemaError, SchemaNode};
use serde_json::Value;
use std::io::{self, Write};
use std::path::Path;
use thiserror::Error;

/// Result type for CLI commands.
pub type CliResult<T> = Result<T, CliError>;

/// Errors a command can fail with.
#[derive(Debug, Error)]
pub enum CliError {
    /// An input file could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// The file that was read.
        path: String,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// An input file is not valid JSON.
    #[error("invalid JSON in {path}: {source}")]
    Json {
        /// The file that was parsed.
        path: String,
        /// Underlying parse error.
        source: serde_json::Error,
    },

    /// A line of an action log could not be used.
    #[error("line {line}: {message}")]
    InvalidAction {
        /// One-based line number.
        line: usize,
        /// Description of the problem.
        message: String,
    },

    /// A path does not exist in the schema.
    #[error("path '{path}' is not in the schema")]
    UnknownSchemaPath {
        /// The requested path.
        path: String,
    },

    /// The document did not fit the schema.
    #[error("validation failed with {count} problem(s)")]
    ValidationFailed {
        /// Number of diagnostics raised.
        count: usize,
    },

    /// The schema description is invalid.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// The store refused an operation.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Output could not be written.
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

/// How command output is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable lines.
    Text,
    /// One JSON document per line.
    Json,
}

impl OutputFormat {
    /// Parses a format name; anything but `json` is text.
    pub fn from_name(name: &str) -> Self {
        if name.eq_ignore_ascii_case("json") {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

/// Reads a whole file as text.
pub fn read_text(path: &Path) -> CliResult<String> {
    std::fs::read_to_string(path).map_err(|source| CliError::Read {
        path: path.display().to_string(),
        source,
    })
}

/// Reads and parses a JSON file.
pub fn load_json(path: &Path) -> CliResult<Value> {
    let text = read_text(path)?;
    serde_json::from_str(&text).map_err(|source| CliError::Json {
        path: path.display().to_string(),
        source,
    })
}

/// Reads and parses a schema description file.
pub fn load_schema(path: &Path) -> CliResult<SchemaNode> {
    let desc = load_json(path)?;
    Ok(SchemaNode::from_json(&desc)?)
}

/// Splits a slash-separated path, ignoring empty segments.
pub fn split_path(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

/// Writes `value` as one compact JSON line.
pub fn write_json_line(out: &mut dyn Write, value: &Value) -> CliResult<()> {
    writeln!(out, "{value}")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_path_ignores_empty_segments() {
        assert_eq!(split_path("/drafts//d1/"), vec!["drafts", "d1"]);
        assert!(split_path("").is_empty());
    }

    #[test]
    fn format_names() {
        assert_eq!(OutputFormat::from_name("json"), OutputFormat::Json);
        assert_eq!(OutputFormat::from_name("JSON"), OutputFormat::Json);
        assert_eq!(OutputFormat::from_name("text"), OutputFormat::Text);
    }
}
