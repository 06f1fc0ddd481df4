//! Validate command implementation.

use super::{load_json, load_schema, write_json_line, CliError, CliResult, OutputFormat};
use reactdb_core::{CollectingSink, DataStore, Diagnostic, StoreOptions};
use serde_json::json;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

/// Store name the document is loaded under.
const DOCUMENT_STORE: &str = "document";

/// Replaces a fresh store's contents with the document and returns every
/// diagnostic that raised.
pub fn check(schema_path: &Path, data_path: &Path, forward_feed: bool) -> CliResult<Vec<Diagnostic>> {
    let schema = load_schema(schema_path)?;
    let data = load_json(data_path)?;

    let sink = Arc::new(CollectingSink::new());
    let store = DataStore::builder().diagnostics(sink.clone()).build();
    store.register_store(
        DOCUMENT_STORE,
        StoreOptions::new().schema(schema).forward_feed(forward_feed),
        None,
    )?;
    store.replace_data(&[DOCUMENT_STORE], data)?;
    Ok(sink.take())
}

/// Runs the validate command.
pub fn run(
    schema_path: &Path,
    data_path: &Path,
    forward_feed: bool,
    format: OutputFormat,
    out: &mut dyn Write,
) -> CliResult<()> {
    let diagnostics = check(schema_path, data_path, forward_feed)?;

    match format {
        OutputFormat::Json => write_json_line(
            out,
            &json!({ "valid": diagnostics.is_empty(), "diagnostics": diagnostics }),
        )?,
        OutputFormat::Text => {
            for diagnostic in &diagnostics {
                writeln!(out, "{diagnostic}")?;
            }
            if diagnostics.is_empty() {
                writeln!(out, "✓ Document matches schema")?;
            } else {
                writeln!(out, "✗ {} problem(s) found", diagnostics.len())?;
            }
        }
    }

    if diagnostics.is_empty() {
        Ok(())
    } else {
        Err(CliError::ValidationFailed {
            count: diagnostics.len(),
        })
    }
}
