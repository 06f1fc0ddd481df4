//! Replay command implementation.
//!
//! Applies an action log to a single store and reports, in order, the
//! diagnostics each action raised and the change batches delivered to the
//! watched paths.

use super::{
    load_schema, read_text, split_path, write_json_line, CliError, CliResult, OutputFormat,
};
use parking_lot::Mutex;
use reactdb_core::{
    Change, ChangeOptions, CollectingSink, DataStore, Diagnostic, Mask, MergeAction,
    StoreOptions, Watcher,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

/// Options for the replay command.
#[derive(Debug, Clone)]
pub struct ReplayOptions {
    /// Schema description file.
    pub schema: PathBuf,
    /// Name of the store the actions target.
    pub store: String,
    /// Action log, one JSON action per line.
    pub actions: PathBuf,
    /// Slash-separated paths inside the store to watch.
    pub watches: Vec<String>,
    /// Accept fields the schema does not know.
    pub forward_feed: bool,
    /// Deliver once at the end instead of after every line.
    pub batch: bool,
}

/// One line of an action log. `path` is relative to the store.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ActionRecord {
    action: MergeAction,
    #[serde(default)]
    path: Vec<String>,
    #[serde(default)]
    fields: Value,
    #[serde(default)]
    client_key: Option<String>,
}

/// A batch delivered to one watched path.
struct Delivery {
    watch: String,
    changes: Vec<Change>,
}

/// Summary of a finished replay.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplaySummary {
    /// Number of actions applied.
    pub applied: usize,
    /// Number of actions that changed the document.
    pub changed: usize,
    /// Number of diagnostics raised.
    pub diagnostics: usize,
    /// Number of batches delivered to watchers.
    pub deliveries: usize,
    /// The store's document after the last action.
    pub document: Option<Value>,
}

/// Runs the replay command.
pub fn run(
    options: &ReplayOptions,
    format: OutputFormat,
    out: &mut dyn Write,
) -> CliResult<ReplaySummary> {
    let schema = load_schema(&options.schema)?;
    let log = read_text(&options.actions)?;

    let sink = Arc::new(CollectingSink::new());
    let store = DataStore::builder().diagnostics(sink.clone()).build();
    store.register_store(
        &options.store,
        StoreOptions::new()
            .schema(schema)
            .forward_feed(options.forward_feed),
        None,
    )?;

    let delivered: Arc<Mutex<Vec<Delivery>>> = Arc::new(Mutex::new(Vec::new()));
    let mut watchers = Vec::with_capacity(options.watches.len());
    for label in &options.watches {
        let mut path = vec![options.store.clone()];
        path.extend(split_path(label));

        let target = delivered.clone();
        let watch = label.clone();
        let watcher = Watcher::new(0, false, move |_, changes| {
            target.lock().push(Delivery {
                watch: watch.clone(),
                changes: changes.to_vec(),
            });
        });
        store.add_watch(&watcher, &path, &Mask::Full, None)?;
        watchers.push(watcher);
    }

    let mut summary = ReplaySummary {
        applied: 0,
        changed: 0,
        diagnostics: 0,
        deliveries: 0,
        document: None,
    };

    for (index, text) in log.lines().enumerate() {
        let line = index + 1;
        if text.trim().is_empty() {
            continue;
        }
        let record: ActionRecord =
            serde_json::from_str(text).map_err(|e| CliError::InvalidAction {
                line,
                message: e.to_string(),
            })?;

        let mut path = vec![options.store.clone()];
        path.extend(record.path);
        let change_options = ChangeOptions {
            client_key: record.client_key,
            ..ChangeOptions::default()
        };
        let changed = store
            .change_data(record.action, &path, record.fields, &change_options)
            .map_err(|e| CliError::InvalidAction {
                line,
                message: e.to_string(),
            })?;
        tracing::debug!(line, action = %record.action, changed, "Applied action");

        summary.applied += 1;
        if changed {
            summary.changed += 1;
        }
        let diagnostics = sink.take();
        summary.diagnostics += diagnostics.len();
        write_diagnostics(out, format, line, &diagnostics)?;

        if !options.batch {
            store.flush_now();
            summary.deliveries += write_deliveries(out, format, Some(line), &delivered)?;
        }
    }

    if options.batch {
        store.flush_now();
        summary.deliveries += write_deliveries(out, format, None, &delivered)?;
    }

    summary.document = store.get_raw_data(&[options.store.as_str()])?;
    write_document(out, format, &summary)?;

    for watcher in &watchers {
        watcher.destroy();
    }
    tracing::info!(
        applied = summary.applied,
        changed = summary.changed,
        diagnostics = summary.diagnostics,
        deliveries = summary.deliveries,
        "Replay finished"
    );
    Ok(summary)
}

fn write_diagnostics(
    out: &mut dyn Write,
    format: OutputFormat,
    line: usize,
    diagnostics: &[Diagnostic],
) -> CliResult<()> {
    for diagnostic in diagnostics {
        match format {
            OutputFormat::Json => write_json_line(
                out,
                &json!({ "event": "diagnostic", "line": line, "diagnostic": diagnostic }),
            )?,
            OutputFormat::Text => writeln!(out, "line {line}: {diagnostic}")?,
        }
    }
    Ok(())
}

fn write_deliveries(
    out: &mut dyn Write,
    format: OutputFormat,
    line: Option<usize>,
    delivered: &Mutex<Vec<Delivery>>,
) -> CliResult<usize> {
    let batches: Vec<Delivery> = std::mem::take(&mut *delivered.lock());
    for batch in &batches {
        match format {
            OutputFormat::Json => write_json_line(
                out,
                &json!({
                    "event": "delivery",
                    "line": line,
                    "watch": batch.watch,
                    "changes": batch.changes,
                }),
            )?,
            OutputFormat::Text => {
                let origin = line.map_or_else(|| "end".to_string(), |l| format!("line {l}"));
                for change in &batch.changes {
                    let data = change
                        .data
                        .as_ref()
                        .map_or_else(|| "(none)".to_string(), Value::to_string);
                    writeln!(out, "{origin}: watch '{}' saw {} = {data}", batch.watch, change.path_str)?;
                }
            }
        }
    }
    Ok(batches.len())
}

fn write_document(out: &mut dyn Write, format: OutputFormat, summary: &ReplaySummary) -> CliResult<()> {
    let document = summary.document.clone().unwrap_or(Value::Null);
    match format {
        OutputFormat::Json => write_json_line(
            out,
            &json!({
                "event": "document",
                "applied": summary.applied,
                "changed": summary.changed,
                "document": document,
            }),
        ),
        OutputFormat::Text => {
            writeln!(
                out,
                "Applied {} action(s), {} changed the document",
                summary.applied, summary.changed
            )?;
            let text = serde_json::to_string_pretty(&document).map_err(std::io::Error::from)?;
            writeln!(out, "{text}")?;
            Ok(())
        }
    }
}
