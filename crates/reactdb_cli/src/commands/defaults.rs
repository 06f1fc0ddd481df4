//! Defaults command implementation.

use super::{load_schema, split_path, write_json_line, CliError, CliResult, OutputFormat};
use std::io::Write;
use std::path::Path;

/// Runs the defaults command.
pub fn run(
    schema_path: &Path,
    path: Option<&str>,
    format: OutputFormat,
    out: &mut dyn Write,
) -> CliResult<()> {
    let schema = load_schema(schema_path)?;
    let keys = path.map(split_path).unwrap_or_default();
    let node = schema
        .for_path(&keys)
        .ok_or_else(|| CliError::UnknownSchemaPath {
            path: keys.join("/"),
        })?;
    let defaults = node.defaults(true);

    match format {
        OutputFormat::Json => write_json_line(out, &defaults)?,
        OutputFormat::Text => {
            let text = serde_json::to_string_pretty(&defaults).map_err(std::io::Error::from)?;
            writeln!(out, "{text}")?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reactdb_testkit::{drafts_schema, TempFiles};
    use serde_json::{json, Value};

    fn run_to_json(path: Option<&str>) -> CliResult<Value> {
        let files = TempFiles::new();
        let schema = files.write_json("schema.json", &drafts_schema());
        let mut out = Vec::new();
        run(&schema, path, OutputFormat::Json, &mut out)?;
        Ok(serde_json::from_slice(&out).unwrap())
    }

    #[test]
    fn prints_materialized_defaults() {
        let defaults = run_to_json(None).unwrap();
        assert_eq!(defaults["x"], json!({ "count": 0 }));
        assert_eq!(defaults["drafts"], json!({}));
        assert_eq!(defaults["tags"], json!([]));
        assert_eq!(defaults["settings"]["theme"], json!("LIGHT"));
    }

    #[test]
    fn prints_defaults_below_a_path() {
        assert_eq!(run_to_json(Some("x")).unwrap(), json!({ "count": 0 }));
        assert!(matches!(
            run_to_json(Some("nope/deeper")),
            Err(CliError::UnknownSchemaPath { .. })
        ));
    }

    #[test]
    fn text_output_is_pretty() {
        let files = TempFiles::new();
        let schema = files.write_json("schema.json", &json!({ "n": "INT" }));
        let mut out = Vec::new();
        run(&schema, None, OutputFormat::Text, &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "{\n  \"n\": 0\n}\n");
    }
}
