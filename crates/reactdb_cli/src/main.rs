//! ReactDB CLI
//!
//! Command-line tools for exercising ReactDB stores.
//!
//! # Commands
//!
//! - `replay` - Apply a JSON-lines action log and print what watchers saw
//! - `defaults` - Print the materialized defaults of a schema
//! - `validate` - Check a document against a schema

mod commands;

use clap::{Parser, Subcommand};
use commands::OutputFormat;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// ReactDB command-line tools.
#[derive(Parser)]
#[command(name = "reactdb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(global = true, short, long, default_value = "text", value_parser = ["text", "json"])]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply an action log to a store and print delivered changes
    Replay {
        /// Schema description file
        #[arg(long)]
        schema: PathBuf,

        /// Name of the store the actions target
        #[arg(long, default_value = "store")]
        store: String,

        /// Action log, one JSON action per line
        #[arg(long)]
        actions: PathBuf,

        /// Slash-separated path inside the store to watch (repeatable)
        #[arg(long = "watch")]
        watches: Vec<String>,

        /// Accept fields the schema does not know
        #[arg(long)]
        forward_feed: bool,

        /// Deliver once after the whole log instead of after every line
        #[arg(long)]
        batch: bool,
    },

    /// Print the materialized defaults of a schema
    Defaults {
        /// Schema description file
        #[arg(long)]
        schema: PathBuf,

        /// Slash-separated path inside the schema
        #[arg(long)]
        path: Option<String>,
    },

    /// Check a document against a schema
    Validate {
        /// Schema description file
        #[arg(long)]
        schema: PathBuf,

        /// Document to check
        #[arg(long)]
        data: PathBuf,

        /// Accept fields the schema does not know
        #[arg(long)]
        forward_feed: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let format = OutputFormat::from_name(&cli.format);
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    match cli.command {
        Commands::Replay {
            schema,
            store,
            actions,
            watches,
            forward_feed,
            batch,
        } => {
            let options = commands::replay::ReplayOptions {
                schema,
                store,
                actions,
                watches,
                forward_feed,
                batch,
            };
            commands::replay::run(&options, format, &mut out)?;
        }
        Commands::Defaults { schema, path } => {
            commands::defaults::run(&schema, path.as_deref(), format, &mut out)?;
        }
        Commands::Validate {
            schema,
            data,
            forward_feed,
        } => {
            commands::validate::run(&schema, &data, forward_feed, format, &mut out)?;
        }
    }

    Ok(())
}
