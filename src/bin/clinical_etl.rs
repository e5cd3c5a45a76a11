//! clinical-etl CLI
//!
//! Generates mapping templates from a schema and converts tabular clinical data to JSON.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clinical_etl::convert::{output_stem, write_artifacts, Conversion};
use clinical_etl::execution::ExecutionOptions;
use clinical_etl::manifest::Manifest;
use clinical_etl::schema::SchemaDocument;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "clinical-etl")]
#[command(about = "Map tabular clinical data onto a nested JSON schema")]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default mapping template for a schema
    Template {
        /// Schema document (JSON or YAML)
        #[arg(short, long)]
        schema: PathBuf,
        /// Root component of the schema
        #[arg(short, long)]
        root: Option<String>,
        /// Output file; prints to stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Convert input data using a manifest
    Convert {
        /// Manifest file (YAML)
        #[arg(short, long)]
        manifest: PathBuf,
        /// Directory of CSV files, a CSV file or a workbook
        #[arg(short, long)]
        input: PathBuf,
        /// Artifact stem; defaults to the input path without extension
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Evaluate subjects on this many threads
        #[arg(short, long)]
        threads: Option<usize>,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn run(cli: Cli) -> Result<i32, Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Template { schema, root, output } => {
            let document = SchemaDocument::from_path(&schema)?;
            let text = document.template(root.as_deref())?.render();
            match output {
                Some(path) => {
                    std::fs::write(&path, text)?;
                    println!("Template written to {}", path.display());
                }
                None => print!("{text}"),
            }
            Ok(0)
        }

        Commands::Convert {
            manifest,
            input,
            output,
            threads,
        } => {
            let manifest = Manifest::from_path(&manifest)?;
            let conversion = Conversion::new(manifest).with_execution(ExecutionOptions {
                num_threads: threads,
            });
            let result = conversion.run(&input)?;

            let stem = output.unwrap_or_else(|| output_stem(&input));
            for path in write_artifacts(&result, &stem)? {
                println!("{}", path.display());
            }

            println!(
                "{} packets, {} dropped, {} mapping diagnostics, {} validation errors, {} warnings",
                result.packets.len(),
                result.dropped.len(),
                result.diagnostics.len(),
                result.report.errors.len(),
                result.report.warnings.len()
            );
            if result.report.is_valid() {
                Ok(0)
            } else {
                for issue in &result.report.errors {
                    eprintln!("  {issue}");
                }
                Ok(2)
            }
        }
    }
}
