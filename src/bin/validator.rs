//! Schema Validate CLI
//!
//! Validates JSON instance files against a JSON Schema.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use familiar_validator::config::OutputFormat;
use familiar_validator::registry::schema_id;
use familiar_validator::{Checksum, Draft, SchemaValidator, ValidatorConfig};
use serde_json::{json, Value};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

#[derive(Parser)]
#[command(name = "schema-validate")]
#[command(about = "Validate JSON files against a JSON Schema")]
struct Cli {
    /// Schema file
    schema: PathBuf,

    /// Instance files to validate
    #[arg(required = true)]
    instances: Vec<PathBuf>,

    /// Report every error instead of stopping at the first
    #[arg(long)]
    all_errors: bool,

    /// Include the offending value and the expected constraint in errors
    #[arg(long)]
    verbose: bool,

    /// Draft used when the schema has no $schema (draft-07, 2020-12, ...)
    #[arg(long)]
    draft: Option<Draft>,

    /// Reject unknown keywords and formats
    #[arg(long, overrides_with = "no_strict")]
    strict: bool,

    /// Allow unknown keywords and formats
    #[arg(long = "no-strict")]
    no_strict: bool,

    /// Config file (validator.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory of extra schemas available to $ref
    #[arg(long = "schemas")]
    schemas: Vec<PathBuf>,

    /// Write a JSON report here
    #[arg(short, long)]
    report: Option<PathBuf>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<bool> {
    let config = ValidatorConfig::load_from(cli.config.as_deref().and_then(Path::to_str))?;

    let mut options = config.validator;
    if cli.all_errors {
        options.all_errors = true;
    }
    if cli.verbose {
        options.verbose = true;
    }
    if let Some(draft) = cli.draft {
        options.draft = draft;
    }
    if cli.strict {
        options.strict = true;
    }
    if cli.no_strict {
        options.strict = false;
    }

    let validator = SchemaValidator::new(options);

    let mut dirs = config.cli.schema_dirs;
    dirs.extend(cli.schemas);
    for dir in &dirs {
        let added = register_dir(&validator, dir)?;
        println!("📚 {} schema(s) registered from {}", added, dir.display());
    }

    let schema = read_json(&cli.schema)?;
    let checksum = Checksum::from_json(&schema);
    let compiled = validator.compile(&Arc::new(schema))?;

    let mut all_valid = true;
    let mut results = Vec::with_capacity(cli.instances.len());
    for path in &cli.instances {
        let data = read_json(path)?;
        let evaluation = compiled.evaluate(&data)?;
        if evaluation.valid {
            println!("✅ {}", path.display());
        } else {
            all_valid = false;
            println!("❌ {}", path.display());
            for error in &evaluation.errors {
                println!("   └─ {} {} ({})", error.data_path, error.message, error.schema_path);
            }
        }
        results.push(json!({
            "file": path.display().to_string(),
            "valid": evaluation.valid,
            "errors": evaluation.errors,
        }));
    }

    if let Some(report_path) = cli.report.or(config.cli.report) {
        let report = json!({
            "generated_at": chrono::Utc::now().to_rfc3339(),
            "schema": cli.schema.display().to_string(),
            "checksum": checksum.to_string(),
            "valid": all_valid,
            "results": results,
        });
        let content = match config.cli.output_format {
            OutputFormat::Pretty => serde_json::to_string_pretty(&report)?,
            OutputFormat::Compact => serde_json::to_string(&report)?,
        };
        std::fs::write(&report_path, content)?;
        println!("📄 Report written to {}", report_path.display());
    }

    Ok(all_valid)
}

fn read_json(path: &Path) -> anyhow::Result<Value> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("{}: {}", path.display(), e))?;
    serde_json::from_str(&content).map_err(|e| anyhow::anyhow!("{}: {}", path.display(), e))
}

/// Register every `.json` file under `dir`; files without `$id` are keyed by path
fn register_dir(validator: &SchemaValidator, dir: &Path) -> anyhow::Result<usize> {
    let mut added = 0;
    for entry in WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
        let path = entry.path();
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let schema = read_json(path)?;
        let key = schema_id(&schema).is_none().then(|| path.display().to_string());
        match validator.add_schema(schema, key.as_deref()) {
            Ok(key) => {
                debug!(key = %key, path = %path.display(), "Registered schema");
                added += 1;
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Skipping schema"),
        }
    }
    Ok(added)
}
