//! ncube command line
//!
//! Inspect and evaluate cubes stored in their JSON form.
//!
//! # Usage
//!
//! ```bash
//! # Content hash of a cube
//! ncube hash rates.json
//!
//! # Evaluate at a coordinate, following @Cube references into other files
//! ncube get rates.json --coord state=OH --coord age=42 --with tax.json --trace
//!
//! # Required / optional input keys and referenced cubes
//! ncube scope rates.json
//! ncube refs rates.json
//!
//! # Canonical re-serialization
//! ncube fmt rates.json > rates.canonical.json
//! ```

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use ncube_core::{
    ApplicationId, ConfigLoader, Coordinate, CubeRegistry, NCube, Output, ProgramLibrary, Value,
};

#[derive(Parser)]
#[command(name = "ncube")]
#[command(version = "0.1.0")]
#[command(about = "Hash, evaluate and inspect n-cube JSON files")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(long, short = 'o', global = true, default_value = "text", value_enum)]
    format: OutputFormat,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the content hash
    Hash { file: PathBuf },

    /// Evaluate the cube at a coordinate
    Get {
        file: PathBuf,

        /// Coordinate entry as key=value (repeatable)
        #[arg(short, long = "coord", value_name = "KEY=VALUE")]
        coord: Vec<String>,

        /// Other cube files the cube may reference
        #[arg(short, long = "with", value_name = "FILE")]
        with: Vec<PathBuf>,

        /// Print the executed bindings
        #[arg(long)]
        trace: bool,
    },

    /// Print required and optional input keys
    Scope { file: PathBuf },

    /// Print cubes referenced by the cube's programs
    Refs { file: PathBuf },

    /// Re-serialize in canonical form
    Fmt { file: PathBuf },
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Hash { ref file } => cmd_hash(file, cli.format),
        Commands::Get {
            ref file,
            ref coord,
            ref with,
            trace,
        } => cmd_get(file, coord, with, trace, cli.format),
        Commands::Scope { ref file } => cmd_scope(file, cli.format),
        Commands::Refs { ref file } => cmd_refs(file, cli.format),
        Commands::Fmt { ref file } => cmd_fmt(file),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if cli.format == OutputFormat::Json {
                println!("{}", serde_json::json!({ "error": format!("{:#}", e) }));
            } else {
                eprintln!("error: {:#}", e);
            }
            ExitCode::FAILURE
        }
    }
}

// =============================================================================
// COMMANDS
// =============================================================================

fn cmd_hash(file: &Path, format: OutputFormat) -> Result<()> {
    let cube = load_cube(file, &ProgramLibrary::new())?;
    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::json!({ "ncube": cube.name(), "sha": cube.content_hash() })
        ),
        OutputFormat::Text => println!("{}  {}", cube.content_hash(), cube.name()),
    }
    Ok(())
}

fn cmd_get(
    file: &Path,
    coord: &[String],
    with: &[PathBuf],
    trace: bool,
    format: OutputFormat,
) -> Result<()> {
    let config = ConfigLoader::from_env().load()?;
    let registry = CubeRegistry::new(ProgramLibrary::new()).with_config(config);
    let app = ApplicationId::new("local", "cli", "0.0.0");

    let cube = registry.insert(&app, load_cube(file, registry.library())?);
    for other in with {
        registry.insert(&app, load_cube(other, registry.library())?);
    }

    let input = parse_coordinate(coord)?;
    debug!(cube = cube.name(), input = %input, "evaluating");
    let mut output = Output::new();
    let value = registry.get_cell(&app, cube.name(), &input, &mut output)?;

    match format {
        OutputFormat::Json => {
            let mut doc = serde_json::json!({ "value": serde_json::to_value(&value)? });
            if trace {
                doc["ruleInfo"] = serde_json::to_value(&output.rule_info)?;
                doc["bindings"] = output
                    .rule_info
                    .bindings()
                    .iter()
                    .map(|b| serde_json::Value::String(b.to_string()))
                    .collect();
            }
            println!("{}", serde_json::to_string_pretty(&doc)?);
        }
        OutputFormat::Text => {
            println!("{}", value);
            if trace {
                for binding in output.rule_info.bindings() {
                    println!("  {}", binding);
                }
                if output.rule_info.rule_stopped {
                    println!("  (stopped)");
                }
            }
        }
    }
    Ok(())
}

fn cmd_scope(file: &Path, format: OutputFormat) -> Result<()> {
    let cube = load_cube(file, &ProgramLibrary::new())?;
    let required = cube.required_scope();
    let optional = cube.optional_scope();
    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::json!({ "required": required, "optional": optional })
        ),
        OutputFormat::Text => {
            println!("required: {}", join(&required));
            println!("optional: {}", join(&optional));
        }
    }
    Ok(())
}

fn cmd_refs(file: &Path, format: OutputFormat) -> Result<()> {
    let cube = load_cube(file, &ProgramLibrary::new())?;
    let refs = cube.referenced_cube_names();
    match format {
        OutputFormat::Json => println!("{}", serde_json::json!(refs)),
        OutputFormat::Text => {
            for name in refs {
                println!("{}", name);
            }
        }
    }
    Ok(())
}

fn cmd_fmt(file: &Path) -> Result<()> {
    let cube = load_cube(file, &ProgramLibrary::new())?;
    println!("{}", cube.to_json()?);
    Ok(())
}

// =============================================================================
// HELPERS
// =============================================================================

fn load_cube(path: &Path, library: &ProgramLibrary) -> Result<NCube> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    NCube::from_json(&json, library).with_context(|| format!("Failed to load {}", path.display()))
}

fn parse_coordinate(entries: &[String]) -> Result<Coordinate> {
    let mut coordinate = Coordinate::new();
    for entry in entries {
        let (key, raw) = entry
            .split_once('=')
            .ok_or_else(|| anyhow!("Expected KEY=VALUE, got '{}'", entry))?;
        coordinate.insert(key.trim(), parse_scalar(raw.trim()));
    }
    Ok(coordinate)
}

/// Numbers and booleans are typed; everything else stays a string and is
/// promoted by the axis it binds against.
fn parse_scalar(raw: &str) -> Value {
    if raw.eq_ignore_ascii_case("null") {
        Value::Null
    } else if let Ok(n) = raw.parse::<i64>() {
        Value::Long(n)
    } else if let Ok(d) = raw.parse::<f64>() {
        Value::Double(d)
    } else if let Ok(b) = raw.parse::<bool>() {
        Value::Bool(b)
    } else {
        Value::from(raw)
    }
}

fn join(keys: &std::collections::BTreeSet<String>) -> String {
    keys.iter().cloned().collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use ncube_core::{Axis, ValueType};
    use std::io::Write;

    #[test]
    fn scalars_are_typed() {
        assert_eq!(parse_scalar("42"), Value::Long(42));
        assert_eq!(parse_scalar("1.5"), Value::Double(1.5));
        assert_eq!(parse_scalar("true"), Value::Bool(true));
        assert_eq!(parse_scalar("NULL"), Value::Null);
        assert_eq!(parse_scalar("OH"), Value::from("OH"));
    }

    #[test]
    fn coordinate_needs_key_value_pairs() {
        let coord = parse_coordinate(&["State=OH".into(), "age = 3".into()]).unwrap();
        assert_eq!(coord.get("state"), Some(&Value::from("OH")));
        assert_eq!(coord.get("AGE"), Some(&Value::Long(3)));
        assert!(parse_coordinate(&["nokey".into()]).is_err());
    }

    #[test]
    fn cube_file_loads() {
        let mut cube = NCube::new("Rates").unwrap();
        let mut axis = Axis::discrete("State", ValueType::String, false).unwrap();
        axis.add_column("OH").unwrap();
        cube.add_axis(axis).unwrap();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(cube.to_json().unwrap().as_bytes()).unwrap();

        let loaded = load_cube(file.path(), &ProgramLibrary::new()).unwrap();
        assert_eq!(loaded.content_hash(), cube.content_hash());
        assert!(load_cube(Path::new("/nonexistent/cube.json"), &ProgramLibrary::new()).is_err());
    }
}
