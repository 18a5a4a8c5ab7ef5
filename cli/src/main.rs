use std::cell::RefCell;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use mapping_engine_core::{
    analyze_payload, auto_mapping, execute, prepare_mapping, repair, validate, NoOracle, Oracle,
    RefinementOptions,
};
use serde_json::Value;
use tracing::level_filters::LevelFilter;

#[derive(Parser)]
#[command(name = "mapping-engine")]
#[command(about = "Map partner JSON payloads into canonical items via a declarative spec")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Fingerprint a payload's schema, sample preview rows, flag structural issues
    Analyze {
        /// Input payload file
        input: PathBuf,

        /// Output file (defaults to stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(long, value_enum, default_value_t = OutputFormat::Pretty)]
        format: OutputFormat,
    },

    /// Guess a mapping spec from a payload and target schema, no LLM involved
    AutoMap {
        /// Input payload file
        input: PathBuf,

        /// Target schema file (example shape or path-keyed map)
        #[arg(long)]
        target_schema: PathBuf,

        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(long, value_enum, default_value_t = OutputFormat::Pretty)]
        format: OutputFormat,
    },

    /// Coerce a spec fragment (normative, legacy, or raw LLM text) into the normative dialect
    Repair {
        /// Input mapping spec file (JSON object) or raw text file
        input: PathBuf,

        /// Target schema file, used to compute the allowed-targets filter
        #[arg(long)]
        target_schema: Option<PathBuf>,

        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(long, value_enum, default_value_t = OutputFormat::Pretty)]
        format: OutputFormat,
    },

    /// Report every structural problem in a normative mapping spec
    Validate {
        /// Input mapping spec file
        input: PathBuf,
    },

    /// Run a mapping spec against a payload and print canonical items
    Execute {
        /// Input payload file
        input: PathBuf,

        /// Mapping spec file
        #[arg(long)]
        spec: PathBuf,

        /// Target schema file, used to derive canonical field paths
        #[arg(long)]
        target_schema: Option<PathBuf>,

        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(long, value_enum, default_value_t = OutputFormat::Pretty)]
        format: OutputFormat,
    },

    /// Produce a ready-to-execute mapping spec, optionally refining it with an oracle
    Prepare {
        /// Input payload file
        input: PathBuf,

        /// Target schema file
        #[arg(long)]
        target_schema: PathBuf,

        /// Partner-supplied mapping spec file, if any (legacy or normative dialect)
        #[arg(long)]
        spec: Option<PathBuf>,

        /// Enable the refinement loop
        #[arg(long, default_value_t = false)]
        refine: bool,

        /// Bound on refinement iterations, clamped to [1, 5]
        #[arg(long, default_value_t = 3)]
        max_iterations: usize,

        /// JSON array of canned oracle responses, consumed one per call, most-recent-first
        #[arg(long)]
        oracle_file: Option<PathBuf>,

        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(long, value_enum, default_value_t = OutputFormat::Pretty)]
        format: OutputFormat,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum OutputFormat {
    Pretty,
    Compact,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Analyze { input, output, format } => {
            let payload = read_json(&input)?;
            let analysis = analyze_payload(&payload);
            write_json(&analysis.to_json(), output.as_ref(), format)?;
        }

        Commands::AutoMap { input, target_schema, output, format } => {
            let payload = read_json(&input)?;
            let target_schema = read_json(&target_schema)?;
            let spec = auto_mapping(&payload, &target_schema);
            write_json(&spec, output.as_ref(), format)?;
        }

        Commands::Repair { input, target_schema, output, format } => {
            let fragment = read_json_or_text(&input)?;
            let allowed = match target_schema {
                Some(path) => {
                    let schema = read_json(&path)?;
                    Some(canonical_targets(&schema))
                }
                None => None,
            };
            let (repaired, notes) = repair(&fragment, allowed.as_ref());
            for note in &notes {
                eprintln!("repair: {note}");
            }
            match repaired {
                Some(spec) => write_json(&spec, output.as_ref(), format)?,
                None => anyhow::bail!("Unable to recover a mapping spec from the given input"),
            }
        }

        Commands::Validate { input } => {
            let spec = read_json(&input)?;
            let errors = validate(&spec);
            if errors.is_empty() {
                println!("ok");
            } else {
                for error in &errors {
                    println!("{error}");
                }
                anyhow::bail!("mapping spec failed validation ({} error(s))", errors.len());
            }
        }

        Commands::Execute { input, spec, target_schema, output, format } => {
            let payload = read_json(&input)?;
            let spec = read_json(&spec)?;
            let canonical_paths: Vec<String> = match target_schema {
                Some(path) => canonical_targets(&read_json(&path)?),
                None => Vec::new(),
            };
            let result = execute(&spec, &canonical_paths, &payload)
                .map_err(|e| anyhow::Error::msg(e.to_string()).context("Execution failed"))?;
            write_json(&result, output.as_ref(), format)?;
        }

        Commands::Prepare {
            input,
            target_schema,
            spec,
            refine,
            max_iterations,
            oracle_file,
            output,
            format,
        } => {
            let payload = read_json(&input)?;
            let target_schema = read_json(&target_schema)?;
            let partner_spec = spec.map(|p| read_json(&p)).transpose()?;

            let refinement = RefinementOptions { enabled: refine, max_iterations }.normalized();
            let file_oracle;
            let oracle: &dyn Oracle = match oracle_file {
                Some(path) => {
                    file_oracle = FileOracle::load(&path)?;
                    &file_oracle
                }
                None => &NoOracle,
            };

            let prepared = prepare_mapping(partner_spec.as_ref(), &payload, &target_schema, refinement, oracle);
            write_json(&prepared, output.as_ref(), format)?;
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Oracle adapter
// ---------------------------------------------------------------------------

/// A deterministic [`Oracle`] for demonstration and integration testing:
/// reads a JSON array of canned string responses from a file and returns
/// one per call (last element first), returning `None` once exhausted.
struct FileOracle {
    responses: RefCell<Vec<String>>,
}

impl FileOracle {
    fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read oracle file: {}", path.display()))?;
        let responses: Vec<String> = serde_json::from_str(&raw)
            .with_context(|| format!("Oracle file must be a JSON array of strings: {}", path.display()))?;
        Ok(FileOracle { responses: RefCell::new(responses) })
    }
}

impl Oracle for FileOracle {
    fn complete(&self, _prompt: &str) -> Option<String> {
        self.responses.borrow_mut().pop()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn canonical_targets(target_schema: &Value) -> Vec<String> {
    let flattened = mapping_engine_core::flatten_target_schema(target_schema);
    mapping_engine_core::canonical_item_paths(&flattened)
}

/// Read and parse JSON from a file path.
fn read_json(input: &Path) -> Result<Value> {
    let file = File::open(input)
        .with_context(|| format!("Failed to open input file: {}", input.display()))?;
    let reader = BufReader::new(file);
    serde_json::from_reader(reader)
        .with_context(|| format!("Failed to parse JSON from: {}", input.display()))
}

/// Read a file as JSON if it parses, otherwise as raw text — used by
/// `repair`, which accepts prose-wrapped LLM output as well as JSON.
fn read_json_or_text(input: &Path) -> Result<Value> {
    let raw = std::fs::read_to_string(input)
        .with_context(|| format!("Failed to read input file: {}", input.display()))?;
    match serde_json::from_str::<Value>(&raw) {
        Ok(value) => Ok(value),
        Err(_) => Ok(Value::String(raw)),
    }
}

fn write_json<T: serde::Serialize>(val: &T, path: Option<&PathBuf>, format: OutputFormat) -> Result<()> {
    let mut writer: Box<dyn Write> = if let Some(p) = path {
        let file = File::create(p)
            .with_context(|| format!("Failed to create output file: {}", p.display()))?;
        Box::new(BufWriter::new(file))
    } else {
        Box::new(BufWriter::new(io::stdout()))
    };

    match format {
        OutputFormat::Pretty => {
            serde_json::to_writer_pretty(&mut writer, val).context("Failed to write JSON")?;
        }
        OutputFormat::Compact => {
            serde_json::to_writer(&mut writer, val).context("Failed to write JSON")?;
        }
    }
    writeln!(writer).context("Failed to write trailing newline")?;
    Ok(())
}
