//! `nlq` command-line front end
//!
//! Runs the translate / validate / fix / improve orchestrators against local
//! files and writes the resulting query to stdout or, with `--output`, to a
//! file through the exporter.

use clap::{Args, Parser, Subcommand};
use nlq_core::{
    describe_issues, fix, improve, translate, validate, Query, QueryGenerator, RepairExhaustedError, RepairOutcome,
    SchemaMapping, SchemaParseError, TranslationError,
};
use nlq_dsl::{export, export_to_file, ExportError, ExportFormat, InputFormatError};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::{Config, ConfigError};
use crate::llm::OpenAiGenerator;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid query in {path}: {source}")]
    Query {
        path: String,
        #[source]
        source: InputFormatError,
    },

    #[error("Invalid mapping in {path}: {source}")]
    Mapping {
        path: String,
        #[source]
        source: SchemaParseError,
    },

    #[error(transparent)]
    Translation(#[from] TranslationError),

    #[error(transparent)]
    Repair(#[from] RepairExhaustedError),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to write output: {0}")]
    Output(#[from] std::io::Error),
}

/// NLQ - natural language to Elasticsearch queries
#[derive(Parser, Debug)]
#[command(name = "nlq")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Translate natural language into validated Elasticsearch queries", long_about = None)]
pub struct Cli {
    /// Configuration file
    #[arg(global = true, long = "config", short = 'c', env = "NLQ_CONFIG", default_value = "config.yaml")]
    pub config: PathBuf,

    /// Log repair attempts to stderr
    #[arg(global = true, long = "verbose", short = 'v')]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Translate a natural-language question into a query
    Translate {
        /// The question to translate
        #[arg(value_name = "TEXT")]
        text: String,

        #[command(flatten)]
        mapping: MappingArg,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Validate a query file against a mapping
    Validate {
        /// JSON file holding the query
        #[arg(value_name = "QUERY_FILE")]
        query: PathBuf,

        #[command(flatten)]
        mapping: MappingArg,
    },

    /// Repair a query, optionally guided by the error the cluster reported
    Fix {
        #[arg(value_name = "QUERY_FILE")]
        query: PathBuf,

        /// Error message returned when the query was executed
        #[arg(long = "error", short = 'e')]
        error: Option<String>,

        #[command(flatten)]
        mapping: MappingArg,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Rewrite a working query towards a goal
    Improve {
        #[arg(value_name = "QUERY_FILE")]
        query: PathBuf,

        /// What to improve, e.g. "use filters instead of scoring"
        #[arg(long = "goal", short = 'g')]
        goal: Option<String>,

        #[command(flatten)]
        mapping: MappingArg,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Show the effective configuration
    Config,
}

impl Command {
    fn needs_generator(&self) -> bool {
        matches!(self, Command::Translate { .. } | Command::Fix { .. } | Command::Improve { .. })
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct MappingArg {
    /// JSON file holding the index mapping
    #[arg(long = "mapping", short = 'm', value_name = "MAPPING_FILE")]
    pub mapping: Option<PathBuf>,
}

impl MappingArg {
    fn load(&self) -> Result<SchemaMapping, CliError> {
        let Some(path) = &self.mapping else {
            return Ok(SchemaMapping::empty());
        };
        SchemaMapping::from_json_str(&read(path)?).map_err(|source| CliError::Mapping {
            path: path.display().to_string(),
            source,
        })
    }
}

#[derive(Args, Debug, Clone)]
pub struct OutputArgs {
    /// Write the query to this file instead of stdout
    #[arg(long = "output", short = 'o', value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output format: json or text
    #[arg(long = "format", short = 'f', default_value = "json")]
    pub format: ExportFormat,

    /// Single-line output
    #[arg(long = "compact")]
    pub compact: bool,
}

impl Default for OutputArgs {
    fn default() -> Self {
        Self {
            output: None,
            format: ExportFormat::Json,
            compact: false,
        }
    }
}

impl Cli {
    /// Run the selected command; `Ok(false)` means the command ran but the
    /// query did not pass
    pub async fn run(self) -> Result<bool, CliError> {
        init_logging(self.verbose);

        let config = Config::load(&self.config)?;
        let generator = if self.command.needs_generator() {
            let api_key = Config::get_openai_api_key()?;
            Some(OpenAiGenerator::new(&api_key, &config.llm))
        } else {
            None
        };

        let mut stdout = std::io::stdout();
        execute(
            self.command,
            &config,
            generator.as_ref().map(|g| g as &dyn QueryGenerator),
            &mut stdout,
        )
        .await
    }
}

fn init_logging(verbose: bool) {
    std::env::set_var("RUST_LOG", if verbose { "nlq_core=debug,info" } else { "warn" });
    std::env::set_var("LOG_OUTPUT", "stderr");
    crate::logging::init();
}

/// Run `command`, writing query output and reports to `out`
pub async fn execute(
    command: Command,
    config: &Config,
    generator: Option<&dyn QueryGenerator>,
    out: &mut dyn Write,
) -> Result<bool, CliError> {
    let options = config.repair_options();
    let missing_key = || CliError::Config(ConfigError::MissingEnvVar("OPENAI_API_KEY".to_string()));

    match command {
        Command::Translate { text, mapping, output } => {
            let generator = generator.ok_or_else(missing_key)?;
            let outcome = translate(&text, &mapping.load()?, generator, &options).await?;
            emit(&outcome, &output, out)?;
            Ok(true)
        }
        Command::Validate { query: path, mapping } => {
            let query = load_query(&path)?;
            let schema = mapping.load()?;
            let issues = validate(&query, &schema).map_err(|source| CliError::Query {
                path: path.display().to_string(),
                source,
            })?;
            if issues.is_empty() {
                writeln!(out, "Query is valid.")?;
                Ok(true)
            } else {
                writeln!(out, "Query is invalid:\n{}", describe_issues(&issues))?;
                Ok(false)
            }
        }
        Command::Fix {
            query,
            error,
            mapping,
            output,
        } => {
            let generator = generator.ok_or_else(missing_key)?;
            let query = load_query(&query)?;
            let outcome = fix(query, error.as_deref(), &mapping.load()?, generator, &options).await?;
            emit(&outcome, &output, out)?;
            Ok(true)
        }
        Command::Improve {
            query,
            goal,
            mapping,
            output,
        } => {
            let generator = generator.ok_or_else(missing_key)?;
            let query = load_query(&query)?;
            let outcome = improve(&query, goal.as_deref(), &mapping.load()?, generator, &options).await?;
            emit(&outcome, &output, out)?;
            Ok(true)
        }
        Command::Config => {
            show_config(config, std::env::var("OPENAI_API_KEY").ok().as_deref(), out)?;
            Ok(true)
        }
    }
}

fn read(path: &Path) -> Result<String, CliError> {
    std::fs::read_to_string(path).map_err(|source| CliError::Read {
        path: path.display().to_string(),
        source,
    })
}

fn load_query(path: &Path) -> Result<Query, CliError> {
    Query::parse(&read(path)?).map_err(|source| CliError::Query {
        path: path.display().to_string(),
        source,
    })
}

fn emit(outcome: &RepairOutcome, args: &OutputArgs, out: &mut dyn Write) -> Result<(), CliError> {
    let pretty = !args.compact;
    match &args.output {
        Some(path) => {
            export_to_file(&outcome.query, args.format, pretty, path)?;
            writeln!(out, "Wrote {} ({} repair attempt(s))", path.display(), outcome.attempts.len())?;
        }
        None => {
            let rendered = export(&outcome.query, args.format, pretty);
            write!(out, "{}", rendered)?;
            if !rendered.ends_with('\n') {
                writeln!(out)?;
            }
        }
    }
    Ok(())
}

fn show_config(config: &Config, api_key: Option<&str>, out: &mut dyn Write) -> Result<(), CliError> {
    let yaml = serde_yaml::to_string(config).map_err(ConfigError::from)?;
    write!(out, "{}", yaml)?;
    match api_key {
        Some(key) => writeln!(out, "OPENAI_API_KEY: {}", mask_key(key))?,
        None => writeln!(out, "OPENAI_API_KEY: not set")?,
    }
    Ok(())
}

/// First and last four characters of a secret, the rest starred
fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{}{}", head, "*".repeat(chars.len() - 8), tail)
}
