use std::{collections::BTreeMap, path::PathBuf};

use clap::{Args, Parser, Subcommand};

use crate::{
    fetch::DEFAULT_TIMEOUT_SECS,
    normalize::{Coercion, NormalizeOptions, SeparatorClass},
};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Load a KoboToolbox CSV export into a PostgreSQL table",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Fetch the export, normalize it and replace the destination table
    Run(RunArgs),
    /// Download the raw export without touching the database
    Fetch(FetchArgs),
    /// Normalize a saved export and write the cleaned CSV
    Normalize(NormalizeArgs),
    /// Print the SQL a run issues against the destination table
    Ddl(DdlArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Env file with credentials (defaults to ./.env when present)
    #[arg(long = "env-file")]
    pub env_file: Option<PathBuf>,
    /// Use a saved export instead of downloading one ('-' reads stdin)
    #[arg(short = 'i', long = "input")]
    pub input: Option<PathBuf>,
    /// Character encoding of --input (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// YAML file describing the destination schema, table and columns
    #[arg(long = "table-spec")]
    pub table_spec: Option<PathBuf>,
    /// HTTP timeout for the export request, in seconds
    #[arg(long = "timeout-secs", default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub timeout_secs: u64,
    /// Stop after normalizing and print the cleaned CSV instead of loading
    #[arg(long = "dry-run")]
    pub dry_run: bool,
    #[command(flatten)]
    pub normalize: NormalizeFlags,
}

#[derive(Debug, Args)]
pub struct FetchArgs {
    /// Env file with credentials (defaults to ./.env when present)
    #[arg(long = "env-file")]
    pub env_file: Option<PathBuf>,
    /// Where to write the export (stdout if omitted)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
    /// HTTP timeout for the export request, in seconds
    #[arg(long = "timeout-secs", default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub timeout_secs: u64,
}

#[derive(Debug, Args)]
pub struct NormalizeArgs {
    /// Saved export to normalize ('-' reads stdin)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Cleaned CSV destination (stdout if omitted)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// Delimiter for the cleaned CSV (defaults to ',')
    #[arg(long = "output-delimiter", value_parser = parse_delimiter, default_value = ",")]
    pub output_delimiter: u8,
    #[command(flatten)]
    pub normalize: NormalizeFlags,
}

#[derive(Debug, Args)]
pub struct DdlArgs {
    /// YAML file describing the destination schema, table and columns
    #[arg(long = "table-spec")]
    pub table_spec: Option<PathBuf>,
}

/// Normalization knobs shared by `run` and `normalize`. Each list, when
/// given, replaces the built-in default for that list.
#[derive(Debug, Args)]
pub struct NormalizeFlags {
    /// CSV delimiter of the export (supports ',', ';', 'tab', '|')
    #[arg(long, value_parser = parse_delimiter, default_value = ";")]
    pub delimiter: u8,
    /// Column to drop after canonicalization (repeatable)
    #[arg(long = "drop-column", action = clap::ArgAction::Append)]
    pub drop_columns: Vec<String>,
    /// Column that must be non-empty for a row to be kept (repeatable)
    #[arg(long = "require-column", action = clap::ArgAction::Append)]
    pub required_columns: Vec<String>,
    /// Column to parse as a timestamp; unparseable values become null (repeatable)
    #[arg(long = "timestamp-column", action = clap::ArgAction::Append)]
    pub timestamp_columns: Vec<String>,
    /// Column to parse as a date; unparseable values become null (repeatable)
    #[arg(long = "date-column", action = clap::ArgAction::Append)]
    pub date_columns: Vec<String>,
    /// Only these characters (plus whitespace) separate words in header
    /// names; by default every non-alphanumeric character does
    #[arg(long = "separator-chars", value_name = "CHARS")]
    pub separator_chars: Option<String>,
}

impl NormalizeFlags {
    pub fn to_options(&self) -> NormalizeOptions {
        let mut options = NormalizeOptions::default().with_delimiter(self.delimiter);
        if let Some(chars) = &self.separator_chars {
            options.separators = SeparatorClass::Chars(chars.chars().collect());
        }
        if !self.drop_columns.is_empty() {
            options.drop_columns = split_list(&self.drop_columns);
        }
        if !self.required_columns.is_empty() {
            options.required_columns = split_list(&self.required_columns);
        }
        if !self.timestamp_columns.is_empty() || !self.date_columns.is_empty() {
            let mut coercions = BTreeMap::new();
            for name in split_list(&self.timestamp_columns) {
                coercions.insert(name, Coercion::Timestamp);
            }
            for name in split_list(&self.date_columns) {
                coercions.insert(name, Coercion::Date);
            }
            options.coercions = coercions;
        }
        options
    }
}

fn split_list(values: &[String]) -> Vec<String> {
    values
        .iter()
        .flat_map(|s| s.split(','))
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}
