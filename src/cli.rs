use std::path::PathBuf;

use clap::Parser;

use crate::io_utils::DEFAULT_OUTPUT_DELIMITER;

pub const USAGE: &str = "Usage: csv-remap [mapping_config.csv] [from.csv] [to.csv] {separator}";

pub const DEFAULT_GROUP_KEY: &str = "sku";
pub const DEFAULT_BATCH_SEPARATOR: &str = "ƒ";

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Remap CSV records into a new layout using a rule table",
    long_about = None
)]
pub struct Cli {
    /// Mapping file with `to,from,flags` columns
    pub mapping: Option<PathBuf>,
    /// Input CSV file to remap (`-` for stdin)
    pub input: Option<PathBuf>,
    /// Output CSV file (`-` for stdout)
    pub output: Option<PathBuf>,
    /// Output field separator; only the first character is used (defaults to ';')
    pub separator: Option<String>,
    /// Column whose non-empty value starts a new record when batching
    #[arg(long = "group-key", default_value = DEFAULT_GROUP_KEY)]
    pub group_key: String,
    /// Separator used when folding continuation rows into a record
    #[arg(long = "batch-separator", default_value = DEFAULT_BATCH_SEPARATOR)]
    pub batch_separator: String,
    /// Treat every input row as its own record
    #[arg(long = "no-batch")]
    pub no_batch: bool,
    /// Number of worker threads (defaults to available parallelism)
    #[arg(short = 'j', long)]
    pub jobs: Option<usize>,
    /// CSV delimiter character for reading input
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// Character encoding for the output file (defaults to utf-8)
    #[arg(long = "output-encoding")]
    pub output_encoding: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RemapArgs {
    pub mapping: PathBuf,
    pub input: PathBuf,
    pub output: PathBuf,
    pub output_delimiter: u8,
    /// `None` disables batching.
    pub group_key: Option<String>,
    pub batch_separator: String,
    pub jobs: Option<usize>,
    pub delimiter: Option<u8>,
    pub input_encoding: Option<String>,
    pub output_encoding: Option<String>,
}

impl Cli {
    /// Returns `Ok(None)` when fewer than three paths were supplied.
    pub fn into_remap_args(self) -> Result<Option<RemapArgs>, String> {
        let (Some(mapping), Some(input), Some(output)) = (self.mapping, self.input, self.output)
        else {
            return Ok(None);
        };
        let output_delimiter = match self.separator.as_deref() {
            Some(value) if !value.is_empty() => parse_output_separator(value)?,
            _ => DEFAULT_OUTPUT_DELIMITER,
        };
        Ok(Some(RemapArgs {
            mapping,
            input,
            output,
            output_delimiter,
            group_key: (!self.no_batch).then_some(self.group_key),
            batch_separator: self.batch_separator,
            jobs: self.jobs,
            delimiter: self.delimiter,
            input_encoding: self.input_encoding,
            output_encoding: self.output_encoding,
        }))
    }
}

fn parse_output_separator(value: &str) -> Result<u8, String> {
    let first = value
        .chars()
        .next()
        .ok_or_else(|| "Separator cannot be empty".to_string())?;
    if !first.is_ascii() {
        return Err(format!("Separator '{first}' must be ASCII"));
    }
    Ok(first as u8)
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
