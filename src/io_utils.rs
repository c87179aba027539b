//! CSV input and output for the remapper.
//!
//! Inputs are read completely and decoded with the requested encoding
//! before parsing. Output is rendered into memory, transcoded once, and
//! written in a single pass, so a failed run never leaves a partial file.
//! The `-` path routes through stdin/stdout.

use std::{
    fs::{self, File},
    io::{self, BufReader, Read, Write},
    path::Path,
};

use anyhow::{Context, Result, anyhow};
use csv::QuoteStyle;
use encoding_rs::{Encoding, UTF_8};

use crate::data::{OutputRecord, Row, field, row_from_record};

pub const DEFAULT_CSV_DELIMITER: u8 = b',';
pub const DEFAULT_TSV_DELIMITER: u8 = b'\t';
pub const DEFAULT_OUTPUT_DELIMITER: u8 = b';';

pub fn is_dash(path: &Path) -> bool {
    path == Path::new("-")
}

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    if let Some(value) = label {
        Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| anyhow!("Unknown encoding '{value}'"))
    } else {
        Ok(UTF_8)
    }
}

pub fn resolve_input_delimiter(path: &Path, provided: Option<u8>) -> u8 {
    provided.unwrap_or_else(|| match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") => DEFAULT_TSV_DELIMITER,
        _ => DEFAULT_CSV_DELIMITER,
    })
}

pub fn open_csv_reader<R>(reader: R, delimiter: u8, has_headers: bool) -> csv::Reader<R>
where
    R: Read,
{
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(has_headers)
        .delimiter(delimiter)
        .double_quote(true)
        .flexible(false);
    builder.from_reader(reader)
}

pub fn open_csv_reader_from_path(
    path: &Path,
    delimiter: u8,
    has_headers: bool,
) -> Result<csv::Reader<Box<dyn Read>>> {
    let reader: Box<dyn Read> = if is_dash(path) {
        Box::new(io::stdin().lock())
    } else {
        Box::new(BufReader::new(
            File::open(path).with_context(|| format!("Opening input file {path:?}"))?,
        ))
    };
    Ok(open_csv_reader(reader, delimiter, has_headers))
}

pub fn decode_bytes(bytes: &[u8], encoding: &'static Encoding) -> Result<String> {
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        Err(anyhow!(
            "Failed to decode text with encoding {}",
            encoding.name()
        ))
    } else {
        Ok(text.into_owned())
    }
}

/// Reads a whole data file into header-keyed rows.
pub fn read_rows(
    path: &Path,
    delimiter: u8,
    encoding: &'static Encoding,
) -> Result<(Vec<String>, Vec<Row>)> {
    let bytes = if is_dash(path) {
        let mut buffer = Vec::new();
        io::stdin()
            .lock()
            .read_to_end(&mut buffer)
            .context("Reading stdin")?;
        buffer
    } else {
        fs::read(path).with_context(|| format!("Opening input file {path:?}"))?
    };
    let text = decode_bytes(&bytes, encoding)
        .with_context(|| format!("Decoding input file {path:?}"))?;
    let mut reader = open_csv_reader(text.as_bytes(), delimiter, true);
    let headers = reader
        .headers()
        .with_context(|| format!("Reading header of {path:?}"))?
        .iter()
        .map(str::to_string)
        .collect::<Vec<_>>();
    let mut rows = Vec::new();
    for (ordinal, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("Reading row {}", ordinal + 2))?;
        let cells = record.iter().map(str::to_string).collect::<Vec<_>>();
        rows.push(row_from_record(&headers, &cells));
    }
    Ok((headers, rows))
}

/// Renders `records` as CSV with `columns` as the header row.
pub fn render_csv(
    columns: &[String],
    records: &[OutputRecord],
    delimiter: u8,
) -> Result<String> {
    let mut builder = csv::WriterBuilder::new();
    builder
        .delimiter(delimiter)
        .quote_style(QuoteStyle::Necessary)
        .double_quote(true);
    let mut writer = builder.from_writer(Vec::new());
    writer
        .write_record(columns)
        .context("Writing output headers")?;
    for record in records {
        writer
            .write_record(columns.iter().map(|column| field(record, column)))
            .context("Writing output row")?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|err| anyhow!("Flushing output: {}", err.error()))?;
    String::from_utf8(bytes).context("Output is not valid UTF-8")
}

pub fn write_output(path: &Path, text: &str, encoding: &'static Encoding) -> Result<()> {
    let (encoded, _, had_errors) = encoding.encode(text);
    if had_errors {
        return Err(anyhow!(
            "Failed to encode output using {}",
            encoding.name()
        ));
    }
    if is_dash(path) {
        let mut stdout = io::stdout().lock();
        stdout.write_all(&encoded).context("Writing to stdout")?;
        return stdout.flush().context("Flushing stdout");
    }
    let mut file = File::create(path).with_context(|| format!("Creating output file {path:?}"))?;
    file.write_all(&encoded)
        .with_context(|| format!("Writing output file {path:?}"))?;
    file.flush().context("Flushing output")
}
