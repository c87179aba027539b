//! The rule table loaded from a mapping file.
//!
//! A mapping file is a comma separated file with the header `to,from,flags`:
//!
//! ```text
//! to,from,flags
//! name,title,required
//! (slug,handle),title,
//! brand_id,MAP(brands.csv:brand),
//! ```
//!
//! A parenthesized `to` fans one source out to several output columns. Rule
//! order is the output column order. Every expression is parsed while the
//! table loads, so a malformed directive stops the run before any row is
//! evaluated.

use std::{collections::HashSet, io::Read, path::Path};

use anyhow::{Context, Result as AnyResult};
use log::{debug, warn};

use crate::{
    directive::Expression,
    error::{RemapError, Result},
    io_utils,
};

pub const MAPPING_HEADER: [&str; 3] = ["to", "from", "flags"];
const REQUIRED_FLAG: &str = "required";

#[derive(Debug, Clone)]
pub struct MappingRule {
    pub output_column: String,
    pub source: String,
    pub expression: Expression,
    pub required: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RuleTable {
    rules: Vec<MappingRule>,
    columns: Vec<String>,
}

impl RuleTable {
    pub fn load(path: &Path) -> AnyResult<Self> {
        let reader = io_utils::open_csv_reader_from_path(path, b',', true)?;
        Self::from_reader(reader).with_context(|| format!("Loading mapping file {path:?}"))
    }

    pub fn from_reader<R: Read>(mut reader: csv::Reader<R>) -> AnyResult<Self> {
        let headers = reader
            .headers()
            .context("Reading mapping header")?
            .iter()
            .map(|h| h.trim().to_string())
            .collect::<Vec<_>>();
        check_header(&headers)?;
        let mut entries = Vec::new();
        for (idx, record) in reader.records().enumerate() {
            let record = record.with_context(|| format!("Reading mapping row {}", idx + 2))?;
            let cell = |i: usize| record.get(i).unwrap_or("").to_string();
            entries.push((cell(0), cell(1), cell(2)));
        }
        Ok(Self::from_entries(entries)?)
    }

    /// Builds a table from `(to, from, flags)` triples.
    pub fn from_entries<I, S>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, S, S)>,
        S: AsRef<str>,
    {
        let mut table = RuleTable::default();
        let mut seen = HashSet::new();
        for (to, from, flags) in entries {
            let targets = parse_targets(to.as_ref());
            if targets.is_empty() {
                if !from.as_ref().is_empty() {
                    warn!("Skipping mapping for {:?} without an output column", from.as_ref());
                }
                continue;
            }
            let required = parse_flags(&targets[0], flags.as_ref())?;
            for column in targets {
                if !seen.insert(column.clone()) {
                    return Err(RemapError::DuplicateColumn(column));
                }
                let expression = Expression::parse(&column, from.as_ref())?;
                debug!(
                    "Rule '{}' <- {} {:?}{}",
                    column,
                    expression.kind(),
                    from.as_ref(),
                    if required { " (required)" } else { "" }
                );
                table.columns.push(column.clone());
                table.rules.push(MappingRule {
                    output_column: column,
                    source: from.as_ref().to_string(),
                    expression,
                    required,
                });
            }
        }
        Ok(table)
    }

    pub fn rules(&self) -> &[MappingRule] {
        &self.rules
    }

    /// Output columns in rule order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn required_columns(&self) -> impl Iterator<Item = &str> {
        self.rules
            .iter()
            .filter(|rule| rule.required)
            .map(|rule| rule.output_column.as_str())
    }

    /// Distinct lookup tables referenced by `MAP` rules, in first-use order.
    pub fn lookup_tables(&self) -> Vec<&Path> {
        let mut seen = HashSet::new();
        self.rules
            .iter()
            .filter_map(|rule| rule.expression.lookup_table())
            .filter(|path| seen.insert(*path))
            .collect()
    }
}

fn check_header(headers: &[String]) -> Result<()> {
    let matches = headers.len() == MAPPING_HEADER.len()
        && headers
            .iter()
            .zip(MAPPING_HEADER)
            .all(|(found, expected)| found.eq_ignore_ascii_case(expected));
    if matches {
        Ok(())
    } else {
        Err(RemapError::MalformedHeader {
            found: headers.join(","),
        })
    }
}

fn parse_targets(to: &str) -> Vec<String> {
    let to = to.trim();
    let list = to
        .strip_prefix('(')
        .and_then(|rest| rest.strip_suffix(')'))
        .unwrap_or(to);
    list.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_flags(column: &str, flags: &str) -> Result<bool> {
    let mut required = false;
    for flag in flags.split(['|', ' ']).map(str::trim).filter(|f| !f.is_empty()) {
        if flag.eq_ignore_ascii_case(REQUIRED_FLAG) {
            required = true;
        } else {
            return Err(RemapError::UnknownFlag {
                column: column.to_string(),
                flag: flag.to_string(),
            });
        }
    }
    Ok(required)
}
