//! Source expressions and the directives they may carry.
//!
//! Every `from` cell of the mapping file is parsed once into an
//! [`Expression`]. Recognition order matters, the first match wins:
//!
//! | form                                   | directive                 |
//! |----------------------------------------|---------------------------|
//! | `CONCAT <glue>\n<tpl>\n<tpl>...`       | [`Expression::Concat`]    |
//! | `<in_key>.{{ ... }}`                   | [`Expression::InlineTemplate`] |
//! | `MAP(table:column[:split[:join]])`     | [`Expression::LookupMap`] |
//! | `LS(folder:template:separator)`        | [`Expression::DirectoryListing`] |
//! | anything else                          | [`Expression::Default`]   |
//!
//! Directive arguments are separated by `:` outside `{{ }}` blocks.

use std::path::{Path, PathBuf};

use itertools::Itertools;
use log::warn;

use crate::{
    data::{OutputRecord, Row, field},
    error::{RemapError, Result},
    listing,
    lookup::LookupCache,
    template::{Template, TemplateContext},
};

const CONCAT_MARKER: &str = "CONCAT";
const INLINE_MARKER: &str = ".{{";

#[derive(Debug, Clone)]
pub enum Expression {
    Concat {
        glue: String,
        parts: Vec<Template>,
    },
    InlineTemplate {
        input_key: String,
        template: Template,
    },
    LookupMap(LookupMap),
    DirectoryListing {
        folder: PathBuf,
        pattern: Template,
        separator: String,
    },
    Default {
        source_column: String,
    },
}

#[derive(Debug, Clone)]
pub struct LookupMap {
    pub table: PathBuf,
    pub source_column: String,
    pub split: Option<String>,
    pub join: Option<String>,
}

/// Read-only state shared by every evaluation of a row.
pub struct Evaluation<'a> {
    pub column: &'a str,
    pub row: &'a Row,
    pub output: &'a OutputRecord,
    pub output_columns: &'a [String],
    pub lookups: &'a LookupCache,
}

impl Evaluation<'_> {
    fn template_context<'b>(&'b self, value: &'b str, in_key: &'b str) -> TemplateContext<'b> {
        TemplateContext {
            value,
            in_key,
            out_key: self.column,
            row: self.row,
            output: self.output,
            output_columns: self.output_columns,
        }
    }
}

impl Expression {
    pub fn parse(column: &str, source: &str) -> Result<Self> {
        let syntax = |directive: &'static str, reason: String| RemapError::DirectiveSyntax {
            directive,
            column: column.to_string(),
            expression: source.to_string(),
            reason,
        };

        if let Some(rest) = source
            .strip_prefix(CONCAT_MARKER)
            .filter(|rest| rest.is_empty() || rest.starts_with([' ', '\n', '\r']))
        {
            let mut lines = rest.lines();
            let header = lines.next().unwrap_or("");
            let glue = header.strip_prefix(' ').unwrap_or(header).to_string();
            let parts = lines
                .filter(|line| !line.trim().is_empty())
                .map(Template::parse)
                .collect::<Result<Vec<_>>>()?;
            if parts.is_empty() {
                return Err(syntax(
                    "CONCAT",
                    "expected the glue on the first line and one template per following line"
                        .into(),
                ));
            }
            return Ok(Expression::Concat { glue, parts });
        }

        match source.find(INLINE_MARKER) {
            Some(pos) if source.ends_with("}}") => {
                return Ok(Expression::InlineTemplate {
                    input_key: source[..pos].to_string(),
                    template: Template::parse(&source[pos + 1..])?,
                });
            }
            _ => {}
        }

        if let Some(inner) = directive_body(source, "MAP(") {
            let args = split_args(inner);
            if !(2..=4).contains(&args.len()) {
                return Err(syntax(
                    "MAP",
                    format!(
                        "expected MAP(table:column[:separator[:new_separator]]), got {} part(s)",
                        args.len()
                    ),
                ));
            }
            return Ok(Expression::LookupMap(LookupMap {
                table: PathBuf::from(args[0]),
                source_column: args[1].to_string(),
                split: args.get(2).map(|s| s.to_string()),
                join: args.get(3).map(|s| s.to_string()),
            }));
        }

        if let Some(inner) = directive_body(source, "LS(") {
            let args = split_args(inner);
            if args.len() != 3 {
                return Err(syntax(
                    "LS",
                    format!(
                        "expected LS(folder:template:separator), got {} part(s)",
                        args.len()
                    ),
                ));
            }
            return Ok(Expression::DirectoryListing {
                folder: PathBuf::from(args[0]),
                pattern: Template::parse(args[1])?,
                separator: args[2].to_string(),
            });
        }

        Ok(Expression::Default {
            source_column: source.to_string(),
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Expression::Concat { .. } => "CONCAT",
            Expression::InlineTemplate { .. } => "template",
            Expression::LookupMap(_) => "MAP",
            Expression::DirectoryListing { .. } => "LS",
            Expression::Default { .. } => "copy",
        }
    }

    /// The row field this expression reads its `value` from, if any.
    pub fn source_column(&self) -> Option<&str> {
        match self {
            Expression::InlineTemplate { input_key, .. } => Some(input_key),
            Expression::LookupMap(map) => Some(&map.source_column),
            Expression::Default { source_column } => Some(source_column),
            Expression::Concat { .. } | Expression::DirectoryListing { .. } => None,
        }
    }

    pub fn lookup_table(&self) -> Option<&Path> {
        match self {
            Expression::LookupMap(map) => Some(&map.table),
            _ => None,
        }
    }

    /// Evaluates against one row. `None` leaves the output column unset.
    pub fn evaluate(&self, eval: &Evaluation<'_>) -> Result<Option<String>> {
        match self {
            Expression::Concat { glue, parts } => {
                let ctx = eval.template_context("", "");
                let mut rendered = Vec::with_capacity(parts.len());
                for part in parts {
                    let value = part.render(&ctx)?;
                    if !value.is_empty() {
                        rendered.push(value);
                    }
                }
                Ok(Some(rendered.join(glue)))
            }
            Expression::InlineTemplate {
                input_key,
                template,
            } => {
                let value = field(eval.row, input_key);
                template
                    .render(&eval.template_context(value, input_key))
                    .map(Some)
            }
            Expression::LookupMap(map) => map.evaluate(eval),
            Expression::DirectoryListing {
                folder,
                pattern,
                separator,
            } => {
                let glob = pattern.render(&eval.template_context("", eval.column))?;
                let listed = listing::expand(folder, &glob)?;
                Ok(Some(
                    listed
                        .iter()
                        .map(|path| path.display().to_string())
                        .join(separator),
                ))
            }
            Expression::Default { source_column } => {
                Ok(Some(field(eval.row, source_column).to_string()))
            }
        }
    }
}

impl LookupMap {
    pub fn join_separator(&self) -> Option<&str> {
        self.join.as_deref().or(self.split.as_deref())
    }

    fn evaluate(&self, eval: &Evaluation<'_>) -> Result<Option<String>> {
        let table = eval.lookups.get_or_load(&self.table)?;
        let raw = field(eval.row, &self.source_column);
        let Some(split) = self.split.as_deref() else {
            return Ok(table.resolve(raw).map(str::to_string));
        };
        let mut ids = Vec::new();
        for token in raw.split(split) {
            match table.resolve(token) {
                Some(id) => ids.push(id),
                None if !token.is_empty() => warn!(
                    "No match for '{}' in {:?} (column '{}')",
                    token, self.table, eval.column
                ),
                None => {}
            }
        }
        Ok(Some(ids.join(self.join_separator().unwrap_or(split))))
    }
}

fn directive_body<'a>(source: &'a str, opener: &str) -> Option<&'a str> {
    source.strip_prefix(opener)?.strip_suffix(')')
}

/// Splits on `:` while ignoring colons inside `{{ }}` blocks.
fn split_args(body: &str) -> Vec<&str> {
    let bytes = body.as_bytes();
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    let mut idx = 0;
    while idx < bytes.len() {
        if bytes[idx..].starts_with(b"{{") {
            depth += 1;
            idx += 2;
            continue;
        }
        if depth > 0 && bytes[idx..].starts_with(b"}}") {
            depth -= 1;
            idx += 2;
            continue;
        }
        if depth == 0 && bytes[idx] == b':' {
            parts.push(&body[start..idx]);
            start = idx + 1;
        }
        idx += 1;
    }
    parts.push(&body[start..]);
    parts
}
