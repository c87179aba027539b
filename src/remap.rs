//! Row evaluation and the end-to-end remap run.
//!
//! Every batched row becomes one task that evaluates all rules in order.
//! Tasks run on a fixed pool of scoped worker threads pulling row indices
//! from a shared counter and report back over a channel; the driver waits
//! for one report per row, then restores input order before validation.
//! The first failing row stops the pool and aborts the run.

use std::{
    num::NonZeroUsize,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        mpsc,
    },
    thread,
};

use anyhow::{Context, Result as AnyResult};
use itertools::Itertools;
use log::{debug, info};

use crate::{
    batch,
    cli::RemapArgs,
    data::{OutputRecord, Row, field, row_to_json},
    directive::{Evaluation, Expression},
    error::{RemapError, Result},
    io_utils,
    lookup::LookupCache,
    printable_delimiter,
    rules::{MappingRule, RuleTable},
    validate,
};

pub fn default_jobs() -> usize {
    thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

pub struct Remapper<'a> {
    rules: &'a RuleTable,
    lookups: &'a LookupCache,
    multi_value_separator: &'a str,
}

impl<'a> Remapper<'a> {
    /// `multi_value_separator` splits a source value into segments that are
    /// evaluated one by one; an empty separator disables splitting.
    pub fn new(
        rules: &'a RuleTable,
        lookups: &'a LookupCache,
        multi_value_separator: &'a str,
    ) -> Self {
        Remapper {
            rules,
            lookups,
            multi_value_separator,
        }
    }

    pub fn remap_row(&self, index: usize, row: &Row) -> Result<OutputRecord> {
        let mut output = OutputRecord::new();
        for rule in self.rules.rules() {
            let value = self
                .evaluate_rule(rule, row, &output)
                .map_err(|err| RemapError::Row {
                    index: index + 1,
                    column: rule.output_column.clone(),
                    row_json: row_to_json(row),
                    cause: Box::new(err),
                })?;
            if let Some(value) = value {
                output.insert(rule.output_column.clone(), value);
            }
        }
        Ok(output)
    }

    fn evaluate_rule(
        &self,
        rule: &MappingRule,
        row: &Row,
        output: &OutputRecord,
    ) -> Result<Option<String>> {
        let separator = self.multi_value_separator;
        let split_source = rule
            .expression
            .source_column()
            .filter(|_| !separator.is_empty())
            .filter(|_| !matches!(rule.expression, Expression::InlineTemplate { .. }))
            .filter(|source| field(row, source).contains(separator));

        let Some(source) = split_source else {
            return rule.expression.evaluate(&self.evaluation(rule, row, output));
        };

        let mut results = Vec::new();
        for segment in field(row, source).split(separator) {
            let mut single = row.clone();
            single.insert(source.to_string(), segment.to_string());
            if let Some(value) = rule
                .expression
                .evaluate(&self.evaluation(rule, &single, output))?
            {
                results.push(value);
            }
        }
        Ok(combine_segments(&rule.expression, results))
    }

    fn evaluation<'b>(
        &'b self,
        rule: &'b MappingRule,
        row: &'b Row,
        output: &'b OutputRecord,
    ) -> Evaluation<'b> {
        Evaluation {
            column: &rule.output_column,
            row,
            output,
            output_columns: self.rules.columns(),
            lookups: self.lookups,
        }
    }

    /// Evaluates every row on `jobs` worker threads and returns the records
    /// in input order.
    pub fn remap_all(&self, rows: &[Row], jobs: usize) -> Result<Vec<OutputRecord>> {
        let total = rows.len();
        if total == 0 {
            return Ok(Vec::new());
        }
        let workers = jobs.clamp(1, total);
        debug!("Remapping {total} row(s) on {workers} worker(s)");

        let next = AtomicUsize::new(0);
        let abort = AtomicBool::new(false);
        let (sender, receiver) = mpsc::channel::<(usize, Result<OutputRecord>)>();

        thread::scope(|scope| {
            for _ in 0..workers {
                let sender = sender.clone();
                let (next, abort) = (&next, &abort);
                scope.spawn(move || {
                    while !abort.load(Ordering::Relaxed) {
                        let index = next.fetch_add(1, Ordering::Relaxed);
                        if index >= total {
                            break;
                        }
                        let result = self.remap_row(index, &rows[index]);
                        if result.is_err() {
                            abort.store(true, Ordering::Relaxed);
                        }
                        if sender.send((index, result)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(sender);

            let mut slots: Vec<Option<OutputRecord>> = vec![None; total];
            let mut completed = 0;
            while completed < total {
                // Every worker has exited once the channel closes early.
                let Ok((index, result)) = receiver.recv() else {
                    break;
                };
                completed += 1;
                match result {
                    Ok(record) => slots[index] = Some(record),
                    Err(err) => {
                        abort.store(true, Ordering::Relaxed);
                        return Err(err);
                    }
                }
            }
            debug_assert_eq!(completed, total);
            Ok(slots.into_iter().flatten().collect())
        })
    }
}

/// Split lookups join their per-segment ids; everything else keeps the
/// last segment that produced a value.
fn combine_segments(expression: &Expression, mut results: Vec<String>) -> Option<String> {
    match expression {
        Expression::LookupMap(map) if map.split.is_some() => {
            let join = map.join_separator().unwrap_or_default();
            Some(results.iter().filter(|value| !value.is_empty()).join(join))
        }
        _ => results.pop(),
    }
}

pub fn execute(args: &RemapArgs) -> AnyResult<()> {
    let delimiter = io_utils::resolve_input_delimiter(&args.input, args.delimiter);
    let input_encoding = io_utils::resolve_encoding(args.input_encoding.as_deref())?;
    let output_encoding = io_utils::resolve_encoding(args.output_encoding.as_deref())?;
    info!(
        "Remapping '{}' -> '{}' (delimiter '{}', output '{}')",
        args.input.display(),
        args.output.display(),
        printable_delimiter(delimiter),
        printable_delimiter(args.output_delimiter)
    );

    let rules = RuleTable::load(&args.mapping)?;
    info!("Loaded {} rule(s) from {:?}", rules.len(), args.mapping);

    let lookups = LookupCache::new();
    let preloaded = lookups
        .preload(rules.lookup_tables())
        .context("Preloading lookup tables")?;
    if preloaded > 0 {
        info!("Preloaded {preloaded} lookup table(s)");
    }

    let (headers, rows) = io_utils::read_rows(&args.input, delimiter, input_encoding)?;
    let physical = rows.len();
    let (rows, multi_value_separator) = match args.group_key.as_deref() {
        Some(group_key) if !rows.is_empty() => {
            batch::ensure_group_key(&headers, group_key)?;
            let merged = batch::merge(rows, group_key, &args.batch_separator)?;
            (merged, args.batch_separator.as_str())
        }
        _ => (rows, ""),
    };
    info!(
        "Read {physical} row(s) from {:?} into {} record(s)",
        args.input,
        rows.len()
    );

    let jobs = args.jobs.unwrap_or_else(default_jobs);
    let remapper = Remapper::new(&rules, &lookups, multi_value_separator);
    let mut records = remapper.remap_all(&rows, jobs)?;
    let dropped = validate::retain_valid(&mut records, &rules);
    if dropped > 0 {
        debug!("Dropped {dropped} record(s) with empty required or all-empty values");
    }

    let text = io_utils::render_csv(rules.columns(), &records, args.output_delimiter)?;
    io_utils::write_output(&args.output, &text, output_encoding)?;

    let summary = format!(
        "Finished processing {} lines\nHeaders: {}",
        records.len(),
        rules.columns().iter().join(", ")
    );
    if io_utils::is_dash(&args.output) {
        eprintln!("{summary}");
    } else {
        println!("{summary}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use tempfile::tempdir;

    fn row(pairs: &[(&str, &str)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn evaluates_rules_in_order_with_output_so_far() {
        let rules = RuleTable::from_entries([
            ("name", "title", ""),
            ("label", "title.{{ out.name }}!", ""),
            ("shout", "title.{{ uppercase(out.name) }}", ""),
        ])
        .unwrap();
        let lookups = LookupCache::new();
        let remapper = Remapper::new(&rules, &lookups, "");
        let record = remapper.remap_row(0, &row(&[("title", "hi")])).unwrap();
        assert_eq!(field(&record, "shout"), "HI");
        // Not a trailing template, so it is a plain copy of a missing column.
        assert_eq!(field(&record, "label"), "");
    }

    #[test]
    fn multi_value_default_keeps_last_segment() {
        let rules = RuleTable::from_entries([("color", "color", "")]).unwrap();
        let lookups = LookupCache::new();
        let remapper = Remapper::new(&rules, &lookups, "|");
        let record = remapper
            .remap_row(0, &row(&[("color", "red|green|blue")]))
            .unwrap();
        assert_eq!(field(&record, "color"), "blue");
    }

    #[test]
    fn multi_value_template_is_not_split() {
        let rules = RuleTable::from_entries([("color", "color.{{ value }}", "")]).unwrap();
        let lookups = LookupCache::new();
        let remapper = Remapper::new(&rules, &lookups, "|");
        let record = remapper.remap_row(0, &row(&[("color", "red|blue")])).unwrap();
        assert_eq!(field(&record, "color"), "red|blue");
    }

    #[test]
    fn multi_value_split_lookup_accumulates() {
        let dir = tempdir().unwrap();
        let table = dir.path().join("tags.csv");
        fs::write(&table, "1,abc\n2,xyz\n3,def\n").unwrap();
        let expression = format!("MAP({}:tags:,:/)", table.display());
        let rules = RuleTable::from_entries([("ids", expression.as_str(), "")]).unwrap();
        let lookups = LookupCache::new();
        let remapper = Remapper::new(&rules, &lookups, "|");
        let record = remapper
            .remap_row(0, &row(&[("tags", "abc,xyz|def|nope")]))
            .unwrap();
        assert_eq!(field(&record, "ids"), "1/2/3");
    }

    #[test]
    fn row_errors_carry_row_context() {
        let rules = RuleTable::from_entries([("x", "a.{{ line.missing }}", "")]).unwrap();
        let lookups = LookupCache::new();
        let remapper = Remapper::new(&rules, &lookups, "");
        let err = remapper.remap_row(4, &row(&[("a", "1")])).unwrap_err();
        match err {
            RemapError::Row {
                index,
                column,
                row_json,
                ..
            } => {
                assert_eq!(index, 5);
                assert_eq!(column, "x");
                assert!(row_json.contains("\"a\": \"1\""));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn remap_all_preserves_input_order() {
        let rules = RuleTable::from_entries([("id", "id", "")]).unwrap();
        let lookups = LookupCache::new();
        let remapper = Remapper::new(&rules, &lookups, "");
        let rows = (0..200)
            .map(|i| row(&[("id", &i.to_string())]))
            .collect::<Vec<_>>();
        let records = remapper.remap_all(&rows, 8).unwrap();
        assert_eq!(records.len(), 200);
        for (i, record) in records.iter().enumerate() {
            assert_eq!(field(record, "id"), i.to_string());
        }
    }

    #[test]
    fn remap_all_aborts_on_first_failure() {
        let rules = RuleTable::from_entries([("x", "a.{{ line.b }}", "")]).unwrap();
        let lookups = LookupCache::new();
        let remapper = Remapper::new(&rules, &lookups, "");
        let mut rows = vec![row(&[("a", "1"), ("b", "ok")]); 50];
        rows[17] = row(&[("a", "1")]);
        let err = remapper.remap_all(&rows, 4).unwrap_err();
        assert!(matches!(err, RemapError::Row { index: 18, .. }));
    }

    #[test]
    fn remap_all_handles_empty_input() {
        let rules = RuleTable::from_entries([("x", "x", "")]).unwrap();
        let lookups = LookupCache::new();
        let remapper = Remapper::new(&rules, &lookups, "");
        assert!(remapper.remap_all(&[], 4).unwrap().is_empty());
    }
}
