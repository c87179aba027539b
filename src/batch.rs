//! Folding of continuation rows into logical records.
//!
//! A row with a non-empty group key starts a new record. Rows with an empty
//! key are appended to the current record: every field is added to its
//! `<field>_BATCHED` twin, and non-empty values are also added to the plain
//! field. Each appended value is prefixed by the separator, so a seed value
//! `1` followed by `2` and `3` gives `_BATCHED = "|1|2|3"` and `"1|2|3"`.

use log::debug;

use crate::{
    data::{Row, batched_field},
    error::{RemapError, Result},
};

pub fn merge(rows: Vec<Row>, group_key: &str, separator: &str) -> Result<Vec<Row>> {
    let mut merged: Vec<Row> = Vec::new();
    for (idx, row) in rows.into_iter().enumerate() {
        let starts_group = row.get(group_key).is_some_and(|value| !value.is_empty());
        if starts_group {
            let mut seed = row.clone();
            for (column, value) in &row {
                seed.insert(batched_field(column), format!("{separator}{value}"));
            }
            merged.push(seed);
            continue;
        }

        let current = merged.last_mut().ok_or_else(|| RemapError::OrphanRow {
            row: idx + 1,
            key: group_key.to_string(),
        })?;
        for (column, value) in row {
            let batched = current.entry(batched_field(&column)).or_default();
            batched.push_str(separator);
            batched.push_str(&value);
            if !value.is_empty() {
                let plain = current.entry(column).or_default();
                plain.push_str(separator);
                plain.push_str(&value);
            }
        }
    }
    debug!(
        "Merged rows into {} group(s) on '{}'",
        merged.len(),
        group_key
    );
    Ok(merged)
}

/// Checks that the grouping column exists before any row is merged.
pub fn ensure_group_key(headers: &[String], group_key: &str) -> Result<()> {
    if headers.iter().any(|header| header == group_key) {
        Ok(())
    } else {
        Err(RemapError::MissingGroupKey(group_key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::field;

    fn row(pairs: &[(&str, &str)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn folds_continuation_rows() {
        let rows = vec![
            row(&[("sku", "A"), ("x", "1")]),
            row(&[("sku", ""), ("x", "2")]),
            row(&[("sku", ""), ("x", "3")]),
        ];
        let merged = merge(rows, "sku", "|").unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(field(&merged[0], "x_BATCHED"), "|1|2|3");
        assert_eq!(field(&merged[0], "x"), "1|2|3");
        assert_eq!(field(&merged[0], "sku"), "A");
        assert_eq!(field(&merged[0], "sku_BATCHED"), "|A||");
    }

    #[test]
    fn empty_values_only_reach_batched_field() {
        let rows = vec![
            row(&[("sku", "A"), ("img", "a.jpg")]),
            row(&[("sku", ""), ("img", "")]),
            row(&[("sku", ""), ("img", "c.jpg")]),
        ];
        let merged = merge(rows, "sku", ";").unwrap();
        assert_eq!(field(&merged[0], "img_BATCHED"), ";a.jpg;;c.jpg");
        assert_eq!(field(&merged[0], "img"), "a.jpg;c.jpg");
    }

    #[test]
    fn batched_fields_exist_even_when_always_empty() {
        let rows = vec![
            row(&[("sku", "A"), ("note", "")]),
            row(&[("sku", "B"), ("note", "")]),
        ];
        let merged = merge(rows, "sku", "|").unwrap();
        assert_eq!(merged.len(), 2);
        for record in &merged {
            assert_eq!(record.get("note_BATCHED").map(String::as_str), Some("|"));
            assert_eq!(field(record, "note"), "");
        }
    }

    #[test]
    fn orphan_row_is_fatal() {
        let rows = vec![row(&[("sku", ""), ("x", "1")])];
        let err = merge(rows, "sku", "|").unwrap_err();
        assert!(matches!(err, RemapError::OrphanRow { row: 1, .. }));
    }

    #[test]
    fn empty_input_yields_no_groups() {
        assert!(merge(Vec::new(), "sku", "|").unwrap().is_empty());
    }

    #[test]
    fn missing_group_column_is_reported() {
        let headers = vec!["id".to_string()];
        assert!(matches!(
            ensure_group_key(&headers, "sku"),
            Err(RemapError::MissingGroupKey(_))
        ));
        assert!(ensure_group_key(&["sku".to_string()], "sku").is_ok());
    }
}
