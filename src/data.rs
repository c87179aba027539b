use std::collections::BTreeMap;

/// One input record keyed by header name.
pub type Row = BTreeMap<String, String>;

/// One output record keyed by output column. Absent columns are unset.
pub type OutputRecord = BTreeMap<String, String>;

/// Suffix of the synthetic fields produced by batching.
pub const BATCHED_SUFFIX: &str = "_BATCHED";

pub fn batched_field(name: &str) -> String {
    format!("{name}{BATCHED_SUFFIX}")
}

/// Maps a header to the identifier used for it inside templates.
pub fn normalize_column_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' => c,
            _ => '_',
        })
        .collect::<String>()
        .to_ascii_lowercase()
}

pub fn row_from_record(headers: &[String], record: &[String]) -> Row {
    headers
        .iter()
        .enumerate()
        .map(|(idx, header)| {
            let value = record.get(idx).cloned().unwrap_or_default();
            (header.clone(), value)
        })
        .collect()
}

/// Pretty JSON rendering of a row, used in diagnostics.
pub fn row_to_json(row: &Row) -> String {
    serde_json::to_string_pretty(row).unwrap_or_else(|_| format!("{row:?}"))
}

/// Returns the value of `column`, or an empty string when unset.
pub fn field<'a>(record: &'a BTreeMap<String, String>, column: &str) -> &'a str {
    record.get(column).map(String::as_str).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_column_name_replaces_non_alphanumeric() {
        assert_eq!(normalize_column_name("Order ID"), "order_id");
        assert_eq!(normalize_column_name("$Percent%"), "_percent_");
        assert_eq!(normalize_column_name("title_BATCHED"), "title_batched");
    }

    #[test]
    fn row_from_record_pads_missing_cells() {
        let headers = vec!["sku".to_string(), "name".to_string()];
        let row = row_from_record(&headers, &["A1".to_string()]);
        assert_eq!(field(&row, "sku"), "A1");
        assert_eq!(field(&row, "name"), "");
        assert!(row.contains_key("name"));
    }

    #[test]
    fn row_to_json_lists_every_field() {
        let mut row = Row::new();
        row.insert("sku".into(), "A1".into());
        let json = row_to_json(&row);
        assert!(json.contains("\"sku\": \"A1\""));
    }
}
