use crate::{
    data::{OutputRecord, field},
    rules::RuleTable,
};

/// A record survives when it has any non-empty value and every required
/// column is non-empty.
pub fn is_retained(record: &OutputRecord, rules: &RuleTable) -> bool {
    record.values().any(|value| !value.is_empty())
        && rules
            .required_columns()
            .all(|column| !field(record, column).is_empty())
}

/// Keeps retained records in order and returns how many were dropped.
pub fn retain_valid(records: &mut Vec<OutputRecord>, rules: &RuleTable) -> usize {
    let before = records.len();
    records.retain(|record| is_retained(record, rules));
    before - records.len()
}
