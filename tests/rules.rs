use csv_remap::{
    directive::Expression, error::RemapError, lookup::LookupCache, remap::Remapper,
    rules::RuleTable,
};

fn reader(text: &str) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(text.as_bytes())
}

#[test]
fn header_is_case_insensitive_and_columns_follow_rule_order() {
    let table = RuleTable::from_reader(reader(
        "TO,From,FLAGS\nname,title,\n\"(a,b)\",\"CONCAT +\n{{ line.x }}\",\nsku,sku,REQUIRED\n",
    ))
    .expect("rules");

    assert_eq!(table.columns(), ["name", "a", "b", "sku"]);
    assert_eq!(table.required_columns().collect::<Vec<_>>(), ["sku"]);
    assert!(matches!(
        table.rules()[1].expression,
        Expression::Concat { ref glue, .. } if glue == "+"
    ));
}

#[test]
fn wrong_header_is_reported() {
    let err = RuleTable::from_reader(reader("to,from\nname,title\n")).expect_err("bad header");
    let root = err.downcast_ref::<RemapError>().expect("typed error");
    assert!(matches!(root, RemapError::MalformedHeader { found } if found == "to,from"));
}

#[test]
fn unknown_flag_and_duplicates_are_rejected() {
    let err = RuleTable::from_entries([("name", "title", "optional")]).expect_err("flag");
    assert!(matches!(err, RemapError::UnknownFlag { ref flag, .. } if flag == "optional"));

    let err = RuleTable::from_entries([("name", "title", ""), ("name", "sku", "")])
        .expect_err("duplicate");
    assert!(matches!(err, RemapError::DuplicateColumn(ref column) if column == "name"));
}

#[test]
fn later_rules_see_earlier_outputs() {
    let table = RuleTable::from_entries([
        ("name", "title", ""),
        ("slug", "title.{{ snake_case(out.name) }}", ""),
    ])
    .expect("rules");
    let lookups = LookupCache::new();
    let remapper = Remapper::new(&table, &lookups, "");
    let row = [("title".to_string(), "Big Widget".to_string())]
        .into_iter()
        .collect();

    let record = remapper.remap_row(0, &row).expect("remap");
    assert_eq!(record.get("slug").map(String::as_str), Some("big_widget"));
    assert_eq!(lookups.load_count(), 0);
}

#[test]
fn templates_read_headers_as_written() {
    let table = RuleTable::from_entries([("code", "SKU.{{ .line.SKU }}-{{ line.sku }}", "")])
        .expect("rules");
    let lookups = LookupCache::new();
    let remapper = Remapper::new(&table, &lookups, "");
    let row = [("SKU".to_string(), "A1".to_string())].into_iter().collect();

    let record = remapper.remap_row(0, &row).expect("remap");
    assert_eq!(record.get("code").map(String::as_str), Some("A1-A1"));
}
