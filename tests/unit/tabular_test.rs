use dbrelay::tabular::{
    self, command_executed, empty_table, from_columns, from_csv, from_es_hits, from_records,
    TabularResult,
};
use serde_json::{json, Map, Value};

fn record(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.clone()))
        .collect()
}

// --- record normalization ---

#[test]
fn from_records_takes_column_order_from_first_record() {
    let records = vec![
        record(&[("country", json!("Guinea")), ("cases", json!(122))]),
        record(&[("cases", json!(8)), ("country", json!("Liberia"))]),
    ];
    let result = from_records(&records);

    assert_eq!(result.columnnames, vec!["cases", "country"]);
    assert_eq!(result.ncols, 2);
    assert_eq!(result.nrows, 2);
    assert_eq!(result.rows[0], vec![json!(122), json!("Guinea")]);
    assert_eq!(result.rows[1], vec![json!(8), json!("Liberia")]);
}

#[test]
fn from_records_fills_missing_keys_with_null() {
    let records = vec![
        record(&[("a", json!(1)), ("b", json!(2))]),
        record(&[("a", json!(3))]),
    ];
    let result = from_records(&records);

    assert_eq!(result.rows[1], vec![json!(3), Value::Null]);
}

#[test]
fn from_records_on_empty_input_is_zero_by_zero() {
    let result = from_records(&[]);
    assert_eq!(result.ncols, 0);
    assert_eq!(result.nrows, 0);
    assert!(result.is_empty());
}

// --- sentinels ---

#[test]
fn empty_table_sentinel_shape() {
    let sentinel = empty_table();
    assert_eq!(sentinel.columnnames, vec!["NA"]);
    assert_eq!(sentinel.rows, vec![vec![json!("empty table")]]);
    assert_eq!(sentinel.ncols, 1);
    assert_eq!(sentinel.nrows, 1);
}

#[test]
fn command_executed_is_a_single_cell_table() {
    let ack = command_executed();
    assert_eq!(ack.ncols, 1);
    assert_eq!(ack.nrows, 1);
    assert_eq!(ack.rows[0][0], json!("command executed"));
}

// --- column-oriented inputs ---

#[test]
fn from_columns_pads_short_rows_to_ncols() {
    let result = from_columns(
        vec!["a".to_string(), "b".to_string(), "c".to_string()],
        vec![vec![json!(1)], vec![json!(2), json!(3), json!(4)]],
    );

    assert_eq!(result.rows[0], vec![json!(1), Value::Null, Value::Null]);
    assert_eq!(result.rows[1], vec![json!(2), json!(3), json!(4)]);
}

#[test]
fn from_csv_parses_header_and_skips_blank_lines() {
    let text = "country,cases\n\nGuinea,122\nLiberia,8\n\n";
    let result = from_csv(text);

    assert_eq!(result.columnnames, vec!["country", "cases"]);
    assert_eq!(result.nrows, 2);
    assert_eq!(result.rows[0], vec![json!("Guinea"), json!("122")]);
}

#[test]
fn from_csv_on_empty_text_is_zero_by_zero() {
    assert!(from_csv("").is_empty());
    assert_eq!(from_csv("").ncols, 0);
}

// --- elasticsearch hits ---

#[test]
fn from_es_hits_collects_source_documents() {
    let hits = vec![
        json!({"_index": "events", "_source": {"who": "a", "n": 1}}),
        json!({"_index": "events", "_source": {"who": "b", "n": 2}}),
        json!({"_index": "events"}),
    ];
    let result = from_es_hits(&hits);

    assert_eq!(result.nrows, 2);
    assert!(result.columnnames.contains(&"who".to_string()));
}

// --- payload shape ---

#[test]
fn into_payload_merges_a_null_error_field() {
    let payload = TabularResult::new(
        vec!["x".to_string()],
        vec![vec![json!(1)], vec![json!(2)]],
    )
    .into_payload();

    assert_eq!(payload["error"], Value::Null);
    assert_eq!(payload["columnnames"], json!(["x"]));
    assert_eq!(payload["ncols"], json!(1));
    assert_eq!(payload["nrows"], json!(2));
}

#[test]
fn empty_table_serializes_with_counts() {
    let payload = serde_json::to_value(tabular::empty_table()).expect("serializable");
    assert_eq!(payload["nrows"], json!(1));
    assert_eq!(payload["rows"], json!([["empty table"]]));
}
