//! Normalization of dialect-specific result shapes into the canonical
//! tabular form consumed by every transport.

use serde::Serialize;
use serde_json::{Map, Value};

/// Canonical output shape for every dialect.
///
/// Invariants: `nrows == rows.len()`, `ncols == columnnames.len()`, and
/// every row holds exactly `ncols` cells.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TabularResult {
    pub columnnames: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub ncols: usize,
    pub nrows: usize,
}

impl TabularResult {
    pub fn new(columnnames: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        let ncols = columnnames.len();
        let nrows = rows.len();
        TabularResult {
            columnnames,
            rows,
            ncols,
            nrows,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nrows == 0
    }

    /// Serialize, merging an `error: null` field into the payload so the
    /// caller can branch on `error` alone.
    pub fn into_payload(self) -> Value {
        let mut map = match serde_json::to_value(&self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        map.insert("error".to_string(), Value::Null);
        Value::Object(map)
    }
}

/// Sentinel returned in place of a zero-row preview, so downstream
/// consumers never branch on emptiness.
pub fn empty_table() -> TabularResult {
    TabularResult::new(
        vec!["NA".to_string()],
        vec![vec![Value::String("empty table".to_string())]],
    )
}

/// Single-cell table acknowledging a statement that produced no result set.
pub fn command_executed() -> TabularResult {
    TabularResult::new(
        vec!["message".to_string()],
        vec![vec![Value::String("command executed".to_string())]],
    )
}

/// Normalize a list of keyed records. Column order is taken from the first
/// record; later records are read in that same order.
pub fn from_records(records: &[Map<String, Value>]) -> TabularResult {
    let Some(first) = records.first() else {
        return TabularResult::new(vec![], vec![]);
    };

    let columnnames: Vec<String> = first.keys().cloned().collect();
    let rows = records
        .iter()
        .map(|record| {
            columnnames
                .iter()
                .map(|key| record.get(key).cloned().unwrap_or(Value::Null))
                .collect()
        })
        .collect();

    TabularResult::new(columnnames, rows)
}

/// Normalize already-tabular data (Apache Drill responses, parsed CSV).
pub fn from_columns(columnnames: Vec<String>, rows: Vec<Vec<Value>>) -> TabularResult {
    let ncols = columnnames.len();
    let rows = rows
        .into_iter()
        .map(|mut row| {
            row.resize(ncols, Value::Null);
            row
        })
        .collect();
    TabularResult::new(columnnames, rows)
}

/// Parse CSV text (header line + comma-separated rows) into a table.
/// Files stored on S3 are previewed through this path.
pub fn from_csv(text: &str) -> TabularResult {
    let mut lines = text.lines().filter(|line| !line.trim().is_empty());

    let Some(header) = lines.next() else {
        return TabularResult::new(vec![], vec![]);
    };

    let columnnames: Vec<String> = header.split(',').map(|s| s.trim().to_string()).collect();
    let rows: Vec<Vec<Value>> = lines
        .map(|line| {
            line.split(',')
                .map(|cell| Value::String(cell.trim().to_string()))
                .collect()
        })
        .collect();

    from_columns(columnnames, rows)
}

/// Normalize Elasticsearch search hits: each hit contributes its `_source`
/// document as one record.
pub fn from_es_hits(hits: &[Value]) -> TabularResult {
    let records: Vec<Map<String, Value>> = hits
        .iter()
        .filter_map(|hit| hit.get("_source"))
        .filter_map(|source| source.as_object().cloned())
        .collect();

    from_records(&records)
}
