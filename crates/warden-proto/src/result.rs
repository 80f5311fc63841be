//! Normalized query result
//!
//! Row-major cells aligned to the field list. `data_type` is the driver's
//! native type identifier rendered as a string (Postgres type OID in decimal,
//! MySQL wire type code); callers treat it as an opaque label.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One result column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryField {
    pub name: String,
    pub data_type: String,
}

/// Result of a single executed statement
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub fields: Vec<QueryField>,
    pub rows: Vec<Vec<Value>>,
    pub row_count: u64,
}

impl QueryResult {
    /// Result of a statement that produced no row set (DDL, empty update).
    pub fn empty(row_count: u64) -> Self {
        Self {
            fields: Vec::new(),
            rows: Vec::new(),
            row_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_result_serializes_camel_case() {
        let result = QueryResult {
            fields: vec![QueryField {
                name: "?column?".to_string(),
                data_type: "23".to_string(),
            }],
            rows: vec![vec![json!(1)]],
            row_count: 1,
        };

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["fields"][0]["dataType"], "23");
        assert_eq!(value["rowCount"], 1);
        assert_eq!(value["rows"][0][0], 1);
    }

    #[test]
    fn test_empty_result() {
        let result = QueryResult::empty(3);
        assert!(result.fields.is_empty());
        assert!(result.rows.is_empty());
        assert_eq!(result.row_count, 3);
    }
}
