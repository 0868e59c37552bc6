//! Value types for tandem
//!
//! MySQL-oriented value and row types:
//! - Primitive types (bool, integers, floats, decimal)
//! - Date/time types
//! - Binary data, JSON, UUID
//! - Row access by index or column name
//! - Execution results (affected rows, last insert id)

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// SQL value type that can hold any MySQL value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// SQL NULL
    Null,
    /// Boolean value (TINYINT(1))
    Bool(bool),
    /// Signed integer (TINYINT..BIGINT)
    Int64(i64),
    /// Unsigned integer (BIGINT UNSIGNED)
    UInt64(u64),
    /// 32-bit floating point (FLOAT)
    Float32(f32),
    /// 64-bit floating point (DOUBLE)
    Float64(f64),
    /// Arbitrary precision decimal (DECIMAL, NUMERIC)
    Decimal(Decimal),
    /// Text string (VARCHAR, TEXT, CHAR)
    String(String),
    /// Binary data (BLOB, VARBINARY)
    Bytes(Vec<u8>),
    /// Date without time (DATE)
    Date(NaiveDate),
    /// Time without date (TIME)
    Time(NaiveTime),
    /// Timestamp without timezone (DATETIME, TIMESTAMP)
    DateTime(NaiveDateTime),
    /// JSON value
    Json(serde_json::Value),
    /// UUID (stored as CHAR(36))
    Uuid(Uuid),
}

impl Value {
    /// Check if value is NULL
    #[inline]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Try to convert to bool
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Int64(n) => Some(*n != 0),
            Self::UInt64(n) => Some(*n != 0),
            _ => None,
        }
    }

    /// Try to convert to i64
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int64(n) => Some(*n),
            Self::UInt64(n) => i64::try_from(*n).ok(),
            Self::Decimal(d) => d.to_string().parse().ok(),
            Self::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Try to convert to u64
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::UInt64(n) => Some(*n),
            Self::Int64(n) => u64::try_from(*n).ok(),
            Self::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Try to convert to f64
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int64(n) => Some(*n as f64),
            Self::UInt64(n) => Some(*n as f64),
            Self::Float32(n) => Some(f64::from(*n)),
            Self::Float64(n) => Some(*n),
            Self::Decimal(d) => d.to_string().parse().ok(),
            Self::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Try to view as a string slice
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Try to view as bytes
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b.as_slice()),
            Self::String(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// Convert to an owned string representation
    pub fn as_string(&self) -> Option<String> {
        match self {
            Self::String(s) => Some(s.clone()),
            Self::Bool(b) => Some(b.to_string()),
            Self::Int64(n) => Some(n.to_string()),
            Self::UInt64(n) => Some(n.to_string()),
            Self::Float32(n) => Some(n.to_string()),
            Self::Float64(n) => Some(n.to_string()),
            Self::Decimal(d) => Some(d.to_string()),
            Self::Uuid(u) => Some(u.to_string()),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int64(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Self::UInt64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => Self::Null,
        }
    }
}

/// A result row: parallel column-name and value vectors
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    /// Create a new row from column names and values
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    /// Number of columns
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the row has no columns
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Column names, in result order
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Get a value by position
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Get a value by column name
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == name)
            .and_then(|i| self.values.get(i))
    }
}

/// Result of one statement execution on the wire.
///
/// SELECTs populate `rows`; writes populate `affected_rows` and, for
/// INSERT into an AUTO_INCREMENT table, `last_insert_id`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOutput {
    /// Result rows (empty for writes)
    pub rows: Vec<Row>,
    /// Rows affected by the statement
    pub affected_rows: u64,
    /// Last insert id, when the statement generated one
    pub last_insert_id: Option<u64>,
}

impl QueryOutput {
    /// An empty, successful output
    pub fn empty() -> Self {
        Self::default()
    }

    /// Output carrying result rows
    pub fn rows(rows: Vec<Row>) -> Self {
        Self {
            rows,
            ..Self::default()
        }
    }

    /// Output of a write statement
    pub fn exec(affected_rows: u64, last_insert_id: Option<u64>) -> Self {
        Self {
            rows: Vec::new(),
            affected_rows,
            last_insert_id,
        }
    }
}

/// The last-execution record a transaction keeps per task.
///
/// Mirrors what the driver reported for the most recent statement:
/// insert id, affected rows, and the error (if any) with its errno.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecInfo {
    /// Last insert id of the most recent statement
    pub insert_id: Option<u64>,
    /// Affected rows of the most recent statement
    pub affected_rows: u64,
    /// Errno of the most recent failure, 0 when it succeeded
    pub errno: u16,
    /// Error text of the most recent failure
    pub error: Option<String>,
}

impl ExecInfo {
    /// Record a successful execution
    pub fn from_output(out: &QueryOutput) -> Self {
        Self {
            insert_id: out.last_insert_id,
            affected_rows: out.affected_rows,
            errno: 0,
            error: None,
        }
    }

    /// Record a failed execution
    pub fn from_error(err: &crate::error::Error) -> Self {
        Self {
            insert_id: None,
            affected_rows: 0,
            errno: err.errno().unwrap_or(0),
            error: Some(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_null() {
        assert!(Value::Null.is_null());
        assert!(!Value::Int64(0).is_null());
        assert_eq!(Value::from(None::<i64>), Value::Null);
    }

    #[test]
    fn test_value_numeric_conversions() {
        assert_eq!(Value::Int64(42).as_i64(), Some(42));
        assert_eq!(Value::UInt64(42).as_i64(), Some(42));
        assert_eq!(Value::String("42".into()).as_i64(), Some(42));
        assert_eq!(Value::Int64(-1).as_u64(), None);
        assert_eq!(Value::Float64(1.5).as_f64(), Some(1.5));
    }

    #[test]
    fn test_row_access() {
        let row = Row::new(
            vec!["id".into(), "name".into()],
            vec![Value::Int64(7), Value::String("ada".into())],
        );

        assert_eq!(row.len(), 2);
        assert_eq!(row.get(0), Some(&Value::Int64(7)));
        assert_eq!(row.get_by_name("name").and_then(Value::as_str), Some("ada"));
        assert_eq!(row.get_by_name("missing"), None);
        assert_eq!(row.get(9), None);
    }

    #[test]
    fn test_exec_info_from_output() {
        let out = QueryOutput::exec(3, Some(11));
        let info = ExecInfo::from_output(&out);
        assert_eq!(info.affected_rows, 3);
        assert_eq!(info.insert_id, Some(11));
        assert_eq!(info.errno, 0);
        assert!(info.error.is_none());
    }

    #[test]
    fn test_exec_info_from_error() {
        let err = crate::error::Error::db(1062, "duplicate entry");
        let info = ExecInfo::from_error(&err);
        assert_eq!(info.errno, 1062);
        assert!(info.error.as_deref().unwrap_or("").contains("duplicate"));
        assert_eq!(info.affected_rows, 0);
    }
}
