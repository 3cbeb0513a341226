//! Parameter and result types shared by the facades and the engine.

use duckdb::types::{ToSqlOutput, Value, ValueRef};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{DuckDbError, DuckDbResult};

pub use duckdb::arrow::record_batch::RecordBatch;

/// One result row: a JSON object keyed by column name.
pub type Row = JsonValue;

/// A fully collected result set.
pub type Rows = Vec<Row>;

/// A result set in columnar (Arrow) form.
pub type RecordBatches = Vec<RecordBatch>;

/// A single positional query parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    /// SQL NULL.
    Null,
    /// Boolean.
    Bool(bool),
    /// 64-bit integer.
    Int(i64),
    /// Double-precision float.
    Float(f64),
    /// Text.
    String(String),
    /// Binary data.
    Blob(Vec<u8>),
    /// JSON document, bound as text.
    Json(JsonValue),
    /// List of values, bound as a JSON array.
    List(Vec<Param>),
}

macro_rules! param_from {
    ($($ty:ty => $variant:ident as $cast:ty),* $(,)?) => {
        $(
            impl From<$ty> for Param {
                fn from(v: $ty) -> Self {
                    Param::$variant(v as $cast)
                }
            }
        )*
    };
}

param_from! {
    i8 => Int as i64,
    i16 => Int as i64,
    i32 => Int as i64,
    i64 => Int as i64,
    u8 => Int as i64,
    u16 => Int as i64,
    u32 => Int as i64,
    f32 => Float as f64,
    f64 => Float as f64,
}

impl From<bool> for Param {
    fn from(v: bool) -> Self {
        Param::Bool(v)
    }
}

impl From<&str> for Param {
    fn from(v: &str) -> Self {
        Param::String(v.to_string())
    }
}

impl From<String> for Param {
    fn from(v: String) -> Self {
        Param::String(v)
    }
}

impl From<Vec<u8>> for Param {
    fn from(v: Vec<u8>) -> Self {
        Param::Blob(v)
    }
}

impl From<JsonValue> for Param {
    fn from(v: JsonValue) -> Self {
        Param::Json(v)
    }
}

impl<T: Into<Param>> From<Option<T>> for Param {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Param::Null)
    }
}

/// An ordered, variable-length parameter list.
///
/// Order and count are preserved exactly as supplied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params(Vec<Param>);

impl Params {
    /// An empty parameter list.
    pub fn none() -> Self {
        Self::default()
    }

    /// Append a parameter.
    pub fn push(&mut self, param: impl Into<Param>) {
        self.0.push(param.into());
    }

    /// Number of parameters.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrow the parameters.
    pub fn as_slice(&self) -> &[Param] {
        &self.0
    }
}

impl From<()> for Params {
    fn from(_: ()) -> Self {
        Self::none()
    }
}

impl<T: Into<Param>> From<Vec<T>> for Params {
    fn from(v: Vec<T>) -> Self {
        Self(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Param>, const N: usize> From<[T; N]> for Params {
    fn from(v: [T; N]) -> Self {
        Self(v.into_iter().map(Into::into).collect())
    }
}

impl From<&[Param]> for Params {
    fn from(v: &[Param]) -> Self {
        Self(v.to_vec())
    }
}

macro_rules! params_from_tuple {
    ($($name:ident),+) => {
        impl<$($name: Into<Param>),+> From<($($name,)+)> for Params {
            #[allow(non_snake_case)]
            fn from(($($name,)+): ($($name,)+)) -> Self {
                Self(vec![$($name.into()),+])
            }
        }
    };
}

params_from_tuple!(A);
params_from_tuple!(A, B);
params_from_tuple!(A, B, C);
params_from_tuple!(A, B, C, D);
params_from_tuple!(A, B, C, D, E);
params_from_tuple!(A, B, C, D, E, F);

impl IntoIterator for Params {
    type Item = Param;
    type IntoIter = std::vec::IntoIter<Param>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl FromIterator<Param> for Params {
    fn from_iter<I: IntoIterator<Item = Param>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Build a [`Params`] list from heterogeneous values.
///
/// ```rust,ignore
/// stmt.run(params![1, "Alice", None::<i64>]).await?;
/// ```
#[macro_export]
macro_rules! params {
    () => {
        $crate::types::Params::none()
    };
    ($($value:expr),+ $(,)?) => {
        $crate::types::Params::from(vec![$($crate::types::Param::from($value)),+])
    };
}

/// Name and engine type of one result column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// Column name.
    pub name: String,
    /// Engine type, as rendered by the engine.
    pub type_name: String,
}

/// Convert a Param to a JSON value.
pub fn param_to_json(value: &Param) -> JsonValue {
    match value {
        Param::Null => JsonValue::Null,
        Param::Bool(b) => JsonValue::Bool(*b),
        Param::Int(i) => JsonValue::Number((*i).into()),
        Param::Float(f) => serde_json::Number::from_f64(*f)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        Param::String(s) => JsonValue::String(s.clone()),
        Param::Blob(bytes) => JsonValue::String(hex(bytes)),
        Param::Json(j) => j.clone(),
        Param::List(list) => JsonValue::Array(list.iter().map(param_to_json).collect()),
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn date32_to_json(days: i32) -> JsonValue {
    // 719163 days separate 0001-01-01 from the Unix epoch.
    match chrono::NaiveDate::from_num_days_from_ce_opt(days + 719_163) {
        Some(d) => JsonValue::String(d.to_string()),
        None => JsonValue::Null,
    }
}

/// Convert a DuckDB Value to a JSON value.
pub fn duckdb_value_to_json(value: Value) -> JsonValue {
    match value {
        Value::Null => JsonValue::Null,
        Value::Boolean(b) => JsonValue::Bool(b),
        Value::TinyInt(i) => JsonValue::Number(i.into()),
        Value::SmallInt(i) => JsonValue::Number(i.into()),
        Value::Int(i) => JsonValue::Number(i.into()),
        Value::BigInt(i) => JsonValue::Number(i.into()),
        Value::HugeInt(i) => match i64::try_from(i) {
            Ok(small) => JsonValue::Number(small.into()),
            Err(_) => JsonValue::String(i.to_string()),
        },
        Value::UTinyInt(i) => JsonValue::Number(i.into()),
        Value::USmallInt(i) => JsonValue::Number(i.into()),
        Value::UInt(i) => JsonValue::Number(i.into()),
        Value::UBigInt(i) => JsonValue::Number(i.into()),
        Value::Float(f) => serde_json::Number::from_f64(f as f64)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        Value::Double(f) => serde_json::Number::from_f64(f)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        Value::Decimal(d) => JsonValue::String(d.to_string()),
        Value::Text(s) => JsonValue::String(s),
        Value::Blob(bytes) => JsonValue::String(hex(&bytes)),
        Value::Date32(days) => date32_to_json(days),
        Value::Time64(..) | Value::Timestamp(..) | Value::Interval { .. } => {
            JsonValue::String(format!("{:?}", value))
        }
        Value::List(list) | Value::Array(list) => {
            JsonValue::Array(list.into_iter().map(duckdb_value_to_json).collect())
        }
        Value::Enum(e) => JsonValue::String(e),
        Value::Struct(fields) => {
            // OrderedMap only exposes iter()
            let obj: serde_json::Map<String, JsonValue> = fields
                .iter()
                .map(|(k, v)| (k.clone(), duckdb_value_to_json(v.clone())))
                .collect();
            JsonValue::Object(obj)
        }
        Value::Map(map) => {
            let obj: serde_json::Map<String, JsonValue> = map
                .iter()
                .map(|(k, v)| (map_key(k), duckdb_value_to_json(v.clone())))
                .collect();
            JsonValue::Object(obj)
        }
        Value::Union(u) => duckdb_value_to_json(*u),
    }
}

fn map_key(key: &Value) -> String {
    match duckdb_value_to_json(key.clone()) {
        JsonValue::String(s) => s,
        other => other.to_string(),
    }
}

/// Convert a DuckDB ValueRef to a JSON value.
///
/// Nested types go through the owned [`Value`] conversion.
pub fn duckdb_value_ref_to_json(value: ValueRef<'_>) -> JsonValue {
    match value {
        ValueRef::Null => JsonValue::Null,
        ValueRef::Boolean(b) => JsonValue::Bool(b),
        ValueRef::TinyInt(i) => JsonValue::Number(i.into()),
        ValueRef::SmallInt(i) => JsonValue::Number(i.into()),
        ValueRef::Int(i) => JsonValue::Number(i.into()),
        ValueRef::BigInt(i) => JsonValue::Number(i.into()),
        ValueRef::UTinyInt(i) => JsonValue::Number(i.into()),
        ValueRef::USmallInt(i) => JsonValue::Number(i.into()),
        ValueRef::UInt(i) => JsonValue::Number(i.into()),
        ValueRef::UBigInt(i) => JsonValue::Number(i.into()),
        ValueRef::Double(f) => serde_json::Number::from_f64(f)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        ValueRef::Text(bytes) => JsonValue::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => JsonValue::String(hex(bytes)),
        ValueRef::Date32(days) => date32_to_json(days),
        _ => duckdb_value_to_json(value.to_owned()),
    }
}

/// Deserialize one row into `T`.
pub fn from_row<T: DeserializeOwned>(row: &Row) -> DuckDbResult<T> {
    T::deserialize(row).map_err(|e| DuckDbError::deserialization(e.to_string()))
}

/// Deserialize every row into `T`.
pub fn from_rows<T: DeserializeOwned>(rows: &[Row]) -> DuckDbResult<Vec<T>> {
    rows.iter().map(from_row).collect()
}

/// Wrapper for Param to implement ToSql.
pub struct DuckDbParam<'a>(pub &'a Param);

impl duckdb::ToSql for DuckDbParam<'_> {
    fn to_sql(&self) -> duckdb::Result<ToSqlOutput<'_>> {
        let value = match self.0 {
            Param::Null => Value::Null,
            Param::Bool(b) => Value::Boolean(*b),
            Param::Int(i) => Value::BigInt(*i),
            Param::Float(f) => Value::Double(*f),
            Param::String(s) => Value::Text(s.clone()),
            Param::Blob(bytes) => Value::Blob(bytes.clone()),
            Param::Json(j) => Value::Text(j.to_string()),
            Param::List(list) => {
                let array: Vec<JsonValue> = list.iter().map(param_to_json).collect();
                Value::Text(JsonValue::Array(array).to_string())
            }
        };
        Ok(ToSqlOutput::Owned(value))
    }
}
