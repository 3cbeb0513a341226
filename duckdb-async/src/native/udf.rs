//! Scalar functions backed by Rust closures.
//!
//! Functions take variadic `ANY` arguments, so the closure sees values with
//! the types the query supplied. Whatever it returns is converted to the
//! declared return type.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use duckdb::arrow::array::{
    Array, ArrayRef, AsArray, BinaryArray, BooleanArray, Date32Array, Float32Array, Float64Array,
    Int16Array, Int32Array, Int64Array, Int8Array, StringArray, UInt16Array, UInt32Array,
    UInt64Array, UInt8Array,
};
use duckdb::arrow::datatypes::{
    DataType, Date32Type, Float32Type, Float64Type, Int16Type, Int32Type, Int64Type, Int8Type,
    UInt16Type, UInt32Type, UInt64Type, UInt8Type,
};
use duckdb::core::{DataChunkHandle, LogicalTypeHandle, LogicalTypeId};
use duckdb::types::Value;
use duckdb::vscalar::{ScalarFunctionSignature, VScalar};
use duckdb::vtab::arrow::{flat_vector_to_arrow_array, write_arrow_array_to_vector, WritableVector};
use duckdb::Connection;
use parking_lot::RwLock;

use super::{BulkUdf, ScalarUdf};
use crate::error::{DuckDbError, DuckDbResult};

/// Result types a registered function may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReturnKind {
    Boolean,
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    UTinyInt,
    USmallInt,
    UInteger,
    UBigInt,
    Float,
    Double,
    Varchar,
    Blob,
    Date,
}

impl ReturnKind {
    /// Parse a SQL type name, accepting DuckDB's common aliases.
    pub(crate) fn parse(type_name: &str) -> DuckDbResult<Self> {
        let kind = match type_name.trim().to_ascii_uppercase().as_str() {
            "BOOLEAN" | "BOOL" | "LOGICAL" => Self::Boolean,
            "TINYINT" | "INT1" => Self::TinyInt,
            "SMALLINT" | "INT2" | "SHORT" => Self::SmallInt,
            "INTEGER" | "INT" | "INT4" | "SIGNED" => Self::Integer,
            "BIGINT" | "INT8" | "LONG" => Self::BigInt,
            "UTINYINT" => Self::UTinyInt,
            "USMALLINT" => Self::USmallInt,
            "UINTEGER" => Self::UInteger,
            "UBIGINT" => Self::UBigInt,
            "FLOAT" | "FLOAT4" | "REAL" => Self::Float,
            "DOUBLE" | "FLOAT8" => Self::Double,
            "VARCHAR" | "TEXT" | "STRING" => Self::Varchar,
            "BLOB" | "BYTEA" => Self::Blob,
            "DATE" => Self::Date,
            other => {
                return Err(DuckDbError::unsupported(format!(
                    "functions returning {} cannot be registered",
                    other
                )))
            }
        };
        Ok(kind)
    }
}

/// Compile-time stand-in for a [`ReturnKind`]; DuckDB reads signatures
/// from the function type rather than its state.
trait Returns {
    const KIND: ReturnKind;
}

macro_rules! return_kinds {
    ($($kind:ident => $marker:ident($id:ident)),* $(,)?) => {
        $(
            struct $marker;

            impl Returns for $marker {
                const KIND: ReturnKind = ReturnKind::$kind;
            }
        )*

        impl ReturnKind {
            fn type_id(self) -> LogicalTypeId {
                match self {
                    $(Self::$kind => LogicalTypeId::$id,)*
                }
            }

            fn register(self, conn: &Connection, name: &str, state: &UdfState) -> duckdb::Result<()> {
                match self {
                    $(Self::$kind => conn.register_scalar_function_with_state::<RustFunction<$marker>>(name, state),)*
                }
            }
        }
    };
}

return_kinds! {
    Boolean => ReturnsBoolean(Boolean),
    TinyInt => ReturnsTinyInt(Tinyint),
    SmallInt => ReturnsSmallInt(Smallint),
    Integer => ReturnsInteger(Integer),
    BigInt => ReturnsBigInt(Bigint),
    UTinyInt => ReturnsUTinyInt(UTinyint),
    USmallInt => ReturnsUSmallInt(USmallint),
    UInteger => ReturnsUInteger(UInteger),
    UBigInt => ReturnsUBigInt(UBigint),
    Float => ReturnsFloat(Float),
    Double => ReturnsDouble(Double),
    Varchar => ReturnsVarchar(Varchar),
    Blob => ReturnsBlob(Blob),
    Date => ReturnsDate(Date),
}

/// The closure behind a registered function.
#[derive(Clone)]
pub(crate) enum UdfBody {
    /// Called once per row.
    Row(ScalarUdf),
    /// Called once per chunk with whole argument columns.
    Bulk(BulkUdf),
}

/// State DuckDB keeps for a registered function. Emptied on unregister.
#[derive(Clone)]
pub(crate) struct UdfState {
    name: Arc<str>,
    body: Arc<RwLock<Option<UdfBody>>>,
}

impl UdfState {
    fn new(name: &str, body: UdfBody) -> Self {
        Self {
            name: name.into(),
            body: Arc::new(RwLock::new(Some(body))),
        }
    }

    fn is_active(&self) -> bool {
        self.body.read().is_some()
    }

    fn call(&self, input: &DataChunkHandle) -> DuckDbResult<Vec<Value>> {
        let body = self.body.read().clone().ok_or_else(|| {
            DuckDbError::query(format!("function '{}' has been unregistered", self.name))
        })?;

        let rows = input.len();
        let columns = (0..input.num_columns())
            .map(|i| {
                let array = flat_vector_to_arrow_array(&input.flat_vector(i), rows)
                    .map_err(|err| DuckDbError::type_conversion(err.to_string()))?;
                arrow_values(array.as_ref())
            })
            .collect::<DuckDbResult<Vec<_>>>()?;

        let results = match body {
            UdfBody::Row(fun) => (0..rows)
                .map(|row| {
                    let args: Vec<Value> = columns.iter().map(|column| column[row].clone()).collect();
                    fun(&args)
                })
                .collect::<DuckDbResult<Vec<_>>>()?,
            UdfBody::Bulk(fun) => fun(&columns)?,
        };

        if results.len() != rows {
            return Err(DuckDbError::query(format!(
                "function '{}' returned {} values for {} rows",
                self.name,
                results.len(),
                rows
            )));
        }
        Ok(results)
    }
}

struct RustFunction<R>(PhantomData<R>);

impl<R: Returns> VScalar for RustFunction<R> {
    type State = UdfState;

    fn invoke(
        state: &Self::State,
        input: &mut DataChunkHandle,
        output: &mut dyn WritableVector,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let results = state.call(input)?;
        let array = to_arrow(R::KIND, &results)?;
        write_arrow_array_to_vector(&array, output)
    }

    fn signatures() -> Vec<ScalarFunctionSignature> {
        vec![ScalarFunctionSignature::variadic(
            LogicalTypeHandle::from(LogicalTypeId::Any),
            LogicalTypeHandle::from(R::KIND.type_id()),
        )]
    }
}

/// A function registered on one connection.
pub(crate) struct Registered {
    kind: ReturnKind,
    state: UdfState,
}

/// Functions registered through a connection, by name.
pub(crate) type Registry = HashMap<String, Registered>;

/// Register `body` as `name`.
///
/// Registering a name again with the same return type swaps the closure in
/// place; DuckDB keeps the catalog entry it already has.
pub(crate) fn register(
    conn: &Connection,
    registry: &mut Registry,
    name: &str,
    kind: ReturnKind,
    body: UdfBody,
) -> DuckDbResult<()> {
    if let Some(existing) = registry.get(name).filter(|r| r.kind == kind) {
        *existing.state.body.write() = Some(body);
        return Ok(());
    }

    let state = UdfState::new(name, body);
    kind.register(conn, name, &state)?;
    registry.insert(name.to_string(), Registered { kind, state });
    Ok(())
}

/// Detach the closure behind `name`. Later calls fail with a query error.
pub(crate) fn unregister(registry: &Registry, name: &str) -> DuckDbResult<()> {
    match registry.get(name).filter(|r| r.state.is_active()) {
        Some(registered) => {
            *registered.state.body.write() = None;
            Ok(())
        }
        None => Err(DuckDbError::query(format!(
            "no function named '{}' is registered",
            name
        ))),
    }
}

// =============================================================================
// Value conversion
// =============================================================================

fn arrow_values(array: &dyn Array) -> DuckDbResult<Vec<Value>> {
    (0..array.len()).map(|i| arrow_value(array, i)).collect()
}

fn arrow_value(array: &dyn Array, i: usize) -> DuckDbResult<Value> {
    if array.is_null(i) {
        return Ok(Value::Null);
    }
    let value = match array.data_type() {
        DataType::Boolean => Value::Boolean(array.as_boolean().value(i)),
        DataType::Int8 => Value::TinyInt(array.as_primitive::<Int8Type>().value(i)),
        DataType::Int16 => Value::SmallInt(array.as_primitive::<Int16Type>().value(i)),
        DataType::Int32 => Value::Int(array.as_primitive::<Int32Type>().value(i)),
        DataType::Int64 => Value::BigInt(array.as_primitive::<Int64Type>().value(i)),
        DataType::UInt8 => Value::UTinyInt(array.as_primitive::<UInt8Type>().value(i)),
        DataType::UInt16 => Value::USmallInt(array.as_primitive::<UInt16Type>().value(i)),
        DataType::UInt32 => Value::UInt(array.as_primitive::<UInt32Type>().value(i)),
        DataType::UInt64 => Value::UBigInt(array.as_primitive::<UInt64Type>().value(i)),
        DataType::Float32 => Value::Float(array.as_primitive::<Float32Type>().value(i)),
        DataType::Float64 => Value::Double(array.as_primitive::<Float64Type>().value(i)),
        DataType::Utf8 => Value::Text(array.as_string::<i32>().value(i).to_string()),
        DataType::LargeUtf8 => Value::Text(array.as_string::<i64>().value(i).to_string()),
        DataType::Binary => Value::Blob(array.as_binary::<i32>().value(i).to_vec()),
        DataType::Date32 => Value::Date32(array.as_primitive::<Date32Type>().value(i)),
        other => {
            return Err(DuckDbError::type_conversion(format!(
                "unsupported function argument type: {}",
                other
            )))
        }
    };
    Ok(value)
}

fn mismatch(expected: &str, got: &Value) -> DuckDbError {
    DuckDbError::type_conversion(format!("expected {} function result, got {:?}", expected, got))
}

fn integer(value: &Value) -> DuckDbResult<Option<i128>> {
    let n = match value {
        Value::Null => return Ok(None),
        Value::Boolean(v) => i128::from(*v),
        Value::TinyInt(v) => i128::from(*v),
        Value::SmallInt(v) => i128::from(*v),
        Value::Int(v) => i128::from(*v),
        Value::BigInt(v) => i128::from(*v),
        Value::HugeInt(v) => *v,
        Value::UTinyInt(v) => i128::from(*v),
        Value::USmallInt(v) => i128::from(*v),
        Value::UInt(v) => i128::from(*v),
        Value::UBigInt(v) => i128::from(*v),
        other => return Err(mismatch("an integer", other)),
    };
    Ok(Some(n))
}

fn narrow<T: TryFrom<i128>>(value: &Value) -> DuckDbResult<Option<T>> {
    integer(value)?
        .map(|n| {
            T::try_from(n).map_err(|_| {
                DuckDbError::type_conversion(format!("{} is out of range for the return type", n))
            })
        })
        .transpose()
}

fn float(value: &Value) -> DuckDbResult<Option<f64>> {
    match value {
        Value::Float(v) => Ok(Some(f64::from(*v))),
        Value::Double(v) => Ok(Some(*v)),
        other => integer(other)
            .map(|n| n.map(|n| n as f64))
            .map_err(|_| mismatch("a number", other)),
    }
}

fn boolean(value: &Value) -> DuckDbResult<Option<bool>> {
    match value {
        Value::Null => Ok(None),
        Value::Boolean(v) => Ok(Some(*v)),
        other => Err(mismatch("a boolean", other)),
    }
}

fn text(value: &Value) -> DuckDbResult<Option<String>> {
    match value {
        Value::Null => Ok(None),
        Value::Text(s) => Ok(Some(s.clone())),
        other => Err(mismatch("a string", other)),
    }
}

fn blob(value: &Value) -> DuckDbResult<Option<Vec<u8>>> {
    match value {
        Value::Null => Ok(None),
        Value::Blob(b) => Ok(Some(b.clone())),
        Value::Text(s) => Ok(Some(s.clone().into_bytes())),
        other => Err(mismatch("a blob", other)),
    }
}

fn date(value: &Value) -> DuckDbResult<Option<i32>> {
    match value {
        Value::Null => Ok(None),
        Value::Date32(days) => Ok(Some(*days)),
        other => Err(mismatch("a date", other)),
    }
}

fn to_arrow(kind: ReturnKind, values: &[Value]) -> DuckDbResult<ArrayRef> {
    let values = values.iter();
    let array: ArrayRef = match kind {
        ReturnKind::Boolean => Arc::new(values.map(boolean).collect::<DuckDbResult<BooleanArray>>()?),
        ReturnKind::TinyInt => Arc::new(values.map(narrow::<i8>).collect::<DuckDbResult<Int8Array>>()?),
        ReturnKind::SmallInt => Arc::new(values.map(narrow::<i16>).collect::<DuckDbResult<Int16Array>>()?),
        ReturnKind::Integer => Arc::new(values.map(narrow::<i32>).collect::<DuckDbResult<Int32Array>>()?),
        ReturnKind::BigInt => Arc::new(values.map(narrow::<i64>).collect::<DuckDbResult<Int64Array>>()?),
        ReturnKind::UTinyInt => Arc::new(values.map(narrow::<u8>).collect::<DuckDbResult<UInt8Array>>()?),
        ReturnKind::USmallInt => Arc::new(values.map(narrow::<u16>).collect::<DuckDbResult<UInt16Array>>()?),
        ReturnKind::UInteger => Arc::new(values.map(narrow::<u32>).collect::<DuckDbResult<UInt32Array>>()?),
        ReturnKind::UBigInt => Arc::new(values.map(narrow::<u64>).collect::<DuckDbResult<UInt64Array>>()?),
        ReturnKind::Float => Arc::new(
            values
                .map(|v| float(v).map(|f| f.map(|f| f as f32)))
                .collect::<DuckDbResult<Float32Array>>()?,
        ),
        ReturnKind::Double => Arc::new(values.map(float).collect::<DuckDbResult<Float64Array>>()?),
        ReturnKind::Varchar => Arc::new(values.map(text).collect::<DuckDbResult<StringArray>>()?),
        ReturnKind::Blob => Arc::new(values.map(blob).collect::<DuckDbResult<BinaryArray>>()?),
        ReturnKind::Date => Arc::new(values.map(date).collect::<DuckDbResult<Date32Array>>()?),
    };
    Ok(array)
}
