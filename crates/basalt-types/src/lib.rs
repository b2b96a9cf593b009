#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};

/// Declared type of a column or scalar, as resolved by the planner.
///
/// Type identity is name identity: two `DataType`s are interchangeable
/// exactly when they render to the same name, which for this closed enum
/// coincides with `==`. There is no implicit widening anywhere in the
/// kernel layer; `Array(UInt8)` and `Array(Int64)` are unrelated types.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    String,
    Array(Box<DataType>),
}

impl DataType {
    #[must_use]
    pub fn is_unsigned_int(&self) -> bool {
        matches!(
            self,
            Self::UInt8 | Self::UInt16 | Self::UInt32 | Self::UInt64
        )
    }

    #[must_use]
    pub fn is_numeric(&self) -> bool {
        !matches!(self, Self::String | Self::Array(_))
    }

    /// Element type when `self` is an array type.
    #[must_use]
    pub fn as_array_element(&self) -> Option<&DataType> {
        match self {
            Self::Array(element) => Some(element),
            _ => None,
        }
    }

    /// The explicit default value of the type: zero for every numeric kind,
    /// the empty string, the empty array. The vector kernels fill
    /// out-of-range rows with exactly these values.
    #[must_use]
    pub fn default_value(&self) -> Value {
        match self {
            Self::UInt8 => Value::UInt8(0),
            Self::UInt16 => Value::UInt16(0),
            Self::UInt32 => Value::UInt32(0),
            Self::UInt64 => Value::UInt64(0),
            Self::Int8 => Value::Int8(0),
            Self::Int16 => Value::Int16(0),
            Self::Int32 => Value::Int32(0),
            Self::Int64 => Value::Int64(0),
            Self::Float32 => Value::Float32(0.0),
            Self::Float64 => Value::Float64(0.0),
            Self::String => Value::String(String::new()),
            Self::Array(_) => Value::Array(Vec::new()),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UInt8 => f.write_str("UInt8"),
            Self::UInt16 => f.write_str("UInt16"),
            Self::UInt32 => f.write_str("UInt32"),
            Self::UInt64 => f.write_str("UInt64"),
            Self::Int8 => f.write_str("Int8"),
            Self::Int16 => f.write_str("Int16"),
            Self::Int32 => f.write_str("Int32"),
            Self::Int64 => f.write_str("Int64"),
            Self::Float32 => f.write_str("Float32"),
            Self::Float64 => f.write_str("Float64"),
            Self::String => f.write_str("String"),
            Self::Array(element) => write!(f, "Array({element})"),
        }
    }
}

/// A single scalar value: the unit exchanged between constant columns and
/// per-row values, one variant per supported element kind.
///
/// Equality is total and strict: same-kind values compare their payloads,
/// values of different kinds compare unequal (never an error). This is the
/// equality the membership tester applies on its constant-array path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Value {
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    String(String),
    Array(Vec<Value>),
}

impl Value {
    /// Name of the value's kind, for diagnostics. Nested arrays report a
    /// bare `"Array"`; an array value does not carry its element type.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::UInt8(_) => "UInt8",
            Self::UInt16(_) => "UInt16",
            Self::UInt32(_) => "UInt32",
            Self::UInt64(_) => "UInt64",
            Self::Int8(_) => "Int8",
            Self::Int16(_) => "Int16",
            Self::Int32(_) => "Int32",
            Self::Int64(_) => "Int64",
            Self::Float32(_) => "Float32",
            Self::Float64(_) => "Float64",
            Self::String(_) => "String",
            Self::Array(_) => "Array",
        }
    }
}

// ── Native numeric kinds ───────────────────────────────────────────────

/// The closed set of fixed-width numeric Rust types backing dense columns
/// and array payloads. Bridges each native type to its declared
/// [`DataType`] and extracts it from a [`Value`] of the matching kind.
///
/// Implemented for exactly the ten numeric kinds; do not implement this
/// for other types.
pub trait Native: Copy + Default + PartialEq + fmt::Debug {
    const DATA_TYPE: DataType;

    /// Extract a native value from a scalar of the matching kind.
    /// Any other kind yields `None`; the caller decides how strict to be.
    fn from_value(value: &Value) -> Option<Self>;
}

macro_rules! impl_native {
    ($($native:ty => $kind:ident),* $(,)?) => {$(
        impl Native for $native {
            const DATA_TYPE: DataType = DataType::$kind;

            fn from_value(value: &Value) -> Option<Self> {
                match value {
                    Value::$kind(v) => Some(*v),
                    _ => None,
                }
            }
        }
    )*};
}

impl_native! {
    u8 => UInt8,
    u16 => UInt16,
    u32 => UInt32,
    u64 => UInt64,
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    f32 => Float32,
    f64 => Float64,
}
