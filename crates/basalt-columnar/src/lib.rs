#![forbid(unsafe_code)]

use basalt_types::{DataType, Value};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Cumulative end-position inside a flat payload buffer.
pub type Offset = u64;

/// Terminator byte appended after every string's content bytes.
pub const STRING_TERMINATOR: u8 = 0;

/// Every string's byte range ends with exactly one terminator byte, so a
/// range of length `n` holds `n - TERMINATOR_LEN` content bytes.
pub const TERMINATOR_LEN: Offset = 1;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ColumnError {
    #[error("block position {position} out of bounds for width {width}")]
    PositionOutOfBounds { position: usize, width: usize },
    #[error("block slot {position} ({name}) holds no column")]
    NoColumnInSlot { position: usize, name: String },
    #[error("offsets are not monotonic at index {index}")]
    OffsetsNotMonotonic { index: usize },
    #[error("last offset {last} does not match payload length {payload_len}")]
    OffsetsPayloadMismatch { last: Offset, payload_len: usize },
    #[error("string {index} does not end with the terminator byte")]
    MissingTerminator { index: usize },
}

// ── Offset codec ───────────────────────────────────────────────────────

/// Start of sub-range `i` in a flat payload addressed by cumulative
/// `offsets`. The `i == 0` boundary is an explicit branch; the offsets
/// sequence never carries a leading sentinel element.
///
/// `i` must be a valid index into `offsets`.
#[must_use]
pub fn slice_start(offsets: &[Offset], i: usize) -> Offset {
    if i == 0 {
        0
    } else {
        offsets[i - 1]
    }
}

/// Length of sub-range `i`. For string offsets this length includes the
/// trailing terminator byte.
#[must_use]
pub fn slice_len(offsets: &[Offset], i: usize) -> Offset {
    offsets[i] - slice_start(offsets, i)
}

// ── String column ──────────────────────────────────────────────────────

/// Variable-length byte strings in a flat buffer: concatenated content
/// bytes, each followed by one terminator byte, addressed by cumulative
/// end-offsets (one per string).
///
/// Invariants: `offsets` is strictly increasing (every range holds at
/// least the terminator) and the last offset equals `data.len()`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StringColumn {
    data: Vec<u8>,
    offsets: Vec<Offset>,
}

impl StringColumn {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-sizes for `rows` strings over roughly `data_capacity` payload
    /// bytes; growth past the estimate stays amortized.
    #[must_use]
    pub fn with_capacity(rows: usize, data_capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(data_capacity),
            offsets: Vec::with_capacity(rows),
        }
    }

    /// Validates the offsets invariants and the terminator convention.
    pub fn from_parts(data: Vec<u8>, offsets: Vec<Offset>) -> Result<Self, ColumnError> {
        let mut previous: Offset = 0;
        for (index, &offset) in offsets.iter().enumerate() {
            if offset <= previous {
                return Err(ColumnError::OffsetsNotMonotonic { index });
            }
            previous = offset;
        }
        if previous as usize != data.len() {
            return Err(ColumnError::OffsetsPayloadMismatch {
                last: previous,
                payload_len: data.len(),
            });
        }
        // Every offset is now known to be in bounds.
        for (index, &offset) in offsets.iter().enumerate() {
            if data[offset as usize - 1] != STRING_TERMINATOR {
                return Err(ColumnError::MissingTerminator { index });
            }
        }
        Ok(Self { data, offsets })
    }

    #[must_use]
    pub fn from_strs(items: &[&str]) -> Self {
        let bytes: usize = items.iter().map(|s| s.len() + TERMINATOR_LEN as usize).sum();
        let mut column = Self::with_capacity(items.len(), bytes);
        for item in items {
            column.push_str(item);
        }
        column
    }

    /// Appends one string: content bytes plus the terminator.
    pub fn push_str(&mut self, content: &str) {
        self.data.extend_from_slice(content.as_bytes());
        self.data.push(STRING_TERMINATOR);
        self.offsets.push(self.data.len() as Offset);
    }

    /// Appends one already-terminated byte range, exactly as copied out of
    /// another string column. `raw` must end with the terminator byte.
    pub fn push_terminated(&mut self, raw: &[u8]) {
        self.data.extend_from_slice(raw);
        self.offsets.push(self.data.len() as Offset);
    }

    /// Number of strings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Content bytes of string `i`, excluding the terminator.
    #[must_use]
    pub fn bytes_at(&self, i: usize) -> &[u8] {
        let start = slice_start(&self.offsets, i);
        let end = self.offsets[i] - TERMINATOR_LEN;
        &self.data[start as usize..end as usize]
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[must_use]
    pub fn offsets(&self) -> &[Offset] {
        &self.offsets
    }
}

// ── Array column ───────────────────────────────────────────────────────

/// Flat payload of an array column: one dense buffer per numeric kind, or
/// a nested string column. The closed set of variants is the dispatch
/// matrix the kernels match over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArrayPayload {
    UInt8(Vec<u8>),
    UInt16(Vec<u16>),
    UInt32(Vec<u32>),
    UInt64(Vec<u64>),
    Int8(Vec<i8>),
    Int16(Vec<i16>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
    String(StringColumn),
}

impl ArrayPayload {
    /// Number of flat elements across all rows.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::UInt8(data) => data.len(),
            Self::UInt16(data) => data.len(),
            Self::UInt32(data) => data.len(),
            Self::UInt64(data) => data.len(),
            Self::Int8(data) => data.len(),
            Self::Int16(data) => data.len(),
            Self::Int32(data) => data.len(),
            Self::Int64(data) => data.len(),
            Self::Float32(data) => data.len(),
            Self::Float64(data) => data.len(),
            Self::String(strings) => strings.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Declared element type of the payload.
    #[must_use]
    pub fn data_type(&self) -> DataType {
        match self {
            Self::UInt8(_) => DataType::UInt8,
            Self::UInt16(_) => DataType::UInt16,
            Self::UInt32(_) => DataType::UInt32,
            Self::UInt64(_) => DataType::UInt64,
            Self::Int8(_) => DataType::Int8,
            Self::Int16(_) => DataType::Int16,
            Self::Int32(_) => DataType::Int32,
            Self::Int64(_) => DataType::Int64,
            Self::Float32(_) => DataType::Float32,
            Self::Float64(_) => DataType::Float64,
            Self::String(_) => DataType::String,
        }
    }
}

macro_rules! impl_payload_from {
    ($($native:ty => $kind:ident),* $(,)?) => {$(
        impl From<Vec<$native>> for ArrayPayload {
            fn from(data: Vec<$native>) -> Self {
                Self::$kind(data)
            }
        }
    )*};
}

impl_payload_from! {
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

impl From<StringColumn> for ArrayPayload {
    fn from(strings: StringColumn) -> Self {
        Self::String(strings)
    }
}

/// One array value per row: a flat nested payload plus cumulative
/// end-offsets, one per row. Row `i` owns payload elements
/// `[slice_start(offsets, i), offsets[i])`.
///
/// Invariants: `offsets` is non-decreasing (rows may be empty) and the
/// last offset equals the payload element count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayColumn {
    payload: ArrayPayload,
    offsets: Vec<Offset>,
}

impl ArrayColumn {
    /// Validates the offsets invariants against the payload.
    pub fn from_parts(payload: ArrayPayload, offsets: Vec<Offset>) -> Result<Self, ColumnError> {
        let mut previous: Offset = 0;
        for (index, &offset) in offsets.iter().enumerate() {
            if offset < previous {
                return Err(ColumnError::OffsetsNotMonotonic { index });
            }
            previous = offset;
        }
        if previous as usize != payload.len() {
            return Err(ColumnError::OffsetsPayloadMismatch {
                last: previous,
                payload_len: payload.len(),
            });
        }
        Ok(Self { payload, offsets })
    }

    /// Builds a numeric array column from per-row element slices.
    #[must_use]
    pub fn from_rows<T: Copy>(rows: &[Vec<T>]) -> Self
    where
        Vec<T>: Into<ArrayPayload>,
    {
        let mut flat: Vec<T> = Vec::with_capacity(rows.iter().map(Vec::len).sum());
        let mut offsets = Vec::with_capacity(rows.len());
        for row in rows {
            flat.extend_from_slice(row);
            offsets.push(flat.len() as Offset);
        }
        Self {
            payload: flat.into(),
            offsets,
        }
    }

    /// Builds a string array column from per-row string slices.
    #[must_use]
    pub fn from_string_rows(rows: &[Vec<&str>]) -> Self {
        let mut strings = StringColumn::new();
        let mut offsets = Vec::with_capacity(rows.len());
        let mut total: Offset = 0;
        for row in rows {
            for item in row {
                strings.push_str(item);
            }
            total += row.len() as Offset;
            offsets.push(total);
        }
        Self {
            payload: ArrayPayload::String(strings),
            offsets,
        }
    }

    /// Number of rows (array values), not flat elements.
    #[must_use]
    pub fn rows(&self) -> usize {
        self.offsets.len()
    }

    #[must_use]
    pub fn payload(&self) -> &ArrayPayload {
        &self.payload
    }

    #[must_use]
    pub fn offsets(&self) -> &[Offset] {
        &self.offsets
    }
}

// ── Constant columns ───────────────────────────────────────────────────

/// One broadcast scalar claiming a row count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstColumn {
    len: usize,
    value: Value,
}

impl ConstColumn {
    #[must_use]
    pub fn new(len: usize, value: Value) -> Self {
        Self { len, value }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn value(&self) -> &Value {
        &self.value
    }
}

/// One literal array value repeated for every row: the ordered literal
/// sequence plus a row count. Logically an array column whose rows are
/// all identical.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstArrayColumn {
    len: usize,
    literal: Vec<Value>,
}

impl ConstArrayColumn {
    #[must_use]
    pub fn new(len: usize, literal: Vec<Value>) -> Self {
        Self { len, literal }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The literal sequence shared by every row.
    #[must_use]
    pub fn literal(&self) -> &[Value] {
        &self.literal
    }
}

// ── Column ─────────────────────────────────────────────────────────────

/// The closed set of runtime column representations a block slot can
/// hold. Kernels dispatch by matching on this enum; there is no
/// per-element virtual call anywhere downstream of the match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Column {
    UInt8(Vec<u8>),
    UInt16(Vec<u16>),
    UInt32(Vec<u32>),
    UInt64(Vec<u64>),
    Int8(Vec<i8>),
    Int16(Vec<i16>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
    String(StringColumn),
    Array(ArrayColumn),
    Const(ConstColumn),
    ConstArray(ConstArrayColumn),
}

impl Column {
    /// Row count of the representation.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::UInt8(data) => data.len(),
            Self::UInt16(data) => data.len(),
            Self::UInt32(data) => data.len(),
            Self::UInt64(data) => data.len(),
            Self::Int8(data) => data.len(),
            Self::Int16(data) => data.len(),
            Self::Int32(data) => data.len(),
            Self::Int64(data) => data.len(),
            Self::Float32(data) => data.len(),
            Self::Float64(data) => data.len(),
            Self::String(strings) => strings.len(),
            Self::Array(array) => array.rows(),
            Self::Const(constant) => constant.len(),
            Self::ConstArray(constant) => constant.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn is_const(&self) -> bool {
        matches!(self, Self::Const(_) | Self::ConstArray(_))
    }

    /// The single value a constant column broadcasts to every row, or
    /// `None` for per-row representations.
    #[must_use]
    pub fn broadcast_value(&self) -> Option<Value> {
        match self {
            Self::Const(constant) => Some(constant.value().clone()),
            Self::ConstArray(constant) => Some(Value::Array(constant.literal().to_vec())),
            _ => None,
        }
    }

    /// Representation name for diagnostics.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::UInt8(_) => "UInt8".to_owned(),
            Self::UInt16(_) => "UInt16".to_owned(),
            Self::UInt32(_) => "UInt32".to_owned(),
            Self::UInt64(_) => "UInt64".to_owned(),
            Self::Int8(_) => "Int8".to_owned(),
            Self::Int16(_) => "Int16".to_owned(),
            Self::Int32(_) => "Int32".to_owned(),
            Self::Int64(_) => "Int64".to_owned(),
            Self::Float32(_) => "Float32".to_owned(),
            Self::Float64(_) => "Float64".to_owned(),
            Self::String(_) => "String".to_owned(),
            Self::Array(array) => format!("Array({})", array.payload().data_type()),
            Self::Const(constant) => format!("Const({})", constant.value().kind_name()),
            Self::ConstArray(_) => "ConstArray".to_owned(),
        }
    }
}

// ── Block ──────────────────────────────────────────────────────────────

/// One positionally-addressed slot of a block: a name and declared type,
/// plus the column once materialized. Result slots start empty and are
/// assigned exactly once, after a kernel finishes its transformation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockSlot {
    name: String,
    data_type: DataType,
    column: Option<Column>,
}

impl BlockSlot {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn data_type(&self) -> &DataType {
        &self.data_type
    }

    #[must_use]
    pub fn column(&self) -> Option<&Column> {
        self.column.as_ref()
    }
}

/// One batch of rows: an ordered sequence of typed column slots sharing a
/// row count. Kernels read the slots named by their argument positions
/// and write exactly one result slot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Block {
    slots: Vec<BlockSlot>,
}

impl Block {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of slots, not rows.
    #[must_use]
    pub fn width(&self) -> usize {
        self.slots.len()
    }

    /// Shared row count, taken from the first materialized slot. An empty
    /// block (or one of only result slots) has zero rows.
    #[must_use]
    pub fn rows(&self) -> usize {
        self.slots
            .iter()
            .find_map(|slot| slot.column.as_ref().map(Column::len))
            .unwrap_or(0)
    }

    /// Appends a materialized slot; returns its position.
    pub fn push(&mut self, name: impl Into<String>, data_type: DataType, column: Column) -> usize {
        self.slots.push(BlockSlot {
            name: name.into(),
            data_type,
            column: Some(column),
        });
        self.slots.len() - 1
    }

    /// Appends an empty slot for a kernel result; returns its position.
    pub fn push_result_slot(&mut self, name: impl Into<String>, data_type: DataType) -> usize {
        self.slots.push(BlockSlot {
            name: name.into(),
            data_type,
            column: None,
        });
        self.slots.len() - 1
    }

    pub fn slot(&self, position: usize) -> Result<&BlockSlot, ColumnError> {
        self.slots
            .get(position)
            .ok_or_else(|| ColumnError::PositionOutOfBounds {
                position,
                width: self.slots.len(),
            })
    }

    /// The materialized column at `position`.
    pub fn column(&self, position: usize) -> Result<&Column, ColumnError> {
        let slot = self.slot(position)?;
        slot.column.as_ref().ok_or_else(|| ColumnError::NoColumnInSlot {
            position,
            name: slot.name.clone(),
        })
    }

    /// Assigns the column of slot `position`.
    pub fn set_column(&mut self, position: usize, column: Column) -> Result<(), ColumnError> {
        let width = self.slots.len();
        match self.slots.get_mut(position) {
            Some(slot) => {
                slot.column = Some(column);
                Ok(())
            }
            None => Err(ColumnError::PositionOutOfBounds { position, width }),
        }
    }
}
