#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use basalt_columnar::{
    ArrayColumn, ArrayPayload, Block, Column, ColumnError, ConstArrayColumn, ConstColumn, Offset,
    STRING_TERMINATOR, StringColumn, TERMINATOR_LEN, slice_len, slice_start,
};
use basalt_types::{DataType, Native, Value};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

// ── Errors ─────────────────────────────────────────────────────────────

/// Stable machine-readable code attached to every kernel error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    ArgumentCount,
    TypeMismatch,
    NonConstantArgument,
    UnsupportedColumnType,
    ZeroIndex,
    IndexOutOfRange,
    PositionOutOfBounds,
    NoColumnInSlot,
    MalformedColumn,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum KernelError {
    #[error("{function}: expected {expected} argument(s), got {actual}")]
    ArgumentCount {
        function: &'static str,
        expected: &'static str,
        actual: usize,
    },

    #[error("{function}: {detail}")]
    TypeMismatch {
        function: &'static str,
        detail: String,
    },

    /// `argument` is the 1-based position in the call, as reported to users.
    #[error("{function}: argument {argument} must be a constant column, got {description}")]
    NonConstantArgument {
        function: &'static str,
        argument: usize,
        description: String,
    },

    #[error("{function}: no kernel for argument {argument} with representation {description}")]
    UnsupportedColumnType {
        function: &'static str,
        argument: usize,
        description: String,
    },

    #[error("{function}: array indices are 1-based, got 0")]
    ZeroIndex { function: &'static str },

    /// `index` is the 1-based index as the caller wrote it.
    #[error("{function}: index {index} out of range for constant array of {len} element(s)")]
    IndexOutOfRange {
        function: &'static str,
        index: u64,
        len: usize,
    },

    #[error(transparent)]
    Column(#[from] ColumnError),
}

impl KernelError {
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::ArgumentCount { .. } => ErrorCode::ArgumentCount,
            Self::TypeMismatch { .. } => ErrorCode::TypeMismatch,
            Self::NonConstantArgument { .. } => ErrorCode::NonConstantArgument,
            Self::UnsupportedColumnType { .. } => ErrorCode::UnsupportedColumnType,
            Self::ZeroIndex { .. } => ErrorCode::ZeroIndex,
            Self::IndexOutOfRange { .. } => ErrorCode::IndexOutOfRange,
            Self::Column(error) => match error {
                ColumnError::PositionOutOfBounds { .. } => ErrorCode::PositionOutOfBounds,
                ColumnError::NoColumnInSlot { .. } => ErrorCode::NoColumnInSlot,
                ColumnError::OffsetsNotMonotonic { .. }
                | ColumnError::OffsetsPayloadMismatch { .. }
                | ColumnError::MissingTerminator { .. } => ErrorCode::MalformedColumn,
            },
        }
    }
}

// ── Kernel trait and registry ──────────────────────────────────────────

/// One vectorized function: pure plan-time type resolution plus per-block
/// execution. Implementations are stateless unit structs, so the executor
/// may call one instance concurrently on disjoint blocks.
pub trait Kernel: Send + Sync {
    /// Case-sensitive name the planner binds call sites to.
    fn name(&self) -> &'static str;

    /// Resolves the result type from argument types alone; touches no data.
    fn return_type(&self, argument_types: &[DataType]) -> Result<DataType, KernelError>;

    /// Transforms one block: reads the argument positions, writes exactly
    /// the result position, preserving the row count. The result slot is
    /// assigned only after the transformation completes.
    fn execute(
        &self,
        block: &mut Block,
        arguments: &[usize],
        result: usize,
    ) -> Result<(), KernelError>;
}

/// Name-keyed kernel lookup. `default()` registers the built-ins.
pub struct KernelRegistry {
    kernels: BTreeMap<&'static str, Box<dyn Kernel>>,
}

impl KernelRegistry {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            kernels: BTreeMap::new(),
        }
    }

    /// Later registrations shadow earlier ones with the same name.
    pub fn register(&mut self, kernel: Box<dyn Kernel>) {
        self.kernels.insert(kernel.name(), kernel);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&dyn Kernel> {
        self.kernels.get(name).map(|kernel| kernel.as_ref())
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.kernels.keys().copied()
    }
}

impl Default for KernelRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(ArrayKernel));
        registry.register(Box::new(ArrayElementKernel));
        registry.register(Box::new(HasKernel));
        registry
    }
}

// ── array ──────────────────────────────────────────────────────────────

/// `array(a1, ..., an)`: folds constant scalar arguments of one shared type
/// into a constant array literal broadcast to the block's row count. This
/// kernel only folds literals; per-row inputs are rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArrayKernel;

impl ArrayKernel {
    pub const NAME: &'static str = "array";
}

impl Kernel for ArrayKernel {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn return_type(&self, argument_types: &[DataType]) -> Result<DataType, KernelError> {
        let first = argument_types.first().ok_or(KernelError::ArgumentCount {
            function: Self::NAME,
            expected: "at least one",
            actual: 0,
        })?;
        for argument in argument_types {
            if argument != first {
                return Err(KernelError::TypeMismatch {
                    function: Self::NAME,
                    detail: format!("arguments must share one type, got {first} and {argument}"),
                });
            }
        }
        Ok(DataType::Array(Box::new(first.clone())))
    }

    fn execute(
        &self,
        block: &mut Block,
        arguments: &[usize],
        result: usize,
    ) -> Result<(), KernelError> {
        if arguments.is_empty() {
            return Err(KernelError::ArgumentCount {
                function: Self::NAME,
                expected: "at least one",
                actual: 0,
            });
        }
        let rows = block.rows();
        debug!(
            function = Self::NAME,
            rows,
            arguments = arguments.len(),
            "folding constant arguments into an array literal"
        );
        let mut literal = Vec::with_capacity(arguments.len());
        for (ordinal, &argument) in arguments.iter().enumerate() {
            let column = block.column(argument)?;
            match column.broadcast_value() {
                Some(value) => literal.push(value),
                None => {
                    return Err(KernelError::NonConstantArgument {
                        function: Self::NAME,
                        argument: ordinal + 1,
                        description: column.describe(),
                    });
                }
            }
        }
        block.set_column(result, Column::ConstArray(ConstArrayColumn::new(rows, literal)))?;
        Ok(())
    }
}

// ── arrayElement ───────────────────────────────────────────────────────

/// `arrayElement(arr, k)`: the k-th element of each row's array, 1-based,
/// with the index constant across the block. Vector rows shorter than `k`
/// yield the element type's default; the constant-array path raises
/// `IndexOutOfRange` instead. The asymmetry is long-standing observable
/// behavior and is kept.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArrayElementKernel;

impl ArrayElementKernel {
    pub const NAME: &'static str = "arrayElement";
}

impl Kernel for ArrayElementKernel {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn return_type(&self, argument_types: &[DataType]) -> Result<DataType, KernelError> {
        let (array_type, index_type) = two_types(Self::NAME, argument_types)?;
        let element = array_element_type(Self::NAME, array_type)?;
        if !index_type.is_unsigned_int() {
            return Err(KernelError::TypeMismatch {
                function: Self::NAME,
                detail: format!("index argument must be an unsigned integer, got {index_type}"),
            });
        }
        Ok(element.clone())
    }

    fn execute(
        &self,
        block: &mut Block,
        arguments: &[usize],
        result: usize,
    ) -> Result<(), KernelError> {
        let (array_position, index_position) = two_positions(Self::NAME, arguments)?;
        let index_value = constant_value(Self::NAME, block, index_position, 2)?;
        let index = unsigned_index(Self::NAME, &index_value)?;
        if index == 0 {
            return Err(KernelError::ZeroIndex {
                function: Self::NAME,
            });
        }
        // 0-based from here on.
        let index = index - 1;
        debug!(
            function = Self::NAME,
            rows = block.rows(),
            index,
            "extracting one element per row"
        );
        let output = match block.column(array_position)? {
            Column::Array(array) => element_at(array, index),
            Column::ConstArray(constant) => element_at_literal(Self::NAME, constant, index)?,
            other => {
                return Err(KernelError::UnsupportedColumnType {
                    function: Self::NAME,
                    argument: 1,
                    description: other.describe(),
                });
            }
        };
        block.set_column(result, output)?;
        Ok(())
    }
}

/// Payload dispatch for the element accessor; arm order follows the fixed
/// trial order of the numeric widths, then strings.
fn element_at(array: &ArrayColumn, index: u64) -> Column {
    let offsets = array.offsets();
    match array.payload() {
        ArrayPayload::UInt8(data) => Column::UInt8(element_at_numeric(data, offsets, index)),
        ArrayPayload::UInt16(data) => Column::UInt16(element_at_numeric(data, offsets, index)),
        ArrayPayload::UInt32(data) => Column::UInt32(element_at_numeric(data, offsets, index)),
        ArrayPayload::UInt64(data) => Column::UInt64(element_at_numeric(data, offsets, index)),
        ArrayPayload::Int8(data) => Column::Int8(element_at_numeric(data, offsets, index)),
        ArrayPayload::Int16(data) => Column::Int16(element_at_numeric(data, offsets, index)),
        ArrayPayload::Int32(data) => Column::Int32(element_at_numeric(data, offsets, index)),
        ArrayPayload::Int64(data) => Column::Int64(element_at_numeric(data, offsets, index)),
        ArrayPayload::Float32(data) => Column::Float32(element_at_numeric(data, offsets, index)),
        ArrayPayload::Float64(data) => Column::Float64(element_at_numeric(data, offsets, index)),
        ArrayPayload::String(strings) => Column::String(element_at_string(strings, offsets, index)),
    }
}

/// One element per row, or the type default when the row holds fewer than
/// `index + 1` elements. Linear in the row count.
fn element_at_numeric<T: Copy + Default>(data: &[T], offsets: &[Offset], index: u64) -> Vec<T> {
    let mut result = Vec::with_capacity(offsets.len());
    let mut current_offset: Offset = 0;
    for &offset in offsets {
        let array_size = offset - current_offset;
        if index < array_size {
            result.push(data[(current_offset + index) as usize]);
        } else {
            result.push(T::default());
        }
        current_offset = offset;
    }
    result
}

/// One string per row, copied as its full terminated byte range. A row
/// holding fewer than `index + 1` strings gets the empty string, which
/// still occupies one terminator byte in the output.
fn element_at_string(strings: &StringColumn, offsets: &[Offset], index: u64) -> StringColumn {
    let mut result = StringColumn::with_capacity(offsets.len(), strings.data().len());
    let mut current_offset: Offset = 0;
    for &offset in offsets {
        let array_size = offset - current_offset;
        if index < array_size {
            let element = (current_offset + index) as usize;
            let start = slice_start(strings.offsets(), element);
            let end = strings.offsets()[element];
            result.push_terminated(&strings.data()[start as usize..end as usize]);
        } else {
            result.push_terminated(&[STRING_TERMINATOR]);
        }
        current_offset = offset;
    }
    result
}

/// Bounds-checked lookup into the shared literal. Unlike the vector paths
/// an out-of-range index raises here.
fn element_at_literal(
    function: &'static str,
    constant: &ConstArrayColumn,
    index: u64,
) -> Result<Column, KernelError> {
    let literal = constant.literal();
    let value = literal
        .get(index as usize)
        .ok_or_else(|| KernelError::IndexOutOfRange {
            function,
            index: index + 1,
            len: literal.len(),
        })?;
    Ok(Column::Const(ConstColumn::new(constant.len(), value.clone())))
}

// ── has ────────────────────────────────────────────────────────────────

/// `has(arr, x)`: per-row membership of a block-wide needle, as a 0/1
/// `UInt8` column. Element and needle types must match exactly; there is
/// no numeric widening.
#[derive(Debug, Clone, Copy, Default)]
pub struct HasKernel;

impl HasKernel {
    pub const NAME: &'static str = "has";
}

impl Kernel for HasKernel {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn return_type(&self, argument_types: &[DataType]) -> Result<DataType, KernelError> {
        let (array_type, needle_type) = two_types(Self::NAME, argument_types)?;
        let element = array_element_type(Self::NAME, array_type)?;
        if element != needle_type {
            return Err(KernelError::TypeMismatch {
                function: Self::NAME,
                detail: format!("array elements are {element} but the needle is {needle_type}"),
            });
        }
        Ok(DataType::UInt8)
    }

    fn execute(
        &self,
        block: &mut Block,
        arguments: &[usize],
        result: usize,
    ) -> Result<(), KernelError> {
        let (array_position, needle_position) = two_positions(Self::NAME, arguments)?;
        let needle = constant_value(Self::NAME, block, needle_position, 2)?;
        debug!(
            function = Self::NAME,
            rows = block.rows(),
            needle = needle.kind_name(),
            "scanning rows for the needle"
        );
        let output = match block.column(array_position)? {
            Column::Array(array) => has_value(Self::NAME, array, &needle)?,
            Column::ConstArray(constant) => {
                let found = constant.literal().iter().any(|element| element == &needle);
                Column::Const(ConstColumn::new(constant.len(), Value::UInt8(u8::from(found))))
            }
            other => {
                return Err(KernelError::UnsupportedColumnType {
                    function: Self::NAME,
                    argument: 1,
                    description: other.describe(),
                });
            }
        };
        block.set_column(result, output)?;
        Ok(())
    }
}

/// Payload dispatch for the membership tester, same arm order as the
/// element accessor. Needle extraction is kind-strict.
fn has_value(
    function: &'static str,
    array: &ArrayColumn,
    needle: &Value,
) -> Result<Column, KernelError> {
    let offsets = array.offsets();
    let flags = match array.payload() {
        ArrayPayload::UInt8(data) => {
            has_numeric(data, offsets, extract_needle::<u8>(function, needle)?)
        }
        ArrayPayload::UInt16(data) => {
            has_numeric(data, offsets, extract_needle::<u16>(function, needle)?)
        }
        ArrayPayload::UInt32(data) => {
            has_numeric(data, offsets, extract_needle::<u32>(function, needle)?)
        }
        ArrayPayload::UInt64(data) => {
            has_numeric(data, offsets, extract_needle::<u64>(function, needle)?)
        }
        ArrayPayload::Int8(data) => {
            has_numeric(data, offsets, extract_needle::<i8>(function, needle)?)
        }
        ArrayPayload::Int16(data) => {
            has_numeric(data, offsets, extract_needle::<i16>(function, needle)?)
        }
        ArrayPayload::Int32(data) => {
            has_numeric(data, offsets, extract_needle::<i32>(function, needle)?)
        }
        ArrayPayload::Int64(data) => {
            has_numeric(data, offsets, extract_needle::<i64>(function, needle)?)
        }
        ArrayPayload::Float32(data) => {
            has_numeric(data, offsets, extract_needle::<f32>(function, needle)?)
        }
        ArrayPayload::Float64(data) => {
            has_numeric(data, offsets, extract_needle::<f64>(function, needle)?)
        }
        ArrayPayload::String(strings) => match needle {
            Value::String(text) => has_string(strings, offsets, text.as_bytes()),
            other => {
                return Err(KernelError::TypeMismatch {
                    function,
                    detail: format!(
                        "array elements are String but the needle is {}",
                        other.kind_name()
                    ),
                });
            }
        },
    };
    Ok(Column::UInt8(flags))
}

/// 0/1 per row; scans each row left to right and stops at the first hit.
fn has_numeric<T: Copy + PartialEq>(data: &[T], offsets: &[Offset], needle: T) -> Vec<u8> {
    let mut result = Vec::with_capacity(offsets.len());
    let mut current_offset: Offset = 0;
    for &offset in offsets {
        let row = &data[current_offset as usize..offset as usize];
        result.push(u8::from(row.contains(&needle)));
        current_offset = offset;
    }
    result
}

/// 0/1 per row. A hit requires the full terminated range length to match
/// the needle length plus the terminator before any bytes are compared.
fn has_string(strings: &StringColumn, offsets: &[Offset], needle: &[u8]) -> Vec<u8> {
    let needle_range_len = needle.len() as Offset + TERMINATOR_LEN;
    let mut result = Vec::with_capacity(offsets.len());
    let mut current_offset: Offset = 0;
    for &offset in offsets {
        let mut found = 0_u8;
        for element in current_offset as usize..offset as usize {
            if slice_len(strings.offsets(), element) == needle_range_len
                && strings.bytes_at(element) == needle
            {
                found = 1;
                break;
            }
        }
        result.push(found);
        current_offset = offset;
    }
    result
}

// ── Shared argument plumbing ───────────────────────────────────────────

fn two_types<'a>(
    function: &'static str,
    argument_types: &'a [DataType],
) -> Result<(&'a DataType, &'a DataType), KernelError> {
    match argument_types {
        [first, second] => Ok((first, second)),
        _ => Err(KernelError::ArgumentCount {
            function,
            expected: "exactly two",
            actual: argument_types.len(),
        }),
    }
}

fn two_positions(
    function: &'static str,
    arguments: &[usize],
) -> Result<(usize, usize), KernelError> {
    match arguments {
        [first, second] => Ok((*first, *second)),
        _ => Err(KernelError::ArgumentCount {
            function,
            expected: "exactly two",
            actual: arguments.len(),
        }),
    }
}

fn array_element_type<'a>(
    function: &'static str,
    data_type: &'a DataType,
) -> Result<&'a DataType, KernelError> {
    data_type
        .as_array_element()
        .ok_or_else(|| KernelError::TypeMismatch {
            function,
            detail: format!("first argument must be an array, got {data_type}"),
        })
}

/// Broadcast value of the constant column at `position`; `ordinal` is the
/// 1-based argument number used in diagnostics.
fn constant_value(
    function: &'static str,
    block: &Block,
    position: usize,
    ordinal: usize,
) -> Result<Value, KernelError> {
    let column = block.column(position)?;
    column
        .broadcast_value()
        .ok_or_else(|| KernelError::NonConstantArgument {
            function,
            argument: ordinal,
            description: column.describe(),
        })
}

/// Reads a block-wide index argument as `u64`. The planner admits only
/// unsigned-integer index types, so any other runtime kind is a mismatch.
fn unsigned_index(function: &'static str, value: &Value) -> Result<u64, KernelError> {
    match value {
        Value::UInt8(index) => Ok(u64::from(*index)),
        Value::UInt16(index) => Ok(u64::from(*index)),
        Value::UInt32(index) => Ok(u64::from(*index)),
        Value::UInt64(index) => Ok(*index),
        other => Err(KernelError::TypeMismatch {
            function,
            detail: format!(
                "index argument must be an unsigned integer, got {}",
                other.kind_name()
            ),
        }),
    }
}

fn extract_needle<T: Native>(function: &'static str, needle: &Value) -> Result<T, KernelError> {
    T::from_value(needle).ok_or_else(|| KernelError::TypeMismatch {
        function,
        detail: format!(
            "array elements are {} but the needle is {}",
            T::DATA_TYPE,
            needle.kind_name()
        ),
    })
}
