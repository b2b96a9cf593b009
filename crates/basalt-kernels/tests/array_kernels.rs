#![forbid(unsafe_code)]

//! End-to-end coverage of the built-in kernels driven through the public
//! registry and block surface, the way a query executor calls them.

use basalt_columnar::{ArrayColumn, Block, Column, ConstArrayColumn, ConstColumn};
use basalt_kernels::{ErrorCode, KernelError, KernelRegistry};
use basalt_types::{DataType, Value};

// ---------------------------------------------------------------------------
// Shared plumbing
// ---------------------------------------------------------------------------

/// Binds `function` through the registry, appends a result slot, executes,
/// and hands back the materialized result column.
fn run(
    block: &mut Block,
    function: &str,
    arguments: &[usize],
    result_type: DataType,
) -> Result<Column, KernelError> {
    let registry = KernelRegistry::default();
    let kernel = registry.get(function).expect("registered kernel");
    let result = block.push_result_slot("result", result_type);
    kernel.execute(block, arguments, result)?;
    Ok(block.column(result).expect("result assigned").clone())
}

fn const_uint64(rows: usize, value: u64) -> Column {
    Column::Const(ConstColumn::new(rows, Value::UInt64(value)))
}

fn uint32_array_type() -> DataType {
    DataType::Array(Box::new(DataType::UInt32))
}

/// Three rows of UInt32 arrays plus a constant index argument.
fn numeric_accessor_block(index: u64) -> (Block, [usize; 2]) {
    let mut block = Block::new();
    let arr = block.push(
        "arr",
        uint32_array_type(),
        Column::Array(ArrayColumn::from_rows(&[vec![10_u32, 20, 30], vec![40], vec![]])),
    );
    let idx = block.push("idx", DataType::UInt64, const_uint64(3, index));
    (block, [arr, idx])
}

// ---------------------------------------------------------------------------
// array: constant folding
// ---------------------------------------------------------------------------

#[test]
fn array_folds_constants_into_a_literal_broadcast_to_every_row() {
    let mut block = Block::new();
    let a = block.push("a", DataType::UInt64, const_uint64(5, 1));
    let b = block.push("b", DataType::UInt64, const_uint64(5, 2));
    let c = block.push("c", DataType::UInt64, const_uint64(5, 3));
    let out = run(
        &mut block,
        "array",
        &[a, b, c],
        DataType::Array(Box::new(DataType::UInt64)),
    )
    .expect("array");
    assert_eq!(out.len(), 5);
    assert_eq!(
        out,
        Column::ConstArray(ConstArrayColumn::new(
            5,
            vec![Value::UInt64(1), Value::UInt64(2), Value::UInt64(3)],
        ))
    );
}

#[test]
fn array_with_no_arguments_is_an_arity_error() {
    let mut block = Block::new();
    block.push("pad", DataType::UInt8, Column::UInt8(vec![0, 0]));
    let err = run(
        &mut block,
        "array",
        &[],
        DataType::Array(Box::new(DataType::UInt8)),
    )
    .expect_err("no arguments");
    assert_eq!(err.code(), ErrorCode::ArgumentCount);
}

#[test]
fn array_plan_time_check_rejects_mixed_argument_types() {
    let registry = KernelRegistry::default();
    let kernel = registry.get("array").expect("registered kernel");
    let err = kernel
        .return_type(&[DataType::UInt8, DataType::String])
        .expect_err("mixed types");
    assert_eq!(err.code(), ErrorCode::TypeMismatch);
}

#[test]
fn array_rejects_per_row_arguments() {
    let mut block = Block::new();
    let a = block.push("a", DataType::UInt32, Column::UInt32(vec![1, 2, 3]));
    let err = run(
        &mut block,
        "array",
        &[a],
        DataType::Array(Box::new(DataType::UInt32)),
    )
    .expect_err("per-row argument");
    assert_eq!(err.code(), ErrorCode::NonConstantArgument);
    // Diagnostics name the function and describe the offending column.
    let message = err.to_string();
    assert!(message.contains("array"), "message: {message}");
    assert!(message.contains("UInt32"), "message: {message}");
}

// ---------------------------------------------------------------------------
// arrayElement: 1-based access across representations
// ---------------------------------------------------------------------------

#[test]
fn array_element_is_one_based_over_numeric_rows() {
    let (mut block, args) = numeric_accessor_block(1);
    let out = run(&mut block, "arrayElement", &args, DataType::UInt32).expect("element");
    assert_eq!(out, Column::UInt32(vec![10, 40, 0]));

    let (mut block, args) = numeric_accessor_block(3);
    let out = run(&mut block, "arrayElement", &args, DataType::UInt32).expect("element");
    assert_eq!(out, Column::UInt32(vec![30, 0, 0]));
}

#[test]
fn array_element_index_zero_is_rejected() {
    let (mut block, args) = numeric_accessor_block(0);
    let err = run(&mut block, "arrayElement", &args, DataType::UInt32).expect_err("zero index");
    assert_eq!(err.code(), ErrorCode::ZeroIndex);
}

#[test]
fn array_element_past_the_row_end_yields_the_type_default() {
    let (mut block, args) = numeric_accessor_block(9);
    let out = run(&mut block, "arrayElement", &args, DataType::UInt32).expect("element");
    assert_eq!(out, Column::UInt32(vec![0, 0, 0]));
}

#[test]
fn array_element_copies_terminated_string_ranges() {
    let mut block = Block::new();
    let arr = block.push(
        "arr",
        DataType::Array(Box::new(DataType::String)),
        Column::Array(ArrayColumn::from_string_rows(&[
            vec!["ab", "cd"],
            vec!["efg"],
            vec![],
        ])),
    );
    let idx = block.push("idx", DataType::UInt64, const_uint64(3, 2));
    let out = run(&mut block, "arrayElement", &[arr, idx], DataType::String).expect("element");
    let strings = match out {
        Column::String(strings) => strings,
        other => panic!("expected a string column, got {other:?}"),
    };
    assert_eq!(strings.bytes_at(0), b"cd");
    assert_eq!(strings.bytes_at(1), b"");
    assert_eq!(strings.bytes_at(2), b"");
    // Out-of-range rows still occupy one terminator byte each.
    assert_eq!(strings.data(), b"cd\0\0\0");
    assert_eq!(strings.offsets(), &[3, 4, 5]);
}

#[test]
fn array_element_on_a_constant_array_stays_constant() {
    let mut block = Block::new();
    let arr = block.push(
        "arr",
        uint32_array_type(),
        Column::ConstArray(ConstArrayColumn::new(
            4,
            vec![Value::UInt32(10), Value::UInt32(20)],
        )),
    );
    let idx = block.push("idx", DataType::UInt64, const_uint64(4, 2));
    let out = run(&mut block, "arrayElement", &[arr, idx], DataType::UInt32).expect("element");
    assert_eq!(out, Column::Const(ConstColumn::new(4, Value::UInt32(20))));
}

#[test]
fn out_of_range_behavior_differs_between_vector_and_constant_arrays() {
    // Vector representation: rows shorter than the index default silently.
    let mut block = Block::new();
    let arr = block.push(
        "arr",
        uint32_array_type(),
        Column::Array(ArrayColumn::from_rows(&[vec![10_u32, 20], vec![30, 40]])),
    );
    let idx = block.push("idx", DataType::UInt64, const_uint64(2, 5));
    let out = run(&mut block, "arrayElement", &[arr, idx], DataType::UInt32).expect("vector path");
    assert_eq!(out, Column::UInt32(vec![0, 0]));

    // The constant representation of the same rows fails hard instead.
    let mut block = Block::new();
    let arr = block.push(
        "arr",
        uint32_array_type(),
        Column::ConstArray(ConstArrayColumn::new(
            2,
            vec![Value::UInt32(10), Value::UInt32(20)],
        )),
    );
    let idx = block.push("idx", DataType::UInt64, const_uint64(2, 5));
    let err =
        run(&mut block, "arrayElement", &[arr, idx], DataType::UInt32).expect_err("constant path");
    assert_eq!(err.code(), ErrorCode::IndexOutOfRange);
    let message = err.to_string();
    assert!(message.contains("index 5"), "message: {message}");
}

#[test]
fn maximal_index_defaults_on_vector_rows_and_fails_on_constant_arrays() {
    // u64::MAX follows the same split as any other out-of-range index.
    let (mut block, args) = numeric_accessor_block(u64::MAX);
    let out = run(&mut block, "arrayElement", &args, DataType::UInt32).expect("vector path");
    assert_eq!(out, Column::UInt32(vec![0, 0, 0]));

    let mut block = Block::new();
    let arr = block.push(
        "arr",
        uint32_array_type(),
        Column::ConstArray(ConstArrayColumn::new(2, vec![Value::UInt32(10)])),
    );
    let idx = block.push("idx", DataType::UInt64, const_uint64(2, u64::MAX));
    let err =
        run(&mut block, "arrayElement", &[arr, idx], DataType::UInt32).expect_err("constant path");
    assert_eq!(err.code(), ErrorCode::IndexOutOfRange);
}

#[test]
fn array_element_requires_a_constant_index() {
    let mut block = Block::new();
    let arr = block.push(
        "arr",
        uint32_array_type(),
        Column::Array(ArrayColumn::from_rows(&[vec![1_u32], vec![2]])),
    );
    let idx = block.push("idx", DataType::UInt64, Column::UInt64(vec![1, 1]));
    let err = run(&mut block, "arrayElement", &[arr, idx], DataType::UInt32)
        .expect_err("per-row index");
    assert_eq!(err.code(), ErrorCode::NonConstantArgument);
}

#[test]
fn array_element_over_a_dense_scalar_column_has_no_kernel() {
    let mut block = Block::new();
    let arr = block.push("arr", DataType::UInt32, Column::UInt32(vec![1, 2]));
    let idx = block.push("idx", DataType::UInt64, const_uint64(2, 1));
    let err = run(&mut block, "arrayElement", &[arr, idx], DataType::UInt32)
        .expect_err("not an array column");
    assert_eq!(err.code(), ErrorCode::UnsupportedColumnType);
    let message = err.to_string();
    assert!(message.contains("UInt32"), "message: {message}");
}

#[test]
fn argument_positions_outside_the_block_surface_block_errors() {
    let mut block = Block::new();
    block.push("arr", uint32_array_type(), Column::Array(ArrayColumn::from_rows(&[vec![1_u32]])));
    let err = run(&mut block, "arrayElement", &[7, 8], DataType::UInt32)
        .expect_err("bad positions");
    assert_eq!(err.code(), ErrorCode::PositionOutOfBounds);
}

// ---------------------------------------------------------------------------
// has: membership
// ---------------------------------------------------------------------------

#[test]
fn has_flags_rows_containing_the_needle() {
    let mut block = Block::new();
    let arr = block.push(
        "arr",
        uint32_array_type(),
        Column::Array(ArrayColumn::from_rows(&[vec![1_u32, 2, 3], vec![4], vec![]])),
    );
    let needle = block.push(
        "needle",
        DataType::UInt32,
        Column::Const(ConstColumn::new(3, Value::UInt32(2))),
    );
    let out = run(&mut block, "has", &[arr, needle], DataType::UInt8).expect("has");
    assert_eq!(out, Column::UInt8(vec![1, 0, 0]));
}

#[test]
fn has_misses_report_zero_not_an_error() {
    let mut block = Block::new();
    let arr = block.push(
        "arr",
        uint32_array_type(),
        Column::Array(ArrayColumn::from_rows(&[vec![1_u32, 2, 3], vec![4]])),
    );
    let needle = block.push(
        "needle",
        DataType::UInt32,
        Column::Const(ConstColumn::new(2, Value::UInt32(5))),
    );
    let out = run(&mut block, "has", &[arr, needle], DataType::UInt8).expect("has");
    assert_eq!(out, Column::UInt8(vec![0, 0]));
}

#[test]
fn has_requires_the_exact_element_type_with_no_widening() {
    // Plan time: Array(UInt8) against an Int64 needle type.
    let registry = KernelRegistry::default();
    let kernel = registry.get("has").expect("registered kernel");
    let err = kernel
        .return_type(&[DataType::Array(Box::new(DataType::UInt8)), DataType::Int64])
        .expect_err("widening");
    assert_eq!(err.code(), ErrorCode::TypeMismatch);

    // Execution time: the runtime needle kind is checked against the payload.
    let mut block = Block::new();
    let arr = block.push(
        "arr",
        DataType::Array(Box::new(DataType::UInt8)),
        Column::Array(ArrayColumn::from_rows(&[vec![1_u8, 2]])),
    );
    let needle = block.push(
        "needle",
        DataType::Int64,
        Column::Const(ConstColumn::new(1, Value::Int64(2))),
    );
    let err = run(&mut block, "has", &[arr, needle], DataType::UInt8).expect_err("widening");
    assert_eq!(err.code(), ErrorCode::TypeMismatch);
}

#[test]
fn has_string_membership_never_matches_a_prefix() {
    let rows = [vec!["ab", "cd"], vec!["ab"]];

    let mut block = Block::new();
    let arr = block.push(
        "arr",
        DataType::Array(Box::new(DataType::String)),
        Column::Array(ArrayColumn::from_string_rows(&rows)),
    );
    let needle = block.push(
        "needle",
        DataType::String,
        Column::Const(ConstColumn::new(2, Value::String("cd".to_owned()))),
    );
    let out = run(&mut block, "has", &[arr, needle], DataType::UInt8).expect("has");
    assert_eq!(out, Column::UInt8(vec![1, 0]));

    // "a" is a prefix of "ab" and must not match it.
    let mut block = Block::new();
    let arr = block.push(
        "arr",
        DataType::Array(Box::new(DataType::String)),
        Column::Array(ArrayColumn::from_string_rows(&rows)),
    );
    let needle = block.push(
        "needle",
        DataType::String,
        Column::Const(ConstColumn::new(2, Value::String("a".to_owned()))),
    );
    let out = run(&mut block, "has", &[arr, needle], DataType::UInt8).expect("has");
    assert_eq!(out, Column::UInt8(vec![0, 0]));
}

#[test]
fn has_on_a_constant_array_broadcasts_one_flag() {
    let literal = vec![
        Value::String("x".to_owned()),
        Value::String("y".to_owned()),
    ];

    let mut block = Block::new();
    let arr = block.push(
        "arr",
        DataType::Array(Box::new(DataType::String)),
        Column::ConstArray(ConstArrayColumn::new(3, literal.clone())),
    );
    let needle = block.push(
        "needle",
        DataType::String,
        Column::Const(ConstColumn::new(3, Value::String("y".to_owned()))),
    );
    let out = run(&mut block, "has", &[arr, needle], DataType::UInt8).expect("has");
    assert_eq!(out, Column::Const(ConstColumn::new(3, Value::UInt8(1))));

    let mut block = Block::new();
    let arr = block.push(
        "arr",
        DataType::Array(Box::new(DataType::String)),
        Column::ConstArray(ConstArrayColumn::new(3, literal)),
    );
    let needle = block.push(
        "needle",
        DataType::String,
        Column::Const(ConstColumn::new(3, Value::String("z".to_owned()))),
    );
    let out = run(&mut block, "has", &[arr, needle], DataType::UInt8).expect("has");
    assert_eq!(out, Column::Const(ConstColumn::new(3, Value::UInt8(0))));
}

#[test]
fn has_constant_path_treats_cross_kind_values_as_unequal() {
    let mut block = Block::new();
    let arr = block.push(
        "arr",
        DataType::Array(Box::new(DataType::UInt8)),
        Column::ConstArray(ConstArrayColumn::new(2, vec![Value::UInt8(1)])),
    );
    let needle = block.push(
        "needle",
        DataType::UInt16,
        Column::Const(ConstColumn::new(2, Value::UInt16(1))),
    );
    // Same numeric value, different kind: unequal, not an error.
    let out = run(&mut block, "has", &[arr, needle], DataType::UInt8).expect("has");
    assert_eq!(out, Column::Const(ConstColumn::new(2, Value::UInt8(0))));
}

// ---------------------------------------------------------------------------
// Cross-cutting guarantees
// ---------------------------------------------------------------------------

#[test]
fn results_preserve_the_row_count_of_their_inputs() {
    let rows = 4;

    let mut block = Block::new();
    let a = block.push("a", DataType::UInt64, const_uint64(rows, 7));
    let out = run(
        &mut block,
        "array",
        &[a],
        DataType::Array(Box::new(DataType::UInt64)),
    )
    .expect("array");
    assert_eq!(out.len(), rows);

    let mut block = Block::new();
    let arr = block.push(
        "arr",
        uint32_array_type(),
        Column::Array(ArrayColumn::from_rows(&[vec![1_u32], vec![], vec![2, 3], vec![4]])),
    );
    let idx = block.push("idx", DataType::UInt64, const_uint64(rows, 1));
    let out = run(&mut block, "arrayElement", &[arr, idx], DataType::UInt32).expect("element");
    assert_eq!(out.len(), rows);

    let mut block = Block::new();
    let arr = block.push(
        "arr",
        uint32_array_type(),
        Column::Array(ArrayColumn::from_rows(&[vec![1_u32], vec![], vec![2, 3], vec![4]])),
    );
    let needle = block.push(
        "needle",
        DataType::UInt32,
        Column::Const(ConstColumn::new(rows, Value::UInt32(2))),
    );
    let out = run(&mut block, "has", &[arr, needle], DataType::UInt8).expect("has");
    assert_eq!(out.len(), rows);
}

#[test]
fn re_execution_over_identical_blocks_is_bit_identical() {
    let build = || {
        let mut block = Block::new();
        let arr = block.push(
            "arr",
            DataType::Array(Box::new(DataType::Float64)),
            Column::Array(ArrayColumn::from_rows(&[vec![1.5_f64, -2.25], vec![0.0]])),
        );
        let idx = block.push("idx", DataType::UInt64, const_uint64(2, 2));
        (block, [arr, idx])
    };

    let (mut first_block, args) = build();
    let first = run(&mut first_block, "arrayElement", &args, DataType::Float64).expect("first");
    let (mut second_block, args) = build();
    let second = run(&mut second_block, "arrayElement", &args, DataType::Float64).expect("second");
    assert_eq!(first, second);
    assert_eq!(first, Column::Float64(vec![-2.25, 0.0]));
}

#[test]
fn one_kernel_instance_serves_disjoint_blocks_across_threads() {
    let registry = KernelRegistry::default();
    let kernel = registry.get("has").expect("registered kernel");

    std::thread::scope(|scope| {
        for needle in [2_u32, 9] {
            let expected = u8::from(needle == 2);
            scope.spawn(move || {
                let mut block = Block::new();
                let arr = block.push(
                    "arr",
                    uint32_array_type(),
                    Column::Array(ArrayColumn::from_rows(&[vec![1_u32, 2], vec![3]])),
                );
                let needle = block.push(
                    "needle",
                    DataType::UInt32,
                    Column::Const(ConstColumn::new(2, Value::UInt32(needle))),
                );
                let result = block.push_result_slot("result", DataType::UInt8);
                kernel
                    .execute(&mut block, &[arr, needle], result)
                    .expect("execute");
                assert_eq!(
                    block.column(result).expect("result assigned"),
                    &Column::UInt8(vec![expected, 0]),
                );
            });
        }
    });
}
