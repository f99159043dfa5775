mod common;

use common::*;
use whisper_runtime::inference::{infer_graph, InferenceError, ShapeInferenceError};
use whisper_runtime::{
    DType, Dimension, ExecutionError, GraphBuilder, NumericTensor, OperatorRegistry, TensorType, ValueType,
};

fn registry() -> OperatorRegistry {
    init_logging();
    OperatorRegistry::with_builtins().unwrap()
}

#[test]
fn broadcast_add() {
    let mut builder = GraphBuilder::new("bcast");
    builder.input("a", ValueType::tensor(DType::F32, &[3, 1]));
    builder.input("b", ValueType::tensor(DType::F32, &[1, 4]));
    builder.node("Add", &["a", "b"], &["c"]);
    builder.output("c");
    let graph = builder.build().unwrap();
    let types = infer_graph(&graph, &registry(), &[], &()).unwrap();
    assert_eq!(types.output_types(&graph), vec![Some(ValueType::tensor(DType::F32, &[3, 4]))]);
}

#[test]
fn incompatible_broadcast_fails_before_execution() {
    let mut builder = GraphBuilder::new("bad_bcast");
    builder.input("a", ValueType::tensor(DType::F32, &[3, 4]));
    builder.input("b", ValueType::tensor(DType::F32, &[2, 4]));
    builder.node("Add", &["a", "b"], &["c"]).name("adder");
    builder.output("c");
    let graph = builder.build().unwrap();

    let err = infer_graph(&graph, &registry(), &[], &()).unwrap_err();
    assert!(matches!(
        &err,
        InferenceError::Shape { node, cause: ShapeInferenceError::NotBroadcastable(..), .. } if node == "adder"
    ));

    let a = NumericTensor::from_vec_shape(vec![0f32; 12], vec![3, 4]).unwrap();
    let b = NumericTensor::from_vec_shape(vec![0f32; 8], vec![2, 4]).unwrap();
    let err = default_executor().execute(&graph, inputs([("a", a), ("b", b)])).unwrap_err();
    assert!(matches!(err, ExecutionError::Inference(_)), "{err:?}");
}

#[test]
fn symbolic_dimensions_propagate() {
    let batch = Dimension::Symbolic("batch".to_string());
    let mut builder = GraphBuilder::new("symbolic");
    builder.input(
        "x",
        ValueType::Tensor(TensorType::new(Some(DType::F32), Some(vec![batch.clone(), Dimension::Known(8)]))),
    );
    builder.initializer("w", NumericTensor::from_vec_shape(vec![0f32; 8 * 4], vec![8, 4]).unwrap());
    builder.node("MatMul", &["x", "w"], &["y"]);
    builder.node("Relu", &["y"], &["z"]);
    builder.output("z");
    let graph = builder.build().unwrap();
    let types = infer_graph(&graph, &registry(), &[], &()).unwrap();
    let z = types.output_types(&graph)[0].clone().unwrap();
    assert_eq!(
        z,
        ValueType::Tensor(TensorType::new(Some(DType::F32), Some(vec![batch, Dimension::Known(4)])))
    );
}

#[test]
fn shape_values_feed_reshape() {
    let mut builder = GraphBuilder::new("flatten_like");
    builder.input("x", ValueType::tensor(DType::F32, &[2, 3, 4]));
    builder.node("Shape", &["x"], &["s"]);
    builder.initializer("zero", NumericTensor::from_vec(vec![0i64]));
    builder.node("Gather", &["s", "zero"], &["first"]);
    builder.initializer("minus_one", NumericTensor::from_vec(vec![-1i64]));
    builder.node("Concat", &["first", "minus_one"], &["target"]).attr("axis", 0i64);
    builder.node("Reshape", &["x", "target"], &["y"]);
    builder.output("y");
    let graph = builder.build().unwrap();
    let types = infer_graph(&graph, &registry(), &[], &()).unwrap();
    assert_eq!(types.output_types(&graph), vec![Some(ValueType::tensor(DType::F32, &[2, 12]))]);
    let target = graph.tensor_id("target").unwrap();
    assert_eq!(types.constant(target).unwrap().to_i64_vec().unwrap(), vec![2, -1]);
}

#[test]
fn caller_types_refine_untyped_inputs() {
    let mut builder = GraphBuilder::new("untyped");
    builder.untyped_input("x");
    builder.node("Transpose", &["x"], &["y"]).attr("perm", vec![1i64, 0]);
    builder.output("y");
    let graph = builder.build().unwrap();
    let types = infer_graph(&graph, &registry(), &[Some(ValueType::tensor(DType::I32, &[5, 7]))], &()).unwrap();
    assert_eq!(types.output_types(&graph), vec![Some(ValueType::tensor(DType::I32, &[7, 5]))]);
}

#[test]
fn declared_output_type_conflict() {
    let mut builder = GraphBuilder::new("conflict");
    builder.input("x", ValueType::tensor(DType::F32, &[2, 3]));
    builder.node("Relu", &["x"], &["y"]);
    builder.typed_output("y", ValueType::tensor(DType::F32, &[3, 2]));
    let graph = builder.build().unwrap();
    let err = infer_graph(&graph, &registry(), &[], &()).unwrap_err();
    assert!(matches!(
        err,
        InferenceError::Shape { cause: ShapeInferenceError::DeclaredTypeConflict { .. }, .. }
    ));
}
