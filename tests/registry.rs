mod common;

use common::*;
use std::sync::Arc;
use whisper_runtime::graph::Attributes;
use whisper_runtime::inference::{same_as_input, InferenceContext, InferredValue, ShapeInferenceError};
use whisper_runtime::kernels::KernelError;
use whisper_runtime::registry::RegistryError;
use whisper_runtime::{
    DType, Executor, ExecutorConfig, GraphBuilder, KernelContext, NumericTensor, OperatorRegistry, Value, ValueType,
    VersionRange,
};

fn passthrough(ctx: &InferenceContext) -> Result<Vec<InferredValue>, ShapeInferenceError> {
    Ok(same_as_input(ctx, 0))
}

fn double(ctx: &KernelContext, inputs: &[Option<Value>], _attributes: &Attributes) -> Result<Vec<Value>, KernelError> {
    let x = inputs.first().and_then(Option::as_ref).ok_or(KernelError::MissingInput(0))?.as_tensor()?;
    Ok(vec![Value::Tensor(NumericTensor::add(x, x, ctx.buffers())?)])
}

fn triple(ctx: &KernelContext, inputs: &[Option<Value>], _attributes: &Attributes) -> Result<Vec<Value>, KernelError> {
    let x = inputs.first().and_then(Option::as_ref).ok_or(KernelError::MissingInput(0))?.as_tensor()?;
    let twice = NumericTensor::add(x, x, ctx.buffers())?;
    Ok(vec![Value::Tensor(NumericTensor::add(&twice, x, ctx.buffers())?)])
}

#[test]
fn highest_eligible_version_wins() {
    let mut registry = OperatorRegistry::new();
    registry.register("Scale", "com.example", VersionRange::between(1, 4), passthrough, double).unwrap();
    registry.register("Scale", "com.example", VersionRange::from(5), passthrough, triple).unwrap();

    assert_eq!(registry.lookup("Scale", "com.example", 3).unwrap().versions(), VersionRange::between(1, 4));
    assert_eq!(registry.lookup("Scale", "com.example", 9).unwrap().versions(), VersionRange::from(5));
    assert!(registry.lookup("Scale", "com.example", 0).is_err());
    assert!(registry.lookup("Scale", "", 5).is_err());
}

#[test]
fn gaps_between_ranges_are_unsupported() {
    let mut registry = OperatorRegistry::new();
    registry.register("Scale", "", VersionRange::between(1, 4), passthrough, double).unwrap();
    registry.register("Scale", "", VersionRange::from(7), passthrough, triple).unwrap();
    let err = registry.lookup("Scale", "ai.onnx", 6).err().unwrap();
    assert_eq!(err.version, 6);
    assert!(registry.lookup("Scale", "ai.onnx", 7).is_ok());
}

#[test]
fn overlapping_registration_conflicts() {
    let mut registry = OperatorRegistry::new();
    registry.register("Scale", "", VersionRange::between(1, 6), passthrough, double).unwrap();
    let err = registry.register("Scale", "", VersionRange::from(6), passthrough, triple).unwrap_err();
    assert!(matches!(err, RegistryError::RegistrationConflict { op_type, .. } if op_type == "Scale"));
    assert_eq!(registry.len(), 1);
}

#[test]
fn builtins_are_listed() {
    let registry = OperatorRegistry::with_builtins().unwrap();
    let operators = registry.operators();
    assert!(operators.iter().any(|(op, domain, _)| *op == "Loop" && domain.is_empty()));
    assert!(registry.lookup("Softmax", "", 11).is_ok());
    assert!(registry.lookup("Softmax", "", 13).is_ok());
    assert_ne!(
        registry.lookup("Softmax", "", 11).unwrap().versions(),
        registry.lookup("Softmax", "", 13).unwrap().versions()
    );
}

#[test]
fn custom_operator_runs_through_executor() {
    init_logging();
    let mut registry = OperatorRegistry::with_builtins().unwrap();
    registry.register("Scale", "com.example", VersionRange::between(1, 1), passthrough, double).unwrap();
    registry.register("Scale", "com.example", VersionRange::from(2), passthrough, triple).unwrap();
    let executor = Executor::with_config(Arc::new(registry), ExecutorConfig::default());

    for (version, expected) in [(1, vec![2.0, -4.0]), (2, vec![3.0, -6.0])] {
        let mut builder = GraphBuilder::new("custom");
        builder.opset("", 21).opset("com.example", version);
        builder.input("x", ValueType::tensor(DType::F32, &[2]));
        builder.node("Scale", &["x"], &["y"]).domain("com.example");
        builder.node("Relu", &["y"], &["z"]);
        builder.output("y").output("z");
        let outputs = executor
            .execute(&builder.build().unwrap(), inputs([("x", f32s(&[1.0, -2.0]))]))
            .unwrap();
        assert_eq!(as_f64(outputs.get("y").unwrap()), expected);
    }
}
