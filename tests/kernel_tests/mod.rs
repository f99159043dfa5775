pub mod arith;
pub mod sequences;
pub mod shapes;

use whisper_runtime::graph::PendingNode;
use whisper_runtime::{Executor, GraphBuilder, NumericTensor, Value};

/// Runs one node over positional tensor inputs and returns its outputs in order.
pub fn run_node(
    executor: &Executor,
    op_type: &str,
    inputs: Vec<NumericTensor>,
    output_count: usize,
    configure: impl FnOnce(&mut PendingNode),
) -> Vec<Value> {
    let input_names: Vec<String> = (0..inputs.len()).map(|i| format!("x{i}")).collect();
    let output_names: Vec<String> = (0..output_count).map(|i| format!("y{i}")).collect();
    let mut builder = GraphBuilder::new(op_type);
    for name in &input_names {
        builder.untyped_input(name.as_str());
    }
    let input_refs: Vec<&str> = input_names.iter().map(String::as_str).collect();
    let output_refs: Vec<&str> = output_names.iter().map(String::as_str).collect();
    configure(builder.node(op_type, &input_refs, &output_refs));
    for name in &output_names {
        builder.output(name.as_str());
    }
    let graph = builder.build().unwrap();
    let values = input_names
        .into_iter()
        .zip(inputs)
        .map(|(name, tensor)| (name, Value::Tensor(tensor)))
        .collect();
    executor
        .execute(&graph, values)
        .unwrap()
        .into_iter()
        .map(|(_, value)| value)
        .collect()
}

pub fn run_single(
    executor: &Executor,
    op_type: &str,
    inputs: Vec<NumericTensor>,
    configure: impl FnOnce(&mut PendingNode),
) -> NumericTensor {
    let mut outputs = run_node(executor, op_type, inputs, 1, configure);
    outputs.remove(0).into_tensor().unwrap()
}

pub fn tensor<T: whisper_runtime::numeric_tensor::Element>(values: Vec<T>, shape: &[usize]) -> NumericTensor {
    NumericTensor::from_vec_shape(values, shape.to_vec()).unwrap()
}

pub fn assert_close(actual: &NumericTensor, expected: &[f64]) {
    let actual = actual.to_f64_vec().unwrap();
    assert_eq!(actual.len(), expected.len(), "{actual:?} vs {expected:?}");
    for (a, e) in actual.iter().zip(expected) {
        assert!((a - e).abs() <= 1e-7 + 1e-3 * e.abs(), "{actual:?} vs {expected:?}");
    }
}
