use super::*;
use whisper_runtime::{DType, Executor, GraphBuilder, Value};

fn run_graph(executor: &Executor, builder: GraphBuilder, inputs: Vec<(&str, NumericTensor)>) -> Vec<Value> {
    let graph = builder.build().unwrap();
    let inputs = inputs
        .into_iter()
        .map(|(name, tensor)| (name.to_string(), Value::Tensor(tensor)))
        .collect();
    executor.execute(&graph, inputs).unwrap().into_iter().map(|(_, v)| v).collect()
}

pub fn test_sequence_construct_at_length(executor: &Executor) {
    let mut builder = GraphBuilder::new("seq");
    builder.untyped_input("a").untyped_input("b").untyped_input("index");
    builder.node("SequenceConstruct", &["a", "b"], &["seq"]);
    builder.node("SequenceAt", &["seq", "index"], &["item"]);
    builder.node("SequenceLength", &["seq"], &["len"]);
    builder.output("seq").output("item").output("len");
    let outputs = run_graph(
        executor,
        builder,
        vec![
            ("a", NumericTensor::from_vec(vec![1.0f32])),
            ("b", NumericTensor::from_vec(vec![2.0f32, 3.0])),
            ("index", NumericTensor::from_scalar(-1i64)),
        ],
    );
    assert_eq!(outputs[0].as_sequence().unwrap().len(), 2);
    assert_close(outputs[1].as_tensor().unwrap(), &[2.0, 3.0]);
    assert_eq!(outputs[2].as_tensor().unwrap().scalar_i64().unwrap(), 2);
}

pub fn test_sequence_insert_erase(executor: &Executor) {
    let mut builder = GraphBuilder::new("edit");
    builder.untyped_input("a").untyped_input("b").untyped_input("zero");
    builder.node("SequenceEmpty", &[], &["empty"]).attr("dtype", 1i64);
    builder.node("SequenceInsert", &["empty", "a"], &["one"]);
    builder.node("SequenceInsert", &["one", "b", "zero"], &["two"]);
    builder.node("SequenceErase", &["two"], &["erased"]);
    builder.node("SequenceAt", &["erased", "zero"], &["first"]);
    builder.output("two").output("first");
    let outputs = run_graph(
        executor,
        builder,
        vec![
            ("a", NumericTensor::from_vec(vec![1.0f32])),
            ("b", NumericTensor::from_vec(vec![2.0f32])),
            ("zero", NumericTensor::from_scalar(0i64)),
        ],
    );
    let two = outputs[0].as_sequence().unwrap();
    assert_eq!(two.dtype(), DType::F32);
    assert_close(&two.items()[0], &[2.0]);
    assert_close(&two.items()[1], &[1.0]);
    // Erasing the last element leaves the inserted front.
    assert_close(outputs[1].as_tensor().unwrap(), &[2.0]);
}

pub fn test_concat_from_sequence(executor: &Executor) {
    let mut builder = GraphBuilder::new("cfs");
    builder.untyped_input("a").untyped_input("b");
    builder.node("SequenceConstruct", &["a", "b"], &["seq"]);
    builder.node("ConcatFromSequence", &["seq"], &["joined"]).attr("axis", 0i64);
    builder
        .node("ConcatFromSequence", &["seq"], &["stacked"])
        .attr("axis", -1i64)
        .attr("new_axis", 1i64);
    builder.output("joined").output("stacked");
    let outputs = run_graph(
        executor,
        builder,
        vec![
            ("a", NumericTensor::from_vec(vec![1.0f32, 2.0])),
            ("b", NumericTensor::from_vec(vec![3.0f32, 4.0])),
        ],
    );
    let joined = outputs[0].as_tensor().unwrap();
    assert_eq!(joined.shape(), &[4]);
    let stacked = outputs[1].as_tensor().unwrap();
    assert_eq!(stacked.shape(), &[2, 2]);
    assert_close(stacked, &[1.0, 3.0, 2.0, 4.0]);
}

pub fn test_optional_roundtrip(executor: &Executor) {
    let mut builder = GraphBuilder::new("optional");
    builder.untyped_input("x");
    builder.node("Optional", &["x"], &["wrapped"]);
    builder.node("OptionalHasElement", &["wrapped"], &["present"]);
    builder.node("OptionalGetElement", &["wrapped"], &["unwrapped"]);
    builder.output("present").output("unwrapped");
    let outputs = run_graph(executor, builder, vec![("x", NumericTensor::from_vec(vec![5.0f32]))]);
    assert!(outputs[0].as_tensor().unwrap().scalar_bool().unwrap());
    assert_close(outputs[1].as_tensor().unwrap(), &[5.0]);
}
