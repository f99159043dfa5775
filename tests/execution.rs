mod common;

use common::*;
use std::time::Instant;
use whisper_runtime::graph::Node;
use whisper_runtime::{
    CancellationToken, DType, ExecutionError, ExecutionObserver, ExecutorConfig, Graph, GraphBuilder, NumericTensor,
    Value, ValueType,
};

fn add_mul_graph() -> Graph {
    let mut builder = GraphBuilder::new("add_mul");
    builder.input("A", ValueType::tensor(DType::F32, &[2]));
    builder.input("B", ValueType::tensor(DType::F32, &[2]));
    builder.node("Add", &["A", "B"], &["C"]);
    builder.node("Mul", &["C", "C"], &["D"]);
    builder.output("C").output("D");
    builder.build().unwrap()
}

/// Two independent branches joined at the end, so the middle level holds several nodes.
fn wide_graph() -> Graph {
    let mut builder = GraphBuilder::new("wide");
    builder.input("x", ValueType::tensor(DType::F32, &[2, 3]));
    builder.node("Exp", &["x"], &["e"]);
    builder.node("Tanh", &["x"], &["t"]);
    builder.node("Neg", &["x"], &["n"]);
    builder.node("Sum", &["e", "t", "n"], &["s"]);
    builder.node("ReduceSum", &["s"], &["total"]).attr("keepdims", 0i64);
    builder.output("s").output("total");
    builder.build().unwrap()
}

#[test]
fn add_then_mul() {
    let executor = default_executor();
    let outputs = executor
        .execute(&add_mul_graph(), inputs([("A", f32s(&[1.0, 2.0])), ("B", f32s(&[3.0, 4.0]))]))
        .unwrap();
    assert_eq!(outputs.names(), vec!["C", "D"]);
    assert_eq!(as_f64(outputs.get("C").unwrap()), vec![4.0, 6.0]);
    assert_eq!(as_f64(outputs.get("D").unwrap()), vec![16.0, 36.0]);
}

#[test]
fn repeated_runs_are_identical() {
    let executor = default_executor();
    let graph = wide_graph();
    let x = NumericTensor::from_vec_shape(vec![0.5f32, -1.0, 2.0, 0.0, 3.5, -0.25], vec![2, 3]).unwrap();
    let first = executor.execute(&graph, inputs([("x", x.clone())])).unwrap();
    let second = executor.execute(&graph, inputs([("x", x)])).unwrap();
    assert_eq!(first.get("s"), second.get("s"));
    assert_eq!(first.get("total"), second.get("total"));
}

#[test]
fn parallel_matches_sequential() {
    let graph = wide_graph();
    let x = NumericTensor::from_vec_shape(vec![0.5f32, -1.0, 2.0, 0.0, 3.5, -0.25], vec![2, 3]).unwrap();
    let sequential = default_executor().execute(&graph, inputs([("x", x.clone())])).unwrap();
    let parallel = executor(ExecutorConfig {
        parallel: true,
        ..Default::default()
    })
    .execute(&graph, inputs([("x", x)]))
    .unwrap();
    assert_eq!(sequential.into_map(), parallel.into_map());
}

#[test]
fn missing_input_is_reported() {
    let executor = default_executor();
    let err = executor
        .execute(&add_mul_graph(), inputs([("A", f32s(&[1.0, 2.0]))]))
        .unwrap_err();
    assert!(matches!(err, ExecutionError::MissingInput(name) if name == "B"));
}

#[test]
fn input_default_comes_from_initializer() {
    let mut builder = GraphBuilder::new("defaults");
    builder.input("a", ValueType::tensor(DType::F32, &[2]));
    builder.input("bias", ValueType::tensor(DType::F32, &[2]));
    builder.initializer("bias", f32s(&[10.0, 20.0]));
    builder.node("Add", &["a", "bias"], &["y"]);
    builder.output("y");
    let graph = builder.build().unwrap();

    let executor = default_executor();
    let defaulted = executor.execute(&graph, inputs([("a", f32s(&[1.0, 2.0]))])).unwrap();
    assert_eq!(as_f64(defaulted.get("y").unwrap()), vec![11.0, 22.0]);
    let overridden = executor
        .execute(&graph, inputs([("a", f32s(&[1.0, 2.0])), ("bias", f32s(&[0.0, 0.0]))]))
        .unwrap();
    assert_eq!(as_f64(overridden.get("y").unwrap()), vec![1.0, 2.0]);
}

#[test]
fn cyclic_graph_is_rejected_before_running() {
    struct Count(usize);
    impl ExecutionObserver for Count {
        fn on_node_executed(&mut self, _node: &Node, _depth: usize, _start: Instant, _end: Instant) {
            self.0 += 1;
        }
    }

    let mut builder = GraphBuilder::new("cycle");
    builder.input("x", ValueType::tensor(DType::F32, &[1]));
    builder.node("Add", &["x", "b"], &["a"]);
    builder.node("Neg", &["a"], &["b"]);
    builder.output("b");
    let graph = builder.build().unwrap();

    let mut count = Count(0);
    let err = default_executor()
        .execute_with(&graph, inputs([("x", f32s(&[1.0]))]), &mut count, &CancellationToken::new())
        .unwrap_err();
    assert!(matches!(err, ExecutionError::CyclicGraph(_)), "{err:?}");
    assert_eq!(count.0, 0);
}

#[test]
fn unsupported_operator_is_reported() {
    let mut builder = GraphBuilder::new("unknown");
    builder.input("x", ValueType::tensor(DType::F32, &[1]));
    builder.node("NotARealOp", &["x"], &["y"]);
    builder.output("y");
    let err = default_executor()
        .execute(&builder.build().unwrap(), inputs([("x", f32s(&[1.0]))]))
        .unwrap_err();
    assert!(matches!(err, ExecutionError::UnsupportedOperator(e) if e.op_type == "NotARealOp"));
}

#[test]
fn budget_exhaustion_fails() {
    let executor = executor(ExecutorConfig {
        memory_budget_bytes: Some(8),
        ..Default::default()
    });
    let err = executor
        .execute(
            &add_mul_graph(),
            inputs([("A", f32s(&[1.0, 2.0, 3.0, 4.0])), ("B", f32s(&[1.0, 2.0, 3.0, 4.0]))]),
        )
        .unwrap_err();
    assert!(matches!(err, ExecutionError::Allocation(_)), "{err:?}");
}

#[test]
fn huge_constant_shape_fails_allocation() {
    let mut builder = GraphBuilder::new("huge");
    builder.initializer("shape", NumericTensor::from_vec(vec![1i64 << 32, 1i64 << 32]));
    builder.node("ConstantOfShape", &["shape"], &["y"]);
    builder.output("y");
    let graph = builder.build().unwrap();

    let executor = executor(ExecutorConfig {
        memory_budget_bytes: Some(1 << 20),
        ..Default::default()
    });
    let err = executor.execute(&graph, inputs([])).unwrap_err();
    assert!(matches!(err, ExecutionError::Allocation(_)), "{err:?}");
}

#[test]
fn released_intermediates_are_reused_downstream() {
    // `a` dies after `b` is computed, so `c` can take its buffer while `b` stays live for `d`.
    let mut builder = GraphBuilder::new("chain");
    builder.input("x", ValueType::tensor(DType::F32, &[3]));
    builder.node("Neg", &["x"], &["a"]);
    builder.node("Neg", &["a"], &["b"]);
    builder.node("Add", &["b", "b"], &["c"]);
    builder.node("Mul", &["c", "b"], &["d"]);
    builder.output("d");
    let graph = builder.build().unwrap();

    let outputs = default_executor()
        .execute(&graph, inputs([("x", f32s(&[1.0, 2.0, 3.0]))]))
        .unwrap();
    assert_eq!(as_f64(outputs.get("d").unwrap()), vec![2.0, 8.0, 18.0]);
    let stats = outputs.buffer_stats();
    assert!(stats.reuse_hits > 0, "{stats:?}");
    assert_eq!(stats.live_bytes, 0);
}

#[test]
fn live_bytes_return_to_zero() {
    let outputs = default_executor()
        .execute(&add_mul_graph(), inputs([("A", f32s(&[1.0, 2.0])), ("B", f32s(&[3.0, 4.0]))]))
        .unwrap();
    let stats = outputs.buffer_stats();
    assert_eq!(stats.live_bytes, 0);
    assert!(stats.peak_bytes >= 16);
}

#[test]
fn cancelled_before_start() {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = default_executor()
        .execute_with(
            &add_mul_graph(),
            inputs([("A", f32s(&[1.0, 2.0])), ("B", f32s(&[3.0, 4.0]))]),
            &mut (),
            &cancel,
        )
        .unwrap_err();
    assert!(matches!(err, ExecutionError::Cancelled));
}

#[test]
fn cancelled_between_nodes() {
    struct CancelAfterFirst {
        token: CancellationToken,
        executed: Vec<String>,
    }
    impl ExecutionObserver for CancelAfterFirst {
        fn on_node_executed(&mut self, node: &Node, _depth: usize, _start: Instant, _end: Instant) {
            self.executed.push(node.op.op_type.clone());
            self.token.cancel();
        }
    }

    let cancel = CancellationToken::new();
    let mut observer = CancelAfterFirst {
        token: cancel.clone(),
        executed: Vec::new(),
    };
    let err = default_executor()
        .execute_with(
            &add_mul_graph(),
            inputs([("A", f32s(&[1.0, 2.0])), ("B", f32s(&[3.0, 4.0]))]),
            &mut observer,
            &cancel,
        )
        .unwrap_err();
    assert!(matches!(err, ExecutionError::Cancelled));
    assert_eq!(observer.executed, vec!["Add"]);
}

#[test]
fn observer_sees_every_node_in_order() {
    #[derive(Default)]
    struct Recorder {
        nodes: Vec<String>,
        values: Vec<String>,
    }
    impl ExecutionObserver for Recorder {
        fn on_node_executed(&mut self, node: &Node, depth: usize, start: Instant, end: Instant) {
            assert_eq!(depth, 0);
            assert!(end >= start);
            self.nodes.push(node.op.op_type.clone());
        }
        fn on_value_produced(&mut self, name: &str, _depth: usize, _value: &Value) {
            self.values.push(name.to_string());
        }
    }

    let mut recorder = Recorder::default();
    default_executor()
        .execute_with(
            &add_mul_graph(),
            inputs([("A", f32s(&[1.0, 2.0])), ("B", f32s(&[3.0, 4.0]))]),
            &mut recorder,
            &CancellationToken::new(),
        )
        .unwrap();
    assert_eq!(recorder.nodes, vec!["Add", "Mul"]);
    assert_eq!(recorder.values, vec!["C", "D"]);
}

#[test]
fn type_validation_rejects_wrong_dtype() {
    let executor = executor(ExecutorConfig {
        validate_types: true,
        ..Default::default()
    });
    let err = executor
        .execute(
            &add_mul_graph(),
            inputs([("A", NumericTensor::from_vec(vec![1i64, 2])), ("B", f32s(&[3.0, 4.0]))]),
        )
        .unwrap_err();
    assert!(matches!(err, ExecutionError::TypeMismatch { name, .. } if name == "A"));
}

#[test]
fn kernel_failure_names_the_node() {
    let mut builder = GraphBuilder::new("bad_reshape");
    builder.input("x", ValueType::tensor(DType::F32, &[4]));
    builder.input("shape", ValueType::tensor(DType::I64, &[1]));
    builder.node("Reshape", &["x", "shape"], &["y"]).name("reshape_node");
    builder.output("y");
    let err = default_executor()
        .execute(
            &builder.build().unwrap(),
            inputs([("x", f32s(&[1.0, 2.0, 3.0, 4.0])), ("shape", NumericTensor::from_vec(vec![3i64]))]),
        )
        .unwrap_err();
    assert!(
        matches!(&err, ExecutionError::KernelExecution { node, .. } if node == "reshape_node"),
        "{err:?}"
    );
}

#[test]
fn decoded_model_runs() {
    use prost::Message;
    use whisper_runtime::onnx;

    let model = onnx::ModelProto {
        ir_version: 8,
        opset_import: vec![onnx::OperatorSetIdProto {
            domain: String::new(),
            version: 13,
        }],
        graph: Some(onnx::GraphProto {
            name: "relu".to_string(),
            node: vec![onnx::NodeProto {
                op_type: "Relu".to_string(),
                input: vec!["x".to_string()],
                output: vec!["y".to_string()],
                ..Default::default()
            }],
            input: vec![onnx::ValueInfoProto {
                name: "x".to_string(),
                ..Default::default()
            }],
            output: vec![onnx::ValueInfoProto {
                name: "y".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        }),
        ..Default::default()
    };
    let graph = Graph::from_onnx_bytes(&model.encode_to_vec()).unwrap();
    assert_eq!(graph.input_names(), vec!["x"]);
    let outputs = default_executor()
        .execute(&graph, inputs([("x", f32s(&[-1.0, 0.5]))]))
        .unwrap();
    assert_eq!(as_f64(outputs.get("y").unwrap()), vec![0.0, 0.5]);
}
