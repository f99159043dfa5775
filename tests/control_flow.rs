mod common;

use common::*;
use std::sync::Arc;
use whisper_runtime::{DType, ExecutionError, ExecutorConfig, Graph, GraphBuilder, NumericTensor, ValueType};

/// Body of a counting loop: `(iter, cond, acc) -> (cond, acc + 1, acc + 1)`.
fn counting_body() -> Arc<Graph> {
    let mut body = GraphBuilder::new("count_body");
    body.untyped_input("iter").untyped_input("cond_in").untyped_input("acc_in");
    body.initializer("one", NumericTensor::from_scalar(1i64));
    body.node("Identity", &["cond_in"], &["cond_out"]);
    body.node("Add", &["acc_in", "one"], &["acc_out"]);
    body.node("Identity", &["acc_out"], &["acc_scan"]);
    body.output("cond_out").output("acc_out").output("acc_scan");
    Arc::new(body.build().unwrap())
}

fn counting_loop(trip_count: Option<i64>) -> Graph {
    let mut builder = GraphBuilder::new("count");
    builder.input("acc0", ValueType::tensor(DType::I64, &[]));
    let trip = match trip_count {
        Some(m) => {
            builder.initializer("M", NumericTensor::from_scalar(m));
            "M"
        }
        None => "",
    };
    builder
        .node("Loop", &[trip, "", "acc0"], &["acc", "accs"])
        .name("counter")
        .attr("body", counting_body());
    builder.output("acc").output("accs");
    builder.build().unwrap()
}

#[test]
fn loop_with_trip_count() {
    let outputs = default_executor()
        .execute(&counting_loop(Some(3)), inputs([("acc0", NumericTensor::from_scalar(0i64))]))
        .unwrap();
    assert_eq!(outputs.tensor("acc").unwrap().scalar_i64().unwrap(), 3);
    let accs = outputs.tensor("accs").unwrap();
    assert_eq!(accs.shape(), &[3]);
    assert_eq!(accs.to_i64_vec().unwrap(), vec![1, 2, 3]);
}

#[test]
fn loop_with_zero_trips_keeps_initial_value() {
    let outputs = default_executor()
        .execute(&counting_loop(Some(0)), inputs([("acc0", NumericTensor::from_scalar(5i64))]))
        .unwrap();
    assert_eq!(outputs.tensor("acc").unwrap().scalar_i64().unwrap(), 5);
    assert_eq!(outputs.tensor("accs").unwrap().shape(), &[0]);
}

#[test]
fn loop_ends_on_condition() {
    // Keeps going while acc < 4.
    let mut body = GraphBuilder::new("until_body");
    body.untyped_input("iter").untyped_input("cond_in").untyped_input("acc_in");
    body.initializer("one", NumericTensor::from_scalar(1i64));
    body.initializer("four", NumericTensor::from_scalar(4i64));
    body.node("Add", &["acc_in", "one"], &["acc_out"]);
    body.node("Less", &["acc_out", "four"], &["cond_out"]);
    body.output("cond_out").output("acc_out");
    let body = body.build().unwrap();

    let mut builder = GraphBuilder::new("until");
    builder.input("acc0", ValueType::tensor(DType::I64, &[]));
    builder.node("Loop", &["", "", "acc0"], &["acc"]).attr("body", body);
    builder.output("acc");
    let outputs = default_executor()
        .execute(&builder.build().unwrap(), inputs([("acc0", NumericTensor::from_scalar(0i64))]))
        .unwrap();
    assert_eq!(outputs.tensor("acc").unwrap().scalar_i64().unwrap(), 4);
}

#[test]
fn unbounded_loop_hits_configured_limit() {
    let executor = executor(ExecutorConfig {
        max_loop_iterations: Some(10),
        ..Default::default()
    });
    let err = executor
        .execute(&counting_loop(None), inputs([("acc0", NumericTensor::from_scalar(0i64))]))
        .unwrap_err();
    assert!(
        matches!(&err, ExecutionError::LoopNonTermination { node, limit: 10 } if node == "counter"),
        "{err:?}"
    );
}

#[test]
fn trip_count_within_limit_is_allowed() {
    let executor = executor(ExecutorConfig {
        max_loop_iterations: Some(3),
        ..Default::default()
    });
    let outputs = executor
        .execute(&counting_loop(Some(3)), inputs([("acc0", NumericTensor::from_scalar(0i64))]))
        .unwrap();
    assert_eq!(outputs.tensor("acc").unwrap().scalar_i64().unwrap(), 3);
}

fn if_graph() -> Graph {
    let mut then_branch = GraphBuilder::new("then");
    then_branch.node("Identity", &["x"], &["r"]);
    then_branch.output("r");
    let mut else_branch = GraphBuilder::new("else");
    else_branch.node("Neg", &["x"], &["r"]);
    else_branch.output("r");

    let mut builder = GraphBuilder::new("choose");
    builder.input("cond", ValueType::tensor(DType::BOOL, &[]));
    builder.input("x", ValueType::tensor(DType::F32, &[2]));
    builder
        .node("If", &["cond"], &["y"])
        .attr("then_branch", then_branch.build().unwrap())
        .attr("else_branch", else_branch.build().unwrap());
    builder.output("y");
    builder.build().unwrap()
}

#[test]
fn if_selects_branch() {
    let executor = default_executor();
    let graph = if_graph();
    let taken = executor
        .execute(&graph, inputs([("cond", NumericTensor::from_scalar(true)), ("x", f32s(&[1.0, -2.0]))]))
        .unwrap();
    assert_eq!(as_f64(taken.get("y").unwrap()), vec![1.0, -2.0]);
    let not_taken = executor
        .execute(&graph, inputs([("cond", NumericTensor::from_scalar(false)), ("x", f32s(&[1.0, -2.0]))]))
        .unwrap();
    assert_eq!(as_f64(not_taken.get("y").unwrap()), vec![-1.0, 2.0]);
}

#[test]
fn loops_run_side_by_side_in_parallel_mode() {
    let mut builder = GraphBuilder::new("two_loops");
    builder.input("acc0", ValueType::tensor(DType::I64, &[]));
    builder.initializer("M", NumericTensor::from_scalar(3i64));
    builder.initializer("N", NumericTensor::from_scalar(5i64));
    builder.node("Loop", &["M", "", "acc0"], &["a", "a_scan"]).attr("body", counting_body());
    builder.node("Loop", &["N", "", "acc0"], &["b", "b_scan"]).attr("body", counting_body());
    builder.output("a").output("b");
    let outputs = executor(ExecutorConfig {
        parallel: true,
        ..Default::default()
    })
    .execute(&builder.build().unwrap(), inputs([("acc0", NumericTensor::from_scalar(0i64))]))
    .unwrap();
    assert_eq!(outputs.tensor("a").unwrap().scalar_i64().unwrap(), 3);
    assert_eq!(outputs.tensor("b").unwrap().scalar_i64().unwrap(), 5);
    assert_eq!(outputs.buffer_stats().live_bytes, 0);
}

fn cumulative_sum_scan(reverse: bool) -> Graph {
    let mut body = GraphBuilder::new("scan_body");
    body.untyped_input("sum_in").untyped_input("x_t");
    body.node("Add", &["sum_in", "x_t"], &["sum_out"]);
    body.node("Identity", &["sum_out"], &["y_t"]);
    body.output("sum_out").output("y_t");

    let mut builder = GraphBuilder::new("cumsum");
    builder.input("init", ValueType::tensor(DType::F32, &[]));
    builder.input("xs", ValueType::tensor(DType::F32, &[3]));
    let node = builder.node("Scan", &["init", "xs"], &["total", "ys"]);
    node.attr("body", body.build().unwrap()).attr("num_scan_inputs", 1i64);
    if reverse {
        node.attr("scan_input_directions", vec![1i64]);
    }
    builder.output("total").output("ys");
    builder.build().unwrap()
}

#[test]
fn scan_accumulates() {
    let outputs = default_executor()
        .execute(
            &cumulative_sum_scan(false),
            inputs([("init", NumericTensor::from_scalar(0.0f32)), ("xs", f32s(&[1.0, 2.0, 3.0]))]),
        )
        .unwrap();
    assert_eq!(as_f64(outputs.get("total").unwrap()), vec![6.0]);
    assert_eq!(as_f64(outputs.get("ys").unwrap()), vec![1.0, 3.0, 6.0]);
}

#[test]
fn scan_in_reverse() {
    let outputs = default_executor()
        .execute(
            &cumulative_sum_scan(true),
            inputs([("init", NumericTensor::from_scalar(0.0f32)), ("xs", f32s(&[1.0, 2.0, 3.0]))]),
        )
        .unwrap();
    assert_eq!(as_f64(outputs.get("ys").unwrap()), vec![3.0, 5.0, 6.0]);
}

#[test]
fn nesting_limit_is_enforced() {
    let executor = executor(ExecutorConfig {
        max_subgraph_depth: 0,
        ..Default::default()
    });
    let err = executor
        .execute(
            &if_graph(),
            inputs([("cond", NumericTensor::from_scalar(true)), ("x", f32s(&[1.0, -2.0]))]),
        )
        .unwrap_err();
    assert!(matches!(err, ExecutionError::SubgraphDepthExceeded(0)), "{err:?}");
}
