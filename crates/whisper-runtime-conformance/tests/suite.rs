use prost::Message;
use std::fs;
use std::path::Path;
use whisper_runtime::onnx;
use whisper_runtime::{Executor, ExecutorConfig, NumericTensor};
use whisper_runtime_conformance::{CaseOutcome, ExpectationTable, Suite, TestCase};

fn value_info(name: &str) -> onnx::ValueInfoProto {
    onnx::ValueInfoProto {
        name: name.to_string(),
        ..Default::default()
    }
}

fn add_model() -> Vec<u8> {
    let graph = onnx::GraphProto {
        name: "add".to_string(),
        node: vec![onnx::NodeProto {
            op_type: "Add".to_string(),
            input: vec!["a".to_string(), "b".to_string()],
            output: vec!["c".to_string()],
            ..Default::default()
        }],
        input: vec![value_info("a"), value_info("b")],
        output: vec![value_info("c")],
        ..Default::default()
    };
    onnx::ModelProto {
        ir_version: 9,
        opset_import: vec![onnx::OperatorSetIdProto {
            domain: String::new(),
            version: 17,
        }],
        graph: Some(graph),
        ..Default::default()
    }
    .encode_to_vec()
}

fn write_tensor(path: &Path, name: &str, values: Vec<f32>) {
    let proto = NumericTensor::from_vec(values).to_tensor_proto(name).unwrap();
    fs::write(path, proto.encode_to_vec()).unwrap();
}

fn write_case(root: &Path, name: &str, expected: Vec<f32>) {
    let case = root.join(name);
    let data = case.join("test_data_set_0");
    fs::create_dir_all(&data).unwrap();
    fs::write(case.join("model.onnx"), add_model()).unwrap();
    write_tensor(&data.join("input_0.pb"), "a", vec![1.0, 2.0]);
    // Unnamed, binds by position.
    write_tensor(&data.join("input_1.pb"), "", vec![3.0, 4.0]);
    write_tensor(&data.join("output_0.pb"), "c", expected);
}

#[test]
fn loads_case_directory() {
    let root = tempfile::tempdir().unwrap();
    write_case(root.path(), "test_add", vec![4.0, 6.0]);
    let case = TestCase::from_directory(&root.path().join("test_add")).unwrap();
    assert_eq!(case.name, "test_add");
    assert_eq!(case.data_sets.len(), 1);
    assert_eq!(case.data_sets[0].inputs.len(), 2);
    assert_eq!(case.data_sets[0].inputs[1].0, "");
}

#[test]
fn missing_model_is_reported() {
    let root = tempfile::tempdir().unwrap();
    fs::create_dir_all(root.path().join("test_empty")).unwrap();
    assert!(TestCase::from_directory(&root.path().join("test_empty")).is_err());
}

#[test]
fn outcomes_follow_expectations() {
    let root = tempfile::tempdir().unwrap();
    write_case(root.path(), "test_add", vec![4.0, 6.0]);
    write_case(root.path(), "test_add_wrong", vec![4.0, 7.0]);
    write_case(root.path(), "test_add_known_bad", vec![0.0, 0.0]);
    write_case(root.path(), "test_add_large", vec![4.0, 6.0]);

    let mut expectations = ExpectationTable::default();
    expectations
        .exclude("test_add_large")
        .expect_failure("issue_1", "OnnxBackendNodeModelTest.test_add_known_bad_cpu");

    let suite = Suite::from_directory(root.path(), expectations).unwrap();
    assert_eq!(suite.len(), 4);
    let executor = Executor::with_builtins(ExecutorConfig::default()).unwrap();
    let report = suite.run(&executor);

    assert_eq!(report.outcome("test_add"), Some(&CaseOutcome::Passed));
    assert!(matches!(report.outcome("test_add_wrong"), Some(CaseOutcome::Failed(_))));
    assert_eq!(
        report.outcome("test_add_known_bad"),
        Some(&CaseOutcome::ExpectedFailure {
            issue: "issue_1".to_string()
        })
    );
    assert_eq!(report.outcome("test_add_large"), Some(&CaseOutcome::Excluded));
    assert!(!report.is_success());

    let counts = report.counts();
    assert_eq!(counts.passed, 1);
    assert_eq!(counts.failed, 1);
}

#[test]
fn passing_expected_failure_is_flagged() {
    let root = tempfile::tempdir().unwrap();
    write_case(root.path(), "test_add", vec![4.0, 6.0]);
    let mut expectations = ExpectationTable::default();
    expectations.expect_failure("issue_2", "test_add");

    let suite = Suite::from_directory(root.path(), expectations).unwrap();
    let executor = Executor::with_builtins(ExecutorConfig::default()).unwrap();
    let report = suite.run(&executor);
    assert_eq!(
        report.outcome("test_add"),
        Some(&CaseOutcome::UnexpectedPass {
            issue: "issue_2".to_string()
        })
    );
    assert!(!report.is_success());
}
