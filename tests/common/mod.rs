#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Once;
use whisper_runtime::{Executor, ExecutorConfig, NumericTensor, Value};

static INIT: Once = Once::new();

pub fn init_logging() {
    INIT.call_once(|| {
        env_logger::init();
    });
}

pub fn executor(config: ExecutorConfig) -> Executor {
    init_logging();
    Executor::with_builtins(config).unwrap()
}

pub fn default_executor() -> Executor {
    executor(ExecutorConfig::default())
}

pub fn inputs<const N: usize>(values: [(&str, NumericTensor); N]) -> HashMap<String, Value> {
    values
        .into_iter()
        .map(|(name, tensor)| (name.to_string(), Value::Tensor(tensor)))
        .collect()
}

pub fn f32s(values: &[f32]) -> NumericTensor {
    NumericTensor::from_vec(values.to_vec())
}

pub fn as_f64(value: &Value) -> Vec<f64> {
    value.as_tensor().unwrap().to_f64_vec().unwrap()
}
