use super::*;
use half::f16;
use whisper_runtime::{DType, Executor};

pub fn test_add_broadcast(executor: &Executor) {
    let a = tensor(vec![1.0f32, 2.0, 3.0], &[3, 1]);
    let b = tensor(vec![10.0f32, 20.0, 30.0, 40.0], &[1, 4]);
    let c = run_single(executor, "Add", vec![a, b], |_| {});
    assert_eq!(c.shape(), &[3, 4]);
    assert_close(&c, &[11.0, 21.0, 31.0, 41.0, 12.0, 22.0, 32.0, 42.0, 13.0, 23.0, 33.0, 43.0]);
}

pub fn test_add_f16(executor: &Executor) {
    let a = NumericTensor::from_vec(vec![f16::from_f32(1.5), f16::from_f32(-2.0)]);
    let b = NumericTensor::from_vec(vec![f16::from_f32(0.25), f16::from_f32(4.0)]);
    let c = run_single(executor, "Add", vec![a, b], |_| {});
    assert_eq!(c.dtype(), DType::F16);
    assert_close(&c, &[1.75, 2.0]);
}

pub fn test_div_integer_by_zero(executor: &Executor) {
    let a = NumericTensor::from_vec(vec![7i32, -7, 3]);
    let b = NumericTensor::from_vec(vec![2i32, 2, 0]);
    let c = run_single(executor, "Div", vec![a, b], |_| {});
    assert_eq!(c.to_i64_vec().unwrap(), vec![3, -3, 0]);
}

pub fn test_mod_floored(executor: &Executor) {
    let a = NumericTensor::from_vec(vec![-7i64, 7]);
    let b = NumericTensor::from_vec(vec![3i64, -3]);
    let c = run_single(executor, "Mod", vec![a, b], |_| {});
    assert_eq!(c.to_i64_vec().unwrap(), vec![2, -2]);
}

pub fn test_mod_fmod(executor: &Executor) {
    let a = NumericTensor::from_vec(vec![-7i64, 7]);
    let b = NumericTensor::from_vec(vec![3i64, -3]);
    let c = run_single(executor, "Mod", vec![a, b], |node| {
        node.attr("fmod", 1i64);
    });
    assert_eq!(c.to_i64_vec().unwrap(), vec![-1, 1]);
}

pub fn test_sum_variadic(executor: &Executor) {
    let inputs = vec![
        NumericTensor::from_vec(vec![1.0f32, 2.0]),
        NumericTensor::from_vec(vec![10.0f32, 20.0]),
        NumericTensor::from_vec(vec![100.0f32, 200.0]),
    ];
    let c = run_single(executor, "Sum", inputs, |_| {});
    assert_close(&c, &[111.0, 222.0]);
}

pub fn test_matmul(executor: &Executor) {
    let a = tensor(vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
    let b = tensor(vec![7.0f32, 8.0, 9.0, 10.0, 11.0, 12.0], &[3, 2]);
    let c = run_single(executor, "MatMul", vec![a, b], |_| {});
    assert_eq!(c.shape(), &[2, 2]);
    assert_close(&c, &[58.0, 64.0, 139.0, 154.0]);
}

pub fn test_matmul_batched(executor: &Executor) {
    let a = tensor((0..12).map(|x| x as f32).collect(), &[2, 2, 3]);
    let b = tensor(vec![1.0f32, 0.0, 0.0, 1.0, 1.0, 1.0], &[3, 2]);
    let c = run_single(executor, "MatMul", vec![a, b], |_| {});
    assert_eq!(c.shape(), &[2, 2, 2]);
    assert_close(&c, &[2.0, 3.0, 8.0, 9.0, 14.0, 15.0, 20.0, 21.0]);
}

pub fn test_gemm_trans_b_with_bias(executor: &Executor) {
    let a = tensor(vec![1.0f32, 2.0], &[1, 2]);
    let b = tensor(vec![1.0f32, 1.0, 2.0, 0.0], &[2, 2]);
    let c = tensor(vec![0.5f32], &[1]);
    let y = run_single(executor, "Gemm", vec![a, b, c], |node| {
        node.attr("transB", 1i64).attr("alpha", 2.0f32);
    });
    assert_close(&y, &[6.5, 4.5]);
}

pub fn test_softmax(executor: &Executor) {
    let x = tensor(vec![1.0f32, 2.0, 3.0, 1.0, 1.0, 1.0], &[2, 3]);
    let y = run_single(executor, "Softmax", vec![x], |_| {});
    assert_close(&y, &[0.09003057, 0.24472847, 0.66524096, 1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0]);
}

pub fn test_where(executor: &Executor) {
    let condition = NumericTensor::from_vec(vec![true, false, true]);
    let x = NumericTensor::from_vec(vec![1.0f32, 2.0, 3.0]);
    let y = NumericTensor::from_scalar(-1.0f32);
    let out = run_single(executor, "Where", vec![condition, x, y], |_| {});
    assert_close(&out, &[1.0, -1.0, 3.0]);
}

pub fn test_compare_and_not(executor: &Executor) {
    let a = NumericTensor::from_vec(vec![1i64, 5, 3]);
    let b = NumericTensor::from_vec(vec![2i64, 5, 1]);
    let less = run_single(executor, "Less", vec![a, b], |_| {});
    assert_eq!(less.dtype(), DType::BOOL);
    let not = run_single(executor, "Not", vec![less], |_| {});
    assert_eq!(not.to_i64_vec().unwrap(), vec![0, 1, 1]);
}

pub fn test_reduce_mean_keepdims(executor: &Executor) {
    let x = tensor(vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
    let axes = NumericTensor::from_vec(vec![1i64]);
    let y = run_single(executor, "ReduceMean", vec![x, axes.clone()], |_| {});
    assert_eq!(y.shape(), &[2, 1]);
    assert_close(&y, &[2.0, 5.0]);

    let x = tensor(vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
    let y = run_single(executor, "ReduceSum", vec![x, axes], |node| {
        node.attr("keepdims", 0i64);
    });
    assert_eq!(y.shape(), &[2]);
    assert_close(&y, &[6.0, 15.0]);
}
