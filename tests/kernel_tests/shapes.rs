use super::*;
use whisper_runtime::{DType, Executor};

fn iota(shape: &[usize]) -> NumericTensor {
    let count = shape.iter().product::<usize>();
    tensor((0..count).map(|x| x as f32).collect(), shape)
}

pub fn test_reshape_copy_and_infer(executor: &Executor) {
    let target = NumericTensor::from_vec(vec![0i64, -1]);
    let y = run_single(executor, "Reshape", vec![iota(&[2, 3, 4]), target], |_| {});
    assert_eq!(y.shape(), &[2, 12]);
}

pub fn test_transpose_default_reverses(executor: &Executor) {
    let y = run_single(executor, "Transpose", vec![iota(&[2, 3])], |_| {});
    assert_eq!(y.shape(), &[3, 2]);
    assert_close(&y, &[0.0, 3.0, 1.0, 4.0, 2.0, 5.0]);
}

pub fn test_concat_axis_1(executor: &Executor) {
    let a = iota(&[2, 1]);
    let b = tensor(vec![10.0f32, 11.0, 12.0, 13.0], &[2, 2]);
    let y = run_single(executor, "Concat", vec![a, b], |node| {
        node.attr("axis", 1i64);
    });
    assert_eq!(y.shape(), &[2, 3]);
    assert_close(&y, &[0.0, 10.0, 11.0, 1.0, 12.0, 13.0]);
}

pub fn test_split_with_sizes(executor: &Executor) {
    let sizes = NumericTensor::from_vec(vec![1i64, 3]);
    let outputs = run_node(executor, "Split", vec![iota(&[4]), sizes], 2, |_| {});
    assert_close(outputs[0].as_tensor().unwrap(), &[0.0]);
    assert_close(outputs[1].as_tensor().unwrap(), &[1.0, 2.0, 3.0]);
}

pub fn test_split_even(executor: &Executor) {
    let outputs = run_node(executor, "Split", vec![iota(&[2, 5])], 2, |node| {
        node.attr("axis", 1i64);
    });
    assert_eq!(outputs[0].as_tensor().unwrap().shape(), &[2, 3]);
    assert_eq!(outputs[1].as_tensor().unwrap().shape(), &[2, 2]);
}

pub fn test_squeeze_unsqueeze(executor: &Executor) {
    let axes = NumericTensor::from_vec(vec![0i64, -1]);
    let y = run_single(executor, "Unsqueeze", vec![iota(&[3]), axes.clone()], |_| {});
    assert_eq!(y.shape(), &[1, 3, 1]);
    let z = run_single(executor, "Squeeze", vec![y, axes], |_| {});
    assert_eq!(z.shape(), &[3]);
    let all = run_single(executor, "Squeeze", vec![iota(&[1, 2, 1])], |_| {});
    assert_eq!(all.shape(), &[2]);
}

pub fn test_slice_negative_step(executor: &Executor) {
    let starts = NumericTensor::from_vec(vec![-1i64]);
    let ends = NumericTensor::from_vec(vec![i64::MIN]);
    let axes = NumericTensor::from_vec(vec![0i64]);
    let steps = NumericTensor::from_vec(vec![-2i64]);
    let y = run_single(executor, "Slice", vec![iota(&[5]), starts, ends, axes, steps], |_| {});
    assert_close(&y, &[4.0, 2.0, 0.0]);
}

pub fn test_gather_axis_1(executor: &Executor) {
    let indices = NumericTensor::from_vec(vec![2i64, -3]);
    let y = run_single(executor, "Gather", vec![iota(&[2, 3]), indices], |node| {
        node.attr("axis", 1i64);
    });
    assert_eq!(y.shape(), &[2, 2]);
    assert_close(&y, &[2.0, 0.0, 5.0, 3.0]);
}

pub fn test_expand(executor: &Executor) {
    let shape = NumericTensor::from_vec(vec![2i64, 3]);
    let y = run_single(executor, "Expand", vec![iota(&[3]), shape], |_| {});
    assert_eq!(y.shape(), &[2, 3]);
    assert_close(&y, &[0.0, 1.0, 2.0, 0.0, 1.0, 2.0]);
}

pub fn test_range(executor: &Executor) {
    let y = run_single(
        executor,
        "Range",
        vec![
            NumericTensor::from_scalar(1i64),
            NumericTensor::from_scalar(8i64),
            NumericTensor::from_scalar(3i64),
        ],
        |_| {},
    );
    assert_eq!(y.to_i64_vec().unwrap(), vec![1, 4, 7]);
}

pub fn test_constant_of_shape(executor: &Executor) {
    let shape = NumericTensor::from_vec(vec![2i64, 2]);
    let y = run_single(executor, "ConstantOfShape", vec![shape], |node| {
        node.attr("value", NumericTensor::from_vec(vec![7i64]));
    });
    assert_eq!(y.dtype(), DType::I64);
    assert_eq!(y.to_i64_vec().unwrap(), vec![7, 7, 7, 7]);
}

pub fn test_shape_window_and_size(executor: &Executor) {
    let s = run_single(executor, "Shape", vec![iota(&[2, 3, 4])], |node| {
        node.attr("start", 1i64);
    });
    assert_eq!(s.to_i64_vec().unwrap(), vec![3, 4]);
    let n = run_single(executor, "Size", vec![iota(&[2, 3, 4])], |_| {});
    assert_eq!(n.scalar_i64().unwrap(), 24);
}

pub fn test_flatten(executor: &Executor) {
    let y = run_single(executor, "Flatten", vec![iota(&[2, 3, 4])], |node| {
        node.attr("axis", 2i64);
    });
    assert_eq!(y.shape(), &[6, 4]);
}

pub fn test_cast_int_to_float(executor: &Executor) {
    let y = run_single(executor, "Cast", vec![NumericTensor::from_vec(vec![1i64, -2])], |node| {
        node.attr("to", 1i64);
    });
    assert_eq!(y.dtype(), DType::F32);
    assert_close(&y, &[1.0, -2.0]);
}
