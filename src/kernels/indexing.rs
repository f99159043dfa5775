use super::{normalize_axes, one, tensor, IntsFrom, Kernel, KernelContext, KernelError, StaticInts};
use crate::graph::Attributes;
use crate::inference::broadcast::merge_dtypes;
use crate::inference::{normalize_axis, InferenceContext, InferenceRule, InferredValue, ShapeInferenceError};
use crate::numeric_tensor::{NumericTensor, NumericTensorError};
use crate::registry::{OperatorRegistry, RegistryError, VersionRange};
use crate::types::{Dimension, TensorType};
use crate::value::Value;
use ndarray::Slice;

fn gather_kernel(_ctx: &KernelContext, inputs: &[Option<Value>], attributes: &Attributes) -> Result<Vec<Value>, KernelError> {
    let data = tensor(inputs, 0)?;
    let axis = crate::numeric_tensor::normalize_axis(attributes.int_or("axis", 0), data.rank())?;
    one(data.gather(tensor(inputs, 1)?, axis)?)
}

fn infer_gather(ctx: &InferenceContext) -> Result<Vec<InferredValue>, ShapeInferenceError> {
    let data = ctx.required_tensor_input(0)?;
    let indices = ctx.required_tensor_input(1)?;
    let axis = ctx.attributes().int_or("axis", 0);
    if let Some([x, i]) = ctx.constants([0, 1]).as_deref() {
        let axis = normalize_axis(axis, x.rank())?;
        return Ok(vec![InferredValue::constant(x.gather(i, axis)?)]);
    }
    let shape = match (&data.shape, &indices.shape) {
        (Some(shape), Some(index_shape)) => {
            let axis = normalize_axis(axis, shape.len())?;
            let mut out = shape[..axis].to_vec();
            out.extend(index_shape.iter().cloned());
            out.extend(shape[axis + 1..].iter().cloned());
            Some(out)
        }
        _ => None,
    };
    Ok(vec![InferredValue::tensor(TensorType {
        dtype: data.dtype,
        shape,
    })])
}

/// Converts one `(start, end, step)` triple into an ndarray slice over a dimension of
/// length `dim`, clamping out of range bounds the way ONNX does.
fn axis_slice(start: i64, end: i64, step: i64, dim: usize) -> Result<Slice, NumericTensorError> {
    if step == 0 {
        return Err(NumericTensorError::InvalidArgument("Slice step must be non-zero".to_string()));
    }
    let dim = dim as i64;
    let adjust = |v: i64| if v < 0 { v.saturating_add(dim) } else { v };
    let (start, end) = (adjust(start), adjust(end));
    let empty = Slice::new(0, Some(0), 1);
    if step > 0 {
        let s = start.clamp(0, dim);
        let e = end.clamp(0, dim).max(s);
        Ok(Slice::new(s as isize, Some(e as isize), step as isize))
    } else if dim == 0 {
        Ok(empty)
    } else {
        // ndarray walks a negative step backwards from the end of [start, end).
        let s = start.clamp(0, dim - 1);
        let e = end.clamp(-1, dim - 1);
        if s <= e {
            Ok(empty)
        } else {
            Ok(Slice::new((e + 1) as isize, Some((s + 1) as isize), step as isize))
        }
    }
}

fn slice_len(slice: &Slice) -> usize {
    let end = slice.end.unwrap_or(slice.start);
    let step = slice.step.unsigned_abs();
    ((end - slice.start).max(0) as usize).div_ceil(step)
}

#[derive(Debug, Clone, Copy)]
struct SliceArgs {
    starts: IntsFrom,
    ends: IntsFrom,
    axes: IntsFrom,
    steps: Option<IntsFrom>,
}

const SLICE_ATTRIBUTES: SliceArgs = SliceArgs {
    starts: IntsFrom::Attribute("starts"),
    ends: IntsFrom::Attribute("ends"),
    axes: IntsFrom::Attribute("axes"),
    steps: None,
};

const SLICE_INPUTS: SliceArgs = SliceArgs {
    starts: IntsFrom::Input(1),
    ends: IntsFrom::Input(2),
    axes: IntsFrom::Input(3),
    steps: Some(IntsFrom::Input(4)),
};

/// Per-axis slices for a tensor of `shape`; axes not named keep their full extent.
fn build_slices(
    shape: &[usize],
    starts: &[i64],
    ends: &[i64],
    axes: Option<&[i64]>,
    steps: Option<&[i64]>,
) -> Result<Vec<Slice>, NumericTensorError> {
    let rank = shape.len();
    let axes = match axes {
        Some(axes) => normalize_axes(axes, rank)?,
        None => (0..starts.len()).collect(),
    };
    let count = starts.len();
    if ends.len() != count || axes.len() != count || steps.is_some_and(|s| s.len() != count) {
        return Err(NumericTensorError::InvalidArgument(format!(
            "Slice arguments disagree in length: {count} starts, {} ends, {} axes",
            ends.len(),
            axes.len()
        )));
    }
    let mut slices = vec![Slice::from(..); rank];
    for (i, &axis) in axes.iter().enumerate() {
        let dim = *shape.get(axis).ok_or(NumericTensorError::AxisOutOfRange(axis as i64, rank))?;
        let step = steps.map_or(1, |s| s[i]);
        slices[axis] = axis_slice(starts[i], ends[i], step, dim)?;
    }
    Ok(slices)
}

fn slice_kernel(args: SliceArgs) -> impl Kernel {
    move |_ctx: &KernelContext, inputs: &[Option<Value>], attributes: &Attributes| -> Result<Vec<Value>, KernelError> {
        let data = tensor(inputs, 0)?;
        let starts = args.starts.read(inputs, attributes)?.ok_or(KernelError::MissingInput(1))?;
        let ends = args.ends.read(inputs, attributes)?.ok_or(KernelError::MissingInput(2))?;
        let axes = args.axes.read(inputs, attributes)?;
        let steps = match args.steps {
            Some(source) => source.read(inputs, attributes)?,
            None => None,
        };
        let slices = build_slices(data.shape(), &starts, &ends, axes.as_deref(), steps.as_deref())?;
        one(data.slice(&slices)?)
    }
}

fn known_or_absent(ints: StaticInts) -> Option<Option<Vec<i64>>> {
    match ints {
        StaticInts::Known(values) => Some(Some(values)),
        StaticInts::Absent => Some(None),
        StaticInts::Unknown => None,
    }
}

fn slice_rule(args: SliceArgs) -> impl InferenceRule {
    move |ctx: &InferenceContext| -> Result<Vec<InferredValue>, ShapeInferenceError> {
        let data = ctx.required_tensor_input(0)?;
        let starts = known_or_absent(args.starts.infer(ctx));
        let ends = known_or_absent(args.ends.infer(ctx));
        let axes = known_or_absent(args.axes.infer(ctx));
        let steps = match args.steps {
            Some(source) => known_or_absent(source.infer(ctx)),
            None => Some(None),
        };
        let (Some(Some(starts)), Some(Some(ends)), Some(axes), Some(steps)) = (starts, ends, axes, steps) else {
            let shape = data.rank().map(|rank| vec![Dimension::Unknown; rank]);
            return Ok(vec![InferredValue::tensor(TensorType { dtype: data.dtype, shape })]);
        };
        if let Some(x) = ctx.constant(0) {
            let slices = build_slices(x.shape(), &starts, &ends, axes.as_deref(), steps.as_deref())?;
            return Ok(vec![InferredValue::constant(x.slice(&slices)?)]);
        }
        let Some(shape) = &data.shape else {
            return Ok(vec![InferredValue::tensor(data)]);
        };
        let axes = match &axes {
            Some(axes) => normalize_axes(axes, shape.len())?,
            None => (0..starts.len()).collect(),
        };
        let mut out = shape.clone();
        for (i, &axis) in axes.iter().enumerate() {
            let (Some(&start), Some(&end)) = (starts.get(i), ends.get(i)) else {
                return Err(ShapeInferenceError::Invalid("Slice arguments disagree in length".to_string()));
            };
            let step = steps.as_ref().and_then(|s| s.get(i).copied()).unwrap_or(1);
            out[axis] = match shape[axis].known() {
                Some(dim) => Dimension::Known(slice_len(&axis_slice(start, end, step, dim)?)),
                None => Dimension::Unknown,
            };
        }
        Ok(vec![InferredValue::tensor(TensorType {
            dtype: data.dtype,
            shape: Some(out),
        })])
    }
}

fn range_kernel(_ctx: &KernelContext, inputs: &[Option<Value>], _attributes: &Attributes) -> Result<Vec<Value>, KernelError> {
    one(NumericTensor::range(tensor(inputs, 0)?, tensor(inputs, 1)?, tensor(inputs, 2)?)?)
}

fn infer_range(ctx: &InferenceContext) -> Result<Vec<InferredValue>, ShapeInferenceError> {
    let mut dtype = None;
    for index in 0..3 {
        let t = ctx.required_tensor_input(index)?;
        if t.rank().is_some_and(|r| r != 0) {
            return Err(ShapeInferenceError::RankMismatch {
                expected: 0,
                actual: t.rank().unwrap_or_default(),
            });
        }
        dtype = merge_dtypes(dtype, t.dtype)?;
    }
    if let Some([start, limit, delta]) = ctx.constants([0, 1, 2]).as_deref() {
        return Ok(vec![InferredValue::constant(NumericTensor::range(start, limit, delta)?)]);
    }
    Ok(vec![InferredValue::tensor(TensorType {
        dtype,
        shape: Some(vec![Dimension::Unknown]),
    })])
}

pub(super) fn register(registry: &mut OperatorRegistry) -> Result<(), RegistryError> {
    registry.register("Gather", "", VersionRange::from(1), infer_gather, gather_kernel)?;
    registry.register(
        "Slice",
        "",
        VersionRange::between(1, 9),
        slice_rule(SLICE_ATTRIBUTES),
        slice_kernel(SLICE_ATTRIBUTES),
    )?;
    registry.register("Slice", "", VersionRange::from(10), slice_rule(SLICE_INPUTS), slice_kernel(SLICE_INPUTS))?;
    registry.register("Range", "", VersionRange::from(11), infer_range, range_kernel)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slices_clamp_like_onnx() {
        assert_eq!(slice_len(&axis_slice(1, i64::MAX, 1, 5).unwrap()), 4);
        assert_eq!(slice_len(&axis_slice(-2, 10, 1, 5).unwrap()), 2);
        assert_eq!(slice_len(&axis_slice(0, 5, 2, 5).unwrap()), 3);
        assert_eq!(slice_len(&axis_slice(3, 1, 1, 5).unwrap()), 0);
        assert!(axis_slice(0, 1, 0, 5).is_err());
    }

    #[test]
    fn negative_steps_walk_backwards() {
        let x = NumericTensor::from_vec(vec![0i64, 1, 2, 3, 4]);
        let reversed = x.slice(&[axis_slice(-1, i64::MIN, -1, 5).unwrap()]).unwrap();
        assert_eq!(reversed.to_i64_vec().unwrap(), vec![4, 3, 2, 1, 0]);
        let strided = x.slice(&[axis_slice(4, 0, -2, 5).unwrap()]).unwrap();
        assert_eq!(strided.to_i64_vec().unwrap(), vec![4, 2]);
    }
}
