use super::{normalize_axes, one, tensor, IntsFrom, Kernel, KernelContext, KernelError, StaticInts};
use crate::graph::Attributes;
use crate::inference::{normalize_axis, InferenceContext, InferenceRule, InferredValue, ShapeInferenceError};
use crate::numeric_tensor::{NumericTensorError, ReduceOp};
use crate::registry::{OperatorRegistry, RegistryError, VersionRange};
use crate::types::{Dimension, TensorType};
use crate::value::Value;

/// Axes a reduction runs over, or `None` when `noop_with_empty_axes` turns it into an identity.
fn reduce_axes(axes: Option<Vec<i64>>, rank: usize, attributes: &Attributes) -> Result<Option<Vec<usize>>, NumericTensorError> {
    match axes {
        Some(axes) if !axes.is_empty() => Ok(Some(normalize_axes(&axes, rank)?)),
        _ if attributes.int_or("noop_with_empty_axes", 0) != 0 => Ok(None),
        _ => Ok(Some((0..rank).collect())),
    }
}

fn keepdims(attributes: &Attributes) -> bool {
    attributes.int_or("keepdims", 1) != 0
}

fn reduce_kernel(op: ReduceOp, axes_from: IntsFrom) -> impl Kernel {
    move |_ctx: &KernelContext, inputs: &[Option<Value>], attributes: &Attributes| -> Result<Vec<Value>, KernelError> {
        let data = tensor(inputs, 0)?;
        match reduce_axes(axes_from.read(inputs, attributes)?, data.rank(), attributes)? {
            Some(axes) => one(data.reduce(op, &axes, keepdims(attributes))?),
            None => one(data.clone()),
        }
    }
}

fn reduce_rule(op: ReduceOp, axes_from: IntsFrom) -> impl InferenceRule {
    move |ctx: &InferenceContext| -> Result<Vec<InferredValue>, ShapeInferenceError> {
        let data = ctx.required_tensor_input(0)?;
        let attributes = ctx.attributes();
        let keep = keepdims(attributes);
        let axes = match axes_from.infer(ctx) {
            StaticInts::Known(axes) => Some(axes),
            StaticInts::Absent => None,
            StaticInts::Unknown => {
                let shape = match (&data.shape, keep) {
                    (Some(shape), true) => Some(vec![Dimension::Unknown; shape.len()]),
                    _ => None,
                };
                return Ok(vec![InferredValue::tensor(TensorType { dtype: data.dtype, shape })]);
            }
        };
        if let Some(x) = ctx.constant(0) {
            let folded = match reduce_axes(axes, x.rank(), attributes)? {
                Some(axes) => x.reduce(op, &axes, keep)?,
                None => x.clone(),
            };
            return Ok(vec![InferredValue::constant(folded)]);
        }
        let Some(shape) = &data.shape else {
            return Ok(vec![InferredValue::tensor(TensorType::new(data.dtype, None))]);
        };
        let shape = match reduce_axes(axes, shape.len(), attributes)? {
            None => shape.clone(),
            Some(axes) => shape
                .iter()
                .enumerate()
                .filter_map(|(i, d)| match (axes.contains(&i), keep) {
                    (false, _) => Some(d.clone()),
                    (true, true) => Some(Dimension::Known(1)),
                    (true, false) => None,
                })
                .collect(),
        };
        Ok(vec![InferredValue::tensor(TensorType {
            dtype: data.dtype,
            shape: Some(shape),
        })])
    }
}

/// Opset 1-12 flattens the input to 2-D around `axis` and normalizes each row; opset 13
/// normalizes along the single axis.
fn softmax_kernel(coerce_2d: bool) -> impl Kernel {
    move |_ctx: &KernelContext, inputs: &[Option<Value>], attributes: &Attributes| -> Result<Vec<Value>, KernelError> {
        let data = tensor(inputs, 0)?;
        if coerce_2d {
            let rank = data.rank();
            let axis = softmax_2d_axis(attributes.int_or("axis", 1), rank)?;
            let outer: usize = data.shape()[..axis].iter().product();
            let inner: usize = data.shape()[axis..].iter().product();
            let flat = data.reshape(&[outer, inner])?;
            one(flat.softmax(1)?.reshape(data.shape())?)
        } else {
            let axis = crate::numeric_tensor::normalize_axis(attributes.int_or("axis", -1), data.rank())?;
            one(data.softmax(axis)?)
        }
    }
}

fn softmax_2d_axis(axis: i64, rank: usize) -> Result<usize, NumericTensorError> {
    // A scalar still coerces to a 1x1 matrix.
    if rank == 0 {
        return Ok(0);
    }
    crate::numeric_tensor::normalize_axis(axis, rank)
}

fn softmax_rule(coerce_2d: bool) -> impl InferenceRule {
    move |ctx: &InferenceContext| -> Result<Vec<InferredValue>, ShapeInferenceError> {
        let data = ctx.required_tensor_input(0)?;
        if let Some(dtype) = data.dtype {
            if !dtype.is_float() {
                return Err(ShapeInferenceError::Invalid(format!("Softmax is not defined for {dtype}")));
            }
        }
        if let Some(rank) = data.rank() {
            if coerce_2d {
                softmax_2d_axis(ctx.attributes().int_or("axis", 1), rank)?;
            } else {
                normalize_axis(ctx.attributes().int_or("axis", -1), rank)?;
            }
        }
        Ok(vec![InferredValue::tensor(data)])
    }
}

pub(super) fn register(registry: &mut OperatorRegistry) -> Result<(), RegistryError> {
    let attribute_axes = IntsFrom::Attribute("axes");
    let input_axes = IntsFrom::Input(1);
    registry.register(
        "ReduceSum",
        "",
        VersionRange::between(1, 12),
        reduce_rule(ReduceOp::Sum, attribute_axes),
        reduce_kernel(ReduceOp::Sum, attribute_axes),
    )?;
    registry.register(
        "ReduceSum",
        "",
        VersionRange::from(13),
        reduce_rule(ReduceOp::Sum, input_axes),
        reduce_kernel(ReduceOp::Sum, input_axes),
    )?;
    for (name, op) in [("ReduceMean", ReduceOp::Mean), ("ReduceMax", ReduceOp::Max), ("ReduceMin", ReduceOp::Min)] {
        registry.register(
            name,
            "",
            VersionRange::between(1, 17),
            reduce_rule(op, attribute_axes),
            reduce_kernel(op, attribute_axes),
        )?;
        registry.register(name, "", VersionRange::from(18), reduce_rule(op, input_axes), reduce_kernel(op, input_axes))?;
    }

    registry.register("Softmax", "", VersionRange::between(1, 12), softmax_rule(true), softmax_kernel(true))?;
    registry.register("Softmax", "", VersionRange::from(13), softmax_rule(false), softmax_kernel(false))?;
    Ok(())
}
