use super::{input, normalize_axes, one, present_tensors, tensor, IntsFrom, Kernel, KernelContext, KernelError, StaticInts};
use crate::dtype::DType;
use crate::graph::Attributes;
use crate::inference::broadcast::{broadcast_shapes as broadcast_dims, merge_dtypes};
use crate::inference::{
    normalize_axis, same_as_input, InferenceContext, InferenceRule, InferredValue, ShapeInferenceError,
};
use crate::numeric_tensor::{broadcast_shapes, NumericTensor, NumericTensorError};
use crate::registry::{OperatorRegistry, RegistryError, VersionRange};
use crate::types::{Dimension, TensorType};
use crate::value::Value;

fn identity_kernel(_ctx: &KernelContext, inputs: &[Option<Value>], _attributes: &Attributes) -> Result<Vec<Value>, KernelError> {
    Ok(vec![input(inputs, 0)?.clone()])
}

fn infer_identity(ctx: &InferenceContext) -> Result<Vec<InferredValue>, ShapeInferenceError> {
    Ok(same_as_input(ctx, 0))
}

/// Resolves a `Reshape` target: `0` copies the input dimension unless `allowzero` is set and
/// a single `-1` takes whatever is left.
fn reshape_target(input: &[usize], shape: &[i64], allowzero: bool) -> Result<Vec<usize>, NumericTensorError> {
    let invalid = |message: String| NumericTensorError::InvalidArgument(message);
    let mut out = Vec::with_capacity(shape.len());
    let mut inferred = None;
    for (i, &d) in shape.iter().enumerate() {
        out.push(match d {
            0 if !allowzero => *input
                .get(i)
                .ok_or_else(|| invalid(format!("Reshape copies dimension {i} of a rank {} input", input.len())))?,
            -1 => {
                if inferred.replace(i).is_some() {
                    return Err(invalid("Reshape target has more than one -1".to_string()));
                }
                1
            }
            d if d < 0 => return Err(invalid(format!("Invalid Reshape dimension {d}"))),
            d => d as usize,
        });
    }
    if let Some(i) = inferred {
        let total: usize = input.iter().product();
        let rest = out.iter().try_fold(1usize, |acc, d| acc.checked_mul(*d)).unwrap_or(0);
        if rest == 0 || total % rest != 0 {
            return Err(NumericTensorError::InvalidReshapeError(input.to_vec(), out));
        }
        out[i] = total / rest;
    }
    Ok(out)
}

fn reshape_kernel(_ctx: &KernelContext, inputs: &[Option<Value>], attributes: &Attributes) -> Result<Vec<Value>, KernelError> {
    let data = tensor(inputs, 0)?;
    let shape = tensor(inputs, 1)?.to_i64_vec()?;
    let target = reshape_target(data.shape(), &shape, attributes.int_or("allowzero", 0) != 0)?;
    one(data.reshape(&target)?)
}

fn infer_reshape(ctx: &InferenceContext) -> Result<Vec<InferredValue>, ShapeInferenceError> {
    let data = ctx.required_tensor_input(0)?;
    let allowzero = ctx.attributes().int_or("allowzero", 0) != 0;
    if let Some([x, shape]) = ctx.constants([0, 1]).as_deref() {
        let target = reshape_target(x.shape(), &shape.to_i64_vec()?, allowzero)?;
        return Ok(vec![InferredValue::constant(x.reshape(&target)?)]);
    }
    let Some(target) = ctx.constant_ints(1) else {
        // Only the rank is known, from the length of the shape input.
        let rank = ctx.tensor_input(1)?.concrete_shape().and_then(|s| s.first().copied());
        return Ok(vec![InferredValue::tensor(TensorType {
            dtype: data.dtype,
            shape: rank.map(|n| vec![Dimension::Unknown; n]),
        })]);
    };

    let mut dims = Vec::with_capacity(target.len());
    let mut inferred = None;
    for (i, &d) in target.iter().enumerate() {
        dims.push(match d {
            0 if !allowzero => match &data.shape {
                Some(shape) => shape.get(i).cloned().ok_or_else(|| {
                    ShapeInferenceError::Invalid(format!("Reshape copies dimension {i} of a rank {} input", shape.len()))
                })?,
                None => Dimension::Unknown,
            },
            -1 => {
                if inferred.replace(i).is_some() {
                    return Err(ShapeInferenceError::Invalid("Reshape target has more than one -1".to_string()));
                }
                Dimension::Unknown
            }
            d if d < 0 => return Err(ShapeInferenceError::Invalid(format!("Invalid Reshape dimension {d}"))),
            d => Dimension::Known(d as usize),
        });
    }
    let total = data
        .concrete_shape()
        .and_then(|shape| shape.iter().try_fold(1usize, |acc, d| acc.checked_mul(*d)));
    if let (Some(i), Some(total)) = (inferred, total) {
        let rest = dims
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != i)
            .try_fold(1usize, |acc, (_, d)| acc.checked_mul(d.known()?));
        if let Some(rest) = rest {
            if rest == 0 || total % rest != 0 {
                return Err(ShapeInferenceError::Invalid(format!(
                    "cannot reshape {total} elements into {target:?}"
                )));
            }
            dims[i] = Dimension::Known(total / rest);
        }
    }
    Ok(vec![InferredValue::tensor(TensorType {
        dtype: data.dtype,
        shape: Some(dims),
    })])
}

/// The `[start, end)` window of dimensions reported by `Shape`, clamped to the rank.
fn shape_window(rank: usize, attributes: &Attributes) -> (usize, usize) {
    let clamp = |v: i64| {
        let v = if v < 0 { v + rank as i64 } else { v };
        v.clamp(0, rank as i64) as usize
    };
    let start = clamp(attributes.int_or("start", 0));
    let end = clamp(attributes.int_or("end", rank as i64));
    (start, end.max(start))
}

fn shape_kernel(_ctx: &KernelContext, inputs: &[Option<Value>], attributes: &Attributes) -> Result<Vec<Value>, KernelError> {
    let shape = tensor(inputs, 0)?.shape();
    let (start, end) = shape_window(shape.len(), attributes);
    one(NumericTensor::from_vec(shape[start..end].iter().map(|d| *d as i64).collect::<Vec<i64>>()))
}

fn infer_shape(ctx: &InferenceContext) -> Result<Vec<InferredValue>, ShapeInferenceError> {
    let data = ctx.required_tensor_input(0)?;
    let Some(shape) = &data.shape else {
        return Ok(vec![InferredValue::tensor(TensorType {
            dtype: Some(DType::I64),
            shape: Some(vec![Dimension::Unknown]),
        })]);
    };
    let (start, end) = shape_window(shape.len(), ctx.attributes());
    let window = &shape[start..end];
    if let Some(dims) = window.iter().map(|d| d.known().map(|d| d as i64)).collect::<Option<Vec<i64>>>() {
        return Ok(vec![InferredValue::constant(NumericTensor::from_vec(dims))]);
    }
    Ok(vec![InferredValue::tensor(TensorType::known(DType::I64, &[window.len()]))])
}

fn size_kernel(_ctx: &KernelContext, inputs: &[Option<Value>], _attributes: &Attributes) -> Result<Vec<Value>, KernelError> {
    one(NumericTensor::from_scalar(tensor(inputs, 0)?.num_elements() as i64))
}

fn infer_size(ctx: &InferenceContext) -> Result<Vec<InferredValue>, ShapeInferenceError> {
    let count = ctx
        .required_tensor_input(0)?
        .concrete_shape()
        .and_then(|shape| shape.iter().try_fold(1i64, |acc, d| acc.checked_mul(i64::try_from(*d).ok()?)));
    match count {
        Some(count) => Ok(vec![InferredValue::constant(NumericTensor::from_scalar(count))]),
        None => Ok(vec![InferredValue::tensor(TensorType::known(DType::I64, &[]))]),
    }
}

/// `Flatten` accepts axes in `[-rank, rank]`.
fn flatten_axis(axis: i64, rank: usize) -> Result<usize, NumericTensorError> {
    let adjusted = if axis < 0 { axis + rank as i64 } else { axis };
    if adjusted < 0 || adjusted > rank as i64 {
        Err(NumericTensorError::AxisOutOfRange(axis, rank))
    } else {
        Ok(adjusted as usize)
    }
}

fn flatten_kernel(_ctx: &KernelContext, inputs: &[Option<Value>], attributes: &Attributes) -> Result<Vec<Value>, KernelError> {
    let data = tensor(inputs, 0)?;
    let axis = flatten_axis(attributes.int_or("axis", 1), data.rank())?;
    let outer: usize = data.shape()[..axis].iter().product();
    let inner: usize = data.shape()[axis..].iter().product();
    one(data.reshape(&[outer, inner])?)
}

fn infer_flatten(ctx: &InferenceContext) -> Result<Vec<InferredValue>, ShapeInferenceError> {
    let data = ctx.required_tensor_input(0)?;
    let product = |dims: &[Dimension]| -> Dimension {
        dims.iter()
            .try_fold(1usize, |acc, d| acc.checked_mul(d.known()?))
            .map_or(Dimension::Unknown, Dimension::Known)
    };
    let shape = match &data.shape {
        Some(shape) => {
            let axis = flatten_axis(ctx.attributes().int_or("axis", 1), shape.len())?;
            vec![product(&shape[..axis]), product(&shape[axis..])]
        }
        None => vec![Dimension::Unknown, Dimension::Unknown],
    };
    Ok(vec![InferredValue::tensor(TensorType {
        dtype: data.dtype,
        shape: Some(shape),
    })])
}

fn permutation(attributes: &Attributes, rank: usize) -> Result<Vec<usize>, NumericTensorError> {
    match attributes.ints("perm") {
        Some(perm) => perm
            .iter()
            .map(|&p| usize::try_from(p).map_err(|_| NumericTensorError::AxisOutOfRange(p, rank)))
            .collect(),
        None => Ok((0..rank).rev().collect()),
    }
}

fn transpose_kernel(_ctx: &KernelContext, inputs: &[Option<Value>], attributes: &Attributes) -> Result<Vec<Value>, KernelError> {
    let data = tensor(inputs, 0)?;
    let perm = permutation(attributes, data.rank())?;
    one(data.transpose(Some(&perm))?)
}

fn infer_transpose(ctx: &InferenceContext) -> Result<Vec<InferredValue>, ShapeInferenceError> {
    let data = ctx.required_tensor_input(0)?;
    if let Some(x) = ctx.constant(0) {
        let perm = permutation(ctx.attributes(), x.rank())?;
        return Ok(vec![InferredValue::constant(x.transpose(Some(&perm))?)]);
    }
    let Some(shape) = &data.shape else {
        return Ok(vec![InferredValue::tensor(data)]);
    };
    let perm = permutation(ctx.attributes(), shape.len())?;
    if perm.len() != shape.len() || perm.iter().any(|&p| p >= shape.len()) {
        return Err(NumericTensorError::InvalidPermutation(perm, shape.len()).into());
    }
    Ok(vec![InferredValue::tensor(TensorType {
        dtype: data.dtype,
        shape: Some(perm.iter().map(|&p| shape[p].clone()).collect()),
    })])
}

fn expand_kernel(ctx: &KernelContext, inputs: &[Option<Value>], _attributes: &Attributes) -> Result<Vec<Value>, KernelError> {
    let data = tensor(inputs, 0)?;
    let shape = tensor(inputs, 1)?
        .to_i64_vec()?
        .into_iter()
        .map(|d| usize::try_from(d).map_err(|_| KernelError::InvalidInput(format!("negative Expand dimension {d}"))))
        .collect::<Result<Vec<usize>, _>>()?;
    let target = broadcast_shapes(data.shape(), &shape)
        .ok_or_else(|| NumericTensorError::NotBroadcastable(data.shape().to_vec(), shape.clone()))?;
    one(data.broadcast_to(&target, ctx.buffers())?)
}

fn infer_expand(ctx: &InferenceContext) -> Result<Vec<InferredValue>, ShapeInferenceError> {
    let data = ctx.required_tensor_input(0)?;
    let Some(target) = ctx.constant_ints(1) else {
        let target_rank = ctx.tensor_input(1)?.concrete_shape().and_then(|s| s.first().copied());
        let shape = match (data.rank(), target_rank) {
            (Some(a), Some(b)) => Some(vec![Dimension::Unknown; a.max(b)]),
            _ => None,
        };
        return Ok(vec![InferredValue::tensor(TensorType { dtype: data.dtype, shape })]);
    };
    if target.iter().any(|d| *d < 0) {
        return Err(ShapeInferenceError::Invalid(format!("negative Expand dimension in {target:?}")));
    }
    let target: Vec<Dimension> = target.iter().map(|d| Dimension::Known(*d as usize)).collect();
    let shape = match &data.shape {
        Some(shape) => Some(broadcast_dims(shape, &target).ok_or_else(|| {
            ShapeInferenceError::NotBroadcastable(
                data.clone(),
                TensorType {
                    dtype: data.dtype,
                    shape: Some(target.clone()),
                },
            )
        })?),
        None => None,
    };
    Ok(vec![InferredValue::tensor(TensorType { dtype: data.dtype, shape })])
}

fn concat_kernel(_ctx: &KernelContext, inputs: &[Option<Value>], attributes: &Attributes) -> Result<Vec<Value>, KernelError> {
    let operands = present_tensors(inputs)?;
    let first = operands.first().ok_or(KernelError::MissingInput(0))?;
    let axis = crate::numeric_tensor::normalize_axis(attributes.require_int("axis")?, first.rank())?;
    one(NumericTensor::concat(&operands, axis)?)
}

fn infer_concat(ctx: &InferenceContext) -> Result<Vec<InferredValue>, ShapeInferenceError> {
    let indices: Vec<usize> = (0..ctx.input_count()).filter(|i| ctx.has_input(*i)).collect();
    if indices.is_empty() {
        return Err(ShapeInferenceError::MissingInput(0));
    }
    let axis = ctx.attributes().require_int("axis")?;
    if let Some(constants) = ctx.constants(indices.iter().copied()) {
        let axis = normalize_axis(axis, constants[0].rank())?;
        return Ok(vec![InferredValue::constant(NumericTensor::concat(&constants, axis)?)]);
    }

    let types = indices.iter().map(|i| ctx.tensor_input(*i)).collect::<Result<Vec<_>, _>>()?;
    let mut dtype = None;
    for t in &types {
        dtype = merge_dtypes(dtype, t.dtype)?;
    }
    let Some(rank) = types.iter().find_map(TensorType::rank) else {
        return Ok(vec![InferredValue::tensor(TensorType { dtype, shape: None })]);
    };
    let axis = normalize_axis(axis, rank)?;
    let mut shape = vec![Dimension::Unknown; rank];
    let mut axis_total = Some(0usize);
    for t in &types {
        let Some(dims) = &t.shape else {
            axis_total = None;
            continue;
        };
        if dims.len() != rank {
            return Err(ShapeInferenceError::RankMismatch {
                expected: rank,
                actual: dims.len(),
            });
        }
        for (i, d) in dims.iter().enumerate() {
            if i == axis {
                axis_total = axis_total.zip(d.known()).map(|(a, b)| a + b);
            } else {
                shape[i] = shape[i].refine(d).ok_or_else(|| {
                    ShapeInferenceError::Invalid(format!("Concat operands disagree on dimension {i}"))
                })?;
            }
        }
    }
    shape[axis] = axis_total.map_or(Dimension::Unknown, Dimension::Known);
    Ok(vec![InferredValue::tensor(TensorType {
        dtype,
        shape: Some(shape),
    })])
}

/// Chunk sizes for `Split`: explicit sizes when given, otherwise `parts` chunks of
/// `ceil(len / parts)` with a smaller final chunk.
fn split_sizes(len: usize, explicit: Option<&[i64]>, parts: usize) -> Result<Vec<usize>, NumericTensorError> {
    if let Some(sizes) = explicit {
        return sizes
            .iter()
            .map(|&s| usize::try_from(s).map_err(|_| NumericTensorError::InvalidArgument(format!("negative split size {s}"))))
            .collect();
    }
    if parts == 0 {
        return Err(NumericTensorError::InvalidArgument("Split needs at least one output".to_string()));
    }
    let chunk = len.div_ceil(parts);
    let mut remaining = len;
    Ok((0..parts)
        .map(|_| {
            let size = chunk.min(remaining);
            remaining -= size;
            size
        })
        .collect())
}

fn split_parts(attributes: &Attributes, outputs: usize) -> usize {
    attributes.int("num_outputs").map_or(outputs, |n| n.max(0) as usize)
}

fn split_kernel(sizes_from: IntsFrom) -> impl Kernel {
    move |ctx: &KernelContext, inputs: &[Option<Value>], attributes: &Attributes| -> Result<Vec<Value>, KernelError> {
        let data = tensor(inputs, 0)?;
        let axis = crate::numeric_tensor::normalize_axis(attributes.int_or("axis", 0), data.rank())?;
        let explicit = sizes_from.read(inputs, attributes)?;
        let parts = split_parts(attributes, ctx.node().outputs.len());
        let sizes = split_sizes(data.shape()[axis], explicit.as_deref(), parts)?;
        Ok(data.split(axis, &sizes)?.into_iter().map(Value::Tensor).collect())
    }
}

fn split_rule(sizes_from: IntsFrom) -> impl InferenceRule {
    move |ctx: &InferenceContext| -> Result<Vec<InferredValue>, ShapeInferenceError> {
        let data = ctx.required_tensor_input(0)?;
        let outputs = ctx.output_count();
        let Some(shape) = &data.shape else {
            return Ok(vec![InferredValue::tensor(TensorType::new(data.dtype, None)); outputs]);
        };
        let axis = normalize_axis(ctx.attributes().int_or("axis", 0), shape.len())?;
        let parts = split_parts(ctx.attributes(), outputs);
        let sizes: Vec<Dimension> = match (sizes_from.infer(ctx), shape[axis].known()) {
            (StaticInts::Known(sizes), len) => {
                let sizes = split_sizes(len.unwrap_or(0), Some(sizes.as_slice()), parts)?;
                sizes.into_iter().map(Dimension::Known).collect()
            }
            (StaticInts::Absent, Some(len)) => split_sizes(len, None, parts)?.into_iter().map(Dimension::Known).collect(),
            _ => vec![Dimension::Unknown; outputs],
        };
        Ok(sizes
            .into_iter()
            .map(|size| {
                let mut dims = shape.clone();
                dims[axis] = size;
                InferredValue::tensor(TensorType {
                    dtype: data.dtype,
                    shape: Some(dims),
                })
            })
            .collect())
    }
}

fn squeeze_kernel(axes_from: IntsFrom) -> impl Kernel {
    move |_ctx: &KernelContext, inputs: &[Option<Value>], attributes: &Attributes| -> Result<Vec<Value>, KernelError> {
        let data = tensor(inputs, 0)?;
        let axes = axes_from
            .read(inputs, attributes)?
            .map(|axes| normalize_axes(&axes, data.rank()))
            .transpose()?;
        one(data.squeeze(axes.as_deref())?)
    }
}

fn squeeze_rule(axes_from: IntsFrom) -> impl InferenceRule {
    move |ctx: &InferenceContext| -> Result<Vec<InferredValue>, ShapeInferenceError> {
        let data = ctx.required_tensor_input(0)?;
        let axes = axes_from.infer(ctx);
        if let (Some(x), StaticInts::Known(_) | StaticInts::Absent) = (ctx.constant(0), &axes) {
            let normalized = match &axes {
                StaticInts::Known(axes) => Some(normalize_axes(axes, x.rank())?),
                _ => None,
            };
            return Ok(vec![InferredValue::constant(x.squeeze(normalized.as_deref())?)]);
        }
        let shape = match (&data.shape, axes) {
            (Some(shape), StaticInts::Known(axes)) => {
                let axes = normalize_axes(&axes, shape.len())?;
                if let Some(&bad) = axes.iter().find(|a| matches!(shape[**a], Dimension::Known(d) if d != 1)) {
                    return Err(NumericTensorError::InvalidSqueeze(bad, shape[bad].known().unwrap_or(0)).into());
                }
                Some(
                    shape
                        .iter()
                        .enumerate()
                        .filter(|(i, _)| !axes.contains(i))
                        .map(|(_, d)| d.clone())
                        .collect(),
                )
            }
            // Without axes every unit dimension goes, which is only decidable on known dims.
            (Some(shape), StaticInts::Absent) if shape.iter().all(|d| d.known().is_some()) => {
                Some(shape.iter().filter(|d| **d != Dimension::Known(1)).cloned().collect())
            }
            _ => None,
        };
        Ok(vec![InferredValue::tensor(TensorType { dtype: data.dtype, shape })])
    }
}

/// Normalizes `Unsqueeze` axes against the output rank and sorts them.
fn unsqueeze_axes(axes: &[i64], rank: usize) -> Result<Vec<usize>, NumericTensorError> {
    let mut axes = normalize_axes(axes, rank + axes.len())?;
    axes.sort_unstable();
    Ok(axes)
}

fn unsqueeze_kernel(axes_from: IntsFrom) -> impl Kernel {
    move |_ctx: &KernelContext, inputs: &[Option<Value>], attributes: &Attributes| -> Result<Vec<Value>, KernelError> {
        let data = tensor(inputs, 0)?;
        let axes = axes_from
            .read(inputs, attributes)?
            .ok_or_else(|| KernelError::InvalidInput("Unsqueeze requires axes".to_string()))?;
        one(data.unsqueeze(&unsqueeze_axes(&axes, data.rank())?)?)
    }
}

fn unsqueeze_rule(axes_from: IntsFrom) -> impl InferenceRule {
    move |ctx: &InferenceContext| -> Result<Vec<InferredValue>, ShapeInferenceError> {
        let data = ctx.required_tensor_input(0)?;
        let axes = match axes_from.infer(ctx) {
            StaticInts::Known(axes) => axes,
            StaticInts::Absent => return Err(ShapeInferenceError::InvalidAttribute("Unsqueeze requires axes".to_string())),
            StaticInts::Unknown => return Ok(vec![InferredValue::tensor(TensorType::new(data.dtype, None))]),
        };
        if let Some(x) = ctx.constant(0) {
            return Ok(vec![InferredValue::constant(x.unsqueeze(&unsqueeze_axes(&axes, x.rank())?)?)]);
        }
        let shape = match &data.shape {
            Some(shape) => {
                let axes = unsqueeze_axes(&axes, shape.len())?;
                let mut rest = shape.iter();
                let out_rank = shape.len() + axes.len();
                Some(
                    (0..out_rank)
                        .map(|i| {
                            if axes.contains(&i) {
                                Dimension::Known(1)
                            } else {
                                rest.next().cloned().unwrap_or(Dimension::Unknown)
                            }
                        })
                        .collect(),
                )
            }
            None => None,
        };
        Ok(vec![InferredValue::tensor(TensorType { dtype: data.dtype, shape })])
    }
}

fn cast_target(attributes: &Attributes) -> Result<DType, KernelError> {
    let code = attributes.require_int("to")?;
    DType::from_onnx_code(code as i32).map_err(|e| KernelError::InvalidInput(e.to_string()))
}

fn cast_kernel(_ctx: &KernelContext, inputs: &[Option<Value>], attributes: &Attributes) -> Result<Vec<Value>, KernelError> {
    one(tensor(inputs, 0)?.cast(cast_target(attributes)?)?)
}

fn cast_output(ctx: &InferenceContext, dtype: DType) -> Result<Vec<InferredValue>, ShapeInferenceError> {
    if let Some(x) = ctx.constant(0) {
        return Ok(vec![InferredValue::constant(x.cast(dtype)?)]);
    }
    let data = ctx.required_tensor_input(0)?;
    Ok(vec![InferredValue::tensor(TensorType {
        dtype: Some(dtype),
        shape: data.shape,
    })])
}

fn infer_cast(ctx: &InferenceContext) -> Result<Vec<InferredValue>, ShapeInferenceError> {
    let code = ctx.attributes().require_int("to")?;
    let dtype = DType::from_onnx_code(code as i32).map_err(|e| ShapeInferenceError::InvalidAttribute(e.to_string()))?;
    cast_output(ctx, dtype)
}

fn cast_like_kernel(_ctx: &KernelContext, inputs: &[Option<Value>], _attributes: &Attributes) -> Result<Vec<Value>, KernelError> {
    one(tensor(inputs, 0)?.cast(tensor(inputs, 1)?.dtype())?)
}

fn infer_cast_like(ctx: &InferenceContext) -> Result<Vec<InferredValue>, ShapeInferenceError> {
    match ctx.required_tensor_input(1)?.dtype {
        Some(dtype) => cast_output(ctx, dtype),
        None => Ok(vec![InferredValue::tensor(TensorType {
            dtype: None,
            shape: ctx.required_tensor_input(0)?.shape,
        })]),
    }
}

pub(super) fn register(registry: &mut OperatorRegistry) -> Result<(), RegistryError> {
    registry.register("Identity", "", VersionRange::from(1), infer_identity, identity_kernel)?;
    registry.register("Reshape", "", VersionRange::from(5), infer_reshape, reshape_kernel)?;
    registry.register("Shape", "", VersionRange::from(1), infer_shape, shape_kernel)?;
    registry.register("Size", "", VersionRange::from(1), infer_size, size_kernel)?;
    registry.register("Flatten", "", VersionRange::from(1), infer_flatten, flatten_kernel)?;
    registry.register("Transpose", "", VersionRange::from(1), infer_transpose, transpose_kernel)?;
    registry.register("Expand", "", VersionRange::from(8), infer_expand, expand_kernel)?;
    registry.register("Concat", "", VersionRange::from(4), infer_concat, concat_kernel)?;

    let split_v2 = IntsFrom::Attribute("split");
    registry.register("Split", "", VersionRange::between(2, 12), split_rule(split_v2), split_kernel(split_v2))?;
    registry.register("Split", "", VersionRange::from(13), split_rule(IntsFrom::Input(1)), split_kernel(IntsFrom::Input(1)))?;

    let axes_v1 = IntsFrom::Attribute("axes");
    let axes_v13 = IntsFrom::Input(1);
    registry.register("Squeeze", "", VersionRange::between(1, 12), squeeze_rule(axes_v1), squeeze_kernel(axes_v1))?;
    registry.register("Squeeze", "", VersionRange::from(13), squeeze_rule(axes_v13), squeeze_kernel(axes_v13))?;
    registry.register("Unsqueeze", "", VersionRange::between(1, 12), unsqueeze_rule(axes_v1), unsqueeze_kernel(axes_v1))?;
    registry.register("Unsqueeze", "", VersionRange::from(13), unsqueeze_rule(axes_v13), unsqueeze_kernel(axes_v13))?;

    registry.register("Cast", "", VersionRange::from(6), infer_cast, cast_kernel)?;
    registry.register("CastLike", "", VersionRange::from(15), infer_cast_like, cast_like_kernel)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reshape_copies_zero_and_infers_minus_one() {
        assert_eq!(reshape_target(&[2, 3, 4], &[0, -1], false).unwrap(), vec![2, 12]);
        assert_eq!(reshape_target(&[0, 3], &[0, 3], true).unwrap(), vec![0, 3]);
        assert!(reshape_target(&[2, 3], &[-1, -1], false).is_err());
        assert!(reshape_target(&[2, 3], &[4, -1], false).is_err());
    }

    #[test]
    fn split_without_sizes_leaves_a_short_tail() {
        assert_eq!(split_sizes(7, None, 3).unwrap(), vec![3, 3, 1]);
        assert_eq!(split_sizes(6, None, 2).unwrap(), vec![3, 3]);
        assert_eq!(split_sizes(6, Some(&[1, 5]), 2).unwrap(), vec![1, 5]);
    }

    #[test]
    fn shape_window_clamps() {
        let mut attributes = Attributes::new();
        attributes.insert("start", -2i64);
        attributes.insert("end", 10i64);
        assert_eq!(shape_window(3, &attributes), (1, 3));
    }
}
