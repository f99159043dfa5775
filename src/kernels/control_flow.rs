//! `If`, `Loop` and `Scan`. Each body is a sub-graph run through the executor with explicit
//! positional inputs; names the body reads from enclosing scopes are resolved by the executor.

use super::{input, optional_tensor, tensor, KernelContext, KernelError};
use crate::dtype::DType;
use crate::graph::{Attributes, Graph};
use crate::inference::{InferenceContext, InferredValue, ShapeInferenceError};
use crate::numeric_tensor::NumericTensor;
use crate::registry::{OperatorRegistry, RegistryError, VersionRange};
use crate::types::{Dimension, TensorType, ValueType};
use crate::value::Value;
use log::trace;

/// Element dtype a body declares for output `index`, used to shape empty scan outputs.
fn declared_output_dtype(body: &Graph, index: usize) -> DType {
    body.outputs()
        .get(index)
        .and_then(|id| body.tensor(*id).declared_type.as_ref())
        .and_then(ValueType::as_tensor)
        .and_then(|t| t.dtype)
        .unwrap_or(DType::F32)
}

/// Joins per-iteration tensors along a new `axis`. With no iterations the result is an empty
/// tensor of the body's declared dtype.
fn stack_scan_output(
    ctx: &KernelContext,
    body: &Graph,
    output_index: usize,
    items: &[NumericTensor],
    axis: i64,
) -> Result<NumericTensor, KernelError> {
    match items.first() {
        None => ctx.allocate(&[0], declared_output_dtype(body, output_index)),
        Some(first) => {
            let axis = crate::numeric_tensor::normalize_axis(axis, first.rank() + 1)?;
            let refs: Vec<&NumericTensor> = items.iter().collect();
            Ok(NumericTensor::stack(&refs, axis)?)
        }
    }
}

fn if_kernel(ctx: &KernelContext, inputs: &[Option<Value>], attributes: &Attributes) -> Result<Vec<Value>, KernelError> {
    let branch = if tensor(inputs, 0)?.scalar_bool()? {
        attributes.require_graph("then_branch")?
    } else {
        attributes.require_graph("else_branch")?
    };
    ctx.run_subgraph(branch, Vec::new())
}

fn infer_if(ctx: &InferenceContext) -> Result<Vec<InferredValue>, ShapeInferenceError> {
    let then_branch = ctx.attributes().require_graph("then_branch")?;
    let else_branch = ctx.attributes().require_graph("else_branch")?;
    let condition = ctx.constant(0).and_then(|c| c.scalar_bool().ok());
    let outputs = match condition {
        Some(true) => ctx.infer_subgraph(then_branch, &[])?,
        Some(false) => ctx.infer_subgraph(else_branch, &[])?,
        None => {
            let a = ctx.infer_subgraph(then_branch, &[])?;
            let b = ctx.infer_subgraph(else_branch, &[])?;
            if a.len() != b.len() {
                return Err(ShapeInferenceError::Invalid(format!(
                    "If branches produce {} and {} outputs",
                    a.len(),
                    b.len()
                )));
            }
            a.into_iter()
                .zip(b)
                .map(|(x, y)| match (x, y) {
                    (Some(x), Some(y)) => Some(x.join(&y)),
                    _ => None,
                })
                .collect()
        }
    };
    Ok(outputs.into_iter().map(|t| InferredValue { value_type: t, constant: None }).collect())
}

/// Runs the body while the condition holds and the trip count is not reached. Either may be
/// absent; with neither the loop only ends through the body's condition output.
fn loop_kernel(ctx: &KernelContext, inputs: &[Option<Value>], attributes: &Attributes) -> Result<Vec<Value>, KernelError> {
    let body = attributes.require_graph("body")?;
    let trip_count = optional_tensor(inputs, 0)?.map(NumericTensor::scalar_i64).transpose()?;
    let mut condition = optional_tensor(inputs, 1)?.map(NumericTensor::scalar_bool).transpose()?.unwrap_or(true);
    let mut carried = (2..inputs.len())
        .map(|i| input(inputs, i).cloned())
        .collect::<Result<Vec<Value>, _>>()?;
    let carried_count = carried.len();
    let scan_count = body
        .outputs()
        .len()
        .checked_sub(1 + carried_count)
        .ok_or(KernelError::OutputCount {
            expected: 1 + carried_count,
            actual: body.outputs().len(),
        })?;
    let mut scans: Vec<Vec<NumericTensor>> = vec![Vec::new(); scan_count];
    let limit = ctx.config().max_loop_iterations;

    let mut iteration: i64 = 0;
    while condition && trip_count.is_none_or(|m| iteration < m) {
        if let Some(limit) = limit {
            if iteration as u64 >= limit {
                return Err(KernelError::LoopNonTermination { limit });
            }
        }
        ctx.check_cancelled()?;
        let mut body_inputs = Vec::with_capacity(2 + carried_count);
        body_inputs.push(Value::Tensor(NumericTensor::from_scalar(iteration)));
        body_inputs.push(Value::Tensor(NumericTensor::from_scalar(condition)));
        body_inputs.append(&mut carried);

        let mut outputs = ctx.run_subgraph(body, body_inputs)?.into_iter();
        let next = outputs.next().ok_or(KernelError::OutputCount {
            expected: 1 + carried_count + scan_count,
            actual: 0,
        })?;
        condition = next.as_tensor()?.scalar_bool()?;
        carried = outputs.by_ref().take(carried_count).collect();
        for (scan, value) in scans.iter_mut().zip(outputs) {
            scan.push(value.into_tensor()?);
        }
        iteration += 1;
    }
    trace!("Loop \"{}\" finished after {iteration} iterations", ctx.node().name);

    let mut results = carried;
    for (k, items) in scans.iter().enumerate() {
        results.push(Value::Tensor(stack_scan_output(ctx, body, 1 + carried_count + k, items, 0)?));
    }
    Ok(results)
}

fn prepend_dim(value_type: Option<ValueType>, dim: Dimension, axis: usize) -> Option<ValueType> {
    let t = value_type?.as_tensor()?.clone();
    let shape = t.shape.and_then(|mut s| {
        (axis <= s.len()).then(|| {
            s.insert(axis, dim);
            s
        })
    });
    Some(ValueType::Tensor(TensorType { dtype: t.dtype, shape }))
}

fn infer_loop(ctx: &InferenceContext) -> Result<Vec<InferredValue>, ShapeInferenceError> {
    let body = ctx.attributes().require_graph("body")?;
    let mut body_inputs = vec![
        Some(ValueType::tensor(DType::I64, &[])),
        Some(ValueType::tensor(DType::BOOL, &[])),
    ];
    let carried_count = ctx.input_count().saturating_sub(2);
    for index in 2..ctx.input_count() {
        body_inputs.push(ctx.input_type(index).cloned());
    }
    let outputs = ctx.infer_subgraph(body, &body_inputs)?;
    let mut results = Vec::with_capacity(outputs.len().saturating_sub(1));
    for (k, output) in outputs.into_iter().skip(1).enumerate() {
        let value_type = if k < carried_count {
            // Shapes of carried values may change between iterations.
            match (output, &body_inputs[2 + k]) {
                (Some(out), Some(initial)) => Some(out.join(initial)),
                _ => None,
            }
        } else {
            prepend_dim(output, Dimension::Unknown, 0)
        };
        results.push(InferredValue { value_type, constant: None });
    }
    Ok(results)
}

fn ints_or(attributes: &Attributes, name: &str, count: usize, default: i64) -> Result<Vec<i64>, KernelError> {
    match attributes.ints(name) {
        Some(values) if values.len() == count => Ok(values.to_vec()),
        Some(values) => Err(KernelError::InvalidInput(format!(
            "{name} has {} entries, expected {count}",
            values.len()
        ))),
        None => Ok(vec![default; count]),
    }
}

fn scan_kernel(ctx: &KernelContext, inputs: &[Option<Value>], attributes: &Attributes) -> Result<Vec<Value>, KernelError> {
    let body = attributes.require_graph("body")?;
    let scan_inputs = attributes.require_int("num_scan_inputs")? as usize;
    let state_count = inputs
        .len()
        .checked_sub(scan_inputs)
        .ok_or_else(|| KernelError::InvalidInput(format!("Scan expects at least {scan_inputs} inputs")))?;
    let scan_outputs = body.outputs().len().saturating_sub(state_count);
    let input_axes = ints_or(attributes, "scan_input_axes", scan_inputs, 0)?;
    let input_directions = ints_or(attributes, "scan_input_directions", scan_inputs, 0)?;
    let output_axes = ints_or(attributes, "scan_output_axes", scan_outputs, 0)?;
    let output_directions = ints_or(attributes, "scan_output_directions", scan_outputs, 0)?;

    let mut state = (0..state_count)
        .map(|i| input(inputs, i).cloned())
        .collect::<Result<Vec<Value>, _>>()?;
    let mut sequences = Vec::with_capacity(scan_inputs);
    let mut length = None;
    for (k, &axis) in input_axes.iter().enumerate() {
        let t = tensor(inputs, state_count + k)?;
        let axis = crate::numeric_tensor::normalize_axis(axis, t.rank())?;
        let len = t.shape()[axis];
        if length.is_some_and(|l| l != len) {
            return Err(KernelError::InvalidInput(format!(
                "Scan inputs disagree on sequence length: {} and {len}",
                length.unwrap_or_default()
            )));
        }
        length = Some(len);
        sequences.push((t, axis, input_directions[k] != 0));
    }
    let length = length.unwrap_or(0);

    let mut collected: Vec<Vec<NumericTensor>> = vec![Vec::new(); scan_outputs];
    for step in 0..length {
        ctx.check_cancelled()?;
        let mut body_inputs = Vec::with_capacity(state_count + scan_inputs);
        body_inputs.append(&mut state);
        for (t, axis, reverse) in &sequences {
            let index = if *reverse { length - 1 - step } else { step };
            body_inputs.push(Value::Tensor(t.index_axis(*axis, index)?));
        }
        let mut outputs = ctx.run_subgraph(body, body_inputs)?.into_iter();
        state = outputs.by_ref().take(state_count).collect();
        for (items, value) in collected.iter_mut().zip(outputs) {
            items.push(value.into_tensor()?);
        }
    }

    let mut results = state;
    for (k, mut items) in collected.into_iter().enumerate() {
        if output_directions[k] != 0 {
            items.reverse();
        }
        results.push(Value::Tensor(stack_scan_output(ctx, body, state_count + k, &items, output_axes[k])?));
    }
    Ok(results)
}

fn infer_scan(ctx: &InferenceContext) -> Result<Vec<InferredValue>, ShapeInferenceError> {
    let attributes = ctx.attributes();
    let body = attributes.require_graph("body")?;
    let scan_inputs = attributes.require_int("num_scan_inputs")? as usize;
    let state_count = ctx.input_count().saturating_sub(scan_inputs);
    let input_axes = attributes.ints("scan_input_axes").map(<[i64]>::to_vec).unwrap_or_else(|| vec![0; scan_inputs]);
    let output_axes = attributes.ints("scan_output_axes").map(<[i64]>::to_vec).unwrap_or_default();

    let mut body_inputs: Vec<Option<ValueType>> = (0..state_count).map(|i| ctx.input_type(i).cloned()).collect();
    let mut length = Dimension::Unknown;
    for k in 0..scan_inputs {
        let t = ctx.tensor_input(state_count + k)?;
        let element = match &t.shape {
            Some(shape) if !shape.is_empty() => {
                let axis = crate::inference::normalize_axis(input_axes.get(k).copied().unwrap_or(0), shape.len())?;
                let mut dims = shape.clone();
                let dim = dims.remove(axis);
                if length == Dimension::Unknown {
                    length = dim;
                }
                TensorType { dtype: t.dtype, shape: Some(dims) }
            }
            _ => TensorType::new(t.dtype, None),
        };
        body_inputs.push(Some(ValueType::Tensor(element)));
    }
    let outputs = ctx.infer_subgraph(body, &body_inputs)?;
    Ok(outputs
        .into_iter()
        .enumerate()
        .map(|(k, output)| {
            let value_type = if k < state_count {
                output
            } else {
                let rank = output.as_ref().and_then(ValueType::as_tensor).and_then(TensorType::rank);
                let axis = output_axes.get(k - state_count).copied().unwrap_or(0);
                match rank.map(|r| crate::inference::normalize_axis(axis, r + 1)) {
                    Some(Ok(axis)) => prepend_dim(output, length.clone(), axis),
                    _ => None,
                }
            };
            InferredValue { value_type, constant: None }
        })
        .collect())
}

pub(super) fn register(registry: &mut OperatorRegistry) -> Result<(), RegistryError> {
    registry.register("If", "", VersionRange::from(1), infer_if, if_kernel)?;
    registry.register("Loop", "", VersionRange::from(1), infer_loop, loop_kernel)?;
    registry.register("Scan", "", VersionRange::from(9), infer_scan, scan_kernel)?;
    Ok(())
}
