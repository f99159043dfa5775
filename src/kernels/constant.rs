use super::{one, tensor, KernelContext, KernelError};
use crate::dtype::DType;
use crate::graph::{AttributeError, Attributes};
use crate::inference::{known_dims, InferenceContext, InferredValue, ShapeInferenceError, MAX_FOLD_ELEMENTS};
use crate::numeric_tensor::{element_count, FreshStorage, NumericTensor, NumericTensorError};
use crate::registry::{OperatorRegistry, RegistryError, VersionRange};
use crate::types::{Dimension, TensorType};
use crate::value::Value;

/// The value of a `Constant` node, from whichever `value*` attribute is set.
fn constant_value(attributes: &Attributes) -> Result<NumericTensor, AttributeError> {
    if let Some(t) = attributes.tensor("value") {
        return Ok(t.clone());
    }
    if let Some(v) = attributes.float("value_float") {
        return Ok(NumericTensor::from_scalar(v));
    }
    if let Some(v) = attributes.floats("value_floats") {
        return Ok(NumericTensor::from_vec(v.to_vec()));
    }
    if let Some(v) = attributes.int("value_int") {
        return Ok(NumericTensor::from_scalar(v));
    }
    if let Some(v) = attributes.ints("value_ints") {
        return Ok(NumericTensor::from_vec(v.to_vec()));
    }
    if let Some(v) = attributes.string("value_string") {
        return Ok(NumericTensor::from_scalar(v.to_string()));
    }
    if let Some(v) = attributes.strings("value_strings") {
        return Ok(NumericTensor::from_vec(v.to_vec()));
    }
    Err(AttributeError::Missing("value".to_string()))
}

fn constant_kernel(_ctx: &KernelContext, _inputs: &[Option<Value>], attributes: &Attributes) -> Result<Vec<Value>, KernelError> {
    one(constant_value(attributes)?)
}

fn infer_constant(ctx: &InferenceContext) -> Result<Vec<InferredValue>, ShapeInferenceError> {
    Ok(vec![InferredValue::constant(constant_value(ctx.attributes())?)])
}

fn fill_value(attributes: &Attributes) -> Result<Option<NumericTensor>, NumericTensorError> {
    match attributes.tensor("value") {
        Some(value) if value.num_elements() != 1 => Err(NumericTensorError::NotAScalar(value.shape().to_vec())),
        Some(value) => Ok(Some(value.reshape(&[])?)),
        None => Ok(None),
    }
}

fn target_shape(shape: &NumericTensor) -> Result<Vec<usize>, KernelError> {
    shape
        .to_i64_vec()?
        .into_iter()
        .map(|d| usize::try_from(d).map_err(|_| KernelError::InvalidInput(format!("negative dimension {d}"))))
        .collect()
}

fn constant_of_shape_kernel(
    ctx: &KernelContext,
    inputs: &[Option<Value>],
    attributes: &Attributes,
) -> Result<Vec<Value>, KernelError> {
    let shape = target_shape(tensor(inputs, 0)?)?;
    match fill_value(attributes)? {
        Some(value) => one(value.broadcast_to(&shape, ctx.buffers())?),
        // The default fill is zero, which is exactly what fresh storage holds.
        None => one(ctx.allocate(&shape, DType::F32)?),
    }
}

fn infer_constant_of_shape(ctx: &InferenceContext) -> Result<Vec<InferredValue>, ShapeInferenceError> {
    let value = fill_value(ctx.attributes())?;
    let dtype = value.as_ref().map_or(DType::F32, NumericTensor::dtype);
    let Some(dims) = ctx.constant_ints(0) else {
        let rank = ctx.required_tensor_input(0)?.concrete_shape().and_then(|s| s.first().copied());
        return Ok(vec![InferredValue::tensor(TensorType {
            dtype: Some(dtype),
            shape: rank.map(|n| vec![Dimension::Unknown; n]),
        })]);
    };
    if let Some(&bad) = dims.iter().find(|d| **d < 0) {
        return Err(ShapeInferenceError::Invalid(format!("negative dimension {bad}")));
    }
    let shape: Vec<usize> = dims.iter().map(|d| *d as usize).collect();
    if element_count(&shape, dtype).is_ok_and(|count| count <= MAX_FOLD_ELEMENTS) {
        let fill = match value {
            Some(value) => value,
            None => NumericTensor::from_scalar(0f32),
        };
        return Ok(vec![InferredValue::constant(fill.broadcast_to(&shape, &FreshStorage)?)]);
    }
    Ok(vec![InferredValue::tensor(TensorType {
        dtype: Some(dtype),
        shape: Some(known_dims(&shape)),
    })])
}

pub(super) fn register(registry: &mut OperatorRegistry) -> Result<(), RegistryError> {
    registry.register("Constant", "", VersionRange::from(1), infer_constant, constant_kernel)?;
    registry.register("ConstantOfShape", "", VersionRange::from(9), infer_constant_of_shape, constant_of_shape_kernel)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_reads_the_set_attribute() {
        let mut attributes = Attributes::new();
        attributes.insert("value_ints", vec![1i64, 2, 3]);
        let value = constant_value(&attributes).unwrap();
        assert_eq!(value.to_i64_vec().unwrap(), vec![1, 2, 3]);
        assert!(matches!(constant_value(&Attributes::new()), Err(AttributeError::Missing(_))));
    }

    #[test]
    fn fill_value_must_hold_one_element() {
        let mut attributes = Attributes::new();
        attributes.insert("value", NumericTensor::from_vec(vec![1i64, 2]));
        assert!(fill_value(&attributes).is_err());
    }
}
