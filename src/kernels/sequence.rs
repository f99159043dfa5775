//! Sequence and optional operators. These consume and produce the non-tensor [`Value`] variants.

use super::{input, one, present_tensors, tensor, KernelContext, KernelError};
use crate::dtype::DType;
use crate::graph::Attributes;
use crate::inference::{same_as_input, InferenceContext, InferredValue, ShapeInferenceError};
use crate::numeric_tensor::{NumericTensor, NumericTensorError};
use crate::registry::{OperatorRegistry, RegistryError, VersionRange};
use crate::types::{Dimension, TensorType, ValueType};
use crate::value::{Sequence, Value};

/// Resolves a possibly negative sequence position. Insertion may also target `len`.
fn position(raw: i64, len: usize, inserting: bool) -> Result<usize, KernelError> {
    let upper = if inserting { len as i64 } else { len as i64 - 1 };
    let adjusted = if raw < 0 { raw + len as i64 } else { raw };
    if adjusted < 0 || adjusted > upper {
        return Err(NumericTensorError::IndexOutOfRange(raw, len).into());
    }
    Ok(adjusted as usize)
}

fn dtype_attribute(attributes: &Attributes) -> Result<DType, KernelError> {
    match attributes.int("dtype") {
        Some(code) => DType::from_onnx_code(code as i32).map_err(|e| KernelError::InvalidInput(e.to_string())),
        None => Ok(DType::F32),
    }
}

fn sequence_empty_kernel(_ctx: &KernelContext, _inputs: &[Option<Value>], attributes: &Attributes) -> Result<Vec<Value>, KernelError> {
    Ok(vec![Value::Sequence(Sequence::empty(dtype_attribute(attributes)?))])
}

fn infer_sequence_empty(ctx: &InferenceContext) -> Result<Vec<InferredValue>, ShapeInferenceError> {
    let dtype = match ctx.attributes().int("dtype") {
        Some(code) => DType::from_onnx_code(code as i32).map_err(|e| ShapeInferenceError::InvalidAttribute(e.to_string()))?,
        None => DType::F32,
    };
    Ok(vec![InferredValue::of(ValueType::Sequence(Box::new(ValueType::Tensor(
        TensorType::with_dtype(dtype),
    ))))])
}

fn sequence_construct_kernel(
    _ctx: &KernelContext,
    inputs: &[Option<Value>],
    _attributes: &Attributes,
) -> Result<Vec<Value>, KernelError> {
    let items = present_tensors(inputs)?;
    let first = items.first().ok_or(KernelError::MissingInput(0))?;
    let sequence = Sequence::new(first.dtype(), items.iter().map(|t| (*t).clone()).collect())?;
    Ok(vec![Value::Sequence(sequence)])
}

fn infer_sequence_construct(ctx: &InferenceContext) -> Result<Vec<InferredValue>, ShapeInferenceError> {
    let mut element: Option<TensorType> = None;
    for index in (0..ctx.input_count()).filter(|i| ctx.has_input(*i)) {
        let t = ctx.tensor_input(index)?;
        if let (Some(prev), Some(next)) = (element.as_ref().and_then(|e| e.dtype), t.dtype) {
            if prev != next {
                return Err(ShapeInferenceError::DTypeMismatch(prev, next));
            }
        }
        element = Some(match element {
            Some(prev) => prev.join(&t),
            None => t,
        });
    }
    let element = element.ok_or(ShapeInferenceError::MissingInput(0))?;
    Ok(vec![InferredValue::of(ValueType::Sequence(Box::new(ValueType::Tensor(element))))])
}

fn sequence_insert_kernel(_ctx: &KernelContext, inputs: &[Option<Value>], _attributes: &Attributes) -> Result<Vec<Value>, KernelError> {
    let mut sequence = input(inputs, 0)?.as_sequence()?.clone();
    let item = tensor(inputs, 1)?.clone();
    let at = match inputs.get(2).and_then(Option::as_ref) {
        Some(raw) => position(raw.as_tensor()?.scalar_i64()?, sequence.len(), true)?,
        None => sequence.len(),
    };
    sequence.insert(at, item)?;
    Ok(vec![Value::Sequence(sequence)])
}

/// Element type of the sequence at input `index`, if inference knows it.
fn element_type(ctx: &InferenceContext, index: usize) -> Result<Option<ValueType>, ShapeInferenceError> {
    match ctx.input_type(index) {
        None => Ok(None),
        Some(ValueType::Sequence(element)) => Ok(Some((**element).clone())),
        Some(other) => Err(ShapeInferenceError::WrongValueKind {
            index,
            expected: "sequence",
            actual: other.clone(),
        }),
    }
}

fn infer_sequence_insert(ctx: &InferenceContext) -> Result<Vec<InferredValue>, ShapeInferenceError> {
    let inserted = ValueType::Tensor(ctx.required_tensor_input(1)?);
    let element = match element_type(ctx, 0)? {
        Some(element) => element.join(&inserted),
        None => inserted,
    };
    Ok(vec![InferredValue::of(ValueType::Sequence(Box::new(element)))])
}

fn sequence_erase_kernel(_ctx: &KernelContext, inputs: &[Option<Value>], _attributes: &Attributes) -> Result<Vec<Value>, KernelError> {
    let mut sequence = input(inputs, 0)?.as_sequence()?.clone();
    let raw = match inputs.get(1).and_then(Option::as_ref) {
        Some(raw) => raw.as_tensor()?.scalar_i64()?,
        None => -1,
    };
    let at = position(raw, sequence.len(), false)?;
    sequence.remove(at);
    Ok(vec![Value::Sequence(sequence)])
}

fn infer_sequence_erase(ctx: &InferenceContext) -> Result<Vec<InferredValue>, ShapeInferenceError> {
    element_type(ctx, 0)?;
    Ok(same_as_input(ctx, 0))
}

fn sequence_at_kernel(_ctx: &KernelContext, inputs: &[Option<Value>], _attributes: &Attributes) -> Result<Vec<Value>, KernelError> {
    let sequence = input(inputs, 0)?.as_sequence()?;
    let at = position(tensor(inputs, 1)?.scalar_i64()?, sequence.len(), false)?;
    one(sequence.items()[at].clone())
}

fn infer_sequence_at(ctx: &InferenceContext) -> Result<Vec<InferredValue>, ShapeInferenceError> {
    Ok(vec![match element_type(ctx, 0)? {
        Some(element) => InferredValue::of(element),
        None => InferredValue::tensor(TensorType::unknown()),
    }])
}

fn sequence_length_kernel(_ctx: &KernelContext, inputs: &[Option<Value>], _attributes: &Attributes) -> Result<Vec<Value>, KernelError> {
    one(NumericTensor::from_scalar(input(inputs, 0)?.as_sequence()?.len() as i64))
}

fn infer_sequence_length(ctx: &InferenceContext) -> Result<Vec<InferredValue>, ShapeInferenceError> {
    element_type(ctx, 0)?;
    Ok(vec![InferredValue::tensor(TensorType::known(DType::I64, &[]))])
}

fn concat_from_sequence_kernel(
    _ctx: &KernelContext,
    inputs: &[Option<Value>],
    attributes: &Attributes,
) -> Result<Vec<Value>, KernelError> {
    let sequence = input(inputs, 0)?.as_sequence()?;
    let items: Vec<&NumericTensor> = sequence.items().iter().collect();
    let first = items.first().ok_or(NumericTensorError::EmptyInput)?;
    let axis = attributes.require_int("axis")?;
    if attributes.int_or("new_axis", 0) != 0 {
        // The new axis may also be appended after the last one.
        let axis = crate::numeric_tensor::normalize_axis(axis, first.rank() + 1)?;
        one(NumericTensor::stack(&items, axis)?)
    } else {
        let axis = crate::numeric_tensor::normalize_axis(axis, first.rank())?;
        one(NumericTensor::concat(&items, axis)?)
    }
}

fn infer_concat_from_sequence(ctx: &InferenceContext) -> Result<Vec<InferredValue>, ShapeInferenceError> {
    let element = element_type(ctx, 0)?;
    let element = element.as_ref().and_then(ValueType::as_tensor);
    let dtype = element.and_then(|t| t.dtype);
    let new_axis = ctx.attributes().int_or("new_axis", 0) != 0;
    let rank = element.and_then(TensorType::rank).map(|r| if new_axis { r + 1 } else { r });
    Ok(vec![InferredValue::tensor(TensorType {
        dtype,
        shape: rank.map(|r| vec![Dimension::Unknown; r]),
    })])
}

fn optional_kernel(_ctx: &KernelContext, inputs: &[Option<Value>], _attributes: &Attributes) -> Result<Vec<Value>, KernelError> {
    let wrapped = inputs.first().cloned().flatten().map(Box::new);
    Ok(vec![Value::Optional(wrapped)])
}

fn infer_optional(ctx: &InferenceContext) -> Result<Vec<InferredValue>, ShapeInferenceError> {
    let inner = if ctx.has_input(0) {
        ctx.input_type(0).cloned().unwrap_or_default()
    } else {
        ValueType::default()
    };
    Ok(vec![InferredValue::of(ValueType::Optional(Box::new(inner)))])
}

fn optional_has_element_kernel(
    _ctx: &KernelContext,
    inputs: &[Option<Value>],
    _attributes: &Attributes,
) -> Result<Vec<Value>, KernelError> {
    let present = match inputs.first().and_then(Option::as_ref) {
        Some(Value::Optional(inner)) => inner.is_some(),
        Some(_) => true,
        None => false,
    };
    one(NumericTensor::from_scalar(present))
}

fn infer_optional_has_element(_ctx: &InferenceContext) -> Result<Vec<InferredValue>, ShapeInferenceError> {
    Ok(vec![InferredValue::tensor(TensorType::known(DType::BOOL, &[]))])
}

fn optional_get_element_kernel(
    _ctx: &KernelContext,
    inputs: &[Option<Value>],
    _attributes: &Attributes,
) -> Result<Vec<Value>, KernelError> {
    match input(inputs, 0)? {
        Value::Optional(Some(inner)) => Ok(vec![(**inner).clone()]),
        Value::Optional(None) => Err(KernelError::InvalidInput("optional has no element".to_string())),
        other => Ok(vec![other.clone()]),
    }
}

fn infer_optional_get_element(ctx: &InferenceContext) -> Result<Vec<InferredValue>, ShapeInferenceError> {
    Ok(vec![match ctx.input_type(0) {
        Some(ValueType::Optional(inner)) => InferredValue::of((**inner).clone()),
        Some(other) => InferredValue::of(other.clone()),
        None => InferredValue::unknown(),
    }])
}

pub(super) fn register(registry: &mut OperatorRegistry) -> Result<(), RegistryError> {
    let since = VersionRange::from(11);
    registry.register("SequenceEmpty", "", since, infer_sequence_empty, sequence_empty_kernel)?;
    registry.register("SequenceConstruct", "", since, infer_sequence_construct, sequence_construct_kernel)?;
    registry.register("SequenceInsert", "", since, infer_sequence_insert, sequence_insert_kernel)?;
    registry.register("SequenceErase", "", since, infer_sequence_erase, sequence_erase_kernel)?;
    registry.register("SequenceAt", "", since, infer_sequence_at, sequence_at_kernel)?;
    registry.register("SequenceLength", "", since, infer_sequence_length, sequence_length_kernel)?;
    registry.register(
        "ConcatFromSequence",
        "",
        since,
        infer_concat_from_sequence,
        concat_from_sequence_kernel,
    )?;

    let since = VersionRange::from(15);
    registry.register("Optional", "", since, infer_optional, optional_kernel)?;
    registry.register("OptionalHasElement", "", since, infer_optional_has_element, optional_has_element_kernel)?;
    registry.register("OptionalGetElement", "", since, infer_optional_get_element, optional_get_element_kernel)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positions_wrap_and_bound() {
        assert_eq!(position(-1, 3, false).unwrap(), 2);
        assert_eq!(position(3, 3, true).unwrap(), 3);
        assert!(position(3, 3, false).is_err());
        assert!(position(-4, 3, false).is_err());
        assert!(position(0, 0, false).is_err());
    }
}
