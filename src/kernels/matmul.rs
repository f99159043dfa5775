use super::{one, optional_tensor, tensor, KernelContext, KernelError};
use crate::graph::Attributes;
use crate::inference::broadcast::{broadcast_shapes, broadcast_types, merge_dtypes};
use crate::inference::{InferenceContext, InferredValue, ShapeInferenceError};
use crate::numeric_tensor::NumericTensor;
use crate::registry::{OperatorRegistry, RegistryError, VersionRange};
use crate::types::{Dimension, TensorType};
use crate::value::Value;

fn matmul_kernel(ctx: &KernelContext, inputs: &[Option<Value>], _attributes: &Attributes) -> Result<Vec<Value>, KernelError> {
    one(NumericTensor::matmul(tensor(inputs, 0)?, tensor(inputs, 1)?, ctx.buffers())?)
}

fn check_inner(k_a: &Dimension, k_b: &Dimension) -> Result<(), ShapeInferenceError> {
    match (k_a, k_b) {
        (Dimension::Known(x), Dimension::Known(y)) if x != y => Err(ShapeInferenceError::Invalid(format!(
            "inner dimensions {x} and {y} do not match"
        ))),
        _ => Ok(()),
    }
}

fn infer_matmul(ctx: &InferenceContext) -> Result<Vec<InferredValue>, ShapeInferenceError> {
    let a = ctx.required_tensor_input(0)?;
    let b = ctx.required_tensor_input(1)?;
    let dtype = merge_dtypes(a.dtype, b.dtype)?;
    let (Some(sa), Some(sb)) = (&a.shape, &b.shape) else {
        return Ok(vec![InferredValue::tensor(TensorType { dtype, shape: None })]);
    };
    if sa.is_empty() || sb.is_empty() {
        return Err(ShapeInferenceError::Invalid("MatMul operands must have rank >= 1".to_string()));
    }
    let (batch_a, m, k_a): (&[Dimension], Option<&Dimension>, &Dimension) = match sa.len() {
        1 => (&[], None, &sa[0]),
        n => (&sa[..n - 2], Some(&sa[n - 2]), &sa[n - 1]),
    };
    let (batch_b, k_b, n): (&[Dimension], &Dimension, Option<&Dimension>) = match sb.len() {
        1 => (&[], &sb[0], None),
        r => (&sb[..r - 2], &sb[r - 2], Some(&sb[r - 1])),
    };
    check_inner(k_a, k_b)?;
    let mut shape = broadcast_shapes(batch_a, batch_b)
        .ok_or_else(|| ShapeInferenceError::NotBroadcastable(a.clone(), b.clone()))?;
    if let Some(m) = m {
        shape.push(m.clone());
    }
    if let Some(n) = n {
        shape.push(n.clone());
    }
    Ok(vec![InferredValue::tensor(TensorType {
        dtype,
        shape: Some(shape),
    })])
}

fn gemm_kernel(ctx: &KernelContext, inputs: &[Option<Value>], attributes: &Attributes) -> Result<Vec<Value>, KernelError> {
    one(NumericTensor::gemm(
        tensor(inputs, 0)?,
        tensor(inputs, 1)?,
        optional_tensor(inputs, 2)?,
        attributes.float_or("alpha", 1.0) as f64,
        attributes.float_or("beta", 1.0) as f64,
        attributes.bool("transA").unwrap_or(false),
        attributes.bool("transB").unwrap_or(false),
        ctx.buffers(),
    )?)
}

fn infer_gemm(ctx: &InferenceContext) -> Result<Vec<InferredValue>, ShapeInferenceError> {
    let a = ctx.required_tensor_input(0)?;
    let b = ctx.required_tensor_input(1)?;
    let dtype = merge_dtypes(a.dtype, b.dtype)?;
    let dims = |t: &TensorType, transposed: bool| -> Result<Option<(Dimension, Dimension)>, ShapeInferenceError> {
        match &t.shape {
            None => Ok(None),
            Some(s) if s.len() == 2 => Ok(Some(if transposed {
                (s[1].clone(), s[0].clone())
            } else {
                (s[0].clone(), s[1].clone())
            })),
            Some(s) => Err(ShapeInferenceError::RankMismatch {
                expected: 2,
                actual: s.len(),
            }),
        }
    };
    let attributes = ctx.attributes();
    let da = dims(&a, attributes.bool("transA").unwrap_or(false))?;
    let db = dims(&b, attributes.bool("transB").unwrap_or(false))?;
    if let (Some((_, k_a)), Some((k_b, _))) = (&da, &db) {
        check_inner(k_a, k_b)?;
    }
    let m = da.map(|(m, _)| m).unwrap_or(Dimension::Unknown);
    let n = db.map(|(_, n)| n).unwrap_or(Dimension::Unknown);
    let out = TensorType {
        dtype,
        shape: Some(vec![m, n]),
    };
    if ctx.has_input(2) {
        // C broadcasts into the output, never the other way round.
        let c = ctx.tensor_input(2)?;
        let merged = broadcast_types(&out, &c)?;
        if c.shape.is_some() && merged.rank() != out.rank() {
            return Err(ShapeInferenceError::NotBroadcastable(c, out));
        }
    }
    Ok(vec![InferredValue::tensor(out)])
}

pub(super) fn register(registry: &mut OperatorRegistry) -> Result<(), RegistryError> {
    registry.register("MatMul", "", VersionRange::from(1), infer_matmul, matmul_kernel)?;
    registry.register("Gemm", "", VersionRange::from(7), infer_gemm, gemm_kernel)?;
    Ok(())
}
