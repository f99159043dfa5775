use super::{one, present_tensors, tensor, Kernel, KernelContext, KernelError};
use crate::dtype::DType;
use crate::graph::Attributes;
use crate::inference::broadcast::{broadcast_all, broadcast_types};
use crate::inference::{InferenceContext, InferenceRule, InferredValue, ShapeInferenceError};
use crate::numeric_tensor::{BinaryOp, CompareOp, FreshStorage, LogicalOp, NumericTensor, UnaryOp};
use crate::registry::{OperatorRegistry, RegistryError, VersionRange};
use crate::types::TensorType;
use crate::value::Value;

fn binary_op(which: BinaryOp, attributes: &Attributes) -> BinaryOp {
    match which {
        BinaryOp::Mod { .. } => BinaryOp::Mod {
            fmod: attributes.bool("fmod").unwrap_or(false),
        },
        other => other,
    }
}

/// `Pow` takes the exponent in any numeric type; everything else needs matching dtypes.
fn align_exponent(which: BinaryOp, base: &NumericTensor, exponent: &NumericTensor) -> Result<NumericTensor, KernelError> {
    if which == BinaryOp::Pow && base.dtype() != exponent.dtype() {
        Ok(exponent.cast(base.dtype())?)
    } else {
        Ok(exponent.clone())
    }
}

fn binary_kernel(which: BinaryOp) -> impl Kernel {
    move |ctx: &KernelContext, inputs: &[Option<Value>], attributes: &Attributes| -> Result<Vec<Value>, KernelError> {
        let a = tensor(inputs, 0)?;
        let b = align_exponent(which, a, tensor(inputs, 1)?)?;
        one(NumericTensor::binary(binary_op(which, attributes), a, &b, ctx.buffers())?)
    }
}

fn binary_rule(which: BinaryOp) -> impl InferenceRule {
    move |ctx: &InferenceContext| -> Result<Vec<InferredValue>, ShapeInferenceError> {
        let a = ctx.required_tensor_input(0)?;
        let mut b = ctx.required_tensor_input(1)?;
        if which == BinaryOp::Pow {
            b.dtype = a.dtype;
        }
        let out = broadcast_types(&a, &b)?;
        if let Some([x, y]) = ctx.constants([0, 1]).as_deref() {
            if x.dtype() == y.dtype() {
                let folded = NumericTensor::binary(binary_op(which, ctx.attributes()), x, y, &FreshStorage)?;
                return Ok(vec![InferredValue::constant(folded)]);
            }
        }
        Ok(vec![InferredValue::tensor(out)])
    }
}

/// `Max`, `Min`, `Sum` and `Mean` over one or more broadcast operands.
fn variadic_kernel(which: BinaryOp, mean: bool) -> impl Kernel {
    move |ctx: &KernelContext, inputs: &[Option<Value>], _attributes: &Attributes| -> Result<Vec<Value>, KernelError> {
        let operands = present_tensors(inputs)?;
        let (first, rest) = operands.split_first().ok_or(KernelError::MissingInput(0))?;
        let mut acc = (*first).clone();
        for operand in rest {
            acc = NumericTensor::binary(which, &acc, operand, ctx.buffers())?;
        }
        if mean {
            let count = NumericTensor::from_scalar(operands.len() as f64).cast(acc.dtype())?;
            acc = NumericTensor::div(&acc, &count, ctx.buffers())?;
        }
        one(acc)
    }
}

fn infer_variadic(ctx: &InferenceContext) -> Result<Vec<InferredValue>, ShapeInferenceError> {
    let types = (0..ctx.input_count())
        .filter(|i| ctx.has_input(*i))
        .map(|i| ctx.tensor_input(i))
        .collect::<Result<Vec<_>, _>>()?;
    if types.is_empty() {
        return Err(ShapeInferenceError::MissingInput(0));
    }
    Ok(vec![InferredValue::tensor(broadcast_all(&types)?)])
}

fn compare_kernel(which: CompareOp) -> impl Kernel {
    move |ctx: &KernelContext, inputs: &[Option<Value>], _attributes: &Attributes| -> Result<Vec<Value>, KernelError> {
        one(NumericTensor::compare(which, tensor(inputs, 0)?, tensor(inputs, 1)?, ctx.buffers())?)
    }
}

fn logical_kernel(which: LogicalOp) -> impl Kernel {
    move |ctx: &KernelContext, inputs: &[Option<Value>], _attributes: &Attributes| -> Result<Vec<Value>, KernelError> {
        one(NumericTensor::logical(which, tensor(inputs, 0)?, tensor(inputs, 1)?, ctx.buffers())?)
    }
}

/// Broadcast of two operands with a boolean result.
fn infer_predicate(ctx: &InferenceContext) -> Result<Vec<InferredValue>, ShapeInferenceError> {
    let out = broadcast_types(&ctx.required_tensor_input(0)?, &ctx.required_tensor_input(1)?)?;
    Ok(vec![InferredValue::tensor(TensorType {
        dtype: Some(DType::BOOL),
        shape: out.shape,
    })])
}

fn unary_kernel(which: UnaryOp) -> impl Kernel {
    move |ctx: &KernelContext, inputs: &[Option<Value>], _attributes: &Attributes| -> Result<Vec<Value>, KernelError> {
        one(tensor(inputs, 0)?.unary(which, ctx.buffers())?)
    }
}

fn unary_rule(which: UnaryOp) -> impl InferenceRule {
    move |ctx: &InferenceContext| -> Result<Vec<InferredValue>, ShapeInferenceError> {
        let input = ctx.required_tensor_input(0)?;
        if let Some(dtype) = input.dtype {
            if !dtype.is_float() && !which.supports_integers() {
                return Err(ShapeInferenceError::Invalid(format!("{which} is not defined for {dtype}")));
            }
        }
        if let Some(x) = ctx.constant(0) {
            return Ok(vec![InferredValue::constant(x.unary(which, &FreshStorage)?)]);
        }
        Ok(vec![InferredValue::tensor(input)])
    }
}

fn not_kernel(ctx: &KernelContext, inputs: &[Option<Value>], _attributes: &Attributes) -> Result<Vec<Value>, KernelError> {
    one(tensor(inputs, 0)?.not(ctx.buffers())?)
}

fn infer_not(ctx: &InferenceContext) -> Result<Vec<InferredValue>, ShapeInferenceError> {
    let input = ctx.required_tensor_input(0)?;
    Ok(vec![InferredValue::tensor(TensorType {
        dtype: Some(DType::BOOL),
        shape: input.shape,
    })])
}

fn where_kernel(ctx: &KernelContext, inputs: &[Option<Value>], _attributes: &Attributes) -> Result<Vec<Value>, KernelError> {
    one(NumericTensor::where_select(
        tensor(inputs, 0)?,
        tensor(inputs, 1)?,
        tensor(inputs, 2)?,
        ctx.buffers(),
    )?)
}

fn infer_where(ctx: &InferenceContext) -> Result<Vec<InferredValue>, ShapeInferenceError> {
    let condition = ctx.required_tensor_input(0)?;
    let x = ctx.required_tensor_input(1)?;
    let y = ctx.required_tensor_input(2)?;
    let values = broadcast_types(&x, &y)?;
    let shape = broadcast_types(
        &TensorType {
            dtype: values.dtype,
            shape: condition.shape,
        },
        &values,
    )?;
    Ok(vec![InferredValue::tensor(shape)])
}

pub(super) fn register(registry: &mut OperatorRegistry) -> Result<(), RegistryError> {
    let binaries = [
        ("Add", BinaryOp::Add, 7),
        ("Sub", BinaryOp::Sub, 7),
        ("Mul", BinaryOp::Mul, 7),
        ("Div", BinaryOp::Div, 7),
        ("Pow", BinaryOp::Pow, 7),
        ("Mod", BinaryOp::Mod { fmod: false }, 10),
    ];
    for (name, which, since) in binaries {
        registry.register(name, "", VersionRange::from(since), binary_rule(which), binary_kernel(which))?;
    }

    let variadics = [
        ("Max", BinaryOp::Max, false),
        ("Min", BinaryOp::Min, false),
        ("Sum", BinaryOp::Add, false),
        ("Mean", BinaryOp::Add, true),
    ];
    for (name, which, mean) in variadics {
        registry.register(name, "", VersionRange::from(6), infer_variadic, variadic_kernel(which, mean))?;
    }

    let comparisons = [
        ("Equal", CompareOp::Equal, 7),
        ("Less", CompareOp::Less, 7),
        ("Greater", CompareOp::Greater, 7),
        ("LessOrEqual", CompareOp::LessOrEqual, 12),
        ("GreaterOrEqual", CompareOp::GreaterOrEqual, 12),
    ];
    for (name, which, since) in comparisons {
        registry.register(name, "", VersionRange::from(since), infer_predicate, compare_kernel(which))?;
    }

    for (name, which) in [("And", LogicalOp::And), ("Or", LogicalOp::Or), ("Xor", LogicalOp::Xor)] {
        registry.register(name, "", VersionRange::from(7), infer_predicate, logical_kernel(which))?;
    }
    registry.register("Not", "", VersionRange::from(1), infer_not, not_kernel)?;

    let unaries = [
        ("Neg", UnaryOp::Neg, 6),
        ("Abs", UnaryOp::Abs, 6),
        ("Relu", UnaryOp::Relu, 6),
        ("Sigmoid", UnaryOp::Sigmoid, 6),
        ("Tanh", UnaryOp::Tanh, 6),
        ("Exp", UnaryOp::Exp, 6),
        ("Log", UnaryOp::Log, 6),
        ("Sqrt", UnaryOp::Sqrt, 6),
        ("Reciprocal", UnaryOp::Reciprocal, 6),
        ("Floor", UnaryOp::Floor, 6),
        ("Ceil", UnaryOp::Ceil, 6),
        ("Sin", UnaryOp::Sin, 7),
        ("Cos", UnaryOp::Cos, 7),
        ("Softplus", UnaryOp::Softplus, 1),
        ("Sign", UnaryOp::Sign, 9),
    ];
    for (name, which, since) in unaries {
        registry.register(name, "", VersionRange::from(since), unary_rule(which), unary_kernel(which))?;
    }

    registry.register("Where", "", VersionRange::from(9), infer_where, where_kernel)?;
    Ok(())
}
