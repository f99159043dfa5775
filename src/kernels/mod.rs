//! The built-in operator set: one kernel and one inference rule per registered operator version.

mod constant;
mod control_flow;
mod elementwise;
mod indexing;
mod matmul;
mod reduce;
mod sequence;
mod shape_ops;

pub use crate::executor::KernelContext;

use crate::buffer::AllocationError;
use crate::executor::ExecutionError;
use crate::graph::{AttributeError, Attributes};
use crate::inference::InferenceContext;
use crate::numeric_tensor::{NumericTensor, NumericTensorError};
use crate::registry::{OperatorRegistry, RegistryError};
use crate::value::{Value, ValueError};

#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    #[error(transparent)]
    NumericTensorError(#[from] NumericTensorError),
    #[error(transparent)]
    ValueError(#[from] ValueError),
    #[error(transparent)]
    AttributeError(#[from] AttributeError),
    #[error(transparent)]
    AllocationError(#[from] AllocationError),
    #[error("Missing required input {0}")]
    MissingInput(usize),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Kernel produced {actual} outputs, but the node expects {expected}")]
    OutputCount { expected: usize, actual: usize },
    #[error("Value \"{0}\" read by a sub-graph is not available")]
    MissingCapture(String),
    #[error("Loop exceeded the configured bound of {limit} iterations")]
    LoopNonTermination { limit: u64 },
    #[error("Cancelled")]
    Cancelled,
    #[error("Sub-graph execution failed")]
    Subgraph(#[source] Box<ExecutionError>),
}

/// Computes a node's outputs from its inputs and attributes.
///
/// Kernels are stateless; every output is a fresh value or a clone sharing storage with an
/// input. Absent optional inputs arrive as `None`.
pub trait Kernel: Send + Sync {
    fn compute(
        &self,
        ctx: &KernelContext,
        inputs: &[Option<Value>],
        attributes: &Attributes,
    ) -> Result<Vec<Value>, KernelError>;
}

impl<F> Kernel for F
where
    F: Fn(&KernelContext, &[Option<Value>], &Attributes) -> Result<Vec<Value>, KernelError> + Send + Sync,
{
    fn compute(
        &self,
        ctx: &KernelContext,
        inputs: &[Option<Value>],
        attributes: &Attributes,
    ) -> Result<Vec<Value>, KernelError> {
        self(ctx, inputs, attributes)
    }
}

pub(crate) fn input(inputs: &[Option<Value>], index: usize) -> Result<&Value, KernelError> {
    inputs.get(index).and_then(Option::as_ref).ok_or(KernelError::MissingInput(index))
}

pub(crate) fn tensor(inputs: &[Option<Value>], index: usize) -> Result<&NumericTensor, KernelError> {
    Ok(input(inputs, index)?.as_tensor()?)
}

pub(crate) fn optional_tensor(inputs: &[Option<Value>], index: usize) -> Result<Option<&NumericTensor>, KernelError> {
    match inputs.get(index).and_then(Option::as_ref) {
        Some(value) => Ok(Some(value.as_tensor()?)),
        None => Ok(None),
    }
}

/// Present tensor inputs, in order, skipping absent ones.
pub(crate) fn present_tensors(inputs: &[Option<Value>]) -> Result<Vec<&NumericTensor>, KernelError> {
    inputs.iter().flatten().map(|v| Ok(v.as_tensor()?)).collect()
}

pub(crate) fn one(tensor: NumericTensor) -> Result<Vec<Value>, KernelError> {
    Ok(vec![Value::Tensor(tensor)])
}

/// Normalizes axis values against `rank`, rejecting duplicates.
pub(crate) fn normalize_axes(axes: &[i64], rank: usize) -> Result<Vec<usize>, NumericTensorError> {
    let mut out = Vec::with_capacity(axes.len());
    for &axis in axes {
        let normalized = crate::numeric_tensor::normalize_axis(axis, rank)?;
        if out.contains(&normalized) {
            return Err(NumericTensorError::InvalidArgument(format!("duplicate axis {axis}")));
        }
        out.push(normalized);
    }
    Ok(out)
}

/// Where an operator version takes an integer list argument such as `axes` from. Older
/// opsets carry these as attributes, newer ones as an input tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IntsFrom {
    Attribute(&'static str),
    Input(usize),
}

/// What inference knows about an integer list argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StaticInts {
    Absent,
    Known(Vec<i64>),
    Unknown,
}

impl IntsFrom {
    pub(crate) fn read(self, inputs: &[Option<Value>], attributes: &Attributes) -> Result<Option<Vec<i64>>, KernelError> {
        match self {
            IntsFrom::Attribute(name) => Ok(attributes.ints(name).map(<[i64]>::to_vec)),
            IntsFrom::Input(index) => Ok(optional_tensor(inputs, index)?.map(NumericTensor::to_i64_vec).transpose()?),
        }
    }

    pub(crate) fn infer(self, ctx: &InferenceContext) -> StaticInts {
        match self {
            IntsFrom::Attribute(name) => match ctx.attributes().ints(name) {
                Some(values) => StaticInts::Known(values.to_vec()),
                None => StaticInts::Absent,
            },
            IntsFrom::Input(index) if !ctx.has_input(index) => StaticInts::Absent,
            IntsFrom::Input(index) => ctx.constant_ints(index).map_or(StaticInts::Unknown, StaticInts::Known),
        }
    }
}

pub fn register_builtins(registry: &mut OperatorRegistry) -> Result<(), RegistryError> {
    elementwise::register(registry)?;
    matmul::register(registry)?;
    shape_ops::register(registry)?;
    indexing::register(registry)?;
    reduce::register(registry)?;
    constant::register(registry)?;
    sequence::register(registry)?;
    control_flow::register(registry)?;
    Ok(())
}
