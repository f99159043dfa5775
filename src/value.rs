use crate::dtype::DType;
use crate::numeric_tensor::NumericTensor;
use crate::types::{Dimension, TensorType, ValueType};
use std::fmt::{Display, Formatter};

#[derive(Debug, thiserror::Error)]
pub enum ValueError {
    #[error("Expected a {expected}, got a {actual}")]
    WrongKind { expected: &'static str, actual: &'static str },
    #[error("Sequence of {expected} cannot hold a tensor of {actual}")]
    SequenceDType { expected: DType, actual: DType },
}

/// An ordered list of tensors sharing one element type. Shapes may differ.
#[derive(Debug, Clone, PartialEq)]
pub struct Sequence {
    dtype: DType,
    items: Vec<NumericTensor>,
}

impl Sequence {
    pub fn empty(dtype: DType) -> Self {
        Self { dtype, items: Vec::new() }
    }

    pub fn new(dtype: DType, items: Vec<NumericTensor>) -> Result<Self, ValueError> {
        for item in &items {
            if item.dtype() != dtype {
                return Err(ValueError::SequenceDType { expected: dtype, actual: item.dtype() });
            }
        }
        Ok(Self { dtype, items })
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn items(&self) -> &[NumericTensor] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn insert(&mut self, position: usize, tensor: NumericTensor) -> Result<(), ValueError> {
        if tensor.dtype() != self.dtype {
            return Err(ValueError::SequenceDType { expected: self.dtype, actual: tensor.dtype() });
        }
        self.items.insert(position, tensor);
        Ok(())
    }

    pub fn remove(&mut self, position: usize) -> NumericTensor {
        self.items.remove(position)
    }

    /// Element type with the dimensions shared by all items; differing ones become unknown.
    pub fn element_type(&self) -> TensorType {
        let mut shape: Option<Vec<Dimension>> = None;
        for item in &self.items {
            let dims: Vec<Dimension> = item.shape().iter().map(|d| Dimension::Known(*d)).collect();
            shape = Some(match shape {
                None => dims,
                Some(prev) if prev.len() == dims.len() => prev.iter().zip(&dims).map(|(a, b)| a.join(b)).collect(),
                Some(_) => return TensorType::with_dtype(self.dtype),
            });
        }
        TensorType { dtype: Some(self.dtype), shape }
    }
}

/// A runtime value flowing along a graph edge.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Tensor(NumericTensor),
    Sequence(Sequence),
    Optional(Option<Box<Value>>),
}

impl Value {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Tensor(_) => "tensor",
            Value::Sequence(_) => "sequence",
            Value::Optional(_) => "optional",
        }
    }

    pub fn as_tensor(&self) -> Result<&NumericTensor, ValueError> {
        match self {
            Value::Tensor(t) => Ok(t),
            other => Err(ValueError::WrongKind { expected: "tensor", actual: other.kind_name() }),
        }
    }

    pub fn into_tensor(self) -> Result<NumericTensor, ValueError> {
        match self {
            Value::Tensor(t) => Ok(t),
            other => Err(ValueError::WrongKind { expected: "tensor", actual: other.kind_name() }),
        }
    }

    pub fn as_sequence(&self) -> Result<&Sequence, ValueError> {
        match self {
            Value::Sequence(s) => Ok(s),
            other => Err(ValueError::WrongKind { expected: "sequence", actual: other.kind_name() }),
        }
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Tensor(t) => ValueType::tensor(t.dtype(), t.shape()),
            Value::Sequence(s) => ValueType::Sequence(Box::new(ValueType::Tensor(s.element_type()))),
            Value::Optional(Some(inner)) => ValueType::Optional(Box::new(inner.value_type())),
            Value::Optional(None) => ValueType::Optional(Box::new(ValueType::default())),
        }
    }

    /// Bytes held by the value's elements.
    pub fn size_bytes(&self) -> usize {
        match self {
            Value::Tensor(t) => t.size_bytes(),
            Value::Sequence(s) => s.items().iter().map(|t| t.size_bytes()).sum(),
            Value::Optional(Some(inner)) => inner.size_bytes(),
            Value::Optional(None) => 0,
        }
    }
}

impl From<NumericTensor> for Value {
    fn from(value: NumericTensor) -> Self {
        Value::Tensor(value)
    }
}

impl From<Sequence> for Value {
    fn from(value: Sequence) -> Self {
        Value::Sequence(value)
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Tensor(t) => write!(f, "{t}"),
            Value::Sequence(s) => {
                write!(f, "[")?;
                for (i, item) in s.items().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Optional(Some(inner)) => write!(f, "Some({inner})"),
            Value::Optional(None) => write!(f, "None"),
        }
    }
}
