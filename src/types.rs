use crate::dtype::DType;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dimension {
    Known(usize),
    Symbolic(String),
    Unknown,
}

impl Dimension {
    pub fn known(&self) -> Option<usize> {
        match self {
            Dimension::Known(x) => Some(*x),
            _ => None,
        }
    }

    /// Combines two facts about the same dimension; `None` if they contradict.
    pub fn refine(&self, other: &Dimension) -> Option<Dimension> {
        Some(match (self, other) {
            (Dimension::Known(a), Dimension::Known(b)) => {
                if a != b {
                    return None;
                }
                Dimension::Known(*a)
            }
            (Dimension::Known(a), _) | (_, Dimension::Known(a)) => Dimension::Known(*a),
            (Dimension::Symbolic(a), _) => Dimension::Symbolic(a.clone()),
            (_, Dimension::Symbolic(b)) => Dimension::Symbolic(b.clone()),
            (Dimension::Unknown, Dimension::Unknown) => Dimension::Unknown,
        })
    }

    /// The weakest dimension consistent with both, used when control flow may yield either.
    pub fn join(&self, other: &Dimension) -> Dimension {
        if self == other { self.clone() } else { Dimension::Unknown }
    }
}

impl Display for Dimension {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Dimension::Known(x) => write!(f, "{x}"),
            Dimension::Symbolic(name) => write!(f, "{name}"),
            Dimension::Unknown => write!(f, "?"),
        }
    }
}

impl From<usize> for Dimension {
    fn from(value: usize) -> Self {
        Dimension::Known(value)
    }
}

/// Partially known dtype and shape of a tensor. `shape: None` means the rank is unknown.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TensorType {
    pub dtype: Option<DType>,
    pub shape: Option<Vec<Dimension>>,
}

impl TensorType {
    pub fn new(dtype: Option<DType>, shape: Option<Vec<Dimension>>) -> Self {
        Self { dtype, shape }
    }

    pub fn known(dtype: DType, shape: &[usize]) -> Self {
        Self {
            dtype: Some(dtype),
            shape: Some(shape.iter().map(|x| Dimension::Known(*x)).collect()),
        }
    }

    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn with_dtype(dtype: DType) -> Self {
        Self { dtype: Some(dtype), shape: None }
    }

    pub fn rank(&self) -> Option<usize> {
        self.shape.as_ref().map(|s| s.len())
    }

    pub fn concrete_shape(&self) -> Option<Vec<usize>> {
        self.shape.as_ref()?.iter().map(|d| d.known()).collect()
    }

    pub fn refine(&self, other: &TensorType) -> Option<TensorType> {
        let dtype = match (self.dtype, other.dtype) {
            (Some(a), Some(b)) if a != b => return None,
            (a, b) => a.or(b),
        };
        let shape = match (&self.shape, &other.shape) {
            (Some(a), Some(b)) => {
                if a.len() != b.len() {
                    return None;
                }
                Some(a.iter().zip(b).map(|(x, y)| x.refine(y)).collect::<Option<Vec<_>>>()?)
            }
            (a, b) => a.clone().or_else(|| b.clone()),
        };
        Some(TensorType { dtype, shape })
    }

    pub fn join(&self, other: &TensorType) -> TensorType {
        let dtype = if self.dtype == other.dtype { self.dtype } else { None };
        let shape = match (&self.shape, &other.shape) {
            (Some(a), Some(b)) if a.len() == b.len() => Some(a.iter().zip(b).map(|(x, y)| x.join(y)).collect()),
            _ => None,
        };
        TensorType { dtype, shape }
    }
}

impl Display for TensorType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.dtype {
            Some(dtype) => write!(f, "{dtype}")?,
            None => write!(f, "?")?,
        }
        match &self.shape {
            Some(shape) => {
                let dims: Vec<String> = shape.iter().map(|d| d.to_string()).collect();
                write!(f, "[{}]", dims.join(", "))
            }
            None => write!(f, "[*]"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Tensor(TensorType),
    Sequence(Box<ValueType>),
    Optional(Box<ValueType>),
}

impl Default for ValueType {
    fn default() -> Self {
        ValueType::Tensor(TensorType::unknown())
    }
}

impl ValueType {
    pub fn tensor(dtype: DType, shape: &[usize]) -> Self {
        ValueType::Tensor(TensorType::known(dtype, shape))
    }

    pub fn as_tensor(&self) -> Option<&TensorType> {
        match self {
            ValueType::Tensor(t) => Some(t),
            _ => None,
        }
    }

    /// Merges two descriptions of the same value; `None` if they contradict.
    pub fn refine(&self, other: &ValueType) -> Option<ValueType> {
        Some(match (self, other) {
            (ValueType::Tensor(a), ValueType::Tensor(b)) => ValueType::Tensor(a.refine(b)?),
            (ValueType::Sequence(a), ValueType::Sequence(b)) => ValueType::Sequence(Box::new(a.refine(b)?)),
            (ValueType::Optional(a), ValueType::Optional(b)) => ValueType::Optional(Box::new(a.refine(b)?)),
            _ => return None,
        })
    }

    pub fn join(&self, other: &ValueType) -> ValueType {
        match (self, other) {
            (ValueType::Tensor(a), ValueType::Tensor(b)) => ValueType::Tensor(a.join(b)),
            (ValueType::Sequence(a), ValueType::Sequence(b)) => ValueType::Sequence(Box::new(a.join(b))),
            (ValueType::Optional(a), ValueType::Optional(b)) => ValueType::Optional(Box::new(a.join(b))),
            _ => ValueType::default(),
        }
    }

    /// Whether a value of type `actual` (fully known) satisfies this declaration.
    pub fn accepts(&self, actual: &ValueType) -> bool {
        match (self, actual) {
            // An absent optional carries no element type to check.
            (ValueType::Optional(_), ValueType::Optional(inner)) if **inner == ValueType::default() => true,
            _ => self.refine(actual).is_some(),
        }
    }
}

impl Display for ValueType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueType::Tensor(t) => write!(f, "{t}"),
            ValueType::Sequence(t) => write!(f, "seq({t})"),
            ValueType::Optional(t) => write!(f, "optional({t})"),
        }
    }
}
