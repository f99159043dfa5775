use super::Graph;
use crate::numeric_tensor::NumericTensor;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum AttributeError {
    #[error("Missing required attribute \"{0}\"")]
    Missing(String),
    #[error("Attribute \"{name}\" has kind {actual}, expected {expected}")]
    WrongKind {
        name: String,
        expected: &'static str,
        actual: &'static str,
    },
}

#[derive(Debug, Clone)]
pub enum Attribute {
    Float(f32),
    Int(i64),
    String(String),
    Tensor(NumericTensor),
    Graph(Arc<Graph>),
    Floats(Vec<f32>),
    Ints(Vec<i64>),
    Strings(Vec<String>),
    Tensors(Vec<NumericTensor>),
    Graphs(Vec<Arc<Graph>>),
}

impl Attribute {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Attribute::Float(_) => "float",
            Attribute::Int(_) => "int",
            Attribute::String(_) => "string",
            Attribute::Tensor(_) => "tensor",
            Attribute::Graph(_) => "graph",
            Attribute::Floats(_) => "floats",
            Attribute::Ints(_) => "ints",
            Attribute::Strings(_) => "strings",
            Attribute::Tensors(_) => "tensors",
            Attribute::Graphs(_) => "graphs",
        }
    }
}

impl From<f32> for Attribute {
    fn from(value: f32) -> Self {
        Attribute::Float(value)
    }
}

impl From<i64> for Attribute {
    fn from(value: i64) -> Self {
        Attribute::Int(value)
    }
}

impl From<&str> for Attribute {
    fn from(value: &str) -> Self {
        Attribute::String(value.to_string())
    }
}

impl From<NumericTensor> for Attribute {
    fn from(value: NumericTensor) -> Self {
        Attribute::Tensor(value)
    }
}

impl From<Graph> for Attribute {
    fn from(value: Graph) -> Self {
        Attribute::Graph(Arc::new(value))
    }
}

impl From<Arc<Graph>> for Attribute {
    fn from(value: Arc<Graph>) -> Self {
        Attribute::Graph(value)
    }
}

impl From<Vec<i64>> for Attribute {
    fn from(value: Vec<i64>) -> Self {
        Attribute::Ints(value)
    }
}

impl From<Vec<f32>> for Attribute {
    fn from(value: Vec<f32>) -> Self {
        Attribute::Floats(value)
    }
}

/// Named attributes of a node. Typed getters return `None` both for absent attributes and
/// for attributes of another kind; the `require_*` forms distinguish the two.
#[derive(Debug, Clone, Default)]
pub struct Attributes(HashMap<String, Attribute>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Attribute>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Attribute> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Attribute)> {
        self.0.iter()
    }

    pub fn float(&self, name: &str) -> Option<f32> {
        match self.get(name)? {
            Attribute::Float(x) => Some(*x),
            _ => None,
        }
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        match self.get(name)? {
            Attribute::Int(x) => Some(*x),
            _ => None,
        }
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        self.int(name).map(|x| x != 0)
    }

    pub fn string(&self, name: &str) -> Option<&str> {
        match self.get(name)? {
            Attribute::String(x) => Some(x),
            _ => None,
        }
    }

    pub fn tensor(&self, name: &str) -> Option<&NumericTensor> {
        match self.get(name)? {
            Attribute::Tensor(x) => Some(x),
            _ => None,
        }
    }

    pub fn floats(&self, name: &str) -> Option<&[f32]> {
        match self.get(name)? {
            Attribute::Floats(x) => Some(x),
            _ => None,
        }
    }

    pub fn ints(&self, name: &str) -> Option<&[i64]> {
        match self.get(name)? {
            Attribute::Ints(x) => Some(x),
            _ => None,
        }
    }

    pub fn strings(&self, name: &str) -> Option<&[String]> {
        match self.get(name)? {
            Attribute::Strings(x) => Some(x),
            _ => None,
        }
    }

    pub fn graph(&self, name: &str) -> Option<&Arc<Graph>> {
        match self.get(name)? {
            Attribute::Graph(x) => Some(x),
            _ => None,
        }
    }

    pub fn int_or(&self, name: &str, default: i64) -> i64 {
        self.int(name).unwrap_or(default)
    }

    pub fn float_or(&self, name: &str, default: f32) -> f32 {
        self.float(name).unwrap_or(default)
    }

    fn require<'a, T>(
        &'a self,
        name: &str,
        expected: &'static str,
        get: impl FnOnce(&'a Attribute) -> Option<T>,
    ) -> Result<T, AttributeError> {
        let attribute = self.get(name).ok_or_else(|| AttributeError::Missing(name.to_string()))?;
        get(attribute).ok_or_else(|| AttributeError::WrongKind {
            name: name.to_string(),
            expected,
            actual: attribute.kind_name(),
        })
    }

    pub fn require_int(&self, name: &str) -> Result<i64, AttributeError> {
        self.require(name, "int", |a| match a {
            Attribute::Int(x) => Some(*x),
            _ => None,
        })
    }

    pub fn require_tensor(&self, name: &str) -> Result<&NumericTensor, AttributeError> {
        self.require(name, "tensor", |a| match a {
            Attribute::Tensor(x) => Some(x),
            _ => None,
        })
    }

    pub fn require_graph(&self, name: &str) -> Result<&Arc<Graph>, AttributeError> {
        self.require(name, "graph", |a| match a {
            Attribute::Graph(x) => Some(x),
            _ => None,
        })
    }

    /// Every sub-graph held by these attributes.
    pub fn subgraphs(&self) -> impl Iterator<Item = &Arc<Graph>> {
        self.0.values().flat_map(|a| match a {
            Attribute::Graph(g) => std::slice::from_ref(g),
            Attribute::Graphs(gs) => gs.as_slice(),
            _ => &[][..],
        })
    }
}

impl FromIterator<(String, Attribute)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (String, Attribute)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
