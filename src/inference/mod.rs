//! Static shape and type inference over a [`Graph`].
//!
//! Inference is partial: unknown ranks, unknown dimensions and symbolic dimensions propagate
//! as unknowns rather than errors. Small tensors whose value is known statically (initializers,
//! `Constant`, `Shape` of a fully known input and simple arithmetic over those) are carried
//! alongside their types so that shape-consuming operators such as `Reshape` can infer
//! concrete output shapes.

pub mod broadcast;

use crate::dtype::DType;
use crate::graph::{Attributes, AttributeError, Graph, Node, TensorId, TensorKind};
use crate::numeric_tensor::{element_count, NumericTensor, NumericTensorError};
use crate::plan::CyclicGraphError;
use crate::registry::{OperatorRegistry, UnsupportedOperatorError};
use crate::types::{Dimension, TensorType, ValueType};
use crate::value::Value;
use log::trace;
use std::collections::HashMap;

/// Constant tensors above this many elements are not propagated.
pub const MAX_FOLD_ELEMENTS: usize = 4096;

#[derive(Debug, thiserror::Error)]
pub enum ShapeInferenceError {
    #[error("Expected rank {expected}, got rank {actual}")]
    RankMismatch { expected: usize, actual: usize },
    #[error("Shapes {0} and {1} are not broadcastable")]
    NotBroadcastable(TensorType, TensorType),
    #[error("Mismatched dtypes {0} and {1}")]
    DTypeMismatch(DType, DType),
    #[error("Expected a {expected} for input {index}, got {actual}")]
    WrongValueKind { index: usize, expected: &'static str, actual: ValueType },
    #[error("Missing required input {0}")]
    MissingInput(usize),
    #[error("Invalid attribute: {0}")]
    InvalidAttribute(String),
    #[error("Declared type {declared} of \"{tensor}\" conflicts with inferred type {inferred}")]
    DeclaredTypeConflict {
        tensor: String,
        declared: ValueType,
        inferred: ValueType,
    },
    #[error("{0}")]
    Invalid(String),
    #[error(transparent)]
    Attribute(#[from] AttributeError),
    #[error(transparent)]
    Tensor(#[from] NumericTensorError),
    #[error("Sub-graph inference failed")]
    Subgraph(#[source] Box<InferenceError>),
}

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("Shape inference failed at node \"{node}\" ({operator})")]
    Shape {
        node: String,
        operator: String,
        #[source]
        cause: ShapeInferenceError,
    },
    #[error(transparent)]
    UnsupportedOperator(#[from] UnsupportedOperatorError),
    #[error(transparent)]
    CyclicGraph(#[from] CyclicGraphError),
}

/// What inference learned about one output of a node.
#[derive(Debug, Clone, Default)]
pub struct InferredValue {
    pub value_type: Option<ValueType>,
    pub constant: Option<NumericTensor>,
}

impl InferredValue {
    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn of(value_type: ValueType) -> Self {
        Self {
            value_type: Some(value_type),
            constant: None,
        }
    }

    pub fn tensor(tensor_type: TensorType) -> Self {
        Self::of(ValueType::Tensor(tensor_type))
    }

    /// A statically known tensor; small values are kept for propagation.
    pub fn constant(value: NumericTensor) -> Self {
        let value_type = ValueType::tensor(value.dtype(), value.shape());
        Self {
            value_type: Some(value_type),
            constant: (value.num_elements() <= MAX_FOLD_ELEMENTS).then_some(value),
        }
    }
}

/// Infers the types of a node's outputs from its inputs and attributes.
pub trait InferenceRule: Send + Sync {
    fn infer(&self, ctx: &InferenceContext) -> Result<Vec<InferredValue>, ShapeInferenceError>;
}

impl<F> InferenceRule for F
where
    F: Fn(&InferenceContext) -> Result<Vec<InferredValue>, ShapeInferenceError> + Send + Sync,
{
    fn infer(&self, ctx: &InferenceContext) -> Result<Vec<InferredValue>, ShapeInferenceError> {
        self(ctx)
    }
}

/// Resolves names read from an enclosing scope.
pub trait TypeScope {
    fn lookup(&self, name: &str) -> Option<(Option<ValueType>, Option<NumericTensor>)>;
}

impl TypeScope for () {
    fn lookup(&self, _name: &str) -> Option<(Option<ValueType>, Option<NumericTensor>)> {
        None
    }
}

/// Concrete values captured at execution time.
impl TypeScope for HashMap<String, Value> {
    fn lookup(&self, name: &str) -> Option<(Option<ValueType>, Option<NumericTensor>)> {
        let value = self.get(name)?;
        let constant = match value {
            Value::Tensor(t) if t.num_elements() <= MAX_FOLD_ELEMENTS => Some(t.clone()),
            _ => None,
        };
        Some((Some(value.value_type()), constant))
    }
}

/// Inference results for every tensor of a graph, indexed by [`TensorId`].
#[derive(Debug, Clone, Default)]
pub struct GraphTypes {
    types: Vec<Option<ValueType>>,
    constants: HashMap<TensorId, NumericTensor>,
}

impl GraphTypes {
    pub fn value_type(&self, tensor: TensorId) -> Option<&ValueType> {
        self.types.get(tensor).and_then(Option::as_ref)
    }

    pub fn constant(&self, tensor: TensorId) -> Option<&NumericTensor> {
        self.constants.get(&tensor)
    }

    pub fn output_types(&self, graph: &Graph) -> Vec<Option<ValueType>> {
        graph.outputs().iter().map(|id| self.value_type(*id).cloned()).collect()
    }

    /// Byte size of a tensor whose dtype and shape are fully known.
    pub fn concrete_size_bytes(&self, tensor: TensorId) -> Option<usize> {
        let t = self.value_type(tensor)?.as_tensor()?;
        let dtype = t.dtype?;
        element_count(&t.concrete_shape()?, dtype).ok()?.checked_mul(dtype.size())
    }
}

struct GraphScope<'a> {
    graph: &'a Graph,
    types: &'a GraphTypes,
    parent: &'a dyn TypeScope,
}

impl TypeScope for GraphScope<'_> {
    fn lookup(&self, name: &str) -> Option<(Option<ValueType>, Option<NumericTensor>)> {
        match self.graph.tensor_id(name) {
            Some(id) => Some((self.types.value_type(id).cloned(), self.types.constant(id).cloned())),
            None => self.parent.lookup(name),
        }
    }
}

pub struct InferenceContext<'a> {
    node: &'a Node,
    registry: &'a OperatorRegistry,
    types: &'a GraphTypes,
    scope: &'a dyn TypeScope,
}

impl<'a> InferenceContext<'a> {
    pub fn node(&self) -> &Node {
        self.node
    }

    pub fn attributes(&self) -> &Attributes {
        &self.node.attributes
    }

    pub fn input_count(&self) -> usize {
        self.node.inputs.len()
    }

    pub fn output_count(&self) -> usize {
        self.node.outputs.len()
    }

    pub fn has_input(&self, index: usize) -> bool {
        matches!(self.node.inputs.get(index), Some(Some(_)))
    }

    fn input_id(&self, index: usize) -> Option<TensorId> {
        self.node.inputs.get(index).copied().flatten()
    }

    pub fn input_type(&self, index: usize) -> Option<&ValueType> {
        self.types.value_type(self.input_id(index)?)
    }

    /// The input as a tensor type; absent knowledge becomes an unknown tensor type.
    pub fn tensor_input(&self, index: usize) -> Result<TensorType, ShapeInferenceError> {
        match self.input_type(index) {
            None => Ok(TensorType::unknown()),
            Some(ValueType::Tensor(t)) => Ok(t.clone()),
            Some(other) => Err(ShapeInferenceError::WrongValueKind {
                index,
                expected: "tensor",
                actual: other.clone(),
            }),
        }
    }

    /// Like [`Self::tensor_input`] but fails when the input is absent.
    pub fn required_tensor_input(&self, index: usize) -> Result<TensorType, ShapeInferenceError> {
        if !self.has_input(index) {
            return Err(ShapeInferenceError::MissingInput(index));
        }
        self.tensor_input(index)
    }

    pub fn constant(&self, index: usize) -> Option<&NumericTensor> {
        self.types.constant(self.input_id(index)?)
    }

    pub fn constant_ints(&self, index: usize) -> Option<Vec<i64>> {
        self.constant(index)?.to_i64_vec().ok()
    }

    /// Every listed input as a constant, if all are statically known.
    pub fn constants(&self, indices: impl IntoIterator<Item = usize>) -> Option<Vec<&NumericTensor>> {
        indices.into_iter().map(|i| self.constant(i)).collect()
    }

    /// Infers a sub-graph with the given positional input types. Names the sub-graph reads
    /// from enclosing scopes resolve against this graph's inference state.
    pub fn infer_subgraph(
        &self,
        graph: &Graph,
        inputs: &[Option<ValueType>],
    ) -> Result<Vec<Option<ValueType>>, ShapeInferenceError> {
        let types = infer_graph(graph, self.registry, inputs, self.scope)
            .map_err(|e| ShapeInferenceError::Subgraph(Box::new(e)))?;
        Ok(types.output_types(graph))
    }
}

/// Infers the type of every tensor in `graph`.
///
/// `input_types` refine the declared types of the graph inputs positionally; `outer` resolves
/// captured names. Declared types of intermediates and outputs are merged with the inferred
/// ones, and a contradiction between the two is an error.
pub fn infer_graph(
    graph: &Graph,
    registry: &OperatorRegistry,
    input_types: &[Option<ValueType>],
    outer: &dyn TypeScope,
) -> Result<GraphTypes, InferenceError> {
    let plan = graph.plan()?;
    let mut types = GraphTypes {
        types: graph.tensors().iter().map(|t| t.declared_type.clone()).collect(),
        constants: HashMap::new(),
    };

    for (id, actual) in graph.inputs().iter().zip(input_types) {
        if let Some(actual) = actual {
            let merged = match &types.types[*id] {
                Some(declared) => declared.refine(actual).unwrap_or_else(|| actual.clone()),
                None => actual.clone(),
            };
            types.types[*id] = Some(merged);
        }
    }
    for (id, tensor) in graph.initializers() {
        // An input's default can be overridden by the caller, so it is not a constant.
        if graph.tensor(*id).kind == TensorKind::Initializer && tensor.num_elements() <= MAX_FOLD_ELEMENTS {
            types.constants.insert(*id, tensor.clone());
        }
    }
    for &id in graph.captures() {
        if let Some((value_type, constant)) = outer.lookup(graph.tensor_name(id)) {
            if value_type.is_some() {
                types.types[id] = value_type;
            }
            if let Some(constant) = constant {
                types.constants.insert(id, constant);
            }
        }
    }

    for &node_id in plan.order() {
        let node = graph.node(node_id);
        let entry = registry.lookup_op(&node.op)?;
        let shape_error = |cause| InferenceError::Shape {
            node: node.name.clone(),
            operator: node.op.to_string(),
            cause,
        };
        let inferred = {
            let scope = GraphScope {
                graph,
                types: &types,
                parent: outer,
            };
            let ctx = InferenceContext {
                node,
                registry,
                types: &types,
                scope: &scope,
            };
            entry.inference().infer(&ctx).map_err(shape_error)?
        };

        for (index, tensor) in node.outputs.iter().enumerate() {
            let Some(tensor) = *tensor else { continue };
            let result = inferred.get(index).cloned().unwrap_or_default();
            let merged = match (&types.types[tensor], result.value_type) {
                (Some(declared), Some(inferred)) => match declared.refine(&inferred) {
                    Some(merged) => Some(merged),
                    None => {
                        return Err(shape_error(ShapeInferenceError::DeclaredTypeConflict {
                            tensor: graph.tensor_name(tensor).to_string(),
                            declared: declared.clone(),
                            inferred,
                        }));
                    }
                },
                (Some(declared), None) => Some(declared.clone()),
                (None, inferred) => inferred,
            };
            if let Some(merged) = &merged {
                trace!("Inferred {} for \"{}\"", merged, graph.tensor_name(tensor));
            }
            types.types[tensor] = merged;
            if let Some(constant) = result.constant {
                types.constants.insert(tensor, constant);
            }
        }
    }
    Ok(types)
}

/// Output type equal to the type of input `index`.
pub fn same_as_input(ctx: &InferenceContext, index: usize) -> Vec<InferredValue> {
    vec![InferredValue {
        value_type: ctx.input_type(index).cloned(),
        constant: ctx.constant(index).cloned(),
    }]
}

/// Shape of a tensor type, if its rank is known.
pub fn rank_of(t: &TensorType) -> Option<usize> {
    t.shape.as_ref().map(Vec::len)
}

pub fn known_dims(shape: &[usize]) -> Vec<Dimension> {
    shape.iter().map(|d| Dimension::Known(*d)).collect()
}

/// Normalizes a possibly negative axis attribute for shape inference.
pub fn normalize_axis(axis: i64, rank: usize) -> Result<usize, ShapeInferenceError> {
    crate::numeric_tensor::normalize_axis(axis, rank).map_err(ShapeInferenceError::from)
}
