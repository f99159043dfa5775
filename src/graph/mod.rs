pub mod attribute;
mod builder;
mod decode;

pub use attribute::{Attribute, AttributeError, Attributes};
pub use builder::{GraphBuilder, PendingNode};

use crate::numeric_tensor::{NumericTensor, NumericTensorError};
use crate::onnx;
use crate::plan::{CyclicGraphError, ExecutionPlan};
use crate::types::ValueType;
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::OnceLock;

pub type TensorId = usize;
pub type NodeId = usize;

/// The opset used when a graph is built without explicit imports.
pub const DEFAULT_OPSET_VERSION: i64 = 21;

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("Tensor \"{0}\" is produced more than once")]
    DuplicateProducer(String),
    #[error("Tensor \"{0}\" is declared as a graph input more than once")]
    DuplicateInput(String),
    #[error("Node \"{node}\" uses domain \"{domain}\" which has no opset import")]
    MissingOpsetImport { node: String, domain: String },
}

#[derive(Debug, thiserror::Error)]
pub enum ONNXDecodingError {
    #[error("Error constructing graph \"{0}\"")]
    GraphConstructionError(String, #[source] GraphError),
    #[error("Missing field \"{0}\"")]
    MissingField(&'static str),
    #[error("Unsupported type value {0:?}")]
    UnsupportedTypeValue(onnx::type_proto::Value),
    #[error("Protobuf decoding error")]
    ProtobufDecodeError(#[from] anyhow::Error),
    #[error("Negative dimension")]
    NegativeDimensionError,
    #[error("Unsupported attribute type {1} for attribute \"{0}\"")]
    UnsupportedAttributeType(String, i32),
    #[error(transparent)]
    DTypeError(#[from] crate::dtype::DTypeError),
    #[error(transparent)]
    NumericTensorError(#[from] NumericTensorError),
    #[error("Unsupported ONNX: {0}")]
    UnsupportedONNX(String),
}

/// Canonical name of the default operator domain. `"ai.onnx"` is an alias of it.
pub fn canonical_domain(domain: &str) -> &str {
    if domain == "ai.onnx" { "" } else { domain }
}

/// Operator identity: type, domain and the opset version the node was authored against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OpId {
    pub op_type: String,
    pub domain: String,
    pub version: i64,
}

impl OpId {
    pub fn new(op_type: impl Into<String>, domain: &str, version: i64) -> Self {
        Self {
            op_type: op_type.into(),
            domain: canonical_domain(domain).to_string(),
            version,
        }
    }
}

impl Display for OpId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.domain.is_empty() {
            write!(f, "{}-{}", self.op_type, self.version)
        } else {
            write!(f, "{}.{}-{}", self.domain, self.op_type, self.version)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorKind {
    Input,
    Initializer,
    Intermediate,
    /// Read from an enclosing scope; only meaningful inside control-flow bodies.
    Captured,
}

#[derive(Debug, Clone)]
pub struct TensorInfo {
    pub name: String,
    pub declared_type: Option<ValueType>,
    pub kind: TensorKind,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub op: OpId,
    pub inputs: Vec<Option<TensorId>>,
    pub outputs: Vec<Option<TensorId>>,
    pub attributes: Attributes,
    /// Outer tensors read by the node's sub-graphs.
    pub implicit_inputs: Vec<TensorId>,
}

impl Node {
    /// Every tensor the node reads, explicit inputs first.
    pub fn dependencies(&self) -> impl Iterator<Item = TensorId> + '_ {
        self.inputs.iter().flatten().copied().chain(self.implicit_inputs.iter().copied())
    }
}

#[derive(Debug)]
pub struct Graph {
    name: String,
    tensors: Vec<TensorInfo>,
    tensors_by_name: HashMap<String, TensorId>,
    nodes: Vec<Node>,
    inputs: Vec<TensorId>,
    outputs: Vec<TensorId>,
    initializers: HashMap<TensorId, NumericTensor>,
    captures: Vec<TensorId>,
    opset_imports: HashMap<String, i64>,
    producers: HashMap<TensorId, NodeId>,
    plan: OnceLock<Result<ExecutionPlan, CyclicGraphError>>,
}

impl Graph {
    pub fn from_onnx_bytes(onnx_bytes: &[u8]) -> Result<Self, ONNXDecodingError> {
        decode::graph_from_onnx_bytes(onnx_bytes)
    }

    pub fn from_onnx_model(model: &onnx::ModelProto) -> Result<Self, ONNXDecodingError> {
        decode::graph_from_onnx_model(model)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tensors(&self) -> &[TensorInfo] {
        &self.tensors
    }

    pub fn tensor(&self, id: TensorId) -> &TensorInfo {
        &self.tensors[id]
    }

    pub fn tensor_name(&self, id: TensorId) -> &str {
        &self.tensors[id].name
    }

    pub fn tensor_id(&self, name: &str) -> Option<TensorId> {
        self.tensors_by_name.get(name).copied()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn inputs(&self) -> &[TensorId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[TensorId] {
        &self.outputs
    }

    pub fn input_names(&self) -> Vec<&str> {
        self.inputs.iter().map(|id| self.tensor_name(*id)).collect()
    }

    pub fn output_names(&self) -> Vec<&str> {
        self.outputs.iter().map(|id| self.tensor_name(*id)).collect()
    }

    pub fn initializers(&self) -> &HashMap<TensorId, NumericTensor> {
        &self.initializers
    }

    pub fn initializer(&self, id: TensorId) -> Option<&NumericTensor> {
        self.initializers.get(&id)
    }

    /// Tensors this graph reads from an enclosing scope, by id in this graph.
    pub fn captures(&self) -> &[TensorId] {
        &self.captures
    }

    pub fn opset_imports(&self) -> &HashMap<String, i64> {
        &self.opset_imports
    }

    pub fn opset_version(&self, domain: &str) -> Option<i64> {
        self.opset_imports.get(canonical_domain(domain)).copied()
    }

    pub fn producer(&self, id: TensorId) -> Option<NodeId> {
        self.producers.get(&id).copied()
    }

    /// The execution plan, computed on first use and cached for the lifetime of the graph.
    pub fn plan(&self) -> Result<&ExecutionPlan, CyclicGraphError> {
        self.plan.get_or_init(|| ExecutionPlan::build(self)).as_ref().map_err(Clone::clone)
    }

    /// Number of nested sub-graph levels below this graph.
    pub fn subgraph_depth(&self) -> usize {
        self.nodes
            .iter()
            .flat_map(|n| n.attributes.subgraphs())
            .map(|g| g.subgraph_depth() + 1)
            .max()
            .unwrap_or(0)
    }
}
