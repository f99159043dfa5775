use super::{
    canonical_domain, Attribute, Attributes, Graph, GraphError, Node, NodeId, TensorId, TensorInfo, TensorKind,
    DEFAULT_OPSET_VERSION,
};
use crate::numeric_tensor::NumericTensor;
use crate::types::ValueType;
use std::collections::HashMap;
use std::sync::OnceLock;

/// A node recorded by [`GraphBuilder::node`], referring to tensors by name.
#[derive(Debug, Clone)]
pub struct PendingNode {
    name: Option<String>,
    op_type: String,
    domain: String,
    inputs: Vec<String>,
    outputs: Vec<String>,
    attributes: Attributes,
}

impl PendingNode {
    pub fn name(&mut self, name: impl Into<String>) -> &mut Self {
        self.name = Some(name.into());
        self
    }

    pub fn domain(&mut self, domain: impl Into<String>) -> &mut Self {
        self.domain = domain.into();
        self
    }

    pub fn attr(&mut self, name: impl Into<String>, value: impl Into<Attribute>) -> &mut Self {
        self.attributes.insert(name, value);
        self
    }
}

/// Builds an immutable [`Graph`] from name-based declarations.
///
/// Names are resolved when [`GraphBuilder::build`] runs, so nodes may be added in any order.
/// A name that nothing in the graph defines is treated as a value captured from an
/// enclosing graph; this is how control-flow bodies read outer tensors. The empty name
/// stands for an absent optional input or output.
#[derive(Debug, Clone, Default)]
pub struct GraphBuilder {
    name: String,
    inputs: Vec<(String, Option<ValueType>)>,
    outputs: Vec<(String, Option<ValueType>)>,
    initializers: Vec<(String, NumericTensor)>,
    value_info: Vec<(String, ValueType)>,
    nodes: Vec<PendingNode>,
    opset_imports: HashMap<String, i64>,
}

impl GraphBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn opset(&mut self, domain: &str, version: i64) -> &mut Self {
        self.opset_imports.insert(canonical_domain(domain).to_string(), version);
        self
    }

    pub fn input(&mut self, name: impl Into<String>, value_type: ValueType) -> &mut Self {
        self.inputs.push((name.into(), Some(value_type)));
        self
    }

    pub fn untyped_input(&mut self, name: impl Into<String>) -> &mut Self {
        self.inputs.push((name.into(), None));
        self
    }

    pub fn output(&mut self, name: impl Into<String>) -> &mut Self {
        self.outputs.push((name.into(), None));
        self
    }

    pub fn typed_output(&mut self, name: impl Into<String>, value_type: ValueType) -> &mut Self {
        self.outputs.push((name.into(), Some(value_type)));
        self
    }

    pub fn initializer(&mut self, name: impl Into<String>, value: NumericTensor) -> &mut Self {
        self.initializers.push((name.into(), value));
        self
    }

    pub fn value_info(&mut self, name: impl Into<String>, value_type: ValueType) -> &mut Self {
        self.value_info.push((name.into(), value_type));
        self
    }

    pub fn node(&mut self, op_type: &str, inputs: &[&str], outputs: &[&str]) -> &mut PendingNode {
        self.nodes.push(PendingNode {
            name: None,
            op_type: op_type.to_string(),
            domain: String::new(),
            inputs: inputs.iter().map(|x| x.to_string()).collect(),
            outputs: outputs.iter().map(|x| x.to_string()).collect(),
            attributes: Attributes::new(),
        });
        let index = self.nodes.len() - 1;
        &mut self.nodes[index]
    }

    pub fn build(self) -> Result<Graph, GraphError> {
        let mut opset_imports = self.opset_imports;
        if opset_imports.is_empty() {
            opset_imports.insert(String::new(), DEFAULT_OPSET_VERSION);
        }

        let mut scope = Scope::default();
        let mut inputs = Vec::with_capacity(self.inputs.len());
        for (name, value_type) in self.inputs {
            if scope.by_name.contains_key(&name) {
                return Err(GraphError::DuplicateInput(name));
            }
            inputs.push(scope.declare(&name, TensorKind::Input, value_type));
        }

        let mut initializers = HashMap::new();
        for (name, value) in self.initializers {
            // An initializer sharing a name with an input is that input's default value.
            let id = match scope.by_name.get(&name) {
                Some(&id) if scope.tensors[id].kind == TensorKind::Input => id,
                Some(_) => return Err(GraphError::DuplicateProducer(name)),
                None => {
                    let declared = ValueType::tensor(value.dtype(), value.shape());
                    scope.declare(&name, TensorKind::Initializer, Some(declared))
                }
            };
            initializers.insert(id, value);
        }

        let mut producers: HashMap<TensorId, NodeId> = HashMap::new();
        for (node_id, node) in self.nodes.iter().enumerate() {
            for output in node.outputs.iter().filter(|x| !x.is_empty()) {
                if scope.by_name.contains_key(output) {
                    return Err(GraphError::DuplicateProducer(output.clone()));
                }
                let id = scope.declare(output, TensorKind::Intermediate, None);
                producers.insert(id, node_id);
            }
        }

        let mut nodes = Vec::with_capacity(self.nodes.len());
        for (node_id, pending) in self.nodes.into_iter().enumerate() {
            let name = pending.name.unwrap_or_else(|| format!("{}_{}", pending.op_type, node_id));
            let domain = canonical_domain(&pending.domain).to_string();
            let version = *opset_imports.get(&domain).ok_or_else(|| GraphError::MissingOpsetImport {
                node: name.clone(),
                domain: domain.clone(),
            })?;
            let inputs = pending
                .inputs
                .iter()
                .map(|x| if x.is_empty() { None } else { Some(scope.resolve(x)) })
                .collect();
            let outputs = pending
                .outputs
                .iter()
                .map(|x| if x.is_empty() { None } else { scope.by_name.get(x).copied() })
                .collect();
            let mut implicit_inputs: Vec<TensorId> = Vec::new();
            for subgraph in pending.attributes.subgraphs() {
                for &captured in subgraph.captures() {
                    let id = scope.resolve(subgraph.tensor_name(captured));
                    if !implicit_inputs.contains(&id) {
                        implicit_inputs.push(id);
                    }
                }
            }
            nodes.push(Node {
                name,
                op: super::OpId {
                    op_type: pending.op_type,
                    domain,
                    version,
                },
                inputs,
                outputs,
                attributes: pending.attributes,
                implicit_inputs,
            });
        }

        let mut outputs = Vec::with_capacity(self.outputs.len());
        for (name, value_type) in self.outputs {
            let id = scope.resolve(&name);
            if let Some(value_type) = value_type {
                scope.merge_declared(id, value_type);
            }
            outputs.push(id);
        }
        for (name, value_type) in self.value_info {
            if let Some(&id) = scope.by_name.get(&name) {
                scope.merge_declared(id, value_type);
            }
        }

        Ok(Graph {
            name: self.name,
            tensors: scope.tensors,
            tensors_by_name: scope.by_name,
            nodes,
            inputs,
            outputs,
            initializers,
            captures: scope.captures,
            opset_imports,
            producers,
            plan: OnceLock::new(),
        })
    }
}

#[derive(Default)]
struct Scope {
    tensors: Vec<TensorInfo>,
    by_name: HashMap<String, TensorId>,
    captures: Vec<TensorId>,
}

impl Scope {
    fn declare(&mut self, name: &str, kind: TensorKind, declared_type: Option<ValueType>) -> TensorId {
        let id = self.tensors.len();
        self.tensors.push(TensorInfo {
            name: name.to_string(),
            declared_type,
            kind,
        });
        self.by_name.insert(name.to_string(), id);
        id
    }

    fn resolve(&mut self, name: &str) -> TensorId {
        if let Some(&id) = self.by_name.get(name) {
            return id;
        }
        let id = self.declare(name, TensorKind::Captured, None);
        self.captures.push(id);
        id
    }

    fn merge_declared(&mut self, id: TensorId, value_type: ValueType) {
        let info = &mut self.tensors[id];
        info.declared_type = Some(match info.declared_type.take() {
            Some(existing) => existing.refine(&value_type).unwrap_or(value_type),
            None => value_type,
        });
    }
}
