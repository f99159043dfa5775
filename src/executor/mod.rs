//! The scheduler: binds inputs, runs inference, walks the execution plan and dispatches
//! kernels, releasing intermediates once their last consumer has run.

mod config;
mod observer;

pub use config::{ConfigError, ExecutorConfig};
pub use observer::{CancellationToken, ExecutionObserver};

use crate::buffer::{AllocationError, BufferManager, BufferStats};
use crate::dtype::DType;
use crate::graph::{Graph, Node, NodeId, TensorId};
use crate::inference::{infer_graph, GraphTypes, InferenceError};
use crate::kernels::KernelError;
use crate::numeric_tensor::{NumericTensor, NumericTensorError};
use crate::plan::{CyclicGraphError, ExecutionPlan};
use crate::registry::{self, OperatorRegistry, RegistryError, UnsupportedOperatorError};
use crate::types::ValueType;
use crate::value::Value;
use log::{debug, trace, warn};
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Instant;

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("Missing value for graph input \"{0}\"")]
    MissingInput(String),
    #[error("No value is available for tensor \"{0}\"")]
    UnresolvedTensor(String),
    #[error("Value of \"{name}\" has type {actual}, which does not match {expected}")]
    TypeMismatch {
        name: String,
        expected: ValueType,
        actual: ValueType,
    },
    #[error(transparent)]
    Inference(InferenceError),
    #[error(transparent)]
    UnsupportedOperator(#[from] UnsupportedOperatorError),
    #[error(transparent)]
    CyclicGraph(#[from] CyclicGraphError),
    #[error("Kernel {operator} failed at node \"{node}\"")]
    KernelExecution {
        operator: String,
        node: String,
        #[source]
        cause: KernelError,
    },
    #[error("Loop node \"{node}\" exceeded the bound of {limit} iterations")]
    LoopNonTermination { node: String, limit: u64 },
    #[error(transparent)]
    Allocation(#[from] AllocationError),
    #[error("Execution was cancelled")]
    Cancelled,
    #[error("Sub-graphs are nested deeper than the limit of {0}")]
    SubgraphDepthExceeded(usize),
}

impl From<InferenceError> for ExecutionError {
    fn from(value: InferenceError) -> Self {
        match value {
            InferenceError::UnsupportedOperator(e) => ExecutionError::UnsupportedOperator(e),
            InferenceError::CyclicGraph(e) => ExecutionError::CyclicGraph(e),
            other => ExecutionError::Inference(other),
        }
    }
}

/// Converts a kernel failure into the error reported for the node. Failures that end the whole
/// run keep their own variant, also when they come out of a nested body.
fn kernel_failure(node: &Node, cause: KernelError) -> ExecutionError {
    match cause {
        KernelError::Cancelled => ExecutionError::Cancelled,
        KernelError::LoopNonTermination { limit } => ExecutionError::LoopNonTermination {
            node: node.name.clone(),
            limit,
        },
        KernelError::AllocationError(e) | KernelError::NumericTensorError(NumericTensorError::Allocation(e)) => {
            ExecutionError::Allocation(e)
        }
        KernelError::Subgraph(inner)
            if matches!(
                *inner,
                ExecutionError::Cancelled
                    | ExecutionError::LoopNonTermination { .. }
                    | ExecutionError::Allocation(_)
                    | ExecutionError::SubgraphDepthExceeded(_)
            ) =>
        {
            *inner
        }
        cause => ExecutionError::KernelExecution {
            operator: node.op.to_string(),
            node: node.name.clone(),
            cause,
        },
    }
}

/// Named graph outputs in declaration order.
#[derive(Debug, Clone)]
pub struct GraphOutputs {
    outputs: Vec<(String, Value)>,
    stats: BufferStats,
}

impl GraphOutputs {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.outputs.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn tensor(&self, name: &str) -> Option<&NumericTensor> {
        match self.get(name)? {
            Value::Tensor(t) => Some(t),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.outputs.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn names(&self) -> Vec<&str> {
        self.outputs.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// Buffer accounting of the run that produced these outputs.
    pub fn buffer_stats(&self) -> BufferStats {
        self.stats
    }

    pub fn into_map(self) -> HashMap<String, Value> {
        self.outputs.into_iter().collect()
    }
}

impl IntoIterator for GraphOutputs {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.outputs.into_iter()
    }
}

/// State shared by every graph level of one run.
struct RunState<'r> {
    registry: &'r OperatorRegistry,
    config: &'r ExecutorConfig,
    buffers: BufferManager,
    cancel: &'r CancellationToken,
    observer: Mutex<&'r mut dyn ExecutionObserver>,
}

impl RunState<'_> {
    fn check_cancelled(&self) -> Result<(), ExecutionError> {
        if self.cancel.is_cancelled() { Err(ExecutionError::Cancelled) } else { Ok(()) }
    }

    fn notify(&self, f: impl FnOnce(&mut dyn ExecutionObserver)) {
        let mut observer = self.observer.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut **observer);
    }
}

/// Values visible to the nodes of one graph invocation.
struct Frame<'a> {
    graph: &'a Graph,
    values: &'a [Option<Value>],
    captures: &'a HashMap<String, Value>,
    depth: usize,
}

impl Frame<'_> {
    /// Looks a name up in this graph first, then in the enclosing scopes.
    fn lookup(&self, name: &str) -> Option<Value> {
        self.graph
            .tensor_id(name)
            .and_then(|id| self.values[id].clone())
            .or_else(|| self.captures.get(name).cloned())
    }
}

/// What a kernel sees of the running executor.
pub struct KernelContext<'a, 'r> {
    run: &'a RunState<'r>,
    frame: &'a Frame<'a>,
    node: &'a Node,
}

impl KernelContext<'_, '_> {
    pub fn node(&self) -> &Node {
        self.node
    }

    pub fn graph(&self) -> &Graph {
        self.frame.graph
    }

    pub fn buffers(&self) -> &BufferManager {
        &self.run.buffers
    }

    pub fn config(&self) -> &ExecutorConfig {
        self.run.config
    }

    /// Nesting level of the graph the node belongs to.
    pub fn depth(&self) -> usize {
        self.frame.depth
    }

    /// A zero-filled tensor drawn from the run's buffer pool.
    pub fn allocate(&self, shape: &[usize], dtype: DType) -> Result<NumericTensor, KernelError> {
        Ok(self.run.buffers.allocate(shape, dtype)?)
    }

    pub fn check_cancelled(&self) -> Result<(), KernelError> {
        if self.run.cancel.is_cancelled() { Err(KernelError::Cancelled) } else { Ok(()) }
    }

    /// Runs a control-flow body with positional `inputs`. Names the body reads from enclosing
    /// scopes are bound from the values visible to this node.
    pub fn run_subgraph(&self, graph: &Graph, inputs: Vec<Value>) -> Result<Vec<Value>, KernelError> {
        let mut captures = HashMap::with_capacity(graph.captures().len());
        for &id in graph.captures() {
            let name = graph.tensor_name(id);
            let value = self
                .frame
                .lookup(name)
                .ok_or_else(|| KernelError::MissingCapture(name.to_string()))?;
            captures.insert(name.to_string(), value);
        }
        let inputs = inputs.into_iter().map(Some).collect();
        run_graph(self.run, graph, inputs, &captures, self.frame.depth + 1)
            .map_err(|e| KernelError::Subgraph(Box::new(e)))
    }
}

/// Executes graphs against a frozen operator registry.
#[derive(Debug, Clone)]
pub struct Executor {
    registry: Arc<OperatorRegistry>,
    config: ExecutorConfig,
}

impl Executor {
    pub fn new(registry: Arc<OperatorRegistry>) -> Self {
        Self::with_config(registry, ExecutorConfig::default())
    }

    pub fn with_config(registry: Arc<OperatorRegistry>, config: ExecutorConfig) -> Self {
        Self { registry, config }
    }

    /// An executor over the process-wide registry.
    pub fn with_builtins(config: ExecutorConfig) -> Result<Self, RegistryError> {
        Ok(Self::with_config(registry::global()?, config))
    }

    pub fn registry(&self) -> &OperatorRegistry {
        &self.registry
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn execute(&self, graph: &Graph, inputs: HashMap<String, Value>) -> Result<GraphOutputs, ExecutionError> {
        self.execute_with(graph, inputs, &mut (), &CancellationToken::new())
    }

    /// Runs `graph` on named inputs. Names the graph does not declare are ignored.
    pub fn execute_with(
        &self,
        graph: &Graph,
        mut inputs: HashMap<String, Value>,
        observer: &mut impl ExecutionObserver,
        cancel: &CancellationToken,
    ) -> Result<GraphOutputs, ExecutionError> {
        check_supported(&self.registry, graph)?;
        let positional: Vec<Option<Value>> = graph
            .inputs()
            .iter()
            .map(|id| inputs.remove(graph.tensor_name(*id)))
            .collect();
        for name in inputs.keys() {
            warn!("Ignoring input \"{name}\", which graph \"{}\" does not declare", graph.name());
        }

        let run = RunState {
            registry: &self.registry,
            config: &self.config,
            buffers: BufferManager::new(self.config.memory_budget_bytes),
            cancel,
            observer: Mutex::new(observer as &mut dyn ExecutionObserver),
        };
        let values = run_graph(&run, graph, positional, &HashMap::new(), 0)?;
        let stats = run.buffers.stats();
        debug!(
            "Executed graph \"{}\": peak {} bytes live, {} allocations, {} reused",
            graph.name(),
            stats.peak_bytes,
            stats.allocations,
            stats.reuse_hits
        );
        let outputs = graph.output_names().into_iter().map(String::from).zip(values).collect();
        Ok(GraphOutputs { outputs, stats })
    }
}

/// Fails with the first operator, in this graph or any nested body, that has no registered
/// implementation for its opset version.
fn check_supported(registry: &OperatorRegistry, graph: &Graph) -> Result<(), UnsupportedOperatorError> {
    for node in graph.nodes() {
        registry.lookup_op(&node.op)?;
        for subgraph in node.attributes.subgraphs() {
            check_supported(registry, subgraph)?;
        }
    }
    Ok(())
}

fn check_type(name: &str, expected: Option<&ValueType>, value: &Value) -> Result<(), ExecutionError> {
    let Some(expected) = expected else {
        return Ok(());
    };
    let actual = value.value_type();
    if expected.accepts(&actual) {
        Ok(())
    } else {
        Err(ExecutionError::TypeMismatch {
            name: name.to_string(),
            expected: expected.clone(),
            actual,
        })
    }
}

/// Binds graph inputs (falling back to their initializer defaults), initializers and captured
/// outer values into a fresh value table.
fn bind_values(
    run: &RunState,
    graph: &Graph,
    inputs: Vec<Option<Value>>,
    captures: &HashMap<String, Value>,
) -> Result<Vec<Option<Value>>, ExecutionError> {
    let mut values: Vec<Option<Value>> = vec![None; graph.tensors().len()];
    let mut inputs = inputs.into_iter();
    for &id in graph.inputs() {
        let name = graph.tensor_name(id);
        let value = match (inputs.next().flatten(), graph.initializer(id)) {
            (Some(value), _) => value,
            (None, Some(default)) => Value::Tensor(default.clone()),
            (None, None) => return Err(ExecutionError::MissingInput(name.to_string())),
        };
        if run.config.validate_types {
            check_type(name, graph.tensor(id).declared_type.as_ref(), &value)?;
        }
        values[id] = Some(value);
    }
    for (id, tensor) in graph.initializers() {
        if values[*id].is_none() {
            values[*id] = Some(Value::Tensor(tensor.clone()));
        }
    }
    for &id in graph.captures() {
        values[id] = captures.get(graph.tensor_name(id)).cloned();
    }
    Ok(values)
}

struct Computed {
    outputs: Vec<Value>,
    start_instant: Instant,
    end_instant: Instant,
}

fn compute_node(run: &RunState, frame: &Frame, node_id: NodeId) -> Result<Computed, ExecutionError> {
    run.check_cancelled()?;
    let node = frame.graph.node(node_id);
    let entry = run.registry.lookup_op(&node.op)?;
    let inputs = node
        .inputs
        .iter()
        .map(|slot| match slot {
            None => Ok(None),
            Some(id) => frame.values[*id]
                .clone()
                .map(Some)
                .ok_or_else(|| ExecutionError::UnresolvedTensor(frame.graph.tensor_name(*id).to_string())),
        })
        .collect::<Result<Vec<_>, _>>()?;
    trace!("Executing node \"{}\" ({}) at depth {}", node.name, node.op, frame.depth);
    let ctx = KernelContext { run, frame, node };
    let start_instant = Instant::now();
    let outputs = entry
        .kernel()
        .compute(&ctx, &inputs, &node.attributes)
        .map_err(|e| kernel_failure(node, e))?;
    Ok(Computed {
        outputs,
        start_instant,
        end_instant: Instant::now(),
    })
}

/// The parts of a graph invocation that stay fixed while its nodes are committed.
struct Invocation<'a> {
    graph: &'a Graph,
    plan: &'a ExecutionPlan,
    types: Option<&'a GraphTypes>,
    depth: usize,
}

/// Stores a node's outputs and releases every tensor whose last use was this node.
fn commit(
    run: &RunState,
    invocation: &Invocation,
    values: &mut [Option<Value>],
    node_id: NodeId,
    computed: Computed,
) -> Result<(), ExecutionError> {
    let Invocation {
        graph,
        plan,
        types,
        depth,
    } = *invocation;
    let node = graph.node(node_id);
    // Trailing outputs the node does not bind may be left out by the kernel.
    let required = node.outputs.iter().rposition(Option::is_some).map_or(0, |i| i + 1);
    if computed.outputs.len() < required {
        return Err(kernel_failure(
            node,
            KernelError::OutputCount {
                expected: required,
                actual: computed.outputs.len(),
            },
        ));
    }
    run.notify(|o| o.on_node_executed(node, depth, computed.start_instant, computed.end_instant));

    for (slot, value) in node.outputs.iter().zip(computed.outputs) {
        let Some(id) = *slot else { continue };
        let name = graph.tensor_name(id);
        if run.config.validate_types {
            let expected = types
                .and_then(|t| t.value_type(id))
                .or(graph.tensor(id).declared_type.as_ref());
            check_type(name, expected, &value)?;
        }
        run.buffers.track(&value)?;
        run.notify(|o| o.on_value_produced(name, depth, &value));
        values[id] = Some(value);
    }

    for &id in plan.releases_after(plan.step_of(node_id)) {
        if let Some(value) = values[id].take() {
            trace!("Releasing \"{}\"", graph.tensor_name(id));
            run.buffers.release(value);
        }
    }
    Ok(())
}

fn run_graph(
    run: &RunState,
    graph: &Graph,
    inputs: Vec<Option<Value>>,
    captures: &HashMap<String, Value>,
    depth: usize,
) -> Result<Vec<Value>, ExecutionError> {
    if depth > run.config.max_subgraph_depth {
        return Err(ExecutionError::SubgraphDepthExceeded(run.config.max_subgraph_depth));
    }
    run.check_cancelled()?;
    let plan = graph.plan()?;
    let mut values = bind_values(run, graph, inputs, captures)?;

    let types = if run.config.infer_shapes {
        let input_types: Vec<Option<ValueType>> = graph
            .inputs()
            .iter()
            .map(|id| values[*id].as_ref().map(Value::value_type))
            .collect();
        let types = infer_graph(graph, run.registry, &input_types, captures)?;
        if let Some(peak) = plan.slots().estimate_peak_bytes(|t| types.concrete_size_bytes(t)) {
            debug!("Graph \"{}\" needs an estimated {peak} bytes for intermediates", graph.name());
        }
        Some(types)
    } else {
        None
    };

    let invocation = Invocation {
        graph,
        plan,
        types: types.as_ref(),
        depth,
    };
    for level in plan.levels() {
        if run.config.parallel && level.len() > 1 {
            let frame = Frame {
                graph,
                values: &values,
                captures,
                depth,
            };
            let results: Vec<Result<Computed, ExecutionError>> =
                level.par_iter().map(|&node_id| compute_node(run, &frame, node_id)).collect();
            for (&node_id, result) in level.iter().zip(results) {
                commit(run, &invocation, &mut values, node_id, result?)?;
            }
        } else {
            for &node_id in level {
                let computed = {
                    let frame = Frame {
                        graph,
                        values: &values,
                        captures,
                        depth,
                    };
                    compute_node(run, &frame, node_id)?
                };
                commit(run, &invocation, &mut values, node_id, computed)?;
            }
        }
    }

    let mut outputs = Vec::with_capacity(graph.outputs().len());
    let mut untracked: HashSet<TensorId> = HashSet::new();
    for &id in graph.outputs() {
        let value = values[id]
            .clone()
            .ok_or_else(|| ExecutionError::UnresolvedTensor(graph.tensor_name(id).to_string()))?;
        if graph.producer(id).is_some() && untracked.insert(id) {
            run.buffers.untrack(&value);
        }
        outputs.push(value);
    }
    Ok(outputs)
}
