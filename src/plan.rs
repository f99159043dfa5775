use crate::graph::{Graph, NodeId, TensorId};
use log::debug;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Graph \"{graph}\" contains a cycle; unschedulable nodes: {unscheduled:?}")]
pub struct CyclicGraphError {
    pub graph: String,
    pub unscheduled: Vec<String>,
}

/// Steps during which a node-produced tensor must stay alive. Both ends are inclusive
/// step indices into [`ExecutionPlan::order`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Liveness {
    pub first_use: usize,
    pub last_use: usize,
    /// Graph outputs are never released and live to the end of the run.
    pub is_graph_output: bool,
}

impl Liveness {
    pub fn overlaps(&self, other: &Liveness) -> bool {
        !(self.last_use < other.first_use || other.last_use < self.first_use)
    }
}

/// Static assignment of tensors to reusable buffer slots. Two tensors share a slot only
/// if the live interval of one ends strictly before the other's begins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotAssignment {
    pub slots: HashMap<TensorId, usize>,
    pub slot_count: usize,
}

impl SlotAssignment {
    /// Greedy interval colouring in order of first use, taking the lowest free slot.
    pub fn assign(intervals: &[(TensorId, Liveness)]) -> Self {
        let mut sorted: Vec<&(TensorId, Liveness)> = intervals.iter().collect();
        sorted.sort_by_key(|(id, l)| (l.first_use, *id));
        let mut slot_busy_until: Vec<usize> = Vec::new();
        let mut slots = HashMap::new();
        for (id, liveness) in sorted {
            let slot = match slot_busy_until.iter().position(|&busy| busy < liveness.first_use) {
                Some(slot) => {
                    slot_busy_until[slot] = liveness.last_use;
                    slot
                }
                None => {
                    slot_busy_until.push(liveness.last_use);
                    slot_busy_until.len() - 1
                }
            };
            slots.insert(*id, slot);
        }
        Self {
            slot_count: slot_busy_until.len(),
            slots,
        }
    }

    pub fn slot(&self, tensor: TensorId) -> Option<usize> {
        self.slots.get(&tensor).copied()
    }

    /// Peak bytes if every slot is sized for its largest tenant. `None` when any size is unknown.
    pub fn estimate_peak_bytes(&self, size_of: impl Fn(TensorId) -> Option<usize>) -> Option<usize> {
        let mut slot_sizes = vec![0usize; self.slot_count];
        for (tensor, slot) in &self.slots {
            let size = size_of(*tensor)?;
            slot_sizes[*slot] = slot_sizes[*slot].max(size);
        }
        slot_sizes.iter().try_fold(0usize, |acc, size| acc.checked_add(*size))
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    order: Vec<NodeId>,
    levels: Vec<Vec<NodeId>>,
    node_level: Vec<usize>,
    node_step: Vec<usize>,
    liveness: HashMap<TensorId, Liveness>,
    releases: Vec<Vec<TensorId>>,
    slots: SlotAssignment,
}

impl ExecutionPlan {
    /// Orders the nodes of `graph` in dependency waves (Kahn's algorithm). Within a wave nodes
    /// keep their declaration order, so the order is deterministic.
    pub fn build(graph: &Graph) -> Result<Self, CyclicGraphError> {
        let nodes = graph.nodes();
        let mut dependencies: Vec<BTreeSet<NodeId>> = vec![BTreeSet::new(); nodes.len()];
        let mut dependents: Vec<BTreeSet<NodeId>> = vec![BTreeSet::new(); nodes.len()];
        for (node_id, node) in nodes.iter().enumerate() {
            for tensor in node.dependencies() {
                if let Some(producer) = graph.producer(tensor) {
                    dependencies[node_id].insert(producer);
                    dependents[producer].insert(node_id);
                }
            }
        }

        let mut remaining: Vec<usize> = dependencies.iter().map(|d| d.len()).collect();
        let mut wave: Vec<NodeId> = (0..nodes.len()).filter(|&n| remaining[n] == 0).collect();
        let mut levels = Vec::new();
        let mut node_level = vec![usize::MAX; nodes.len()];
        while !wave.is_empty() {
            let mut next = BTreeSet::new();
            for &node_id in &wave {
                node_level[node_id] = levels.len();
                for &dependent in &dependents[node_id] {
                    remaining[dependent] -= 1;
                    if remaining[dependent] == 0 {
                        next.insert(dependent);
                    }
                }
            }
            levels.push(wave);
            wave = next.into_iter().collect();
        }

        let order: Vec<NodeId> = levels.iter().flatten().copied().collect();
        if order.len() != nodes.len() {
            let unscheduled = (0..nodes.len())
                .filter(|n| node_level[*n] == usize::MAX)
                .map(|n| nodes[n].name.clone())
                .collect();
            return Err(CyclicGraphError {
                graph: graph.name().to_string(),
                unscheduled,
            });
        }

        let mut node_step = vec![0; nodes.len()];
        for (step, node_id) in order.iter().enumerate() {
            node_step[*node_id] = step;
        }

        let end = order.len();
        let mut liveness: HashMap<TensorId, Liveness> = HashMap::new();
        for (step, node_id) in order.iter().enumerate() {
            for tensor in nodes[*node_id].outputs.iter().flatten() {
                liveness.insert(
                    *tensor,
                    Liveness {
                        first_use: step,
                        last_use: step,
                        is_graph_output: false,
                    },
                );
            }
        }
        for (step, node_id) in order.iter().enumerate() {
            for tensor in nodes[*node_id].dependencies() {
                if let Some(l) = liveness.get_mut(&tensor) {
                    l.last_use = l.last_use.max(step);
                }
            }
        }
        for tensor in graph.outputs() {
            if let Some(l) = liveness.get_mut(tensor) {
                l.last_use = end;
                l.is_graph_output = true;
            }
        }

        let mut releases = vec![Vec::new(); order.len()];
        let mut intervals: Vec<(TensorId, Liveness)> = liveness.iter().map(|(t, l)| (*t, *l)).collect();
        intervals.sort_by_key(|(t, _)| *t);
        for (tensor, l) in &intervals {
            if !l.is_graph_output {
                releases[l.last_use].push(*tensor);
            }
        }
        let slots = SlotAssignment::assign(&intervals);

        debug!(
            "Planned graph \"{}\": {} nodes in {} levels, {} tensors in {} slots",
            graph.name(),
            order.len(),
            levels.len(),
            intervals.len(),
            slots.slot_count
        );

        Ok(Self {
            order,
            levels,
            node_level,
            node_step,
            liveness,
            releases,
            slots,
        })
    }

    /// Node ids in execution order.
    pub fn order(&self) -> &[NodeId] {
        &self.order
    }

    /// Groups of mutually independent nodes; level `k` only depends on levels below `k`.
    pub fn levels(&self) -> &[Vec<NodeId>] {
        &self.levels
    }

    pub fn level_of(&self, node: NodeId) -> usize {
        self.node_level[node]
    }

    pub fn step_of(&self, node: NodeId) -> usize {
        self.node_step[node]
    }

    pub fn liveness(&self, tensor: TensorId) -> Option<&Liveness> {
        self.liveness.get(&tensor)
    }

    /// Tensors whose last use is the given step and which may be released after it.
    pub fn releases_after(&self, step: usize) -> &[TensorId] {
        self.releases.get(step).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn slots(&self) -> &SlotAssignment {
        &self.slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::DType;
    use crate::graph::GraphBuilder;
    use crate::types::ValueType;

    fn live(first_use: usize, last_use: usize) -> Liveness {
        Liveness {
            first_use,
            last_use,
            is_graph_output: false,
        }
    }

    #[test]
    fn chain_is_planned_in_levels() {
        let mut builder = GraphBuilder::new("g");
        builder.input("a", ValueType::tensor(DType::F32, &[2]));
        builder.input("b", ValueType::tensor(DType::F32, &[2]));
        // Declared out of order on purpose.
        builder.node("Mul", &["c", "c"], &["d"]);
        builder.node("Add", &["a", "b"], &["c"]);
        builder.node("Neg", &["a"], &["e"]);
        builder.output("d");
        builder.output("e");
        let graph = builder.build().unwrap();
        let plan = graph.plan().unwrap();
        assert_eq!(plan.levels(), &[vec![1, 2], vec![0]]);
        assert_eq!(plan.order(), &[1, 2, 0]);

        let c = graph.tensor_id("c").unwrap();
        let d = graph.tensor_id("d").unwrap();
        assert_eq!(plan.liveness(c), Some(&live(0, 2)));
        assert!(plan.liveness(d).unwrap().is_graph_output);
        assert_eq!(plan.releases_after(2), &[c]);
        assert!(plan.releases_after(0).is_empty());
    }

    #[test]
    fn unused_outputs_are_released_at_their_producer() {
        let mut builder = GraphBuilder::new("g");
        builder.input("a", ValueType::tensor(DType::F32, &[4]));
        builder.node("Split", &["a"], &["x", "unused"]);
        builder.output("x");
        let graph = builder.build().unwrap();
        let plan = graph.plan().unwrap();
        let unused = graph.tensor_id("unused").unwrap();
        assert_eq!(plan.releases_after(0), &[unused]);
    }

    #[test]
    fn cycles_are_reported() {
        let mut builder = GraphBuilder::new("cyclic");
        builder.input("a", ValueType::tensor(DType::F32, &[1]));
        builder.node("Add", &["a", "y"], &["x"]).name("first");
        builder.node("Neg", &["x"], &["y"]).name("second");
        builder.node("Neg", &["a"], &["z"]).name("free");
        builder.output("z");
        let graph = builder.build().unwrap();
        let err = graph.plan().unwrap_err();
        assert_eq!(err.unscheduled, vec!["first".to_string(), "second".to_string()]);
        // The failure is cached with the graph.
        assert_eq!(graph.plan().unwrap_err(), err);
    }

    #[test]
    fn adjacent_intervals_share_a_slot() {
        let assignment = SlotAssignment::assign(&[(0, live(0, 3)), (1, live(4, 5))]);
        assert_eq!(assignment.slot(0), assignment.slot(1));
        assert_eq!(assignment.slot_count, 1);
    }

    #[test]
    fn overlapping_intervals_never_share() {
        let assignment = SlotAssignment::assign(&[(0, live(0, 3)), (1, live(3, 5)), (2, live(1, 2))]);
        assert_ne!(assignment.slot(0), assignment.slot(1));
        assert_ne!(assignment.slot(0), assignment.slot(2));
        // 2 ends before 1 starts.
        assert_eq!(assignment.slot(2), assignment.slot(1));
        assert_eq!(assignment.slot_count, 2);
    }

    #[test]
    fn peak_estimate_uses_largest_tenant() {
        let assignment = SlotAssignment::assign(&[(0, live(0, 1)), (1, live(2, 3)), (2, live(0, 3))]);
        let sizes = [16usize, 64, 8];
        assert_eq!(assignment.estimate_peak_bytes(|t| Some(sizes[t])), Some(72));
        assert_eq!(assignment.estimate_peak_bytes(|t| if t == 2 { None } else { Some(1) }), None);
    }
}
