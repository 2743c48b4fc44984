use crate::error::{RenderGraphError, Result};
use crate::handle::ResourceHandle;
use crate::resource::{ConflictKind, ResourceConflict, ResourceUsageInfo};
use petgraph::Direction;
use petgraph::algo::has_path_connecting;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap, HashMap, HashSet};
use std::time::Duration;

/// Scheduling view of a registered pass. Nodes are added in registration
/// order, so a node's index is its registration index.
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub name: String,
    pub priority: i32,
    pub always_execute: bool,
    pub dependencies: Vec<String>,
    pub usages: Vec<ResourceUsageInfo>,
    pub duration: Option<Duration>,
}

impl GraphNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            priority: 0,
            always_execute: false,
            dependencies: Vec::new(),
            usages: Vec::new(),
            duration: None,
        }
    }

    fn weight(&self) -> f64 {
        self.duration
            .map(|duration| duration.as_secs_f64() * 1000.0)
            .unwrap_or(1.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyKind {
    Explicit,
    /// The target consumes or overwrites what the source wrote.
    Resource(ResourceHandle),
    /// The target overwrites what the source still reads. Orders the passes
    /// without making the writer depend on the reader's success.
    WriteAfterRead(ResourceHandle),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CriticalPath {
    pub passes: Vec<String>,
    /// Sum of pass weights in milliseconds; unmeasured passes weigh 1.
    pub cost: f64,
}

#[derive(PartialEq, Eq)]
struct ReadyPass {
    priority: i32,
    index: NodeIndex,
}

impl Ord for ReadyPass {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.index.index().cmp(&self.index.index()))
    }
}

impl PartialOrd for ReadyPass {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

pub struct DependencyResolver {
    graph: DiGraph<GraphNode, DependencyKind>,
    indices: HashMap<String, NodeIndex>,
    unknown: Vec<(String, String)>,
    conflicts: Vec<ResourceConflict>,
}

impl DependencyResolver {
    /// Builds the pass DAG from explicit dependencies and resource hazards.
    ///
    /// Per resource, in registration order: the first writer feeds every later
    /// reader, the latest preceding writer feeds each reader, writers are
    /// chained, and readers precede later writers. Hazard edges that would
    /// contradict an explicit ordering are left out.
    pub fn build_dependency_graph(nodes: Vec<GraphNode>) -> Result<Self> {
        let mut resolver = Self {
            graph: DiGraph::new(),
            indices: HashMap::new(),
            unknown: Vec::new(),
            conflicts: Vec::new(),
        };

        for node in nodes {
            let name = node.name.clone();
            let index = resolver.graph.add_node(node);
            resolver.indices.insert(name, index);
        }

        let node_indices: Vec<NodeIndex> = resolver.graph.node_indices().collect();
        let mut explicit_edges = Vec::new();
        for &index in &node_indices {
            let node = &resolver.graph[index];
            for dependency in &node.dependencies {
                match resolver.indices.get(dependency) {
                    Some(&dependency_index) => explicit_edges.push((dependency_index, index)),
                    None => resolver
                        .unknown
                        .push((node.name.clone(), dependency.clone())),
                }
            }
        }
        for (from, to) in explicit_edges {
            if !resolver.graph.contains_edge(from, to) {
                resolver.graph.add_edge(from, to, DependencyKind::Explicit);
            }
        }

        let mut accesses: BTreeMap<u32, Vec<(NodeIndex, ResourceUsageInfo)>> = BTreeMap::new();
        for &index in &node_indices {
            for usage in &resolver.graph[index].usages {
                accesses
                    .entry(usage.handle.id())
                    .or_default()
                    .push((index, usage.clone()));
            }
        }

        for usages in accesses.values() {
            resolver.connect_resource_hazards(usages)?;
        }

        Ok(resolver)
    }

    fn connect_resource_hazards(&mut self, usages: &[(NodeIndex, ResourceUsageInfo)]) -> Result<()> {
        let mut producer: Option<NodeIndex> = None;
        let mut latest_writer: Option<NodeIndex> = None;
        let mut earlier_writes: Vec<&ResourceUsageInfo> = Vec::new();
        let mut readers_since_write: Vec<NodeIndex> = Vec::new();
        let mut writers: Vec<String> = Vec::new();
        let mut unordered_writers = false;

        for (index, usage) in usages {
            let index = *index;

            if usage.access_type.reads() {
                if let Some(producer) = producer {
                    self.connect(producer, index, DependencyKind::Resource(usage.handle.clone()));
                }
                if let Some(writer) = latest_writer {
                    self.connect(writer, index, DependencyKind::Resource(usage.handle.clone()));
                }
            }

            if usage.access_type.writes() {
                if let Some(earlier) = earlier_writes
                    .iter()
                    .find(|earlier| !earlier.required_state.is_compatible_with(usage.required_state))
                {
                    return Err(RenderGraphError::IncompatibleWriters {
                        resource: usage.handle.clone(),
                        first: earlier.pass_name.clone(),
                        second: usage.pass_name.clone(),
                        first_state: earlier.required_state,
                        second_state: usage.required_state,
                    });
                }

                if let Some(previous) = latest_writer {
                    // A read-write consumes the previous contents, so only
                    // blind writes without an explicit ordering are ambiguous.
                    let explicitly_ordered =
                        self.has_explicit_edge(previous, index) || self.reaches(index, previous);
                    if !explicitly_ordered {
                        unordered_writers |= !usage.access_type.reads();
                        self.connect(previous, index, DependencyKind::Resource(usage.handle.clone()));
                    }
                }

                for reader in readers_since_write.drain(..) {
                    self.connect(reader, index, DependencyKind::WriteAfterRead(usage.handle.clone()));
                }

                producer.get_or_insert(index);
                latest_writer = Some(index);
                earlier_writes.push(usage);
                writers.push(usage.pass_name.clone());
            }

            if usage.access_type.reads() && !usage.access_type.writes() {
                readers_since_write.push(index);
            }
        }

        if unordered_writers && let Some(usage) = earlier_writes.last() {
            log::warn!(
                "Resource {} has multiple writers ordered by registration: {}",
                usage.handle,
                writers.join(", ")
            );
            self.conflicts.push(ResourceConflict {
                kind: ConflictKind::MultipleWriters,
                resource: usage.handle.clone(),
                passes: writers,
                states: Vec::new(),
            });
        }

        Ok(())
    }

    /// Adds a hazard edge unless `to` already runs before `from`. A data edge
    /// replaces a write-after-read edge between the same passes.
    fn connect(&mut self, from: NodeIndex, to: NodeIndex, kind: DependencyKind) {
        if from == to {
            return;
        }
        if let Some(edge) = self.graph.find_edge(from, to) {
            if matches!(self.graph[edge], DependencyKind::WriteAfterRead(_))
                && matches!(kind, DependencyKind::Resource(_))
            {
                self.graph[edge] = kind;
            }
            return;
        }
        if self.reaches(to, from) {
            log::debug!(
                "Skipping hazard edge '{}' -> '{}': explicitly ordered the other way",
                self.graph[from].name,
                self.graph[to].name
            );
            return;
        }
        self.graph.add_edge(from, to, kind);
    }

    fn reaches(&self, from: NodeIndex, to: NodeIndex) -> bool {
        has_path_connecting(&self.graph, from, to, None)
    }

    fn has_explicit_edge(&self, from: NodeIndex, to: NodeIndex) -> bool {
        self.graph
            .edges_connecting(from, to)
            .any(|edge| *edge.weight() == DependencyKind::Explicit)
    }

    /// Returns one dependency cycle, or an empty list if the graph is acyclic.
    pub fn detect_cycles(&self) -> Vec<String> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            White,
            Gray,
            Black,
        }

        fn visit(
            graph: &DiGraph<GraphNode, DependencyKind>,
            index: NodeIndex,
            marks: &mut [Mark],
            path: &mut Vec<NodeIndex>,
        ) -> Option<Vec<NodeIndex>> {
            marks[index.index()] = Mark::Gray;
            path.push(index);

            let mut neighbors: Vec<NodeIndex> = graph.neighbors(index).collect();
            neighbors.sort();
            neighbors.dedup();

            for neighbor in neighbors {
                match marks[neighbor.index()] {
                    Mark::Gray => {
                        let start = path.iter().position(|&node| node == neighbor)?;
                        return Some(path[start..].to_vec());
                    }
                    Mark::White => {
                        if let Some(cycle) = visit(graph, neighbor, marks, path) {
                            return Some(cycle);
                        }
                    }
                    Mark::Black => {}
                }
            }

            path.pop();
            marks[index.index()] = Mark::Black;
            None
        }

        let mut marks = vec![Mark::White; self.graph.node_count()];
        let mut path = Vec::new();

        for index in self.graph.node_indices() {
            if marks[index.index()] == Mark::White
                && let Some(cycle) = visit(&self.graph, index, &mut marks, &mut path)
            {
                return cycle
                    .into_iter()
                    .map(|node| self.graph[node].name.clone())
                    .collect();
            }
        }

        Vec::new()
    }

    /// Passes reverse-reachable from always-execute passes and from writers of
    /// `required_resources`. Write-after-read edges do not keep a reader alive.
    pub fn cull_unused_passes(&self, required_resources: &HashSet<u32>) -> HashSet<NodeIndex> {
        let mut pending: Vec<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|&index| {
                let node = &self.graph[index];
                node.always_execute
                    || node.usages.iter().any(|usage| {
                        usage.access_type.writes() && required_resources.contains(&usage.handle.id())
                    })
            })
            .collect();

        let mut live = HashSet::new();
        while let Some(index) = pending.pop() {
            if !live.insert(index) {
                continue;
            }
            pending.extend(
                self.graph
                    .edges_directed(index, Direction::Incoming)
                    .filter(|edge| !matches!(edge.weight(), DependencyKind::WriteAfterRead(_)))
                    .map(|edge| edge.source()),
            );
        }

        live
    }

    /// Kahn's algorithm over the `live` subgraph. Ready passes are taken by
    /// priority descending, then registration index ascending.
    pub fn topological_sort(&self, live: &HashSet<NodeIndex>) -> Result<Vec<NodeIndex>> {
        let mut in_degree: HashMap<NodeIndex, usize> = live
            .iter()
            .map(|&index| {
                let degree = self
                    .graph
                    .neighbors_directed(index, Direction::Incoming)
                    .filter(|predecessor| live.contains(predecessor))
                    .collect::<HashSet<_>>()
                    .len();
                (index, degree)
            })
            .collect();

        let mut ready: BinaryHeap<ReadyPass> = in_degree
            .iter()
            .filter(|&(_, &degree)| degree == 0)
            .map(|(&index, _)| ReadyPass {
                priority: self.graph[index].priority,
                index,
            })
            .collect();

        let mut order = Vec::with_capacity(live.len());
        while let Some(ReadyPass { index, .. }) = ready.pop() {
            order.push(index);

            let successors: HashSet<NodeIndex> = self
                .graph
                .neighbors_directed(index, Direction::Outgoing)
                .filter(|successor| live.contains(successor))
                .collect();
            for successor in successors {
                if let Some(degree) = in_degree.get_mut(&successor) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push(ReadyPass {
                            priority: self.graph[successor].priority,
                            index: successor,
                        });
                    }
                }
            }
        }

        if order.len() != live.len() {
            let mut remaining: Vec<NodeIndex> = live
                .iter()
                .filter(|index| !order.contains(index))
                .copied()
                .collect();
            remaining.sort();
            return Err(RenderGraphError::CyclicDependency {
                passes: remaining
                    .into_iter()
                    .map(|index| self.graph[index].name.clone())
                    .collect(),
            });
        }

        Ok(order)
    }

    /// Longest weighted chain through `order`.
    pub fn critical_path(&self, order: &[NodeIndex]) -> CriticalPath {
        let scheduled: HashSet<NodeIndex> = order.iter().copied().collect();
        let mut cost: HashMap<NodeIndex, f64> = HashMap::new();
        let mut previous: HashMap<NodeIndex, NodeIndex> = HashMap::new();

        for &index in order {
            let mut best: Option<(NodeIndex, f64)> = None;
            for predecessor in self.predecessors(index) {
                if !scheduled.contains(&predecessor) {
                    continue;
                }
                let predecessor_cost = cost.get(&predecessor).copied().unwrap_or(0.0);
                if best.is_none_or(|(_, best_cost)| predecessor_cost > best_cost) {
                    best = Some((predecessor, predecessor_cost));
                }
            }

            let base = match best {
                Some((predecessor, predecessor_cost)) => {
                    previous.insert(index, predecessor);
                    predecessor_cost
                }
                None => 0.0,
            };
            cost.insert(index, base + self.graph[index].weight());
        }

        let mut end: Option<(NodeIndex, f64)> = None;
        for &index in order {
            let total = cost.get(&index).copied().unwrap_or(0.0);
            if end.is_none_or(|(_, best)| total > best) {
                end = Some((index, total));
            }
        }

        let Some((mut current, total)) = end else {
            return CriticalPath::default();
        };

        let mut passes = vec![self.graph[current].name.clone()];
        while let Some(&predecessor) = previous.get(&current) {
            passes.push(self.graph[predecessor].name.clone());
            current = predecessor;
        }
        passes.reverse();

        CriticalPath {
            passes,
            cost: total,
        }
    }

    pub fn validate_dependencies(&self) -> bool {
        self.unknown.is_empty() && self.detect_cycles().is_empty()
    }

    /// `(pass, dependency)` pairs naming passes that are not registered.
    pub fn unknown_dependencies(&self) -> &[(String, String)] {
        &self.unknown
    }

    /// Predecessors whose successful execution `index` relies on: explicit
    /// dependencies and writers of what it reads. Write-after-read edges only
    /// order and are left out.
    pub fn execution_dependencies(&self, index: NodeIndex) -> Vec<NodeIndex> {
        let mut dependencies: Vec<NodeIndex> = self
            .graph
            .edges_directed(index, Direction::Incoming)
            .filter(|edge| !matches!(edge.weight(), DependencyKind::WriteAfterRead(_)))
            .map(|edge| edge.source())
            .filter(|&source| source != index)
            .collect();
        dependencies.sort();
        dependencies.dedup();
        dependencies
    }

    pub fn predecessors(&self, index: NodeIndex) -> Vec<NodeIndex> {
        let mut predecessors: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(index, Direction::Incoming)
            .filter(|&predecessor| predecessor != index)
            .collect();
        predecessors.sort();
        predecessors.dedup();
        predecessors
    }

    pub fn node(&self, index: NodeIndex) -> &GraphNode {
        &self.graph[index]
    }

    pub fn node_index(&self, name: &str) -> Option<NodeIndex> {
        self.indices.get(name).copied()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn conflicts(&self) -> &[ResourceConflict] {
        &self.conflicts
    }
}
