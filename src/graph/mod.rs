//! Directed dependency graph over extracted units.
//!
//! Nodes are keyed by unit identifier. Every dependency becomes an edge from
//! the unit to the dependency's target string, whether or not a unit with
//! that identifier exists: the builder is permissive and keeps dangling
//! edges so references to things outside the indexed set (a gem class, an
//! unloaded constant) are not lost. Algorithms that need a closed graph use
//! [`DependencyGraph::known_edges_from`], which filters to known targets.
//!
//! There is at most one edge per `source -> target` pair; the first
//! dependency seen for a pair decides the edge's kind and `via` label.

use crate::unit::{DependencyKind, ExtractedUnit, UnitType};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNode {
    #[serde(rename = "type")]
    pub unit_type: UnitType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphEdge {
    pub target: String,
    /// Unknown for graphs restored from [`GraphData`]
    pub kind: Option<DependencyKind>,
    pub via: Option<String>,
}

/// Serializable shape handed to renderers and sinks:
/// `{nodes: {id: {type, file_path?, namespace?}}, edges: {source: [target, ...]}}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphData {
    pub nodes: BTreeMap<String, GraphNode>,
    pub edges: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: BTreeMap<String, GraphNode>,
    edges: HashMap<String, Vec<GraphEdge>>,
    reverse: HashMap<String, Vec<String>>,
    file_map: BTreeMap<PathBuf, Vec<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build(units: &[ExtractedUnit]) -> Self {
        let mut graph = Self::new();
        for unit in units {
            graph.register(unit);
        }
        tracing::info!(
            "Dependency graph built: {} nodes, {} edges ({} dangling)",
            graph.node_count(),
            graph.edge_count(),
            graph.dangling_edge_count()
        );
        graph
    }

    /// Add a unit's node and its edges. A second unit with an already
    /// registered identifier is ignored; returns whether the unit was added.
    pub fn register(&mut self, unit: &ExtractedUnit) -> bool {
        if self.nodes.contains_key(&unit.identifier) {
            tracing::debug!("Ignoring duplicate graph node {}", unit.identifier);
            return false;
        }
        self.nodes.insert(
            unit.identifier.clone(),
            GraphNode {
                unit_type: unit.unit_type,
                file_path: unit.file_path.clone(),
                namespace: unit.namespace.clone(),
            },
        );
        if let Some(path) = &unit.file_path {
            self.file_map
                .entry(path.clone())
                .or_default()
                .push(unit.identifier.clone());
        }
        for dependency in unit.dependencies() {
            self.add_edge(
                &unit.identifier,
                GraphEdge {
                    target: dependency.target.clone(),
                    kind: Some(dependency.kind),
                    via: Some(dependency.via.clone()),
                },
            );
        }
        true
    }

    fn add_edge(&mut self, source: &str, edge: GraphEdge) {
        let out = self.edges.entry(source.to_string()).or_default();
        if out.iter().any(|e| e.target == edge.target) {
            return;
        }
        self.reverse
            .entry(edge.target.clone())
            .or_default()
            .push(source.to_string());
        out.push(edge);
    }

    pub fn node(&self, identifier: &str) -> Option<&GraphNode> {
        self.nodes.get(identifier)
    }

    /// True for registered nodes and for dangling edge targets
    pub fn contains(&self, identifier: &str) -> bool {
        self.is_known(identifier) || self.reverse.contains_key(identifier)
    }

    /// True only for identifiers of registered units
    pub fn is_known(&self, identifier: &str) -> bool {
        self.nodes.contains_key(identifier)
    }

    /// Registered identifiers in ascending order
    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// All edges, dangling ones included
    pub fn edge_count(&self) -> usize {
        self.edges.values().map(Vec::len).sum()
    }

    pub fn dangling_edge_count(&self) -> usize {
        self.edges
            .values()
            .flatten()
            .filter(|e| !self.is_known(&e.target))
            .count()
    }

    /// Outgoing edges in dependency order, dangling ones included
    pub fn edges_from(&self, identifier: &str) -> &[GraphEdge] {
        self.edges.get(identifier).map_or(&[], Vec::as_slice)
    }

    /// Targets of outgoing edges that point at registered units
    pub fn known_edges_from(&self, identifier: &str) -> Vec<&str> {
        self.edges_from(identifier)
            .iter()
            .map(|e| e.target.as_str())
            .filter(|t| self.is_known(t))
            .collect()
    }

    pub fn edge_via(&self, source: &str, target: &str) -> Option<&str> {
        self.edges_from(source)
            .iter()
            .find(|e| e.target == target)
            .and_then(|e| e.via.as_deref())
    }

    /// Every target the unit depends on, in dependency order
    pub fn dependencies_of(&self, identifier: &str) -> Vec<&str> {
        self.edges_from(identifier).iter().map(|e| e.target.as_str()).collect()
    }

    /// Registered units with an edge into `identifier`, in registration order
    pub fn dependents_of(&self, identifier: &str) -> Vec<&str> {
        self.reverse
            .get(identifier)
            .map(|sources| {
                sources
                    .iter()
                    .map(String::as_str)
                    .filter(|s| self.is_known(s))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn units_of_type(&self, unit_type: UnitType) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|(_, node)| node.unit_type == unit_type)
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// Edge targets that are not registered units
    pub fn dangling_targets(&self) -> BTreeSet<&str> {
        self.edges
            .values()
            .flatten()
            .map(|e| e.target.as_str())
            .filter(|t| !self.is_known(t))
            .collect()
    }

    /// Source file to the identifiers of the units it defines
    pub fn file_map(&self) -> &BTreeMap<PathBuf, Vec<String>> {
        &self.file_map
    }

    /// Units defined in `changed_files` plus everything that transitively
    /// depends on them
    pub fn affected_by<P: AsRef<Path>>(&self, changed_files: &[P]) -> BTreeSet<String> {
        let seeds = changed_files
            .iter()
            .filter_map(|file| self.file_map.get(file.as_ref()))
            .flatten()
            .map(String::as_str);
        self.walk_dependents(seeds)
    }

    /// Units among `identifiers` plus everything that transitively depends
    /// on them. An identifier that is no longer registered, such as a removed
    /// unit, is left out itself but still reaches its dependents through the
    /// dangling edges that point at it.
    pub fn affected_by_ids<S: AsRef<str>>(&self, identifiers: &[S]) -> BTreeSet<String> {
        self.walk_dependents(identifiers.iter().map(AsRef::as_ref))
    }

    fn walk_dependents<'a>(&'a self, seeds: impl Iterator<Item = &'a str>) -> BTreeSet<String> {
        let mut affected = BTreeSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        for seed in seeds {
            if self.is_known(seed) {
                queue.push_back(seed);
            } else {
                queue.extend(self.dependents_of(seed));
            }
        }
        while let Some(id) = queue.pop_front() {
            if !affected.insert(id.to_string()) {
                continue;
            }
            queue.extend(self.dependents_of(id));
        }
        affected
    }

    /// PageRank over known edges. Nodes without known outgoing edges spread
    /// their rank evenly; iteration order is fixed so results are repeatable.
    pub fn pagerank(&self, damping: f64, iterations: usize) -> BTreeMap<String, f64> {
        let n = self.nodes.len();
        if n == 0 {
            return BTreeMap::new();
        }
        let ids: Vec<&str> = self.identifiers().collect();
        let index: HashMap<&str, usize> = ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        let out: Vec<Vec<usize>> = ids
            .iter()
            .map(|id| {
                self.known_edges_from(id)
                    .into_iter()
                    .filter_map(|t| index.get(t).copied())
                    .collect()
            })
            .collect();

        let base = (1.0 - damping) / n as f64;
        let mut rank = vec![1.0 / n as f64; n];
        for _ in 0..iterations {
            let sink_mass: f64 = out
                .iter()
                .zip(&rank)
                .filter(|(targets, _)| targets.is_empty())
                .map(|(_, r)| r)
                .sum();
            let mut next = vec![base + damping * sink_mass / n as f64; n];
            for (source, targets) in out.iter().enumerate() {
                if targets.is_empty() {
                    continue;
                }
                let share = damping * rank[source] / targets.len() as f64;
                for &target in targets {
                    next[target] += share;
                }
            }
            rank = next;
        }

        ids.into_iter().map(str::to_string).zip(rank).collect()
    }

    pub fn to_data(&self) -> GraphData {
        let edges: BTreeMap<String, Vec<String>> = self
            .nodes
            .keys()
            .filter_map(|id| {
                let targets: Vec<String> = self.dependencies_of(id).into_iter().map(str::to_string).collect();
                (!targets.is_empty()).then(|| (id.clone(), targets))
            })
            .collect();
        GraphData {
            nodes: self.nodes.clone(),
            edges,
        }
    }

    /// Rebuild from exported data; edge kinds and `via` labels are not part
    /// of the export and come back as `None`
    pub fn from_data(data: &GraphData) -> Self {
        let mut graph = Self::new();
        for (id, node) in &data.nodes {
            graph.nodes.insert(id.clone(), node.clone());
            if let Some(path) = &node.file_path {
                graph.file_map.entry(path.clone()).or_default().push(id.clone());
            }
        }
        for (source, targets) in &data.edges {
            if !graph.is_known(source) {
                tracing::warn!("Skipping edges of unknown source {}", source);
                continue;
            }
            for target in targets {
                graph.add_edge(
                    source,
                    GraphEdge {
                        target: target.clone(),
                        kind: None,
                        via: None,
                    },
                );
            }
        }
        graph
    }

    /// Known nodes only, each with its known targets
    pub(crate) fn closed_adjacency(&self) -> BTreeMap<&str, Vec<&str>> {
        self.identifiers()
            .map(|id| (id, self.known_edges_from(id)))
            .collect()
    }

    /// Count of known units with an edge into each known node
    pub(crate) fn known_in_degrees(&self) -> HashMap<&str, usize> {
        let mut degrees: HashMap<&str, usize> = self.identifiers().map(|id| (id, 0)).collect();
        for targets in self.closed_adjacency().into_values() {
            for target in targets {
                if let Some(count) = degrees.get_mut(target) {
                    *count += 1;
                }
            }
        }
        degrees
    }
}
