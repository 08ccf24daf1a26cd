//! Structural analysis over a [`DependencyGraph`].
//!
//! Every analysis runs on the closed subgraph: only edges whose target is a
//! registered unit count towards degrees and cycles. Results are ordered
//! deterministically so reports diff cleanly between runs.

use crate::graph::DependencyGraph;
use crate::unit::UnitType;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

pub const DEFAULT_HUB_LIMIT: usize = 10;
pub const DEFAULT_MAX_CYCLES: usize = 100;

#[derive(Debug, Clone, Copy)]
pub struct AnalysisOptions {
    pub hub_limit: usize,
    pub max_cycles: usize,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            hub_limit: DEFAULT_HUB_LIMIT,
            max_cycles: DEFAULT_MAX_CYCLES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hub {
    pub identifier: String,
    #[serde(rename = "type")]
    pub unit_type: UnitType,
    pub dependent_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisStats {
    pub orphan_count: usize,
    pub dead_end_count: usize,
    pub hub_count: usize,
    pub cycle_count: usize,
    pub node_count: usize,
    pub edge_count: usize,
    pub dangling_edge_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphAnalysisReport {
    pub orphans: Vec<String>,
    pub dead_ends: Vec<String>,
    pub hubs: Vec<Hub>,
    /// Each cycle starts at its smallest identifier; the closing edge from
    /// the last element back to the first is implied
    pub cycles: Vec<Vec<String>>,
    pub stats: AnalysisStats,
}

pub struct GraphAnalyzer<'g> {
    graph: &'g DependencyGraph,
    adjacency: BTreeMap<&'g str, Vec<&'g str>>,
    in_degree: HashMap<&'g str, usize>,
}

impl<'g> GraphAnalyzer<'g> {
    pub fn new(graph: &'g DependencyGraph) -> Self {
        Self {
            graph,
            adjacency: graph.closed_adjacency(),
            in_degree: graph.known_in_degrees(),
        }
    }

    fn in_degree(&self, id: &str) -> usize {
        self.in_degree.get(id).copied().unwrap_or(0)
    }

    fn out_degree(&self, id: &str) -> usize {
        self.adjacency.get(id).map_or(0, Vec::len)
    }

    /// Units nothing depends on and that depend on nothing known
    pub fn orphans(&self) -> Vec<String> {
        self.adjacency
            .keys()
            .filter(|id| self.in_degree(id) == 0 && self.out_degree(id) == 0)
            .map(|id| id.to_string())
            .collect()
    }

    /// Units that are depended on but depend on nothing known
    pub fn dead_ends(&self) -> Vec<String> {
        self.adjacency
            .keys()
            .filter(|id| self.in_degree(id) > 0 && self.out_degree(id) == 0)
            .map(|id| id.to_string())
            .collect()
    }

    /// Most depended-on units, by dependent count then identifier
    pub fn hubs(&self, limit: usize) -> Vec<Hub> {
        let mut ranked: Vec<(&str, usize)> = self
            .adjacency
            .keys()
            .map(|id| (*id, self.in_degree(id)))
            .filter(|(_, count)| *count > 0)
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

        ranked
            .into_iter()
            .take(limit)
            .filter_map(|(id, count)| {
                self.graph.node(id).map(|node| Hub {
                    identifier: id.to_string(),
                    unit_type: node.unit_type,
                    dependent_count: count,
                })
            })
            .collect()
    }

    /// Distinct simple cycles found by depth-first traversal from every node,
    /// capped at `max_cycles`.
    ///
    /// Each traversal root keeps its own visited set, so a shared subgraph is
    /// explored once per root rather than once per path. This bounds the
    /// work but may miss cycles that are only reachable through a node
    /// already visited from the same root; those are usually picked up when
    /// traversal starts from one of their own members.
    pub fn cycles(&self, max_cycles: usize) -> Vec<Vec<String>> {
        let mut found: Vec<Vec<String>> = Vec::new();
        let mut seen: HashSet<Vec<&str>> = HashSet::new();
        if max_cycles == 0 {
            return found;
        }

        for &root in self.adjacency.keys() {
            let mut visited: HashSet<&str> = HashSet::from([root]);
            let mut path: Vec<&str> = vec![root];
            let mut on_path: HashMap<&str, usize> = HashMap::from([(root, 0)]);
            // (node, index of the next child to visit)
            let mut stack: Vec<(&str, usize)> = vec![(root, 0)];

            while let Some(&(node, next_child)) = stack.last() {
                let children = self.adjacency.get(node).map_or(&[][..], Vec::as_slice);
                let Some(&child) = children.get(next_child) else {
                    stack.pop();
                    path.pop();
                    on_path.remove(node);
                    continue;
                };
                if let Some(top) = stack.last_mut() {
                    top.1 += 1;
                }

                if let Some(&start) = on_path.get(child) {
                    let cycle = normalize(&path[start..]);
                    if seen.insert(cycle.clone()) {
                        found.push(cycle.into_iter().map(str::to_string).collect());
                        if found.len() >= max_cycles {
                            tracing::warn!("Cycle report truncated at {} cycles", max_cycles);
                            return found;
                        }
                    }
                } else if visited.insert(child) {
                    on_path.insert(child, path.len());
                    path.push(child);
                    stack.push((child, 0));
                }
            }
        }

        found
    }

    pub fn report(&self, options: AnalysisOptions) -> GraphAnalysisReport {
        let orphans = self.orphans();
        let dead_ends = self.dead_ends();
        let hubs = self.hubs(options.hub_limit);
        let cycles = self.cycles(options.max_cycles);

        let stats = AnalysisStats {
            orphan_count: orphans.len(),
            dead_end_count: dead_ends.len(),
            hub_count: hubs.len(),
            cycle_count: cycles.len(),
            node_count: self.graph.node_count(),
            edge_count: self.graph.edge_count(),
            dangling_edge_count: self.graph.dangling_edge_count(),
        };
        tracing::info!(
            "Graph analysis: {} orphans, {} dead ends, {} hubs, {} cycles",
            stats.orphan_count,
            stats.dead_end_count,
            stats.hub_count,
            stats.cycle_count
        );

        GraphAnalysisReport {
            orphans,
            dead_ends,
            hubs,
            cycles,
            stats,
        }
    }
}

/// Rotate so the smallest identifier comes first
fn normalize<'a>(cycle: &[&'a str]) -> Vec<&'a str> {
    let start = cycle
        .iter()
        .enumerate()
        .min_by_key(|(_, id)| **id)
        .map_or(0, |(i, _)| i);
    let mut rotated = cycle.to_vec();
    rotated.rotate_left(start);
    rotated
}
