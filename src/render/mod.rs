//! Mermaid diagrams for the dependency graph.
//!
//! Output is plain text meant for markdown rendering:
//! ```mermaid
//! flowchart LR
//!     classDef model fill:#e3f2fd,stroke:#1565c0
//!     n0["Order"]:::model
//!     n1["User"]:::model
//!     n0 --> n1
//! ```

use crate::graph::GraphData;
use crate::unit::{ExtractedUnit, UnitType};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

const EXTERNAL_CLASS: &str = "external";

#[derive(Debug, Clone, Copy)]
pub struct MermaidRenderer {
    /// Draw edges into identifiers that are not indexed units
    pub include_dangling: bool,
}

impl Default for MermaidRenderer {
    fn default() -> Self {
        Self { include_dangling: true }
    }
}

impl MermaidRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dependency_map(&self, data: &GraphData) -> String {
        let mut output = String::from("flowchart LR\n");

        let used_types: BTreeSet<UnitType> = data.nodes.values().map(|n| n.unit_type).collect();
        for unit_type in &used_types {
            output.push_str(&format!(
                "    classDef {} {}\n",
                unit_type.as_str(),
                type_style(*unit_type)
            ));
        }

        let dangling: BTreeSet<&str> = if self.include_dangling {
            data.edges
                .values()
                .flatten()
                .map(String::as_str)
                .filter(|t| !data.nodes.contains_key(*t))
                .collect()
        } else {
            BTreeSet::new()
        };
        if !dangling.is_empty() {
            output.push_str(&format!(
                "    classDef {} fill:#fafafa,stroke:#9e9e9e,stroke-dasharray:3 3\n",
                EXTERNAL_CLASS
            ));
        }

        let mut ids = NodeIds::default();
        for (identifier, node) in &data.nodes {
            output.push_str(&format!(
                "    {}[\"{}\"]:::{}\n",
                ids.get(identifier),
                escape_label(identifier),
                node.unit_type.as_str()
            ));
        }
        for identifier in &dangling {
            output.push_str(&format!(
                "    {}[\"{}\"]:::{}\n",
                ids.get(identifier),
                escape_label(identifier),
                EXTERNAL_CLASS
            ));
        }

        for (source, targets) in &data.edges {
            for target in targets {
                if !data.nodes.contains_key(target) && !self.include_dangling {
                    continue;
                }
                let from = ids.get(source);
                let to = ids.get(target);
                output.push_str(&format!("    {} --> {}\n", from, to));
            }
        }

        output
    }

    /// Pie chart of unit counts per type
    pub fn type_summary(&self, units: &[ExtractedUnit]) -> String {
        let counts = type_counts(units);
        let mut output = String::from("pie title Units by type\n");
        for (unit_type, count) in counts {
            output.push_str(&format!("    \"{}\" : {}\n", unit_type.as_str(), count));
        }
        output
    }
}

pub fn type_counts(units: &[ExtractedUnit]) -> BTreeMap<UnitType, usize> {
    let mut counts = BTreeMap::new();
    for unit in units {
        *counts.entry(unit.unit_type).or_insert(0) += 1;
    }
    counts
}

/// Stable Mermaid node ids; identifiers that sanitize to the same text get
/// a numeric suffix
#[derive(Default)]
struct NodeIds {
    assigned: HashMap<String, String>,
    taken: HashSet<String>,
}

impl NodeIds {
    fn get(&mut self, identifier: &str) -> String {
        if let Some(id) = self.assigned.get(identifier) {
            return id.clone();
        }
        let base = sanitize_id(identifier);
        let mut candidate = base.clone();
        let mut n = 2;
        while !self.taken.insert(candidate.clone()) {
            candidate = format!("{}_{}", base, n);
            n += 1;
        }
        self.assigned.insert(identifier.to_string(), candidate.clone());
        candidate
    }
}

fn sanitize_id(identifier: &str) -> String {
    // Mermaid ids must be plain words; reserved words like `end` get a prefix too
    let cleaned: String = identifier
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("n_{}", cleaned)
}

fn escape_label(label: &str) -> String {
    label
        .replace('"', "&#34;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn type_style(unit_type: UnitType) -> &'static str {
    match unit_type {
        UnitType::Model => "fill:#e3f2fd,stroke:#1565c0",
        UnitType::Controller => "fill:#e8f5e9,stroke:#2e7d32",
        UnitType::Service => "fill:#fff3e0,stroke:#ef6c00",
        UnitType::Job => "fill:#f3e5f5,stroke:#6a1b9a",
        UnitType::Mailer => "fill:#fce4ec,stroke:#ad1457",
        UnitType::Route => "fill:#e0f7fa,stroke:#00838f",
        UnitType::Middleware => "fill:#eceff1,stroke:#37474f",
        UnitType::Engine => "fill:#efebe9,stroke:#4e342e",
        UnitType::Migration => "fill:#f1f8e9,stroke:#558b2f",
        UnitType::StateMachine => "fill:#fffde7,stroke:#f9a825",
        UnitType::GraphqlType => "fill:#fbe9e7,stroke:#d84315",
        UnitType::Factory => "fill:#e8eaf6,stroke:#283593",
        UnitType::RakeTask => "fill:#f9fbe7,stroke:#9e9d24",
        UnitType::Concern => "fill:#e0f2f1,stroke:#00695c",
        UnitType::Other => "fill:#f5f5f5,stroke:#616161",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::DependencyGraph;
    use crate::unit::{via, Dependency, DependencyKind};

    fn data() -> GraphData {
        let mut controller = ExtractedUnit::new(UnitType::Controller, "Admin::OrdersController", None);
        controller.add_dependency(Dependency::new(DependencyKind::Model, "Order", via::CODE_REFERENCE));
        controller.add_dependency(Dependency::new(DependencyKind::Component, "OrderComponent", via::RENDER));
        let route = {
            let mut route = ExtractedUnit::new(UnitType::Route, "GET /admin/orders", None);
            route.add_dependency(Dependency::new(DependencyKind::Controller, "Admin::OrdersController", via::ROUTE));
            route
        };
        let order = ExtractedUnit::new(UnitType::Model, "Order", None);
        DependencyGraph::build(&[controller, route, order]).to_data()
    }

    #[test]
    fn test_dependency_map() {
        let map = MermaidRenderer::new().dependency_map(&data());
        assert!(map.starts_with("flowchart LR\n"));
        assert!(map.contains("    classDef controller "));
        assert!(map.contains("    classDef route "));
        assert!(!map.contains("classDef job"));
        assert!(map.contains("    n_Admin__OrdersController[\"Admin::OrdersController\"]:::controller\n"));
        assert!(map.contains("    n_GET__admin_orders[\"GET /admin/orders\"]:::route\n"));
        assert!(map.contains("    n_OrderComponent[\"OrderComponent\"]:::external\n"));
        assert!(map.contains("    n_GET__admin_orders --> n_Admin__OrdersController\n"));
        assert!(map.contains("    n_Admin__OrdersController --> n_Order\n"));
    }

    #[test]
    fn test_dangling_targets_can_be_hidden() {
        let renderer = MermaidRenderer { include_dangling: false };
        let map = renderer.dependency_map(&data());
        assert!(!map.contains("OrderComponent"));
        assert!(!map.contains("classDef external"));
        assert!(map.contains("n_Admin__OrdersController --> n_Order\n"));
    }

    #[test]
    fn test_colliding_ids_get_suffix() {
        let mut ids = NodeIds::default();
        assert_eq!(ids.get("A::B"), "n_A__B");
        assert_eq!(ids.get("A__B"), "n_A__B_2");
        assert_eq!(ids.get("A::B"), "n_A__B");
    }

    #[test]
    fn test_type_summary() {
        let units = vec![
            ExtractedUnit::new(UnitType::Model, "Order", None),
            ExtractedUnit::new(UnitType::Model, "User", None),
            ExtractedUnit::new(UnitType::Job, "ReceiptJob", None),
        ];
        let summary = MermaidRenderer::new().type_summary(&units);
        assert_eq!(summary, "pie title Units by type\n    \"model\" : 2\n    \"job\" : 1\n");
    }

    #[test]
    fn test_empty_graph() {
        assert_eq!(MermaidRenderer::new().dependency_map(&GraphData::default()), "flowchart LR\n");
    }
}
