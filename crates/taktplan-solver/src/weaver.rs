//! Dynamic dependency graph construction.
//!
//! Every original constraint `A -> B` is rewritten as
//! `A -> [QI(A)] -> [CC(A)] -> B`: the quality inspection, when present,
//! follows its primary immediately; the customer inspection follows the QI
//! (or the primary when there is no QI); the terminal link keeps the
//! original relationship. Inspections of tasks that are never predecessors
//! still get their chain appended so they are scheduled.

use std::collections::{HashMap, HashSet};
use taktplan_core::{Catalog, InstanceId, ProductId, Relationship};
use tracing::debug;

/// One edge of the woven precedence graph
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DynamicEdge {
    pub first: InstanceId,
    pub second: InstanceId,
    pub relationship: Relationship,
}

/// The woven graph plus adjacency indexes, cached against a catalog version
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    pub edges: Vec<DynamicEdge>,
    successors: HashMap<InstanceId, Vec<usize>>,
    predecessors: HashMap<InstanceId, Vec<usize>>,
    version: u64,
}

impl DependencyGraph {
    /// Catalog version this graph was derived from
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn successors_of<'a>(&'a self, id: &str) -> impl Iterator<Item = &'a DynamicEdge> {
        self.successors
            .get(id)
            .into_iter()
            .flatten()
            .map(|&i| &self.edges[i])
    }

    pub fn predecessors_of<'a>(&'a self, id: &str) -> impl Iterator<Item = &'a DynamicEdge> {
        self.predecessors
            .get(id)
            .into_iter()
            .flatten()
            .map(|&i| &self.edges[i])
    }

    pub fn has_successors(&self, id: &str) -> bool {
        self.successors.get(id).is_some_and(|v| !v.is_empty())
    }

    /// Instances of a product that are never a predecessor; the product's
    /// completion is the latest end among them. Falls back to every instance
    /// of the product when the graph leaves none terminal.
    pub fn terminals_of(&self, catalog: &Catalog, product: &str) -> Vec<InstanceId> {
        let mut terminals: Vec<InstanceId> = catalog
            .instances
            .values()
            .filter(|i| i.product.as_deref() == Some(product))
            .filter(|i| !self.has_successors(&i.id))
            .map(|i| i.id.clone())
            .collect();
        if terminals.is_empty() {
            terminals = catalog
                .instances
                .values()
                .filter(|i| i.product.as_deref() == Some(product))
                .map(|i| i.id.clone())
                .collect();
        }
        terminals
    }

    /// Predecessor and successor maps keyed by original task ids, deduplicated,
    /// for presentation consumers.
    pub fn maps_by_original(
        &self,
        catalog: &Catalog,
    ) -> (
        std::collections::BTreeMap<String, Vec<String>>,
        std::collections::BTreeMap<String, Vec<String>>,
    ) {
        let mut predecessors: std::collections::BTreeMap<String, Vec<String>> = Default::default();
        let mut successors: std::collections::BTreeMap<String, Vec<String>> = Default::default();

        for edge in &self.edges {
            let (Some(first), Some(second)) = (
                catalog.instance(&edge.first).map(|i| i.original.clone()),
                catalog.instance(&edge.second).map(|i| i.original.clone()),
            ) else {
                continue;
            };
            if first == second {
                continue;
            }
            let preds = predecessors.entry(second.clone()).or_default();
            if !preds.contains(&first) {
                preds.push(first.clone());
            }
            let succs = successors.entry(first).or_default();
            if !succs.contains(&second) {
                succs.push(second);
            }
        }
        (predecessors, successors)
    }
}

/// Resolve a constraint endpoint to an instance id. Numeric tokens are
/// baseline catalog ids scoped to the product; anything else is an already
/// unique late-part/rework id.
fn resolve(catalog: &Catalog, token: &str, product: &ProductId) -> Option<InstanceId> {
    if let Ok(catalog_id) = token.parse::<u32>() {
        return catalog
            .instance_index
            .get(&(product.clone(), catalog_id))
            .cloned();
    }
    catalog.instances.contains_key(token).then(|| token.to_string())
}

/// Weave the dynamic graph from the three constraint lists and the
/// inspection maps.
pub fn build_dependencies(catalog: &Catalog) -> DependencyGraph {
    let all_products: Vec<ProductId> = catalog.products.keys().cloned().collect();
    let mut edges: Vec<DynamicEdge> = Vec::new();
    let mut seen: HashSet<DynamicEdge> = HashSet::new();
    let mut processed_predecessors: HashSet<InstanceId> = HashSet::new();

    let push = |edges: &mut Vec<DynamicEdge>, seen: &mut HashSet<DynamicEdge>, edge: DynamicEdge| {
        if seen.insert(edge.clone()) {
            edges.push(edge);
        }
    };

    // Chain the predecessor's inspections in front of the successor,
    // returning the tail of the chain
    let chain_inspections = |edges: &mut Vec<DynamicEdge>,
                             seen: &mut HashSet<DynamicEdge>,
                             predecessor: &InstanceId|
     -> InstanceId {
        let mut current = predecessor.clone();
        if let Some(qi) = catalog.quality_for.get(predecessor) {
            push(
                edges,
                seen,
                DynamicEdge {
                    first: current.clone(),
                    second: qi.clone(),
                    relationship: Relationship::FinishToStart,
                },
            );
            current = qi.clone();
        }
        if let Some(cc) = catalog.customer_for.get(predecessor) {
            push(
                edges,
                seen,
                DynamicEdge {
                    first: current.clone(),
                    second: cc.clone(),
                    relationship: Relationship::FinishToStart,
                },
            );
            current = cc.clone();
        }
        current
    };

    // Unified pass over baseline, late-part and rework constraints
    let raw_constraints = catalog
        .baseline_edges
        .iter()
        .map(|e| (e.first.to_string(), e.second.to_string(), e.relationship, None))
        .chain(
            catalog
                .late_part_edges
                .iter()
                .chain(&catalog.rework_edges)
                .map(|e| (e.first.clone(), e.second.clone(), e.relationship, e.product.clone())),
        );

    for (first, second, relationship, product_scope) in raw_constraints {
        let scope: Vec<&ProductId> = match &product_scope {
            Some(product) => vec![product],
            None => all_products.iter().collect(),
        };
        for product in scope {
            let (Some(pred), Some(succ)) = (
                resolve(catalog, &first, product),
                resolve(catalog, &second, product),
            ) else {
                continue;
            };

            processed_predecessors.insert(pred.clone());
            let tail = chain_inspections(&mut edges, &mut seen, &pred);
            push(
                &mut edges,
                &mut seen,
                DynamicEdge {
                    first: tail,
                    second: succ,
                    relationship,
                },
            );
        }
    }

    // Inspections on terminal primaries still need to be linked in
    let inspected: HashSet<&InstanceId> = catalog
        .quality_for
        .keys()
        .chain(catalog.customer_for.keys())
        .collect();
    for primary in inspected {
        if !processed_predecessors.contains(primary) {
            chain_inspections(&mut edges, &mut seen, primary);
        }
    }

    let mut successors: HashMap<InstanceId, Vec<usize>> = HashMap::new();
    let mut predecessors: HashMap<InstanceId, Vec<usize>> = HashMap::new();
    for (idx, edge) in edges.iter().enumerate() {
        successors.entry(edge.first.clone()).or_default().push(idx);
        predecessors.entry(edge.second.clone()).or_default().push(idx);
    }

    debug!(count = edges.len(), "built dynamic dependency graph");
    DependencyGraph {
        edges,
        successors,
        predecessors,
        version: catalog.version(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use taktplan_core::{
        BaselineEdge, ProductLine, ResourceKey, ResourceKind, TaskInstance, TaskKind,
    };

    fn epoch() -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 8, 22)
            .unwrap()
            .and_hms_opt(6, 0, 0)
            .unwrap()
    }

    fn production(catalog: &mut Catalog, product: &str, id: u32) -> InstanceId {
        let instance_id = format!("{product}_{id}");
        catalog.instances.insert(
            instance_id.clone(),
            TaskInstance {
                id: instance_id.clone(),
                kind: TaskKind::Production,
                product: Some(product.to_string()),
                duration_minutes: 60,
                headcount: 1,
                resource: ResourceKey::mechanic("Mechanic Team 1", Some("Skill 1")),
                resource_kind: ResourceKind::Mechanic,
                primary: None,
                on_dock: None,
                original: id.to_string(),
            },
        );
        catalog
            .instance_index
            .insert((product.to_string(), id), instance_id.clone());
        instance_id
    }

    fn inspection(
        catalog: &mut Catalog,
        id: &str,
        kind: TaskKind,
        primary: &str,
        team: &str,
    ) {
        catalog.instances.insert(
            id.to_string(),
            TaskInstance {
                id: id.to_string(),
                kind,
                product: catalog.instances[primary].product.clone(),
                duration_minutes: 30,
                headcount: 1,
                resource: ResourceKey::team_only(team),
                resource_kind: if kind == TaskKind::QualityInspection {
                    ResourceKind::Quality
                } else {
                    ResourceKind::Customer
                },
                primary: Some(primary.to_string()),
                on_dock: None,
                original: id.to_string(),
            },
        );
    }

    fn two_task_catalog() -> Catalog {
        let mut catalog = Catalog::new(epoch());
        catalog.products.insert(
            "P1".into(),
            ProductLine {
                id: "P1".into(),
                delivery: epoch() + chrono::TimeDelta::days(10),
                task_range: (1, 2),
            },
        );
        production(&mut catalog, "P1", 1);
        production(&mut catalog, "P1", 2);
        catalog.baseline_edges.push(BaselineEdge {
            first: 1,
            second: 2,
            relationship: Relationship::FinishToStart,
        });
        catalog
    }

    #[test]
    fn plain_edge_resolves_product_scoped() {
        let graph = build_dependencies(&two_task_catalog());
        assert_eq!(
            graph.edges,
            vec![DynamicEdge {
                first: "P1_1".into(),
                second: "P1_2".into(),
                relationship: Relationship::FinishToStart,
            }]
        );
    }

    #[test]
    fn inspections_are_woven_between_predecessor_and_successor() {
        let mut catalog = two_task_catalog();
        inspection(&mut catalog, "P1_QI_601", TaskKind::QualityInspection, "P1_1", "Quality Team 1");
        inspection(&mut catalog, "P1_CC_601", TaskKind::CustomerInspection, "P1_1", "Customer Team 1");
        catalog.quality_for.insert("P1_1".into(), "P1_QI_601".into());
        catalog.customer_for.insert("P1_1".into(), "P1_CC_601".into());

        let graph = build_dependencies(&catalog);
        let expect = |first: &str, second: &str, relationship| DynamicEdge {
            first: first.into(),
            second: second.into(),
            relationship,
        };
        assert_eq!(
            graph.edges,
            vec![
                expect("P1_1", "P1_QI_601", Relationship::FinishToStart),
                expect("P1_QI_601", "P1_CC_601", Relationship::FinishToStart),
                expect("P1_CC_601", "P1_2", Relationship::FinishToStart),
            ]
        );
    }

    #[test]
    fn terminal_link_keeps_the_original_relationship() {
        let mut catalog = two_task_catalog();
        catalog.baseline_edges[0].relationship = Relationship::StartToStart;
        inspection(&mut catalog, "P1_QI_1", TaskKind::QualityInspection, "P1_1", "Quality Team 1");
        catalog.quality_for.insert("P1_1".into(), "P1_QI_1".into());

        let graph = build_dependencies(&catalog);
        assert_eq!(graph.edges.last().unwrap().relationship, Relationship::StartToStart);
        assert_eq!(graph.edges[0].relationship, Relationship::FinishToStart);
    }

    #[test]
    fn terminal_primaries_still_get_their_chain() {
        let mut catalog = two_task_catalog();
        // Inspections on task 2, which is never a predecessor
        inspection(&mut catalog, "P1_QI_602", TaskKind::QualityInspection, "P1_2", "Quality Team 1");
        inspection(&mut catalog, "P1_CC_602", TaskKind::CustomerInspection, "P1_2", "Customer Team 1");
        catalog.quality_for.insert("P1_2".into(), "P1_QI_602".into());
        catalog.customer_for.insert("P1_2".into(), "P1_CC_602".into());

        let graph = build_dependencies(&catalog);
        assert!(graph.edges.contains(&DynamicEdge {
            first: "P1_2".into(),
            second: "P1_QI_602".into(),
            relationship: Relationship::FinishToStart,
        }));
        assert!(graph.edges.contains(&DynamicEdge {
            first: "P1_QI_602".into(),
            second: "P1_CC_602".into(),
            relationship: Relationship::FinishToStart,
        }));
        // And the CC is terminal for the product
        let terminals = graph.terminals_of(&catalog, "P1");
        assert!(terminals.contains(&"P1_CC_602".to_string()));
        assert!(!terminals.contains(&"P1_2".to_string()));
    }

    #[test]
    fn unresolvable_endpoints_are_skipped() {
        let mut catalog = two_task_catalog();
        catalog.baseline_edges.push(BaselineEdge {
            first: 2,
            second: 99, // outside every product range
            relationship: Relationship::FinishToStart,
        });
        let graph = build_dependencies(&catalog);
        assert_eq!(graph.edges.len(), 1);
    }

    #[test]
    fn adjacency_indexes_match_edges() {
        let mut catalog = two_task_catalog();
        production(&mut catalog, "P1", 3);
        catalog.products.get_mut("P1").unwrap().task_range = (1, 3);
        catalog.baseline_edges.push(BaselineEdge {
            first: 2,
            second: 3,
            relationship: Relationship::FinishToStart,
        });

        let graph = build_dependencies(&catalog);
        let succ_of_2: Vec<&str> = graph.successors_of("P1_2").map(|e| e.second.as_str()).collect();
        assert_eq!(succ_of_2, vec!["P1_3"]);
        let pred_of_2: Vec<&str> = graph.predecessors_of("P1_2").map(|e| e.first.as_str()).collect();
        assert_eq!(pred_of_2, vec!["P1_1"]);
        assert!(graph.has_successors("P1_1"));
        assert!(!graph.has_successors("P1_3"));
    }

    #[test]
    fn maps_by_original_deduplicate() {
        let mut catalog = two_task_catalog();
        // Same catalog edge materialized for a second product
        catalog.products.insert(
            "P2".into(),
            ProductLine {
                id: "P2".into(),
                delivery: epoch() + chrono::TimeDelta::days(20),
                task_range: (1, 2),
            },
        );
        production(&mut catalog, "P2", 1);
        production(&mut catalog, "P2", 2);

        let graph = build_dependencies(&catalog);
        let (preds, succs) = graph.maps_by_original(&catalog);
        assert_eq!(preds["2"], vec!["1"]);
        assert_eq!(succs["1"], vec!["2"]);
    }
}
