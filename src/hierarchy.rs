// Per-network presentation and calculation trees
use crate::canonical::CanonicalNodes;
use crate::classify::ElementTable;
use crate::model::{ArcKind, Snapshot};
use crate::network::Network;
use crate::report::{Issue, IssueLog};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// XBRL's default arc order.
const DEFAULT_ORDER: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TreeKind {
    Presentation,
    Calculation,
}

impl TreeKind {
    fn arc_kind(&self) -> ArcKind {
        match self {
            TreeKind::Presentation => ArcKind::Presentation,
            TreeKind::Calculation => ArcKind::Calculation,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TreeNode {
    pub element_id: String,
    pub level: u32,
    pub order: f64,
    /// Calculation trees only; roots carry 1.0.
    pub weight: Option<f64>,
    pub children: Vec<String>,
}

/// One parent -> child arc that survived resolution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TreeArc {
    pub parent: String,
    pub child: String,
    pub order: f64,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HierarchyTree {
    pub network_id: String,
    pub kind: TreeKind,
    pub roots: Vec<String>,
    pub nodes: BTreeMap<String, TreeNode>,
    pub arcs: Vec<TreeArc>,
}

impl HierarchyTree {
    pub fn node(&self, element_id: &str) -> Option<&TreeNode> {
        self.nodes.get(element_id)
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }
}

type ChildList<'s> = Vec<(&'s str, f64, f64)>;

/// Builds the tree of `kind` for one network. Returns `None` when the network
/// has no arcs of that kind. Abstract elements reached without a concept node
/// are materialized as Abstract nodes here.
pub fn build_tree(
    snapshot: &Snapshot,
    network: &Network,
    kind: TreeKind,
    elements: &ElementTable<'_>,
    canonical: &mut CanonicalNodes,
    log: &mut IssueLog,
) -> Option<HierarchyTree> {
    let mut adjacency: BTreeMap<&str, ChildList<'_>> = BTreeMap::new();
    let mut children_seen: BTreeSet<&str> = BTreeSet::new();
    let mut any = false;

    for arc in snapshot.arcs_for(kind.arc_kind(), &network.role_uri) {
        any = true;
        if !elements.contains(&arc.from) || !elements.contains(&arc.to) {
            log.record(Issue::DanglingArc {
                network: network.id.clone(),
                from: arc.from.clone(),
                to: arc.to.clone(),
            });
            continue;
        }
        let children = adjacency.entry(arc.from.as_str()).or_default();
        if children.iter().any(|(child, _, _)| *child == arc.to) {
            continue;
        }
        children.push((
            arc.to.as_str(),
            arc.order.unwrap_or(DEFAULT_ORDER),
            arc.weight.unwrap_or(1.0),
        ));
        children_seen.insert(arc.to.as_str());
    }
    if !any {
        return None;
    }

    for children in adjacency.values_mut() {
        children.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));
    }

    // BTreeMap keys are already sorted, so roots come out lexicographically
    let roots: Vec<String> = adjacency
        .keys()
        .filter(|parent| !children_seen.contains(*parent))
        .map(|parent| parent.to_string())
        .collect();

    let mut tree = HierarchyTree {
        network_id: network.id.clone(),
        kind,
        roots: roots.clone(),
        nodes: BTreeMap::new(),
        arcs: Vec::new(),
    };

    for (i, root) in roots.iter().enumerate() {
        let weight = (kind == TreeKind::Calculation).then_some(1.0);
        place(&mut tree, &adjacency, root, 1, (i + 1) as f64, weight);
    }

    let unreachable = adjacency.keys().filter(|p| !tree.nodes.contains_key(**p)).count();
    if unreachable > 0 {
        debug!(network = %network.id, unreachable, "Skipping parents only reachable through a cycle");
    }

    for element_id in tree.nodes.keys() {
        if canonical.concepts.contains_key(element_id) {
            continue;
        }
        if let Some(element) = elements.get(element_id) {
            if element.abstract_element && canonical.add_abstract(element) {
                debug!(element = %element_id, network = %network.id, "Materialized abstract");
            }
        }
    }

    debug!(
        network = %network.id,
        kind = ?kind,
        nodes = tree.nodes.len(),
        roots = tree.roots.len(),
        "Built hierarchy"
    );
    Some(tree)
}

// First placement of an element wins, which also stops cycles.
fn place(
    tree: &mut HierarchyTree,
    adjacency: &BTreeMap<&str, ChildList<'_>>,
    element_id: &str,
    level: u32,
    order: f64,
    weight: Option<f64>,
) {
    if tree.nodes.contains_key(element_id) {
        return;
    }
    let children = adjacency.get(element_id).map(Vec::as_slice).unwrap_or(&[]);
    tree.nodes.insert(
        element_id.to_string(),
        TreeNode {
            element_id: element_id.to_string(),
            level,
            order,
            weight,
            children: children.iter().map(|(c, _, _)| c.to_string()).collect(),
        },
    );

    let calculation = tree.kind == TreeKind::Calculation;
    for &(child, child_order, child_weight) in children {
        tree.arcs.push(TreeArc {
            parent: element_id.to_string(),
            child: child.to_string(),
            order: child_order,
            weight: child_weight,
        });
        place(
            tree,
            adjacency,
            child,
            level + 1,
            child_order,
            calculation.then_some(child_weight),
        );
    }
}
