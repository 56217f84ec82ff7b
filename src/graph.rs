//! Node and edge batches for the graph store
//!
//! Nodes are upserted by `(label, id)` downstream, so a node emitted twice
//! keeps its first property map. Edges carry a composite merge key and are
//! collapsed on it before emission. Every relationship endpoint that is a
//! fact is rewritten to its primary first.

use crate::canonical::CanonicalNodes;
use crate::dimension::{DimensionalModel, HypercubeNode};
use crate::facts::{Decimals, DuplicateMap, FactIdx, FactStorage};
use crate::hierarchy::HierarchyTree;
use crate::model::EntityInfo;
use crate::network::Network;
use crate::validator::CalculationGroup;
use ahash::AHashSet;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::debug;

pub type Properties = serde_json::Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum NodeLabel {
    Entity,
    Report,
    Network,
    Period,
    Unit,
    Context,
    Concept,
    Abstract,
    LineItems,
    Dimension,
    Domain,
    Member,
    Hypercube,
    Fact,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationKind {
    Filed,
    HasNetwork,
    HasHypercube,
    HasDimension,
    HasDomain,
    HasMember,
    HasDefault,
    ContainsConcept,
    ContainsAbstract,
    ContainsLineItems,
    ForPeriod,
    ReportedAs,
    InContext,
    MeasuredIn,
    Presentation,
    Calculation,
}

impl RelationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationKind::Filed => "FILED",
            RelationKind::HasNetwork => "HAS_NETWORK",
            RelationKind::HasHypercube => "HAS_HYPERCUBE",
            RelationKind::HasDimension => "HAS_DIMENSION",
            RelationKind::HasDomain => "HAS_DOMAIN",
            RelationKind::HasMember => "HAS_MEMBER",
            RelationKind::HasDefault => "HAS_DEFAULT",
            RelationKind::ContainsConcept => "CONTAINS_CONCEPT",
            RelationKind::ContainsAbstract => "CONTAINS_ABSTRACT",
            RelationKind::ContainsLineItems => "CONTAINS_LINE_ITEMS",
            RelationKind::ForPeriod => "FOR_PERIOD",
            RelationKind::ReportedAs => "REPORTED_AS",
            RelationKind::InContext => "IN_CONTEXT",
            RelationKind::MeasuredIn => "MEASURED_IN",
            RelationKind::Presentation => "PRESENTATION",
            RelationKind::Calculation => "CALCULATION",
        }
    }

    // Tree edges are unique per network position, not per endpoint pair
    fn key_fields(&self) -> &'static [&'static str] {
        match self {
            RelationKind::Presentation => &["entity_id", "network_id", "parent_id", "child_id"],
            RelationKind::Calculation => &["entity_id", "network_id", "parent_id", "child_id", "context_id"],
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphNode {
    pub id: String,
    pub properties: Properties,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphEdge {
    pub source_id: String,
    pub target_id: String,
    pub properties: Properties,
}

impl GraphEdge {
    /// Composite uniqueness key used for collapse and downstream merge.
    pub fn merge_key(&self, relation: RelationKind) -> String {
        let mut key = format!("{}|{}", self.source_id, self.target_id);
        for field in relation.key_fields() {
            key.push('|');
            match self.properties.get(*field) {
                Some(Value::String(s)) => key.push_str(s),
                Some(other) => key.push_str(&other.to_string()),
                None => {}
            }
        }
        key
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeBatch {
    pub label: NodeLabel,
    pub nodes: Vec<GraphNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EdgeBatch {
    pub relation: RelationKind,
    pub edges: Vec<GraphEdge>,
}

/// Everything one document contributes to the store, nodes before edges.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GraphOutput {
    pub document_id: String,
    pub nodes: Vec<NodeBatch>,
    pub edges: Vec<EdgeBatch>,
}

impl GraphOutput {
    pub fn node_count(&self) -> usize {
        self.nodes.iter().map(|b| b.nodes.len()).sum()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.iter().map(|b| b.edges.len()).sum()
    }

    pub fn nodes_of(&self, label: NodeLabel) -> &[GraphNode] {
        self.nodes
            .iter()
            .find(|b| b.label == label)
            .map(|b| b.nodes.as_slice())
            .unwrap_or(&[])
    }

    pub fn edges_of(&self, relation: RelationKind) -> &[GraphEdge] {
        self.edges
            .iter()
            .find(|b| b.relation == relation)
            .map(|b| b.edges.as_slice())
            .unwrap_or(&[])
    }
}

fn props(value: Value) -> Properties {
    match value {
        Value::Object(map) => map,
        _ => Properties::new(),
    }
}

fn decimals_value(decimals: Option<Decimals>) -> Value {
    match decimals {
        Some(Decimals::Infinite) => json!("INF"),
        Some(Decimals::Value(v)) => json!(v),
        None => Value::Null,
    }
}

pub struct GraphAssembler {
    entity_id: String,
    collapse: bool,
    nodes: BTreeMap<NodeLabel, BTreeMap<String, GraphNode>>,
    edges: BTreeMap<RelationKind, Vec<GraphEdge>>,
}

impl GraphAssembler {
    pub fn new(entity_id: &str) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            collapse: true,
            nodes: BTreeMap::new(),
            edges: BTreeMap::new(),
        }
    }

    pub fn with_collapse(mut self, collapse: bool) -> Self {
        self.collapse = collapse;
        self
    }

    /// Returns false when the node already existed; its properties are kept.
    pub fn add_node(&mut self, label: NodeLabel, id: &str, properties: Properties) -> bool {
        let batch = self.nodes.entry(label).or_default();
        if batch.contains_key(id) {
            return false;
        }
        batch.insert(
            id.to_string(),
            GraphNode {
                id: id.to_string(),
                properties,
            },
        );
        true
    }

    pub fn add_edge(&mut self, relation: RelationKind, source_id: &str, target_id: &str, properties: Properties) {
        self.edges.entry(relation).or_default().push(GraphEdge {
            source_id: source_id.to_string(),
            target_id: target_id.to_string(),
            properties,
        });
    }

    pub fn add_document(&mut self, entity: &EntityInfo, document_id: &str) {
        self.add_node(
            NodeLabel::Entity,
            &entity.id,
            props(json!({ "id": entity.id.as_str(), "name": entity.name })),
        );
        self.add_node(
            NodeLabel::Report,
            document_id,
            props(json!({ "id": document_id, "entity_id": entity.id.as_str() })),
        );
        self.add_edge(RelationKind::Filed, &entity.id, document_id, Properties::new());
    }

    pub fn add_canonical(&mut self, canonical: &CanonicalNodes) {
        for period in canonical.periods.values() {
            self.add_node(
                NodeLabel::Period,
                &period.id,
                props(json!({
                    "id": period.id,
                    "period_type": period.period_type.as_str(),
                    "start_date": period.start_date,
                    "end_date": period.end_date,
                })),
            );
        }
        for unit in canonical.units.values() {
            self.add_node(
                NodeLabel::Unit,
                &unit.id,
                props(json!({ "id": unit.id, "namespace": unit.namespace, "value": unit.value })),
            );
        }
        for context in canonical.contexts.values() {
            self.add_node(
                NodeLabel::Context,
                &context.id,
                props(json!({
                    "id": context.id,
                    "entity_id": context.entity_id,
                    "period_id": context.period_id,
                    "dimension_ids": context.dimension_ids,
                    "member_ids": context.member_ids,
                })),
            );
            self.add_edge(RelationKind::ForPeriod, &context.id, &context.period_id, Properties::new());
            for member_id in &context.member_ids {
                self.add_edge(RelationKind::HasMember, &context.id, member_id, Properties::new());
            }
        }
        for concept in canonical.concepts.values() {
            self.add_node(
                NodeLabel::Concept,
                &concept.id,
                props(json!({
                    "id": concept.id,
                    "namespace": concept.namespace,
                    "name": concept.name,
                    "period_type": concept.period_type,
                    "balance": concept.balance,
                    "type_name": concept.type_name,
                })),
            );
        }
        for node in canonical.abstracts.values() {
            self.add_node(
                NodeLabel::Abstract,
                &node.id,
                props(json!({ "id": node.id, "namespace": node.namespace, "name": node.name })),
            );
        }
    }

    pub fn add_dimensions(&mut self, model: &DimensionalModel) {
        let entity_id = self.entity_id.clone();
        for dimension in model.dimensions.values() {
            let default_id = dimension.default_member.as_deref().map(|d| model.dimension_id(d));
            self.add_node(
                NodeLabel::Dimension,
                &dimension.id,
                props(json!({
                    "id": dimension.id,
                    "element_id": dimension.element_id,
                    "entity_id": entity_id,
                    "typed": dimension.typed,
                    "default_member": default_id,
                })),
            );

            if let Some(domain) = &dimension.domain {
                self.add_node(
                    NodeLabel::Domain,
                    &domain.id,
                    props(json!({ "id": domain.id, "element_id": domain.element_id, "entity_id": entity_id })),
                );
                self.add_edge(RelationKind::HasDomain, &dimension.id, &domain.id, Properties::new());
            }

            for member in dimension.members.values() {
                let parent_id = member.parent.as_deref().map(|p| model.dimension_id(p));
                self.add_node(
                    NodeLabel::Member,
                    &member.id,
                    props(json!({ "id": member.id, "element_id": member.element_id, "entity_id": entity_id })),
                );
                self.add_edge(
                    RelationKind::HasMember,
                    &dimension.id,
                    &member.id,
                    props(json!({ "level": member.level, "parent_id": parent_id })),
                );
            }

            if let Some(default_id) = default_id {
                self.add_edge(RelationKind::HasDefault, &dimension.id, &default_id, Properties::new());
            }
        }
    }

    pub fn add_network(&mut self, document_id: &str, network: &Network) {
        self.add_node(
            NodeLabel::Network,
            &network.id,
            props(json!({
                "id": network.id,
                "role_uri": network.role_uri,
                "sort_code": network.sort_code,
                "category": network.category.as_str(),
                "name": network.name,
                "parenthetical": network.parenthetical,
                "kinds": network.kinds.names(),
            })),
        );
        self.add_edge(RelationKind::HasNetwork, document_id, &network.id, Properties::new());
    }

    pub fn add_hypercube(&mut self, cube: &HypercubeNode) {
        self.add_node(
            NodeLabel::Hypercube,
            &cube.id,
            props(json!({
                "id": cube.id,
                "network_id": cube.network_id,
                "element_id": cube.element_id,
                "is_all": cube.is_all,
                "closed": cube.closed,
            })),
        );
        self.add_edge(RelationKind::HasHypercube, &cube.network_id, &cube.id, Properties::new());

        for (i, dimension_id) in cube.dimensions.iter().enumerate() {
            self.add_edge(
                RelationKind::HasDimension,
                &cube.id,
                dimension_id,
                props(json!({ "order": i + 1 })),
            );
        }
        for concept in &cube.concepts {
            self.add_edge(RelationKind::ContainsConcept, &cube.id, concept, Properties::new());
        }
        for node in &cube.abstracts {
            self.add_edge(RelationKind::ContainsAbstract, &cube.id, node, Properties::new());
        }
        for element_id in &cube.line_items {
            self.add_node(
                NodeLabel::LineItems,
                element_id,
                props(json!({ "id": element_id })),
            );
            self.add_edge(RelationKind::ContainsLineItems, &cube.id, element_id, Properties::new());
        }
    }

    /// Presentation edges between nodes that exist as Concept or Abstract.
    pub fn add_presentation(&mut self, tree: &HierarchyTree, canonical: &CanonicalNodes) {
        let mut skipped = 0usize;
        for arc in &tree.arcs {
            if !canonical.is_known_node(&arc.parent) || !canonical.is_known_node(&arc.child) {
                skipped += 1;
                continue;
            }
            // Depth under this parent, not the child's first placement
            let level = tree.node(&arc.parent).map(|n| n.level + 1).unwrap_or_default();
            let properties = props(json!({
                "entity_id": self.entity_id,
                "network_id": tree.network_id,
                "parent_id": arc.parent,
                "child_id": arc.child,
                "level": level,
                "order": arc.order,
            }));
            self.add_edge(RelationKind::Presentation, &arc.parent, &arc.child, properties);
        }
        if skipped > 0 {
            debug!(network = %tree.network_id, skipped, "Presentation arcs without known endpoints");
        }
    }

    /// Fact nodes for every occurrence; relationships only from primaries.
    pub fn add_facts(&mut self, facts: &FactStorage, duplicates: &DuplicateMap) {
        for fact in facts.iter() {
            let primary = duplicates.primary(fact.idx);
            let primary_id = &facts.ids[primary as usize];
            self.add_node(
                NodeLabel::Fact,
                fact.id,
                props(json!({
                    "id": fact.id,
                    "element_id": fact.element_id,
                    "context_id": fact.context_id,
                    "unit_id": fact.unit_id,
                    "value": fact.value,
                    "decimals": decimals_value(fact.decimals),
                    "precision": facts.precision[fact.idx as usize].as_deref(),
                    "nil": fact.nil,
                    "numeric": fact.numeric,
                    "is_primary": primary == fact.idx,
                    "primary_id": primary_id,
                })),
            );

            self.add_edge(RelationKind::ReportedAs, fact.element_id, primary_id, Properties::new());
            self.add_edge(RelationKind::InContext, primary_id, fact.context_id, Properties::new());
            if let Some(unit_id) = fact.unit_id {
                self.add_edge(RelationKind::MeasuredIn, primary_id, unit_id, Properties::new());
            }
        }
    }

    /// Fact -> fact edge with both endpoints rewritten to their primaries.
    /// Returns false when the rewrite turned it into a self edge.
    pub fn add_fact_edge(
        &mut self,
        relation: RelationKind,
        facts: &FactStorage,
        duplicates: &DuplicateMap,
        source: FactIdx,
        target: FactIdx,
        properties: Properties,
    ) -> bool {
        let Some((source, target)) = duplicates.rewrite(source, target) else {
            return false;
        };
        let (source_id, target_id) = (&facts.ids[source as usize], &facts.ids[target as usize]);
        let mut properties = properties;
        properties.insert("parent_id".to_string(), json!(source_id));
        properties.insert("child_id".to_string(), json!(target_id));
        self.add_edge(relation, source_id, target_id, properties);
        true
    }

    /// Calculation edges for groups that passed validation.
    pub fn add_calculations(&mut self, groups: &[CalculationGroup], facts: &FactStorage, duplicates: &DuplicateMap) {
        for group in groups {
            for child in &group.children {
                let properties = props(json!({
                    "entity_id": self.entity_id,
                    "network_id": group.network_id,
                    "context_id": group.context_id,
                    "weight": child.weight.to_f64(),
                }));
                self.add_fact_edge(RelationKind::Calculation, facts, duplicates, group.parent, child.fact, properties);
            }
        }
    }

    /// Drops edges whose endpoints were never emitted, collapses the rest
    /// on their merge key and orders everything by id.
    pub fn finish(self, document_id: &str) -> GraphOutput {
        let known: AHashSet<&str> = self
            .nodes
            .values()
            .flat_map(|batch| batch.keys().map(String::as_str))
            .collect();

        let mut edges = Vec::with_capacity(self.edges.len());
        for (relation, batch) in &self.edges {
            let total = batch.len();
            let mut keyed: Vec<(String, &GraphEdge)> = batch
                .iter()
                .filter(|e| known.contains(e.source_id.as_str()) && known.contains(e.target_id.as_str()))
                .map(|e| (e.merge_key(*relation), e))
                .collect();
            let resolved = keyed.len();

            // Stable, so the first of equal keys survives the dedup
            keyed.sort_by(|a, b| a.0.cmp(&b.0));
            if self.collapse {
                keyed.dedup_by(|a, b| a.0 == b.0);
            }

            if resolved < total || keyed.len() < resolved {
                debug!(
                    relation = relation.as_str(),
                    unresolved = total - resolved,
                    collapsed = resolved - keyed.len(),
                    "Trimmed edge batch"
                );
            }
            if keyed.is_empty() {
                continue;
            }
            edges.push(EdgeBatch {
                relation: *relation,
                edges: keyed.into_iter().map(|(_, e)| e.clone()).collect(),
            });
        }
        drop(known);

        let nodes = self
            .nodes
            .into_iter()
            .filter(|(_, batch)| !batch.is_empty())
            .map(|(label, batch)| NodeBatch {
                label,
                nodes: batch.into_values().collect(),
            })
            .collect();

        GraphOutput {
            document_id: document_id.to_string(),
            nodes,
            edges,
        }
    }
}
