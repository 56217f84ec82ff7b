//! Dimension -> Domain -> Member chains and hypercube membership
//!
//! Dimension, domain and member identity is scoped to the reporting entity.
//! Hypercubes are scoped to the network whose definition arcs declare them.

use crate::canonical::{scoped_id, CanonicalNodes};
use crate::classify::{ElementTable, NodeKind};
use crate::model::{Arc, ArcKind, Arcrole, Snapshot};
use crate::report::{Issue, IssueLog};
use ahash::{AHashMap, AHashSet};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DomainNode {
    pub id: String,
    pub element_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberNode {
    pub id: String,
    pub element_id: String,
    /// Element id of the immediate predecessor in the domain tree.
    pub parent: Option<String>,
    /// Depth below the domain; the domain itself is level 0.
    pub level: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DimensionNode {
    pub id: String,
    pub element_id: String,
    pub typed: bool,
    pub domain: Option<DomainNode>,
    /// Keyed by member element id. Never contains the domain.
    pub members: BTreeMap<String, MemberNode>,
    pub default_member: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HypercubeNode {
    pub id: String,
    pub network_id: String,
    pub element_id: String,
    pub is_all: bool,
    pub closed: bool,
    /// Entity-scoped dimension ids, in arc order.
    pub dimensions: Vec<String>,
    pub roots: Vec<String>,
    pub concepts: BTreeSet<String>,
    pub abstracts: BTreeSet<String>,
    pub line_items: BTreeSet<String>,
}

/// Ordered adjacency for one arcrole. Children sort by (order, id).
struct Adjacency<'s> {
    edges: AHashMap<&'s str, Vec<(&'s str, f64)>>,
}

impl<'s> Adjacency<'s> {
    fn from_arcs<I>(arcs: I) -> Self
    where
        I: IntoIterator<Item = &'s Arc>,
    {
        let mut edges: AHashMap<&'s str, Vec<(&'s str, f64)>> = AHashMap::new();
        for arc in arcs {
            edges
                .entry(arc.from.as_str())
                .or_default()
                .push((arc.to.as_str(), arc.order.unwrap_or(0.0)));
        }
        for children in edges.values_mut() {
            children.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));
            children.dedup_by(|a, b| a.0 == b.0);
        }
        Self { edges }
    }

    fn children(&self, node: &str) -> impl Iterator<Item = &'s str> + '_ {
        self.edges
            .get(node)
            .into_iter()
            .flat_map(|children| children.iter().map(|(id, _)| *id))
    }
}

/// Definition arcs whose endpoints both resolve, tagged with their role.
/// Dangling arcs are logged and dropped here, once per document.
pub struct DefinitionArcs<'s> {
    arcs: Vec<(&'s str, &'s Arc)>,
}

impl<'s> DefinitionArcs<'s> {
    pub fn resolve(snapshot: &'s Snapshot, elements: &ElementTable<'_>, log: &mut IssueLog) -> Self {
        let mut arcs = Vec::new();
        for group in snapshot.arcs.iter().filter(|g| g.kind == ArcKind::Definition) {
            for arc in &group.arcs {
                if elements.contains(&arc.from) && elements.contains(&arc.to) {
                    arcs.push((group.role_uri.as_str(), arc));
                } else {
                    log.record(Issue::DanglingArc {
                        network: format!("{}:{}", snapshot.document_id, group.role_uri),
                        from: arc.from.clone(),
                        to: arc.to.clone(),
                    });
                }
            }
        }
        Self { arcs }
    }

    fn with_arcrole(&self, arcrole: Arcrole) -> impl Iterator<Item = &'s Arc> + '_ {
        self.arcs
            .iter()
            .filter(move |(_, arc)| arc.arcrole == Some(arcrole))
            .map(|(_, arc)| *arc)
    }

    fn in_role<'a>(&'a self, role_uri: &'a str, arcrole: Arcrole) -> impl Iterator<Item = &'s Arc> + 'a {
        self.arcs
            .iter()
            .filter(move |(role, arc)| *role == role_uri && arc.arcrole == Some(arcrole))
            .map(|(_, arc)| *arc)
    }
}

/// Entity-scoped dimensions of one document.
#[derive(Debug, Clone, Default)]
pub struct DimensionalModel {
    pub entity_id: String,
    /// Keyed by dimension element id.
    pub dimensions: BTreeMap<String, DimensionNode>,
}

impl DimensionalModel {
    pub fn build(
        entity_id: &str,
        elements: &ElementTable<'_>,
        arcs: &DefinitionArcs<'_>,
        log: &mut IssueLog,
    ) -> Self {
        let domains = Adjacency::from_arcs(arcs.with_arcrole(Arcrole::DimensionDomain));
        let members = Adjacency::from_arcs(arcs.with_arcrole(Arcrole::DomainMember));
        let defaults = Adjacency::from_arcs(arcs.with_arcrole(Arcrole::DimensionDefault));

        let mut dimensions = BTreeMap::new();
        for (element_id, element) in elements.of_kind(NodeKind::Dimension) {
            let typed = element.typed_domain_ref.is_some();
            let mut node = DimensionNode {
                id: scoped_id(entity_id, &element_id),
                element_id: element_id.clone(),
                typed,
                domain: None,
                members: BTreeMap::new(),
                default_member: None,
            };

            if !typed {
                node.domain = domains.children(&element_id).next().map(|domain| DomainNode {
                    id: scoped_id(entity_id, domain),
                    element_id: domain.to_string(),
                });
                node.default_member = defaults.children(&element_id).next().map(str::to_string);

                match &node.domain {
                    Some(domain) => {
                        let mut visited = AHashSet::new();
                        visited.insert(domain.element_id.as_str());
                        walk_members(
                            entity_id,
                            &members,
                            &domain.element_id,
                            &domain.element_id,
                            0,
                            &mut visited,
                            &mut node.members,
                        );

                        if let Some(default) = &node.default_member {
                            if *default != domain.element_id && !node.members.contains_key(default) {
                                node.members.insert(
                                    default.clone(),
                                    MemberNode {
                                        id: scoped_id(entity_id, default),
                                        element_id: default.clone(),
                                        parent: None,
                                        level: 0,
                                    },
                                );
                            }
                        }
                    }
                    None => log.record(Issue::IncompleteDimension {
                        dimension: element_id.clone(),
                    }),
                }
            }

            debug!(
                dimension = %element_id,
                members = node.members.len(),
                typed,
                "Resolved dimension"
            );
            dimensions.insert(element_id, node);
        }

        Self {
            entity_id: entity_id.to_string(),
            dimensions,
        }
    }

    /// Element ids re-tagged Domain because a dimension uses them as root.
    pub fn domain_elements(&self) -> BTreeSet<&str> {
        self.dimensions
            .values()
            .filter_map(|d| d.domain.as_ref())
            .map(|d| d.element_id.as_str())
            .collect()
    }

    pub fn dimension_id(&self, element_id: &str) -> String {
        scoped_id(&self.entity_id, element_id)
    }

    pub fn member_count(&self) -> usize {
        self.dimensions.values().map(|d| d.members.len()).sum()
    }
}

// Depth-first; `visited` cuts cycles and keeps the first placement of a member.
fn walk_members<'s>(
    entity_id: &str,
    adjacency: &Adjacency<'s>,
    domain: &str,
    node: &str,
    depth: u32,
    visited: &mut AHashSet<&'s str>,
    out: &mut BTreeMap<String, MemberNode>,
) {
    for child in adjacency.children(node) {
        if !visited.insert(child) {
            continue;
        }
        if child != domain {
            out.insert(
                child.to_string(),
                MemberNode {
                    id: scoped_id(entity_id, child),
                    element_id: child.to_string(),
                    parent: Some(node.to_string()),
                    level: depth + 1,
                },
            );
        }
        walk_members(entity_id, adjacency, domain, child, depth + 1, visited, out);
    }
}

/// Hypercubes declared by one network's `all` / `notAll` arcs.
pub fn build_hypercubes(
    network_id: &str,
    role_uri: &str,
    model: &DimensionalModel,
    elements: &ElementTable<'_>,
    canonical: &CanonicalNodes,
    arcs: &DefinitionArcs<'_>,
) -> Vec<HypercubeNode> {
    let members = Adjacency::from_arcs(arcs.in_role(role_uri, Arcrole::DomainMember));
    let dimensions = Adjacency::from_arcs(arcs.in_role(role_uri, Arcrole::HypercubeDimension));

    let mut cubes: BTreeMap<&str, HypercubeNode> = BTreeMap::new();
    let table_arcs = arcs
        .in_role(role_uri, Arcrole::All)
        .chain(arcs.in_role(role_uri, Arcrole::NotAll));

    for arc in table_arcs {
        let cube = cubes.entry(arc.to.as_str()).or_insert_with(|| HypercubeNode {
            id: format!("{}:{}", network_id, arc.to),
            network_id: network_id.to_string(),
            element_id: arc.to.clone(),
            is_all: arc.arcrole == Some(Arcrole::All),
            closed: arc.closed.unwrap_or(false),
            dimensions: dimensions.children(&arc.to).map(|d| model.dimension_id(d)).collect(),
            roots: Vec::new(),
            concepts: BTreeSet::new(),
            abstracts: BTreeSet::new(),
            line_items: BTreeSet::new(),
        });
        if cube.roots.iter().any(|r| *r == arc.from) {
            continue;
        }
        cube.roots.push(arc.from.clone());

        let mut visited = AHashSet::new();
        visited.insert(arc.from.as_str());
        let mut stack = vec![arc.from.as_str()];
        while let Some(node) = stack.pop() {
            for child in members.children(node) {
                if !visited.insert(child) {
                    continue;
                }
                stack.push(child);

                let Some(element) = elements.get(child) else {
                    continue;
                };
                if !element.abstract_element {
                    if canonical.concepts.contains_key(child) {
                        cube.concepts.insert(child.to_string());
                    } else {
                        debug!(concept = child, hypercube = %cube.id, "Dropping concept without facts");
                    }
                } else if elements.kind(child) == Some(NodeKind::Abstract)
                    || canonical.abstracts.contains_key(child)
                {
                    cube.abstracts.insert(child.to_string());
                } else {
                    cube.line_items.insert(child.to_string());
                }
            }
        }
    }

    cubes.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ArcGroup, Element, PeriodType, SubstitutionGroup};

    fn element(name: &str, abstract_element: bool, group: SubstitutionGroup) -> Element {
        Element {
            namespace: "us-gaap".into(),
            name: name.into(),
            abstract_element,
            substitution_group: group,
            period_type: Some(PeriodType::Duration),
            nillable: true,
            type_name: "xbrli:stringItemType".into(),
            balance: None,
            typed_domain_ref: None,
        }
    }

    fn arc(from: &str, to: &str, arcrole: Arcrole, order: f64) -> Arc {
        Arc {
            from: format!("us-gaap:{}", from),
            to: format!("us-gaap:{}", to),
            order: Some(order),
            weight: None,
            arcrole: Some(arcrole),
            closed: None,
        }
    }

    fn snapshot(arcs: Vec<Arc>) -> Snapshot {
        let mut snapshot = Snapshot::new("doc", "e");
        snapshot.elements = vec![
            element("SegmentsAxis", true, SubstitutionGroup::DimensionItem),
            element("SegmentsDomain", true, SubstitutionGroup::Item),
            element("RetailMember", true, SubstitutionGroup::Item),
            element("OnlineMember", true, SubstitutionGroup::Item),
            element("StoresMember", true, SubstitutionGroup::Item),
            element("SegmentTable", true, SubstitutionGroup::HypercubeItem),
            element("SegmentLineItems", true, SubstitutionGroup::Item),
            element("RevenueAbstract", true, SubstitutionGroup::Item),
            element("Revenues", false, SubstitutionGroup::Item),
            element("CostOfRevenue", false, SubstitutionGroup::Item),
        ];
        snapshot.arcs = vec![ArcGroup {
            kind: ArcKind::Definition,
            role_uri: "http://acme/role/Segments".to_string(),
            arcs,
        }];
        snapshot
    }

    fn model_for(snapshot: &Snapshot, log: &mut IssueLog) -> DimensionalModel {
        let elements = ElementTable::new(&snapshot.elements);
        let arcs = DefinitionArcs::resolve(snapshot, &elements, log);
        DimensionalModel::build("e", &elements, &arcs, log)
    }

    #[test]
    fn test_member_hierarchy_levels() {
        let snapshot = snapshot(vec![
            arc("SegmentsAxis", "SegmentsDomain", Arcrole::DimensionDomain, 1.0),
            arc("SegmentsDomain", "RetailMember", Arcrole::DomainMember, 1.0),
            arc("RetailMember", "OnlineMember", Arcrole::DomainMember, 1.0),
            arc("RetailMember", "StoresMember", Arcrole::DomainMember, 2.0),
            arc("SegmentsAxis", "SegmentsDomain", Arcrole::DimensionDefault, 1.0),
        ]);
        let mut log = IssueLog::new();
        let model = model_for(&snapshot, &mut log);
        assert!(log.is_empty());

        let axis = &model.dimensions["us-gaap:SegmentsAxis"];
        assert_eq!(axis.id, "e:us-gaap:SegmentsAxis");
        assert_eq!(axis.domain.as_ref().unwrap().element_id, "us-gaap:SegmentsDomain");
        // The domain is the default here and never becomes a member
        assert_eq!(axis.default_member.as_deref(), Some("us-gaap:SegmentsDomain"));
        assert!(!axis.members.contains_key("us-gaap:SegmentsDomain"));
        assert_eq!(axis.members.len(), 3);

        let retail = &axis.members["us-gaap:RetailMember"];
        assert_eq!(retail.level, 1);
        assert_eq!(retail.parent.as_deref(), Some("us-gaap:SegmentsDomain"));
        let online = &axis.members["us-gaap:OnlineMember"];
        assert_eq!(online.level, 2);
        assert_eq!(online.parent.as_deref(), Some("us-gaap:RetailMember"));

        assert_eq!(
            model.domain_elements().into_iter().collect::<Vec<_>>(),
            vec!["us-gaap:SegmentsDomain"]
        );
    }

    #[test]
    fn test_member_cycle_terminates() {
        let snapshot = snapshot(vec![
            arc("SegmentsAxis", "SegmentsDomain", Arcrole::DimensionDomain, 1.0),
            arc("SegmentsDomain", "RetailMember", Arcrole::DomainMember, 1.0),
            arc("RetailMember", "OnlineMember", Arcrole::DomainMember, 1.0),
            arc("OnlineMember", "RetailMember", Arcrole::DomainMember, 1.0),
            arc("OnlineMember", "SegmentsDomain", Arcrole::DomainMember, 2.0),
        ]);
        let mut log = IssueLog::new();
        let model = model_for(&snapshot, &mut log);

        let axis = &model.dimensions["us-gaap:SegmentsAxis"];
        assert_eq!(axis.members.len(), 2);
        assert_eq!(axis.members["us-gaap:RetailMember"].level, 1);
        assert_eq!(axis.members["us-gaap:OnlineMember"].level, 2);
    }

    #[test]
    fn test_explicit_dimension_without_domain() {
        let snapshot = snapshot(vec![arc(
            "SegmentsAxis",
            "RetailMember",
            Arcrole::DimensionDefault,
            1.0,
        )]);
        let mut log = IssueLog::new();
        let model = model_for(&snapshot, &mut log);

        let axis = &model.dimensions["us-gaap:SegmentsAxis"];
        assert!(axis.domain.is_none());
        assert!(axis.members.is_empty());
        assert_eq!(axis.default_member.as_deref(), Some("us-gaap:RetailMember"));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_typed_dimension_has_no_domain() {
        let mut snapshot = snapshot(vec![arc(
            "SegmentsAxis",
            "SegmentsDomain",
            Arcrole::DimensionDomain,
            1.0,
        )]);
        snapshot.elements[0].typed_domain_ref = Some("#LoanNumber".to_string());
        let mut log = IssueLog::new();
        let model = model_for(&snapshot, &mut log);

        let axis = &model.dimensions["us-gaap:SegmentsAxis"];
        assert!(axis.typed);
        assert!(axis.domain.is_none());
        assert!(log.is_empty());
    }

    #[test]
    fn test_dangling_definition_arc_is_dropped() {
        let snapshot = snapshot(vec![
            arc("SegmentsAxis", "MissingDomain", Arcrole::DimensionDomain, 1.0),
            arc("SegmentsAxis", "SegmentsDomain", Arcrole::DimensionDomain, 2.0),
        ]);
        let mut log = IssueLog::new();
        let model = model_for(&snapshot, &mut log);

        assert_eq!(log.len(), 1);
        let axis = &model.dimensions["us-gaap:SegmentsAxis"];
        assert_eq!(axis.domain.as_ref().unwrap().element_id, "us-gaap:SegmentsDomain");
    }

    #[test]
    fn test_hypercube_closure_partitions_members() {
        let mut all = arc("SegmentLineItems", "SegmentTable", Arcrole::All, 1.0);
        all.closed = Some(true);
        let snapshot = snapshot(vec![
            all,
            arc("SegmentTable", "SegmentsAxis", Arcrole::HypercubeDimension, 1.0),
            arc("SegmentsAxis", "SegmentsDomain", Arcrole::DimensionDomain, 1.0),
            arc("SegmentLineItems", "RevenueAbstract", Arcrole::DomainMember, 1.0),
            arc("SegmentLineItems", "SegmentsDomain", Arcrole::DomainMember, 2.0),
            arc("RevenueAbstract", "Revenues", Arcrole::DomainMember, 1.0),
            arc("RevenueAbstract", "CostOfRevenue", Arcrole::DomainMember, 2.0),
        ]);
        let elements = ElementTable::new(&snapshot.elements);
        let mut log = IssueLog::new();
        let arcs = DefinitionArcs::resolve(&snapshot, &elements, &mut log);
        let model = DimensionalModel::build("e", &elements, &arcs, &mut log);

        // Only Revenues carries a fact
        let mut canonical = CanonicalNodes::new();
        canonical.add_concepts(&elements, ["us-gaap:Revenues"]);

        let cubes = build_hypercubes(
            "doc:http://acme/role/Segments",
            "http://acme/role/Segments",
            &model,
            &elements,
            &canonical,
            &arcs,
        );
        assert_eq!(cubes.len(), 1);
        let cube = &cubes[0];
        assert_eq!(cube.id, "doc:http://acme/role/Segments:us-gaap:SegmentTable");
        assert!(cube.is_all);
        assert!(cube.closed);
        assert_eq!(cube.dimensions, vec!["e:us-gaap:SegmentsAxis".to_string()]);
        assert_eq!(cube.roots, vec!["us-gaap:SegmentLineItems".to_string()]);
        assert_eq!(cube.concepts.iter().collect::<Vec<_>>(), vec!["us-gaap:Revenues"]);
        assert_eq!(cube.abstracts.iter().collect::<Vec<_>>(), vec!["us-gaap:RevenueAbstract"]);
        assert_eq!(cube.line_items.iter().collect::<Vec<_>>(), vec!["us-gaap:SegmentsDomain"]);
    }

    #[test]
    fn test_presentation_abstract_is_not_line_items() {
        let snapshot = snapshot(vec![
            arc("SegmentLineItems", "SegmentTable", Arcrole::All, 1.0),
            arc("SegmentLineItems", "SegmentsDomain", Arcrole::DomainMember, 1.0),
            arc("SegmentLineItems", "StoresMember", Arcrole::DomainMember, 2.0),
        ]);
        let elements = ElementTable::new(&snapshot.elements);
        let mut log = IssueLog::new();
        let arcs = DefinitionArcs::resolve(&snapshot, &elements, &mut log);
        let model = DimensionalModel::build("e", &elements, &arcs, &mut log);

        // StoresMember is only known as an Abstract through a presentation tree
        let mut canonical = CanonicalNodes::new();
        let stores = elements.get("us-gaap:StoresMember").unwrap();
        assert_ne!(elements.kind("us-gaap:StoresMember"), Some(NodeKind::Abstract));
        assert!(canonical.add_abstract(stores));

        let cubes = build_hypercubes("doc:segments", "http://acme/role/Segments", &model, &elements, &canonical, &arcs);
        let cube = &cubes[0];
        assert_eq!(cube.abstracts.iter().collect::<Vec<_>>(), vec!["us-gaap:StoresMember"]);
        assert_eq!(cube.line_items.iter().collect::<Vec<_>>(), vec!["us-gaap:SegmentsDomain"]);
    }
}
