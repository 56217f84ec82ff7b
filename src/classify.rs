//! Element classification into graph node kinds

use crate::model::{Element, SubstitutionGroup};
use ahash::AHashMap;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum NodeKind {
    Concept,
    Abstract,
    LineItems,
    Hypercube,
    Dimension,
    Domain,
    Member,
    Guidance,
    Other,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Concept => "Concept",
            NodeKind::Abstract => "Abstract",
            NodeKind::LineItems => "LineItems",
            NodeKind::Hypercube => "Hypercube",
            NodeKind::Dimension => "Dimension",
            NodeKind::Domain => "Domain",
            NodeKind::Member => "Member",
            NodeKind::Guidance => "Guidance",
            NodeKind::Other => "Other",
        }
    }
}

/// The structural attributes the rule chain looks at, reduced to flags.
#[derive(Debug, Clone, Copy)]
struct Traits {
    is_abstract: bool,
    group: Group,
    duration: bool,
    nillable: bool,
    member_like: bool,
    abstract_suffix: bool,
    line_items: bool,
    guidance: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Group {
    Item,
    Hypercube,
    Dimension,
    Unrelated,
}

const MEMBER_SUFFIXES: [&str; 3] = ["Domain", "domain", "Member"];
const ABSTRACT_SUFFIXES: [&str; 4] = ["Abstract", "Hierarchy", "RollUp", "RollForward"];

impl Traits {
    fn of(element: &Element) -> Self {
        let name = element.name.as_str();
        let type_name = element.type_name.as_str();

        let group = match element.substitution_group {
            SubstitutionGroup::Item => Group::Item,
            SubstitutionGroup::HypercubeItem => Group::Hypercube,
            SubstitutionGroup::DimensionItem => Group::Dimension,
            _ => Group::Unrelated,
        };

        Self {
            is_abstract: element.abstract_element,
            group,
            duration: element.is_duration(),
            nillable: element.nillable,
            member_like: MEMBER_SUFFIXES.iter().any(|s| name.ends_with(s))
                || type_name.ends_with("domainItemType"),
            abstract_suffix: ABSTRACT_SUFFIXES.iter().any(|s| name.ends_with(s)),
            line_items: name.contains("LineItems"),
            guidance: type_name.ends_with("guidanceItemType")
                || name.to_ascii_lowercase().contains("guidance"),
        }
    }
}

/// Maps an element to exactly one node kind. First matching rule wins.
///
/// Domain vs. Member is not decided here; a root member referenced by a
/// dimension is re-tagged by the dimensional model.
pub fn classify(element: &Element) -> NodeKind {
    let t = Traits::of(element);
    match t {
        Traits { is_abstract: false, group: Group::Item, .. } => NodeKind::Concept,
        Traits { is_abstract: true, group: Group::Hypercube, duration: true, nillable: true, .. } => {
            NodeKind::Hypercube
        }
        Traits { is_abstract: true, group: Group::Dimension, duration: true, nillable: true, .. } => {
            NodeKind::Dimension
        }
        Traits { member_like: true, duration: true, nillable: true, .. } => NodeKind::Member,
        Traits { is_abstract: true, abstract_suffix: true, .. } => NodeKind::Abstract,
        Traits { line_items: true, duration: true, nillable: true, .. } => NodeKind::LineItems,
        Traits { guidance: true, .. } => NodeKind::Guidance,
        _ => NodeKind::Other,
    }
}

/// Classification cache over the snapshot's elements, keyed by element id.
///
/// Built once per document and only read afterwards.
pub struct ElementTable<'a> {
    elements: &'a [Element],
    index: AHashMap<String, usize>,
    kinds: Vec<NodeKind>,
}

impl<'a> ElementTable<'a> {
    pub fn new(elements: &'a [Element]) -> Self {
        let mut index = AHashMap::with_capacity(elements.len());
        let mut kinds = Vec::with_capacity(elements.len());
        for (i, element) in elements.iter().enumerate() {
            // Repeated declarations keep the first one
            index.entry(element.id()).or_insert(i);
            kinds.push(classify(element));
        }
        Self { elements, index, kinds }
    }

    #[inline]
    pub fn get(&self, id: &str) -> Option<&'a Element> {
        self.index.get(id).map(|&i| &self.elements[i])
    }

    #[inline]
    pub fn kind(&self, id: &str) -> Option<NodeKind> {
        self.index.get(id).map(|&i| self.kinds[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Elements of one kind, sorted by id.
    pub fn of_kind(&self, kind: NodeKind) -> Vec<(String, &'a Element)> {
        let mut found: Vec<(String, &'a Element)> = self
            .index
            .iter()
            .filter(|(_, &i)| self.kinds[i] == kind)
            .map(|(id, &i)| (id.clone(), &self.elements[i]))
            .collect();
        found.sort_by(|a, b| a.0.cmp(&b.0));
        found
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PeriodType;

    fn element(name: &str) -> Element {
        Element {
            namespace: "us-gaap".into(),
            name: name.into(),
            abstract_element: true,
            substitution_group: SubstitutionGroup::Item,
            period_type: Some(PeriodType::Duration),
            nillable: true,
            type_name: "xbrli:stringItemType".into(),
            balance: None,
            typed_domain_ref: None,
        }
    }

    #[test]
    fn test_concrete_item_is_concept() {
        let mut e = element("Assets");
        e.abstract_element = false;
        e.period_type = Some(PeriodType::Instant);
        assert_eq!(classify(&e), NodeKind::Concept);
    }

    #[test]
    fn test_dimensional_groups() {
        let mut table = element("SegmentTable");
        table.substitution_group = SubstitutionGroup::HypercubeItem;
        assert_eq!(classify(&table), NodeKind::Hypercube);

        let mut axis = element("SegmentsAxis");
        axis.substitution_group = SubstitutionGroup::DimensionItem;
        assert_eq!(classify(&axis), NodeKind::Dimension);

        // Non-nillable hypercube falls through every rule
        table.nillable = false;
        assert_eq!(classify(&table), NodeKind::Other);
    }

    #[test]
    fn test_member_by_suffix_or_type() {
        assert_eq!(classify(&element("SegmentDomain")), NodeKind::Member);
        assert_eq!(classify(&element("RetailMember")), NodeKind::Member);

        let mut by_type = element("Retail");
        by_type.type_name = "nonnum:domainItemType".into();
        assert_eq!(classify(&by_type), NodeKind::Member);

        let mut instant = element("RetailMember");
        instant.period_type = Some(PeriodType::Instant);
        assert_eq!(classify(&instant), NodeKind::Other);
    }

    #[test]
    fn test_abstract_and_line_items() {
        assert_eq!(classify(&element("BalanceSheetAbstract")), NodeKind::Abstract);
        assert_eq!(classify(&element("EquityRollForward")), NodeKind::Abstract);
        assert_eq!(classify(&element("SegmentLineItems")), NodeKind::LineItems);
    }

    #[test]
    fn test_guidance_is_case_insensitive() {
        let mut e = element("RevenueGUIDANCEText");
        e.period_type = None;
        assert_eq!(classify(&e), NodeKind::Guidance);
    }

    #[test]
    fn test_unmatched_is_other() {
        let mut e = element("Whatever");
        e.substitution_group = SubstitutionGroup::Tuple;
        assert_eq!(classify(&e), NodeKind::Other);

        let mut none = element("");
        none.substitution_group = SubstitutionGroup::None;
        none.period_type = None;
        none.nillable = false;
        none.abstract_element = false;
        assert_eq!(classify(&none), NodeKind::Other);
    }

    #[test]
    fn test_element_table_lookup() {
        let mut assets = element("Assets");
        assets.abstract_element = false;
        let elements = vec![assets, element("BalanceSheetAbstract"), element("RetailMember")];
        let table = ElementTable::new(&elements);

        assert_eq!(table.len(), 3);
        assert_eq!(table.kind("us-gaap:Assets"), Some(NodeKind::Concept));
        assert_eq!(table.kind("us-gaap:Missing"), None);
        let members = table.of_kind(NodeKind::Member);
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].0, "us-gaap:RetailMember");
    }

    #[test]
    fn test_rule_priority() {
        // A concrete item named like a member is still a concept
        let mut e = element("RetailMember");
        e.abstract_element = false;
        assert_eq!(classify(&e), NodeKind::Concept);

        // Member rule precedes the abstract suffix rule
        assert_eq!(classify(&element("AbstractMember")), NodeKind::Member);
    }
}
