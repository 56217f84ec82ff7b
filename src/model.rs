use compact_str::CompactString;
use serde::{Deserialize, Serialize};

// ============================================================================
// Input snapshot - the parsed filing handed over by the document parser
// ============================================================================

/// Read-only snapshot of one parsed filing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub document_id: CompactString,
    pub entity: EntityInfo,
    #[serde(default)]
    pub elements: Vec<Element>,
    #[serde(default)]
    pub facts: Vec<RawFact>,
    #[serde(default)]
    pub contexts: Vec<RawContext>,
    #[serde(default)]
    pub units: Vec<RawUnit>,
    #[serde(default)]
    pub networks: Vec<NetworkInfo>,
    #[serde(default)]
    pub arcs: Vec<ArcGroup>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityInfo {
    pub id: CompactString,
    #[serde(default)]
    pub name: Option<String>,
}

// Taxonomy element with the attributes classification needs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Element {
    pub namespace: CompactString,
    pub name: CompactString,
    #[serde(default, rename = "abstract")]
    pub abstract_element: bool,
    #[serde(default)]
    pub substitution_group: SubstitutionGroup,
    #[serde(default)]
    pub period_type: Option<PeriodType>,
    #[serde(default)]
    pub nillable: bool,
    #[serde(default)]
    pub type_name: CompactString,
    #[serde(default)]
    pub balance: Option<Balance>,
    #[serde(default)]
    pub typed_domain_ref: Option<String>,
}

impl Element {
    /// `namespace:name`, the identity every other part of the snapshot uses.
    pub fn id(&self) -> String {
        format!("{}:{}", self.namespace, self.name)
    }

    pub fn is_duration(&self) -> bool {
        self.period_type == Some(PeriodType::Duration)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SubstitutionGroup {
    Item,
    Tuple,
    HypercubeItem,
    DimensionItem,
    #[default]
    None,
    Other(String),
}

impl From<String> for SubstitutionGroup {
    fn from(raw: String) -> Self {
        // Prefixes vary between filings (xbrli:, xbrldt:), the local part does not
        let local = raw.rsplit(':').next().unwrap_or(raw.as_str());
        match local {
            "item" => SubstitutionGroup::Item,
            "tuple" => SubstitutionGroup::Tuple,
            "hypercubeItem" => SubstitutionGroup::HypercubeItem,
            "dimensionItem" => SubstitutionGroup::DimensionItem,
            "" => SubstitutionGroup::None,
            _ => SubstitutionGroup::Other(raw),
        }
    }
}

impl From<SubstitutionGroup> for String {
    fn from(group: SubstitutionGroup) -> Self {
        match group {
            SubstitutionGroup::Item => "xbrli:item".to_string(),
            SubstitutionGroup::Tuple => "xbrli:tuple".to_string(),
            SubstitutionGroup::HypercubeItem => "xbrldt:hypercubeItem".to_string(),
            SubstitutionGroup::DimensionItem => "xbrldt:dimensionItem".to_string(),
            SubstitutionGroup::None => String::new(),
            SubstitutionGroup::Other(raw) => raw,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodType {
    Instant,
    Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Balance {
    Debit,
    Credit,
}

// Fact occurrence exactly as reported, duplicates included
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawFact {
    pub occurrence_id: CompactString,
    pub element: String,
    pub context_ref: CompactString,
    #[serde(default)]
    pub unit_ref: Option<CompactString>,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub nil: bool,
    #[serde(default)]
    pub numeric: Option<bool>,
    #[serde(default)]
    pub decimals: Option<String>,
    #[serde(default)]
    pub precision: Option<String>,
}

impl RawFact {
    pub fn is_numeric(&self) -> bool {
        self.numeric.unwrap_or(self.unit_ref.is_some())
    }
}

// Context with its dimensional qualifiers flattened from segment/scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawContext {
    pub id: CompactString,
    pub entity: CompactString,
    pub period: RawPeriod,
    #[serde(default)]
    pub qualifiers: Vec<DimensionQualifier>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawPeriod {
    #[serde(default)]
    pub instant: Option<String>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub forever: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DimensionQualifier {
    Explicit { dimension: String, member: String },
    Typed { dimension: String, value: String },
}

impl DimensionQualifier {
    pub fn dimension(&self) -> &str {
        match self {
            DimensionQualifier::Explicit { dimension, .. } => dimension,
            DimensionQualifier::Typed { dimension, .. } => dimension,
        }
    }
}

// Complex unit support with divide/multiply
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawUnit {
    pub id: CompactString,
    pub unit_type: UnitType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitType {
    Simple(Vec<Measure>),
    Divide {
        numerator: Vec<Measure>,
        denominator: Vec<Measure>,
    },
    Multiply(Vec<Measure>),
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Measure {
    pub namespace: CompactString,
    pub name: CompactString,
}

// ============================================================================
// Relationship arcs, grouped by (kind, role)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub role_uri: String,
    #[serde(default)]
    pub definition: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArcKind {
    Presentation,
    Calculation,
    Definition,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArcGroup {
    pub kind: ArcKind,
    pub role_uri: String,
    #[serde(default)]
    pub arcs: Vec<Arc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Arc {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub order: Option<f64>,
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default)]
    pub arcrole: Option<Arcrole>,
    #[serde(default)]
    pub closed: Option<bool>,
}

/// Dimensional arcroles carried by definition arcs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Arcrole {
    #[serde(rename = "hypercube-dimension")]
    HypercubeDimension,
    #[serde(rename = "dimension-domain")]
    DimensionDomain,
    #[serde(rename = "domain-member")]
    DomainMember,
    #[serde(rename = "dimension-default")]
    DimensionDefault,
    #[serde(rename = "all")]
    All,
    #[serde(rename = "notAll")]
    NotAll,
    #[serde(other)]
    Other,
}

impl Snapshot {
    pub fn new(document_id: &str, entity_id: &str) -> Self {
        Self {
            document_id: CompactString::from(document_id),
            entity: EntityInfo {
                id: CompactString::from(entity_id),
                name: None,
            },
            ..Default::default()
        }
    }

    /// Arcs of one kind scoped to one network role.
    pub fn arcs_for<'a>(&'a self, kind: ArcKind, role_uri: &'a str) -> impl Iterator<Item = &'a Arc> + 'a {
        self.arcs
            .iter()
            .filter(move |group| group.kind == kind && group.role_uri == role_uri)
            .flat_map(|group| group.arcs.iter())
    }
}
