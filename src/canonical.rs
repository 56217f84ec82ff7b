//! Deduplicated Period, Unit, Context, Concept and Abstract nodes
//!
//! Every identity here is derived from sorted, normalized components so the
//! same raw input always produces the same ids, whatever order it arrives in.

use crate::classify::{ElementTable, NodeKind};
use crate::model::{
    Balance, DimensionQualifier, Element, Measure, PeriodType, RawContext, RawPeriod, RawUnit,
    UnitType,
};
use crate::report::{Issue, IssueLog};
use ahash::{AHashMap, AHashSet};
use chrono::NaiveDate;
use compact_str::CompactString;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

/// Entity-scoped identity for dimensions, domains and members.
pub fn scoped_id(entity: &str, element_id: &str) -> String {
    format!("{}:{}", entity, element_id)
}

// ============================================================================
// Period
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodKind {
    Instant,
    Duration,
    Forever,
}

impl PeriodKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodKind::Instant => "instant",
            PeriodKind::Duration => "duration",
            PeriodKind::Forever => "forever",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeriodNode {
    pub id: String,
    pub period_type: PeriodKind,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

fn parse_date(raw: &str) -> std::result::Result<NaiveDate, String> {
    // dateTime values are reduced to their date part
    let date = raw.trim().get(..10).unwrap_or(raw.trim());
    NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|_| format!("unparseable date {:?}", raw))
}

impl PeriodNode {
    /// Validates the raw period. Instants carry a start only, durations both dates.
    pub fn from_raw(raw: &RawPeriod) -> std::result::Result<Self, String> {
        let (period_type, start_date, end_date) = if raw.forever {
            (PeriodKind::Forever, None, None)
        } else if let Some(instant) = &raw.instant {
            (PeriodKind::Instant, Some(parse_date(instant)?), None)
        } else {
            match (&raw.start_date, &raw.end_date) {
                (Some(start), Some(end)) => {
                    let (start, end) = (parse_date(start)?, parse_date(end)?);
                    if start > end {
                        return Err(format!("start {} is after end {}", start, end));
                    }
                    (PeriodKind::Duration, Some(start), Some(end))
                }
                (Some(_), None) => return Err("duration is missing an end date".to_string()),
                (None, Some(_)) => return Err("duration is missing a start date".to_string()),
                (None, None) => return Err("period has no dates".to_string()),
            }
        };

        let fmt = |d: Option<NaiveDate>| d.map(|d| d.to_string()).unwrap_or_default();
        Ok(Self {
            id: format!("{}_{}_{}", period_type.as_str(), fmt(start_date), fmt(end_date)),
            period_type,
            start_date,
            end_date,
        })
    }
}

// ============================================================================
// Unit
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitNode {
    pub id: String,
    /// Set for single-measure units only.
    pub namespace: Option<String>,
    pub value: String,
}

fn join_measures(measures: &[Measure]) -> String {
    let mut parts: Vec<String> = measures
        .iter()
        .map(|m| format!("{}:{}", m.namespace.trim(), m.name.trim()))
        .collect();
    parts.sort();
    parts.join("*")
}

impl UnitNode {
    pub fn from_raw(raw: &RawUnit) -> std::result::Result<Self, String> {
        match &raw.unit_type {
            UnitType::Simple(measures) | UnitType::Multiply(measures) if measures.is_empty() => {
                Err("unit has no measures".to_string())
            }
            // A single-measure product is the same unit as the plain measure
            UnitType::Simple(measures) | UnitType::Multiply(measures) if measures.len() == 1 => {
                let m = &measures[0];
                let (namespace, value) = (m.namespace.trim().to_string(), m.name.trim().to_string());
                Ok(Self {
                    id: format!("{}:{}", namespace, value),
                    namespace: Some(namespace),
                    value,
                })
            }
            UnitType::Simple(measures) | UnitType::Multiply(measures) => {
                let value = join_measures(measures);
                Ok(Self {
                    id: value.clone(),
                    namespace: None,
                    value,
                })
            }
            UnitType::Divide {
                numerator,
                denominator,
            } => {
                if numerator.is_empty() || denominator.is_empty() {
                    return Err("divide unit is missing a numerator or denominator".to_string());
                }
                let value = format!("{}/{}", join_measures(numerator), join_measures(denominator));
                Ok(Self {
                    id: value.clone(),
                    namespace: None,
                    value,
                })
            }
        }
    }
}

// ============================================================================
// Context
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextNode {
    pub id: String,
    pub entity_id: String,
    pub period_id: String,
    pub dimension_ids: Vec<String>,
    pub member_ids: Vec<String>,
}

impl ContextNode {
    fn new(entity_id: &str, period_id: &str, mut dimension_ids: Vec<String>, mut member_ids: Vec<String>) -> Self {
        dimension_ids.sort();
        dimension_ids.dedup();
        member_ids.sort();
        member_ids.dedup();
        let id = format!(
            "{}_{}_{}_{}",
            entity_id,
            period_id,
            dimension_ids.join(","),
            member_ids.join(",")
        );
        Self {
            id,
            entity_id: entity_id.to_string(),
            period_id: period_id.to_string(),
            dimension_ids,
            member_ids,
        }
    }
}

// ============================================================================
// Concept / Abstract
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConceptNode {
    pub id: String,
    pub namespace: String,
    pub name: String,
    pub period_type: Option<PeriodType>,
    pub balance: Option<Balance>,
    pub type_name: String,
}

impl ConceptNode {
    fn from_element(element: &Element) -> Self {
        Self {
            id: element.id(),
            namespace: element.namespace.to_string(),
            name: element.name.to_string(),
            period_type: element.period_type,
            balance: element.balance,
            type_name: element.type_name.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AbstractNode {
    pub id: String,
    pub namespace: String,
    pub name: String,
}

impl AbstractNode {
    fn from_element(element: &Element) -> Self {
        Self {
            id: element.id(),
            namespace: element.namespace.to_string(),
            name: element.name.to_string(),
        }
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Canonical nodes of one document plus the raw-id lookups facts resolve through.
#[derive(Debug, Default)]
pub struct CanonicalNodes {
    pub periods: BTreeMap<String, PeriodNode>,
    pub units: BTreeMap<String, UnitNode>,
    pub contexts: BTreeMap<String, ContextNode>,
    pub concepts: BTreeMap<String, ConceptNode>,
    pub abstracts: BTreeMap<String, AbstractNode>,
    unit_by_raw: AHashMap<CompactString, String>,
    context_by_raw: AHashMap<CompactString, String>,
    rejected_contexts: AHashSet<CompactString>,
}

impl CanonicalNodes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Concepts only for elements that carry at least one fact, given as the
    /// element ids of the loaded facts.
    pub fn add_concepts<'f, I>(&mut self, elements: &ElementTable<'_>, fact_elements: I)
    where
        I: IntoIterator<Item = &'f str>,
    {
        let mut seen = 0usize;
        for element_id in fact_elements {
            seen += 1;
            if self.concepts.contains_key(element_id) {
                continue;
            }
            if let Some(element) = elements.get(element_id) {
                let node = ConceptNode::from_element(element);
                self.concepts.insert(node.id.clone(), node);
            }
        }
        debug!("Materialized {} concepts from {} facts", self.concepts.len(), seen);
    }

    /// Abstract nodes for every element the classifier tagged Abstract.
    pub fn add_classified_abstracts(&mut self, elements: &ElementTable<'_>) {
        for (_, element) in elements.of_kind(NodeKind::Abstract) {
            self.add_abstract(element);
        }
    }

    /// Returns true when a new node was created.
    pub fn add_abstract(&mut self, element: &Element) -> bool {
        let id = element.id();
        if self.abstracts.contains_key(&id) {
            return false;
        }
        self.abstracts.insert(id, AbstractNode::from_element(element));
        true
    }

    pub fn add_units(&mut self, units: &[RawUnit], log: &mut IssueLog) {
        for raw in units {
            match UnitNode::from_raw(raw) {
                Ok(node) => {
                    self.unit_by_raw.insert(raw.id.clone(), node.id.clone());
                    self.units.entry(node.id.clone()).or_insert(node);
                }
                Err(reason) => log.record(Issue::InvalidUnit {
                    unit: raw.id.to_string(),
                    reason,
                }),
            }
        }
    }

    /// Contexts deduplicated per reporting entity. Dimension and member ids
    /// are scoped to `entity_scope`, the entity the dimensional model uses.
    pub fn add_contexts(
        &mut self,
        contexts: &[RawContext],
        entity_scope: &str,
        elements: &ElementTable<'_>,
        log: &mut IssueLog,
    ) {
        for raw in contexts {
            let period = match PeriodNode::from_raw(&raw.period) {
                Ok(period) => period,
                Err(reason) => {
                    log.record(Issue::InvalidPeriod {
                        context: raw.id.to_string(),
                        reason,
                    });
                    self.rejected_contexts.insert(raw.id.clone());
                    continue;
                }
            };

            let mut dimension_ids = Vec::with_capacity(raw.qualifiers.len());
            let mut member_ids = Vec::with_capacity(raw.qualifiers.len());
            for qualifier in &raw.qualifiers {
                let dimension = qualifier.dimension();
                if elements.kind(dimension) != Some(NodeKind::Dimension) {
                    log.record(Issue::UnknownDimension {
                        context: raw.id.to_string(),
                        dimension: dimension.to_string(),
                    });
                }
                let dimension_id = scoped_id(entity_scope, dimension);
                let member_id = match qualifier {
                    DimensionQualifier::Explicit { member, .. } => scoped_id(entity_scope, member),
                    DimensionQualifier::Typed { value, .. } => format!("{}#{}", dimension_id, value.trim()),
                };
                dimension_ids.push(dimension_id);
                member_ids.push(member_id);
            }

            let node = ContextNode::new(&raw.entity, &period.id, dimension_ids, member_ids);
            self.context_by_raw.insert(raw.id.clone(), node.id.clone());
            self.periods.entry(period.id.clone()).or_insert(period);
            self.contexts.entry(node.id.clone()).or_insert(node);
        }
    }

    pub fn context_id(&self, raw_ref: &str) -> Option<&str> {
        self.context_by_raw.get(raw_ref).map(|s| s.as_str())
    }

    pub fn unit_id(&self, raw_ref: &str) -> Option<&str> {
        self.unit_by_raw.get(raw_ref).map(|s| s.as_str())
    }

    /// Raw contexts skipped for an invalid period; their facts are skipped too.
    pub fn is_rejected_context(&self, raw_ref: &str) -> bool {
        self.rejected_contexts.contains(raw_ref)
    }

    pub fn is_known_node(&self, element_id: &str) -> bool {
        self.concepts.contains_key(element_id) || self.abstracts.contains_key(element_id)
    }
}
