//! Fact arena and duplicate resolution
//!
//! Facts live in a struct-of-arrays arena and are referenced by index. The
//! duplicate -> primary map sits beside the arena; facts never point back
//! into their document.

use crate::canonical::CanonicalNodes;
use crate::classify::ElementTable;
use crate::model::Snapshot;
use crate::report::{Issue, IssueLog};
use crate::{Error, Result};
use ahash::AHashMap;
use compact_str::CompactString;
use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::str::FromStr;
use tracing::debug;

pub type FactIdx = u32;

/// Reported precision. A missing `decimals` ranks below every value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decimals {
    Infinite,
    Value(i32),
}

impl Decimals {
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case("INF") {
            Some(Decimals::Infinite)
        } else {
            raw.parse().ok().map(Decimals::Value)
        }
    }

    fn rank(value: Option<Decimals>) -> f64 {
        match value {
            Some(Decimals::Infinite) => f64::INFINITY,
            Some(Decimals::Value(v)) => v as f64,
            None => f64::NEG_INFINITY,
        }
    }
}

#[repr(C, align(64))]
#[derive(Debug, Clone, Default)]
pub struct FactStorage {
    pub ids: Vec<String>,
    pub element_ids: Vec<String>,
    pub context_ids: Vec<String>,
    pub unit_ids: Vec<Option<String>>,
    pub values: Vec<String>,
    pub numbers: Vec<Option<Decimal>>,
    pub decimals: Vec<Option<Decimals>>,
    pub precision: Vec<Option<CompactString>>,
    pub nil: Vec<bool>,
    pub numeric: Vec<bool>,
    index: AHashMap<String, FactIdx>,
}

/// Borrowed view of one fact.
#[derive(Debug, Clone, Copy)]
pub struct FactRef<'a> {
    pub idx: FactIdx,
    pub id: &'a str,
    pub element_id: &'a str,
    pub context_id: &'a str,
    pub unit_id: Option<&'a str>,
    pub value: &'a str,
    pub number: Option<Decimal>,
    pub decimals: Option<Decimals>,
    pub nil: bool,
    pub numeric: bool,
}

impl FactStorage {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ids: Vec::with_capacity(capacity),
            element_ids: Vec::with_capacity(capacity),
            context_ids: Vec::with_capacity(capacity),
            unit_ids: Vec::with_capacity(capacity),
            values: Vec::with_capacity(capacity),
            numbers: Vec::with_capacity(capacity),
            decimals: Vec::with_capacity(capacity),
            precision: Vec::with_capacity(capacity),
            nil: Vec::with_capacity(capacity),
            numeric: Vec::with_capacity(capacity),
            index: AHashMap::with_capacity(capacity),
        }
    }

    /// Resolves each raw fact's context and unit to canonical ids. Facts that
    /// do not resolve are skipped and logged.
    pub fn load(
        snapshot: &Snapshot,
        elements: &ElementTable<'_>,
        canonical: &CanonicalNodes,
        log: &mut IssueLog,
    ) -> Self {
        let mut storage = Self::with_capacity(snapshot.facts.len());

        for raw in &snapshot.facts {
            if !elements.contains(&raw.element) {
                log.record(Issue::UnknownElement {
                    fact: raw.occurrence_id.to_string(),
                    element: raw.element.clone(),
                });
                continue;
            }
            if canonical.is_rejected_context(&raw.context_ref) {
                debug!(fact = %raw.occurrence_id, context = %raw.context_ref, "Skipping fact in rejected context");
                continue;
            }
            let Some(context_id) = canonical.context_id(&raw.context_ref) else {
                log.record(Issue::UnresolvedContextRef {
                    fact: raw.occurrence_id.to_string(),
                    context: raw.context_ref.to_string(),
                });
                continue;
            };
            let unit_id = match &raw.unit_ref {
                Some(unit_ref) => match canonical.unit_id(unit_ref) {
                    Some(id) => Some(id),
                    None => {
                        log.record(Issue::UnresolvedUnitRef {
                            fact: raw.occurrence_id.to_string(),
                            unit: unit_ref.to_string(),
                        });
                        continue;
                    }
                },
                None => None,
            };

            let id = format!(
                "{}:{}:{}:{}:{}",
                snapshot.document_id,
                raw.element,
                context_id,
                unit_id.unwrap_or(""),
                raw.occurrence_id
            );
            if storage.index.contains_key(&id) {
                debug!(fact = %id, "Skipping repeated occurrence id");
                continue;
            }

            let numeric = raw.is_numeric();
            let number = if numeric && !raw.nil {
                parse_number(&raw.value)
            } else {
                None
            };

            storage.push(
                id,
                raw.element.clone(),
                context_id.to_string(),
                unit_id.map(str::to_string),
                raw.value.clone(),
                number,
                raw.decimals.as_deref().and_then(Decimals::parse),
                raw.precision.as_deref().map(CompactString::from),
                raw.nil,
                numeric,
            );
        }

        debug!("Loaded {} of {} facts", storage.len(), snapshot.facts.len());
        storage
    }

    #[allow(clippy::too_many_arguments)]
    fn push(
        &mut self,
        id: String,
        element_id: String,
        context_id: String,
        unit_id: Option<String>,
        value: String,
        number: Option<Decimal>,
        decimals: Option<Decimals>,
        precision: Option<CompactString>,
        nil: bool,
        numeric: bool,
    ) {
        self.index.insert(id.clone(), self.ids.len() as FactIdx);
        self.ids.push(id);
        self.element_ids.push(element_id);
        self.context_ids.push(context_id);
        self.unit_ids.push(unit_id);
        self.values.push(value);
        self.numbers.push(number);
        self.decimals.push(decimals);
        self.precision.push(precision);
        self.nil.push(nil);
        self.numeric.push(numeric);
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn get(&self, idx: FactIdx) -> Option<FactRef<'_>> {
        let i = idx as usize;
        if i >= self.len() {
            return None;
        }
        Some(FactRef {
            idx,
            id: &self.ids[i],
            element_id: &self.element_ids[i],
            context_id: &self.context_ids[i],
            unit_id: self.unit_ids[i].as_deref(),
            value: &self.values[i],
            number: self.numbers[i],
            decimals: self.decimals[i],
            nil: self.nil[i],
            numeric: self.numeric[i],
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = FactRef<'_>> {
        (0..self.len() as FactIdx).filter_map(move |idx| self.get(idx))
    }

    fn key(&self, idx: FactIdx) -> (&str, &str, Option<&str>) {
        let i = idx as usize;
        (&self.element_ids[i], &self.context_ids[i], self.unit_ids[i].as_deref())
    }
}

/// Exact value of a numeric fact; exponent notation is accepted here.
pub fn parse_number(raw: &str) -> Option<Decimal> {
    let raw = raw.trim();
    Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .ok()
}

/// Digits of a plain decimal literal once sign, decimal point and leading
/// zeros are stripped. Trailing zeros count.
///
/// Exponent or any other notation is rejected rather than guessed at.
pub fn significant_digits(value: &str) -> Result<usize> {
    let trimmed = value.trim();
    let unsigned = trimmed
        .strip_prefix('-')
        .or_else(|| trimmed.strip_prefix('+'))
        .unwrap_or(trimmed);

    let well_formed = unsigned.chars().all(|c| c.is_ascii_digit() || c == '.')
        && unsigned.matches('.').count() <= 1;
    if !well_formed {
        return Err(Error::UnsupportedNotation(value.to_string()));
    }

    Ok(unsigned
        .chars()
        .filter(|c| *c != '.')
        .skip_while(|c| *c == '0')
        .count())
}

/// Duplicate -> primary map, one entry per non-primary fact.
#[derive(Debug, Clone, Default)]
pub struct DuplicateMap {
    primary_of: AHashMap<FactIdx, FactIdx>,
    groups: usize,
}

impl DuplicateMap {
    /// Groups facts by `(element, context, unit)` and picks one primary per
    /// group: highest decimals, then most significant digits, then smallest id.
    pub fn resolve(facts: &FactStorage) -> Result<Self> {
        let mut primaries: AHashMap<(&str, &str, Option<&str>), FactIdx> = AHashMap::new();

        for idx in 0..facts.len() as FactIdx {
            let key = facts.key(idx);
            let replace = match primaries.get(&key) {
                None => true,
                Some(&current) => prefer(facts, idx, current)? == Ordering::Greater,
            };
            if replace {
                primaries.insert(key, idx);
            }
        }

        let mut primary_of = AHashMap::new();
        for idx in 0..facts.len() as FactIdx {
            let primary = primaries[&facts.key(idx)];
            if primary != idx {
                primary_of.insert(idx, primary);
            }
        }

        debug!(
            groups = primaries.len(),
            duplicates = primary_of.len(),
            "Resolved duplicate facts"
        );
        Ok(Self {
            primary_of,
            groups: primaries.len(),
        })
    }

    #[inline]
    pub fn primary(&self, idx: FactIdx) -> FactIdx {
        self.primary_of.get(&idx).copied().unwrap_or(idx)
    }

    pub fn is_primary(&self, idx: FactIdx) -> bool {
        !self.primary_of.contains_key(&idx)
    }

    /// Number of non-primary facts.
    pub fn len(&self) -> usize {
        self.primary_of.len()
    }

    pub fn is_empty(&self) -> bool {
        self.primary_of.is_empty()
    }

    pub fn groups(&self) -> usize {
        self.groups
    }

    /// Rewrites both endpoints of a fact -> fact relationship to their
    /// primaries. `None` when the rewritten edge would point at itself.
    pub fn rewrite(&self, source: FactIdx, target: FactIdx) -> Option<(FactIdx, FactIdx)> {
        let (source, target) = (self.primary(source), self.primary(target));
        (source != target).then_some((source, target))
    }
}

// Greater means `candidate` should replace `current` as primary.
fn prefer(facts: &FactStorage, candidate: FactIdx, current: FactIdx) -> Result<Ordering> {
    let (c, p) = (candidate as usize, current as usize);

    let by_decimals = Decimals::rank(facts.decimals[c]).total_cmp(&Decimals::rank(facts.decimals[p]));
    if by_decimals != Ordering::Equal {
        return Ok(by_decimals);
    }

    if facts.numeric[c] && facts.numeric[p] {
        let by_digits = significant_digits(&facts.values[c])?.cmp(&significant_digits(&facts.values[p])?);
        if by_digits != Ordering::Equal {
            return Ok(by_digits);
        }
    }

    // Smaller id wins a full tie
    Ok(facts.ids[p].cmp(&facts.ids[c]))
}
