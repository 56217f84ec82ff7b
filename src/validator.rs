// Binds facts to hierarchy nodes and checks calculation arithmetic
use crate::facts::{DuplicateMap, FactIdx, FactStorage};
use crate::hierarchy::{HierarchyTree, TreeKind};
use crate::report::{Issue, IssueLog};
use ahash::{AHashMap, AHashSet};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

type GroupKey<'a> = (&'a str, Option<&'a str>);

/// Primary facts by element, then by `(context, unit)`.
pub struct FactIndex<'a> {
    by_element: AHashMap<&'a str, BTreeMap<GroupKey<'a>, FactIdx>>,
}

impl<'a> FactIndex<'a> {
    pub fn new(facts: &'a FactStorage, duplicates: &DuplicateMap) -> Self {
        let mut by_element: AHashMap<&'a str, BTreeMap<GroupKey<'a>, FactIdx>> = AHashMap::new();
        for fact in facts.iter().filter(|f| duplicates.is_primary(f.idx)) {
            by_element
                .entry(fact.element_id)
                .or_default()
                .insert((fact.context_id, fact.unit_id), fact.idx);
        }
        Self { by_element }
    }

    pub fn groups(&self, element_id: &str) -> Option<&BTreeMap<GroupKey<'a>, FactIdx>> {
        self.by_element.get(element_id)
    }

    pub fn get(&self, element_id: &str, key: &GroupKey<'a>) -> Option<FactIdx> {
        self.by_element.get(element_id).and_then(|groups| groups.get(key)).copied()
    }
}

/// Facts bound to the nodes of one tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TreeBinding {
    pub network_id: String,
    /// Element id -> bound primary facts, ordered by (context, unit).
    pub nodes: BTreeMap<String, Vec<FactIdx>>,
}

impl TreeBinding {
    pub fn fact_count(&self) -> usize {
        self.nodes.values().map(Vec::len).sum()
    }
}

pub fn bind(tree: &HierarchyTree, index: &FactIndex<'_>) -> TreeBinding {
    let mut binding = TreeBinding {
        network_id: tree.network_id.clone(),
        nodes: BTreeMap::new(),
    };
    for element_id in tree.nodes.keys() {
        if let Some(groups) = index.groups(element_id) {
            binding
                .nodes
                .insert(element_id.clone(), groups.values().copied().collect());
        }
    }
    binding
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GroupState {
    Pending,
    Validated,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalculationChild {
    pub fact: FactIdx,
    pub element_id: String,
    pub value: Decimal,
    pub weight: Decimal,
}

/// One parent fact with the child facts its calculation arcs bind.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalculationGroup {
    pub network_id: String,
    pub parent: FactIdx,
    pub parent_element: String,
    pub context_id: String,
    pub unit_id: Option<String>,
    pub parent_value: Decimal,
    pub children: Vec<CalculationChild>,
    pub weighted_sum: Decimal,
    pub state: GroupState,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CalculationReport {
    /// Groups that passed; the only ones forwarded for emission.
    pub validated: Vec<CalculationGroup>,
    pub rejected: usize,
}

pub struct CalculationValidator {
    relative_tolerance: Decimal,
    absolute_tolerance: Decimal,
}

impl Default for CalculationValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl CalculationValidator {
    pub fn new() -> Self {
        Self {
            relative_tolerance: Decimal::new(1, 3),
            absolute_tolerance: Decimal::new(1, 3),
        }
    }

    pub fn with_tolerance(mut self, tolerance: Decimal) -> Self {
        self.relative_tolerance = tolerance;
        self
    }

    pub fn with_absolute_tolerance(mut self, tolerance: Decimal) -> Self {
        self.absolute_tolerance = tolerance;
        self
    }

    /// Relative check against a non-zero parent, absolute otherwise. Both strict.
    ///
    /// A difference or ratio outside the decimal range is never within tolerance.
    pub fn within_tolerance(&self, parent: Decimal, sum: Decimal) -> bool {
        let Some(diff) = parent.checked_sub(sum).map(|d| d.abs()) else {
            return false;
        };
        if parent.is_zero() {
            diff < self.absolute_tolerance
        } else {
            diff.checked_div(parent.abs())
                .is_some_and(|ratio| ratio < self.relative_tolerance)
        }
    }

    /// Returns false when the weighted sum overflows; the group is rejected.
    fn settle(&self, group: &mut CalculationGroup) -> bool {
        let sum = group.children.iter().try_fold(Decimal::ZERO, |acc, c| {
            c.value.checked_mul(c.weight).and_then(|v| acc.checked_add(v))
        });
        let Some(sum) = sum else {
            group.state = GroupState::Rejected;
            return false;
        };
        group.weighted_sum = sum;
        group.state = if self.within_tolerance(group.parent_value, group.weighted_sum) {
            GroupState::Validated
        } else {
            GroupState::Rejected
        };
        true
    }

    pub fn validate(
        &self,
        tree: &HierarchyTree,
        facts: &FactStorage,
        index: &FactIndex<'_>,
        log: &mut IssueLog,
    ) -> CalculationReport {
        let mut report = CalculationReport::default();
        if tree.kind != TreeKind::Calculation {
            return report;
        }

        let mut children_of: BTreeMap<&str, Vec<(&str, f64)>> = BTreeMap::new();
        for arc in &tree.arcs {
            children_of
                .entry(arc.parent.as_str())
                .or_default()
                .push((arc.child.as_str(), arc.weight));
        }

        for (parent_element, children) in children_of {
            let Some(groups) = index.groups(parent_element) else {
                continue;
            };
            for (key, &parent_idx) in groups {
                let Some(parent_value) = facts.numbers[parent_idx as usize] else {
                    continue;
                };

                let mut group = CalculationGroup {
                    network_id: tree.network_id.clone(),
                    parent: parent_idx,
                    parent_element: parent_element.to_string(),
                    context_id: key.0.to_string(),
                    unit_id: key.1.map(str::to_string),
                    parent_value,
                    children: Vec::new(),
                    weighted_sum: Decimal::ZERO,
                    state: GroupState::Pending,
                };

                let mut seen = AHashSet::new();
                for &(child_element, weight) in &children {
                    let Some(child_idx) = index.get(child_element, key) else {
                        continue;
                    };
                    let Some(value) = facts.numbers[child_idx as usize] else {
                        continue;
                    };
                    let Ok(weight) = Decimal::try_from(weight) else {
                        debug!(weight, child = child_element, "Skipping unrepresentable weight");
                        continue;
                    };
                    if !seen.insert((parent_idx, child_idx, key.0, weight)) {
                        continue;
                    }
                    group.children.push(CalculationChild {
                        fact: child_idx,
                        element_id: child_element.to_string(),
                        value,
                        weight,
                    });
                }
                if group.children.is_empty() {
                    continue;
                }

                if !self.settle(&mut group) {
                    report.rejected += 1;
                    log.record(Issue::CalculationOverflow {
                        network: group.network_id.clone(),
                        parent_fact: facts.ids[parent_idx as usize].clone(),
                    });
                    continue;
                }
                match group.state {
                    GroupState::Validated => report.validated.push(group),
                    _ => {
                        report.rejected += 1;
                        log.record(Issue::CalculationInconsistency {
                            network: group.network_id.clone(),
                            parent_fact: facts.ids[parent_idx as usize].clone(),
                            expected: group.weighted_sum,
                            actual: group.parent_value,
                            children: group
                                .children
                                .iter()
                                .map(|c| (facts.ids[c.fact as usize].clone(), c.value, c.weight))
                                .collect(),
                        });
                    }
                }
            }
        }

        debug!(
            network = %tree.network_id,
            validated = report.validated.len(),
            rejected = report.rejected,
            "Checked calculations"
        );
        report
    }
}
