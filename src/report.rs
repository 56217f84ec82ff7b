// Recoverable build issues and the per-document summary
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum IssueCategory {
    /// An element or context violates an invariant; the item was skipped.
    Structural,
    /// A reference did not resolve; the arc or qualifier was dropped.
    Resolution,
    /// A calculation group failed its tolerance check and was not emitted.
    Validation,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Issue {
    InvalidPeriod { context: String, reason: String },
    InvalidUnit { unit: String, reason: String },
    UnresolvedContextRef { fact: String, context: String },
    UnresolvedUnitRef { fact: String, unit: String },
    UnknownElement { fact: String, element: String },
    DanglingArc { network: String, from: String, to: String },
    UnknownDimension { context: String, dimension: String },
    IncompleteDimension { dimension: String },
    CalculationInconsistency {
        network: String,
        parent_fact: String,
        expected: Decimal,
        actual: Decimal,
        /// (fact id, value, weight)
        children: Vec<(String, Decimal, Decimal)>,
    },
    /// The weighted sum or tolerance ratio left the representable range.
    CalculationOverflow { network: String, parent_fact: String },
}

impl Issue {
    pub fn category(&self) -> IssueCategory {
        match self {
            Issue::InvalidPeriod { .. }
            | Issue::InvalidUnit { .. }
            | Issue::UnresolvedContextRef { .. }
            | Issue::UnresolvedUnitRef { .. }
            | Issue::UnknownElement { .. } => IssueCategory::Structural,
            Issue::DanglingArc { .. }
            | Issue::UnknownDimension { .. }
            | Issue::IncompleteDimension { .. } => IssueCategory::Resolution,
            Issue::CalculationInconsistency { .. } | Issue::CalculationOverflow { .. } => {
                IssueCategory::Validation
            }
        }
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Issue::InvalidPeriod { context, reason } => {
                write!(f, "context {} has an invalid period: {}", context, reason)
            }
            Issue::InvalidUnit { unit, reason } => write!(f, "unit {} is invalid: {}", unit, reason),
            Issue::UnresolvedContextRef { fact, context } => {
                write!(f, "fact {} references unknown context {}", fact, context)
            }
            Issue::UnresolvedUnitRef { fact, unit } => {
                write!(f, "fact {} references unknown unit {}", fact, unit)
            }
            Issue::UnknownElement { fact, element } => {
                write!(f, "fact {} references unknown element {}", fact, element)
            }
            Issue::DanglingArc { network, from, to } => {
                write!(f, "arc {} -> {} in {} has an unresolved endpoint", from, to, network)
            }
            Issue::UnknownDimension { context, dimension } => {
                write!(f, "context {} is qualified by unknown dimension {}", context, dimension)
            }
            Issue::IncompleteDimension { dimension } => {
                write!(f, "explicit dimension {} has no resolvable domain", dimension)
            }
            Issue::CalculationInconsistency {
                network,
                parent_fact,
                expected,
                actual,
                children,
            } => write!(
                f,
                "calculation for {} in {} sums to {} but reports {} ({} children)",
                parent_fact,
                network,
                expected,
                actual,
                children.len()
            ),
            Issue::CalculationOverflow {
                network,
                parent_fact,
            } => write!(
                f,
                "calculation for {} in {} overflows decimal range",
                parent_fact, network
            ),
        }
    }
}

/// Collects issues while a document is built.
#[derive(Debug, Default)]
pub struct IssueLog {
    issues: Vec<Issue>,
}

impl IssueLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, issue: Issue) {
        warn!(category = ?issue.category(), "{}", issue);
        self.issues.push(issue);
    }

    pub fn len(&self) -> usize {
        self.issues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter()
    }

    pub fn count(&self, category: IssueCategory) -> usize {
        self.issues.iter().filter(|i| i.category() == category).count()
    }

    pub fn into_vec(self) -> Vec<Issue> {
        self.issues
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BuildStats {
    pub elements: usize,
    pub concepts: usize,
    pub abstracts: usize,
    pub contexts: usize,
    pub periods: usize,
    pub units: usize,
    pub dimensions: usize,
    pub hypercubes: usize,
    pub networks: usize,
    pub facts: usize,
    pub duplicate_facts: usize,
    pub bound_facts: usize,
    pub calculations_validated: usize,
    pub calculations_rejected: usize,
    pub nodes: usize,
    pub edges: usize,
    pub duration_ms: u64,
}

/// Completeness report returned alongside every build output.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BuildSummary {
    pub document_id: String,
    pub structural: usize,
    pub resolution: usize,
    pub validation: usize,
    pub issues: Vec<Issue>,
    pub stats: BuildStats,
}

impl BuildSummary {
    pub fn from_log(document_id: &str, log: IssueLog, stats: BuildStats) -> Self {
        Self {
            document_id: document_id.to_string(),
            structural: log.count(IssueCategory::Structural),
            resolution: log.count(IssueCategory::Resolution),
            validation: log.count(IssueCategory::Validation),
            issues: log.into_vec(),
            stats,
        }
    }

    /// True when nothing was skipped, dropped or rejected.
    pub fn is_complete(&self) -> bool {
        self.structural == 0 && self.resolution == 0 && self.validation == 0
    }
}
