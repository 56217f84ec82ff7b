//! xbrl-graph - Semantic graph construction and validation for parsed XBRL filings
//!
//! Takes the element/fact/context/arc snapshot of one filing and produces
//! deduplicated, classified node and edge batches ready for a graph store,
//! together with a summary of everything that had to be skipped.

pub mod builder;
pub mod canonical;
pub mod classify;
pub mod dimension;
pub mod facts;
pub mod graph;
pub mod hierarchy;
pub mod loader;
pub mod model;
pub mod network;
pub mod report;
pub mod validator;

pub use builder::{BuildOutput, GraphBuilder};
pub use classify::{classify, NodeKind};
pub use graph::{EdgeBatch, GraphOutput, NodeBatch, NodeLabel, RelationKind};
pub use loader::SnapshotLoader;
pub use model::Snapshot;
pub use report::{BuildSummary, Issue, IssueCategory};

use rust_decimal::Decimal;

/// Knobs for one build; the defaults match SEC calculation practice.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildConfig {
    /// Compared as `|parent - sum| / |parent| < relative_tolerance`.
    pub relative_tolerance: Decimal,
    /// Used instead when the parent value is zero.
    pub absolute_tolerance: Decimal,
    /// Fail the build on any recovered issue.
    pub strict: bool,
    pub collapse_edges: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            relative_tolerance: Decimal::new(1, 3),
            absolute_tolerance: Decimal::new(1, 3),
            strict: false,
            collapse_edges: true,
        }
    }
}

impl BuildConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tolerance(mut self, tolerance: Decimal) -> Self {
        self.relative_tolerance = tolerance;
        self
    }

    pub fn with_absolute_tolerance(mut self, tolerance: Decimal) -> Self {
        self.absolute_tolerance = tolerance;
        self
    }

    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    pub fn with_collapse(mut self, collapse: bool) -> Self {
        self.collapse_edges = collapse;
        self
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Empty snapshot: {0}")]
    EmptySnapshot(String),

    #[error("Unsupported numeric notation: {0}")]
    UnsupportedNotation(String),

    #[error("Strict build failed: {0}")]
    Strict(String),
}
