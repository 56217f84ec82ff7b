//! Per-document pipeline
//!
//! A `BuildContext` owns every intermediate map of one document's build.
//! Phases run in a fixed order and each only reads what earlier phases
//! produced, so nothing is shared between documents and `build_many` can
//! run them in parallel.

use crate::canonical::CanonicalNodes;
use crate::classify::{ElementTable, NodeKind};
use crate::dimension::{build_hypercubes, DefinitionArcs, DimensionalModel, HypercubeNode};
use crate::facts::{DuplicateMap, FactStorage};
use crate::graph::{GraphAssembler, GraphOutput};
use crate::hierarchy::{build_tree, HierarchyTree, TreeKind};
use crate::model::{ArcKind, Snapshot};
use crate::network::{collect_networks, Network};
use crate::report::{BuildStats, BuildSummary, IssueLog};
use crate::validator::{bind, CalculationGroup, CalculationValidator, FactIndex};
use crate::{BuildConfig, Error, Result};
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, info};

/// Graph batches plus the completeness report for one document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildOutput {
    pub graph: GraphOutput,
    pub summary: BuildSummary,
}

pub struct BuildContext<'s> {
    pub snapshot: &'s Snapshot,
    pub elements: ElementTable<'s>,
    pub canonical: CanonicalNodes,
    pub facts: FactStorage,
    pub duplicates: DuplicateMap,
    pub dimensions: DimensionalModel,
    pub networks: BTreeMap<String, Network>,
    pub trees: Vec<HierarchyTree>,
    pub hypercubes: Vec<HypercubeNode>,
    pub calculations: Vec<CalculationGroup>,
    pub stats: BuildStats,
    pub log: IssueLog,
}

impl<'s> BuildContext<'s> {
    fn new(snapshot: &'s Snapshot) -> Self {
        Self {
            snapshot,
            elements: ElementTable::new(&snapshot.elements),
            canonical: CanonicalNodes::new(),
            facts: FactStorage::default(),
            duplicates: DuplicateMap::default(),
            dimensions: DimensionalModel::default(),
            networks: BTreeMap::new(),
            trees: Vec::new(),
            hypercubes: Vec::new(),
            calculations: Vec::new(),
            stats: BuildStats::default(),
            log: IssueLog::new(),
        }
    }

    fn build_canonical(&mut self) {
        let entity = self.snapshot.entity.id.as_str();
        self.canonical.add_units(&self.snapshot.units, &mut self.log);
        self.canonical
            .add_contexts(&self.snapshot.contexts, entity, &self.elements, &mut self.log);

        self.facts = FactStorage::load(self.snapshot, &self.elements, &self.canonical, &mut self.log);
        self.canonical
            .add_concepts(&self.elements, self.facts.element_ids.iter().map(String::as_str));
        self.canonical.add_classified_abstracts(&self.elements);
    }

    fn build_structure(&mut self) {
        let arcs = DefinitionArcs::resolve(self.snapshot, &self.elements, &mut self.log);
        self.dimensions = DimensionalModel::build(&self.snapshot.entity.id, &self.elements, &arcs, &mut self.log);
        debug!(
            dimensions = self.dimensions.dimensions.len(),
            domains = self.dimensions.domain_elements().len(),
            members = self.dimensions.member_count(),
            "Resolved dimensional model"
        );
        self.networks = collect_networks(self.snapshot);

        for network in self.networks.values() {
            for kind in [TreeKind::Presentation, TreeKind::Calculation] {
                if let Some(tree) = build_tree(
                    self.snapshot,
                    network,
                    kind,
                    &self.elements,
                    &mut self.canonical,
                    &mut self.log,
                ) {
                    self.trees.push(tree);
                }
            }
        }

        // Presentation trees may add abstracts the hypercube closure needs
        for network in self.networks.values() {
            if network.has(ArcKind::Definition) {
                self.hypercubes.extend(build_hypercubes(
                    &network.id,
                    &network.role_uri,
                    &self.dimensions,
                    &self.elements,
                    &self.canonical,
                    &arcs,
                ));
            }
        }
    }

    fn validate(&mut self, config: &BuildConfig) -> Result<()> {
        self.duplicates = DuplicateMap::resolve(&self.facts)?;

        let index = FactIndex::new(&self.facts, &self.duplicates);
        let validator = CalculationValidator::new()
            .with_tolerance(config.relative_tolerance)
            .with_absolute_tolerance(config.absolute_tolerance);

        for tree in &self.trees {
            self.stats.bound_facts += bind(tree, &index).fact_count();
            if tree.kind == TreeKind::Calculation {
                let report = validator.validate(tree, &self.facts, &index, &mut self.log);
                self.stats.calculations_rejected += report.rejected;
                self.calculations.extend(report.validated);
            }
        }
        self.stats.calculations_validated = self.calculations.len();
        Ok(())
    }

    fn assemble(&self, config: &BuildConfig) -> GraphOutput {
        let document_id = self.snapshot.document_id.as_str();
        let mut graph = GraphAssembler::new(&self.snapshot.entity.id).with_collapse(config.collapse_edges);

        graph.add_document(&self.snapshot.entity, document_id);
        graph.add_canonical(&self.canonical);
        graph.add_dimensions(&self.dimensions);
        for network in self.networks.values() {
            graph.add_network(document_id, network);
        }
        for cube in &self.hypercubes {
            graph.add_hypercube(cube);
        }
        for tree in self.trees.iter().filter(|t| t.kind == TreeKind::Presentation) {
            graph.add_presentation(tree, &self.canonical);
        }
        graph.add_facts(&self.facts, &self.duplicates);
        graph.add_calculations(&self.calculations, &self.facts, &self.duplicates);

        graph.finish(document_id)
    }

    fn collect_stats(&mut self, graph: &GraphOutput) {
        let stats = &mut self.stats;
        stats.elements = self.elements.len();
        stats.concepts = self.canonical.concepts.len();
        stats.abstracts = self.canonical.abstracts.len();
        stats.contexts = self.canonical.contexts.len();
        stats.periods = self.canonical.periods.len();
        stats.units = self.canonical.units.len();
        stats.dimensions = self.dimensions.dimensions.len();
        stats.hypercubes = self.hypercubes.len();
        stats.networks = self.networks.len();
        stats.facts = self.facts.len();
        stats.duplicate_facts = self.duplicates.len();
        stats.nodes = graph.node_count();
        stats.edges = graph.edge_count();
    }
}

pub struct GraphBuilder {
    config: BuildConfig,
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self {
            config: BuildConfig::default(),
        }
    }

    pub fn with_config(config: BuildConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    pub fn build(&self, snapshot: &Snapshot) -> Result<BuildOutput> {
        let start = Instant::now();
        let document_id = snapshot.document_id.as_str();
        if snapshot.elements.is_empty() {
            return Err(Error::EmptySnapshot(format!("{} has no elements", document_id)));
        }
        if snapshot.facts.is_empty() {
            return Err(Error::EmptySnapshot(format!("{} has no facts", document_id)));
        }

        let mut ctx = BuildContext::new(snapshot);
        debug!(
            document = document_id,
            concepts = ctx.elements.of_kind(NodeKind::Concept).len(),
            dimensions = ctx.elements.of_kind(NodeKind::Dimension).len(),
            "Classified elements"
        );

        ctx.build_canonical();
        ctx.build_structure();
        ctx.validate(&self.config)?;
        let graph = ctx.assemble(&self.config);
        ctx.collect_stats(&graph);
        ctx.stats.duration_ms = start.elapsed().as_millis() as u64;

        if self.config.strict && !ctx.log.is_empty() {
            return Err(Error::Strict(format!(
                "{} recovered {} issues",
                document_id,
                ctx.log.len()
            )));
        }

        let summary = BuildSummary::from_log(document_id, ctx.log, ctx.stats);
        info!(
            document = document_id,
            nodes = summary.stats.nodes,
            edges = summary.stats.edges,
            structural = summary.structural,
            resolution = summary.resolution,
            validation = summary.validation,
            duration_ms = summary.stats.duration_ms,
            "Built graph"
        );
        Ok(BuildOutput { graph, summary })
    }

    /// Builds independent documents, in parallel with the `parallel` feature.
    /// Results keep the input order.
    pub fn build_many(&self, snapshots: &[Snapshot]) -> Vec<Result<BuildOutput>> {
        #[cfg(feature = "parallel")]
        let results = snapshots.par_iter().map(|s| self.build(s)).collect();
        #[cfg(not(feature = "parallel"))]
        let results = snapshots.iter().map(|s| self.build(s)).collect();
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{NodeLabel, RelationKind};
    use crate::model::{
        Arc, ArcGroup, Arcrole, DimensionQualifier, Element, Measure, NetworkInfo, PeriodType,
        RawContext, RawFact, RawPeriod, RawUnit, SubstitutionGroup, UnitType,
    };
    use crate::report::IssueCategory;

    const BALANCE: &str = "http://acme.com/role/BalanceSheet";
    const SEGMENTS: &str = "http://acme.com/role/Segments";

    fn element(name: &str, abstract_element: bool, group: SubstitutionGroup, period: PeriodType) -> Element {
        Element {
            namespace: "us-gaap".into(),
            name: name.into(),
            abstract_element,
            substitution_group: group,
            period_type: Some(period),
            nillable: true,
            type_name: "xbrli:monetaryItemType".into(),
            balance: None,
            typed_domain_ref: None,
        }
    }

    fn fact(id: &str, element: &str, context: &str, value: &str, decimals: &str) -> RawFact {
        RawFact {
            occurrence_id: id.into(),
            element: format!("us-gaap:{}", element),
            context_ref: context.into(),
            unit_ref: Some("usd".into()),
            value: value.to_string(),
            nil: false,
            numeric: None,
            decimals: Some(decimals.to_string()),
            precision: None,
        }
    }

    fn arc(from: &str, to: &str, order: f64, weight: Option<f64>, arcrole: Option<Arcrole>) -> Arc {
        Arc {
            from: format!("us-gaap:{}", from),
            to: format!("us-gaap:{}", to),
            order: Some(order),
            weight,
            arcrole,
            closed: None,
        }
    }

    fn snapshot() -> Snapshot {
        let mut snapshot = Snapshot::new("acme-10k-2023", "0000320193");
        let item = SubstitutionGroup::Item;
        snapshot.elements = vec![
            element("Assets", false, item.clone(), PeriodType::Instant),
            element("AssetsCurrent", false, item.clone(), PeriodType::Instant),
            element("AssetsNoncurrent", false, item.clone(), PeriodType::Instant),
            element("BalanceSheetAbstract", true, item.clone(), PeriodType::Duration),
            element("SegmentAxis", true, SubstitutionGroup::DimensionItem, PeriodType::Duration),
            element("SegmentDomain", true, item.clone(), PeriodType::Duration),
            element("RetailMember", true, item, PeriodType::Duration),
        ];
        snapshot.contexts = vec![
            RawContext {
                id: "FY23".into(),
                entity: "0000320193".into(),
                period: RawPeriod {
                    instant: Some("2023-12-31".to_string()),
                    ..Default::default()
                },
                qualifiers: Vec::new(),
            },
            RawContext {
                id: "FY23_retail".into(),
                entity: "0000320193".into(),
                period: RawPeriod {
                    instant: Some("2023-12-31".to_string()),
                    ..Default::default()
                },
                qualifiers: vec![DimensionQualifier::Explicit {
                    dimension: "us-gaap:SegmentAxis".to_string(),
                    member: "us-gaap:RetailMember".to_string(),
                }],
            },
        ];
        snapshot.units = vec![RawUnit {
            id: "usd".into(),
            unit_type: UnitType::Simple(vec![Measure {
                namespace: "iso4217".into(),
                name: "USD".into(),
            }]),
        }];
        snapshot.facts = vec![
            fact("f1", "Assets", "FY23", "300", "0"),
            fact("f2", "AssetsCurrent", "FY23", "100", "0"),
            fact("f3", "AssetsNoncurrent", "FY23", "200", "0"),
            fact("f4", "Assets", "FY23", "300.0", "0"),
            fact("f5", "Assets", "FY23_retail", "50", "0"),
        ];
        snapshot.networks = vec![NetworkInfo {
            role_uri: BALANCE.to_string(),
            definition: Some("0002 - Statement - Balance Sheet".to_string()),
        }];
        snapshot.arcs = vec![
            ArcGroup {
                kind: ArcKind::Presentation,
                role_uri: BALANCE.to_string(),
                arcs: vec![
                    arc("BalanceSheetAbstract", "Assets", 1.0, None, None),
                    arc("Assets", "AssetsCurrent", 1.0, None, None),
                    arc("Assets", "AssetsNoncurrent", 2.0, None, None),
                ],
            },
            ArcGroup {
                kind: ArcKind::Calculation,
                role_uri: BALANCE.to_string(),
                arcs: vec![
                    arc("Assets", "AssetsCurrent", 1.0, Some(1.0), None),
                    arc("Assets", "AssetsNoncurrent", 2.0, Some(1.0), None),
                ],
            },
            ArcGroup {
                kind: ArcKind::Definition,
                role_uri: SEGMENTS.to_string(),
                arcs: vec![
                    arc("SegmentAxis", "SegmentDomain", 1.0, None, Some(Arcrole::DimensionDomain)),
                    arc("SegmentDomain", "RetailMember", 1.0, None, Some(Arcrole::DomainMember)),
                ],
            },
        ];
        snapshot
    }

    #[test]
    fn test_build_end_to_end() {
        let output = GraphBuilder::new().build(&snapshot()).unwrap();
        let summary = &output.summary;

        assert!(summary.is_complete(), "{:?}", summary.issues);
        assert_eq!(summary.stats.facts, 5);
        assert_eq!(summary.stats.duplicate_facts, 1);
        assert_eq!(summary.stats.contexts, 2);
        assert_eq!(summary.stats.periods, 1);
        assert_eq!(summary.stats.networks, 2);
        assert_eq!(summary.stats.calculations_validated, 1);

        let graph = &output.graph;
        assert_eq!(graph.nodes_of(NodeLabel::Entity).len(), 1);
        assert_eq!(graph.nodes_of(NodeLabel::Member).len(), 1);
        assert_eq!(graph.edges_of(RelationKind::Presentation).len(), 3);
        assert_eq!(graph.edges_of(RelationKind::Calculation).len(), 2);
        // Context with the retail qualifier links to the scoped member
        let has_member = graph.edges_of(RelationKind::HasMember);
        assert!(has_member
            .iter()
            .any(|e| e.target_id == "0000320193:us-gaap:RetailMember" && e.source_id.starts_with("0000320193_instant")));
    }

    #[test]
    fn test_rebuild_is_identical() {
        let snapshot = snapshot();
        let builder = GraphBuilder::new();
        let first = builder.build(&snapshot).unwrap();
        let second = builder.build(&snapshot).unwrap();
        assert_eq!(first.graph, second.graph);
    }

    #[test]
    fn test_rejected_calculation_is_not_emitted() {
        let mut snapshot = snapshot();
        snapshot.facts[0].value = "310".to_string();
        snapshot.facts[3].value = "310.0".to_string();

        let output = GraphBuilder::new().build(&snapshot).unwrap();
        assert_eq!(output.summary.validation, 1);
        assert_eq!(output.summary.stats.calculations_rejected, 1);
        assert!(output.graph.edges_of(RelationKind::Calculation).is_empty());
    }

    #[test]
    fn test_empty_snapshot_is_fatal() {
        let mut snapshot = snapshot();
        snapshot.facts.clear();
        assert!(matches!(
            GraphBuilder::new().build(&snapshot),
            Err(Error::EmptySnapshot(_))
        ));
    }

    #[test]
    fn test_strict_mode_fails_on_issues() {
        let mut snapshot = snapshot();
        snapshot.facts.push(fact("f9", "Unknown", "FY23", "1", "0"));

        let lenient = GraphBuilder::new().build(&snapshot).unwrap();
        assert_eq!(lenient.summary.structural, 1);
        assert_eq!(lenient.summary.issues[0].category(), IssueCategory::Structural);

        let strict = GraphBuilder::with_config(BuildConfig::new().strict()).build(&snapshot);
        assert!(matches!(strict, Err(Error::Strict(_))));
    }

    #[test]
    fn test_build_many_keeps_order() {
        let mut empty = snapshot();
        empty.elements.clear();
        let results = GraphBuilder::new().build_many(&[snapshot(), empty]);

        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(Error::EmptySnapshot(_))));
    }
}
