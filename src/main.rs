//! xbrl-graph CLI - build and check semantic graphs from XBRL snapshots

use anyhow::{Context, Result};
use clap::{Parser as ClapParser, Subcommand};
use colored::*;
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

use xbrl_graph::{BuildConfig, GraphBuilder, SnapshotLoader};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Semantic graph construction and validation for parsed XBRL filings
#[derive(ClapParser)]
#[command(name = "xbrl-graph")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the node and edge batches for a snapshot
    Build {
        /// Input snapshot (JSON)
        input: PathBuf,

        /// Write the batches and summary as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Show statistics
        #[arg(short, long)]
        stats: bool,

        /// Keep edges that share a merge key
        #[arg(long)]
        no_collapse: bool,
    },

    /// Check a snapshot and report every recovered issue
    Validate {
        /// Input snapshot (JSON)
        input: PathBuf,

        /// Treat any issue as a failure
        #[arg(long)]
        strict: bool,

        /// Relative calculation tolerance
        #[arg(long, default_value = "0.001")]
        tolerance: Decimal,

        /// Absolute tolerance for zero-valued totals
        #[arg(long, default_value = "0.001")]
        absolute_tolerance: Decimal,
    },

    /// Benchmark graph construction
    Bench {
        /// Input snapshot (JSON)
        input: PathBuf,

        /// Number of iterations
        #[arg(short, long, default_value = "100")]
        iterations: usize,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "xbrl_graph=info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let loader = SnapshotLoader::new();

    match cli.command {
        Commands::Build {
            input,
            output,
            stats,
            no_collapse,
        } => {
            let snapshot = loader
                .parse_file(&input)
                .with_context(|| format!("Failed to load {}", input.display()))?;
            let builder = GraphBuilder::with_config(BuildConfig::new().with_collapse(!no_collapse));
            let result = builder
                .build(&snapshot)
                .with_context(|| format!("Failed to build {}", input.display()))?;
            let summary = &result.summary;

            let mark = if summary.is_complete() {
                "✓".green().bold()
            } else {
                "!".yellow().bold()
            };
            println!("{} {}", mark, input.display());
            println!("  Nodes: {}", summary.stats.nodes);
            println!("  Edges: {}", summary.stats.edges);
            println!(
                "  Issues: {} structural, {} resolution, {} validation",
                summary.structural, summary.resolution, summary.validation
            );

            if stats {
                let s = &summary.stats;
                println!("  Facts: {} ({} duplicates)", s.facts, s.duplicate_facts);
                println!("  Concepts: {}", s.concepts);
                println!("  Contexts: {}", s.contexts);
                println!("  Networks: {}", s.networks);
                println!("  Dimensions: {}", s.dimensions);
                println!("  Hypercubes: {}", s.hypercubes);
                println!(
                    "  Calculations: {} validated, {} rejected",
                    s.calculations_validated, s.calculations_rejected
                );
                println!("  Time: {}ms", s.duration_ms);
            }

            if let Some(path) = output {
                let file = std::fs::File::create(&path)
                    .with_context(|| format!("Failed to create {}", path.display()))?;
                serde_json::to_writer_pretty(std::io::BufWriter::new(file), &result)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                println!("  Written: {}", path.display());
            }
        }

        Commands::Validate {
            input,
            strict,
            tolerance,
            absolute_tolerance,
        } => {
            let snapshot = loader
                .parse_file(&input)
                .with_context(|| format!("Failed to load {}", input.display()))?;
            let config = BuildConfig::new()
                .with_tolerance(tolerance)
                .with_absolute_tolerance(absolute_tolerance);
            let result = GraphBuilder::with_config(config)
                .build(&snapshot)
                .with_context(|| format!("Failed to build {}", input.display()))?;
            let summary = result.summary;

            if summary.is_complete() {
                println!(
                    "{} {} - Snapshot is complete",
                    "✓".green().bold(),
                    input.display()
                );
                return Ok(());
            }

            println!(
                "{} {} - {} issues",
                "✗".red().bold(),
                input.display(),
                summary.issues.len()
            );
            println!("  Structural: {}", summary.structural);
            println!("  Resolution: {}", summary.resolution);
            println!("  Validation: {}", summary.validation);

            for issue in summary.issues.iter().take(5) {
                println!("  {} {}", format!("{:?}:", issue.category()).red(), issue);
            }
            if summary.issues.len() > 5 {
                println!("  ... and {} more issues", summary.issues.len() - 5);
            }

            if strict {
                std::process::exit(1);
            }
        }

        Commands::Bench { input, iterations } => {
            let snapshot = loader
                .parse_file(&input)
                .with_context(|| format!("Failed to load {}", input.display()))?;
            let builder = GraphBuilder::new();

            // Warmup
            for _ in 0..3 {
                builder.build(&snapshot)?;
            }

            let iterations = iterations.max(1);
            let mut times = Vec::with_capacity(iterations);
            let mut edges = 0;

            for _ in 0..iterations {
                let start = Instant::now();
                let result = builder.build(&snapshot)?;
                times.push(start.elapsed());
                edges = result.summary.stats.edges;
            }

            times.sort();
            let min = times[0];
            let max = times[times.len() - 1];
            let median = times[times.len() / 2];
            let mean = times.iter().sum::<std::time::Duration>() / times.len() as u32;

            println!("Benchmark Results for {}", input.display());
            println!("  Iterations: {}", iterations);
            println!("  Facts: {}", snapshot.facts.len());
            println!("  Edges: {}", edges);
            println!("  Min:    {:.3}ms", min.as_secs_f64() * 1000.0);
            println!("  Median: {:.3}ms", median.as_secs_f64() * 1000.0);
            println!("  Mean:   {:.3}ms", mean.as_secs_f64() * 1000.0);
            println!("  Max:    {:.3}ms", max.as_secs_f64() * 1000.0);
            println!(
                "  Throughput: {:.0} facts/sec",
                snapshot.facts.len() as f64 / mean.as_secs_f64()
            );
        }
    }

    Ok(())
}
