use anyhow::{Context, Result};
use buildlineage::constants::DEFAULT_THROUGHPUT_WINDOW_SECS;
use buildlineage::export;
use buildlineage::graph::BuildTree;
use buildlineage::logging;
use buildlineage::record;
use buildlineage::registry::SizeResolver;
use buildlineage::report::LineageReport;
use buildlineage::stats::FleetSummary;
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "buildlineage")]
#[command(about = "Image build lineage and cost report", long_about = None)]
struct Cli {
    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the lineage graph and report per-image cost
    Graph {
        /// JSON array of build records; stdin when omitted
        input: Option<PathBuf>,

        /// Registry base URL used to look up layer sizes
        #[arg(long, env = "BUILDLINEAGE_REGISTRY")]
        registry: Option<String>,

        /// Keep leaf tags instead of pruning them
        #[arg(long)]
        no_trim: bool,
    },
    /// Throughput, concurrency and per-build statistics
    Stats {
        input: Option<PathBuf>,

        #[arg(long, default_value_t = DEFAULT_THROUGHPUT_WINDOW_SECS)]
        window_secs: i64,

        /// Also write metrics-{current,archived,concurrent}.csv into this directory
        #[arg(long)]
        csv_dir: Option<PathBuf>,
    },
}

fn load_records(input: Option<&Path>) -> Result<Vec<Value>> {
    let source = input.map_or_else(|| "stdin".to_string(), |p| p.display().to_string());
    record::load_records(input)
        .with_context(|| format!("Failed to load build records from {}", source))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.json_logs).map_err(|e| anyhow::anyhow!("{}", e))?;

    match cli.cmd {
        Commands::Graph {
            input,
            registry,
            no_trim,
        } => {
            let records = load_records(input.as_deref())?;
            let mut resolver = SizeResolver::from_registry_url(registry.as_deref());

            let mut tree = BuildTree::from_records(&records, &mut resolver);
            if !no_trim {
                tree.trim_excess_tags();
            }

            let report = LineageReport::from_tree(&tree);
            tracing::info!(
                edges = report.edges.len(),
                excess = report.excess.len(),
                cached_layers = resolver.cache().layer_count(),
                "Lineage report ready"
            );
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Stats {
            input,
            window_secs,
            csv_dir,
        } => {
            let records = load_records(input.as_deref())?;
            let summary =
                FleetSummary::from_records(&records, chrono::Duration::seconds(window_secs));
            if let Some(dir) = csv_dir {
                export::write_metrics_files(&dir, &summary)
                    .with_context(|| format!("Failed to write CSV metrics to {}", dir.display()))?;
            }
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}
