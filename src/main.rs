//! # Netsplit CLI
//!
//! Command-line interface for the netsplit library.
//! Splits a road network and its demand into per-worker partitions.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::{error, info, warn, LevelFilter};
use netsplit::{
    EdgeWeightFn, GpmetisPartitioner, GrowingPartitioner, NodeWeightFn, Partitioner, Pipeline,
    PipelineConfig, RunOutcome, RunSummary,
};
use std::path::PathBuf;
use std::sync::Arc;

mod cli;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PartitionerKind {
    /// Built-in breadth-first region growing
    Growing,
    /// External gpmetis executable
    Gpmetis,
}

/// Command-line interface for netsplit
#[derive(Parser)]
#[command(name = "netsplit")]
#[command(about = "Partition a road network and its vehicle demand for distributed simulation")]
#[command(long_about = "Splits a network into balanced partitions and cuts every route at the borders:
  netsplit -N 4                                  # network.json + demand.json into ./data
  netsplit -N 8 --network city.json --demand trips.json --data-folder out
  netsplit -N 4 -w osm route-num -W connexp      # choose weighting functions
  netsplit -N 4 --partitioner gpmetis            # use an installed gpmetis

Output per partition i: edgesPart<i>.txt, part<i>.net.json, part<i>.rou.json, partData<i>.json")]
#[command(version = env!("NETSPLIT_VERSION"))]
struct Cli {
    /// Number of partitions to create
    #[arg(short = 'N', long = "parts", default_value_t = 2, value_parser = clap::value_parser!(u32).range(1..))]
    parts: u32,

    /// Network JSON file
    #[arg(long, default_value = "network.json")]
    network: PathBuf,

    /// Demand JSON file
    #[arg(long, default_value = "demand.json")]
    demand: PathBuf,

    /// Folder receiving every generated file
    #[arg(long, default_value = "data")]
    data_folder: PathBuf,

    /// Edge weighting functions (osm, route-num); pass none to disable
    #[arg(short = 'w', long = "weight-fun", num_args = 0.., default_values = ["route-num"])]
    weight_fun: Vec<String>,

    /// Node weighting functions (connections, connexp)
    #[arg(short = 'W', long = "node-weight", num_args = 0..)]
    node_weight: Vec<String>,

    /// Worker threads (capped at the partition count)
    #[arg(short = 'T', long, value_parser = clap::value_parser!(u32).range(1..))]
    threads: Option<u32>,

    /// Drop routes that leave and re-enter a partition instead of numbering their parts
    #[arg(long)]
    no_multipart: bool,

    /// Do not ask the partitioner for contiguous partitions
    #[arg(long)]
    no_contig: bool,

    /// Only keep these vehicle ids
    #[arg(long = "filter-vehs", num_args = 1..)]
    filter_vehs: Vec<String>,

    /// Don't write edge_weights.json
    #[arg(long)]
    no_edge_weights: bool,

    /// Rerun even if the data folder holds output of identical arguments
    #[arg(short, long)]
    force: bool,

    /// Log elapsed time
    #[arg(short, long)]
    timing: bool,

    /// Partitioning backend
    #[arg(long, value_enum, default_value_t = PartitionerKind::Growing)]
    partitioner: PartitionerKind,

    /// gpmetis executable
    #[arg(long, default_value = "gpmetis")]
    gpmetis_bin: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn to_config(&self) -> Result<PipelineConfig> {
        let edge_weights = self
            .weight_fun
            .iter()
            .map(|name| name.parse::<EdgeWeightFn>())
            .collect::<netsplit::Result<Vec<_>>>()?;
        let node_weights = self
            .node_weight
            .iter()
            .map(|name| name.parse::<NodeWeightFn>())
            .collect::<netsplit::Result<Vec<_>>>()?;

        let mut config = PipelineConfig {
            num_parts: self.parts,
            network: self.network.clone(),
            demand: self.demand.clone(),
            data_folder: self.data_folder.clone(),
            edge_weights,
            node_weights,
            split_multipart: !self.no_multipart,
            contiguous: !self.no_contig,
            vehicle_filter: self.filter_vehs.clone(),
            write_edge_weights: !self.no_edge_weights,
            force: self.force,
            timing: self.timing,
            ..Default::default()
        };
        if let Some(threads) = self.threads {
            config.threads = threads as usize;
        }
        Ok(config)
    }

    fn partitioner(&self) -> Box<dyn Partitioner> {
        match self.partitioner {
            PartitionerKind::Growing => Box::new(GrowingPartitioner),
            PartitionerKind::Gpmetis => {
                Box::new(GpmetisPartitioner::new(&self.gpmetis_bin, &self.data_folder))
            }
        }
    }
}

fn main() {
    if let Err(e) = run() {
        error!("❌ Error: {e:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging to stderr
    let default_level = if cli.verbose { LevelFilter::Debug } else { LevelFilter::Info };
    env_logger::Builder::new()
        .filter_level(default_level)
        .parse_default_env()
        .target(env_logger::Target::Stderr)
        .init();

    if cli.verbose {
        eprintln!("🧩 Netsplit v{} starting...", env!("NETSPLIT_VERSION"));
    }

    let config = cli.to_config().context("invalid arguments")?;
    let progress = cli::ProgressManager::new(
        config.num_parts as u64,
        &format!("🗺️  Partitioning {} into {} parts", config.network.display(), config.num_parts),
    );

    let pipeline = Pipeline::new(config)
        .with_partitioner(cli.partitioner())
        .with_progress(Arc::new({
            let pb = progress.pb.clone();
            move |done, total| {
                if pb.length().unwrap_or(0) != total {
                    pb.set_length(total);
                }
                pb.set_position(done);
                if done >= total {
                    pb.finish_with_message("✅ Partitions segmented");
                }
            }
        }));

    let outcome = pipeline.run().with_context(|| {
        format!("partitioning failed, data folder: {}", pipeline.config().data_folder.display())
    })?;

    match outcome {
        RunOutcome::Skipped => {
            progress.pb.finish_and_clear();
            eprintln!("⏭️  Output for these arguments already exists, use --force to rebuild");
        }
        RunOutcome::Completed(summary) => report(&summary),
    }

    Ok(())
}

/// Log the run summary
fn report(summary: &RunSummary) {
    info!(
        "Created {} of {} requested partitions (edge cut {})",
        summary.num_parts, summary.requested_parts, summary.edge_cut
    );
    if summary.contiguity_relaxed {
        warn!("Partitions were created without the contiguity constraint");
    }
    for stats in &summary.partitions {
        info!(
            "  partition {}: {} edges, {} border edges, {} routes, {} vehicles/flows",
            stats.part, stats.edges, stats.border_edges, stats.routes, stats.elements
        );
    }
    if let Some(elapsed) = summary.elapsed {
        eprintln!("⏱️  Done in {:.2?}", elapsed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["netsplit"]);
        let config = cli.to_config().unwrap();
        assert_eq!(config.num_parts, 2);
        assert_eq!(config.edge_weights, vec![EdgeWeightFn::RouteNum]);
        assert!(config.node_weights.is_empty());
        assert!(config.split_multipart);
        assert!(config.contiguous);
        assert_eq!(config.data_folder, PathBuf::from("data"));
    }

    #[test]
    fn test_cli_weight_functions() {
        let cli = Cli::parse_from(["netsplit", "-N", "4", "-w", "osm", "route-num", "-W", "connexp"]);
        let config = cli.to_config().unwrap();
        assert_eq!(config.num_parts, 4);
        assert_eq!(config.edge_weights, vec![EdgeWeightFn::RoadClass, EdgeWeightFn::RouteNum]);
        assert_eq!(config.node_weights, vec![NodeWeightFn::ConnectionsSquared]);
    }

    #[test]
    fn test_cli_empty_weight_list_disables_weights() {
        let cli = Cli::parse_from(["netsplit", "-w"]);
        assert!(cli.to_config().unwrap().edge_weights.is_empty());
    }

    #[test]
    fn test_cli_unknown_weight_suggests() {
        let cli = Cli::parse_from(["netsplit", "-w", "route-nm"]);
        let err = cli.to_config().unwrap_err();
        assert!(err.to_string().contains("route-num"), "{err}");
    }

    #[test]
    fn test_cli_flags() {
        let cli = Cli::parse_from([
            "netsplit",
            "--no-multipart",
            "--no-contig",
            "-T",
            "3",
            "--filter-vehs",
            "v1",
            "v2",
            "--partitioner",
            "gpmetis",
        ]);
        let config = cli.to_config().unwrap();
        assert!(!config.split_multipart);
        assert!(!config.contiguous);
        assert_eq!(config.threads, 3);
        assert_eq!(config.vehicle_filter, vec!["v1", "v2"]);
        assert_eq!(cli.partitioner().name(), "gpmetis");
    }

    #[test]
    fn test_cli_rejects_zero_parts() {
        assert!(Cli::try_parse_from(["netsplit", "-N", "0"]).is_err());
    }
}
