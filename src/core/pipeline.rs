//! Run orchestration and artifact I/O
//!
//! A run goes through these stages, all files living in the data folder:
//!
//! 1. load and prepare network and demand, build the weighted graph
//! 2. partition, repair labels, write `edgesPart<i>.txt` and `numParts.txt`
//! 3. per partition on the worker pool: materialize the sub-network and
//!    segment the demand into an intermediate route file
//! 4. merge depart times, reconcile duplicates, write `part<i>.rou.json`
//! 5. write `partData<i>.json` and the run fingerprint
//!
//! Stage 4 only starts once every stage 3 task has returned.

use log::{debug, info, warn};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::assignment::assign_partitions;
use crate::core::config::{PipelineConfig, FINGERPRINT_FILE};
use crate::core::demand::Demand;
use crate::core::error::{Error, Result};
use crate::core::metadata::BorderMetadataGenerator;
use crate::core::network::Network;
use crate::core::partitioner::{GpmetisPartitioner, GrowingPartitioner, Partitioner};
use crate::core::reconcile::{reconcile, shared_vehicles, DropCounts};
use crate::core::segment::segment_partition;
use crate::core::subnet::{KeepEdges, Materializer};
use crate::core::weights::WeightedGraphBuilder;

/// Progress callback receiving (completed partitions, total partitions)
pub type ProgressCallback = Arc<dyn Fn(u64, u64) + Send + Sync>;

pub const NUM_PARTS_FILE: &str = "numParts.txt";
pub const EDGE_WEIGHTS_FILE: &str = "edge_weights.json";

pub fn edges_part_path(folder: &Path, part: u32) -> PathBuf {
    folder.join(format!("edgesPart{part}.txt"))
}

pub fn net_part_path(folder: &Path, part: u32) -> PathBuf {
    folder.join(format!("part{part}.net.json"))
}

pub fn route_part_path(folder: &Path, part: u32) -> PathBuf {
    folder.join(format!("part{part}.rou.json"))
}

pub fn interm_route_path(folder: &Path, part: u32) -> PathBuf {
    folder.join(format!("part{part}.interm.rou.json"))
}

pub fn part_data_path(folder: &Path, part: u32) -> PathBuf {
    folder.join(format!("partData{part}.json"))
}

/// Effective partition count of a finished partitioning step
pub fn read_part_count(folder: &Path) -> Result<u32> {
    let path = folder.join(NUM_PARTS_FILE);
    let text = fs::read_to_string(&path).map_err(|e| Error::from_io(&path, e))?;
    text.trim().parse().map_err(|_| Error::ParseError {
        path,
        message: format!("expected a partition count, found '{}'", text.trim()),
    })
}

fn write_part_count(folder: &Path, count: u32) -> Result<()> {
    let path = folder.join(NUM_PARTS_FILE);
    fs::write(&path, format!("{count}\n")).map_err(|e| Error::from_io(&path, e))
}

/// Edge ids listed one per line
pub fn read_edge_set(path: &Path) -> Result<BTreeSet<String>> {
    let text = fs::read_to_string(path).map_err(|e| Error::from_io(path, e))?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

fn write_edge_set(path: &Path, edges: &BTreeSet<String>) -> Result<()> {
    let mut text = String::new();
    for edge in edges {
        text.push_str(edge);
        text.push('\n');
    }
    fs::write(path, text).map_err(|e| Error::from_io(path, e))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).map_err(|e| Error::ParseError {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    fs::write(path, json).map_err(|e| Error::from_io(path, e))
}

/// Whether `name` is a file a run generates
fn is_generated_artifact(name: &str) -> bool {
    let fixed = [NUM_PARTS_FILE, EDGE_WEIGHTS_FILE, FINGERPRINT_FILE, GpmetisPartitioner::GRAPH_FILE];
    if fixed.contains(&name) || name.starts_with("metisInputFile.metis.part.") {
        return true;
    }
    let numbered = |prefix: &str, suffix: &str| {
        name.strip_prefix(prefix)
            .and_then(|rest| rest.strip_suffix(suffix))
            .map_or(false, |n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
    };
    numbered("edgesPart", ".txt")
        || numbered("part", ".net.json")
        || numbered("part", ".rou.json")
        || numbered("part", ".interm.rou.json")
        || numbered("partData", ".json")
}

/// Remove artifacts of a previous run, leaving other files alone
pub fn clean_artifacts(folder: &Path) -> Result<usize> {
    let mut removed = 0;
    for entry in fs::read_dir(folder).map_err(|e| Error::from_io(folder, e))? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if entry.file_type()?.is_file() && is_generated_artifact(name) {
            fs::remove_file(entry.path())?;
            removed += 1;
        }
    }
    if removed > 0 {
        debug!("Removed {} artifacts of a previous run", removed);
    }
    Ok(removed)
}

/// Per-partition figures of a finished run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartitionStats {
    pub part: u32,
    pub edges: usize,
    pub routes: usize,
    pub elements: usize,
    pub border_edges: usize,
    pub drops: DropCounts,
}

/// What a completed run did
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub requested_parts: u32,
    pub num_parts: u32,
    pub missing_labels: Vec<u32>,
    pub contiguity_relaxed: bool,
    pub connected: bool,
    pub edge_cut: u64,
    pub partitions: Vec<PartitionStats>,
    /// Vehicles still kept by several partitions after reconciliation
    pub shared_vehicles: BTreeMap<String, Vec<u32>>,
    /// Edges present in more than two partitions
    pub overshared_edges: BTreeMap<String, Vec<u32>>,
    pub elapsed: Option<Duration>,
}

#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed(RunSummary),
    /// The data folder already holds the output of an identical run
    Skipped,
}

/// Result of the segmentation task of one partition
struct SegmentTask {
    subnet: Network,
    departs: HashMap<String, f64>,
    temp_file: PathBuf,
}

/// Collect every task result, then fail with the first error
fn drain_then_fail<T>(results: Vec<(u32, Result<T>)>) -> Result<Vec<T>> {
    let mut ok = Vec::with_capacity(results.len());
    let mut first_error = None;
    let mut failed = 0;
    for (part, result) in results {
        match result {
            Ok(value) => ok.push(value),
            Err(e) => {
                warn!("Partition {} failed: {}", part, e);
                failed += 1;
                first_error.get_or_insert(Error::PartitionFailed { part, message: e.to_string() });
            }
        }
    }
    match first_error {
        Some(e) => {
            if failed > 1 {
                warn!("{} partitions failed", failed);
            }
            Err(e)
        }
        None => Ok(ok),
    }
}

/// Partitioning pipeline with pluggable partitioner and materializer
pub struct Pipeline {
    config: PipelineConfig,
    partitioner: Box<dyn Partitioner>,
    materializer: Box<dyn Materializer>,
    progress: Option<ProgressCallback>,
}

impl Pipeline {
    /// Pipeline using the built-in region-growing partitioner and edge filter
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            partitioner: Box::new(GrowingPartitioner),
            materializer: Box::new(KeepEdges),
            progress: None,
        }
    }

    pub fn with_partitioner(mut self, partitioner: Box<dyn Partitioner>) -> Self {
        self.partitioner = partitioner;
        self
    }

    pub fn with_materializer(mut self, materializer: Box<dyn Materializer>) -> Self {
        self.materializer = materializer;
        self
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn run(&self) -> Result<RunOutcome> {
        let config = &self.config;
        config.validate()?;

        if !config.force && config.matches_previous_run() {
            info!("Data folder already holds the output of these arguments, skipping");
            return Ok(RunOutcome::Skipped);
        }

        let start = Instant::now();
        let folder = config.data_folder.as_path();
        fs::create_dir_all(folder).map_err(|e| Error::from_io(folder, e))?;
        clean_artifacts(folder)?;

        info!("Loading network {}", config.network.display());
        let network = Network::load(&config.network)?;
        info!("Loading demand {}", config.demand.display());
        let mut demand = Demand::load(&config.demand)?;
        demand.prepare(&config.vehicle_filter)?;

        let graph = WeightedGraphBuilder::new(&network, Some(&demand), config).build();
        if config.write_edge_weights {
            write_json(&folder.join(EDGE_WEIGHTS_FILE), &graph.edge_weights)?;
        }

        let assignment = assign_partitions(
            &graph,
            self.partitioner.as_ref(),
            config.num_parts,
            config.contiguous,
        )?;
        let num_parts = assignment.num_parts;
        for (part, edges) in assignment.edge_sets(&network).iter().enumerate() {
            write_edge_set(&edges_part_path(folder, part as u32), edges)?;
        }
        write_part_count(folder, num_parts)?;
        info!("Network split into {} partitions", num_parts);

        let workers = config.threads.min(num_parts as usize).max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(|e| Error::InvalidConfig(format!("cannot start {workers} worker threads: {e}")))?;
        debug!("Processing partitions on {} threads", workers);

        let tasks = pool.install(|| self.segment_all(&network, &demand, num_parts))?;
        let mut subnets = Vec::with_capacity(tasks.len());
        let mut departs = Vec::with_capacity(tasks.len());
        let mut temp_files = Vec::with_capacity(tasks.len());
        for task in tasks {
            subnets.push(task.subnet);
            departs.push(task.departs);
            temp_files.push(task.temp_file);
        }

        let loaded: Vec<(u32, Result<Demand>)> = pool.install(|| {
            temp_files
                .par_iter()
                .enumerate()
                .map(|(part, path)| (part as u32, Demand::load(path)))
                .collect()
        });
        let mut demands = drain_then_fail(loaded)?;

        let drops = pool.install(|| reconcile(&mut demands, departs));

        let written: Vec<(u32, Result<()>)> = pool.install(|| {
            demands
                .par_iter()
                .enumerate()
                .map(|(part, d)| (part as u32, d.save(&route_part_path(folder, part as u32))))
                .collect()
        });
        drain_then_fail(written)?;

        let demand_refs: Vec<&Demand> = demands.iter().collect();
        let shared = shared_vehicles(&demand_refs);
        if !shared.is_empty() {
            let ids: Vec<&str> = shared.keys().map(String::as_str).collect();
            warn!(
                "{} vehicles are kept in more than one partition: {}",
                shared.len(),
                ids.join(", ")
            );
        }

        let report = BorderMetadataGenerator::new(&subnets, &demands).generate();
        for meta in &report.partitions {
            meta.save(&part_data_path(folder, meta.id))?;
        }

        for path in &temp_files {
            if let Err(e) = fs::remove_file(path) {
                warn!("Couldn't remove {}: {}", path.display(), e);
            }
        }

        config.save_fingerprint()?;

        let partitions = (0..num_parts as usize)
            .map(|part| PartitionStats {
                part: part as u32,
                edges: subnets[part].edges().len(),
                routes: demands[part].routes.len(),
                elements: demands[part].elements.len(),
                border_edges: report.partitions[part].border_edges.len(),
                drops: drops[part],
            })
            .collect();

        let elapsed = config.timing.then(|| start.elapsed());
        if let Some(elapsed) = elapsed {
            info!("Partitioning finished in {:.2?}", elapsed);
        }

        Ok(RunOutcome::Completed(RunSummary {
            requested_parts: assignment.requested_parts,
            num_parts,
            missing_labels: assignment.missing_labels,
            contiguity_relaxed: assignment.contiguity_relaxed,
            connected: assignment.connected,
            edge_cut: assignment.edge_cut,
            partitions,
            shared_vehicles: shared,
            overshared_edges: report.overshared_edges,
            elapsed,
        }))
    }

    /// Materialize and segment every partition on the current pool
    fn segment_all(&self, network: &Network, demand: &Demand, num_parts: u32) -> Result<Vec<SegmentTask>> {
        let done = AtomicU64::new(0);
        let total = num_parts as u64;

        let results: Vec<(u32, Result<SegmentTask>)> = (0..num_parts)
            .into_par_iter()
            .map(|part| {
                let result = self.segment_one(network, demand, part);
                let completed = done.fetch_add(1, Ordering::SeqCst) + 1;
                if let Some(progress) = &self.progress {
                    progress(completed, total);
                }
                (part, result)
            })
            .collect();

        drain_then_fail(results)
    }

    fn segment_one(&self, network: &Network, demand: &Demand, part: u32) -> Result<SegmentTask> {
        let folder = self.config.data_folder.as_path();
        let keep = read_edge_set(&edges_part_path(folder, part))?;

        let subnet = self.materializer.materialize(network, &keep)?;
        subnet.save(&net_part_path(folder, part))?;

        let segments = segment_partition(part, &keep, demand, self.config.split_multipart)?;
        let temp_file = interm_route_path(folder, part);
        segments.demand.save(&temp_file)?;

        debug!(
            "Partition {}: {} edges, {} routes, {} elements",
            part,
            subnet.edges().len(),
            segments.demand.routes.len(),
            segments.demand.elements.len()
        );
        Ok(SegmentTask { subnet, departs: segments.departs, temp_file })
    }
}
