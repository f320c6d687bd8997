//! # Netsplit Library
//!
//! Prepares a road network and its vehicle demand for a simulator that runs
//! one worker per network partition.
//!
//! ## Features
//!
//! - **Weighted partitioning**: road-class and route-frequency edge weights,
//!   connection-count vertex weights, handed to a pluggable partitioner
//! - **Dense partition ids**: empty partitions are removed and the rest renumbered
//! - **Route segmentation**: routes are cut at partition borders into stable,
//!   sortable `<route>_partNN` segments
//! - **Duplicate reconciliation**: each vehicle ends up in exactly one partition
//! - **Simulator metadata**: border edges, neighbours and hand-off routes per partition
//!
//! ## Basic Usage
//!
//! ```rust,no_run
//! use netsplit::{PipelineConfig, RunOutcome};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig {
//!         num_parts: 4,
//!         network: "city.net.json".into(),
//!         demand: "city.rou.json".into(),
//!         ..Default::default()
//!     };
//!
//!     if let RunOutcome::Completed(summary) = netsplit::run(config)? {
//!         println!("{} partitions written", summary.num_parts);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Custom Partitioner
//!
//! ```rust,no_run
//! use netsplit::{GpmetisPartitioner, Pipeline, PipelineConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PipelineConfig::default();
//! let metis = GpmetisPartitioner::new("gpmetis", &config.data_folder);
//! Pipeline::new(config).with_partitioner(Box::new(metis)).run()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

pub use crate::core::assignment::{assign_partitions, repair_labels, Assignment, DenseLabels};
pub use crate::core::config::{EdgeWeightFn, NodeWeightFn, PipelineConfig};
pub use crate::core::demand::{Demand, DemandElement, ElementKind, Route, RouteRef};
pub use crate::core::error::{Error, Result};
pub use crate::core::metadata::{BorderEdge, BorderMetadataGenerator, PartitionMetadata};
pub use crate::core::network::Network;
pub use crate::core::partitioner::{
    GpmetisPartitioner, GrowingPartitioner, PartitionOutcome, PartitionRequest, Partitioner,
    PartitionerError,
};
pub use crate::core::pipeline::{
    read_part_count, PartitionStats, Pipeline, ProgressCallback, RunOutcome, RunSummary,
};
pub use crate::core::segment::segment_partition;
pub use crate::core::subnet::{KeepEdges, Materializer};
pub use crate::core::weights::{WeightedAdjacency, WeightedGraphBuilder};

pub mod core;

/// Run the whole pipeline with the built-in partitioner
pub fn run(config: PipelineConfig) -> Result<RunOutcome> {
    Pipeline::new(config).run()
}

/// Run the whole pipeline, reporting (completed, total) partitions
///
/// # Examples
/// ```rust,no_run
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// netsplit::run_with_progress(netsplit::PipelineConfig::default(), |done, total| {
///     println!("{done}/{total} partitions segmented");
/// })?;
/// # Ok(())
/// # }
/// ```
pub fn run_with_progress<F>(config: PipelineConfig, progress: F) -> Result<RunOutcome>
where
    F: Fn(u64, u64) + Send + Sync + 'static,
{
    Pipeline::new(config).with_progress(Arc::new(progress)).run()
}
