//! Partition assignment and label repair
//!
//! Calls the partitioner with the contiguity constraint first, falls back to
//! relaxed partitioning on disconnected graphs, and renumbers the surviving
//! labels to a dense `[0, P')` range.

use log::{info, warn};
use std::collections::{BTreeSet, HashMap};

use crate::core::error::{Error, Result};
use crate::core::network::Network;
use crate::core::partitioner::{Partitioner, PartitionerError};
use crate::core::weights::WeightedAdjacency;

/// Labels after empty-bin repair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenseLabels {
    pub labels: Vec<u32>,
    /// Effective partition count `P'`
    pub num_parts: u32,
    /// Requested labels that no vertex carried
    pub missing: Vec<u32>,
}

/// Renumber labels so that exactly `{0, ..., P'-1}` is used
///
/// Each label moves down by the number of unused labels below it. The result
/// only depends on the set of used labels, so a dense labelling is returned
/// unchanged.
pub fn repair_labels(labels: &[u32], requested: u32) -> DenseLabels {
    let used: BTreeSet<u32> = labels.iter().copied().collect();
    let rank: HashMap<u32, u32> = used
        .iter()
        .enumerate()
        .map(|(rank, &label)| (label, rank as u32))
        .collect();

    let upper = used.iter().next_back().map_or(requested, |&max| requested.max(max + 1));
    let missing = (0..upper).filter(|l| !used.contains(l)).collect();

    DenseLabels {
        labels: labels.iter().map(|l| rank[l]).collect(),
        num_parts: used.len() as u32,
        missing,
    }
}

/// Result of partitioning the network graph
#[derive(Debug, Clone)]
pub struct Assignment {
    /// Dense partition id per network node
    pub labels: Vec<u32>,
    pub requested_parts: u32,
    pub num_parts: u32,
    pub missing_labels: Vec<u32>,
    /// The contiguity constraint had to be dropped
    pub contiguity_relaxed: bool,
    /// Result of the connectivity diagnostic
    pub connected: bool,
    pub edge_cut: u64,
}

impl Assignment {
    /// Edge ids of each partition: every non-internal edge incident to one of its nodes
    pub fn edge_sets(&self, network: &Network) -> Vec<BTreeSet<String>> {
        let mut sets = vec![BTreeSet::new(); self.num_parts as usize];
        for (node, &label) in network.nodes().iter().zip(&self.labels) {
            for edge in node.incident().map(|e| network.edge(e)) {
                if !edge.internal {
                    sets[label as usize].insert(edge.id.clone());
                }
            }
        }
        sets
    }
}

/// Partition `graph` into at most `num_parts` dense partitions
pub fn assign_partitions(
    graph: &WeightedAdjacency,
    partitioner: &dyn Partitioner,
    num_parts: u32,
    contiguous: bool,
) -> Result<Assignment> {
    let mut request = graph.to_request(num_parts, contiguous);

    let connected = request.is_connected();
    if !connected {
        warn!("Network graph is not connected");
    }

    info!(
        "Partitioning {} vertices into {} parts with {}",
        request.num_vertices(),
        num_parts,
        partitioner.name()
    );
    let mut contiguity_relaxed = false;
    let outcome = match partitioner.partition(&request) {
        Err(PartitionerError::NonContiguous) if contiguous => {
            warn!("Could not create contiguous partitions, some partitions may be disjoint");
            contiguity_relaxed = true;
            request.contiguous = false;
            partitioner.partition(&request)?
        }
        other => other?,
    };

    if outcome.labels.len() != request.num_vertices() {
        return Err(Error::Partitioner(PartitionerError::Failed(format!(
            "{} returned {} labels for {} vertices",
            partitioner.name(),
            outcome.labels.len(),
            request.num_vertices()
        ))));
    }

    let dense = repair_labels(&outcome.labels, num_parts);
    if dense.num_parts < num_parts {
        let missing: Vec<String> = dense.missing.iter().map(u32::to_string).collect();
        warn!(
            "Partitioner produced {} of {} requested partitions, missing labels: {}",
            dense.num_parts,
            num_parts,
            missing.join(", ")
        );
    }

    Ok(Assignment {
        labels: dense.labels,
        requested_parts: num_parts,
        num_parts: dense.num_parts,
        missing_labels: dense.missing,
        contiguity_relaxed,
        connected,
        edge_cut: outcome.edge_cut,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::PipelineConfig;
    use crate::core::network::tests::network_from_edges;
    use crate::core::partitioner::{GrowingPartitioner, PartitionOutcome, PartitionRequest};
    use crate::core::weights::WeightedGraphBuilder;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns fixed labels
    struct FixedLabels(Vec<u32>);

    impl Partitioner for FixedLabels {
        fn name(&self) -> &str {
            "fixed"
        }

        fn partition(&self, _: &PartitionRequest) -> std::result::Result<PartitionOutcome, PartitionerError> {
            Ok(PartitionOutcome { labels: self.0.clone(), edge_cut: 0 })
        }
    }

    /// Refuses contiguous requests, counting calls
    struct NeverContiguous(AtomicUsize);

    impl Partitioner for NeverContiguous {
        fn name(&self) -> &str {
            "never-contiguous"
        }

        fn partition(&self, request: &PartitionRequest) -> std::result::Result<PartitionOutcome, PartitionerError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            if request.contiguous {
                return Err(PartitionerError::NonContiguous);
            }
            Ok(PartitionOutcome { labels: vec![0; request.num_vertices()], edge_cut: 0 })
        }
    }

    fn graph_of(net: &Network) -> WeightedAdjacency {
        WeightedGraphBuilder::new(net, None, &PipelineConfig { edge_weights: vec![], ..Default::default() })
            .build()
    }

    #[test]
    fn test_repair_compacts_gaps() {
        let dense = repair_labels(&[4, 0, 2, 2, 4], 5);
        assert_eq!(dense.labels, vec![2, 0, 1, 1, 2]);
        assert_eq!(dense.num_parts, 3);
        assert_eq!(dense.missing, vec![1, 3]);
    }

    #[test]
    fn test_repair_is_idempotent() {
        let once = repair_labels(&[3, 1, 1, 7, 3], 8);
        let twice = repair_labels(&once.labels, once.num_parts);
        assert_eq!(twice.labels, once.labels);
        assert_eq!(twice.num_parts, once.num_parts);
        assert!(twice.missing.is_empty());
    }

    #[test]
    fn test_repair_is_order_independent() {
        let a = repair_labels(&[5, 2, 0], 6);
        let b = repair_labels(&[0, 5, 2], 6);
        assert_eq!(a.labels, vec![2, 1, 0]);
        assert_eq!(b.labels, vec![0, 2, 1]);
        assert_eq!(a.missing, b.missing);
    }

    #[test]
    fn test_five_requested_three_produced() {
        let net = network_from_edges(&[("a", "n0", "n1"), ("b", "n1", "n2")]);
        let assignment =
            assign_partitions(&graph_of(&net), &FixedLabels(vec![0, 2, 4]), 5, true).unwrap();
        assert_eq!(assignment.num_parts, 3);
        assert_eq!(assignment.labels, vec![0, 1, 2]);
        assert_eq!(assignment.missing_labels, vec![1, 3]);
    }

    #[test]
    fn test_contiguity_fallback_retries_once() {
        let net = network_from_edges(&[("a", "n0", "n1"), ("b", "n2", "n3")]);
        let partitioner = NeverContiguous(AtomicUsize::new(0));
        let assignment = assign_partitions(&graph_of(&net), &partitioner, 2, true).unwrap();
        assert!(assignment.contiguity_relaxed);
        assert!(!assignment.connected);
        assert_eq!(partitioner.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_wrong_label_count_is_an_error() {
        let net = network_from_edges(&[("a", "n0", "n1")]);
        let result = assign_partitions(&graph_of(&net), &FixedLabels(vec![0]), 2, true);
        assert!(matches!(result, Err(Error::Partitioner(_))));
    }

    #[test]
    fn test_edge_sets_include_incident_edges() {
        let net = network_from_edges(&[
            ("e0", "n0", "n1"),
            ("e1", "n1", "n2"),
            ("e2", "n2", "n3"),
            ("e3", "n3", "n4"),
        ]);
        let assignment = assign_partitions(&graph_of(&net), &GrowingPartitioner, 2, true).unwrap();
        let sets = assignment.edge_sets(&net);
        assert_eq!(sets.len(), 2);
        // exactly one edge lies on the boundary
        let shared: Vec<&String> = sets[0].intersection(&sets[1]).collect();
        assert_eq!(shared.len(), 1);
        let all: BTreeSet<&String> = sets.iter().flatten().collect();
        assert_eq!(all.len(), 4);
    }
}
