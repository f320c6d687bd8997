//! Sub-network materialization
//!
//! Turns the full network plus a partition's edge set into that partition's
//! own network. Junctions whose continuation was cut away become dead ends,
//! which is what border direction inference later looks at.

use std::collections::{BTreeSet, HashSet};

use crate::core::error::Result;
use crate::core::network::{Network, NetworkFile, NodeId, RawEdge, RawNode, DEAD_END};

/// Builds a partition's sub-network from the full network and a kept-edge set
pub trait Materializer: Send + Sync {
    fn materialize(&self, network: &Network, keep: &BTreeSet<String>) -> Result<Network>;
}

/// Keeps the listed edges and their endpoints
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepEdges;

impl Materializer for KeepEdges {
    fn materialize(&self, network: &Network, keep: &BTreeSet<String>) -> Result<Network> {
        let kept = |id: &str| keep.contains(id);
        let mut raw = NetworkFile::default();
        let mut kept_nodes = HashSet::new();

        for edge in network.edges().iter().filter(|e| !e.internal && kept(e.id.as_str())) {
            kept_nodes.insert(edge.from);
            kept_nodes.insert(edge.to);
            raw.edges.push(RawEdge {
                id: edge.id.clone(),
                from: network.node(edge.from).id.clone(),
                to: network.node(edge.to).id.clone(),
                kind: edge.kind.clone(),
                lanes: edge.lanes.clone(),
                function: None,
            });
        }

        for (index, node) in network.nodes().iter().enumerate() {
            if !kept_nodes.contains(&NodeId(index as u32)) {
                continue;
            }

            let incoming: Vec<_> = node
                .incoming
                .iter()
                .map(|&e| network.edge(e))
                .filter(|e| !e.internal && kept(e.id.as_str()))
                .collect();
            let outgoing: Vec<_> = node
                .outgoing
                .iter()
                .map(|&e| network.edge(e))
                .filter(|e| !e.internal && kept(e.id.as_str()))
                .collect();

            // Nothing to continue onto except turning back
            let neighbours: HashSet<_> = incoming
                .iter()
                .map(|e| e.from)
                .chain(outgoing.iter().map(|e| e.to))
                .collect();
            let dead_end = incoming.is_empty() || outgoing.is_empty() || neighbours.len() < 2;

            raw.nodes.push(RawNode {
                id: node.id.clone(),
                x: node.x,
                y: node.y,
                junction: if dead_end { DEAD_END.to_string() } else { node.junction.clone() },
            });
        }

        Network::from_raw(raw)
    }
}
