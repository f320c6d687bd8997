//! Border and neighbour metadata for the distributed simulator
//!
//! An edge present in exactly two partitions' sub-networks is a border edge.
//! Each partition learns its border edges, its neighbours, the routes that
//! exist in each neighbour and the routes that end on each border edge.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::core::demand::Demand;
use crate::core::error::{Error, Result};
use crate::core::network::Network;

/// A shared edge and the direction vehicles cross it in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BorderEdge {
    pub id: String,
    pub lanes: Vec<String>,
    pub from: u32,
    pub to: u32,
}

/// Everything the simulator reads about one partition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionMetadata {
    pub id: u32,
    #[serde(rename = "borderEdges")]
    pub border_edges: Vec<BorderEdge>,
    pub neighbors: Vec<u32>,
    /// Original route ids present in each neighbour
    #[serde(rename = "neighborRoutes")]
    pub neighbor_routes: BTreeMap<u32, Vec<String>>,
    /// Original route ids whose local segment ends on each border edge
    #[serde(rename = "borderRouteEnds")]
    pub border_route_ends: BTreeMap<String, Vec<String>>,
    #[serde(rename = "lastDepart")]
    pub last_depart: f64,
}

impl PartitionMetadata {
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(|e| Error::ParseError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        std::fs::write(path, json).map_err(|e| Error::from_io(path, e))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::from_io(path, e))?;
        serde_json::from_str(&text).map_err(|e| Error::ParseError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }
}

/// Crossing direction of a border edge relative to its lower partition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Crossing {
    /// Vehicles leave the lower partition over this edge
    Outbound,
    /// Vehicles enter the lower partition over this edge
    Inbound,
    /// Direction unknown, recorded both ways
    Both,
}

/// Infer the crossing direction from the lower partition's sub-network
///
/// A dead-end from-junction means the edge's origin was cut away, so
/// traffic comes from the other partition. A dead-end to-junction means the
/// continuation was cut away. With both ends cut, or the edge missing, the
/// direction cannot be told and the edge is treated as bidirectional.
pub fn infer_crossing(subnet: &Network, edge_id: &str) -> Crossing {
    let Some(edge) = subnet.edge_by_id(edge_id) else {
        return Crossing::Both;
    };
    let from_dead = subnet.node(edge.from).is_dead_end();
    let to_dead = subnet.node(edge.to).is_dead_end();
    match (from_dead, to_dead) {
        (true, true) => Crossing::Both,
        (true, false) => Crossing::Inbound,
        (false, _) => Crossing::Outbound,
    }
}

/// Metadata of every partition plus the edges that had to be skipped
#[derive(Debug, Clone, Default)]
pub struct MetadataReport {
    pub partitions: Vec<PartitionMetadata>,
    /// Edges found in more than two partitions, with those partitions
    pub overshared_edges: BTreeMap<String, Vec<u32>>,
}

pub struct BorderMetadataGenerator<'a> {
    subnets: &'a [Network],
    demands: &'a [Demand],
}

impl<'a> BorderMetadataGenerator<'a> {
    /// `subnets[i]` and `demands[i]` are partition `i`'s network and final routes
    pub fn new(subnets: &'a [Network], demands: &'a [Demand]) -> Self {
        Self { subnets, demands }
    }

    /// Partitions owning each non-internal edge
    fn edge_owners(&self) -> BTreeMap<&'a str, Vec<u32>> {
        let mut owners: BTreeMap<&str, Vec<u32>> = BTreeMap::new();
        for (part, subnet) in self.subnets.iter().enumerate() {
            for edge in subnet.edges().iter().filter(|e| !e.internal) {
                owners.entry(edge.id.as_str()).or_default().push(part as u32);
            }
        }
        owners
    }

    fn border_records(&self, edge_id: &str, low: u32, high: u32) -> Vec<BorderEdge> {
        let subnet = &self.subnets[low as usize];
        let lanes = subnet
            .edge_by_id(edge_id)
            .map(|e| e.lanes.clone())
            .unwrap_or_default();
        let record = |from, to| BorderEdge { id: edge_id.to_string(), lanes: lanes.clone(), from, to };

        match infer_crossing(subnet, edge_id) {
            Crossing::Outbound => vec![record(low, high)],
            Crossing::Inbound => vec![record(high, low)],
            Crossing::Both => vec![record(low, high), record(high, low)],
        }
    }

    /// Original route ids of a partition
    fn visible_routes(demand: &Demand) -> Vec<String> {
        let ids: BTreeSet<&str> = demand.routes.iter().map(|r| r.lineage_id()).collect();
        ids.into_iter().map(str::to_string).collect()
    }

    fn last_depart(demand: &Demand) -> f64 {
        demand
            .elements
            .iter()
            .map(|el| el.last_depart_time())
            .fold(0.0, f64::max)
    }

    pub fn generate(&self) -> MetadataReport {
        let n = self.subnets.len();
        let mut border_edges: Vec<Vec<BorderEdge>> = vec![Vec::new(); n];
        let mut neighbors: Vec<BTreeSet<u32>> = vec![BTreeSet::new(); n];
        let mut overshared = BTreeMap::new();

        for (edge_id, parts) in self.edge_owners() {
            match parts.as_slice() {
                [_] => {}
                &[low, high] => {
                    for record in self.border_records(edge_id, low, high) {
                        border_edges[low as usize].push(record.clone());
                        border_edges[high as usize].push(record);
                    }
                    neighbors[low as usize].insert(high);
                    neighbors[high as usize].insert(low);
                }
                _ => {
                    warn!("Edge {} is in more than two partitions: {:?}", edge_id, parts);
                    overshared.insert(edge_id.to_string(), parts.clone());
                }
            }
        }

        let visible: Vec<Vec<String>> = self.demands.iter().map(Self::visible_routes).collect();

        let partitions = (0..n)
            .map(|part| {
                let demand = &self.demands[part];
                let neighbor_routes = neighbors[part]
                    .iter()
                    .map(|&q| (q, visible[q as usize].clone()))
                    .collect();

                let mut border_route_ends: BTreeMap<String, BTreeSet<String>> = border_edges[part]
                    .iter()
                    .map(|b| (b.id.clone(), BTreeSet::new()))
                    .collect();
                for route in &demand.routes {
                    if let Some(ends) = route.last_edge().and_then(|e| border_route_ends.get_mut(e)) {
                        ends.insert(route.lineage_id().to_string());
                    }
                }

                debug!(
                    "Partition {}: {} border edges, {} neighbours",
                    part,
                    border_edges[part].len(),
                    neighbors[part].len()
                );
                PartitionMetadata {
                    id: part as u32,
                    border_edges: border_edges[part].clone(),
                    neighbors: neighbors[part].iter().copied().collect(),
                    neighbor_routes,
                    border_route_ends: border_route_ends
                        .into_iter()
                        .map(|(edge, routes)| (edge, routes.into_iter().collect()))
                        .collect(),
                    last_depart: Self::last_depart(demand),
                }
            })
            .collect();

        MetadataReport { partitions, overshared_edges: overshared }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::demand::tests::edges;
    use crate::core::demand::{DemandElement, ElementKind, Route};
    use crate::core::network::tests::network_from_edges;
    use crate::core::subnet::{KeepEdges, Materializer};

    fn keep(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn path_subnets() -> Vec<Network> {
        let net = network_from_edges(&[
            ("e0", "n0", "n1"),
            ("e1", "n1", "n2"),
            ("e2", "n2", "n3"),
            ("e3", "n3", "n4"),
        ]);
        vec![
            KeepEdges.materialize(&net, &keep(&["e0", "e1", "e2"])).unwrap(),
            KeepEdges.materialize(&net, &keep(&["e2", "e3"])).unwrap(),
        ]
    }

    #[test]
    fn test_crossing_inferred_from_dead_ends() {
        let subnets = path_subnets();
        assert_eq!(infer_crossing(&subnets[0], "e2"), Crossing::Outbound);
        assert_eq!(infer_crossing(&subnets[1], "e2"), Crossing::Inbound);
        assert_eq!(infer_crossing(&subnets[0], "nope"), Crossing::Both);
    }

    #[test]
    fn test_isolated_edge_is_bidirectional() {
        let net = network_from_edges(&[("e", "n0", "n1")]);
        let sub = KeepEdges.materialize(&net, &keep(&["e"])).unwrap();
        assert_eq!(infer_crossing(&sub, "e"), Crossing::Both);
    }

    #[test]
    fn test_two_partitions_share_one_border() {
        let subnets = path_subnets();
        let mut whole = Route::new("r", edges(&["e0", "e1", "e2"]));
        whole.original_id = Some("r".to_string());
        whole.is_start = true;
        let mut tail = Route::new("r", edges(&["e2", "e3"]));
        tail.original_id = Some("r".to_string());

        let mut flow = DemandElement::vehicle("f", "r", 0.0);
        flow.kind = ElementKind::Flow;
        flow.depart = None;
        flow.begin = Some(5.0);
        flow.end = Some(50.0);

        let demands = vec![
            Demand {
                routes: vec![whole],
                elements: vec![DemandElement::vehicle("v", "r", 12.5), flow],
                ..Default::default()
            },
            Demand { routes: vec![tail], ..Default::default() },
        ];

        let report = BorderMetadataGenerator::new(&subnets, &demands).generate();
        assert!(report.overshared_edges.is_empty());
        let p0 = &report.partitions[0];
        let p1 = &report.partitions[1];

        let border = BorderEdge { id: "e2".into(), lanes: vec!["e2_0".into()], from: 0, to: 1 };
        assert_eq!(p0.border_edges, vec![border.clone()]);
        assert_eq!(p1.border_edges, vec![border]);
        assert_eq!(p0.neighbors, vec![1]);
        assert_eq!(p1.neighbors, vec![0]);
        assert_eq!(p0.neighbor_routes[&1], vec!["r".to_string()]);
        assert_eq!(p0.border_route_ends["e2"], vec!["r".to_string()]);
        assert!(p1.border_route_ends["e2"].is_empty());
        assert_eq!(p0.last_depart, 50.0);
        assert_eq!(p1.last_depart, 0.0);
    }

    #[test]
    fn test_two_way_border_recorded_both_ways() {
        let net = network_from_edges(&[
            ("e0", "n0", "n1"),
            ("-e0", "n1", "n0"),
            ("e1", "n1", "n2"),
            ("-e1", "n2", "n1"),
            ("e2", "n2", "n3"),
            ("-e2", "n3", "n2"),
        ]);
        let subnets = vec![
            KeepEdges.materialize(&net, &keep(&["e0", "-e0", "e1", "-e1"])).unwrap(),
            KeepEdges.materialize(&net, &keep(&["e1", "-e1", "e2", "-e2"])).unwrap(),
        ];
        let demands = vec![Demand::default(); 2];
        let report = BorderMetadataGenerator::new(&subnets, &demands).generate();

        let expected = vec![
            BorderEdge { id: "-e1".into(), lanes: vec!["-e1_0".into()], from: 1, to: 0 },
            BorderEdge { id: "e1".into(), lanes: vec!["e1_0".into()], from: 0, to: 1 },
        ];
        assert_eq!(report.partitions[0].border_edges, expected);
        assert_eq!(report.partitions[1].border_edges, expected);
    }

    #[test]
    fn test_overshared_edge_is_skipped() {
        let net = network_from_edges(&[("e", "n0", "n1"), ("f", "n1", "n2")]);
        let subnets: Vec<Network> = (0..3)
            .map(|_| KeepEdges.materialize(&net, &keep(&["e", "f"])).unwrap())
            .collect();
        let demands = vec![Demand::default(); 3];
        let report = BorderMetadataGenerator::new(&subnets, &demands).generate();
        assert_eq!(report.overshared_edges.len(), 2);
        assert!(report.partitions.iter().all(|p| p.border_edges.is_empty()));
    }

    #[test]
    fn test_metadata_json_keys() {
        let meta = PartitionMetadata {
            id: 1,
            border_edges: vec![],
            neighbors: vec![0],
            neighbor_routes: BTreeMap::from([(0, vec!["r".to_string()])]),
            border_route_ends: BTreeMap::new(),
            last_depart: 3.0,
        };
        let value = serde_json::to_value(&meta).unwrap();
        for key in ["id", "borderEdges", "neighbors", "neighborRoutes", "borderRouteEnds", "lastDepart"] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
        assert_eq!(value["neighborRoutes"]["0"][0], "r");

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partData1.json");
        meta.save(&path).unwrap();
        assert_eq!(PartitionMetadata::load(&path).unwrap(), meta);
    }
}
