//! Weighted adjacency construction
//!
//! Turns the road network (and optionally demand statistics) into the
//! integer-weighted undirected graph consumed by a partitioner. Vertex `i`
//! of the graph is node `NodeId(i)` of the network.

use log::{debug, warn};
use once_cell::sync::Lazy;
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::core::config::{EdgeWeightFn, NodeWeightFn, PipelineConfig};
use crate::core::demand::Demand;
use crate::core::network::Network;
use crate::core::partitioner::PartitionRequest;

/// Scale applied before rounding weights to integers
pub const WEIGHT_MULTIPLIER: f64 = 10.0;

/// Range the route-frequency weight is spread over
const ROUTE_NUM_SCALE: f64 = 10.0;

/// Weight of road classes missing from the table
const DEFAULT_ROAD_CLASS_WEIGHT: f64 = 1.0;

static ROAD_CLASS_WEIGHTS: Lazy<HashMap<&'static str, f64>> = Lazy::new(|| {
    HashMap::from([
        ("motorway", 10.0),
        ("trunk", 8.0),
        ("primary", 6.0),
        ("secondary", 4.0),
        ("tertiary", 3.0),
        ("unclassified", 1.0),
        ("residential", 1.0),
        ("living_street", 0.5),
        ("service", 0.5),
    ])
});

/// Reduce a type tag such as `highway.primary_link` to `primary`
pub fn normalize_road_class(kind: &str) -> String {
    let lower = kind.to_lowercase();
    let stripped = lower.strip_prefix("highway.").unwrap_or(&lower);
    stripped.strip_suffix("_link").unwrap_or(stripped).to_string()
}

pub fn road_class_weight(kind: &str) -> f64 {
    ROAD_CLASS_WEIGHTS
        .get(normalize_road_class(kind).as_str())
        .copied()
        .unwrap_or(DEFAULT_ROAD_CLASS_WEIGHT)
}

/// Number of routes traversing each edge, each route counted once per edge
pub fn route_counts(demand: &Demand) -> HashMap<&str, u32> {
    let mut counts: HashMap<&str, u32> = HashMap::new();
    for route in &demand.routes {
        let unique: HashSet<&str> = route.edges.iter().map(String::as_str).collect();
        for edge in unique {
            *counts.entry(edge).or_insert(0) += 1;
        }
    }
    counts
}

fn scale(weight: f64) -> u64 {
    ((weight * WEIGHT_MULTIPLIER).round() as u64).max(1)
}

/// Integer-weighted undirected graph plus the per-edge weight table
#[derive(Debug, Clone, Default)]
pub struct WeightedAdjacency {
    pub xadj: Vec<usize>,
    pub adjncy: Vec<usize>,
    pub adjwgt: Vec<u64>,
    pub vwgt: Vec<u64>,
    /// Unscaled weight per network edge id
    pub edge_weights: BTreeMap<String, f64>,
}

impl WeightedAdjacency {
    pub fn num_vertices(&self) -> usize {
        self.vwgt.len()
    }

    pub fn to_request(&self, nparts: u32, contiguous: bool) -> PartitionRequest {
        PartitionRequest {
            xadj: self.xadj.clone(),
            adjncy: self.adjncy.clone(),
            adjwgt: Some(self.adjwgt.clone()),
            vwgt: Some(self.vwgt.clone()),
            nparts,
            contiguous,
        }
    }
}

pub struct WeightedGraphBuilder<'a> {
    network: &'a Network,
    demand: Option<&'a Demand>,
    edge_fns: Vec<EdgeWeightFn>,
    node_fns: Vec<NodeWeightFn>,
}

impl<'a> WeightedGraphBuilder<'a> {
    /// Functions that need demand data are dropped with a warning when none is given
    pub fn new(network: &'a Network, demand: Option<&'a Demand>, config: &PipelineConfig) -> Self {
        let edge_fns = config
            .edge_weights
            .iter()
            .copied()
            .filter(|f| {
                if f.needs_demand() && demand.is_none() {
                    warn!("Weight function '{}' needs demand data, ignoring it", f);
                    false
                } else {
                    true
                }
            })
            .collect();

        Self {
            network,
            demand,
            edge_fns,
            node_fns: config.node_weights.clone(),
        }
    }

    pub fn edge_functions(&self) -> &[EdgeWeightFn] {
        &self.edge_fns
    }

    fn edge_weight_table(&self) -> BTreeMap<String, f64> {
        let counts = self.demand.map(route_counts).unwrap_or_default();
        let max_count = counts.values().copied().max().unwrap_or(0) as f64;

        self.network
            .edges()
            .iter()
            .filter(|e| !e.internal)
            .map(|e| {
                let mut weight = 1.0;
                for f in &self.edge_fns {
                    weight += match f {
                        EdgeWeightFn::RoadClass => road_class_weight(&e.kind),
                        EdgeWeightFn::RouteNum => {
                            let count = counts.get(e.id.as_str()).copied().unwrap_or(0) as f64;
                            ROUTE_NUM_SCALE * (count + 1.0) / (max_count + 1.0)
                        }
                    };
                }
                (e.id.clone(), weight)
            })
            .collect()
    }

    fn vertex_weight(&self, connections: usize) -> f64 {
        let c = connections as f64;
        let mut weight = 1.0;
        for f in &self.node_fns {
            weight += match f {
                NodeWeightFn::Connections => c,
                NodeWeightFn::ConnectionsSquared => c * c,
            };
        }
        weight
    }

    pub fn build(&self) -> WeightedAdjacency {
        let edge_weights = self.edge_weight_table();
        let n = self.network.nodes().len();

        // Undirected node pair -> (sum of directed weights, count)
        let mut pairs: BTreeMap<(usize, usize), (f64, u32)> = BTreeMap::new();
        let mut connections = vec![0usize; n];
        for edge in self.network.edges().iter().filter(|e| !e.internal) {
            let (a, b) = (edge.from.index(), edge.to.index());
            connections[a] += 1;
            connections[b] += 1;
            if a == b {
                continue;
            }
            let key = (a.min(b), a.max(b));
            let entry = pairs.entry(key).or_insert((0.0, 0));
            entry.0 += edge_weights[&edge.id];
            entry.1 += 1;
        }

        let mut adj: Vec<Vec<(usize, u64)>> = vec![Vec::new(); n];
        for (&(a, b), &(sum, count)) in &pairs {
            let w = scale(sum / count as f64);
            adj[a].push((b, w));
            adj[b].push((a, w));
        }

        let mut graph = WeightedAdjacency {
            xadj: Vec::with_capacity(n + 1),
            edge_weights,
            ..Default::default()
        };
        graph.xadj.push(0);
        for (v, list) in adj.into_iter().enumerate() {
            for (u, w) in list {
                graph.adjncy.push(u);
                graph.adjwgt.push(w);
            }
            graph.xadj.push(graph.adjncy.len());
            graph.vwgt.push(scale(self.vertex_weight(connections[v])));
        }

        debug!(
            "Weighted graph: {} vertices, {} undirected edges",
            graph.num_vertices(),
            graph.adjncy.len() / 2
        );
        graph
    }
}
