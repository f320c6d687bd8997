//! Road network model
//!
//! Nodes and edges live in two arenas and refer to each other through small
//! integer handles, so incident-edge lists never form ownership cycles.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use crate::core::error::{Error, Result};

/// Junction type SUMO-style networks use for nodes without connections
pub const DEAD_END: &str = "dead_end";

/// Edge function marking junction-internal edges
pub const INTERNAL: &str = "internal";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl EdgeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub id: String,
    pub x: f64,
    pub y: f64,
    /// Junction type, e.g. `priority` or `dead_end`
    pub junction: String,
    pub incoming: Vec<EdgeId>,
    pub outgoing: Vec<EdgeId>,
}

impl Node {
    pub fn is_dead_end(&self) -> bool {
        self.junction == DEAD_END
    }

    /// Incoming and outgoing edges
    pub fn incident(&self) -> impl Iterator<Item = EdgeId> + '_ {
        self.incoming.iter().chain(self.outgoing.iter()).copied()
    }
}

#[derive(Debug, Clone)]
pub struct Edge {
    pub id: String,
    pub from: NodeId,
    pub to: NodeId,
    /// Classification tag, e.g. `highway.primary`
    pub kind: String,
    pub lanes: Vec<String>,
    pub internal: bool,
}

/// On-disk node record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawNode {
    pub id: String,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(rename = "type", default = "default_junction")]
    pub junction: String,
}

fn default_junction() -> String {
    "priority".to_string()
}

/// On-disk edge record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEdge {
    pub id: String,
    pub from: String,
    pub to: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub lanes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
}

/// On-disk network document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkFile {
    pub nodes: Vec<RawNode>,
    pub edges: Vec<RawEdge>,
}

#[derive(Debug, Clone, Default)]
pub struct Network {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    node_index: HashMap<String, NodeId>,
    edge_index: HashMap<String, EdgeId>,
}

impl Network {
    /// Build the arena from raw records, resolving node references
    pub fn from_raw(raw: NetworkFile) -> Result<Self> {
        let mut net = Network::default();

        for node in raw.nodes {
            let handle = NodeId(net.nodes.len() as u32);
            if net.node_index.insert(node.id.clone(), handle).is_some() {
                return Err(Error::InvalidInput(format!("duplicate node id '{}'", node.id)));
            }
            net.nodes.push(Node {
                id: node.id,
                x: node.x,
                y: node.y,
                junction: node.junction,
                incoming: Vec::new(),
                outgoing: Vec::new(),
            });
        }

        for edge in raw.edges {
            let from = net.resolve_node(&edge.from, &edge.id)?;
            let to = net.resolve_node(&edge.to, &edge.id)?;
            let handle = EdgeId(net.edges.len() as u32);
            if net.edge_index.insert(edge.id.clone(), handle).is_some() {
                return Err(Error::InvalidInput(format!("duplicate edge id '{}'", edge.id)));
            }
            net.nodes[from.index()].outgoing.push(handle);
            net.nodes[to.index()].incoming.push(handle);
            net.edges.push(Edge {
                id: edge.id,
                from,
                to,
                kind: edge.kind,
                lanes: edge.lanes,
                internal: edge.function.as_deref() == Some(INTERNAL),
            });
        }

        Ok(net)
    }

    fn resolve_node(&self, node_id: &str, edge_id: &str) -> Result<NodeId> {
        self.node_index.get(node_id).copied().ok_or_else(|| {
            Error::InvalidInput(format!("edge '{edge_id}' references unknown node '{node_id}'"))
        })
    }

    pub fn to_raw(&self) -> NetworkFile {
        NetworkFile {
            nodes: self
                .nodes
                .iter()
                .map(|n| RawNode {
                    id: n.id.clone(),
                    x: n.x,
                    y: n.y,
                    junction: n.junction.clone(),
                })
                .collect(),
            edges: self
                .edges
                .iter()
                .map(|e| RawEdge {
                    id: e.id.clone(),
                    from: self.node(e.from).id.clone(),
                    to: self.node(e.to).id.clone(),
                    kind: e.kind.clone(),
                    lanes: e.lanes.clone(),
                    function: e.internal.then(|| INTERNAL.to_string()),
                })
                .collect(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::from_io(path, e))?;
        let raw: NetworkFile = serde_json::from_str(&text).map_err(|e| Error::ParseError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_raw(raw)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string(&self.to_raw()).map_err(|e| Error::ParseError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        std::fs::write(path, json).map_err(|e| Error::from_io(path, e))
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn edge(&self, id: EdgeId) -> &Edge {
        &self.edges[id.index()]
    }

    pub fn node_by_id(&self, id: &str) -> Option<&Node> {
        self.node_index.get(id).map(|&h| self.node(h))
    }

    pub fn edge_by_id(&self, id: &str) -> Option<&Edge> {
        self.edge_index.get(id).map(|&h| self.edge(h))
    }

    pub fn edge_handle(&self, id: &str) -> Option<EdgeId> {
        self.edge_index.get(id).copied()
    }

    /// Ids of all non-internal edges
    pub fn edge_ids(&self) -> BTreeSet<String> {
        self.edges
            .iter()
            .filter(|e| !e.internal)
            .map(|e| e.id.clone())
            .collect()
    }
}
