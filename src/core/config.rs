//! Pipeline configuration
//!
//! A single `PipelineConfig` value is passed explicitly to every stage.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::core::error::{suggest_correction, Error, Result};

/// Name of the run fingerprint file in the data folder
pub const FINGERPRINT_FILE: &str = "partArgs.json";

/// Edge weighting functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeWeightFn {
    /// Road classification lookup
    #[serde(rename = "osm")]
    RoadClass,
    /// Number of demand routes traversing the edge
    #[serde(rename = "route-num")]
    RouteNum,
}

impl EdgeWeightFn {
    pub const NAMES: &'static [&'static str] = &["osm", "route-num"];

    pub fn name(&self) -> &'static str {
        match self {
            EdgeWeightFn::RoadClass => "osm",
            EdgeWeightFn::RouteNum => "route-num",
        }
    }

    /// Whether the function needs demand data to be computed
    pub fn needs_demand(&self) -> bool {
        matches!(self, EdgeWeightFn::RouteNum)
    }
}

impl fmt::Display for EdgeWeightFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EdgeWeightFn {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "osm" => Ok(EdgeWeightFn::RoadClass),
            "route-num" => Ok(EdgeWeightFn::RouteNum),
            other => Err(unknown_name("edge weight function", other, Self::NAMES)),
        }
    }
}

/// Vertex weighting functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeWeightFn {
    /// Number of incident edges
    #[serde(rename = "connections")]
    Connections,
    /// Squared number of incident edges
    #[serde(rename = "connexp")]
    ConnectionsSquared,
}

impl NodeWeightFn {
    pub const NAMES: &'static [&'static str] = &["connections", "connexp"];

    pub fn name(&self) -> &'static str {
        match self {
            NodeWeightFn::Connections => "connections",
            NodeWeightFn::ConnectionsSquared => "connexp",
        }
    }
}

impl fmt::Display for NodeWeightFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for NodeWeightFn {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "connections" => Ok(NodeWeightFn::Connections),
            "connexp" => Ok(NodeWeightFn::ConnectionsSquared),
            other => Err(unknown_name("node weight function", other, Self::NAMES)),
        }
    }
}

fn unknown_name(what: &str, name: &str, known: &[&str]) -> Error {
    match suggest_correction(name, known) {
        Some(suggestion) => Error::InvalidConfig(format!(
            "unknown {what} '{name}', did you mean '{suggestion}'?"
        )),
        None => Error::InvalidConfig(format!(
            "unknown {what} '{name}' (expected one of: {})",
            known.join(", ")
        )),
    }
}

/// Full configuration of one partitioning run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Requested number of partitions
    pub num_parts: u32,
    /// Network JSON file
    pub network: PathBuf,
    /// Demand JSON file
    pub demand: PathBuf,
    /// Folder receiving every artifact
    pub data_folder: PathBuf,
    pub edge_weights: Vec<EdgeWeightFn>,
    pub node_weights: Vec<NodeWeightFn>,
    /// Worker threads, capped at the effective partition count
    pub threads: usize,
    /// Keep routes that leave and re-enter a partition as numbered parts
    pub split_multipart: bool,
    /// Ask the partitioner for contiguous partitions first
    pub contiguous: bool,
    /// Only keep these vehicle ids (empty keeps everything)
    pub vehicle_filter: Vec<String>,
    /// Write `edge_weights.json`
    pub write_edge_weights: bool,
    /// Rerun even if the data folder holds output of an identical run
    pub force: bool,
    /// Log elapsed time
    pub timing: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            num_parts: 2,
            network: PathBuf::from("network.json"),
            demand: PathBuf::from("demand.json"),
            data_folder: PathBuf::from("data"),
            edge_weights: vec![EdgeWeightFn::RouteNum],
            node_weights: Vec::new(),
            threads: num_cpus::get(),
            split_multipart: true,
            contiguous: true,
            vehicle_filter: Vec::new(),
            write_edge_weights: true,
            force: false,
            timing: false,
        }
    }
}

/// Output-affecting subset of the configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFingerprint {
    pub num_parts: u32,
    pub network: PathBuf,
    pub demand: PathBuf,
    pub edge_weights: Vec<EdgeWeightFn>,
    pub node_weights: Vec<NodeWeightFn>,
    pub split_multipart: bool,
    pub contiguous: bool,
    pub vehicle_filter: Vec<String>,
    pub write_edge_weights: bool,
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.num_parts == 0 {
            return Err(Error::InvalidConfig(
                "partition count must be a positive integer".to_string(),
            ));
        }
        if self.threads == 0 {
            return Err(Error::InvalidConfig(
                "thread count must be a positive integer".to_string(),
            ));
        }
        Ok(())
    }

    pub fn fingerprint(&self) -> RunFingerprint {
        RunFingerprint {
            num_parts: self.num_parts,
            network: self.network.clone(),
            demand: self.demand.clone(),
            edge_weights: self.edge_weights.clone(),
            node_weights: self.node_weights.clone(),
            split_multipart: self.split_multipart,
            contiguous: self.contiguous,
            vehicle_filter: self.vehicle_filter.clone(),
            write_edge_weights: self.write_edge_weights,
        }
    }

    pub fn fingerprint_path(&self) -> PathBuf {
        self.data_folder.join(FINGERPRINT_FILE)
    }

    /// True when the data folder already holds output of an identical run
    pub fn matches_previous_run(&self) -> bool {
        match read_fingerprint(&self.fingerprint_path()) {
            Ok(Some(previous)) => previous == self.fingerprint(),
            Ok(None) => false,
            Err(e) => {
                log::warn!("Couldn't check previous run arguments: {e}");
                false
            }
        }
    }

    pub fn save_fingerprint(&self) -> Result<()> {
        let path = self.fingerprint_path();
        let json = serde_json::to_string_pretty(&self.fingerprint()).map_err(|e| {
            Error::ParseError { path: path.clone(), message: e.to_string() }
        })?;
        std::fs::write(&path, json).map_err(|e| Error::from_io(&path, e))
    }
}

fn read_fingerprint(path: &Path) -> Result<Option<RunFingerprint>> {
    if !path.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(path).map_err(|e| Error::from_io(path, e))?;
    serde_json::from_str(&text)
        .map(Some)
        .map_err(|e| Error::ParseError { path: path.to_path_buf(), message: e.to_string() })
}
