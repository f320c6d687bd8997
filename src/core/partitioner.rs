//! Balanced graph partitioner boundary
//!
//! The graph is handed over in compressed adjacency form: the neighbours of
//! vertex `v` are `adjncy[xadj[v]..xadj[v + 1]]`, with `adjwgt` parallel to
//! `adjncy`. Every undirected edge appears once in each endpoint's list.

use log::{debug, warn};
use std::collections::VecDeque;
use std::fmt;
use std::fs;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::process::Command;

/// Adjacency structure and weights passed to a partitioner
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartitionRequest {
    pub xadj: Vec<usize>,
    pub adjncy: Vec<usize>,
    pub adjwgt: Option<Vec<u64>>,
    pub vwgt: Option<Vec<u64>>,
    pub nparts: u32,
    pub contiguous: bool,
}

impl PartitionRequest {
    pub fn num_vertices(&self) -> usize {
        self.xadj.len().saturating_sub(1)
    }

    /// Number of undirected edges
    pub fn num_edges(&self) -> usize {
        self.adjncy.len() / 2
    }

    /// `(neighbour, edge weight)` pairs of vertex `v`
    pub fn neighbors(&self, v: usize) -> impl Iterator<Item = (usize, u64)> + '_ {
        let range = self.xadj[v]..self.xadj[v + 1];
        range.map(move |i| {
            let w = self.adjwgt.as_ref().map_or(1, |w| w[i]);
            (self.adjncy[i], w)
        })
    }

    pub fn vertex_weight(&self, v: usize) -> u64 {
        self.vwgt.as_ref().map_or(1, |w| w[v])
    }

    /// Depth-first reachability from vertex 0 using an explicit stack
    pub fn is_connected(&self) -> bool {
        let n = self.num_vertices();
        if n == 0 {
            return true;
        }
        let mut visited = vec![false; n];
        let mut stack = vec![0usize];
        visited[0] = true;
        let mut reached = 1;

        while let Some(v) = stack.pop() {
            for (u, _) in self.neighbors(v) {
                if !visited[u] {
                    visited[u] = true;
                    reached += 1;
                    stack.push(u);
                }
            }
        }

        reached == n
    }
}

/// Labels produced by a partitioner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionOutcome {
    /// Partition label per vertex, in `[0, nparts)`
    pub labels: Vec<u32>,
    /// Total weight of edges whose endpoints carry different labels
    pub edge_cut: u64,
}

#[derive(Debug)]
pub enum PartitionerError {
    /// Contiguous partitions were requested but cannot be produced
    NonContiguous,
    /// Any other partitioner failure
    Failed(String),
}

impl fmt::Display for PartitionerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionerError::NonContiguous => {
                write!(f, "contiguous partitions requested on a disconnected graph")
            }
            PartitionerError::Failed(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for PartitionerError {}

/// A balanced partitioning algorithm
pub trait Partitioner: Send + Sync {
    fn name(&self) -> &str;

    fn partition(&self, request: &PartitionRequest) -> Result<PartitionOutcome, PartitionerError>;
}

/// Weighted edge cut of a labelling
pub fn edge_cut(request: &PartitionRequest, labels: &[u32]) -> u64 {
    let mut cut = 0;
    for v in 0..request.num_vertices() {
        for (u, w) in request.neighbors(v) {
            if u > v && labels[u] != labels[v] {
                cut += w;
            }
        }
    }
    cut
}

/// Region-growing partitioner with no external dependency
///
/// Regions are grown breadth-first, in the order of a traversal started at a
/// pseudo-peripheral vertex, until each holds its share of the remaining
/// vertex weight. Graphs with fewer vertices than requested parts yield fewer
/// labels.
#[derive(Debug, Clone, Default)]
pub struct GrowingPartitioner;

impl GrowingPartitioner {
    fn bfs_farthest(request: &PartitionRequest, start: usize) -> usize {
        let mut visited = vec![false; request.num_vertices()];
        let mut queue = VecDeque::new();
        visited[start] = true;
        queue.push_back(start);
        let mut last = start;
        while let Some(v) = queue.pop_front() {
            last = v;
            for (u, _) in request.neighbors(v) {
                if !visited[u] {
                    visited[u] = true;
                    queue.push_back(u);
                }
            }
        }
        last
    }

    /// Next unassigned seed: prefer one bordering already assigned vertices
    fn next_seed(request: &PartitionRequest, labels: &[Option<u32>]) -> Option<usize> {
        let bordering = (0..labels.len()).find(|&v| {
            labels[v].is_none() && request.neighbors(v).any(|(u, _)| labels[u].is_some())
        });
        bordering.or_else(|| labels.iter().position(Option::is_none))
    }

    /// Hand every unlabelled vertex to the region that reaches it first
    ///
    /// Growth runs breadth-first from all labelled vertices at once, so each
    /// absorbed vertex is joined to its region through vertices of that region.
    fn absorb_pockets(request: &PartitionRequest, labels: &mut [Option<u32>]) {
        let mut queue: VecDeque<usize> =
            (0..labels.len()).filter(|&v| labels[v].is_some()).collect();
        while let Some(v) = queue.pop_front() {
            let label = labels[v];
            for (u, _) in request.neighbors(v) {
                if labels[u].is_none() {
                    labels[u] = label;
                    queue.push_back(u);
                }
            }
        }
    }
}

impl Partitioner for GrowingPartitioner {
    fn name(&self) -> &str {
        "growing"
    }

    fn partition(&self, request: &PartitionRequest) -> Result<PartitionOutcome, PartitionerError> {
        let n = request.num_vertices();
        if request.nparts == 0 {
            return Err(PartitionerError::Failed("cannot split into 0 parts".to_string()));
        }
        if request.contiguous && !request.is_connected() {
            return Err(PartitionerError::NonContiguous);
        }
        if n == 0 {
            return Ok(PartitionOutcome { labels: Vec::new(), edge_cut: 0 });
        }

        let nparts = request.nparts.min(n as u32);
        let mut labels: Vec<Option<u32>> = vec![None; n];
        let mut remaining_weight: u64 = (0..n).map(|v| request.vertex_weight(v)).sum();
        let first_seed = Self::bfs_farthest(request, 0);

        for part in 0..nparts {
            let parts_left = (nparts - part) as u64;
            let target = remaining_weight.div_ceil(parts_left).max(1);
            let last_part = part + 1 == nparts;
            let mut weight = 0u64;
            let mut queue = VecDeque::new();

            'grow: loop {
                let seed = if part == 0 && weight == 0 && labels[first_seed].is_none() {
                    Some(first_seed)
                } else {
                    Self::next_seed(request, &labels)
                };
                let Some(seed) = seed else { break };
                labels[seed] = Some(part);
                weight += request.vertex_weight(seed);
                queue.push_back(seed);

                while let Some(v) = queue.pop_front() {
                    if !last_part && weight >= target {
                        break 'grow;
                    }
                    for (u, _) in request.neighbors(v) {
                        if labels[u].is_none() {
                            labels[u] = Some(part);
                            weight += request.vertex_weight(u);
                            queue.push_back(u);
                            if !last_part && weight >= target {
                                break 'grow;
                            }
                        }
                    }
                }

                // Target met as the queue drained
                if !last_part && weight >= target {
                    break;
                }
                // Contiguous regions grow from a single seed
                if request.contiguous {
                    break;
                }
            }

            remaining_weight = remaining_weight.saturating_sub(weight);
            debug!("Grown partition {} with weight {}", part, weight);
        }

        if request.contiguous {
            Self::absorb_pockets(request, &mut labels);
            if labels.iter().any(Option::is_none) {
                return Err(PartitionerError::NonContiguous);
            }
        }

        // Without contiguity the last region keeps seeding until every vertex is labelled
        let labels_out: Vec<u32> = labels.into_iter().map(|l| l.unwrap_or(nparts - 1)).collect();
        let edge_cut = edge_cut(request, &labels_out);
        Ok(PartitionOutcome { labels: labels_out, edge_cut })
    }
}

/// Runs the `gpmetis` executable on a METIS graph file
#[derive(Debug, Clone)]
pub struct GpmetisPartitioner {
    pub binary: PathBuf,
    /// Folder receiving the METIS input and output files
    pub work_dir: PathBuf,
}

impl GpmetisPartitioner {
    pub const GRAPH_FILE: &'static str = "metisInputFile.metis";

    pub fn new(binary: impl Into<PathBuf>, work_dir: impl Into<PathBuf>) -> Self {
        Self { binary: binary.into(), work_dir: work_dir.into() }
    }

    fn graph_path(&self) -> PathBuf {
        self.work_dir.join(Self::GRAPH_FILE)
    }

    /// Write the graph in METIS format with vertex and edge weights (`fmt = 011`)
    fn write_graph(&self, request: &PartitionRequest) -> std::io::Result<()> {
        let file = fs::File::create(self.graph_path())?;
        let mut out = BufWriter::new(file);
        writeln!(out, "{} {} 011", request.num_vertices(), request.num_edges())?;
        for v in 0..request.num_vertices() {
            write!(out, "{}", request.vertex_weight(v))?;
            for (u, w) in request.neighbors(v) {
                write!(out, " {} {}", u + 1, w.max(1))?;
            }
            writeln!(out)?;
        }
        out.flush()
    }

    fn read_labels(&self, nparts: u32, n: usize) -> Result<Vec<u32>, PartitionerError> {
        let path = self.work_dir.join(format!("{}.part.{}", Self::GRAPH_FILE, nparts));
        let file = fs::File::open(&path).map_err(|e| {
            PartitionerError::Failed(format!("cannot open {}: {}", path.display(), e))
        })?;

        let mut labels = Vec::with_capacity(n);
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| PartitionerError::Failed(e.to_string()))?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let label = line.parse::<u32>().map_err(|_| {
                PartitionerError::Failed(format!("bad label '{}' in {}", line, path.display()))
            })?;
            labels.push(label);
        }

        if labels.len() != n {
            return Err(PartitionerError::Failed(format!(
                "expected {} labels, got {}",
                n,
                labels.len()
            )));
        }
        let _ = fs::remove_file(&path);
        Ok(labels)
    }
}

impl Partitioner for GpmetisPartitioner {
    fn name(&self) -> &str {
        "gpmetis"
    }

    fn partition(&self, request: &PartitionRequest) -> Result<PartitionOutcome, PartitionerError> {
        let n = request.num_vertices();
        if request.nparts <= 1 || n == 0 {
            // gpmetis refuses a single part
            return Ok(PartitionOutcome { labels: vec![0; n], edge_cut: 0 });
        }

        self.write_graph(request).map_err(|e| {
            PartitionerError::Failed(format!("cannot write METIS graph: {}", e))
        })?;

        let mut cmd = Command::new(&self.binary);
        cmd.arg("-objtype=vol");
        if request.contiguous {
            cmd.arg("-contig");
        }
        cmd.arg(self.graph_path()).arg(request.nparts.to_string());
        debug!("Running {:?}", cmd);

        let output = cmd.output().map_err(|e| {
            PartitionerError::Failed(format!("cannot run {}: {}", self.binary.display(), e))
        })?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if request.contiguous
            && (stdout.contains("not contiguous") || stderr.contains("not contiguous"))
        {
            return Err(PartitionerError::NonContiguous);
        }
        if !output.status.success() {
            warn!("gpmetis output:\n{}{}", stdout, stderr);
            return Err(PartitionerError::Failed(format!(
                "gpmetis exited with {}",
                output.status
            )));
        }

        let labels = self.read_labels(request.nparts, n)?;
        let _ = fs::remove_file(self.graph_path());
        let edge_cut = edge_cut(request, &labels);
        Ok(PartitionOutcome { labels, edge_cut })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Undirected unit-weight graph from an edge list
    pub(crate) fn request_from_edges(n: usize, edges: &[(usize, usize)], nparts: u32) -> PartitionRequest {
        let mut adj = vec![Vec::new(); n];
        for &(a, b) in edges {
            adj[a].push(b);
            adj[b].push(a);
        }
        let mut xadj = vec![0];
        let mut adjncy = Vec::new();
        for list in adj {
            adjncy.extend(list);
            xadj.push(adjncy.len());
        }
        PartitionRequest { xadj, adjncy, adjwgt: None, vwgt: None, nparts, contiguous: true }
    }

    fn path(n: usize, nparts: u32) -> PartitionRequest {
        let edges: Vec<(usize, usize)> = (0..n - 1).map(|i| (i, i + 1)).collect();
        request_from_edges(n, &edges, nparts)
    }

    #[test]
    fn test_connectivity_survives_long_chains() {
        let request = path(200_000, 2);
        assert!(request.is_connected());
        let split = request_from_edges(4, &[(0, 1), (2, 3)], 2);
        assert!(!split.is_connected());
    }

    #[test]
    fn test_growing_splits_path_into_contiguous_halves() {
        let request = path(6, 2);
        let outcome = GrowingPartitioner.partition(&request).unwrap();
        assert_eq!(outcome.edge_cut, 1);
        let first = outcome.labels[0];
        let changes = outcome.labels.windows(2).filter(|w| w[0] != w[1]).count();
        assert_eq!(changes, 1);
        assert_eq!(outcome.labels.iter().filter(|&&l| l == first).count(), 3);
    }

    /// Whether the vertices labelled `part` induce a connected subgraph
    fn part_is_contiguous(request: &PartitionRequest, labels: &[u32], part: u32) -> bool {
        let members: Vec<usize> = (0..labels.len()).filter(|&v| labels[v] == part).collect();
        let Some(&start) = members.first() else { return true };
        let mut seen = vec![false; labels.len()];
        let mut stack = vec![start];
        seen[start] = true;
        let mut reached = 1;
        while let Some(v) = stack.pop() {
            for (u, _) in request.neighbors(v) {
                if labels[u] == part && !seen[u] {
                    seen[u] = true;
                    reached += 1;
                    stack.push(u);
                }
            }
        }
        reached == members.len()
    }

    #[test]
    fn test_growing_keeps_tree_branches_contiguous() {
        // Centre 0 with three arms of four vertices
        let mut edges = Vec::new();
        for arm in 0..3 {
            let first = 1 + arm * 4;
            edges.push((0, first));
            for i in first..first + 3 {
                edges.push((i, i + 1));
            }
        }
        let request = request_from_edges(13, &edges, 2);
        assert!(request.is_connected());

        let outcome = GrowingPartitioner.partition(&request).unwrap();
        assert_eq!(outcome.labels.len(), 13);
        for part in 0..2 {
            assert!(
                part_is_contiguous(&request, &outcome.labels, part),
                "part {part} split in {:?}",
                outcome.labels
            );
        }
        assert_eq!(outcome.edge_cut, edge_cut(&request, &outcome.labels));
    }

    #[test]
    fn test_growing_keeps_grid_parts_contiguous() {
        let side = 6;
        let mut edges = Vec::new();
        for r in 0..side {
            for c in 0..side {
                let v = r * side + c;
                if c + 1 < side {
                    edges.push((v, v + 1));
                }
                if r + 1 < side {
                    edges.push((v, v + side));
                }
            }
        }
        for nparts in 2..=5 {
            let request = request_from_edges(side * side, &edges, nparts);
            let outcome = GrowingPartitioner.partition(&request).unwrap();
            for part in 0..nparts {
                assert!(
                    part_is_contiguous(&request, &outcome.labels, part),
                    "{nparts} parts, part {part} split in {:?}",
                    outcome.labels
                );
            }
        }
    }

    #[test]
    fn test_growing_rejects_contiguity_on_disconnected_graph() {
        let mut request = request_from_edges(4, &[(0, 1), (2, 3)], 2);
        assert!(matches!(
            GrowingPartitioner.partition(&request),
            Err(PartitionerError::NonContiguous)
        ));
        request.contiguous = false;
        let outcome = GrowingPartitioner.partition(&request).unwrap();
        assert_eq!(outcome.labels.len(), 4);
        assert_eq!(outcome.edge_cut, 0);
    }

    #[test]
    fn test_growing_yields_fewer_labels_on_tiny_graphs() {
        let request = path(3, 5);
        let outcome = GrowingPartitioner.partition(&request).unwrap();
        let mut used = outcome.labels.clone();
        used.sort_unstable();
        used.dedup();
        assert_eq!(used, vec![0, 1, 2]);
    }

    #[test]
    fn test_edge_cut_uses_weights() {
        let mut request = path(3, 2);
        request.adjwgt = Some(vec![5, 5, 7, 7]);
        assert_eq!(edge_cut(&request, &[0, 0, 1]), 7);
        assert_eq!(edge_cut(&request, &[0, 1, 0]), 12);
    }

    #[test]
    fn test_gpmetis_graph_file_format() {
        let dir = tempfile::tempdir().unwrap();
        let metis = GpmetisPartitioner::new("gpmetis", dir.path());
        let mut request = path(3, 2);
        request.vwgt = Some(vec![10, 20, 10]);
        metis.write_graph(&request).unwrap();
        let text = fs::read_to_string(dir.path().join(GpmetisPartitioner::GRAPH_FILE)).unwrap();
        assert_eq!(text, "3 2 011\n10 2 1\n20 1 1 3 1\n10 2 1\n");
    }

    /// Executable shell script standing in for gpmetis
    #[cfg(unix)]
    fn fake_gpmetis(dir: &std::path::Path, body: &str) -> GpmetisPartitioner {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join("gpmetis");
        fs::write(&script, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        GpmetisPartitioner::new(script, dir)
    }

    #[test]
    #[cfg(unix)]
    fn test_gpmetis_contiguity_complaint() {
        let dir = tempfile::tempdir().unwrap();
        let metis = fake_gpmetis(
            dir.path(),
            "echo 'The input graph is not contiguous.'\nexit 1",
        );
        assert!(matches!(
            metis.partition(&path(4, 2)),
            Err(PartitionerError::NonContiguous)
        ));
    }

    #[test]
    #[cfg(unix)]
    fn test_gpmetis_relaxed_rerun_reads_labels() {
        let dir = tempfile::tempdir().unwrap();
        let part_file = dir.path().join("metisInputFile.metis.part.2");
        let body = format!(
            "case \" $* \" in *\" -contig \"*) echo 'not contiguous'; exit 1;; esac\n\
             printf '0\\n0\\n1\\n1\\n' > '{}'",
            part_file.display()
        );
        let metis = fake_gpmetis(dir.path(), &body);

        let mut request = path(4, 2);
        assert!(matches!(metis.partition(&request), Err(PartitionerError::NonContiguous)));

        request.contiguous = false;
        let outcome = metis.partition(&request).unwrap();
        assert_eq!(outcome.labels, vec![0, 0, 1, 1]);
        assert_eq!(outcome.edge_cut, 1);
        assert!(!part_file.exists());
        assert!(!dir.path().join(GpmetisPartitioner::GRAPH_FILE).exists());
    }

    #[test]
    #[cfg(unix)]
    fn test_gpmetis_wrong_label_count_fails() {
        let dir = tempfile::tempdir().unwrap();
        let part_file = dir.path().join("metisInputFile.metis.part.2");
        let body = format!("printf '0\\n1\\n1\\n' > '{}'", part_file.display());
        let metis = fake_gpmetis(dir.path(), &body);
        match metis.partition(&path(4, 2)) {
            Err(PartitionerError::Failed(msg)) => assert!(msg.contains("expected 4 labels"), "{msg}"),
            other => panic!("Expected failure, got {other:?}"),
        }
    }

    #[test]
    #[cfg(unix)]
    fn test_gpmetis_exit_status_failure() {
        let dir = tempfile::tempdir().unwrap();
        let metis = fake_gpmetis(dir.path(), "echo 'Memory allocation failed' >&2\nexit 2");
        match metis.partition(&path(4, 2)) {
            Err(PartitionerError::Failed(msg)) => assert!(msg.contains("gpmetis exited"), "{msg}"),
            other => panic!("Expected failure, got {other:?}"),
        }
    }

    #[test]
    fn test_gpmetis_missing_binary_fails() {
        let dir = tempfile::tempdir().unwrap();
        let metis = GpmetisPartitioner::new(dir.path().join("no-such-gpmetis"), dir.path());
        assert!(matches!(
            metis.partition(&path(4, 2)),
            Err(PartitionerError::Failed(_))
        ));
    }
}
