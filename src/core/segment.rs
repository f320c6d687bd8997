//! Route segmentation
//!
//! Splits every demand route into the maximal runs of consecutive edges that
//! lie inside one partition's edge set.

use log::debug;
use std::collections::{BTreeSet, HashMap};

use crate::core::demand::{segment_id, Demand, DemandElement, Route, RouteRef};
use crate::core::error::{Error, Result};

/// A maximal run of a route's edges inside the partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Run {
    /// Position of the run's first edge in the original route
    pub start: usize,
    pub edges: Vec<String>,
}

/// Scan `edges` and collect the runs that stay inside `keep`
pub fn find_runs(edges: &[String], keep: &BTreeSet<String>) -> Vec<Run> {
    let mut runs = Vec::new();
    let mut current: Option<Run> = None;

    for (pos, edge) in edges.iter().enumerate() {
        if keep.contains(edge) {
            current
                .get_or_insert_with(|| Run { start: pos, edges: Vec::new() })
                .edges
                .push(edge.clone());
        } else if let Some(run) = current.take() {
            runs.push(run);
        }
    }
    runs.extend(current);
    runs
}

/// The partition-local routes derived from `route`
///
/// One run keeps the route whole under its original id. Several runs become
/// numbered segments, or nothing when multi-part splitting is disabled.
pub fn segment_route(route: &Route, keep: &BTreeSet<String>, split_multipart: bool) -> Vec<Route> {
    let runs = find_runs(&route.edges, keep);
    let original = route.lineage_id().to_string();

    match runs.len() {
        0 => Vec::new(),
        1 => {
            let run = &runs[0];
            vec![Route {
                id: route.id.clone(),
                edges: run.edges.clone(),
                original_id: Some(original),
                part_index: None,
                is_start: run.start == 0,
            }]
        }
        total if split_multipart => runs
            .into_iter()
            .enumerate()
            .map(|(index, run)| Route {
                id: segment_id(&original, index as u32, total),
                edges: run.edges,
                original_id: Some(original.clone()),
                part_index: Some(index as u32),
                is_start: run.start == 0,
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Route file contents and depart bookkeeping of one partition
#[derive(Debug, Clone, Default)]
pub struct PartitionSegments {
    pub part: u32,
    pub demand: Demand,
    /// Depart time per kept element id
    pub departs: HashMap<String, f64>,
}

/// Segment the whole demand against one partition's edge set
///
/// Only routes referenced by some element are kept. An element is kept where
/// its route starts, with its route reference rewritten to that segment.
pub fn segment_partition(
    part: u32,
    keep: &BTreeSet<String>,
    demand: &Demand,
    split_multipart: bool,
) -> Result<PartitionSegments> {
    let referenced = demand.referenced_routes();
    let mut out = PartitionSegments {
        part,
        demand: Demand { vtypes: demand.vtypes.clone(), ..Default::default() },
        departs: HashMap::new(),
    };

    // original route id -> id of the segment the vehicle departs on
    let mut start_segment: HashMap<&str, String> = HashMap::new();
    for route in demand.routes.iter().filter(|r| referenced.contains(r.id.as_str())) {
        for segment in segment_route(route, keep, split_multipart) {
            if segment.is_start {
                start_segment.insert(route.id.as_str(), segment.id.clone());
            }
            out.demand.routes.push(segment);
        }
    }

    for element in demand.elements.iter().filter(|el| el.kind.is_route_owner()) {
        let route = match &element.route {
            Some(RouteRef::Id(route)) => route,
            Some(RouteRef::Inline { .. }) => {
                return Err(Error::InvalidInput(format!(
                    "{} '{}' still carries an inline route",
                    element.kind, element.id
                )));
            }
            None => continue,
        };
        if let Some(segment) = start_segment.get(route.as_str()) {
            let mut kept: DemandElement = element.clone();
            kept.set_route_id(segment.clone());
            out.departs.insert(kept.id.clone(), kept.depart_time());
            out.demand.elements.push(kept);
        }
    }

    debug!(
        "Partition {}: {} routes, {} elements",
        part,
        out.demand.routes.len(),
        out.demand.elements.len()
    );
    Ok(out)
}
