//! Cross-partition reconciliation
//!
//! A vehicle whose route starts on or near a border can survive segmentation
//! in more than one partition. These passes leave at most one authoritative
//! copy per vehicle and keep multi-part numbering dense. Every pass is a
//! plain function over per-partition data so the orchestrator decides how
//! they are scheduled.

use log::{debug, info, warn};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::core::demand::{segment_id, Demand};

/// Depart times closer than this are considered equal
pub const DEPART_TOLERANCE: f64 = 0.001;

/// Per-vehicle minimum over all partitions' depart maps
pub fn merge_min_departs<I>(maps: I) -> HashMap<String, f64>
where
    I: IntoIterator<Item = HashMap<String, f64>>,
{
    maps.into_iter().fold(HashMap::new(), |mut merged, map| {
        for (id, depart) in map {
            merged
                .entry(id)
                .and_modify(|d: &mut f64| *d = d.min(depart))
                .or_insert(depart);
        }
        merged
    })
}

/// Drop copies departing later than the authoritative time
pub fn drop_late_copies(demand: &mut Demand, authoritative: &HashMap<String, f64>) -> usize {
    let before = demand.elements.len();
    demand.elements.retain(|el| match authoritative.get(&el.id) {
        Some(&min) => el.depart_time() <= min + DEPART_TOLERANCE,
        None => true,
    });
    before - demand.elements.len()
}

/// Keep the first route of each id
pub fn dedupe_route_ids(demand: &mut Demand) -> usize {
    let mut seen = HashSet::new();
    let before = demand.routes.len();
    demand.routes.retain(|r| seen.insert(r.id.clone()));
    before - demand.routes.len()
}

/// Edge count of the route each kept element departs on
pub fn departure_route_lengths(demand: &Demand) -> HashMap<String, usize> {
    let lengths: HashMap<&str, usize> =
        demand.routes.iter().map(|r| (r.id.as_str(), r.edges.len())).collect();
    demand
        .elements
        .iter()
        .map(|el| {
            let len = el.route_id().and_then(|r| lengths.get(r)).copied().unwrap_or(0);
            (el.id.clone(), len)
        })
        .collect()
}

/// Vehicles each partition must drop so only the longest copy survives
///
/// Ties on length go to the lowest partition index.
pub fn resolve_longest(lengths: &[HashMap<String, usize>]) -> Vec<HashSet<String>> {
    let mut best: HashMap<&str, (usize, usize)> = HashMap::new();
    for (part, map) in lengths.iter().enumerate() {
        for (id, &len) in map {
            best.entry(id.as_str())
                .and_modify(|b| {
                    if len > b.0 {
                        *b = (len, part);
                    }
                })
                .or_insert((len, part));
        }
    }

    lengths
        .iter()
        .enumerate()
        .map(|(part, map)| {
            map.keys()
                .filter(|id| best[id.as_str()].1 != part)
                .cloned()
                .collect()
        })
        .collect()
}

/// Remove the listed elements and any route nothing references anymore
pub fn drop_elements(demand: &mut Demand, ids: &HashSet<String>) -> usize {
    if ids.is_empty() {
        return 0;
    }
    let mut released = HashSet::new();
    let before = demand.elements.len();
    demand.elements.retain(|el| {
        if ids.contains(&el.id) {
            if let Some(route) = el.route_id() {
                released.insert(route.to_string());
            }
            false
        } else {
            true
        }
    });

    let still_used: HashSet<String> =
        demand.referenced_routes().into_iter().map(str::to_string).collect();
    demand
        .routes
        .retain(|r| !released.contains(&r.id) || still_used.contains(&r.id));
    before - demand.elements.len()
}

/// Renumber surviving segments of each original route to `0..k-1`
///
/// Element references follow the renamed segments. Returns the number of
/// renamed routes.
pub fn repair_part_gaps(demand: &mut Demand) -> usize {
    let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (i, route) in demand.routes.iter().enumerate() {
        if route.is_multipart() {
            groups.entry(route.lineage_id().to_string()).or_default().push(i);
        }
    }

    let mut renames: HashMap<String, String> = HashMap::new();
    for (original, mut members) in groups {
        members.sort_by_key(|&i| demand.routes[i].part_index);
        let total = members.len();
        for (new_index, &i) in members.iter().enumerate() {
            let route = &mut demand.routes[i];
            let id = segment_id(&original, new_index as u32, total);
            route.part_index = Some(new_index as u32);
            if route.id != id {
                renames.insert(std::mem::replace(&mut route.id, id.clone()), id);
            }
        }
    }

    for el in &mut demand.elements {
        if let Some(new_id) = el.route_id().and_then(|r| renames.get(r)).cloned() {
            el.set_route_id(new_id);
        }
    }
    renames.len()
}

/// Vehicle ids kept in more than one partition, with the partitions keeping them
pub fn shared_vehicles(demands: &[&Demand]) -> BTreeMap<String, Vec<u32>> {
    let mut owners: BTreeMap<String, Vec<u32>> = BTreeMap::new();
    for (part, demand) in demands.iter().enumerate() {
        let ids: BTreeSet<&str> = demand.elements.iter().map(|el| el.id.as_str()).collect();
        for id in ids {
            owners.entry(id.to_string()).or_default().push(part as u32);
        }
    }
    owners.retain(|_, parts| parts.len() > 1);
    owners
}

/// Drop counts of one partition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DropCounts {
    pub late_copies: usize,
    pub duplicate_routes: usize,
    pub shorter_copies: usize,
    pub renamed_segments: usize,
}

/// Run every reconciliation pass over the segmented partitions
///
/// `departs` are the per-partition depart maps of the segmentation phase.
/// The global merge finishes before any partition is touched; per-partition
/// passes run on the current rayon pool.
pub fn reconcile(demands: &mut [Demand], departs: Vec<HashMap<String, f64>>) -> Vec<DropCounts> {
    let authoritative = merge_min_departs(departs);

    let mut counts: Vec<DropCounts> = demands
        .par_iter_mut()
        .enumerate()
        .map(|(part, demand)| {
            let late_copies = drop_late_copies(demand, &authoritative);
            let duplicate_routes = dedupe_route_ids(demand);
            if duplicate_routes > 0 {
                warn!("Partition {}: removed {} duplicate routes", part, duplicate_routes);
            }
            DropCounts { late_copies, duplicate_routes, ..Default::default() }
        })
        .collect();

    let lengths: Vec<_> = demands.iter().map(departure_route_lengths).collect();
    let losers = resolve_longest(&lengths);

    demands
        .par_iter_mut()
        .zip(counts.par_iter_mut())
        .zip(losers.par_iter())
        .enumerate()
        .for_each(|(part, ((demand, count), drop))| {
            count.shorter_copies = drop_elements(demand, drop);
            count.renamed_segments = repair_part_gaps(demand);
            debug!(
                "Partition {}: removed {} later and {} shorter duplicate vehicles",
                part, count.late_copies, count.shorter_copies
            );
        });

    let total: usize = counts.iter().map(|c| c.late_copies + c.shorter_copies).sum();
    info!("Removed {} duplicate vehicle copies across partitions", total);
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::demand::tests::edges;
    use crate::core::demand::{DemandElement, Route};

    fn map(entries: &[(&str, f64)]) -> HashMap<String, f64> {
        entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn segment(original: &str, index: u32, total: usize, e: &[&str]) -> Route {
        Route {
            id: segment_id(original, index, total),
            edges: edges(e),
            original_id: Some(original.to_string()),
            part_index: Some(index),
            is_start: index == 0,
        }
    }

    #[test]
    fn test_merge_takes_minimum() {
        let merged = merge_min_departs(vec![
            map(&[("v0", 5.0), ("v1", 1.0)]),
            map(&[("v0", 3.0)]),
            map(&[("v2", 7.0)]),
        ]);
        assert_eq!(merged, map(&[("v0", 3.0), ("v1", 1.0), ("v2", 7.0)]));
    }

    #[test]
    fn test_late_copies_dropped_within_tolerance() {
        let mut demand = Demand {
            elements: vec![
                DemandElement::vehicle("v0", "r", 3.0005),
                DemandElement::vehicle("v1", "r", 4.0),
            ],
            ..Default::default()
        };
        let dropped = drop_late_copies(&mut demand, &map(&[("v0", 3.0), ("v1", 2.0)]));
        assert_eq!(dropped, 1);
        assert_eq!(demand.elements[0].id, "v0");
    }

    #[test]
    fn test_duplicate_route_ids_keep_first() {
        let mut demand = Demand {
            routes: vec![
                Route::new("r", edges(&["a"])),
                Route::new("r", edges(&["b"])),
                Route::new("s", edges(&["c"])),
            ],
            ..Default::default()
        };
        assert_eq!(dedupe_route_ids(&mut demand), 1);
        assert_eq!(demand.routes[0].edges, edges(&["a"]));
        assert_eq!(demand.routes.len(), 2);
    }

    #[test]
    fn test_longest_copy_wins_and_ties_go_low() {
        let lengths = vec![
            HashMap::from([("v0".to_string(), 1), ("v1".to_string(), 2)]),
            HashMap::from([("v0".to_string(), 4), ("v1".to_string(), 2)]),
            HashMap::from([("v1".to_string(), 2)]),
        ];
        let losers = resolve_longest(&lengths);
        assert_eq!(losers[0], HashSet::from(["v0".to_string()]));
        assert_eq!(losers[1], HashSet::from(["v1".to_string()]));
        assert_eq!(losers[2], HashSet::from(["v1".to_string()]));
    }

    #[test]
    fn test_drop_keeps_routes_still_in_use() {
        let mut demand = Demand {
            routes: vec![Route::new("r", edges(&["a"])), Route::new("s", edges(&["b"]))],
            elements: vec![
                DemandElement::vehicle("v0", "r", 0.0),
                DemandElement::vehicle("v1", "r", 0.0),
                DemandElement::vehicle("v2", "s", 0.0),
            ],
            ..Default::default()
        };
        let ids = HashSet::from(["v0".to_string(), "v2".to_string()]);
        assert_eq!(drop_elements(&mut demand, &ids), 2);
        let routes: Vec<&str> = demand.routes.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(routes, vec!["r"]);
    }

    #[test]
    fn test_gap_repair_renumbers_densely() {
        let mut demand = Demand {
            routes: vec![
                segment("r", 0, 12, &["a"]),
                segment("r", 2, 12, &["c"]),
                segment("r", 11, 12, &["z"]),
                Route::new("whole", edges(&["q"])),
            ],
            elements: vec![DemandElement::vehicle("v", "r_part02", 0.0)],
            ..Default::default()
        };
        demand.routes.swap(0, 2);
        assert_eq!(repair_part_gaps(&mut demand), 2);

        let mut ids: Vec<&str> = demand.routes.iter().map(|r| r.id.as_str()).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec!["r_part00", "r_part01", "r_part02", "whole"]);
        let c = demand.routes.iter().find(|r| r.edges == edges(&["c"])).unwrap();
        assert_eq!(c.id, "r_part01");
        assert_eq!(demand.elements[0].route_id(), Some("r_part01"));

        // dense input is left alone
        assert_eq!(repair_part_gaps(&mut demand), 0);
    }

    #[test]
    fn test_boundary_vehicle_kept_once() {
        // single-edge route on the border, identical in both partitions
        let copy = || Demand {
            routes: vec![Route {
                id: "r".to_string(),
                edges: edges(&["border"]),
                original_id: Some("r".to_string()),
                part_index: None,
                is_start: true,
            }],
            elements: vec![DemandElement::vehicle("v", "r", 10.0)],
            ..Default::default()
        };
        let mut demands = vec![copy(), copy()];
        let departs = vec![map(&[("v", 10.0)]), map(&[("v", 10.0)])];
        let counts = reconcile(&mut demands, departs);

        assert_eq!(demands[0].elements.len(), 1);
        assert!(demands[1].elements.is_empty());
        assert!(demands[1].routes.is_empty());
        assert_eq!(counts[1].shorter_copies, 1);
        assert!(shared_vehicles(&[&demands[0], &demands[1]]).is_empty());
    }

    #[test]
    fn test_shared_vehicles_reported() {
        let a = Demand { elements: vec![DemandElement::vehicle("v", "r", 0.0)], ..Default::default() };
        let b = a.clone();
        let shared = shared_vehicles(&[&a, &b]);
        assert_eq!(shared.get("v"), Some(&vec![0, 1]));
    }
}
