//! Travel demand model: routes and the elements that drive along them
//!
//! Routes must already be resolved to edge sequences. Elements expressed as
//! origin/destination trips are rejected up front.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::path::Path;

use crate::core::error::{Error, Result};

/// Separator between an original route id and its segment number
pub const PART_SEPARATOR: &str = "_part";

/// Minimum digit count of a segment suffix (`_part00`)
pub const MIN_PART_WIDTH: usize = 2;

fn is_false(b: &bool) -> bool {
    !*b
}

/// Id of segment `index` among `total` segments of route `original`
///
/// The suffix is zero-padded to the digit count of `total` (at least two
/// digits) so that lexical order equals numeric order.
pub fn segment_id(original: &str, index: u32, total: usize) -> String {
    let width = total.to_string().len().max(MIN_PART_WIDTH);
    format!("{original}{PART_SEPARATOR}{index:0width$}")
}

/// A route, possibly one segment of a longer pre-split route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub id: String,
    pub edges: Vec<String>,
    /// Id of the pre-split route this came from
    #[serde(rename = "origId", default, skip_serializing_if = "Option::is_none")]
    pub original_id: Option<String>,
    /// Position among the route's segments; `None` when the route was kept whole
    #[serde(rename = "part", default, skip_serializing_if = "Option::is_none")]
    pub part_index: Option<u32>,
    /// The segment begins with the original route's first edge
    #[serde(rename = "isStart", default, skip_serializing_if = "is_false")]
    pub is_start: bool,
}

impl Route {
    pub fn new(id: impl Into<String>, edges: Vec<String>) -> Self {
        Self {
            id: id.into(),
            edges,
            original_id: None,
            part_index: None,
            is_start: false,
        }
    }

    /// Original route id, falling back to the route's own id
    pub fn lineage_id(&self) -> &str {
        self.original_id.as_deref().unwrap_or(&self.id)
    }

    pub fn is_multipart(&self) -> bool {
        self.part_index.is_some()
    }

    pub fn last_edge(&self) -> Option<&str> {
        self.edges.last().map(String::as_str)
    }
}

/// Kinds of demand elements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ElementKind {
    Vehicle,
    Person,
    Flow,
    PersonFlow,
    Trip,
    Container,
    ContainerFlow,
    RouteDistribution,
    Include,
}

impl ElementKind {
    /// Elements that own a route and depart on it
    pub fn is_route_owner(&self) -> bool {
        matches!(
            self,
            ElementKind::Vehicle | ElementKind::Person | ElementKind::Flow | ElementKind::PersonFlow
        )
    }

    /// Recognised but not processed; dropped with a warning
    pub fn is_unhandled(&self) -> bool {
        matches!(
            self,
            ElementKind::Container
                | ElementKind::ContainerFlow
                | ElementKind::RouteDistribution
                | ElementKind::Include
        )
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElementKind::Vehicle => "vehicle",
            ElementKind::Person => "person",
            ElementKind::Flow => "flow",
            ElementKind::PersonFlow => "personFlow",
            ElementKind::Trip => "trip",
            ElementKind::Container => "container",
            ElementKind::ContainerFlow => "containerFlow",
            ElementKind::RouteDistribution => "routeDistribution",
            ElementKind::Include => "include",
        };
        f.write_str(name)
    }
}

/// Route reference of an element: a top-level route id or an inline route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RouteRef {
    Id(String),
    Inline { edges: Vec<String> },
}

/// A vehicle, person or flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemandElement {
    pub kind: ElementKind,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<RouteRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depart: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub begin: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<f64>,
    /// Everything else (vehicle type, speed, ...) passed through untouched
    #[serde(flatten)]
    pub attrs: Map<String, Value>,
}

impl DemandElement {
    pub fn vehicle(id: impl Into<String>, route: impl Into<String>, depart: f64) -> Self {
        Self {
            kind: ElementKind::Vehicle,
            id: id.into(),
            route: Some(RouteRef::Id(route.into())),
            depart: Some(depart),
            begin: None,
            end: None,
            attrs: Map::new(),
        }
    }

    /// Referenced top-level route id, if any
    pub fn route_id(&self) -> Option<&str> {
        match &self.route {
            Some(RouteRef::Id(id)) => Some(id),
            _ => None,
        }
    }

    pub fn set_route_id(&mut self, id: impl Into<String>) {
        self.route = Some(RouteRef::Id(id.into()));
    }

    /// Time the element first enters the network
    pub fn depart_time(&self) -> f64 {
        self.depart.or(self.begin).unwrap_or(0.0)
    }

    /// Latest time the element may still insert vehicles
    pub fn last_depart_time(&self) -> f64 {
        match self.kind {
            ElementKind::Flow | ElementKind::PersonFlow => {
                self.end.or(self.begin).unwrap_or(0.0)
            }
            _ => self.depart_time(),
        }
    }
}

/// A demand document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Demand {
    /// Vehicle type definitions, copied verbatim into every partition
    #[serde(default)]
    pub vtypes: Vec<Value>,
    #[serde(default)]
    pub routes: Vec<Route>,
    #[serde(default)]
    pub elements: Vec<DemandElement>,
}

impl Demand {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::from_io(path, e))?;
        serde_json::from_str(&text).map_err(|e| Error::ParseError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string(self).map_err(|e| Error::ParseError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        std::fs::write(path, json).map_err(|e| Error::from_io(path, e))
    }

    /// Route ids referenced by route-owning elements
    pub fn referenced_routes(&self) -> HashSet<&str> {
        self.elements
            .iter()
            .filter(|el| el.kind.is_route_owner())
            .filter_map(DemandElement::route_id)
            .collect()
    }

    /// Keep only route owners whose id is listed, then drop routes nobody uses anymore
    ///
    /// Returns the number of kept route owners.
    pub fn filter_vehicles(&mut self, keep: &[String]) -> usize {
        let keep: HashSet<&str> = keep.iter().map(String::as_str).collect();
        let mut orphan_candidates = BTreeSet::new();

        self.elements.retain(|el| {
            if !el.kind.is_route_owner() || keep.contains(el.id.as_str()) {
                return true;
            }
            if let Some(route) = el.route_id() {
                orphan_candidates.insert(route.to_string());
            }
            false
        });

        let still_used: HashSet<String> =
            self.referenced_routes().into_iter().map(str::to_string).collect();
        self.routes
            .retain(|r| !orphan_candidates.contains(&r.id) || still_used.contains(&r.id));

        self.elements.iter().filter(|el| el.kind.is_route_owner()).count()
    }

    /// Move inline routes out of their elements into top-level routes
    ///
    /// Lifted routes are named `vr_<elementId>_<n>`. Returns the number lifted.
    pub fn lift_inline_routes(&mut self) -> usize {
        let mut count = 0;
        for el in self.elements.iter_mut().filter(|el| el.kind.is_route_owner()) {
            if let Some(RouteRef::Inline { edges }) = &el.route {
                let id = format!("vr_{}_{}", el.id, count);
                self.routes.push(Route::new(id.clone(), edges.clone()));
                el.set_route_id(id);
                count += 1;
            }
        }
        count
    }

    /// Drop element kinds that are recognised but not processed, warning once per kind
    pub fn drop_unhandled(&mut self) -> BTreeSet<ElementKind> {
        let dropped: BTreeSet<ElementKind> = self
            .elements
            .iter()
            .map(|el| el.kind)
            .filter(ElementKind::is_unhandled)
            .collect();
        for kind in &dropped {
            warn!("Removed {kind} element(s) as they are not supported yet");
        }
        self.elements.retain(|el| !el.kind.is_unhandled());
        dropped
    }

    /// Reject demand that cannot be segmented
    pub fn validate(&self) -> Result<()> {
        let known: HashSet<&str> = self.routes.iter().map(|r| r.id.as_str()).collect();
        let mut trips = Vec::new();
        let mut routeless = Vec::new();
        let mut inline = Vec::new();
        let mut dangling = Vec::new();

        for el in &self.elements {
            match (el.kind, &el.route) {
                (ElementKind::Trip, _) => trips.push(el.id.as_str()),
                (kind, None) if kind.is_route_owner() => routeless.push(el.id.as_str()),
                (kind, Some(RouteRef::Inline { .. })) if kind.is_route_owner() => {
                    inline.push(el.id.as_str())
                }
                (kind, Some(RouteRef::Id(route)))
                    if kind.is_route_owner() && !known.contains(route.as_str()) =>
                {
                    dangling.push(format!("{} -> {}", el.id, route))
                }
                _ => {}
            }
        }

        if !trips.is_empty() || !routeless.is_empty() {
            let ids: Vec<&str> = trips.iter().chain(routeless.iter()).copied().collect();
            return Err(Error::InvalidInput(format!(
                "won't handle trips or elements without a route, resolve them to edge sequences first: {}",
                ids.join(", ")
            )));
        }
        if !inline.is_empty() {
            return Err(Error::InvalidInput(format!(
                "nested routes inside elements are not supported: {}",
                inline.join(", ")
            )));
        }
        if !dangling.is_empty() {
            return Err(Error::InvalidInput(format!(
                "elements reference unknown routes: {}",
                dangling.join(", ")
            )));
        }
        Ok(())
    }

    /// Run the demand preparation steps that precede partition processing
    pub fn prepare(&mut self, vehicle_filter: &[String]) -> Result<()> {
        if !vehicle_filter.is_empty() {
            let kept = self.filter_vehicles(vehicle_filter);
            info!("Kept {} vehicles after id filtering", kept);
        }
        let lifted = self.lift_inline_routes();
        if lifted > 0 {
            info!("Lifted {} inline routes into top-level routes", lifted);
        }
        self.drop_unhandled();
        self.validate()
    }
}
