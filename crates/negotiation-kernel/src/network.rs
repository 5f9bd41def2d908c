//! Road network and shortest-path search.
//!
//! Each road (undirected edge) is one Location. Path search hides excluded
//! Locations behind an edge filter and runs A* over what remains.

use std::collections::{BTreeSet, HashMap};
use std::fmt::Write as _;

use petgraph::algo::astar;
use petgraph::graph::{EdgeIndex, EdgeReference, NodeIndex, UnGraph};
use petgraph::visit::EdgeFiltered;
use serde::{Deserialize, Serialize};

use crate::error::{ParseError, PathNotFound};
use crate::protocol::LocationId;

/// Junction identifier as it appears in network files.
pub type NodeId = u32;

/// Per-road metadata needed to turn a route into a time plan.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EdgeInfo {
    pub distance: f64,
    pub speed_limit: u32,
}

/// A road segment between two junctions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Road {
    pub id: LocationId,
    pub from: NodeId,
    pub to: NodeId,
    pub distance: f64,
    pub speed_limit: u32,
}

impl Road {
    pub fn info(&self) -> EdgeInfo {
        EdgeInfo {
            distance: self.distance,
            speed_limit: self.speed_limit,
        }
    }
}

/// One step of a route: the junction it leaves from and the road taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteLeg {
    pub node: NodeId,
    pub location: LocationId,
}

/// Ordered roads from source to destination.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub legs: Vec<RouteLeg>,
    pub distance: f64,
}

impl Route {
    pub fn locations(&self) -> impl Iterator<Item = LocationId> + '_ {
        self.legs.iter().map(|leg| leg.location)
    }

    pub fn is_empty(&self) -> bool {
        self.legs.is_empty()
    }
}

/// Route search over a resource graph.
pub trait PathFinder: Send + Sync {
    /// Shortest route that avoids every Location in `excluded`.
    fn find_path(
        &self,
        source: NodeId,
        destination: NodeId,
        excluded: &BTreeSet<LocationId>,
    ) -> Result<Route, PathNotFound>;

    /// Distance and speed limit of a Location.
    fn edge_info(&self, location: LocationId) -> Option<EdgeInfo>;
}

/// Undirected road graph backed by petgraph.
#[derive(Debug, Clone, Default)]
pub struct RoadNetwork {
    graph: UnGraph<NodeId, Road>,
    nodes: HashMap<NodeId, NodeIndex>,
    roads: HashMap<LocationId, EdgeIndex>,
}

impl RoadNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a network from a list of roads.
    pub fn from_roads(roads: impl IntoIterator<Item = Road>) -> Result<Self, ParseError> {
        let mut network = Self::new();
        for road in roads {
            network.add_road(road)?;
        }
        Ok(network)
    }

    fn node_index(&mut self, node: NodeId) -> NodeIndex {
        if let Some(index) = self.nodes.get(&node) {
            return *index;
        }
        let index = self.graph.add_node(node);
        self.nodes.insert(node, index);
        index
    }

    /// Insert a road. Road ids must be unique.
    pub fn add_road(&mut self, road: Road) -> Result<(), ParseError> {
        if self.roads.contains_key(&road.id) {
            return Err(ParseError::DuplicateRoad(road.id.0));
        }
        let a = self.node_index(road.from);
        let b = self.node_index(road.to);
        let edge = self.graph.add_edge(a, b, road);
        self.roads.insert(road.id, edge);
        Ok(())
    }

    pub fn road(&self, id: LocationId) -> Option<&Road> {
        self.roads
            .get(&id)
            .and_then(|edge| self.graph.edge_weight(*edge))
    }

    /// All roads in insertion order.
    pub fn roads(&self) -> impl Iterator<Item = &Road> + '_ {
        self.graph.edge_weights()
    }

    pub fn road_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Junction ids in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.graph.node_weights().copied()
    }

    /// Parse a whitespace separated edge list.
    ///
    /// Each non-empty line is `edge_id from to distance speed_limit`;
    /// anything after `#` is a comment.
    pub fn from_edge_list(raw: &str) -> Result<Self, ParseError> {
        let mut network = Self::new();
        for (number, line) in raw.lines().enumerate() {
            let content = line.split('#').next().unwrap_or("").trim();
            if content.is_empty() {
                continue;
            }
            let road = parse_road(content).map_err(|source| ParseError::Line {
                line: number + 1,
                source: Box::new(source),
            })?;
            network.add_road(road).map_err(|source| ParseError::Line {
                line: number + 1,
                source: Box::new(source),
            })?;
        }
        Ok(network)
    }

    /// Serialize to the edge list format read by [`RoadNetwork::from_edge_list`].
    pub fn to_edge_list(&self) -> String {
        let mut out = String::from("# edge_id from to distance speed_limit\n");
        for road in self.roads() {
            let _ = writeln!(
                out,
                "{} {} {} {} {}",
                road.id.0, road.from, road.to, road.distance, road.speed_limit
            );
        }
        out
    }
}

fn parse_road(content: &str) -> Result<Road, ParseError> {
    let mut fields = content.split_whitespace();
    let mut next = |name: &'static str| fields.next().ok_or(ParseError::MissingField(name));

    let id = parse_field::<u32>(next("edge_id")?)?;
    let from = parse_field::<u32>(next("from")?)?;
    let to = parse_field::<u32>(next("to")?)?;
    let distance = parse_field::<f64>(next("distance")?)?;
    let speed_limit = parse_field::<u32>(next("speed_limit")?)?;

    if !(distance.is_finite() && distance > 0.0) || speed_limit == 0 {
        return Err(ParseError::InvalidNumber(content.to_string()));
    }

    Ok(Road {
        id: LocationId(id),
        from,
        to,
        distance,
        speed_limit,
    })
}

fn parse_field<T: std::str::FromStr>(raw: &str) -> Result<T, ParseError> {
    raw.parse()
        .map_err(|_| ParseError::InvalidNumber(raw.to_string()))
}

impl PathFinder for RoadNetwork {
    fn find_path(
        &self,
        source: NodeId,
        destination: NodeId,
        excluded: &BTreeSet<LocationId>,
    ) -> Result<Route, PathNotFound> {
        let not_found = || PathNotFound {
            source_node: source,
            destination,
            excluded: excluded.len(),
        };

        let start = *self.nodes.get(&source).ok_or_else(not_found)?;
        let goal = *self.nodes.get(&destination).ok_or_else(not_found)?;

        let filtered = EdgeFiltered::from_fn(&self.graph, |edge: EdgeReference<'_, Road>| {
            !excluded.contains(&edge.weight().id)
        });

        let (distance, path) = astar(
            &filtered,
            start,
            |node| node == goal,
            |edge: EdgeReference<'_, Road>| edge.weight().distance,
            |_| 0.0,
        )
        .ok_or_else(not_found)?;

        let mut legs = Vec::with_capacity(path.len().saturating_sub(1));
        for pair in path.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            // Parallel roads: take the shortest one still allowed
            let road = self
                .graph
                .edges_connecting(a, b)
                .map(|edge| edge.weight())
                .filter(|road| !excluded.contains(&road.id))
                .min_by(|x, y| x.distance.total_cmp(&y.distance))
                .ok_or_else(not_found)?;
            legs.push(RouteLeg {
                node: self.graph[a],
                location: road.id,
            });
        }

        Ok(Route { legs, distance })
    }

    fn edge_info(&self, location: LocationId) -> Option<EdgeInfo> {
        self.road(location).map(Road::info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn road(id: u32, from: NodeId, to: NodeId, distance: f64) -> Road {
        Road {
            id: LocationId(id),
            from,
            to,
            distance,
            speed_limit: 10,
        }
    }

    /// 1 -(1)- 2 -(2)- 3, plus a longer detour 1 -(3)- 4 -(4)- 3
    fn diamond() -> RoadNetwork {
        RoadNetwork::from_roads([
            road(1, 1, 2, 10.0),
            road(2, 2, 3, 10.0),
            road(3, 1, 4, 15.0),
            road(4, 4, 3, 15.0),
        ])
        .unwrap()
    }

    #[test]
    fn test_shortest_path() {
        let network = diamond();
        let route = network.find_path(1, 3, &BTreeSet::new()).unwrap();
        let ids: Vec<_> = route.locations().collect();
        assert_eq!(ids, vec![LocationId(1), LocationId(2)]);
        assert_eq!(route.distance, 20.0);
        assert_eq!(route.legs[0].node, 1);
        assert_eq!(route.legs[1].node, 2);
    }

    #[test]
    fn test_path_avoids_excluded_roads() {
        let network = diamond();
        let excluded = BTreeSet::from([LocationId(2)]);
        let route = network.find_path(1, 3, &excluded).unwrap();
        let ids: Vec<_> = route.locations().collect();
        assert_eq!(ids, vec![LocationId(3), LocationId(4)]);
        assert_eq!(route.distance, 30.0);
    }

    #[test]
    fn test_path_not_found() {
        let network = diamond();
        let excluded = BTreeSet::from([LocationId(2), LocationId(4)]);
        let err = network.find_path(1, 3, &excluded).unwrap_err();
        assert_eq!(err.excluded, 2);
        assert!(network.find_path(1, 99, &BTreeSet::new()).is_err());
    }

    #[test]
    fn test_edge_list_round_trip_and_errors() {
        let network = RoadNetwork::from_edge_list(
            "# sample\n1 1 2 10 50\n\n2 2 3 4.5 30  # trailing comment\n",
        )
        .unwrap();
        assert_eq!(network.road_count(), 2);
        assert_eq!(network.node_count(), 3);
        assert_eq!(
            network.edge_info(LocationId(2)),
            Some(EdgeInfo {
                distance: 4.5,
                speed_limit: 30
            })
        );

        let reparsed = RoadNetwork::from_edge_list(&network.to_edge_list()).unwrap();
        assert_eq!(reparsed.road_count(), 2);

        let err = RoadNetwork::from_edge_list("1 1 2 10 50\n1 2 3 4 5\n").unwrap_err();
        assert!(matches!(err, ParseError::Line { line: 2, .. }));

        let err = RoadNetwork::from_edge_list("1 1 2 ten 50\n").unwrap_err();
        assert!(matches!(err, ParseError::Line { line: 1, .. }));
    }
}
