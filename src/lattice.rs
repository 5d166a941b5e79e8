use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use slotmap::{new_key_type, SlotMap};

use crate::error::{Error, Result};
use crate::map::{LaneId, RoadId, RoadMap, Waypoint, WaypointId};
use crate::router::Router;

new_key_type! {
    /// Handle of a node within its owning lattice.
    pub struct NodeId;
}

const DIST_EPS: f64 = 1e-6;

/// A vertex of the waypoint lattice. Neighbour links are arena keys owned by
/// the lattice; `payload` carries the occupancy overlay when present.
#[derive(Clone, Debug)]
pub struct Node<P> {
    waypoint: Waypoint,
    distance: f64,
    front: Option<NodeId>,
    back: Option<NodeId>,
    left: Option<NodeId>,
    right: Option<NodeId>,
    payload: P,
}

impl<P> Node<P> {
    pub fn waypoint(&self) -> &Waypoint {
        &self.waypoint
    }

    /// Arc length from the lattice root along the traversed route.
    pub fn distance(&self) -> f64 {
        self.distance
    }

    pub fn front(&self) -> Option<NodeId> {
        self.front
    }

    pub fn back(&self) -> Option<NodeId> {
        self.back
    }

    pub fn left(&self) -> Option<NodeId> {
        self.left
    }

    pub fn right(&self) -> Option<NodeId> {
        self.right
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }
}

/// A longitudinally discretized, multi-lane directed graph of road positions
/// ahead of a root waypoint. Lazily extendable forward and shortenable from
/// the rear as the ego advances.
#[derive(Clone)]
pub struct Lattice<P> {
    nodes: SlotMap<NodeId, Node<P>>,
    waypoint_to_node: HashMap<WaypointId, NodeId>,
    roadlane_to_waypoints: HashMap<(RoadId, LaneId), Vec<WaypointId>>,
    /// Frontier nodes from which `extend` resumes.
    exits: Vec<NodeId>,
    root: NodeId,
    range: f64,
    longitudinal_resolution: f64,
    map: Rc<dyn RoadMap>,
    router: Rc<dyn Router>,
}

impl<P: Default + Clone> Lattice<P> {
    pub fn new(
        start: Waypoint,
        range: f64,
        longitudinal_resolution: f64,
        map: Rc<dyn RoadMap>,
        router: Rc<dyn Router>,
    ) -> Result<Self> {
        if longitudinal_resolution <= 0.0 || range <= longitudinal_resolution {
            return Err(Error::InvalidRange {
                range,
                resolution: longitudinal_resolution,
            });
        }

        let mut nodes = SlotMap::with_key();
        let root = nodes.insert(Node {
            waypoint: start,
            distance: 0.0,
            front: None,
            back: None,
            left: None,
            right: None,
            payload: P::default(),
        });

        let mut lattice = Self {
            nodes,
            waypoint_to_node: HashMap::new(),
            roadlane_to_waypoints: HashMap::new(),
            exits: vec![root],
            root,
            range: 0.0,
            longitudinal_resolution,
            map,
            router,
        };
        lattice.index_node(root);
        lattice.extend(range)?;

        Ok(lattice)
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn range(&self) -> f64 {
        self.range
    }

    pub fn longitudinal_resolution(&self) -> f64 {
        self.longitudinal_resolution
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> Option<&Node<P>> {
        self.nodes.get(id)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn exits(&self) -> &[NodeId] {
        &self.exits
    }

    pub(crate) fn payload_mut(&mut self, id: NodeId) -> Option<&mut P> {
        self.nodes.get_mut(id).map(|node| &mut node.payload)
    }

    fn index_node(&mut self, id: NodeId) {
        let waypoint = &self.nodes[id].waypoint;
        let key = (waypoint.road, waypoint.lane);
        let waypoint_id = waypoint.id;
        self.waypoint_to_node.insert(waypoint_id, id);
        self.roadlane_to_waypoints
            .entry(key)
            .or_default()
            .push(waypoint_id);
    }

    /// Return the node for `waypoint`, materializing it at `distance` when the
    /// waypoint id has not been seen before. New nodes are pushed onto `queue`.
    fn intern(&mut self, waypoint: Waypoint, distance: f64, queue: &mut VecDeque<NodeId>) -> NodeId {
        if let Some(&existing) = self.waypoint_to_node.get(&waypoint.id) {
            return existing;
        }

        let id = self.nodes.insert(Node {
            waypoint,
            distance,
            front: None,
            back: None,
            left: None,
            right: None,
            payload: P::default(),
        });
        self.index_node(id);
        queue.push_back(id);
        id
    }

    /// Grow the lattice forward so that every exit is at least `range` beyond
    /// the root.
    pub fn extend(&mut self, range: f64) -> Result<()> {
        if range <= self.longitudinal_resolution {
            return Err(Error::InvalidRange {
                range,
                resolution: self.longitudinal_resolution,
            });
        }
        if range <= self.range + DIST_EPS {
            return Ok(());
        }
        self.range = range;

        let mut queue: VecDeque<NodeId> = self.exits.drain(..).collect();
        let mut exits = Vec::new();

        while let Some(id) = queue.pop_front() {
            let (waypoint, distance) = {
                let node = &self.nodes[id];
                (node.waypoint.clone(), node.distance)
            };

            // Lane neighbours at the same offset, only when on-route. Linked
            // for frontier nodes too, so lateral walks never dead-end at the
            // lattice boundary.
            if self.nodes[id].left.is_none() {
                if let Some(left_waypoint) = self.map.left_lane(&waypoint) {
                    if self.router.has_road(left_waypoint.road) {
                        let left = self.intern(left_waypoint, distance, &mut queue);
                        self.nodes[id].left = Some(left);
                        self.nodes[left].right = Some(id);
                    }
                }
            }
            if self.nodes[id].right.is_none() {
                if let Some(right_waypoint) = self.map.right_lane(&waypoint) {
                    if self.router.has_road(right_waypoint.road) {
                        let right = self.intern(right_waypoint, distance, &mut queue);
                        self.nodes[id].right = Some(right);
                        self.nodes[right].left = Some(id);
                    }
                }
            }

            if distance >= self.range - DIST_EPS {
                exits.push(id);
                continue;
            }

            // Front neighbour, following the router's chosen successor only.
            if self.nodes[id].front.is_none() {
                let next = self.router.front_waypoint(
                    self.map.as_ref(),
                    &waypoint,
                    self.longitudinal_resolution,
                )?;
                if let Some(next_waypoint) = next {
                    let child = self.intern(
                        next_waypoint,
                        distance + self.longitudinal_resolution,
                        &mut queue,
                    );
                    self.nodes[id].front = Some(child);
                    self.nodes[child].back = Some(id);
                }
            }
            if self.nodes[id].front.is_none() {
                // Route ends here; keep as an exit so a later extend retries.
                exits.push(id);
            }
        }

        self.exits = exits;
        Ok(())
    }

    /// Drop nodes at the rear so the root advances by `distance`. Surviving
    /// node distances are renormalized so the new root sits at zero.
    pub fn shorten(&mut self, distance: f64) -> Result<()> {
        if distance <= DIST_EPS {
            return Ok(());
        }

        // The new root is the first on-route node at least `distance` ahead.
        let mut new_root = self.root;
        while self.nodes[new_root].distance < distance - DIST_EPS {
            match self.nodes[new_root].front {
                Some(front) => new_root = front,
                None => break,
            }
        }
        let base = self.nodes[new_root].distance;
        if base <= DIST_EPS {
            return Ok(());
        }

        // Lane neighbours of the new root may trail it by up to half a step;
        // they survive the cut.
        let cutoff = base - self.longitudinal_resolution / 2.0 - DIST_EPS;
        let removed: std::collections::HashSet<NodeId> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.distance < cutoff)
            .map(|(id, _)| id)
            .collect();

        for id in &removed {
            if let Some(node) = self.nodes.remove(*id) {
                self.waypoint_to_node.remove(&node.waypoint.id);
                if let Some(waypoints) = self
                    .roadlane_to_waypoints
                    .get_mut(&(node.waypoint.road, node.waypoint.lane))
                {
                    waypoints.retain(|&w| w != node.waypoint.id);
                }
            }
        }
        self.exits.retain(|id| self.nodes.contains_key(*id));

        let node_ids: Vec<NodeId> = self.nodes.keys().collect();
        for id in node_ids {
            let node = &mut self.nodes[id];
            node.distance -= base;
            if node.front.map_or(false, |n| removed.contains(&n)) {
                node.front = None;
            }
            if node.back.map_or(false, |n| removed.contains(&n)) {
                node.back = None;
            }
            if node.left.map_or(false, |n| removed.contains(&n)) {
                node.left = None;
            }
            if node.right.map_or(false, |n| removed.contains(&n)) {
                node.right = None;
            }
        }

        self.root = new_root;
        self.range -= base;
        Ok(())
    }

    /// `shorten(distance)` followed by restoring the previous range.
    pub fn shift(&mut self, distance: f64) -> Result<()> {
        let previous_range = self.range;
        self.shorten(distance)?;
        self.extend(previous_range)
    }

    /// The lattice node matching `waypoint` by id, or the node on the same
    /// (road, lane) within `tolerance` arc length of it.
    pub fn closest_node(&self, waypoint: &Waypoint, tolerance: f64) -> Option<NodeId> {
        if let Some(&id) = self.waypoint_to_node.get(&waypoint.id) {
            return Some(id);
        }

        let candidates = self
            .roadlane_to_waypoints
            .get(&(waypoint.road, waypoint.lane))?;
        let best = candidates
            .iter()
            .filter_map(|wid| self.waypoint_to_node.get(wid))
            .map(|&id| {
                let diff = (self.nodes[id].waypoint.road_offset - waypoint.road_offset).abs();
                (id, diff)
            })
            .min_by(|a, b| {
                a.1.partial_cmp(&b.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| self.nodes[a.0].waypoint.id.cmp(&self.nodes[b.0].waypoint.id))
            })?;

        (best.1 <= tolerance).then_some(best.0)
    }

    fn anchor(&self, waypoint: &Waypoint) -> Option<NodeId> {
        self.closest_node(waypoint, self.longitudinal_resolution)
    }

    /// Walk at least `distance` metres along front links from the node
    /// closest to `waypoint`.
    pub fn front(&self, waypoint: &Waypoint, distance: f64) -> Result<Option<NodeId>> {
        if distance <= 0.0 {
            return Err(Error::InvalidDistance { distance });
        }
        let Some(start) = self.anchor(waypoint) else {
            return Ok(None);
        };
        let target = self.nodes[start].distance + distance;

        let mut current = start;
        while self.nodes[current].distance < target - DIST_EPS {
            match self.nodes[current].front {
                Some(front) => current = front,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    /// Walk at least `distance` metres along back links from the node closest
    /// to `waypoint`.
    pub fn back(&self, waypoint: &Waypoint, distance: f64) -> Result<Option<NodeId>> {
        if distance <= 0.0 {
            return Err(Error::InvalidDistance { distance });
        }
        let Some(start) = self.anchor(waypoint) else {
            return Ok(None);
        };
        let target = self.nodes[start].distance - distance;

        let mut current = start;
        while self.nodes[current].distance > target + DIST_EPS {
            match self.nodes[current].back {
                Some(back) => current = back,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    pub fn front_left(&self, waypoint: &Waypoint, distance: f64) -> Result<Option<NodeId>> {
        Ok(self
            .front(waypoint, distance)?
            .and_then(|id| self.nodes[id].left))
    }

    pub fn front_right(&self, waypoint: &Waypoint, distance: f64) -> Result<Option<NodeId>> {
        Ok(self
            .front(waypoint, distance)?
            .and_then(|id| self.nodes[id].right))
    }

    pub fn back_left(&self, waypoint: &Waypoint, distance: f64) -> Result<Option<NodeId>> {
        Ok(self
            .back(waypoint, distance)?
            .and_then(|id| self.nodes[id].left))
    }

    pub fn back_right(&self, waypoint: &Waypoint, distance: f64) -> Result<Option<NodeId>> {
        Ok(self
            .back(waypoint, distance)?
            .and_then(|id| self.nodes[id].right))
    }
}

/// Plain waypoint lattice with no occupancy overlay.
pub type WaypointLattice = Lattice<()>;
