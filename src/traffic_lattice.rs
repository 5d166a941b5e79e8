use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::rc::Rc;

use itertools::Itertools;
use ordered_float::OrderedFloat;
use tracing::warn;

use crate::error::{Error, Result};
use crate::lattice::{Lattice, Node, NodeId};
use crate::map::{RoadId, RoadMap, Waypoint};
use crate::router::Router;
use crate::vehicle::{Vehicle, VehicleId};

/// Longitudinal resolution of every traffic lattice.
pub const TRAFFIC_RESOLUTION: f64 = 1.0;

/// Extra range granted when an extremal vehicle waypoint falls outside the
/// covered roads.
const RANGE_PADDING: f64 = 5.0;

/// How many times the road chain may grow in each direction while sorting.
const ROAD_CHAIN_EXPANSIONS: usize = 8;

pub type TrafficNode = Node<Option<VehicleId>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddVehicleOutcome {
    Added,
    /// Some body waypoint of the vehicle could not be snapped to a node.
    NotAdded,
    /// The vehicle overlaps an already registered vehicle.
    Collision,
}

enum AddAttempt {
    Added,
    NotAdded,
    Collision(Vec<VehicleId>),
}

/// The rear, mid, and head waypoints of one vehicle, where resolvable.
struct BodyWaypoints {
    rear: Option<Waypoint>,
    mid: Option<Waypoint>,
    head: Option<Waypoint>,
}

impl BodyWaypoints {
    fn of(map: &dyn RoadMap, vehicle: &Vehicle) -> Self {
        Self {
            rear: map.waypoint_at(vehicle.rear_location()),
            mid: map.waypoint_at(vehicle.mid_location()),
            head: map.waypoint_at(vehicle.head_location()),
        }
    }

    fn all(&self) -> Option<(&Waypoint, &Waypoint, &Waypoint)> {
        Some((self.rear.as_ref()?, self.mid.as_ref()?, self.head.as_ref()?))
    }

    fn present(&self) -> impl Iterator<Item = &Waypoint> {
        [self.rear.as_ref(), self.mid.as_ref(), self.head.as_ref()]
            .into_iter()
            .flatten()
    }
}

/// A waypoint lattice whose nodes carry vehicle occupancy, able to answer
/// spatial relational queries between registered vehicles.
#[derive(Clone)]
pub struct TrafficLattice {
    lattice: Lattice<Option<VehicleId>>,
    /// Nodes occupied by each registered vehicle, rear first, head last.
    vehicle_to_nodes: HashMap<VehicleId, Vec<NodeId>>,
    map: Rc<dyn RoadMap>,
    router: Rc<dyn Router>,
}

impl TrafficLattice {
    /// Build a lattice covering `vehicles` and register each of them.
    ///
    /// Vehicles whose body cannot be snapped onto the lattice are dropped and
    /// reported in the returned set. Overlapping vehicles abort construction.
    pub fn new(
        vehicles: &[Vehicle],
        map: Rc<dyn RoadMap>,
        router: Rc<dyn Router>,
    ) -> Result<(Self, HashSet<VehicleId>)> {
        let waypoints = Self::body_waypoints(map.as_ref(), vehicles);
        let (start, range) =
            Self::lattice_start_and_range(map.as_ref(), router.as_ref(), vehicles, &waypoints)?;

        let lattice = Lattice::new(
            start,
            range,
            TRAFFIC_RESOLUTION,
            Rc::clone(&map),
            Rc::clone(&router),
        )?;

        let mut traffic = Self {
            lattice,
            vehicle_to_nodes: HashMap::new(),
            map,
            router,
        };

        let (collision, disappeared) = traffic.register_vehicles(vehicles, &waypoints);
        if let Some(ids) = collision {
            return Err(Error::ConstructionCollision { vehicles: ids });
        }

        Ok((traffic, disappeared))
    }

    pub fn map(&self) -> &Rc<dyn RoadMap> {
        &self.map
    }

    pub fn router(&self) -> &Rc<dyn Router> {
        &self.router
    }

    pub fn lattice(&self) -> &Lattice<Option<VehicleId>> {
        &self.lattice
    }

    /// Ids of all registered vehicles, in ascending order.
    pub fn vehicles(&self) -> Vec<VehicleId> {
        self.vehicle_to_nodes.keys().copied().sorted().collect()
    }

    pub fn contains_vehicle(&self, vehicle: VehicleId) -> bool {
        self.vehicle_to_nodes.contains_key(&vehicle)
    }

    /// Nodes occupied by a registered vehicle, rear first.
    pub fn vehicle_nodes(&self, vehicle: VehicleId) -> Result<&[NodeId]> {
        self.vehicle_to_nodes
            .get(&vehicle)
            .map(Vec::as_slice)
            .ok_or(Error::VehicleNotOnLattice { vehicle })
    }

    fn head_node(&self, vehicle: VehicleId) -> Result<NodeId> {
        self.vehicle_nodes(vehicle)?
            .last()
            .copied()
            .ok_or(Error::VehicleNotOnLattice { vehicle })
    }

    fn rear_node(&self, vehicle: VehicleId) -> Result<NodeId> {
        self.vehicle_nodes(vehicle)?
            .first()
            .copied()
            .ok_or(Error::VehicleNotOnLattice { vehicle })
    }

    /// The nearest vehicle ahead of `vehicle` on its head lane, with the
    /// signed arc length from the head to that vehicle's rear.
    pub fn front(&self, vehicle: VehicleId) -> Result<Option<(VehicleId, f64)>> {
        let head = self.head_node(vehicle)?;
        Ok(self.front_vehicle_from(head))
    }

    /// The nearest vehicle behind `vehicle` on its rear lane, with the signed
    /// arc length from the rear to that vehicle's head.
    pub fn back(&self, vehicle: VehicleId) -> Result<Option<(VehicleId, f64)>> {
        let rear = self.rear_node(vehicle)?;
        Ok(self.back_vehicle_from(rear))
    }

    pub fn left_front(&self, vehicle: VehicleId) -> Result<Option<(VehicleId, f64)>> {
        let head = self.head_node(vehicle)?;
        let Some(left) = self.lattice.node(head).and_then(Node::left) else {
            return Ok(None);
        };

        match *self.node(left).payload() {
            None => Ok(self.front_vehicle_from(left)),
            Some(occupant) => {
                // The occupant itself is the left front: its head is at least
                // level with the query vehicle's head.
                let distance = self.node(self.rear_node(occupant)?).distance()
                    - self.node(head).distance();
                Ok(Some((occupant, distance)))
            }
        }
    }

    pub fn left_back(&self, vehicle: VehicleId) -> Result<Option<(VehicleId, f64)>> {
        let rear = self.rear_node(vehicle)?;
        let Some(left) = self.lattice.node(rear).and_then(Node::left) else {
            return Ok(None);
        };

        match *self.node(left).payload() {
            None => Ok(self.back_vehicle_from(left)),
            Some(occupant) => {
                let distance = self.node(rear).distance()
                    - self.node(self.head_node(occupant)?).distance();
                Ok(Some((occupant, distance)))
            }
        }
    }

    pub fn right_front(&self, vehicle: VehicleId) -> Result<Option<(VehicleId, f64)>> {
        let head = self.head_node(vehicle)?;
        let Some(right) = self.lattice.node(head).and_then(Node::right) else {
            return Ok(None);
        };

        match *self.node(right).payload() {
            None => Ok(self.front_vehicle_from(right)),
            Some(occupant) => {
                let distance = self.node(self.rear_node(occupant)?).distance()
                    - self.node(head).distance();
                Ok(Some((occupant, distance)))
            }
        }
    }

    pub fn right_back(&self, vehicle: VehicleId) -> Result<Option<(VehicleId, f64)>> {
        let rear = self.rear_node(vehicle)?;
        let Some(right) = self.lattice.node(rear).and_then(Node::right) else {
            return Ok(None);
        };

        match *self.node(right).payload() {
            None => Ok(self.back_vehicle_from(right)),
            Some(occupant) => {
                let distance = self.node(rear).distance()
                    - self.node(self.head_node(occupant)?).distance();
                Ok(Some((occupant, distance)))
            }
        }
    }

    /// Whether a registered vehicle straddles a lane boundary: `0` in-lane,
    /// `-1` changing to the left lane, `+1` changing to the right lane.
    pub fn is_changing_lane(&self, vehicle: VehicleId) -> Result<i32> {
        let nodes = self.vehicle_nodes(vehicle)?;
        let (Some(&rear), Some(&head)) = (nodes.first(), nodes.last()) else {
            return Err(Error::VehicleNotOnLattice { vehicle });
        };

        // Walk the rear lane forward to the node level with the head.
        let steps = nodes.len().saturating_sub(1);
        let mut front = rear;
        for _ in 0..steps {
            front = self
                .lattice
                .node(front)
                .and_then(Node::front)
                .ok_or(Error::TopologyMismatch { vehicle })?;
        }

        if front == head {
            return Ok(0);
        }
        let front_node = self.node(front);
        if front_node.left() == Some(head) {
            return Ok(-1);
        }
        if front_node.right() == Some(head) {
            return Ok(1);
        }
        Err(Error::TopologyMismatch { vehicle })
    }

    /// Register a vehicle that is not yet tracked.
    pub fn add_vehicle(&mut self, vehicle: &Vehicle) -> AddVehicleOutcome {
        if self.vehicle_to_nodes.contains_key(&vehicle.id()) {
            return AddVehicleOutcome::NotAdded;
        }
        let waypoints = BodyWaypoints::of(self.map.as_ref(), vehicle);
        match self.try_add(vehicle.id(), &waypoints) {
            AddAttempt::Added => AddVehicleOutcome::Added,
            AddAttempt::NotAdded => AddVehicleOutcome::NotAdded,
            AddAttempt::Collision(_) => AddVehicleOutcome::Collision,
        }
    }

    /// Unregister a vehicle and free its nodes. Returns whether the vehicle
    /// was tracked.
    pub fn delete_vehicle(&mut self, vehicle: VehicleId) -> bool {
        let Some(nodes) = self.vehicle_to_nodes.remove(&vehicle) else {
            return false;
        };
        for node in nodes {
            if let Some(payload) = self.lattice.payload_mut(node) {
                *payload = None;
            }
        }
        true
    }

    /// Re-anchor the lattice around the updated vehicle poses and re-register
    /// every vehicle. The update set must equal the registered set. Returns
    /// `true` when no collision was detected.
    pub fn move_traffic_forward(
        &mut self,
        vehicles: &[Vehicle],
    ) -> Result<(bool, HashSet<VehicleId>)> {
        let registered: BTreeSet<VehicleId> = self.vehicle_to_nodes.keys().copied().collect();
        let updated: BTreeSet<VehicleId> = vehicles.iter().map(Vehicle::id).collect();
        if registered != updated {
            return Err(Error::SetMismatch {
                registered: registered.into_iter().collect(),
                updated: updated.into_iter().collect(),
            });
        }

        self.clear_occupancy();

        let waypoints = Self::body_waypoints(self.map.as_ref(), vehicles);
        let (start, range) = Self::lattice_start_and_range(
            self.map.as_ref(),
            self.router.as_ref(),
            vehicles,
            &waypoints,
        )?;

        let start_node = self
            .lattice
            .closest_node(&start, TRAFFIC_RESOLUTION)
            .ok_or(Error::StartNotOnLattice)?;
        let advance = self.node(start_node).distance();
        self.lattice.shorten(advance)?;
        self.lattice.extend(range.max(self.lattice.range()))?;

        let (collision, disappeared) = self.register_vehicles(vehicles, &waypoints);
        Ok((collision.is_none(), disappeared))
    }

    /// Suggest a lattice exit to spawn a vehicle at, requiring at least
    /// `min_range` clearance to the nearest vehicle behind it. Returns the
    /// clearance together with the waypoint; the clearance is the lattice
    /// range when the lane behind is empty.
    pub fn front_spawn_waypoint(&self, min_range: f64) -> Option<(f64, Waypoint)> {
        let mut best: Option<(f64, Waypoint)> = None;
        for &exit in self.lattice.exits() {
            let Some(node) = self.lattice.node(exit) else {
                continue;
            };
            if node.payload().is_some() {
                continue;
            }
            let clearance = match self.back_vehicle_from(exit) {
                Some((_, distance)) => distance,
                None => self.lattice.range(),
            };
            if clearance < min_range {
                continue;
            }
            let better = best
                .as_ref()
                .map_or(true, |(best_clearance, _)| clearance > *best_clearance);
            if better {
                best = Some((clearance, node.waypoint().clone()));
            }
        }
        best
    }

    /// Suggest a lattice entry to spawn a vehicle at, requiring at least
    /// `min_range` clearance to the nearest vehicle ahead of it.
    pub fn back_spawn_waypoint(&self, min_range: f64) -> Option<(f64, Waypoint)> {
        let mut best: Option<(f64, Waypoint)> = None;
        for id in self.lattice.node_ids() {
            let Some(node) = self.lattice.node(id) else {
                continue;
            };
            if node.back().is_some()
                || node.distance() > TRAFFIC_RESOLUTION / 2.0
                || node.payload().is_some()
            {
                continue;
            }
            let clearance = match self.front_vehicle_from(id) {
                Some((_, distance)) => distance,
                None => self.lattice.range(),
            };
            if clearance < min_range {
                continue;
            }
            let better = best
                .as_ref()
                .map_or(true, |(best_clearance, _)| clearance > *best_clearance);
            if better {
                best = Some((clearance, node.waypoint().clone()));
            }
        }
        best
    }

    fn node(&self, id: NodeId) -> &TrafficNode {
        self.lattice
            .node(id)
            .expect("occupied node handles are owned by the lattice")
    }

    fn front_vehicle_from(&self, start: NodeId) -> Option<(VehicleId, f64)> {
        let start_distance = self.lattice.node(start)?.distance();
        let mut current = self.lattice.node(start)?.front();
        while let Some(id) = current {
            let node = self.lattice.node(id)?;
            if let Some(occupant) = *node.payload() {
                return Some((occupant, node.distance() - start_distance));
            }
            current = node.front();
        }
        None
    }

    fn back_vehicle_from(&self, start: NodeId) -> Option<(VehicleId, f64)> {
        let start_distance = self.lattice.node(start)?.distance();
        let mut current = self.lattice.node(start)?.back();
        while let Some(id) = current {
            let node = self.lattice.node(id)?;
            if let Some(occupant) = *node.payload() {
                return Some((occupant, start_distance - node.distance()));
            }
            current = node.back();
        }
        None
    }

    fn body_waypoints(map: &dyn RoadMap, vehicles: &[Vehicle]) -> HashMap<VehicleId, BodyWaypoints> {
        vehicles
            .iter()
            .map(|vehicle| (vehicle.id(), BodyWaypoints::of(map, vehicle)))
            .collect()
    }

    /// Root waypoint and range of a lattice covering all vehicle waypoints,
    /// following the router's road chain.
    fn lattice_start_and_range(
        map: &dyn RoadMap,
        router: &dyn Router,
        vehicles: &[Vehicle],
        waypoints: &HashMap<VehicleId, BodyWaypoints>,
    ) -> Result<(Waypoint, f64)> {
        let mut road_to_waypoints: BTreeMap<RoadId, Vec<Waypoint>> = BTreeMap::new();
        for vehicle in vehicles {
            let Some(body) = waypoints.get(&vehicle.id()) else {
                continue;
            };
            for waypoint in body.present() {
                if router.has_road(waypoint.road) {
                    road_to_waypoints
                        .entry(waypoint.road)
                        .or_default()
                        .push(waypoint.clone());
                }
            }
        }

        if road_to_waypoints.is_empty() {
            return Err(Error::RoadsNotOnLocalChain { roads: Vec::new() });
        }

        for list in road_to_waypoints.values_mut() {
            list.sort_by_key(|waypoint| (OrderedFloat(waypoint.road_offset), waypoint.id));
        }

        let roads: BTreeSet<RoadId> = road_to_waypoints.keys().copied().collect();
        let sorted_roads = Self::sort_roads(router, &roads)?;

        let first_road = sorted_roads[0];
        let last_road = *sorted_roads.last().unwrap_or(&first_road);
        let first = road_to_waypoints[&first_road][0].clone();
        let last = road_to_waypoints[&last_road]
            .last()
            .cloned()
            .unwrap_or_else(|| first.clone());

        let mut range: f64 = sorted_roads
            .iter()
            .map(|road| map.road_length(*road).unwrap_or(0.0))
            .sum();

        if first.road == first_road {
            range -= first.road_offset;
        } else {
            range += RANGE_PADDING;
        }
        if last.road == last_road {
            range -= map.road_length(last_road).unwrap_or(0.0) - last.road_offset;
        } else {
            range += RANGE_PADDING;
        }

        Ok((first, range))
    }

    /// Connect the given roads into an ordered chain along the route,
    /// growing at most `ROAD_CHAIN_EXPANSIONS` hops in each direction.
    fn sort_roads(router: &dyn Router, roads: &BTreeSet<RoadId>) -> Result<Vec<RoadId>> {
        let mut remaining = roads.clone();
        let mut chain: VecDeque<RoadId> = VecDeque::new();

        let Some(&seed) = remaining.iter().next() else {
            return Err(Error::RoadsNotOnLocalChain { roads: Vec::new() });
        };
        remaining.remove(&seed);
        chain.push_back(seed);

        for _ in 0..ROAD_CHAIN_EXPANSIONS {
            if remaining.is_empty() {
                break;
            }
            if let Some(&first) = chain.front() {
                if let Some(prev) = router.prev_road(first) {
                    chain.push_front(prev);
                    remaining.remove(&prev);
                }
            }
            if let Some(&last) = chain.back() {
                if let Some(next) = router.next_road(last) {
                    chain.push_back(next);
                    remaining.remove(&next);
                }
            }
        }

        if !remaining.is_empty() {
            return Err(Error::RoadsNotOnLocalChain {
                roads: remaining.into_iter().collect(),
            });
        }

        while chain.front().map_or(false, |road| !roads.contains(road)) {
            chain.pop_front();
        }
        while chain.back().map_or(false, |road| !roads.contains(road)) {
            chain.pop_back();
        }

        Ok(chain.into_iter().collect())
    }

    fn clear_occupancy(&mut self) {
        let all_nodes: Vec<NodeId> = self.vehicle_to_nodes.values().flatten().copied().collect();
        for node in all_nodes {
            if let Some(payload) = self.lattice.payload_mut(node) {
                *payload = None;
            }
        }
        self.vehicle_to_nodes.clear();
    }

    /// Register every vehicle in order. Returns the colliding ids if any
    /// registration overlapped, and the vehicles dropped for failing to snap.
    fn register_vehicles(
        &mut self,
        vehicles: &[Vehicle],
        waypoints: &HashMap<VehicleId, BodyWaypoints>,
    ) -> (Option<Vec<VehicleId>>, HashSet<VehicleId>) {
        self.clear_occupancy();

        let mut disappeared = HashSet::new();
        for vehicle in vehicles {
            let id = vehicle.id();
            let Some(body) = waypoints.get(&id) else {
                disappeared.insert(id);
                continue;
            };

            match self.try_add(id, body) {
                AddAttempt::Added => {}
                AddAttempt::NotAdded => {
                    warn!(vehicle = id, "vehicle cannot be snapped onto the lattice");
                    disappeared.insert(id);
                }
                AddAttempt::Collision(mut others) => {
                    others.push(id);
                    others.sort_unstable();
                    others.dedup();
                    return (Some(others), disappeared);
                }
            }
        }

        (None, disappeared)
    }

    /// Claim the nodes spanned by one vehicle body.
    ///
    /// The occupied run is collected by walking forward from the rear node and
    /// backward from the head node until the mid node (or one of its lane
    /// neighbours, for a vehicle straddling a lane change) is met.
    fn try_add(&mut self, id: VehicleId, body: &BodyWaypoints) -> AddAttempt {
        if self.vehicle_to_nodes.contains_key(&id) {
            return AddAttempt::NotAdded;
        }
        let Some((rear_wp, mid_wp, head_wp)) = body.all() else {
            return AddAttempt::NotAdded;
        };

        let snap = |wp: &Waypoint| self.lattice.closest_node(wp, TRAFFIC_RESOLUTION);
        let (Some(rear), Some(mid), Some(head)) = (snap(rear_wp), snap(mid_wp), snap(head_wp))
        else {
            return AddAttempt::NotAdded;
        };

        let mid_left = self.node(mid).left();
        let mid_right = self.node(mid).right();
        let at_mid = |node: NodeId| node == mid || Some(node) == mid_left || Some(node) == mid_right;

        let mut nodes = Vec::new();
        let mut current = rear;
        loop {
            if at_mid(current) {
                break;
            }
            nodes.push(current);
            match self.node(current).front() {
                Some(front) => current = front,
                None => break,
            }
        }

        let mut head_backward = Vec::new();
        current = head;
        loop {
            if at_mid(current) {
                break;
            }
            head_backward.push(current);
            match self.node(current).back() {
                Some(back) => current = back,
                None => break,
            }
        }
        head_backward.reverse();

        nodes.push(mid);
        nodes.extend(head_backward);

        let mut colliders: Vec<VehicleId> = nodes
            .iter()
            .filter_map(|&node| *self.node(node).payload())
            .filter(|&occupant| occupant != id)
            .collect();
        if !colliders.is_empty() {
            colliders.sort_unstable();
            colliders.dedup();
            return AddAttempt::Collision(colliders);
        }

        for &node in &nodes {
            if let Some(payload) = self.lattice.payload_mut(node) {
                *payload = Some(id);
            }
        }
        self.vehicle_to_nodes.insert(id, nodes);
        AddAttempt::Added
    }
}
