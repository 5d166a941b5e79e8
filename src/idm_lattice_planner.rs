use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use slotmap::Key;
use tracing::{debug, warn};

use crate::cost::{terminal_distance_cost, terminal_speed_cost};
use crate::error::{Error, Result};
use crate::intelligent_driver::IntelligentDriverModel;
use crate::lattice::{NodeId, WaypointLattice};
use crate::map::{RoadMap, Waypoint};
use crate::parameters::Parameters;
use crate::path::{ContinuousPath, DiscretePath, LaneChangeType};
use crate::router::Router;
use crate::snapshot::Snapshot;
use crate::station::{ChildDirection, ParentDirection, Station};
use crate::traffic_simulator::{CarFollowing, EgoControl, TrafficSimulator};
use crate::utils::lateral_offset;
use crate::vehicle::VehicleId;

/// Arc length between consecutive stations during expansion.
pub(crate) const STATION_SPACING: f64 = 50.0;
/// Minimum arc length over which a lane change may be attempted.
pub(crate) const MIN_LANE_CHANGE_DISTANCE: f64 = 20.0;
/// Lateral drift off the lane centre, on the wrong side, that vetoes a lane
/// change.
pub(crate) const LANE_CENTER_TOLERANCE: f64 = 0.5;
/// History kept behind the ego when the lattice is shifted forward.
pub(crate) const HISTORY_BEHIND: f64 = 5.0;
/// Lattice slack past the spatial horizon.
pub(crate) const LATTICE_MARGIN: f64 = 30.0;
/// Forward-simulation horizon per edge, in seconds.
pub(crate) const SIMULATION_HORIZON: f64 = 5.0;
/// Remaining gap under which the committed next station counts as reached.
pub(crate) const NEXT_STATION_TOLERANCE: f64 = 0.5;

/// Lattice planner over stations: one search vertex per waypoint node, with
/// the ego acceleration recomputed by car-following during every rollout.
pub struct IdmLatticePlanner {
    sim_time_step: f64,
    spatial_horizon: f64,
    longitudinal_resolution: f64,
    path_sample_resolution: f64,
    idm: IntelligentDriverModel,
    map: Rc<dyn RoadMap>,
    router: Rc<dyn Router>,
    lattice: Option<WaypointLattice>,
    stations: HashMap<NodeId, Station>,
    root: Option<NodeId>,
    cached_next_station: Option<NodeId>,
}

impl IdmLatticePlanner {
    pub fn new(params: &Parameters, map: Rc<dyn RoadMap>, router: Rc<dyn Router>) -> Self {
        Self {
            sim_time_step: params.sim_time_step,
            spatial_horizon: params.spatial_horizon,
            longitudinal_resolution: params.longitudinal_resolution,
            path_sample_resolution: params.path_sample_resolution,
            idm: IntelligentDriverModel::new(&params.idm),
            map,
            router,
            lattice: None,
            stations: HashMap::new(),
            root: None,
            cached_next_station: None,
        }
    }

    pub fn waypoint_lattice(&self) -> Option<&WaypointLattice> {
        self.lattice.as_ref()
    }

    pub fn root_station(&self) -> Option<&Station> {
        self.stations.get(&self.root?)
    }

    pub fn stations(&self) -> impl Iterator<Item = &Station> {
        self.stations.values()
    }

    /// Plan a drivable path for the ego through the traffic in `snapshot`.
    pub fn plan_path(&mut self, ego: VehicleId, snapshot: Snapshot) -> Result<DiscretePath> {
        if ego != snapshot.ego().id() {
            return Err(Error::WrongEgo {
                expected: ego,
                actual: snapshot.ego().id(),
            });
        }

        self.update_waypoint_lattice(&snapshot)?;

        let lattice = self.lattice.take().ok_or(Error::EgoOffLattice)?;
        let result = self.plan_on_lattice(&lattice, snapshot);
        self.lattice = Some(lattice);
        result
    }

    fn plan_on_lattice(
        &mut self,
        lattice: &WaypointLattice,
        snapshot: Snapshot,
    ) -> Result<DiscretePath> {
        let mut station_queue = self.prune_station_graph(lattice, snapshot)?;
        if station_queue.is_empty() {
            return Err(Error::NoReachableNextStation);
        }

        self.construct_station_graph(lattice, &mut station_queue)?;

        let (paths, station_sequence) = self.select_optimal_path(lattice)?;
        self.cached_next_station = station_sequence.get(1).copied();

        let mut merged = paths
            .first()
            .map(|path| DiscretePath::new(path, self.path_sample_resolution))
            .ok_or(Error::NoTerminal)?;
        for path in &paths[1..] {
            merged.append(path);
        }
        Ok(merged)
    }

    fn ego_waypoint(&self, snapshot: &Snapshot) -> Option<Waypoint> {
        self.map.waypoint_at(snapshot.ego().location())
    }

    fn ego_node(&self, lattice: &WaypointLattice, snapshot: &Snapshot) -> Option<NodeId> {
        let waypoint = self.ego_waypoint(snapshot)?;
        lattice.closest_node(&waypoint, lattice.longitudinal_resolution())
    }

    /// Whether the ego has caught up with the station committed last tick.
    fn next_station_reached(&self, lattice: &WaypointLattice, snapshot: &Snapshot) -> bool {
        let Some(next) = self.cached_next_station else {
            return false;
        };
        let Some(target_distance) = lattice.node(next).map(|node| node.distance()) else {
            return false;
        };
        let Some(ego_node) = self.ego_node(lattice, snapshot) else {
            return false;
        };
        let Some(ego_distance) = lattice.node(ego_node).map(|node| node.distance()) else {
            return false;
        };

        let gap = target_distance - ego_distance;
        if gap <= 0.0 {
            warn!(gap, "ego has overrun the committed next station");
        }
        gap < NEXT_STATION_TOLERANCE
    }

    fn update_waypoint_lattice(&mut self, snapshot: &Snapshot) -> Result<()> {
        let Some(lattice) = self.lattice.as_ref() else {
            let start = self.ego_waypoint(snapshot).ok_or(Error::EgoOffLattice)?;
            self.lattice = Some(WaypointLattice::new(
                start,
                self.spatial_horizon + LATTICE_MARGIN,
                self.longitudinal_resolution,
                Rc::clone(&self.map),
                Rc::clone(&self.router),
            )?);
            return Ok(());
        };

        if !self.next_station_reached(lattice, snapshot) {
            return Ok(());
        }

        match self.ego_node(lattice, snapshot) {
            Some(ego_node) => {
                let shift_distance = lattice
                    .node(ego_node)
                    .map(|node| node.distance() - HISTORY_BEHIND)
                    .unwrap_or(0.0);
                if let Some(lattice) = self.lattice.as_mut() {
                    lattice.shift(shift_distance)?;
                }
            }
            None => {
                // The ego wandered off the lattice; start over from scratch.
                debug!("ego left the waypoint lattice, rebuilding");
                let start = self.ego_waypoint(snapshot).ok_or(Error::EgoOffLattice)?;
                self.lattice = Some(WaypointLattice::new(
                    start,
                    self.spatial_horizon + LATTICE_MARGIN,
                    self.longitudinal_resolution,
                    Rc::clone(&self.map),
                    Rc::clone(&self.router),
                )?);
                self.root = None;
                self.cached_next_station = None;
            }
        }
        Ok(())
    }

    /// Reset the station graph for this tick. Either start fresh from the
    /// ego, or keep the committed root edge alive by re-synthesizing the
    /// immediate children toward the same target nodes as last tick.
    fn prune_station_graph(
        &mut self,
        lattice: &WaypointLattice,
        snapshot: Snapshot,
    ) -> Result<VecDeque<NodeId>> {
        let mut queue = VecDeque::new();

        let next_station = self
            .cached_next_station
            .filter(|id| lattice.contains(*id));
        let fresh = self.root.is_none()
            || next_station.is_none()
            || self.next_station_reached(lattice, &snapshot);

        let root = Station::new(snapshot, lattice, self.map.as_ref())?;
        let root_id = root.node();

        if fresh {
            self.stations.clear();
            self.stations.insert(root_id, root);
            self.root = Some(root_id);
            queue.push_back(root_id);
            return Ok(queue);
        }

        let next_node = next_station.expect("checked above");
        let distance_to_next = lattice
            .node(next_node)
            .map(|node| node.distance())
            .unwrap_or(0.0)
            - lattice
                .node(root_id)
                .map(|node| node.distance())
                .unwrap_or(0.0);
        let root_waypoint = lattice
            .node(root_id)
            .map(|node| node.waypoint().clone())
            .ok_or(Error::EgoOffLattice)?;

        let front = lattice.front(&root_waypoint, distance_to_next)?;
        let front_left = lattice.front_left(&root_waypoint, distance_to_next)?;
        let front_right = lattice.front_right(&root_waypoint, distance_to_next)?;

        self.stations.clear();
        self.stations.insert(root_id, root);
        self.root = Some(root_id);

        let targets = [
            (front, LaneChangeType::KeepLane),
            (front_left, LaneChangeType::LeftLaneChange),
            (front_right, LaneChangeType::RightLaneChange),
        ];
        for (target, lane_change) in targets {
            let Some(target) = target else {
                continue;
            };
            if let Some((child, newly_created)) =
                self.connect(lattice, root_id, target, lane_change)?
            {
                if newly_created && child == target {
                    queue.push_back(child);
                }
            }
        }

        Ok(queue)
    }

    /// Breadth-first expansion toward the front, left-front, and right-front
    /// nodes one station spacing ahead.
    fn construct_station_graph(
        &mut self,
        lattice: &WaypointLattice,
        station_queue: &mut VecDeque<NodeId>,
    ) -> Result<()> {
        while let Some(station_id) = station_queue.pop_front() {
            let Some(waypoint) = lattice
                .node(station_id)
                .map(|node| node.waypoint().clone())
            else {
                continue;
            };

            let targets = [
                (
                    lattice.front(&waypoint, STATION_SPACING)?,
                    LaneChangeType::KeepLane,
                ),
                (
                    lattice.front_left(&waypoint, STATION_SPACING)?,
                    LaneChangeType::LeftLaneChange,
                ),
                (
                    lattice.front_right(&waypoint, STATION_SPACING)?,
                    LaneChangeType::RightLaneChange,
                ),
            ];

            for (target, lane_change) in targets {
                let Some(target) = target else {
                    continue;
                };
                if let Some((child, newly_created)) =
                    self.connect(lattice, station_id, target, lane_change)?
                {
                    if newly_created && child == target {
                        station_queue.push_back(child);
                    }
                }
            }
        }
        Ok(())
    }

    /// Try to grow an edge from a station to a target node: check lane-change
    /// admissibility, synthesize the path, roll the traffic forward along it,
    /// and link the resulting child station. Local failures drop the option.
    fn connect(
        &mut self,
        lattice: &WaypointLattice,
        station_id: NodeId,
        target: NodeId,
        lane_change: LaneChangeType,
    ) -> Result<Option<(NodeId, bool)>> {
        let Some(parent) = self.stations.get(&station_id) else {
            return Ok(None);
        };
        let parent_cost = parent.cost_to_come();
        let parent_snapshot = parent.snapshot().clone();

        let (Some(station_node), Some(target_node)) =
            (lattice.node(station_id), lattice.node(target))
        else {
            return Ok(None);
        };

        if lane_change != LaneChangeType::KeepLane
            && !lane_change_admissible(
                &parent_snapshot,
                station_node.waypoint(),
                target_node.distance() - station_node.distance(),
                lane_change,
            )
        {
            return Ok(None);
        }

        let start = (
            *parent_snapshot.ego().transform(),
            parent_snapshot.ego().curvature(),
        );
        let end = (
            target_node.waypoint().transform,
            target_node.waypoint().curvature,
        );
        let path = match ContinuousPath::new(start, end, lane_change) {
            Ok(path) => path,
            Err(error) => {
                debug!(%error, "dropping edge without a drivable path");
                return Ok(None);
            }
        };

        let mut simulator =
            TrafficSimulator::new(parent_snapshot, self.idm, EgoControl::from(CarFollowing));
        let simulation = match simulator.simulate(&path, self.sim_time_step, SIMULATION_HORIZON) {
            Ok(simulation) => simulation,
            Err(error) => {
                warn!(%error, "forward simulation failed, dropping edge");
                return Ok(None);
            }
        };
        if simulation.collided {
            return Ok(None);
        }

        let result_snapshot = simulator.into_snapshot();
        let child = match Station::new(result_snapshot.clone(), lattice, self.map.as_ref()) {
            Ok(child) => child,
            Err(error) => {
                debug!(%error, "simulated ego ended off the lattice, dropping edge");
                return Ok(None);
            }
        };
        let child_id = child.node();
        if child_id == station_id {
            // The ego went nowhere within the horizon.
            return Ok(None);
        }

        let newly_created = !self.stations.contains_key(&child_id);
        if newly_created {
            self.stations.insert(child_id, child);
        }

        let (child_direction, parent_direction) = match lane_change {
            LaneChangeType::KeepLane => (ChildDirection::Front, ParentDirection::Back),
            LaneChangeType::LeftLaneChange => (ChildDirection::Left, ParentDirection::Right),
            LaneChangeType::RightLaneChange => (ChildDirection::Right, ParentDirection::Left),
        };

        if let Some(parent) = self.stations.get_mut(&station_id) {
            parent.update_child(child_direction, path, simulation.stage_cost, child_id);
        }
        if let Some(child) = self.stations.get_mut(&child_id) {
            child.update_parent(
                parent_direction,
                result_snapshot,
                parent_cost + simulation.stage_cost,
                station_id,
            );
        }

        Ok(Some((child_id, newly_created)))
    }

    /// Spatial horizon measured from the root, accounting for how far ahead
    /// the first committed station already sits.
    fn effective_spatial_horizon(&self, lattice: &WaypointLattice) -> Result<f64> {
        let root_id = self.root.ok_or(Error::NoTerminal)?;
        let root = self.stations.get(&root_id).ok_or(Error::NoTerminal)?;

        let root_child = [
            ChildDirection::Front,
            ChildDirection::Left,
            ChildDirection::Right,
        ]
        .into_iter()
        .find_map(|direction| root.child(direction))
        .ok_or(Error::NoTerminal)?;

        let child_distance = lattice
            .node(root_child.station)
            .map(|node| node.distance())
            .unwrap_or(0.0);
        let root_distance = lattice
            .node(root_id)
            .map(|node| node.distance())
            .unwrap_or(0.0);

        Ok(self.spatial_horizon - STATION_SPACING + child_distance - root_distance)
    }

    /// Score every terminal station and trace the cheapest one back to the
    /// root through optimal parents.
    fn select_optimal_path(
        &self,
        lattice: &WaypointLattice,
    ) -> Result<(Vec<ContinuousPath>, Vec<NodeId>)> {
        let root_id = self.root.ok_or(Error::NoTerminal)?;
        let horizon = self.effective_spatial_horizon(lattice)?;
        let root_distance = lattice
            .node(root_id)
            .map(|node| node.distance())
            .unwrap_or(0.0);

        let mut station_ids: Vec<NodeId> = self.stations.keys().copied().collect();
        station_ids.sort_unstable_by_key(|id| id.data().as_ffi());

        let mut optimal: Option<(f64, NodeId)> = None;
        for id in station_ids {
            let station = &self.stations[&id];
            if station.has_children() {
                continue;
            }

            let ego = station.snapshot().ego();
            let speed_cost = terminal_speed_cost(ego.speed(), ego.policy_speed())?;
            let distance = lattice
                .node(id)
                .map(|node| node.distance())
                .unwrap_or(0.0)
                - root_distance;
            let cost =
                station.cost_to_come() + speed_cost + terminal_distance_cost(distance, horizon);

            if optimal.map_or(true, |(best, _)| cost < best) {
                optimal = Some((cost, id));
            }
        }

        let (_, terminal_id) = optimal.ok_or(Error::NoTerminal)?;
        let terminal = &self.stations[&terminal_id];
        if !terminal.has_parents() {
            return Err(Error::NoTerminal);
        }

        let mut paths = VecDeque::new();
        let mut sequence = VecDeque::new();
        sequence.push_front(terminal_id);

        let mut current_id = terminal_id;
        let mut current = terminal;
        while let Some(parent_link) = current.optimal_parent() {
            let parent_id = parent_link.station;
            let parent = self
                .stations
                .get(&parent_id)
                .expect("optimal parents stay in the station table");

            let edge = [
                ChildDirection::Front,
                ChildDirection::Left,
                ChildDirection::Right,
            ]
            .into_iter()
            .find_map(|direction| {
                parent
                    .child(direction)
                    .filter(|child| child.station == current_id)
            })
            .expect("parent station links back to its child");

            paths.push_front(edge.path.clone());
            sequence.push_front(parent_id);
            current_id = parent_id;
            current = parent;
        }

        Ok((paths.into(), sequence.into()))
    }
}

/// A lane change is admissible when the target is far enough ahead, the ego
/// is not already drifting the wrong way across the lane centre, and no
/// neighbour vehicle in the target lane blocks the gap.
pub(crate) fn lane_change_admissible(
    snapshot: &Snapshot,
    station_waypoint: &Waypoint,
    target_distance: f64,
    lane_change: LaneChangeType,
) -> bool {
    if target_distance < MIN_LANE_CHANGE_DISTANCE {
        return false;
    }

    let lateral = lateral_offset(&snapshot.ego().location(), station_waypoint);
    let ego = snapshot.ego().id();
    let traffic = snapshot.traffic_lattice();

    let neighbours = match lane_change {
        LaneChangeType::LeftLaneChange => {
            if lateral > LANE_CENTER_TOLERANCE {
                return false;
            }
            (traffic.left_front(ego), traffic.left_back(ego))
        }
        LaneChangeType::RightLaneChange => {
            if lateral < -LANE_CENTER_TOLERANCE {
                return false;
            }
            (traffic.right_front(ego), traffic.right_back(ego))
        }
        LaneChangeType::KeepLane => return true,
    };

    match neighbours {
        (Ok(front), Ok(back)) => {
            front.map_or(true, |(_, distance)| distance > 0.0)
                && back.map_or(true, |(_, distance)| distance > 0.0)
        }
        _ => false,
    }
}
