use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use slotmap::Key;
use tracing::{debug, warn};

use crate::cost::{comfort_accel_cost, terminal_distance_cost, terminal_speed_cost, AccelCostFn};
use crate::error::{Error, Result};
use crate::idm_lattice_planner::{
    lane_change_admissible, HISTORY_BEHIND, LATTICE_MARGIN, NEXT_STATION_TOLERANCE,
    SIMULATION_HORIZON, STATION_SPACING,
};
use crate::intelligent_driver::IntelligentDriverModel;
use crate::lattice::{NodeId, WaypointLattice};
use crate::map::{RoadMap, Waypoint};
use crate::parameters::Parameters;
use crate::path::{ContinuousPath, DiscretePath, LaneChangeType};
use crate::router::Router;
use crate::snapshot::Snapshot;
use crate::station::{ChildDirection, ParentDirection};
use crate::traffic_simulator::{ConstantAccel, EgoControl, TrafficSimulator};
use crate::vehicle::VehicleId;
use crate::vertex::{Vertex, VertexKey, SPEED_INTERVALS};

/// Constant ego accelerations tried for every expansion, in order.
pub const ACCELERATION_OPTIONS: [f64; 6] = [-8.0, -4.0, -2.0, -1.0, 0.0, 1.0];

/// Lattice planner over spatiotemporal vertices: one search vertex per
/// (waypoint node, ego speed interval), with edges annotated by a constant
/// ego acceleration held over the edge.
pub struct SpatiotemporalLatticePlanner {
    sim_time_step: f64,
    spatial_horizon: f64,
    longitudinal_resolution: f64,
    path_sample_resolution: f64,
    idm: IntelligentDriverModel,
    accel_cost: AccelCostFn,
    map: Rc<dyn RoadMap>,
    router: Rc<dyn Router>,
    lattice: Option<WaypointLattice>,
    vertices: HashMap<NodeId, [Option<Vertex>; 3]>,
    root: Option<VertexKey>,
    cached_next_vertex: Option<VertexKey>,
}

impl SpatiotemporalLatticePlanner {
    pub fn new(params: &Parameters, map: Rc<dyn RoadMap>, router: Rc<dyn Router>) -> Self {
        Self {
            sim_time_step: params.sim_time_step,
            spatial_horizon: params.spatial_horizon,
            longitudinal_resolution: params.longitudinal_resolution,
            path_sample_resolution: params.path_sample_resolution,
            idm: IntelligentDriverModel::new(&params.idm),
            accel_cost: comfort_accel_cost,
            map,
            router,
            lattice: None,
            vertices: HashMap::new(),
            root: None,
            cached_next_vertex: None,
        }
    }

    /// Swap in a calibrated acceleration-comfort cost.
    pub fn with_accel_cost(mut self, accel_cost: AccelCostFn) -> Self {
        self.accel_cost = accel_cost;
        self
    }

    pub fn waypoint_lattice(&self) -> Option<&WaypointLattice> {
        self.lattice.as_ref()
    }

    pub fn root_vertex(&self) -> Option<&Vertex> {
        self.vertex(self.root?)
    }

    fn vertex(&self, key: VertexKey) -> Option<&Vertex> {
        self.vertices.get(&key.0)?[key.1].as_ref()
    }

    fn vertex_mut(&mut self, key: VertexKey) -> Option<&mut Vertex> {
        self.vertices.get_mut(&key.0)?[key.1].as_mut()
    }

    fn insert_vertex(&mut self, vertex: Vertex) -> Result<VertexKey> {
        let key = vertex.key()?;
        self.vertices.entry(key.0).or_insert_with(|| [None, None, None])[key.1] = Some(vertex);
        Ok(key)
    }

    /// Plan a trajectory: the edge paths to the best terminal, each paired
    /// with the constant acceleration held over it.
    pub fn plan_traj(
        &mut self,
        ego: VehicleId,
        snapshot: Snapshot,
    ) -> Result<Vec<(ContinuousPath, f64)>> {
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

    /// Plan and concatenate the edge paths into a single discrete path.
    pub fn plan_path(&mut self, ego: VehicleId, snapshot: Snapshot) -> Result<DiscretePath> {
        let trajectory = self.plan_traj(ego, snapshot)?;

        let mut merged = trajectory
            .first()
            .map(|(path, _)| DiscretePath::new(path, self.path_sample_resolution))
            .ok_or(Error::NoTerminal)?;
        for (path, _) in &trajectory[1..] {
            merged.append(path);
        }
        Ok(merged)
    }

    fn plan_on_lattice(
        &mut self,
        lattice: &WaypointLattice,
        snapshot: Snapshot,
    ) -> Result<Vec<(ContinuousPath, f64)>> {
        let mut vertex_queue = self.prune_vertex_graph(lattice, snapshot)?;
        if vertex_queue.is_empty() {
            return Err(Error::NoReachableNextStation);
        }

        self.construct_vertex_graph(lattice, &mut vertex_queue)?;

        let (trajectory, vertex_sequence) = self.select_optimal_traj(lattice)?;
        self.cached_next_vertex = vertex_sequence.get(1).copied();
        Ok(trajectory)
    }

    fn ego_waypoint(&self, snapshot: &Snapshot) -> Option<Waypoint> {
        self.map.waypoint_at(snapshot.ego().location())
    }

    fn ego_node(&self, lattice: &WaypointLattice, snapshot: &Snapshot) -> Option<NodeId> {
        let waypoint = self.ego_waypoint(snapshot)?;
        lattice.closest_node(&waypoint, lattice.longitudinal_resolution())
    }

    fn next_vertex_reached(&self, lattice: &WaypointLattice, snapshot: &Snapshot) -> bool {
        let Some((next_node, _)) = self.cached_next_vertex else {
            return false;
        };
        let Some(target_distance) = lattice.node(next_node).map(|node| node.distance()) else {
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
            warn!(gap, "ego has overrun the committed next vertex");
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

        if !self.next_vertex_reached(lattice, snapshot) {
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
                self.cached_next_vertex = None;
            }
        }
        Ok(())
    }

    fn prune_vertex_graph(
        &mut self,
        lattice: &WaypointLattice,
        snapshot: Snapshot,
    ) -> Result<VecDeque<VertexKey>> {
        let mut queue = VecDeque::new();

        let next_vertex = self
            .cached_next_vertex
            .filter(|(node, _)| lattice.contains(*node));
        let fresh = self.root.is_none()
            || next_vertex.is_none()
            || self.next_vertex_reached(lattice, &snapshot);

        let root = Vertex::new(snapshot, lattice, self.map.as_ref())?;
        let root_node = root.node();

        if fresh {
            self.vertices.clear();
            let root_key = self.insert_vertex(root)?;
            self.root = Some(root_key);
            queue.push_back(root_key);
            return Ok(queue);
        }

        let (next_node, _) = next_vertex.expect("checked above");
        let distance_to_next = lattice
            .node(next_node)
            .map(|node| node.distance())
            .unwrap_or(0.0)
            - lattice
                .node(root_node)
                .map(|node| node.distance())
                .unwrap_or(0.0);
        let root_waypoint = lattice
            .node(root_node)
            .map(|node| node.waypoint().clone())
            .ok_or(Error::EgoOffLattice)?;

        let front = lattice.front(&root_waypoint, distance_to_next)?;
        let front_left = lattice.front_left(&root_waypoint, distance_to_next)?;
        let front_right = lattice.front_right(&root_waypoint, distance_to_next)?;

        self.vertices.clear();
        let root_key = self.insert_vertex(root)?;
        self.root = Some(root_key);

        let targets = [
            (front, LaneChangeType::KeepLane),
            (front_left, LaneChangeType::LeftLaneChange),
            (front_right, LaneChangeType::RightLaneChange),
        ];
        for (target, lane_change) in targets {
            let Some(target) = target else {
                continue;
            };
            let created = self.connect(lattice, root_key, target, lane_change)?;
            queue.extend(created);
        }

        Ok(queue)
    }

    fn construct_vertex_graph(
        &mut self,
        lattice: &WaypointLattice,
        vertex_queue: &mut VecDeque<VertexKey>,
    ) -> Result<()> {
        while let Some(vertex_key) = vertex_queue.pop_front() {
            let Some(waypoint) = lattice
                .node(vertex_key.0)
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
                let created = self.connect(lattice, vertex_key, target, lane_change)?;
                vertex_queue.extend(created);
            }
        }
        Ok(())
    }

    /// Grow edges from a vertex to a target node, one rollout per admissible
    /// constant acceleration. Returns the keys of newly created vertices that
    /// actually reached the target node.
    fn connect(
        &mut self,
        lattice: &WaypointLattice,
        vertex_key: VertexKey,
        target: NodeId,
        lane_change: LaneChangeType,
    ) -> Result<Vec<VertexKey>> {
        let Some(parent) = self.vertex(vertex_key) else {
            return Ok(Vec::new());
        };
        let parent_cost = parent.cost_to_come();
        let parent_snapshot = parent.snapshot().clone();
        let parent_interval = vertex_key.1;

        let (Some(vertex_node), Some(target_node)) =
            (lattice.node(vertex_key.0), lattice.node(target))
        else {
            return Ok(Vec::new());
        };

        if lane_change != LaneChangeType::KeepLane
            && !lane_change_admissible(
                &parent_snapshot,
                vertex_node.waypoint(),
                target_node.distance() - vertex_node.distance(),
                lane_change,
            )
        {
            return Ok(Vec::new());
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
                debug!(%error, "dropping expansion without a drivable path");
                return Ok(Vec::new());
            }
        };

        let (child_direction, parent_direction) = match lane_change {
            LaneChangeType::KeepLane => (ChildDirection::Front, ParentDirection::Back),
            LaneChangeType::LeftLaneChange => (ChildDirection::Left, ParentDirection::Right),
            LaneChangeType::RightLaneChange => (ChildDirection::Right, ParentDirection::Left),
        };

        let mut created = Vec::new();
        for acceleration in ACCELERATION_OPTIONS {
            let snapshot = parent_snapshot.with_ego_acceleration(acceleration);
            let mut simulator = TrafficSimulator::new(
                snapshot,
                self.idm,
                EgoControl::from(ConstantAccel {
                    accel_cost: self.accel_cost,
                }),
            );

            let simulation = match simulator.simulate(&path, self.sim_time_step, SIMULATION_HORIZON)
            {
                Ok(simulation) => simulation,
                Err(error) => {
                    warn!(%error, acceleration, "forward simulation failed, dropping option");
                    continue;
                }
            };
            if simulation.collided {
                continue;
            }

            let result_snapshot = simulator.into_snapshot();
            let child = match Vertex::new(result_snapshot.clone(), lattice, self.map.as_ref()) {
                Ok(child) => child,
                Err(error) => {
                    debug!(%error, acceleration, "simulated ego ended off the lattice");
                    continue;
                }
            };
            let child_node = child.node();
            if child_node == vertex_key.0 {
                continue;
            }
            let Some(child_interval) = child.speed_interval() else {
                debug!(
                    speed = child.speed(),
                    acceleration, "terminal speed outside the valid intervals"
                );
                continue;
            };
            let child_key = (child_node, child_interval);

            let newly_created = self.vertex(child_key).is_none();
            if newly_created {
                self.insert_vertex(child)?;
            }

            if let Some(parent) = self.vertex_mut(vertex_key) {
                parent.update_child(
                    child_direction,
                    child_interval,
                    path.clone(),
                    acceleration,
                    simulation.stage_cost,
                    child_key,
                );
            }
            if let Some(child) = self.vertex_mut(child_key) {
                child.update_parent(
                    parent_direction,
                    parent_interval,
                    result_snapshot,
                    parent_cost + simulation.stage_cost,
                    vertex_key,
                );
            }

            if newly_created && child_node == target {
                created.push(child_key);
            }
        }

        Ok(created)
    }

    fn effective_spatial_horizon(&self, lattice: &WaypointLattice) -> Result<f64> {
        let root_key = self.root.ok_or(Error::NoTerminal)?;
        let root = self.vertex(root_key).ok_or(Error::NoTerminal)?;

        let root_child = root.children().next().ok_or(Error::NoTerminal)?;
        let child_distance = lattice
            .node(root_child.vertex.0)
            .map(|node| node.distance())
            .unwrap_or(0.0);
        let root_distance = lattice
            .node(root_key.0)
            .map(|node| node.distance())
            .unwrap_or(0.0);

        Ok(self.spatial_horizon - STATION_SPACING + child_distance - root_distance)
    }

    fn select_optimal_traj(
        &self,
        lattice: &WaypointLattice,
    ) -> Result<(Vec<(ContinuousPath, f64)>, Vec<VertexKey>)> {
        let root_key = self.root.ok_or(Error::NoTerminal)?;
        let horizon = self.effective_spatial_horizon(lattice)?;
        let root_distance = lattice
            .node(root_key.0)
            .map(|node| node.distance())
            .unwrap_or(0.0);

        let mut vertex_keys: Vec<VertexKey> = self
            .vertices
            .iter()
            .flat_map(|(&node, slots)| {
                slots
                    .iter()
                    .enumerate()
                    .filter(|(_, vertex)| vertex.is_some())
                    .map(move |(interval, _)| (node, interval))
            })
            .collect();
        vertex_keys.sort_unstable_by_key(|(node, interval)| (node.data().as_ffi(), *interval));

        let mut optimal: Option<(f64, VertexKey)> = None;
        for key in vertex_keys {
            let Some(vertex) = self.vertex(key) else {
                continue;
            };
            if vertex.has_children() {
                continue;
            }

            let ego = vertex.snapshot().ego();
            let speed_cost = terminal_speed_cost(ego.speed(), ego.policy_speed())?;
            let distance = lattice
                .node(key.0)
                .map(|node| node.distance())
                .unwrap_or(0.0)
                - root_distance;
            let cost =
                vertex.cost_to_come() + speed_cost + terminal_distance_cost(distance, horizon);

            if optimal.map_or(true, |(best, _)| cost < best) {
                optimal = Some((cost, key));
            }
        }

        let (_, terminal_key) = optimal.ok_or(Error::NoTerminal)?;
        let terminal = self.vertex(terminal_key).ok_or(Error::NoTerminal)?;
        if !terminal.has_parents() {
            return Err(Error::NoTerminal);
        }

        let mut trajectory = VecDeque::new();
        let mut sequence = VecDeque::new();
        sequence.push_front(terminal_key);

        let mut current_key = terminal_key;
        let mut current = terminal;
        while let Some(parent_link) = current.optimal_parent() {
            let parent_key = parent_link.vertex;
            let parent = self
                .vertex(parent_key)
                .expect("optimal parents stay in the vertex table");

            let edge = [
                ChildDirection::Front,
                ChildDirection::Left,
                ChildDirection::Right,
            ]
            .into_iter()
            .flat_map(|direction| {
                (0..SPEED_INTERVALS.len()).filter_map(move |interval| parent.child(direction, interval))
            })
            .find(|edge| edge.vertex == current_key)
            .expect("parent vertex links back to its child");

            trajectory.push_front((edge.path.clone(), edge.acceleration));
            sequence.push_front(parent_key);
            current_key = parent_key;
            current = parent;
        }

        Ok((trajectory.into(), sequence.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vertex::speed_interval_index;

    #[test]
    fn test_acceleration_options_order() {
        // Options are tried hardest-braking first, mild acceleration last.
        assert_eq!(ACCELERATION_OPTIONS[0], -8.0);
        assert_eq!(ACCELERATION_OPTIONS[5], 1.0);
        for window in ACCELERATION_OPTIONS.windows(2) {
            assert!(window[0] < window[1]);
        }
    }

    #[test]
    fn test_interval_index_helper_matches_partition() {
        for (i, (low, high)) in SPEED_INTERVALS.iter().enumerate() {
            assert_eq!(speed_interval_index(*low), Some(i));
            assert_eq!(speed_interval_index((low + high) / 2.0), Some(i));
        }
    }
}
