//! Lattice-based motion planning core for autonomous driving on road
//! networks.
//!
//! The crate builds a discrete graph of reachable road states ahead of the
//! ego vehicle (the waypoint lattice), overlays it with vehicle occupancy
//! and relational queries (the traffic lattice), and searches over stations
//! connected by continuous paths, forward-simulating the surrounding traffic
//! under a car-following model along every candidate edge.
//!
//! Two planner variants are provided: [`IdmLatticePlanner`] recomputes the
//! ego acceleration from car-following during simulation, while
//! [`SpatiotemporalLatticePlanner`] additionally discretizes vertices by ego
//! speed interval and annotates every edge with a constant acceleration
//! drawn from a fixed set.
//!
//! The map service and the route are supplied by the caller through the
//! [`RoadMap`] and [`Router`] traits; [`LoopRouter`] covers the common case
//! of a fixed, wrapping road sequence.

mod cost;
mod error;
mod idm_lattice_planner;
mod intelligent_driver;
mod lattice;
mod map;
mod parameters;
mod path;
mod router;
mod snapshot;
mod spatiotemporal_lattice_planner;
mod station;
mod traffic_lattice;
mod traffic_simulator;
mod utils;
mod vehicle;
mod vertex;

pub use cost::{
    braking_discomfort, comfort_accel_cost, terminal_distance_cost, terminal_speed_cost,
    AccelCostFn,
};
pub use error::{Error, Result};
pub use idm_lattice_planner::IdmLatticePlanner;
pub use intelligent_driver::{IntelligentDriverModel, MAX_BRAKING_ACCEL};
pub use lattice::{Lattice, Node, NodeId, WaypointLattice};
pub use map::{LaneId, RoadId, RoadMap, Waypoint, WaypointId};
pub use parameters::{IdmParameters, Parameters};
pub use path::{ContinuousPath, DiscretePath, LaneChangeType, PathSample};
pub use router::{LoopRouter, Router};
pub use snapshot::Snapshot;
pub use spatiotemporal_lattice_planner::{SpatiotemporalLatticePlanner, ACCELERATION_OPTIONS};
pub use station::{Child, ChildDirection, Parent, ParentDirection, Station};
pub use traffic_lattice::{AddVehicleOutcome, TrafficLattice, TrafficNode, TRAFFIC_RESOLUTION};
pub use traffic_simulator::{
    CarFollowing, ConstantAccel, EgoControl, EgoControlTrait, Simulation, TrafficSimulator,
};
pub use utils::lateral_offset;
pub use vehicle::{Vehicle, VehicleId};
pub use vertex::{speed_interval_index, TrajEdge, TrajParent, Vertex, VertexKey, SPEED_INTERVALS};
