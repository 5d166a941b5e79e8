use crate::map::RoadId;
use crate::vehicle::VehicleId;

/// Errors produced by the planning core.
///
/// Per-tick failures (`WrongEgo`, `NoReachableNextStation`, ...) escape
/// `plan_path` and invalidate the planner's cached root for that tick.
/// `PathSynthesis` and simulation collisions are consumed by the expansion
/// loop and never reach the caller.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("planner can only plan for the ego: target vehicle {expected}, snapshot ego {actual}")]
    WrongEgo { expected: VehicleId, actual: VehicleId },

    #[error("collision detected within the given vehicles: {vehicles:?}")]
    ConstructionCollision { vehicles: Vec<VehicleId> },

    #[error("update vehicles do not match registered vehicles: registered {registered:?}, update {updated:?}")]
    SetMismatch {
        registered: Vec<VehicleId>,
        updated: Vec<VehicleId>,
    },

    #[error("roads {roads:?} cannot be connected into a local chain")]
    RoadsNotOnLocalChain { roads: Vec<RoadId> },

    #[error("the ego cannot reach any immediate next station")]
    NoReachableNextStation,

    #[error("no terminal station in the graph")]
    NoTerminal,

    #[error("ego speed {speed} is outside the valid speed intervals")]
    InvalidSpeed { speed: f64 },

    #[error("lattice range {range} must exceed the longitudinal resolution {resolution}")]
    InvalidRange { range: f64, resolution: f64 },

    #[error("query distance {distance} must be positive")]
    InvalidDistance { distance: f64 },

    #[error("cannot match the front node to the head node of vehicle {vehicle}")]
    TopologyMismatch { vehicle: VehicleId },

    #[error("vehicle {vehicle} is not on the lattice")]
    VehicleNotOnLattice { vehicle: VehicleId },

    #[error("cannot find a lattice node for the ego location")]
    EgoOffLattice,

    #[error("cannot find the updated start waypoint on the existing lattice")]
    StartNotOnLattice,

    #[error("path synthesis failed: {reason}")]
    PathSynthesis { reason: String },

    #[error("car-following requires a positive policy speed, got {speed}")]
    PolicySpeed { speed: f64 },
}

pub type Result<T> = std::result::Result<T, Error>;
