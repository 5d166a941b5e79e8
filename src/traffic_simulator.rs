use enum_dispatch::enum_dispatch;
use tracing::debug;

use crate::cost::{braking_discomfort, AccelCostFn};
use crate::error::Result;
use crate::intelligent_driver::{IntelligentDriverModel, MAX_BRAKING_ACCEL};
use crate::path::ContinuousPath;
use crate::snapshot::Snapshot;
use crate::utils::heading;
use crate::vehicle::Vehicle;

/// Where the ego's longitudinal acceleration comes from during a rollout.
#[enum_dispatch(EgoControl)]
pub trait EgoControlTrait {
    fn ego_acceleration(&self, snapshot: &Snapshot, idm: &IntelligentDriverModel) -> Result<f64>;

    /// Comfort cost rate charged for the chosen acceleration.
    fn accel_penalty(&self, accel: f64, speed: f64, policy_speed: f64) -> f64;
}

/// Ego follows its lead under the car-following model, like every agent.
#[derive(Clone, Copy, Debug)]
pub struct CarFollowing;

impl EgoControlTrait for CarFollowing {
    fn ego_acceleration(&self, snapshot: &Snapshot, idm: &IntelligentDriverModel) -> Result<f64> {
        // Only the front vehicle on the lane of the ego's head is considered,
        // whether or not the ego is mid lane change.
        let ego = snapshot.ego();
        let lead = snapshot.traffic_lattice().front(ego.id())?;

        match lead {
            Some((lead_id, gap)) => {
                let lead_speed = snapshot
                    .vehicle(lead_id)
                    .map_or(ego.speed(), Vehicle::speed);
                idm.accel(ego.speed(), ego.policy_speed(), lead_speed, gap)
            }
            None => idm.free_accel(ego.speed(), ego.policy_speed()),
        }
    }

    fn accel_penalty(&self, accel: f64, _speed: f64, _policy_speed: f64) -> f64 {
        braking_discomfort(accel)
    }
}

/// Ego holds the acceleration recorded in the snapshot for the whole edge.
#[derive(Clone, Copy, Debug)]
pub struct ConstantAccel {
    pub accel_cost: AccelCostFn,
}

impl EgoControlTrait for ConstantAccel {
    fn ego_acceleration(&self, snapshot: &Snapshot, _idm: &IntelligentDriverModel) -> Result<f64> {
        Ok(snapshot.ego().acceleration())
    }

    fn accel_penalty(&self, accel: f64, speed: f64, policy_speed: f64) -> f64 {
        (self.accel_cost)(accel, speed, policy_speed)
    }
}

#[enum_dispatch]
#[derive(Clone, Copy, Debug)]
pub enum EgoControl {
    CarFollowing,
    ConstantAccel,
}

/// Outcome of one forward rollout.
#[derive(Clone, Copy, Debug)]
pub struct Simulation {
    /// A registration conflict ended the rollout early.
    pub collided: bool,
    /// Simulated seconds actually rolled forward.
    pub time: f64,
    /// Accumulated comfort penalties over the rollout.
    pub stage_cost: f64,
}

/// Rolls a snapshot forward in fixed time steps with the ego constrained to a
/// path and every agent reacting to its own lead under car-following.
pub struct TrafficSimulator {
    snapshot: Snapshot,
    idm: IntelligentDriverModel,
    control: EgoControl,
}

impl TrafficSimulator {
    pub fn new(snapshot: Snapshot, idm: IntelligentDriverModel, control: EgoControl) -> Self {
        Self {
            snapshot,
            idm,
            control,
        }
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn into_snapshot(self) -> Snapshot {
        self.snapshot
    }

    fn agent_acceleration(&self, agent: &Vehicle) -> Result<f64> {
        let lead = self.snapshot.traffic_lattice().front(agent.id())?;
        match lead {
            Some((lead_id, gap)) => {
                let lead_speed = self
                    .snapshot
                    .vehicle(lead_id)
                    .map_or(agent.speed(), Vehicle::speed);
                self.idm
                    .accel(agent.speed(), agent.policy_speed(), lead_speed, gap)
            }
            None => self.idm.free_accel(agent.speed(), agent.policy_speed()),
        }
    }

    /// Advance an agent along its route by `distance`, keeping it pinned to
    /// lane centres.
    fn advance_agent(&self, agent: &Vehicle, distance: f64, speed: f64, accel: f64) -> Vehicle {
        let mut updated = agent.clone();
        updated.set_speed(speed);
        updated.set_acceleration(accel);

        if distance <= 1e-3 {
            return updated;
        }

        let map = self.snapshot.map();
        let next = map
            .waypoint_at(agent.location())
            .and_then(|waypoint| {
                self.snapshot
                    .router()
                    .front_waypoint(map.as_ref(), &waypoint, distance)
                    .ok()
                    .flatten()
            });

        match next {
            Some(waypoint) => {
                updated.set_curvature(waypoint.curvature);
                updated.set_transform(waypoint.transform);
            }
            None => {
                // Off the route; drift straight ahead and let registration
                // decide whether the vehicle stays in the local traffic.
                let transform = *agent.transform();
                let advanced = nalgebra::Isometry2::new(
                    transform.translation.vector + heading(&transform) * distance,
                    transform.rotation.angle(),
                );
                updated.set_transform(advanced);
            }
        }
        updated
    }

    /// Roll the snapshot forward in steps of `time_step` until the ego
    /// reaches the end of `path` or `horizon` seconds have elapsed.
    pub fn simulate(
        &mut self,
        path: &ContinuousPath,
        time_step: f64,
        horizon: f64,
    ) -> Result<Simulation> {
        let mut time = 0.0;
        let mut stage_cost = 0.0;
        let mut ego_arc = 0.0;

        while time < horizon - 1e-9 {
            let dt = time_step.min(horizon - time);

            let ego = self.snapshot.ego().clone();
            let ego_accel = self
                .control
                .ego_acceleration(&self.snapshot, &self.idm)?
                .clamp(-MAX_BRAKING_ACCEL, MAX_BRAKING_ACCEL);

            let agent_updates: Vec<(Vehicle, f64, f64, f64)> = {
                let mut updates = Vec::new();
                for agent in self.snapshot.agents() {
                    let accel = self.agent_acceleration(agent)?.clamp(
                        -MAX_BRAKING_ACCEL,
                        MAX_BRAKING_ACCEL,
                    );
                    let speed = (agent.speed() + accel * dt).max(0.0);
                    let distance = (agent.speed() + speed) / 2.0 * dt;
                    updates.push((agent.clone(), distance, speed, accel));
                }
                updates
            };

            // Ego moves along the path; agents follow their lanes.
            let ego_speed = (ego.speed() + ego_accel * dt).max(0.0);
            ego_arc += (ego.speed() + ego_speed) / 2.0 * dt;
            let path_done = ego_arc >= path.range();
            if path_done {
                ego_arc = path.range();
            }

            let mut updated_ego = ego.clone();
            updated_ego.set_transform(path.transform_at(ego_arc));
            updated_ego.set_curvature(path.curvature_at(ego_arc));
            updated_ego.set_speed(ego_speed);
            updated_ego.set_acceleration(ego_accel);

            let updated_agents: Vec<Vehicle> = agent_updates
                .iter()
                .map(|(agent, distance, speed, accel)| {
                    self.advance_agent(agent, *distance, *speed, *accel)
                })
                .collect();

            stage_cost +=
                self.control
                    .accel_penalty(ego_accel, ego.speed(), ego.policy_speed())
                    * dt;

            let no_collision = self.snapshot.advance(updated_ego, updated_agents)?;
            time += dt;

            if !no_collision {
                debug!(time, "collision during forward simulation");
                return Ok(Simulation {
                    collided: true,
                    time,
                    stage_cost,
                });
            }
            if path_done {
                break;
            }
        }

        Ok(Simulation {
            collided: false,
            time,
            stage_cost,
        })
    }
}
