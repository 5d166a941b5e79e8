use std::collections::{BTreeMap, HashSet};
use std::rc::Rc;

use tracing::warn;

use crate::error::{Error, Result};
use crate::map::RoadMap;
use crate::router::Router;
use crate::traffic_lattice::TrafficLattice;
use crate::vehicle::{Vehicle, VehicleId};

/// The world at one simulated instant: the ego, the agent vehicles, and a
/// traffic lattice occupied by all of them.
#[derive(Clone)]
pub struct Snapshot {
    ego: Vehicle,
    agents: BTreeMap<VehicleId, Vehicle>,
    traffic_lattice: TrafficLattice,
}

impl Snapshot {
    /// Build a snapshot, constructing the embedded traffic lattice. Agents
    /// that cannot be placed on the lattice are dropped; an unplaceable ego
    /// is an error, as is any overlap between vehicles.
    pub fn new(
        ego: Vehicle,
        agents: Vec<Vehicle>,
        map: Rc<dyn RoadMap>,
        router: Rc<dyn Router>,
    ) -> Result<Self> {
        let mut agent_map = BTreeMap::new();
        for agent in agents {
            if agent.id() == ego.id() {
                warn!(vehicle = agent.id(), "agent with the ego id ignored");
                continue;
            }
            agent_map.insert(agent.id(), agent);
        }

        let mut vehicles = vec![ego.clone()];
        vehicles.extend(agent_map.values().cloned());

        let (traffic_lattice, disappeared) = TrafficLattice::new(&vehicles, map, router)?;
        Self::drop_disappeared(&mut agent_map, &ego, &disappeared)?;

        Ok(Self {
            ego,
            agents: agent_map,
            traffic_lattice,
        })
    }

    pub fn ego(&self) -> &Vehicle {
        &self.ego
    }

    /// Agent vehicles in ascending id order.
    pub fn agents(&self) -> impl Iterator<Item = &Vehicle> {
        self.agents.values()
    }

    pub fn agent(&self, id: VehicleId) -> Option<&Vehicle> {
        self.agents.get(&id)
    }

    /// The ego or an agent.
    pub fn vehicle(&self, id: VehicleId) -> Option<&Vehicle> {
        if id == self.ego.id() {
            Some(&self.ego)
        } else {
            self.agent(id)
        }
    }

    pub fn traffic_lattice(&self) -> &TrafficLattice {
        &self.traffic_lattice
    }

    pub fn map(&self) -> &Rc<dyn RoadMap> {
        self.traffic_lattice.map()
    }

    pub fn router(&self) -> &Rc<dyn Router> {
        self.traffic_lattice.router()
    }

    /// Copy of this snapshot with the ego commanded to a fixed acceleration.
    pub fn with_ego_acceleration(&self, acceleration: f64) -> Self {
        let mut snapshot = self.clone();
        snapshot.ego.set_acceleration(acceleration);
        snapshot
    }

    /// Move every vehicle to its updated state and re-anchor the embedded
    /// traffic lattice. Returns `false` when the update collides.
    pub(crate) fn advance(&mut self, ego: Vehicle, agents: Vec<Vehicle>) -> Result<bool> {
        let mut agent_map = BTreeMap::new();
        for agent in agents {
            agent_map.insert(agent.id(), agent);
        }

        let mut vehicles = vec![ego.clone()];
        vehicles.extend(agent_map.values().cloned());

        let (no_collision, disappeared) = self.traffic_lattice.move_traffic_forward(&vehicles)?;
        Self::drop_disappeared(&mut agent_map, &ego, &disappeared)?;

        self.ego = ego;
        self.agents = agent_map;
        Ok(no_collision)
    }

    fn drop_disappeared(
        agents: &mut BTreeMap<VehicleId, Vehicle>,
        ego: &Vehicle,
        disappeared: &HashSet<VehicleId>,
    ) -> Result<()> {
        if disappeared.contains(&ego.id()) {
            return Err(Error::EgoOffLattice);
        }
        for id in disappeared {
            warn!(vehicle = id, "agent left the local traffic and is dropped");
            agents.remove(id);
        }
        Ok(())
    }
}
