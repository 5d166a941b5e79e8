use crate::error::{Error, Result};
use crate::lattice::{NodeId, WaypointLattice};
use crate::map::RoadMap;
use crate::path::ContinuousPath;
use crate::snapshot::Snapshot;

/// Which side a parent station connects from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParentDirection {
    Back,
    Left,
    Right,
}

/// Which side a child station connects to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChildDirection {
    Front,
    Left,
    Right,
}

/// An inbound edge: the traffic state on arriving through this parent and
/// the accumulated cost of getting here this way.
#[derive(Clone)]
pub struct Parent {
    pub snapshot: Snapshot,
    pub cost_to_come: f64,
    pub station: NodeId,
}

/// An outbound edge: the path driven to the child and its stage cost.
#[derive(Clone)]
pub struct Child {
    pub path: ContinuousPath,
    pub stage_cost: f64,
    pub station: NodeId,
}

/// A search-graph node pinned to a waypoint-lattice node. A station owns the
/// snapshot captured when the ego reaches it through its optimal parent.
pub struct Station {
    node: NodeId,
    snapshot: Snapshot,
    back_parent: Option<Parent>,
    left_parent: Option<Parent>,
    right_parent: Option<Parent>,
    optimal_parent: Option<ParentDirection>,
    front_child: Option<Child>,
    left_child: Option<Child>,
    right_child: Option<Child>,
}

impl Station {
    /// Anchor a station at the lattice node closest to the snapshot's ego.
    pub fn new(snapshot: Snapshot, lattice: &WaypointLattice, map: &dyn RoadMap) -> Result<Self> {
        let waypoint = map
            .waypoint_at(snapshot.ego().location())
            .ok_or(Error::EgoOffLattice)?;
        let node = lattice
            .closest_node(&waypoint, lattice.longitudinal_resolution())
            .ok_or(Error::EgoOffLattice)?;

        Ok(Self {
            node,
            snapshot,
            back_parent: None,
            left_parent: None,
            right_parent: None,
            optimal_parent: None,
            front_child: None,
            left_child: None,
            right_child: None,
        })
    }

    /// The station id: the waypoint-lattice node it is pinned to.
    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Cost accumulated from the root through the optimal parent; zero at
    /// the root.
    pub fn cost_to_come(&self) -> f64 {
        self.optimal_parent()
            .map_or(0.0, |parent| parent.cost_to_come)
    }

    pub fn parent(&self, direction: ParentDirection) -> Option<&Parent> {
        match direction {
            ParentDirection::Back => self.back_parent.as_ref(),
            ParentDirection::Left => self.left_parent.as_ref(),
            ParentDirection::Right => self.right_parent.as_ref(),
        }
    }

    pub fn optimal_parent(&self) -> Option<&Parent> {
        self.parent(self.optimal_parent?)
    }

    pub fn has_parents(&self) -> bool {
        self.optimal_parent.is_some()
    }

    pub fn child(&self, direction: ChildDirection) -> Option<&Child> {
        match direction {
            ChildDirection::Front => self.front_child.as_ref(),
            ChildDirection::Left => self.left_child.as_ref(),
            ChildDirection::Right => self.right_child.as_ref(),
        }
    }

    pub fn has_children(&self) -> bool {
        self.front_child.is_some() || self.left_child.is_some() || self.right_child.is_some()
    }

    pub fn update_parent(
        &mut self,
        direction: ParentDirection,
        snapshot: Snapshot,
        cost_to_come: f64,
        station: NodeId,
    ) {
        let parent = Parent {
            snapshot,
            cost_to_come,
            station,
        };
        match direction {
            ParentDirection::Back => self.back_parent = Some(parent),
            ParentDirection::Left => self.left_parent = Some(parent),
            ParentDirection::Right => self.right_parent = Some(parent),
        }
        self.update_optimal_parent();
    }

    pub fn update_child(
        &mut self,
        direction: ChildDirection,
        path: ContinuousPath,
        stage_cost: f64,
        station: NodeId,
    ) {
        let child = Child {
            path,
            stage_cost,
            station,
        };
        match direction {
            ChildDirection::Front => self.front_child = Some(child),
            ChildDirection::Left => self.left_child = Some(child),
            ChildDirection::Right => self.right_child = Some(child),
        }
    }

    /// Re-select the minimum-cost parent. The station's snapshot follows its
    /// optimal parent.
    fn update_optimal_parent(&mut self) {
        let costs = [
            self.back_parent.as_ref().map(|p| p.cost_to_come),
            self.left_parent.as_ref().map(|p| p.cost_to_come),
            self.right_parent.as_ref().map(|p| p.cost_to_come),
        ];
        if let Some(direction) = select_optimal_parent(costs) {
            self.optimal_parent = Some(direction);
            let snapshot = self.parent(direction).map(|p| p.snapshot.clone());
            if let Some(snapshot) = snapshot {
                self.snapshot = snapshot;
            }
        }
    }
}

/// Minimum-cost parent among `[back, left, right]` costs. Ties prefer back,
/// then left, then right.
pub(crate) fn select_optimal_parent(costs: [Option<f64>; 3]) -> Option<ParentDirection> {
    let order = [
        ParentDirection::Back,
        ParentDirection::Left,
        ParentDirection::Right,
    ];

    let mut best: Option<(ParentDirection, f64)> = None;
    for (direction, cost) in order.into_iter().zip(costs) {
        let Some(cost) = cost else {
            continue;
        };
        if best.map_or(true, |(_, c)| cost < c) {
            best = Some((direction, cost));
        }
    }
    best.map(|(direction, _)| direction)
}
