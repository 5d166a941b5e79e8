use crate::error::{Error, Result};
use crate::lattice::{NodeId, WaypointLattice};
use crate::map::RoadMap;
use crate::path::ContinuousPath;
use crate::snapshot::Snapshot;
use crate::station::{select_optimal_parent, ChildDirection, ParentDirection};

/// The fixed ego-speed partition discretizing vertex identity. Intervals are
/// left-closed: a speed exactly on a boundary belongs to the upper interval.
pub const SPEED_INTERVALS: [(f64, f64); 3] = [
    (0.0, 13.4112),
    (13.4112, 26.8224),
    (26.8224, 40.2336),
];

/// Index of the speed interval containing `speed`, if any.
pub fn speed_interval_index(speed: f64) -> Option<usize> {
    if speed < 0.0 {
        return None;
    }
    SPEED_INTERVALS
        .iter()
        .position(|&(_, upper)| speed < upper)
}

/// Identity of a vertex: its waypoint node and its ego-speed interval.
pub type VertexKey = (NodeId, usize);

/// An inbound trajectory edge of a vertex.
#[derive(Clone)]
pub struct TrajParent {
    pub snapshot: Snapshot,
    pub cost_to_come: f64,
    pub vertex: VertexKey,
}

/// An outbound trajectory edge: the path, the constant acceleration held
/// over it, and its stage cost.
#[derive(Clone)]
pub struct TrajEdge {
    pub path: ContinuousPath,
    pub acceleration: f64,
    pub stage_cost: f64,
    pub vertex: VertexKey,
}

fn empty_slots<T>() -> [Option<T>; 3] {
    [None, None, None]
}

/// A search vertex pinned to a waypoint node and a speed interval. Parent
/// slots are indexed by the parent's speed interval, child slots by the
/// child's.
pub struct Vertex {
    node: NodeId,
    snapshot: Snapshot,
    back_parents: [Option<TrajParent>; 3],
    left_parents: [Option<TrajParent>; 3],
    right_parents: [Option<TrajParent>; 3],
    optimal_parent: Option<(ParentDirection, usize)>,
    front_children: [Option<TrajEdge>; 3],
    left_children: [Option<TrajEdge>; 3],
    right_children: [Option<TrajEdge>; 3],
}

impl Vertex {
    /// Anchor a vertex at the lattice node closest to the snapshot's ego.
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
            back_parents: empty_slots(),
            left_parents: empty_slots(),
            right_parents: empty_slots(),
            optimal_parent: None,
            front_children: empty_slots(),
            left_children: empty_slots(),
            right_children: empty_slots(),
        })
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn speed(&self) -> f64 {
        self.snapshot.ego().speed()
    }

    /// Speed interval of this vertex, from its snapshot's ego speed.
    pub fn speed_interval(&self) -> Option<usize> {
        speed_interval_index(self.speed())
    }

    pub fn key(&self) -> Result<VertexKey> {
        let interval = self.speed_interval().ok_or(Error::InvalidSpeed {
            speed: self.speed(),
        })?;
        Ok((self.node, interval))
    }

    pub fn cost_to_come(&self) -> f64 {
        self.optimal_parent()
            .map_or(0.0, |parent| parent.cost_to_come)
    }

    fn parent_slots(&self, direction: ParentDirection) -> &[Option<TrajParent>; 3] {
        match direction {
            ParentDirection::Back => &self.back_parents,
            ParentDirection::Left => &self.left_parents,
            ParentDirection::Right => &self.right_parents,
        }
    }

    fn child_slots(&self, direction: ChildDirection) -> &[Option<TrajEdge>; 3] {
        match direction {
            ChildDirection::Front => &self.front_children,
            ChildDirection::Left => &self.left_children,
            ChildDirection::Right => &self.right_children,
        }
    }

    pub fn parent(&self, direction: ParentDirection, interval: usize) -> Option<&TrajParent> {
        self.parent_slots(direction)[interval].as_ref()
    }

    pub fn child(&self, direction: ChildDirection, interval: usize) -> Option<&TrajEdge> {
        self.child_slots(direction)[interval].as_ref()
    }

    pub fn optimal_parent(&self) -> Option<&TrajParent> {
        let (direction, interval) = self.optimal_parent?;
        self.parent(direction, interval)
    }

    pub fn has_parents(&self) -> bool {
        self.optimal_parent.is_some()
    }

    pub fn has_children(&self) -> bool {
        self.children().next().is_some()
    }

    /// All outbound edges, front then left then right, intervals ascending.
    pub fn children(&self) -> impl Iterator<Item = &TrajEdge> {
        [
            ChildDirection::Front,
            ChildDirection::Left,
            ChildDirection::Right,
        ]
        .into_iter()
        .flat_map(|direction| self.child_slots(direction).iter())
        .flatten()
    }

    /// Record a parent reached from `interval` on `direction`, replacing any
    /// previous edge in the same slot.
    pub fn update_parent(
        &mut self,
        direction: ParentDirection,
        interval: usize,
        snapshot: Snapshot,
        cost_to_come: f64,
        vertex: VertexKey,
    ) {
        let parent = TrajParent {
            snapshot,
            cost_to_come,
            vertex,
        };
        match direction {
            ParentDirection::Back => self.back_parents[interval] = Some(parent),
            ParentDirection::Left => self.left_parents[interval] = Some(parent),
            ParentDirection::Right => self.right_parents[interval] = Some(parent),
        }
        self.update_optimal_parent();
    }

    /// Record an outbound edge whose child landed in `interval`, replacing
    /// any previous edge in the same slot.
    pub fn update_child(
        &mut self,
        direction: ChildDirection,
        interval: usize,
        path: ContinuousPath,
        acceleration: f64,
        stage_cost: f64,
        vertex: VertexKey,
    ) {
        let edge = TrajEdge {
            path,
            acceleration,
            stage_cost,
            vertex,
        };
        match direction {
            ChildDirection::Front => self.front_children[interval] = Some(edge),
            ChildDirection::Left => self.left_children[interval] = Some(edge),
            ChildDirection::Right => self.right_children[interval] = Some(edge),
        }
    }

    /// Re-select the minimum-cost parent over every (direction, interval)
    /// slot. Direction ties follow the station rule; within a direction the
    /// lower interval wins ties. The vertex snapshot follows its optimal
    /// parent.
    fn update_optimal_parent(&mut self) {
        let best_per_direction = |slots: &[Option<TrajParent>; 3]| -> Option<(usize, f64)> {
            let mut best: Option<(usize, f64)> = None;
            for (interval, parent) in slots.iter().enumerate() {
                let Some(parent) = parent else {
                    continue;
                };
                if best.map_or(true, |(_, cost)| parent.cost_to_come < cost) {
                    best = Some((interval, parent.cost_to_come));
                }
            }
            best
        };

        let back = best_per_direction(&self.back_parents);
        let left = best_per_direction(&self.left_parents);
        let right = best_per_direction(&self.right_parents);

        let direction = select_optimal_parent([
            back.map(|(_, cost)| cost),
            left.map(|(_, cost)| cost),
            right.map(|(_, cost)| cost),
        ]);

        if let Some(direction) = direction {
            let interval = match direction {
                ParentDirection::Back => back,
                ParentDirection::Left => left,
                ParentDirection::Right => right,
            }
            .map(|(interval, _)| interval);

            if let Some(interval) = interval {
                self.optimal_parent = Some((direction, interval));
                let snapshot = self.parent(direction, interval).map(|p| p.snapshot.clone());
                if let Some(snapshot) = snapshot {
                    self.snapshot = snapshot;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_speed_interval_partition() {
        assert_eq!(speed_interval_index(0.0), Some(0));
        assert_eq!(speed_interval_index(10.0), Some(0));
        // A boundary speed belongs to the upper interval.
        assert_eq!(speed_interval_index(13.4112), Some(1));
        assert_eq!(speed_interval_index(20.0), Some(1));
        assert_eq!(speed_interval_index(26.8224), Some(2));
        assert_eq!(speed_interval_index(40.0), Some(2));
        assert_eq!(speed_interval_index(40.2336), None);
        assert_eq!(speed_interval_index(-0.1), None);
    }

    #[test]
    fn test_intervals_are_contiguous() {
        for window in SPEED_INTERVALS.windows(2) {
            assert_abs_diff_eq!(window[0].1, window[1].0);
        }
    }
}
