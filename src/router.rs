use crate::error::{Error, Result};
use crate::map::{RoadId, RoadMap, Waypoint};

/// The route the ego follows, as an ordered road-id successor function.
pub trait Router {
    fn has_road(&self, road: RoadId) -> bool;

    /// Successor road along the route. Loop routes wrap at the last road.
    fn next_road(&self, road: RoadId) -> Option<RoadId>;

    /// Predecessor road along the route. Loop routes wrap at the first road.
    fn prev_road(&self, road: RoadId) -> Option<RoadId>;

    /// Nearest on-route waypoint `distance` metres ahead of `wp`. A candidate
    /// on the same road is preferred over one on the next road.
    fn front_waypoint(
        &self,
        map: &dyn RoadMap,
        wp: &Waypoint,
        distance: f64,
    ) -> Result<Option<Waypoint>>;

    /// Snap a possibly off-route waypoint back onto the route.
    fn waypoint_on_route(&self, map: &dyn RoadMap, wp: &Waypoint) -> Option<Waypoint>;
}

/// Router over a fixed, ordered road sequence that wraps at both ends.
#[derive(Clone, Debug)]
pub struct LoopRouter {
    road_sequence: Vec<RoadId>,
}

impl LoopRouter {
    pub fn new(road_sequence: Vec<RoadId>) -> Self {
        assert!(!road_sequence.is_empty(), "route must contain at least one road");
        Self { road_sequence }
    }

    pub fn road_sequence(&self) -> &[RoadId] {
        &self.road_sequence
    }

    fn position(&self, road: RoadId) -> Option<usize> {
        self.road_sequence.iter().position(|&r| r == road)
    }
}

impl Router for LoopRouter {
    fn has_road(&self, road: RoadId) -> bool {
        self.position(road).is_some()
    }

    fn next_road(&self, road: RoadId) -> Option<RoadId> {
        let idx = self.position(road)?;
        if idx + 1 < self.road_sequence.len() {
            Some(self.road_sequence[idx + 1])
        } else {
            Some(self.road_sequence[0])
        }
    }

    fn prev_road(&self, road: RoadId) -> Option<RoadId> {
        let idx = self.position(road)?;
        if idx > 0 {
            Some(self.road_sequence[idx - 1])
        } else {
            self.road_sequence.last().copied()
        }
    }

    fn front_waypoint(
        &self,
        map: &dyn RoadMap,
        wp: &Waypoint,
        distance: f64,
    ) -> Result<Option<Waypoint>> {
        if distance <= 0.0 {
            return Err(Error::InvalidDistance { distance });
        }

        let candidates = map.next_waypoints(wp, distance);
        let next_road = self.next_road(wp.road);

        let mut next_waypoint = None;
        for candidate in candidates {
            if candidate.road == wp.road {
                return Ok(Some(candidate));
            }
            if Some(candidate.road) == next_road {
                next_waypoint = Some(candidate);
            }
        }

        Ok(next_waypoint)
    }

    fn waypoint_on_route(&self, map: &dyn RoadMap, wp: &Waypoint) -> Option<Waypoint> {
        if self.has_road(wp.road) {
            return Some(wp.clone());
        }
        map.next_waypoints(wp, 0.01)
            .into_iter()
            .find(|candidate| self.has_road(candidate.road))
    }
}
