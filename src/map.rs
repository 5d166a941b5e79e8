use nalgebra::{Isometry2, Point2};

pub type RoadId = u64;
pub type LaneId = i32;
pub type WaypointId = u64;

/// A pose on a specific lane at a specific arc length, produced by the map
/// service. Waypoints are plain values; two waypoints with the same id refer
/// to the same pose.
#[derive(Clone, Debug)]
pub struct Waypoint {
    pub id: WaypointId,
    pub road: RoadId,
    pub lane: LaneId,
    /// Arc length from the start of the waypoint's road.
    pub road_offset: f64,
    pub transform: Isometry2<f64>,
    pub curvature: f64,
}

impl Waypoint {
    pub fn location(&self) -> Point2<f64> {
        Point2::from(self.transform.translation.vector)
    }
}

/// The map service. Headings follow the road frame of the source data:
/// the right lane neighbour lies along the +90-degree rotated heading.
pub trait RoadMap {
    /// Nearest waypoint on any drivable lane, if the location is on the map.
    fn waypoint_at(&self, location: Point2<f64>) -> Option<Waypoint>;

    /// Total length of a road, if the road exists.
    fn road_length(&self, road: RoadId) -> Option<f64>;

    /// Candidate waypoints approximately `distance` metres ahead of `wp`,
    /// one per reachable successor lane.
    fn next_waypoints(&self, wp: &Waypoint, distance: f64) -> Vec<Waypoint>;

    /// Lane neighbour to the left at the same arc length.
    fn left_lane(&self, wp: &Waypoint) -> Option<Waypoint>;

    /// Lane neighbour to the right at the same arc length.
    fn right_lane(&self, wp: &Waypoint) -> Option<Waypoint>;
}
