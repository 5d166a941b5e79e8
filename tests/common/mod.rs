#![allow(dead_code)]

use std::rc::Rc;

use nalgebra::{vector, Isometry2, Point2};
use parry2d_f64::shape::Cuboid;

use lattice_planner::{
    LaneId, LoopRouter, RoadId, RoadMap, Router, Snapshot, Vehicle, VehicleId, Waypoint,
};

pub const LANE_WIDTH: f64 = 3.7;
pub const HALF_LENGTH: f64 = 2.4;
pub const HALF_WIDTH: f64 = 1.0;

/// Offsets are snapped to this grid so equal poses map to equal waypoint ids.
const OFFSET_GRID: f64 = 0.1;

#[derive(Clone, Copy)]
pub struct RoadSpec {
    pub id: RoadId,
    pub length: f64,
    pub lanes: i32,
}

/// Straight roads chained along +x. Lane `l` runs at `y = l * lane_width`;
/// larger lane ids are to the right of smaller ones, matching the left-handed
/// road frame of the planner.
pub struct StraightRoadMap {
    roads: Vec<RoadSpec>,
    lane_width: f64,
}

impl StraightRoadMap {
    pub fn new(roads: Vec<RoadSpec>, lane_width: f64) -> Self {
        Self { roads, lane_width }
    }

    fn road_start(&self, index: usize) -> f64 {
        self.roads[..index].iter().map(|road| road.length).sum()
    }

    fn total_length(&self) -> f64 {
        self.road_start(self.roads.len())
    }

    fn road_index(&self, road: RoadId) -> Option<usize> {
        self.roads.iter().position(|spec| spec.id == road)
    }

    fn waypoint(&self, index: usize, lane: LaneId, offset: f64) -> Waypoint {
        let spec = self.roads[index];
        let offset = (offset / OFFSET_GRID).round() * OFFSET_GRID;
        let grid = (offset / OFFSET_GRID).round() as u64;
        let x = self.road_start(index) + offset;
        let y = lane as f64 * self.lane_width;

        Waypoint {
            id: ((index as u64) << 40) | ((lane as u64) << 32) | grid,
            road: spec.id,
            lane,
            road_offset: offset,
            transform: Isometry2::new(vector!(x, y), 0.0),
            curvature: 0.0,
        }
    }
}

impl RoadMap for StraightRoadMap {
    fn waypoint_at(&self, location: Point2<f64>) -> Option<Waypoint> {
        let x = location.x.clamp(0.0, self.total_length() - 1e-9);
        let index = (0..self.roads.len())
            .rev()
            .find(|&i| x >= self.road_start(i))?;
        let spec = self.roads[index];

        let lane = ((location.y / self.lane_width).round() as LaneId).clamp(0, spec.lanes - 1);
        Some(self.waypoint(index, lane, x - self.road_start(index)))
    }

    fn road_length(&self, road: RoadId) -> Option<f64> {
        self.road_index(road).map(|index| self.roads[index].length)
    }

    fn next_waypoints(&self, wp: &Waypoint, distance: f64) -> Vec<Waypoint> {
        let Some(mut index) = self.road_index(wp.road) else {
            return Vec::new();
        };
        let mut offset = wp.road_offset + distance;
        while offset >= self.roads[index].length {
            offset -= self.roads[index].length;
            index += 1;
            if index >= self.roads.len() {
                return Vec::new();
            }
        }
        if wp.lane >= self.roads[index].lanes {
            return Vec::new();
        }
        vec![self.waypoint(index, wp.lane, offset)]
    }

    fn left_lane(&self, wp: &Waypoint) -> Option<Waypoint> {
        let index = self.road_index(wp.road)?;
        (wp.lane > 0).then(|| self.waypoint(index, wp.lane - 1, wp.road_offset))
    }

    fn right_lane(&self, wp: &Waypoint) -> Option<Waypoint> {
        let index = self.road_index(wp.road)?;
        (wp.lane + 1 < self.roads[index].lanes)
            .then(|| self.waypoint(index, wp.lane + 1, wp.road_offset))
    }
}

/// Three long two-lane roads, enough for every free-flow scenario.
pub fn two_lane_map() -> (Rc<dyn RoadMap>, Rc<dyn Router>) {
    let map: Rc<dyn RoadMap> = Rc::new(StraightRoadMap::new(
        vec![
            RoadSpec { id: 47, length: 400.0, lanes: 2 },
            RoadSpec { id: 558, length: 400.0, lanes: 2 },
            RoadSpec { id: 48, length: 400.0, lanes: 2 },
        ],
        LANE_WIDTH,
    ));
    let router: Rc<dyn Router> = Rc::new(LoopRouter::new(vec![47, 558, 48]));
    (map, router)
}

/// A two-lane road whose right lane ends after 60 m, merging into single-lane
/// roads.
pub fn merging_map() -> (Rc<dyn RoadMap>, Rc<dyn Router>) {
    let map: Rc<dyn RoadMap> = Rc::new(StraightRoadMap::new(
        vec![
            RoadSpec { id: 47, length: 60.0, lanes: 2 },
            RoadSpec { id: 558, length: 400.0, lanes: 1 },
            RoadSpec { id: 48, length: 400.0, lanes: 1 },
        ],
        LANE_WIDTH,
    ));
    let router: Rc<dyn Router> = Rc::new(LoopRouter::new(vec![47, 558, 48]));
    (map, router)
}

pub fn vehicle(id: VehicleId, x: f64, y: f64, yaw: f64, speed: f64, policy_speed: f64) -> Vehicle {
    Vehicle::new(
        id,
        Cuboid::new(vector!(HALF_LENGTH, HALF_WIDTH)),
        Isometry2::new(vector!(x, y), yaw),
        speed,
        policy_speed,
        0.0,
        0.0,
    )
}

pub fn snapshot(
    map: &Rc<dyn RoadMap>,
    router: &Rc<dyn Router>,
    ego: Vehicle,
    agents: Vec<Vehicle>,
) -> Snapshot {
    Snapshot::new(ego, agents, Rc::clone(map), Rc::clone(router))
        .expect("scenario snapshot must be constructible")
}
