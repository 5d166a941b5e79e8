mod common;

use std::rc::Rc;

use approx::assert_abs_diff_eq;

use common::{snapshot, two_lane_map, vehicle};
use lattice_planner::{
    comfort_accel_cost, CarFollowing, ConstantAccel, ContinuousPath, EgoControl,
    IntelligentDriverModel, LaneChangeType, RoadMap, TrafficSimulator,
};

fn straight_path(map: &Rc<dyn RoadMap>, from_x: f64, to_x: f64, y: f64) -> ContinuousPath {
    let start = map
        .waypoint_at(nalgebra::Point2::new(from_x, y))
        .unwrap()
        .transform;
    let end = map
        .waypoint_at(nalgebra::Point2::new(to_x, y))
        .unwrap()
        .transform;
    ContinuousPath::new((start, 0.0), (end, 0.0), LaneChangeType::KeepLane).unwrap()
}

#[test]
fn test_free_flow_reaches_the_path_end_without_cost() {
    let (map, router) = two_lane_map();
    let world = snapshot(&map, &router, vehicle(1, 5.0, 0.0, 0.0, 10.0, 20.0), vec![]);
    let path = straight_path(&map, 5.0, 55.0, 0.0);

    let mut simulator = TrafficSimulator::new(
        world,
        IntelligentDriverModel::default(),
        EgoControl::from(CarFollowing),
    );
    let simulation = simulator.simulate(&path, 0.2, 5.0).unwrap();

    assert!(!simulation.collided);
    assert!(simulation.time < 5.0);
    // Accelerating toward the policy speed is never penalized.
    assert_abs_diff_eq!(simulation.stage_cost, 0.0, epsilon = 1e-12);

    let ego = simulator.snapshot().ego();
    assert_abs_diff_eq!(ego.location().x, 55.0, epsilon = 1e-6);
    assert!(ego.speed() > 10.0);
}

#[test]
fn test_following_a_slow_lead_accrues_braking_discomfort() {
    let (map, router) = two_lane_map();
    let world = snapshot(
        &map,
        &router,
        vehicle(1, 5.0, 0.0, 0.0, 20.0, 20.0),
        vec![vehicle(2, 45.0, 0.0, 0.0, 10.0, 10.0)],
    );
    let path = straight_path(&map, 5.0, 55.0, 0.0);

    let mut simulator = TrafficSimulator::new(
        world,
        IntelligentDriverModel::default(),
        EgoControl::from(CarFollowing),
    );
    let simulation = simulator.simulate(&path, 0.2, 5.0).unwrap();

    assert!(!simulation.collided);
    assert!(simulation.stage_cost > 0.0);
    // The ego slowed down toward the lead's speed instead of running it over.
    let ego = simulator.snapshot().ego();
    assert!(ego.speed() < 20.0);
    let lead = simulator.snapshot().agent(2).unwrap();
    assert!(lead.location().x - ego.location().x > 4.8);
}

#[test]
fn test_collision_terminates_the_rollout() {
    let (map, router) = two_lane_map();
    // A nearly parked lead right in the ego's way, with the ego commanded to
    // keep coasting at 20 m/s.
    let world = snapshot(
        &map,
        &router,
        vehicle(1, 5.0, 0.0, 0.0, 20.0, 20.0),
        vec![vehicle(2, 25.0, 0.0, 0.0, 0.0, 0.1)],
    );
    let path = straight_path(&map, 5.0, 55.0, 0.0);

    let mut simulator = TrafficSimulator::new(
        world.with_ego_acceleration(0.0),
        IntelligentDriverModel::default(),
        EgoControl::from(ConstantAccel {
            accel_cost: comfort_accel_cost,
        }),
    );
    let simulation = simulator.simulate(&path, 0.2, 5.0).unwrap();

    assert!(simulation.collided);
    assert!(simulation.time < 2.0);
}

#[test]
fn test_constant_accel_charges_comfort_cost() {
    let (map, router) = two_lane_map();
    let world = snapshot(&map, &router, vehicle(1, 5.0, 0.0, 0.0, 10.0, 20.0), vec![]);
    let path = straight_path(&map, 5.0, 55.0, 0.0);

    let mut simulator = TrafficSimulator::new(
        world.with_ego_acceleration(1.0),
        IntelligentDriverModel::default(),
        EgoControl::from(ConstantAccel {
            accel_cost: comfort_accel_cost,
        }),
    );
    let simulation = simulator.simulate(&path, 0.2, 5.0).unwrap();

    assert!(!simulation.collided);
    assert!(simulation.stage_cost > 0.0);
    // Constant acceleration is integrated over the rollout.
    let ego = simulator.snapshot().ego();
    assert!(ego.speed() > 10.0);
    assert_abs_diff_eq!(ego.acceleration(), 1.0, epsilon = 1e-12);
}

#[test]
fn test_agents_follow_their_own_lead() {
    let (map, router) = two_lane_map();
    // Two agents in the right lane: the trailing one must not rear-end the
    // slow one while the ego cruises in the left lane.
    let world = snapshot(
        &map,
        &router,
        vehicle(1, 5.0, 0.0, 0.0, 15.0, 20.0),
        vec![
            vehicle(2, 20.0, common::LANE_WIDTH, 0.0, 20.0, 20.0),
            vehicle(3, 50.0, common::LANE_WIDTH, 0.0, 5.0, 5.0),
        ],
    );
    let path = straight_path(&map, 5.0, 55.0, 0.0);

    let mut simulator = TrafficSimulator::new(
        world,
        IntelligentDriverModel::default(),
        EgoControl::from(CarFollowing),
    );
    let simulation = simulator.simulate(&path, 0.2, 5.0).unwrap();

    assert!(!simulation.collided);
    let trailing = simulator.snapshot().agent(2).unwrap();
    let slow = simulator.snapshot().agent(3).unwrap();
    assert!(slow.location().x - trailing.location().x > 4.8);
    assert!(trailing.speed() < 20.0);
}
