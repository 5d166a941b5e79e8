mod common;

use std::rc::Rc;

use approx::assert_abs_diff_eq;

use common::{two_lane_map, vehicle, RoadSpec, StraightRoadMap, LANE_WIDTH};
use lattice_planner::{
    AddVehicleOutcome, Error, LoopRouter, RoadMap, Router, TrafficLattice, Vehicle,
};

fn build(vehicles: &[Vehicle]) -> TrafficLattice {
    let (map, router) = two_lane_map();
    let (lattice, disappeared) = TrafficLattice::new(vehicles, map, router).expect("construction");
    assert!(disappeared.is_empty());
    lattice
}

#[test]
fn test_single_vehicle_occupies_a_contiguous_run() {
    let lattice = build(&[vehicle(1, 20.0, 0.0, 0.0, 10.0, 20.0)]);

    let nodes = lattice.vehicle_nodes(1).unwrap();
    assert!(!nodes.is_empty());

    // Rear to head is a front-chain with strictly increasing distances, and
    // every node on it carries the occupant.
    for pair in nodes.windows(2) {
        let first = lattice.lattice().node(pair[0]).unwrap();
        let second = lattice.lattice().node(pair[1]).unwrap();
        assert_eq!(first.front(), Some(pair[1]));
        assert!(second.distance() > first.distance());
    }
    for &node in nodes {
        assert_eq!(*lattice.lattice().node(node).unwrap().payload(), Some(1));
    }

    // No node outside the run references the vehicle.
    let occupied: usize = lattice
        .lattice()
        .node_ids()
        .filter(|&id| *lattice.lattice().node(id).unwrap().payload() == Some(1))
        .count();
    assert_eq!(occupied, nodes.len());

    assert_eq!(lattice.is_changing_lane(1).unwrap(), 0);
}

#[test]
fn test_relational_queries_in_lane() {
    let lattice = build(&[
        vehicle(1, 20.0, 0.0, 0.0, 10.0, 20.0),
        vehicle(2, 50.0, 0.0, 0.0, 10.0, 20.0),
    ]);

    let (front_id, front_gap) = lattice.front(1).unwrap().expect("front vehicle");
    assert_eq!(front_id, 2);
    // Rear bumper of the lead (47.6) minus the head of the follower (22.4).
    assert_abs_diff_eq!(front_gap, 25.2, epsilon = 1.1);
    assert!(front_gap > 0.0);

    let (back_id, back_gap) = lattice.back(2).unwrap().expect("back vehicle");
    assert_eq!(back_id, 1);
    assert_abs_diff_eq!(back_gap, front_gap, epsilon = 1.1);

    assert!(lattice.front(2).unwrap().is_none());
    assert!(lattice.back(1).unwrap().is_none());

    assert!(matches!(
        lattice.front(9),
        Err(Error::VehicleNotOnLattice { vehicle: 9 })
    ));
}

#[test]
fn test_relational_queries_across_lanes() {
    let lattice = build(&[
        vehicle(1, 20.0, 0.0, 0.0, 10.0, 20.0),
        vehicle(2, 40.0, LANE_WIDTH, 0.0, 10.0, 20.0),
        vehicle(3, 8.0, LANE_WIDTH, 0.0, 10.0, 20.0),
    ]);

    // Lane 1 runs to the right of lane 0.
    let (right_front, gap) = lattice.right_front(1).unwrap().expect("right front");
    assert_eq!(right_front, 2);
    assert!(gap > 0.0);

    let (right_back, gap) = lattice.right_back(1).unwrap().expect("right back");
    assert_eq!(right_back, 3);
    assert!(gap > 0.0);

    assert!(lattice.left_front(1).unwrap().is_none());
    assert!(lattice.left_back(1).unwrap().is_none());

    let (left_front, _) = lattice.left_front(3).unwrap().expect("left front of 3");
    assert_eq!(left_front, 1);
}

#[test]
fn test_overlapping_neighbours_report_negative_distance() {
    // Vehicle 2 sits level with vehicle 1 in the right lane.
    let lattice = build(&[
        vehicle(1, 20.0, 0.0, 0.0, 10.0, 20.0),
        vehicle(2, 20.0, LANE_WIDTH, 0.0, 10.0, 20.0),
    ]);

    let (id, gap) = lattice.right_front(1).unwrap().expect("level neighbour");
    assert_eq!(id, 2);
    assert!(gap <= 0.0);

    let (id, gap) = lattice.right_back(1).unwrap().expect("level neighbour");
    assert_eq!(id, 2);
    assert!(gap <= 0.0);
}

#[test]
fn test_construction_collision_names_both_vehicles() {
    let (map, router) = two_lane_map();
    let result = TrafficLattice::new(
        &[
            vehicle(1, 20.0, 0.0, 0.0, 10.0, 20.0),
            vehicle(2, 20.0, 0.0, 0.0, 10.0, 20.0),
        ],
        map,
        router,
    );

    match result {
        Err(Error::ConstructionCollision { vehicles }) => {
            assert_eq!(vehicles, vec![1, 2]);
        }
        other => panic!("expected a construction collision, got {:?}", other.is_ok()),
    }
}

#[test]
fn test_separated_vehicles_register_close_together() {
    // A bumper gap just past the lattice resolution is enough to register.
    let lattice = build(&[
        vehicle(1, 20.0, 0.0, 0.0, 10.0, 20.0),
        vehicle(2, 26.1, 0.0, 0.0, 10.0, 20.0),
    ]);

    assert_eq!(lattice.vehicles(), vec![1, 2]);
    let (_, gap) = lattice.front(1).unwrap().expect("front vehicle");
    assert!(gap > 0.0);
}

#[test]
fn test_add_then_delete_restores_the_lattice() {
    let mut lattice = build(&[
        vehicle(1, 20.0, 0.0, 0.0, 10.0, 20.0),
        vehicle(2, 60.0, 0.0, 0.0, 10.0, 20.0),
    ]);

    let newcomer = vehicle(3, 40.0, 0.0, 0.0, 10.0, 20.0);
    assert_eq!(lattice.add_vehicle(&newcomer), AddVehicleOutcome::Added);
    assert_eq!(lattice.vehicles(), vec![1, 2, 3]);
    assert_eq!(lattice.front(1).unwrap().unwrap().0, 3);

    // Adding the same vehicle again is a no-op, adding an overlapping one
    // is a collision.
    assert_eq!(lattice.add_vehicle(&newcomer), AddVehicleOutcome::NotAdded);
    let overlapping = vehicle(4, 40.5, 0.0, 0.0, 10.0, 20.0);
    assert_eq!(
        lattice.add_vehicle(&overlapping),
        AddVehicleOutcome::Collision
    );

    assert!(lattice.delete_vehicle(3));
    assert!(!lattice.delete_vehicle(3));
    assert_eq!(lattice.vehicles(), vec![1, 2]);
    assert_eq!(lattice.front(1).unwrap().unwrap().0, 2);

    // Every node freed by the deletion is unoccupied again.
    let occupied = lattice
        .lattice()
        .node_ids()
        .filter(|&id| *lattice.lattice().node(id).unwrap().payload() == Some(3))
        .count();
    assert_eq!(occupied, 0);
}

#[test]
fn test_move_traffic_forward() {
    let mut lattice = build(&[
        vehicle(1, 20.0, 0.0, 0.0, 10.0, 20.0),
        vehicle(2, 50.0, 0.0, 0.0, 10.0, 20.0),
    ]);

    let updated = [
        vehicle(1, 25.0, 0.0, 0.0, 10.0, 20.0),
        vehicle(2, 55.0, 0.0, 0.0, 10.0, 20.0),
    ];
    let (no_collision, disappeared) = lattice.move_traffic_forward(&updated).unwrap();
    assert!(no_collision);
    assert!(disappeared.is_empty());

    let (front_id, gap) = lattice.front(1).unwrap().expect("front vehicle");
    assert_eq!(front_id, 2);
    assert_abs_diff_eq!(gap, 25.2, epsilon = 1.1);

    // The rear and head distances bracket the mid node for every vehicle.
    for id in [1, 2] {
        let nodes = lattice.vehicle_nodes(id).unwrap();
        let first = lattice.lattice().node(nodes[0]).unwrap().distance();
        let last = lattice.lattice().node(*nodes.last().unwrap()).unwrap().distance();
        assert!(first <= last);
    }
}

#[test]
fn test_move_traffic_forward_set_mismatch() {
    let mut lattice = build(&[
        vehicle(1, 20.0, 0.0, 0.0, 10.0, 20.0),
        vehicle(2, 50.0, 0.0, 0.0, 10.0, 20.0),
    ]);

    let wrong_set = [
        vehicle(1, 25.0, 0.0, 0.0, 10.0, 20.0),
        vehicle(7, 55.0, 0.0, 0.0, 10.0, 20.0),
    ];
    assert!(matches!(
        lattice.move_traffic_forward(&wrong_set),
        Err(Error::SetMismatch { .. })
    ));
}

#[test]
fn test_straddling_registration_reports_lane_change() {
    // A narrow-lane road where a yawed vehicle's head crosses into the right
    // lane while its mid and rear stay in the original lane.
    let map: Rc<dyn RoadMap> = Rc::new(StraightRoadMap::new(
        vec![RoadSpec { id: 47, length: 400.0, lanes: 2 }],
        1.5,
    ));
    let router: Rc<dyn Router> = Rc::new(LoopRouter::new(vec![47]));

    let straddler = vehicle(1, 10.0, 0.0, 20f64.to_radians(), 5.0, 10.0);
    let (lattice, disappeared) =
        TrafficLattice::new(&[straddler], map, router).expect("registration succeeds");

    assert!(disappeared.is_empty());
    assert_eq!(lattice.is_changing_lane(1).unwrap(), 1);
}

#[test]
fn test_random_traffic_keeps_occupancy_invariants() {
    use rand::prelude::{Rng, SeedableRng, StdRng};

    let mut rng = StdRng::seed_from_u64(11);

    for _ in 0..20 {
        // Random, comfortably separated vehicles across both lanes.
        let mut vehicles = Vec::new();
        let mut x = rng.gen_range(10.0..20.0);
        for id in 1..=6 {
            let lane = rng.gen_range(0..2) as f64;
            vehicles.push(vehicle(id, x, lane * LANE_WIDTH, 0.0, 10.0, 20.0));
            x += rng.gen_range(8.0..25.0);
        }

        let mut lattice = build(&vehicles);
        assert_eq!(lattice.vehicles(), vec![1, 2, 3, 4, 5, 6]);

        for round in 0..3 {
            // Near-uniform advances keep the random gaps from collapsing.
            for v in &mut vehicles {
                let advance = rng.gen_range(2.0..2.5);
                let location = v.location();
                *v = vehicle(
                    v.id(),
                    location.x + advance,
                    location.y,
                    0.0,
                    v.speed(),
                    v.policy_speed(),
                );
            }
            let (no_collision, disappeared) = lattice.move_traffic_forward(&vehicles).unwrap();
            assert!(no_collision, "collision in round {round}");
            assert!(disappeared.is_empty());

            // Every vehicle still holds a contiguous, exclusive run.
            for v in &vehicles {
                let nodes = lattice.vehicle_nodes(v.id()).unwrap();
                for pair in nodes.windows(2) {
                    assert_eq!(lattice.lattice().node(pair[0]).unwrap().front(), Some(pair[1]));
                }
                for &node in nodes {
                    assert_eq!(
                        *lattice.lattice().node(node).unwrap().payload(),
                        Some(v.id())
                    );
                }
            }
        }
    }
}

#[test]
fn test_spawn_suggestions() {
    let lattice = build(&[
        vehicle(1, 20.0, 0.0, 0.0, 10.0, 20.0),
        vehicle(2, 50.0, 0.0, 0.0, 10.0, 20.0),
    ]);

    // Plenty of free room at the lattice front, none behind vehicle 1.
    let (clearance, waypoint) = lattice.front_spawn_waypoint(2.0).expect("front spawn");
    assert!(clearance > 0.0);
    assert!(waypoint.road_offset > 0.0);

    assert!(lattice.front_spawn_waypoint(1e6).is_none());
}
