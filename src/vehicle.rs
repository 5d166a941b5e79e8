use nalgebra::{Isometry2, Point2, Vector2};
use parry2d_f64::{bounding_volume::Aabb, shape::Cuboid, shape::Shape};

use crate::utils::heading;

pub type VehicleId = usize;

/// A tracked vehicle within one snapshot. Identity is the id; everything
/// else is a value captured at the snapshot instant.
///
/// The transform locates the geometric centre of the vehicle;
/// `bounding_box.half_extents.x` is the half-length along the heading.
#[derive(Clone, Debug)]
pub struct Vehicle {
    id: VehicleId,
    bounding_box: Cuboid,
    transform: Isometry2<f64>,
    speed: f64,
    policy_speed: f64,
    acceleration: f64,
    curvature: f64,

    // cached
    aabb: Aabb,
}

impl Vehicle {
    pub fn new(
        id: VehicleId,
        bounding_box: Cuboid,
        transform: Isometry2<f64>,
        speed: f64,
        policy_speed: f64,
        acceleration: f64,
        curvature: f64,
    ) -> Self {
        let aabb = bounding_box.compute_aabb(&transform);
        Self {
            id,
            bounding_box,
            transform,
            speed,
            policy_speed,
            acceleration,
            curvature,
            aabb,
        }
    }

    pub fn id(&self) -> VehicleId {
        self.id
    }

    pub fn bounding_box(&self) -> &Cuboid {
        &self.bounding_box
    }

    pub fn transform(&self) -> &Isometry2<f64> {
        &self.transform
    }

    pub fn location(&self) -> Point2<f64> {
        Point2::from(self.transform.translation.vector)
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn policy_speed(&self) -> f64 {
        self.policy_speed
    }

    pub fn acceleration(&self) -> f64 {
        self.acceleration
    }

    pub fn curvature(&self) -> f64 {
        self.curvature
    }

    pub fn aabb(&self) -> &Aabb {
        &self.aabb
    }

    pub fn half_length(&self) -> f64 {
        self.bounding_box.half_extents.x
    }

    pub fn set_transform(&mut self, transform: Isometry2<f64>) {
        self.transform = transform;
        self.aabb = self.bounding_box.compute_aabb(&self.transform);
    }

    pub fn set_speed(&mut self, speed: f64) {
        self.speed = speed;
    }

    pub fn set_acceleration(&mut self, acceleration: f64) {
        self.acceleration = acceleration;
    }

    pub fn set_curvature(&mut self, curvature: f64) {
        self.curvature = curvature;
    }

    fn heading(&self) -> Vector2<f64> {
        heading(&self.transform)
    }

    /// Location of the front bumper, projected through the yaw.
    pub fn head_location(&self) -> Point2<f64> {
        self.location() + self.heading() * self.half_length()
    }

    /// Location of the rear bumper, projected through the yaw.
    pub fn rear_location(&self) -> Point2<f64> {
        self.location() - self.heading() * self.half_length()
    }

    /// Location of the pose centre.
    pub fn mid_location(&self) -> Point2<f64> {
        self.location()
    }
}
