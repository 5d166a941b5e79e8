use nalgebra::{Isometry2, Point2, Vector2};

use crate::map::Waypoint;

/// Unit vector along the heading of a pose.
pub fn heading(transform: &Isometry2<f64>) -> Vector2<f64> {
    transform.rotation * Vector2::x()
}

/// Unit vector pointing toward the right lane neighbour of a pose. The road
/// frame is left-handed: at zero yaw the right side is +y.
pub fn right_direction(transform: &Isometry2<f64>) -> Vector2<f64> {
    let h = heading(transform);
    Vector2::new(-h.y, h.x)
}

/// Signed lateral offset of `location` from the lane centre at `waypoint`,
/// positive toward the right lane.
pub fn lateral_offset(location: &Point2<f64>, waypoint: &Waypoint) -> f64 {
    let delta = location - waypoint.location();
    delta.dot(&right_direction(&waypoint.transform))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use nalgebra::vector;

    fn waypoint_at_origin() -> Waypoint {
        Waypoint {
            id: 0,
            road: 0,
            lane: 0,
            road_offset: 0.0,
            transform: Isometry2::identity(),
            curvature: 0.0,
        }
    }

    #[test]
    fn test_lateral_offset_sign() {
        let wp = waypoint_at_origin();
        assert_abs_diff_eq!(lateral_offset(&Point2::new(3.0, 1.2), &wp), 1.2, epsilon = 1e-12);
        assert_abs_diff_eq!(lateral_offset(&Point2::new(-1.0, -0.4), &wp), -0.4, epsilon = 1e-12);
    }

    #[test]
    fn test_right_direction_follows_heading() {
        let transform = Isometry2::new(vector!(0.0, 0.0), std::f64::consts::FRAC_PI_2);
        let right = right_direction(&transform);
        assert_abs_diff_eq!(right.x, -1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(right.y, 0.0, epsilon = 1e-12);
    }
}
