use crate::error::{Error, Result};

/// Terminal cost on the ego speed relative to its policy speed, bucketed by
/// tenths of the speed ratio. No cost once the policy speed is matched.
pub fn terminal_speed_cost(speed: f64, policy_speed: f64) -> Result<f64> {
    static COST_MAP: [f64; 10] = [4.0, 4.0, 4.0, 3.0, 3.0, 2.0, 2.0, 1.0, 1.0, 0.0];

    if speed < 0.0 {
        return Err(Error::InvalidSpeed { speed });
    }
    if policy_speed <= 0.0 {
        return Err(Error::PolicySpeed {
            speed: policy_speed,
        });
    }

    let speed_ratio = speed / policy_speed;
    if speed_ratio >= 1.0 {
        Ok(0.0)
    } else {
        Ok(COST_MAP[(speed_ratio * 10.0) as usize])
    }
}

/// Terminal cost on how far short of the spatial horizon a terminal station
/// sits, bucketed by tenths of the distance ratio.
pub fn terminal_distance_cost(distance: f64, spatial_horizon: f64) -> f64 {
    static COST_MAP: [f64; 10] = [20.0, 20.0, 20.0, 20.0, 20.0, 20.0, 20.0, 20.0, 10.0, 5.0];

    let distance_ratio = distance / spatial_horizon;
    if distance_ratio >= 1.0 {
        0.0
    } else {
        COST_MAP[(distance_ratio.max(0.0) * 10.0) as usize]
    }
}

const BRAKING_DISCOMFORT_WEIGHT: f64 = 0.05;

/// Discomfort rate of a braking command; free of charge while not braking.
pub fn braking_discomfort(accel: f64) -> f64 {
    let braking = accel.min(0.0);
    BRAKING_DISCOMFORT_WEIGHT * braking * braking
}

/// Comfort cost rate of holding a constant acceleration, injectable into the
/// constant-acceleration simulator for calibration.
pub type AccelCostFn = fn(accel: f64, speed: f64, policy_speed: f64) -> f64;

/// Default acceleration comfort cost: zero when coasting at or under the
/// policy speed, growing with the acceleration magnitude and with overspeed.
pub fn comfort_accel_cost(accel: f64, speed: f64, policy_speed: f64) -> f64 {
    0.25 * accel.abs() + 0.1 * (speed - policy_speed).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_terminal_speed_cost_buckets() {
        assert_abs_diff_eq!(terminal_speed_cost(0.0, 20.0).unwrap(), 4.0);
        assert_abs_diff_eq!(terminal_speed_cost(10.0, 20.0).unwrap(), 2.0);
        assert_abs_diff_eq!(terminal_speed_cost(15.0, 20.0).unwrap(), 1.0);
        assert_abs_diff_eq!(terminal_speed_cost(18.0, 20.0).unwrap(), 0.0);
        assert_abs_diff_eq!(terminal_speed_cost(20.0, 20.0).unwrap(), 0.0);
        assert_abs_diff_eq!(terminal_speed_cost(25.0, 20.0).unwrap(), 0.0);
    }

    #[test]
    fn test_terminal_speed_cost_rejects_bad_inputs() {
        assert!(terminal_speed_cost(-1.0, 20.0).is_err());
        assert!(terminal_speed_cost(10.0, 0.0).is_err());
    }

    #[test]
    fn test_terminal_distance_cost_buckets() {
        assert_abs_diff_eq!(terminal_distance_cost(10.0, 100.0), 20.0);
        assert_abs_diff_eq!(terminal_distance_cost(75.0, 100.0), 20.0);
        assert_abs_diff_eq!(terminal_distance_cost(85.0, 100.0), 10.0);
        assert_abs_diff_eq!(terminal_distance_cost(95.0, 100.0), 5.0);
        assert_abs_diff_eq!(terminal_distance_cost(100.0, 100.0), 0.0);
        assert_abs_diff_eq!(terminal_distance_cost(120.0, 100.0), 0.0);
    }

    #[test]
    fn test_braking_discomfort_only_charges_braking() {
        assert_abs_diff_eq!(braking_discomfort(1.5), 0.0);
        assert_abs_diff_eq!(braking_discomfort(0.0), 0.0);
        assert!(braking_discomfort(-2.0) > 0.0);
        assert!(braking_discomfort(-4.0) > braking_discomfort(-2.0));
    }

    #[test]
    fn test_comfort_accel_cost_properties() {
        // Zero exactly when coasting at or below the policy speed.
        assert_abs_diff_eq!(comfort_accel_cost(0.0, 15.0, 20.0), 0.0);
        assert!(comfort_accel_cost(0.0, 25.0, 20.0) > 0.0);
        // Non-negative and monotone in the acceleration magnitude.
        assert!(comfort_accel_cost(-8.0, 15.0, 20.0) > comfort_accel_cost(-4.0, 15.0, 20.0));
        assert!(comfort_accel_cost(1.0, 15.0, 20.0) > 0.0);
    }
}
