use crate::error::{Error, Result};
use crate::parameters::IdmParameters;

/// Hardest braking any vehicle is allowed to command.
pub const MAX_BRAKING_ACCEL: f64 = 8.0;

/// Car-following longitudinal model.
///
/// https://en.wikipedia.org/wiki/Intelligent_driver_model
#[derive(Clone, Copy, Debug)]
pub struct IntelligentDriverModel {
    time_headway: f64,
    accel_limit: f64,
    comfort_decel: f64,
    minimum_gap: f64,
}

impl IntelligentDriverModel {
    pub fn new(params: &IdmParameters) -> Self {
        Self {
            time_headway: params.time_headway,
            accel_limit: params.accel_limit,
            comfort_decel: params.comfort_decel,
            minimum_gap: params.minimum_gap,
        }
    }

    /// Acceleration with no lead vehicle.
    pub fn free_accel(&self, speed: f64, policy_speed: f64) -> Result<f64> {
        if policy_speed <= 0.0 {
            return Err(Error::PolicySpeed { speed: policy_speed });
        }
        Ok(self.accel_limit * (1.0 - (speed / policy_speed).powi(4)))
    }

    /// Acceleration against a lead vehicle `gap` metres ahead.
    pub fn accel(&self, speed: f64, policy_speed: f64, lead_speed: f64, gap: f64) -> Result<f64> {
        let accel_free_road = self.free_accel(speed, policy_speed)?;

        if gap <= 0.0 {
            // Overlapping or touching. Nothing sensible to compute; brake.
            return Ok(-MAX_BRAKING_ACCEL);
        }

        let approaching_rate = speed - lead_speed;
        let spacing_term = self.minimum_gap
            + self.time_headway * speed
            + speed * approaching_rate / (2.0 * (self.accel_limit * self.comfort_decel).sqrt());
        let accel_interaction = -self.accel_limit * (spacing_term / gap).powi(2);

        Ok((accel_free_road + accel_interaction).max(-MAX_BRAKING_ACCEL))
    }
}

impl Default for IntelligentDriverModel {
    fn default() -> Self {
        Self::new(&IdmParameters::default())
    }
}
