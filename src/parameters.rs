use serde::Deserialize;

#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
pub struct IdmParameters {
    /// Desired time gap to the lead vehicle in seconds.
    pub time_headway: f64,
    /// Maximum acceleration on a free road.
    pub accel_limit: f64,
    /// Comfortable deceleration magnitude.
    pub comfort_decel: f64,
    /// Minimum bumper-to-bumper gap when stopped.
    pub minimum_gap: f64,
}

impl Default for IdmParameters {
    fn default() -> Self {
        Self {
            time_headway: 1.0,
            accel_limit: 2.0,
            comfort_decel: 6.0,
            minimum_gap: 2.0,
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
pub struct Parameters {
    /// Fixed step of the forward traffic simulation in seconds.
    pub sim_time_step: f64,
    /// Spatial planning horizon in metres.
    pub spatial_horizon: f64,
    /// Longitudinal resolution of the waypoint lattice in metres.
    pub longitudinal_resolution: f64,
    /// Arc-length interval of the returned discrete path samples.
    pub path_sample_resolution: f64,
    pub idm: IdmParameters,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            sim_time_step: 0.2,
            spatial_horizon: 150.0,
            longitudinal_resolution: 1.0,
            path_sample_resolution: 1.0,
            idm: IdmParameters::default(),
        }
    }
}

impl Parameters {
    /// Load parameters from a config file (any format the `config` crate
    /// recognizes by the given base name).
    pub fn from_file(name: &str) -> Result<Self, config::ConfigError> {
        let mut s = config::Config::new();
        s.merge(config::File::with_name(name))?;
        s.try_into()
    }
}
