use rand::{SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised when validating a [`SimulationConfig`].
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// Indicates an invalid configuration value.
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}

/// One distance sensor, expressed relative to the car heading.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SensorConfig {
    /// Angle from the car heading in degrees (positive turns clockwise on screen).
    pub angle_degrees: f32,
    /// Maximum ray length in pixels.
    pub range: f32,
}

/// How many offspring each breeding source contributes per generation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PopulationCounts {
    /// Clones of the all-time champion network.
    pub global_best: usize,
    /// Clones of this generation's top scorer.
    pub track_best: usize,
    /// Clones of a uniformly random member of this generation.
    pub track_random: usize,
}

impl PopulationCounts {
    #[must_use]
    pub const fn total(&self) -> usize {
        self.global_best + self.track_best + self.track_random
    }
}

impl Default for PopulationCounts {
    fn default() -> Self {
        Self {
            global_best: 4,
            track_best: 8,
            track_random: 8,
        }
    }
}

/// Mutation step sizing: `stdev = clamp(sqrt(k / parent_score), min_stdev, max_stdev)`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MutationTuning {
    pub k: f32,
    pub min_stdev: f32,
    pub max_stdev: f32,
}

impl MutationTuning {
    /// Step size for a parent with the given score; better parents take smaller steps.
    #[must_use]
    pub fn stdev_for(&self, parent_score: f32) -> f32 {
        let raw = (self.k / parent_score.max(0.0)).sqrt();
        if raw.is_nan() {
            return self.max_stdev;
        }
        raw.clamp(self.min_stdev, self.max_stdev)
    }
}

impl Default for MutationTuning {
    fn default() -> Self {
        Self {
            k: 2.0,
            min_stdev: 0.01,
            max_stdev: 0.5,
        }
    }
}

/// Logical key names consulted for the manually driven car.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyBindings {
    pub accelerate: Vec<String>,
    pub brake: Vec<String>,
    pub left: Vec<String>,
    pub right: Vec<String>,
}

impl Default for KeyBindings {
    fn default() -> Self {
        let keys = |names: &[&str]| names.iter().map(|s| (*s).to_string()).collect();
        Self {
            accelerate: keys(&["ArrowUp", "w"]),
            brake: keys(&["ArrowDown", "s"]),
            left: keys(&["ArrowLeft", "a"]),
            right: keys(&["ArrowRight", "d"]),
        }
    }
}

/// Static configuration for a racetrack simulation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Car body length along its heading, in pixels.
    pub car_width: f32,
    /// Car body width across its heading, in pixels.
    pub car_height: f32,
    /// Top speed in pixels per second.
    pub max_speed: f32,
    /// Acceleration at full throttle in pixels per second squared.
    pub max_acceleration: f32,
    /// Turn rate at full steering lock in radians per second.
    pub max_steering_rate: f32,
    /// Proportional decay applied to speed and control inputs per second.
    pub friction: f32,
    /// Distance sensors attached to every car.
    pub sensors: Vec<SensorConfig>,
    /// Hidden layer sizes for freshly created policies.
    pub hidden_layers: Vec<usize>,
    /// Minimum simulated seconds between perception refreshes of one car.
    pub perception_interval: f64,
    /// Largest frame delta consumed by one `tick` call; the rest is dropped.
    pub max_update_window: f64,
    /// Largest sub-step handed to the physics integrator.
    pub max_tick: f64,
    /// Simulated seconds between render callbacks.
    pub render_interval: f64,
    /// Simulated seconds between trainer state saves; 0 disables periodic saves.
    pub save_interval: f64,
    /// Laps required to finish a run.
    pub laps_to_finish: u32,
    /// Ticks an AI car may spend before the stuck/too-slow checks apply.
    pub stuck_grace_ticks: u32,
    /// Whether a manually driven car joins every generation.
    pub manual_control: bool,
    pub key_bindings: KeyBindings,
    pub population: PopulationCounts,
    pub mutation: MutationTuning,
    /// Advance to the next generation automatically once every AI car has ended.
    pub auto_advance: bool,
    /// Optional RNG seed for reproducible training runs.
    pub rng_seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            car_width: 20.0,
            car_height: 10.0,
            max_speed: 250.0,
            max_acceleration: 200.0,
            max_steering_rate: std::f32::consts::PI,
            friction: 1.0,
            sensors: vec![
                SensorConfig { angle_degrees: -60.0, range: 150.0 },
                SensorConfig { angle_degrees: -30.0, range: 200.0 },
                SensorConfig { angle_degrees: 0.0, range: 250.0 },
                SensorConfig { angle_degrees: 30.0, range: 200.0 },
                SensorConfig { angle_degrees: 60.0, range: 150.0 },
            ],
            hidden_layers: vec![8],
            perception_interval: 0.1,
            max_update_window: 0.25,
            max_tick: 1.0 / 60.0,
            render_interval: 1.0 / 30.0,
            save_interval: 30.0,
            laps_to_finish: 3,
            stuck_grace_ticks: 30,
            manual_control: false,
            key_bindings: KeyBindings::default(),
            population: PopulationCounts::default(),
            mutation: MutationTuning::default(),
            auto_advance: true,
            rng_seed: None,
        }
    }
}

impl SimulationConfig {
    /// Reject values that would make the simulation meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = |value: f32| value.is_finite() && value > 0.0;
        let positive64 = |value: f64| value.is_finite() && value > 0.0;
        if !positive(self.car_width) || !positive(self.car_height) {
            return Err(ConfigError::Invalid("car dimensions must be positive"));
        }
        if !positive(self.max_speed) {
            return Err(ConfigError::Invalid("max_speed must be positive"));
        }
        if !positive(self.max_acceleration) {
            return Err(ConfigError::Invalid("max_acceleration must be positive"));
        }
        if !positive(self.max_steering_rate) {
            return Err(ConfigError::Invalid("max_steering_rate must be positive"));
        }
        if !(self.friction.is_finite() && self.friction >= 0.0) {
            return Err(ConfigError::Invalid("friction must be non-negative"));
        }
        if self.sensors.is_empty() {
            return Err(ConfigError::Invalid("at least one sensor is required"));
        }
        if self
            .sensors
            .iter()
            .any(|s| !positive(s.range) || !s.angle_degrees.is_finite())
        {
            return Err(ConfigError::Invalid("sensor ranges must be positive"));
        }
        if self.hidden_layers.contains(&0) {
            return Err(ConfigError::Invalid("hidden layers must be non-empty"));
        }
        if !positive64(self.perception_interval) {
            return Err(ConfigError::Invalid("perception_interval must be positive"));
        }
        if !positive64(self.max_update_window) || !positive64(self.max_tick) {
            return Err(ConfigError::Invalid("clock windows must be positive"));
        }
        if !positive64(self.render_interval) {
            return Err(ConfigError::Invalid("render_interval must be positive"));
        }
        if !(self.save_interval.is_finite() && self.save_interval >= 0.0) {
            return Err(ConfigError::Invalid("save_interval must be non-negative"));
        }
        if self.laps_to_finish == 0 {
            return Err(ConfigError::Invalid("laps_to_finish must be positive"));
        }
        if self.population.total() == 0 {
            return Err(ConfigError::Invalid("population must contain at least one car"));
        }
        let m = &self.mutation;
        if !(m.k.is_finite() && m.k >= 0.0) {
            return Err(ConfigError::Invalid("mutation k must be non-negative"));
        }
        if !(m.min_stdev.is_finite() && m.max_stdev.is_finite())
            || m.min_stdev < 0.0
            || m.min_stdev > m.max_stdev
        {
            return Err(ConfigError::Invalid("mutation stdev bounds are inverted"));
        }
        Ok(())
    }

    /// Largest dimension of the car body.
    #[must_use]
    pub fn car_extent(&self) -> f32 {
        self.car_width.max(self.car_height)
    }

    pub(crate) fn seeded_rng(&self) -> SmallRng {
        match self.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => {
                let seed: u64 = rand::random();
                SmallRng::seed_from_u64(seed)
            }
        }
    }
}
