//! Core simulation for evolving racetrack drivers.
//!
//! A [`Simulation`] owns the loaded tracks, the live cars, the trainer records,
//! and the clock. Each frame it sub-steps car physics, resolves the throttled
//! perception refreshes requested during the frame, and advances to a new
//! generation once every AI car has ended its run.

pub mod car;
pub mod clock;
pub mod config;
pub mod input;
pub mod perception;
pub mod sensor;
pub mod simulation;
pub mod store;
pub mod track;
pub mod trainer;

use slotmap::new_key_type;

pub use car::{Car, CarPhase, CarTelemetry, EndReason, MANUAL_CAR_NAME, ScoreBreakdown};
pub use clock::{Clock, ClockFrame, ClockSettings};
pub use config::{ConfigError, KeyBindings, MutationTuning, PopulationCounts, SensorConfig, SimulationConfig};
pub use input::{InputState, KeySet, NoInput};
pub use perception::{PerceptionError, PoseSnapshot};
pub use sensor::Sensor;
pub use simulation::{GenerationOutcome, Simulation, SimulationError, TickReport};
pub use store::{MemoryStore, NullStore, StoreError, TrainerStore};
pub use track::{Track, TrackDefinition, TrackError, TrackRegistry};
pub use trainer::{ChampionRecord, RecordUpdate, TRAINER_STATE_KEY, Topology, TrackRecord, TrainerState};

new_key_type! {
    /// Stable handle for cars backed by a generational slot map.
    pub struct CarId;
}

const FULL_TURN: f32 = std::f32::consts::TAU;
const HALF_TURN: f32 = std::f32::consts::PI;

/// Wrap an angle into `(-π, π]`; NaN maps to 0.
pub(crate) fn wrap_signed_angle(mut angle: f32) -> f32 {
    if !angle.is_finite() {
        return 0.0;
    }
    while angle <= -HALF_TURN {
        angle += FULL_TURN;
    }
    while angle > HALF_TURN {
        angle -= FULL_TURN;
    }
    angle
}
