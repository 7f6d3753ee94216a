//! Driving policies for racetrack cars.
//!
//! A policy is a small fully-connected [`Network`] mapping sensor readings and
//! vehicle state to acceleration and steering commands. Training only ever
//! perturbs weights; the topology is fixed for the lifetime of a population.

mod network;

pub use network::{Network, NetworkError};

/// Index of the acceleration command in a policy's output vector.
pub const OUTPUT_ACCELERATION: usize = 0;
/// Index of the steering command in a policy's output vector.
pub const OUTPUT_STEERING: usize = 1;
/// Number of outputs every driving policy produces.
pub const OUTPUT_SIZE: usize = 2;
/// Vehicle-state inputs appended after the sensor readings
/// (acceleration, steering, speed ratio, heading ratio).
pub const STATE_INPUTS: usize = 4;

/// Input width for a policy fed by `sensor_count` distance sensors.
#[must_use]
pub const fn input_size(sensor_count: usize) -> usize {
    sensor_count + STATE_INPUTS
}
