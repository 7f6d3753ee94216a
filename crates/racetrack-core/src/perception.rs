//! Throttled, off-tick perception refreshes.
//!
//! A car requests a refresh by handing its [`PerceptionBuffer`] and a
//! [`PoseSnapshot`] to a [`PerceptionJob`]. Jobs are pure functions of the track
//! mask and the snapshot, so a frame's jobs can be resolved in parallel; the
//! results are applied back on the tick thread, where the `(epoch, sequence)`
//! pair decides whether the result is still current.

use racetrack_brain::{Network, NetworkError, OUTPUT_ACCELERATION, OUTPUT_STEERING};
use racetrack_raster::{
    CompositeMode, Layer, PixelWindow, Placement, RasterError, Shape, Tag, TagRaster, compose_into,
};
use thiserror::Error;

use crate::CarId;
use crate::sensor::{Sensor, extract_window, read_window_all, window_reach};

/// Faults raised while resolving a refresh. Recoverable: the car retries later.
#[derive(Debug, Error)]
pub enum PerceptionError {
    #[error("perception raster failure: {0}")]
    Raster(#[from] RasterError),
    #[error("policy evaluation failed: {0}")]
    Network(#[from] NetworkError),
    #[error("car footprint covers no pixels")]
    EmptyFootprint,
    #[error("policy produced {actual} outputs, expected at least {expected}")]
    MissingOutput { expected: usize, actual: usize },
}

/// Kinematic state captured when a refresh is requested.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PoseSnapshot {
    pub x: f32,
    pub y: f32,
    pub angle: f32,
    pub speed: f32,
    pub acceleration: f32,
    pub steering: f32,
    pub odometer: f32,
}

/// Scratch rasters owned by one car and lent to its in-flight job.
#[derive(Debug, Clone, Default)]
pub struct PerceptionBuffer {
    window: PixelWindow,
    composite: TagRaster,
}

impl PerceptionBuffer {
    /// Mask window with the car footprint composited on top, from the last refresh.
    #[must_use]
    pub fn composite(&self) -> &TagRaster {
        &self.composite
    }
}

/// Region tags found under the car footprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FootprintContact {
    pub lap_line: bool,
    pub off_track: bool,
    pub pixels: usize,
}

impl FootprintContact {
    /// Scan a composited raster for pixels flagged as vehicle.
    #[must_use]
    pub fn scan(composite: &TagRaster) -> Self {
        composite
            .as_bytes()
            .iter()
            .map(|&bits| Tag::from_bits(bits))
            .filter(|tag| tag.is_vehicle())
            .fold(Self::default(), |mut contact, tag| {
                contact.pixels += 1;
                contact.lap_line |= tag.is_lap_line();
                contact.off_track |= tag.is_off_track();
                contact
            })
    }
}

/// Control outputs read from the policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Controls {
    pub acceleration: f32,
    pub steering: f32,
}

/// Result of a successful refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct Perception {
    pub contact: FootprintContact,
    /// Pose the footprint and sensors were sampled at.
    pub pose: PoseSnapshot,
    pub readings: Vec<f32>,
    /// `None` for manually driven cars.
    pub controls: Option<Controls>,
}

/// A refresh request travelling from a car to the resolver and back.
#[derive(Debug)]
pub struct PerceptionJob {
    pub car: CarId,
    pub epoch: u64,
    pub sequence: u64,
    pub pose: PoseSnapshot,
    pub buffer: PerceptionBuffer,
}

/// Shared read-only inputs for resolving refreshes.
#[derive(Debug, Clone, Copy)]
pub struct PerceptionContext<'a> {
    pub sensors: &'a [Sensor],
    pub body: &'a Shape,
    pub body_extent: f32,
    pub max_speed: f32,
}

impl PerceptionContext<'_> {
    fn reach(&self) -> u32 {
        let body_reach = (self.body_extent * 0.5).ceil() as u32 + 1;
        window_reach(self.sensors).max(body_reach)
    }

    /// Composite the footprint, scan it, cast the sensors, and evaluate the policy.
    pub fn perceive(
        &self,
        mask: &TagRaster,
        network: Option<&Network>,
        pose: &PoseSnapshot,
        buffer: &mut PerceptionBuffer,
    ) -> Result<Perception, PerceptionError> {
        extract_window(mask, pose.x, pose.y, self.reach(), &mut buffer.window)?;
        let (local_x, local_y) = buffer.window.to_local(pose.x, pose.y);
        let side = buffer.window.width();
        compose_into(
            &mut buffer.composite,
            &[
                Layer::raster(&buffer.window.raster),
                Layer::shape(
                    self.body,
                    Tag::VEHICLE,
                    Placement::new(local_x, local_y, pose.angle),
                    CompositeMode::Union,
                ),
            ],
            side,
            side,
        )?;

        let contact = FootprintContact::scan(&buffer.composite);
        if contact.pixels == 0 {
            return Err(PerceptionError::EmptyFootprint);
        }

        let readings = read_window_all(self.sensors, &buffer.window, pose.x, pose.y, pose.angle);

        let controls = match network {
            Some(network) => {
                let inputs = network_inputs(&readings, pose, self.max_speed);
                let outputs = network.eval(&inputs)?;
                match (outputs.get(OUTPUT_ACCELERATION), outputs.get(OUTPUT_STEERING)) {
                    (Some(&acceleration), Some(&steering)) => Some(Controls {
                        acceleration,
                        steering,
                    }),
                    _ => {
                        return Err(PerceptionError::MissingOutput {
                            expected: racetrack_brain::OUTPUT_SIZE,
                            actual: outputs.len(),
                        });
                    }
                }
            }
            None => None,
        };

        Ok(Perception {
            contact,
            pose: *pose,
            readings,
            controls,
        })
    }
}

/// Policy input vector: sensor readings followed by the normalized car state.
#[must_use]
pub fn network_inputs(readings: &[f32], pose: &PoseSnapshot, max_speed: f32) -> Vec<f32> {
    let mut inputs = Vec::with_capacity(readings.len() + racetrack_brain::STATE_INPUTS);
    inputs.extend_from_slice(readings);
    inputs.push(pose.acceleration);
    inputs.push(pose.steering);
    inputs.push(if max_speed > 0.0 {
        pose.speed / max_speed
    } else {
        0.0
    });
    inputs.push(pose.angle / std::f32::consts::PI);
    inputs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strip() -> TagRaster {
        // Road rows 20..=40, lap line at column 50.
        let mut mask = TagRaster::filled(120, 60, Tag::OFF_TRACK).expect("mask");
        for y in 20..=40 {
            for x in 0..120 {
                let tag = if x == 50 { Tag::LAP_LINE } else { Tag::AVAILABLE };
                mask.set(x, y, tag);
            }
        }
        mask
    }

    fn context<'a>(sensors: &'a [Sensor], body: &'a Shape) -> PerceptionContext<'a> {
        PerceptionContext {
            sensors,
            body,
            body_extent: 10.0,
            max_speed: 100.0,
        }
    }

    #[test]
    fn footprint_detects_lap_line_and_off_track() {
        let mask = strip();
        let sensors = [Sensor::new(0.0, 20.0)];
        let body = Shape::rect(10.0, 6.0);
        let ctx = context(&sensors, &body);
        let mut buffer = PerceptionBuffer::default();

        let on_road = PoseSnapshot { x: 30.0, y: 30.0, ..PoseSnapshot::default() };
        let seen = ctx.perceive(&mask, None, &on_road, &mut buffer).expect("perceive");
        assert!(!seen.contact.lap_line && !seen.contact.off_track);
        assert_eq!(seen.contact.pixels, 60);
        assert_eq!(seen.readings, vec![1.0]);
        assert!(seen.controls.is_none());
        assert_eq!(seen.pose, on_road);

        let crossing = PoseSnapshot { x: 50.0, y: 30.0, ..PoseSnapshot::default() };
        let seen = ctx.perceive(&mask, None, &crossing, &mut buffer).expect("perceive");
        assert!(seen.contact.lap_line);

        let grass = PoseSnapshot { x: 30.0, y: 8.0, ..PoseSnapshot::default() };
        let seen = ctx.perceive(&mask, None, &grass, &mut buffer).expect("perceive");
        assert!(seen.contact.off_track);
    }

    #[test]
    fn policy_outputs_become_controls() {
        let mask = strip();
        let sensors = [Sensor::new(0.0, 20.0)];
        let body = Shape::rect(10.0, 6.0);
        let ctx = context(&sensors, &body);
        // No hidden layer: accelerate fully, steer by the first reading.
        let network = Network::new(
            5,
            Vec::new(),
            2,
            vec![vec![
                vec![0.0, 0.0, 0.0, 0.0, 0.0, 1.0],
                vec![-0.5, 0.0, 0.0, 0.0, 0.0, 0.0],
            ]],
        )
        .expect("network");
        let pose = PoseSnapshot { x: 30.0, y: 30.0, ..PoseSnapshot::default() };
        let seen = ctx
            .perceive(&mask, Some(&network), &pose, &mut PerceptionBuffer::default())
            .expect("perceive");
        assert_eq!(
            seen.controls,
            Some(Controls {
                acceleration: 1.0,
                steering: -0.5
            })
        );
    }

    #[test]
    fn inputs_append_normalized_state() {
        let pose = PoseSnapshot {
            x: 0.0,
            y: 0.0,
            angle: std::f32::consts::FRAC_PI_2,
            speed: 50.0,
            acceleration: 0.25,
            steering: -0.5,
            odometer: 120.0,
        };
        let inputs = network_inputs(&[0.1, 0.2], &pose, 100.0);
        assert_eq!(inputs, vec![0.1, 0.2, 0.25, -0.5, 0.5, 0.5]);
    }
}
