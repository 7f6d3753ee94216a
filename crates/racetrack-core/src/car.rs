//! Per-car physics and the run state machine.

use racetrack_brain::Network;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::f32::consts::FRAC_PI_2;
use std::sync::Arc;
use tracing::debug;

use crate::config::{KeyBindings, SimulationConfig};
use crate::input::InputState;
use crate::perception::{FootprintContact, Perception, PerceptionBuffer, PerceptionJob, PoseSnapshot};
use crate::track::Track;
use crate::{CarId, wrap_signed_angle};

/// Name reserved for the manually driven car.
pub const MANUAL_CAR_NAME: &str = "manual";

/// Inputs with smaller magnitude are treated as released.
const INPUT_DEADZONE: f32 = 0.01;
const WAYPOINT_CAPACITY: usize = 3;
/// Slack for sub-step times that accumulate rounding error.
const SCHEDULE_EPSILON: f64 = 1e-9;

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EndReason {
    LeftCanvas,
    Backtracked,
    OffTrack,
    WrongWay,
    IncompleteLap,
    TurnedAround,
    Stuck,
    TooSlow,
    Finished,
    /// Closed out by the trainer while still racing.
    Forced,
}

impl EndReason {
    /// Everything except finishing counts as a collision.
    #[must_use]
    pub const fn is_collision(self) -> bool {
        !matches!(self, Self::Finished)
    }

    #[must_use]
    pub const fn describe(self) -> &'static str {
        match self {
            Self::LeftCanvas => "left the canvas",
            Self::Backtracked => "doubled back",
            Self::OffTrack => "left the road",
            Self::WrongWay => "crossed the lap line the wrong way",
            Self::IncompleteLap => "incomplete lap",
            Self::TurnedAround => "turned around on the lap line",
            Self::Stuck => "stuck",
            Self::TooSlow => "too slow",
            Self::Finished => "finished",
            Self::Forced => "ended by the trainer",
        }
    }
}

/// Lifecycle of one car.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CarPhase {
    Unplaced,
    Racing,
    Ended(EndReason),
}

/// Score components, computed on demand.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    /// Odometer measured in car lengths.
    pub distance: f32,
    /// Seconds since the first lap-line crossing.
    pub elapsed: f32,
    pub laps: u32,
    pub started: bool,
    pub collided: bool,
    pub score: f32,
    pub success: bool,
}

/// Read-only snapshot exposed to hosts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CarTelemetry {
    pub name: String,
    pub track: Option<String>,
    pub phase: CarPhase,
    pub x: f32,
    pub y: f32,
    pub heading: f32,
    pub speed: f32,
    pub odometer: f32,
    pub laps: u32,
    pub readings: Vec<f32>,
    pub collided: bool,
    pub finished: bool,
    pub manual: bool,
    pub score: ScoreBreakdown,
}

/// A car with its policy and run state.
#[derive(Debug, Clone)]
pub struct Car {
    name: String,
    color: [u8; 3],
    fudge: f32,
    network: Option<Network>,
    track: Option<Arc<Track>>,
    phase: CarPhase,

    x: f32,
    y: f32,
    angle: f32,
    speed: f32,
    steering: f32,
    acceleration: f32,
    odometer: f32,
    laps: u32,

    on_lap_line: bool,
    crossing_odometer: f32,
    start_time: Option<f64>,
    end_time: Option<f64>,
    collided: bool,
    waypoints: VecDeque<(f32, f32)>,
    readings: Vec<f32>,

    pending: bool,
    last_scan: Option<f64>,
    epoch: u64,
    sequence: u64,
    ticks: u32,
    buffer: Option<PerceptionBuffer>,
}

impl Car {
    /// Unplaced car. `network == None` marks the manually driven car.
    #[must_use]
    pub fn new(name: impl Into<String>, color: [u8; 3], fudge: f32, network: Option<Network>) -> Self {
        let fudge = if fudge.is_finite() {
            fudge.clamp(-1.0, 1.0)
        } else {
            0.0
        };
        Self {
            name: name.into(),
            color,
            fudge,
            network,
            track: None,
            phase: CarPhase::Unplaced,
            x: 0.0,
            y: 0.0,
            angle: 0.0,
            speed: 0.0,
            steering: 0.0,
            acceleration: 0.0,
            odometer: 0.0,
            laps: 0,
            on_lap_line: false,
            crossing_odometer: 0.0,
            start_time: None,
            end_time: None,
            collided: false,
            waypoints: VecDeque::with_capacity(WAYPOINT_CAPACITY),
            readings: Vec::new(),
            pending: false,
            last_scan: None,
            epoch: 0,
            sequence: 0,
            ticks: 0,
            buffer: None,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn color(&self) -> [u8; 3] {
        self.color
    }

    #[must_use]
    pub const fn fudge(&self) -> f32 {
        self.fudge
    }

    #[must_use]
    pub fn network(&self) -> Option<&Network> {
        self.network.as_ref()
    }

    /// Consume the car, yielding its policy.
    #[must_use]
    pub fn into_network(self) -> Option<Network> {
        self.network
    }

    #[must_use]
    pub const fn is_manual(&self) -> bool {
        self.network.is_none()
    }

    #[must_use]
    pub fn track(&self) -> Option<&Arc<Track>> {
        self.track.as_ref()
    }

    #[must_use]
    pub fn track_name(&self) -> Option<&str> {
        self.track.as_deref().map(Track::name)
    }

    #[must_use]
    pub const fn phase(&self) -> CarPhase {
        self.phase
    }

    #[must_use]
    pub const fn is_racing(&self) -> bool {
        matches!(self.phase, CarPhase::Racing)
    }

    #[must_use]
    pub const fn is_ended(&self) -> bool {
        matches!(self.phase, CarPhase::Ended(_))
    }

    #[must_use]
    pub const fn end_reason(&self) -> Option<EndReason> {
        match self.phase {
            CarPhase::Ended(reason) => Some(reason),
            _ => None,
        }
    }

    #[must_use]
    pub const fn position(&self) -> (f32, f32) {
        (self.x, self.y)
    }

    #[must_use]
    pub const fn heading(&self) -> f32 {
        self.angle
    }

    #[must_use]
    pub const fn speed(&self) -> f32 {
        self.speed
    }

    #[must_use]
    pub const fn steering(&self) -> f32 {
        self.steering
    }

    #[must_use]
    pub const fn acceleration(&self) -> f32 {
        self.acceleration
    }

    #[must_use]
    pub const fn odometer(&self) -> f32 {
        self.odometer
    }

    #[must_use]
    pub const fn laps(&self) -> u32 {
        self.laps
    }

    #[must_use]
    pub fn readings(&self) -> &[f32] {
        &self.readings
    }

    #[must_use]
    pub const fn start_time(&self) -> Option<f64> {
        self.start_time
    }

    #[must_use]
    pub const fn end_time(&self) -> Option<f64> {
        self.end_time
    }

    #[must_use]
    pub const fn collided(&self) -> bool {
        self.collided
    }

    /// Placement counter; bumped by every [`Car::place_on_track`].
    #[must_use]
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    #[must_use]
    pub const fn perception_pending(&self) -> bool {
        self.pending
    }

    #[must_use]
    pub const fn ticks(&self) -> u32 {
        self.ticks
    }

    /// Put the car on the start line, resetting every runtime and scoring field.
    pub fn place_on_track(&mut self, track: Arc<Track>, sensor_count: usize) {
        let (sx, sy) = track.start();
        let (dx, dy) = track.direction();
        let offset = self.fudge * track.road_thickness() / 4.0;
        self.x = sx - dy * offset;
        self.y = sy + dx * offset;
        self.angle = track.starting_angle();
        self.speed = 0.0;
        self.steering = 0.0;
        self.acceleration = 0.0;
        self.odometer = 0.0;
        self.laps = 0;
        self.on_lap_line = false;
        self.crossing_odometer = 0.0;
        self.start_time = None;
        self.end_time = None;
        self.collided = false;
        self.waypoints.clear();
        self.readings = vec![1.0; sensor_count];
        self.pending = false;
        self.last_scan = None;
        self.ticks = 0;
        self.epoch += 1;
        self.track = Some(track);
        self.phase = CarPhase::Racing;
    }

    /// Freeze the run. Returns the reason if this call ended it.
    pub fn end_run(&mut self, reason: EndReason, now: f64) -> Option<EndReason> {
        if !self.is_racing() {
            return None;
        }
        self.phase = CarPhase::Ended(reason);
        self.end_time = Some(now);
        self.collided = reason.is_collision();
        debug!(car = %self.name, reason = reason.describe(), laps = self.laps, "run ended");
        Some(reason)
    }

    /// Advance one physics step and run the per-tick guards.
    pub fn tick(
        &mut self,
        dt: f32,
        now: f64,
        config: &SimulationConfig,
        input: &dyn InputState,
    ) -> Option<EndReason> {
        if !self.is_racing() {
            return None;
        }
        if self.is_manual() {
            self.read_manual_controls(&config.key_bindings, input);
        }
        self.integrate(dt, config);
        self.ticks = self.ticks.saturating_add(1);

        let (on_canvas, radius) = match &self.track {
            Some(track) => (
                track.contains(self.x, self.y),
                config.car_extent().max(track.road_thickness()),
            ),
            None => return None,
        };
        if !on_canvas {
            return self.end_run(EndReason::LeftCanvas, now);
        }
        if self.backtracked(radius) {
            return self.end_run(EndReason::Backtracked, now);
        }
        if !self.is_manual() && self.ticks > config.stuck_grace_ticks {
            let score = self.score(now, config);
            if score.score <= 0.0 {
                return self.end_run(EndReason::Stuck, now);
            }
            if score.score <= score.elapsed / 2.0 {
                return self.end_run(EndReason::TooSlow, now);
            }
        }
        None
    }

    fn read_manual_controls(&mut self, keys: &KeyBindings, input: &dyn InputState) {
        let held = |names: &[String]| if input.is_any_key_down(names) { 1.0 } else { 0.0 };
        self.acceleration = held(&keys.accelerate) - held(&keys.brake);
        self.steering = held(&keys.right) - held(&keys.left);
    }

    fn integrate(&mut self, dt: f32, config: &SimulationConfig) {
        let dt = finite_or_zero(dt).max(0.0);
        let friction = config.friction;
        self.speed = finite_or_zero(self.speed);

        let limit = self.speed.abs();
        let mut steering = finite_or_zero(self.steering).clamp(-1.0, 1.0).clamp(-limit, limit);
        if steering.abs() >= INPUT_DEADZONE {
            self.angle += config.max_steering_rate * steering * dt;
            steering = decay_toward_zero(steering, friction * dt);
        }
        self.steering = steering;
        self.speed -= friction * self.speed * dt;
        self.angle = wrap_signed_angle(self.angle);

        let mut acceleration = finite_or_zero(self.acceleration).clamp(-1.0, 1.0);
        if acceleration.abs() >= INPUT_DEADZONE {
            self.speed += config.max_acceleration * acceleration * dt;
            acceleration = decay_toward_zero(acceleration, friction * dt);
        } else {
            self.speed -= friction * self.speed * dt;
        }
        self.acceleration = acceleration;
        self.speed = finite_or_zero(self.speed).clamp(0.0, config.max_speed);

        let travel = self.speed * dt;
        self.x += self.angle.cos() * travel;
        self.y += self.angle.sin() * travel;
        self.odometer += travel;
    }

    fn backtracked(&mut self, radius: f32) -> bool {
        let (x, y) = (self.x, self.y);
        let near = |&(wx, wy): &(f32, f32)| (wx - x).hypot(wy - y) <= radius;
        let newest = self.waypoints.len().checked_sub(1);
        if self
            .waypoints
            .iter()
            .enumerate()
            .any(|(index, waypoint)| Some(index) != newest && near(waypoint))
        {
            return true;
        }
        if !self.waypoints.iter().any(near) {
            if self.waypoints.len() == WAYPOINT_CAPACITY {
                self.waypoints.pop_front();
            }
            self.waypoints.push_back((x, y));
        }
        false
    }

    fn heading_reversed(&self, angle: f32) -> bool {
        let start = self.track.as_deref().map_or(0.0, Track::starting_angle);
        wrap_signed_angle(angle - start).abs() > FRAC_PI_2
    }

    /// Whether a refresh should be requested at `now`.
    #[must_use]
    pub fn perception_due(&self, now: f64, interval: f64) -> bool {
        self.is_racing()
            && !self.pending
            && self
                .last_scan
                .is_none_or(|last| now - last + SCHEDULE_EPSILON >= interval)
    }

    /// Mark a refresh as outstanding and hand the job its pose and buffer.
    pub fn begin_perception(&mut self, id: CarId, now: f64) -> PerceptionJob {
        self.pending = true;
        self.last_scan = Some(now);
        self.sequence += 1;
        PerceptionJob {
            car: id,
            epoch: self.epoch,
            sequence: self.sequence,
            pose: self.pose(),
            buffer: self.buffer.take().unwrap_or_default(),
        }
    }

    /// True if a result for `(epoch, sequence)` belongs to the current request.
    #[must_use]
    pub const fn accepts(&self, epoch: u64, sequence: u64) -> bool {
        self.epoch == epoch && self.sequence == sequence
    }

    /// Take back a buffer lent to a job.
    pub fn restore_buffer(&mut self, buffer: PerceptionBuffer) {
        if self.buffer.is_none() {
            self.buffer = Some(buffer);
        }
    }

    /// Last composited perception window, if any refresh has completed.
    #[must_use]
    pub fn perception_buffer(&self) -> Option<&PerceptionBuffer> {
        self.buffer.as_ref()
    }

    #[must_use]
    pub const fn pose(&self) -> PoseSnapshot {
        PoseSnapshot {
            x: self.x,
            y: self.y,
            angle: self.angle,
            speed: self.speed,
            acceleration: self.acceleration,
            steering: self.steering,
            odometer: self.odometer,
        }
    }

    /// Apply a resolved refresh: footprint edges first, then readings and controls.
    ///
    /// Edges are judged against the pose the footprint was sampled at.
    pub fn apply_perception(
        &mut self,
        perception: Perception,
        now: f64,
        config: &SimulationConfig,
    ) -> Option<EndReason> {
        self.pending = false;
        if !self.is_racing() {
            return None;
        }
        if let Some(reason) = self.apply_contact(perception.contact, &perception.pose, now, config) {
            return Some(reason);
        }
        if !self.is_racing() {
            return None;
        }
        self.readings = perception.readings;
        if !self.is_manual()
            && let Some(controls) = perception.controls
        {
            self.acceleration = controls.acceleration;
            self.steering = controls.steering;
        }
        None
    }

    /// A refresh failed; keep the old state and retry on the next window.
    pub fn perception_failed(&mut self) {
        self.pending = false;
    }

    fn apply_contact(
        &mut self,
        contact: FootprintContact,
        pose: &PoseSnapshot,
        now: f64,
        config: &SimulationConfig,
    ) -> Option<EndReason> {
        if contact.off_track {
            return self.end_run(EndReason::OffTrack, now);
        }
        let rising = contact.lap_line && !self.on_lap_line;
        let falling = !contact.lap_line && self.on_lap_line;
        self.on_lap_line = contact.lap_line;

        if rising {
            if self.heading_reversed(pose.angle) {
                return self.end_run(EndReason::WrongWay, now);
            }
            if self.start_time.is_none() {
                self.start_time = Some(now);
                self.crossing_odometer = pose.odometer;
                return None;
            }
            let track_thickness = self.track.as_deref().map_or(0.0, Track::road_thickness);
            let min_lap = config.car_width + config.car_height + track_thickness;
            if pose.odometer - self.crossing_odometer < min_lap {
                return self.end_run(EndReason::IncompleteLap, now);
            }
            self.laps += 1;
            self.crossing_odometer = pose.odometer;
            if self.laps >= config.laps_to_finish {
                return self.end_run(EndReason::Finished, now);
            }
        } else if falling && self.heading_reversed(pose.angle) {
            return self.end_run(EndReason::TurnedAround, now);
        }
        None
    }

    /// Score at `now` (end time is used once the run has ended).
    #[must_use]
    pub fn score(&self, now: f64, config: &SimulationConfig) -> ScoreBreakdown {
        let distance = self.odometer / config.car_extent();
        let elapsed = (self.end_time.unwrap_or(now) - self.start_time.unwrap_or(now)).max(0.0) as f32;
        let started = self.start_time.is_some();
        let lap_bonus = (self.laps as f32 + 1.0).powi(2) * 10.0;
        let score = if started {
            (distance - elapsed).max(0.0) + lap_bonus
        } else {
            0.0
        };
        ScoreBreakdown {
            distance,
            elapsed,
            laps: self.laps,
            started,
            collided: self.collided,
            score,
            success: !self.collided && self.laps >= config.laps_to_finish && started,
        }
    }

    #[must_use]
    pub fn telemetry(&self, now: f64, config: &SimulationConfig) -> CarTelemetry {
        CarTelemetry {
            name: self.name.clone(),
            track: self.track_name().map(str::to_string),
            phase: self.phase,
            x: self.x,
            y: self.y,
            heading: self.angle,
            speed: self.speed,
            odometer: self.odometer,
            laps: self.laps,
            readings: self.readings.clone(),
            collided: self.collided,
            finished: matches!(self.phase, CarPhase::Ended(EndReason::Finished)),
            manual: self.is_manual(),
            score: self.score(now, config),
        }
    }
}

fn finite_or_zero(value: f32) -> f32 {
    if value.is_finite() { value } else { 0.0 }
}

fn decay_toward_zero(value: f32, amount: f32) -> f32 {
    if value > 0.0 {
        (value - amount).max(0.0)
    } else {
        (value + amount).min(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{KeySet, NoInput};
    use crate::track::builtin_definitions;
    use rand::{Rng, SeedableRng, rngs::SmallRng};
    use slotmap::SlotMap;

    fn basic_track() -> Arc<Track> {
        let definition = builtin_definitions().remove(0);
        Arc::new(Track::from_definition(definition).expect("track"))
    }

    fn placed_ai(config: &SimulationConfig) -> Car {
        let mut rng = SmallRng::seed_from_u64(5);
        let network = Network::random(
            racetrack_brain::input_size(config.sensors.len()),
            config.hidden_layers.clone(),
            racetrack_brain::OUTPUT_SIZE,
            &mut rng,
        )
        .expect("network");
        let mut car = Car::new("ai", [200, 40, 40], 0.0, Some(network));
        car.place_on_track(basic_track(), config.sensors.len());
        car
    }

    /// Refresh result sampled at the car's current pose.
    fn contact(car: &Car, lap_line: bool, off_track: bool) -> Perception {
        Perception {
            contact: FootprintContact {
                lap_line,
                off_track,
                pixels: 200,
            },
            pose: car.pose(),
            readings: vec![0.5; 5],
            controls: None,
        }
    }

    #[test]
    fn placement_resets_state_and_bumps_epoch() {
        let config = SimulationConfig::default();
        let mut car = placed_ai(&config);
        assert_eq!(car.phase(), CarPhase::Racing);
        assert_eq!(car.position(), (500.0, 100.0));
        assert_eq!(car.epoch(), 1);
        car.end_run(EndReason::Forced, 1.0);
        assert!(car.collided());
        car.place_on_track(basic_track(), 5);
        assert_eq!(car.epoch(), 2);
        assert!(!car.collided());
        assert_eq!(car.end_time(), None);
        assert_eq!(car.readings(), &[1.0; 5]);
    }

    #[test]
    fn fudge_offsets_across_the_start_direction() {
        let mut car = Car::new("fudged", [0, 0, 0], 1.0, None);
        car.place_on_track(basic_track(), 0);
        assert_eq!(car.position(), (500.0, 120.0));
        let wild = Car::new("wild", [0, 0, 0], 7.0, None);
        assert_eq!(wild.fudge(), 1.0);
    }

    #[test]
    fn post_tick_state_stays_bounded() {
        let config = SimulationConfig::default();
        let mut rng = SmallRng::seed_from_u64(11);
        let dts = [0.0_f32, 1e-4, 0.016, 0.1, 0.5, 3.0, f32::NAN, f32::INFINITY, -0.2];
        for round in 0..200 {
            let mut car = placed_ai(&config);
            car.speed = rng.random_range(-50.0..400.0);
            car.steering = rng.random_range(-5.0..5.0);
            car.acceleration = rng.random_range(-5.0..5.0);
            if round % 17 == 0 {
                car.speed = f32::NAN;
                car.steering = f32::INFINITY;
            }
            let dt = dts[round % dts.len()];
            car.integrate(dt, &config);
            assert!((0.0..=config.max_speed).contains(&car.speed()), "speed {}", car.speed());
            assert!((-1.0..=1.0).contains(&car.steering()), "steering {}", car.steering());
            assert!((-1.0..=1.0).contains(&car.acceleration()));
            assert!(car.heading() > -std::f32::consts::PI && car.heading() <= std::f32::consts::PI);
        }
    }

    #[test]
    fn steering_needs_speed() {
        let config = SimulationConfig::default();
        let mut car = placed_ai(&config);
        car.steering = 1.0;
        car.integrate(0.1, &config);
        assert_eq!(car.heading(), 0.0);
        assert_eq!(car.steering(), 0.0);
    }

    #[test]
    fn acceleration_decays_without_crossing_zero() {
        let config = SimulationConfig {
            friction: 5.0,
            ..SimulationConfig::default()
        };
        let mut car = placed_ai(&config);
        car.acceleration = 0.2;
        for _ in 0..10 {
            car.integrate(0.1, &config);
            assert!(car.acceleration() >= 0.0);
        }
        assert_eq!(car.acceleration(), 0.0);
    }

    #[test]
    fn off_track_ends_the_run_on_refresh_not_before() {
        let config = SimulationConfig::default();
        let mut car = placed_ai(&config);
        // Teleport onto the infield; physics alone does not notice.
        car.x = 500.0;
        car.y = 350.0;
        for _ in 0..5 {
            assert_eq!(car.tick(0.001, 0.0, &config, &NoInput), None);
        }
        assert!(car.is_racing());
        assert_eq!(
            car.apply_perception(contact(&car, false, true), 0.01, &config),
            Some(EndReason::OffTrack)
        );
        assert!(car.collided());
        assert!(!car.score(0.01, &config).success);
    }

    #[test]
    fn lap_crossings_are_edge_triggered_and_guarded() {
        let config = SimulationConfig::default();
        let mut car = placed_ai(&config);
        let min_lap = config.car_width + config.car_height + 80.0;

        car.apply_perception(contact(&car, true, false), 1.0, &config);
        assert_eq!(car.start_time(), Some(1.0));
        assert_eq!(car.laps(), 0);
        // Staying on the line does not re-trigger.
        car.odometer += 2.0 * min_lap;
        car.apply_perception(contact(&car, true, false), 1.1, &config);
        assert_eq!(car.laps(), 0);
        car.apply_perception(contact(&car, false, false), 1.2, &config);

        car.apply_perception(contact(&car, true, false), 5.0, &config);
        assert_eq!(car.laps(), 1);
        car.apply_perception(contact(&car, true, false), 5.1, &config);
        assert_eq!(car.laps(), 1);
        car.apply_perception(contact(&car, false, false), 5.2, &config);

        // Re-entering before covering the minimum lap distance ends the run.
        car.odometer += min_lap * 0.5;
        assert_eq!(
            car.apply_perception(contact(&car, true, false), 5.3, &config),
            Some(EndReason::IncompleteLap)
        );
        assert_eq!(car.laps(), 1);
    }

    #[test]
    fn third_lap_finishes_successfully() {
        let config = SimulationConfig::default();
        let mut car = placed_ai(&config);
        car.apply_perception(contact(&car, true, false), 0.5, &config);
        for lap in 1..=3 {
            car.apply_perception(contact(&car, false, false), lap as f64, &config);
            car.odometer += 1000.0;
            car.apply_perception(contact(&car, true, false), lap as f64 + 0.5, &config);
        }
        assert_eq!(car.phase(), CarPhase::Ended(EndReason::Finished));
        let score = car.score(10.0, &config);
        assert!(score.success);
        assert!(!score.collided);
        assert_eq!(score.laps, 3);
        assert!((score.elapsed - 3.0).abs() < 1e-6);
        assert!(score.score >= 160.0);
    }

    #[test]
    fn reversed_heading_on_the_line_ends_the_run() {
        let config = SimulationConfig::default();
        let mut car = placed_ai(&config);
        car.angle = std::f32::consts::PI;
        assert_eq!(
            car.apply_perception(contact(&car, true, false), 0.1, &config),
            Some(EndReason::WrongWay)
        );

        let mut car = placed_ai(&config);
        car.apply_perception(contact(&car, true, false), 0.1, &config);
        car.angle = 2.0;
        assert_eq!(
            car.apply_perception(contact(&car, false, false), 0.2, &config),
            Some(EndReason::TurnedAround)
        );
    }

    #[test]
    fn edges_are_judged_at_the_sampled_pose() {
        let config = SimulationConfig::default();
        let min_lap = config.car_width + config.car_height + 80.0;

        // Sampled facing forward; the car turns before the result lands.
        let mut car = placed_ai(&config);
        let forward = car.heading();
        let sampled = contact(&car, true, false);
        car.angle = std::f32::consts::PI;
        assert_eq!(car.apply_perception(sampled, 0.1, &config), None);
        assert_eq!(car.start_time(), Some(0.1));

        // Crossing sampled short of a full lap, applied after the car drove on.
        car.angle = forward;
        car.apply_perception(contact(&car, false, false), 0.2, &config);
        car.odometer += min_lap * 0.5;
        let sampled = contact(&car, true, false);
        car.odometer += min_lap;
        assert_eq!(
            car.apply_perception(sampled, 0.3, &config),
            Some(EndReason::IncompleteLap)
        );

        // And the reverse: a full lap at sampling time counts.
        let mut car = placed_ai(&config);
        car.apply_perception(contact(&car, true, false), 0.1, &config);
        car.apply_perception(contact(&car, false, false), 0.2, &config);
        car.odometer += min_lap * 2.0;
        let sampled = contact(&car, true, false);
        car.angle = std::f32::consts::PI;
        assert_eq!(car.apply_perception(sampled, 5.0, &config), None);
        assert_eq!(car.laps(), 1);
        assert_eq!(car.phase(), CarPhase::Racing);
    }

    #[test]
    fn leaving_the_canvas_and_doubling_back_end_the_run() {
        let config = SimulationConfig::default();
        let mut car = placed_ai(&config);
        car.x = 999.9;
        car.speed = 200.0;
        car.acceleration = 1.0;
        assert_eq!(car.tick(0.1, 0.1, &config, &NoInput), Some(EndReason::LeftCanvas));

        let mut car = placed_ai(&config);
        car.tick(0.0, 0.0, &config, &NoInput);
        car.x += 100.0;
        car.tick(0.0, 0.0, &config, &NoInput);
        car.x -= 95.0;
        assert_eq!(car.tick(0.0, 0.0, &config, &NoInput), Some(EndReason::Backtracked));
    }

    #[test]
    fn idle_ai_cars_are_evicted_after_grace() {
        let config = SimulationConfig {
            stuck_grace_ticks: 3,
            ..SimulationConfig::default()
        };
        let mut car = placed_ai(&config);
        for _ in 0..3 {
            assert_eq!(car.tick(0.0, 0.0, &config, &NoInput), None);
        }
        assert_eq!(car.tick(0.0, 0.0, &config, &NoInput), Some(EndReason::Stuck));

        let mut slow = placed_ai(&config);
        slow.apply_perception(contact(&slow, true, false), 0.0, &config);
        for _ in 0..3 {
            slow.tick(0.0, 1.0, &config, &NoInput);
        }
        assert_eq!(slow.tick(0.0, 30.0, &config, &NoInput), Some(EndReason::TooSlow));
    }

    #[test]
    fn manual_car_reads_bound_keys() {
        let config = SimulationConfig::default();
        let mut car = Car::new(MANUAL_CAR_NAME, [255, 255, 255], 0.0, None);
        car.place_on_track(basic_track(), config.sensors.len());
        let mut keys = KeySet::new();
        keys.press("ArrowUp");
        keys.press("a");
        car.tick(0.1, 0.1, &config, &keys);
        assert!(car.speed() > 0.0);
        assert!(car.steering() <= 0.0);
        for _ in 0..1000 {
            car.tick(0.0, 100.0, &config, &keys);
        }
        assert!(car.is_racing(), "manual cars are never evicted");
    }

    #[test]
    fn perception_requests_are_throttled() {
        let config = SimulationConfig::default();
        let mut car = placed_ai(&config);
        let mut ids: SlotMap<CarId, ()> = SlotMap::with_key();
        let id = ids.insert(());
        assert!(car.perception_due(0.0, 0.1));
        let job = car.begin_perception(id, 0.0);
        assert_eq!((job.epoch, job.sequence), (1, 1));
        assert!(!car.perception_due(0.5, 0.1));
        car.restore_buffer(job.buffer);
        car.perception_failed();
        assert!(!car.perception_due(0.05, 0.1));
        assert!(car.perception_due(0.1, 0.1));
        assert!(car.accepts(1, 1));
    }
}
