use racetrack_brain::{Network, NetworkError};
use racetrack_raster::{CompositeMode, Placement, RasterError, Shape, Tag, TagRaster};
use rand::{Rng, rngs::SmallRng};
use rayon::prelude::*;
use slotmap::SlotMap;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::CarId;
use crate::car::{Car, CarPhase, CarTelemetry, EndReason, MANUAL_CAR_NAME};
use crate::clock::{Clock, ClockSettings};
use crate::config::{ConfigError, SimulationConfig};
use crate::input::{InputState, NoInput};
use crate::perception::{Perception, PerceptionContext, PerceptionError, PerceptionJob};
use crate::sensor::Sensor;
use crate::store::{NullStore, StoreError, TrainerStore};
use crate::track::{Track, TrackError, TrackRegistry};
use crate::trainer::{Finalized, RecordUpdate, TRAINER_STATE_KEY, Topology, TrainerState, breed, rank};

const MANUAL_CAR_COLOR: [u8; 3] = [250, 250, 250];

/// Errors surfaced by [`Simulation`] operations.
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Track(#[from] TrackError),
    #[error("unknown track `{0}`")]
    UnknownTrack(String),
    #[error("a car named `{0}` already exists")]
    DuplicateCar(String),
    #[error("no such car")]
    UnknownCar,
    #[error("car `{0}` has not been placed on a track")]
    CarNotPlaced(String),
    #[error("policy shape does not match the configured sensors and hidden layers")]
    TopologyMismatch,
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error(transparent)]
    Raster(#[from] RasterError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of [`Simulation::next_generation`].
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationOutcome {
    /// AI cars are still racing; nothing changed.
    Pending,
    Advanced {
        iteration: u64,
        population: usize,
        best_score: Option<f32>,
    },
}

/// What happened during one [`Simulation::tick`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub now: f64,
    pub steps: usize,
    /// Frame time dropped by the update-window clamp.
    pub dropped: f64,
    pub perception_requested: usize,
    pub perception_applied: usize,
    pub perception_discarded: usize,
    pub perception_failed: usize,
    pub ended: Vec<(CarId, EndReason)>,
    pub generation: Option<GenerationOutcome>,
    pub render_due: bool,
    pub saved: bool,
}

/// Explicit simulation context: tracks, cars, trainer records, clock, and collaborators.
pub struct Simulation {
    config: SimulationConfig,
    tracks: TrackRegistry,
    sensors: Vec<Sensor>,
    topology: Topology,
    body: Shape,
    cars: SlotMap<CarId, Car>,
    names: HashMap<String, CarId>,
    trainer: TrainerState,
    clock: Clock,
    rng: SmallRng,
    jobs: Vec<PerceptionJob>,
    store: Box<dyn TrainerStore>,
    input: Box<dyn InputState>,
    active_track: Option<String>,
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("tracks", &self.tracks.names().collect::<Vec<_>>())
            .field("cars", &self.cars.len())
            .field("iteration", &self.trainer.iteration)
            .field("now", &self.clock.now())
            .field("active_track", &self.active_track)
            .finish_non_exhaustive()
    }
}

impl Simulation {
    /// Build a simulation with no persistence and no keyboard input.
    pub fn new(config: SimulationConfig, tracks: TrackRegistry) -> Result<Self, SimulationError> {
        config.validate()?;
        let sensors = config.sensors.iter().map(Sensor::from_config).collect();
        let topology = Topology::from_config(&config);
        let body = Shape::rect(config.car_width, config.car_height);
        let rng = config.seeded_rng();
        let trainer = TrainerState::from_config(&config);
        let clock = Clock::new(ClockSettings::from_config(&config));
        Ok(Self {
            config,
            tracks,
            sensors,
            topology,
            body,
            cars: SlotMap::with_key(),
            names: HashMap::new(),
            trainer,
            clock,
            rng,
            jobs: Vec::new(),
            store: Box::new(NullStore),
            input: Box::new(NoInput),
            active_track: None,
        })
    }

    #[must_use]
    pub fn with_store(mut self, store: Box<dyn TrainerStore>) -> Self {
        self.store = store;
        self
    }

    #[must_use]
    pub fn with_input(mut self, input: Box<dyn InputState>) -> Self {
        self.input = input;
        self
    }

    pub fn set_input(&mut self, input: Box<dyn InputState>) {
        self.input = input;
    }

    #[must_use]
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    #[must_use]
    pub fn tracks(&self) -> &TrackRegistry {
        &self.tracks
    }

    /// Register another track; replaces a track of the same name.
    pub fn add_track(&mut self, track: Track) -> Arc<Track> {
        self.tracks.insert(track)
    }

    #[must_use]
    pub fn sensors(&self) -> &[Sensor] {
        &self.sensors
    }

    #[must_use]
    pub fn trainer(&self) -> &TrainerState {
        &self.trainer
    }

    #[must_use]
    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    #[must_use]
    pub fn active_track(&self) -> Option<&str> {
        self.active_track.as_deref()
    }

    pub fn cars(&self) -> impl Iterator<Item = (CarId, &Car)> + '_ {
        self.cars.iter()
    }

    #[must_use]
    pub fn car(&self, id: CarId) -> Option<&Car> {
        self.cars.get(id)
    }

    #[must_use]
    pub fn car_by_name(&self, name: &str) -> Option<(CarId, &Car)> {
        let id = *self.names.get(name)?;
        self.cars.get(id).map(|car| (id, car))
    }

    #[must_use]
    pub fn car_count(&self) -> usize {
        self.cars.len()
    }

    /// Live telemetry for every car, in registry order.
    #[must_use]
    pub fn telemetry(&self) -> Vec<CarTelemetry> {
        let now = self.clock.now();
        self.cars
            .values()
            .map(|car| car.telemetry(now, &self.config))
            .collect()
    }

    /// Load trainer records from the store. Returns `false` when nothing was stored.
    ///
    /// Population counts and mutation tuning always come from the current config.
    pub fn restore(&mut self) -> Result<bool, SimulationError> {
        let Some(value) = self.store.read(TRAINER_STATE_KEY)? else {
            return Ok(false);
        };
        let mut state: TrainerState = serde_json::from_value(value).map_err(StoreError::from)?;
        let dropped = state.discard_incompatible(&self.topology);
        if dropped > 0 {
            warn!(dropped, "discarded stored records with a different policy shape");
        }
        state.population = self.config.population;
        state.mutation = self.config.mutation;
        info!(
            iteration = state.iteration,
            champion = ?state.champion.as_ref().map(|champion| champion.score),
            tracks = state.records.len(),
            "restored trainer state"
        );
        self.trainer = state;
        Ok(true)
    }

    /// Persist trainer records.
    pub fn save(&mut self) -> Result<(), SimulationError> {
        let value = serde_json::to_value(&self.trainer).map_err(StoreError::from)?;
        self.store.write(TRAINER_STATE_KEY, &value)?;
        Ok(())
    }

    /// Add an unplaced car. `None` adds a manually driven car.
    pub fn spawn_car(
        &mut self,
        name: impl Into<String>,
        network: Option<Network>,
    ) -> Result<CarId, SimulationError> {
        if let Some(network) = &network
            && !self.topology.matches(network)
        {
            return Err(SimulationError::TopologyMismatch);
        }
        let color = random_color(&mut self.rng);
        let fudge = self.rng.random_range(-1.0..=1.0);
        self.insert_car(Car::new(name, color, fudge, network))
    }

    fn insert_car(&mut self, car: Car) -> Result<CarId, SimulationError> {
        if self.names.contains_key(car.name()) {
            return Err(SimulationError::DuplicateCar(car.name().to_string()));
        }
        let name = car.name().to_string();
        let id = self.cars.insert(car);
        self.names.insert(name, id);
        Ok(id)
    }

    pub fn remove_car(&mut self, id: CarId) -> Option<Car> {
        let car = self.cars.remove(id)?;
        self.names.remove(car.name());
        Some(car)
    }

    /// Place (or re-place) a car on the start line of `track`.
    pub fn place_car(&mut self, id: CarId, track: &str) -> Result<(), SimulationError> {
        let track = self
            .tracks
            .get(track)
            .cloned()
            .ok_or_else(|| SimulationError::UnknownTrack(track.to_string()))?;
        let sensor_count = self.sensors.len();
        let car = self.cars.get_mut(id).ok_or(SimulationError::UnknownCar)?;
        car.place_on_track(track, sensor_count);
        Ok(())
    }

    /// Advance by one frame of wall-clock time.
    pub fn tick(&mut self, dt: f64) -> TickReport {
        let frame = self.clock.advance(dt);
        let mut report = TickReport {
            steps: frame.steps.len(),
            dropped: frame.dropped,
            render_due: frame.render_due,
            ..TickReport::default()
        };

        let interval = self.config.perception_interval;
        for (step, now) in frame.sub_steps() {
            for (id, car) in self.cars.iter_mut() {
                if let Some(reason) = car.tick(step as f32, now, &self.config, self.input.as_ref()) {
                    report.ended.push((id, reason));
                }
                if car.perception_due(now, interval) {
                    self.jobs.push(car.begin_perception(id, now));
                    report.perception_requested += 1;
                }
            }
            // Requests made during a sub-step land before the next one runs.
            self.resolve_perception(now, &mut report);
        }

        if self.config.auto_advance
            && let Some(track) = self.active_track.clone()
            && self.generation_finished(&track)
        {
            match self.next_generation(&track, false) {
                Ok(outcome) => report.generation = Some(outcome),
                Err(err) => warn!(track = %track, error = %err, "failed to advance generation"),
            }
        }

        if frame.save_due {
            match self.save() {
                Ok(()) => report.saved = true,
                Err(err) => warn!(error = %err, "failed to persist trainer state"),
            }
        }

        report.now = frame.end();
        report
    }

    fn resolve_perception(&mut self, now: f64, report: &mut TickReport) {
        if self.jobs.is_empty() {
            return;
        }
        let jobs = std::mem::take(&mut self.jobs);
        let context = PerceptionContext {
            sensors: &self.sensors,
            body: &self.body,
            body_extent: self.config.car_width.hypot(self.config.car_height),
            max_speed: self.config.max_speed,
        };
        let cars = &self.cars;
        let resolved: Vec<(PerceptionJob, Option<Result<Perception, PerceptionError>>)> = jobs
            .into_par_iter()
            .map(|mut job| {
                let outcome = cars
                    .get(job.car)
                    .filter(|car| car.accepts(job.epoch, job.sequence))
                    .and_then(|car| {
                        let track = car.track()?;
                        Some(context.perceive(track.mask(), car.network(), &job.pose, &mut job.buffer))
                    });
                (job, outcome)
            })
            .collect();

        for (job, outcome) in resolved {
            let Some(car) = self.cars.get_mut(job.car) else {
                report.perception_discarded += 1;
                debug!(epoch = job.epoch, sequence = job.sequence, "discarded perception for removed car");
                continue;
            };
            let current = car.accepts(job.epoch, job.sequence);
            car.restore_buffer(job.buffer);
            match outcome {
                Some(Ok(perception)) if current => {
                    report.perception_applied += 1;
                    if let Some(reason) = car.apply_perception(perception, now, &self.config) {
                        report.ended.push((job.car, reason));
                    }
                }
                Some(Err(err)) if current => {
                    report.perception_failed += 1;
                    warn!(car = %car.name(), error = %err, "perception refresh failed; retrying next window");
                    car.perception_failed();
                }
                _ => {
                    report.perception_discarded += 1;
                    debug!(
                        car = %car.name(),
                        epoch = job.epoch,
                        sequence = job.sequence,
                        "discarded stale perception result"
                    );
                }
            }
        }
    }

    fn generation_finished(&self, track: &str) -> bool {
        let mut ai = self.cars.values().filter(|car| !car.is_manual()).peekable();
        if ai.peek().is_none() {
            return false;
        }
        ai.all(|car| !(car.is_racing() && car.track_name() == Some(track)))
    }

    /// Replace the AI population once every AI car on `track` has ended (or when forced).
    pub fn next_generation(
        &mut self,
        track_name: &str,
        force: bool,
    ) -> Result<GenerationOutcome, SimulationError> {
        let track = self
            .tracks
            .get(track_name)
            .cloned()
            .ok_or_else(|| SimulationError::UnknownTrack(track_name.to_string()))?;
        self.active_track = Some(track_name.to_string());
        let sensor_count = self.sensors.len();

        if self.config.manual_control {
            let id = match self.names.get(MANUAL_CAR_NAME).copied() {
                Some(id) => id,
                None => self.insert_car(Car::new(MANUAL_CAR_NAME, MANUAL_CAR_COLOR, 0.0, None))?,
            };
            if let Some(car) = self.cars.get_mut(id)
                && (!car.is_racing() || car.track_name() != Some(track_name))
            {
                car.place_on_track(Arc::clone(&track), sensor_count);
            }
        } else if let Some(id) = self.names.get(MANUAL_CAR_NAME).copied() {
            self.remove_car(id);
        }

        let ai_ids: Vec<CarId> = self
            .cars
            .iter()
            .filter(|(_, car)| !car.is_manual())
            .map(|(id, _)| id)
            .collect();
        if !force
            && ai_ids.iter().any(|&id| {
                self.cars
                    .get(id)
                    .is_some_and(|car| car.is_racing() && car.track_name() == Some(track_name))
            })
        {
            return Ok(GenerationOutcome::Pending);
        }

        let now = self.clock.now();
        let mut generation = Vec::with_capacity(ai_ids.len());
        for id in ai_ids {
            let Some(mut car) = self.remove_car(id) else {
                continue;
            };
            car.end_run(EndReason::Forced, now);
            let score = car.score(now, &self.config).score;
            let record_track = car.track_name().unwrap_or(track_name).to_string();
            let name = car.name().to_string();
            let Some(network) = car.into_network() else {
                continue;
            };
            match self.trainer.observe(&record_track, score, &network) {
                RecordUpdate::Global => {
                    info!(car = %name, track = %record_track, score, "new global champion");
                }
                RecordUpdate::Track => {
                    info!(car = %name, track = %record_track, score, "new track record");
                }
                RecordUpdate::Unchanged => {}
            }
            generation.push(Finalized { score, network });
        }

        rank(&mut generation);
        let offspring = breed(&self.trainer, &generation, &self.topology, &mut self.rng)?;
        self.trainer.iteration += 1;
        let iteration = self.trainer.iteration;
        for (index, network) in offspring.into_iter().enumerate() {
            let color = random_color(&mut self.rng);
            let fudge = self.rng.random_range(-1.0..=1.0);
            let car = Car::new(format!("ai-{iteration}-{index}"), color, fudge, Some(network));
            self.insert_car(car)?;
        }
        for car in self.cars.values_mut() {
            if car.phase() == CarPhase::Unplaced {
                car.place_on_track(Arc::clone(&track), sensor_count);
            }
        }

        if let Err(err) = self.save() {
            warn!(error = %err, "failed to persist trainer state");
        }

        let best_score = self.trainer.best_score(track_name);
        let population = self.cars.len();
        info!(
            track = %track_name,
            iteration,
            population,
            best_score = ?best_score,
            "advanced generation"
        );
        Ok(GenerationOutcome::Advanced {
            iteration,
            population,
            best_score,
        })
    }

    /// Track mask with the car footprint and its sensor rays stamped on, for overlays.
    pub fn sensor_overlay(&self, id: CarId) -> Result<TagRaster, SimulationError> {
        let car = self.cars.get(id).ok_or(SimulationError::UnknownCar)?;
        let track = car
            .track()
            .ok_or_else(|| SimulationError::CarNotPlaced(car.name().to_string()))?;
        let mut raster = track.mask().clone();
        let (x, y) = car.position();
        raster.paint_shape(
            &self.body,
            Placement::new(x, y, car.heading()),
            Tag::VEHICLE,
            CompositeMode::Union,
        )?;
        for sensor in &self.sensors {
            sensor.trace(&mut raster, x, y, car.heading());
        }
        Ok(raster)
    }
}

fn random_color(rng: &mut SmallRng) -> [u8; 3] {
    [
        rng.random_range(64..=255),
        rng.random_range(64..=255),
        rng.random_range(64..=255),
    ]
}
