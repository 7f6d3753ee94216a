use anyhow::{Context, Result, bail};
use racetrack_core::{CarTelemetry, GenerationOutcome, Simulation};
use serde::Serialize;
use tracing::{debug, info};

/// When a headless training session stops.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingLimits {
    /// Stop after this many generations have advanced.
    pub generations: Option<u64>,
    /// Stop after this much simulated time.
    pub seconds: Option<f64>,
    /// Wall-clock delta fed to each frame.
    pub frame_dt: f64,
}

impl Default for TrainingLimits {
    fn default() -> Self {
        Self {
            generations: Some(10),
            seconds: None,
            frame_dt: 1.0 / 60.0,
        }
    }
}

/// Result of [`run_training`], printable as JSON.
#[derive(Debug, Clone, Serialize)]
pub struct TrainingSummary {
    pub track: String,
    pub iteration: u64,
    pub generations: u64,
    pub frames: u64,
    pub simulated_seconds: f64,
    pub best_score: Option<f32>,
    pub champion_score: Option<f32>,
    pub champion_track: Option<String>,
    pub perception_failures: usize,
    pub cars: Vec<CarTelemetry>,
}

/// Drive `sim` on `track` frame by frame until a limit is reached.
pub fn run_training(
    sim: &mut Simulation,
    track: &str,
    limits: TrainingLimits,
) -> Result<TrainingSummary> {
    if limits.generations.is_none() && limits.seconds.is_none() {
        bail!("training needs a generation or time limit");
    }
    if !(limits.frame_dt.is_finite() && limits.frame_dt > 0.0) {
        bail!("frame delta must be positive, got {}", limits.frame_dt);
    }

    let started_at = sim.now();
    if sim.active_track() != Some(track) || sim.car_count() == 0 {
        sim.next_generation(track, true)
            .with_context(|| format!("failed to start training on `{track}`"))?;
    }

    let mut generations = 0;
    let mut frames = 0;
    let mut perception_failures = 0;
    loop {
        if limits.generations.is_some_and(|limit| generations >= limit) {
            break;
        }
        if limits
            .seconds
            .is_some_and(|limit| sim.now() - started_at >= limit)
        {
            break;
        }

        let mut report = sim.tick(limits.frame_dt);
        frames += 1;
        perception_failures += report.perception_failed;
        if !sim.config().auto_advance && generation_ended(sim) {
            let outcome = sim
                .next_generation(track, false)
                .with_context(|| format!("failed to advance generation on `{track}`"))?;
            report.generation = Some(outcome);
        }
        for (id, reason) in &report.ended {
            if let Some(car) = sim.car(*id) {
                debug!(car = %car.name(), reason = reason.describe(), "car finished its run");
            }
        }
        if let Some(GenerationOutcome::Advanced {
            iteration,
            best_score,
            ..
        }) = report.generation
        {
            generations += 1;
            info!(
                iteration,
                best_score = ?best_score,
                simulated = sim.now() - started_at,
                "generation complete"
            );
        }
    }

    let champion = sim.trainer().champion();
    Ok(TrainingSummary {
        track: track.to_string(),
        iteration: sim.trainer().iteration,
        generations,
        frames,
        simulated_seconds: sim.now() - started_at,
        best_score: sim.trainer().best_score(track),
        champion_score: champion.map(|champion| champion.score),
        champion_track: champion.map(|champion| champion.track.clone()),
        perception_failures,
        cars: sim.telemetry(),
    })
}

fn generation_ended(sim: &Simulation) -> bool {
    sim.cars()
        .filter(|(_, car)| !car.is_manual())
        .all(|(_, car)| !car.is_racing())
}
