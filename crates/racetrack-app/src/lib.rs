//! Shared application plumbing for the `racetrack` CLI.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use racetrack_core::{
    NullStore, SimulationConfig, Track, TrackDefinition, TrackRegistry, TrainerStore,
};
use racetrack_storage::DuckDbStore;

pub mod overlay;
pub mod training;

pub use overlay::{overlay_color, render_overlay};
pub use training::{TrainingLimits, TrainingSummary, run_training};

/// Read a JSON config file (missing fields take defaults), then apply the seed override.
pub fn load_config(path: Option<&Path>, seed: Option<u64>) -> Result<SimulationConfig> {
    let mut config = match path {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            serde_json::from_str::<SimulationConfig>(&text)
                .with_context(|| format!("failed to parse config {}", path.display()))?
        }
        None => SimulationConfig::default(),
    };
    if seed.is_some() {
        config.rng_seed = seed;
    }
    config.validate().context("invalid simulation config")?;
    Ok(config)
}

/// Built-in tracks plus any track definitions read from JSON files.
pub fn load_tracks(extra: &[PathBuf]) -> Result<TrackRegistry> {
    let mut tracks = TrackRegistry::builtin().context("failed to build the built-in tracks")?;
    for path in extra {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read track {}", path.display()))?;
        let definition: TrackDefinition = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse track {}", path.display()))?;
        let track = Track::from_definition(definition)
            .with_context(|| format!("invalid track {}", path.display()))?;
        tracks.insert(track);
    }
    Ok(tracks)
}

/// DuckDB store at `path`, or a store that keeps nothing.
pub fn open_store(path: Option<&Path>) -> Result<Box<dyn TrainerStore>> {
    match path {
        Some(path) => Ok(Box::new(open_database(path)?)),
        None => Ok(Box::new(NullStore)),
    }
}

/// Trim the trainer database's write log to `keep` entries per key and optimize it.
///
/// The database must not be open elsewhere in the process.
pub fn compact_store(path: &Path, keep: usize) -> Result<usize> {
    let mut store = open_database(path)?;
    store
        .compact(keep)
        .with_context(|| format!("failed to compact trainer database {}", path.display()))
}

fn open_database(path: &Path) -> Result<DuckDbStore> {
    let path_str = path
        .to_str()
        .with_context(|| format!("database path {} is not valid UTF-8", path.display()))?;
    DuckDbStore::open(path_str)
        .with_context(|| format!("failed to open trainer database {path_str}"))
}
