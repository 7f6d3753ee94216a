use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use racetrack_app::{
    TrainingLimits, compact_store, load_config, load_tracks, open_store, render_overlay,
    run_training,
};
use racetrack_core::Simulation;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "racetrack",
    version,
    about = "Evolve neural-network drivers on 2D racetracks"
)]
struct Cli {
    /// JSON simulation config; missing fields take their defaults.
    #[arg(long, global = true, env = "RACETRACK_CONFIG")]
    config: Option<PathBuf>,

    /// Extra track definition files (JSON).
    #[arg(long = "track-file", global = true)]
    track_files: Vec<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the loaded tracks.
    Tracks,
    /// Run headless training and print a JSON summary.
    Train {
        /// Track to train on.
        #[arg(long, default_value = "basic")]
        track: String,
        /// Stop after this many generations.
        #[arg(long)]
        generations: Option<u64>,
        /// Stop after this many simulated seconds.
        #[arg(long)]
        seconds: Option<f64>,
        /// Frame delta in seconds.
        #[arg(long, default_value_t = 1.0 / 60.0)]
        dt: f64,
        /// Override the config RNG seed.
        #[arg(long)]
        seed: Option<u64>,
        /// DuckDB file used to restore and save trainer state.
        #[arg(long, env = "RACETRACK_DB")]
        db: Option<PathBuf>,
        /// Saved snapshots kept per key when compacting the database after training.
        #[arg(long, default_value_t = 16)]
        keep_history: usize,
        /// Write a mask overlay of the first car (footprint and sensor rays) as PNG.
        #[arg(long)]
        overlay: Option<PathBuf>,
    },
    /// Export a track's decorative image as PNG.
    Render {
        /// Track to render.
        track: String,
        /// Output file.
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = match &cli.command {
        Command::Train { seed, .. } => load_config(cli.config.as_deref(), *seed)?,
        _ => load_config(cli.config.as_deref(), None)?,
    };
    let tracks = load_tracks(&cli.track_files)?;

    match cli.command {
        Command::Tracks => {
            for track in tracks.iter() {
                println!(
                    "{:<12} {}x{} road {}",
                    track.name(),
                    track.width(),
                    track.height(),
                    track.road_thickness()
                );
            }
        }
        Command::Render { track, output } => {
            let track = tracks
                .get(&track)
                .with_context(|| format!("unknown track `{track}`"))?;
            let png = track.encode_png().context("failed to render track image")?;
            fs::write(&output, png)
                .with_context(|| format!("failed to write {}", output.display()))?;
            info!(track = %track.name(), path = %output.display(), "wrote track image");
        }
        Command::Train {
            track,
            generations,
            seconds,
            dt,
            seed: _,
            db,
            keep_history,
            overlay,
        } => {
            if tracks.get(&track).is_none() {
                bail!("unknown track `{track}`");
            }
            let store = open_store(db.as_deref())?;
            let mut sim = Simulation::new(config, tracks)
                .context("failed to build simulation")?
                .with_store(store);
            if db.is_some() && !sim.restore().context("failed to restore trainer state")? {
                info!("no stored trainer state; starting fresh");
            }

            let limits = TrainingLimits {
                generations: if generations.is_none() && seconds.is_none() {
                    TrainingLimits::default().generations
                } else {
                    generations
                },
                seconds,
                frame_dt: dt,
            };
            info!(track = %track, ?limits, "starting training");
            let summary = run_training(&mut sim, &track, limits)?;

            if let Err(err) = sim.save() {
                warn!(error = %err, "failed to persist trainer state");
            }
            if let Some(path) = overlay {
                write_overlay(&sim, &path)?;
            }
            let json = serde_json::to_string_pretty(&summary).context("failed to encode summary")?;
            println!("{json}");

            // Release the store's connection before reopening the file.
            drop(sim);
            if let Some(path) = db {
                compact_store(&path, keep_history)?;
            }
        }
    }
    Ok(())
}

fn write_overlay(sim: &Simulation, path: &Path) -> Result<()> {
    let Some((id, _)) = sim.cars().next() else {
        warn!("no cars to draw an overlay for");
        return Ok(());
    };
    let raster = sim.sensor_overlay(id).context("failed to build overlay")?;
    let png = render_overlay(&raster)?
        .encode_png()
        .context("failed to encode overlay")?;
    fs::write(path, png).with_context(|| format!("failed to write {}", path.display()))?;
    info!(path = %path.display(), "wrote sensor overlay");
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
