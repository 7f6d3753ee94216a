//! Generational replacement: score records and offspring breeding.

use ordered_float::OrderedFloat;
use racetrack_brain::{Network, NetworkError, OUTPUT_SIZE, input_size};
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::{MutationTuning, PopulationCounts, SimulationConfig};

/// Store key under which [`TrainerState`] is persisted.
pub const TRAINER_STATE_KEY: &str = "trainer_state";

/// Layer sizes every policy in a population shares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub inputs: usize,
    pub hidden: Vec<usize>,
    pub outputs: usize,
}

impl Topology {
    #[must_use]
    pub fn from_config(config: &SimulationConfig) -> Self {
        Self {
            inputs: input_size(config.sensors.len()),
            hidden: config.hidden_layers.clone(),
            outputs: OUTPUT_SIZE,
        }
    }

    #[must_use]
    pub fn matches(&self, network: &Network) -> bool {
        network.input_count() == self.inputs
            && network.hidden() == self.hidden.as_slice()
            && network.output_count() == self.outputs
    }

    pub fn random_network(&self, rng: &mut dyn RngCore) -> Result<Network, NetworkError> {
        Network::random(self.inputs, self.hidden.clone(), self.outputs, rng)
    }
}

/// Best network seen on any track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChampionRecord {
    pub track: String,
    pub score: f32,
    pub network: Network,
}

/// Best network seen on one track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackRecord {
    pub score: f32,
    pub network: Network,
}

/// Which record, if any, a finalized run improved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordUpdate {
    Unchanged,
    Track,
    Global,
}

/// Persistent trainer bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerState {
    pub champion: Option<ChampionRecord>,
    pub records: BTreeMap<String, TrackRecord>,
    pub population: PopulationCounts,
    pub mutation: MutationTuning,
    pub iteration: u64,
}

impl TrainerState {
    #[must_use]
    pub fn new(population: PopulationCounts, mutation: MutationTuning) -> Self {
        Self {
            champion: None,
            records: BTreeMap::new(),
            population,
            mutation,
            iteration: 0,
        }
    }

    #[must_use]
    pub fn from_config(config: &SimulationConfig) -> Self {
        Self::new(config.population, config.mutation)
    }

    #[must_use]
    pub fn champion(&self) -> Option<&ChampionRecord> {
        self.champion.as_ref()
    }

    #[must_use]
    pub fn record(&self, track: &str) -> Option<&TrackRecord> {
        self.records.get(track)
    }

    /// Best score recorded on `track`.
    #[must_use]
    pub fn best_score(&self, track: &str) -> Option<f32> {
        self.records.get(track).map(|record| record.score)
    }

    /// Fold one finalized run into the records.
    pub fn observe(&mut self, track: &str, score: f32, network: &Network) -> RecordUpdate {
        if !score.is_finite() {
            return RecordUpdate::Unchanged;
        }
        let global_best = self
            .champion
            .as_ref()
            .map_or(f32::NEG_INFINITY, |champion| champion.score);
        let track_record = TrackRecord {
            score,
            network: network.clone(),
        };
        if score > global_best {
            self.champion = Some(ChampionRecord {
                track: track.to_string(),
                score,
                network: network.clone(),
            });
            self.records.insert(track.to_string(), track_record);
            return RecordUpdate::Global;
        }
        if score > self.best_score(track).unwrap_or(f32::NEG_INFINITY) {
            self.records.insert(track.to_string(), track_record);
            return RecordUpdate::Track;
        }
        RecordUpdate::Unchanged
    }

    /// Drop records whose networks do not fit `topology`; returns how many were dropped.
    pub fn discard_incompatible(&mut self, topology: &Topology) -> usize {
        let mut dropped = 0;
        if self
            .champion
            .as_ref()
            .is_some_and(|champion| !topology.matches(&champion.network))
        {
            self.champion = None;
            dropped += 1;
        }
        let before = self.records.len();
        self.records
            .retain(|_, record| topology.matches(&record.network));
        dropped + (before - self.records.len())
    }
}

/// A finished run from the generation being replaced.
#[derive(Debug, Clone)]
pub struct Finalized {
    pub score: f32,
    pub network: Network,
}

/// Sort best-first.
pub fn rank(generation: &mut [Finalized]) {
    generation.sort_by_key(|member| std::cmp::Reverse(OrderedFloat(member.score)));
}

/// Produce the next generation's policies from a ranked generation.
///
/// Offspring come from three sources, in order: the global champion, this
/// generation's top scorer, and one random member. Each falls back to the
/// previous source when unavailable. The first champion clone is exact when
/// the champion was not beaten (or there was nobody to beat it).
pub fn breed(
    state: &TrainerState,
    ranked: &[Finalized],
    topology: &Topology,
    rng: &mut dyn RngCore,
) -> Result<Vec<Network>, NetworkError> {
    let champion = match state
        .champion
        .as_ref()
        .filter(|champion| topology.matches(&champion.network))
    {
        Some(champion) => Finalized {
            score: champion.score,
            network: champion.network.clone(),
        },
        None => Finalized {
            score: 0.0,
            network: topology.random_network(rng)?,
        },
    };
    let top = ranked.first().unwrap_or(&champion);
    let random = if ranked.is_empty() {
        top
    } else {
        &ranked[rng.random_range(0..ranked.len())]
    };
    let keep_champion = ranked.is_empty() || top.network == champion.network;

    let counts = state.population;
    let tuning = state.mutation;
    let mut offspring = Vec::with_capacity(counts.total());
    for index in 0..counts.global_best {
        let stdev = if index == 0 && keep_champion {
            0.0
        } else {
            tuning.stdev_for(champion.score)
        };
        offspring.push(champion.network.random_step(stdev, &mut *rng));
    }
    for (parent, count) in [(top, counts.track_best), (random, counts.track_random)] {
        let stdev = tuning.stdev_for(parent.score);
        for _ in 0..count {
            offspring.push(parent.network.random_step(stdev, &mut *rng));
        }
    }
    Ok(offspring)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{SeedableRng, rngs::SmallRng};

    fn topology() -> Topology {
        Topology {
            inputs: 6,
            hidden: vec![4],
            outputs: 2,
        }
    }

    fn state(global_best: usize, track_best: usize, track_random: usize) -> TrainerState {
        TrainerState::new(
            PopulationCounts {
                global_best,
                track_best,
                track_random,
            },
            MutationTuning::default(),
        )
    }

    #[test]
    fn empty_generation_breeds_from_a_fresh_network() {
        let mut rng = SmallRng::seed_from_u64(1);
        let trainer = state(3, 2, 2);
        let offspring = breed(&trainer, &[], &topology(), &mut rng).expect("breed");
        assert_eq!(offspring.len(), 7);
        assert!(offspring.iter().all(|network| topology().matches(network)));
        // First champion clone is exact; the rest are perturbed.
        assert_ne!(offspring[0], offspring[1]);
    }

    #[test]
    fn undefeated_champion_is_cloned_exactly() {
        let mut rng = SmallRng::seed_from_u64(2);
        let champion = topology().random_network(&mut rng).expect("network");
        let mut trainer = state(2, 1, 1);
        trainer.observe("basic", 50.0, &champion);
        let ranked = vec![
            Finalized {
                score: 50.0,
                network: champion.clone(),
            },
            Finalized {
                score: 10.0,
                network: topology().random_network(&mut rng).expect("network"),
            },
        ];
        let offspring = breed(&trainer, &ranked, &topology(), &mut rng).expect("breed");
        assert_eq!(offspring[0], champion);
        assert_ne!(offspring[1], champion);
    }

    #[test]
    fn beaten_champion_is_always_mutated() {
        let mut rng = SmallRng::seed_from_u64(3);
        let champion = topology().random_network(&mut rng).expect("network");
        let challenger = topology().random_network(&mut rng).expect("network");
        let mut trainer = state(1, 1, 0);
        trainer.observe("basic", 40.0, &champion);
        let ranked = vec![Finalized {
            score: 30.0,
            network: challenger.clone(),
        }];
        let offspring = breed(&trainer, &ranked, &topology(), &mut rng).expect("breed");
        assert_ne!(offspring[0], champion);
        assert_ne!(offspring[1], challenger);
        assert_eq!(offspring.len(), 2);
    }

    #[test]
    fn records_never_decrease() {
        let mut rng = SmallRng::seed_from_u64(4);
        let mut trainer = state(1, 1, 1);
        let mut best = f32::NEG_INFINITY;
        for _ in 0..100 {
            let score: f32 = rng.random_range(0.0..500.0);
            let network = topology().random_network(&mut rng).expect("network");
            let track = if rng.random::<bool>() { "basic" } else { "oval" };
            trainer.observe(track, score, &network);
            let global = trainer.champion().map(|c| c.score).expect("champion");
            assert!(global >= best);
            best = global;
            for record in trainer.records.values() {
                assert!(record.score <= global);
            }
        }
    }

    #[test]
    fn global_record_also_sets_track_record() {
        let mut rng = SmallRng::seed_from_u64(5);
        let network = topology().random_network(&mut rng).expect("network");
        let mut trainer = state(1, 1, 1);
        assert_eq!(trainer.observe("oval", 20.0, &network), RecordUpdate::Global);
        assert_eq!(trainer.observe("basic", 10.0, &network), RecordUpdate::Track);
        assert_eq!(trainer.observe("basic", 5.0, &network), RecordUpdate::Unchanged);
        assert_eq!(trainer.best_score("oval"), Some(20.0));
        assert_eq!(trainer.best_score("basic"), Some(10.0));
        assert_eq!(trainer.observe("basic", f32::NAN, &network), RecordUpdate::Unchanged);
    }

    #[test]
    fn ranking_is_descending() {
        let mut rng = SmallRng::seed_from_u64(6);
        let mut generation: Vec<Finalized> = [3.0, 9.0, 1.0, 7.0]
            .into_iter()
            .map(|score| Finalized {
                score,
                network: topology().random_network(&mut rng).expect("network"),
            })
            .collect();
        rank(&mut generation);
        let scores: Vec<f32> = generation.iter().map(|m| m.score).collect();
        assert_eq!(scores, vec![9.0, 7.0, 3.0, 1.0]);
    }

    #[test]
    fn incompatible_records_are_dropped() {
        let mut rng = SmallRng::seed_from_u64(7);
        let network = topology().random_network(&mut rng).expect("network");
        let mut trainer = state(1, 1, 1);
        trainer.observe("basic", 20.0, &network);
        let wider = Topology {
            inputs: 9,
            ..topology()
        };
        assert_eq!(trainer.discard_incompatible(&wider), 2);
        assert!(trainer.champion().is_none());
        assert!(trainer.records.is_empty());
    }

    #[test]
    fn state_round_trips_through_json() {
        let mut rng = SmallRng::seed_from_u64(8);
        let network = topology().random_network(&mut rng).expect("network");
        let mut trainer = state(1, 2, 3);
        trainer.observe("hairpin", 33.0, &network);
        trainer.iteration = 4;
        let value = serde_json::to_value(&trainer).expect("encode");
        let restored: TrainerState = serde_json::from_value(value).expect("decode");
        assert_eq!(restored, trainer);
    }
}
