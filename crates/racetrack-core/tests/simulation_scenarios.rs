use racetrack_brain::{Network, OUTPUT_SIZE, input_size};
use racetrack_core::{
    CarPhase, EndReason, GenerationOutcome, MemoryStore, PopulationCounts, Simulation,
    SimulationConfig, Track, TrackDefinition, TrackRegistry,
};
use racetrack_raster::PathSegment;

fn scenario_config() -> SimulationConfig {
    SimulationConfig {
        rng_seed: Some(0x5EED),
        auto_advance: false,
        hidden_layers: Vec::new(),
        population: PopulationCounts {
            global_best: 2,
            track_best: 2,
            track_random: 2,
        },
        ..SimulationConfig::default()
    }
}

/// Single-layer policy that always outputs full throttle and no steering.
fn full_throttle(config: &SimulationConfig) -> Network {
    let inputs = input_size(config.sensors.len());
    let mut throttle = vec![0.0; inputs + 1];
    throttle[inputs] = 1.0;
    let steering = vec![0.0; inputs + 1];
    Network::new(inputs, Vec::new(), OUTPUT_SIZE, vec![vec![throttle, steering]])
        .expect("throttle network")
}

/// A short straight road whose start point sits on the grass below it.
fn offroad_start() -> Track {
    Track::from_definition(TrackDefinition {
        name: "offroad".to_string(),
        width: 300,
        height: 200,
        path: vec![
            PathSegment::MoveTo { x: 50.0, y: 50.0 },
            PathSegment::LineTo { x: 250.0, y: 50.0 },
        ],
        road_thickness: 40.0,
        lane_marking_thickness: 4.0,
        start: (150.0, 150.0),
        start_direction: (1.0, 0.0),
    })
    .expect("offroad track")
}

#[test]
fn full_throttle_car_drives_straight_until_it_leaves_the_road() {
    let config = scenario_config();
    let network = full_throttle(&config);
    let mut sim =
        Simulation::new(config.clone(), TrackRegistry::builtin().expect("tracks")).expect("sim");
    let id = sim.spawn_car("straight", Some(network)).expect("spawn");
    sim.place_car(id, "basic").expect("place");
    let (_, start_y) = sim.car(id).expect("car").position();

    let mut last_odometer = 0.0;
    let mut peak_speed: f32 = 0.0;
    for _ in 0..2_000 {
        sim.tick(1.0 / 60.0);
        let car = sim.car(id).expect("car");
        assert!(car.odometer() >= last_odometer, "odometer went backwards");
        last_odometer = car.odometer();
        assert_eq!(car.heading(), 0.0);
        assert_eq!(car.position().1, start_y);
        assert!(car.speed() <= config.max_acceleration / config.friction + 1e-3);
        peak_speed = peak_speed.max(car.speed());
        if !car.is_racing() {
            break;
        }
    }

    let car = sim.car(id).expect("car");
    assert_eq!(car.phase(), CarPhase::Ended(EndReason::OffTrack));
    assert!(car.position().0 > 700.0 && car.position().0 < 900.0);
    assert!(car.start_time().is_some(), "start line crossing starts the clock");
    assert!(peak_speed > 100.0, "peak speed {peak_speed}");
    let score = car.score(sim.now(), sim.config());
    assert!(score.collided);
    assert!(!score.success);
    assert!(score.score > 10.0);
}

#[test]
fn off_track_is_detected_on_the_first_refresh_and_not_before() {
    let mut sim = Simulation::new(scenario_config(), TrackRegistry::new()).expect("sim");
    sim.add_track(offroad_start());
    let id = sim.spawn_car("lost", None).expect("spawn");
    sim.place_car(id, "offroad").expect("place");

    let report = sim.tick(0.0);
    assert_eq!(report.steps, 0);
    assert!(sim.car(id).expect("car").is_racing());

    let report = sim.tick(1.0 / 60.0);
    assert_eq!(report.perception_applied, 1);
    assert_eq!(report.ended, vec![(id, EndReason::OffTrack)]);
    let car = sim.car(id).expect("car");
    assert!(car.collided());
    assert_eq!(car.end_time(), Some(sim.now()));
}

#[test]
fn finished_generation_advances_automatically() {
    let config = SimulationConfig {
        auto_advance: true,
        ..scenario_config()
    };
    let mut sim = Simulation::new(config, TrackRegistry::new()).expect("sim");
    sim.add_track(offroad_start());
    sim.next_generation("offroad", true).expect("first generation");

    let report = sim.tick(1.0 / 60.0);
    assert_eq!(
        report.generation,
        Some(GenerationOutcome::Advanced {
            iteration: 2,
            population: 6,
            best_score: Some(0.0),
        })
    );
    assert!(sim.cars().all(|(_, car)| car.is_racing()));
    assert!(sim.car_by_name("ai-2-0").is_some());
    assert!(sim.car_by_name("ai-1-0").is_none());
}

#[test]
fn next_generation_is_a_no_op_while_cars_race() {
    let mut sim =
        Simulation::new(scenario_config(), TrackRegistry::builtin().expect("tracks")).expect("sim");
    sim.next_generation("basic", false).expect("first generation");
    let before: Vec<String> = sim.cars().map(|(_, car)| car.name().to_string()).collect();

    let outcome = sim.next_generation("basic", false).expect("second call");
    assert_eq!(outcome, GenerationOutcome::Pending);
    let after: Vec<String> = sim.cars().map(|(_, car)| car.name().to_string()).collect();
    assert_eq!(before, after);
    assert_eq!(sim.trainer().iteration, 1);
}

#[test]
fn population_matches_configured_counts() {
    for manual_control in [false, true] {
        let config = SimulationConfig {
            manual_control,
            ..scenario_config()
        };
        let expected = config.population.total() + usize::from(manual_control);
        let mut sim =
            Simulation::new(config, TrackRegistry::builtin().expect("tracks")).expect("sim");
        for _ in 0..3 {
            let outcome = sim.next_generation("oval", true).expect("generation");
            let GenerationOutcome::Advanced { population, .. } = outcome else {
                panic!("forced generation must advance");
            };
            assert_eq!(population, expected);
            assert_eq!(sim.car_count(), expected);
            for _ in 0..10 {
                sim.tick(1.0 / 30.0);
            }
        }
    }
}

#[test]
fn track_record_never_decreases_across_generations() {
    let config = SimulationConfig {
        hidden_layers: vec![6],
        ..scenario_config()
    };
    let mut sim = Simulation::new(config, TrackRegistry::builtin().expect("tracks"))
        .expect("sim")
        .with_store(Box::new(MemoryStore::new()));
    sim.next_generation("basic", true).expect("first generation");

    let mut best = f32::NEG_INFINITY;
    for _ in 0..6 {
        for _ in 0..45 {
            sim.tick(1.0 / 30.0);
        }
        let outcome = sim.next_generation("basic", true).expect("generation");
        let GenerationOutcome::Advanced { best_score, .. } = outcome else {
            panic!("forced generation must advance");
        };
        let score = best_score.expect("record after a finalized generation");
        assert!(score >= best, "record dropped from {best} to {score}");
        best = score;
        let champion = sim.trainer().champion().expect("champion");
        assert!(champion.score >= score);
    }
}
