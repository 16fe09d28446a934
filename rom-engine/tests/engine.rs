//! End-to-end behaviour of the unified engine.

use approx::{assert_abs_diff_eq, assert_relative_eq};
use faer::Mat;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Normal, StandardNormal};
use rom_engine::*;

fn random_snapshots(n_dofs: usize, n_time: usize, seed: u64) -> Mat<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let values: Vec<f64> = (0..n_dofs * n_time).map(|_| rng.sample(StandardNormal)).collect();
    Mat::from_fn(n_dofs, n_time, |i, j| values[i + j * n_dofs])
}

fn uniform_times(n: usize, dt: f64) -> Vec<f64> {
    (0..n).map(|t| t as f64 * dt).collect()
}

/// Two standing waves with incommensurate frequencies.
fn standing_waves(n_dofs: usize, n_time: usize, dt: f64) -> Mat<f64> {
    Mat::from_fn(n_dofs, n_time, |i, t| {
        let s = i as f64 / n_dofs as f64;
        let time = t as f64 * dt;
        (std::f64::consts::PI * s).sin() * (2.0 * time).cos()
            + 0.4 * (2.0 * std::f64::consts::PI * s).cos() * (5.0 * time).sin()
    })
}

fn assert_same_forecast(a: &Mat<f64>, b: &Mat<f64>) {
    assert_eq!((a.nrows(), a.ncols()), (b.nrows(), b.ncols()));
    for j in 0..a.ncols() {
        for i in 0..a.nrows() {
            assert_abs_diff_eq!(a[(i, j)], b[(i, j)], epsilon = 1e-12);
        }
    }
}

fn engine_config() -> RomConfig {
    RomConfig {
        min_modes: 1,
        max_modes: 10,
        worker_threads: Some(2),
        ..Default::default()
    }
}

// ============================================================================
// Performance scoring
// ============================================================================

#[test]
fn compression_ratio_of_200_by_50() {
    let x = random_snapshots(200, 50, 11);
    let mut engine = UnifiedRomEngine::new(RomConfig {
        min_modes: 10,
        max_modes: 10,
        rank_truncation: Some(10),
        ..engine_config()
    })
    .unwrap();
    let result = engine.train_unified_rom(&x, &uniform_times(50, 0.1)).unwrap();
    assert_eq!(result.pod_modes, 10);
    assert_eq!(result.dmd_modes, 10);

    let expected = (200.0 * 50.0) / (200.0 * 10.0 + 10.0 + 200.0 + 10.0 * 200.0 + 10.0 + 10.0);
    assert!(result.performance.compression_ratio > 1.0);
    assert_relative_eq!(result.performance.compression_ratio, expected, max_relative = 1e-12);
    assert_relative_eq!(
        result.performance.memory_reduction,
        (1.0 - 1.0 / expected) * 100.0,
        max_relative = 1e-12
    );
    assert_relative_eq!(result.performance.computation_speedup, 400.0, max_relative = 1e-12);
}

#[test]
fn evaluate_clamps_accuracy() {
    let x = standing_waves(20, 30, 0.1);
    let mut engine = UnifiedRomEngine::new(engine_config()).unwrap();
    engine.train_unified_rom(&x, &uniform_times(30, 0.1)).unwrap();
    let pod = engine.pod().modes().unwrap();
    let dmd = engine.dmd().modes().unwrap();

    let perf = evaluate_rom_performance(&x, pod, dmd, 1.7);
    assert_abs_diff_eq!(perf.accuracy_percentage, 0.0);
    let perf = evaluate_rom_performance(&x, pod, dmd, 0.25);
    assert_abs_diff_eq!(perf.accuracy_percentage, 75.0, epsilon = 1e-12);
}

#[test]
fn time_vector_is_validated() {
    let x = standing_waves(10, 20, 0.1);
    let mut engine = UnifiedRomEngine::new(engine_config()).unwrap();
    assert!(matches!(
        engine.train_unified_rom(&x, &uniform_times(19, 0.1)),
        Err(RomError::InvalidInput(_))
    ));
    let mut times = uniform_times(20, 0.1);
    times.swap(3, 4);
    assert!(engine.train_unified_rom(&x, &times).is_err());
    assert!(!engine.is_trained());
}

// ============================================================================
// Prediction and caching
// ============================================================================

#[test]
fn repeated_prediction_is_cached_and_identical() {
    let x = standing_waves(40, 80, 0.05);
    let mut engine = UnifiedRomEngine::new(engine_config()).unwrap();
    engine.train_unified_rom(&x, &uniform_times(80, 0.05)).unwrap();

    let mut params = PredictionParameters::new();
    params.insert(INITIAL_AMPLITUDE.to_string(), 1.2);
    params.insert("reynolds".to_string(), 150.0);

    let first = engine.predict_with_unified_rom(&params, 25, 0.05).unwrap();
    let second = engine.predict_with_unified_rom(&params, 25, 0.05).unwrap();
    assert!(!first.cached);
    assert!(second.cached);
    assert_eq!(first.prediction, second.prediction);
    assert!(second.pod_contribution && second.dmd_contribution);
    assert_eq!(engine.cache_len(), 1);

    let longer = engine.predict_with_unified_rom(&params, 26, 0.05).unwrap();
    assert!(!longer.cached);
    assert_eq!(engine.cache_len(), 2);

    engine.clear_cache();
    assert_eq!(engine.cache_len(), 0);
    let again = engine.predict_with_unified_rom(&params, 25, 0.05).unwrap();
    assert!(!again.cached);
    assert_same_forecast(&again.prediction, &first.prediction);
}

#[test]
fn fused_prediction_weights_both_forecasts() {
    let x = standing_waves(30, 60, 0.05);
    let mut engine = UnifiedRomEngine::new(engine_config()).unwrap();
    engine.train_unified_rom(&x, &uniform_times(60, 0.05)).unwrap();

    let result = engine
        .predict_with_unified_rom(&PredictionParameters::new(), 8, 0.05)
        .unwrap();
    assert!(result.pod_contribution && result.dmd_contribution);

    let pod = engine.pod().forecast(8, 1, 1.0).unwrap();
    let dmd = engine.dmd().predict_future_states(8, 0.05, None).unwrap();
    for j in 0..8 {
        for i in 0..30 {
            assert_abs_diff_eq!(
                result.prediction[(i, j)],
                POD_WEIGHT * pod[(i, j)] + DMD_WEIGHT * dmd[(i, j)],
                epsilon = 1e-12
            );
        }
    }
}

#[test]
fn dmd_only_when_pod_forecast_fails() {
    // two snapshots are too short a trajectory for the POD forecast
    let x = standing_waves(12, 2, 0.1);
    let mut engine = UnifiedRomEngine::new(engine_config()).unwrap();
    engine.train_unified_rom(&x, &[0.0, 0.1]).unwrap();

    let result = engine
        .predict_with_unified_rom(&PredictionParameters::new(), 4, 0.1)
        .unwrap();
    assert!(!result.pod_contribution);
    assert!(result.dmd_contribution);

    let dmd = engine.dmd().predict_future_states(4, 0.1, None).unwrap();
    assert_same_forecast(&result.prediction, &dmd);

    // a cache hit reports how the stored forecast was built
    let hit = engine
        .predict_with_unified_rom(&PredictionParameters::new(), 4, 0.1)
        .unwrap();
    assert!(hit.cached);
    assert!(!hit.pod_contribution);
    assert!(hit.dmd_contribution);
}

/// Mean-free rotation of two spatial shapes, 20 samples per period.
fn rotating_field(n_dofs: usize, n_time: usize) -> Mat<f64> {
    let theta = 2.0 * std::f64::consts::PI / 20.0;
    Mat::from_fn(n_dofs, n_time, |i, k| {
        let s = i as f64 / n_dofs as f64;
        let phase = theta * k as f64;
        (std::f64::consts::PI * s).sin() * phase.cos()
            + (2.0 * std::f64::consts::PI * s).sin() * phase.sin()
    })
}

#[test]
fn prediction_dt_keeps_training_time_grid() {
    // two full periods, so the field is exactly linear in POD coordinates
    let x = rotating_field(20, 40);
    let truth = rotating_field(20, 50);
    let mut engine = UnifiedRomEngine::new(engine_config()).unwrap();
    engine.train_unified_rom(&x, &uniform_times(40, 0.1)).unwrap();
    let params = PredictionParameters::new();

    let coarse = engine.predict_with_unified_rom(&params, 6, 0.2).unwrap();
    let native = engine.predict_with_unified_rom(&params, 6, 0.1).unwrap();
    assert!(coarse.pod_contribution && coarse.dmd_contribution);
    assert!(!coarse.cached && !native.cached);

    // POD and DMD both advance one training step per column
    let pod = engine.pod().forecast(6, 1, 1.0).unwrap();
    let dmd = engine.dmd().predict_future_states(6, 0.2, None).unwrap();
    for t in 0..6 {
        for i in 0..20 {
            assert_abs_diff_eq!(pod[(i, t)], truth[(i, t + 1)], epsilon = 1e-8);
            assert_abs_diff_eq!(dmd[(i, t)], truth[(i, t + 1)], epsilon = 1e-8);
            assert_abs_diff_eq!(coarse.prediction[(i, t)], truth[(i, t + 1)], epsilon = 1e-8);
        }
    }
    assert_same_forecast(&coarse.prediction, &native.prediction);
}

#[test]
fn time_delay_strides_both_forecasts() {
    let x = rotating_field(20, 40);
    let truth = rotating_field(20, 50);
    let mut engine = UnifiedRomEngine::new(RomConfig {
        time_delay: 2,
        ..engine_config()
    })
    .unwrap();
    engine.train_unified_rom(&x, &uniform_times(40, 0.1)).unwrap();

    let result = engine
        .predict_with_unified_rom(&PredictionParameters::new(), 4, 0.1)
        .unwrap();
    assert!(result.pod_contribution && result.dmd_contribution);
    assert_abs_diff_eq!(engine.dmd().step(), 0.2, epsilon = 1e-12);
    // column t-1 is two training steps per column ahead of the first snapshot
    for t in 1..=4 {
        for i in 0..20 {
            assert_abs_diff_eq!(result.prediction[(i, t - 1)], truth[(i, 2 * t)], epsilon = 1e-8);
        }
    }
}

#[test]
fn explicit_unit_amplitude_matches_default() {
    let x = standing_waves(30, 60, 0.05);
    let mut engine = UnifiedRomEngine::new(engine_config()).unwrap();
    engine.train_unified_rom(&x, &uniform_times(60, 0.05)).unwrap();

    let base = engine
        .predict_with_unified_rom(&PredictionParameters::new(), 5, 0.05)
        .unwrap();
    let mut params = PredictionParameters::new();
    params.insert(INITIAL_AMPLITUDE.to_string(), 1.0);
    let explicit = engine.predict_with_unified_rom(&params, 5, 0.05).unwrap();
    // different fingerprint, same forecast
    assert!(!explicit.cached);
    for j in 0..5 {
        for i in 0..30 {
            assert_abs_diff_eq!(
                explicit.prediction[(i, j)],
                base.prediction[(i, j)],
                epsilon = 1e-12
            );
        }
    }

    params.insert(INITIAL_AMPLITUDE.to_string(), 2.0);
    let doubled = engine.predict_with_unified_rom(&params, 5, 0.05).unwrap();
    let differs = (0..30).any(|i| (doubled.prediction[(i, 0)] - base.prediction[(i, 0)]).abs() > 1e-6);
    assert!(differs);
}

// ============================================================================
// Persistence and lifecycle
// ============================================================================

#[test]
fn save_and_load_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rom.json");
    let x = standing_waves(25, 50, 0.05);

    let mut engine = UnifiedRomEngine::new(engine_config()).unwrap();
    engine.train_unified_rom(&x, &uniform_times(50, 0.05)).unwrap();
    let params = PredictionParameters::new();
    let original = engine.predict_with_unified_rom(&params, 10, 0.05).unwrap();
    engine.save_rom_model(&path).unwrap();

    let mut restored = UnifiedRomEngine::new(RomConfig {
        max_modes: 3,
        ..engine_config()
    })
    .unwrap();
    restored.load_rom_model(&path).unwrap();
    assert!(restored.is_trained());
    assert_eq!(restored.config().max_modes, 10);
    assert_eq!(restored.pod().n_modes(), engine.pod().n_modes());
    assert_eq!(restored.pod().n_snapshots(), 50);
    assert_relative_eq!(
        restored.performance().unwrap().compression_ratio,
        engine.performance().unwrap().compression_ratio,
        max_relative = 1e-12
    );

    let reloaded = restored.predict_with_unified_rom(&params, 10, 0.05).unwrap();
    assert!(!reloaded.cached);
    for j in 0..10 {
        for i in 0..25 {
            assert_abs_diff_eq!(
                reloaded.prediction[(i, j)],
                original.prediction[(i, j)],
                epsilon = 1e-10
            );
        }
    }
}

#[test]
fn archive_of_untrained_engine() {
    let engine = UnifiedRomEngine::new(engine_config()).unwrap();
    let archive = engine.to_archive();
    assert!(!archive.is_trained);
    assert!(archive.pod.is_none() && archive.dmd.is_none());

    let copy = UnifiedRomEngine::from_archive(archive).unwrap();
    assert!(!copy.is_trained());
}

#[test]
fn inconsistent_archive_rejected() {
    let x = standing_waves(10, 20, 0.1);
    let mut engine = UnifiedRomEngine::new(engine_config()).unwrap();
    engine.train_unified_rom(&x, &uniform_times(20, 0.1)).unwrap();
    let mut archive = engine.to_archive();
    archive.dmd = None;
    assert!(engine.restore_archive(archive).is_err());
    // the engine keeps serving its own model
    assert!(engine.is_trained());
    assert!(engine.dmd().is_trained());
}

#[test]
fn shutdown_releases_everything() {
    let x = standing_waves(10, 20, 0.1);
    let mut engine = UnifiedRomEngine::new(engine_config()).unwrap();
    engine.train_unified_rom(&x, &uniform_times(20, 0.1)).unwrap();
    engine
        .predict_with_unified_rom(&PredictionParameters::new(), 3, 0.1)
        .unwrap();
    assert_eq!(engine.cache_len(), 1);

    engine.shutdown();
    assert_eq!(engine.cache_len(), 0);
    engine.shutdown();
    assert!(matches!(
        engine.stream_snapshot(&[0.0; 10]),
        Err(RomError::Shutdown)
    ));
}

#[test]
fn streamed_batch_invalidates_cached_forecasts() {
    let x = standing_waves(16, 40, 0.05);
    let mut engine = UnifiedRomEngine::new(RomConfig {
        adaptation_frequency: 2,
        ..engine_config()
    })
    .unwrap();
    engine.train_unified_rom(&x, &uniform_times(40, 0.05)).unwrap();
    let params = PredictionParameters::new();
    engine.predict_with_unified_rom(&params, 4, 0.05).unwrap();

    let snap: Vec<f64> = (0..16).map(|i| x[(i, 5)]).collect();
    assert!(engine.stream_snapshot(&snap).unwrap().is_none());
    assert!(engine.predict_with_unified_rom(&params, 4, 0.05).unwrap().cached);
    assert!(engine.stream_snapshot(&snap).unwrap().is_some());
    assert!(!engine.predict_with_unified_rom(&params, 4, 0.05).unwrap().cached);
}

#[test]
fn concurrent_predictions_share_cache() {
    let x = standing_waves(20, 40, 0.05);
    let mut engine = UnifiedRomEngine::new(engine_config()).unwrap();
    engine.train_unified_rom(&x, &uniform_times(40, 0.05)).unwrap();
    let params = PredictionParameters::new();

    let results: Vec<PredictionResult> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| scope.spawn(|| engine.predict_with_unified_rom(&params, 6, 0.05).unwrap()))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    for r in &results[1..] {
        assert_same_forecast(&r.prediction, &results[0].prediction);
    }
    assert_eq!(engine.cache_len(), 1);
}

// ============================================================================
// Scenario: three superposed sinusoids
// ============================================================================

#[test]
fn three_sinusoids_recovered_by_energy() {
    let n_dofs = 2000;
    let n_time = 200;
    let duration = 10.0;
    let dt = duration / (n_time - 1) as f64;
    // frequency (Hz), amplitude
    let components = [(0.5, 3.0), (2.0, 2.0), (1.5, 1.0)];

    let mut rng = StdRng::seed_from_u64(2024);
    let mut unit_vector = || {
        let v: Vec<f64> = (0..n_dofs).map(|_| rng.sample(StandardNormal)).collect();
        let norm = v.iter().map(|x| x * x).sum::<f64>().sqrt();
        v.into_iter().map(|x| x / norm).collect::<Vec<f64>>()
    };
    let shapes: Vec<(Vec<f64>, Vec<f64>)> = components
        .iter()
        .map(|_| (unit_vector(), unit_vector()))
        .collect();

    let times = uniform_times(n_time, dt);
    let clean = Mat::from_fn(n_dofs, n_time, |i, t| {
        components
            .iter()
            .zip(&shapes)
            .map(|(&(f, a), (cos_shape, sin_shape))| {
                let phase = 2.0 * std::f64::consts::PI * f * times[t];
                a * (cos_shape[i] * phase.cos() + sin_shape[i] * phase.sin())
            })
            .sum::<f64>()
    });
    let rms = (0..n_time)
        .flat_map(|t| (0..n_dofs).map(move |i| (t, i)))
        .map(|(t, i)| clean[(i, t)].powi(2))
        .sum::<f64>()
        .sqrt()
        / ((n_dofs * n_time) as f64).sqrt();
    let noise = Normal::new(0.0, 0.01 * rms).unwrap();
    let noisy: Vec<f64> = (0..n_dofs * n_time).map(|_| rng.sample(noise)).collect();
    let x = Mat::from_fn(n_dofs, n_time, |i, t| clean[(i, t)] + noisy[i + t * n_dofs]);

    let mut engine = UnifiedRomEngine::new(RomConfig {
        worker_threads: Some(2),
        ..Default::default()
    })
    .unwrap();
    engine.train_unified_rom(&x, &times).unwrap();

    let dominant = engine.dmd().get_dominant_modes(3);
    assert_eq!(dominant.len(), 3);
    for (mode, &(f, _)) in dominant.iter().zip(&components) {
        let rel = (mode.frequency_hz - f).abs() / f;
        assert!(rel < 0.05, "expected {f} Hz, found {} Hz", mode.frequency_hz);
    }
    for w in dominant.windows(2) {
        assert!(w[0].energy >= w[1].energy);
    }
}
