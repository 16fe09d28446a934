//! Unified ROM example: train POD + DMD on a synthetic field and forecast.

use rom_engine::{PredictionParameters, RomConfig, RomError, UnifiedRomEngine, INITIAL_AMPLITUDE};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), RomError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("rom_engine=info".parse().unwrap()))
        .init();

    // Two travelling waves on 500 grid points, 300 snapshots
    let (n_dofs, n_time, dt) = (500, 300, 0.02);
    let times: Vec<f64> = (0..n_time).map(|t| t as f64 * dt).collect();
    let snapshots = faer::Mat::from_fn(n_dofs, n_time, |i, t| {
        let x = i as f64 / n_dofs as f64;
        let time = times[t];
        (2.0 * std::f64::consts::PI * (x - 0.8 * time)).sin()
            + 0.4 * (6.0 * std::f64::consts::PI * (x + 1.5 * time)).cos()
    });

    let config = RomConfig {
        min_modes: 2,
        max_modes: 20,
        ..Default::default()
    };
    let mut engine = UnifiedRomEngine::new(config)?;

    let training = engine.train_unified_rom(&snapshots, &times)?;
    println!("Training");
    println!("  POD modes: {}", training.pod_modes);
    println!("  DMD modes: {}", training.dmd_modes);
    println!("  Compression ratio: {:.2}", training.performance.compression_ratio);
    println!("  Accuracy: {:.4}%", training.performance.accuracy_percentage);
    println!("  Memory: {:.3} MB", training.memory_usage_mb);
    println!("  Time: {:.3} s", training.training_time);

    println!("\nDominant DMD modes:");
    for m in engine.dmd().get_dominant_modes(4) {
        println!(
            "  #{}: f={:.4} Hz, growth={:+.2e}, energy={:.3}, {}",
            m.index, m.frequency_hz, m.growth_rate, m.energy, m.stability
        );
    }

    let mut params = PredictionParameters::new();
    params.insert(INITIAL_AMPLITUDE.to_string(), 1.0);
    let first = engine.predict_with_unified_rom(&params, 50, dt)?;
    let second = engine.predict_with_unified_rom(&params, 50, dt)?;
    println!("\nForecast 50 steps");
    println!(
        "  Contributions: POD={}, DMD={}",
        first.pod_contribution, first.dmd_contribution
    );
    println!("  First call: {:.4} s (cached={})", first.prediction_time, first.cached);
    println!("  Second call: {:.6} s (cached={})", second.prediction_time, second.cached);
    println!("  x[0]: {:.4} -> {:.4}", first.prediction[(0, 0)], first.prediction[(0, 49)]);

    let stats = engine.get_comprehensive_statistics();
    println!("\nStatistics:");
    println!("{}", serde_json::to_string_pretty(&stats)?);

    engine.shutdown();
    Ok(())
}
