//! Streaming POD example: build a basis, then feed snapshots one at a time.

use rom_engine::{IncrementalPod, RomConfig, RomError};
use tracing_subscriber::EnvFilter;

fn field(n_dofs: usize, t: usize) -> Vec<f64> {
    let time = t as f64 * 0.05;
    (0..n_dofs)
        .map(|i| {
            let x = i as f64 / n_dofs as f64;
            (std::f64::consts::PI * x).sin() * time.cos()
                + 0.5 * (3.0 * std::f64::consts::PI * x).sin() * (2.5 * time).sin()
        })
        .collect()
}

fn main() -> Result<(), RomError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("rom_engine=info".parse().unwrap()))
        .init();

    let n_dofs = 400;
    let initial = faer::Mat::from_fn(n_dofs, 100, |i, t| field(n_dofs, t)[i]);

    let mut pod = IncrementalPod::new(RomConfig {
        min_modes: 1,
        max_modes: 10,
        adaptation_frequency: 25,
        ..Default::default()
    })?;
    let modes = pod.initialize_from_snapshots(&initial)?;
    println!("Initial basis: {} modes", modes.truncation_index);
    println!("  Singular values: {:.4?}", modes.singular_values);

    for t in 100..200 {
        let snapshot = field(n_dofs, t);
        if let Some(modes) = pod.update_with_new_snapshot(&snapshot)? {
            println!(
                "Batch update after {} snapshots: {} modes, energy {:.6}",
                pod.n_snapshots(),
                modes.truncation_index,
                modes.energy_content.last().copied().unwrap_or(0.0)
            );
        }
    }
    println!("QR rank: {}", pod.qr_rank());

    let probe = field(n_dofs, 250);
    let coeffs = pod.project_to_pod_space(&probe)?;
    let recon = pod.reconstruct_from_pod_space(&coeffs)?;
    let err: f64 = probe
        .iter()
        .zip(&recon)
        .map(|(a, b)| (a - b).powi(2))
        .sum::<f64>()
        .sqrt();
    println!("Unseen snapshot reconstruction error: {err:.3e}");

    let metrics = pod.performance_metrics();
    println!(
        "Timing: avg {:.4} s, min {:.4} s, max {:.4} s over {} snapshots",
        metrics.average_computation_time,
        metrics.min_computation_time,
        metrics.max_computation_time,
        metrics.total_snapshots_processed
    );
    Ok(())
}
