//! # rom-engine
//!
//! Reduced-order modeling of high-dimensional time-evolving fields.
//!
//! Snapshot matrices (one column per time step) are compressed two ways and
//! the results combined:
//!
//! - **POD** ([`IncrementalPod`]): energy-truncated orthonormal basis from an SVD
//!   of the mean-subtracted snapshots, refined as new snapshots stream in
//! - **DMD** ([`AdvancedDmd`]): spectral decomposition of the linear operator
//!   advancing one snapshot to the next, in exact, optimized, extended
//!   (time-delay), online and standard variants
//! - **Unified engine** ([`UnifiedRomEngine`]): trains both concurrently, blends
//!   their forecasts 0.6/0.4, caches predictions and scores compression
//!
//! Dense linear algebra goes through a [`LinalgBackend`]; [`FaerBackend`] is
//! the CPU implementation.
//!
//! ## Quick Start
//!
//! ```rust
//! use rom_engine::{PredictionParameters, RomConfig, UnifiedRomEngine};
//!
//! let (n_dofs, n_time, dt) = (40, 80, 0.05);
//! let times: Vec<f64> = (0..n_time).map(|t| t as f64 * dt).collect();
//! let snapshots = faer::Mat::from_fn(n_dofs, n_time, |i, t| {
//!     let s = i as f64 / n_dofs as f64;
//!     (std::f64::consts::PI * s).sin() * (2.0 * times[t]).cos()
//! });
//!
//! let config = RomConfig {
//!     min_modes: 1,
//!     max_modes: 10,
//!     ..Default::default()
//! };
//! let mut engine = UnifiedRomEngine::new(config).unwrap();
//! let training = engine.train_unified_rom(&snapshots, &times).unwrap();
//! assert!(training.performance.compression_ratio > 1.0);
//!
//! let forecast = engine
//!     .predict_with_unified_rom(&PredictionParameters::new(), 20, dt)
//!     .unwrap();
//! assert_eq!(forecast.prediction.ncols(), 20);
//! ```
//!
//! ## References
//!
//! - Holmes, Lumley & Berkooz (1996), *Turbulence, Coherent Structures, Dynamical Systems and Symmetry*
//! - Brand (2006), *Linear Algebra Appl.*, 415, 20-30
//! - Schmid (2010), *J. Fluid Mech.*, 656, 5-28
//! - Halko, Martinsson & Tropp (2011), *SIAM Review*, 53, 217-288
//! - Kutz et al. (2016), *Dynamic Mode Decomposition*, SIAM

pub mod config;
pub mod types;

pub mod backend;
pub mod cache;
pub mod dmd;
pub mod engine;
pub mod persist;
pub mod pod;
pub mod predict;
pub mod utils;

pub use backend::{select_backend, ComplexEigen, FaerBackend, LinalgBackend};
pub use cache::{fingerprint, CachedPrediction, PredictionCache, PredictionParameters};
pub use config::{DmdVariant, RomConfig};
pub use dmd::{delay_embed, AdvancedDmd};
pub use engine::{
    evaluate_rom_performance, fuse_predictions, PredictionResult, RomStatistics, TrainingResult,
    UnifiedRomEngine, DMD_WEIGHT, INITIAL_AMPLITUDE, POD_WEIGHT,
};
pub use persist::{
    ArrayDataset, DmdGroup, JsonModelStore, ModelStore, PodGroup, RomModelArchive, FORMAT_VERSION,
};
pub use pod::{IncrementalPod, PodMetrics};
pub use predict::{evolve_modes, solve_amplitudes, sparse_amplitudes};
pub use types::{
    DmdModes, DominantMode, ModeStability, PodModes, RomError, RomPerformance, SvdFactors, C64,
};
pub use utils::determine_truncation;
