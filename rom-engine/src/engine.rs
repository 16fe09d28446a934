use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use faer::Mat;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};

use crate::backend::{select_backend, LinalgBackend};
use crate::cache::{fingerprint, CachedPrediction, PredictionCache, PredictionParameters};
use crate::config::RomConfig;
use crate::dmd::AdvancedDmd;
use crate::persist::{DmdGroup, JsonModelStore, ModelStore, PodGroup, RomModelArchive, FORMAT_VERSION};
use crate::pod::{IncrementalPod, PodMetrics};
use crate::types::{DmdModes, DominantMode, PodModes, RomError, RomPerformance};
use crate::utils::{frobenius_norm, validate_matrix};

/// Weight of the POD forecast in a fused prediction.
pub const POD_WEIGHT: f64 = 0.6;
/// Weight of the DMD forecast in a fused prediction.
pub const DMD_WEIGHT: f64 = 0.4;

/// Prediction parameter scaling the initial state of both forecasts (default 1.0).
pub const INITIAL_AMPLITUDE: &str = "initial_amplitude";

const PERFORMANCE_HISTORY_LEN: usize = 100;
const DOMINANT_MODES_REPORTED: usize = 5;
const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Summary of one training run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingResult {
    /// Wall-clock seconds.
    pub training_time: f64,
    pub pod_modes: usize,
    pub dmd_modes: usize,
    pub performance: RomPerformance,
    pub memory_usage_mb: f64,
}

/// A fused forecast (n_dofs × n_steps) and how it was produced.
#[derive(Debug, Clone)]
pub struct PredictionResult {
    pub prediction: Mat<f64>,
    /// Wall-clock seconds.
    pub prediction_time: f64,
    pub cached: bool,
    pub pod_contribution: bool,
    pub dmd_contribution: bool,
}

/// Snapshot of the engine's state for reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RomStatistics {
    pub is_trained: bool,
    pub backend: String,
    pub memory_usage_mb: f64,
    pub cache_size: usize,
    pub pod_metrics: PodMetrics,
    pub dmd_computation_times: Vec<f64>,
    pub dominant_modes: Vec<DominantMode>,
    pub performance: Option<RomPerformance>,
    pub training_runs: usize,
}

/// Unified POD + DMD reduced-order model.
///
/// Training runs POD and DMD as a task pair on a private worker pool and
/// commits both only if both succeed. Predictions blend the two forecasts
/// and are memoised by request fingerprint.
pub struct UnifiedRomEngine {
    config: RomConfig,
    backend: Arc<dyn LinalgBackend>,
    pool: Option<ThreadPool>,
    pod: IncrementalPod,
    dmd: AdvancedDmd,
    cache: PredictionCache,
    store: Box<dyn ModelStore>,
    performance_history: VecDeque<RomPerformance>,
    is_trained: bool,
    /// Bumped whenever the trained state changes; part of every cache key.
    generation: u64,
}

impl std::fmt::Debug for UnifiedRomEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnifiedRomEngine")
            .field("backend", &self.backend.name())
            .field("is_trained", &self.is_trained)
            .field("shut_down", &self.pool.is_none())
            .field("pod", &self.pod)
            .field("dmd", &self.dmd)
            .finish()
    }
}

impl UnifiedRomEngine {
    pub fn new(config: RomConfig) -> Result<Self, RomError> {
        let backend = select_backend(&config);
        Self::with_backend(config, backend)
    }

    /// Create with an injected linear-algebra backend shared by POD and DMD.
    pub fn with_backend(
        config: RomConfig,
        backend: Arc<dyn LinalgBackend>,
    ) -> Result<Self, RomError> {
        config.validate()?;
        let pool = build_pool(&config)?;
        let pod = IncrementalPod::with_backend(config.clone(), Arc::clone(&backend))?;
        let dmd = AdvancedDmd::with_backend(config.clone(), Arc::clone(&backend))?;
        tracing::info!(
            backend = backend.name(),
            workers = pool.current_num_threads(),
            variant = %config.dmd_variant,
            "ROM engine created"
        );
        Ok(Self {
            config,
            backend,
            pool: Some(pool),
            pod,
            dmd,
            cache: PredictionCache::new(),
            store: Box::new(JsonModelStore),
            performance_history: VecDeque::with_capacity(PERFORMANCE_HISTORY_LEN),
            is_trained: false,
            generation: 0,
        })
    }

    /// Replace the archive store used by save/load.
    pub fn with_model_store(mut self, store: Box<dyn ModelStore>) -> Self {
        self.store = store;
        self
    }

    fn pool(&self) -> Result<&ThreadPool, RomError> {
        self.pool.as_ref().ok_or(RomError::Shutdown)
    }

    /// Train POD and DMD concurrently on the same snapshots.
    ///
    /// # Arguments
    /// * `snapshots` - Data matrix (n_dofs × n_snapshots).
    /// * `time_vector` - Strictly increasing sample times, one per column;
    ///   dt is their mean spacing.
    pub fn train_unified_rom(
        &mut self,
        snapshots: &Mat<f64>,
        time_vector: &[f64],
    ) -> Result<TrainingResult, RomError> {
        let pool = self.pool()?;
        validate_matrix(snapshots, 1, 2)?;
        let dt = sampling_interval(time_vector, snapshots.ncols())?;

        tracing::info!(
            n_dofs = snapshots.nrows(),
            n_snapshots = snapshots.ncols(),
            dt,
            "training unified ROM"
        );
        let start = Instant::now();

        let mut pod = self.pod.clone();
        let mut dmd = self.dmd.clone();
        let (pod_result, dmd_result) = pool.join(
            || pod.initialize_from_snapshots(snapshots),
            || dmd.compute_dmd_modes(snapshots, dt),
        );
        let pod_modes = pod_result?;
        let dmd_modes = dmd_result?;

        let reconstruction_error = reconstruction_error(&pod, snapshots);
        let performance =
            evaluate_rom_performance(snapshots, &pod_modes, &dmd_modes, reconstruction_error);

        self.pod = pod;
        self.dmd = dmd;
        if self.performance_history.len() == PERFORMANCE_HISTORY_LEN {
            self.performance_history.pop_front();
        }
        self.performance_history.push_back(performance);
        self.is_trained = true;
        self.generation += 1;

        let training_time = start.elapsed().as_secs_f64();
        let memory_usage_mb = self.memory_usage_mb();
        tracing::info!(
            pod_modes = pod_modes.truncation_index,
            dmd_modes = dmd_modes.n_modes(),
            compression_ratio = performance.compression_ratio,
            accuracy = performance.accuracy_percentage,
            elapsed_s = training_time,
            "unified ROM trained"
        );

        Ok(TrainingResult {
            training_time,
            pod_modes: pod_modes.truncation_index,
            dmd_modes: dmd_modes.n_modes(),
            performance,
            memory_usage_mb,
        })
    }

    /// Forecast `n_steps` future states as a 0.6/0.4 blend of POD and DMD.
    ///
    /// A side that fails is logged and left out; the result is an error only
    /// when both fail. Repeated requests are served from the cache.
    pub fn predict_with_unified_rom(
        &self,
        params: &PredictionParameters,
        n_steps: usize,
        dt: f64,
    ) -> Result<PredictionResult, RomError> {
        let pool = self.pool()?;
        if !self.is_trained {
            return Err(RomError::NotInitialized("ROM has not been trained".into()));
        }
        if n_steps == 0 {
            return Err(RomError::InvalidInput("n_steps must be positive".into()));
        }
        if !(dt > 0.0 && dt.is_finite()) {
            return Err(RomError::InvalidInput(format!(
                "dt must be positive and finite, got {dt}"
            )));
        }
        if let Some((name, value)) = params.iter().find(|(_, v)| !v.is_finite()) {
            return Err(RomError::InvalidInput(format!(
                "parameter '{name}' is not finite ({value})"
            )));
        }

        let start = Instant::now();
        let key = fingerprint(params, n_steps, dt, self.generation);
        if let Some(hit) = self.cache.get(&key) {
            tracing::debug!(key = %key, "prediction cache hit");
            return Ok(PredictionResult {
                prediction: hit.prediction,
                prediction_time: start.elapsed().as_secs_f64(),
                cached: true,
                pod_contribution: hit.pod_contribution,
                dmd_contribution: hit.dmd_contribution,
            });
        }

        let scale = params.get(INITIAL_AMPLITUDE).copied().unwrap_or(1.0);
        let (pod_result, dmd_result) = pool.join(
            || self.pod.forecast(n_steps, self.config.time_delay, scale),
            || self.dmd_forecast(n_steps, dt, scale),
        );

        let pod_prediction = pod_result
            .map_err(|e| tracing::error!(error = %e, "POD prediction failed"))
            .ok();
        let dmd_prediction = dmd_result
            .map_err(|e| tracing::error!(error = %e, "DMD prediction failed"))
            .ok();
        let (pod_contribution, dmd_contribution) =
            (pod_prediction.is_some(), dmd_prediction.is_some());

        let prediction = fuse_predictions(pod_prediction, dmd_prediction).ok_or_else(|| {
            RomError::PredictionFailed("both POD and DMD predictions failed".into())
        })?;
        self.cache.insert(
            key,
            CachedPrediction {
                prediction: prediction.clone(),
                pod_contribution,
                dmd_contribution,
            },
        );

        Ok(PredictionResult {
            prediction,
            prediction_time: start.elapsed().as_secs_f64(),
            cached: false,
            pod_contribution,
            dmd_contribution,
        })
    }

    fn dmd_forecast(&self, n_steps: usize, dt: f64, scale: f64) -> Result<Mat<f64>, RomError> {
        if scale == 1.0 {
            return self.dmd.predict_future_states(n_steps, dt, None);
        }
        let initial: Vec<f64> = self.dmd.initial_snapshot().iter().map(|x| x * scale).collect();
        self.dmd.predict_future_states(n_steps, dt, Some(&initial))
    }

    /// Feed one streaming snapshot to the POD basis.
    pub fn stream_snapshot(&mut self, snapshot: &[f64]) -> Result<Option<PodModes>, RomError> {
        self.pool()?;
        let updated = self.pod.update_with_new_snapshot(snapshot)?;
        if updated.is_some() {
            self.generation += 1;
        }
        Ok(updated)
    }

    /// Approximate size of the stored POD basis and DMD decomposition.
    pub fn memory_usage_mb(&self) -> f64 {
        let pod_bytes = self
            .pod
            .modes()
            .map_or(0, |m| m.storage_elements() * std::mem::size_of::<f64>());
        let dmd_bytes = self
            .dmd
            .modes()
            .map_or(0, |m| m.storage_elements() * 2 * std::mem::size_of::<f64>());
        (pod_bytes + dmd_bytes) as f64 / BYTES_PER_MB
    }

    pub fn get_comprehensive_statistics(&self) -> RomStatistics {
        RomStatistics {
            is_trained: self.is_trained,
            backend: self.backend.name().to_string(),
            memory_usage_mb: self.memory_usage_mb(),
            cache_size: self.cache.len(),
            pod_metrics: self.pod.performance_metrics(),
            dmd_computation_times: self.dmd.computation_times(),
            dominant_modes: self.dmd.get_dominant_modes(DOMINANT_MODES_REPORTED),
            performance: self.performance().copied(),
            training_runs: self.performance_history.len(),
        }
    }

    /// Current state as an archive.
    pub fn to_archive(&self) -> RomModelArchive {
        RomModelArchive {
            format_version: FORMAT_VERSION,
            is_trained: self.is_trained,
            config: self.config.clone(),
            pod: self
                .pod
                .modes()
                .map(|m| PodGroup::new(m, self.pod.n_snapshots())),
            dmd: self.dmd.modes().map(|m| DmdGroup {
                modes: m.clone(),
                step: self.dmd.step(),
                initial_snapshot: self.dmd.initial_snapshot().to_vec(),
            }),
            performance: self.performance().copied(),
        }
    }

    /// Replace config, POD and DMD state with the archive's contents.
    ///
    /// Nothing changes if the archive is rejected. The cache is cleared.
    pub fn restore_archive(&mut self, archive: RomModelArchive) -> Result<(), RomError> {
        self.pool()?;
        archive.config.validate()?;
        let pod_modes = archive.pod.as_ref().map(PodGroup::to_modes).transpose()?;
        if let Some(group) = &archive.dmd {
            group.validate()?;
        }
        if archive.is_trained && (pod_modes.is_none() || archive.dmd.is_none()) {
            return Err(RomError::InvalidInput(
                "archive is marked trained but lacks POD or DMD state".into(),
            ));
        }

        let mut pod = IncrementalPod::with_backend(archive.config.clone(), Arc::clone(&self.backend))?;
        let mut dmd = AdvancedDmd::with_backend(archive.config.clone(), Arc::clone(&self.backend))?;
        if let (Some(modes), Some(group)) = (pod_modes, archive.pod.as_ref()) {
            pod.restore(modes, group.n_snapshots);
        }
        if let Some(group) = archive.dmd {
            dmd.restore(group.modes, group.step, group.initial_snapshot);
        }

        self.config = archive.config;
        self.pod = pod;
        self.dmd = dmd;
        self.performance_history.clear();
        if let Some(performance) = archive.performance {
            self.performance_history.push_back(performance);
        }
        self.is_trained = archive.is_trained;
        self.generation += 1;
        self.cache.clear();
        Ok(())
    }

    /// Build a fresh engine from an archive.
    pub fn from_archive(archive: RomModelArchive) -> Result<Self, RomError> {
        let mut engine = Self::new(archive.config.clone())?;
        engine.restore_archive(archive)?;
        Ok(engine)
    }

    pub fn save_rom_model(&self, path: impl AsRef<Path>) -> Result<(), RomError> {
        let path = path.as_ref();
        self.store.save(path, &self.to_archive())?;
        tracing::info!(path = %path.display(), "ROM model saved");
        Ok(())
    }

    pub fn load_rom_model(&mut self, path: impl AsRef<Path>) -> Result<(), RomError> {
        let path = path.as_ref();
        self.pool()?;
        let archive = self.store.load(path)?;
        self.restore_archive(archive)?;
        tracing::info!(path = %path.display(), trained = self.is_trained, "ROM model loaded");
        Ok(())
    }

    /// Release the worker pool and cached predictions. Idempotent.
    pub fn shutdown(&mut self) {
        if self.pool.take().is_some() {
            tracing::info!("ROM engine shut down");
        }
        self.cache.clear();
    }

    pub fn is_shut_down(&self) -> bool {
        self.pool.is_none()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_trained(&self) -> bool {
        self.is_trained
    }

    /// Latest performance evaluation.
    pub fn performance(&self) -> Option<&RomPerformance> {
        self.performance_history.back()
    }

    pub fn performance_history(&self) -> Vec<RomPerformance> {
        self.performance_history.iter().copied().collect()
    }

    pub fn pod(&self) -> &IncrementalPod {
        &self.pod
    }

    pub fn dmd(&self) -> &AdvancedDmd {
        &self.dmd
    }

    pub fn config(&self) -> &RomConfig {
        &self.config
    }
}

fn build_pool(config: &RomConfig) -> Result<ThreadPool, RomError> {
    ThreadPoolBuilder::new()
        .num_threads(config.worker_threads.unwrap_or(0))
        .thread_name(|i| format!("rom-worker-{i}"))
        .build()
        .map_err(|e| RomError::InvalidConfig(format!("failed to build worker pool: {e}")))
}

/// Mean spacing of a strictly increasing time vector with one entry per snapshot.
fn sampling_interval(time_vector: &[f64], n_snapshots: usize) -> Result<f64, RomError> {
    if time_vector.len() != n_snapshots {
        return Err(RomError::InvalidInput(format!(
            "time vector has {} entries for {n_snapshots} snapshots",
            time_vector.len()
        )));
    }
    if time_vector.iter().any(|t| !t.is_finite()) {
        return Err(RomError::InvalidInput("time vector contains NaN or Inf".into()));
    }
    if time_vector.windows(2).any(|w| w[1] <= w[0]) {
        return Err(RomError::InvalidInput(
            "time vector must be strictly increasing".into(),
        ));
    }
    match time_vector {
        [first, .., last] => Ok((last - first) / (time_vector.len() - 1) as f64),
        _ => Ok(1.0),
    }
}

/// Relative Frobenius error of the POD project/reconstruct round trip, 1.0 on failure.
fn reconstruction_error(pod: &IncrementalPod, snapshots: &Mat<f64>) -> f64 {
    let round_trip = pod
        .project_snapshots(snapshots)
        .and_then(|coeffs| pod.reconstruct_snapshots(&coeffs));
    match round_trip {
        Ok(approx) => {
            let norm = frobenius_norm(snapshots);
            if norm == 0.0 {
                return 0.0;
            }
            let diff = Mat::from_fn(snapshots.nrows(), snapshots.ncols(), |i, j| {
                snapshots[(i, j)] - approx[(i, j)]
            });
            frobenius_norm(&diff) / norm
        }
        Err(e) => {
            tracing::warn!(error = %e, "POD reconstruction failed during evaluation");
            1.0
        }
    }
}

/// Score a trained model against the snapshots it was trained on.
///
/// Compression counts stored elements: Φ, σ and the mean field for POD;
/// mode shapes, eigenvalues and amplitudes for DMD.
pub fn evaluate_rom_performance(
    snapshots: &Mat<f64>,
    pod: &PodModes,
    dmd: &DmdModes,
    reconstruction_error: f64,
) -> RomPerformance {
    let original = (snapshots.nrows() * snapshots.ncols()) as f64;
    let compressed = (pod.storage_elements() + dmd.storage_elements()).max(1) as f64;
    let n_dofs = snapshots.nrows() as f64;
    let r = pod.truncation_index.max(1) as f64;

    RomPerformance {
        compression_ratio: original / compressed,
        reconstruction_error,
        computation_speedup: (n_dofs * n_dofs) / (r * r),
        memory_reduction: (1.0 - compressed / original) * 100.0,
        accuracy_percentage: ((1.0 - reconstruction_error) * 100.0).max(0.0),
    }
}

/// Blend POD and DMD forecasts.
///
/// Both present: 0.6·POD + 0.4·DMD over the common leading rows and columns.
/// One present: returned as is.
pub fn fuse_predictions(pod: Option<Mat<f64>>, dmd: Option<Mat<f64>>) -> Option<Mat<f64>> {
    match (pod, dmd) {
        (Some(p), Some(d)) => {
            let rows = p.nrows().min(d.nrows());
            let cols = p.ncols().min(d.ncols());
            Some(Mat::from_fn(rows, cols, |i, j| {
                POD_WEIGHT * p[(i, j)] + DMD_WEIGHT * d[(i, j)]
            }))
        }
        (Some(p), None) => Some(p),
        (None, Some(d)) => Some(d),
        (None, None) => None,
    }
}
