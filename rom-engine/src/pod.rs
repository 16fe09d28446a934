use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use faer::Mat;
use serde::{Deserialize, Serialize};

use crate::backend::{select_backend, LinalgBackend};
use crate::config::RomConfig;
use crate::types::{PodModes, RomError, SvdFactors};
use crate::utils::{
    center_columns, column_matrix, cumulative_energy, determine_truncation, l2_norm, row_means,
    validate_matrix, validate_vector,
};

const HISTORY_LEN: usize = 100;
const QR_RESIDUAL_TOL: f64 = 1e-12;

/// Timing and size summary of an [`IncrementalPod`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodMetrics {
    pub average_computation_time: f64,
    pub min_computation_time: f64,
    pub max_computation_time: f64,
    pub total_snapshots_processed: usize,
    pub current_modes: usize,
}

/// Proper Orthogonal Decomposition with streaming updates.
///
/// Built once from a snapshot ensemble, then refined snapshot by snapshot:
/// each new snapshot extends a thin QR factorization of the centred data,
/// and every `adaptation_frequency` snapshots the buffered block is folded
/// into the basis by an SVD of `[diag(σ) | Φᵀ B]`.
///
/// A batch update compacts the QR state to `(Φ, diag σ)`, which spans the
/// same column space as the retained data up to a right orthogonal factor,
/// so after the first batch Q never holds more than
/// `max_modes + adaptation_frequency` columns.
#[derive(Clone)]
pub struct IncrementalPod {
    config: RomConfig,
    backend: Arc<dyn LinalgBackend>,
    modes: Option<PodModes>,
    qr: Option<(Mat<f64>, Mat<f64>)>,
    buffer: Vec<Vec<f64>>,
    n_snapshots: usize,
    computation_times: VecDeque<f64>,
}

impl std::fmt::Debug for IncrementalPod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncrementalPod")
            .field("backend", &self.backend.name())
            .field("n_modes", &self.modes.as_ref().map(|m| m.truncation_index))
            .field("n_snapshots", &self.n_snapshots)
            .field("buffered", &self.buffer.len())
            .finish()
    }
}

impl IncrementalPod {
    pub fn new(config: RomConfig) -> Result<Self, RomError> {
        let backend = select_backend(&config);
        Self::with_backend(config, backend)
    }

    pub fn with_backend(
        config: RomConfig,
        backend: Arc<dyn LinalgBackend>,
    ) -> Result<Self, RomError> {
        config.validate()?;
        Ok(Self {
            config,
            backend,
            modes: None,
            qr: None,
            buffer: Vec::new(),
            n_snapshots: 0,
            computation_times: VecDeque::with_capacity(HISTORY_LEN),
        })
    }

    /// Build the POD basis from a snapshot matrix (n_dofs × n_snapshots).
    ///
    /// Replaces any previous state.
    pub fn initialize_from_snapshots(&mut self, snapshots: &Mat<f64>) -> Result<PodModes, RomError> {
        validate_matrix(snapshots, 1, 2)?;
        let (n_dofs, n_snaps) = (snapshots.nrows(), snapshots.ncols());
        tracing::info!(n_dofs, n_snapshots = n_snaps, "initializing POD basis");
        let start = Instant::now();

        let mean_field = row_means(snapshots);
        let centered = center_columns(snapshots, &mean_field);

        let svd = self.decompose(&centered)?;
        let rank = determine_truncation(
            &svd.s,
            self.config.energy_threshold,
            self.config.min_modes,
            self.config.max_modes,
        );
        if rank == 0 {
            return Err(RomError::Numerical {
                stage: "POD initialization",
                message: "SVD returned no singular values".into(),
            });
        }

        let energy = cumulative_energy(&svd.s);
        let svd = svd.truncate(rank);
        let modes = PodModes {
            spatial_modes: svd.u,
            temporal_modes: svd.v,
            singular_values: svd.s,
            mean_field,
            energy_content: energy[..rank].to_vec(),
            truncation_index: rank,
        };

        self.qr = if self.config.enable_online_update {
            Some(self.backend.qr(&centered)?)
        } else {
            None
        };
        self.buffer.clear();
        self.n_snapshots = n_snaps;
        self.modes = Some(modes.clone());

        let elapsed = start.elapsed().as_secs_f64();
        self.record_time(elapsed);
        tracing::info!(
            n_modes = rank,
            energy = modes.energy_content.last().copied().unwrap_or(0.0),
            elapsed_s = elapsed,
            "POD basis initialized"
        );
        Ok(modes)
    }

    /// Full or randomized thin SVD of the centred data.
    fn decompose(&self, centered: &Mat<f64>) -> Result<SvdFactors, RomError> {
        let (m, n) = (centered.nrows(), centered.ncols());
        let sketch = self.config.max_modes + self.config.oversampling_factor;
        if self.config.use_randomized_svd && sketch < m.min(n) {
            tracing::debug!(rank = self.config.max_modes, sketch, "using randomized SVD");
            self.backend.randomized_svd(
                centered,
                self.config.max_modes,
                self.config.oversampling_factor,
                self.config.power_iterations,
                self.config.random_seed,
            )
        } else {
            self.backend.svd(centered)
        }
    }

    /// Feed one new snapshot.
    ///
    /// Returns the refreshed modes when the buffered block triggered a batch
    /// update, `None` otherwise.
    pub fn update_with_new_snapshot(&mut self, snapshot: &[f64]) -> Result<Option<PodModes>, RomError> {
        let modes = self.modes.as_ref().ok_or_else(|| {
            RomError::NotInitialized("POD basis has not been initialized".into())
        })?;
        validate_vector(snapshot, modes.n_dofs(), "snapshot")?;

        let centered: Vec<f64> = snapshot
            .iter()
            .zip(&modes.mean_field)
            .map(|(x, m)| x - m)
            .collect();

        if self.qr.is_some() {
            self.append_to_qr(&centered)?;
        }
        self.buffer.push(centered);
        self.n_snapshots += 1;

        if self.buffer.len() >= self.config.adaptation_frequency {
            return self.batch_update().map(Some);
        }
        Ok(None)
    }

    /// One Gram-Schmidt step: grow Q when the snapshot leaves span(Q).
    fn append_to_qr(&mut self, q_new: &[f64]) -> Result<(), RomError> {
        let Some((q, r)) = self.qr.as_ref() else {
            return Ok(());
        };
        let (m, k) = (q.nrows(), q.ncols());
        let c = r.ncols();

        let x = column_matrix(q_new);
        let coeffs = q.transpose() * &x;
        let projected = q * &coeffs;
        let residual: Vec<f64> = (0..m).map(|i| q_new[i] - projected[(i, 0)]).collect();
        let rho = l2_norm(&residual);
        if !rho.is_finite() {
            return Err(RomError::Numerical {
                stage: "incremental QR",
                message: "residual norm is not finite".into(),
            });
        }

        let (q_next, r_next) = if rho > QR_RESIDUAL_TOL {
            let q_next = Mat::from_fn(m, k + 1, |i, j| {
                if j < k {
                    q[(i, j)]
                } else {
                    residual[i] / rho
                }
            });
            let r_next = Mat::from_fn(k + 1, c + 1, |i, j| match (i < k, j < c) {
                (true, true) => r[(i, j)],
                (true, false) => coeffs[(i, 0)],
                (false, true) => 0.0,
                (false, false) => rho,
            });
            (q_next, r_next)
        } else {
            let r_next = Mat::from_fn(k, c + 1, |i, j| if j < c { r[(i, j)] } else { coeffs[(i, 0)] });
            (q.clone(), r_next)
        };
        self.qr = Some((q_next, r_next));
        Ok(())
    }

    /// Fold the buffered snapshots into the basis.
    fn batch_update(&mut self) -> Result<PodModes, RomError> {
        let modes = self.modes.as_ref().ok_or_else(|| {
            RomError::NotInitialized("POD basis has not been initialized".into())
        })?;
        let start = Instant::now();
        let r = modes.truncation_index;
        let b = self.buffer.len();
        let n_dofs = modes.n_dofs();
        tracing::debug!(buffered = b, n_modes = r, "POD batch update");

        let block = Mat::from_fn(n_dofs, b, |i, j| self.buffer[j][i]);
        let projected = modes.spatial_modes.transpose() * &block;

        // K = [diag(σ) | Φᵀ B]
        let k_mat = Mat::from_fn(r, r + b, |i, j| {
            if j < r {
                if i == j {
                    modes.singular_values[i]
                } else {
                    0.0
                }
            } else {
                projected[(i, j - r)]
            }
        });
        let svd = self.backend.svd(&k_mat)?;
        let new_rank = determine_truncation(
            &svd.s,
            self.config.energy_threshold,
            self.config.min_modes,
            self.config.max_modes,
        );
        let energy = cumulative_energy(&svd.s);
        let svd = svd.truncate(new_rank);

        let spatial_modes = &modes.spatial_modes * &svd.u;

        // right singular vectors of [Φ diag(σ) Ψᵀ | B] = blockdiag(Ψ, I) V
        let v_head = svd.v.subrows(0, r).to_owned();
        let psi_v = &modes.temporal_modes * &v_head;
        let n_old = psi_v.nrows();
        let temporal_modes = Mat::from_fn(n_old + b, new_rank, |i, j| {
            if i < n_old {
                psi_v[(i, j)]
            } else {
                svd.v[(r + i - n_old, j)]
            }
        });

        let updated = PodModes {
            spatial_modes,
            temporal_modes,
            energy_content: energy[..new_rank].to_vec(),
            singular_values: svd.s,
            mean_field: modes.mean_field.clone(),
            truncation_index: new_rank,
        };
        if self.qr.is_some() {
            let r_compact = Mat::from_fn(new_rank, new_rank, |i, j| {
                if i == j {
                    updated.singular_values[i]
                } else {
                    0.0
                }
            });
            self.qr = Some((updated.spatial_modes.clone(), r_compact));
        }
        self.modes = Some(updated.clone());
        self.buffer.clear();

        let elapsed = start.elapsed().as_secs_f64();
        self.record_time(elapsed);
        tracing::info!(n_modes = new_rank, absorbed = b, elapsed_s = elapsed, "POD basis updated");
        Ok(updated)
    }

    /// Project a snapshot onto the basis: a = Φᵀ (x − x̄).
    pub fn project_to_pod_space(&self, snapshot: &[f64]) -> Result<Vec<f64>, RomError> {
        let modes = self.require_modes()?;
        validate_vector(snapshot, modes.n_dofs(), "snapshot")?;
        let centered: Vec<f64> = snapshot
            .iter()
            .zip(&modes.mean_field)
            .map(|(x, m)| x - m)
            .collect();
        let coeffs = modes.spatial_modes.transpose() * &column_matrix(&centered);
        Ok((0..coeffs.nrows()).map(|i| coeffs[(i, 0)]).collect())
    }

    /// Reconstruct a snapshot from coefficients: x = x̄ + Φ a.
    pub fn reconstruct_from_pod_space(&self, coefficients: &[f64]) -> Result<Vec<f64>, RomError> {
        let modes = self.require_modes()?;
        validate_vector(coefficients, modes.truncation_index, "POD coefficients")?;
        let x = &modes.spatial_modes * &column_matrix(coefficients);
        Ok((0..x.nrows()).map(|i| x[(i, 0)] + modes.mean_field[i]).collect())
    }

    /// Project every column of `snapshots` (n_dofs × n) into an r × n coefficient matrix.
    pub fn project_snapshots(&self, snapshots: &Mat<f64>) -> Result<Mat<f64>, RomError> {
        let modes = self.require_modes()?;
        if snapshots.nrows() != modes.n_dofs() {
            return Err(RomError::InvalidInput(format!(
                "snapshots have {} rows, basis has {}",
                snapshots.nrows(),
                modes.n_dofs()
            )));
        }
        let centered = center_columns(snapshots, &modes.mean_field);
        Ok(modes.spatial_modes.transpose() * &centered)
    }

    /// Reconstruct snapshots from an r × n coefficient matrix.
    pub fn reconstruct_snapshots(&self, coefficients: &Mat<f64>) -> Result<Mat<f64>, RomError> {
        let modes = self.require_modes()?;
        if coefficients.nrows() != modes.truncation_index {
            return Err(RomError::InvalidInput(format!(
                "coefficients have {} rows, basis has {} modes",
                coefficients.nrows(),
                modes.truncation_index
            )));
        }
        let x = &modes.spatial_modes * coefficients;
        Ok(Mat::from_fn(x.nrows(), x.ncols(), |i, j| x[(i, j)] + modes.mean_field[i]))
    }

    /// Forecast by advancing the training coefficient trajectory.
    ///
    /// Coefficients a(t) = σ ⊙ Ψ[t, :] are propagated by the least-squares
    /// operator M that maps a(t) to a(t + stride), starting from
    /// `scale · a(0)`; column t−1 holds the reconstructed state t·stride
    /// training steps after the first snapshot.
    pub fn forecast(&self, n_steps: usize, stride: usize, scale: f64) -> Result<Mat<f64>, RomError> {
        let modes = self.require_modes()?;
        if n_steps == 0 {
            return Err(RomError::InvalidInput("n_steps must be positive".into()));
        }
        if stride == 0 {
            return Err(RomError::InvalidInput("forecast stride must be positive".into()));
        }
        let r = modes.truncation_index;
        let n_time = modes.temporal_modes.nrows();
        if n_time < stride + 2 {
            return Err(RomError::InvalidInput(format!(
                "POD forecast with stride {stride} needs at least {} snapshots in the trajectory, have {n_time}",
                stride + 2
            )));
        }

        let traj = Mat::from_fn(r, n_time, |j, t| {
            modes.singular_values[j] * modes.temporal_modes[(t, j)]
        });
        let a1 = traj.subcols(0, n_time - stride).to_owned();
        let a2 = traj.subcols(stride, n_time - stride).to_owned();
        let operator = &a2 * &self.backend.pinv(&a1, None)?;

        let mut coeffs = Mat::from_fn(r, 1, |j, _| scale * traj[(j, 0)]);
        let mut trajectory = Mat::<f64>::zeros(r, n_steps);
        for t in 0..n_steps {
            coeffs = &operator * &coeffs;
            for j in 0..r {
                trajectory[(j, t)] = coeffs[(j, 0)];
            }
        }
        let states = self.reconstruct_snapshots(&trajectory)?;
        if (0..n_steps).any(|t| (0..states.nrows()).any(|i| !states[(i, t)].is_finite())) {
            return Err(RomError::Numerical {
                stage: "POD forecast",
                message: "coefficient trajectory diverged".into(),
            });
        }
        Ok(states)
    }

    fn require_modes(&self) -> Result<&PodModes, RomError> {
        self.modes
            .as_ref()
            .ok_or_else(|| RomError::NotInitialized("POD basis has not been initialized".into()))
    }

    fn record_time(&mut self, seconds: f64) {
        if self.computation_times.len() == HISTORY_LEN {
            self.computation_times.pop_front();
        }
        self.computation_times.push_back(seconds);
    }

    /// Timing over the last (up to 100) decompositions plus current sizes.
    pub fn performance_metrics(&self) -> PodMetrics {
        let times = &self.computation_times;
        if times.is_empty() {
            return PodMetrics {
                total_snapshots_processed: self.n_snapshots,
                current_modes: self.n_modes(),
                ..Default::default()
            };
        }
        PodMetrics {
            average_computation_time: times.iter().sum::<f64>() / times.len() as f64,
            min_computation_time: times.iter().copied().fold(f64::INFINITY, f64::min),
            max_computation_time: times.iter().copied().fold(0.0, f64::max),
            total_snapshots_processed: self.n_snapshots,
            current_modes: self.n_modes(),
        }
    }

    /// Drop basis, QR state and buffer.
    pub fn reset(&mut self) {
        self.modes = None;
        self.qr = None;
        self.buffer.clear();
        self.n_snapshots = 0;
    }

    /// Reinstate a previously computed basis.
    pub fn restore(&mut self, modes: PodModes, n_snapshots: usize) {
        self.modes = Some(modes);
        self.qr = None;
        self.buffer.clear();
        self.n_snapshots = n_snapshots;
    }

    pub fn modes(&self) -> Option<&PodModes> {
        self.modes.as_ref()
    }

    pub fn is_initialized(&self) -> bool {
        self.modes.is_some()
    }

    pub fn n_modes(&self) -> usize {
        self.modes.as_ref().map_or(0, |m| m.truncation_index)
    }

    /// Snapshots seen since initialization, buffered ones included.
    pub fn n_snapshots(&self) -> usize {
        self.n_snapshots
    }

    /// Snapshots waiting for the next batch update.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Column count of the streaming Q factor, 0 when online updates are off.
    pub fn qr_rank(&self) -> usize {
        self.qr.as_ref().map_or(0, |(q, _)| q.ncols())
    }

    pub fn qr_factors(&self) -> Option<(&Mat<f64>, &Mat<f64>)> {
        self.qr.as_ref().map(|(q, r)| (q, r))
    }

    pub fn config(&self) -> &RomConfig {
        &self.config
    }
}
