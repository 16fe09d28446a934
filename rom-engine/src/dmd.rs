use std::collections::VecDeque;
use std::f64::consts::PI;
use std::sync::Arc;
use std::time::Instant;

use faer::Mat;

use crate::backend::{select_backend, LinalgBackend};
use crate::config::{DmdVariant, RomConfig};
use crate::predict::{evolve_modes, solve_amplitudes, sparse_amplitudes};
use crate::types::{DmdModes, DominantMode, ModeStability, RomError, C64};
use crate::utils::{column, determine_rank, validate_matrix, validate_vector, RELATIVE_NOISE_FLOOR};

const HISTORY_LEN: usize = 100;
const SPARSE_MAX_ITER: usize = 1000;
const SPARSE_TOL: f64 = 1e-10;

/// Eigenstructure before derived quantities and ordering.
struct RawModes {
    eigenvalues: Vec<C64>,
    eigenvectors: Vec<Vec<C64>>,
    amplitudes: Vec<C64>,
}

/// Streaming state of the online variant.
#[derive(Debug, Clone)]
struct OnlineState {
    operator: Mat<f64>,
    window: VecDeque<Vec<f64>>,
}

/// Multi-variant Dynamic Mode Decomposition.
///
/// X1 holds all snapshots except the last `time_delay`, X2 all except the
/// first `time_delay`; each variant fits the operator mapping X1 onto X2.
#[derive(Clone)]
pub struct AdvancedDmd {
    config: RomConfig,
    backend: Arc<dyn LinalgBackend>,
    modes: Option<DmdModes>,
    /// Sampling interval of the fitted operator (dt · time_delay).
    step: f64,
    /// First column of X1, the state the fitted amplitudes reproduce.
    initial_snapshot: Vec<f64>,
    online: Option<OnlineState>,
    computation_times: VecDeque<f64>,
}

impl std::fmt::Debug for AdvancedDmd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdvancedDmd")
            .field("variant", &self.config.dmd_variant)
            .field("backend", &self.backend.name())
            .field("n_modes", &self.modes.as_ref().map(DmdModes::n_modes))
            .field("step", &self.step)
            .finish()
    }
}

impl AdvancedDmd {
    /// Create with the backend selected by `config`.
    pub fn new(config: RomConfig) -> Result<Self, RomError> {
        let backend = select_backend(&config);
        Self::with_backend(config, backend)
    }

    /// Create with an injected backend.
    pub fn with_backend(
        config: RomConfig,
        backend: Arc<dyn LinalgBackend>,
    ) -> Result<Self, RomError> {
        config.validate()?;
        Ok(Self {
            config,
            backend,
            modes: None,
            step: 1.0,
            initial_snapshot: Vec::new(),
            online: None,
            computation_times: VecDeque::with_capacity(HISTORY_LEN),
        })
    }

    /// Fit the configured DMD variant.
    ///
    /// # Arguments
    /// * `snapshots` - Data matrix (n_dofs × n_time), columns time-ordered.
    /// * `dt` - Sampling interval between consecutive columns.
    pub fn compute_dmd_modes(&mut self, snapshots: &Mat<f64>, dt: f64) -> Result<DmdModes, RomError> {
        if !(dt > 0.0 && dt.is_finite()) {
            return Err(RomError::InvalidInput(format!(
                "dt must be positive and finite, got {dt}"
            )));
        }
        let delay = self.config.time_delay;
        let variant = self.config.dmd_variant;
        // an initialised online window already spans the delay
        let min_cols = match variant {
            DmdVariant::Extended => 2 * delay + 1,
            DmdVariant::Online if self.online.is_some() => 1,
            _ => delay + 1,
        };
        validate_matrix(snapshots, 1, min_cols)?;

        tracing::info!(
            variant = %variant,
            n_dofs = snapshots.nrows(),
            n_snapshots = snapshots.ncols(),
            "computing DMD modes"
        );
        let start = Instant::now();

        let (raw, initial) = match variant {
            DmdVariant::Exact => self.exact(snapshots)?,
            DmdVariant::Optimized => self.optimized(snapshots)?,
            DmdVariant::Extended => self.extended(snapshots)?,
            DmdVariant::Online => self.online(snapshots)?,
            DmdVariant::Standard => self.standard(snapshots)?,
        };

        let step = dt * delay as f64;
        let modes = assemble_modes(raw, step);

        self.step = step;
        self.initial_snapshot = initial;
        self.modes = Some(modes.clone());

        let elapsed = start.elapsed().as_secs_f64();
        push_bounded(&mut self.computation_times, elapsed);
        tracing::info!(n_modes = modes.n_modes(), elapsed_s = elapsed, "DMD computation finished");

        Ok(modes)
    }

    /// Split into X1 = columns [0, n−delay) and X2 = columns [delay, n).
    fn split(&self, x: &Mat<f64>) -> (Mat<f64>, Mat<f64>) {
        let delay = self.config.time_delay;
        let n = x.ncols() - delay;
        (x.subcols(0, n).to_owned(), x.subcols(delay, n).to_owned())
    }

    /// Projected DMD on a truncated SVD of X1.
    ///
    /// 1. Truncated SVD: X₁ ≈ U Σ Vᵀ
    /// 2. Reduced operator: Ã = Uᵀ X₂ V Σ⁻¹
    /// 3. Eigendecomposition: Ã W = W Λ
    /// 4. DMD modes: Φ = X₂ V Σ⁻¹ W
    /// 5. Amplitudes: b = Φ⁺ x₀
    fn exact(&self, x: &Mat<f64>) -> Result<(RawModes, Vec<f64>), RomError> {
        let (x1, x2) = self.split(x);
        let n_vars = x1.nrows();

        let svd = self.backend.svd(&x1)?;
        let s_max = svd.s.first().copied().unwrap_or(0.0);
        if s_max <= 0.0 {
            return Err(RomError::Numerical {
                stage: "exact DMD",
                message: "snapshot matrix X1 has no nonzero singular values".into(),
            });
        }
        let numerical = svd
            .s
            .iter()
            .filter(|&&s| s > RELATIVE_NOISE_FLOOR * s_max)
            .count();
        let mut rank = determine_rank(&svd.s, self.config.rank_truncation, self.config.energy_threshold);
        if rank > numerical {
            tracing::warn!(
                requested = rank,
                numerical,
                "DMD rank reduced to the numerical rank of X1"
            );
            rank = numerical;
        }
        let svd = svd.truncate(rank);

        // Ã = Uᵀ X₂ V Σ⁻¹
        let ut_x2 = svd.u.transpose() * &x2;
        let ut_x2_v = &ut_x2 * &svd.v;
        let a_tilde = Mat::from_fn(rank, rank, |i, j| ut_x2_v[(i, j)] / svd.s[j]);

        let eigen = self.backend.eig(&a_tilde)?;

        // Φ = X₂ V Σ⁻¹ W
        let x2_v = &x2 * &svd.v;
        let x2_v_sinv = Mat::from_fn(n_vars, rank, |i, j| x2_v[(i, j)] / svd.s[j]);
        let modes_re = &x2_v_sinv * &eigen.vectors_re;
        let modes_im = &x2_v_sinv * &eigen.vectors_im;

        let eigenvectors: Vec<Vec<C64>> = (0..n_vars)
            .map(|i| {
                (0..rank)
                    .map(|j| C64::new(modes_re[(i, j)], modes_im[(i, j)]))
                    .collect()
            })
            .collect();

        let x0 = column(&x1, 0);
        let amplitudes = solve_amplitudes(self.backend.as_ref(), &eigenvectors, &x0)?;

        Ok((
            RawModes {
                eigenvalues: eigen.values,
                eigenvectors,
                amplitudes,
            },
            x0,
        ))
    }

    /// Exact DMD followed by an L1-regularized amplitude refit.
    fn optimized(&self, x: &Mat<f64>) -> Result<(RawModes, Vec<f64>), RomError> {
        let (mut raw, x0) = self.exact(x)?;
        raw.amplitudes = sparse_amplitudes(
            &raw.eigenvectors,
            &x0,
            &raw.amplitudes,
            self.config.sparsity_weight,
            SPARSE_MAX_ITER,
            SPARSE_TOL,
        );
        Ok((raw, x0))
    }

    /// Exact DMD on the time-delay embedded snapshot matrix.
    fn extended(&self, x: &Mat<f64>) -> Result<(RawModes, Vec<f64>), RomError> {
        let embedded = delay_embed(x, self.config.time_delay)?;
        self.exact(&embedded)
    }

    /// Full-rank operator A = X₂ X₁⁺.
    fn standard(&self, x: &Mat<f64>) -> Result<(RawModes, Vec<f64>), RomError> {
        let (x1, x2) = self.split(x);
        let a = &x2 * &self.backend.pinv(&x1, None)?;
        let x0 = column(&x1, 0);
        let raw = self.decompose_operator(&a, &x0)?;
        Ok((raw, x0))
    }

    /// Streaming DMD with an exponentially forgotten operator.
    fn online(&mut self, x: &Mat<f64>) -> Result<(RawModes, Vec<f64>), RomError> {
        let capacity = self.config.online_buffer_size;

        let Some(state) = self.online.as_mut() else {
            let (raw, x0) = self.exact(x)?;
            let (x1, x2) = self.split(x);
            let operator = &x2 * &self.backend.pinv(&x1, None)?;
            let mut window = VecDeque::with_capacity(capacity);
            for j in 0..x.ncols() {
                if window.len() == capacity {
                    window.pop_front();
                }
                window.push_back(column(x, j));
            }
            self.online = Some(OnlineState { operator, window });
            return Ok((raw, x0));
        };

        let n_vars = state.operator.nrows();
        if x.nrows() != n_vars {
            return Err(RomError::InvalidInput(format!(
                "online DMD was initialised with {n_vars} rows, got {}",
                x.nrows()
            )));
        }
        for j in 0..x.ncols() {
            if state.window.len() == capacity {
                state.window.pop_front();
            }
            state.window.push_back(column(x, j));
        }

        let recent = Mat::from_fn(n_vars, state.window.len(), |i, j| state.window[j][i]);
        let (x1, x2) = self.split(&recent);
        let a_new = &x2 * &self.backend.pinv(&x1, None)?;

        // A ← λ A_old + (1 − λ) A_new
        let lambda = self.config.forgetting_factor;
        let blended = {
            let state = self.online.as_mut().ok_or_else(|| {
                RomError::NotInitialized("online DMD state missing".into())
            })?;
            state.operator = Mat::from_fn(n_vars, n_vars, |i, j| {
                lambda * state.operator[(i, j)] + (1.0 - lambda) * a_new[(i, j)]
            });
            state.operator.clone()
        };

        let x0 = column(&x1, 0);
        let raw = self.decompose_operator(&blended, &x0)?;
        Ok((raw, x0))
    }

    /// Eigendecompose a full operator and fit amplitudes to `x0`.
    fn decompose_operator(&self, a: &Mat<f64>, x0: &[f64]) -> Result<RawModes, RomError> {
        let eigen = self.backend.eig(a)?;
        let eigenvectors = eigen.vectors();
        let amplitudes = solve_amplitudes(self.backend.as_ref(), &eigenvectors, x0)?;
        Ok(RawModes {
            eigenvalues: eigen.values,
            eigenvectors,
            amplitudes,
        })
    }

    /// Predict future states x(t) = Re(Φ (b ⊙ λᵗ)), t = 1..=n_steps.
    ///
    /// # Arguments
    /// * `n_steps` - Number of future steps.
    /// * `dt` - Requested sampling interval. Column t−1 is always the state
    ///   t fitted steps (`step()`) ahead; a different `dt` is only logged.
    /// * `initial_condition` - Optional state to refit amplitudes against
    ///   (same row dimension as the fitted modes). None uses the fitted amplitudes.
    ///
    /// # Returns
    /// Matrix (n_rows × n_steps) of predicted states.
    pub fn predict_future_states(
        &self,
        n_steps: usize,
        dt: f64,
        initial_condition: Option<&[f64]>,
    ) -> Result<Mat<f64>, RomError> {
        let modes = self.modes.as_ref().ok_or_else(|| {
            RomError::NotInitialized("DMD model has not been trained".into())
        })?;
        if n_steps == 0 {
            return Err(RomError::InvalidInput("n_steps must be positive".into()));
        }
        if !(dt > 0.0 && dt.is_finite()) {
            return Err(RomError::InvalidInput(format!(
                "dt must be positive and finite, got {dt}"
            )));
        }

        if (dt - self.step).abs() > 1e-9 * self.step {
            tracing::debug!(
                requested_dt = dt,
                fitted_step = self.step,
                "forecast advances on the fitted step"
            );
        }

        let amplitudes = match initial_condition {
            Some(x0) => {
                validate_vector(x0, modes.n_rows(), "initial condition")?;
                solve_amplitudes(self.backend.as_ref(), &modes.eigenvectors, x0)?
            }
            None => modes.amplitudes.clone(),
        };

        Ok(evolve_modes(
            &modes.eigenvectors,
            &modes.eigenvalues,
            &amplitudes,
            n_steps,
        ))
    }

    /// Top `n` modes by energy.
    ///
    /// The conjugate partner of an already listed complex mode is skipped,
    /// so every oscillation is reported once. Empty before training.
    pub fn get_dominant_modes(&self, n: usize) -> Vec<DominantMode> {
        let Some(modes) = self.modes.as_ref() else {
            return Vec::new();
        };

        let mut selected: Vec<DominantMode> = Vec::with_capacity(n);
        for idx in 0..modes.n_modes() {
            if selected.len() == n {
                break;
            }
            let lambda = modes.eigenvalues[idx];
            let tol = 1e-8 * lambda.norm().max(1e-300);
            let is_partner = lambda.im.abs() > tol
                && selected.iter().any(|m| (m.eigenvalue.conj() - lambda).norm() <= tol);
            if is_partner {
                continue;
            }
            let growth_rate = modes.growth_rates[idx];
            selected.push(DominantMode {
                index: idx,
                eigenvalue: lambda,
                frequency_hz: modes.frequencies[idx],
                growth_rate,
                energy: modes.mode_energies[idx],
                amplitude: modes.amplitudes[idx].norm(),
                stability: if growth_rate < 0.0 {
                    ModeStability::Stable
                } else {
                    ModeStability::Unstable
                },
            });
        }
        selected
    }

    /// Drop the fitted modes and any online state.
    pub fn reset(&mut self) {
        self.modes = None;
        self.online = None;
        self.initial_snapshot.clear();
        self.step = 1.0;
    }

    /// Reinstate a previously fitted decomposition.
    pub fn restore(&mut self, modes: DmdModes, step: f64, initial_snapshot: Vec<f64>) {
        self.modes = Some(modes);
        self.step = step;
        self.initial_snapshot = initial_snapshot;
        self.online = None;
    }

    pub fn modes(&self) -> Option<&DmdModes> {
        self.modes.as_ref()
    }

    pub fn is_trained(&self) -> bool {
        self.modes.is_some()
    }

    /// Sampling interval of the fitted operator.
    pub fn step(&self) -> f64 {
        self.step
    }

    /// State reproduced by the fitted amplitudes (first column of X1).
    pub fn initial_snapshot(&self) -> &[f64] {
        &self.initial_snapshot
    }

    /// Wall-clock seconds of the last (up to 100) fits.
    pub fn computation_times(&self) -> Vec<f64> {
        self.computation_times.iter().copied().collect()
    }

    pub fn config(&self) -> &RomConfig {
        &self.config
    }
}

/// Stack `delay + 1` consecutive snapshots into each column.
///
/// Column t of the result is [x_t; x_{t+1}; …; x_{t+delay}].
pub fn delay_embed(x: &Mat<f64>, delay: usize) -> Result<Mat<f64>, RomError> {
    let n_obs = x.nrows();
    let n_time = x.ncols();
    if n_time <= delay {
        return Err(RomError::InvalidInput(format!(
            "not enough time points ({n_time}) for {delay} delays"
        )));
    }
    let n_cols = n_time - delay;
    Ok(Mat::from_fn((delay + 1) * n_obs, n_cols, |row, t| {
        let (d, i) = (row / n_obs, row % n_obs);
        x[(i, t + d)]
    }))
}

/// Derive frequencies, growth rates and energies, drop null modes, sort by energy.
fn assemble_modes(raw: RawModes, step: f64) -> DmdModes {
    let k = raw.eigenvalues.len();
    let max_mag = raw.eigenvalues.iter().map(C64::norm).fold(0.0_f64, f64::max);
    let floor = RELATIVE_NOISE_FLOOR * max_mag;

    // Modes with λ ≈ 0 vanish after one step and carry no dynamics.
    let mut order: Vec<usize> = (0..k)
        .filter(|&j| raw.eigenvalues[j].norm() > floor)
        .collect();

    let energies: Vec<f64> = (0..k)
        .map(|j| {
            let norm = raw
                .eigenvectors
                .iter()
                .map(|row| row[j].norm_sqr())
                .sum::<f64>()
                .sqrt();
            norm * raw.amplitudes[j].norm()
        })
        .collect();
    order.sort_by(|&a, &b| energies[b].total_cmp(&energies[a]));

    let mut eigenvalues = Vec::with_capacity(order.len());
    let mut amplitudes = Vec::with_capacity(order.len());
    let mut frequencies = Vec::with_capacity(order.len());
    let mut growth_rates = Vec::with_capacity(order.len());
    let mut mode_energies = Vec::with_capacity(order.len());
    for &j in &order {
        let lambda = raw.eigenvalues[j];
        let continuous = lambda.ln() / step;
        eigenvalues.push(lambda);
        amplitudes.push(raw.amplitudes[j]);
        frequencies.push(continuous.im.abs() / (2.0 * PI));
        growth_rates.push(continuous.re);
        mode_energies.push(energies[j]);
    }
    let eigenvectors = raw
        .eigenvectors
        .iter()
        .map(|row| order.iter().map(|&j| row[j]).collect())
        .collect();

    DmdModes {
        eigenvalues,
        eigenvectors,
        amplitudes,
        frequencies,
        growth_rates,
        mode_energies,
    }
}

fn push_bounded(history: &mut VecDeque<f64>, value: f64) {
    if history.len() == HISTORY_LEN {
        history.pop_front();
    }
    history.push_back(value);
}
