//! Dense linear-algebra capability consumed by the POD and DMD components.
//!
//! Components receive a backend at construction instead of consulting a
//! process-wide device switch. [`FaerBackend`] is the CPU implementation;
//! an accelerated implementation only has to satisfy [`LinalgBackend`] and
//! match the CPU results within numerical tolerance.

use std::sync::Arc;

use faer::Mat;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::config::RomConfig;
use crate::types::{RomError, SvdFactors, C64};

/// Eigendecomposition of a real square matrix, W split into real and imaginary parts.
#[derive(Debug, Clone)]
pub struct ComplexEigen {
    /// Eigenvalues λ (n).
    pub values: Vec<C64>,
    /// Re(W) (n × n), column j pairs with `values[j]`.
    pub vectors_re: Mat<f64>,
    /// Im(W) (n × n).
    pub vectors_im: Mat<f64>,
}

impl ComplexEigen {
    /// Eigenvectors as row-major complex rows.
    pub fn vectors(&self) -> Vec<Vec<C64>> {
        let n = self.vectors_re.nrows();
        let k = self.vectors_re.ncols();
        (0..n)
            .map(|i| {
                (0..k)
                    .map(|j| C64::new(self.vectors_re[(i, j)], self.vectors_im[(i, j)]))
                    .collect()
            })
            .collect()
    }
}

/// Linear-algebra operations required by the ROM core.
pub trait LinalgBackend: Send + Sync {
    /// Backend identifier for logs and statistics.
    fn name(&self) -> &'static str;

    /// Whether the backend runs on an accelerator device.
    fn is_accelerated(&self) -> bool {
        false
    }

    /// Thin SVD, singular values descending.
    fn svd(&self, a: &Mat<f64>) -> Result<SvdFactors, RomError>;

    /// Thin QR factorization `A = Q R`.
    fn qr(&self, a: &Mat<f64>) -> Result<(Mat<f64>, Mat<f64>), RomError>;

    /// Eigendecomposition of a real square matrix.
    fn eig(&self, a: &Mat<f64>) -> Result<ComplexEigen, RomError>;

    /// Moore-Penrose pseudo-inverse. `tol` defaults to `max(m, n)·ε·σ_max`.
    fn pinv(&self, a: &Mat<f64>, tol: Option<f64>) -> Result<Mat<f64>, RomError> {
        let svd = self.svd(a)?;
        let (m, n) = (a.nrows(), a.ncols());
        let max_sv = svd.s.first().copied().unwrap_or(0.0);
        let tol = tol.unwrap_or_else(|| max_sv * m.max(n) as f64 * f64::EPSILON);

        // pinv(A) = V Σ⁺ Uᵀ
        let k = svd.s.len();
        let mut v_scaled = Mat::<f64>::zeros(n, k);
        for (idx, &si) in svd.s.iter().enumerate() {
            if si > tol {
                for j in 0..n {
                    v_scaled[(j, idx)] = svd.v[(j, idx)] / si;
                }
            }
        }
        Ok(&v_scaled * &svd.u.transpose().to_owned())
    }

    /// Randomized range-finder SVD truncated to `rank`.
    ///
    /// Gaussian sketch with `oversampling` extra columns, `power_iterations`
    /// rounds of subspace iteration, then an exact SVD of the projected
    /// `(rank + oversampling) × n` matrix lifted back through Q.
    fn randomized_svd(
        &self,
        a: &Mat<f64>,
        rank: usize,
        oversampling: usize,
        power_iterations: usize,
        seed: u64,
    ) -> Result<SvdFactors, RomError> {
        let (m, n) = (a.nrows(), a.ncols());
        let sketch = (rank + oversampling).min(m).min(n).max(1);

        let mut rng = StdRng::seed_from_u64(seed);
        let samples: Vec<f64> = (0..n * sketch).map(|_| rng.sample(StandardNormal)).collect();
        let omega = Mat::from_fn(n, sketch, |i, j| samples[i + j * n]);

        let y = a * &omega;
        let (mut q, _) = self.qr(&y)?;
        for _ in 0..power_iterations {
            let z = a.transpose() * &q;
            let (qz, _) = self.qr(&z)?;
            let y = a * &qz;
            q = self.qr(&y)?.0;
        }

        let b = q.transpose() * a;
        let small = self.svd(&b)?;
        let u = &q * &small.u;

        Ok(SvdFactors {
            u,
            s: small.s,
            v: small.v,
        }
        .truncate(rank))
    }
}

/// CPU backend built on faer's dense decompositions.
#[derive(Debug, Default, Clone, Copy)]
pub struct FaerBackend;

impl LinalgBackend for FaerBackend {
    fn name(&self) -> &'static str {
        "faer-cpu"
    }

    fn svd(&self, a: &Mat<f64>) -> Result<SvdFactors, RomError> {
        let svd = a
            .thin_svd()
            .map_err(|e| RomError::SvdFailed(format!("{e:?}")))?;
        let s_col = svd.S().column_vector();
        let s: Vec<f64> = (0..s_col.nrows()).map(|i| s_col[i]).collect();
        Ok(SvdFactors {
            u: svd.U().to_owned(),
            s,
            v: svd.V().to_owned(),
        })
    }

    fn qr(&self, a: &Mat<f64>) -> Result<(Mat<f64>, Mat<f64>), RomError> {
        let qr = a.qr();
        let q = qr.compute_thin_Q();
        let r = qr.thin_R().to_owned();
        let finite = (0..q.ncols()).all(|j| (0..q.nrows()).all(|i| q[(i, j)].is_finite()));
        if !finite {
            return Err(RomError::QrFailed("non-finite Q factor".into()));
        }
        Ok((q, r))
    }

    fn eig(&self, a: &Mat<f64>) -> Result<ComplexEigen, RomError> {
        if a.nrows() != a.ncols() {
            return Err(RomError::InvalidInput(format!(
                "eigendecomposition needs a square matrix, got {}×{}",
                a.nrows(),
                a.ncols()
            )));
        }
        let n = a.nrows();
        let eigen = a
            .as_ref()
            .eigen_from_real()
            .map_err(|e| RomError::EigenFailed(format!("{e:?}")))?;

        let diag = eigen.S().column_vector();
        let vecs = eigen.U();

        let mut values = Vec::with_capacity(n);
        let mut vectors_re = Mat::<f64>::zeros(n, n);
        let mut vectors_im = Mat::<f64>::zeros(n, n);
        for j in 0..n {
            let ev = diag[j];
            values.push(C64::new(ev.re, ev.im));
            for i in 0..n {
                let w = vecs[(i, j)];
                vectors_re[(i, j)] = w.re;
                vectors_im[(i, j)] = w.im;
            }
        }

        Ok(ComplexEigen {
            values,
            vectors_re,
            vectors_im,
        })
    }
}

/// Pick the backend requested by `config`.
///
/// No accelerated backend is compiled into this crate; a request for one
/// falls back to [`FaerBackend`]. Inject a device backend through the
/// `with_backend` constructors instead.
pub fn select_backend(config: &RomConfig) -> Arc<dyn LinalgBackend> {
    if config.enable_device_acceleration {
        tracing::warn!("no accelerated linear-algebra backend available, using faer on CPU");
    }
    Arc::new(FaerBackend)
}
