use faer::Mat;
use serde::{Deserialize, Serialize};

/// Error types for ROM operations.
#[derive(Debug, thiserror::Error)]
pub enum RomError {
    #[error("not initialized: {0}")]
    NotInitialized(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("SVD computation failed: {0}")]
    SvdFailed(String),

    #[error("eigendecomposition failed: {0}")]
    EigenFailed(String),

    #[error("QR factorization failed: {0}")]
    QrFailed(String),

    #[error("linear solve failed: {0}")]
    SolveFailed(String),

    #[error("numerical error in {stage}: {message}")]
    Numerical { stage: &'static str, message: String },

    #[error("prediction failed: {0}")]
    PredictionFailed(String),

    #[error("engine has been shut down")]
    Shutdown,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Thin SVD factors `A ≈ U Σ Vᵀ`.
#[derive(Debug, Clone)]
pub struct SvdFactors {
    /// Left singular vectors (m × k).
    pub u: Mat<f64>,
    /// Singular values (k), descending.
    pub s: Vec<f64>,
    /// Right singular vectors (n × k).
    pub v: Mat<f64>,
}

impl SvdFactors {
    /// Keep the leading `rank` singular triplets.
    pub fn truncate(&self, rank: usize) -> SvdFactors {
        let rank = rank.min(self.s.len());
        SvdFactors {
            u: self.u.subcols(0, rank).to_owned(),
            s: self.s[..rank].to_vec(),
            v: self.v.subcols(0, rank).to_owned(),
        }
    }
}

/// Complex number type (re, im).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct C64 {
    pub re: f64,
    pub im: f64,
}

impl C64 {
    /// Create a new complex number.
    pub fn new(re: f64, im: f64) -> Self {
        Self { re, im }
    }

    /// Magnitude |z| = sqrt(re² + im²).
    pub fn norm(&self) -> f64 {
        self.re.hypot(self.im)
    }

    /// Squared magnitude re² + im².
    pub fn norm_sqr(&self) -> f64 {
        self.re * self.re + self.im * self.im
    }

    /// Phase angle atan2(im, re).
    pub fn arg(&self) -> f64 {
        self.im.atan2(self.re)
    }

    /// Complex conjugate (re, -im).
    pub fn conj(&self) -> Self {
        Self {
            re: self.re,
            im: -self.im,
        }
    }

    /// Principal natural logarithm ln|z| + i·arg(z).
    pub fn ln(&self) -> Self {
        Self {
            re: self.norm().ln(),
            im: self.arg(),
        }
    }

    /// Raise to a real power: (r e^{iθ})^p = r^p e^{ipθ}.
    pub fn powf(&self, p: f64) -> Self {
        let r = self.norm();
        let theta = self.arg();
        let rp = r.powf(p);
        Self {
            re: rp * (p * theta).cos(),
            im: rp * (p * theta).sin(),
        }
    }

    /// Integer power by repeated squaring.
    pub fn powi(&self, n: u32) -> Self {
        let mut result = Self::new(1.0, 0.0);
        let mut base = *self;
        let mut n = n;
        while n > 0 {
            if n & 1 == 1 {
                result = result * base;
            }
            base = base * base;
            n >>= 1;
        }
        result
    }

    /// The zero complex number (0 + 0i).
    pub fn zero() -> Self {
        Self { re: 0.0, im: 0.0 }
    }
}

impl std::ops::Add for C64 {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self {
            re: self.re + rhs.re,
            im: self.im + rhs.im,
        }
    }
}

impl std::ops::AddAssign for C64 {
    fn add_assign(&mut self, rhs: Self) {
        self.re += rhs.re;
        self.im += rhs.im;
    }
}

impl std::ops::Sub for C64 {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self {
            re: self.re - rhs.re,
            im: self.im - rhs.im,
        }
    }
}

impl std::ops::Mul for C64 {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self {
        Self {
            re: self.re * rhs.re - self.im * rhs.im,
            im: self.re * rhs.im + self.im * rhs.re,
        }
    }
}

impl std::ops::Mul<f64> for C64 {
    type Output = Self;
    fn mul(self, rhs: f64) -> Self {
        Self {
            re: self.re * rhs,
            im: self.im * rhs,
        }
    }
}

impl std::ops::Div<f64> for C64 {
    type Output = Self;
    fn div(self, rhs: f64) -> Self {
        Self {
            re: self.re / rhs,
            im: self.im / rhs,
        }
    }
}

/// Truncated POD basis of a snapshot ensemble.
#[derive(Debug, Clone)]
pub struct PodModes {
    /// Spatial modes Φ (n_dofs × r), orthonormal columns.
    pub spatial_modes: Mat<f64>,
    /// Temporal modes Ψ (n_snapshots × r), right singular vectors.
    pub temporal_modes: Mat<f64>,
    /// Singular values σ (r), descending.
    pub singular_values: Vec<f64>,
    /// Column-wise mean of the snapshots (n_dofs).
    pub mean_field: Vec<f64>,
    /// Cumulative normalized σ² over the retained modes (r).
    pub energy_content: Vec<f64>,
    /// Number of retained modes r.
    pub truncation_index: usize,
}

impl PodModes {
    /// Number of degrees of freedom.
    pub fn n_dofs(&self) -> usize {
        self.spatial_modes.nrows()
    }

    /// Element count of the stored basis (Φ, σ, mean field).
    pub fn storage_elements(&self) -> usize {
        self.spatial_modes.nrows() * self.spatial_modes.ncols()
            + self.singular_values.len()
            + self.mean_field.len()
    }
}

/// DMD spectral decomposition, ordered by descending mode energy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DmdModes {
    /// Discrete-time eigenvalues λ (k).
    pub eigenvalues: Vec<C64>,
    /// Mode shapes Φ (n × k), row-major: `eigenvectors[i][j]` is DOF i of mode j.
    pub eigenvectors: Vec<Vec<C64>>,
    /// Initial amplitudes b (k).
    pub amplitudes: Vec<C64>,
    /// Oscillation frequencies in Hz (k).
    pub frequencies: Vec<f64>,
    /// Continuous-time growth rates (k).
    pub growth_rates: Vec<f64>,
    /// ‖φⱼ‖·|bⱼ| (k).
    pub mode_energies: Vec<f64>,
}

impl DmdModes {
    /// Number of modes.
    pub fn n_modes(&self) -> usize {
        self.eigenvalues.len()
    }

    /// Row dimension of the mode shapes.
    pub fn n_rows(&self) -> usize {
        self.eigenvectors.len()
    }

    /// Get mode column j.
    pub fn mode(&self, j: usize) -> Vec<C64> {
        self.eigenvectors.iter().map(|row| row[j]).collect()
    }

    /// Element count of the stored decomposition (Φ, λ, b).
    pub fn storage_elements(&self) -> usize {
        self.n_rows() * self.n_modes() + self.eigenvalues.len() + self.amplitudes.len()
    }
}

/// Stability label of a single DMD mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModeStability {
    Stable,
    Unstable,
}

impl std::fmt::Display for ModeStability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModeStability::Stable => write!(f, "stable"),
            ModeStability::Unstable => write!(f, "unstable"),
        }
    }
}

/// Summary of one dominant DMD mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DominantMode {
    /// Position in the energy-sorted mode list.
    pub index: usize,
    pub eigenvalue: C64,
    /// Frequency in Hz.
    pub frequency_hz: f64,
    pub growth_rate: f64,
    pub energy: f64,
    /// |b|.
    pub amplitude: f64,
    pub stability: ModeStability,
}

/// Compression and accuracy summary of one training run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RomPerformance {
    pub compression_ratio: f64,
    pub reconstruction_error: f64,
    pub computation_speedup: f64,
    /// Percent.
    pub memory_reduction: f64,
    /// Percent, clamped at 0.
    pub accuracy_percentage: f64,
}
