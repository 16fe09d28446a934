use faer::Mat;

use crate::backend::LinalgBackend;
use crate::types::{RomError, C64};

/// Solve for amplitudes b via least-squares: Φ b ≈ x.
///
/// The complex system is solved through its real embedding
/// `[Re Φ, -Im Φ; Im Φ, Re Φ] [Re b; Im b] = [x; 0]` with a pseudo-inverse,
/// so rank-deficient mode sets yield the minimum-norm fit instead of failing.
pub fn solve_amplitudes(
    backend: &dyn LinalgBackend,
    modes: &[Vec<C64>],
    x: &[f64],
) -> Result<Vec<C64>, RomError> {
    let n = modes.len();
    if x.len() != n {
        return Err(RomError::InvalidInput(format!(
            "state has length {}, modes have {n} rows",
            x.len()
        )));
    }
    let k = modes.first().map_or(0, |row| row.len());
    if k == 0 {
        return Ok(Vec::new());
    }

    let embedded = Mat::from_fn(2 * n, 2 * k, |i, j| {
        let (row, block_row) = (i % n, i / n);
        let (col, block_col) = (j % k, j / k);
        let z = modes[row][col];
        match (block_row, block_col) {
            (0, 0) | (1, 1) => z.re,
            (0, 1) => -z.im,
            _ => z.im,
        }
    });
    let rhs = Mat::from_fn(2 * n, 1, |i, _| if i < n { x[i] } else { 0.0 });

    let pinv = backend.pinv(&embedded, None)?;
    let sol = &pinv * &rhs;

    let amplitudes: Vec<C64> = (0..k).map(|j| C64::new(sol[(j, 0)], sol[(k + j, 0)])).collect();
    if amplitudes.iter().any(|b| !b.re.is_finite() || !b.im.is_finite()) {
        return Err(RomError::SolveFailed(
            "amplitude least-squares produced non-finite values".into(),
        ));
    }
    Ok(amplitudes)
}

/// Re-optimize amplitudes for ‖Φ b − x‖² + γ‖b‖₁ by proximal gradient.
///
/// Starts from `initial`; the step is 1/(2‖Φ‖_F²), a lower bound on the
/// inverse Lipschitz constant of the smooth term, so the objective never increases.
pub fn sparse_amplitudes(
    modes: &[Vec<C64>],
    x: &[f64],
    initial: &[C64],
    weight: f64,
    max_iter: usize,
    tol: f64,
) -> Vec<C64> {
    let n = modes.len();
    let k = initial.len();
    let frob_sq: f64 = modes.iter().flatten().map(|z| z.norm_sqr()).sum();
    if k == 0 || frob_sq == 0.0 {
        return initial.to_vec();
    }
    let step = 1.0 / (2.0 * frob_sq);
    let threshold = step * weight;

    let mut b = initial.to_vec();
    for _ in 0..max_iter {
        // residual r = Φ b − x
        let residual: Vec<C64> = (0..n)
            .map(|i| {
                let mut val = C64::new(-x[i], 0.0);
                for j in 0..k {
                    val += modes[i][j] * b[j];
                }
                val
            })
            .collect();

        let mut max_change = 0.0_f64;
        let mut next = Vec::with_capacity(k);
        for j in 0..k {
            // gradient 2 Φᴴ r
            let mut grad = C64::zero();
            for i in 0..n {
                grad += modes[i][j].conj() * residual[i];
            }
            let z = b[j] - grad * (2.0 * step);
            let mag = z.norm();
            let shrunk = if mag > threshold {
                z * (1.0 - threshold / mag)
            } else {
                C64::zero()
            };
            max_change = max_change.max((shrunk - b[j]).norm());
            next.push(shrunk);
        }
        b = next;
        if max_change < tol {
            break;
        }
    }
    b
}

/// Evolve modes forward: column t−1 holds Re(Φ (b ⊙ λᵗ)) for t = 1..=n_steps.
pub fn evolve_modes(
    eigenvectors: &[Vec<C64>],
    eigenvalues: &[C64],
    amplitudes: &[C64],
    n_steps: usize,
) -> Mat<f64> {
    let n = eigenvectors.len();
    let k = eigenvalues.len();

    let mut pred = Mat::<f64>::zeros(n, n_steps);
    let mut powers: Vec<C64> = vec![C64::new(1.0, 0.0); k];
    for t in 1..=n_steps {
        for (p, lambda) in powers.iter_mut().zip(eigenvalues) {
            *p = *p * *lambda;
        }
        let weights: Vec<C64> = (0..k).map(|j| amplitudes[j] * powers[j]).collect();
        for i in 0..n {
            let mut val = C64::zero();
            for j in 0..k {
                val += eigenvectors[i][j] * weights[j];
            }
            pred[(i, t - 1)] = val.re;
        }
    }
    pred
}
