use faer::Mat;

use crate::types::RomError;

/// Singular-value decay ratio below which the spectrum is taken to hit the noise floor.
pub const DECAY_RATIO_THRESHOLD: f64 = 0.01;

/// Singular values below this fraction of the largest are treated as zero.
pub const RELATIVE_NOISE_FLOOR: f64 = 1e-10;

/// Validate that a matrix meets minimum dimension requirements and contains no NaN/Inf.
pub fn validate_matrix(x: &Mat<f64>, min_rows: usize, min_cols: usize) -> Result<(), RomError> {
    let (rows, cols) = (x.nrows(), x.ncols());
    if rows < min_rows {
        return Err(RomError::InvalidInput(format!(
            "matrix has {rows} rows, need at least {min_rows}"
        )));
    }
    if cols < min_cols {
        return Err(RomError::InvalidInput(format!(
            "matrix has {cols} columns, need at least {min_cols}"
        )));
    }
    for j in 0..cols {
        for i in 0..rows {
            if !x[(i, j)].is_finite() {
                return Err(RomError::InvalidInput(
                    "matrix contains NaN or Inf values".to_string(),
                ));
            }
        }
    }
    Ok(())
}

/// Validate that a vector has the expected length and finite entries.
pub fn validate_vector(v: &[f64], expected_len: usize, what: &str) -> Result<(), RomError> {
    if v.len() != expected_len {
        return Err(RomError::InvalidInput(format!(
            "{what} has length {}, expected {expected_len}",
            v.len()
        )));
    }
    if v.iter().any(|x| !x.is_finite()) {
        return Err(RomError::InvalidInput(format!(
            "{what} contains NaN or Inf values"
        )));
    }
    Ok(())
}

/// Compute row means of a matrix (the mean snapshot).
pub fn row_means(x: &Mat<f64>) -> Vec<f64> {
    let (nrows, ncols) = (x.nrows(), x.ncols());
    let mut means = vec![0.0; nrows];
    for j in 0..ncols {
        for (i, m) in means.iter_mut().enumerate() {
            *m += x[(i, j)];
        }
    }
    for m in &mut means {
        *m /= ncols as f64;
    }
    means
}

/// Subtract `mean` from every column.
pub fn center_columns(x: &Mat<f64>, mean: &[f64]) -> Mat<f64> {
    Mat::from_fn(x.nrows(), x.ncols(), |i, j| x[(i, j)] - mean[i])
}

/// Copy column `j` into a vector.
pub fn column(x: &Mat<f64>, j: usize) -> Vec<f64> {
    (0..x.nrows()).map(|i| x[(i, j)]).collect()
}

/// Build a single-column matrix from a slice.
pub fn column_matrix(v: &[f64]) -> Mat<f64> {
    Mat::from_fn(v.len(), 1, |i, _| v[i])
}

/// Frobenius norm ‖X‖_F.
pub fn frobenius_norm(x: &Mat<f64>) -> f64 {
    let mut sum = 0.0;
    for j in 0..x.ncols() {
        for i in 0..x.nrows() {
            sum += x[(i, j)] * x[(i, j)];
        }
    }
    sum.sqrt()
}

/// Euclidean norm of a slice.
pub fn l2_norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

/// Cumulative normalized squared singular values.
pub fn cumulative_energy(singular_values: &[f64]) -> Vec<f64> {
    let total: f64 = singular_values.iter().map(|s| s * s).sum();
    let mut cumulative = 0.0;
    singular_values
        .iter()
        .map(|s| {
            cumulative += s * s;
            if total > 0.0 {
                (cumulative / total).min(1.0)
            } else {
                1.0
            }
        })
        .collect()
}

/// Determine truncation rank from singular values.
///
/// If `rank` is Some, clamp to valid range. Otherwise, select rank
/// capturing at least `threshold` fraction of total variance. Singular
/// values under the relative noise floor never count towards the rank.
pub fn determine_rank(singular_values: &[f64], rank: Option<usize>, threshold: f64) -> usize {
    let n = singular_values.len();
    if n == 0 {
        return 0;
    }

    match rank {
        Some(r) => r.min(n).max(1),
        None => {
            let floor = RELATIVE_NOISE_FLOOR * singular_values[0];
            let numerical = singular_values.iter().filter(|&&s| s > floor).count().max(1);
            let energy = cumulative_energy(singular_values);
            let by_energy = energy
                .iter()
                .position(|&e| e >= threshold)
                .map_or(n, |i| i + 1);
            by_energy.min(numerical)
        }
    }
}

/// POD truncation policy.
///
/// Takes the smallest of three candidate ranks (energy threshold, singular-value
/// decay, relative noise floor), then clamps to `[min_modes, max_modes]` and to
/// the number of singular values available.
pub fn determine_truncation(
    singular_values: &[f64],
    energy_threshold: f64,
    min_modes: usize,
    max_modes: usize,
) -> usize {
    let n = singular_values.len();
    if n == 0 {
        return 0;
    }

    let energy = cumulative_energy(singular_values);
    let energy_truncation = energy
        .iter()
        .position(|&e| e >= energy_threshold)
        .map_or(n, |i| i + 1);

    let decay_truncation = singular_values
        .windows(2)
        .position(|w| w[0] > 0.0 && w[1] / w[0] < DECAY_RATIO_THRESHOLD)
        .map_or(n, |i| i + 1);

    let floor = RELATIVE_NOISE_FLOOR * singular_values[0];
    let noise_truncation = singular_values
        .iter()
        .position(|&s| s < floor)
        .unwrap_or(n);

    let candidate = energy_truncation
        .min(decay_truncation)
        .min(noise_truncation);
    let clamped = candidate.clamp(min_modes, max_modes);
    if clamped > n {
        tracing::warn!(
            requested = clamped,
            available = n,
            "truncation rank exceeds available singular values"
        );
    }
    clamped.min(n)
}
