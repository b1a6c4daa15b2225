//! Small dense linear algebra and distribution helpers for the anomaly model.
//!
//! Matrices are row-major `Vec<Vec<f64>>` so they serialize directly into
//! model parameters.

pub type Matrix = Vec<Vec<f64>>;

/// Column means of `rows`. Empty input yields an empty vector.
pub fn column_means(rows: &[Vec<f64>]) -> Vec<f64> {
    let Some(first) = rows.first() else {
        return Vec::new();
    };
    let n = rows.len() as f64;
    let mut means = vec![0.0; first.len()];
    for row in rows {
        for (m, x) in means.iter_mut().zip(row) {
            *m += x;
        }
    }
    means.iter_mut().for_each(|m| *m /= n);
    means
}

/// Sample covariance (n - 1 denominator). A single row gives a zero matrix.
pub fn sample_covariance(rows: &[Vec<f64>], means: &[f64]) -> Matrix {
    let dim = means.len();
    let mut cov = vec![vec![0.0; dim]; dim];
    if rows.len() < 2 {
        return cov;
    }
    for row in rows {
        for i in 0..dim {
            let di = row[i] - means[i];
            for j in i..dim {
                cov[i][j] += di * (row[j] - means[j]);
            }
        }
    }
    let denom = (rows.len() - 1) as f64;
    for i in 0..dim {
        for j in i..dim {
            cov[i][j] /= denom;
            cov[j][i] = cov[i][j];
        }
    }
    cov
}

/// Population standard deviation per column.
pub fn population_std(rows: &[Vec<f64>], means: &[f64]) -> Vec<f64> {
    if rows.is_empty() {
        return vec![0.0; means.len()];
    }
    let n = rows.len() as f64;
    means
        .iter()
        .enumerate()
        .map(|(j, m)| {
            let var = rows.iter().map(|row| (row[j] - m).powi(2)).sum::<f64>() / n;
            var.sqrt()
        })
        .collect()
}

pub fn add_to_diagonal(matrix: &mut Matrix, epsilon: f64) {
    for (i, row) in matrix.iter_mut().enumerate() {
        if let Some(x) = row.get_mut(i) {
            *x += epsilon;
        }
    }
}

/// Gauss-Jordan inversion with partial pivoting. `None` if singular or not
/// square.
pub fn invert(matrix: &Matrix) -> Option<Matrix> {
    let n = matrix.len();
    if matrix.iter().any(|row| row.len() != n) {
        return None;
    }

    let mut a = matrix.clone();
    let mut inv: Matrix = (0..n)
        .map(|i| (0..n).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
        .collect();

    for col in 0..n {
        let pivot = (col..n).max_by(|&x, &y| a[x][col].abs().total_cmp(&a[y][col].abs()))?;
        if a[pivot][col].abs() < 1e-300 {
            return None;
        }
        a.swap(col, pivot);
        inv.swap(col, pivot);

        let p = a[col][col];
        for j in 0..n {
            a[col][j] /= p;
            inv[col][j] /= p;
        }

        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = a[row][col];
            if factor == 0.0 {
                continue;
            }
            for j in 0..n {
                a[row][j] -= factor * a[col][j];
                inv[row][j] -= factor * inv[col][j];
            }
        }
    }
    Some(inv)
}

/// `sqrt(dᵀ M d)`, clamped at zero against rounding.
pub fn mahalanobis(diff: &[f64], inverse: &Matrix) -> f64 {
    let q: f64 = inverse
        .iter()
        .zip(diff)
        .map(|(row, di)| di * row.iter().zip(diff).map(|(m, dj)| m * dj).sum::<f64>())
        .sum();
    q.max(0.0).sqrt()
}

/// Inverse of the standard normal CDF (Acklam's rational approximation).
pub fn inverse_normal_cdf(p: f64) -> f64 {
    const A: [f64; 6] = [
        -3.969_683_028_665_376e1,
        2.209_460_984_245_205e2,
        -2.759_285_104_469_687e2,
        1.383_577_518_672_69e2,
        -3.066_479_806_614_716e1,
        2.506_628_277_459_239,
    ];
    const B: [f64; 5] = [
        -5.447_609_879_822_406e1,
        1.615_858_368_580_409e2,
        -1.556_989_798_598_866e2,
        6.680_131_188_771_972e1,
        -1.328_068_155_288_572e1,
    ];
    const C: [f64; 6] = [
        -7.784_894_002_430_293e-3,
        -3.223_964_580_411_365e-1,
        -2.400_758_277_161_838,
        -2.549_732_539_343_734,
        4.374_664_141_464_968,
        2.938_163_982_698_783,
    ];
    const D: [f64; 4] = [
        7.784_695_709_041_462e-3,
        3.224_671_290_700_398e-1,
        2.445_134_137_142_996,
        3.754_408_661_907_416,
    ];
    const P_LOW: f64 = 0.02425;

    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }

    if p < P_LOW {
        let q = (-2.0 * p.ln()).sqrt();
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        let q = (-2.0 * (1.0 - p).ln()).sqrt();
        -(((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    }
}

/// Chi-square quantile via the Wilson-Hilferty cube approximation.
pub fn chi_square_quantile(confidence: f64, degrees_of_freedom: usize) -> f64 {
    let k = degrees_of_freedom as f64;
    let z = inverse_normal_cdf(confidence);
    let h = 2.0 / (9.0 * k);
    (k * (1.0 - h + z * h.sqrt()).powi(3)).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_means_and_covariance() {
        let rows = vec![vec![1.0, 2.0], vec![3.0, 6.0]];
        let means = column_means(&rows);
        assert_eq!(means, vec![2.0, 4.0]);

        let cov = sample_covariance(&rows, &means);
        assert_eq!(cov, vec![vec![2.0, 4.0], vec![4.0, 8.0]]);

        assert_eq!(population_std(&rows, &means), vec![1.0, 2.0]);
    }

    #[test]
    fn test_single_row_covariance_is_zero() {
        let rows = vec![vec![1.0, 2.0]];
        let cov = sample_covariance(&rows, &column_means(&rows));
        assert_eq!(cov, vec![vec![0.0; 2]; 2]);
    }

    #[test]
    fn test_invert() {
        let m = vec![vec![4.0, 7.0], vec![2.0, 6.0]];
        let inv = invert(&m).unwrap();

        let expected = [[0.6, -0.7], [-0.2, 0.4]];
        for i in 0..2 {
            for j in 0..2 {
                assert!((inv[i][j] - expected[i][j]).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_invert_needs_pivoting() {
        let m = vec![vec![0.0, 1.0], vec![1.0, 0.0]];
        assert_eq!(invert(&m).unwrap(), m);
    }

    #[test]
    fn test_singular_matrix() {
        assert!(invert(&vec![vec![1.0, 2.0], vec![2.0, 4.0]]).is_none());
        assert!(invert(&vec![vec![1.0, 2.0]]).is_none());
    }

    #[test]
    fn test_mahalanobis_identity_is_euclidean() {
        let identity = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        assert!((mahalanobis(&[3.0, 4.0], &identity) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_inverse_normal() {
        assert!(inverse_normal_cdf(0.5).abs() < 1e-9);
        assert!((inverse_normal_cdf(0.95) - 1.644_853_6).abs() < 1e-6);
        assert!((inverse_normal_cdf(0.01) + 2.326_347_9).abs() < 1e-6);
    }

    #[test]
    fn test_chi_square_quantile() {
        // Tabulated: 14.067 (df = 7), 3.841 (df = 1)
        assert!((chi_square_quantile(0.95, 7) - 14.067).abs() < 0.05);
        assert!((chi_square_quantile(0.95, 1) - 3.841).abs() < 0.15);
    }
}
