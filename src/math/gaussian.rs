//! Conjugate-Gaussian evidence in coefficient space.
//!
//! We repeatedly evaluate models of the form:
//!
//! ```text
//! y = A θ + ε,   θ ~ N(0, P⁻¹),   ε ~ N(0, diag(s²))
//! ```
//!
//! with diagonal prior precision `P`. Because everything is Gaussian, the
//! Laplace approximation is exact and the log evidence is
//!
//! ```text
//! log p(y) = -n/2 log 2π - Σ log s_i + ½ log|P| - ½ log|H| - ½ (yᵀWy - bᵀH⁻¹b)
//! H = P + AᵀWA,   b = AᵀWy,   W = diag(1/s²)
//! ```
//!
//! Working with the `q x q` matrix `H` instead of the `n x n` marginal
//! covariance keeps the cost at one small Cholesky per evaluation, and the
//! same factor gives the coefficient posterior `N(H⁻¹b, H⁻¹)`.

use nalgebra::{DMatrix, DVector};
use statrs::distribution::{ContinuousCDF, Normal};

const LN_2PI: f64 = 1.837_877_066_409_345_5;

/// Evidence and coefficient posterior of one conjugate-Gaussian model.
#[derive(Debug, Clone)]
pub struct GaussianFit {
    pub log_evidence: f64,
    pub coef_mean: DVector<f64>,
    pub coef_cov: DMatrix<f64>,
}

impl GaussianFit {
    /// Posterior mean and SD of `rows · θ` for each row of `rows`.
    pub fn predict(&self, rows: &DMatrix<f64>) -> (Vec<f64>, Vec<f64>) {
        let mean = rows * &self.coef_mean;
        let mut sd = Vec::with_capacity(rows.nrows());
        for i in 0..rows.nrows() {
            let r = rows.row(i).transpose();
            let var = (r.transpose() * &self.coef_cov * &r)[(0, 0)];
            sd.push(var.max(0.0).sqrt());
        }
        (mean.iter().copied().collect(), sd)
    }
}

/// Evaluate the log evidence and coefficient posterior.
///
/// Returns `None` if `H` cannot be factorized or the result is not finite.
/// Callers are expected to have validated shapes, positivity of `noise_sd`
/// and `prior_prec`, and finiteness of the inputs.
pub fn gaussian_evidence(
    design: &DMatrix<f64>,
    y: &DVector<f64>,
    noise_sd: &[f64],
    prior_prec: &[f64],
) -> Option<GaussianFit> {
    let n = design.nrows();
    let q = design.ncols();

    // Scale rows by 1/s_i so that AᵀWA = (A_w)ᵀ A_w.
    let mut aw = design.clone();
    let mut yw = y.clone();
    for i in 0..n {
        let inv = 1.0 / noise_sd[i];
        aw.row_mut(i).scale_mut(inv);
        yw[i] *= inv;
    }

    let mut h = aw.transpose() * &aw;
    for j in 0..q {
        h[(j, j)] += prior_prec[j];
    }
    let b = aw.transpose() * &yw;

    // Near-singular H can appear for extreme precisions. Retry with a tiny
    // relative jitter before giving up.
    let mean_diag = (0..q).map(|j| h[(j, j)]).sum::<f64>() / q.max(1) as f64;
    let mut chol = None;
    for &rel in &[0.0, 1e-12, 1e-10] {
        let mut hj = h.clone();
        for j in 0..q {
            hj[(j, j)] += rel * mean_diag;
        }
        if let Some(c) = hj.cholesky() {
            chol = Some(c);
            break;
        }
    }
    let chol = chol?;

    let coef_mean = chol.solve(&b);
    let quad = yw.dot(&yw) - b.dot(&coef_mean);
    let logdet_h: f64 = 2.0 * chol.l().diagonal().iter().map(|v| v.ln()).sum::<f64>();
    let logdet_p: f64 = prior_prec.iter().map(|v| v.ln()).sum();
    let log_noise: f64 = noise_sd.iter().map(|s| s.ln()).sum();

    let log_evidence =
        -0.5 * n as f64 * LN_2PI - log_noise + 0.5 * logdet_p - 0.5 * logdet_h - 0.5 * quad;

    if !log_evidence.is_finite() || coef_mean.iter().any(|v| !v.is_finite()) {
        return None;
    }

    let coef_cov = chol.inverse();
    Some(GaussianFit {
        log_evidence,
        coef_mean,
        coef_cov,
    })
}

/// Inverse standard normal CDF, `±inf` at the ends of `[0, 1]`.
pub fn normal_quantile(p: f64) -> f64 {
    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }
    Normal::standard().inverse_cdf(p)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Direct `n x n` evaluation of log N(y; 0, A P⁻¹ Aᵀ + diag(s²)).
    fn direct_log_evidence(a: &DMatrix<f64>, y: &DVector<f64>, s: &[f64], prec: &[f64]) -> f64 {
        let n = a.nrows();
        let mut pinv = DMatrix::<f64>::zeros(prec.len(), prec.len());
        for j in 0..prec.len() {
            pinv[(j, j)] = 1.0 / prec[j];
        }
        let mut sigma = a * pinv * a.transpose();
        for i in 0..n {
            sigma[(i, i)] += s[i] * s[i];
        }
        let chol = sigma.cholesky().unwrap();
        let alpha = chol.solve(y);
        let logdet: f64 = 2.0 * chol.l().diagonal().iter().map(|v| v.ln()).sum::<f64>();
        -0.5 * (n as f64 * LN_2PI + logdet + y.dot(&alpha))
    }

    #[test]
    fn evidence_matches_direct_marginal_covariance() {
        let a = DMatrix::from_row_slice(4, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0, 1.0, 3.0]);
        let y = DVector::from_row_slice(&[0.3, 1.1, 1.9, 3.2]);
        let s = [0.5, 0.4, 0.6, 0.5];
        let prec = [0.1, 2.0];

        let fit = gaussian_evidence(&a, &y, &s, &prec).unwrap();
        let direct = direct_log_evidence(&a, &y, &s, &prec);
        assert!(
            (fit.log_evidence - direct).abs() < 1e-9,
            "coef-space {} vs direct {direct}",
            fit.log_evidence
        );
    }

    #[test]
    fn posterior_mean_recovers_line_with_weak_prior() {
        let a = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0]);
        let y = DVector::from_row_slice(&[2.0, 5.0, 8.0]);
        let fit = gaussian_evidence(&a, &y, &[1e-3, 1e-3, 1e-3], &[1e-8, 1e-8]).unwrap();
        assert!((fit.coef_mean[0] - 2.0).abs() < 1e-6);
        assert!((fit.coef_mean[1] - 3.0).abs() < 1e-6);

        let (mean, sd) = fit.predict(&a);
        assert!((mean[1] - 5.0).abs() < 1e-6);
        assert!(sd.iter().all(|v| v.is_finite() && *v >= 0.0));
    }

    #[test]
    fn normal_quantile_matches_reference_values() {
        assert!((normal_quantile(0.975) - 1.959_963_985).abs() < 1e-8);
        assert!((normal_quantile(0.025) + 1.959_963_985).abs() < 1e-8);
        assert!((normal_quantile(0.95) - 1.644_853_627).abs() < 1e-8);
        assert!((normal_quantile(0.995) - 2.575_829_304).abs() < 1e-8);
        assert!(normal_quantile(0.5).abs() < 1e-12);
        assert_eq!(normal_quantile(1.0), f64::INFINITY);
        assert_eq!(normal_quantile(0.0), f64::NEG_INFINITY);
    }
}
