//! Per-(unit, smoothness) marginal likelihood.
//!
//! The grid builder relies on one primitive operation: given one unit's
//! observations and one smoothness value, return its log marginal likelihood
//! together with the fitted function. `LikelihoodOracle` is that seam; the
//! default `IwpOracle` realizes it with an integrated-Wiener-process prior
//! expressed through O-splines (see `math::basis`).

use nalgebra::{DMatrix, DVector};

use crate::domain::{BasisConfig, FittedFunction};
use crate::math::{
    equispaced_knots, fill_global_row, fill_ospline_row, gaussian_evidence, psd_to_sigma,
};

/// What one oracle evaluation hands back.
#[derive(Debug, Clone)]
pub struct OracleOutput {
    pub log_likelihood: f64,
    pub fitted: FittedFunction,
}

/// Marginal-likelihood backend.
///
/// Implementations must be deterministic for fixed inputs and must report
/// failure through `Err` (never a silent NaN). The error string is the
/// human-readable reason; the caller attributes it to a (unit, grid point).
pub trait LikelihoodOracle: Sync {
    /// Likelihood under the base (polynomial-only) model.
    fn evaluate_base(
        &self,
        times: &[f64],
        values: &[f64],
        noise_sd: &[f64],
        config: &BasisConfig,
    ) -> Result<OracleOutput, String>;

    /// Likelihood under base + stochastic process with the given smoothness
    /// (`smoothness > 0`).
    fn evaluate(
        &self,
        times: &[f64],
        values: &[f64],
        noise_sd: &[f64],
        smoothness: f64,
        config: &BasisConfig,
    ) -> Result<OracleOutput, String>;
}

/// Integrated Wiener process oracle (exact conjugate-Gaussian evidence).
#[derive(Debug, Clone, Copy, Default)]
pub struct IwpOracle;

/// Validated, shifted inputs shared by the base and process evaluations.
struct Prepared {
    x: Vec<f64>,
    times: Vec<f64>,
    y: DVector<f64>,
    knots: Vec<f64>,
}

impl IwpOracle {
    fn prepare(
        times: &[f64],
        values: &[f64],
        noise_sd: &[f64],
        config: &BasisConfig,
    ) -> Result<Prepared, String> {
        config.validate().map_err(|e| e.to_string())?;
        let n = times.len();
        if values.len() != n || noise_sd.len() != n {
            return Err(format!(
                "mismatched lengths: {n} times, {} values, {} noise SDs",
                values.len(),
                noise_sd.len()
            ));
        }
        if n < 2 {
            return Err(format!("need at least 2 observations, got {n}"));
        }
        if times.iter().chain(values.iter()).any(|v| !v.is_finite()) {
            return Err("non-finite time or value".to_string());
        }
        if noise_sd.iter().any(|s| !(s.is_finite() && *s > 0.0)) {
            return Err("noise SD must be finite and > 0".to_string());
        }

        let t0 = times.iter().copied().fold(f64::INFINITY, f64::min);
        let x: Vec<f64> = times.iter().map(|t| t - t0).collect();

        let mut distinct = x.clone();
        distinct.sort_by(|a, b| a.total_cmp(b));
        distinct.dedup();
        if distinct.len() < 2 {
            return Err("time grid has fewer than 2 distinct points".to_string());
        }
        let x_max = distinct[distinct.len() - 1];

        Ok(Prepared {
            knots: equispaced_knots(x_max, config.num_knots),
            times: times.to_vec(),
            y: DVector::from_row_slice(values),
            x,
        })
    }

    fn design(prep: &Prepared, order: usize, with_process: bool) -> DMatrix<f64> {
        let n_spline = if with_process { prep.knots.len() - 1 } else { 0 };
        let q = order + n_spline;
        let mut a = DMatrix::<f64>::zeros(prep.x.len(), q);
        let mut global = vec![0.0; order];
        let mut local = vec![0.0; n_spline];
        for (i, &x) in prep.x.iter().enumerate() {
            fill_global_row(x, order, &mut global);
            for (j, v) in global.iter().enumerate() {
                a[(i, j)] = *v;
            }
            if with_process {
                fill_ospline_row(x, &prep.knots, order, &mut local);
                for (j, v) in local.iter().enumerate() {
                    a[(i, order + j)] = *v;
                }
            }
        }
        a
    }

    fn fit(
        prep: &Prepared,
        noise_sd: &[f64],
        sigma: Option<f64>,
        config: &BasisConfig,
    ) -> Result<OracleOutput, String> {
        let a = Self::design(prep, config.order, sigma.is_some());
        let mut prec = vec![config.beta_prec; config.order];
        if let Some(sigma) = sigma {
            let var = sigma * sigma;
            for w in prep.knots.windows(2) {
                prec.push((w[1] - w[0]) / var);
            }
        }
        if prec.iter().any(|p| !(p.is_finite() && *p > 0.0)) {
            return Err("prior precision is not finite and positive".to_string());
        }

        let fit = gaussian_evidence(&a, &prep.y, noise_sd, &prec)
            .ok_or_else(|| "posterior precision is not positive definite".to_string())?;
        let (mean, sd) = fit.predict(&a);

        Ok(OracleOutput {
            log_likelihood: fit.log_evidence,
            fitted: FittedFunction {
                times: prep.times.clone(),
                mean,
                sd,
            },
        })
    }
}

impl LikelihoodOracle for IwpOracle {
    fn evaluate_base(
        &self,
        times: &[f64],
        values: &[f64],
        noise_sd: &[f64],
        config: &BasisConfig,
    ) -> Result<OracleOutput, String> {
        let prep = Self::prepare(times, values, noise_sd, config)?;
        Self::fit(&prep, noise_sd, None, config)
    }

    fn evaluate(
        &self,
        times: &[f64],
        values: &[f64],
        noise_sd: &[f64],
        smoothness: f64,
        config: &BasisConfig,
    ) -> Result<OracleOutput, String> {
        if !(smoothness.is_finite() && smoothness >= 0.0) {
            return Err(format!("invalid smoothness {smoothness}"));
        }
        if smoothness == 0.0 {
            return self.evaluate_base(times, values, noise_sd, config);
        }
        let prep = Self::prepare(times, values, noise_sd, config)?;
        let sigma = psd_to_sigma(smoothness, config.order, config.pred_step);
        Self::fit(&prep, noise_sd, Some(sigma), config)
    }
}
