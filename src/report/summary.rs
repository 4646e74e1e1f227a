//! Posterior-weighted function summaries.
//!
//! The function estimate of a unit is the mixture, over grid points, of the
//! per-grid-point Gaussian posteriors weighted by that unit's posterior
//! class probabilities. Mean and variance are those of the mixture; the band
//! is a normal approximation at the requested level.

use crate::domain::{FittedFunction, FunctionSummary, PosteriorWeights};
use crate::error::FashError;
use crate::math::normal_quantile;

/// Summarize one unit.
///
/// `fits[j]` is the fitted function at grid point `j`. Grid points with zero
/// posterior mass may be missing.
pub fn summarize(
    fits: &[Option<FittedFunction>],
    posterior: &PosteriorWeights,
    level: f64,
) -> Result<FunctionSummary, FashError> {
    if !(level.is_finite() && level > 0.0 && level < 1.0) {
        return Err(FashError::config(format!(
            "credible level must be within (0, 1) (got {level})"
        )));
    }
    if fits.len() != posterior.probs.len() {
        return Err(FashError::shape(format!(
            "unit '{}' has {} fitted functions for {} posterior weights",
            posterior.unit_id,
            fits.len(),
            posterior.probs.len()
        )));
    }

    let mut used: Vec<(f64, &FittedFunction)> = Vec::with_capacity(fits.len());
    for (j, (fit, &p)) in fits.iter().zip(&posterior.probs).enumerate() {
        if p <= 0.0 {
            continue;
        }
        match fit {
            Some(f) => used.push((p, f)),
            None => {
                return Err(FashError::shape(format!(
                    "unit '{}' has posterior mass at grid point {j} but no fitted function",
                    posterior.unit_id
                )));
            }
        }
    }

    let Some((_, first)) = used.first() else {
        return Err(FashError::DegenerateRow {
            unit_id: posterior.unit_id.clone(),
        });
    };
    let times = first.times.clone();
    let n = times.len();
    if used
        .iter()
        .any(|(_, f)| f.times != times || f.mean.len() != n || f.sd.len() != n)
    {
        return Err(FashError::shape(format!(
            "fitted functions of unit '{}' are not evaluated at the same times",
            posterior.unit_id
        )));
    }

    let total: f64 = used.iter().map(|(p, _)| p).sum();
    let mut mean = vec![0.0; n];
    let mut second = vec![0.0; n];
    for (p, f) in &used {
        let w = p / total;
        for t in 0..n {
            mean[t] += w * f.mean[t];
            second[t] += w * (f.sd[t] * f.sd[t] + f.mean[t] * f.mean[t]);
        }
    }
    let sd: Vec<f64> = mean
        .iter()
        .zip(&second)
        .map(|(m, s)| (s - m * m).max(0.0).sqrt())
        .collect();

    let z = normal_quantile(0.5 + level / 2.0);
    let lower = mean.iter().zip(&sd).map(|(m, s)| m - z * s).collect();
    let upper = mean.iter().zip(&sd).map(|(m, s)| m + z * s).collect();

    Ok(FunctionSummary {
        unit_id: posterior.unit_id.clone(),
        level,
        times,
        mean,
        sd,
        lower,
        upper,
    })
}
