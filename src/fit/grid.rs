//! Smoothness grid generation.
//!
//! Every grid starts with the reserved value `0` (non-dynamic). The remaining
//! points are either linearly spaced up to a maximum or log-spaced over a
//! positive range; the mixture optimizer decides how much mass each gets, so
//! the grid only has to be wide and dense enough to bracket the data.

use crate::domain::SmoothnessGrid;
use crate::error::FashError;

/// Generate `steps` log-spaced points between `min` and `max` (inclusive).
pub fn log_space(min: f64, max: f64, steps: usize) -> Result<Vec<f64>, FashError> {
    if !(min.is_finite() && max.is_finite() && min > 0.0 && max > 0.0 && max > min) {
        return Err(FashError::config(format!(
            "invalid smoothness range: min={min}, max={max} (must be finite, >0, and max>min)"
        )));
    }
    if steps < 2 {
        return Err(FashError::config("log-spaced smoothness steps must be >= 2"));
    }

    let ln_min = min.ln();
    let ln_max = max.ln();
    let step = (ln_max - ln_min) / (steps as f64 - 1.0);

    let mut out = Vec::with_capacity(steps);
    for i in 0..steps {
        out.push((ln_min + step * i as f64).exp());
    }
    Ok(out)
}

/// `[0, max/steps, 2·max/steps, ..., max]` (`steps + 1` points).
pub fn linear_grid(max: f64, steps: usize) -> Result<SmoothnessGrid, FashError> {
    if !(max.is_finite() && max > 0.0) {
        return Err(FashError::config(format!(
            "smoothness max must be finite and > 0 (got {max})"
        )));
    }
    if steps == 0 {
        return SmoothnessGrid::new(vec![0.0]);
    }
    let step = max / steps as f64;
    SmoothnessGrid::new((0..=steps).map(|i| step * i as f64).collect())
}

/// `[0]` followed by `steps` log-spaced points on `[min, max]`.
pub fn log_grid(min: f64, max: f64, steps: usize) -> Result<SmoothnessGrid, FashError> {
    let mut values = vec![0.0];
    values.extend(log_space(min, max, steps)?);
    SmoothnessGrid::new(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_space_includes_endpoints() {
        let v = log_space(0.1, 10.0, 5).unwrap();
        assert!((v[0] - 0.1).abs() < 1e-12);
        assert!((v[v.len() - 1] - 10.0).abs() < 1e-12);
    }

    #[test]
    fn linear_grid_starts_at_zero() {
        let g = linear_grid(2.0, 20).unwrap();
        assert_eq!(g.len(), 21);
        assert_eq!(g.values()[0], 0.0);
        assert!((g.values()[20] - 2.0).abs() < 1e-12);
        assert!((g.values()[1] - 0.1).abs() < 1e-12);
    }

    #[test]
    fn zero_steps_gives_null_only_grid() {
        let g = linear_grid(1.0, 0).unwrap();
        assert_eq!(g.values(), &[0.0]);
    }

    #[test]
    fn log_grid_prepends_zero() {
        let g = log_grid(0.01, 1.0, 3).unwrap();
        assert_eq!(g.len(), 4);
        assert_eq!(g.values()[0], 0.0);
        assert!((g.values()[2] - 0.1).abs() < 1e-12);
    }
}
