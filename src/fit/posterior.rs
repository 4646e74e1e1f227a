//! Per-unit posterior over smoothness classes.
//!
//! `p_j ∝ π_j exp(L_ij)` computed in log space with max-subtraction, so rows
//! with extreme or `-inf` entries still produce a valid probability vector.
//! The mass at grid index 0 is the unit's local false-discovery value.

use log::debug;
use rayon::prelude::*;

use crate::domain::{LikelihoodMatrix, MixtureWeights, PosteriorWeights};
use crate::error::FashError;

/// Posterior class probabilities of one unit.
///
/// If the mixture puts zero weight on every grid point where this unit has
/// finite likelihood, the prior is ignored and the mass is spread over the
/// finite grid points in proportion to their likelihood.
pub fn posterior(
    unit_id: &str,
    row: &[f64],
    weights: &MixtureWeights,
) -> Result<PosteriorWeights, FashError> {
    if row.len() != weights.len() {
        return Err(FashError::shape(format!(
            "unit '{unit_id}' has {} likelihoods for {} mixture weights",
            row.len(),
            weights.len()
        )));
    }
    if row.iter().any(|v| v.is_nan() || *v == f64::INFINITY) {
        return Err(FashError::shape(format!(
            "unit '{unit_id}' has NaN or +inf likelihood"
        )));
    }
    if row.iter().all(|v| *v == f64::NEG_INFINITY) {
        return Err(FashError::DegenerateRow {
            unit_id: unit_id.to_string(),
        });
    }

    let mut terms: Vec<f64> = row
        .iter()
        .zip(weights.weights())
        .map(|(l, w)| l + w.ln())
        .collect();
    let mut max = terms.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        debug!("Unit '{unit_id}': mixture has no mass on its finite likelihoods; using likelihood only");
        terms = row.to_vec();
        max = terms.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    }

    let mut probs: Vec<f64> = terms.iter().map(|t| (t - max).exp()).collect();
    let total: f64 = probs.iter().sum();
    probs.iter_mut().for_each(|p| *p /= total);

    Ok(PosteriorWeights {
        unit_id: unit_id.to_string(),
        probs,
    })
}

/// Posterior of every matrix row, in row order.
///
/// The outer error is a grid mismatch between matrix and weights; inner
/// errors are per-unit `DegenerateRow`s that do not stop the batch.
pub fn posterior_all(
    matrix: &LikelihoodMatrix,
    weights: &MixtureWeights,
) -> Result<Vec<Result<PosteriorWeights, FashError>>, FashError> {
    if matrix.grid() != weights.grid() {
        return Err(FashError::shape(format!(
            "likelihood matrix has K={}, mixture weights have K={} (or different grid values)",
            matrix.n_grid(),
            weights.len()
        )));
    }
    Ok((0..matrix.n_units())
        .into_par_iter()
        .map(|i| posterior(&matrix.unit_ids()[i], matrix.row(i), weights))
        .collect())
}

/// Split a batch into usable posteriors and per-unit errors.
pub fn partition_posteriors(
    batch: Vec<Result<PosteriorWeights, FashError>>,
) -> (Vec<PosteriorWeights>, Vec<FashError>) {
    let mut ok = Vec::with_capacity(batch.len());
    let mut failed = Vec::new();
    for item in batch {
        match item {
            Ok(p) => ok.push(p),
            Err(e) => failed.push(e),
        }
    }
    (ok, failed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SmoothnessGrid;
    use rand::prelude::*;
    use rand::rngs::StdRng;

    fn grid(k: usize) -> SmoothnessGrid {
        SmoothnessGrid::new((0..k).map(|j| j as f64 * 0.5).collect()).unwrap()
    }

    #[test]
    fn posterior_sums_to_one_on_random_rows() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..200 {
            let k = rng.gen_range(1..8);
            let raw: Vec<f64> = (0..k).map(|_| rng.gen_range(0.01..1.0)).collect();
            let s: f64 = raw.iter().sum();
            let w = MixtureWeights::new(grid(k), raw.iter().map(|v| v / s).collect()).unwrap();
            let offset = if rng.gen_bool(0.2) { -1e6 } else { 0.0 };
            let row: Vec<f64> = (0..k).map(|_| offset - 800.0 * rng.gen_range(0.0..1.0)).collect();
            let post = posterior("u", &row, &w).unwrap();
            let total: f64 = post.probs.iter().sum();
            assert!((total - 1.0).abs() < 1e-9);
            assert!(post.probs.iter().all(|p| *p >= 0.0 && p.is_finite()));
        }
    }

    #[test]
    fn single_finite_entry_takes_all_mass() {
        let w = MixtureWeights::uniform(grid(3));
        let row = [f64::NEG_INFINITY, -12.0, f64::NEG_INFINITY];
        let post = posterior("u", &row, &w).unwrap();
        assert_eq!(post.probs, vec![0.0, 1.0, 0.0]);
        assert_eq!(post.local_fdr(), 0.0);
    }

    #[test]
    fn all_neg_infinity_is_degenerate() {
        let w = MixtureWeights::uniform(grid(2));
        let err = posterior("dead", &[f64::NEG_INFINITY; 2], &w).unwrap_err();
        assert_eq!(
            err,
            FashError::DegenerateRow {
                unit_id: "dead".to_string()
            }
        );
    }

    #[test]
    fn zero_prior_on_finite_entries_falls_back_to_likelihood() {
        let w = MixtureWeights::new(grid(3), vec![1.0, 0.0, 0.0]).unwrap();
        let row = [f64::NEG_INFINITY, -1.0, -1.0];
        let post = posterior("u", &row, &w).unwrap();
        assert!((post.probs[1] - 0.5).abs() < 1e-12);
        assert!((post.probs[2] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn posterior_applies_prior_weights() {
        let w = MixtureWeights::new(grid(2), vec![0.8, 0.2]).unwrap();
        let post = posterior("u", &[0.0, 0.0], &w).unwrap();
        assert!((post.local_fdr() - 0.8).abs() < 1e-12);
    }

    #[test]
    fn batch_reports_degenerate_rows_without_aborting() {
        let g = grid(2);
        let m = LikelihoodMatrix::new(
            g.clone(),
            vec!["a".to_string(), "b".to_string()],
            vec![vec![0.0, -1.0], vec![f64::NEG_INFINITY; 2]],
        )
        .unwrap();
        let batch = posterior_all(&m, &MixtureWeights::uniform(g)).unwrap();
        let (ok, failed) = partition_posteriors(batch);
        assert_eq!(ok.len(), 1);
        assert_eq!(ok[0].unit_id, "a");
        assert_eq!(failed.len(), 1);
    }

    #[test]
    fn batch_rejects_misaligned_weights() {
        let m = LikelihoodMatrix::new(grid(2), vec!["a".to_string()], vec![vec![0.0, -1.0]]).unwrap();
        let err = posterior_all(&m, &MixtureWeights::uniform(grid(3))).unwrap_err();
        assert!(matches!(err, FashError::ShapeMismatch(_)));
    }
}
