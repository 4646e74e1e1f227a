//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - used in-memory while building the likelihood grid and fitting the mixture
//! - exported to JSON/CSV
//! - reloaded later to refit or re-threshold without touching the oracle

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::FashError;
use crate::fit::mixture::MixtureOptions;

/// Tolerance used when checking that a probability vector sums to one.
pub const SIMPLEX_TOL: f64 = 1e-6;

/// One independently observed trajectory.
///
/// Fields are private so a constructed unit cannot be edited in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    id: String,
    times: Vec<f64>,
    values: Vec<f64>,
    /// Noise SD per observation.
    noise_sd: Vec<f64>,
}

impl Unit {
    pub fn new(
        id: impl Into<String>,
        times: Vec<f64>,
        values: Vec<f64>,
        noise_sd: Vec<f64>,
    ) -> Result<Self, FashError> {
        let id = id.into();
        if times.len() != values.len() || times.len() != noise_sd.len() {
            return Err(FashError::shape(format!(
                "unit '{id}': {} times, {} values, {} noise SDs",
                times.len(),
                values.len(),
                noise_sd.len()
            )));
        }
        Ok(Self {
            id,
            times,
            values,
            noise_sd,
        })
    }

    /// Build a unit whose observations all share one noise SD.
    pub fn with_constant_sd(
        id: impl Into<String>,
        times: Vec<f64>,
        values: Vec<f64>,
        noise_sd: f64,
    ) -> Result<Self, FashError> {
        let sd = vec![noise_sd; times.len()];
        Self::new(id, times, values, sd)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn noise_sd(&self) -> &[f64] {
        &self.noise_sd
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }
}

/// Candidate smoothness values (predictive SDs of the process prior).
///
/// Invariant: non-empty, finite, strictly increasing, and `values[0] == 0.0`.
/// Index 0 is the non-dynamic (base model only) class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct SmoothnessGrid {
    values: Vec<f64>,
}

impl SmoothnessGrid {
    pub fn new(values: Vec<f64>) -> Result<Self, FashError> {
        if values.is_empty() {
            return Err(FashError::config("smoothness grid is empty"));
        }
        if values[0] != 0.0 {
            return Err(FashError::config(format!(
                "smoothness grid must start at exactly 0 (got {})",
                values[0]
            )));
        }
        if let Some(v) = values.iter().find(|v| !v.is_finite()) {
            return Err(FashError::config(format!(
                "smoothness grid contains non-finite value {v}"
            )));
        }
        for w in values.windows(2) {
            if w[1] <= w[0] {
                return Err(FashError::config(format!(
                    "smoothness grid must be strictly increasing ({} then {})",
                    w[0], w[1]
                )));
            }
        }
        Ok(Self { values })
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Always false; kept for clippy's `len_without_is_empty`.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl TryFrom<Vec<f64>> for SmoothnessGrid {
    type Error = FashError;

    fn try_from(values: Vec<f64>) -> Result<Self, Self::Error> {
        SmoothnessGrid::new(values)
    }
}

impl From<SmoothnessGrid> for Vec<f64> {
    fn from(grid: SmoothnessGrid) -> Self {
        grid.values
    }
}

/// Basis/knot configuration shared by every oracle call in a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BasisConfig {
    /// Number of O-spline knots spanning the observed time range.
    pub num_knots: usize,
    /// Prior precision of the base-model (polynomial) coefficients.
    pub beta_prec: f64,
    /// Horizon at which grid values are read as predictive SDs.
    pub pred_step: f64,
    /// Order `p` of the integrated Wiener process; the base model is a
    /// polynomial of degree `p - 1`.
    pub order: usize,
}

impl Default for BasisConfig {
    fn default() -> Self {
        Self {
            num_knots: 16,
            beta_prec: 1e-6,
            pred_step: 1.0,
            order: 1,
        }
    }
}

impl BasisConfig {
    pub fn validate(&self) -> Result<(), FashError> {
        if self.num_knots < 2 {
            return Err(FashError::config("num_knots must be >= 2"));
        }
        if self.order < 1 {
            return Err(FashError::config("order must be >= 1"));
        }
        if !(self.beta_prec.is_finite() && self.beta_prec > 0.0) {
            return Err(FashError::config("beta_prec must be finite and > 0"));
        }
        if !(self.pred_step.is_finite() && self.pred_step > 0.0) {
            return Err(FashError::config("pred_step must be finite and > 0"));
        }
        Ok(())
    }
}

/// N x K matrix of log marginal likelihoods, aligned with a `SmoothnessGrid`.
///
/// Entries are finite or `-inf` (the oracle's "no support" signal); NaN and
/// `+inf` are rejected at construction. In JSON, `-inf` is written as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawLikelihoodMatrix")]
pub struct LikelihoodMatrix {
    grid: SmoothnessGrid,
    n_grid: usize,
    unit_ids: Vec<String>,
    #[serde(with = "neg_inf_as_null")]
    rows: Vec<Vec<f64>>,
}

#[derive(Deserialize)]
struct RawLikelihoodMatrix {
    grid: SmoothnessGrid,
    n_grid: usize,
    unit_ids: Vec<String>,
    #[serde(with = "neg_inf_as_null")]
    rows: Vec<Vec<f64>>,
}

impl TryFrom<RawLikelihoodMatrix> for LikelihoodMatrix {
    type Error = FashError;

    fn try_from(raw: RawLikelihoodMatrix) -> Result<Self, Self::Error> {
        if raw.n_grid != raw.grid.len() {
            return Err(FashError::shape(format!(
                "stored K={} but grid has {} values",
                raw.n_grid,
                raw.grid.len()
            )));
        }
        LikelihoodMatrix::new(raw.grid, raw.unit_ids, raw.rows)
    }
}

impl LikelihoodMatrix {
    pub fn new(
        grid: SmoothnessGrid,
        unit_ids: Vec<String>,
        rows: Vec<Vec<f64>>,
    ) -> Result<Self, FashError> {
        if rows.is_empty() {
            return Err(FashError::shape("likelihood matrix has no units"));
        }
        if unit_ids.len() != rows.len() {
            return Err(FashError::shape(format!(
                "{} unit ids for {} likelihood rows",
                unit_ids.len(),
                rows.len()
            )));
        }
        let k = grid.len();
        for (id, row) in unit_ids.iter().zip(rows.iter()) {
            if row.len() != k {
                return Err(FashError::shape(format!(
                    "row for unit '{id}' has {} entries, grid has {k}",
                    row.len()
                )));
            }
            if row.iter().any(|v| v.is_nan() || *v == f64::INFINITY) {
                return Err(FashError::shape(format!(
                    "row for unit '{id}' contains NaN or +inf"
                )));
            }
        }
        Ok(Self {
            grid,
            n_grid: k,
            unit_ids,
            rows,
        })
    }

    pub fn grid(&self) -> &SmoothnessGrid {
        &self.grid
    }

    pub fn n_units(&self) -> usize {
        self.rows.len()
    }

    pub fn n_grid(&self) -> usize {
        self.n_grid
    }

    pub fn unit_ids(&self) -> &[String] {
        &self.unit_ids
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.rows[i]
    }

    /// True when every entry of row `i` is `-inf`.
    pub fn is_degenerate_row(&self, i: usize) -> bool {
        self.rows[i].iter().all(|v| *v == f64::NEG_INFINITY)
    }
}

/// Population-level mixing weights over the smoothness grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawMixtureWeights")]
pub struct MixtureWeights {
    grid: SmoothnessGrid,
    weights: Vec<f64>,
}

#[derive(Deserialize)]
struct RawMixtureWeights {
    grid: SmoothnessGrid,
    weights: Vec<f64>,
}

impl TryFrom<RawMixtureWeights> for MixtureWeights {
    type Error = FashError;

    fn try_from(raw: RawMixtureWeights) -> Result<Self, Self::Error> {
        MixtureWeights::new(raw.grid, raw.weights)
    }
}

impl MixtureWeights {
    pub fn new(grid: SmoothnessGrid, weights: Vec<f64>) -> Result<Self, FashError> {
        if weights.len() != grid.len() {
            return Err(FashError::shape(format!(
                "{} mixture weights for a grid of {} points",
                weights.len(),
                grid.len()
            )));
        }
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(FashError::shape(
                "mixture weights must be finite and non-negative",
            ));
        }
        let total: f64 = weights.iter().sum();
        if (total - 1.0).abs() > SIMPLEX_TOL {
            return Err(FashError::shape(format!(
                "mixture weights sum to {total}, expected 1"
            )));
        }
        Ok(Self { grid, weights })
    }

    /// Equal weight on every grid point.
    pub fn uniform(grid: SmoothnessGrid) -> Self {
        let k = grid.len();
        Self {
            grid,
            weights: vec![1.0 / k as f64; k],
        }
    }

    pub fn grid(&self) -> &SmoothnessGrid {
        &self.grid
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// Prior mass on the non-dynamic class.
    pub fn null_weight(&self) -> f64 {
        self.weights[0]
    }

    /// Grid indices whose weight fell below `threshold`.
    ///
    /// Pruned points stay in `weights()` so indexing matches the grid.
    pub fn pruned(&self, threshold: f64) -> Vec<usize> {
        self.weights
            .iter()
            .enumerate()
            .filter(|(_, w)| **w < threshold)
            .map(|(j, _)| j)
            .collect()
    }
}

/// Posterior class probabilities for one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PosteriorWeights {
    pub unit_id: String,
    pub probs: Vec<f64>,
}

impl PosteriorWeights {
    /// Posterior probability of the non-dynamic class.
    pub fn local_fdr(&self) -> f64 {
        self.probs[0]
    }

    /// Posterior mean of the smoothness value.
    pub fn mean_smoothness(&self, grid: &SmoothnessGrid) -> f64 {
        self.probs
            .iter()
            .zip(grid.values())
            .map(|(p, s)| p * s)
            .sum()
    }
}

/// Fitted function of one (unit, grid point) pair, at the unit's times.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedFunction {
    pub times: Vec<f64>,
    pub mean: Vec<f64>,
    pub sd: Vec<f64>,
}

/// Posterior-weighted function estimate for reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSummary {
    pub unit_id: String,
    pub level: f64,
    pub times: Vec<f64>,
    pub mean: Vec<f64>,
    pub sd: Vec<f64>,
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

/// What to do with units that hit an `OracleFailure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Remove the unit from the run and report it.
    Drop,
    /// Stop the run at the first failure (in unit order).
    Abort,
}

/// A full run's configuration as understood by the pipeline.
///
/// This is derived from CLI flags (plus defaults).
#[derive(Debug, Clone)]
pub struct FashConfig {
    pub csv_path: PathBuf,
    /// Noise SD used for rows without an `sd` column value.
    pub default_noise_sd: Option<f64>,

    pub grid: SmoothnessGrid,
    pub basis: BasisConfig,
    pub mixture: MixtureOptions,
    pub failure_policy: FailurePolicy,

    pub alpha: f64,
    /// Credible level of the reported function bands.
    pub level: f64,
    pub top_n: usize,

    pub export_results: Option<PathBuf>,
    pub export_summary: Option<PathBuf>,
    pub save_matrix: Option<PathBuf>,
    pub save_weights: Option<PathBuf>,
}

impl FashConfig {
    /// Defaults for everything except the input path and grid.
    pub fn new(csv_path: PathBuf, grid: SmoothnessGrid) -> Self {
        Self {
            csv_path,
            default_noise_sd: None,
            grid,
            basis: BasisConfig::default(),
            mixture: MixtureOptions::default(),
            failure_policy: FailurePolicy::Drop,
            alpha: 0.05,
            level: 0.95,
            top_n: 20,
            export_results: None,
            export_summary: None,
            save_matrix: None,
            save_weights: None,
        }
    }

    pub fn validate(&self) -> Result<(), FashError> {
        self.basis.validate()?;
        self.mixture.validate()?;
        if !(self.alpha.is_finite() && (0.0..=1.0).contains(&self.alpha)) {
            return Err(FashError::config(format!(
                "alpha must be within [0, 1] (got {})",
                self.alpha
            )));
        }
        if !(self.level.is_finite() && self.level > 0.0 && self.level < 1.0) {
            return Err(FashError::config(format!(
                "credible level must be within (0, 1) (got {})",
                self.level
            )));
        }
        Ok(())
    }
}

/// Persisted likelihood matrix (`--save-matrix`).
///
/// The basis configuration is recorded so a later refit can tell which
/// oracle settings produced the matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixFile {
    pub tool: String,
    pub created: DateTime<Utc>,
    pub basis: BasisConfig,
    pub matrix: LikelihoodMatrix,
}

/// Persisted mixture fit (`--save-weights`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightsFile {
    pub tool: String,
    pub created: DateTime<Utc>,
    pub weights: MixtureWeights,
    /// Mixture log-likelihood at `weights` on the matrix it was fitted to.
    pub log_likelihood: f64,
    pub iterations: usize,
    pub converged: bool,
}

mod neg_inf_as_null {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(rows: &[Vec<f64>], serializer: S) -> Result<S::Ok, S::Error> {
        let encoded: Vec<Vec<Option<f64>>> = rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|v| if *v == f64::NEG_INFINITY { None } else { Some(*v) })
                    .collect()
            })
            .collect();
        encoded.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Vec<f64>>, D::Error> {
        let encoded: Vec<Vec<Option<f64>>> = Vec::deserialize(deserializer)?;
        Ok(encoded
            .into_iter()
            .map(|row| row.into_iter().map(|v| v.unwrap_or(f64::NEG_INFINITY)).collect())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_rejects_bad_shapes() {
        assert!(SmoothnessGrid::new(vec![]).is_err());
        assert!(SmoothnessGrid::new(vec![0.1, 0.2]).is_err());
        assert!(SmoothnessGrid::new(vec![0.0, 0.5, 0.5]).is_err());
        assert!(SmoothnessGrid::new(vec![0.0, 0.5, 0.4]).is_err());
        assert!(SmoothnessGrid::new(vec![0.0, f64::INFINITY]).is_err());
        assert!(SmoothnessGrid::new(vec![0.0]).is_ok());
        assert!(SmoothnessGrid::new(vec![0.0, 0.5, 1.0]).is_ok());
    }

    #[test]
    fn grid_deserialization_validates() {
        let ok: SmoothnessGrid = serde_json::from_str("[0.0, 1.0]").unwrap();
        assert_eq!(ok.len(), 2);
        assert!(serde_json::from_str::<SmoothnessGrid>("[1.0, 0.0]").is_err());
    }

    #[test]
    fn unit_requires_aligned_vectors() {
        assert!(Unit::new("a", vec![0.0, 1.0], vec![1.0], vec![1.0, 1.0]).is_err());
        let u = Unit::with_constant_sd("a", vec![0.0, 1.0], vec![1.0, 2.0], 0.5).unwrap();
        assert_eq!(u.noise_sd(), &[0.5, 0.5]);
    }

    #[test]
    fn likelihood_matrix_rejects_nan_and_ragged_rows() {
        let grid = SmoothnessGrid::new(vec![0.0, 1.0]).unwrap();
        let ids = vec!["a".to_string()];
        assert!(LikelihoodMatrix::new(grid.clone(), ids.clone(), vec![vec![0.0]]).is_err());
        assert!(LikelihoodMatrix::new(grid.clone(), ids.clone(), vec![vec![0.0, f64::NAN]]).is_err());
        assert!(LikelihoodMatrix::new(grid.clone(), vec![], vec![]).is_err());
        let m = LikelihoodMatrix::new(grid, ids, vec![vec![f64::NEG_INFINITY, -3.0]]).unwrap();
        assert!(!m.is_degenerate_row(0));
    }

    #[test]
    fn mixture_weights_keep_pruned_entries() {
        let grid = SmoothnessGrid::new(vec![0.0, 1.0, 2.0]).unwrap();
        let w = MixtureWeights::new(grid.clone(), vec![0.7, 0.0, 0.3]).unwrap();
        assert_eq!(w.len(), 3);
        assert_eq!(w.pruned(1e-8), vec![1]);
        assert!(MixtureWeights::new(grid.clone(), vec![0.5, 0.5]).is_err());
        assert!(MixtureWeights::new(grid, vec![0.5, 0.6, -0.1]).is_err());
    }

    #[test]
    fn posterior_mean_smoothness_weights_grid_values() {
        let grid = SmoothnessGrid::new(vec![0.0, 1.0, 3.0]).unwrap();
        let post = PosteriorWeights {
            unit_id: "a".to_string(),
            probs: vec![0.5, 0.25, 0.25],
        };
        assert!((post.local_fdr() - 0.5).abs() < 1e-15);
        assert!((post.mean_smoothness(&grid) - 1.0).abs() < 1e-15);
    }
}
