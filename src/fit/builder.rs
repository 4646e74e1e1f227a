//! Likelihood grid construction.
//!
//! Given:
//! - a collection of units (each with its own times, values and noise SDs)
//! - a smoothness grid (index 0 = non-dynamic)
//! - a shared basis configuration
//!
//! we evaluate the oracle for every (unit, grid point) pair and assemble the
//! N x K log-likelihood matrix.
//!
//! Units are independent, so they are evaluated in parallel. Each worker
//! produces its own row; rows are only assembled into a `LikelihoodMatrix`
//! after every worker has finished, so downstream stages never observe a
//! partially built matrix.
//!
//! Failures are collected per (unit, grid point) instead of aborting the
//! whole build. The caller then picks a `FailurePolicy`.

use log::{info, warn};
use rayon::prelude::*;

use crate::domain::{BasisConfig, FailurePolicy, FittedFunction, LikelihoodMatrix, SmoothnessGrid, Unit};
use crate::error::FashError;
use crate::models::LikelihoodOracle;

/// Drives a `LikelihoodOracle` across units and grid points.
#[derive(Debug, Clone, Copy)]
pub struct LikelihoodGridBuilder<'a, O: LikelihoodOracle> {
    oracle: &'a O,
    retain_fits: bool,
}

/// One unit's evaluated row.
#[derive(Debug, Clone)]
struct UnitRow {
    id: String,
    loglik: Vec<f64>,
    fits: Vec<Option<FittedFunction>>,
    failures: Vec<FashError>,
}

/// Raw output of a build: every row, including rows with failed cells.
#[derive(Debug, Clone)]
pub struct GridBuild {
    grid: SmoothnessGrid,
    rows: Vec<UnitRow>,
}

/// A resolved build: the matrix plus per-cell fitted functions (aligned with
/// matrix rows) and the units that were dropped.
#[derive(Debug, Clone)]
pub struct BuiltGrid {
    pub matrix: LikelihoodMatrix,
    /// `fits[i][j]` is the fitted function of matrix row `i` at grid point
    /// `j`; empty rows when fits were not retained.
    pub fits: Vec<Vec<Option<FittedFunction>>>,
    /// Failures of dropped units, in unit order.
    pub dropped: Vec<FashError>,
}

impl<'a, O: LikelihoodOracle> LikelihoodGridBuilder<'a, O> {
    pub fn new(oracle: &'a O) -> Self {
        Self {
            oracle,
            retain_fits: false,
        }
    }

    /// Keep each cell's fitted function (needed for function summaries).
    pub fn retain_fits(mut self, retain: bool) -> Self {
        self.retain_fits = retain;
        self
    }

    /// Evaluate every (unit, grid point) pair.
    ///
    /// Only shape/config problems fail here; oracle failures are recorded in
    /// the returned `GridBuild`.
    pub fn build(
        &self,
        units: &[Unit],
        grid: &SmoothnessGrid,
        config: &BasisConfig,
    ) -> Result<GridBuild, FashError> {
        if units.is_empty() {
            return Err(FashError::shape("no units to evaluate"));
        }
        config.validate()?;

        info!(
            "Evaluating likelihood grid: {} units x {} grid points",
            units.len(),
            grid.len()
        );

        let rows: Vec<UnitRow> = units
            .par_iter()
            .map(|unit| self.evaluate_unit(unit, grid, config))
            .collect();

        Ok(GridBuild {
            grid: grid.clone(),
            rows,
        })
    }

    fn evaluate_unit(&self, unit: &Unit, grid: &SmoothnessGrid, config: &BasisConfig) -> UnitRow {
        let k = grid.len();
        let mut loglik = vec![f64::NEG_INFINITY; k];
        let mut fits = if self.retain_fits {
            vec![None; k]
        } else {
            Vec::new()
        };
        let mut failures = Vec::new();

        for (j, &smoothness) in grid.values().iter().enumerate() {
            // Grid point 0 is the base model, not "process with sigma = 0".
            let result = if j == 0 {
                self.oracle
                    .evaluate_base(unit.times(), unit.values(), unit.noise_sd(), config)
            } else {
                self.oracle.evaluate(
                    unit.times(),
                    unit.values(),
                    unit.noise_sd(),
                    smoothness,
                    config,
                )
            };

            match result {
                Ok(out) if out.log_likelihood.is_finite() || out.log_likelihood == f64::NEG_INFINITY => {
                    loglik[j] = out.log_likelihood;
                    if self.retain_fits {
                        fits[j] = Some(out.fitted);
                    }
                }
                Ok(out) => failures.push(FashError::OracleFailure {
                    unit_id: unit.id().to_string(),
                    grid_index: j,
                    reason: format!("oracle returned log-likelihood {}", out.log_likelihood),
                }),
                Err(reason) => failures.push(FashError::OracleFailure {
                    unit_id: unit.id().to_string(),
                    grid_index: j,
                    reason,
                }),
            }
        }

        UnitRow {
            id: unit.id().to_string(),
            loglik,
            fits,
            failures,
        }
    }
}

impl GridBuild {
    /// All failures, ordered by unit then grid index.
    pub fn failures(&self) -> Vec<&FashError> {
        self.rows.iter().flat_map(|r| r.failures.iter()).collect()
    }

    /// Apply `policy` to failed units and assemble the matrix.
    pub fn resolve(self, policy: FailurePolicy) -> Result<BuiltGrid, FashError> {
        let mut ids = Vec::with_capacity(self.rows.len());
        let mut matrix_rows = Vec::with_capacity(self.rows.len());
        let mut fits = Vec::with_capacity(self.rows.len());
        let mut dropped = Vec::new();

        for row in self.rows {
            if let Some(first) = row.failures.first() {
                match policy {
                    FailurePolicy::Abort => return Err(first.clone()),
                    FailurePolicy::Drop => {
                        warn!("Dropping unit '{}': {}", row.id, first);
                        dropped.extend(row.failures);
                        continue;
                    }
                }
            }
            ids.push(row.id);
            matrix_rows.push(row.loglik);
            fits.push(row.fits);
        }

        if matrix_rows.is_empty() {
            return Err(FashError::shape("every unit failed likelihood evaluation"));
        }

        let matrix = LikelihoodMatrix::new(self.grid, ids, matrix_rows)?;
        Ok(BuiltGrid {
            matrix,
            fits,
            dropped,
        })
    }
}

/// Build the likelihood matrix, failing on the first oracle failure.
pub fn build_likelihood_matrix<O: LikelihoodOracle>(
    oracle: &O,
    units: &[Unit],
    grid: &SmoothnessGrid,
    config: &BasisConfig,
) -> Result<LikelihoodMatrix, FashError> {
    let built = LikelihoodGridBuilder::new(oracle)
        .build(units, grid, config)?
        .resolve(FailurePolicy::Abort)?;
    Ok(built.matrix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{IwpOracle, OracleOutput};

    /// Oracle that records nothing and fails for unit values starting at 99.
    struct Scripted;

    impl LikelihoodOracle for Scripted {
        fn evaluate_base(
            &self,
            times: &[f64],
            values: &[f64],
            _noise_sd: &[f64],
            _config: &BasisConfig,
        ) -> Result<OracleOutput, String> {
            Ok(OracleOutput {
                log_likelihood: -1.0,
                fitted: FittedFunction {
                    times: times.to_vec(),
                    mean: values.to_vec(),
                    sd: vec![0.0; times.len()],
                },
            })
        }

        fn evaluate(
            &self,
            times: &[f64],
            values: &[f64],
            _noise_sd: &[f64],
            smoothness: f64,
            _config: &BasisConfig,
        ) -> Result<OracleOutput, String> {
            if values[0] == 99.0 && smoothness > 1.5 {
                return Err("scripted failure".to_string());
            }
            Ok(OracleOutput {
                log_likelihood: -1.0 - smoothness,
                fitted: FittedFunction {
                    times: times.to_vec(),
                    mean: values.to_vec(),
                    sd: vec![smoothness; times.len()],
                },
            })
        }
    }

    fn unit(id: &str, first: f64) -> Unit {
        Unit::with_constant_sd(id, vec![0.0, 1.0, 2.0], vec![first, 1.0, 2.0], 1.0).unwrap()
    }

    #[test]
    fn grid_point_zero_uses_base_model() {
        let grid = SmoothnessGrid::new(vec![0.0, 1.0, 2.0]).unwrap();
        let m = build_likelihood_matrix(&Scripted, &[unit("a", 0.0)], &grid, &BasisConfig::default())
            .unwrap();
        assert_eq!(m.row(0), &[-1.0, -2.0, -3.0]);
    }

    #[test]
    fn failures_are_attributed_and_collected() {
        let grid = SmoothnessGrid::new(vec![0.0, 1.0, 2.0]).unwrap();
        let units = vec![unit("a", 0.0), unit("bad", 99.0), unit("c", 0.0)];
        let build = LikelihoodGridBuilder::new(&Scripted)
            .build(&units, &grid, &BasisConfig::default())
            .unwrap();

        let failures = build.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(
            failures[0],
            &FashError::OracleFailure {
                unit_id: "bad".to_string(),
                grid_index: 2,
                reason: "scripted failure".to_string(),
            }
        );

        let aborted = build.clone().resolve(FailurePolicy::Abort).unwrap_err();
        assert!(matches!(aborted, FashError::OracleFailure { grid_index: 2, .. }));

        let built = build.resolve(FailurePolicy::Drop).unwrap();
        assert_eq!(built.matrix.unit_ids(), &["a".to_string(), "c".to_string()]);
        assert_eq!(built.dropped.len(), 1);
    }

    #[test]
    fn retained_fits_align_with_rows() {
        let grid = SmoothnessGrid::new(vec![0.0, 1.0]).unwrap();
        let built = LikelihoodGridBuilder::new(&Scripted)
            .retain_fits(true)
            .build(&[unit("a", 0.0)], &grid, &BasisConfig::default())
            .unwrap()
            .resolve(FailurePolicy::Abort)
            .unwrap();
        assert_eq!(built.fits.len(), 1);
        assert_eq!(built.fits[0].len(), 2);
        assert_eq!(built.fits[0][1].as_ref().unwrap().sd, vec![1.0; 3]);
    }

    #[test]
    fn empty_unit_collection_is_a_shape_error() {
        let grid = SmoothnessGrid::new(vec![0.0]).unwrap();
        let err = LikelihoodGridBuilder::new(&IwpOracle)
            .build(&[], &grid, &BasisConfig::default())
            .unwrap_err();
        assert!(matches!(err, FashError::ShapeMismatch(_)));
    }

    #[test]
    fn iwp_oracle_failure_for_single_observation() {
        let grid = SmoothnessGrid::new(vec![0.0, 1.0]).unwrap();
        let short = Unit::with_constant_sd("short", vec![0.0], vec![1.0], 1.0).unwrap();
        let err = build_likelihood_matrix(&IwpOracle, &[short], &grid, &BasisConfig::default())
            .unwrap_err();
        assert!(matches!(err, FashError::OracleFailure { grid_index: 0, .. }));
    }
}
