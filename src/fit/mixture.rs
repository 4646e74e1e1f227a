//! Empirical-Bayes mixing weights over the smoothness grid.
//!
//! We maximize
//!
//! ```text
//! F(π) = Σ_i log Σ_j π_j exp(L_ij)      over the probability simplex
//! ```
//!
//! with sequential quadratic programming (mix-SQP). Each iteration:
//!
//! 1. rescales every row by its maximum so that `exp` never overflows
//!    (`-inf` entries become exact zeros),
//! 2. builds the gradient and Hessian of the convex surrogate
//!    `f(x) = -(1/W) Σ_i w_i log (L x)_i + Σ_j x_j`, whose minimizer over
//!    `x >= 0` lies on the simplex,
//! 3. solves the quadratic model with a primal active-set method,
//! 4. backtracks until `f` decreases and renormalizes onto the simplex.
//!
//! Because `s - log s >= 1`, renormalizing never increases `f`, so `F` is
//! non-decreasing across accepted iterations. A final check rejects any step
//! that would still lower `F` through rounding.
//!
//! Numerical notes:
//! - Rows whose entries are all `-inf` carry no information and are excluded
//!   from the objective; they are reported as degenerate.
//! - The optional null penalty `λ > 1` adds `(λ - 1) log π_0`, implemented as
//!   a weighted pseudo-row `[1, 0, ..., 0]`.

use log::{debug, info, warn};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::domain::{LikelihoodMatrix, MixtureWeights};
use crate::error::FashError;

/// Relative ridge added to the Hessian diagonal.
const HESSIAN_RIDGE: f64 = 1e-8;
/// Armijo sufficient-decrease constant.
const ARMIJO_C: f64 = 0.01;
/// Smallest backtracking step before the iteration is declared stalled.
const MIN_STEP: f64 = 1e-10;
/// Dual feasibility accepted as optimal once rounding blocks further progress.
const STALLED_KKT_TOL: f64 = 1e-6;

/// Optimizer settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MixtureOptions {
    /// Maximum number of SQP iterations.
    pub max_iter: usize,
    /// Stop when the per-unit objective improves by less than this.
    pub tol: f64,
    /// Dual feasibility tolerance for the optimality check.
    pub kkt_tol: f64,
    /// Iteration cap of the inner active-set solver.
    pub max_active_iter: usize,
    /// Weights below this are zeroed and reported as pruned.
    pub prune_threshold: f64,
    /// Null penalty `λ >= 1`; `1` means no penalty.
    pub null_penalty: f64,
}

impl Default for MixtureOptions {
    fn default() -> Self {
        Self {
            max_iter: 200,
            tol: 1e-8,
            kkt_tol: 1e-8,
            max_active_iter: 100,
            prune_threshold: 1e-8,
            null_penalty: 1.0,
        }
    }
}

impl MixtureOptions {
    pub fn validate(&self) -> Result<(), FashError> {
        if self.max_iter == 0 || self.max_active_iter == 0 {
            return Err(FashError::config("iteration caps must be >= 1"));
        }
        for (name, v) in [
            ("tol", self.tol),
            ("kkt_tol", self.kkt_tol),
            ("prune_threshold", self.prune_threshold),
        ] {
            if !(v.is_finite() && v >= 0.0) {
                return Err(FashError::config(format!("{name} must be finite and >= 0")));
            }
        }
        if !(self.null_penalty.is_finite() && self.null_penalty >= 1.0) {
            return Err(FashError::config("null_penalty must be finite and >= 1"));
        }
        Ok(())
    }
}

/// Fitted weights plus convergence diagnostics.
#[derive(Debug, Clone)]
pub struct MixtureFit {
    pub weights: MixtureWeights,
    /// Unpenalized `F(π)` at the returned weights (degenerate rows skipped).
    pub log_likelihood: f64,
    /// Penalized objective after each accepted iterate (starts at the initial point).
    pub trace: Vec<f64>,
    pub iterations: usize,
    pub converged: bool,
    /// Grid indices whose weight was zeroed by pruning.
    pub pruned: Vec<usize>,
    /// Matrix rows excluded from the objective (all `-inf`).
    pub degenerate_rows: Vec<usize>,
}

/// Row-rescaled likelihoods for the surrogate objective.
struct Problem {
    /// `exp(L_ij - max_i)`; exact zeros for `-inf`.
    l: DMatrix<f64>,
    /// Row weights (`1` for data rows, `λ - 1` for the penalty row).
    w: DVector<f64>,
    total_w: f64,
    /// `Σ_i w_i max_i`, restoring the scale dropped by rescaling.
    offset: f64,
}

impl Problem {
    fn new(matrix: &LikelihoodMatrix, null_penalty: f64) -> (Self, Vec<usize>) {
        let k = matrix.n_grid();
        let mut degenerate = Vec::new();
        let mut rows: Vec<Vec<f64>> = Vec::new();
        let mut weights = Vec::new();
        let mut offset = 0.0;

        for i in 0..matrix.n_units() {
            if matrix.is_degenerate_row(i) {
                degenerate.push(i);
                continue;
            }
            let row = matrix.row(i);
            let max = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            rows.push(row.iter().map(|v| (v - max).exp()).collect());
            weights.push(1.0);
            offset += max;
        }

        if null_penalty > 1.0 {
            let mut pseudo = vec![0.0; k];
            pseudo[0] = 1.0;
            rows.push(pseudo);
            weights.push(null_penalty - 1.0);
        }

        let n = rows.len();
        let l = DMatrix::from_fn(n, k, |i, j| rows[i][j]);
        let w = DVector::from_vec(weights);
        let total_w = w.sum();
        (
            Self {
                l,
                w,
                total_w,
                offset,
            },
            degenerate,
        )
    }

    fn n_rows(&self) -> usize {
        self.l.nrows()
    }

    /// Surrogate `f(x)`; `+inf` when some weighted row has zero likelihood.
    fn surrogate(&self, x: &DVector<f64>) -> f64 {
        let u = &self.l * x;
        let mut acc = 0.0;
        for i in 0..u.len() {
            if u[i] <= 0.0 {
                return f64::INFINITY;
            }
            acc += self.w[i] * u[i].ln();
        }
        -acc / self.total_w + x.sum()
    }

    /// Penalized `F` for a point on the simplex; `-inf` when infeasible.
    fn objective(&self, x: &DVector<f64>) -> f64 {
        let u = &self.l * x;
        let mut acc = self.offset;
        for i in 0..u.len() {
            if u[i] <= 0.0 {
                return f64::NEG_INFINITY;
            }
            acc += self.w[i] * u[i].ln();
        }
        acc
    }

    /// Gradient and Hessian of the surrogate at `x`.
    fn derivatives(&self, x: &DVector<f64>) -> (DVector<f64>, DMatrix<f64>) {
        let k = self.l.ncols();
        let u = &self.l * x;
        let d = DVector::from_fn(u.len(), |i, _| self.w[i] / (self.total_w * u[i]));
        let g = DVector::from_element(k, 1.0) - self.l.transpose() * &d;

        let mut scaled = self.l.clone();
        for i in 0..u.len() {
            let c = (self.w[i] / self.total_w).sqrt() / u[i];
            scaled.row_mut(i).scale_mut(c);
        }
        let mut h = scaled.transpose() * &scaled;
        let max_diag = (0..k).map(|j| h[(j, j)]).fold(0.0, f64::max);
        for j in 0..k {
            h[(j, j)] += HESSIAN_RIDGE * (1.0 + max_diag);
        }
        (g, h)
    }
}

/// Fit mixing weights by maximizing the marginal log-likelihood.
///
/// `init`, when given, must be aligned with the matrix grid. Non-convergence
/// within `max_iter` is logged and the best iterate is returned.
pub fn fit_mixture(
    matrix: &LikelihoodMatrix,
    init: Option<&MixtureWeights>,
    opts: &MixtureOptions,
) -> Result<MixtureFit, FashError> {
    opts.validate()?;
    let grid = matrix.grid().clone();
    let k = grid.len();
    if let Some(init) = init {
        if init.grid() != &grid {
            return Err(FashError::shape(format!(
                "initial weights are on a {}-point grid, matrix has {k}",
                init.len()
            )));
        }
    }

    let (problem, degenerate_rows) = Problem::new(matrix, opts.null_penalty);
    for &i in &degenerate_rows {
        warn!(
            "Unit '{}' has no finite likelihood; excluded from mixture fit",
            matrix.unit_ids()[i]
        );
    }

    if k == 1 {
        let weights = MixtureWeights::new(grid, vec![1.0])?;
        let log_likelihood = log_likelihood(matrix, &weights)?;
        return Ok(MixtureFit {
            weights,
            log_likelihood,
            trace: vec![problem.objective(&DVector::from_element(1, 1.0))],
            iterations: 0,
            converged: true,
            pruned: Vec::new(),
            degenerate_rows,
        });
    }

    if problem.n_rows() == 0 {
        warn!("No informative rows for the mixture fit; returning the initial point");
        let weights = init.cloned().unwrap_or_else(|| MixtureWeights::uniform(grid));
        let log_likelihood = log_likelihood(matrix, &weights)?;
        return Ok(MixtureFit {
            weights,
            log_likelihood,
            trace: Vec::new(),
            iterations: 0,
            converged: true,
            pruned: Vec::new(),
            degenerate_rows,
        });
    }

    let uniform = DVector::from_element(k, 1.0 / k as f64);
    let mut x = match init {
        Some(w) => DVector::from_row_slice(w.weights()),
        None => uniform.clone(),
    };
    let mut obj = problem.objective(&x);
    if !obj.is_finite() {
        warn!("Initial mixture weights give zero likelihood to some unit; starting from uniform");
        x = uniform;
        obj = problem.objective(&x);
    }

    let mut trace = vec![obj];
    let mut converged = false;
    let mut iterations = 0;

    for iter in 1..=opts.max_iter {
        let (g, h) = problem.derivatives(&x);
        let min_g = g.min();
        if min_g >= -opts.kkt_tol {
            converged = true;
            break;
        }

        let b = &g - &h * &x;
        let y = active_set_qp(&h, &b, &x, opts);
        let p = &y - &x;
        let slope = g.dot(&p);
        if !(slope < 0.0) {
            debug!("mix-SQP iter {iter}: no descent direction (slope {slope:.3e})");
            converged = settled(min_g, -slope, opts);
            break;
        }

        let f0 = problem.surrogate(&x);
        let mut step = 1.0;
        let mut candidate = None;
        while step >= MIN_STEP {
            let trial = &x + &p * step;
            let f1 = problem.surrogate(&trial);
            if f1.is_finite() && f1 <= f0 + ARMIJO_C * step * slope {
                candidate = Some(trial);
                break;
            }
            step *= 0.5;
        }
        let Some(trial) = candidate else {
            debug!("mix-SQP iter {iter}: line search stalled");
            converged = settled(min_g, -slope, opts);
            break;
        };

        let next = normalize(trial);
        let next_obj = problem.objective(&next);
        if !(next_obj >= obj) {
            debug!("mix-SQP iter {iter}: rejected step ({next_obj:.12e} < {obj:.12e})");
            converged = settled(min_g, (next_obj - obj) / problem.total_w, opts);
            break;
        }

        let gain = next_obj - obj;
        x = next;
        obj = next_obj;
        trace.push(obj);
        iterations = iter;
        debug!("mix-SQP iter {iter}: objective {obj:.10e} (step {step:.3e})");

        if gain / problem.total_w <= opts.tol {
            converged = true;
            break;
        }
    }

    if !converged {
        warn!(
            "Mixture optimizer stopped after {iterations} iterations without meeting tolerance; using best iterate"
        );
    }

    let (weights_vec, pruned) = prune(&problem, x, opts.prune_threshold);
    let weights = MixtureWeights::new(grid, weights_vec)?;
    let log_likelihood = log_likelihood(matrix, &weights)?;
    info!(
        "Mixture fit: {iterations} iterations, converged={converged}, null weight {:.4}",
        weights.null_weight()
    );

    Ok(MixtureFit {
        weights,
        log_likelihood,
        trace,
        iterations,
        converged,
        pruned,
        degenerate_rows,
    })
}

/// `Σ_i log Σ_j π_j exp(L_ij)` over the non-degenerate rows.
pub fn log_likelihood(matrix: &LikelihoodMatrix, weights: &MixtureWeights) -> Result<f64, FashError> {
    if weights.grid() != matrix.grid() {
        return Err(FashError::shape(format!(
            "{} mixture weights for a {}-point likelihood matrix",
            weights.len(),
            matrix.n_grid()
        )));
    }
    let log_pi: Vec<f64> = weights.weights().iter().map(|w| w.ln()).collect();
    let mut total = 0.0;
    for i in 0..matrix.n_units() {
        if matrix.is_degenerate_row(i) {
            continue;
        }
        total += log_sum_exp(matrix.row(i).iter().zip(&log_pi).map(|(l, lp)| l + lp));
    }
    Ok(total)
}

/// Stable `log Σ exp(v)`; `-inf` for an empty or all-`-inf` input.
pub fn log_sum_exp(values: impl Iterator<Item = f64> + Clone) -> f64 {
    let max = values.clone().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    max + values.map(|v| (v - max).exp()).sum::<f64>().ln()
}

/// Whether an iterate that cannot make progress counts as optimal.
///
/// `attempted_gain` is per unit of row weight; a non-positive value is below
/// any tolerance.
fn settled(min_g: f64, attempted_gain: f64, opts: &MixtureOptions) -> bool {
    attempted_gain <= opts.tol || -min_g <= STALLED_KKT_TOL.max(opts.kkt_tol)
}

fn normalize(mut x: DVector<f64>) -> DVector<f64> {
    x.iter_mut().for_each(|v| *v = v.max(0.0));
    let s = x.sum();
    x / s
}

/// Zero weights below `threshold` unless that would leave a unit without support.
fn prune(problem: &Problem, x: DVector<f64>, threshold: f64) -> (Vec<f64>, Vec<usize>) {
    let small: Vec<usize> = (0..x.len()).filter(|&j| x[j] < threshold).collect();
    if small.iter().all(|&j| x[j] == 0.0) {
        return (x.iter().copied().collect(), small);
    }
    let mut zeroed = x.clone();
    for &j in &small {
        zeroed[j] = 0.0;
    }
    let zeroed = normalize(zeroed);
    if problem.objective(&zeroed).is_finite() {
        (zeroed.iter().copied().collect(), small)
    } else {
        (normalize(x).iter().copied().collect(), Vec::new())
    }
}

/// Primal active-set solver for `min ½ yᵀHy + bᵀy` subject to `y >= 0`,
/// started from the feasible point `start`.
fn active_set_qp(h: &DMatrix<f64>, b: &DVector<f64>, start: &DVector<f64>, opts: &MixtureOptions) -> DVector<f64> {
    let k = start.len();
    let mut y = start.clone();
    let mut working: Vec<bool> = y.iter().map(|v| *v <= 0.0).collect();

    for _ in 0..opts.max_active_iter {
        let grad = h * &y + b;
        let free: Vec<usize> = (0..k).filter(|&j| !working[j]).collect();

        let mut p = DVector::<f64>::zeros(k);
        if !free.is_empty() {
            let h_ff = DMatrix::from_fn(free.len(), free.len(), |a, c| h[(free[a], free[c])]);
            let rhs = DVector::from_fn(free.len(), |a, _| -grad[free[a]]);
            let Some(chol) = h_ff.cholesky() else {
                break;
            };
            let p_f = chol.solve(&rhs);
            for (a, &j) in free.iter().enumerate() {
                p[j] = p_f[a];
            }
        }

        if p.amax() <= 1e-14 * (1.0 + y.amax()) {
            // Stationary on the current face: release the most violated bound.
            let release = (0..k)
                .filter(|&j| working[j])
                .min_by(|&a, &c| grad[a].total_cmp(&grad[c]));
            match release {
                Some(j) if grad[j] < -opts.kkt_tol => working[j] = false,
                _ => break,
            }
            continue;
        }

        let mut alpha = 1.0;
        let mut block = None;
        for &j in &free {
            if p[j] < 0.0 {
                let ratio = -y[j] / p[j];
                if ratio < alpha {
                    alpha = ratio;
                    block = Some(j);
                }
            }
        }
        y += &p * alpha;
        if let Some(j) = block {
            y[j] = 0.0;
            working[j] = true;
        }
    }

    y.iter_mut().for_each(|v| *v = v.max(0.0));
    y
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SmoothnessGrid;
    use rand::prelude::*;
    use rand::rngs::StdRng;

    fn matrix(rows: Vec<Vec<f64>>) -> LikelihoodMatrix {
        let k = rows[0].len();
        let grid = SmoothnessGrid::new((0..k).map(|j| j as f64).collect()).unwrap();
        let ids = (0..rows.len()).map(|i| format!("u{i}")).collect();
        LikelihoodMatrix::new(grid, ids, rows).unwrap()
    }

    fn assert_simplex(w: &[f64]) {
        assert!(w.iter().all(|v| *v >= 0.0 && v.is_finite()));
        assert!((w.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn single_grid_point_is_trivial() {
        let m = matrix(vec![vec![-3.0], vec![-1.0]]);
        let fit = fit_mixture(&m, None, &MixtureOptions::default()).unwrap();
        assert_eq!(fit.weights.weights(), &[1.0]);
        assert!(fit.converged);
        assert!((fit.log_likelihood - (-4.0)).abs() < 1e-12);
    }

    #[test]
    fn recovers_known_two_class_proportions() {
        // 30 units strongly favor class 0, 10 strongly favor class 1.
        let mut rows = Vec::new();
        for _ in 0..30 {
            rows.push(vec![0.0, -20.0]);
        }
        for _ in 0..10 {
            rows.push(vec![-20.0, 0.0]);
        }
        let fit = fit_mixture(&matrix(rows), None, &MixtureOptions::default()).unwrap();
        assert_simplex(fit.weights.weights());
        assert!((fit.weights.weights()[0] - 0.75).abs() < 1e-4, "{:?}", fit.weights);
        assert!(fit.converged);
    }

    #[test]
    fn matches_em_fixed_point_on_overlapping_classes() {
        let rows = vec![
            vec![-1.0, -1.5, -4.0],
            vec![-2.0, -1.0, -1.2],
            vec![-0.5, -0.7, -3.0],
            vec![-3.0, -1.0, -0.2],
            vec![-1.1, -1.0, -1.3],
        ];
        let m = matrix(rows);
        let fit = fit_mixture(&m, None, &MixtureOptions::default()).unwrap();
        assert_simplex(fit.weights.weights());

        // One EM update from the optimum should (almost) not move it.
        let pi = fit.weights.weights();
        let mut em = vec![0.0; pi.len()];
        for i in 0..m.n_units() {
            let row = m.row(i);
            let denom: f64 = (0..pi.len()).map(|j| pi[j] * row[j].exp()).sum();
            for j in 0..pi.len() {
                em[j] += pi[j] * row[j].exp() / denom / m.n_units() as f64;
            }
        }
        for j in 0..pi.len() {
            assert!((em[j] - pi[j]).abs() < 1e-5, "j={j}: em {} vs sqp {}", em[j], pi[j]);
        }
    }

    #[test]
    fn objective_is_non_decreasing_on_random_matrices() {
        let mut rng = StdRng::seed_from_u64(7);
        for trial in 0..25 {
            let n = rng.gen_range(5..60);
            let k = rng.gen_range(2..9);
            let scale = if trial % 3 == 0 { 500.0 } else { 10.0 };
            let mut rows = Vec::with_capacity(n);
            for _ in 0..n {
                let mut row: Vec<f64> = (0..k).map(|_| -scale * rng.gen_range(0.0..1.0)).collect();
                if rng.gen_bool(0.3) {
                    let j = rng.gen_range(0..k);
                    row[j] = f64::NEG_INFINITY;
                }
                if rng.gen_bool(0.1) {
                    // Extreme magnitude row.
                    row.iter_mut().for_each(|v| *v -= 1e5);
                }
                rows.push(row);
            }
            let m = matrix(rows);
            let fit = fit_mixture(&m, None, &MixtureOptions::default()).unwrap();
            assert_simplex(fit.weights.weights());
            for w in fit.trace.windows(2) {
                assert!(w[1] >= w[0], "trial {trial}: {} -> {}", w[0], w[1]);
            }
            let uniform = MixtureWeights::uniform(m.grid().clone());
            assert!(fit.log_likelihood >= log_likelihood(&m, &uniform).unwrap() - 1e-9);
        }
    }

    #[test]
    fn refit_from_optimum_is_a_fixed_point() {
        let mut rng = StdRng::seed_from_u64(11);
        let rows: Vec<Vec<f64>> = (0..40)
            .map(|_| (0..5).map(|_| -20.0 * rng.gen_range(0.0..1.0)).collect())
            .collect();
        let m = matrix(rows);
        let opts = MixtureOptions::default();
        let first = fit_mixture(&m, None, &opts).unwrap();
        let again = fit_mixture(&m, Some(&first.weights), &opts).unwrap();
        assert!(again.iterations <= 1);
        let gain = again.trace[again.trace.len() - 1] - again.trace[0];
        assert!(gain >= 0.0);
        assert!(gain / (m.n_units() as f64) < opts.tol);
        assert!((again.log_likelihood - first.log_likelihood).abs() < 1e-6);
    }

    #[test]
    fn stalls_at_the_optimum_count_as_converged() {
        let mut rng = StdRng::seed_from_u64(23);
        for trial in 0..40 {
            let n = rng.gen_range(50..=400);
            let k = rng.gen_range(5..=25);
            let offset = if trial % 4 == 0 { -1e4 } else { 0.0 };
            let rows: Vec<Vec<f64>> = (0..n)
                .map(|_| (0..k).map(|_| offset - 15.0 * rng.gen_range(0.0..1.0)).collect())
                .collect();
            let m = matrix(rows);
            let opts = MixtureOptions::default();
            let fit = fit_mixture(&m, None, &opts).unwrap();
            assert!(fit.converged, "trial {trial}: n={n} k={k} stopped after {} iterations", fit.iterations);
            assert!(fit.iterations < opts.max_iter);
        }
    }

    #[test]
    fn zero_tolerances_still_converge_from_the_optimum() {
        let mut rng = StdRng::seed_from_u64(29);
        let rows: Vec<Vec<f64>> = (0..60)
            .map(|_| (0..8).map(|_| -10.0 * rng.gen_range(0.0..1.0)).collect())
            .collect();
        let m = matrix(rows);
        let first = fit_mixture(&m, None, &MixtureOptions::default()).unwrap();

        // No gain or KKT slack: only rounding-limited stops remain.
        let exact = MixtureOptions {
            tol: 0.0,
            kkt_tol: 0.0,
            prune_threshold: 0.0,
            ..MixtureOptions::default()
        };
        let again = fit_mixture(&m, Some(&first.weights), &exact).unwrap();
        assert!(again.converged, "stopped after {} iterations", again.iterations);
        assert!(again.iterations < exact.max_iter);
        assert!((again.log_likelihood - first.log_likelihood).abs() < 1e-6);
    }

    #[test]
    fn iteration_cap_returns_the_best_iterate() {
        let mut rows = Vec::new();
        for _ in 0..30 {
            rows.push(vec![0.0, -3.0, -20.0]);
        }
        for _ in 0..10 {
            rows.push(vec![-20.0, -1.0, 0.0]);
        }
        let m = matrix(rows);
        let opts = MixtureOptions {
            max_iter: 1,
            ..MixtureOptions::default()
        };
        let fit = fit_mixture(&m, None, &opts).unwrap();
        assert!(!fit.converged);
        assert_eq!(fit.iterations, 1);
        assert_eq!(fit.trace.len(), 2);
        assert_simplex(fit.weights.weights());

        let uniform = MixtureWeights::uniform(m.grid().clone());
        assert!(fit.log_likelihood >= log_likelihood(&m, &uniform).unwrap());
    }

    #[test]
    fn degenerate_rows_are_excluded_not_propagated() {
        let m = matrix(vec![
            vec![0.0, -5.0],
            vec![f64::NEG_INFINITY, f64::NEG_INFINITY],
            vec![-5.0, 0.0],
        ]);
        let fit = fit_mixture(&m, None, &MixtureOptions::default()).unwrap();
        assert_eq!(fit.degenerate_rows, vec![1]);
        assert!(fit.log_likelihood.is_finite());
        assert_simplex(fit.weights.weights());
    }

    #[test]
    fn unused_grid_points_are_pruned_but_kept() {
        // Grid point 2 has negligible likelihood for every unit.
        let m = matrix(vec![vec![0.0, -1.0, -200.0], vec![-1.0, 0.0, -200.0], vec![0.0, -0.5, -300.0]]);
        let fit = fit_mixture(&m, None, &MixtureOptions::default()).unwrap();
        assert_eq!(fit.weights.len(), 3);
        assert!(fit.pruned.contains(&2));
        assert_eq!(fit.weights.weights()[2], 0.0);
    }

    #[test]
    fn null_penalty_increases_null_weight() {
        let rows: Vec<Vec<f64>> = (0..20)
            .map(|i| if i % 2 == 0 { vec![0.0, -0.5] } else { vec![-0.5, 0.0] })
            .collect();
        let m = matrix(rows);
        let plain = fit_mixture(&m, None, &MixtureOptions::default()).unwrap();
        let penalized = fit_mixture(
            &m,
            None,
            &MixtureOptions {
                null_penalty: 10.0,
                ..MixtureOptions::default()
            },
        )
        .unwrap();
        assert!(penalized.weights.null_weight() > plain.weights.null_weight());
    }

    #[test]
    fn misaligned_init_is_a_shape_error() {
        let m = matrix(vec![vec![0.0, -1.0]]);
        let other = MixtureWeights::uniform(SmoothnessGrid::new(vec![0.0, 1.0, 2.0]).unwrap());
        let err = fit_mixture(&m, Some(&other), &MixtureOptions::default()).unwrap_err();
        assert!(matches!(err, FashError::ShapeMismatch(_)));
    }

    #[test]
    fn log_sum_exp_handles_neg_infinity() {
        let v = [f64::NEG_INFINITY, 0.0, f64::NEG_INFINITY];
        assert!((log_sum_exp(v.iter().copied()) - 0.0).abs() < 1e-15);
        let all = [f64::NEG_INFINITY; 2];
        assert_eq!(log_sum_exp(all.iter().copied()), f64::NEG_INFINITY);
    }
}
