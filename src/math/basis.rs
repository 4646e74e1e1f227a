//! Basis functions for the integrated Wiener process (IWP) prior.
//!
//! A function observed on `[0, T]` is represented as
//!
//! - `f(x) = Σ_k β_k x^k / k!`  (global polynomial, `k = 0..p-1`)
//! - `      + Σ_i w_i φ_i(x)`   (O-spline, one column per knot interval)
//!
//! where `φ_i` has `p`-th derivative equal to 1 on `[s_i, s_{i+1}]` and 0
//! elsewhere, so the weights are a piecewise-constant approximation of the
//! white noise driving the `p`-fold integrated Brownian motion.
//!
//! Numerical notes:
//! - Powers use `powi`; `0.0.powi(0) == 1.0` gives the right value at the knot.
//! - Factorials are tiny here (`p` is 1..4 in practice) and computed in `f64`.

/// `k!` as `f64`.
pub fn factorial(k: usize) -> f64 {
    (1..=k).fold(1.0, |acc, i| acc * i as f64)
}

/// `num` equally spaced knots on `[0, max]` (inclusive).
pub fn equispaced_knots(max: f64, num: usize) -> Vec<f64> {
    let num = num.max(2);
    let step = max / (num as f64 - 1.0);
    (0..num).map(|i| step * i as f64).collect()
}

/// Fill the global polynomial row `[1, x, x^2/2!, ..., x^{p-1}/(p-1)!]`.
pub fn fill_global_row(x: f64, order: usize, out: &mut [f64]) {
    for (k, slot) in out.iter_mut().enumerate().take(order) {
        *slot = x.powi(k as i32) / factorial(k);
    }
}

/// Fill the O-spline row for `knots` (length `knots.len() - 1`).
pub fn fill_ospline_row(x: f64, knots: &[f64], order: usize, out: &mut [f64]) {
    let p = order as i32;
    let p_fact = factorial(order);
    for (i, slot) in out.iter_mut().enumerate().take(knots.len().saturating_sub(1)) {
        let left = knots[i];
        let right = knots[i + 1];
        *slot = if x <= left {
            0.0
        } else if x <= right {
            (x - left).powi(p) / p_fact
        } else {
            let d = right - left;
            (1..=order)
                .map(|k| {
                    d.powi(k as i32) * (x - right).powi(p - k as i32)
                        / (factorial(k) * factorial(order - k))
                })
                .sum()
        };
    }
}

/// Convert a predictive SD at horizon `pred_step` into the IWP process SD.
///
/// For an order-`p` IWP the variance of the `h`-step prediction error is
/// `σ² h^{2p-1} / ((2p-1) ((p-1)!)²)`.
pub fn psd_to_sigma(psd: f64, order: usize, pred_step: f64) -> f64 {
    let p = order.max(1);
    let two_p_minus_one = (2 * p - 1) as f64;
    let scale = (pred_step.powf(two_p_minus_one)
        / (two_p_minus_one * factorial(p - 1).powi(2)))
    .sqrt();
    psd / scale
}
