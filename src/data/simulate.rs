//! Synthetic trajectories with known labels.
//!
//! Non-dynamic units are a constant level plus noise. Dynamic units add a
//! sinusoid with random period and phase. Everything is driven by one seed.

use std::collections::HashMap;
use std::f64::consts::PI;

use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;

use crate::domain::Unit;
use crate::error::FashError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationSpec {
    pub n_units: usize,
    /// Number of units that get a dynamic component.
    pub n_dynamic: usize,
    /// Observations per unit, equispaced on `[0, time_max]`.
    pub n_times: usize,
    pub time_max: f64,
    pub noise_sd: f64,
    /// Amplitude of the dynamic component.
    pub amplitude: f64,
    pub seed: u64,
}

impl Default for SimulationSpec {
    fn default() -> Self {
        Self {
            n_units: 100,
            n_dynamic: 20,
            n_times: 16,
            time_max: 15.0,
            noise_sd: 0.5,
            amplitude: 2.0,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SimulatedData {
    pub units: Vec<Unit>,
    /// `unit_id -> dynamic`.
    pub truth: HashMap<String, bool>,
}

pub fn simulate(spec: &SimulationSpec) -> Result<SimulatedData, FashError> {
    if spec.n_units == 0 {
        return Err(FashError::config("simulation needs at least one unit"));
    }
    if spec.n_dynamic > spec.n_units {
        return Err(FashError::config(format!(
            "{} dynamic units requested out of {}",
            spec.n_dynamic, spec.n_units
        )));
    }
    if spec.n_times < 2 {
        return Err(FashError::config("simulation needs at least 2 observations per unit"));
    }
    if !(spec.time_max.is_finite() && spec.time_max > 0.0) {
        return Err(FashError::config(format!("time_max must be > 0 (got {})", spec.time_max)));
    }
    if !(spec.amplitude.is_finite() && spec.amplitude >= 0.0) {
        return Err(FashError::config(format!("amplitude must be >= 0 (got {})", spec.amplitude)));
    }
    let noise = Normal::new(0.0, spec.noise_sd)
        .ok()
        .filter(|_| spec.noise_sd > 0.0)
        .ok_or_else(|| FashError::config(format!("noise SD must be > 0 (got {})", spec.noise_sd)))?;

    let mut rng = StdRng::seed_from_u64(spec.seed);

    let mut dynamic = vec![false; spec.n_units];
    dynamic[..spec.n_dynamic].iter_mut().for_each(|d| *d = true);
    dynamic.shuffle(&mut rng);

    let step = spec.time_max / (spec.n_times - 1) as f64;
    let times: Vec<f64> = (0..spec.n_times).map(|i| step * i as f64).collect();
    let width = spec.n_units.to_string().len().max(3);

    let mut units = Vec::with_capacity(spec.n_units);
    let mut truth = HashMap::with_capacity(spec.n_units);

    for (i, &is_dynamic) in dynamic.iter().enumerate() {
        let id = format!("unit_{:0width$}", i + 1);
        let level = rng.gen_range(-1.0..1.0);
        let (period, phase) = if is_dynamic {
            (
                rng.gen_range(0.5..1.5) * spec.time_max,
                rng.gen_range(0.0..2.0 * PI),
            )
        } else {
            (1.0, 0.0)
        };

        let values = times
            .iter()
            .map(|&t| {
                let signal = if is_dynamic {
                    spec.amplitude * (2.0 * PI * t / period + phase).sin()
                } else {
                    0.0
                };
                level + signal + noise.sample(&mut rng)
            })
            .collect();

        units.push(Unit::with_constant_sd(id.clone(), times.clone(), values, spec.noise_sd)?);
        truth.insert(id, is_dynamic);
    }

    Ok(SimulatedData { units, truth })
}
