//! Shared pipeline logic used by the `fit` and `refit` commands.
//!
//! Stages run strictly one after another:
//! CSV ingest -> likelihood grid -> mixture weights -> posteriors -> discoveries
//!
//! Each stage receives the fully built output of the previous one, so no
//! reader ever observes a partially built matrix or weight vector.

use std::collections::HashMap;

use log::{info, warn};

use crate::domain::{FashConfig, FunctionSummary, LikelihoodMatrix, MixtureWeights, PosteriorWeights, Unit};
use crate::error::{AppError, FashError};
use crate::fit::{BuiltGrid, LikelihoodGridBuilder, MixtureFit, MixtureOptions, fit_mixture, log_likelihood};
use crate::fit::{partition_posteriors, posterior_all};
use crate::io::ingest::{IngestedData, load_units};
use crate::models::{IwpOracle, LikelihoodOracle};
use crate::report::{DiscoveryEvaluation, DiscoverySet, discover_from, evaluate, summarize};

/// Where the mixture weights of a stage come from.
#[derive(Debug, Clone, Copy)]
pub enum WeightsSource<'a> {
    /// Run the optimizer, optionally from a starting point.
    Fit { init: Option<&'a MixtureWeights> },
    /// Use previously fitted weights unchanged.
    Fixed(&'a MixtureWeights),
}

/// Outputs of everything downstream of the likelihood matrix.
#[derive(Debug, Clone)]
pub struct MixtureStage {
    pub mixture: MixtureFit,
    /// Posteriors of non-degenerate units, in matrix row order.
    pub posteriors: Vec<PosteriorWeights>,
    /// `DegenerateRow` errors, one per affected unit.
    pub degenerate: Vec<FashError>,
    pub discoveries: DiscoverySet,
}

/// Outputs of a full analysis of a set of units.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub built: BuiltGrid,
    pub stage: MixtureStage,
    /// Filled only when summaries were requested.
    pub summaries: Vec<FunctionSummary>,
}

/// All computed outputs of a single `fash fit` run.
#[derive(Debug, Clone)]
pub struct FitRun {
    pub ingest: IngestedData,
    pub analysis: Analysis,
    pub evaluation: Option<DiscoveryEvaluation>,
}

/// Execute the full pipeline on the configured CSV with the default oracle.
pub fn run_fit(config: &FashConfig) -> Result<FitRun, AppError> {
    config.validate()?;
    let ingest = load_units(&config.csv_path, config.default_noise_sd)?;
    info!(
        "Loaded {} units ({} observations, {} skipped rows)",
        ingest.stats.n_units,
        ingest.stats.n_points,
        ingest.row_errors.len()
    );

    let analysis = analyze(&IwpOracle, &ingest.units, config)?;

    let evaluation = match &ingest.truth {
        Some(truth) => Some(evaluate(&analysis.stage.discoveries, truth)?),
        None => None,
    };

    Ok(FitRun {
        ingest,
        analysis,
        evaluation,
    })
}

/// Grid build -> mixture -> posterior -> discovery (-> summaries) for `units`.
pub fn analyze<O: LikelihoodOracle>(
    oracle: &O,
    units: &[Unit],
    config: &FashConfig,
) -> Result<Analysis, FashError> {
    config.validate()?;
    let want_summaries = config.export_summary.is_some();

    let built = LikelihoodGridBuilder::new(oracle)
        .retain_fits(want_summaries)
        .build(units, &config.grid, &config.basis)?
        .resolve(config.failure_policy)?;
    info!(
        "Likelihood matrix ready: {} units x {} grid points ({} failed evaluations dropped)",
        built.matrix.n_units(),
        built.matrix.n_grid(),
        built.dropped.len()
    );

    let stage = run_mixture_stage(
        &built.matrix,
        WeightsSource::Fit { init: None },
        &config.mixture,
        config.alpha,
    )?;

    let summaries = if want_summaries {
        summarize_all(&built, &stage.posteriors, config.level)?
    } else {
        Vec::new()
    };

    Ok(Analysis {
        built,
        stage,
        summaries,
    })
}

/// Mixture weights -> posteriors -> discoveries on a finished matrix.
pub fn run_mixture_stage(
    matrix: &LikelihoodMatrix,
    source: WeightsSource<'_>,
    opts: &MixtureOptions,
    alpha: f64,
) -> Result<MixtureStage, FashError> {
    let mixture = match source {
        WeightsSource::Fit { init } => fit_mixture(matrix, init, opts)?,
        WeightsSource::Fixed(weights) => fixed_mixture(matrix, weights, opts)?,
    };
    info!(
        "Mixture weights: null weight {:.6}, log-likelihood {:.6}, {} iterations",
        mixture.weights.null_weight(),
        mixture.log_likelihood,
        mixture.iterations
    );

    let (posteriors, degenerate) = partition_posteriors(posterior_all(matrix, &mixture.weights)?);
    for e in &degenerate {
        warn!("{e}");
    }
    if posteriors.is_empty() {
        return Err(degenerate
            .into_iter()
            .next()
            .unwrap_or_else(|| FashError::shape("no posteriors to rank")));
    }

    let discoveries = discover_from(posteriors.as_slice(), alpha)?;
    info!(
        "{} discoveries of {} units at alpha={}",
        discoveries.cut(),
        posteriors.len(),
        alpha
    );

    Ok(MixtureStage {
        mixture,
        posteriors,
        degenerate,
        discoveries,
    })
}

/// Report a given weight vector in the shape of an optimizer result.
fn fixed_mixture(
    matrix: &LikelihoodMatrix,
    weights: &MixtureWeights,
    opts: &MixtureOptions,
) -> Result<MixtureFit, FashError> {
    let ll = log_likelihood(matrix, weights)?;
    Ok(MixtureFit {
        weights: weights.clone(),
        log_likelihood: ll,
        trace: vec![ll],
        iterations: 0,
        converged: true,
        pruned: weights.pruned(opts.prune_threshold),
        degenerate_rows: (0..matrix.n_units())
            .filter(|&i| matrix.is_degenerate_row(i))
            .collect(),
    })
}

/// Function summaries for every posterior, using the fits retained in `built`.
pub fn summarize_all(
    built: &BuiltGrid,
    posteriors: &[PosteriorWeights],
    level: f64,
) -> Result<Vec<FunctionSummary>, FashError> {
    let row_of: HashMap<&str, usize> = built
        .matrix
        .unit_ids()
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();

    posteriors
        .iter()
        .map(|p| {
            let row = row_of
                .get(p.unit_id.as_str())
                .ok_or_else(|| FashError::shape(format!("unit '{}' is not in the matrix", p.unit_id)))?;
            let fits = built
                .fits
                .get(*row)
                .filter(|f| !f.is_empty())
                .ok_or_else(|| FashError::shape("fitted functions were not retained"))?;
            summarize(fits, p, level)
        })
        .collect()
}
