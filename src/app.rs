//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - resolves CLI arguments into configuration
//! - runs the fit / refit / discover pipelines
//! - prints reports
//! - writes optional exports

use log::info;

use crate::cli::{Cli, Command, DiscoverArgs, FitArgs, GridArgs, MixtureArgs, RefitArgs, SimulateArgs};
use crate::data::{SimulationSpec, simulate};
use crate::domain::{BasisConfig, FashConfig, SmoothnessGrid};
use crate::error::{AppError, FashError};
use crate::fit::{MixtureOptions, linear_grid, log_grid};
use crate::io::{
    load_external_lfdr, read_matrix_json, read_weights_json, write_matrix_json, write_results_csv,
    write_summary_csv, write_units_csv, write_weights_json,
};
use crate::report::{
    discover_from, evaluate, format_dataset, format_discoveries, format_evaluation, format_failures,
    format_mixture,
};

pub mod pipeline;

use pipeline::{WeightsSource, run_mixture_stage};

/// Entry point for the `fash` binary, after argument parsing.
pub fn run(cli: Cli) -> Result<(), AppError> {
    match cli.command {
        Command::Fit(args) => handle_fit(&args),
        Command::Refit(args) => handle_refit(&args),
        Command::Discover(args) => handle_discover(&args),
        Command::Simulate(args) => handle_simulate(&args),
    }
}

fn handle_fit(args: &FitArgs) -> Result<(), AppError> {
    let config = fit_config_from_args(args)?;
    let run = pipeline::run_fit(&config)?;
    let analysis = &run.analysis;
    let stage = &analysis.stage;

    print!("{}", format_dataset(&run.ingest));
    print!("{}", format_mixture(&stage.mixture, analysis.built.matrix.n_units()));
    print!("{}", format_failures(&analysis.built.dropped, &stage.degenerate));
    print!("{}", format_discoveries(&stage.discoveries, "fash", config.top_n));
    if let Some(eval) = &run.evaluation {
        print!("{}", format_evaluation(eval));
    }

    // Optional exports.
    if let Some(path) = &config.export_results {
        write_results_csv(path, &stage.discoveries, &stage.posteriors, &config.grid)?;
        info!("Wrote results to {}", path.display());
    }
    if let Some(path) = &config.export_summary {
        write_summary_csv(path, &analysis.summaries)?;
        info!("Wrote function summaries to {}", path.display());
    }
    if let Some(path) = &config.save_matrix {
        write_matrix_json(path, &analysis.built.matrix, &config.basis)?;
        info!("Wrote likelihood matrix to {}", path.display());
    }
    if let Some(path) = &config.save_weights {
        write_weights_json(path, &stage.mixture)?;
        info!("Wrote mixture weights to {}", path.display());
    }

    Ok(())
}

fn handle_refit(args: &RefitArgs) -> Result<(), AppError> {
    let opts = mixture_options_from_args(&args.mixture);
    opts.validate()?;

    let matrix_file = read_matrix_json(&args.matrix)?;
    let matrix = matrix_file.matrix;
    info!(
        "Loaded likelihood matrix: {} units x {} grid points (created {})",
        matrix.n_units(),
        matrix.n_grid(),
        matrix_file.created
    );

    let saved = match &args.weights {
        Some(path) => Some(read_weights_json(path)?.weights),
        None => None,
    };
    if let Some(w) = &saved {
        if w.grid() != matrix.grid() {
            return Err(FashError::shape(format!(
                "saved weights have K={} but the matrix has K={} (or different grid values)",
                w.len(),
                matrix.n_grid()
            ))
            .into());
        }
    }

    let source = match (&saved, args.warm_start) {
        (Some(w), false) => WeightsSource::Fixed(w),
        (init, _) => WeightsSource::Fit { init: init.as_ref() },
    };
    let stage = run_mixture_stage(&matrix, source, &opts, args.discovery.alpha)?;

    print!("{}", format_mixture(&stage.mixture, matrix.n_units()));
    print!("{}", format_failures(&[], &stage.degenerate));
    print!("{}", format_discoveries(&stage.discoveries, "fash", args.discovery.top));

    if let Some(path) = &args.discovery.export {
        write_results_csv(path, &stage.discoveries, &stage.posteriors, matrix.grid())?;
    }
    if let Some(path) = &args.save_weights {
        write_weights_json(path, &stage.mixture)?;
    }
    Ok(())
}

fn handle_discover(args: &DiscoverArgs) -> Result<(), AppError> {
    let input = load_external_lfdr(&args.lfdr, &args.method)?;
    if !input.row_errors.is_empty() {
        log::warn!("Skipped {} invalid local fdr rows", input.row_errors.len());
    }

    let set = discover_from(&input.source, args.discovery.alpha)?;
    print!("{}", format_discoveries(&set, &input.source.method, args.discovery.top));
    if let Some(truth) = &input.truth {
        print!("{}", format_evaluation(&evaluate(&set, truth)?));
    }

    if let Some(path) = &args.discovery.export {
        // No posteriors for external values; the grid is only used for column names.
        write_results_csv(path, &set, &[], &SmoothnessGrid::new(vec![0.0])?)?;
    }
    Ok(())
}

fn handle_simulate(args: &SimulateArgs) -> Result<(), AppError> {
    let spec = SimulationSpec {
        n_units: args.n_units,
        n_dynamic: args.n_dynamic,
        n_times: args.n_times,
        time_max: args.time_max,
        noise_sd: args.noise_sd,
        amplitude: args.amplitude,
        seed: args.seed,
    };
    let data = simulate(&spec)?;
    write_units_csv(&args.out, &data.units, Some(&data.truth))?;
    println!(
        "Wrote {} units ({} dynamic) to {}",
        data.units.len(),
        spec.n_dynamic,
        args.out.display()
    );
    Ok(())
}

pub fn fit_config_from_args(args: &FitArgs) -> Result<FashConfig, AppError> {
    let grid = grid_from_args(&args.grid)?;
    let mut config = FashConfig::new(args.csv.clone(), grid);

    config.default_noise_sd = args.noise_sd;
    config.basis = BasisConfig {
        num_knots: args.basis.num_knots,
        beta_prec: args.basis.beta_prec,
        pred_step: args.basis.pred_step,
        order: args.basis.order,
    };
    config.mixture = mixture_options_from_args(&args.mixture);
    config.failure_policy = args.on_failure;
    config.alpha = args.discovery.alpha;
    config.level = args.level;
    config.top_n = args.discovery.top;
    config.export_results = args.discovery.export.clone();
    config.export_summary = args.export_summary.clone();
    config.save_matrix = args.save_matrix.clone();
    config.save_weights = args.save_weights.clone();

    config.validate()?;
    Ok(config)
}

fn grid_from_args(args: &GridArgs) -> Result<SmoothnessGrid, FashError> {
    match &args.grid {
        Some(values) => SmoothnessGrid::new(values.clone()),
        None if args.log_grid => log_grid(args.grid_min, args.grid_max, args.grid_steps),
        None => linear_grid(args.grid_max, args.grid_steps),
    }
}

fn mixture_options_from_args(args: &MixtureArgs) -> MixtureOptions {
    MixtureOptions {
        max_iter: args.max_iter,
        tol: args.tol,
        kkt_tol: args.kkt_tol,
        max_active_iter: args.max_active_iter,
        prune_threshold: args.prune_threshold,
        null_penalty: args.null_penalty,
    }
}
