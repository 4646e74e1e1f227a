//! Command-line parsing for `fash`.
//!
//! Argument parsing and command dispatch stay separate from the numerical
//! code; `app` turns these structs into a `FashConfig`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::domain::FailurePolicy;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(
    name = "fash",
    version,
    about = "Functional adaptive shrinkage: rank trajectories by evidence of dynamics with FDR control"
)]
pub struct Cli {
    /// Log progress to stderr (info level). `RUST_LOG` takes precedence.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Build the likelihood grid from a CSV, fit the mixture, and report discoveries.
    Fit(FitArgs),
    /// Rerun mixture fit / posterior / discovery from a saved likelihood matrix.
    Refit(RefitArgs),
    /// Rank externally computed local fdr values (`unit_id,lfdr`) and report discoveries.
    Discover(DiscoverArgs),
    /// Write a synthetic long-format CSV with known dynamic/non-dynamic labels.
    Simulate(SimulateArgs),
}

/// Smoothness grid selection.
#[derive(Debug, Args, Clone)]
pub struct GridArgs {
    /// Explicit grid values, comma-separated (first value must be 0).
    #[arg(long, value_delimiter = ',', conflicts_with_all = ["grid_max", "grid_steps", "log_grid"])]
    pub grid: Option<Vec<f64>>,

    /// Largest predictive SD on the grid.
    #[arg(long, default_value_t = 2.0)]
    pub grid_max: f64,

    /// Number of non-zero grid points.
    #[arg(long, default_value_t = 20)]
    pub grid_steps: usize,

    /// Log-space the non-zero points over `[grid-min, grid-max]`.
    #[arg(long)]
    pub log_grid: bool,

    /// Smallest non-zero point when `--log-grid` is set.
    #[arg(long, default_value_t = 0.01)]
    pub grid_min: f64,
}

/// Basis configuration shared by every oracle evaluation.
#[derive(Debug, Args, Clone)]
pub struct BasisArgs {
    /// Number of O-spline knots.
    #[arg(long, default_value_t = 16)]
    pub num_knots: usize,

    /// Order of the integrated Wiener process (base model is a polynomial of degree order-1).
    #[arg(long, default_value_t = 1)]
    pub order: usize,

    /// Prior precision of the base-model coefficients.
    #[arg(long, default_value_t = 1e-6)]
    pub beta_prec: f64,

    /// Horizon at which grid values are predictive SDs.
    #[arg(long, default_value_t = 1.0)]
    pub pred_step: f64,
}

/// Mixture optimizer settings.
#[derive(Debug, Args, Clone)]
pub struct MixtureArgs {
    #[arg(long, default_value_t = 200)]
    pub max_iter: usize,

    /// Stop when the per-unit objective gain falls below this.
    #[arg(long, default_value_t = 1e-8)]
    pub tol: f64,

    #[arg(long, default_value_t = 1e-8)]
    pub kkt_tol: f64,

    #[arg(long, default_value_t = 100)]
    pub max_active_iter: usize,

    /// Weights below this are reported as pruned (and zeroed).
    #[arg(long, default_value_t = 1e-8)]
    pub prune_threshold: f64,

    /// Extra prior pull towards the non-dynamic class (>= 1; 1 = none).
    #[arg(long, default_value_t = 1.0)]
    pub null_penalty: f64,
}

/// Discovery reporting settings.
#[derive(Debug, Args, Clone)]
pub struct DiscoveryArgs {
    /// Target false discovery rate.
    #[arg(long, default_value_t = 0.05)]
    pub alpha: f64,

    /// Show the top-N units by local fdr.
    #[arg(long, default_value_t = 20)]
    pub top: usize,

    /// Export per-unit results to CSV.
    #[arg(long)]
    pub export: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct FitArgs {
    /// Long-format CSV: `unit_id,time,value[,sd][,dynamic]`.
    #[arg(long, value_name = "CSV")]
    pub csv: PathBuf,

    /// Noise SD for rows without an `sd` value.
    #[arg(long)]
    pub noise_sd: Option<f64>,

    #[command(flatten)]
    pub grid: GridArgs,

    #[command(flatten)]
    pub basis: BasisArgs,

    #[command(flatten)]
    pub mixture: MixtureArgs,

    #[command(flatten)]
    pub discovery: DiscoveryArgs,

    /// What to do with units whose likelihood evaluation fails.
    #[arg(long, value_enum, default_value_t = FailurePolicy::Drop)]
    pub on_failure: FailurePolicy,

    /// Credible level of exported function bands.
    #[arg(long, default_value_t = 0.95)]
    pub level: f64,

    /// Export posterior-weighted function summaries to CSV.
    #[arg(long = "export-summary")]
    pub export_summary: Option<PathBuf>,

    /// Save the likelihood matrix as JSON (for `fash refit`).
    #[arg(long = "save-matrix")]
    pub save_matrix: Option<PathBuf>,

    /// Save the fitted mixture weights as JSON.
    #[arg(long = "save-weights")]
    pub save_weights: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct RefitArgs {
    /// Likelihood matrix JSON written by `fash fit --save-matrix`.
    #[arg(long, value_name = "JSON")]
    pub matrix: PathBuf,

    /// Mixture weights JSON; used as-is unless `--warm-start` is set.
    #[arg(long, value_name = "JSON")]
    pub weights: Option<PathBuf>,

    /// Use `--weights` as the optimizer's starting point instead of skipping the fit.
    #[arg(long, requires = "weights")]
    pub warm_start: bool,

    #[command(flatten)]
    pub mixture: MixtureArgs,

    #[command(flatten)]
    pub discovery: DiscoveryArgs,

    /// Save the (re)fitted mixture weights as JSON.
    #[arg(long = "save-weights")]
    pub save_weights: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct DiscoverArgs {
    /// CSV with `unit_id,lfdr[,dynamic]` columns.
    #[arg(long, value_name = "CSV")]
    pub lfdr: PathBuf,

    /// Name of the method that produced the values (for reports).
    #[arg(long, default_value = "external")]
    pub method: String,

    #[command(flatten)]
    pub discovery: DiscoveryArgs,
}

#[derive(Debug, Args, Clone)]
pub struct SimulateArgs {
    /// Output CSV path.
    #[arg(long, value_name = "CSV")]
    pub out: PathBuf,

    #[arg(short = 'n', long, default_value_t = 100)]
    pub n_units: usize,

    #[arg(long, default_value_t = 20)]
    pub n_dynamic: usize,

    /// Observations per unit.
    #[arg(long, default_value_t = 16)]
    pub n_times: usize,

    #[arg(long, default_value_t = 15.0)]
    pub time_max: f64,

    #[arg(long, default_value_t = 0.5)]
    pub noise_sd: f64,

    /// Amplitude of the dynamic component.
    #[arg(long, default_value_t = 2.0)]
    pub amplitude: f64,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}
