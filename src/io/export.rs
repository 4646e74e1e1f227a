//! Export per-unit results to CSV.
//!
//! The exports are meant to be easy to consume in spreadsheets or downstream
//! scripts: one row per unit (results) or per unit and time (summaries).

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::domain::{FunctionSummary, PosteriorWeights, SmoothnessGrid, Unit};
use crate::error::AppError;
use crate::report::DiscoverySet;

/// Write ranked per-unit results (lfdr, cumulative FDR, decision, posteriors).
pub fn write_results_csv(
    path: &Path,
    set: &DiscoverySet,
    posteriors: &[PosteriorWeights],
    grid: &SmoothnessGrid,
) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create export CSV '{}': {e}", path.display())))?;
    write_results(BufWriter::new(file), set, posteriors, grid)
}

pub fn write_results<W: Write>(
    out: W,
    set: &DiscoverySet,
    posteriors: &[PosteriorWeights],
    grid: &SmoothnessGrid,
) -> Result<(), AppError> {
    let by_id: HashMap<&str, &PosteriorWeights> =
        posteriors.iter().map(|p| (p.unit_id.as_str(), p)).collect();

    let mut writer = csv::Writer::from_writer(out);

    let mut header = vec![
        "unit_id".to_string(),
        "rank".to_string(),
        "lfdr".to_string(),
        "cumulative_fdr".to_string(),
        "discovery".to_string(),
        "mean_smoothness".to_string(),
    ];
    header.extend(grid.values().iter().map(|s| format!("p_{s}")));
    writer.write_record(&header).map_err(write_err)?;

    for r in set.ranked() {
        let mut record = vec![
            r.unit_id.clone(),
            r.rank.to_string(),
            format!("{:.10}", r.local_fdr),
            format!("{:.10}", r.cumulative_fdr),
            (r.rank <= set.cut()).to_string(),
        ];
        match by_id.get(r.unit_id.as_str()) {
            Some(p) => {
                record.push(format!("{:.10}", p.mean_smoothness(grid)));
                record.extend(p.probs.iter().map(|v| format!("{v:.10}")));
            }
            // Externally supplied lfdr values have no posterior.
            None => record.extend(std::iter::repeat_n(String::new(), grid.len() + 1)),
        }
        writer.write_record(&record).map_err(write_err)?;
    }

    writer.flush().map_err(|e| write_err(e.into()))
}

/// Write function summaries in long format.
pub fn write_summary_csv(path: &Path, summaries: &[FunctionSummary]) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create summary CSV '{}': {e}", path.display())))?;
    write_summaries(BufWriter::new(file), summaries)
}

pub fn write_summaries<W: Write>(out: W, summaries: &[FunctionSummary]) -> Result<(), AppError> {
    let mut writer = csv::Writer::from_writer(out);
    writer
        .write_record(["unit_id", "time", "mean", "sd", "lower", "upper", "level"])
        .map_err(write_err)?;

    for s in summaries {
        for t in 0..s.times.len() {
            writer
                .write_record([
                    s.unit_id.clone(),
                    format!("{}", s.times[t]),
                    format!("{:.10}", s.mean[t]),
                    format!("{:.10}", s.sd[t]),
                    format!("{:.10}", s.lower[t]),
                    format!("{:.10}", s.upper[t]),
                    format!("{}", s.level),
                ])
                .map_err(write_err)?;
        }
    }

    writer.flush().map_err(|e| write_err(e.into()))
}

/// Write units in the long format `load_units` reads, with an optional
/// `dynamic` label column.
pub fn write_units_csv(path: &Path, units: &[Unit], truth: Option<&HashMap<String, bool>>) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create units CSV '{}': {e}", path.display())))?;
    write_units(BufWriter::new(file), units, truth)
}

pub fn write_units<W: Write>(out: W, units: &[Unit], truth: Option<&HashMap<String, bool>>) -> Result<(), AppError> {
    let mut writer = csv::Writer::from_writer(out);
    let mut header = vec!["unit_id", "time", "value", "sd"];
    if truth.is_some() {
        header.push("dynamic");
    }
    writer.write_record(&header).map_err(write_err)?;

    for u in units {
        let label = match truth {
            Some(t) => Some(
                t.get(u.id())
                    .ok_or_else(|| AppError::new(2, format!("No truth label for unit '{}'.", u.id())))?
                    .to_string(),
            ),
            None => None,
        };
        for i in 0..u.len() {
            let mut record = vec![
                u.id().to_string(),
                format!("{}", u.times()[i]),
                format!("{}", u.values()[i]),
                format!("{}", u.noise_sd()[i]),
            ];
            record.extend(label.clone());
            writer.write_record(&record).map_err(write_err)?;
        }
    }

    writer.flush().map_err(|e| write_err(e.into()))
}

fn write_err(e: csv::Error) -> AppError {
    AppError::new(2, format!("Failed to write export CSV: {e}"))
}
