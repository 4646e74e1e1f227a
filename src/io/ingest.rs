//! CSV ingest.
//!
//! Input is long format, one observation per row:
//!
//! ```text
//! unit_id,time,value[,sd][,dynamic]
//! ```
//!
//! Rows are grouped into units in order of first appearance; each unit's
//! observations are sorted by time. Bad rows are skipped and reported, not
//! fatal. An optional `dynamic` column carries known labels (simulation
//! output) for evaluating discoveries.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::StringRecord;

use crate::domain::Unit;
use crate::error::AppError;
use crate::report::ExternalLfdr;

/// Summary stats about the units actually used for fitting.
#[derive(Debug, Clone)]
pub struct DatasetStats {
    pub n_units: usize,
    pub n_points: usize,
    pub time_min: f64,
    pub time_max: f64,
    pub min_obs: usize,
    pub max_obs: usize,
}

/// A row-level error encountered during ingest.
#[derive(Debug, Clone)]
pub struct RowError {
    pub line: usize,
    pub id: Option<String>,
    pub message: String,
}

/// Ingest output: units + stats + row errors (+ truth labels when present).
#[derive(Debug, Clone)]
pub struct IngestedData {
    pub units: Vec<Unit>,
    pub stats: DatasetStats,
    pub row_errors: Vec<RowError>,
    pub rows_read: usize,
    pub rows_used: usize,
    /// `unit_id -> dynamic`, when the CSV has a `dynamic` column.
    pub truth: Option<HashMap<String, bool>>,
}

/// External local-fdr values plus optional truth labels.
#[derive(Debug, Clone)]
pub struct LfdrInput {
    pub source: ExternalLfdr,
    pub truth: Option<HashMap<String, bool>>,
    pub row_errors: Vec<RowError>,
}

/// One parsed observation row.
struct ObsRow {
    id: String,
    time: f64,
    value: f64,
    sd: f64,
    dynamic: Option<bool>,
}

/// Load units from a long-format CSV file.
pub fn load_units(path: &Path, default_noise_sd: Option<f64>) -> Result<IngestedData, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::new(2, format!("Failed to open CSV '{}': {e}", path.display())))?;
    read_units(file, default_noise_sd)
}

/// Load units from any CSV reader (see `load_units`).
pub fn read_units<R: Read>(input: R, default_noise_sd: Option<f64>) -> Result<IngestedData, AppError> {
    if let Some(sd) = default_noise_sd {
        if !(sd.is_finite() && sd > 0.0) {
            return Err(AppError::new(2, format!("--noise-sd must be finite and > 0 (got {sd})")));
        }
    }

    let mut reader = csv_reader(input);
    let headers = reader
        .headers()
        .map_err(|e| AppError::new(2, format!("Failed to read CSV headers: {e}")))?
        .clone();
    let header_map = build_header_map(&headers);

    let id_col = resolve_id_column(&header_map)?;
    for required in ["time", "value"] {
        if !header_map.contains_key(required) {
            return Err(AppError::new(2, format!("Missing required column: `{required}`")));
        }
    }
    if !header_map.contains_key("sd") && default_noise_sd.is_none() {
        return Err(AppError::new(
            2,
            "CSV has no `sd` column; pass --noise-sd to set a noise SD for every observation.",
        ));
    }
    let has_truth = header_map.contains_key("dynamic");

    // Grouped in first-appearance order.
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<ObsRow>> = HashMap::new();
    let mut row_errors = Vec::new();
    let mut rows_read = 0usize;

    for (idx, result) in reader.records().enumerate() {
        // +2: header is line 1, records are 1-based.
        let line = idx + 2;
        rows_read += 1;

        let record = match result {
            Ok(r) => r,
            Err(e) => {
                row_errors.push(RowError {
                    line,
                    id: None,
                    message: format!("CSV parse error: {e}"),
                });
                continue;
            }
        };

        match parse_obs_row(&record, &header_map, id_col, default_noise_sd) {
            Ok(row) => {
                if !groups.contains_key(&row.id) {
                    order.push(row.id.clone());
                }
                groups.entry(row.id.clone()).or_default().push(row);
            }
            Err(message) => row_errors.push(RowError {
                line,
                id: get_optional(&record, &header_map, id_col).map(str::to_string),
                message,
            }),
        }
    }

    let mut units = Vec::with_capacity(order.len());
    let mut truth = has_truth.then(HashMap::new);
    let mut rows_used = 0usize;

    for id in order {
        let Some(mut rows) = groups.remove(&id) else {
            continue;
        };
        rows.sort_by(|a, b| a.time.total_cmp(&b.time));
        rows_used += rows.len();

        if let Some(labels) = truth.as_mut() {
            let label = unit_label(&id, &rows)?;
            labels.insert(id.clone(), label);
        }

        let times = rows.iter().map(|r| r.time).collect();
        let values = rows.iter().map(|r| r.value).collect();
        let sds = rows.iter().map(|r| r.sd).collect();
        units.push(Unit::new(id, times, values, sds)?);
    }

    let stats = compute_stats(&units)
        .ok_or_else(|| AppError::new(3, "No valid rows remain after validation."))?;

    Ok(IngestedData {
        units,
        stats,
        row_errors,
        rows_read,
        rows_used,
        truth,
    })
}

/// Load externally computed local fdr values (`unit_id,lfdr[,dynamic]`).
pub fn load_external_lfdr(path: &Path, method: &str) -> Result<LfdrInput, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::new(2, format!("Failed to open CSV '{}': {e}", path.display())))?;
    read_external_lfdr(file, method)
}

pub fn read_external_lfdr<R: Read>(input: R, method: &str) -> Result<LfdrInput, AppError> {
    let mut reader = csv_reader(input);
    let headers = reader
        .headers()
        .map_err(|e| AppError::new(2, format!("Failed to read CSV headers: {e}")))?
        .clone();
    let header_map = build_header_map(&headers);
    let id_col = resolve_id_column(&header_map)?;
    if !header_map.contains_key("lfdr") {
        return Err(AppError::new(2, "Missing required column: `lfdr`"));
    }
    let has_truth = header_map.contains_key("dynamic");

    let mut values = Vec::new();
    let mut truth = has_truth.then(HashMap::new);
    let mut row_errors = Vec::new();

    for (idx, result) in reader.records().enumerate() {
        let line = idx + 2;
        let parsed = result
            .map_err(|e| format!("CSV parse error: {e}"))
            .and_then(|record| {
                let id = get_required(&record, &header_map, id_col)?.to_string();
                let lfdr = parse_f64(get_required(&record, &header_map, "lfdr")?, "lfdr")?;
                if !(0.0..=1.0).contains(&lfdr) {
                    return Err(format!("`lfdr` must be within [0, 1] (got {lfdr})."));
                }
                let dynamic = match get_optional(&record, &header_map, "dynamic") {
                    Some(s) => Some(parse_bool(s)?),
                    None => None,
                };
                Ok((id, lfdr, dynamic))
            });

        match parsed {
            Ok((id, lfdr, dynamic)) => {
                if let (Some(labels), Some(d)) = (truth.as_mut(), dynamic) {
                    labels.insert(id.clone(), d);
                }
                values.push((id, lfdr));
            }
            Err(message) => row_errors.push(RowError {
                line,
                id: None,
                message,
            }),
        }
    }

    if values.is_empty() {
        return Err(AppError::new(3, "No valid local fdr rows."));
    }

    Ok(LfdrInput {
        source: ExternalLfdr {
            method: method.to_string(),
            values,
        },
        truth,
        row_errors,
    })
}

fn csv_reader<R: Read>(input: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(input)
}

fn build_header_map(headers: &StringRecord) -> HashMap<String, usize> {
    headers
        .iter()
        .enumerate()
        .map(|(idx, name)| (normalize_header_name(name), idx))
        .collect()
}

fn normalize_header_name(name: &str) -> String {
    // Spreadsheet exports sometimes prefix the first header with a BOM.
    let name = name.trim().trim_start_matches('\u{feff}');
    name.to_ascii_lowercase()
}

fn resolve_id_column(header_map: &HashMap<String, usize>) -> Result<&'static str, AppError> {
    if header_map.contains_key("unit_id") {
        Ok("unit_id")
    } else if header_map.contains_key("id") {
        Ok("id")
    } else {
        Err(AppError::new(2, "Missing required column: `unit_id`"))
    }
}

fn parse_obs_row(
    record: &StringRecord,
    header_map: &HashMap<String, usize>,
    id_col: &str,
    default_noise_sd: Option<f64>,
) -> Result<ObsRow, String> {
    let id = get_required(record, header_map, id_col)?.to_string();
    let time = parse_f64(get_required(record, header_map, "time")?, "time")?;
    let value = parse_f64(get_required(record, header_map, "value")?, "value")?;

    let sd = match get_optional(record, header_map, "sd") {
        Some(s) => parse_f64(s, "sd")?,
        None => default_noise_sd.ok_or_else(|| "Missing `sd` value and no --noise-sd.".to_string())?,
    };
    if sd <= 0.0 {
        return Err(format!("`sd` must be > 0 (got {sd})."));
    }

    let dynamic = match get_optional(record, header_map, "dynamic") {
        Some(s) => Some(parse_bool(s)?),
        None => None,
    };

    Ok(ObsRow {
        id,
        time,
        value,
        sd,
        dynamic,
    })
}

/// A unit's label must be the same on every row that carries one.
fn unit_label(id: &str, rows: &[ObsRow]) -> Result<bool, AppError> {
    let mut labels = rows.iter().filter_map(|r| r.dynamic);
    let first = labels
        .next()
        .ok_or_else(|| AppError::new(2, format!("Unit '{id}' has no `dynamic` label.")))?;
    if labels.any(|l| l != first) {
        return Err(AppError::new(2, format!("Unit '{id}' has conflicting `dynamic` labels.")));
    }
    Ok(first)
}

fn compute_stats(units: &[Unit]) -> Option<DatasetStats> {
    if units.is_empty() {
        return None;
    }
    let mut time_min = f64::INFINITY;
    let mut time_max = f64::NEG_INFINITY;
    let mut min_obs = usize::MAX;
    let mut max_obs = 0;
    let mut n_points = 0;
    for u in units {
        n_points += u.len();
        min_obs = min_obs.min(u.len());
        max_obs = max_obs.max(u.len());
        for &t in u.times() {
            time_min = time_min.min(t);
            time_max = time_max.max(t);
        }
    }
    Some(DatasetStats {
        n_units: units.len(),
        n_points,
        time_min,
        time_max,
        min_obs,
        max_obs,
    })
}

fn get_required<'a>(
    record: &'a StringRecord,
    header_map: &HashMap<String, usize>,
    name: &str,
) -> Result<&'a str, String> {
    let idx = header_map
        .get(name)
        .ok_or_else(|| format!("Missing required column: `{name}`"))?;
    record
        .get(*idx)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("Missing required value: `{name}`"))
}

fn get_optional<'a>(record: &'a StringRecord, header_map: &HashMap<String, usize>, name: &str) -> Option<&'a str> {
    let idx = header_map.get(name)?;
    record.get(*idx).map(str::trim).filter(|s| !s.is_empty())
}

fn parse_f64(s: &str, name: &str) -> Result<f64, String> {
    match s.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(format!("Invalid `{name}` value: '{s}'.")),
    }
}

fn parse_bool(s: &str) -> Result<bool, String> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(format!("Invalid `dynamic` value: '{s}'.")),
    }
}
