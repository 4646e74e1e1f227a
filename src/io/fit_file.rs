//! Read/write persisted fit state as JSON.
//!
//! Two files let a run resume without re-evaluating the oracle:
//! - the likelihood matrix (`MatrixFile`), with its grid and basis settings
//! - the fitted mixture weights (`WeightsFile`), with their grid
//!
//! Both embed the grid values, so a refit can check alignment instead of
//! trusting the caller. Schemas live in `domain`.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::domain::{BasisConfig, LikelihoodMatrix, MatrixFile, WeightsFile};
use crate::error::AppError;
use crate::fit::MixtureFit;

pub const TOOL_NAME: &str = "fash";

pub fn write_matrix_json(path: &Path, matrix: &LikelihoodMatrix, basis: &BasisConfig) -> Result<(), AppError> {
    let file = MatrixFile {
        tool: TOOL_NAME.to_string(),
        created: Utc::now(),
        basis: *basis,
        matrix: matrix.clone(),
    };
    write_json(path, &file, "likelihood matrix")
}

pub fn read_matrix_json(path: &Path) -> Result<MatrixFile, AppError> {
    read_json(path, "likelihood matrix")
}

pub fn write_weights_json(path: &Path, fit: &MixtureFit) -> Result<(), AppError> {
    let file = WeightsFile {
        tool: TOOL_NAME.to_string(),
        created: Utc::now(),
        weights: fit.weights.clone(),
        log_likelihood: fit.log_likelihood,
        iterations: fit.iterations,
        converged: fit.converged,
    };
    write_json(path, &file, "mixture weights")
}

pub fn read_weights_json(path: &Path) -> Result<WeightsFile, AppError> {
    read_json(path, "mixture weights")
}

fn write_json<T: Serialize>(path: &Path, value: &T, what: &str) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create {what} JSON '{}': {e}", path.display())))?;
    serde_json::to_writer_pretty(BufWriter::new(file), value)
        .map_err(|e| AppError::new(2, format!("Failed to write {what} JSON: {e}")))
}

fn read_json<T: DeserializeOwned>(path: &Path, what: &str) -> Result<T, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::new(2, format!("Failed to open {what} JSON '{}': {e}", path.display())))?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|e| AppError::new(2, format!("Invalid {what} JSON: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MixtureWeights, SmoothnessGrid};

    fn matrix() -> LikelihoodMatrix {
        let grid = SmoothnessGrid::new(vec![0.0, 0.1, 0.7]).unwrap();
        LikelihoodMatrix::new(
            grid,
            vec!["a".to_string(), "b".to_string()],
            vec![
                vec![-1.234_567_890_123_456_7, f64::NEG_INFINITY, -1e-300],
                vec![-745.133_219_101_941_1, -3.0, 0.1 + 0.2],
            ],
        )
        .unwrap()
    }

    #[test]
    fn matrix_json_preserves_values_and_neg_infinity() {
        let dir = std::env::temp_dir().join(format!("fash-matrix-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("matrix.json");

        let m = matrix();
        write_matrix_json(&path, &m, &BasisConfig::default()).unwrap();
        let back = read_matrix_json(&path).unwrap();
        assert_eq!(back.tool, TOOL_NAME);
        assert_eq!(back.basis, BasisConfig::default());
        assert_eq!(back.matrix, m);
        assert_eq!(back.matrix.row(0)[1], f64::NEG_INFINITY);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn tampered_grid_alignment_is_rejected() {
        let json = r#"{"grid":[0.0,1.0],"n_grid":3,"unit_ids":["a"],"rows":[[0.0,1.0]]}"#;
        assert!(serde_json::from_str::<LikelihoodMatrix>(json).is_err());

        let json = r#"{"grid":[0.0,1.0],"weights":[0.2,0.2]}"#;
        assert!(serde_json::from_str::<MixtureWeights>(json).is_err());
    }
}
