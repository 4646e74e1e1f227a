/// Application-level error: a message plus the process exit code it maps to.
#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}

/// Errors raised by the numerical core.
///
/// Optimizer non-convergence is deliberately absent: it is a warning, and the
/// optimizer always hands back its best simplex point.
#[derive(Debug, Clone, PartialEq)]
pub enum FashError {
    /// One (unit, grid point) evaluation produced no finite likelihood.
    OracleFailure {
        unit_id: String,
        grid_index: usize,
        reason: String,
    },
    /// Every grid point of this unit has `-inf` likelihood.
    DegenerateRow { unit_id: String },
    /// Inputs are misaligned or empty.
    ShapeMismatch(String),
    /// A configuration value is out of range.
    InvalidConfig(String),
}

impl FashError {
    pub fn shape(message: impl Into<String>) -> Self {
        FashError::ShapeMismatch(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        FashError::InvalidConfig(message.into())
    }

    /// Exit code used when this error terminates the binary.
    pub fn exit_code(&self) -> u8 {
        match self {
            FashError::InvalidConfig(_) | FashError::ShapeMismatch(_) => 2,
            FashError::DegenerateRow { .. } => 3,
            FashError::OracleFailure { .. } => 4,
        }
    }
}

impl std::fmt::Display for FashError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FashError::OracleFailure {
                unit_id,
                grid_index,
                reason,
            } => write!(
                f,
                "Likelihood evaluation failed for unit '{unit_id}' at grid point {grid_index}: {reason}"
            ),
            FashError::DegenerateRow { unit_id } => write!(
                f,
                "Unit '{unit_id}' has no grid point with finite likelihood."
            ),
            FashError::ShapeMismatch(msg) => write!(f, "Shape mismatch: {msg}"),
            FashError::InvalidConfig(msg) => write!(f, "Invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for FashError {}

impl From<FashError> for AppError {
    fn from(err: FashError) -> Self {
        AppError::new(err.exit_code(), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fash_error_maps_to_exit_codes() {
        let err: AppError = FashError::shape("K differs").into();
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("K differs"));

        let err: AppError = FashError::OracleFailure {
            unit_id: "u1".to_string(),
            grid_index: 3,
            reason: "singular".to_string(),
        }
        .into();
        assert_eq!(err.exit_code(), 4);
        assert!(err.to_string().contains("'u1'"));
        assert!(err.to_string().contains("grid point 3"));
    }
}
