//! Error types for segfuse

use thiserror::Error;

/// Main error type for segfuse operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid volume dimensions: {shape:?} does not hold {len} values")]
    InvalidDimensions { shape: Vec<usize>, len: usize },

    #[error("Index out of bounds: {index:?} in volume of shape {shape:?}")]
    IndexOutOfBounds { index: Vec<usize>, shape: Vec<usize> },

    #[error("Volume shape mismatch for {what}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        what: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Volume geometry mismatch for {0}: spacing or origin differs")]
    GeometryMismatch(String),

    #[error("At least 2 observers are required, got {0}")]
    TooFewObservers(usize),

    #[error("At least 2 classes are required, got {0}")]
    TooFewClasses(usize),

    #[error("Label {label} of {what} is not a class index in [0, {classes})")]
    LabelOutOfRange {
        what: String,
        label: f64,
        classes: usize,
    },

    #[error("Neither a termination threshold nor a maximum number of iterations is configured")]
    NoStoppingCriterion,

    #[error("Unsupported data type: {0}")]
    UnsupportedDataType(String),

    #[error("Invalid parameter: {name} = {value} ({reason})")]
    InvalidParameter {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("Algorithm error: {0}")]
    Algorithm(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for [`Error::InvalidParameter`]
    pub fn invalid_parameter(
        name: &'static str,
        value: impl std::fmt::Debug,
        reason: impl Into<String>,
    ) -> Self {
        Error::InvalidParameter {
            name,
            value: format!("{:?}", value),
            reason: reason.into(),
        }
    }
}

/// Result type alias for segfuse operations
pub type Result<T> = std::result::Result<T, Error>;
