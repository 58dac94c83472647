use magkal_core::{FilterError, GridError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("{label} = {value} is outside [{min}, {max}]")]
    OutOfRange {
        label: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("sensor model: {0}")]
    InvalidSensor(String),

    #[error("replay row {row}: expected {expected} finite values, got {actual:?}")]
    BadReplayRow {
        row: usize,
        expected: usize,
        actual: Vec<f64>,
    },

    #[error("source has {source_dim} axes but the filter expects {filter_dim}")]
    SourceDimension { source_dim: usize, filter_dim: usize },

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error(transparent)]
    Grid(#[from] GridError),
}
