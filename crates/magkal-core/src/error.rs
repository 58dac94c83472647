//! Error types for the calibration filter and measurement grid.
//!
//! Every variant here is a local, recoverable rejection: the offending
//! operation leaves the filter or grid untouched.

use thiserror::Error;

/// Why a measurement update was refused.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum Degeneracy {
    /// No control update has been applied yet, so there is no predicted field.
    #[error("no control update before measurement")]
    NoPrediction,

    /// The linearised observation carries no information (e.g. every `nHat_i == 0`).
    #[error("observation jacobian is zero")]
    ZeroJacobian,

    /// Innovation covariance `S` is zero, negative or non-finite.
    #[error("innovation covariance {0:e} is not usable")]
    InnovationCovariance(f64),

    /// The correction would have produced a non-finite state or covariance.
    #[error("correction is not finite")]
    NonFiniteCorrection,
}

/// Errors from [`crate::CalibrationConfig::validate`].
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum ConfigError {
    #[error("dimension must be 1, 2 or 3, got {0}")]
    InvalidDimension(usize),

    #[error("{name} = {value} is out of range")]
    InvalidParameter { name: &'static str, value: f64 },
}

/// Errors from the calibration filter and its actor handle.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FilterError {
    /// Input vector or matrix does not match the filter dimension.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("non-finite input rejected")]
    NonFiniteInput,

    #[error("degenerate update: {0}")]
    DegenerateUpdate(Degeneracy),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to start filter worker: {0}")]
    Spawn(String),

    /// The filter worker thread has stopped.
    #[error("filter worker disconnected")]
    Disconnected,
}

/// Errors from [`crate::MeasureGrid`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GridError {
    #[error("grid needs at least one latitude band")]
    NoBands,

    /// A zero vector has no direction to bin by.
    #[error("sample has zero magnitude")]
    ZeroMagnitude,

    #[error("sample is not finite")]
    NonFinite,

    #[error("calibration vectors must have 3 components, got {0}")]
    DimensionMismatch(usize),
}
