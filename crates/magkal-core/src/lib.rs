//! # Magkal Core
//!
//! Online magnetometer calibration. Estimates a per-axis scale `k` and bias `l`
//! relating raw readings `u` to the ambient field `N = k * (u - l)`, using only
//! the knowledge that the field strength `n0` is constant.
//!
//! - Matrix kernel: dense add / scale / multiply / transpose over `nalgebra`
//! - Calibration filter: EKF over `[k_0, l_0, k_1, l_1, ...]`, plus a
//!   single-threaded actor handle that serialises updates
//! - Spherical measurement grid: equal-area-ish pooling of raw samples by
//!   pointing direction for batch quality checks

pub mod actor;
pub mod config;
pub mod error;
pub mod filter;
pub mod grid;
pub mod matrix;

// Re-export core types
pub use actor::{FilterHandle, FilterSnapshot};
pub use config::CalibrationConfig;
pub use error::{ConfigError, Degeneracy, FilterError, GridError};
pub use filter::CalibrationFilter;
pub use grid::{FieldStrengthSpread, MeasureAgg, MeasureGrid};
pub use matrix::Matrix;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
