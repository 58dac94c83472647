//! Filter configuration.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Construction parameters for a [`crate::CalibrationFilter`].
///
/// Noise terms are expressed relative to the nominal field strength `n0`:
/// - `P0 = diag(sigma_k0^2, (n0*sigma_k0)^2, ...)`
/// - `Q  = diag(sigma_k^2,  (n0*sigma_k)^2,  ...)`
/// - `R  = (n0*sigma_m)^2`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Number of sensor axes, 1..=3.
    pub dimension: usize,
    /// Ambient field strength at the calibration site.
    pub nominal_field_strength: f64,
    /// Initial uncertainty of each `k` (and, scaled by `n0`, of each `l`).
    pub init_uncertainty_scale: f64,
    /// Random-walk process noise per control update.
    pub process_noise_scale: f64,
    /// Magnetometer noise as a fraction of `n0`.
    pub measurement_noise_fraction: f64,
    /// Kalman gain multiplier in `(0, 1]`. Values below 1 damp single-step
    /// overshoot from the nonlinear observation model.
    pub gain_damping: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            dimension: 3,
            nominal_field_strength: 1.0,
            init_uncertainty_scale: 0.1,
            process_noise_scale: 1e-3,
            measurement_noise_fraction: 0.01,
            gain_damping: 1.0,
        }
    }
}

impl CalibrationConfig {
    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension,
            ..Self::default()
        }
    }

    /// Length of the state vector, `2n`.
    pub fn state_len(&self) -> usize {
        2 * self.dimension
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=3).contains(&self.dimension) {
            return Err(ConfigError::InvalidDimension(self.dimension));
        }

        let positive = [
            ("nominal_field_strength", self.nominal_field_strength),
            ("init_uncertainty_scale", self.init_uncertainty_scale),
            ("process_noise_scale", self.process_noise_scale),
            ("measurement_noise_fraction", self.measurement_noise_fraction),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::InvalidParameter { name, value });
            }
        }

        if !(self.gain_damping > 0.0 && self.gain_damping <= 1.0) {
            return Err(ConfigError::InvalidParameter {
                name: "gain_damping",
                value: self.gain_damping,
            });
        }

        Ok(())
    }
}
