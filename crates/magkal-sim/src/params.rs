//! Parameter bounds for calibration sessions.

use crate::error::SimError;

/// Parameter specification with bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamSpec {
    /// Human-readable label.
    pub label: &'static str,
    /// Minimum value.
    pub min: f64,
    /// Maximum value.
    pub max: f64,
}

impl ParamSpec {
    /// Create a new parameter specification.
    pub const fn new(label: &'static str, min: f64, max: f64) -> Self {
        Self { label, min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    /// Pass `value` through if it lies within bounds.
    pub fn check(&self, value: f64) -> Result<f64, SimError> {
        if self.contains(value) {
            Ok(value)
        } else {
            Err(SimError::OutOfRange {
                label: self.label,
                value,
                min: self.min,
                max: self.max,
            })
        }
    }
}

/// Filter tuning, relative to the nominal field strength.
pub mod calibration {
    use super::ParamSpec;

    pub const NOMINAL_FIELD: ParamSpec = ParamSpec::new("Nominal Field n0", 1e-6, 1e9);
    pub const INIT_UNCERTAINTY: ParamSpec = ParamSpec::new("Initial Uncertainty", 1e-6, 10.0);
    pub const PROCESS_NOISE: ParamSpec = ParamSpec::new("Process Noise", 1e-12, 1.0);
    pub const MEASUREMENT_NOISE: ParamSpec = ParamSpec::new("Measurement Noise", 1e-12, 1.0);
    pub const GAIN_DAMPING: ParamSpec = ParamSpec::new("Gain Damping", 1e-3, 1.0);
}

/// Simulated sensor, per axis.
pub mod sensor {
    use super::ParamSpec;

    pub const SCALE: ParamSpec = ParamSpec::new("Scale k", 0.05, 20.0);
    /// In units of n0.
    pub const BIAS: ParamSpec = ParamSpec::new("Bias l (x n0)", -100.0, 100.0);
    /// In units of n0.
    pub const NOISE: ParamSpec = ParamSpec::new("Noise (x n0)", 0.0, 0.5);
}

/// Session driver.
pub mod session {
    use super::ParamSpec;

    pub const GRID_BANDS: ParamSpec = ParamSpec::new("Grid Bands", 1.0, 90.0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_bounds() {
        assert_eq!(calibration::GAIN_DAMPING.check(0.5).ok(), Some(0.5));
        assert_eq!(calibration::GAIN_DAMPING.check(1.0).ok(), Some(1.0));
        assert!(calibration::GAIN_DAMPING.check(1.5).is_err());
        assert!(sensor::SCALE.check(0.0).is_err());
        assert!(!sensor::NOISE.contains(f64::NAN));
        assert!(calibration::PROCESS_NOISE.check(0.0).is_err());
        assert!(calibration::MEASUREMENT_NOISE.check(0.0).is_err());
    }

    #[test]
    fn test_out_of_range_message_names_parameter() {
        let err = sensor::NOISE.check(2.0).unwrap_err();
        assert!(err.to_string().contains("Noise"));
    }
}
