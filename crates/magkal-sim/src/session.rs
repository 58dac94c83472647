use magkal_core::{
    CalibrationConfig, FieldStrengthSpread, FilterError, FilterHandle, Matrix, MeasureGrid,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::SimError;
use crate::measurer::Measurer;

/// Session driver settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub calibration: CalibrationConfig,
    /// Upper bound on control/measurement pairs. Replay sources may stop
    /// earlier.
    pub steps: usize,
    /// Latitude bands of the coverage grid.
    pub grid_bands: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            calibration: CalibrationConfig::default(),
            steps: 2000,
            grid_bands: 6,
        }
    }
}

/// Filter state after one step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepRecord {
    pub step: usize,
    pub k: Vec<f64>,
    pub l: Vec<f64>,
    /// Diagonal of `P`, in state order.
    pub p_diag: Vec<f64>,
    pub accepted: bool,
}

/// Struct to hold the output of a calibration session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionResult {
    pub steps: usize,
    pub rejected: usize,
    pub k: Vec<f64>,
    pub l: Vec<f64>,
    pub covariance: Matrix,
    pub trace: Vec<StepRecord>,
    /// Grid spread under the final estimate.
    pub spread: Option<FieldStrengthSpread>,
    /// Grid spread of the raw readings (`k = 1`, `l = 0`).
    pub raw_spread: Option<FieldStrengthSpread>,
    pub coverage: f64,
}

/// Drive `measurer` through a threaded filter, pairing each reading with the
/// observation `z = n0^2`, and bin every reading into a coverage grid.
///
/// Rejected updates are counted and the session carries on; only a dead
/// filter worker aborts it.
pub fn run_session(
    config: &SessionConfig,
    measurer: &mut dyn Measurer,
) -> Result<SessionResult, SimError> {
    let dimension = config.calibration.dimension;
    if measurer.dimension() != dimension {
        return Err(SimError::SourceDimension {
            source_dim: measurer.dimension(),
            filter_dim: dimension,
        });
    }

    let handle = FilterHandle::spawn(config.calibration)?;
    let mut grid = MeasureGrid::new(config.grid_bands)?;
    let n0 = config.calibration.nominal_field_strength;
    let z = n0 * n0;

    let mut trace = Vec::new();
    let mut rejected = 0;

    for step in 0..config.steps {
        let Some(u) = measurer.measure(None) else {
            info!(step, "measurement source exhausted");
            break;
        };

        // -------------------------------------------------------------------
        // COVERAGE
        // -------------------------------------------------------------------
        let m = pad3(&u, 0.0);
        if let Err(err) = grid.add(m[0], m[1], m[2]) {
            debug!(step, %err, "reading not binned");
        }

        // -------------------------------------------------------------------
        // FILTER
        // -------------------------------------------------------------------
        let accepted = match handle
            .send_control(&u)
            .and_then(|()| handle.send_measurement(z))
        {
            Ok(()) => true,
            Err(err @ (FilterError::Disconnected | FilterError::Spawn(_))) => {
                return Err(err.into())
            }
            Err(err) => {
                debug!(step, %err, "update rejected");
                rejected += 1;
                false
            }
        };

        let snapshot = handle.snapshot();
        trace.push(StepRecord {
            step,
            k: snapshot.k(),
            l: snapshot.l(),
            p_diag: snapshot.covariance.diagonal().iter().copied().collect(),
            accepted,
        });
    }

    let snapshot = handle.snapshot();
    let (k, l) = (snapshot.k(), snapshot.l());
    let spread = grid.field_strength_spread(&pad3(&k, 1.0), &pad3(&l, 0.0))?;
    let raw_spread = grid.field_strength_spread(&[1.0; 3], &[0.0; 3])?;

    info!(
        steps = trace.len(),
        rejected,
        coverage = grid.coverage(),
        relative_spread = spread.map_or(f64::NAN, |s| s.relative()),
        "session finished"
    );

    Ok(SessionResult {
        steps: trace.len(),
        rejected,
        k,
        l,
        covariance: snapshot.covariance,
        trace,
        spread,
        raw_spread,
        coverage: grid.coverage(),
    })
}

/// Extend a 1-D or 2-D vector to three components.
fn pad3(v: &[f64], fill: f64) -> [f64; 3] {
    let mut out = [fill; 3];
    for (o, x) in out.iter_mut().zip(v) {
        *o = *x;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pad3() {
        assert_eq!(pad3(&[2.0], 1.0), [2.0, 1.0, 1.0]);
        assert_eq!(pad3(&[2.0, 3.0], 0.0), [2.0, 3.0, 0.0]);
        assert_eq!(pad3(&[2.0, 3.0, 4.0], 0.0), [2.0, 3.0, 4.0]);
    }
}
