use tracing::{debug, warn};

use crate::config::CalibrationConfig;
use crate::error::{Degeneracy, FilterError};
use crate::matrix::{self, Matrix};

// ---------------------------------------------------------------------------
// PREDICTION
// ---------------------------------------------------------------------------

/// Observation model evaluated at the latest control input.
#[derive(Clone, Debug)]
struct Prediction {
    /// `u_i - l_i`
    offset: Vec<f64>,
    /// `k_i` at prediction time
    scale: Vec<f64>,
    /// `nHat_i = k_i * (u_i - l_i)`
    n_hat: Vec<f64>,
    /// Set once a measurement update has used this prediction.
    consumed: bool,
}

// ---------------------------------------------------------------------------
// MAIN FILTER
// ---------------------------------------------------------------------------

/// Extended Kalman filter over per-axis scale and bias.
///
/// State is `[k_0, l_0, k_1, l_1, ...]` with `N_i = k_i * (u_i - l_i)`. The
/// parameters follow a random walk, so a control update only widens `P`; the
/// measurement `z = |N|^2` (nominally `n0^2`) corrects the state.
///
/// Call order: one [`control_update`](Self::control_update) then one
/// [`measurement_update`](Self::measurement_update). A second measurement
/// without a new control reuses the old prediction; that is accepted but
/// logged, since it double-counts the same reading.
pub struct CalibrationFilter {
    config: CalibrationConfig,
    x: Matrix,
    p: Matrix,
    q: Matrix,
    r: Matrix,
    prediction: Option<Prediction>,
}

impl CalibrationFilter {
    pub fn new(config: CalibrationConfig) -> Result<Self, FilterError> {
        config.validate()?;

        let n = config.dimension;
        let n0 = config.nominal_field_strength;
        let sigma_k0 = config.init_uncertainty_scale;
        let sigma_k = config.process_noise_scale;
        let sigma_m = config.measurement_noise_fraction;

        let mut x = vec![0.0; 2 * n];
        let mut p = vec![0.0; 2 * n];
        let mut q = vec![0.0; 2 * n];
        for i in 0..n {
            x[2 * i] = 1.0;
            p[2 * i] = sigma_k0 * sigma_k0;
            p[2 * i + 1] = (n0 * sigma_k0) * (n0 * sigma_k0);
            q[2 * i] = sigma_k * sigma_k;
            q[2 * i + 1] = (n0 * sigma_k) * (n0 * sigma_k);
        }

        Ok(Self {
            config,
            x: matrix::column(&x),
            p: matrix::diagonal(&p),
            q: matrix::diagonal(&q),
            r: Matrix::from_element(1, 1, (n0 * sigma_m) * (n0 * sigma_m)),
            prediction: None,
        })
    }

    // =====================================================================
    // UPDATES
    // =====================================================================

    /// Feed a raw reading `u`. Caches the predicted field for the next
    /// measurement update and grows `P` by `Q`. The state itself does not move.
    pub fn control_update(&mut self, u: &[f64]) -> Result<(), FilterError> {
        let n = self.dimension();
        if u.len() != n {
            return Err(FilterError::DimensionMismatch {
                expected: n,
                actual: u.len(),
            });
        }
        if !u.iter().all(|v| v.is_finite()) {
            return Err(FilterError::NonFiniteInput);
        }

        let scale = self.k();
        let offset: Vec<f64> = u.iter().zip(self.l()).map(|(u, l)| u - l).collect();
        let n_hat = scale.iter().zip(&offset).map(|(k, o)| k * o).collect();

        self.p = matrix::add(&self.p, &self.q);
        self.prediction = Some(Prediction {
            offset,
            scale,
            n_hat,
            consumed: false,
        });
        Ok(())
    }

    /// Correct the state with an observed squared field strength `z`.
    ///
    /// A rejected update leaves `x` and `P` untouched.
    pub fn measurement_update(&mut self, z: f64) -> Result<(), FilterError> {
        if !z.is_finite() {
            return Err(FilterError::NonFiniteInput);
        }
        let pred = self
            .prediction
            .as_ref()
            .ok_or(FilterError::DegenerateUpdate(Degeneracy::NoPrediction))?;
        if pred.consumed {
            warn!("measurement update reuses a stale field prediction");
        }

        let n = self.config.dimension;
        let n0 = self.config.nominal_field_strength;

        // Residual against the predicted |N|^2
        let y = z - pred.n_hat.iter().map(|v| v * v).sum::<f64>();

        // Jacobian of sum(nHat_i^2) w.r.t. [k_i, l_i]
        let mut h = Matrix::zeros(1, 2 * n);
        for i in 0..n {
            h[(0, 2 * i)] = 2.0 * pred.n_hat[i] * pred.offset[i];
            h[(0, 2 * i + 1)] = -2.0 * pred.n_hat[i] * pred.scale[i];
        }
        if h.amax() <= JACOBIAN_EPS * n0 * n0 {
            return Err(FilterError::DegenerateUpdate(Degeneracy::ZeroJacobian));
        }

        let pht = matrix::multiply(&self.p, &matrix::transpose(&h));
        let hpht = matrix::multiply(&h, &pht);
        let s = matrix::add(&self.r, &hpht)[(0, 0)];
        if !s.is_finite() || s <= f64::EPSILON * (self.r[(0, 0)].abs() + hpht[(0, 0)].abs()) {
            return Err(FilterError::DegenerateUpdate(
                Degeneracy::InnovationCovariance(s),
            ));
        }

        let gain = matrix::scalar_multiply(self.config.gain_damping / s, &pht);

        let x = matrix::add(&self.x, &matrix::scalar_multiply(y, &gain));
        let i_kh = matrix::add(
            &matrix::identity(2 * n),
            &matrix::scalar_multiply(-1.0, &matrix::multiply(&gain, &h)),
        );
        let p = matrix::symmetrize(&matrix::multiply(&i_kh, &self.p));

        if !(matrix::is_finite(&x) && matrix::is_finite(&p)) {
            return Err(FilterError::DegenerateUpdate(
                Degeneracy::NonFiniteCorrection,
            ));
        }

        debug!(residual = y, innovation = s, "measurement update applied");
        self.x = x;
        self.p = p;
        if let Some(pred) = self.prediction.as_mut() {
            pred.consumed = true;
        }
        Ok(())
    }

    // =====================================================================
    // ACCESSORS
    // =====================================================================

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    pub fn dimension(&self) -> usize {
        self.config.dimension
    }

    /// Per-axis scale factors (even state entries).
    pub fn k(&self) -> Vec<f64> {
        self.x.iter().step_by(2).copied().collect()
    }

    /// Per-axis biases (odd state entries).
    pub fn l(&self) -> Vec<f64> {
        self.x.iter().skip(1).step_by(2).copied().collect()
    }

    /// Full state `[k_0, l_0, k_1, l_1, ...]`.
    pub fn state(&self) -> Vec<f64> {
        self.x.iter().copied().collect()
    }

    pub fn state_covariance(&self) -> &Matrix {
        &self.p
    }

    pub fn p(&self) -> &Matrix {
        &self.p
    }

    pub fn process_noise(&self) -> &Matrix {
        &self.q
    }

    /// Replace `Q`, e.g. to let the estimate track a drifting sensor.
    pub fn set_process_noise(&mut self, q: Matrix) -> Result<(), FilterError> {
        let m = 2 * self.dimension();
        if q.shape() != (m, m) {
            return Err(FilterError::DimensionMismatch {
                expected: m,
                actual: if q.nrows() != m { q.nrows() } else { q.ncols() },
            });
        }
        if !matrix::is_finite(&q) {
            return Err(FilterError::NonFiniteInput);
        }
        self.q = q;
        Ok(())
    }

    pub fn measurement_noise(&self) -> f64 {
        self.r[(0, 0)]
    }

    /// Field predicted from the last control input, if any.
    pub fn predicted_field(&self) -> Option<&[f64]> {
        self.prediction.as_ref().map(|p| p.n_hat.as_slice())
    }
}

/// Jacobian entries scale with `n0^2`; below this fraction they carry no signal.
const JACOBIAN_EPS: f64 = 1e-12;
