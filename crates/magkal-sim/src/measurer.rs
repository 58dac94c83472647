//! Magnetometer reading sources.
//!
//! A [`SensorModel`] turns a true field `N` into the raw reading
//! `u = N / k + l + noise`, the inverse of the calibration the filter learns.

use std::io;
use std::path::Path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal, UnitCircle, UnitSphere};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::SimError;

/// Pointing direction in degrees: `theta` is azimuth in the x-y plane, `phi`
/// is elevation toward +z.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Direction {
    pub theta: f64,
    pub phi: f64,
}

impl Direction {
    pub fn new(theta: f64, phi: f64) -> Self {
        Self { theta, phi }
    }
}

/// A source of raw magnetometer readings.
pub trait Measurer {
    fn dimension(&self) -> usize;

    /// Next raw reading. Sources that can be aimed use `direction`; others
    /// ignore it. `None` once the source is exhausted.
    fn measure(&mut self, direction: Option<Direction>) -> Option<Vec<f64>>;
}

// ---------------------------------------------------------------------------
// SENSOR MODEL
// ---------------------------------------------------------------------------

/// True calibration of a simulated magnetometer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorModel {
    /// Ambient field strength.
    pub n0: f64,
    pub k: Vec<f64>,
    pub l: Vec<f64>,
    /// Standard deviation of additive reading noise, in raw units.
    pub noise: f64,
}

impl SensorModel {
    pub fn new(n0: f64, k: Vec<f64>, l: Vec<f64>, noise: f64) -> Result<Self, SimError> {
        let model = Self { n0, k, l, noise };
        model.validate()?;
        Ok(model)
    }

    /// Sensor with `k` within 25% of one and `l` within `0.25 * n0` of zero.
    pub fn perturbed(
        dimension: usize,
        n0: f64,
        noise: f64,
        rng: &mut impl Rng,
    ) -> Result<Self, SimError> {
        let k = (0..dimension)
            .map(|_| 1.0 + rng.gen_range(-0.25..0.25))
            .collect();
        let l = (0..dimension)
            .map(|_| n0 * rng.gen_range(-0.25..0.25))
            .collect();
        Self::new(n0, k, l, noise)
    }

    pub fn dimension(&self) -> usize {
        self.k.len()
    }

    pub fn validate(&self) -> Result<(), SimError> {
        let n = self.k.len();
        if !(1..=3).contains(&n) {
            return Err(SimError::InvalidSensor(format!("{n} axes, need 1 to 3")));
        }
        if self.l.len() != n {
            return Err(SimError::InvalidSensor(format!(
                "{} scale factors but {} biases",
                n,
                self.l.len()
            )));
        }
        if !(self.n0.is_finite() && self.n0 > 0.0) {
            return Err(SimError::InvalidSensor(format!("field strength {}", self.n0)));
        }
        if self.k.iter().any(|k| !k.is_finite() || *k == 0.0) {
            return Err(SimError::InvalidSensor(format!("scale factors {:?}", self.k)));
        }
        if self.l.iter().any(|l| !l.is_finite()) {
            return Err(SimError::InvalidSensor(format!("biases {:?}", self.l)));
        }
        if !(self.noise.is_finite() && self.noise >= 0.0) {
            return Err(SimError::InvalidSensor(format!("noise {}", self.noise)));
        }
        Ok(())
    }

    /// Noise-free raw reading for the unit field direction `unit`.
    pub fn ideal_reading(&self, unit: &[f64]) -> Vec<f64> {
        unit.iter()
            .zip(self.k.iter().zip(&self.l))
            .map(|(v, (k, l))| self.n0 * v / k + l)
            .collect()
    }
}

/// Unit field vector for an aimed sensor of `dimension` axes.
pub fn unit_field(dimension: usize, direction: Direction) -> Vec<f64> {
    let theta = direction.theta.to_radians();
    let phi = direction.phi.to_radians();
    match dimension {
        1 => {
            let t = direction.theta.rem_euclid(360.0);
            if t > 90.0 && t < 270.0 {
                vec![-1.0]
            } else {
                vec![1.0]
            }
        }
        2 => vec![theta.cos(), theta.sin()],
        _ => vec![
            theta.cos() * phi.cos(),
            theta.sin() * phi.cos(),
            phi.sin(),
        ],
    }
}

fn random_unit_field(dimension: usize, rng: &mut StdRng) -> Vec<f64> {
    match dimension {
        1 => vec![if rng.gen_bool(0.5) { 1.0 } else { -1.0 }],
        2 => {
            let v: [f64; 2] = UnitCircle.sample(rng);
            v.to_vec()
        }
        _ => {
            let v: [f64; 3] = UnitSphere.sample(rng);
            v.to_vec()
        }
    }
}

/// Seeded noisy readings from a [`SensorModel`].
struct Synthesizer {
    model: SensorModel,
    noise: Normal<f64>,
    rng: StdRng,
}

impl Synthesizer {
    fn new(model: SensorModel, seed: u64) -> Result<Self, SimError> {
        model.validate()?;
        let noise = Normal::new(0.0, model.noise)
            .map_err(|e| SimError::InvalidSensor(e.to_string()))?;
        Ok(Self {
            model,
            noise,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    fn reading(&mut self, unit: &[f64]) -> Vec<f64> {
        let mut u = self.model.ideal_reading(unit);
        for v in u.iter_mut() {
            *v += self.noise.sample(&mut self.rng);
        }
        u
    }

    fn random_reading(&mut self) -> Vec<f64> {
        let unit = random_unit_field(self.model.dimension(), &mut self.rng);
        self.reading(&unit)
    }
}

// ---------------------------------------------------------------------------
// SOURCES
// ---------------------------------------------------------------------------

/// Readings from uniformly random field directions. Never runs dry.
pub struct RandomMeasurer {
    synth: Synthesizer,
}

impl RandomMeasurer {
    pub fn new(model: SensorModel, seed: u64) -> Result<Self, SimError> {
        Ok(Self {
            synth: Synthesizer::new(model, seed)?,
        })
    }

    pub fn model(&self) -> &SensorModel {
        &self.synth.model
    }
}

impl Measurer for RandomMeasurer {
    fn dimension(&self) -> usize {
        self.synth.model.dimension()
    }

    fn measure(&mut self, _direction: Option<Direction>) -> Option<Vec<f64>> {
        Some(self.synth.random_reading())
    }
}

/// Readings for a caller-chosen direction, random when none is given.
pub struct ManualMeasurer {
    synth: Synthesizer,
}

impl ManualMeasurer {
    pub fn new(model: SensorModel, seed: u64) -> Result<Self, SimError> {
        Ok(Self {
            synth: Synthesizer::new(model, seed)?,
        })
    }

    pub fn model(&self) -> &SensorModel {
        &self.synth.model
    }
}

impl Measurer for ManualMeasurer {
    fn dimension(&self) -> usize {
        self.synth.model.dimension()
    }

    fn measure(&mut self, direction: Option<Direction>) -> Option<Vec<f64>> {
        Some(match direction {
            Some(direction) => {
                let unit = unit_field(self.dimension(), direction);
                self.synth.reading(&unit)
            }
            None => self.synth.random_reading(),
        })
    }
}

/// Plays back recorded readings from CSV.
///
/// The first row is a header with one column per axis (`m0,m1,m2`); every
/// following row is one raw reading.
#[derive(Debug)]
pub struct ReplayMeasurer {
    dimension: usize,
    readings: Vec<Vec<f64>>,
    next: usize,
}

impl ReplayMeasurer {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SimError> {
        let path = path.as_ref();
        let replay = Self::from_csv(csv::Reader::from_path(path)?)?;
        info!(path = %path.display(), readings = replay.len(), "loaded replay");
        Ok(replay)
    }

    pub fn from_reader(rdr: impl io::Read) -> Result<Self, SimError> {
        Self::from_csv(csv::Reader::from_reader(rdr))
    }

    fn from_csv<R: io::Read>(mut rdr: csv::Reader<R>) -> Result<Self, SimError> {
        let dimension = rdr.headers()?.len();
        if !(1..=3).contains(&dimension) {
            return Err(SimError::InvalidSensor(format!(
                "replay header has {dimension} columns, need 1 to 3"
            )));
        }

        let mut readings = Vec::new();
        for (i, row) in rdr.deserialize::<Vec<f64>>().enumerate() {
            let row = row?;
            if row.len() != dimension || !row.iter().all(|v| v.is_finite()) {
                return Err(SimError::BadReplayRow {
                    row: i + 1,
                    expected: dimension,
                    actual: row,
                });
            }
            readings.push(row);
        }

        Ok(Self {
            dimension,
            readings,
            next: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.readings.len() - self.next
    }
}

impl Measurer for ReplayMeasurer {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn measure(&mut self, _direction: Option<Direction>) -> Option<Vec<f64>> {
        let reading = self.readings.get(self.next)?.clone();
        self.next += 1;
        Some(reading)
    }
}
