//! Spherical measurement grid.
//!
//! Pools raw magnetometer samples by pointing direction into latitude bands of
//! roughly equal-area cells. Each cell keeps only a running mean and variance,
//! so memory stays fixed no matter how long the stream runs. Applying a
//! candidate `(K, L)` to the cell means gives a per-direction field strength;
//! a tight cluster around `n0^2` means the calibration is good, and empty cells
//! show which directions still need coverage.
//!
//! Empty cells report `NaN` for every aggregate or derived value.

use std::f64::consts::{PI, TAU};

use nalgebra::Vector3;
use serde::Serialize;

use crate::error::GridError;

type Vector3r = Vector3<f64>;

// ---------------------------------------------------------------------------
// CELL AGGREGATE
// ---------------------------------------------------------------------------

/// Running aggregate of the raw samples that landed in one cell.
///
/// The update reproduces the two-pass mean and population variance exactly
/// (up to round-off) for any arrival order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeasureAgg {
    mean: Vector3r,
    mean_square: f64,
    variance: f64,
    n: usize,
}

impl Default for MeasureAgg {
    fn default() -> Self {
        Self {
            mean: Vector3r::zeros(),
            mean_square: 0.0,
            variance: 0.0,
            n: 0,
        }
    }
}

impl MeasureAgg {
    pub fn add(&mut self, m0: f64, m1: f64, m2: f64) {
        let m = Vector3r::new(m0, m1, m2);
        let n = self.n as f64;
        let prev = self.mean;

        self.mean = (prev * n + m) / (n + 1.0);
        self.mean_square = (n * self.mean_square + m.norm_squared()) / (n + 1.0);

        // Old deviations are re-centred on the new mean, then the new sample joins.
        let shift = (prev - self.mean).norm_squared();
        let dev = (m - self.mean).norm_squared();
        self.variance = (n * (self.variance + shift) + dev) / (n + 1.0);

        self.n += 1;
    }

    pub fn count(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// Mean raw vector, `NaN` if empty.
    pub fn mean(&self) -> Vector3r {
        if self.is_empty() {
            Vector3r::repeat(f64::NAN)
        } else {
            self.mean
        }
    }

    /// Mean of `|m|^2`, `NaN` if empty.
    pub fn mean_square(&self) -> f64 {
        if self.is_empty() {
            f64::NAN
        } else {
            self.mean_square
        }
    }

    /// Population variance of the samples about their mean, summed over the
    /// three components. `NaN` if empty.
    pub fn variance(&self) -> f64 {
        if self.is_empty() {
            f64::NAN
        } else {
            self.variance
        }
    }
}

// ---------------------------------------------------------------------------
// GRID
// ---------------------------------------------------------------------------

/// Latitude-banded partition of the unit sphere.
///
/// Row `i` is a band centred on `thetas()[i]` (north to south); its cells are
/// centred on `phis()[i]`, evenly spaced over `[0, 2pi)`. Cells per band are
/// chosen so every cell subtends about `(pi / n_theta)^2` steradians.
#[derive(Debug, Clone)]
pub struct MeasureGrid {
    thetas: Vec<f64>,
    phis: Vec<Vec<f64>>,
    cells: Vec<Vec<MeasureAgg>>,
    n: usize,
    size: usize,
}

impl MeasureGrid {
    pub fn new(n_theta: usize) -> Result<Self, GridError> {
        if n_theta == 0 {
            return Err(GridError::NoBands);
        }

        let f_theta = n_theta as f64;
        let half_band = 0.5 * PI / f_theta;
        let patch_area = (PI / f_theta) * (PI / f_theta);

        let mut thetas = Vec::with_capacity(n_theta);
        let mut phis = Vec::with_capacity(n_theta);
        let mut cells = Vec::with_capacity(n_theta);
        let mut size = 0;

        for i in 0..n_theta {
            let theta = PI * (0.5 - (i as f64 + 0.5) / f_theta);
            let band_area = TAU * ((theta + half_band).sin() - (theta - half_band).sin());
            let n_phi = ((band_area / patch_area).round() as usize).max(1);

            thetas.push(theta);
            phis.push(
                (0..n_phi)
                    .map(|j| TAU * (j as f64 + 0.5) / n_phi as f64)
                    .collect(),
            );
            cells.push(vec![MeasureAgg::default(); n_phi]);
            size += n_phi;
        }

        Ok(Self {
            thetas,
            phis,
            cells,
            n: 0,
            size,
        })
    }

    /// Band centre latitudes in radians, north to south.
    pub fn thetas(&self) -> &[f64] {
        &self.thetas
    }

    /// Cell centre longitudes in radians, one row per band.
    pub fn phis(&self) -> &[Vec<f64>] {
        &self.phis
    }

    /// Total number of cells.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Total number of samples ever added.
    pub fn n(&self) -> usize {
        self.n
    }

    pub fn cell(&self, band: usize, column: usize) -> Option<&MeasureAgg> {
        self.cells.get(band).and_then(|row| row.get(column))
    }

    /// `(band, column)` of the cell that a raw sample points into.
    pub fn locate(&self, m0: f64, m1: f64, m2: f64) -> Result<(usize, usize), GridError> {
        if !(m0.is_finite() && m1.is_finite() && m2.is_finite()) {
            return Err(GridError::NonFinite);
        }
        let mm = (m0 * m0 + m1 * m1 + m2 * m2).sqrt();
        if mm == 0.0 {
            return Err(GridError::ZeroMagnitude);
        }

        let theta = (m2 / mm).clamp(-1.0, 1.0).asin();
        let phi = m1.atan2(m0);

        let n_theta = self.thetas.len();
        let band = (((0.5 - theta / PI) * n_theta as f64) as usize).min(n_theta - 1);

        let n_phi = self.phis[band].len();
        let column = (((phi + TAU) / TAU * n_phi as f64) as usize) % n_phi;

        Ok((band, column))
    }

    pub fn add(&mut self, m0: f64, m1: f64, m2: f64) -> Result<(), GridError> {
        let (band, column) = self.locate(m0, m1, m2)?;
        self.cells[band][column].add(m0, m1, m2);
        self.n += 1;
        Ok(())
    }

    // =====================================================================
    // QUERIES
    // =====================================================================

    fn map_cells<T>(&self, f: impl Fn(&MeasureAgg) -> T) -> Vec<Vec<T>> {
        self.cells
            .iter()
            .map(|row| row.iter().map(&f).collect())
            .collect()
    }

    pub fn counts(&self) -> Vec<Vec<usize>> {
        self.map_cells(MeasureAgg::count)
    }

    pub fn averages(&self) -> Vec<Vec<Vector3r>> {
        self.map_cells(MeasureAgg::mean)
    }

    /// Per-cell population variance (the `SS` aggregate).
    pub fn variances(&self) -> Vec<Vec<f64>> {
        self.map_cells(MeasureAgg::variance)
    }

    pub fn std_devs(&self) -> Vec<Vec<f64>> {
        self.map_cells(|agg| agg.variance().sqrt())
    }

    /// Fraction of cells holding at least one sample.
    pub fn coverage(&self) -> f64 {
        let filled: usize = self
            .cells
            .iter()
            .map(|row| row.iter().filter(|agg| !agg.is_empty()).count())
            .sum();
        filled as f64 / self.size as f64
    }

    /// Calibrated field `k * (mean - l)` for every cell.
    pub fn calculated_field(&self, k: &[f64], l: &[f64]) -> Result<Vec<Vec<Vector3r>>, GridError> {
        let (k, l) = (to_vector3(k)?, to_vector3(l)?);
        Ok(self.map_cells(|agg| calibrate(agg, &k, &l)))
    }

    /// Squared magnitude of the calibrated field for every cell. Clusters
    /// around `n0^2` when `(k, l)` is right.
    pub fn calculated_field_strength2(
        &self,
        k: &[f64],
        l: &[f64],
    ) -> Result<Vec<Vec<f64>>, GridError> {
        let (k, l) = (to_vector3(k)?, to_vector3(l)?);
        Ok(self.map_cells(|agg| calibrate(agg, &k, &l).norm_squared()))
    }

    /// Summary of [`Self::calculated_field_strength2`] over non-empty cells,
    /// `None` while the grid is empty.
    pub fn field_strength_spread(
        &self,
        k: &[f64],
        l: &[f64],
    ) -> Result<Option<FieldStrengthSpread>, GridError> {
        let values: Vec<f64> = self
            .calculated_field_strength2(k, l)?
            .into_iter()
            .flatten()
            .filter(|v| !v.is_nan())
            .collect();
        Ok(FieldStrengthSpread::from_values(&values))
    }
}

fn to_vector3(v: &[f64]) -> Result<Vector3r, GridError> {
    if v.len() != 3 {
        return Err(GridError::DimensionMismatch(v.len()));
    }
    Ok(Vector3r::new(v[0], v[1], v[2]))
}

fn calibrate(agg: &MeasureAgg, k: &Vector3r, l: &Vector3r) -> Vector3r {
    // mean() is already NaN for empty cells, which carries through.
    k.component_mul(&(agg.mean() - l))
}

// ---------------------------------------------------------------------------
// QUALITY SUMMARY
// ---------------------------------------------------------------------------

/// Spread of per-cell calibrated `|N|^2` values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FieldStrengthSpread {
    pub cells: usize,
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
}

impl FieldStrengthSpread {
    fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Some(Self {
            cells: values.len(),
            mean,
            std_dev: variance.sqrt(),
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        })
    }

    /// `std_dev / mean`, the scale-free quality number.
    pub fn relative(&self) -> f64 {
        self.std_dev / self.mean
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::{Rng, SeedableRng};

    const EPS: f64 = 1e-6;

    fn two_pass(samples: &[[f64; 3]]) -> (Vector3r, f64, f64) {
        let n = samples.len() as f64;
        let mean = samples
            .iter()
            .fold(Vector3r::zeros(), |acc, s| acc + Vector3r::from(*s))
            / n;
        let mean_square = samples
            .iter()
            .map(|s| Vector3r::from(*s).norm_squared())
            .sum::<f64>()
            / n;
        let variance = samples
            .iter()
            .map(|s| (Vector3r::from(*s) - mean).norm_squared())
            .sum::<f64>()
            / n;
        (mean, mean_square, variance)
    }

    fn assert_close(name: &str, actual: f64, expected: f64, tol: f64) {
        let scale = expected.abs().max(1.0);
        assert!(
            (actual - expected).abs() <= tol * scale,
            "{name}: expected {expected}, got {actual}"
        );
    }

    #[test]
    fn test_point_aggregation() {
        let samples = [[-1.0, 2.9, -11.5], [0.0, 3.0, -12.0], [1.0, 3.1, -11.0]];
        let mut agg = MeasureAgg::default();
        for s in samples {
            agg.add(s[0], s[1], s[2]);
        }

        let (mean, mean_square, variance) = two_pass(&samples);
        assert_eq!(agg.count(), 3);
        assert_close("m0", agg.mean().x, 0.0, EPS);
        assert_close("m1", agg.mean().y, 3.0, EPS);
        assert_close("m2", agg.mean().z, -11.5, EPS);
        assert_close("mean", agg.mean().z, mean.z, EPS);
        assert_close("mm", agg.mean_square(), mean_square, EPS);
        assert_close("ss", agg.variance(), variance, EPS);
        // |m|^2 mean minus |mean|^2 is the same population variance
        assert_close("ss alt", agg.variance(), mean_square - mean.norm_squared(), EPS);
    }

    #[test]
    fn test_aggregation_permutation_invariant() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut samples: Vec<[f64; 3]> = (0..50)
            .map(|_| {
                [
                    rng.gen_range(-500.0..500.0),
                    rng.gen_range(-500.0..500.0),
                    rng.gen_range(-500.0..500.0),
                ]
            })
            .collect();
        let (mean, mean_square, variance) = two_pass(&samples);

        for _ in 0..5 {
            samples.shuffle(&mut rng);
            let mut agg = MeasureAgg::default();
            for s in &samples {
                agg.add(s[0], s[1], s[2]);
            }
            for i in 0..3 {
                assert_close("mean", agg.mean()[i], mean[i], EPS);
            }
            assert_close("mm", agg.mean_square(), mean_square, EPS);
            assert_close("ss", agg.variance(), variance, EPS);
        }
    }

    #[test]
    fn test_empty_cell_is_nan() {
        let agg = MeasureAgg::default();
        assert!(agg.mean().iter().all(|v| v.is_nan()));
        assert!(agg.mean_square().is_nan());
        assert!(agg.variance().is_nan());
    }

    #[test]
    fn test_grid_shape() {
        for n_theta in [1, 2, 3, 6, 13] {
            let g = MeasureGrid::new(n_theta).unwrap();
            assert_eq!(g.thetas().len(), n_theta);
            assert_eq!(g.phis().len(), n_theta);

            let d_theta = PI / n_theta as f64;
            for pair in g.thetas().windows(2) {
                assert_close("dTheta", pair[0] - pair[1], d_theta, EPS);
            }
            assert!(g.thetas()[0] < FRAC_PI_2);
            assert!(*g.thetas().last().unwrap() > -FRAC_PI_2);

            for row in g.phis() {
                let d_phi = TAU / row.len() as f64;
                assert_close("phi0", row[0], 0.5 * d_phi, EPS);
                for pair in row.windows(2) {
                    assert_close("dPhi", pair[1] - pair[0], d_phi, EPS);
                }
            }

            let size: usize = g.phis().iter().map(Vec::len).sum();
            assert_eq!(size, g.size());
        }
        assert_eq!(MeasureGrid::new(0).unwrap_err(), GridError::NoBands);
    }

    #[test]
    fn test_grid_areas() {
        for n_theta in 2..=24 {
            let g = MeasureGrid::new(n_theta).unwrap();
            let patch = 4.0 * PI / g.size() as f64;
            let thetas = g.thetas();

            for (i, theta) in thetas.iter().enumerate() {
                let top = if i == 0 {
                    FRAC_PI_2
                } else {
                    0.5 * (theta + thetas[i - 1])
                };
                let bottom = if i == n_theta - 1 {
                    -FRAC_PI_2
                } else {
                    0.5 * (theta + thetas[i + 1])
                };
                let area = (top.sin() - bottom.sin()) * TAU / g.phis()[i].len() as f64;
                assert!(
                    (area - patch).abs() <= 0.25 * patch,
                    "n_theta={n_theta} band={i}: area {area} vs {patch}"
                );
            }
        }
    }

    #[test]
    fn test_grid_counts_random() {
        let mut rng = StdRng::seed_from_u64(99);
        let mut g = MeasureGrid::new(rng.gen_range(1..40)).unwrap();
        let mut expected: Vec<Vec<usize>> = g.phis().iter().map(|r| vec![0; r.len()]).collect();

        let adds = rng.gen_range(100..1000);
        for _ in 0..adds {
            let ti = rng.gen_range(0..g.thetas().len());
            let si = rng.gen_range(0..g.phis()[ti].len());
            let (theta, phi) = (g.thetas()[ti], g.phis()[ti][si]);
            let scale = rng.gen_range(0.5..2.0);
            g.add(
                scale * theta.cos() * phi.cos(),
                scale * theta.cos() * phi.sin(),
                scale * theta.sin(),
            )
            .unwrap();
            expected[ti][si] += 1;
        }

        assert_eq!(g.counts(), expected);
        assert_eq!(g.n(), adds);
        assert_eq!(g.counts().iter().flatten().sum::<usize>(), adds);
    }

    #[test]
    fn test_grid_poles_and_seam() {
        let mut g = MeasureGrid::new(6).unwrap();
        assert_eq!(g.locate(0.0, 0.0, 1.0).unwrap().0, 0);
        assert_eq!(g.locate(0.0, 0.0, -1.0).unwrap().0, 5);
        // phi just below 2pi wraps to the last column, phi = 0 to the first
        let (band, col) = g.locate(1.0, -1e-9, 0.0).unwrap();
        assert_eq!(col, g.phis()[band].len() - 1);
        assert_eq!(g.locate(1.0, 0.0, 0.0).unwrap().1, 0);

        assert_eq!(g.add(0.0, 0.0, 0.0), Err(GridError::ZeroMagnitude));
        assert_eq!(g.add(f64::NAN, 1.0, 0.0), Err(GridError::NonFinite));
        assert_eq!(g.n(), 0);
    }

    #[test]
    fn test_grid_averages_and_variances() {
        let mut g = MeasureGrid::new(4).unwrap();
        let (theta, phi) = (g.thetas()[1], g.phis()[1][2]);
        let m = Vector3r::new(theta.cos() * phi.cos(), theta.cos() * phi.sin(), theta.sin())
            * 40_000.0;

        let mut s = 1.0;
        for _ in 0..12 {
            let v = m * (1.0 + 0.1 * s);
            g.add(v.x, v.y, v.z).unwrap();
            s = -s;
        }

        let avgs = g.averages();
        let vars = g.variances();
        for i in 0..3 {
            assert_close("avg", avgs[1][2][i], m[i], EPS);
        }
        // alternating +/-10% about the mean
        assert_close("var", vars[1][2], 0.01 * m.norm_squared(), EPS);
        assert_close("std", g.std_devs()[1][2], 0.1 * m.norm(), EPS);

        assert!(avgs[0][0].iter().all(|v| v.is_nan()));
        assert!(vars[0][0].is_nan());
        assert_eq!(g.counts()[0][0], 0);

        let cell = g.cell(1, 2).unwrap();
        assert_eq!(cell.count(), 12);
        assert_close("cell mean", cell.mean().x, m.x, EPS);
        assert!(g.cell(0, 0).unwrap().is_empty());
        assert!(g.cell(4, 0).is_none());
        assert!(g.cell(1, g.phis()[1].len()).is_none());
    }

    #[test]
    fn test_calculated_field_strengths() {
        let k = [0.8, 0.6, 0.7];
        let l = [4180.0, -2660.0, 250.0];
        let nn = 40_000.0;
        let mut g = MeasureGrid::new(2).unwrap();

        let mut truth = Vec::new();
        for (i, theta) in g.thetas().to_vec().into_iter().enumerate() {
            let mut row = Vec::new();
            for phi in g.phis()[i].clone() {
                let n = Vector3r::new(
                    nn * theta.cos() * phi.cos(),
                    nn * theta.cos() * phi.sin(),
                    nn * theta.sin(),
                );
                g.add(n.x / k[0] + l[0], n.y / k[1] + l[1], n.z / k[2] + l[2])
                    .unwrap();
                row.push(n);
            }
            truth.push(row);
        }

        for (i, row) in g.calculated_field(&k, &l).unwrap().iter().enumerate() {
            for (j, f) in row.iter().enumerate() {
                for c in 0..3 {
                    assert_close("field", f[c], truth[i][j][c], EPS);
                }
            }
        }
        for row in g.calculated_field_strength2(&k, &l).unwrap() {
            for f in row {
                assert_close("strength2", f, nn * nn, EPS);
            }
        }

        let good = g.field_strength_spread(&k, &l).unwrap().unwrap();
        assert_eq!(good.cells, g.size());
        assert!(good.relative() < 1e-9);

        let bad = g
            .field_strength_spread(&[1.0, 1.0, 1.0], &[0.0, 0.0, 0.0])
            .unwrap()
            .unwrap();
        assert!(bad.relative() > 0.05);
    }

    #[test]
    fn test_calculated_field_empty_and_mismatch() {
        let g = MeasureGrid::new(3).unwrap();
        let f = g.calculated_field(&[1.0; 3], &[0.0; 3]).unwrap();
        assert!(f.iter().flatten().all(|v| v.iter().all(|c| c.is_nan())));
        assert_eq!(g.field_strength_spread(&[1.0; 3], &[0.0; 3]).unwrap(), None);
        assert_eq!(g.coverage(), 0.0);
        assert_eq!(
            g.calculated_field_strength2(&[1.0; 2], &[0.0; 3]),
            Err(GridError::DimensionMismatch(2))
        );
    }
}
