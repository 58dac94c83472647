//! Threaded front end for [`CalibrationFilter`].
//!
//! The filter lives on a dedicated worker thread. Control inputs and
//! measurements arrive on separate rendezvous channels and are applied one at
//! a time, so a reading and its field-strength observation can be produced by
//! different threads without ever interleaving a half-applied update.
//! Readers get a consistent [`FilterSnapshot`] without blocking the worker.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, select, Receiver, Sender};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::CalibrationConfig;
use crate::error::FilterError;
use crate::filter::CalibrationFilter;
use crate::matrix::Matrix;

type Ack = Sender<Result<(), FilterError>>;

struct ControlMsg {
    u: Vec<f64>,
    ack: Ack,
}

struct MeasurementMsg {
    z: f64,
    ack: Ack,
}

struct ProcessNoiseMsg {
    q: Matrix,
    ack: Ack,
}

/// Copy of the filter state taken after the last applied message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterSnapshot {
    pub dimension: usize,
    pub state: Vec<f64>,
    pub covariance: Matrix,
    pub process_noise: Matrix,
    pub accepted: u64,
    pub rejected: u64,
}

impl FilterSnapshot {
    fn capture(filter: &CalibrationFilter, accepted: u64, rejected: u64) -> Self {
        Self {
            dimension: filter.dimension(),
            state: filter.state(),
            covariance: filter.state_covariance().clone(),
            process_noise: filter.process_noise().clone(),
            accepted,
            rejected,
        }
    }

    pub fn k(&self) -> Vec<f64> {
        self.state.iter().step_by(2).copied().collect()
    }

    pub fn l(&self) -> Vec<f64> {
        self.state.iter().skip(1).step_by(2).copied().collect()
    }
}

/// Owning handle to a filter running on its own thread.
///
/// Submissions block until the worker has applied (or rejected) them.
/// Dropping the handle closes the channels and joins the worker.
pub struct FilterHandle {
    dimension: usize,
    control_tx: Option<Sender<ControlMsg>>,
    measurement_tx: Option<Sender<MeasurementMsg>>,
    process_noise_tx: Option<Sender<ProcessNoiseMsg>>,
    snapshot: Arc<RwLock<FilterSnapshot>>,
    worker: Option<JoinHandle<()>>,
}

impl FilterHandle {
    pub fn spawn(config: CalibrationConfig) -> Result<Self, FilterError> {
        let filter = CalibrationFilter::new(config)?;
        let dimension = filter.dimension();
        let snapshot = Arc::new(RwLock::new(FilterSnapshot::capture(&filter, 0, 0)));

        let (control_tx, control_rx) = bounded(0);
        let (measurement_tx, measurement_rx) = bounded(0);
        let (process_noise_tx, process_noise_rx) = bounded(0);

        let shared = Arc::clone(&snapshot);
        let worker = thread::Builder::new()
            .name("magkal-filter".into())
            .spawn(move || {
                run_worker(filter, control_rx, measurement_rx, process_noise_rx, shared)
            })
            .map_err(|e| FilterError::Spawn(e.to_string()))?;

        info!(dimension, "filter worker started");
        Ok(Self {
            dimension,
            control_tx: Some(control_tx),
            measurement_tx: Some(measurement_tx),
            process_noise_tx: Some(process_noise_tx),
            snapshot,
            worker: Some(worker),
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Submit a raw sensor reading. Wrong-length input is rejected here
    /// without reaching the worker.
    pub fn send_control(&self, u: &[f64]) -> Result<(), FilterError> {
        if u.len() != self.dimension {
            return Err(FilterError::DimensionMismatch {
                expected: self.dimension,
                actual: u.len(),
            });
        }
        let tx = self.control_tx.as_ref().ok_or(FilterError::Disconnected)?;
        round_trip(tx, |ack| ControlMsg { u: u.to_vec(), ack })
    }

    /// Submit an observed squared field strength.
    pub fn send_measurement(&self, z: f64) -> Result<(), FilterError> {
        let tx = self.measurement_tx.as_ref().ok_or(FilterError::Disconnected)?;
        round_trip(tx, |ack| MeasurementMsg { z, ack })
    }

    pub fn set_process_noise(&self, q: Matrix) -> Result<(), FilterError> {
        let tx = self.process_noise_tx.as_ref().ok_or(FilterError::Disconnected)?;
        round_trip(tx, |ack| ProcessNoiseMsg { q, ack })
    }

    pub fn snapshot(&self) -> FilterSnapshot {
        self.snapshot.read().clone()
    }

    pub fn k(&self) -> Vec<f64> {
        self.snapshot.read().k()
    }

    pub fn l(&self) -> Vec<f64> {
        self.snapshot.read().l()
    }

    pub fn state(&self) -> Vec<f64> {
        self.snapshot.read().state.clone()
    }

    pub fn covariance(&self) -> Matrix {
        self.snapshot.read().covariance.clone()
    }

    pub fn process_noise(&self) -> Matrix {
        self.snapshot.read().process_noise.clone()
    }
}

impl Drop for FilterHandle {
    fn drop(&mut self) {
        self.control_tx.take();
        self.measurement_tx.take();
        self.process_noise_tx.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("filter worker panicked");
            }
        }
    }
}

fn round_trip<M>(tx: &Sender<M>, build: impl FnOnce(Ack) -> M) -> Result<(), FilterError> {
    let (ack_tx, ack_rx) = bounded(1);
    tx.send(build(ack_tx)).map_err(|_| FilterError::Disconnected)?;
    ack_rx.recv().map_err(|_| FilterError::Disconnected)?
}

fn run_worker(
    mut filter: CalibrationFilter,
    control_rx: Receiver<ControlMsg>,
    measurement_rx: Receiver<MeasurementMsg>,
    process_noise_rx: Receiver<ProcessNoiseMsg>,
    snapshot: Arc<RwLock<FilterSnapshot>>,
) {
    let mut accepted = 0u64;
    let mut rejected = 0u64;

    loop {
        let next = select! {
            recv(control_rx) -> msg => msg
                .ok()
                .map(|ControlMsg { u, ack }| (filter.control_update(&u), ack)),
            recv(measurement_rx) -> msg => msg
                .ok()
                .map(|MeasurementMsg { z, ack }| (filter.measurement_update(z), ack)),
            recv(process_noise_rx) -> msg => msg
                .ok()
                .map(|ProcessNoiseMsg { q, ack }| (filter.set_process_noise(q), ack)),
        };
        // All senders go away together when the handle drops
        let Some((result, ack)) = next else { break };

        match &result {
            Ok(()) => accepted += 1,
            Err(err) => {
                rejected += 1;
                warn!(%err, "filter input rejected");
            }
        }
        *snapshot.write() = FilterSnapshot::capture(&filter, accepted, rejected);

        // The caller may have given up waiting; nothing to do then.
        let _ = ack.send(result);
    }

    info!(accepted, rejected, "filter worker stopped");
}
