//! Magkal Simulation Library
//!
//! Synthetic and recorded magnetometer sources, plus a session driver that
//! runs them through the calibration filter.

pub mod error;
pub mod measurer;
pub mod params;
pub mod session;

// Re-export main types
pub use error::SimError;
pub use measurer::{
    unit_field, Direction, ManualMeasurer, Measurer, RandomMeasurer, ReplayMeasurer, SensorModel,
};
pub use params::ParamSpec;
pub use session::{run_session, SessionConfig, SessionResult, StepRecord};
