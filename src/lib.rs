//! Pi-Cam-Sensor: register-level control of a camera module's image sensor
//! and focus actuator.
//!
//! The crate programs an image sensor over its register bus, negotiates
//! resolution and frame rate from mode tables, applies exposure updates
//! atomically at frame boundaries, and drives a voice-coil focus actuator.
//! Buses are abstracted behind traits so the same code runs against real
//! I2C hardware or recording mocks.

pub mod actuator;
pub mod coalesce;
pub mod config;
pub mod control;
pub mod device;
pub mod exposure;
pub mod mode;
pub mod regs;
pub mod sensor;
pub mod tables;
pub mod traits;

#[cfg(test)]
pub mod mock;

pub use config::SensorConfig;
pub use control::{Control, ControlId, ControlRange};
pub use device::I2cBus;
pub use exposure::ExposureState;
pub use mode::{ModeEntry, ModeTable, ModeTables, RunMode};
pub use regs::{RegisterOp, RegisterProgram};
pub use sensor::Sensor;
pub use traits::{
    ActuatorBus, BusError, BusErrorKind, Calibration, CalibrationSource, Format, FourCC,
    FrameInterval, FrameSize, RegWidth, RegisterBus, Result, SensorError,
};
