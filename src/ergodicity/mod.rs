//! Ergodicity tracking: early warning sensors and escape protocols (§4.5, §4.6).

pub mod escape;
pub mod warning;

pub use escape::{EscapeContext, EscapeResult, EscapeVelocitySystem};
pub use warning::{EarlyWarningSystem, RiskAssessment, Sensor, SensorReading, Severity};
