//! Risk controls for the hedger.
//!
//! The exposure guard turns unsafe cycle outcomes into structured alerts
//! and a halt that persists until an operator acknowledges it.

mod exposure;

pub use exposure::{AlertSeverity, ExposureAlert, ExposureAlertType, ExposureGuard};
