//! TWAMP measurement client primitives.
//!
//! This crate owns the narrow contract the exporter has with the
//! measurement protocol: establish a control connection and a reusable
//! test session against a reflector, execute a bounded run of timed
//! exchanges, and tear the session down. Consumers go through the
//! [`MeasurementClient`] / [`MeasurementSession`] traits so the concrete
//! wire client can be substituted in tests.
//!
//! Only unauthenticated TWAMP (RFC 4656 / RFC 5357) is spoken; the
//! authenticated and encrypted modes are not negotiated.

pub mod client;
pub mod config;
pub mod error;
pub mod stats;

pub use client::{MeasurementClient, MeasurementSession, TwampClient, TwampSession};
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use stats::RunStatistics;
