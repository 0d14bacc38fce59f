//! TWAMP exporter library.
//!
//! The exporter answers Prometheus scrape requests by running (or
//! reusing) a TWAMP measurement session against the requested target and
//! exposing the round-trip statistics of one bounded run. Session setup
//! is expensive relative to a run, so established sessions are cached per
//! target and reused across scrapes until they break.
//!
//! Layering, top down:
//!
//! - [`server`] — HTTP surface (`/probe`, `/metrics`, `/`) and shutdown
//! - [`prober`] — one probe: acquire a session, run under a deadline,
//!   classify the result
//! - [`cache`] — the target-to-session registry with per-session
//!   exclusivity and eviction
//! - [`metrics`] — per-scrape exposition and the exporter's own metrics

pub mod cache;
pub mod metrics;
pub mod prober;
pub mod server;
