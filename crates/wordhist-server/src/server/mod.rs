//! Server-side components of the `wordhist` histogram service.
//!
//! ## Submodules
//!
//! - [`config`] - Command line and environment configuration.
//! - [`session`] - One client conversation: read the request, run a
//!   [`wordhist::HistogramJob`], stream the histogram back.
//! - [`listener`] - Accept loop, per-connection tasks and graceful shutdown.
//! - [`telemetry`] - Structured logging and optional OpenTelemetry export.
//!
//! These components are wired together in the server's `main.rs`.

pub mod config;
pub mod listener;
pub mod session;
pub mod telemetry;
