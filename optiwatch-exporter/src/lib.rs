//! Dial-out telemetry receiver and Prometheus exporter for optical
//! transport devices.
//!
//! Devices push streaming telemetry over a dial-out connection; each live
//! session gets an isolated metric store that Prometheus scrapes through a
//! per-target `/probe` endpoint:
//!
//! - [`dialout`] - Framed ingest listener and per-connection receive loop
//! - [`dispatch`] - Ordered pattern table routing updates to decoders
//! - [`decode`] - Typed payload decoders with unit conversions
//! - [`catalogue`] - Per-device gauge catalogue and exposition rendering
//! - [`registry`] - Live session registry (one session per device)
//! - [`http`] - Probe, metrics and health endpoints
//! - [`config`] - Exporter configuration

pub mod catalogue;
pub mod config;
pub mod decode;
pub mod dialout;
pub mod dispatch;
pub mod http;
pub mod registry;

pub use catalogue::{GaugeVec, MetricStore, render_catalogue};
pub use config::{DialoutConfig, ExporterConfig, HttpConfig};
pub use decode::{DecodeError, Reading};
pub use dialout::{DialoutServer, SessionError};
pub use dispatch::Dispatcher;
pub use http::HttpServer;
pub use registry::{RegistryError, SessionRegistry};
