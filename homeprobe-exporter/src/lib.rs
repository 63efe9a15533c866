//! On-demand exporter for home devices.
//!
//! Each scrape names a target and one or more modules. The exporter queries
//! the device behind the target, normalizes the answer into metric samples and
//! returns them in the text exposition format.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌────────────┐     ┌──────────┐     ┌──────────────┐
//! │ HTTP server │────>│ Dispatcher │────>│ Registry │────>│   Adapters   │
//! │  (/?target) │     │ (modules)  │     │ (targets)│     │ (per device) │
//! └─────────────┘     └────────────┘     └──────────┘     └──────────────┘
//! ```
//!
//! # Usage
//!
//! ```bash
//! homeprobe-exporter --config homeprobe.json5
//! curl 'http://localhost:8000/?target=192.168.1.1&module=system&module=interface'
//! ```
//!
//! # Configuration
//!
//! See [`config::ExporterConfig`] for configuration options.

pub mod adapter;
pub mod clock;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod quality;
pub mod registry;
pub mod stats;

pub use config::{AdapterKind, ConfigError, ExporterConfig};
pub use dispatch::{Dispatcher, ProbeQuery, ProbeReport};
pub use error::ProbeError;
pub use http::HttpServer;
pub use quality::QualityTable;
pub use registry::TargetRegistry;
pub use stats::{ScrapeStats, SharedStats};
