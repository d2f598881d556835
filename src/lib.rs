//! Streams switch interface state over gNMI and exposes it as Prometheus metrics.

pub mod agent;
pub mod config;
pub mod export;
pub mod gnmi;
pub mod metrics;
pub mod model;
pub mod session;
