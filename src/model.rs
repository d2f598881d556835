use std::collections::HashMap;
use std::fmt;

use serde::Deserialize;

/// Resolved connection and subscription parameters for one switch.
///
/// Built once from configuration and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// Management address; also the `device` label on every series.
    pub address: String,
    /// gRPC port.
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Telemetry sample interval in whole seconds.
    pub sample_interval_secs: u64,
    /// Extra label values for this device, keyed by declared label name.
    pub labels: HashMap<String, String>,
}

impl DeviceDescriptor {
    /// Sample interval expressed in nanoseconds, the unit gNMI expects.
    pub fn sample_interval_nanos(&self) -> u64 {
        self.sample_interval_secs.saturating_mul(1_000_000_000)
    }
}

/// Administrative or operational status of an interface.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum LinkStatus {
    Up,
    Down,
    /// Any other value reported by the device (TESTING, LOWER_LAYER_DOWN, ...).
    Other(String),
}

impl LinkStatus {
    /// Gauge value: 1.0 for `UP`, 0.0 for anything else.
    pub fn gauge_value(&self) -> f64 {
        match self {
            Self::Up => 1.0,
            _ => 0.0,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Up => "UP",
            Self::Down => "DOWN",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for LinkStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "UP" => Self::Up,
            "DOWN" => Self::Down,
            _ => Self::Other(s),
        }
    }
}

impl Default for LinkStatus {
    fn default() -> Self {
        Self::Other(String::new())
    }
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Latest reported state of one interface, decoded from a telemetry update.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InterfaceState {
    pub name: String,
    #[serde(rename = "admin-status", default)]
    pub admin_status: LinkStatus,
    #[serde(rename = "oper-status", default)]
    pub oper_status: LinkStatus,
}

/// Per-device error classes surfaced on the `gnmi_error_total` counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorKind {
    /// Transport establishment or login failed.
    Connect,
    /// Opening the stream, sending the request, or receiving failed.
    Subscribe,
    /// A single telemetry value could not be decoded.
    Parse,
    /// An attempt panicked and was contained.
    Panic,
}

impl ErrorKind {
    /// Returns the `type` label value.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Subscribe => "subscribe",
            Self::Parse => "parse",
            Self::Panic => "panic",
        }
    }

    /// All error kinds in reporting order.
    pub const fn all() -> &'static [ErrorKind] {
        &[Self::Connect, Self::Subscribe, Self::Parse, Self::Panic]
    }

    /// Index into fixed-size per-kind arrays.
    pub const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
