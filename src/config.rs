use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::gnmi::{DEFAULT_LOGIN_TIMEOUT, DEFAULT_LOGOUT_TIMEOUT};
use crate::metrics::DEFAULT_QUEUE_CAPACITY;
use crate::model::DeviceDescriptor;
use crate::session::backoff::{DEFAULT_BASE, DEFAULT_MAX};
use crate::session::{Backoff, SessionSettings, DEFAULT_STREAM_LIFETIME};

/// Sample interval used when neither the switch nor `default` sets one.
pub const DEFAULT_SAMPLE_INTERVAL: u64 = 10;

/// Label names every series already carries; extra labels may not reuse them.
pub const RESERVED_LABEL_NAMES: [&str; 3] = ["device", "interface", "type"];

/// Top-level configuration for the exporter.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// HTTP exposition server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Values every switch inherits unless it overrides them.
    #[serde(default)]
    pub default: DefaultConfig,

    /// Switches to subscribe to.
    #[serde(default)]
    pub switches: Vec<SwitchConfig>,

    /// Session timing.
    #[serde(default)]
    pub session: SessionConfig,

    /// Aggregation engine configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// HTTP exposition server configuration.
#[derive(Debug, Default, Deserialize)]
pub struct ServerConfig {
    /// Listen address. ":port" binds all interfaces.
    #[serde(default)]
    pub addr: Option<String>,

    /// Listen port on all interfaces, shorthand for `addr: ":<port>"`.
    /// 0 means unset.
    #[serde(default)]
    pub port: Option<u16>,
}

/// Defaults inherited by every switch.
#[derive(Debug, Deserialize)]
pub struct DefaultConfig {
    /// gRPC port.
    #[serde(default)]
    pub port: u16,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    /// Sample interval in seconds. 0 falls back to 10.
    #[serde(default = "default_sample_interval")]
    pub sample_interval: u64,

    /// Declares the extra label set and the default value of each label.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// One switch entry. Unset fields fall back to `default`.
#[derive(Debug, Default, Deserialize)]
pub struct SwitchConfig {
    pub address: String,

    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// 0 inherits the default interval.
    #[serde(default)]
    pub sample_interval: Option<u64>,

    /// Overrides for labels declared in `default.labels`.
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

/// Session timing configuration.
#[derive(Debug, Deserialize)]
pub struct SessionConfig {
    /// Connect plus login bound. Default: 2s.
    #[serde(default = "default_login_timeout", with = "humantime_serde")]
    pub login_timeout: Duration,

    /// Logout bound. Default: 1s.
    #[serde(default = "default_logout_timeout", with = "humantime_serde")]
    pub logout_timeout: Duration,

    /// Upper bound on one subscribe stream. Default: 1h.
    #[serde(default = "default_stream_lifetime", with = "humantime_serde")]
    pub stream_lifetime: Duration,

    /// Base retry delay. Default: 5s.
    #[serde(default = "default_backoff_base", with = "humantime_serde")]
    pub backoff_base: Duration,

    /// Retry delay ceiling. Default: 60s.
    #[serde(default = "default_backoff_max", with = "humantime_serde")]
    pub backoff_max: Duration,

    /// Random delay in [0, startup_jitter) before each device's first attempt. Default: 5s.
    #[serde(default = "default_startup_jitter", with = "humantime_serde")]
    pub startup_jitter: Duration,
}

/// Aggregation engine configuration.
#[derive(Debug, Deserialize)]
pub struct MetricsConfig {
    /// Interface update queue capacity. Default: 1000.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

// --- Default value functions ---

const DEFAULT_SERVER_ADDR: &str = ":8080";

fn default_sample_interval() -> u64 {
    DEFAULT_SAMPLE_INTERVAL
}

fn default_login_timeout() -> Duration {
    DEFAULT_LOGIN_TIMEOUT
}

fn default_logout_timeout() -> Duration {
    DEFAULT_LOGOUT_TIMEOUT
}

fn default_stream_lifetime() -> Duration {
    DEFAULT_STREAM_LIFETIME
}

fn default_backoff_base() -> Duration {
    DEFAULT_BASE
}

fn default_backoff_max() -> Duration {
    DEFAULT_MAX
}

fn default_startup_jitter() -> Duration {
    Duration::from_secs(5)
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

// --- Default trait impls ---

impl Default for DefaultConfig {
    fn default() -> Self {
        Self {
            port: 0,
            username: String::new(),
            password: String::new(),
            sample_interval: default_sample_interval(),
            labels: BTreeMap::new(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            login_timeout: default_login_timeout(),
            logout_timeout: default_logout_timeout(),
            stream_lifetime: default_stream_lifetime(),
            backoff_base: default_backoff_base(),
            backoff_max: default_backoff_max(),
            startup_jitter: default_startup_jitter(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

// --- Validation and loading ---

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        if self.server.addr.as_deref() == Some("") {
            bail!("server.addr must not be empty");
        }
        if self.server.addr.is_some() && self.server.port.is_some_and(|p| p != 0) {
            bail!("set only one of server.addr and server.port");
        }

        if self.switches.is_empty() {
            bail!("at least one switch is required");
        }

        for name in self.default.labels.keys() {
            validate_label_name(name)?;
        }

        let mut seen = HashSet::with_capacity(self.switches.len());
        for sw in &self.switches {
            if sw.address.is_empty() {
                bail!("switch address is required");
            }
            if !seen.insert(sw.address.as_str()) {
                bail!("duplicate switch address: {}", sw.address);
            }
            if sw.port.unwrap_or(self.default.port) == 0 {
                bail!("switch {} has no port (set default.port or port)", sw.address);
            }
            for name in sw.labels.keys() {
                if !self.default.labels.contains_key(name) {
                    bail!(
                        "undefined label '{name}' in switch {}; only labels defined in default are allowed",
                        sw.address
                    );
                }
            }
        }

        if self.session.login_timeout.is_zero() {
            bail!("session.login_timeout must be positive");
        }
        if self.session.logout_timeout.is_zero() {
            bail!("session.logout_timeout must be positive");
        }
        if self.session.stream_lifetime.is_zero() {
            bail!("session.stream_lifetime must be positive");
        }
        if self.session.backoff_base.is_zero() {
            bail!("session.backoff_base must be positive");
        }
        if self.session.backoff_max < self.session.backoff_base {
            bail!(
                "session.backoff_max ({:?}) must be >= session.backoff_base ({:?})",
                self.session.backoff_max,
                self.session.backoff_base
            );
        }

        if self.metrics.queue_capacity == 0 {
            bail!("metrics.queue_capacity must be positive");
        }

        Ok(())
    }

    /// Address the HTTP server listens on: `server.addr`, else
    /// `":<server.port>"`, else ":8080".
    pub fn listen_addr(&self) -> String {
        match (&self.server.addr, self.server.port) {
            (Some(addr), _) => addr.clone(),
            (None, Some(port)) if port != 0 => format!(":{port}"),
            _ => DEFAULT_SERVER_ADDR.to_string(),
        }
    }

    /// Sample interval inherited by switches that do not set one.
    fn default_sample_interval(&self) -> u64 {
        match self.default.sample_interval {
            0 => DEFAULT_SAMPLE_INTERVAL,
            secs => secs,
        }
    }

    /// Declared extra label names, sorted.
    pub fn extra_label_names(&self) -> Vec<String> {
        self.default.labels.keys().cloned().collect()
    }

    /// Resolves every switch against the defaults, in configuration order.
    pub fn resolve(&self) -> Vec<DeviceDescriptor> {
        self.switches
            .iter()
            .map(|sw| {
                let mut labels: HashMap<String, String> = self
                    .default
                    .labels
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                labels.extend(sw.labels.iter().map(|(k, v)| (k.clone(), v.clone())));

                DeviceDescriptor {
                    address: sw.address.clone(),
                    port: sw.port.unwrap_or(self.default.port),
                    username: sw
                        .username
                        .clone()
                        .unwrap_or_else(|| self.default.username.clone()),
                    password: sw
                        .password
                        .clone()
                        .unwrap_or_else(|| self.default.password.clone()),
                    sample_interval_secs: sw
                        .sample_interval
                        .filter(|&secs| secs != 0)
                        .unwrap_or_else(|| self.default_sample_interval()),
                    labels,
                }
            })
            .collect()
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            stream_lifetime: self.session.stream_lifetime,
            backoff: Backoff::new(self.session.backoff_base, self.session.backoff_max),
        }
    }
}

/// Prometheus label name rules, minus the reserved names.
fn validate_label_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if !valid || name.starts_with("__") {
        bail!("invalid label name: '{name}'");
    }
    if RESERVED_LABEL_NAMES.contains(&name) {
        bail!("label name '{name}' is reserved");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn valid_config() -> Config {
        Config {
            default: DefaultConfig {
                port: 50051,
                username: "admin".to_string(),
                password: "secret".to_string(),
                labels: BTreeMap::from([
                    ("site".to_string(), String::new()),
                    ("rack".to_string(), "r0".to_string()),
                ]),
                ..Default::default()
            },
            switches: vec![SwitchConfig {
                address: "10.0.0.1".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(contents.as_bytes()).expect("write config");
        file
    }

    #[test]
    fn test_default_config_values() {
        let cfg = Config::default();
        assert_eq!(cfg.listen_addr(), ":8080");
        assert_eq!(cfg.default.sample_interval, 10);
        assert_eq!(cfg.session.login_timeout, Duration::from_secs(2));
        assert_eq!(cfg.session.logout_timeout, Duration::from_secs(1));
        assert_eq!(cfg.session.stream_lifetime, Duration::from_secs(3600));
        assert_eq!(cfg.session.backoff_base, Duration::from_secs(5));
        assert_eq!(cfg.session.backoff_max, Duration::from_secs(60));
        assert_eq!(cfg.session.startup_jitter, Duration::from_secs(5));
        assert_eq!(cfg.metrics.queue_capacity, 1000);
    }

    #[test]
    fn test_load_and_resolve() {
        let file = write_config(
            r#"
server:
  addr: "127.0.0.1:9100"
default:
  port: 50051
  username: admin
  password: secret
  sample_interval: 10
  labels:
    site: ""
    rack: ""
switches:
  - address: 10.0.0.1
    labels: { site: dc1 }
  - address: 10.0.0.2
    port: 50052
    username: ops
    password: other
    sample_interval: 30
session:
  backoff_base: 2s
  stream_lifetime: 30m
"#,
        );

        let cfg = Config::load(file.path()).expect("valid config");
        assert_eq!(cfg.listen_addr(), "127.0.0.1:9100");
        assert_eq!(cfg.extra_label_names(), vec!["rack", "site"]);
        assert_eq!(cfg.session.backoff_base, Duration::from_secs(2));
        assert_eq!(cfg.session.stream_lifetime, Duration::from_secs(1800));

        let devices = cfg.resolve();
        assert_eq!(devices.len(), 2);

        let first = &devices[0];
        assert_eq!(first.address, "10.0.0.1");
        assert_eq!(first.port, 50051);
        assert_eq!(first.username, "admin");
        assert_eq!(first.sample_interval_secs, 10);
        assert_eq!(first.labels.get("site").map(String::as_str), Some("dc1"));
        assert_eq!(first.labels.get("rack").map(String::as_str), Some(""));

        let second = &devices[1];
        assert_eq!(second.port, 50052);
        assert_eq!(second.username, "ops");
        assert_eq!(second.password, "other");
        assert_eq!(second.sample_interval_secs, 30);
        assert_eq!(second.labels.get("site").map(String::as_str), Some(""));

        let settings = cfg.session_settings();
        assert_eq!(settings.backoff.base(), Duration::from_secs(2));
        assert_eq!(settings.backoff.max(), Duration::from_secs(60));
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load(Path::new("/nonexistent/gnmi-exporter.yaml")).unwrap_err();
        assert!(err.to_string().contains("reading config file"));
    }

    #[test]
    fn test_load_malformed_yaml() {
        let file = write_config("switches: [ {address: 10.0.0.1");
        let err = Config::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("parsing config file"));
    }

    #[test]
    fn test_validation_undefined_label() {
        let mut cfg = valid_config();
        cfg.switches[0]
            .labels
            .insert("zone".to_string(), "a".to_string());

        let err = cfg.validate().unwrap_err();
        assert!(err
            .to_string()
            .contains("undefined label 'zone' in switch 10.0.0.1"));
    }

    #[test]
    fn test_validation_requires_switches() {
        let mut cfg = valid_config();
        cfg.switches.clear();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("at least one switch"));
    }

    #[test]
    fn test_validation_duplicate_address() {
        let mut cfg = valid_config();
        cfg.switches.push(SwitchConfig {
            address: "10.0.0.1".to_string(),
            ..Default::default()
        });
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate switch address"));
    }

    #[test]
    fn test_validation_port_required() {
        let mut cfg = valid_config();
        cfg.default.port = 0;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("has no port"));

        cfg.switches[0].port = Some(6030);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_server_port_shorthand() {
        let file = write_config(
            r#"
server:
  port: 9100
default:
  port: 50051
switches:
  - address: 10.0.0.1
"#,
        );

        let cfg = Config::load(file.path()).expect("valid config");
        assert_eq!(cfg.listen_addr(), ":9100");
    }

    #[test]
    fn test_server_port_zero_uses_default_addr() {
        let mut cfg = valid_config();
        cfg.server.port = Some(0);
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.listen_addr(), ":8080");
    }

    #[test]
    fn test_validation_server_addr_and_port_conflict() {
        let mut cfg = valid_config();
        cfg.server.addr = Some("127.0.0.1:9100".to_string());
        cfg.server.port = Some(9200);
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("only one of server.addr and server.port"));
    }

    #[test]
    fn test_switch_sample_interval_zero_inherits_default() {
        let file = write_config(
            r#"
default:
  port: 50051
  sample_interval: 30
switches:
  - address: 10.0.0.1
    sample_interval: 0
"#,
        );

        let cfg = Config::load(file.path()).expect("valid config");
        assert_eq!(cfg.resolve()[0].sample_interval_secs, 30);
    }

    #[test]
    fn test_default_sample_interval_zero_falls_back() {
        let file = write_config(
            r#"
default:
  port: 50051
  sample_interval: 0
switches:
  - address: 10.0.0.1
  - address: 10.0.0.2
    sample_interval: 0
  - address: 10.0.0.3
    sample_interval: 5
"#,
        );

        let cfg = Config::load(file.path()).expect("valid config");
        let intervals: Vec<u64> = cfg
            .resolve()
            .iter()
            .map(|d| d.sample_interval_secs)
            .collect();
        assert_eq!(intervals, vec![10, 10, 5]);
    }

    #[test]
    fn test_validation_reserved_label() {
        let mut cfg = valid_config();
        cfg.default
            .labels
            .insert("interface".to_string(), String::new());
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("reserved"));
    }

    #[test]
    fn test_validation_invalid_label_name() {
        for bad in ["1site", "site-name", "", "__meta"] {
            let mut cfg = valid_config();
            cfg.default.labels.insert(bad.to_string(), String::new());
            let err = cfg.validate().unwrap_err();
            assert!(
                err.to_string().contains("invalid label name"),
                "{bad}: {err}"
            );
        }
    }

    #[test]
    fn test_validation_backoff_max_below_base() {
        let mut cfg = valid_config();
        cfg.session.backoff_max = Duration::from_secs(1);
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("backoff_max"));
    }

    #[test]
    fn test_validation_queue_capacity_zero() {
        let mut cfg = valid_config();
        cfg.metrics.queue_capacity = 0;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("queue_capacity"));
    }

    #[test]
    fn test_validation_stream_lifetime_zero() {
        let mut cfg = valid_config();
        cfg.session.stream_lifetime = Duration::ZERO;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("stream_lifetime"));
    }
}
