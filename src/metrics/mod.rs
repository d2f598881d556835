//! Metrics aggregation engine.
//!
//! Holds the per-device interface state and the five exported sinks. Interface
//! updates travel through a bounded queue drained by a single worker task, so
//! the interface gauges are only ever written from one place. Connection,
//! subscription and error events are low-frequency and are applied directly
//! under the state lock.

pub mod labels;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use prometheus::{CounterVec, GaugeVec, Opts, Registry};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::model::{DeviceDescriptor, ErrorKind, InterfaceState};

use self::labels::{label_names, LabelResolver};

/// Default capacity of the interface update queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Adds the process collector (cpu, memory, fds) where the platform supports it.
fn register_process_metrics(_registry: &Registry) -> Result<()> {
    #[cfg(target_os = "linux")]
    {
        use prometheus::process_collector::ProcessCollector;
        _registry.register(Box::new(ProcessCollector::for_self()))?;
    }
    Ok(())
}

/// Work items for the aggregation worker.
enum Task {
    Update {
        device: String,
        state: InterfaceState,
    },
    /// Resolves once every task queued before it has been applied.
    Flush(oneshot::Sender<()>),
}

/// The exported metric families.
struct Sinks {
    /// Administrative status per interface (1=UP, 0=otherwise).
    pub admin_status: GaugeVec,
    /// Operational status per interface (1=UP, 0=otherwise).
    pub oper_status: GaugeVec,
    /// Connection status per device (1=connected, 0=disconnected).
    pub connect_status: GaugeVec,
    /// Subscription status per device (1=active, 0=inactive).
    pub subscribe_status: GaugeVec,
    /// Errors per device and type.
    pub errors: CounterVec,
}

impl Sinks {
    fn new(extra: &[String]) -> Result<Self> {
        let admin_status = GaugeVec::new(
            Opts::new(
                "interface_admin_status",
                "Administrative status of the interface (1=UP, 0=DOWN)",
            ),
            &label_names(&["device", "interface"], extra),
        )?;
        let oper_status = GaugeVec::new(
            Opts::new(
                "interface_oper_status",
                "Operational status of the interface (1=UP, 0=DOWN)",
            ),
            &label_names(&["device", "interface"], extra),
        )?;
        let connect_status = GaugeVec::new(
            Opts::new(
                "gnmi_connect_status",
                "Connection status to the switch (1=connected, 0=disconnected)",
            ),
            &label_names(&["device"], extra),
        )?;
        let subscribe_status = GaugeVec::new(
            Opts::new(
                "gnmi_subscribe_status",
                "Subscription status to the switch (1=active, 0=inactive)",
            ),
            &label_names(&["device"], extra),
        )?;
        let errors = CounterVec::new(
            Opts::new("gnmi_error_total", "Total number of gNMI errors"),
            &label_names(&["device", "type"], extra),
        )?;

        Ok(Self {
            admin_status,
            oper_status,
            connect_status,
            subscribe_status,
            errors,
        })
    }

    fn register(&self, registry: &Registry) -> Result<()> {
        registry.register(Box::new(self.admin_status.clone()))?;
        registry.register(Box::new(self.oper_status.clone()))?;
        registry.register(Box::new(self.connect_status.clone()))?;
        registry.register(Box::new(self.subscribe_status.clone()))?;
        registry.register(Box::new(self.errors.clone()))?;
        Ok(())
    }
}

/// Connection health tracked alongside the gauges for snapshotting.
#[derive(Debug, Default, Clone, Copy)]
struct DeviceHealth {
    connected: bool,
    subscribed: bool,
    errors: [u64; 4],
}

/// State guarded by the engine lock.
#[derive(Default)]
struct State {
    labels: LabelResolver,
    interfaces: HashMap<String, HashMap<String, InterfaceState>>,
    health: HashMap<String, DeviceHealth>,
}

struct Inner {
    registry: Registry,
    sinks: Sinks,
    state: parking_lot::Mutex<State>,
}

impl Inner {
    fn apply_update(&self, device: &str, state: InterfaceState) {
        let mut guard = self.state.lock();
        let st = &mut *guard;

        {
            let values = st.labels.label_values(&[device, &state.name], device);
            self.sinks
                .admin_status
                .with_label_values(&values)
                .set(state.admin_status.gauge_value());
            self.sinks
                .oper_status
                .with_label_values(&values)
                .set(state.oper_status.gauge_value());
        }

        st.interfaces
            .entry(device.to_string())
            .or_default()
            .insert(state.name.clone(), state);
    }
}

/// Point-in-time health of one device, as shown on the status page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchStatus {
    pub connected: bool,
    pub subscribed: bool,
    /// Error counts, one entry per [`ErrorKind`].
    pub errors: BTreeMap<ErrorKind, u64>,
}

impl SwitchStatus {
    fn from_health(health: DeviceHealth) -> Self {
        Self {
            connected: health.connected,
            subscribed: health.subscribed,
            errors: ErrorKind::all()
                .iter()
                .map(|kind| (*kind, health.errors[kind.index()]))
                .collect(),
        }
    }

    /// Count for one error kind.
    pub fn error_count(&self, kind: ErrorKind) -> u64 {
        self.errors.get(&kind).copied().unwrap_or(0)
    }
}

/// Process-wide metric state shared by every session task.
///
/// Constructed once at startup and handed out behind an `Arc`.
pub struct MetricsEngine {
    inner: Arc<Inner>,
    update_tx: mpsc::Sender<Task>,
}

impl MetricsEngine {
    /// Registers the sinks with `device`/`interface` base labels plus
    /// `extra_label_names`, and starts the aggregation worker.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(extra_label_names: Vec<String>, queue_capacity: usize) -> Result<Self> {
        if queue_capacity == 0 {
            bail!("update queue capacity must be positive");
        }

        let registry = Registry::new();
        register_process_metrics(&registry).context("registering process collector")?;
        let sinks = Sinks::new(&extra_label_names).context("creating metric sinks")?;
        sinks
            .register(&registry)
            .context("registering metric sinks")?;

        let inner = Arc::new(Inner {
            registry,
            sinks,
            state: parking_lot::Mutex::new(State {
                labels: LabelResolver::new(extra_label_names),
                ..Default::default()
            }),
        });

        let (update_tx, update_rx) = mpsc::channel(queue_capacity);
        tokio::spawn(run_worker(Arc::clone(&inner), update_rx));

        Ok(Self { inner, update_tx })
    }

    /// Registry holding the sinks and process metrics, for the exposition endpoint.
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// Replaces the device → label mapping used for all later writes.
    pub fn set_device_labels(&self, devices: &[DeviceDescriptor]) {
        self.inner.state.lock().labels.set_devices(devices);
    }

    /// Queues an interface state update.
    ///
    /// Waits for a free slot when the queue is full, so a slow worker slows
    /// producers down instead of losing updates.
    pub async fn update(&self, device: &str, state: InterfaceState) {
        let task = Task::Update {
            device: device.to_string(),
            state,
        };
        if self.update_tx.send(task).await.is_err() {
            warn!(device, "aggregation worker stopped, dropping interface update");
        }
    }

    /// Waits until every update queued before this call has been applied.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.update_tx.send(Task::Flush(done_tx)).await.is_err() {
            return;
        }
        let _ = done_rx.await;
    }

    /// Sets the connection gauge for `device`.
    pub fn update_connect_status(&self, device: &str, connected: bool) {
        let mut guard = self.inner.state.lock();
        let st = &mut *guard;

        let values = st.labels.label_values(&[device], device);
        self.inner
            .sinks
            .connect_status
            .with_label_values(&values)
            .set(bool_gauge(connected));

        st.health.entry(device.to_string()).or_default().connected = connected;
    }

    /// Sets the subscription gauge for `device`.
    pub fn update_subscribe_status(&self, device: &str, active: bool) {
        let mut guard = self.inner.state.lock();
        let st = &mut *guard;

        let values = st.labels.label_values(&[device], device);
        self.inner
            .sinks
            .subscribe_status
            .with_label_values(&values)
            .set(bool_gauge(active));

        st.health.entry(device.to_string()).or_default().subscribed = active;
    }

    /// Increments the error counter for `device` and `kind`.
    pub fn inc_error(&self, device: &str, kind: ErrorKind) {
        let mut guard = self.inner.state.lock();
        let st = &mut *guard;

        let values = st.labels.label_values(&[device, kind.as_str()], device);
        self.inner.sinks.errors.with_label_values(&values).inc();

        st.health.entry(device.to_string()).or_default().errors[kind.index()] += 1;
    }

    /// Snapshot of connection health for each requested device.
    ///
    /// Devices without any recorded activity report disconnected,
    /// unsubscribed and zero errors.
    pub fn switch_status<S: AsRef<str>>(&self, devices: &[S]) -> BTreeMap<String, SwitchStatus> {
        let st = self.inner.state.lock();
        devices
            .iter()
            .map(|device| {
                let device = device.as_ref();
                let health = st.health.get(device).copied().unwrap_or_default();
                (device.to_string(), SwitchStatus::from_health(health))
            })
            .collect()
    }

    /// Latest applied state of one interface.
    pub fn interface_state(&self, device: &str, interface: &str) -> Option<InterfaceState> {
        self.inner
            .state
            .lock()
            .interfaces
            .get(device)
            .and_then(|m| m.get(interface))
            .cloned()
    }

    /// Number of interfaces with applied state for `device`.
    pub fn interface_count(&self, device: &str) -> usize {
        self.inner
            .state
            .lock()
            .interfaces
            .get(device)
            .map_or(0, HashMap::len)
    }

    /// Reads one series from the registry by metric name and exact label set.
    pub fn series_value(&self, metric: &str, labels: &[(&str, &str)]) -> Option<f64> {
        for family in self.inner.registry.gather() {
            if family.get_name() != metric {
                continue;
            }
            for m in family.get_metric() {
                let pairs = m.get_label();
                if pairs.len() != labels.len() {
                    continue;
                }
                let matches = labels.iter().all(|(name, value)| {
                    pairs
                        .iter()
                        .any(|p| p.get_name() == *name && p.get_value() == *value)
                });
                if !matches {
                    continue;
                }
                if m.has_gauge() {
                    return Some(m.get_gauge().get_value());
                }
                if m.has_counter() {
                    return Some(m.get_counter().get_value());
                }
            }
        }
        None
    }
}

/// Drains the update queue, one task at a time, in FIFO order.
async fn run_worker(inner: Arc<Inner>, mut rx: mpsc::Receiver<Task>) {
    while let Some(task) = rx.recv().await {
        match task {
            Task::Update { device, state } => inner.apply_update(&device, state),
            Task::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("aggregation worker stopped");
}

fn bool_gauge(v: bool) -> f64 {
    if v {
        1.0
    } else {
        0.0
    }
}
