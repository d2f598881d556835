use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rand::Rng;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::export::ExportServer;
use crate::gnmi::GnmiTransport;
use crate::metrics::MetricsEngine;
use crate::model::DeviceDescriptor;
use crate::session::{SessionRunner, Transport};

/// Agent wires configuration, the metrics engine, the HTTP server and one
/// session task per switch.
pub struct Agent<T: Transport = GnmiTransport> {
    cfg: Config,
    devices: Vec<DeviceDescriptor>,
    transport: Arc<T>,
    engine: Option<Arc<MetricsEngine>>,
    server: Option<ExportServer>,
    local_addr: Option<SocketAddr>,
    sessions: Vec<JoinHandle<u64>>,
    cancel: CancellationToken,
}

impl Agent<GnmiTransport> {
    /// Creates an agent talking gNMI to the configured switches.
    pub fn new(cfg: Config) -> Self {
        let transport = GnmiTransport::new(cfg.session.login_timeout, cfg.session.logout_timeout);
        Self::with_transport(cfg, transport)
    }
}

impl<T: Transport> Agent<T> {
    pub fn with_transport(cfg: Config, transport: T) -> Self {
        let devices = cfg.resolve();
        Self {
            cfg,
            devices,
            transport: Arc::new(transport),
            engine: None,
            server: None,
            local_addr: None,
            sessions: Vec::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Metrics engine, available once started.
    pub fn engine(&self) -> Option<&Arc<MetricsEngine>> {
        self.engine.as_ref()
    }

    /// Address the HTTP server bound to, available once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Start all components and begin streaming.
    pub async fn start(&mut self) -> Result<()> {
        // 1. Metrics engine and label mapping.
        let engine = Arc::new(
            MetricsEngine::new(
                self.cfg.extra_label_names(),
                self.cfg.metrics.queue_capacity,
            )
            .context("creating metrics engine")?,
        );
        engine.set_device_labels(&self.devices);

        // 2. HTTP server, before sessions so scrapes see idle devices.
        let addresses = self.devices.iter().map(|d| d.address.clone()).collect();
        let server = ExportServer::new(&self.cfg.listen_addr(), Arc::clone(&engine), addresses);
        let local_addr = server.start().await.context("starting HTTP server")?;
        self.local_addr = Some(local_addr);
        self.server = Some(server);

        // 3. One session per switch, staggered.
        let settings = self.cfg.session_settings();
        let jitter = self.cfg.session.startup_jitter;
        for device in &self.devices {
            let delay = startup_delay(jitter, &mut rand::thread_rng());
            let runner = SessionRunner::new(
                device.clone(),
                Arc::clone(&self.transport),
                Arc::clone(&engine),
                settings,
            );
            let cancel = self.cancel.child_token();

            self.sessions.push(tokio::spawn(async move {
                tokio::select! {
                    () = cancel.cancelled() => return 0,
                    () = tokio::time::sleep(delay) => {}
                }
                runner.run(cancel).await
            }));
        }

        self.engine = Some(engine);

        info!(
            switches = self.devices.len(),
            addr = %local_addr,
            "agent fully started",
        );

        Ok(())
    }

    /// Gracefully stop all components.
    pub async fn stop(&mut self) -> Result<()> {
        self.cancel.cancel();

        let mut attempts = 0;
        for handle in self.sessions.drain(..) {
            match handle.await {
                Ok(n) => attempts += n,
                Err(e) => warn!(error = %e, "session task failed"),
            }
        }

        if let Some(engine) = &self.engine {
            engine.flush().await;
        }

        if let Some(server) = self.server.take() {
            server.stop();
        }

        info!(attempts, "agent stopped");

        Ok(())
    }
}

/// Random delay in `[0, jitter)` before a device's first attempt.
fn startup_delay<R: Rng + ?Sized>(jitter: Duration, rng: &mut R) -> Duration {
    let nanos = u64::try_from(jitter.as_nanos()).unwrap_or(u64::MAX);
    if nanos == 0 {
        return Duration::ZERO;
    }
    Duration::from_nanos(rng.gen_range(0..nanos))
}
