//! Per-device telemetry session: login, subscribe, stream, back off, repeat.

pub mod backoff;
pub mod decode;
pub mod state;
pub mod transport;

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::gnmi::proto::{
    subscribe_request, subscription_list, Encoding, Path, SubscribeRequest, SubscribeResponse,
    Subscription, SubscriptionList, SubscriptionMode,
};
use crate::metrics::MetricsEngine;
use crate::model::{DeviceDescriptor, ErrorKind};

pub use backoff::Backoff;
use decode::Message;
pub use state::{Event, Phase};
pub use transport::{Session, TelemetryStream, Transport};

/// Default upper bound on a single subscribe stream.
pub const DEFAULT_STREAM_LIFETIME: Duration = Duration::from_secs(3600);

/// Path subscribed on every device.
pub const INTERFACE_STATE_PATH: [&str; 3] = ["interfaces", "interface", "state"];

/// Timing knobs shared by all session runners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub stream_lifetime: Duration,
    pub backoff: Backoff,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            stream_lifetime: DEFAULT_STREAM_LIFETIME,
            backoff: Backoff::default(),
        }
    }
}

/// Drives one device through repeated connect/subscribe attempts until cancelled.
pub struct SessionRunner<T: Transport> {
    device: DeviceDescriptor,
    transport: Arc<T>,
    metrics: Arc<MetricsEngine>,
    settings: SessionSettings,
    phase: Phase,
    attempts: u64,
}

impl<T: Transport> SessionRunner<T> {
    pub fn new(
        device: DeviceDescriptor,
        transport: Arc<T>,
        metrics: Arc<MetricsEngine>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            device,
            transport,
            metrics,
            settings,
            phase: Phase::Idle,
            attempts: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    /// Runs attempts until `cancel` fires. Returns the number of attempts made.
    pub async fn run(mut self, cancel: CancellationToken) -> u64 {
        info!(device = %self.device.address, port = self.device.port, "session started");
        self.transition(Event::Start);

        while !cancel.is_cancelled() {
            self.guarded_attempt(&cancel).await;
            if cancel.is_cancelled() {
                break;
            }

            let delay = self.settings.backoff.delay();
            debug!(device = %self.device.address, delay = ?delay, "backing off");
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
            self.transition(Event::BackoffElapsed);
        }

        info!(device = %self.device.address, attempts = self.attempts, "session stopped");
        self.attempts
    }

    /// One attempt under a panic boundary. A panic is counted and turned into
    /// a normal backoff.
    async fn guarded_attempt(&mut self, cancel: &CancellationToken) {
        self.attempts += 1;

        let outcome = AssertUnwindSafe(self.attempt(cancel)).catch_unwind().await;
        if let Err(payload) = outcome {
            error!(
                device = %self.device.address,
                panic = %panic_message(payload.as_ref()),
                "session attempt panicked",
            );
            self.metrics
                .inc_error(&self.device.address, ErrorKind::Panic);
            self.metrics
                .update_subscribe_status(&self.device.address, false);
            self.transition(Event::Faulted);
        }
    }

    async fn attempt(&mut self, cancel: &CancellationToken) {
        let login = tokio::select! {
            () = cancel.cancelled() => return,
            r = self.transport.login(&self.device) => r,
        };
        let mut session = match login {
            Ok(session) => session,
            Err(e) => {
                warn!(device = %self.device.address, error = %format_args!("{e:#}"), "connect failed");
                self.metrics
                    .inc_error(&self.device.address, ErrorKind::Connect);
                self.metrics
                    .update_connect_status(&self.device.address, false);
                self.transition(Event::LoginFailed);
                return;
            }
        };

        self.metrics
            .update_connect_status(&self.device.address, true);
        self.transition(Event::LoginSucceeded);
        debug!(device = %self.device.address, "logged in");

        // The session is closed whether streaming returns or panics.
        let streamed = AssertUnwindSafe(self.subscribe_and_stream(&mut session, cancel))
            .catch_unwind()
            .await;
        session.close().await;

        if let Err(payload) = streamed {
            std::panic::resume_unwind(payload);
        }
    }

    async fn subscribe_and_stream(&mut self, session: &mut T::Session, cancel: &CancellationToken) {
        self.transition(Event::SubscribeStarted);

        let mut stream = match session.open_stream(self.settings.stream_lifetime).await {
            Ok(stream) => stream,
            Err(e) => {
                self.subscribe_failed("opening subscribe stream failed", &e);
                return;
            }
        };

        if let Err(e) = stream.send(subscribe_request(&self.device)).await {
            self.subscribe_failed("sending subscribe request failed", &e);
            return;
        }

        self.metrics
            .update_subscribe_status(&self.device.address, true);
        self.transition(Event::RequestSent);
        info!(
            device = %self.device.address,
            sample_interval_secs = self.device.sample_interval_secs,
            "subscribed",
        );

        loop {
            let received = tokio::select! {
                () = cancel.cancelled() => None,
                r = stream.recv() => Some(r),
            };

            match received {
                None => {
                    debug!(device = %self.device.address, "stream cancelled");
                    self.metrics
                        .update_subscribe_status(&self.device.address, false);
                    break;
                }
                Some(Ok(Some(response))) => self.handle(response).await,
                Some(Ok(None)) => {
                    warn!(device = %self.device.address, "stream ended by device");
                    self.stream_broken();
                    break;
                }
                Some(Err(e)) => {
                    warn!(device = %self.device.address, error = %format_args!("{e:#}"), "stream receive failed");
                    self.stream_broken();
                    break;
                }
            }
        }

        self.transition(Event::StreamEnded);
    }

    async fn handle(&self, response: SubscribeResponse) {
        match decode::classify(response) {
            Message::Updates(results) => {
                for result in results {
                    match result {
                        Ok(state) => self.metrics.update(&self.device.address, state).await,
                        Err(e) => {
                            warn!(device = %self.device.address, error = %e, "skipping undecodable value");
                            self.metrics
                                .inc_error(&self.device.address, ErrorKind::Parse);
                        }
                    }
                }
            }
            Message::SyncComplete => {
                debug!(device = %self.device.address, "initial sync complete");
            }
            Message::Error(message) => {
                warn!(device = %self.device.address, error = %message, "device reported stream error");
                self.metrics
                    .inc_error(&self.device.address, ErrorKind::Subscribe);
                self.metrics
                    .update_subscribe_status(&self.device.address, false);
            }
            Message::Empty => {}
        }
    }

    fn subscribe_failed(&mut self, what: &str, e: &anyhow::Error) {
        warn!(device = %self.device.address, error = %format_args!("{e:#}"), "{what}");
        self.metrics
            .inc_error(&self.device.address, ErrorKind::Subscribe);
        self.metrics
            .update_subscribe_status(&self.device.address, false);
        self.transition(Event::SubscribeFailed);
    }

    fn stream_broken(&self) {
        self.metrics
            .inc_error(&self.device.address, ErrorKind::Subscribe);
        self.metrics
            .update_subscribe_status(&self.device.address, false);
    }

    fn transition(&mut self, event: Event) {
        match self.phase.try_on(event) {
            Some(next) => {
                debug!(device = %self.device.address, from = %self.phase, to = %next, ?event, "phase");
                self.phase = next;
            }
            None => {
                debug!(device = %self.device.address, phase = %self.phase, ?event, "ignored event");
            }
        }
    }
}

/// Builds the sampled STREAM subscription for interface state.
pub fn subscribe_request(device: &DeviceDescriptor) -> SubscribeRequest {
    SubscribeRequest {
        request: Some(subscribe_request::Request::Subscribe(SubscriptionList {
            subscription: vec![Subscription {
                path: Some(Path::from_elems(&INTERFACE_STATE_PATH)),
                mode: SubscriptionMode::Sample as i32,
                sample_interval: device.sample_interval_nanos(),
                ..Default::default()
            }],
            mode: subscription_list::Mode::Stream as i32,
            encoding: Encoding::Json as i32,
            ..Default::default()
        })),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
