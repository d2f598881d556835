use std::future::Future;
use std::time::Duration;

use anyhow::Result;

use crate::gnmi::proto::{SubscribeRequest, SubscribeResponse};
use crate::model::DeviceDescriptor;

/// Opens authenticated sessions to devices.
pub trait Transport: Send + Sync + 'static {
    type Session: Session;

    /// Establish a connection and log in with the device credentials.
    fn login(
        &self,
        device: &DeviceDescriptor,
    ) -> impl Future<Output = Result<Self::Session>> + Send;
}

/// One authenticated connection, valid for a single subscribe attempt.
pub trait Session: Send + Sized {
    type Stream: TelemetryStream;

    /// Open a bidirectional subscribe stream bounded by `lifetime`.
    fn open_stream(
        &mut self,
        lifetime: Duration,
    ) -> impl Future<Output = Result<Self::Stream>> + Send;

    /// Log out and tear down the connection. Never fails; problems are logged.
    fn close(self) -> impl Future<Output = ()> + Send;
}

/// Bidirectional telemetry stream.
pub trait TelemetryStream: Send {
    /// Send a subscribe request.
    fn send(&mut self, request: SubscribeRequest) -> impl Future<Output = Result<()>> + Send;

    /// Receive the next response; `Ok(None)` when the device ends the stream.
    fn recv(&mut self) -> impl Future<Output = Result<Option<SubscribeResponse>>> + Send;
}
