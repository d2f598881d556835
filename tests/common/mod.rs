#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use parking_lot::Mutex;

use gnmi_exporter::gnmi::proto::{
    subscribe_response, typed_value, Notification, SubscribeRequest, SubscribeResponse,
    TypedValue, Update,
};
use gnmi_exporter::model::DeviceDescriptor;
use gnmi_exporter::session::{Session, TelemetryStream, Transport};

/// What one connect attempt does.
#[derive(Debug, Clone)]
pub enum Attempt {
    RefuseLogin,
    OpenFails,
    SendFails,
    PanicOnOpen,
    Stream(Vec<Recv>),
}

/// One scripted receive on an open stream.
#[derive(Debug, Clone)]
pub enum Recv {
    Response(SubscribeResponse),
    /// Sleep before moving to the next step.
    Delay(Duration),
    Error(&'static str),
    End,
    Panic,
}

/// Calls observed by the scripted transport.
#[derive(Debug, Default)]
pub struct Record {
    pub logins: AtomicUsize,
    pub closes: AtomicUsize,
    pub requests: Mutex<Vec<SubscribeRequest>>,
}

impl Record {
    pub fn logins(&self) -> usize {
        self.logins.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

/// Transport replaying one script per attempt. Once the script runs out,
/// logins never complete.
pub struct ScriptedTransport {
    attempts: Mutex<VecDeque<Attempt>>,
    pub record: Arc<Record>,
}

impl ScriptedTransport {
    pub fn new(attempts: Vec<Attempt>) -> Self {
        Self {
            attempts: Mutex::new(attempts.into()),
            record: Arc::new(Record::default()),
        }
    }
}

impl Transport for ScriptedTransport {
    type Session = ScriptedSession;

    async fn login(&self, _device: &DeviceDescriptor) -> Result<ScriptedSession> {
        self.record.logins.fetch_add(1, Ordering::SeqCst);
        let next = self.attempts.lock().pop_front();
        match next {
            None => std::future::pending().await,
            Some(Attempt::RefuseLogin) => Err(anyhow!("connection refused")),
            Some(attempt) => Ok(ScriptedSession {
                attempt,
                record: Arc::clone(&self.record),
            }),
        }
    }
}

pub struct ScriptedSession {
    attempt: Attempt,
    record: Arc<Record>,
}

impl Session for ScriptedSession {
    type Stream = ScriptedStream;

    async fn open_stream(&mut self, _lifetime: Duration) -> Result<ScriptedStream> {
        match &self.attempt {
            Attempt::OpenFails => Err(anyhow!("unauthenticated")),
            Attempt::PanicOnOpen => panic!("scripted panic on open"),
            Attempt::SendFails => Ok(ScriptedStream {
                fail_send: true,
                steps: VecDeque::new(),
                record: Arc::clone(&self.record),
            }),
            Attempt::Stream(steps) => Ok(ScriptedStream {
                fail_send: false,
                steps: steps.clone().into(),
                record: Arc::clone(&self.record),
            }),
            Attempt::RefuseLogin => Err(anyhow!("not logged in")),
        }
    }

    async fn close(self) {
        self.record.closes.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct ScriptedStream {
    fail_send: bool,
    steps: VecDeque<Recv>,
    record: Arc<Record>,
}

impl TelemetryStream for ScriptedStream {
    async fn send(&mut self, request: SubscribeRequest) -> Result<()> {
        if self.fail_send {
            return Err(anyhow!("broken pipe"));
        }
        self.record.requests.lock().push(request);
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<SubscribeResponse>> {
        loop {
            match self.steps.pop_front() {
                // Out of steps: stay quiet until cancelled.
                None => std::future::pending().await,
                Some(Recv::Delay(d)) => tokio::time::sleep(d).await,
                Some(Recv::Response(r)) => return Ok(Some(r)),
                Some(Recv::Error(e)) => return Err(anyhow!(e)),
                Some(Recv::End) => return Ok(None),
                Some(Recv::Panic) => panic!("scripted panic on recv"),
            }
        }
    }
}

pub fn device(address: &str) -> DeviceDescriptor {
    DeviceDescriptor {
        address: address.to_string(),
        port: 50051,
        username: "admin".to_string(),
        password: "secret".to_string(),
        sample_interval_secs: 10,
        labels: HashMap::new(),
    }
}

/// JSON interface-state value.
pub fn json_state(name: &str, admin: &str, oper: &str) -> String {
    format!(r#"{{"name":"{name}","admin-status":"{admin}","oper-status":"{oper}"}}"#)
}

/// Data notification carrying one JSON value per body.
pub fn notification(bodies: &[&str]) -> Recv {
    Recv::Response(SubscribeResponse {
        response: Some(subscribe_response::Response::Update(Notification {
            update: bodies
                .iter()
                .map(|body| Update {
                    val: Some(TypedValue {
                        value: Some(typed_value::Value::JsonVal(body.as_bytes().to_vec())),
                    }),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        })),
    })
}

pub fn sync_complete() -> Recv {
    Recv::Response(SubscribeResponse {
        response: Some(subscribe_response::Response::SyncResponse(true)),
    })
}
