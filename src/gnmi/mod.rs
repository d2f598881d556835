//! gNMI transport over tonic: vendor token login, Subscribe stream, logout.

pub mod proto;

use std::time::Duration;

use anyhow::{bail, Context, Result};
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tonic::client::{Grpc, GrpcService};
use tonic::codec::{ProstCodec, Streaming};
use tonic::codegen::http::uri::PathAndQuery;
use tonic::codegen::{Body, Bytes, StdError};
use tonic::metadata::{Ascii, MetadataValue};
use tonic::transport::{Channel, Endpoint};
use tonic::{Response, Status};
use tracing::debug;

use crate::model::DeviceDescriptor;
use crate::session::{Session, TelemetryStream, Transport};
use proto::{LoginReply, LoginRequest, LogoutReply, LogoutRequest, SubscribeRequest, SubscribeResponse};

const LOGIN_PATH: &str = "/grpc_service.GrpcService/Login";
const LOGOUT_PATH: &str = "/grpc_service.GrpcService/Logout";
const SUBSCRIBE_PATH: &str = "/gnmi.gNMI/Subscribe";

/// Metadata key carrying the session token on every authenticated call.
pub const TOKEN_METADATA_KEY: &str = "token_id";

/// Default bound on connect plus login.
pub const DEFAULT_LOGIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Default bound on the logout call.
pub const DEFAULT_LOGOUT_TIMEOUT: Duration = Duration::from_secs(1);

/// Outbound requests buffered ahead of the device reading them.
const REQUEST_BUFFER: usize = 4;

/// Raw RPC client for the three calls this exporter makes.
#[derive(Clone)]
struct RpcClient<T> {
    inner: Grpc<T>,
}

impl<T> RpcClient<T>
where
    T: GrpcService<tonic::body::BoxBody>,
    T::Error: Into<StdError>,
    T::ResponseBody: Body<Data = Bytes> + Send + 'static,
    <T::ResponseBody as Body>::Error: Into<StdError> + Send,
{
    fn new(inner: T) -> Self {
        Self {
            inner: Grpc::new(inner),
        }
    }

    async fn ready(&mut self) -> Result<(), Status> {
        self.inner
            .ready()
            .await
            .map_err(|e| Status::unknown(format!("service was not ready: {}", e.into())))
    }

    async fn login(
        &mut self,
        request: tonic::Request<LoginRequest>,
    ) -> Result<Response<LoginReply>, Status> {
        self.ready().await?;
        self.inner
            .unary(
                request,
                PathAndQuery::from_static(LOGIN_PATH),
                ProstCodec::default(),
            )
            .await
    }

    async fn logout(
        &mut self,
        request: tonic::Request<LogoutRequest>,
    ) -> Result<Response<LogoutReply>, Status> {
        self.ready().await?;
        self.inner
            .unary(
                request,
                PathAndQuery::from_static(LOGOUT_PATH),
                ProstCodec::default(),
            )
            .await
    }

    async fn subscribe(
        &mut self,
        request: tonic::Request<ReceiverStream<SubscribeRequest>>,
    ) -> Result<Response<Streaming<SubscribeResponse>>, Status> {
        self.ready().await?;
        self.inner
            .streaming(
                request,
                PathAndQuery::from_static(SUBSCRIBE_PATH),
                ProstCodec::default(),
            )
            .await
    }
}

/// Opens token-authenticated gNMI sessions.
#[derive(Debug, Clone, Copy)]
pub struct GnmiTransport {
    login_timeout: Duration,
    logout_timeout: Duration,
}

impl Default for GnmiTransport {
    fn default() -> Self {
        Self::new(DEFAULT_LOGIN_TIMEOUT, DEFAULT_LOGOUT_TIMEOUT)
    }
}

impl GnmiTransport {
    pub fn new(login_timeout: Duration, logout_timeout: Duration) -> Self {
        Self {
            login_timeout,
            logout_timeout,
        }
    }

    async fn connect_and_login(&self, device: &DeviceDescriptor) -> Result<GnmiSession> {
        let uri = endpoint_uri(&device.address, device.port);
        let channel = Endpoint::from_shared(uri.clone())
            .with_context(|| format!("invalid endpoint {uri}"))?
            .connect_timeout(self.login_timeout)
            .connect()
            .await
            .with_context(|| format!("connecting to {uri}"))?;

        let mut client = RpcClient::new(channel);
        let reply = client
            .login(tonic::Request::new(LoginRequest {
                user_name: Some(device.username.clone()),
                password: Some(device.password.clone()),
            }))
            .await
            .context("login rejected")?
            .into_inner();

        let token = match reply.token_id {
            Some(token) if !token.is_empty() => token,
            _ => bail!("login reply carried no token"),
        };

        Ok(GnmiSession {
            client,
            token,
            address: device.address.clone(),
            logout_timeout: self.logout_timeout,
        })
    }
}

impl Transport for GnmiTransport {
    type Session = GnmiSession;

    async fn login(&self, device: &DeviceDescriptor) -> Result<GnmiSession> {
        tokio::time::timeout(self.login_timeout, self.connect_and_login(device))
            .await
            .with_context(|| format!("login timed out after {:?}", self.login_timeout))?
    }
}

/// Logged-in connection to one device.
pub struct GnmiSession {
    client: RpcClient<Channel>,
    token: String,
    address: String,
    logout_timeout: Duration,
}

impl GnmiSession {
    async fn logout(&mut self) -> Result<()> {
        let mut request = tonic::Request::new(LogoutRequest {
            token_id: Some(self.token.clone()),
        });
        attach_token(&mut request, &self.token)?;

        self.client
            .logout(request)
            .await
            .context("logout rejected")?;
        Ok(())
    }
}

impl Session for GnmiSession {
    type Stream = GnmiStream;

    async fn open_stream(&mut self, lifetime: Duration) -> Result<GnmiStream> {
        let (tx, rx) = mpsc::channel(REQUEST_BUFFER);

        let mut request = tonic::Request::new(ReceiverStream::new(rx));
        attach_token(&mut request, &self.token)?;
        request.set_timeout(lifetime);

        let mut client = self.client.clone();
        let call: BoxFuture<'static, Result<Streaming<SubscribeResponse>>> = Box::pin(async move {
            let response = client
                .subscribe(request)
                .await
                .context("subscribe rejected")?;
            Ok(response.into_inner())
        });

        Ok(GnmiStream::new(tx, call, Instant::now() + lifetime))
    }

    async fn close(mut self) {
        match tokio::time::timeout(self.logout_timeout, self.logout()).await {
            Ok(Ok(())) => debug!(device = %self.address, "logged out"),
            Ok(Err(e)) => debug!(device = %self.address, error = %format_args!("{e:#}"), "logout failed"),
            Err(_) => debug!(device = %self.address, "logout timed out"),
        }
        // Dropping the client tears the channel down.
    }
}

/// Bidirectional Subscribe stream.
///
/// The call is started lazily on the first receive so the subscribe request
/// is already queued when the device answers with response headers.
pub struct GnmiStream {
    requests: mpsc::Sender<SubscribeRequest>,
    pending: Option<BoxFuture<'static, Result<Streaming<SubscribeResponse>>>>,
    responses: Option<Streaming<SubscribeResponse>>,
    deadline: Instant,
}

impl GnmiStream {
    fn new(
        requests: mpsc::Sender<SubscribeRequest>,
        call: BoxFuture<'static, Result<Streaming<SubscribeResponse>>>,
        deadline: Instant,
    ) -> Self {
        Self {
            requests,
            pending: Some(call),
            responses: None,
            deadline,
        }
    }

    async fn next_message(&mut self) -> Result<Option<SubscribeResponse>> {
        if let Some(call) = self.pending.take() {
            self.responses = Some(call.await?);
        }
        let Some(responses) = self.responses.as_mut() else {
            bail!("subscribe stream already failed");
        };
        responses.message().await.context("receiving from stream")
    }
}

impl TelemetryStream for GnmiStream {
    async fn send(&mut self, request: SubscribeRequest) -> Result<()> {
        self.requests
            .send(request)
            .await
            .context("subscribe stream closed")
    }

    async fn recv(&mut self) -> Result<Option<SubscribeResponse>> {
        let deadline = self.deadline;
        tokio::time::timeout_at(deadline, self.next_message())
            .await
            .context("stream lifetime reached")?
    }
}

/// `http://host:port`, bracketing IPv6 literals.
pub fn endpoint_uri(address: &str, port: u16) -> String {
    if address.contains(':') && !address.starts_with('[') {
        format!("http://[{address}]:{port}")
    } else {
        format!("http://{address}:{port}")
    }
}

fn attach_token<T>(request: &mut tonic::Request<T>, token: &str) -> Result<()> {
    let value: MetadataValue<Ascii> = token
        .parse()
        .context("session token is not valid metadata")?;
    request.metadata_mut().insert(TOKEN_METADATA_KEY, value);
    Ok(())
}
