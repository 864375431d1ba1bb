// Copyright (c) The testfx Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The server-mode test host.
//!
//! [`ServerTestHost`] reads requests from a [`MessageHandler`] and serves them. Discovery and run
//! requests execute concurrently, each on its own task with its own cancellation token and its own
//! [`PerRequestStateAggregator`]. The host's token is a child of the application-lifetime token,
//! and every request token is a child of the host's, so a shutdown signal cancels everything in
//! flight.

use crate::{
    adapter::{ExecutionAdapter, ExecutionRequest, RequestKind, completion_notifier},
    bus::message_bus,
    config::ServerConfig,
    errors::{DisplayErrorChain, TransportError},
    helpers::lock,
    node::LocationReporting,
    server::{ClientCompatibility, MessageHandler, PerRequestStateAggregator},
    telemetry::{TelemetryLogger, TelemetryValue},
    test_filter::TestExecutionFilter,
    time::stopwatch,
};
use serde::de::DeserializeOwned;
use std::{
    collections::HashMap,
    fmt,
    ops::ControlFlow,
    sync::{Arc, Mutex},
};
use testfx_metadata::{
    ErrorCodes, NotificationMessage, RequestId, RequestMessage, RpcMessage, methods,
    protocol::{
        CancelRequestArgs, DiscoverResponseArgs, InitializeRequestArgs, InitializeResponseArgs,
        LogEventArgs, LogLevel, PeerInfo, RunResponseArgs, ServerCapabilities,
        ServerTestingCapabilities, TestRequestArgs, to_params,
    },
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    task::JoinSet,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// The name the host reports in `initialize` responses.
pub const SERVER_NAME: &str = "testfx";

type InFlight = Arc<Mutex<HashMap<RequestId, CancellationToken>>>;

/// Serves server-mode requests over a single connection.
pub struct ServerTestHost<T> {
    handler: Arc<MessageHandler<T>>,
    adapter: Arc<ExecutionAdapter>,
    config: ServerConfig,
    telemetry: TelemetryLogger,
    host_token: CancellationToken,
}

impl<T> fmt::Debug for ServerTestHost<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerTestHost")
            .field("source", &self.adapter.source_name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// Per-connection state owned by the read loop.
struct Session {
    compat: Option<ClientCompatibility>,
    in_flight: InFlight,
    tasks: JoinSet<()>,
}

impl Session {
    fn new() -> Self {
        Self {
            compat: None,
            in_flight: Arc::default(),
            tasks: JoinSet::new(),
        }
    }

    /// Removes request tasks that have finished, without waiting for the others.
    fn reap_finished(&mut self) {
        while let Some(joined) = self.tasks.try_join_next() {
            if let Err(error) = joined {
                warn!(%error, "request task failed");
            }
        }
    }
}

impl<T> ServerTestHost<T>
where
    T: AsyncRead + AsyncWrite + fmt::Debug + Send + Unpin + 'static,
{
    /// Creates a new host. Cancelling `app_token` shuts the host down.
    pub fn new(
        handler: Arc<MessageHandler<T>>,
        adapter: Arc<ExecutionAdapter>,
        config: ServerConfig,
        app_token: &CancellationToken,
    ) -> Self {
        Self {
            handler,
            adapter,
            config,
            telemetry: TelemetryLogger::disabled(),
            host_token: app_token.child_token(),
        }
    }

    /// Sends telemetry events to `telemetry`.
    pub fn with_telemetry(mut self, telemetry: TelemetryLogger) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Serves requests until the client sends `exit`, closes the connection, or the application
    /// is shut down.
    ///
    /// On return, every in-flight request has been cancelled and has sent its response.
    pub async fn run(self) -> Result<(), TransportError> {
        let mut session = Session::new();

        let result = loop {
            session.reap_finished();
            let message = tokio::select! {
                message = self.handler.read() => message,
                () = self.host_token.cancelled() => {
                    debug!("host cancelled, shutting down");
                    break Ok(());
                }
            };

            match message {
                Ok(Some(message)) => match self.handle(message, &mut session).await {
                    Ok(ControlFlow::Continue(())) => {}
                    Ok(ControlFlow::Break(())) => break Ok(()),
                    Err(error) => break Err(error),
                },
                Ok(None) => {
                    debug!("client closed the connection");
                    break Ok(());
                }
                Err(error) if error.is_recoverable() => {
                    warn!(error = %DisplayErrorChain::new(&error), "ignoring malformed message");
                    let reply = RpcMessage::error(None, ErrorCodes::PARSE_ERROR, error.to_string());
                    if let Err(error) = self.handler.write(&reply).await {
                        break Err(error);
                    }
                }
                Err(error) => break Err(error),
            }
        };

        self.host_token.cancel();
        let pending = session.tasks.len();
        if pending > 0 {
            debug!(pending, "waiting for in-flight requests to finish");
        }
        while let Some(joined) = session.tasks.join_next().await {
            if let Err(error) = joined {
                warn!(%error, "request task failed");
            }
        }

        result
    }

    async fn handle(
        &self,
        message: RpcMessage,
        session: &mut Session,
    ) -> Result<ControlFlow<()>, TransportError> {
        match message {
            RpcMessage::Request(request) => {
                self.handle_request(request, session).await?;
                Ok(ControlFlow::Continue(()))
            }
            RpcMessage::Notification(notification) => {
                Ok(self.handle_notification(notification, session))
            }
            RpcMessage::Response(_) | RpcMessage::Error(_) => {
                trace!("ignoring reply from client");
                Ok(ControlFlow::Continue(()))
            }
        }
    }

    async fn handle_request(
        &self,
        request: RequestMessage,
        session: &mut Session,
    ) -> Result<(), TransportError> {
        let RequestMessage { id, method, params } = request;
        debug!(%id, %method, "received request");

        if method == methods::INITIALIZE {
            return self.initialize(id, params, session).await;
        }

        let kind = match method.as_str() {
            methods::DISCOVER_TESTS => RequestKind::Discover,
            methods::RUN_TESTS => RequestKind::Run,
            _ => {
                return self
                    .reply_error(
                        id,
                        ErrorCodes::METHOD_NOT_FOUND,
                        format!("unknown method `{method}`"),
                    )
                    .await;
            }
        };
        let Some(compat) = &session.compat else {
            return self
                .reply_error(
                    id,
                    ErrorCodes::SERVER_NOT_INITIALIZED,
                    format!("`{method}` received before `initialize`"),
                )
                .await;
        };

        let args: TestRequestArgs = match parse_params(params) {
            Ok(args) => args,
            Err(error) => {
                return self
                    .reply_error(id, ErrorCodes::INVALID_PARAMS, error.to_string())
                    .await;
            }
        };
        let filter = match TestExecutionFilter::from_request(
            args.tests.as_deref(),
            args.graph_filter.as_deref(),
        ) {
            Ok(filter) => filter,
            Err(error) => {
                return self
                    .reply_error(
                        id,
                        ErrorCodes::INVALID_PARAMS,
                        DisplayErrorChain::new(error).to_string(),
                    )
                    .await;
            }
        };

        let token = {
            let mut in_flight = lock(&session.in_flight);
            if in_flight.contains_key(&id) {
                None
            } else {
                let token = self.host_token.child_token();
                in_flight.insert(id.clone(), token.clone());
                Some(token)
            }
        };
        let Some(token) = token else {
            return self
                .reply_error(
                    id.clone(),
                    ErrorCodes::INVALID_REQUEST,
                    format!("request id `{id}` is already in flight"),
                )
                .await;
        };

        let task = RequestTask {
            id,
            request: ExecutionRequest {
                run_id: args.run_id,
                kind,
                filter,
            },
            token,
            handler: self.handler.clone(),
            adapter: self.adapter.clone(),
            config: self.config.clone(),
            reporting: compat.location_reporting(),
            telemetry: self.telemetry.clone(),
            in_flight: session.in_flight.clone(),
        };
        session.tasks.spawn(task.run());
        Ok(())
    }

    async fn initialize(
        &self,
        id: RequestId,
        params: Option<serde_json::Value>,
        session: &mut Session,
    ) -> Result<(), TransportError> {
        if session.compat.is_some() {
            return self
                .reply_error(
                    id,
                    ErrorCodes::INVALID_REQUEST,
                    "`initialize` was already received",
                )
                .await;
        }
        let args: InitializeRequestArgs = match parse_params(params) {
            Ok(args) => args,
            Err(error) => {
                return self
                    .reply_error(id, ErrorCodes::INVALID_PARAMS, error.to_string())
                    .await;
            }
        };

        info!(
            client = %args.client_info.name,
            version = %args.client_info.version,
            process_id = args.process_id,
            "client connected",
        );
        session.compat = Some(ClientCompatibility::evaluate(
            &self.config.compat,
            &args.client_info,
        ));
        self.telemetry.log_event(
            "testfx/server/initialize",
            [
                (
                    "client-name",
                    TelemetryValue::from(args.client_info.name.as_str()),
                ),
                (
                    "client-version",
                    TelemetryValue::from(args.client_info.version.as_str()),
                ),
                (
                    "debugger-provider",
                    TelemetryValue::from(args.capabilities.testing.debugger_provider),
                ),
            ],
        );

        let response = InitializeResponseArgs {
            process_id: std::process::id(),
            server_info: PeerInfo {
                name: SERVER_NAME.to_owned(),
                version: env!("CARGO_PKG_VERSION").to_owned(),
            },
            capabilities: ServerCapabilities {
                testing: ServerTestingCapabilities {
                    supports_discovery: true,
                    multi_request_support: true,
                    vstest_provider: false,
                    attachments_support: false,
                    multi_connection_provider: false,
                },
            },
        };
        self.handler
            .write(&RpcMessage::response(id, to_params(&response)))
            .await?;

        let log = LogEventArgs {
            level: LogLevel::Information,
            message: format!(
                "{SERVER_NAME} {} serving tests from `{}`",
                env!("CARGO_PKG_VERSION"),
                self.adapter.source_name(),
            ),
        };
        self.handler
            .write(&RpcMessage::notification(
                methods::CLIENT_LOG,
                to_params(&log),
            ))
            .await
    }

    fn handle_notification(
        &self,
        notification: NotificationMessage,
        session: &mut Session,
    ) -> ControlFlow<()> {
        match notification.method.as_str() {
            methods::CANCEL_REQUEST => {
                match parse_params::<CancelRequestArgs>(notification.params) {
                    Ok(args) => match lock(&session.in_flight).get(&args.id) {
                        Some(token) => {
                            debug!(id = %args.id, "cancelling request");
                            token.cancel();
                        }
                        None => debug!(id = %args.id, "cancel for unknown request, ignoring"),
                    },
                    Err(error) => warn!(%error, "ignoring invalid cancel request"),
                }
                ControlFlow::Continue(())
            }
            methods::EXIT => {
                debug!("client sent exit");
                ControlFlow::Break(())
            }
            other => {
                trace!(method = other, "ignoring unknown notification");
                ControlFlow::Continue(())
            }
        }
    }

    async fn reply_error(
        &self,
        id: RequestId,
        code: i32,
        message: impl Into<String>,
    ) -> Result<(), TransportError> {
        let message = message.into();
        debug!(%id, code, %message, "replying with error");
        self.handler
            .write(&RpcMessage::error(Some(id), code, message))
            .await
    }
}

fn parse_params<P: DeserializeOwned>(
    params: Option<serde_json::Value>,
) -> Result<P, serde_json::Error> {
    serde_json::from_value(params.unwrap_or(serde_json::Value::Null))
}

/// A discovery or run request being served.
struct RequestTask<T> {
    id: RequestId,
    request: ExecutionRequest,
    token: CancellationToken,
    handler: Arc<MessageHandler<T>>,
    adapter: Arc<ExecutionAdapter>,
    config: ServerConfig,
    reporting: LocationReporting,
    telemetry: TelemetryLogger,
    in_flight: InFlight,
}

impl<T> RequestTask<T>
where
    T: AsyncRead + AsyncWrite + fmt::Debug + Send + Unpin + 'static,
{
    async fn run(self) {
        let Self {
            id,
            request,
            token,
            handler,
            adapter,
            config,
            reporting,
            telemetry,
            in_flight,
        } = self;
        let run_id = request.run_id;
        let start = stopwatch();

        let (bus, receiver) = message_bus();
        let aggregator =
            PerRequestStateAggregator::new(run_id, handler.clone(), reporting, &config);
        let consumer = tokio::spawn({
            let aggregator = aggregator.clone();
            async move { aggregator.consume(receiver).await }
        });

        let (notifier, _) = completion_notifier();
        let result = adapter
            .execute_request(&request, &bus, notifier, token.clone())
            .await;

        // Every update has been published: wait for the consumer to drain them, then send the
        // final batch before the response.
        drop(bus);
        if let Err(error) = consumer.await {
            warn!(%run_id, %error, "update consumer failed");
        }
        let statistics = aggregator.complete().await;
        lock(&in_flight).remove(&id);

        let cancelled = token.is_cancelled();
        let response = match result {
            Ok(_) if cancelled => RpcMessage::error(
                Some(id),
                ErrorCodes::REQUEST_CANCELLED,
                format!("{} was cancelled", request.kind),
            ),
            Ok(_) => match request.kind {
                RequestKind::Discover => {
                    RpcMessage::response(id, to_params(&DiscoverResponseArgs::default()))
                }
                RequestKind::Run => {
                    RpcMessage::response(id, to_params(&RunResponseArgs::default()))
                }
            },
            Err(error) => {
                let message = DisplayErrorChain::new(error).to_string();
                warn!(%run_id, kind = %request.kind, %message, "request failed");
                RpcMessage::error(Some(id), ErrorCodes::INTERNAL_ERROR, message)
            }
        };
        if let Err(error) = handler.write(&response).await {
            warn!(
                %run_id,
                error = %DisplayErrorChain::new(error),
                "failed to send response",
            );
        }

        telemetry.log_event(
            "testfx/server/request",
            [
                ("kind", TelemetryValue::from(request.kind.to_string())),
                ("cancelled", TelemetryValue::from(cancelled)),
                ("discovered", TelemetryValue::from(statistics.discovered)),
                ("passed", TelemetryValue::from(statistics.passed)),
                ("failed", TelemetryValue::from(statistics.failed)),
                ("retries", TelemetryValue::from(statistics.total_retries())),
                ("duration", TelemetryValue::from(start.snapshot().duration)),
            ],
        );
    }
}
