// Copyright (c) The testfx Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{errors::TelemetrySendError, server::MessageHandler};
use futures::{FutureExt, future::BoxFuture};
use std::sync::Arc;
use testfx_metadata::{
    RpcMessage, methods,
    protocol::{TelemetryEventArgs, to_params},
};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

/// Forwards enriched telemetry events somewhere.
pub trait TelemetryClient: std::fmt::Debug + Send + Sync {
    /// Sends an event.
    fn send(&self, event: TelemetryEventArgs) -> BoxFuture<'_, Result<(), TelemetrySendError>>;
}

/// Writes events to the debug log.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingTelemetryClient;

impl TelemetryClient for TracingTelemetryClient {
    fn send(&self, event: TelemetryEventArgs) -> BoxFuture<'_, Result<(), TelemetrySendError>> {
        debug!(
            target: "testfx_runner::telemetry",
            event = %event.event_name,
            properties = ?event.properties,
            metrics = ?event.metrics,
            "telemetry event",
        );
        futures::future::ready(Ok(())).boxed()
    }
}

/// Drops every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopTelemetryClient;

impl TelemetryClient for NoopTelemetryClient {
    fn send(&self, _event: TelemetryEventArgs) -> BoxFuture<'_, Result<(), TelemetrySendError>> {
        futures::future::ready(Ok(())).boxed()
    }
}

/// Sends events to the connected client as `telemetry/update` notifications.
#[derive(Debug)]
pub struct RemoteTelemetryClient<T> {
    handler: Arc<MessageHandler<T>>,
}

impl<T> RemoteTelemetryClient<T> {
    /// Creates a new client writing to `handler`.
    pub fn new(handler: Arc<MessageHandler<T>>) -> Self {
        Self { handler }
    }
}

impl<T> TelemetryClient for RemoteTelemetryClient<T>
where
    T: AsyncRead + AsyncWrite + std::fmt::Debug + Send + Unpin + 'static,
{
    fn send(&self, event: TelemetryEventArgs) -> BoxFuture<'_, Result<(), TelemetrySendError>> {
        async move {
            let message = RpcMessage::notification(methods::TELEMETRY_UPDATE, to_params(&event));
            self.handler
                .write(&message)
                .await
                .map_err(|error| TelemetrySendError::new(event.event_name, error))
        }
        .boxed()
    }
}
