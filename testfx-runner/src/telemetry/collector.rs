// Copyright (c) The testfx Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{TelemetryClient, TelemetrySession, TelemetryValue};
use crate::{config::TelemetryConfig, errors::DisplayErrorChain, helpers::RateLimiter};
use sha2::{Digest, Sha256};
use std::{collections::BTreeMap, sync::Arc, time::Duration};
use testfx_metadata::protocol::TelemetryEventArgs;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Common properties attached to every event.
pub mod common_properties {
    /// The telemetry session id.
    pub const SESSION_ID: &str = "testfx.session-id";
    /// The testfx version.
    pub const VERSION: &str = "testfx.version";
    /// `"true"` when running in CI.
    pub const IS_CI: &str = "testfx.is-ci";
}

#[derive(Debug)]
struct TelemetryPayload {
    event_name: String,
    params: Vec<(String, TelemetryValue)>,
}

/// Queues events for the collector. Cheap to clone; never blocks.
#[derive(Clone, Debug, Default)]
pub struct TelemetryLogger {
    sender: Option<mpsc::UnboundedSender<TelemetryPayload>>,
}

impl TelemetryLogger {
    /// A logger that drops every event.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Returns true if events are collected.
    pub fn is_enabled(&self) -> bool {
        self.sender.as_ref().is_some_and(|sender| !sender.is_closed())
    }

    /// Queues an event. Events logged after shutdown are dropped.
    pub fn log_event<K, V>(
        &self,
        event_name: impl Into<String>,
        params: impl IntoIterator<Item = (K, V)>,
    ) where
        K: Into<String>,
        V: Into<TelemetryValue>,
    {
        let Some(sender) = &self.sender else {
            return;
        };
        let payload = TelemetryPayload {
            event_name: event_name.into(),
            params: params
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        };
        if let Err(error) = sender.send(payload) {
            trace!(event = %error.0.event_name, "telemetry collector is shut down, dropping event");
        }
    }
}

/// Owns the background task that enriches queued events and sends them.
#[derive(Debug)]
pub struct TelemetryCollector {
    logger: TelemetryLogger,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
    grace_period: Duration,
}

impl TelemetryCollector {
    /// Starts the collector. If telemetry is disabled, no task is started and every event is
    /// dropped.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        session: TelemetrySession,
        client: Arc<dyn TelemetryClient>,
        config: &TelemetryConfig,
    ) -> Self {
        let shutdown = CancellationToken::new();
        if !session.is_enabled(config) {
            debug!("telemetry is disabled");
            return Self {
                logger: TelemetryLogger::disabled(),
                shutdown,
                task: None,
                grace_period: config.shutdown_grace_period,
            };
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        let consumer = Consumer {
            session,
            client,
            send_failures: RateLimiter::new(config.failure_log_interval),
            invalid_events: RateLimiter::new(config.failure_log_interval),
        };
        let task = tokio::spawn(consumer.run(receiver, shutdown.clone()));

        Self {
            logger: TelemetryLogger {
                sender: Some(sender),
            },
            shutdown,
            task: Some(task),
            grace_period: config.shutdown_grace_period,
        }
    }

    /// Returns a logger queueing events to this collector.
    pub fn logger(&self) -> TelemetryLogger {
        self.logger.clone()
    }

    /// Stops accepting events and waits for queued ones to be sent, for at most the grace
    /// period. Events still queued after that are dropped.
    pub async fn shutdown(self) {
        let Some(mut task) = self.task else {
            return;
        };
        self.shutdown.cancel();

        match tokio::time::timeout(self.grace_period, &mut task).await {
            Ok(Ok(())) => debug!("telemetry collector shut down"),
            Ok(Err(error)) => warn!(%error, "telemetry collector task failed"),
            Err(_) => {
                task.abort();
                warn!(
                    "telemetry collector did not finish within {}, dropping pending events",
                    humantime::format_duration(self.grace_period),
                );
            }
        }
    }
}

#[derive(Debug)]
struct Consumer {
    session: TelemetrySession,
    client: Arc<dyn TelemetryClient>,
    send_failures: RateLimiter,
    invalid_events: RateLimiter,
}

impl Consumer {
    async fn run(
        mut self,
        mut receiver: mpsc::UnboundedReceiver<TelemetryPayload>,
        shutdown: CancellationToken,
    ) {
        let mut closed = false;
        loop {
            let payload = tokio::select! {
                payload = receiver.recv() => payload,
                _ = shutdown.cancelled(), if !closed => {
                    // Stop accepting new events; the queued ones are still drained.
                    receiver.close();
                    closed = true;
                    continue;
                }
            };
            let Some(payload) = payload else {
                break;
            };
            self.process(payload).await;
        }
    }

    async fn process(&mut self, payload: TelemetryPayload) {
        if !is_valid_event_name(&payload.event_name) {
            if let Some(suppressed) = self.invalid_events.check() {
                warn!(
                    event = %payload.event_name,
                    suppressed,
                    "dropping telemetry event with invalid name",
                );
            }
            return;
        }

        let event = self.enrich(payload);
        let event_name = event.event_name.clone();
        if let Err(error) = self.client.send(event).await
            && let Some(suppressed) = self.send_failures.check()
        {
            warn!(
                event = %event_name,
                suppressed,
                error = %DisplayErrorChain::new(error),
                "failed to send telemetry event",
            );
        }
    }

    fn enrich(&self, payload: TelemetryPayload) -> TelemetryEventArgs {
        let mut properties = BTreeMap::new();
        let mut metrics = BTreeMap::new();

        for (key, value) in payload.params {
            match value {
                TelemetryValue::String(value) => {
                    properties.insert(key, value);
                }
                TelemetryValue::Bool(value) => {
                    properties.insert(key, value.to_string());
                }
                TelemetryValue::Sensitive(value) => {
                    properties.insert(key, hex::encode(Sha256::digest(value.as_bytes())));
                }
                TelemetryValue::Int(value) => {
                    metrics.insert(key, value as f64);
                }
                TelemetryValue::Float(value) => {
                    metrics.insert(key, value);
                }
                TelemetryValue::Duration(value) => {
                    metrics.insert(key, value.as_secs_f64() * 1000.0);
                }
            }
        }

        properties.insert(
            common_properties::SESSION_ID.to_owned(),
            self.session.session_id().to_string(),
        );
        properties.insert(
            common_properties::VERSION.to_owned(),
            self.session.version().to_owned(),
        );
        properties.insert(
            common_properties::IS_CI.to_owned(),
            self.session.is_ci().to_string(),
        );

        TelemetryEventArgs {
            event_name: payload.event_name,
            properties,
            metrics,
        }
    }
}

fn is_valid_event_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| matches!(b, b'a'..=b'z' | b'0'..=b'9' | b'/' | b'_' | b'-' | b'.'))
}
