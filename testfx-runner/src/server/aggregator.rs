// Copyright (c) The testfx Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Batching of test node updates for a single request.
//!
//! Test bodies can publish updates far faster than a client wants to receive them. The
//! [`PerRequestStateAggregator`] buffers updates and sends them as one
//! `testing/testUpdates/tests` notification per window: the first update of an empty buffer
//! schedules a flush after the idle delay, and every update arriving before that flush joins the
//! same batch.
//!
//! Two locks are involved. The buffer lock is only held to push or swap out the buffer, so
//! producers never wait on the network. The flush lock serializes flushes, so at most one batch is
//! being sent for a run at any time.

use crate::{
    bus::{MessageBusReceiver, TestNodeUpdateMessage},
    config::ServerConfig,
    errors::{DisplayErrorChain, TransportError},
    helpers::lock,
    node::{LocationReporting, TestNodeState, TestNodeUid},
    server::MessageHandler,
};
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
    time::Duration,
};
use testfx_metadata::{
    RpcMessage, methods,
    protocol::{RunId, TestNodeUpdate, TestNodeUpdatesArgs, to_params},
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// The destination of batched test node updates.
pub trait TestUpdateSink: Send + Sync + 'static {
    /// Sends a batch of updates.
    fn send_test_updates(
        &self,
        updates: TestNodeUpdatesArgs,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}

impl<T> TestUpdateSink for MessageHandler<T>
where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    async fn send_test_updates(&self, updates: TestNodeUpdatesArgs) -> Result<(), TransportError> {
        self.write(&RpcMessage::notification(
            methods::TEST_UPDATES,
            to_params(&updates),
        ))
        .await
    }
}

/// Accumulates the updates of one request and sends them in batches.
#[derive(Debug)]
pub struct PerRequestStateAggregator<S> {
    inner: Arc<AggregatorInner<S>>,
}

impl<S> Clone for PerRequestStateAggregator<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

#[derive(Debug)]
struct AggregatorInner<S> {
    run_id: RunId,
    sink: Arc<S>,
    reporting: LocationReporting,
    idle_flush_delay: Duration,
    session_end_flush_timeout: Duration,
    buffer: Mutex<Vec<TestNodeUpdate>>,
    flush_lock: tokio::sync::Mutex<()>,
    statistics: Mutex<TestNodeStateStatistics>,
    session_end: CancellationToken,
}

impl<S: TestUpdateSink> PerRequestStateAggregator<S> {
    /// Creates a new aggregator for `run_id`, sending batches to `sink`.
    pub fn new(
        run_id: RunId,
        sink: Arc<S>,
        reporting: LocationReporting,
        config: &ServerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(AggregatorInner {
                run_id,
                sink,
                reporting,
                idle_flush_delay: config.idle_flush_delay,
                session_end_flush_timeout: config.session_end_flush_timeout,
                buffer: Mutex::new(Vec::new()),
                flush_lock: tokio::sync::Mutex::new(()),
                statistics: Mutex::new(TestNodeStateStatistics::default()),
                session_end: CancellationToken::new(),
            }),
        }
    }

    /// Feeds every update from `receiver` into the aggregator, until all publishers are gone.
    pub async fn consume(&self, mut receiver: MessageBusReceiver) {
        while let Some(message) = receiver.recv().await {
            self.on_update(message);
        }
    }

    /// Records an update and buffers it for the next batch.
    ///
    /// Must be called from within a tokio runtime.
    pub fn on_update(&self, message: TestNodeUpdateMessage) {
        lock(&self.inner.statistics).record(&message);

        let update = TestNodeUpdate {
            node: message.node.to_serialized(self.inner.reporting),
            parent: message.parent.map(|parent| parent.as_str().to_owned()),
        };
        let schedule = {
            let mut buffer = lock(&self.inner.buffer);
            let was_empty = buffer.is_empty();
            buffer.push(update);
            was_empty
        };

        if schedule && !self.inner.session_end.is_cancelled() {
            self.schedule_flush();
        }
    }

    fn schedule_flush(&self) {
        let this = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(this.inner.idle_flush_delay) => {}
                _ = this.inner.session_end.cancelled() => {}
            }
            if let Err(error) = this.flush().await {
                warn!(
                    run_id = %this.inner.run_id,
                    error = %DisplayErrorChain::new(error),
                    "failed to send test updates",
                );
            }
        });
    }

    /// Sends everything buffered so far as one batch. Does nothing if the buffer is empty.
    pub async fn flush(&self) -> Result<(), TransportError> {
        let _flush_guard = self.inner.flush_lock.lock().await;
        let changes = std::mem::take(&mut *lock(&self.inner.buffer));
        if changes.is_empty() {
            return Ok(());
        }

        trace!(run_id = %self.inner.run_id, count = changes.len(), "sending test updates");
        self.inner
            .sink
            .send_test_updates(TestNodeUpdatesArgs {
                run_id: self.inner.run_id,
                changes,
            })
            .await
    }

    /// Ends the session: forces a final flush, waiting at most for the configured timeout, and
    /// returns the statistics of the request.
    ///
    /// A failed or timed out final flush is logged and otherwise ignored.
    pub async fn complete(&self) -> TestNodeStateStatistics {
        self.inner.session_end.cancel();

        let timeout = self.inner.session_end_flush_timeout;
        match tokio::time::timeout(timeout, self.flush()).await {
            Ok(Ok(())) => {
                debug!(run_id = %self.inner.run_id, "final test updates sent");
            }
            Ok(Err(error)) => {
                warn!(
                    run_id = %self.inner.run_id,
                    error = %DisplayErrorChain::new(error),
                    "failed to send final test updates",
                );
            }
            Err(_) => {
                warn!(
                    run_id = %self.inner.run_id,
                    "timed out after {} sending final test updates",
                    humantime::format_duration(timeout),
                );
            }
        }

        self.statistics()
    }

    /// Returns the statistics recorded so far.
    pub fn statistics(&self) -> TestNodeStateStatistics {
        lock(&self.inner.statistics).clone()
    }
}

/// Running counts over the updates of one request.
///
/// Updated as each message is consumed, independently of when batches are sent.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TestNodeStateStatistics {
    /// Nodes reported as discovered.
    pub discovered: usize,
    /// Passed results.
    pub passed: usize,
    /// Failed, errored and timed out results.
    pub failed: usize,
    /// Skipped results.
    pub skipped: usize,
    /// Cancelled results.
    pub cancelled: usize,
    tests: BTreeMap<TestNodeUid, TestStatistics>,
}

/// Counters for a single test.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TestStatistics {
    /// Number of passed results.
    pub passed: usize,
    /// Number of failed results.
    pub failed: usize,
    /// Number of terminal results of any kind.
    pub terminal: usize,
    /// Terminal results after the first one.
    pub retries: usize,
}

impl TestNodeStateStatistics {
    /// Returns the counters for `uid`, if it reported a result.
    pub fn test(&self, uid: &TestNodeUid) -> Option<&TestStatistics> {
        self.tests.get(uid)
    }

    /// Total number of retries across all tests.
    pub fn total_retries(&self) -> usize {
        self.tests.values().map(|stats| stats.retries).sum()
    }

    fn record(&mut self, message: &TestNodeUpdateMessage) {
        let Some(state) = message.node.properties.state() else {
            return;
        };
        if !state.is_terminal() {
            if matches!(state, TestNodeState::Discovered) {
                self.discovered += 1;
            }
            return;
        }

        let stats = self.tests.entry(message.node.uid.clone()).or_default();
        if stats.terminal > 0 {
            stats.retries += 1;
        }
        stats.terminal += 1;
        match state {
            TestNodeState::Passed => {
                self.passed += 1;
                stats.passed += 1;
            }
            TestNodeState::Failed(_) | TestNodeState::Error(_) | TestNodeState::Timeout { .. } => {
                self.failed += 1;
                stats.failed += 1;
            }
            TestNodeState::Skipped { .. } => self.skipped += 1,
            TestNodeState::Cancelled => self.cancelled += 1,
            TestNodeState::Discovered | TestNodeState::InProgress => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{TestFailure, TestNode, TestNodeSnapshot};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use testfx_metadata::ExecutionState;
    use tokio::time::Instant;

    #[derive(Debug, Default)]
    struct MockSink {
        batches: Mutex<Vec<TestNodeUpdatesArgs>>,
        send_delay: Duration,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        fail: bool,
    }

    impl MockSink {
        fn batch_sizes(&self) -> Vec<usize> {
            lock(&self.batches)
                .iter()
                .map(|batch| batch.changes.len())
                .collect()
        }
    }

    impl TestUpdateSink for MockSink {
        async fn send_test_updates(
            &self,
            updates: TestNodeUpdatesArgs,
        ) -> Result<(), TransportError> {
            let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);
            tokio::time::sleep(self.send_delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail {
                return Err(TransportError::Write(std::io::Error::from(
                    std::io::ErrorKind::BrokenPipe,
                )));
            }
            lock(&self.batches).push(updates);
            Ok(())
        }
    }

    fn server_config() -> ServerConfig {
        ServerConfig {
            idle_flush_delay: Duration::from_millis(200),
            session_end_flush_timeout: Duration::from_secs(5),
            max_message_size: 1024,
            compat: Vec::new(),
        }
    }

    fn aggregator(sink: MockSink) -> (PerRequestStateAggregator<MockSink>, Arc<MockSink>) {
        let sink = Arc::new(sink);
        let aggregator = PerRequestStateAggregator::new(
            RunId::new_v4(),
            sink.clone(),
            LocationReporting::Modern,
            &server_config(),
        );
        (aggregator, sink)
    }

    fn update(uid: &str, state: TestNodeState) -> TestNodeUpdateMessage {
        let mut node: TestNodeSnapshot = TestNode::action(uid, uid, |_| Ok(())).snapshot();
        node.properties.set_state(state);
        TestNodeUpdateMessage {
            run_id: RunId::new_v4(),
            node,
            parent: Some(TestNodeUid::new("root")),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn no_updates_no_flush() {
        let (aggregator, sink) = aggregator(MockSink::default());
        tokio::time::sleep(Duration::from_secs(1)).await;
        let statistics = aggregator.complete().await;
        assert_eq!(statistics, TestNodeStateStatistics::default());
        assert_eq!(sink.batch_sizes(), Vec::<usize>::new());
    }

    #[tokio::test(start_paused = true)]
    async fn batches_updates_within_window() {
        let (aggregator, sink) = aggregator(MockSink::default());

        aggregator.on_update(update("a", TestNodeState::InProgress));
        aggregator.on_update(update("a", TestNodeState::Passed));
        tokio::time::sleep(Duration::from_millis(100)).await;
        aggregator.on_update(update("b", TestNodeState::Passed));
        assert_eq!(sink.batch_sizes(), Vec::<usize>::new(), "window still open");

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(sink.batch_sizes(), vec![3]);

        {
            let batches = lock(&sink.batches);
            let uids: Vec<_> = batches[0]
                .changes
                .iter()
                .map(|change| {
                    (
                        change.node.uid.as_str(),
                        change.node.execution_state,
                        change.parent.as_deref(),
                    )
                })
                .collect();
            assert_eq!(
                uids,
                vec![
                    ("a", Some(ExecutionState::InProgress), Some("root")),
                    ("a", Some(ExecutionState::Passed), Some("root")),
                    ("b", Some(ExecutionState::Passed), Some("root")),
                ],
                "insertion order within the window",
            );
        }

        aggregator.on_update(update("c", TestNodeState::Passed));
        aggregator.complete().await;
        assert_eq!(sink.batch_sizes(), vec![3, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn session_end_flushes_immediately() {
        let (aggregator, sink) = aggregator(MockSink::default());
        let start = Instant::now();

        aggregator.on_update(update("a", TestNodeState::Passed));
        aggregator.complete().await;

        assert_eq!(sink.batch_sizes(), vec![1]);
        assert!(start.elapsed() < Duration::from_millis(200));

        // Nothing is left for the idle timer to send.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(sink.batch_sizes(), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn at_most_one_flush_in_flight() {
        let (aggregator, sink) = aggregator(MockSink {
            send_delay: Duration::from_millis(500),
            ..Default::default()
        });

        aggregator.on_update(update("a", TestNodeState::Passed));
        // The first batch is now being sent and takes 500ms.
        tokio::time::sleep(Duration::from_millis(250)).await;
        aggregator.on_update(update("b", TestNodeState::Passed));
        aggregator.on_update(update("c", TestNodeState::Passed));
        // The second window closes while the first batch is still in flight.
        tokio::time::sleep(Duration::from_millis(250)).await;
        aggregator.on_update(update("d", TestNodeState::Passed));

        aggregator.complete().await;
        assert_eq!(sink.max_in_flight.load(Ordering::SeqCst), 1);
        let sizes = sink.batch_sizes();
        assert_eq!(sizes.iter().sum::<usize>(), 4);
        assert_eq!(sizes[0], 1);
    }

    #[tokio::test(start_paused = true)]
    async fn final_flush_failures_are_not_fatal() {
        let (aggregator, sink) = aggregator(MockSink {
            fail: true,
            ..Default::default()
        });
        aggregator.on_update(update("a", TestNodeState::Passed));
        let statistics = aggregator.complete().await;
        assert_eq!(statistics.passed, 1);
        assert_eq!(sink.batch_sizes(), Vec::<usize>::new());

        let (aggregator, _sink) = aggregator_with_slow_sink();
        let start = Instant::now();
        aggregator.on_update(update("a", TestNodeState::Passed));
        let statistics = aggregator.complete().await;
        assert_eq!(statistics.passed, 1);
        assert_eq!(start.elapsed(), Duration::from_secs(5), "bounded by the timeout");
    }

    fn aggregator_with_slow_sink() -> (PerRequestStateAggregator<MockSink>, Arc<MockSink>) {
        aggregator(MockSink {
            send_delay: Duration::from_secs(3600),
            ..Default::default()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn statistics() {
        let (aggregator, _sink) = aggregator(MockSink::default());
        let failure = TestFailure::assertion("nope");

        for message in [
            update("a", TestNodeState::Discovered),
            update("b", TestNodeState::Discovered),
            update("c", TestNodeState::Discovered),
            update("a", TestNodeState::InProgress),
            update("a", TestNodeState::Failed(failure.clone())),
            update("a", TestNodeState::Passed),
            update("b", TestNodeState::Timeout {
                timeout: Duration::from_secs(1),
            }),
            update("c", TestNodeState::Skipped { reason: None }),
            update("d", TestNodeState::Cancelled),
            update("d", TestNodeState::Passed),
        ] {
            aggregator.on_update(message);
        }

        // Statistics are current before anything is sent.
        let statistics = aggregator.statistics();
        assert_eq!(statistics.discovered, 3);
        assert_eq!(statistics.passed, 2);
        assert_eq!(statistics.failed, 2);
        assert_eq!(statistics.skipped, 1);
        assert_eq!(statistics.cancelled, 1);
        assert_eq!(statistics.total_retries(), 2);
        assert_eq!(
            statistics.test(&TestNodeUid::new("a")),
            Some(&TestStatistics {
                passed: 1,
                failed: 1,
                terminal: 2,
                retries: 1,
            })
        );
        // A result that is neither a pass nor a failure still counts toward retries.
        assert_eq!(
            statistics.test(&TestNodeUid::new("d")),
            Some(&TestStatistics {
                passed: 1,
                failed: 0,
                terminal: 2,
                retries: 1,
            })
        );
        assert_eq!(statistics.test(&TestNodeUid::new("e")), None);
    }
}
