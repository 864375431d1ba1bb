// Copyright (c) The testfx Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The execution adapter: turns discovery and run requests into test node updates.
//!
//! For each request, the adapter asks its [`TestSource`] for a fresh tree, walks it with a
//! [`BfsTestNodeVisitor`] and publishes a [`TestNodeUpdateMessage`] on the [`MessageBus`] for
//! every reported node. During a run, every executed node gets exactly one terminal state, even
//! if it is cancelled before its body starts.

use crate::{
    bus::{MessageBus, TestNodeUpdateMessage},
    config::ExecutionConfig,
    errors::{ExecuteError, MessageBusClosed},
    expansion::TestArgumentsManager,
    helpers::lock,
    node::{
        ArgumentsSource, FailureKind, ParameterizedBody, Property, TestBody, TestContext,
        TestFailure, TestNode, TestNodeKind, TestNodeState, TestNodeUid, TestResult,
        TimingProperty,
    },
    panic::catch_body_panic,
    source::TestSource,
    test_filter::TestExecutionFilter,
    time::stopwatch,
    visitor::BfsTestNodeVisitor,
};
use std::{
    fmt,
    sync::{Arc, Mutex},
    time::Duration,
};
use testfx_metadata::protocol::RunId;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// What a request asks the adapter to do.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestKind {
    /// Report the tree without running anything.
    Discover,
    /// Run the executable nodes.
    Run,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Discover => f.write_str("discovery"),
            Self::Run => f.write_str("run"),
        }
    }
}

/// A discovery or run request.
#[derive(Clone, Debug)]
pub struct ExecutionRequest {
    /// Correlates the updates of this request.
    pub run_id: RunId,
    /// Discovery or run.
    pub kind: RequestKind,
    /// Which nodes to report.
    pub filter: TestExecutionFilter,
}

/// Counts of reported nodes by state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Nodes reported by a discovery.
    pub discovered: usize,
    /// Tests that passed.
    pub passed: usize,
    /// Tests with a failed assertion.
    pub failed: usize,
    /// Tests that returned an error or panicked.
    pub errored: usize,
    /// Tests that were ignored.
    pub skipped: usize,
    /// Tests that exceeded their timeout.
    pub timed_out: usize,
    /// Tests that were cancelled.
    pub cancelled: usize,
}

impl RunSummary {
    fn record(&mut self, state: &TestNodeState) {
        match state {
            TestNodeState::Discovered => self.discovered += 1,
            TestNodeState::InProgress => {}
            TestNodeState::Passed => self.passed += 1,
            TestNodeState::Failed(_) => self.failed += 1,
            TestNodeState::Error(_) => self.errored += 1,
            TestNodeState::Skipped { .. } => self.skipped += 1,
            TestNodeState::Timeout { .. } => self.timed_out += 1,
            TestNodeState::Cancelled => self.cancelled += 1,
        }
    }

    /// The number of tests that reached a terminal state.
    pub fn executed(&self) -> usize {
        self.passed + self.failed + self.errored + self.skipped + self.timed_out + self.cancelled
    }

    /// Returns true if no test failed, errored or timed out.
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.errored == 0 && self.timed_out == 0
    }
}

/// Creates a notifier that fires once a request has been fully processed.
pub fn completion_notifier() -> (CompletionNotifier, CompletionReceiver) {
    let (sender, receiver) = oneshot::channel();
    (CompletionNotifier { sender }, CompletionReceiver { receiver })
}

/// Signals that a request has been fully processed.
#[derive(Debug)]
pub struct CompletionNotifier {
    sender: oneshot::Sender<RunSummary>,
}

impl CompletionNotifier {
    fn notify(self, summary: RunSummary) {
        // The receiver may have gone away, which is fine.
        _ = self.sender.send(summary);
    }
}

/// Waits for a [`CompletionNotifier`] to fire.
#[derive(Debug)]
pub struct CompletionReceiver {
    receiver: oneshot::Receiver<RunSummary>,
}

impl CompletionReceiver {
    /// Waits for the request to complete. Returns `None` if it failed.
    pub async fn wait(self) -> Option<RunSummary> {
        self.receiver.await.ok()
    }
}

/// Executes requests against a test source.
#[derive(Clone, Debug)]
pub struct ExecutionAdapter {
    source: Arc<dyn TestSource>,
    manager: TestArgumentsManager,
    default_timeout: Option<Duration>,
}

impl ExecutionAdapter {
    /// Creates a new adapter.
    pub fn new(source: Arc<dyn TestSource>, config: &ExecutionConfig) -> Self {
        Self {
            source,
            manager: TestArgumentsManager::new(),
            default_timeout: config.test_timeout,
        }
    }

    /// The name of the underlying test source.
    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    /// Executes `request`, publishing updates to `bus`.
    ///
    /// `notifier` fires with the summary once every update has been published. Cancelling
    /// `cancel` stops the request: nodes that haven't started are reported as cancelled.
    pub async fn execute_request(
        &self,
        request: &ExecutionRequest,
        bus: &MessageBus,
        notifier: CompletionNotifier,
        cancel: CancellationToken,
    ) -> Result<RunSummary, ExecuteError> {
        let roots = self.source.discover()?;
        debug!(
            run_id = %request.run_id,
            kind = %request.kind,
            filter = %request.filter,
            source = self.source.name(),
            "executing request",
        );

        let summary = Mutex::new(RunSummary::default());
        let visitor = BfsTestNodeVisitor::new(&roots, &request.filter, &self.manager);
        let run_id = request.run_id;

        match request.kind {
            RequestKind::Discover => {
                visitor
                    .visit(|mut node, parent| {
                        node.properties.set_state(TestNodeState::Discovered);
                        lock(&summary).record(&TestNodeState::Discovered);
                        let res = publish(bus, run_id, &node, parent);
                        async move { res }
                    })
                    .await?;
            }
            RequestKind::Run => {
                visitor
                    .visit(|node, parent| {
                        let summary = &summary;
                        let cancel = &cancel;
                        async move {
                            if let Some(state) =
                                self.run_node(run_id, node, parent, bus, cancel).await?
                            {
                                lock(summary).record(&state);
                            }
                            Ok::<_, MessageBusClosed>(())
                        }
                    })
                    .await?;
            }
        }

        let summary = *lock(&summary);
        info!(
            run_id = %run_id,
            kind = %request.kind,
            discovered = summary.discovered,
            passed = summary.passed,
            failed = summary.failed,
            errored = summary.errored,
            skipped = summary.skipped,
            timed_out = summary.timed_out,
            cancelled = summary.cancelled,
            "request complete",
        );
        notifier.notify(summary);
        Ok(summary)
    }

    /// Runs a single node, returning its terminal state. Returns `None` for nodes that aren't run
    /// themselves: groups, and parameterized nodes whose expansions carry the executions.
    async fn run_node(
        &self,
        run_id: RunId,
        mut node: TestNode,
        parent: Option<TestNodeUid>,
        bus: &MessageBus,
        cancel: &CancellationToken,
    ) -> Result<Option<TestNodeState>, MessageBusClosed> {
        let Some(invocation) = Invocation::new(node.kind()) else {
            return Ok(None);
        };
        if self.manager.expands(&node) {
            return Ok(None);
        }

        let state = if cancel.is_cancelled() {
            TestNodeState::Cancelled
        } else if let Some(reason) = node.properties.ignored() {
            TestNodeState::Skipped {
                reason: reason.map(ToOwned::to_owned),
            }
        } else {
            node.properties.set_state(TestNodeState::InProgress);
            publish(bus, run_id, &node, parent.clone())?;

            let timeout = node.properties.timeout().or(self.default_timeout);
            let (state, timing) = self.invoke(&node, invocation, timeout, cancel).await;
            node.properties.add(Property::Timing(timing));
            state
        };

        debug!(run_id = %run_id, uid = %node.uid(), state = %state.execution_state(), "test finished");
        node.properties.set_state(state.clone());
        publish(bus, run_id, &node, parent)?;
        Ok(Some(state))
    }

    async fn invoke(
        &self,
        node: &TestNode,
        invocation: Invocation,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> (TestNodeState, TimingProperty) {
        // Bodies observe both run cancellation and timeouts through this token.
        let body_token = cancel.child_token();
        let ctx = TestContext::new(
            node.uid().clone(),
            node.display_name().to_owned(),
            body_token.clone(),
        );

        let start = stopwatch();
        let handle = tokio::task::spawn_blocking(move || {
            catch_body_panic(|| invocation.run(&ctx)).and_then(|result| result)
        });
        let timeout_fut = async {
            match timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending().await,
            }
        };

        let state = tokio::select! {
            biased;

            () = cancel.cancelled() => TestNodeState::Cancelled,
            res = handle => match res {
                Ok(Ok(())) => TestNodeState::Passed,
                Ok(Err(failure)) => match failure.kind() {
                    FailureKind::Assertion => TestNodeState::Failed(failure),
                    FailureKind::Error => TestNodeState::Error(failure),
                },
                Err(join_error) => TestNodeState::Error(TestFailure::error(join_error.to_string())),
            },
            () = timeout_fut => {
                // The body keeps running on its blocking thread until it notices.
                body_token.cancel();
                TestNodeState::Timeout {
                    timeout: timeout.unwrap_or_default(),
                }
            }
        };

        let snapshot = start.snapshot();
        let timing = TimingProperty {
            start_time: snapshot.start_time,
            end_time: snapshot.end_time(),
            duration: snapshot.duration,
        };
        (state, timing)
    }
}

/// What running a node means.
enum Invocation {
    Single(TestBody),
    // A parameterized node that isn't expanded: every argument set runs inside one test.
    Each {
        arguments: ArgumentsSource,
        body: ParameterizedBody,
    },
}

impl Invocation {
    fn new(kind: &TestNodeKind) -> Option<Self> {
        match kind {
            TestNodeKind::Group { .. } => None,
            TestNodeKind::Action { body } => Some(Self::Single(body.0.clone())),
            TestNodeKind::Parameterized { arguments, body } => Some(Self::Each {
                arguments: arguments.0.clone(),
                body: body.0.clone(),
            }),
        }
    }

    fn run(&self, ctx: &TestContext) -> TestResult {
        match self {
            Self::Single(body) => body(ctx),
            Self::Each { arguments, body } => {
                for args in arguments() {
                    if ctx.is_cancelled() {
                        break;
                    }
                    body(ctx, &args)?;
                }
                Ok(())
            }
        }
    }
}

fn publish(
    bus: &MessageBus,
    run_id: RunId,
    node: &TestNode,
    parent: Option<TestNodeUid>,
) -> Result<(), MessageBusClosed> {
    bus.publish(TestNodeUpdateMessage {
        run_id,
        node: node.snapshot(),
        parent,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bus::{MessageBusReceiver, message_bus},
        source::StaticTestSource,
    };
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::time::Instant;
    use testfx_metadata::ExecutionState;

    fn sample_tree() -> Vec<TestNode> {
        vec![TestNode::group(
            "A",
            "A",
            [
                TestNode::action("pass", "pass", |_| Ok(())),
                TestNode::action("fail", "fail", |_| {
                    Err(TestFailure::assertion("expected 1, got 2"))
                }),
                TestNode::action("error", "error", |_| {
                    Err(TestFailure::from_error(&std::io::Error::other("disk full")))
                }),
                TestNode::action("panic", "panic", |_| panic!("oh no")),
                TestNode::action("ignored", "ignored", |_| Ok(())).with_property(
                    Property::Ignore {
                        reason: Some("flaky".to_owned()),
                    },
                ),
                TestNode::parameterized(
                    "param",
                    "param",
                    || (0..2).map(|i| crate::node::TestArguments::new([json!(i)])),
                    |_, args| {
                        if args.get(0) == Some(&json!(1)) {
                            Err(TestFailure::assertion("one"))
                        } else {
                            Ok(())
                        }
                    },
                ),
            ],
        )]
    }

    fn adapter(roots: Vec<TestNode>, test_timeout: Option<Duration>) -> ExecutionAdapter {
        ExecutionAdapter::new(
            Arc::new(StaticTestSource::new("sample", roots)),
            &ExecutionConfig { test_timeout },
        )
    }

    fn request(kind: RequestKind) -> ExecutionRequest {
        ExecutionRequest {
            run_id: RunId::new_v4(),
            kind,
            filter: TestExecutionFilter::Nop,
        }
    }

    async fn drain(mut receiver: MessageBusReceiver) -> Vec<(String, ExecutionState)> {
        let mut updates = Vec::new();
        while let Some(message) = receiver.recv().await {
            let state = message
                .node
                .properties
                .state()
                .expect("every update has a state")
                .execution_state();
            updates.push((message.node.uid.to_string(), state));
        }
        updates
    }

    fn terminal(updates: &[(String, ExecutionState)]) -> Vec<(&str, ExecutionState)> {
        updates
            .iter()
            .filter(|(_, state)| *state != ExecutionState::InProgress)
            .map(|(uid, state)| (uid.as_str(), *state))
            .collect()
    }

    #[tokio::test]
    async fn discovery_reports_every_node() {
        let adapter = adapter(sample_tree(), None);
        let (bus, receiver) = message_bus();
        let (notifier, completion) = completion_notifier();

        let summary = adapter
            .execute_request(
                &request(RequestKind::Discover),
                &bus,
                notifier,
                CancellationToken::new(),
            )
            .await
            .unwrap();
        drop(bus);

        let updates = drain(receiver).await;
        assert_eq!(updates.len(), 9, "group, 6 children and 2 expansions");
        assert!(
            updates
                .iter()
                .all(|(_, state)| *state == ExecutionState::Discovered)
        );
        assert_eq!(summary.discovered, 9);
        assert_eq!(completion.wait().await, Some(summary));
    }

    #[tokio::test]
    async fn run_reports_one_terminal_state_per_test() {
        let adapter = adapter(sample_tree(), None);
        let (bus, receiver) = message_bus();
        let (notifier, _completion) = completion_notifier();

        let summary = adapter
            .execute_request(
                &request(RequestKind::Run),
                &bus,
                notifier,
                CancellationToken::new(),
            )
            .await
            .unwrap();
        drop(bus);

        let updates = drain(receiver).await;
        assert_eq!(
            terminal(&updates),
            [
                ("pass", ExecutionState::Passed),
                ("fail", ExecutionState::Failed),
                ("error", ExecutionState::Error),
                ("panic", ExecutionState::Error),
                ("ignored", ExecutionState::Skipped),
                ("param [0]", ExecutionState::Passed),
                ("param [1]", ExecutionState::Failed),
            ]
        );
        let in_progress = updates
            .iter()
            .filter(|(_, state)| *state == ExecutionState::InProgress)
            .count();
        assert_eq!(in_progress, 6, "every test except the ignored one started");

        assert_eq!(
            summary,
            RunSummary {
                discovered: 0,
                passed: 2,
                failed: 2,
                errored: 2,
                skipped: 1,
                timed_out: 0,
                cancelled: 0,
            }
        );
        assert_eq!(summary.executed(), 7);
        assert!(!summary.is_success());
    }

    #[inline(never)]
    fn exploding_body(_: &TestContext) -> TestResult {
        panic!("oh no")
    }

    #[tokio::test]
    async fn failure_details_are_attached() {
        let roots = vec![TestNode::action("panic", "panic", exploding_body)];
        let adapter = adapter(roots, None);
        let (bus, mut receiver) = message_bus();
        let (notifier, _completion) = completion_notifier();
        adapter
            .execute_request(
                &request(RequestKind::Run),
                &bus,
                notifier,
                CancellationToken::new(),
            )
            .await
            .unwrap();

        let in_progress = receiver.recv().await.unwrap();
        assert_eq!(in_progress.node.properties.timing(), None);

        let done = receiver.recv().await.unwrap();
        let Some(TestNodeState::Error(failure)) = done.node.properties.state() else {
            panic!("panicking test is an error: {:?}", done.node.properties.state());
        };
        assert_eq!(failure.message(), "test panicked: oh no");
        let stack_trace = failure.stack_trace().expect("panics carry a backtrace");
        assert!(
            stack_trace.contains("exploding_body"),
            "panicking body in:\n{stack_trace}"
        );
        assert!(done.node.properties.timing().is_some());
    }

    #[tokio::test]
    async fn opaque_parameterized_runs_every_argument_set() {
        let roots = vec![
            TestNode::parameterized(
                "param",
                "param",
                || (0..3).map(|i| crate::node::TestArguments::new([json!(i)])),
                |_, args| {
                    if args.get(0) == Some(&json!(2)) {
                        Err(TestFailure::assertion("two"))
                    } else {
                        Ok(())
                    }
                },
            )
            .with_property(Property::PreventArgumentExpansion),
        ];
        let adapter = adapter(roots, None);
        let (bus, receiver) = message_bus();
        let (notifier, _completion) = completion_notifier();
        adapter
            .execute_request(
                &request(RequestKind::Run),
                &bus,
                notifier,
                CancellationToken::new(),
            )
            .await
            .unwrap();
        drop(bus);

        let updates = drain(receiver).await;
        assert_eq!(terminal(&updates), [("param", ExecutionState::Failed)]);
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let adapter = adapter(sample_tree(), None);
        let (bus, receiver) = message_bus();
        let (notifier, _completion) = completion_notifier();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = adapter
            .execute_request(&request(RequestKind::Run), &bus, notifier, cancel)
            .await
            .unwrap();
        drop(bus);

        let updates = drain(receiver).await;
        assert_eq!(updates.len(), 7, "one terminal update per test, nothing started");
        assert!(
            updates
                .iter()
                .all(|(_, state)| *state == ExecutionState::Cancelled)
        );
        assert_eq!(summary.cancelled, 7);
    }

    #[tokio::test]
    async fn cancelled_while_running() {
        let roots = vec![TestNode::action("waits", "waits", |ctx| {
            let deadline = Instant::now() + Duration::from_secs(10);
            while !ctx.is_cancelled() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(5));
            }
            Ok(())
        })];
        let adapter = adapter(roots, None);
        let (bus, receiver) = message_bus();
        let (notifier, _completion) = completion_notifier();
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        adapter
            .execute_request(&request(RequestKind::Run), &bus, notifier, cancel)
            .await
            .unwrap();
        drop(bus);

        let updates = drain(receiver).await;
        assert_eq!(
            updates,
            [
                ("waits".to_owned(), ExecutionState::InProgress),
                ("waits".to_owned(), ExecutionState::Cancelled),
            ]
        );
    }

    #[tokio::test]
    async fn timeouts() {
        let waits = |uid: &str| {
            TestNode::action(uid, uid, |ctx| {
                let deadline = Instant::now() + Duration::from_secs(10);
                while !ctx.is_cancelled() && Instant::now() < deadline {
                    std::thread::sleep(Duration::from_millis(5));
                }
                Ok(())
            })
        };
        let roots = vec![
            waits("default"),
            waits("own").with_property(Property::Timeout(Duration::from_millis(20))),
        ];
        let adapter = adapter(roots, Some(Duration::from_millis(50)));
        let (bus, receiver) = message_bus();
        let (notifier, _completion) = completion_notifier();

        let summary = adapter
            .execute_request(
                &request(RequestKind::Run),
                &bus,
                notifier,
                CancellationToken::new(),
            )
            .await
            .unwrap();
        drop(bus);

        assert_eq!(summary.timed_out, 2);
        let updates = drain(receiver).await;
        assert_eq!(
            terminal(&updates),
            [
                ("default", ExecutionState::TimedOut),
                ("own", ExecutionState::TimedOut),
            ]
        );
    }

    #[tokio::test]
    async fn closed_bus_stops_request() {
        let adapter = adapter(sample_tree(), None);
        let (bus, receiver) = message_bus();
        drop(receiver);
        let (notifier, completion) = completion_notifier();

        let err = adapter
            .execute_request(
                &request(RequestKind::Discover),
                &bus,
                notifier,
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ExecuteError::MessageBusClosed(_)));
        assert_eq!(completion.wait().await, None);
    }
}
