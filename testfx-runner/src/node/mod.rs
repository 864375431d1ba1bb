// Copyright (c) The testfx Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The test node model.
//!
//! Tests form a tree of [`TestNode`]s. Groups only have children, actions have a body, and
//! parameterized nodes have a body plus a lazily enumerated source of [`TestArguments`]. Identity
//! (uid and display name) is fixed at construction, while the [`PropertyBag`] is updated as the
//! node goes through discovery and execution.

mod properties;
mod serialize;

pub use properties::*;
pub use serialize::*;

use debug_ignore::DebugIgnore;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::{backtrace::Backtrace, error, fmt, sync::Arc};
use testfx_metadata::NodeType;
use tokio_util::sync::CancellationToken;

/// The stable identifier of a test node.
///
/// Unique within a run, and stable across discovery and execution of the same logical test.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TestNodeUid(SmolStr);

impl TestNodeUid {
    /// Creates a new uid.
    pub fn new(uid: impl AsRef<str>) -> Self {
        Self(SmolStr::new(uid))
    }

    /// Returns the uid as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TestNodeUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TestNodeUid {
    fn from(uid: &str) -> Self {
        Self::new(uid)
    }
}

impl From<String> for TestNodeUid {
    fn from(uid: String) -> Self {
        Self(SmolStr::from(uid))
    }
}

/// The outcome of running a test body.
pub type TestResult = Result<(), TestFailure>;

/// The body of an action node.
pub type TestBody = Arc<dyn Fn(&TestContext) -> TestResult + Send + Sync>;

/// The body of a parameterized node, called once per argument set.
pub type ParameterizedBody = Arc<dyn Fn(&TestContext, &TestArguments) -> TestResult + Send + Sync>;

/// Produces the argument sets of a parameterized node. Called at most once per expansion.
pub type ArgumentsSource =
    Arc<dyn Fn() -> Box<dyn Iterator<Item = TestArguments> + Send> + Send + Sync>;

/// Context passed to test bodies.
#[derive(Clone, Debug)]
pub struct TestContext {
    uid: TestNodeUid,
    display_name: String,
    cancellation: CancellationToken,
}

impl TestContext {
    pub(crate) fn new(
        uid: TestNodeUid,
        display_name: String,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            uid,
            display_name,
            cancellation,
        }
    }

    /// The uid of the running test.
    pub fn uid(&self) -> &TestNodeUid {
        &self.uid
    }

    /// The display name of the running test.
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Returns true once the test should stop: the run was cancelled or the test timed out.
    ///
    /// Bodies run to completion unless they check this.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// One set of arguments for a parameterized node.
#[derive(Clone, Debug, PartialEq)]
pub struct TestArguments {
    values: Vec<serde_json::Value>,
    display_name: Option<String>,
}

impl TestArguments {
    /// Creates a new argument set.
    pub fn new(values: impl IntoIterator<Item = serde_json::Value>) -> Self {
        Self {
            values: values.into_iter().collect(),
            display_name: None,
        }
    }

    /// Overrides how this argument set is displayed.
    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    /// Returns the values, in order.
    pub fn values(&self) -> &[serde_json::Value] {
        &self.values
    }

    /// Returns the value at `index`, if any.
    pub fn get(&self, index: usize) -> Option<&serde_json::Value> {
        self.values.get(index)
    }
}

impl fmt::Display for TestArguments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(display_name) = &self.display_name {
            return f.write_str(display_name);
        }
        f.write_str("(")?;
        for (index, value) in self.values.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{value}")?;
        }
        f.write_str(")")
    }
}

/// Whether a failure is an assertion failure or an unexpected error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    /// An assertion didn't hold.
    Assertion,
    /// Anything else.
    Error,
}

/// Why a test body didn't pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestFailure {
    kind: FailureKind,
    message: String,
    stack_trace: Option<String>,
}

impl TestFailure {
    /// An assertion failure.
    pub fn assertion(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Assertion, message.into())
    }

    /// An unexpected error with the given message.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Error, message.into())
    }

    /// An unexpected error, with the message built from its chain of sources.
    pub fn from_error(err: &(dyn error::Error + 'static)) -> Self {
        let mut message = err.to_string();
        let mut source = err.source();
        while let Some(inner) = source {
            message.push_str(": ");
            message.push_str(&inner.to_string());
            source = inner.source();
        }
        Self::new(FailureKind::Error, message)
    }

    fn new(kind: FailureKind, message: String) -> Self {
        let backtrace = Backtrace::capture();
        let stack_trace = match backtrace.status() {
            std::backtrace::BacktraceStatus::Captured => Some(backtrace.to_string()),
            _ => None,
        };
        Self {
            kind,
            message,
            stack_trace,
        }
    }

    /// Replaces the stack trace.
    pub fn with_stack_trace(mut self, stack_trace: impl Into<String>) -> Self {
        self.stack_trace = Some(stack_trace.into());
        self
    }

    /// The kind of failure.
    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    /// The failure message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The stack trace, if one was captured.
    pub fn stack_trace(&self) -> Option<&str> {
        self.stack_trace.as_deref()
    }
}

/// A node of the test tree.
#[derive(Clone, Debug)]
pub struct TestNode {
    uid: TestNodeUid,
    display_name: String,
    /// The node's properties.
    pub properties: PropertyBag,
    kind: TestNodeKind,
}

/// What a [`TestNode`] does.
#[derive(Clone, Debug)]
pub enum TestNodeKind {
    /// Groups other nodes.
    Group {
        /// The children, in declaration order.
        tests: Arc<[TestNode]>,
    },

    /// An executable test.
    Action {
        /// The test body.
        body: DebugIgnore<TestBody>,
    },

    /// A test run once per argument set.
    Parameterized {
        /// Produces the argument sets.
        arguments: DebugIgnore<ArgumentsSource>,
        /// The test body.
        body: DebugIgnore<ParameterizedBody>,
    },
}

impl TestNode {
    /// Creates a group node.
    pub fn group(
        uid: impl Into<TestNodeUid>,
        display_name: impl Into<String>,
        tests: impl IntoIterator<Item = TestNode>,
    ) -> Self {
        Self::new(
            uid.into(),
            display_name.into(),
            TestNodeKind::Group {
                tests: tests.into_iter().collect(),
            },
        )
    }

    /// Creates an action node.
    pub fn action<F>(uid: impl Into<TestNodeUid>, display_name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&TestContext) -> TestResult + Send + Sync + 'static,
    {
        let body: TestBody = Arc::new(body);
        Self::new(
            uid.into(),
            display_name.into(),
            TestNodeKind::Action {
                body: DebugIgnore(body),
            },
        )
    }

    /// Creates a parameterized node.
    ///
    /// `arguments` is called once every time the node is expanded or executed.
    pub fn parameterized<A, I, F>(
        uid: impl Into<TestNodeUid>,
        display_name: impl Into<String>,
        arguments: A,
        body: F,
    ) -> Self
    where
        A: Fn() -> I + Send + Sync + 'static,
        I: IntoIterator<Item = TestArguments>,
        I::IntoIter: Send + 'static,
        F: Fn(&TestContext, &TestArguments) -> TestResult + Send + Sync + 'static,
    {
        let arguments: ArgumentsSource =
            Arc::new(move || -> Box<dyn Iterator<Item = TestArguments> + Send> {
                Box::new(arguments().into_iter())
            });
        let body: ParameterizedBody = Arc::new(body);
        Self::new(
            uid.into(),
            display_name.into(),
            TestNodeKind::Parameterized {
                arguments: DebugIgnore(arguments),
                body: DebugIgnore(body),
            },
        )
    }

    pub(crate) fn new(uid: TestNodeUid, display_name: String, kind: TestNodeKind) -> Self {
        Self {
            uid,
            display_name,
            properties: PropertyBag::new(),
            kind,
        }
    }

    /// Adds a property, returning the node.
    pub fn with_property(mut self, property: Property) -> Self {
        self.properties.add(property);
        self
    }

    /// The uid of this node.
    pub fn uid(&self) -> &TestNodeUid {
        &self.uid
    }

    /// The display name of this node.
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// What this node does.
    pub fn kind(&self) -> &TestNodeKind {
        &self.kind
    }

    /// The declared children of this node. Empty unless this is a group.
    pub fn children(&self) -> &[TestNode] {
        match &self.kind {
            TestNodeKind::Group { tests } => tests,
            TestNodeKind::Action { .. } | TestNodeKind::Parameterized { .. } => &[],
        }
    }

    /// Returns true if this node has a body.
    pub fn is_executable(&self) -> bool {
        !matches!(self.kind, TestNodeKind::Group { .. })
    }

    /// The wire type of this node.
    pub fn node_type(&self) -> NodeType {
        if self.is_executable() {
            NodeType::Action
        } else {
            NodeType::Group
        }
    }

    /// A copy of this node's identity and properties, without its body or children.
    pub fn snapshot(&self) -> TestNodeSnapshot {
        TestNodeSnapshot {
            uid: self.uid.clone(),
            display_name: self.display_name.clone(),
            node_type: self.node_type(),
            properties: self.properties.clone(),
        }
    }
}

/// A test node as published on the message bus: identity, type and properties.
#[derive(Clone, Debug, PartialEq)]
pub struct TestNodeSnapshot {
    /// The node's uid.
    pub uid: TestNodeUid,
    /// The node's display name.
    pub display_name: String,
    /// Whether the node is a group or an action.
    pub node_type: NodeType,
    /// The node's properties at the time of the snapshot.
    pub properties: PropertyBag,
}
