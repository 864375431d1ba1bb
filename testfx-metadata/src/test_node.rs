// Copyright (c) The testfx Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::UnknownExecutionStateError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{fmt, str::FromStr};

/// Well-known property keys of a [`SerializedTestNode`].
pub mod keys {
    /// Start of execution, RFC 3339 in UTC.
    pub const TIME_START_UTC: &str = "time.start-utc";
    /// End of execution, RFC 3339 in UTC.
    pub const TIME_STOP_UTC: &str = "time.stop-utc";
    /// Execution duration in milliseconds.
    pub const TIME_DURATION_MS: &str = "time.duration-ms";
    /// Message of a failure, error, timeout or skip.
    pub const ERROR_MESSAGE: &str = "error.message";
    /// Stack trace of a failure or error.
    pub const ERROR_STACKTRACE: &str = "error.stacktrace";
    /// Source file the test is declared in.
    pub const LOCATION_FILE: &str = "location.file";
    /// Declaration line, only sent to legacy clients.
    pub const LOCATION_LINE: &str = "location.line";
    /// First line of the declaration.
    pub const LOCATION_LINE_START: &str = "location.line-start";
    /// Last line of the declaration.
    pub const LOCATION_LINE_END: &str = "location.line-end";
    /// Fully qualified type (module path) declaring the test.
    pub const LOCATION_TYPE: &str = "location.type";
    /// Name of the function implementing the test.
    pub const LOCATION_METHOD: &str = "location.method";
    /// Key/value metadata, serialized as an array of single-entry objects.
    pub const TRAITS: &str = "traits";
}

/// A test node as it travels over the wire.
///
/// Beyond the identity fields, every property is a flat, dotted key (see [`keys`]).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SerializedTestNode {
    /// The stable uid of the node.
    pub uid: String,

    /// The human readable name.
    #[serde(rename = "display-name")]
    pub display_name: String,

    /// Whether the node is a group or an executable test.
    #[serde(rename = "node-type", default, skip_serializing_if = "Option::is_none")]
    pub node_type: Option<NodeType>,

    /// The state the node is in, if any.
    #[serde(
        rename = "execution-state",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub execution_state: Option<ExecutionState>,

    /// Every other property.
    #[serde(flatten)]
    pub properties: Map<String, Value>,
}

impl SerializedTestNode {
    /// Creates a node with no type, state or properties. Mostly useful to name nodes in requests.
    pub fn new(uid: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            display_name: display_name.into(),
            node_type: None,
            execution_state: None,
            properties: Map::new(),
        }
    }
}

/// The type of a [`SerializedTestNode`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeType {
    /// A node grouping other nodes.
    Group,
    /// An executable test.
    Action,
}

/// The execution state of a [`SerializedTestNode`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionState {
    /// The node was discovered.
    Discovered,
    /// The node started executing.
    InProgress,
    /// The test passed.
    Passed,
    /// An assertion failed.
    Failed,
    /// The test raised an unexpected error.
    Error,
    /// The test was not executed.
    Skipped,
    /// The test exceeded its timeout.
    TimedOut,
    /// The test was cancelled before or while executing.
    Cancelled,
}

impl ExecutionState {
    /// Returns the string representations of all states.
    pub fn variants() -> &'static [&'static str] {
        &[
            "discovered",
            "in-progress",
            "passed",
            "failed",
            "error",
            "skipped",
            "timed-out",
            "cancelled",
        ]
    }

    /// Returns the wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::InProgress => "in-progress",
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Error => "error",
            Self::Skipped => "skipped",
            Self::TimedOut => "timed-out",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionState {
    type Err = UnknownExecutionStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let state = match s {
            "discovered" => Self::Discovered,
            "in-progress" => Self::InProgress,
            "passed" => Self::Passed,
            "failed" => Self::Failed,
            "error" => Self::Error,
            "skipped" => Self::Skipped,
            "timed-out" => Self::TimedOut,
            "cancelled" => Self::Cancelled,
            other => return Err(UnknownExecutionStateError::new(other)),
        };
        Ok(state)
    }
}
