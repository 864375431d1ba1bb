// Copyright (c) The testfx Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::node::TestFailure;
use chrono::{DateTime, Utc};
use std::time::Duration;
use testfx_filtering::NodeProperties;
use testfx_metadata::ExecutionState;

/// The state of a test node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TestNodeState {
    /// The node was discovered.
    Discovered,

    /// The node's body is about to run.
    InProgress,

    /// The body returned successfully.
    Passed,

    /// An assertion failed.
    Failed(TestFailure),

    /// The body returned an error or panicked.
    Error(TestFailure),

    /// The node wasn't executed.
    Skipped {
        /// Why, if known.
        reason: Option<String>,
    },

    /// The body ran longer than its timeout.
    Timeout {
        /// The timeout that was exceeded.
        timeout: Duration,
    },

    /// The run was cancelled before or while the body ran.
    Cancelled,
}

impl TestNodeState {
    /// Returns true if this is a final outcome of an execution.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Discovered | Self::InProgress)
    }

    /// Returns the wire representation of this state.
    pub fn execution_state(&self) -> ExecutionState {
        match self {
            Self::Discovered => ExecutionState::Discovered,
            Self::InProgress => ExecutionState::InProgress,
            Self::Passed => ExecutionState::Passed,
            Self::Failed(_) => ExecutionState::Failed,
            Self::Error(_) => ExecutionState::Error,
            Self::Skipped { .. } => ExecutionState::Skipped,
            Self::Timeout { .. } => ExecutionState::TimedOut,
            Self::Cancelled => ExecutionState::Cancelled,
        }
    }
}

/// When a node ran, and for how long.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimingProperty {
    /// When the body started.
    pub start_time: DateTime<Utc>,
    /// When the body ended.
    pub end_time: DateTime<Utc>,
    /// How long the body ran, from a monotonic clock.
    pub duration: Duration,
}

/// Where a test is declared.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileLocationProperty {
    /// The source file.
    pub file: String,
    /// First line of the declaration.
    pub line_start: u32,
    /// Last line of the declaration.
    pub line_end: u32,
}

/// Which function implements a test.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodIdentifierProperty {
    /// Module path of the function.
    pub type_name: String,
    /// Name of the function.
    pub method_name: String,
}

/// A typed property of a test node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Property {
    /// The node's state. A bag holds at most one.
    State(TestNodeState),
    /// Execution timing.
    Timing(TimingProperty),
    /// Declaration location.
    FileLocation(FileLocationProperty),
    /// Implementing function.
    MethodIdentifier(MethodIdentifierProperty),
    /// Key/value metadata, such as a category. A bag may hold many.
    Trait {
        /// The key.
        key: String,
        /// The value.
        value: String,
    },
    /// Run a parameterized node as a single test instead of one child per argument set.
    PreventArgumentExpansion,
    /// Don't run the node.
    Ignore {
        /// Why.
        reason: Option<String>,
    },
    /// Per-node execution timeout, overriding the configured default.
    Timeout(Duration),
}

impl Property {
    /// Creates a trait property.
    pub fn trait_(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Trait {
            key: key.into(),
            value: value.into(),
        }
    }

    // Properties of the same kind replace each other, except traits.
    fn same_slot(&self, other: &Property) -> bool {
        !matches!(self, Self::Trait { .. })
            && std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

/// The properties of a test node.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PropertyBag {
    properties: Vec<Property>,
}

impl PropertyBag {
    /// Creates an empty bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a property. Any existing property of the same kind is replaced, except for traits which
    /// accumulate.
    pub fn add(&mut self, property: Property) {
        match self.properties.iter_mut().find(|p| p.same_slot(&property)) {
            Some(existing) => *existing = property,
            None => self.properties.push(property),
        }
    }

    /// Sets the state, replacing any previous one.
    pub fn set_state(&mut self, state: TestNodeState) {
        self.add(Property::State(state));
    }

    /// Removes the state, if any.
    pub fn clear_state(&mut self) {
        self.properties.retain(|p| !matches!(p, Property::State(_)));
    }

    /// The node's state.
    pub fn state(&self) -> Option<&TestNodeState> {
        self.properties.iter().find_map(|p| match p {
            Property::State(state) => Some(state),
            _ => None,
        })
    }

    /// Execution timing, if the node ran.
    pub fn timing(&self) -> Option<&TimingProperty> {
        self.properties.iter().find_map(|p| match p {
            Property::Timing(timing) => Some(timing),
            _ => None,
        })
    }

    /// Where the node is declared.
    pub fn file_location(&self) -> Option<&FileLocationProperty> {
        self.properties.iter().find_map(|p| match p {
            Property::FileLocation(location) => Some(location),
            _ => None,
        })
    }

    /// The function implementing the node.
    pub fn method_identifier(&self) -> Option<&MethodIdentifierProperty> {
        self.properties.iter().find_map(|p| match p {
            Property::MethodIdentifier(method) => Some(method),
            _ => None,
        })
    }

    /// Key/value metadata, in insertion order.
    pub fn traits(&self) -> impl Iterator<Item = (&str, &str)> {
        self.properties.iter().filter_map(|p| match p {
            Property::Trait { key, value } => Some((key.as_str(), value.as_str())),
            _ => None,
        })
    }

    /// Returns true if argument expansion is disabled for this node.
    pub fn prevents_expansion(&self) -> bool {
        self.properties
            .iter()
            .any(|p| matches!(p, Property::PreventArgumentExpansion))
    }

    /// Returns `Some(reason)` if the node is ignored.
    pub fn ignored(&self) -> Option<Option<&str>> {
        self.properties.iter().find_map(|p| match p {
            Property::Ignore { reason } => Some(reason.as_deref()),
            _ => None,
        })
    }

    /// The node's own timeout.
    pub fn timeout(&self) -> Option<Duration> {
        self.properties.iter().find_map(|p| match p {
            Property::Timeout(timeout) => Some(*timeout),
            _ => None,
        })
    }

    /// Iterates over every property.
    pub fn iter(&self) -> impl Iterator<Item = &Property> {
        self.properties.iter()
    }

    /// The number of properties.
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    /// Returns true if the bag is empty.
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

impl NodeProperties for PropertyBag {
    fn has_property(&self, key: &str, value: &str) -> bool {
        self.traits().any(|(k, v)| k == key && v == value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn set_state_keeps_a_single_state() {
        let mut bag = PropertyBag::new();
        bag.set_state(TestNodeState::Discovered);
        bag.set_state(TestNodeState::InProgress);
        bag.set_state(TestNodeState::Passed);

        let states: Vec<_> = bag
            .iter()
            .filter(|p| matches!(p, Property::State(_)))
            .collect();
        assert_eq!(states.len(), 1);
        assert_eq!(bag.state(), Some(&TestNodeState::Passed));

        bag.clear_state();
        assert_eq!(bag.state(), None);
    }

    #[test]
    fn traits_accumulate() {
        let mut bag = PropertyBag::new();
        bag.add(Property::trait_("Category", "Smoke"));
        bag.add(Property::trait_("Category", "Slow"));
        bag.add(Property::Timeout(Duration::from_secs(1)));
        bag.add(Property::Timeout(Duration::from_secs(2)));

        assert_eq!(
            bag.traits().collect::<Vec<_>>(),
            [("Category", "Smoke"), ("Category", "Slow")]
        );
        assert_eq!(bag.timeout(), Some(Duration::from_secs(2)));
        assert_eq!(bag.len(), 3);
        assert!(bag.has_property("Category", "Slow"));
        assert!(!bag.has_property("Category", "Fast"));
    }

    #[test]
    fn terminal_states() {
        assert!(!TestNodeState::Discovered.is_terminal());
        assert!(!TestNodeState::InProgress.is_terminal());
        assert!(TestNodeState::Cancelled.is_terminal());
        assert_eq!(
            TestNodeState::Timeout {
                timeout: Duration::from_secs(1)
            }
            .execution_state(),
            ExecutionState::TimedOut
        );
    }
}
