// Copyright (c) The testfx Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Where test trees come from.

use crate::{errors::TestSourceError, node::TestNode};
use std::fmt;

/// Produces the roots of a test tree.
///
/// Called once per request: discovery and execution each get a fresh tree, so property changes
/// made during one request never leak into the next.
pub trait TestSource: fmt::Debug + Send + Sync {
    /// A name for this source, used in logs and errors.
    fn name(&self) -> &str;

    /// Returns the root nodes.
    fn discover(&self) -> Result<Vec<TestNode>, TestSourceError>;
}

/// A source returning a fixed set of nodes.
#[derive(Clone, Debug)]
pub struct StaticTestSource {
    name: String,
    roots: Vec<TestNode>,
}

impl StaticTestSource {
    /// Creates a new source.
    pub fn new(name: impl Into<String>, roots: impl IntoIterator<Item = TestNode>) -> Self {
        Self {
            name: name.into(),
            roots: roots.into_iter().collect(),
        }
    }
}

impl TestSource for StaticTestSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn discover(&self) -> Result<Vec<TestNode>, TestSourceError> {
        Ok(self.roots.clone())
    }
}
