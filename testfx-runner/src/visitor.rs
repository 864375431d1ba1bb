// Copyright (c) The testfx Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Breadth-first traversal of a test tree.
//!
//! [`BfsTestNodeVisitor`] is the driver behind both discovery and execution. It walks the tree
//! level by level, prunes subtrees the filter excludes, expands parameterized nodes, and hands
//! every reported node to a callback along with the uid of its parent.

use crate::{
    errors::VisitError,
    expansion::{Expansion, TestArgumentsManager},
    node::{TestNode, TestNodeUid},
    test_filter::TestExecutionFilter,
};
use std::collections::{HashSet, VecDeque};
use tracing::trace;

/// Walks test trees breadth-first.
#[derive(Debug)]
pub struct BfsTestNodeVisitor<'a> {
    roots: &'a [TestNode],
    filter: &'a TestExecutionFilter,
    manager: &'a TestArgumentsManager,
}

struct QueueEntry {
    node: TestNode,
    parent: Option<TestNodeUid>,
    // Display names from the root to the parent.
    parent_path: Vec<String>,
    // Set for expanded children, which take their parent's filter decision: whether the parent
    // was reported.
    inherited: Option<bool>,
}

impl QueueEntry {
    fn root(node: TestNode) -> Self {
        Self {
            node,
            parent: None,
            parent_path: Vec::new(),
            inherited: None,
        }
    }
}

impl<'a> BfsTestNodeVisitor<'a> {
    /// Creates a new visitor.
    pub fn new(
        roots: &'a [TestNode],
        filter: &'a TestExecutionFilter,
        manager: &'a TestArgumentsManager,
    ) -> Self {
        Self {
            roots,
            filter,
            manager,
        }
    }

    /// Visits the tree, calling `callback` with every reported node and the uid of its parent.
    ///
    /// A parameterized node is reported before its expanded children, which are visited with the
    /// level below it. The walk stops at the first callback error, which is returned as
    /// [`VisitError::Callback`].
    pub async fn visit<F, Fut, E>(&self, mut callback: F) -> Result<(), VisitError<E>>
    where
        F: FnMut(TestNode, Option<TestNodeUid>) -> Fut,
        Fut: Future<Output = Result<(), E>>,
    {
        let mut queue: VecDeque<QueueEntry> =
            self.roots.iter().cloned().map(QueueEntry::root).collect();
        let mut seen = HashSet::new();

        while let Some(entry) = queue.pop_front() {
            let QueueEntry {
                node,
                parent,
                parent_path,
                inherited,
            } = entry;

            let mut path = parent_path;
            let reported = match inherited {
                Some(parent_reported) => parent_reported || self.filter.reports(node.uid()),
                None => {
                    path.push(node.display_name().to_owned());
                    if !self.filter.includes(&path, &node.properties) {
                        trace!(uid = %node.uid(), "excluded by filter, pruning subtree");
                        continue;
                    }
                    self.filter.reports(node.uid())
                }
            };

            if !seen.insert(node.uid().clone()) {
                return Err(VisitError::DuplicateUid(node.uid().clone()));
            }

            let expansion = self.manager.expand(&node);
            let uid = node.uid().clone();
            let children = node.children().to_vec();

            if reported {
                callback(node, parent)
                    .await
                    .map_err(VisitError::Callback)?;
            }

            match expansion {
                Expansion::Expanded(expanded) => {
                    queue.extend(expanded.map(|child| QueueEntry {
                        node: child.node,
                        parent: Some(uid.clone()),
                        parent_path: path.clone(),
                        inherited: Some(reported),
                    }));
                }
                Expansion::Opaque => {
                    queue.extend(children.into_iter().map(|child| QueueEntry {
                        node: child,
                        parent: Some(uid.clone()),
                        parent_path: path.clone(),
                        inherited: None,
                    }));
                }
            }
        }

        Ok(())
    }
}
