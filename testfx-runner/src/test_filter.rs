// Copyright (c) The testfx Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Filtering test nodes based on what a request asks for.
//!
//! The main structure in this module is [`TestExecutionFilter`], which is usually built from the
//! parameters of a discovery or run request with [`TestExecutionFilter::from_request`].

use crate::{errors::FilterBuildError, node::TestNodeUid};
use std::{collections::HashSet, fmt};
use testfx_filtering::{NodeProperties, TreeNodeFilter};
use testfx_metadata::SerializedTestNode;

/// Decides which test nodes a walk visits and reports.
#[derive(Clone, Debug, Default)]
pub enum TestExecutionFilter {
    /// Every node is included.
    #[default]
    Nop,

    /// Nodes are included by path, and excluded nodes prune their subtree.
    TreeNode(TreeNodeFilter),

    /// The whole tree is walked, but only the listed nodes (and the expansions of listed
    /// parameterized nodes) are reported.
    UidList(HashSet<TestNodeUid>),
}

impl TestExecutionFilter {
    /// Builds a filter from the `tests` and `graph-filter` parameters of a request.
    pub fn from_request(
        tests: Option<&[SerializedTestNode]>,
        graph_filter: Option<&str>,
    ) -> Result<Self, FilterBuildError> {
        match (tests, graph_filter) {
            (Some(_), Some(_)) => Err(FilterBuildError::BothFilters),
            (Some(tests), None) => Ok(Self::UidList(
                tests.iter().map(|t| TestNodeUid::new(&t.uid)).collect(),
            )),
            (None, Some(filter)) => Ok(Self::TreeNode(TreeNodeFilter::parse(filter)?)),
            (None, None) => Ok(Self::Nop),
        }
    }

    /// Returns true if the node at `path` (display names from the root to the node) should be
    /// visited. If this returns false, none of the node's descendants are visited either.
    pub fn includes<S, P>(&self, path: &[S], properties: &P) -> bool
    where
        S: AsRef<str>,
        P: NodeProperties + ?Sized,
    {
        match self {
            Self::Nop | Self::UidList(_) => true,
            Self::TreeNode(filter) => filter.matches(path, properties),
        }
    }

    /// Returns true if a visited node with the given uid should be reported.
    pub fn reports(&self, uid: &TestNodeUid) -> bool {
        match self {
            Self::Nop | Self::TreeNode(_) => true,
            Self::UidList(uids) => uids.contains(uid),
        }
    }
}

impl fmt::Display for TestExecutionFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nop => f.write_str("(none)"),
            Self::TreeNode(filter) => write!(f, "{filter}"),
            Self::UidList(uids) => write!(f, "{} uids", uids.len()),
        }
    }
}
