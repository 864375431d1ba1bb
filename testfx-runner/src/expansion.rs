// Copyright (c) The testfx Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Argument expansion for parameterized tests.
//!
//! A parameterized node is expanded into one action child per argument set. Children are produced
//! lazily: the argument source is called once, when expansion begins, and each child is built as
//! the iterator is advanced.

use crate::node::{
    ArgumentsSource, ParameterizedBody, TestArguments, TestBody, TestContext, TestNode,
    TestNodeKind, TestNodeUid,
};
use debug_ignore::DebugIgnore;
use std::{fmt, sync::Arc};

/// Decides how parameterized nodes are presented.
#[derive(Clone, Debug, Default)]
pub struct TestArgumentsManager {
    _private: (),
}

impl TestArgumentsManager {
    /// Creates a new manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if `node` is parameterized and doesn't opt out of expansion.
    ///
    /// The children of such a node carry its executions, so the node itself is never run.
    pub fn expands(&self, node: &TestNode) -> bool {
        matches!(node.kind(), TestNodeKind::Parameterized { .. })
            && !node.properties.prevents_expansion()
    }

    /// Expands `node` if [`Self::expands`] returns true for it.
    ///
    /// The argument source isn't called until the returned children are iterated over.
    pub fn expand(&self, node: &TestNode) -> Expansion {
        match node.kind() {
            TestNodeKind::Parameterized { arguments, body } if self.expands(node) => {
                Expansion::Expanded(ExpandedChildren::new(node, arguments, body))
            }
            TestNodeKind::Group { .. }
            | TestNodeKind::Action { .. }
            | TestNodeKind::Parameterized { .. } => Expansion::Opaque,
        }
    }
}

/// The result of [`TestArgumentsManager::expand`].
#[derive(Debug)]
pub enum Expansion {
    /// The node is presented as-is.
    Opaque,

    /// The node is presented along with one child per argument set.
    Expanded(ExpandedChildren),
}

/// A child produced by expansion.
#[derive(Clone, Debug)]
pub struct ExpandedTestNode {
    /// The child node: an action running the parent's body with one argument set.
    pub node: TestNode,

    /// The index of the argument set.
    pub index: usize,
}

/// Lazily produces the children of an expanded node.
pub struct ExpandedChildren {
    parent: TestNode,
    arguments: ArgumentsSource,
    body: ParameterizedBody,
    iter: Option<Box<dyn Iterator<Item = TestArguments> + Send>>,
    index: usize,
}

impl ExpandedChildren {
    fn new(parent: &TestNode, arguments: &ArgumentsSource, body: &ParameterizedBody) -> Self {
        Self {
            parent: parent.clone(),
            arguments: arguments.clone(),
            body: body.clone(),
            iter: None,
            index: 0,
        }
    }

    /// Returns the uid of the child with the given argument index.
    pub fn child_uid(parent: &TestNodeUid, index: usize) -> TestNodeUid {
        TestNodeUid::new(format!("{parent} [{index}]"))
    }

    fn make_child(&self, index: usize, args: TestArguments) -> TestNode {
        let uid = Self::child_uid(self.parent.uid(), index);
        let display_name = format!("{} {args}", self.parent.display_name());
        let parent_body = self.body.clone();
        let body: TestBody = Arc::new(move |ctx: &TestContext| parent_body(ctx, &args));

        let mut child = TestNode::new(
            uid,
            display_name,
            TestNodeKind::Action {
                body: DebugIgnore(body),
            },
        );
        child.properties = self.parent.properties.clone();
        child.properties.clear_state();
        child
    }
}

impl Iterator for ExpandedChildren {
    type Item = ExpandedTestNode;

    fn next(&mut self) -> Option<Self::Item> {
        let arguments = &self.arguments;
        let args = self.iter.get_or_insert_with(|| arguments()).next()?;
        let index = self.index;
        self.index += 1;
        Some(ExpandedTestNode {
            node: self.make_child(index, args),
            index,
        })
    }
}

impl fmt::Debug for ExpandedChildren {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpandedChildren")
            .field("parent", self.parent.uid())
            .field("started", &self.iter.is_some())
            .field("index", &self.index)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Property, TestFailure, TestNodeState};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use testfx_filtering::NodeProperties;
    use tokio_util::sync::CancellationToken;

    fn parameterized(calls: Arc<AtomicUsize>) -> TestNode {
        TestNode::parameterized(
            "ID1",
            "B",
            move || {
                calls.fetch_add(1, Ordering::SeqCst);
                vec![
                    TestArguments::new([json!(0), json!("a")]),
                    TestArguments::new([json!(1), json!("b")]).with_display_name("second"),
                ]
            },
            |_, args| {
                if args.get(0) == Some(&json!(1)) {
                    Err(TestFailure::assertion("one is not allowed"))
                } else {
                    Ok(())
                }
            },
        )
        .with_property(Property::trait_("Category", "Smoke"))
    }

    #[test]
    fn expands_lazily() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut node = parameterized(calls.clone());
        node.properties.set_state(TestNodeState::Discovered);

        let manager = TestArgumentsManager::new();
        let Expansion::Expanded(children) = manager.expand(&node) else {
            panic!("parameterized node should be expanded");
        };
        assert_eq!(calls.load(Ordering::SeqCst), 0, "source not called yet");

        let children: Vec<_> = children.collect();
        assert_eq!(calls.load(Ordering::SeqCst), 1, "source called exactly once");

        let summary: Vec<_> = children
            .iter()
            .map(|c| (c.index, c.node.uid().as_str(), c.node.display_name()))
            .collect();
        assert_eq!(
            summary,
            [(0, "ID1 [0]", r#"B (0, "a")"#), (1, "ID1 [1]", "B second")]
        );

        for child in &children {
            assert!(child.node.is_executable());
            assert_eq!(child.node.properties.state(), None);
            assert!(child.node.properties.has_property("Category", "Smoke"));
        }

        let TestNodeKind::Action { body } = children[1].node.kind() else {
            panic!("expanded children are actions");
        };
        let ctx = TestContext::new(
            children[1].node.uid().clone(),
            children[1].node.display_name().to_owned(),
            CancellationToken::new(),
        );
        assert_eq!(
            (body.0)(&ctx).map_err(|f| f.message().to_owned()),
            Err("one is not allowed".to_owned())
        );
    }

    #[test]
    fn opaque_nodes() {
        let manager = TestArgumentsManager::new();
        let action = TestNode::action("a", "a", |_| Ok(()));
        assert!(matches!(manager.expand(&action), Expansion::Opaque));

        let group = TestNode::group("g", "g", []);
        assert!(matches!(manager.expand(&group), Expansion::Opaque));

        let calls = Arc::new(AtomicUsize::new(0));
        let prevented =
            parameterized(calls.clone()).with_property(Property::PreventArgumentExpansion);
        assert!(matches!(manager.expand(&prevented), Expansion::Opaque));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn empty_source() {
        let node = TestNode::parameterized("p", "p", Vec::<TestArguments>::new, |_, _| Ok(()));
        let Expansion::Expanded(children) = TestArgumentsManager::new().expand(&node) else {
            panic!("parameterized node should be expanded");
        };
        assert_eq!(children.count(), 0);
    }
}
