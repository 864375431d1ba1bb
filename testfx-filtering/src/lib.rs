// Copyright (c) The testfx Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Parsing and matching of tree node filters, the `/`-separated paths of display names used to
//! select testfx test nodes.
//!
//! ```
//! use testfx_filtering::TreeNodeFilter;
//!
//! let filter = TreeNodeFilter::parse("/MyAssembly/MyClass/*").unwrap();
//! assert!(filter.matches(&["MyAssembly"], &()));
//! assert!(filter.matches(&["MyAssembly", "MyClass", "my_test"], &()));
//! assert!(!filter.matches(&["MyAssembly", "OtherClass"], &()));
//! ```

mod compile;
pub mod errors;
mod expression;
mod parsing;

pub use expression::{
    FilterSegment, NameMatcher, NodeProperties, PropertyPredicate, TreeNodeFilter,
    encode_node_name,
};
pub use parsing::PatternFragment;
