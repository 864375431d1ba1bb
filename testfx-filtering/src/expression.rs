// Copyright (c) The testfx Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    errors::{ParseSingleError, TreeNodeFilterParseErrors},
    parsing::{PatternFragment, new_span, parse},
};
use std::{borrow::Cow, fmt};

/// Matcher for a single display name.
#[derive(Clone, Debug)]
pub enum NameMatcher {
    /// Exact (decoded) value.
    Equal(String),

    /// A name containing `*` wildcards.
    Pattern {
        /// The decoded pieces of the name.
        fragments: Vec<PatternFragment>,
        /// The compiled, anchored regex.
        regex: regex::Regex,
    },
}

impl PartialEq for NameMatcher {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Equal(s1), Self::Equal(s2)) => s1 == s2,
            (Self::Pattern { regex: r1, .. }, Self::Pattern { regex: r2, .. }) => {
                r1.as_str() == r2.as_str()
            }
            _ => false,
        }
    }
}

impl Eq for NameMatcher {}

impl NameMatcher {
    pub(crate) fn is_match(&self, input: &str) -> bool {
        match self {
            Self::Equal(text) => text == input,
            Self::Pattern { regex, .. } => regex.is_match(input),
        }
    }
}

/// A `[key=value]` predicate attached to a segment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PropertyPredicate {
    /// The property name.
    pub key: String,
    /// The expected value.
    pub value: String,
}

/// One segment of a [`TreeNodeFilter`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FilterSegment {
    /// Matches a display name, optionally constrained by a property predicate.
    Name {
        /// The name matcher.
        name: NameMatcher,
        /// The predicate, if any.
        property: Option<PropertyPredicate>,
    },

    /// `**`: matches the node at this depth and everything below it.
    AnyDepth,
}

/// Properties of the node being matched, consulted for `[key=value]` predicates.
pub trait NodeProperties {
    /// Returns true if the node carries a property `key` with value `value`.
    fn has_property(&self, key: &str, value: &str) -> bool;
}

impl NodeProperties for () {
    fn has_property(&self, _key: &str, _value: &str) -> bool {
        false
    }
}

impl<K: AsRef<str>, V: AsRef<str>> NodeProperties for [(K, V)] {
    fn has_property(&self, key: &str, value: &str) -> bool {
        self.iter()
            .any(|(k, v)| k.as_ref() == key && v.as_ref() == value)
    }
}

impl<K: AsRef<str>, V: AsRef<str>, const N: usize> NodeProperties for [(K, V); N] {
    fn has_property(&self, key: &str, value: &str) -> bool {
        self.as_slice().has_property(key, value)
    }
}

impl<K: AsRef<str>, V: AsRef<str>> NodeProperties for Vec<(K, V)> {
    fn has_property(&self, key: &str, value: &str) -> bool {
        self.as_slice().has_property(key, value)
    }
}

/// A tree path filter, e.g. `/MyAssembly/MyNamespace/MyClass/*`.
///
/// A filter is anchored at the root: segment `i` is matched against the display name at depth
/// `i`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TreeNodeFilter {
    segments: Vec<FilterSegment>,
}

impl TreeNodeFilter {
    /// Parses a tree node filter.
    pub fn parse(input: &str) -> Result<Self, TreeNodeFilterParseErrors> {
        let mut errors = Vec::new();
        let parsed = parse(new_span(input, &mut errors));

        if !errors.is_empty() {
            return Err(TreeNodeFilterParseErrors::new(input, errors));
        }
        if parsed.is_empty() {
            // Every segment was dropped, which means there should be an error above.
            return Err(TreeNodeFilterParseErrors::new(
                input,
                vec![ParseSingleError::Unknown],
            ));
        }

        crate::compile::compile(parsed)
            .map(|segments| Self { segments })
            .map_err(|errors| TreeNodeFilterParseErrors::new(input, errors))
    }

    /// Returns the segments of this filter.
    pub fn segments(&self) -> &[FilterSegment] {
        &self.segments
    }

    /// Returns true if a node is included by this filter.
    ///
    /// `path` contains the decoded display names from the root down to the node itself. Paths
    /// deeper than the filter are excluded unless it ends with `**`. Paths shallower than the
    /// filter are included if every segment they have matches, so that ancestors of matching
    /// nodes are walked. Property predicates are only checked at the node's own depth.
    pub fn matches<S, P>(&self, path: &[S], properties: &P) -> bool
    where
        S: AsRef<str>,
        P: NodeProperties + ?Sized,
    {
        let Some(node_depth) = path.len().checked_sub(1) else {
            return true;
        };

        for (depth, name) in path.iter().enumerate() {
            match self.segments.get(depth) {
                None => return false,
                Some(FilterSegment::AnyDepth) => return true,
                Some(FilterSegment::Name {
                    name: matcher,
                    property,
                }) => {
                    if !matcher.is_match(name.as_ref()) {
                        return false;
                    }
                    if depth == node_depth
                        && let Some(predicate) = property
                    {
                        return properties.has_property(&predicate.key, &predicate.value);
                    }
                }
            }
        }

        true
    }
}

impl fmt::Display for TreeNodeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            f.write_str("/")?;
            match segment {
                FilterSegment::AnyDepth => f.write_str("**")?,
                FilterSegment::Name { name, property } => {
                    match name {
                        NameMatcher::Equal(text) => f.write_str(&encode_node_name(text))?,
                        NameMatcher::Pattern { fragments, .. } => {
                            for fragment in fragments {
                                match fragment {
                                    PatternFragment::Literal(text) => {
                                        f.write_str(&encode_node_name(text))?
                                    }
                                    PatternFragment::Wildcard => f.write_str("*")?,
                                }
                            }
                        }
                    }
                    if let Some(PropertyPredicate { key, value }) = property {
                        write!(f, "[{key}={value}]")?;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Encodes a display name so that it can be used as a single filter segment.
///
/// Since `%` is itself encoded, encoding nests: a name containing a literal `%2F` is written
/// `%252F`.
pub fn encode_node_name(name: &str) -> Cow<'_, str> {
    if !name.contains(['%', '/', '*', '[', ']']) {
        return Cow::Borrowed(name);
    }

    let mut encoded = String::with_capacity(name.len() + 8);
    for c in name.chars() {
        match c {
            '%' => encoded.push_str("%25"),
            '/' => encoded.push_str("%2F"),
            '*' => encoded.push_str("%2A"),
            '[' => encoded.push_str("%5B"),
            ']' => encoded.push_str("%5D"),
            c => encoded.push(c),
        }
    }
    Cow::Owned(encoded)
}
