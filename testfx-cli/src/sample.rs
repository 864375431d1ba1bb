// Copyright (c) The testfx Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The test source built into the `testfx` binary.
//!
//! Test assemblies embed the host as a library and pass their own [`TestSource`] to
//! [`TestfxApp::exec`](crate::TestfxApp::exec). The binary itself serves this small tree, which is
//! enough to exercise discovery, filtering, expansion and every terminal state from a client.

use serde_json::json;
use testfx_runner::{
    node::{
        FileLocationProperty, MethodIdentifierProperty, Property, TestArguments, TestFailure,
        TestNode,
    },
    source::StaticTestSource,
};

/// The name of the built-in source.
pub const SAMPLE_SOURCE_NAME: &str = "testfx-sample";

macro_rules! located {
    ($node:expr, $method:literal) => {
        $node
            .with_property(Property::FileLocation(FileLocationProperty {
                file: file!().to_owned(),
                line_start: line!(),
                line_end: line!(),
            }))
            .with_property(Property::MethodIdentifier(MethodIdentifierProperty {
                type_name: module_path!().to_owned(),
                method_name: $method.to_owned(),
            }))
    };
}

/// Returns the built-in test source.
pub fn sample_source() -> StaticTestSource {
    StaticTestSource::new(SAMPLE_SOURCE_NAME, [math(), strings()])
}

fn math() -> TestNode {
    TestNode::group(
        "Math",
        "Math",
        [
            located!(
                TestNode::action("Math.Add", "Add", |_| check(1 + 1 == 2, "1 + 1 != 2")),
                "add"
            )
            .with_property(Property::trait_("Category", "fast")),
            located!(
                TestNode::parameterized(
                    "Math.Square",
                    "Square",
                    || {
                        [(2, 4), (3, 9), (4, 16)]
                            .map(|(n, expected)| TestArguments::new([json!(n), json!(expected)]))
                    },
                    |_, args| {
                        let n = args.get(0).and_then(|v| v.as_i64()).unwrap_or_default();
                        let expected = args.get(1).and_then(|v| v.as_i64()).unwrap_or_default();
                        check(n * n == expected, format!("{n}^2 != {expected}"))
                    },
                ),
                "square"
            )
            .with_property(Property::trait_("Category", "fast")),
            located!(
                TestNode::action("Math.Divide", "Divide", |_| {
                    let zero = 0_u32;
                    match 10_u32.checked_div(zero) {
                        Some(_) => Ok(()),
                        None => Err(TestFailure::error("attempted to divide by zero")),
                    }
                }),
                "divide"
            ),
        ],
    )
}

fn strings() -> TestNode {
    TestNode::group(
        "Strings",
        "Strings",
        [
            located!(
                TestNode::action("Strings.Upper", "Upper", |_| {
                    check("abc".to_uppercase() == "ABC", "uppercase mismatch")
                }),
                "upper"
            )
            .with_property(Property::trait_("Category", "fast")),
            located!(
                TestNode::action("Strings.Reverse", "Reverse", |_| {
                    let reversed: String = "abc".chars().rev().collect();
                    check(reversed == "cab", format!("expected `cab`, got `{reversed}`"))
                }),
                "reverse"
            ),
            located!(
                TestNode::action("Strings.Unicode", "Unicode", |_| Ok(())),
                "unicode"
            )
            .with_property(Property::Ignore {
                reason: Some("not supported on this platform".to_owned()),
            }),
        ],
    )
}

fn check(condition: bool, message: impl Into<String>) -> Result<(), TestFailure> {
    if condition {
        Ok(())
    } else {
        Err(TestFailure::assertion(message))
    }
}
