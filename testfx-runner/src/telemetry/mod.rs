// Copyright (c) The testfx Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Telemetry collection.
//!
//! Producers queue events through a [`TelemetryLogger`] without ever blocking. A single
//! background task owned by the [`TelemetryCollector`] enriches each event with the
//! [`TelemetrySession`] context, splits its values into properties and metrics, and hands it to a
//! [`TelemetryClient`]. Sending is best effort: failures are logged at a limited rate, and events
//! still queued when the shutdown grace period ends are dropped.

mod client;
mod collector;
mod session;

pub use client::*;
pub use collector::*;
pub use session::*;

use std::time::Duration;

/// A value attached to a telemetry event.
///
/// Strings and booleans become properties, numbers and durations become metrics.
#[derive(Clone, Debug, PartialEq)]
pub enum TelemetryValue {
    /// A property.
    String(String),
    /// A property, sent as `"true"` or `"false"`.
    Bool(bool),
    /// A metric.
    Int(i64),
    /// A metric.
    Float(f64),
    /// A metric, in milliseconds.
    Duration(Duration),
    /// A property whose value is hashed with SHA-256 before leaving the process.
    Sensitive(String),
}

impl From<&str> for TelemetryValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for TelemetryValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for TelemetryValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for TelemetryValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<usize> for TelemetryValue {
    fn from(value: usize) -> Self {
        Self::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<f64> for TelemetryValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<Duration> for TelemetryValue {
    fn from(value: Duration) -> Self {
        Self::Duration(value)
    }
}
