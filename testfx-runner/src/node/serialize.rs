// Copyright (c) The testfx Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::node::{TestNodeSnapshot, TestNodeState};
use chrono::SecondsFormat;
use serde_json::{Map, Value, json};
use testfx_metadata::{SerializedTestNode, keys};

/// How declaration locations are sent to a client.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LocationReporting {
    /// `location.file`, `location.line-start`, `location.line-end`, `location.type` and
    /// `location.method`.
    #[default]
    Modern,

    /// `location.file` and `location.line` only, for clients that predate line ranges.
    Legacy,
}

impl TestNodeSnapshot {
    /// Converts this snapshot to its wire shape.
    pub fn to_serialized(&self, reporting: LocationReporting) -> SerializedTestNode {
        let mut properties = Map::new();
        let state = self.properties.state();

        match state {
            Some(TestNodeState::Failed(failure) | TestNodeState::Error(failure)) => {
                properties.insert(keys::ERROR_MESSAGE.to_owned(), json!(failure.message()));
                if let Some(stack_trace) = failure.stack_trace() {
                    properties.insert(keys::ERROR_STACKTRACE.to_owned(), json!(stack_trace));
                }
            }
            Some(TestNodeState::Skipped {
                reason: Some(reason),
            }) => {
                properties.insert(keys::ERROR_MESSAGE.to_owned(), json!(reason));
            }
            Some(TestNodeState::Timeout { timeout }) => {
                properties.insert(
                    keys::ERROR_MESSAGE.to_owned(),
                    json!(format!(
                        "test exceeded its timeout of {}",
                        humantime::format_duration(*timeout)
                    )),
                );
            }
            _ => {}
        }

        if let Some(timing) = self.properties.timing() {
            properties.insert(
                keys::TIME_START_UTC.to_owned(),
                json!(timing.start_time.to_rfc3339_opts(SecondsFormat::Millis, true)),
            );
            properties.insert(
                keys::TIME_STOP_UTC.to_owned(),
                json!(timing.end_time.to_rfc3339_opts(SecondsFormat::Millis, true)),
            );
            properties.insert(
                keys::TIME_DURATION_MS.to_owned(),
                json!(timing.duration.as_secs_f64() * 1000.0),
            );
        }

        if let Some(location) = self.properties.file_location() {
            properties.insert(keys::LOCATION_FILE.to_owned(), json!(location.file));
            match reporting {
                LocationReporting::Modern => {
                    properties.insert(
                        keys::LOCATION_LINE_START.to_owned(),
                        json!(location.line_start),
                    );
                    properties.insert(keys::LOCATION_LINE_END.to_owned(), json!(location.line_end));
                }
                LocationReporting::Legacy => {
                    properties.insert(keys::LOCATION_LINE.to_owned(), json!(location.line_start));
                }
            }
        }

        if reporting == LocationReporting::Modern
            && let Some(method) = self.properties.method_identifier()
        {
            properties.insert(keys::LOCATION_TYPE.to_owned(), json!(method.type_name));
            properties.insert(keys::LOCATION_METHOD.to_owned(), json!(method.method_name));
        }

        let traits: Vec<Value> = self
            .properties
            .traits()
            .map(|(key, value)| json!({ key: value }))
            .collect();
        if !traits.is_empty() {
            properties.insert(keys::TRAITS.to_owned(), Value::Array(traits));
        }

        SerializedTestNode {
            uid: self.uid.to_string(),
            display_name: self.display_name.clone(),
            node_type: Some(self.node_type),
            execution_state: state.map(TestNodeState::execution_state),
            properties,
        }
    }
}
