// Copyright (c) The testfx Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::config::TelemetryConfig;
use newtype_uuid::{TypedUuid, TypedUuidKind, TypedUuidTag};
use tracing::debug;

/// Set to `1` or `true` to disable telemetry.
pub const TELEMETRY_OPTOUT_ENV: &str = "TESTFX_TELEMETRY_OPTOUT";

/// Carries the session id to child processes, so related processes report under one session.
pub const TELEMETRY_SESSION_ID_ENV: &str = "TESTFX_TELEMETRY_SESSIONID";

/// The kind for [`SessionId`].
pub enum SessionKind {}

impl TypedUuidKind for SessionKind {
    #[inline]
    fn tag() -> TypedUuidTag {
        const TAG: TypedUuidTag = TypedUuidTag::new("testfx_session");
        TAG
    }
}

/// Correlates the telemetry of a chain of related processes.
pub type SessionId = TypedUuid<SessionKind>;

/// Process-wide telemetry context, attached to every event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TelemetrySession {
    session_id: SessionId,
    inherited: bool,
    is_ci: bool,
    opted_out: bool,
    version: &'static str,
}

impl TelemetrySession {
    /// Reads the session from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok(), is_ci::uncached())
    }

    /// Reads the session through `lookup`, which returns the value of an environment variable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>, is_ci: bool) -> Self {
        let opted_out = lookup(TELEMETRY_OPTOUT_ENV)
            .is_some_and(|value| value == "1" || value.eq_ignore_ascii_case("true"));

        let inherited = lookup(TELEMETRY_SESSION_ID_ENV).and_then(|value| {
            value
                .parse::<SessionId>()
                .inspect_err(|error| {
                    debug!(%value, %error, "ignoring invalid inherited telemetry session id");
                })
                .ok()
        });

        Self {
            session_id: inherited.unwrap_or_else(SessionId::new_v4),
            inherited: inherited.is_some(),
            is_ci,
            opted_out,
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    /// The session id.
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Returns true if the session id came from a parent process.
    pub fn is_inherited(&self) -> bool {
        self.inherited
    }

    /// Returns true if running in a CI environment.
    pub fn is_ci(&self) -> bool {
        self.is_ci
    }

    /// Returns true if the user opted out through the environment.
    pub fn is_opted_out(&self) -> bool {
        self.opted_out
    }

    /// The version of testfx reporting the events.
    pub fn version(&self) -> &'static str {
        self.version
    }

    /// Returns true if events should be collected under `config`.
    pub fn is_enabled(&self, config: &TelemetryConfig) -> bool {
        config.enabled && !self.opted_out
    }

    /// Environment variables to set on child processes.
    pub fn child_env(&self) -> impl Iterator<Item = (&'static str, String)> {
        std::iter::once((TELEMETRY_SESSION_ID_ENV, self.session_id.to_string()))
    }
}
