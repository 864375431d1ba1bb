// Copyright (c) The testfx Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration for testfx.
//!
//! Configuration is layered: the embedded default config comes first, then the repository config
//! file (`.config/testfx.toml`, or the file passed in with `--config-file`), then environment
//! variables of the form `TESTFX_SECTION__KEY_NAME`. Unknown keys are reported through
//! [`ConfigWarnings`] and otherwise ignored.

use crate::{errors::ConfigParseError, server::CompatRule};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, ConfigBuilder, ConfigError, File, FileFormat, builder::DefaultState};
use serde::Deserialize;
use std::{collections::BTreeSet, time::Duration};
use tracing::{debug, warn};

/// Receives warnings produced while reading configuration.
pub trait ConfigWarnings {
    /// Handle unknown configuration keys found in a config file.
    fn unknown_config_keys(
        &mut self,
        config_file: &Utf8Path,
        root: &Utf8Path,
        unknown: &BTreeSet<String>,
    );

    /// Handle environment variables that don't correspond to a known configuration key.
    fn unknown_env_keys(&mut self, unknown: &BTreeSet<String>);
}

/// Default implementation of [`ConfigWarnings`] that logs warnings using the tracing crate.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultConfigWarnings;

impl ConfigWarnings for DefaultConfigWarnings {
    fn unknown_config_keys(
        &mut self,
        config_file: &Utf8Path,
        root: &Utf8Path,
        unknown: &BTreeSet<String>,
    ) {
        warn!(
            "in config file {}, ignoring unknown configuration {}",
            config_file.strip_prefix(root).unwrap_or(config_file),
            format_unknown(unknown),
        );
    }

    fn unknown_env_keys(&mut self, unknown: &BTreeSet<String>) {
        warn!(
            "in environment, ignoring unknown configuration {}",
            format_unknown(unknown),
        );
    }
}

fn format_unknown(unknown: &BTreeSet<String>) -> String {
    let mut out = String::new();
    if unknown.len() == 1 {
        // Print this on the same line.
        out.push_str("key: ");
        out.extend(unknown.iter().map(String::as_str));
    } else {
        out.push_str("keys:\n");
        for key in unknown {
            out.push_str("\n  - ");
            out.push_str(key);
        }
    }
    out
}

/// The testfx configuration.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct TestfxConfig {
    /// Server mode settings.
    pub server: ServerConfig,
    /// Test execution settings.
    pub execution: ExecutionConfig,
    /// Telemetry settings.
    pub telemetry: TelemetryConfig,
}

/// Server mode settings.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct ServerConfig {
    /// Updates received within this window after the first one are sent as a single batch.
    #[serde(with = "humantime_serde")]
    pub idle_flush_delay: Duration,

    /// How long to wait for the last batch of a request to be sent.
    #[serde(with = "humantime_serde")]
    pub session_end_flush_timeout: Duration,

    /// The largest accepted frame body, in bytes.
    pub max_message_size: usize,

    /// Version gated client features.
    #[serde(default)]
    pub compat: Vec<CompatRule>,
}

/// Test execution settings.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct ExecutionConfig {
    /// The default per-test timeout.
    #[serde(default, with = "humantime_serde::option")]
    pub test_timeout: Option<Duration>,
}

/// Telemetry settings.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct TelemetryConfig {
    /// Whether telemetry is collected at all.
    pub enabled: bool,

    /// How long pending events may take to be sent at shutdown.
    #[serde(with = "humantime_serde")]
    pub shutdown_grace_period: Duration,

    /// The minimum interval between two warnings about failing to send events.
    #[serde(with = "humantime_serde")]
    pub failure_log_interval: Duration,
}

impl TestfxConfig {
    /// The default location of the config within the path for testfx.
    pub const CONFIG_PATH: &'static str = ".config/testfx.toml";

    /// Contains the default config as a TOML file.
    ///
    /// Repository-specific configuration is layered on top of the default config.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../default-config.toml");

    /// Environment configuration uses this prefix, plus a `_`.
    pub const ENVIRONMENT_PREFIX: &'static str = "TESTFX";

    /// Reads the testfx config from the given file, or if not specified from `.config/testfx.toml`
    /// under `root`, then applies overrides from `env`.
    ///
    /// `env` is usually `std::env::vars()`. Variables without the `TESTFX_` prefix or without a
    /// `__` section separator are ignored.
    pub fn from_sources(
        root: impl Into<Utf8PathBuf>,
        config_file: Option<&Utf8Path>,
        env: impl IntoIterator<Item = (String, String)>,
        warnings: &mut impl ConfigWarnings,
    ) -> Result<Self, ConfigParseError> {
        let root = root.into();

        let (config_file, source) = match config_file {
            Some(file) => (file.to_owned(), File::new(file.as_str(), FileFormat::Toml)),
            None => {
                let config_file = root.join(Self::CONFIG_PATH);
                let source = File::new(config_file.as_str(), FileFormat::Toml).required(false);
                (config_file, source)
            }
        };

        // Deserialize the file on top of the defaults on its own first, so that unknown keys and
        // errors are attributed to it.
        let this_builder = Self::make_default_config().add_source(source.clone());
        let (_, unknown) = Self::build_and_deserialize_config(&this_builder)
            .map_err(|err| ConfigParseError::new(&config_file, err))?;
        if !unknown.is_empty() {
            warnings.unknown_config_keys(&config_file, &root, &unknown);
        }

        let overrides = env_overrides(env);
        if !overrides.is_empty() {
            debug!(count = overrides.len(), "applying environment overrides");
            let mut env_builder = Self::make_default_config();
            for (key, value) in &overrides {
                env_builder = env_builder
                    .set_override(key.as_str(), value.as_str())
                    .map_err(|err| ConfigParseError::new("environment", err))?;
            }
            let (_, unknown) = Self::build_and_deserialize_config(&env_builder)
                .map_err(|err| ConfigParseError::new("environment", err))?;
            if !unknown.is_empty() {
                warnings.unknown_env_keys(&unknown);
            }
        }

        let mut composite_builder = Self::make_default_config().add_source(source);
        for (key, value) in &overrides {
            composite_builder = composite_builder
                .set_override(key.as_str(), value.as_str())
                .map_err(|err| ConfigParseError::new("environment", err))?;
        }

        // The unknown set is ignored here because any values in it have already been reported.
        let (config, _unknown) = Self::build_and_deserialize_config(&composite_builder)
            .map_err(|err| ConfigParseError::new(&config_file, err))?;
        Ok(config)
    }

    /// Returns the default config.
    #[cfg(test)]
    pub(crate) fn default_config() -> Self {
        use itertools::Itertools;

        let (config, unknown) = Self::build_and_deserialize_config(&Self::make_default_config())
            .expect("default config is always valid");

        // Make sure there aren't any unknown keys in the default config, since it is
        // embedded/shipped with this binary.
        if !unknown.is_empty() {
            panic!(
                "found unknown keys in default config: {}",
                unknown.iter().join(", ")
            );
        }
        config
    }

    fn make_default_config() -> ConfigBuilder<DefaultState> {
        Config::builder().add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml))
    }

    /// This returns a tuple of (config, ignored paths).
    fn build_and_deserialize_config(
        builder: &ConfigBuilder<DefaultState>,
    ) -> Result<(Self, BTreeSet<String>), ConfigError> {
        let config = builder.build_cloned()?;

        let mut ignored = BTreeSet::new();
        let mut cb = |path: serde_ignored::Path| {
            ignored.insert(path.to_string());
        };
        let ignored_de = serde_ignored::Deserializer::new(config, &mut cb);
        let config = Self::deserialize(ignored_de)?;

        Ok((config, ignored))
    }
}

/// Maps `TESTFX_SERVER__IDLE_FLUSH_DELAY` to `server.idle-flush-delay`.
fn env_overrides(env: impl IntoIterator<Item = (String, String)>) -> Vec<(String, String)> {
    let mut overrides: Vec<_> = env
        .into_iter()
        .filter_map(|(name, value)| {
            let rest = name
                .strip_prefix(TestfxConfig::ENVIRONMENT_PREFIX)?
                .strip_prefix('_')?;
            if !rest.contains("__") {
                return None;
            }
            let key = rest
                .split("__")
                .map(|part| part.to_ascii_lowercase().replace('_', "-"))
                .collect::<Vec<_>>()
                .join(".");
            Some((key, value))
        })
        .collect();
    // Make the result independent of environment iteration order.
    overrides.sort();
    overrides
}
