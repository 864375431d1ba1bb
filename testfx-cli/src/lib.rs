// Copyright (c) The testfx Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The testfx test host.
//!
//! Test assemblies embed the host and hand it their tests:
//!
//! ```no_run
//! use clap::Parser;
//! use std::sync::Arc;
//! use testfx_cli::{OutputWriter, TestfxApp, sample_source};
//!
//! let app = TestfxApp::parse();
//! let output = app.init_output();
//! let code = match app.exec(Arc::new(sample_source()), output, &mut OutputWriter::default()) {
//!     Ok(code) => code,
//!     Err(error) => {
//!         error.display_to_stderr(&output.stderr_styles());
//!         error.process_exit_code()
//!     }
//! };
//! std::process::exit(code);
//! ```
//!
//! Without `--server`, the host runs (or with `--list-tests`, lists) the tests on the console.
//! With `--server`, it serves discovery and run requests to a client over JSON-RPC, either
//! listening on `--port` or connecting to `--client-host`/`--client-port`.

#![warn(missing_docs)]

mod dispatch;
mod errors;
mod output;
mod reporter;
mod sample;

pub use dispatch::TestfxApp;
#[doc(hidden)]
pub use errors::*;
pub use output::{Color, OutputContext, OutputWriter, StderrStyles};
pub use sample::{SAMPLE_SOURCE_NAME, sample_source};
