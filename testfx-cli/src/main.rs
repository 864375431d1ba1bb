// Copyright (c) The testfx Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use clap::Parser;
use color_eyre::Result;
use std::sync::Arc;
use testfx_cli::{OutputWriter, TestfxApp, sample_source};

fn main() -> Result<()> {
    color_eyre::install()?;
    let _ = enable_ansi_support::enable_ansi_support();

    let app = TestfxApp::parse();
    let output = app.init_output();

    match app.exec(Arc::new(sample_source()), output, &mut OutputWriter::default()) {
        Ok(code) => std::process::exit(code),
        Err(error) => {
            error.display_to_stderr(&output.stderr_styles());
            std::process::exit(error.process_exit_code())
        }
    }
}
