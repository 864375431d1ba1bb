// Copyright (c) The testfx Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Standalone filter parser
//!
//! Useful for manually testing the parsing result

use clap::Parser;
use testfx_filtering::{TreeNodeFilter, errors::TreeNodeFilterParseErrors};

#[derive(Debug, Parser)]
struct Args {
    /// Display names of a node to match the filter against, from the root down
    #[clap(long = "path", value_delimiter = ',')]
    path: Vec<String>,

    /// The filter to parse
    filter: String,
}

fn main() {
    let args = Args::parse();

    match TreeNodeFilter::parse(&args.filter) {
        Ok(filter) => {
            println!("{filter:?}");
            println!("canonical form: {filter}");
            if !args.path.is_empty() {
                println!("matches {:?}: {}", args.path, filter.matches(&args.path, &()));
            }
        }
        Err(TreeNodeFilterParseErrors { input, errors, .. }) => {
            for error in errors {
                let report = miette::Report::new(error).with_source_code(input.clone());
                eprintln!("{report:?}");
            }
            std::process::exit(1);
        }
    }
}
