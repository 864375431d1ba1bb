// Copyright (c) The testfx Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Console output for test lists and runs.

use crate::output::ReporterStyles;
use owo_colors::{OwoColorize, Style};
use std::{
    io::{self, Write},
    time::Duration,
};
use swrite::{SWrite, swrite};
use testfx_metadata::NodeType;
use testfx_runner::{
    adapter::{RequestKind, RunSummary},
    bus::{MessageBusReceiver, TestNodeUpdateMessage},
    node::TestNodeState,
    plural,
};

/// Prints test node updates as they arrive.
pub(crate) struct ConsoleReporter<W> {
    writer: W,
    styles: ReporterStyles,
    verbose: bool,
}

impl<W: Write> ConsoleReporter<W> {
    pub(crate) fn new(writer: W, styles: ReporterStyles, verbose: bool) -> Self {
        Self {
            writer,
            styles,
            verbose,
        }
    }

    /// Prints every update published on `receiver` until the bus closes.
    pub(crate) async fn report(
        &mut self,
        kind: RequestKind,
        mut receiver: MessageBusReceiver,
    ) -> io::Result<()> {
        while let Some(update) = receiver.recv().await {
            match kind {
                RequestKind::Discover => self.write_listed(&update)?,
                RequestKind::Run => self.write_result(&update)?,
            }
        }
        self.writer.flush()
    }

    fn write_listed(&mut self, update: &TestNodeUpdateMessage) -> io::Result<()> {
        let node = &update.node;
        if node.node_type != NodeType::Action {
            return Ok(());
        }
        if self.verbose {
            writeln!(
                self.writer,
                "{} {}",
                node.uid,
                node.display_name.style(self.styles.dimmed)
            )
        } else {
            writeln!(self.writer, "{}", node.uid)
        }
    }

    fn write_result(&mut self, update: &TestNodeUpdateMessage) -> io::Result<()> {
        let node = &update.node;
        let Some(state) = node.properties.state() else {
            return Ok(());
        };
        let duration = node.properties.timing().map(|timing| timing.duration);

        let (status, style) = match state {
            TestNodeState::Discovered => return Ok(()),
            TestNodeState::InProgress => {
                if !self.verbose {
                    return Ok(());
                }
                ("START", self.styles.dimmed)
            }
            TestNodeState::Passed => ("PASS", self.styles.pass),
            TestNodeState::Failed(_) => ("FAIL", self.styles.fail),
            TestNodeState::Error(_) => ("ERROR", self.styles.fail),
            TestNodeState::Skipped { .. } => ("SKIP", self.styles.skip),
            TestNodeState::Timeout { .. } => ("TIMEOUT", self.styles.fail),
            TestNodeState::Cancelled => ("CANCEL", self.styles.skip),
        };

        let mut line = String::new();
        swrite!(line, "{:>9} ", status.style(style));
        swrite!(line, "{} ", format_duration(duration));
        line.push_str(node.uid.as_str());
        if let TestNodeState::Skipped {
            reason: Some(reason),
        } = state
        {
            swrite!(line, " ({})", reason.style(self.styles.dimmed));
        }
        writeln!(self.writer, "{line}")?;

        match state {
            TestNodeState::Failed(failure) | TestNodeState::Error(failure) => {
                for message_line in failure.message().lines() {
                    writeln!(self.writer, "          {message_line}")?;
                }
                if self.verbose
                    && let Some(stack_trace) = failure.stack_trace()
                {
                    for trace_line in stack_trace.lines() {
                        writeln!(
                            self.writer,
                            "          {}",
                            trace_line.style(self.styles.dimmed)
                        )?;
                    }
                }
            }
            TestNodeState::Timeout { timeout } => {
                writeln!(
                    self.writer,
                    "          exceeded timeout of {}",
                    format_timeout(*timeout)
                )?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Prints the final summary of a run.
    pub(crate) fn write_summary(&mut self, summary: &RunSummary) -> io::Result<()> {
        let executed = summary.executed();
        let mut line = String::new();
        swrite!(
            line,
            "{:>9} {} {} run: ",
            "Summary".style(self.styles.count),
            executed.style(self.styles.count),
            plural::tests_str(executed),
        );

        let passed_style = if summary.passed > 0 {
            self.styles.pass
        } else {
            Style::new()
        };
        swrite!(line, "{} passed", summary.passed.style(passed_style));
        for (count, label, style) in [
            (summary.failed, "failed", self.styles.fail),
            (summary.errored, "errored", self.styles.fail),
            (summary.timed_out, "timed out", self.styles.fail),
            (summary.skipped, "skipped", self.styles.skip),
            (summary.cancelled, "cancelled", self.styles.skip),
        ] {
            if count > 0 {
                swrite!(line, ", {} {label}", count.style(style));
            }
        }
        writeln!(self.writer, "{line}")?;
        self.writer.flush()
    }

    pub(crate) fn into_inner(self) -> W {
        self.writer
    }
}

fn format_duration(duration: Option<Duration>) -> String {
    match duration {
        Some(duration) => format!("[{:>8.3}s]", duration.as_secs_f64()),
        None => format!("[{:>9}]", ""),
    }
}

fn format_timeout(duration: Duration) -> String {
    format!("{}ms", duration.as_millis())
}
