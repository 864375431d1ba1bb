// Copyright (c) The testfx Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Command-line parsing and the console and server modes.

use crate::{
    ExpectedError, Result,
    output::{OutputContext, OutputOpts, OutputWriter},
    reporter::ConsoleReporter,
};
use camino::Utf8PathBuf;
use clap::{Args, Parser};
use std::{io::Write, sync::Arc};
use testfx_filtering::TreeNodeFilter;
use testfx_metadata::{TestfxExitCode, protocol::RunId};
use testfx_runner::{
    adapter::{ExecutionAdapter, ExecutionRequest, RequestKind, RunSummary, completion_notifier},
    bus::message_bus,
    config::{DefaultConfigWarnings, TestfxConfig},
    node::TestNodeUid,
    server::{MessageHandler, ServerTestHost},
    signal::SignalHandlerKind,
    source::TestSource,
    telemetry::{RemoteTelemetryClient, TelemetryClient, TelemetryCollector, TelemetrySession},
    test_filter::TestExecutionFilter,
};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const DEFAULT_CLIENT_HOST: &str = "127.0.0.1";

/// Discovers and runs tests, on the console or for a client over JSON-RPC.
#[derive(Debug, Parser)]
#[command(
    name = "testfx",
    version,
    styles = crate::output::clap_styles::style(),
    max_term_width = 100,
)]
pub struct TestfxApp {
    #[clap(flatten)]
    output: OutputOpts,

    /// Config file [default: .config/testfx.toml in the current directory]
    #[arg(long, global = true, value_name = "PATH", env = "TESTFX_CONFIG_FILE")]
    config_file: Option<Utf8PathBuf>,

    /// List tests instead of running them
    #[arg(long, conflicts_with = "server")]
    list_tests: bool,

    #[clap(flatten)]
    filter: FilterOpts,

    #[clap(flatten)]
    server: ServerOpts,
}

#[derive(Debug, Args)]
#[command(next_help_heading = "Filter options")]
struct FilterOpts {
    /// Only visit nodes matching this tree path filter, e.g. `/Math/*`
    #[arg(long, value_name = "FILTER", conflicts_with = "filter_uid")]
    treenode_filter: Option<String>,

    /// Only report the test with this uid (may be repeated)
    #[arg(long, value_name = "UID")]
    filter_uid: Vec<String>,
}

impl FilterOpts {
    fn build(&self) -> Result<TestExecutionFilter> {
        if let Some(filter) = &self.treenode_filter {
            let filter = TreeNodeFilter::parse(filter)
                .map_err(|errors| ExpectedError::FilterParseError { errors })?;
            return Ok(TestExecutionFilter::TreeNode(filter));
        }
        if !self.filter_uid.is_empty() {
            return Ok(TestExecutionFilter::UidList(
                self.filter_uid.iter().map(TestNodeUid::new).collect(),
            ));
        }
        Ok(TestExecutionFilter::Nop)
    }
}

#[derive(Debug, Args)]
#[command(next_help_heading = "Server options")]
struct ServerOpts {
    /// Serve a client instead of running on the console [default protocol: jsonrpc]
    #[arg(long, value_name = "PROTOCOL", num_args = 0..=1, default_missing_value = "jsonrpc")]
    server: Option<String>,

    /// Listen on this port; 0 lets the OS pick one [default: 0]
    #[arg(long, requires = "server", conflicts_with = "client_port")]
    port: Option<u16>,

    /// Connect to a client on this host [default: 127.0.0.1]
    #[arg(long, requires = "client_port", value_name = "HOST")]
    client_host: Option<String>,

    /// Connect to a client listening on this port
    #[arg(long, requires = "server", value_name = "PORT")]
    client_port: Option<u16>,
}

/// How the server reaches its client.
#[derive(Clone, Debug, PartialEq, Eq)]
enum ServerBinding {
    Listen { port: u16 },
    Connect { host: String, port: u16 },
}

impl ServerOpts {
    /// Returns the binding if server mode was requested.
    fn binding(&self) -> Result<Option<ServerBinding>> {
        let Some(protocol) = &self.server else {
            return Ok(None);
        };
        if !protocol.eq_ignore_ascii_case("jsonrpc") {
            return Err(ExpectedError::UnknownServerProtocol {
                protocol: protocol.clone(),
            });
        }

        let binding = match self.client_port {
            Some(port) => ServerBinding::Connect {
                host: self
                    .client_host
                    .clone()
                    .unwrap_or_else(|| DEFAULT_CLIENT_HOST.to_owned()),
                port,
            },
            None => ServerBinding::Listen {
                port: self.port.unwrap_or(0),
            },
        };
        Ok(Some(binding))
    }
}

impl TestfxApp {
    /// Initializes logging and returns the output context.
    pub fn init_output(&self) -> OutputContext {
        self.output.init()
    }

    /// Executes the app against `source`, returning the process exit code.
    pub fn exec(
        self,
        source: Arc<dyn TestSource>,
        output: OutputContext,
        output_writer: &mut OutputWriter,
    ) -> Result<i32> {
        self.exec_with(source, output, output_writer, SignalHandlerKind::Standard)
    }

    fn exec_with(
        self,
        source: Arc<dyn TestSource>,
        output: OutputContext,
        output_writer: &mut OutputWriter,
        signal_handler: SignalHandlerKind,
    ) -> Result<i32> {
        // Bad arguments and configuration are reported before anything starts running.
        let binding = self.server.binding()?;
        let filter = self.filter.build()?;
        let config = self.load_config()?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("testfx-worker")
            .build()
            .map_err(|error| ExpectedError::RuntimeCreate { error })?;

        runtime.block_on(async move {
            let app_token = CancellationToken::new();
            let watcher = signal_handler.spawn_shutdown_watcher(app_token.clone())?;
            let adapter = ExecutionAdapter::new(source, &config.execution);

            let result = match binding {
                Some(binding) => {
                    run_server(binding, adapter, config, output_writer, &app_token).await
                }
                None => {
                    let kind = if self.list_tests {
                        RequestKind::Discover
                    } else {
                        RequestKind::Run
                    };
                    run_console(kind, filter, &adapter, output, output_writer, &app_token).await
                }
            };

            watcher.abort();
            result
        })
    }

    fn load_config(&self) -> Result<TestfxConfig> {
        let cwd = std::env::current_dir().map_err(|error| ExpectedError::CurrentDir { error })?;
        let cwd = Utf8PathBuf::try_from(cwd)
            .map_err(|error| ExpectedError::CurrentDirNotUtf8 { error })?;
        let config = TestfxConfig::from_sources(
            cwd,
            self.config_file.as_deref(),
            std::env::vars(),
            &mut DefaultConfigWarnings,
        )?;
        Ok(config)
    }
}

async fn run_console(
    kind: RequestKind,
    filter: TestExecutionFilter,
    adapter: &ExecutionAdapter,
    output: OutputContext,
    output_writer: &mut OutputWriter,
    app_token: &CancellationToken,
) -> Result<i32> {
    let request = ExecutionRequest {
        run_id: RunId::new_v4(),
        kind,
        filter,
    };
    debug!(run_id = %request.run_id, %kind, source = adapter.source_name(), "starting console request");

    let (bus, receiver) = message_bus();
    // The summary is returned by execute_request directly.
    let (notifier, _completion) = completion_notifier();
    let token = app_token.child_token();
    let execute = async move {
        let result = adapter.execute_request(&request, &bus, notifier, token).await;
        // Closing the bus lets the reporter finish.
        drop(bus);
        result
    };

    let mut reporter = ConsoleReporter::new(
        output_writer.stdout_writer(),
        output.reporter_styles(),
        output.verbose,
    );
    let (summary, reported) = tokio::join!(execute, reporter.report(kind, receiver));
    reported.map_err(ExpectedError::write_output)?;
    let summary = summary?;

    if kind == RequestKind::Run {
        reporter
            .write_summary(&summary)
            .map_err(ExpectedError::write_output)?;
    }

    Ok(console_exit_code(kind, &summary, app_token.is_cancelled()))
}

fn console_exit_code(kind: RequestKind, summary: &RunSummary, cancelled: bool) -> i32 {
    if cancelled {
        return TestfxExitCode::TEST_SESSION_ABORTED;
    }
    match kind {
        RequestKind::Discover if summary.discovered == 0 => TestfxExitCode::ZERO_TESTS,
        RequestKind::Discover => TestfxExitCode::OK,
        RequestKind::Run if !summary.is_success() => TestfxExitCode::TEST_RUN_FAILED,
        RequestKind::Run if summary.executed() == 0 => TestfxExitCode::ZERO_TESTS,
        RequestKind::Run => TestfxExitCode::OK,
    }
}

async fn run_server(
    binding: ServerBinding,
    adapter: ExecutionAdapter,
    config: TestfxConfig,
    output_writer: &mut OutputWriter,
    app_token: &CancellationToken,
) -> Result<i32> {
    let stream = match binding {
        ServerBinding::Listen { port } => {
            let listener = TcpListener::bind((DEFAULT_CLIENT_HOST, port))
                .await
                .map_err(|error| ExpectedError::ServerBind { port, error })?;
            let addr = listener
                .local_addr()
                .map_err(|error| ExpectedError::ServerBind { port, error })?;

            // Clients passing port 0 learn the real port from this line.
            let mut stdout = output_writer.stdout_writer();
            writeln!(stdout, "Listening on {addr}").map_err(ExpectedError::write_output)?;
            stdout.flush().map_err(ExpectedError::write_output)?;

            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) =
                        accepted.map_err(|error| ExpectedError::ServerBind { port, error })?;
                    info!(%peer, "client connected");
                    stream
                }
                () = app_token.cancelled() => {
                    return Ok(TestfxExitCode::TEST_SESSION_ABORTED);
                }
            }
        }
        ServerBinding::Connect { host, port } => {
            let stream = TcpStream::connect((host.as_str(), port))
                .await
                .map_err(|error| ExpectedError::ServerConnect {
                    host: host.clone(),
                    port,
                    error,
                })?;
            info!(%host, port, "connected to client");
            stream
        }
    };
    // Updates are small and latency matters more than throughput.
    if let Err(error) = stream.set_nodelay(true) {
        debug!(%error, "failed to set TCP_NODELAY");
    }

    let handler = Arc::new(MessageHandler::new(stream, config.server.max_message_size));
    let client: Arc<dyn TelemetryClient> = Arc::new(RemoteTelemetryClient::new(handler.clone()));
    let collector =
        TelemetryCollector::start(TelemetrySession::from_env(), client, &config.telemetry);

    let host = ServerTestHost::new(handler, Arc::new(adapter), config.server, app_token)
        .with_telemetry(collector.logger());
    let result = host.run().await;
    collector.shutdown().await;
    result?;

    if app_token.is_cancelled() {
        Ok(TestfxExitCode::TEST_SESSION_ABORTED)
    } else {
        Ok(TestfxExitCode::OK)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{output::Color, sample::sample_source};
    use clap::error::ErrorKind;
    use test_case::test_case;

    fn parse(args: &[&str]) -> std::result::Result<TestfxApp, clap::Error> {
        TestfxApp::try_parse_from(std::iter::once("testfx").chain(args.iter().copied()))
    }

    fn run(args: &[&str]) -> (Result<i32>, String) {
        let app = parse(args).expect("arguments are valid");
        let output = OutputContext {
            verbose: false,
            color: Color::Never,
        };
        let mut writer = OutputWriter::Test { stdout: Vec::new() };
        let result = app.exec_with(
            Arc::new(sample_source()),
            output,
            &mut writer,
            SignalHandlerKind::Noop,
        );
        let OutputWriter::Test { stdout } = writer else {
            unreachable!("test writer was passed in");
        };
        (result, String::from_utf8(stdout).expect("output is UTF-8"))
    }

    #[test]
    fn server_options() {
        let app = parse(&["--server"]).expect("protocol is optional");
        assert_eq!(
            app.server.binding().expect("jsonrpc is known"),
            Some(ServerBinding::Listen { port: 0 })
        );

        let app = parse(&["--server", "jsonrpc", "--port", "9000"]).expect("valid");
        assert_eq!(
            app.server.binding().expect("jsonrpc is known"),
            Some(ServerBinding::Listen { port: 9000 })
        );

        let app = parse(&["--server", "--client-port", "5000"]).expect("valid");
        assert_eq!(
            app.server.binding().expect("jsonrpc is known"),
            Some(ServerBinding::Connect {
                host: "127.0.0.1".to_owned(),
                port: 5000
            })
        );

        let app = parse(&["--server", "grpc"]).expect("protocol is checked later");
        assert!(matches!(
            app.server.binding(),
            Err(ExpectedError::UnknownServerProtocol { protocol }) if protocol == "grpc"
        ));

        let app = parse(&[]).expect("no arguments is valid");
        assert_eq!(app.server.binding().expect("no server"), None);
    }

    #[test_case(&["--port", "9000"], ErrorKind::MissingRequiredArgument; "port without server")]
    #[test_case(&["--server", "--port", "1", "--client-port", "2"], ErrorKind::ArgumentConflict; "listen and connect")]
    #[test_case(&["--list-tests", "--server"], ErrorKind::ArgumentConflict; "list in server mode")]
    #[test_case(&["--treenode-filter", "/A", "--filter-uid", "B"], ErrorKind::ArgumentConflict; "both filters")]
    #[test_case(&["--client-host", "localhost"], ErrorKind::MissingRequiredArgument; "host without port")]
    fn invalid_arguments(args: &[&str], kind: ErrorKind) {
        let error = parse(args).expect_err("arguments are invalid");
        assert_eq!(error.kind(), kind);
    }

    #[test]
    fn console_run() {
        let (result, stdout) = run(&[]);
        assert_eq!(result.expect("run completes"), TestfxExitCode::TEST_RUN_FAILED);

        for expected in [
            "PASS",
            "Math.Add",
            "Math.Square [2]",
            "FAIL",
            "Strings.Reverse",
            "expected `cab`, got `cba`",
            "ERROR",
            "attempted to divide by zero",
            "SKIP",
            "(not supported on this platform)",
        ] {
            assert!(stdout.contains(expected), "`{expected}` in:\n{stdout}");
        }
        assert!(
            stdout.ends_with("Summary 8 tests run: 5 passed, 1 failed, 1 errored, 1 skipped\n"),
            "summary in:\n{stdout}"
        );
    }

    #[test_case(&["--treenode-filter", "/Math/Add"], TestfxExitCode::OK, "1 test run: 1 passed"; "passing filter")]
    #[test_case(&["--filter-uid", "Math.Square [1]"], TestfxExitCode::OK, "1 test run: 1 passed"; "single expansion")]
    #[test_case(&["--treenode-filter", "/Nothing"], TestfxExitCode::ZERO_TESTS, "0 tests run: 0 passed"; "no match")]
    #[test_case(&["--filter-uid", "Math.Divide"], TestfxExitCode::TEST_RUN_FAILED, "1 errored"; "error")]
    fn console_filters(args: &[&str], exit_code: i32, summary: &str) {
        let (result, stdout) = run(args);
        assert_eq!(result.expect("run completes"), exit_code);
        assert!(stdout.contains(summary), "`{summary}` in:\n{stdout}");
    }

    #[test]
    fn list_tests() {
        let (result, stdout) = run(&["--list-tests", "--treenode-filter", "/Strings/*"]);
        assert_eq!(result.expect("listing completes"), TestfxExitCode::OK);
        assert_eq!(stdout, "Strings.Upper\nStrings.Reverse\nStrings.Unicode\n");
    }

    #[test]
    fn invalid_filter() {
        let (result, stdout) = run(&["--treenode-filter", "Math"]);
        let error = result.expect_err("filter is invalid");
        assert!(matches!(error, ExpectedError::FilterParseError { .. }));
        assert_eq!(error.process_exit_code(), TestfxExitCode::INVALID_COMMAND_LINE);
        assert_eq!(stdout, "");
    }

    #[test]
    fn unknown_protocol() {
        let (result, _) = run(&["--server", "grpc"]);
        let error = result.expect_err("protocol is unknown");
        assert_eq!(error.process_exit_code(), TestfxExitCode::INVALID_CONFIGURATION);
    }
}
