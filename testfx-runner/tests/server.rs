// Copyright (c) The testfx Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Full server-mode sessions over an in-memory connection.

use bytes::BytesMut;
use futures::StreamExt;
use pretty_assertions::assert_eq;
use semver::Version;
use serde_json::{Value, json};
use std::{collections::BTreeMap, sync::Arc, time::Duration};
use testfx_metadata::{
    ErrorCodes, ExecutionState, RequestId, RpcMessage, keys, methods,
    protocol::{InitializeResponseArgs, RunId, TestNodeUpdate, TestNodeUpdatesArgs},
};
use testfx_runner::{
    adapter::ExecutionAdapter,
    config::{ExecutionConfig, ServerConfig},
    errors::TransportError,
    node::{FileLocationProperty, Property, TestArguments, TestFailure, TestNode},
    server::{ClientFeature, CompatRule, MessageHandler, RpcCodec, ServerTestHost},
    source::StaticTestSource,
};
use tokio::{
    io::{AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf},
    task::JoinHandle,
};
use tokio_util::{
    codec::{Encoder, FramedRead},
    sync::CancellationToken,
};

const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

struct Client {
    reader: FramedRead<ReadHalf<DuplexStream>, RpcCodec>,
    writer: WriteHalf<DuplexStream>,
}

impl Client {
    async fn send(&mut self, message: RpcMessage) {
        let mut frame = BytesMut::new();
        RpcCodec::new(MAX_MESSAGE_SIZE)
            .encode(&message, &mut frame)
            .unwrap();
        self.send_raw(&frame).await;
    }

    async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    async fn recv(&mut self) -> RpcMessage {
        tokio::time::timeout(Duration::from_secs(30), self.reader.next())
            .await
            .expect("server replied in time")
            .expect("connection is open")
            .expect("valid message")
    }

    /// Reads messages until the reply to `id`, returning the test updates received on the way.
    async fn collect_until_reply(&mut self, id: i64) -> (Vec<TestNodeUpdate>, RpcMessage) {
        let mut updates = Vec::new();
        loop {
            match self.recv().await {
                RpcMessage::Notification(notification)
                    if notification.method == methods::TEST_UPDATES =>
                {
                    let args: TestNodeUpdatesArgs =
                        serde_json::from_value(notification.params.unwrap()).unwrap();
                    updates.extend(args.changes);
                }
                RpcMessage::Response(response) if response.id == RequestId::Number(id) => {
                    return (updates, RpcMessage::Response(response));
                }
                RpcMessage::Error(error) if error.id == Some(RequestId::Number(id)) => {
                    return (updates, RpcMessage::Error(error));
                }
                other => panic!("unexpected message while waiting for {id}: {other:?}"),
            }
        }
    }

    /// Reads messages until `uid` reports being in progress.
    async fn wait_in_progress(&mut self, uid: &str) {
        loop {
            if let RpcMessage::Notification(notification) = self.recv().await {
                let args: TestNodeUpdatesArgs =
                    serde_json::from_value(notification.params.unwrap()).unwrap();
                if args.changes.iter().any(|change| {
                    change.node.uid == uid
                        && change.node.execution_state == Some(ExecutionState::InProgress)
                }) {
                    return;
                }
            }
        }
    }

    async fn initialize(&mut self, id: i64, name: &str, version: &str) -> InitializeResponseArgs {
        self.send(RpcMessage::request(
            id,
            methods::INITIALIZE,
            json!({
                "processId": 4242,
                "clientInfo": { "name": name, "version": version },
                "capabilities": { "testing": { "debuggerProvider": false } },
            }),
        ))
        .await;
        let RpcMessage::Response(response) = self.recv().await else {
            panic!("initialize succeeds");
        };
        assert_eq!(response.id, RequestId::Number(id));

        let log = self.recv().await;
        assert_eq!(log.method(), Some(methods::CLIENT_LOG));

        serde_json::from_value(response.result).unwrap()
    }
}

struct TestHost {
    client: Client,
    host: JoinHandle<Result<(), TransportError>>,
    app_token: CancellationToken,
}

fn start_host(roots: Vec<TestNode>) -> TestHost {
    let (server_stream, client_stream) = tokio::io::duplex(64 * 1024);
    let config = ServerConfig {
        idle_flush_delay: Duration::from_millis(10),
        session_end_flush_timeout: Duration::from_secs(5),
        max_message_size: MAX_MESSAGE_SIZE,
        compat: vec![CompatRule {
            client: "old-ide".to_owned(),
            min_version: Version::new(2, 0, 0),
            feature: ClientFeature::LocationReporting,
        }],
    };

    let source = Arc::new(StaticTestSource::new("sample", roots));
    let adapter = Arc::new(ExecutionAdapter::new(source, &ExecutionConfig::default()));
    let handler = Arc::new(MessageHandler::new(server_stream, MAX_MESSAGE_SIZE));
    let app_token = CancellationToken::new();
    let host = ServerTestHost::new(handler, adapter, config, &app_token);

    let (reader, writer) = tokio::io::split(client_stream);
    TestHost {
        client: Client {
            reader: FramedRead::new(reader, RpcCodec::new(MAX_MESSAGE_SIZE)),
            writer,
        },
        host: tokio::spawn(host.run()),
        app_token,
    }
}

fn sample_tree() -> Vec<TestNode> {
    vec![TestNode::group(
        "suite",
        "Suite",
        [
            TestNode::action("suite.pass", "Pass", |_| Ok(())),
            TestNode::action("suite.fail", "Fail", |_| {
                Err(TestFailure::assertion("expected 1, got 2"))
            }),
            TestNode::parameterized(
                "suite.params",
                "Params",
                || [TestArguments::new([json!(0)]), TestArguments::new([json!(1)])],
                |_, args| {
                    if args.get(0) == Some(&json!(1)) {
                        Err(TestFailure::assertion("1 is odd"))
                    } else {
                        Ok(())
                    }
                },
            ),
        ],
    )]
}

fn slow_tree() -> Vec<TestNode> {
    vec![TestNode::group(
        "slow-suite",
        "SlowSuite",
        [
            TestNode::action("slow", "Slow", |ctx| {
                while !ctx.is_cancelled() {
                    std::thread::sleep(Duration::from_millis(5));
                }
                Ok(())
            }),
            TestNode::action("after", "After", |_| Ok(())),
        ],
    )]
}

fn run_params(filter: Value) -> Value {
    let mut params = json!({ "runId": RunId::new_v4() });
    if let (Some(params), Value::Object(filter)) = (params.as_object_mut(), filter) {
        params.extend(filter);
    }
    params
}

/// The last state reported for each uid.
fn final_states(updates: &[TestNodeUpdate]) -> BTreeMap<String, ExecutionState> {
    updates
        .iter()
        .filter_map(|update| Some((update.node.uid.clone(), update.node.execution_state?)))
        .collect()
}

fn error_code(message: &RpcMessage) -> i32 {
    match message {
        RpcMessage::Error(error) => error.code,
        other => panic!("expected an error, got {other:?}"),
    }
}

#[tokio::test]
async fn discover_and_run() {
    let TestHost {
        mut client, host, ..
    } = start_host(sample_tree());

    client
        .send(RpcMessage::request(
            1,
            methods::DISCOVER_TESTS,
            run_params(json!({})),
        ))
        .await;
    let (_, reply) = client.collect_until_reply(1).await;
    assert_eq!(error_code(&reply), ErrorCodes::SERVER_NOT_INITIALIZED);

    let response = client.initialize(2, "test-client", "1.0.0").await;
    assert_eq!(response.server_info.name, "testfx");
    assert!(response.capabilities.testing.supports_discovery);
    assert!(response.capabilities.testing.multi_request_support);

    // Discovery reports every node, including groups and parameterized parents.
    let run_id = RunId::new_v4();
    client
        .send(RpcMessage::request(
            3,
            methods::DISCOVER_TESTS,
            json!({ "runId": run_id }),
        ))
        .await;
    let (updates, reply) = client.collect_until_reply(3).await;
    assert_eq!(reply, RpcMessage::response(RequestId::Number(3), json!({})));
    let states = final_states(&updates);
    assert_eq!(
        states.keys().map(String::as_str).collect::<Vec<_>>(),
        vec![
            "suite",
            "suite.fail",
            "suite.params",
            "suite.params [0]",
            "suite.params [1]",
            "suite.pass",
        ]
    );
    assert!(
        states
            .values()
            .all(|state| *state == ExecutionState::Discovered)
    );
    assert_eq!(
        updates
            .iter()
            .find(|update| update.node.uid == "suite.pass")
            .and_then(|update| update.parent.as_deref()),
        Some("suite")
    );

    // Run what the filter selects; parameterized children follow their parent.
    client
        .send(RpcMessage::request(
            4,
            methods::RUN_TESTS,
            run_params(json!({ "graphFilter": "/Suite/P*" })),
        ))
        .await;
    let (updates, reply) = client.collect_until_reply(4).await;
    assert_eq!(
        reply,
        RpcMessage::response(RequestId::Number(4), json!({ "attachments": [] }))
    );
    assert_eq!(
        final_states(&updates),
        BTreeMap::from([
            ("suite.params [0]".to_owned(), ExecutionState::Passed),
            ("suite.params [1]".to_owned(), ExecutionState::Failed),
            ("suite.pass".to_owned(), ExecutionState::Passed),
        ])
    );
    let failed = updates
        .iter()
        .find(|update| update.node.execution_state == Some(ExecutionState::Failed))
        .unwrap();
    assert_eq!(
        failed.node.properties[keys::ERROR_MESSAGE],
        json!("1 is odd")
    );
    assert!(failed.node.properties.contains_key(keys::TIME_DURATION_MS));

    // Run a uid list.
    client
        .send(RpcMessage::request(
            5,
            methods::RUN_TESTS,
            run_params(json!({ "tests": [{ "uid": "suite.fail", "display-name": "Fail" }] })),
        ))
        .await;
    let (updates, _) = client.collect_until_reply(5).await;
    assert_eq!(
        final_states(&updates),
        BTreeMap::from([("suite.fail".to_owned(), ExecutionState::Failed)])
    );

    client
        .send(RpcMessage::notification(methods::EXIT, Value::Null))
        .await;
    host.await.unwrap().unwrap();
}

#[tokio::test]
async fn protocol_errors() {
    let TestHost {
        mut client, host, ..
    } = start_host(sample_tree());

    let body = "{oops";
    client
        .send_raw(format!("Content-Length: {}\r\n\r\n{body}", body.len()).as_bytes())
        .await;
    let RpcMessage::Error(error) = client.recv().await else {
        panic!("malformed frames get a parse error");
    };
    assert_eq!((error.id, error.code), (None, ErrorCodes::PARSE_ERROR));

    client
        .send(RpcMessage::request(1, methods::INITIALIZE, json!({ "processId": "x" })))
        .await;
    let (_, reply) = client.collect_until_reply(1).await;
    assert_eq!(error_code(&reply), ErrorCodes::INVALID_PARAMS);

    client.initialize(2, "test-client", "1.0.0").await;

    client
        .send(RpcMessage::request(3, methods::INITIALIZE, json!({})))
        .await;
    let (_, reply) = client.collect_until_reply(3).await;
    assert_eq!(error_code(&reply), ErrorCodes::INVALID_REQUEST);

    client
        .send(RpcMessage::request(4, "testing/bogus", json!({})))
        .await;
    let (_, reply) = client.collect_until_reply(4).await;
    assert_eq!(error_code(&reply), ErrorCodes::METHOD_NOT_FOUND);

    client
        .send(RpcMessage::request(
            5,
            methods::RUN_TESTS,
            run_params(json!({
                "tests": [{ "uid": "suite.pass", "display-name": "Pass" }],
                "graphFilter": "/Suite/Pass",
            })),
        ))
        .await;
    let (updates, reply) = client.collect_until_reply(5).await;
    assert_eq!(error_code(&reply), ErrorCodes::INVALID_PARAMS);
    assert!(updates.is_empty(), "nothing ran");

    // Closing the connection ends the session cleanly.
    drop(client);
    host.await.unwrap().unwrap();
}

#[tokio::test]
async fn cancel_request() {
    let TestHost {
        mut client, host, ..
    } = start_host(slow_tree());
    client.initialize(1, "test-client", "1.0.0").await;

    client
        .send(RpcMessage::request(2, methods::RUN_TESTS, run_params(json!({}))))
        .await;
    client.wait_in_progress("slow").await;

    client
        .send(RpcMessage::notification(
            methods::CANCEL_REQUEST,
            json!({ "id": 2 }),
        ))
        .await;
    let (updates, reply) = client.collect_until_reply(2).await;
    assert_eq!(error_code(&reply), ErrorCodes::REQUEST_CANCELLED);
    assert_eq!(
        final_states(&updates),
        BTreeMap::from([
            ("after".to_owned(), ExecutionState::Cancelled),
            ("slow".to_owned(), ExecutionState::Cancelled),
        ])
    );

    client
        .send(RpcMessage::notification(methods::EXIT, Value::Null))
        .await;
    host.await.unwrap().unwrap();
}

#[tokio::test]
async fn shutdown_cancels_in_flight_requests() {
    let TestHost {
        mut client,
        host,
        app_token,
    } = start_host(slow_tree());
    client.initialize(1, "test-client", "1.0.0").await;

    client
        .send(RpcMessage::request(2, methods::RUN_TESTS, run_params(json!({}))))
        .await;
    client.wait_in_progress("slow").await;

    app_token.cancel();
    let (_, reply) = client.collect_until_reply(2).await;
    assert_eq!(error_code(&reply), ErrorCodes::REQUEST_CANCELLED);
    host.await.unwrap().unwrap();
}

#[tokio::test]
async fn location_reporting_depends_on_client_version() {
    let tree = || {
        vec![
            TestNode::action("located", "Located", |_| Ok(())).with_property(
                Property::FileLocation(FileLocationProperty {
                    file: "tests/located.rs".to_owned(),
                    line_start: 10,
                    line_end: 20,
                }),
            ),
        ]
    };

    for (version, legacy) in [("1.4", true), ("2.0.0", false)] {
        let TestHost {
            mut client, host, ..
        } = start_host(tree());
        client.initialize(1, "old-ide", version).await;
        client
            .send(RpcMessage::request(
                2,
                methods::DISCOVER_TESTS,
                run_params(json!({})),
            ))
            .await;
        let (updates, _) = client.collect_until_reply(2).await;
        let properties = &updates[0].node.properties;

        assert_eq!(properties[keys::LOCATION_FILE], json!("tests/located.rs"));
        if legacy {
            assert_eq!(properties[keys::LOCATION_LINE], json!(10), "version {version}");
            assert!(!properties.contains_key(keys::LOCATION_LINE_START));
        } else {
            assert_eq!(properties[keys::LOCATION_LINE_START], json!(10), "version {version}");
            assert_eq!(properties[keys::LOCATION_LINE_END], json!(20));
            assert!(!properties.contains_key(keys::LOCATION_LINE));
        }

        drop(client);
        host.await.unwrap().unwrap();
    }
}
