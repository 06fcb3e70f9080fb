//! Drives the real subprocess transport against `/bin/sh` stand-ins for the CLI.
#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use serde_json::json;
use tempfile::TempDir;

use claude_agent_sdk::config::ClaudeAgentOptions;
use claude_agent_sdk::error::SdkError;
use claude_agent_sdk::message::{ContentBlock, Message};
use claude_agent_sdk::transport::subprocess_cli::{PromptMode, SubprocessCliTransport};
use claude_agent_sdk::transport::{InboundFrame, Transport};

// Writing an executable while another test forks can fail with ETXTBSY;
// script creation and spawning are serialized.
static SPAWN_LOCK: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

fn mock_cli(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("claude");
    let script = format!(
        "#!/bin/sh\nif [ \"$1\" = \"-v\" ]; then\n  echo \"2.1.0 (Claude Code)\"\n  exit 0\nfi\n{body}\n"
    );
    std::fs::write(&path, script).expect("write mock cli");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("make mock cli executable");
    path
}

async fn connect_mock(
    body: &str,
    prompt: PromptMode,
    configure: impl FnOnce(ClaudeAgentOptions) -> ClaudeAgentOptions,
) -> (TempDir, SubprocessCliTransport) {
    let dir = tempfile::tempdir().expect("tempdir");
    let _guard = SPAWN_LOCK.lock().await;
    let cli = mock_cli(dir.path(), body);
    let options = configure(ClaudeAgentOptions::new().with_cli_path(&cli));
    let transport = SubprocessCliTransport::new(prompt, options);
    transport.connect().await.expect("mock cli should start");
    (dir, transport)
}

async fn drain(transport: &SubprocessCliTransport) -> Vec<Result<InboundFrame, SdkError>> {
    tokio::time::timeout(
        Duration::from_secs(10),
        transport.read_messages().collect::<Vec<_>>(),
    )
    .await
    .expect("mock cli output should end")
}

fn message(frame: &Result<InboundFrame, SdkError>) -> &Message {
    match frame {
        Ok(InboundFrame::Message(message)) => message,
        other => panic!("expected message frame, got {other:?}"),
    }
}

#[tokio::test]
async fn messages_arrive_in_write_order() {
    let body = r#"
echo '{"type":"system","subtype":"init","data":{"session_id":"s1"}}'
echo '{"type":"assistant","message":{"model":"m","content":[{"type":"text","text":"Hello!"}]}}'
echo '{"type":"result","subtype":"success","duration_ms":1000,"duration_api_ms":900,"is_error":false,"num_turns":1,"session_id":"s1"}'
"#;
    let (_dir, transport) = connect_mock(body, PromptMode::Text("hi".into()), |o| o).await;

    let frames = drain(&transport).await;
    assert_eq!(frames.len(), 3);

    match message(&frames[0]) {
        Message::System(system) => assert_eq!(system.subtype, "init"),
        other => panic!("expected system message, got {other:?}"),
    }
    match message(&frames[1]) {
        Message::Assistant(assistant) => {
            assert_eq!(
                assistant.content,
                vec![ContentBlock::Text(claude_agent_sdk::message::TextBlock {
                    text: "Hello!".into()
                })]
            );
        }
        other => panic!("expected assistant message, got {other:?}"),
    }
    match message(&frames[2]) {
        Message::Result(result) => assert_eq!(result.duration_ms, 1000),
        other => panic!("expected result message, got {other:?}"),
    }

    transport.close().await.expect("close");
    assert!(transport.exit_status().is_some_and(|status| status.success()));
}

#[tokio::test]
async fn object_split_across_lines_is_reassembled() {
    let body = r#"
printf '{"type":"assistant",\n"model":"m",\n"content":[{"type":"text","text":"split"}]}\n'
"#;
    let (_dir, transport) = connect_mock(body, PromptMode::Text("hi".into()), |o| o).await;

    let frames = drain(&transport).await;
    assert_eq!(frames.len(), 1);
    assert!(matches!(message(&frames[0]), Message::Assistant(a) if a.model == "m"));
    transport.close().await.expect("close");
}

#[tokio::test]
async fn multibyte_character_split_by_a_newline_is_rejoined() {
    let body = r#"
printf '{"type":"system","subtype":"h\303\n\251llo","data":{}}\n{"type":"system","subtype":"after","data":{}}\n'
"#;
    let (_dir, transport) = connect_mock(body, PromptMode::Text("hi".into()), |o| o).await;

    let frames = drain(&transport).await;
    assert_eq!(frames.len(), 2, "unexpected frames: {frames:?}");
    assert!(matches!(message(&frames[0]), Message::System(s) if s.subtype == "h\u{e9}llo"));
    assert!(matches!(message(&frames[1]), Message::System(s) if s.subtype == "after"));
    transport.close().await.expect("close");
}

#[tokio::test]
async fn invalid_utf8_does_not_stall_a_chatty_child() {
    let body = r#"
printf '\377\n'
i=0
while [ $i -lt 2000 ]; do
  echo '{"type":"system","subtype":"tick","data":{}}'
  i=$((i+1))
done
echo '{"type":"system","subtype":"last","data":{}}'
"#;
    let (_dir, transport) = connect_mock(body, PromptMode::Text("hi".into()), |o| {
        o.with_max_buffer_size(256)
    })
    .await;

    let frames = drain(&transport).await;
    assert!(frames
        .iter()
        .any(|frame| matches!(frame, Err(SdkError::JsonDecode(_)))));
    let last = frames.last().expect("frames");
    assert!(matches!(message(last), Message::System(s) if s.subtype == "last"));

    transport.close().await.expect("close");
    assert!(transport.exit_status().is_some_and(|status| status.success()));
}

#[tokio::test]
async fn oversized_object_is_reported_then_reading_continues() {
    let padding = "x".repeat(200);
    let body = format!(
        "echo '{{\"type\":\"system\",\"subtype\":\"big\",\"data\":{{\"pad\":\"{padding}\"}}}}'\n\
         echo '{{\"type\":\"system\",\"subtype\":\"start\",\"data\":{{}}}}'"
    );
    let (_dir, transport) = connect_mock(&body, PromptMode::Text("hi".into()), |o| {
        o.with_max_buffer_size(128)
    })
    .await;

    let frames = drain(&transport).await;
    assert_eq!(frames.len(), 2);
    match &frames[0] {
        Err(SdkError::JsonDecode(err)) => {
            assert!(err.message().contains("maximum buffer size of 128 bytes"));
        }
        other => panic!("expected JsonDecode error, got {other:?}"),
    }
    assert!(matches!(message(&frames[1]), Message::System(s) if s.subtype == "start"));
    transport.close().await.expect("close");
}

#[tokio::test]
async fn writes_reach_the_child_stdin() {
    let body = r#"
read -r line
printf '{"type":"system","subtype":"echo","data":%s}\n' "$line"
"#;
    let (_dir, transport) = connect_mock(body, PromptMode::Streaming, |o| o).await;
    assert!(transport.is_ready());

    transport
        .write_value(&json!({"hello": "world"}))
        .await
        .expect("write should succeed");
    transport.end_input().await.expect("end input");

    let frames = drain(&transport).await;
    match message(&frames[0]) {
        Message::System(system) => {
            assert_eq!(system.subtype, "echo");
            assert_eq!(system.data.get("hello"), Some(&json!("world")));
        }
        other => panic!("expected echoed system message, got {other:?}"),
    }
    transport.close().await.expect("close");
}

#[tokio::test]
async fn nonzero_exit_is_surfaced_and_blocks_writes() {
    let body = r#"
echo '{"type":"system","subtype":"init","data":{}}'
echo 'fatal: boom' >&2
exit 3
"#;
    let (_dir, transport) = connect_mock(body, PromptMode::Streaming, |o| o).await;
    let mut errors = transport
        .take_error_receiver()
        .expect("error receiver available once");

    let frames = drain(&transport).await;
    assert_eq!(frames.len(), 2);
    assert!(matches!(message(&frames[0]), Message::System(_)));
    match &frames[1] {
        Err(SdkError::Process(err)) => {
            assert_eq!(err.exit_code(), Some(3));
            assert_eq!(err.message(), "Claude Code process exited with code 3");
        }
        other => panic!("expected Process error, got {other:?}"),
    }
    assert!(matches!(errors.try_recv(), Ok(SdkError::Process(_))));

    assert!(!transport.is_ready());
    match transport.write(r#"{"type":"user"}"#).await {
        Err(SdkError::CliConnection(err)) => {
            assert_eq!(err.message(), "cannot write to process that exited with error");
            let cause = err
                .cause()
                .and_then(|cause| cause.downcast_ref::<SdkError>())
                .expect("exit error attached");
            assert!(matches!(cause, SdkError::Process(_)));
        }
        other => panic!("expected CliConnection error, got {other:?}"),
    }

    transport.close().await.expect("close");
    transport.close().await.expect("close is idempotent");
}

#[tokio::test]
async fn stderr_lines_reach_the_callback() {
    let lines = Arc::new(Mutex::new(Vec::<String>::new()));
    let sink = Arc::clone(&lines);
    let body = r#"
echo '  first warning  ' >&2
echo '' >&2
echo 'second warning' >&2
echo '{"type":"system","subtype":"init","data":{}}'
"#;
    let (_dir, transport) = connect_mock(body, PromptMode::Text("hi".into()), move |o| {
        o.with_stderr(move |line| sink.lock().expect("sink").push(line.to_string()))
    })
    .await;

    let frames = drain(&transport).await;
    assert_eq!(frames.len(), 1);
    transport.close().await.expect("close drains stderr");

    let lines = lines.lock().expect("lines").clone();
    assert_eq!(lines, vec!["first warning".to_string(), "second warning".to_string()]);
}

#[tokio::test]
async fn undecodable_stderr_bytes_are_replaced_not_fatal() {
    let lines = Arc::new(Mutex::new(Vec::<String>::new()));
    let sink = Arc::clone(&lines);
    let body = r#"
printf 'bad \377 byte\n' >&2
echo 'still here' >&2
echo '{"type":"system","subtype":"init","data":{}}'
"#;
    let (_dir, transport) = connect_mock(body, PromptMode::Text("hi".into()), move |o| {
        o.with_stderr(move |line| sink.lock().expect("sink").push(line.to_string()))
    })
    .await;

    let frames = drain(&transport).await;
    assert_eq!(frames.len(), 1);
    transport.close().await.expect("close drains stderr");

    let lines = lines.lock().expect("lines").clone();
    assert_eq!(
        lines,
        vec!["bad \u{FFFD} byte".to_string(), "still here".to_string()]
    );
}

#[tokio::test]
async fn entrypoint_override_applies_to_a_shared_transport() {
    let body = r#"
printf '{"type":"system","subtype":"env","data":{"entrypoint":"%s"}}\n' "$CLAUDE_CODE_ENTRYPOINT"
"#;
    let dir = tempfile::tempdir().expect("tempdir");
    let guard = SPAWN_LOCK.lock().await;
    let cli = mock_cli(dir.path(), body);
    let transport = SubprocessCliTransport::new(
        PromptMode::Text("hi".into()),
        ClaudeAgentOptions::new().with_cli_path(&cli),
    );
    let shared = transport.clone();
    let transport = transport.with_entrypoint("sdk-rs-custom");
    assert_eq!(shared.entrypoint(), "sdk-rs-custom");

    shared.connect().await.expect("mock cli should start");
    drop(guard);

    let frames = drain(&transport).await;
    match message(&frames[0]) {
        Message::System(system) => {
            assert_eq!(system.data.get("entrypoint"), Some(&json!("sdk-rs-custom")));
        }
        other => panic!("expected system message, got {other:?}"),
    }
    transport.close().await.expect("close");
}

#[tokio::test]
async fn environment_is_exported_to_the_child() {
    let cwd = tempfile::tempdir().expect("cwd");
    let cwd_path = cwd.path().to_path_buf();
    let body = r#"
printf '{"type":"system","subtype":"env","data":{"entrypoint":"%s","version":"%s","custom":"%s","pwd":"%s"}}\n' "$CLAUDE_CODE_ENTRYPOINT" "$CLAUDE_AGENT_SDK_VERSION" "$MY_VAR" "$PWD"
"#;
    let dir = tempfile::tempdir().expect("tempdir");
    let transport = {
        let _guard = SPAWN_LOCK.lock().await;
        let cli = mock_cli(dir.path(), body);
        let options = ClaudeAgentOptions::new()
            .with_cli_path(&cli)
            .with_cwd(&cwd_path)
            .with_env("MY_VAR", "custom-value");
        let transport = SubprocessCliTransport::new(PromptMode::Text("hi".into()), options)
            .with_entrypoint("sdk-rs-client");
        transport.connect().await.expect("mock cli should start");
        transport
    };

    let frames = drain(&transport).await;
    let data = match message(&frames[0]) {
        Message::System(system) => system.data.clone(),
        other => panic!("expected system message, got {other:?}"),
    };
    assert_eq!(data.get("entrypoint"), Some(&json!("sdk-rs-client")));
    assert_eq!(data.get("version"), Some(&json!(env!("CARGO_PKG_VERSION"))));
    assert_eq!(data.get("custom"), Some(&json!("custom-value")));

    let pwd = data
        .get("pwd")
        .and_then(|value| value.as_str())
        .expect("pwd exported");
    assert_eq!(
        Path::new(pwd).canonicalize().expect("pwd exists"),
        cwd_path.canonicalize().expect("cwd exists")
    );
    transport.close().await.expect("close");
}

#[tokio::test]
async fn missing_cli_is_reported_and_close_still_succeeds() {
    let dir = tempfile::tempdir().expect("tempdir");
    let options = ClaudeAgentOptions::new().with_cli_path(dir.path().join("no-such-claude"));
    let transport = SubprocessCliTransport::new(PromptMode::Streaming, options);

    match transport.connect().await {
        Err(SdkError::CliNotFound(err)) => {
            assert!(err.cli_path().is_some_and(|path| path.ends_with("no-such-claude")));
        }
        other => panic!("expected CliNotFound error, got {other:?}"),
    }
    assert!(!transport.is_ready());
    transport.close().await.expect("close after failed connect");
    transport.close().await.expect("close is idempotent");
}

#[tokio::test]
async fn close_stops_a_running_child() {
    let body = r#"
echo '{"type":"system","subtype":"init","data":{}}'
while true; do sleep 1; done
"#;
    let (_dir, transport) = connect_mock(body, PromptMode::Streaming, |o| o).await;
    let mut frames = transport.read_messages();
    let first = tokio::time::timeout(Duration::from_secs(10), frames.next())
        .await
        .expect("first frame")
        .expect("stream open");
    assert!(matches!(message(&first), Message::System(_)));

    tokio::time::timeout(Duration::from_secs(15), transport.close())
        .await
        .expect("close should finish")
        .expect("close");
    assert!(!transport.is_ready());
    assert!(matches!(
        transport.write(r#"{"type":"user"}"#).await,
        Err(SdkError::CliConnection(_))
    ));
}
