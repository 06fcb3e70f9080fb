mod common;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};

use claude_agent_sdk::control::{ControlRequestBody, PermissionRequest};
use claude_agent_sdk::error::SdkError;
use claude_agent_sdk::hooks::{
    HookCallback, HookContext, HookEvent, HookInput, HookJsonOutput, HookMatcher,
    SyncHookJsonOutput,
};
use claude_agent_sdk::internal::query::Query;
use claude_agent_sdk::mcp::create_sdk_mcp_server;
use claude_agent_sdk::message::Message;
use claude_agent_sdk::permission::{CanUseToolHandle, PermissionResult, ToolPermissionContext};

use common::{is_control_request, is_response_to, MockTransport};

fn router(transport: &Arc<MockTransport>) -> Query<MockTransport> {
    Query::new(
        Arc::clone(transport),
        true,
        None,
        None,
        HashMap::new(),
        Duration::from_secs(5),
    )
}

fn permission_body(tool: &str) -> ControlRequestBody {
    ControlRequestBody::CanUseTool(PermissionRequest {
        tool_name: tool.into(),
        input: Map::new(),
        permission_suggestions: None,
        blocked_path: None,
    })
}

fn control_request(request_id: &str, request: Value) -> Value {
    json!({"type": "control_request", "request_id": request_id, "request": request})
}

#[tokio::test]
async fn error_response_to_permission_request_is_permission_denied() {
    let transport = MockTransport::new();
    let query = router(&transport);
    query.start().await.expect("router starts");

    let pending = {
        let query = query.clone();
        tokio::spawn(async move { query.send_control_request(permission_body("Bash")).await })
    };

    let request = transport
        .wait_for_write(is_control_request("can_use_tool"))
        .await;
    assert_eq!(request["request"]["tool_name"], json!("Bash"));
    let request_id = request["request_id"].as_str().expect("request id").to_string();

    let response = json!({
        "type": "control_response",
        "response": {"subtype": "error", "request_id": request_id, "error": "denied"}
    });
    transport.push_json([response.clone()]);

    match pending.await.expect("task joins") {
        Err(SdkError::PermissionDenied(err)) => assert_eq!(err.message(), "denied"),
        other => panic!("expected PermissionDenied error, got {other:?}"),
    }

    // The entry is gone, so the same response again cannot be correlated.
    transport.push_json([response]);
    match query.next_message().await {
        Err(SdkError::ControlProtocol(err)) => {
            assert_eq!(
                err.message(),
                format!("no pending control request with id {request_id}")
            );
        }
        other => panic!("expected ControlProtocol error, got {other:?}"),
    }

    query.close().await.expect("close");
}

#[tokio::test]
async fn success_response_resolves_with_payload() {
    let transport = MockTransport::auto_responding(json!({"models": ["a", "b"]}));
    let query = router(&transport);

    let payload = query
        .send_control_request(ControlRequestBody::Interrupt)
        .await
        .expect("interrupt acknowledged");
    assert_eq!(payload.get("models"), Some(&json!(["a", "b"])));

    query.close().await.expect("close");
}

#[tokio::test]
async fn error_response_to_other_requests_is_control_protocol() {
    let transport = MockTransport::new();
    let query = router(&transport);

    let pending = {
        let query = query.clone();
        tokio::spawn(async move { query.interrupt().await })
    };
    let request = transport.wait_for_write(is_control_request("interrupt")).await;
    transport.push_json([json!({
        "type": "control_response",
        "response": {
            "subtype": "error",
            "request_id": request["request_id"],
            "error": "nothing to interrupt"
        }
    })]);

    match pending.await.expect("task joins") {
        Err(SdkError::ControlProtocol(err)) => assert_eq!(err.message(), "nothing to interrupt"),
        other => panic!("expected ControlProtocol error, got {other:?}"),
    }
    query.close().await.expect("close");
}

#[tokio::test]
async fn close_fails_outstanding_requests() {
    let transport = MockTransport::new();
    let query = router(&transport);

    let pending = {
        let query = query.clone();
        tokio::spawn(async move { query.interrupt().await })
    };
    transport.wait_for_write(is_control_request("interrupt")).await;

    query.close().await.expect("close");
    query.close().await.expect("close is idempotent");
    assert!(query.is_closed());
    assert_eq!(transport.close_calls(), 1);

    assert!(matches!(
        pending.await.expect("task joins"),
        Err(SdkError::CliConnection(_))
    ));
    assert!(matches!(
        query.interrupt().await,
        Err(SdkError::CliConnection(_))
    ));
}

#[tokio::test]
async fn end_of_stream_fails_outstanding_requests() {
    let transport = MockTransport::new();
    let query = router(&transport);

    let pending = {
        let query = query.clone();
        tokio::spawn(async move { query.interrupt().await })
    };
    transport.wait_for_write(is_control_request("interrupt")).await;
    transport.finish();

    assert!(matches!(
        pending.await.expect("task joins"),
        Err(SdkError::CliConnection(_))
    ));
    assert!(matches!(query.next_message().await, Ok(None)));
    query.close().await.expect("close");
}

#[tokio::test]
async fn unanswered_request_times_out() {
    let transport = MockTransport::new();
    let query = Query::new(
        Arc::clone(&transport),
        true,
        None,
        None,
        HashMap::new(),
        Duration::from_millis(50),
    );

    match query.interrupt().await {
        Err(SdkError::ControlProtocol(err)) => {
            assert!(err.message().contains("timed out"));
            assert!(err.cause().is_some());
        }
        other => panic!("expected ControlProtocol error, got {other:?}"),
    }

    let request = transport.wait_for_write(is_control_request("interrupt")).await;
    transport.push_json([json!({
        "type": "control_response",
        "response": {"subtype": "success", "request_id": request["request_id"]}
    })]);
    assert!(matches!(
        query.next_message().await,
        Err(SdkError::ControlProtocol(_))
    ));
    query.close().await.expect("close");
}

#[tokio::test]
async fn non_streaming_router_rejects_control_requests() {
    let transport = MockTransport::new();
    let query: Query<MockTransport> = Query::new(
        Arc::clone(&transport),
        false,
        None,
        None,
        HashMap::new(),
        Duration::from_secs(1),
    );

    assert_eq!(query.initialize().await.expect("no-op"), None);
    assert!(matches!(
        query.interrupt().await,
        Err(SdkError::ControlProtocol(_))
    ));
    assert!(transport.writes().is_empty());
}

#[tokio::test]
async fn permission_requests_are_answered_by_the_callback() {
    let callback: CanUseToolHandle = Arc::new(
        |tool: &str, _input: Map<String, Value>, ctx: ToolPermissionContext| {
            let deny = tool == "Bash";
            async move {
                if deny {
                    PermissionResult::deny(format!(
                        "blocked {}",
                        ctx.blocked_path.unwrap_or_default()
                    ))
                } else {
                    PermissionResult::allow()
                }
            }
        },
    );

    let transport = MockTransport::new();
    let query = Query::new(
        Arc::clone(&transport),
        true,
        Some(callback),
        None,
        HashMap::new(),
        Duration::from_secs(5),
    );
    query.start().await.expect("router starts");

    transport.push_json([
        control_request(
            "r1",
            json!({
                "subtype": "can_use_tool",
                "tool_name": "Bash",
                "input": {"command": "rm -rf /"},
                "blocked_path": "/"
            }),
        ),
        control_request(
            "r2",
            json!({"subtype": "can_use_tool", "tool_name": "Read", "input": {"path": "/x"}}),
        ),
    ]);

    let denied = transport.wait_for_write(is_response_to("r1")).await;
    assert_eq!(
        denied["response"],
        json!({
            "subtype": "success",
            "request_id": "r1",
            "response": {"behavior": "deny", "message": "blocked /"}
        })
    );

    let allowed = transport.wait_for_write(is_response_to("r2")).await;
    assert_eq!(
        allowed["response"]["response"],
        json!({"behavior": "allow", "updatedInput": {"path": "/x"}})
    );

    query.close().await.expect("close");
}

#[tokio::test]
async fn stdin_stays_open_until_the_first_result_when_callbacks_exist() {
    let callback: CanUseToolHandle = Arc::new(
        |_tool: &str, _input: Map<String, Value>, _ctx: ToolPermissionContext| async {
            PermissionResult::allow()
        },
    );
    let transport = MockTransport::new();
    let query = Query::new(
        Arc::clone(&transport),
        true,
        Some(callback),
        None,
        HashMap::new(),
        Duration::from_secs(5),
    );
    query.start().await.expect("router starts");

    let writer = {
        let query = query.clone();
        tokio::spawn(async move {
            let prompt = futures::stream::iter(vec![json!({"type": "user"})]);
            query.stream_input(prompt).await
        })
    };

    transport.wait_for_write(|value| value["type"] == "user").await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(transport.end_input_calls(), 0);

    transport.push_json([json!({
        "type": "result",
        "subtype": "success",
        "duration_ms": 1,
        "duration_api_ms": 1,
        "is_error": false,
        "num_turns": 1,
        "session_id": "s"
    })]);
    writer
        .await
        .expect("task joins")
        .expect("prompt written");
    assert_eq!(transport.end_input_calls(), 1);
    assert!(matches!(query.next_message().await, Ok(Some(Message::Result(_)))));
    query.close().await.expect("close");
}

#[tokio::test]
async fn registered_hooks_keep_stdin_open_until_the_first_result() {
    let hook: Arc<dyn HookCallback> = Arc::new(
        |_input: HookInput, _tool_use_id: Option<String>, _ctx: HookContext| async {
            HookJsonOutput::Sync(SyncHookJsonOutput::default())
        },
    );
    let hooks = BTreeMap::from([(
        HookEvent::PreToolUse,
        vec![HookMatcher::new(None).with_hook(hook)],
    )]);

    let transport = MockTransport::auto_responding(json!({}));
    let query = Query::new(
        Arc::clone(&transport),
        true,
        None,
        Some(hooks),
        HashMap::new(),
        Duration::from_secs(5),
    );
    query.initialize().await.expect("initialize");

    let writer = {
        let query = query.clone();
        tokio::spawn(async move {
            let prompt = futures::stream::iter(vec![json!({"type": "user"})]);
            query.stream_input(prompt).await
        })
    };

    transport.wait_for_write(|value| value["type"] == "user").await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(transport.end_input_calls(), 0);

    transport.push_json([json!({
        "type": "result",
        "subtype": "success",
        "duration_ms": 1,
        "duration_api_ms": 1,
        "is_error": false,
        "num_turns": 1,
        "session_id": "s"
    })]);
    writer.await.expect("task joins").expect("prompt written");
    assert_eq!(transport.end_input_calls(), 1);
    query.close().await.expect("close");
}

#[tokio::test]
async fn inbound_requests_without_a_handler_get_error_responses() {
    let transport = MockTransport::new();
    let query = router(&transport);
    query.start().await.expect("router starts");

    transport.push_json([
        control_request("p1", json!({"subtype": "can_use_tool", "tool_name": "Bash", "input": {}})),
        control_request("i1", json!({"subtype": "interrupt"})),
        control_request(
            "m1",
            json!({"subtype": "mcp_message", "server_name": "nope", "message": {}}),
        ),
        control_request(
            "h1",
            json!({"subtype": "hook_callback", "callback_id": "hook_9", "input": {}}),
        ),
    ]);

    let expectations = [
        ("p1", "canUseTool callback is not provided"),
        ("i1", "unsupported control request subtype: interrupt"),
        ("m1", "Server 'nope' not found"),
        ("h1", "No hook callback found for ID: hook_9"),
    ];
    for (request_id, message) in expectations {
        let response = transport.wait_for_write(is_response_to(request_id)).await;
        assert_eq!(response["response"]["subtype"], json!("error"));
        assert_eq!(response["response"]["error"], json!(message));
    }

    query.close().await.expect("close");
}

#[tokio::test]
async fn undecodable_control_request_is_answered_and_surfaced() {
    let transport = MockTransport::new();
    let query = router(&transport);
    query.start().await.expect("router starts");

    transport.push_json([control_request("bad1", json!({"subtype": "rewind_files"}))]);

    match query.next_message().await {
        Err(SdkError::MessageParse(err)) => assert!(err.message().contains("rewind_files")),
        other => panic!("expected MessageParse error, got {other:?}"),
    }
    let response = transport.wait_for_write(is_response_to("bad1")).await;
    assert_eq!(response["response"]["subtype"], json!("error"));

    query.close().await.expect("close");
}

#[tokio::test]
async fn cancel_frames_are_skipped() {
    let transport = MockTransport::new();
    let query = router(&transport);
    query.start().await.expect("router starts");

    transport.push_json([
        json!({"type": "control_cancel_request", "request_id": "r5"}),
        json!({"type": "system", "subtype": "init", "data": {"cwd": "/work"}}),
    ]);

    match query.next_message().await {
        Ok(Some(Message::System(system))) => {
            assert_eq!(system.subtype, "init");
            assert_eq!(system.data.get("cwd"), Some(&json!("/work")));
        }
        other => panic!("expected system message, got {other:?}"),
    }
    query.close().await.expect("close");
}

#[tokio::test]
async fn hooks_are_registered_and_invoked() {
    let hook: Arc<dyn HookCallback> = Arc::new(
        |input: HookInput, tool_use_id: Option<String>, _ctx: HookContext| async move {
            let tool = match input {
                HookInput::PreToolUse(pre) => pre.tool_name,
                _ => String::new(),
            };
            HookJsonOutput::Sync(SyncHookJsonOutput {
                decision: Some("block".into()),
                reason: Some(format!("{tool} via {}", tool_use_id.unwrap_or_default())),
                ..Default::default()
            })
        },
    );
    let hooks = BTreeMap::from([(
        HookEvent::PreToolUse,
        vec![HookMatcher::new(Some("Bash".into())).with_hook(hook)],
    )]);

    let transport = MockTransport::auto_responding(json!({"ok": true}));
    let query = Query::new(
        Arc::clone(&transport),
        true,
        None,
        Some(hooks),
        HashMap::new(),
        Duration::from_secs(5),
    );

    let init = query.initialize().await.expect("initialize").expect("streaming");
    assert_eq!(init.get("ok"), Some(&json!(true)));
    assert_eq!(query.initialization_result().await, Some(init));

    let request = transport.wait_for_write(is_control_request("initialize")).await;
    assert_eq!(
        request["request"]["hooks"],
        json!({"PreToolUse": [{"matcher": "Bash", "hookCallbackIds": ["hook_0"]}]})
    );

    transport.push_json([control_request(
        "h1",
        json!({
            "subtype": "hook_callback",
            "callback_id": "hook_0",
            "tool_use_id": "toolu_1",
            "input": {
                "hook_event_name": "PreToolUse",
                "session_id": "s1",
                "transcript_path": "/tmp/t.jsonl",
                "cwd": "/work",
                "tool_name": "Bash",
                "tool_input": {"command": "ls"}
            }
        }),
    )]);

    let response = transport.wait_for_write(is_response_to("h1")).await;
    assert_eq!(
        response["response"]["response"],
        json!({"decision": "block", "reason": "Bash via toolu_1"})
    );

    query.close().await.expect("close");
}

#[tokio::test]
async fn mcp_messages_are_relayed_to_sdk_servers() {
    let server = create_sdk_mcp_server("calc", |message: Value| async move {
        Ok(json!({"jsonrpc": "2.0", "id": message["id"], "result": {"tools": []}}))
    });
    let servers = HashMap::from([("calc".to_string(), server)]);

    let transport = MockTransport::new();
    let query = Query::new(
        Arc::clone(&transport),
        true,
        None,
        None,
        servers,
        Duration::from_secs(5),
    );
    query.start().await.expect("router starts");

    transport.push_json([control_request(
        "m1",
        json!({
            "subtype": "mcp_message",
            "server_name": "calc",
            "message": {"jsonrpc": "2.0", "id": 7, "method": "tools/list"}
        }),
    )]);

    let response = transport.wait_for_write(is_response_to("m1")).await;
    assert_eq!(
        response["response"]["response"],
        json!({"mcp_response": {"jsonrpc": "2.0", "id": 7, "result": {"tools": []}}})
    );

    query.close().await.expect("close");
}
