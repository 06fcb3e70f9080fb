use std::error::Error;
use std::sync::Arc;

use futures::{stream, StreamExt};
use serde_json::{json, Map, Value};

use claude_agent_sdk::message::Message;
use claude_agent_sdk::permission::{CanUseToolHandle, PermissionResult, ToolPermissionContext};
use claude_agent_sdk::{query, ClaudeAgentOptions, PromptInput};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let guard: CanUseToolHandle = Arc::new(
        |tool: &str, input: Map<String, Value>, _ctx: ToolPermissionContext| {
            let tool = tool.to_string();
            async move {
                let command = input.get("command").and_then(Value::as_str).unwrap_or("");
                if tool == "Bash" && command.contains("rm ") {
                    PermissionResult::deny(format!("refusing to run `{command}`"))
                } else {
                    println!("allowing {tool}");
                    PermissionResult::allow()
                }
            }
        },
    );

    let prompt = stream::iter(vec![json!({
        "type": "user",
        "message": {"role": "user", "content": "Create hello.txt and then delete it."},
        "parent_tool_use_id": null,
        "session_id": "default",
    })]);

    let options = ClaudeAgentOptions::new().with_can_use_tool(guard);
    let mut messages = query(PromptInput::from_stream(prompt), Some(options), None).await?;

    while let Some(message) = messages.next().await {
        if let Message::Result(result) = message? {
            println!("finished after {} turns", result.num_turns);
            break;
        }
    }

    Ok(())
}
