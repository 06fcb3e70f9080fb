use std::error::Error;

use futures::StreamExt;
use claude_agent_sdk::message::{ContentBlock, Message, UserMessageContent};
use claude_agent_sdk::{query, ClaudeAgentOptions};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let mut stream = query(
        "List three reasons to drive Claude Code from Rust.",
        Some(ClaudeAgentOptions::new().with_max_turns(1)),
        None,
    )
    .await?;

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Assistant(assistant)) => {
                for block in assistant.content {
                    if let ContentBlock::Text(text) = block {
                        println!("Assistant: {}", text.text);
                    }
                }
            }
            Ok(Message::User(user)) => {
                if let UserMessageContent::Text(text) = user.content {
                    println!("User: {text}");
                }
            }
            Ok(Message::System(system)) => println!("System [{}]", system.subtype),
            Ok(Message::Result(result)) => {
                println!(
                    "Result: {} (turns: {}, error: {})",
                    result.subtype, result.num_turns, result.is_error
                );
            }
            Ok(Message::StreamEvent(_)) => {}
            Err(err) => eprintln!("error: {err}"),
        }
    }

    Ok(())
}
