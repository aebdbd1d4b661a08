//! Simulate command handler: drives one scripted agent turn through the
//! full relay against the console platform.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::info;

use zeptorelay::bus::{AgentEvent, InboundItem};
use zeptorelay::config::Config;
use zeptorelay::platform::ConsolePlatform;
use zeptorelay::store::MemoryStore;
use zeptorelay::Relay;

pub(crate) struct SimulateOptions {
    pub chat: String,
    pub steps: usize,
    pub delay_ms: u64,
    pub anchor: bool,
    pub throttle_every: Option<u64>,
}

const ANSWER: &str = "## Summary\n\n\
**Done.** The build is green and `cargo fmt` reports no changes.\n\n\
- fixed the off-by-one in `chunk()`\n\
- added tests for surrogate pairs\n\n\
> Remember to bump the version before publishing.\n\n\
The secret word is ||zepto||.";

/// Scripted tool calls, cycled when more steps are requested.
fn scripted_tool(i: usize) -> (&'static str, Value) {
    match i % 6 {
        0 => ("Read", json!({"file_path": "src/format/chunk.rs"})),
        1 => ("Grep", json!({"pattern": "fn chunk", "path": "src"})),
        2 => ("Edit", json!({"file_path": "src/format/chunk.rs"})),
        3 => (
            "Bash",
            json!({"command": "cargo test format::", "description": "Run formatter tests"}),
        ),
        4 => (
            "TodoWrite",
            json!({"todos": [{"status": "completed"}, {"status": "pending"}]}),
        ),
        _ => ("WebFetch", json!({"url": "https://core.telegram.org/bots/api"})),
    }
}

pub(crate) async fn cmd_simulate(config: Config, options: SimulateOptions) -> Result<()> {
    let mut platform = ConsolePlatform::new();
    if let Some(n) = options.throttle_every {
        platform = platform.with_throttle_every(n, Duration::from_secs(2));
    }

    let relay = Arc::new(Relay::new(
        config,
        Arc::new(platform),
        Some(Arc::new(MemoryStore::new())),
    )?);
    let cancel = CancellationToken::new();
    let maintenance = relay.spawn_maintenance(cancel.clone());

    let chat = options.chat.as_str();
    let delay = Duration::from_millis(options.delay_ms);

    let stream = relay.stream(chat);
    relay.push_input(chat, InboundItem::user(chat, "sim-user", "Fix the chunker"));
    if let Some(item) = stream.next().await {
        info!(chat_id = %chat, text = ?item.text(), "Agent picked up input");
    }

    let anchor = if options.anchor {
        relay
            .deliverer()
            .send_markdown(chat, "🤖 _Working on it…_")
            .await?
    } else {
        None
    };

    relay
        .handle_event(chat, AgentEvent::TurnStarted { anchor_message_id: anchor })
        .await?;

    for i in 0..options.steps {
        let (name, input) = scripted_tool(i);
        let tool_id = format!("toolu_{:02}", i);
        relay
            .handle_event(
                chat,
                AgentEvent::ToolUse {
                    tool_id: tool_id.clone(),
                    name: name.to_string(),
                    input,
                },
            )
            .await?;
        tokio::time::sleep(delay).await;
        relay
            .handle_event(
                chat,
                AgentEvent::ToolResult {
                    tool_id,
                    content: "ok".to_string(),
                    is_error: false,
                },
            )
            .await?;
        tokio::time::sleep(delay).await;
    }

    let saved = relay.save_state().await?;
    info!(saved, "Checkpointed live anchors");

    relay
        .handle_event(chat, AgentEvent::Text { text: ANSWER.to_string() })
        .await?;
    relay
        .handle_event(chat, AgentEvent::TurnCompleted { success: true })
        .await?;

    cancel.cancel();
    maintenance.await?;
    relay.shutdown();

    relay.refresh_gauges();
    println!("{}", relay.metrics().summary());
    Ok(())
}
