//! Attach to a Node.js inspector, break on start, set a breakpoint and print pauses
//!
//! Run node with `node --inspect-brk main.js`, then pass the
//! `webSocketDebuggerUrl` from http://127.0.0.1:9229/json:
//!
//! ```text
//! cargo run --example inspect_node -- ws://127.0.0.1:9229/<uuid>
//! ```

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use ucdp::{Event, Session, UcdpError};
use url::Url;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let ws_url = std::env::args()
        .nth(1)
        .ok_or("usage: inspect_node <webSocketDebuggerUrl>")?;
    let ws_url = Url::parse(&ws_url)?;

    println!("Connecting to inspector at: {}", ws_url);
    let (ws_stream, _) = connect_async(ws_url.as_str()).await?;
    let (mut sink, mut stream) = ws_stream.split();

    let session = Session::new()?;

    // The send function is synchronous, so the socket writer lives in its own task
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    tokio::spawn(async move {
        while let Some(text) = out_rx.recv().await {
            if let Err(e) = sink.send(Message::Text(text)).await {
                tracing::error!("WebSocket send failed: {}", e);
                break;
            }
        }
    });
    session.set_sender(move |text| {
        out_tx
            .send(text)
            .map_err(|e| UcdpError::Transport(e.to_string()))
    });

    let reader = session.clone();
    tokio::spawn(async move {
        while let Some(msg) = stream.next().await {
            match msg {
                Ok(Message::Text(text)) => reader.process_message(&text),
                Ok(Message::Close(_)) => break,
                Err(e) => {
                    tracing::error!("WebSocket error: {}", e);
                    break;
                }
                _ => {}
            }
        }
        tracing::info!("WebSocket closed");
        reader.cancel_pending();
    });

    session.subscribe_all(Arc::new(|event: Event| {
        if event.name == "Debugger.scriptParsed" {
            let url = event.params["url"].as_str().unwrap_or_default();
            if !url.starts_with("node:") {
                println!("Script: {}", url);
            }
        } else {
            println!("Event: {}", event.name);
        }
    }));

    // Callbacks can't await, so pauses are handled on their own task
    let paused_session = session.downgrade();
    session.subscribe(
        "Debugger.paused",
        Arc::new(move |event: Event| {
            let Some(session) = paused_session.upgrade() else {
                return;
            };
            tokio::spawn(async move {
                if let Err(e) = on_paused(session, event).await {
                    tracing::error!("Handling pause failed: {}", e);
                }
            });
        }),
    );

    session.call("Runtime.enable", json!({})).await?;
    session.call("Debugger.enable", json!({})).await?;
    session
        .call("Runtime.runIfWaitingForDebugger", json!({}))
        .await?;

    tokio::time::sleep(Duration::from_secs(30)).await;
    println!("Quitting...");

    Ok(())
}

async fn on_paused(session: Session, event: Event) -> ucdp::Result<()> {
    let reason = event.params["reason"].as_str().unwrap_or("unknown");
    println!("Debugger paused because of << {} >>", reason);

    if reason == "Break on start" {
        session
            .call("Debugger.setPauseOnExceptions", json!({ "state": "all" }))
            .await?;
        let bp = session
            .call(
                "Debugger.setBreakpointByUrl",
                json!({ "urlRegex": r"main\.js", "lineNumber": 10 }),
            )
            .await?;
        println!("Set breakpoint -> {}", bp);

        session.call("Debugger.resume", json!({})).await?;
        return Ok(());
    }

    println!("Call frames:");
    let frames = event.params["callFrames"].as_array().cloned().unwrap_or_default();
    for frame in &frames {
        let location = &frame["location"];
        println!(
            "  - {}:{}:{} {}",
            frame["url"].as_str().unwrap_or_default(),
            location["lineNumber"].as_u64().unwrap_or_default() + 1,
            location["columnNumber"].as_u64().unwrap_or_default() + 1,
            frame["functionName"].as_str().unwrap_or_default(),
        );
    }

    println!("Resuming in 3...");
    tokio::time::sleep(Duration::from_secs(3)).await;
    session.call("Debugger.resume", json!({})).await?;
    Ok(())
}
