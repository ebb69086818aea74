use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;
use wasmtime::{Engine, Module};

use tl_host_wasmtime::{InboundMessage, MessageBridge, OutboundMessage, WasmGuest};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries the message protocol; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let path = std::env::args()
        .nth(1)
        .context("usage: tl-host <module.wasm>")?;

    let (tx, mut rx) = mpsc::unbounded_channel::<OutboundMessage>();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(msg) = rx.recv().await {
            let mut line = match serde_json::to_vec(&msg) {
                Ok(line) => line,
                Err(err) => {
                    tracing::error!(%err, "failed to serialize outbound message");
                    continue;
                }
            };
            line.push(b'\n');
            if stdout.write_all(&line).await.is_err() || stdout.flush().await.is_err() {
                break;
            }
        }
    });

    let engine = Engine::default();
    let bytes = tokio::fs::read(&path)
        .await
        .with_context(|| format!("reading guest module `{path}`"))?;
    let module = Module::new(&engine, &bytes).context("compiling guest module")?;

    let guest = match WasmGuest::instantiate(&engine, &module, tx.clone()) {
        Ok(guest) => guest,
        Err(err) => {
            // Fatal startup error: no scheduler, no guest traffic.
            let _ = tx.send(OutboundMessage::System {
                text: format!("Refusing to start: {err}\n"),
            });
            drop(tx);
            let _ = writer.await;
            return Err(err.into());
        }
    };
    tracing::info!(module = %path, "guest instantiated");

    let mut bridge = MessageBridge::new(guest);
    if let Err(err) = bridge.start() {
        // Same reporting as a mid-loop fault: say so before exiting.
        let _ = tx.send(OutboundMessage::System {
            text: format!("Guest fault: {err}\n"),
        });
        drop(bridge);
        drop(tx);
        let _ = writer.await;
        return Err(err.into());
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<InboundMessage>(&line) {
            Ok(msg) => {
                if let Err(err) = bridge.handle(msg) {
                    // Unrecoverable runtime fault: abandon the coroutine.
                    let _ = tx.send(OutboundMessage::System {
                        text: format!("Guest fault: {err}\n"),
                    });
                    drop(bridge);
                    drop(tx);
                    let _ = writer.await;
                    return Err(err.into());
                }
            }
            Err(err) => {
                tracing::warn!(%err, line, "ignoring unrecognized message");
            }
        }
    }

    drop(bridge);
    drop(tx);
    let _ = writer.await;
    Ok(())
}
