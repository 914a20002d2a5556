//! The stdio adapter: a line-delimited JSON-RPC loop around the engine.
//!
//! Requests are processed strictly in arrival order — a response is written
//! before the next request is dispatched, so every call reads its
//! predecessors' writes. Stdout carries only response frames; all logging
//! goes to stderr. The loop survives storage-init failure in degraded mode
//! (every tool answers with a structured error) so the hosting client never
//! loses the connection silently.

pub mod rpc;
pub mod tools;

use std::io::Write;

use anyhow::Result;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::config::CortexConfig;
use crate::engine::Engine;

const CONTEXT_RESOURCE_URI: &str = "cortex://context";

/// Serve MCP over stdio until EOF, SIGINT, or SIGTERM. Exits cleanly (the
/// database is checkpointed and the embed worker joined) in all three cases.
pub async fn serve_stdio(cfg: CortexConfig) -> Result<()> {
    let mut engine = Engine::new(cfg);
    if engine.is_degraded() {
        tracing::error!("serving in degraded mode — storage is unavailable");
    } else {
        tracing::info!("cortex memory engine ready on stdio");
    }

    let (shutdown_tx, mut shutdown_rx) = tokio::sync::mpsc::channel::<&'static str>(1);
    spawn_signal_watcher(shutdown_tx);

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    let mut stdout = std::io::stdout();

    loop {
        tokio::select! {
            reason = shutdown_rx.recv() => {
                tracing::info!(reason = reason.unwrap_or("signal"), "shutting down");
                break;
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        if let Some(frame) = handle_line(&mut engine, &line).await {
                            writeln!(stdout, "{frame}")?;
                            stdout.flush()?;
                        }
                    }
                    Ok(None) => {
                        tracing::info!("stdin closed, shutting down");
                        break;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "stdin read failed, shutting down");
                        break;
                    }
                }
            }
        }
    }

    engine.close();
    Ok(())
}

fn spawn_signal_watcher(shutdown_tx: tokio::sync::mpsc::Sender<&'static str>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut term = match signal(SignalKind::terminate()) {
                Ok(term) => term,
                Err(e) => {
                    tracing::warn!(error = %e, "SIGTERM handler unavailable");
                    let _ = tokio::signal::ctrl_c().await;
                    let _ = shutdown_tx.send("SIGINT").await;
                    return;
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => { let _ = shutdown_tx.send("SIGINT").await; }
                _ = term.recv() => { let _ = shutdown_tx.send("SIGTERM").await; }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            let _ = shutdown_tx.send("SIGINT").await;
        }
    });
}

/// Handle one input line end to end. Returns the frame to write, or `None`
/// for notifications.
pub async fn handle_line(engine: &mut Engine, line: &str) -> Option<String> {
    let request = match rpc::parse_line(line) {
        Ok(request) => request,
        Err(frame) => return Some(frame),
    };
    handle_request(engine, request).await
}

async fn handle_request(engine: &mut Engine, request: rpc::Request) -> Option<String> {
    // Apply embeddings completed since the previous request, so vector
    // search reflects everything stored before this call.
    engine.absorb_embeddings();

    if request.is_notification() {
        tracing::debug!(method = %request.method, "notification");
        return None;
    }
    let id = request.id.unwrap_or(Value::Null);

    let frame = match request.method.as_str() {
        "initialize" => rpc::result_frame(
            id,
            json!({
                "protocolVersion": "2024-11-05",
                "serverInfo": {
                    "name": "cortex",
                    "version": env!("CARGO_PKG_VERSION"),
                },
                "capabilities": {
                    "tools": {},
                    "resources": {},
                },
                "instructions": "Persistent memory for coding sessions. Call force_recall at \
                                 conversation start, store_memory when something worth keeping \
                                 happens, recall_memory when you need specifics.",
            }),
        ),
        "tools/list" => rpc::result_frame(id, tools::tools_list_payload()),
        "tools/call" => {
            let name = request.params["name"].as_str().unwrap_or_default().to_string();
            let arguments = request.params.get("arguments").cloned().unwrap_or(json!({}));
            call_tool(engine, &name, arguments, id).await
        }
        "resources/list" => rpc::result_frame(
            id,
            json!({
                "resources": [{
                    "uri": CONTEXT_RESOURCE_URI,
                    "name": "brain context",
                    "description": "The assembled conversation-priming context",
                    "mimeType": "text/plain",
                }]
            }),
        ),
        "resources/read" => {
            let uri = request.params["uri"].as_str().unwrap_or_default();
            if uri != CONTEXT_RESOURCE_URI {
                rpc::error_frame(id, rpc::INVALID_REQUEST, &format!("unknown resource: {uri}"))
            } else {
                let text = match engine.get_context().await {
                    Ok(text) => text,
                    Err(reason) => reason,
                };
                rpc::result_frame(
                    id,
                    json!({
                        "contents": [{
                            "uri": CONTEXT_RESOURCE_URI,
                            "mimeType": "text/plain",
                            "text": text,
                        }]
                    }),
                )
            }
        }
        // Backward-compat: early clients called tools as bare methods.
        method if tools::is_known_tool(method) => {
            let method = method.to_string();
            let arguments = request.params.clone();
            call_tool(engine, &method, arguments, id).await
        }
        other => rpc::error_frame(
            id,
            rpc::METHOD_NOT_FOUND,
            &format!("unknown method: {other}"),
        ),
    };
    Some(frame)
}

async fn call_tool(engine: &mut Engine, name: &str, arguments: Value, id: Value) -> String {
    match tools::dispatch(engine, name, arguments).await {
        Ok(text) => rpc::result_frame(id, rpc::tool_result(&text, false)),
        Err(reason) => {
            tracing::warn!(tool = name, %reason, "tool call failed");
            rpc::result_frame(id, rpc::tool_result(&reason, true))
        }
    }
}
