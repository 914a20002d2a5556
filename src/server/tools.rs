//! Tool registry: parameter schemas, descriptions, and dispatch.
//!
//! Each tool's arguments deserialize into a typed param struct; the same
//! structs derive `JsonSchema` so `tools/list` advertises real input schemas.

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::engine::Engine;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RecallMemoryParams {
    /// Natural-language query, up to 1000 chars.
    pub query: String,
    /// Result cap; values above 50 are clamped.
    #[serde(rename = "maxResults")]
    pub max_results: Option<usize>,
    /// Repo-relative path of the file being worked on.
    #[serde(rename = "currentFile")]
    pub current_file: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct StoreMemoryParams {
    /// Item kind: CORRECTION, DECISION, CONVENTION, BUG_FIX, INSIGHT,
    /// FAILED_SUGGESTION, PROVEN_PATTERN, or DEPENDENCY.
    pub r#type: String,
    /// What to remember, up to 5000 chars.
    pub content: String,
    pub reason: Option<String>,
    /// Related repo-relative paths.
    pub files: Option<Vec<String>>,
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct QuickStoreParams {
    /// One observation; the kind is classified automatically.
    pub memory: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ForceRecallParams {
    /// Conversation topic to prime for.
    pub topic: String,
    #[serde(rename = "currentFile")]
    pub current_file: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct AutoLearnParams {
    /// Free text to mine for memorable statements, at least 20 chars.
    pub text: String,
    /// Optional tag applied to everything learned.
    pub context: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct UpdateMemoryParams {
    pub id: String,
    pub content: String,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DeleteMemoryParams {
    pub id: String,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListMemoriesParams {
    /// Restrict to one kind.
    pub r#type: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ImportMemoriesParams {
    /// A bundle produced by export_memories, as a JSON string.
    pub data: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ScanProjectParams {
    /// Directory to scan; defaults to the working directory.
    pub root: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct VerifyCodeParams {
    /// File to verify.
    pub file: String,
    /// Symbol expected inside the file.
    pub symbol: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct EmptyParams {}

/// Static description of one tool for `tools/list`.
pub struct ToolDef {
    pub name: &'static str,
    pub description: &'static str,
    schema: fn() -> Value,
}

fn schema_of<T: JsonSchema>() -> Value {
    serde_json::to_value(schemars::schema_for!(T)).unwrap_or_else(|_| json!({"type": "object"}))
}

pub fn list_tools() -> Vec<ToolDef> {
    vec![
        ToolDef {
            name: "recall_memory",
            description: "Search stored memories with hybrid keyword + vector + file retrieval.",
            schema: schema_of::<RecallMemoryParams>,
        },
        ToolDef {
            name: "store_memory",
            description: "Store a typed observation (correction, decision, convention, ...).",
            schema: schema_of::<StoreMemoryParams>,
        },
        ToolDef {
            name: "quick_store",
            description: "Store one observation; the kind is classified from its wording.",
            schema: schema_of::<QuickStoreParams>,
        },
        ToolDef {
            name: "force_recall",
            description: "Produce the full layered conversation-priming context for a topic.",
            schema: schema_of::<ForceRecallParams>,
        },
        ToolDef {
            name: "auto_learn",
            description: "Mine free text for memorable statements and store them.",
            schema: schema_of::<AutoLearnParams>,
        },
        ToolDef {
            name: "update_memory",
            description: "Replace a memory's content; the original is superseded, not edited.",
            schema: schema_of::<UpdateMemoryParams>,
        },
        ToolDef {
            name: "delete_memory",
            description: "Soft-delete a memory by id.",
            schema: schema_of::<DeleteMemoryParams>,
        },
        ToolDef {
            name: "list_memories",
            description: "List active memories grouped by kind.",
            schema: schema_of::<ListMemoriesParams>,
        },
        ToolDef {
            name: "export_memories",
            description: "Export the active set as a versioned JSON bundle.",
            schema: schema_of::<EmptyParams>,
        },
        ToolDef {
            name: "import_memories",
            description: "Import a bundle; existing (type, intent) pairs are skipped.",
            schema: schema_of::<ImportMemoriesParams>,
        },
        ToolDef {
            name: "get_stats",
            description: "Store statistics: counts by kind, edges, events, vectors.",
            schema: schema_of::<EmptyParams>,
        },
        ToolDef {
            name: "get_context",
            description: "The current project context (same as force_recall on the project).",
            schema: schema_of::<EmptyParams>,
        },
        ToolDef {
            name: "health_check",
            description: "Engine health: storage, schema version, embedder, degraded state.",
            schema: schema_of::<EmptyParams>,
        },
        ToolDef {
            name: "scan_project",
            description: "Digest the project tree into export-map and architecture sections.",
            schema: schema_of::<ScanProjectParams>,
        },
        ToolDef {
            name: "verify_code",
            description: "Check that a file (and optionally a symbol in it) still exists.",
            schema: schema_of::<VerifyCodeParams>,
        },
        ToolDef {
            name: "verify_files",
            description: "Check that every file referenced by active memories exists.",
            schema: schema_of::<EmptyParams>,
        },
    ]
}

pub fn tools_list_payload() -> Value {
    let tools: Vec<Value> = list_tools()
        .into_iter()
        .map(|t| {
            json!({
                "name": t.name,
                "description": t.description,
                "inputSchema": (t.schema)(),
            })
        })
        .collect();
    json!({ "tools": tools })
}

pub fn is_known_tool(name: &str) -> bool {
    list_tools().iter().any(|t| t.name == name)
}

fn params<T: serde::de::DeserializeOwned>(arguments: Value) -> Result<T, String> {
    serde_json::from_value(arguments).map_err(|e| format!("invalid arguments: {e}"))
}

/// Run one tool against the engine. `Err` becomes `result.isError = true`.
pub async fn dispatch(engine: &mut Engine, name: &str, arguments: Value) -> Result<String, String> {
    engine.admit_call()?;

    match name {
        "recall_memory" => {
            let p: RecallMemoryParams = params(arguments)?;
            engine
                .recall(&p.query, p.max_results, p.current_file.as_deref())
                .await
        }
        "store_memory" => {
            let p: StoreMemoryParams = params(arguments)?;
            engine.store_memory(
                &p.r#type,
                &p.content,
                p.reason.as_deref(),
                p.files.unwrap_or_default(),
                p.tags.unwrap_or_default(),
            )
        }
        "quick_store" => {
            let p: QuickStoreParams = params(arguments)?;
            engine.quick_store(&p.memory)
        }
        "force_recall" => {
            let p: ForceRecallParams = params(arguments)?;
            engine
                .force_recall(&p.topic, p.current_file.as_deref())
                .await
        }
        "auto_learn" => {
            let p: AutoLearnParams = params(arguments)?;
            engine.auto_learn(&p.text, p.context.as_deref())
        }
        "update_memory" => {
            let p: UpdateMemoryParams = params(arguments)?;
            engine.update_memory(&p.id, &p.content, p.reason.as_deref())
        }
        "delete_memory" => {
            let p: DeleteMemoryParams = params(arguments)?;
            engine.delete_memory(&p.id, p.reason.as_deref())
        }
        "list_memories" => {
            let p: ListMemoriesParams = params(arguments)?;
            engine.list_memories(p.r#type.as_deref(), p.limit)
        }
        "export_memories" => engine.export_memories(),
        "import_memories" => {
            let p: ImportMemoriesParams = params(arguments)?;
            engine.import_memories(&p.data)
        }
        "get_stats" => engine.get_stats(),
        "get_context" => engine.get_context().await,
        "health_check" => engine.health_check(),
        "scan_project" => {
            let p: ScanProjectParams = params(arguments)?;
            engine.scan_project(p.root.as_deref())
        }
        "verify_code" => {
            let p: VerifyCodeParams = params(arguments)?;
            engine.verify_code(&p.file, p.symbol.as_deref())
        }
        "verify_files" => engine.verify_files(),
        other => Err(format!("unknown tool: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CortexConfig;

    #[test]
    fn every_tool_advertises_a_schema() {
        let payload = tools_list_payload();
        let tools = payload["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 16);
        for tool in tools {
            assert!(tool["name"].is_string());
            assert!(tool["inputSchema"].is_object());
        }
    }

    #[tokio::test]
    async fn dispatch_wires_store_and_recall() {
        let mut engine = Engine::in_memory(CortexConfig::default());

        let stored = dispatch(
            &mut engine,
            "store_memory",
            json!({
                "type": "DECISION",
                "content": "background jobs run on a single dedicated queue"
            }),
        )
        .await
        .unwrap();
        assert!(stored.starts_with("Stored memory"));

        let recalled = dispatch(
            &mut engine,
            "recall_memory",
            json!({ "query": "background queue jobs" }),
        )
        .await
        .unwrap();
        assert!(recalled.contains("background jobs"));
    }

    #[tokio::test]
    async fn dispatch_rejects_bad_arguments_as_tool_errors() {
        let mut engine = Engine::in_memory(CortexConfig::default());
        let err = dispatch(&mut engine, "store_memory", json!({ "content": "x" }))
            .await
            .unwrap_err();
        assert!(err.contains("invalid arguments"));

        let err = dispatch(&mut engine, "no_such_tool", json!({}))
            .await
            .unwrap_err();
        assert!(err.contains("unknown tool"));
    }

    #[tokio::test]
    async fn health_check_works_through_dispatch() {
        let mut engine = Engine::in_memory(CortexConfig::default());
        let health = dispatch(&mut engine, "health_check", json!({}))
            .await
            .unwrap();
        assert!(health.contains("\"status\""));
    }
}
