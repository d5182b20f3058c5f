// src/pipeline/nodes/schema.rs

use async_trait::async_trait;
use glob::Pattern;

use crate::engine::EngineHandle;
use crate::error::{CoreError, ErrorKind};
use crate::llm::ChatMessage;
use crate::pipeline::{ids, NodeOutcome, PipelineContext, PipelineNode, PipelineState};

/// Tables included in the schema snippet at most.
const MAX_SCHEMA_TABLES: usize = 25;
/// Tables sampled for example rows.
const MAX_SAMPLED_TABLES: usize = 3;
/// Rows per sampled table.
const SAMPLE_ROWS: usize = 5;

fn table_included(table: &str, included: &str) -> bool {
    let included = included.trim();
    if included.is_empty() || included == "*" {
        return true;
    }
    included
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .any(|p| Pattern::new(p).map(|p| p.matches(table)).unwrap_or(p == table))
}

fn schema_failure(e: CoreError) -> NodeOutcome {
    match e.kind() {
        ErrorKind::ConnectError => NodeOutcome::fail(ErrorKind::ConnectError, e.to_string()),
        _ => NodeOutcome::fail(ErrorKind::SchemaError, e.to_string()),
    }
}

/// Enumerate the agent's visible tables and build a schema description plus a
/// small sample. In single-table mode the table list is never queried; only
/// the selected table is described.
pub struct PrepareContext;

impl PrepareContext {
    async fn describe(
        engine: &EngineHandle,
        tables: &[String],
    ) -> Result<(String, String), CoreError> {
        let mut schema_lines = Vec::new();
        for table in tables.iter().take(MAX_SCHEMA_TABLES) {
            let columns = engine.list_columns(table).await?;
            let rendered: Vec<String> = columns
                .iter()
                .map(|c| format!("{} {}", c.name, c.data_type))
                .collect();
            schema_lines.push(format!("{}({})", table, rendered.join(", ")));
        }

        let mut samples = Vec::new();
        for table in tables.iter().take(MAX_SAMPLED_TABLES) {
            let rows = engine.sample(table, SAMPLE_ROWS).await?;
            let header = rows.columns.join(" | ");
            let body: Vec<String> = rows
                .rows
                .iter()
                .map(|row| {
                    row.iter()
                        .map(|v| match v {
                            serde_json::Value::String(s) => s.clone(),
                            other => other.to_string(),
                        })
                        .collect::<Vec<_>>()
                        .join(" | ")
                })
                .collect();
            samples.push(format!("== {} ==\n{}\n{}", table, header, body.join("\n")));
        }

        Ok((schema_lines.join("\n"), samples.join("\n\n")))
    }
}

#[async_trait]
impl PipelineNode for PrepareContext {
    fn id(&self) -> &'static str {
        ids::PREPARE_CONTEXT
    }

    fn fatal(&self) -> bool {
        true
    }

    async fn run(&self, state: &mut PipelineState, ctx: &PipelineContext) -> NodeOutcome {
        let bundle = match ctx.bundle(state) {
            Ok(bundle) => bundle,
            Err(outcome) => return outcome,
        };
        let engine = match ctx.engine(state) {
            Ok(engine) => engine,
            Err(outcome) => return outcome,
        };

        let tables: Vec<String> = if bundle.agent.single_table_mode {
            match bundle.agent.selected_table.as_deref().map(str::trim) {
                Some(table) if !table.is_empty() => vec![table.to_string()],
                _ => {
                    return NodeOutcome::fail(
                        ErrorKind::SchemaError,
                        "single-table agent has no selected table",
                    )
                }
            }
        } else {
            let all = match engine.list_tables().await {
                Ok(all) => all,
                Err(e) => return schema_failure(e),
            };
            let filtered: Vec<String> = all
                .into_iter()
                .filter(|t| table_included(t, &bundle.agent.included_tables))
                .collect();
            if filtered.is_empty() {
                return NodeOutcome::fail(
                    ErrorKind::SchemaError,
                    "no tables visible to this agent",
                );
            }
            filtered
        };

        match Self::describe(&engine, &tables).await {
            Ok((schema, samples)) => {
                state.connection_kind = Some(engine.dialect().as_str().to_string());
                state.schema_snippet = Some(schema);
                state.sample_rows = Some(samples);
                NodeOutcome::Continue
            }
            Err(e) => schema_failure(e),
        }
    }
}

/// Optional auxiliary model pass that condenses the table list and question
/// into a focused hint appended to the schema snippet.
pub struct ProcessInitialContext;

#[async_trait]
impl PipelineNode for ProcessInitialContext {
    fn id(&self) -> &'static str {
        ids::PROCESS_INITIAL_CONTEXT
    }

    async fn run(&self, state: &mut PipelineState, ctx: &PipelineContext) -> NodeOutcome {
        let bundle = match ctx.bundle(state) {
            Ok(bundle) => bundle,
            Err(outcome) => return outcome,
        };
        if !bundle.agent.processing_enabled {
            return NodeOutcome::Skip;
        }

        let schema = state.schema_snippet.clone().unwrap_or_default();
        let messages = [
            ChatMessage::system(
                "You condense database schemas. Given a schema and a question, \
                 name the tables and columns that matter and any join keys. \
                 Reply in at most five short lines.",
            ),
            ChatMessage::user(format!(
                "Schema:\n{}\n\nQuestion: {}",
                schema, state.user_input
            )),
        ];

        match ctx.model.complete(&bundle.agent.model_id, &messages).await {
            Ok(hint) => {
                state.schema_snippet = Some(format!("{}\n\nFOCUS:\n{}", schema, hint.trim()));
                NodeOutcome::Continue
            }
            Err(e) => NodeOutcome::fail(ErrorKind::ModelError, e.to_string()),
        }
    }
}
