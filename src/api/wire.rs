// src/api/wire.rs
// Wire DTOs: ISO-8601 timestamps, parsed result payloads, masked secrets.

use serde::Serialize;
use serde_json::Value;

use crate::agents::Agent;
use crate::auth::User;
use crate::connections::Connection;
use crate::runs::Run;
use crate::sessions::{ChatSession, Message};

/// Unix seconds to ISO-8601 UTC.
pub fn iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|t| t.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
        .unwrap_or_default()
}

#[derive(Debug, Serialize)]
pub struct UserDto {
    pub id: String,
    pub email: String,
    pub display_name: Option<String>,
    pub is_active: bool,
    pub created_at: String,
}

impl From<User> for UserDto {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            email: u.email,
            display_name: u.display_name,
            is_active: u.is_active,
            created_at: iso(u.created_at),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ConnectionDto {
    pub id: String,
    pub kind: String,
    pub payload: Value,
    pub version: i64,
    pub created_at: String,
}

impl From<Connection> for ConnectionDto {
    fn from(c: Connection) -> Self {
        let mut payload = c.payload;
        // Never echo credentials back.
        if let Some(obj) = payload.as_object_mut() {
            if obj.contains_key("password") {
                obj.insert("password".to_string(), Value::String("***".to_string()));
            }
        }
        Self {
            id: c.id,
            kind: c.kind.as_str().to_string(),
            payload,
            version: c.version,
            created_at: iso(c.created_at),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AgentDto {
    pub id: String,
    pub name: String,
    pub connection_id: String,
    pub model_id: String,
    pub top_k: i64,
    pub included_tables: String,
    pub advanced: bool,
    pub processing_enabled: bool,
    pub refinement_enabled: bool,
    pub single_table_mode: bool,
    pub selected_table: Option<String>,
    pub created_at: String,
}

impl From<Agent> for AgentDto {
    fn from(a: Agent) -> Self {
        Self {
            id: a.id,
            name: a.name,
            connection_id: a.connection_id,
            model_id: a.model_id,
            top_k: a.top_k,
            included_tables: a.included_tables,
            advanced: a.advanced,
            processing_enabled: a.processing_enabled,
            refinement_enabled: a.refinement_enabled,
            single_table_mode: a.single_table_mode,
            selected_table: a.selected_table,
            created_at: iso(a.created_at),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RunDto {
    pub id: String,
    pub agent_id: String,
    pub chat_session_id: Option<String>,
    pub question: String,
    pub status: String,
    pub sql_used: Option<String>,
    pub result_data: Option<Value>,
    pub execution_ms: Option<i64>,
    pub result_rows_count: Option<i64>,
    pub error_kind: Option<String>,
    pub created_at: String,
    pub finished_at: Option<String>,
}

impl From<Run> for RunDto {
    fn from(r: Run) -> Self {
        let result_data = r
            .result_data
            .as_deref()
            .map(|raw| serde_json::from_str(raw).unwrap_or(Value::String(raw.to_string())));
        Self {
            id: r.id,
            agent_id: r.agent_id,
            chat_session_id: r.chat_session_id,
            question: r.question,
            status: r.status,
            sql_used: r.sql_used,
            result_data,
            execution_ms: r.execution_ms,
            result_rows_count: r.result_rows_count,
            error_kind: r.error_kind,
            created_at: iso(r.created_at),
            finished_at: r.finished_at.map(iso),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ChatSessionDto {
    pub id: String,
    pub agent_id: String,
    pub title: String,
    pub status: String,
    pub context_summary: Option<String>,
    pub total_messages: i64,
    pub created_at: String,
    pub last_activity: String,
}

impl From<ChatSession> for ChatSessionDto {
    fn from(s: ChatSession) -> Self {
        Self {
            id: s.id,
            agent_id: s.agent_id,
            title: s.title,
            status: s.status,
            context_summary: s.context_summary,
            total_messages: s.total_messages,
            created_at: iso(s.created_at),
            last_activity: iso(s.last_activity),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MessageDto {
    pub id: String,
    pub chat_session_id: String,
    pub run_id: Option<String>,
    pub role: String,
    pub content: String,
    pub sql_query: Option<String>,
    pub sequence_order: i64,
    pub created_at: String,
}

impl From<Message> for MessageDto {
    fn from(m: Message) -> Self {
        Self {
            id: m.id,
            chat_session_id: m.chat_session_id,
            run_id: m.run_id,
            role: m.role,
            content: m.content,
            sql_query: m.sql_query,
            sequence_order: m.sequence_order,
            created_at: iso(m.created_at),
        }
    }
}
