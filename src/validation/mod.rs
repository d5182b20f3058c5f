// src/validation/mod.rs

//! On-demand scoring of completed runs by a secondary judge model.
//!
//! The judge grades how faithfully the recorded answer and SQL address the
//! original question, replying in strict JSON; scores are persisted per run.

use anyhow::Result;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::CoreError;
use crate::llm::{ChatMessage, ModelClient};
use crate::runs::Run;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct RunScore {
    pub id: String,
    pub run_id: String,
    pub judge_model: String,
    pub score: f64,
    pub verdict: String,
    pub rationale: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Deserialize)]
struct JudgeReply {
    score: f64,
    verdict: String,
    #[serde(default)]
    rationale: String,
}

pub struct ValidationHarness {
    db: SqlitePool,
    model: Arc<dyn ModelClient>,
    judge_model: String,
}

impl ValidationHarness {
    pub fn new(db: SqlitePool, model: Arc<dyn ModelClient>, judge_model: &str) -> Self {
        Self {
            db,
            model,
            judge_model: judge_model.to_string(),
        }
    }

    /// Score one terminal run. Only successful runs are gradable.
    pub async fn score_run(&self, run_id: &str) -> Result<RunScore, CoreError> {
        let run = sqlx::query_as::<_, Run>("SELECT * FROM runs WHERE id = ?")
            .bind(run_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| CoreError::InvalidInput(format!("unknown run {run_id}")))?;

        if run.status != "success" {
            return Err(CoreError::InvalidInput(format!(
                "run {run_id} is {} and cannot be scored",
                run.status
            )));
        }

        let reply = self
            .model
            .complete(&self.judge_model, &self.judge_prompt(&run))
            .await
            .map_err(|e| CoreError::Model(e.to_string()))?;

        let parsed = Self::parse_reply(&reply)
            .map_err(|e| CoreError::Model(format!("judge reply was not parseable: {e}")))?;

        let score = RunScore {
            id: Uuid::new_v4().to_string(),
            run_id: run_id.to_string(),
            judge_model: self.judge_model.clone(),
            score: parsed.score.clamp(0.0, 10.0),
            verdict: parsed.verdict,
            rationale: Some(parsed.rationale).filter(|r| !r.is_empty()),
            created_at: chrono::Utc::now().timestamp(),
        };

        sqlx::query(
            r#"
            INSERT INTO run_scores (id, run_id, judge_model, score, verdict, rationale, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&score.id)
        .bind(&score.run_id)
        .bind(&score.judge_model)
        .bind(score.score)
        .bind(&score.verdict)
        .bind(&score.rationale)
        .bind(score.created_at)
        .execute(&self.db)
        .await?;

        info!(
            "Scored run {}: {:.1}/10 ({})",
            run_id, score.score, score.verdict
        );
        Ok(score)
    }

    /// Score many runs; failures are logged and skipped.
    pub async fn score_runs(&self, run_ids: &[String]) -> Vec<RunScore> {
        let futures = run_ids.iter().map(|id| self.score_run(id));
        join_all(futures)
            .await
            .into_iter()
            .zip(run_ids)
            .filter_map(|(result, id)| match result {
                Ok(score) => Some(score),
                Err(e) => {
                    warn!("Scoring failed for run {}: {}", id, e);
                    None
                }
            })
            .collect()
    }

    fn judge_prompt(&self, run: &Run) -> Vec<ChatMessage> {
        vec![
            ChatMessage::system(
                "You grade answers produced by a SQL assistant. Given the \
                 question, the SQL that ran, and the recorded result, judge \
                 whether the answer faithfully addresses the question. Reply \
                 with strict JSON: {\"score\": 0-10, \"verdict\": \
                 \"correct\"|\"partial\"|\"incorrect\", \"rationale\": \"...\"}",
            ),
            ChatMessage::user(format!(
                "Question: {}\n\nSQL:\n{}\n\nResult: {}",
                run.question,
                run.sql_used.as_deref().unwrap_or("(none)"),
                run.result_data.as_deref().unwrap_or("(none)")
            )),
        ]
    }

    fn parse_reply(reply: &str) -> Result<JudgeReply> {
        // Judges occasionally wrap the JSON in a fence; strip it.
        let trimmed = reply.trim();
        let body = trimmed
            .strip_prefix("```json")
            .or_else(|| trimmed.strip_prefix("```"))
            .map(|s| s.trim_end_matches("```").trim())
            .unwrap_or(trimmed);
        Ok(serde_json::from_str(body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_json() {
        let reply = r#"{"score": 8.5, "verdict": "correct", "rationale": "matches"}"#;
        let parsed = ValidationHarness::parse_reply(reply).unwrap();
        assert_eq!(parsed.score, 8.5);
        assert_eq!(parsed.verdict, "correct");
    }

    #[test]
    fn parses_fenced_json() {
        let reply = "```json\n{\"score\": 3, \"verdict\": \"partial\"}\n```";
        let parsed = ValidationHarness::parse_reply(reply).unwrap();
        assert_eq!(parsed.score, 3.0);
        assert_eq!(parsed.rationale, "");
    }

    #[test]
    fn rejects_prose() {
        assert!(ValidationHarness::parse_reply("Looks good to me!").is_err());
    }
}
