//! Usage accounting
//!
//! Append-only SQLite log of completion envelopes (`usage.db`), with
//! summaries by model and by task type and an estimated cost per request.

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::llm::ResponseEnvelope;
use crate::prompt_log::PromptLogger;

/// Usage tracker with SQLite backend
pub struct UsageTracker {
    db_path: Option<PathBuf>,
    db: Arc<Mutex<Connection>>,
}

impl UsageTracker {
    /// Open `usage.db` inside `dir`
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        std::fs::create_dir_all(dir.as_ref())?;
        let db_path = dir.as_ref().join("usage.db");
        let conn = Connection::open(&db_path)
            .with_context(|| format!("Failed to open database: {}", db_path.display()))?;
        Self::init(conn, Some(db_path))
    }

    /// Throwaway in-memory log
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?, None)
    }

    fn init(conn: Connection, db_path: Option<PathBuf>) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS usage_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                trace_id TEXT NOT NULL,
                session_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                task_type TEXT NOT NULL,
                provider TEXT NOT NULL,
                model TEXT NOT NULL,
                fallbacks_used INTEGER NOT NULL,
                input_tokens INTEGER NOT NULL,
                output_tokens INTEGER NOT NULL,
                latency_ms INTEGER NOT NULL,
                cost_usd REAL NOT NULL,
                success BOOLEAN NOT NULL,
                cached BOOLEAN NOT NULL,
                estimated BOOLEAN DEFAULT 0,
                error TEXT
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_logs_session ON usage_logs(session_id)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_logs_timestamp ON usage_logs(timestamp)",
            [],
        )?;

        Ok(Self {
            db_path,
            db: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|_| anyhow::anyhow!("usage database lock poisoned"))
    }

    /// Append one envelope
    pub fn log_envelope(&self, envelope: &ResponseEnvelope) -> Result<()> {
        let cost = if envelope.cached {
            0.0
        } else {
            calculate_cost(
                &envelope.provider,
                &envelope.model,
                envelope.input_tokens,
                envelope.output_tokens,
            )
        };

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO usage_logs
             (trace_id, session_id, timestamp, task_type, provider, model, fallbacks_used,
              input_tokens, output_tokens, latency_ms, cost_usd, success, cached, estimated, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                &envelope.trace_id,
                &envelope.session_id,
                envelope
                    .created_at
                    .to_rfc3339_opts(SecondsFormat::Micros, true),
                envelope.task_type.as_str(),
                &envelope.provider,
                &envelope.model,
                i64::try_from(envelope.fallbacks_used).unwrap_or(i64::MAX),
                envelope.input_tokens,
                envelope.output_tokens,
                i64::try_from(envelope.latency_ms).unwrap_or(i64::MAX),
                cost,
                envelope.success,
                envelope.cached,
                envelope.estimated,
                &envelope.error,
            ],
        )?;
        Ok(())
    }

    /// Get summary statistics
    pub fn get_summary(&self) -> Result<UsageSummary> {
        let conn = self.conn()?;

        let summary = conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(CASE WHEN success THEN 0 ELSE 1 END), 0),
                    COALESCE(SUM(CASE WHEN cached THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN fallbacks_used > 0 THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(input_tokens + output_tokens), 0),
                    COALESCE(SUM(cost_usd), 0)
             FROM usage_logs",
            [],
            |row| {
                Ok(UsageSummary {
                    request_count: row.get::<_, i64>(0)? as u64,
                    failed_count: row.get::<_, i64>(1)? as u64,
                    cached_count: row.get::<_, i64>(2)? as u64,
                    fallback_count: row.get::<_, i64>(3)? as u64,
                    total_tokens: row.get::<_, i64>(4)? as u64,
                    total_cost: row.get(5)?,
                    db_size_human: String::new(),
                })
            },
        )?;

        let db_size = match &self.db_path {
            Some(path) => std::fs::metadata(path)?.len(),
            None => 0,
        };

        Ok(UsageSummary {
            db_size_human: format_bytes(db_size),
            ..summary
        })
    }

    /// Get usage by model
    pub fn get_usage_by_model(&self) -> Result<Vec<ModelUsage>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT model, provider,
                    SUM(input_tokens) as input,
                    SUM(output_tokens) as output,
                    SUM(cost_usd) as cost,
                    COUNT(*) as count,
                    SUM(CASE WHEN success THEN 0 ELSE 1 END) as failures
             FROM usage_logs
             GROUP BY model, provider
             ORDER BY count DESC, model ASC",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(ModelUsage {
                model: row.get(0)?,
                provider: row.get(1)?,
                input_tokens: row.get(2)?,
                output_tokens: row.get(3)?,
                cost: row.get(4)?,
                request_count: row.get(5)?,
                failure_count: row.get(6)?,
            })
        })?;

        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to collect model usage")
    }

    /// Get usage by task type
    pub fn get_usage_by_task(&self) -> Result<Vec<TaskUsage>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT task_type,
                    SUM(input_tokens + output_tokens) as tokens,
                    COUNT(*) as count,
                    AVG(fallbacks_used) as avg_fallbacks,
                    AVG(latency_ms) as avg_latency
             FROM usage_logs
             GROUP BY task_type
             ORDER BY count DESC, task_type ASC",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(TaskUsage {
                task_type: row.get(0)?,
                tokens: row.get(1)?,
                request_count: row.get(2)?,
                avg_fallbacks: row.get(3)?,
                avg_latency_ms: row.get(4)?,
            })
        })?;

        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to collect task usage")
    }

    /// Entries for one chat session, newest first
    pub fn get_session_logs(&self, session_id: &str) -> Result<Vec<UsageLogEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, trace_id, timestamp, task_type, provider, model, fallbacks_used,
                    input_tokens, output_tokens, success, cached, error
             FROM usage_logs
             WHERE session_id = ?1
             ORDER BY timestamp DESC, id DESC",
        )?;

        let rows = stmt.query_map([session_id], |row| {
            Ok(UsageLogEntry {
                id: row.get(0)?,
                trace_id: row.get(1)?,
                timestamp: row.get(2)?,
                task_type: row.get(3)?,
                provider: row.get(4)?,
                model: row.get(5)?,
                fallbacks_used: row.get(6)?,
                input_tokens: row.get(7)?,
                output_tokens: row.get(8)?,
                success: row.get(9)?,
                cached: row.get(10)?,
                error: row.get(11)?,
            })
        })?;

        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to collect session logs")
    }

    /// Delete old or selected logs
    pub fn cleanup(&self, req: CleanupRequest) -> Result<CleanupResponse> {
        let conn = self.conn()?;

        let deleted_logs = if let Some(days) = req.older_than_days {
            let cutoff = Utc::now() - chrono::Duration::days(i64::from(days));
            conn.execute(
                "DELETE FROM usage_logs WHERE timestamp < ?1",
                params![cutoff.to_rfc3339_opts(SecondsFormat::Micros, true)],
            )?
        } else if let Some(session_ids) = req.session_ids {
            let mut deleted = 0;
            for session_id in session_ids {
                deleted += conn.execute(
                    "DELETE FROM usage_logs WHERE session_id = ?1",
                    params![session_id],
                )?;
            }
            deleted
        } else if req.delete_all {
            conn.execute("DELETE FROM usage_logs", [])?
        } else {
            0
        };

        if self.db_path.is_some() {
            conn.execute("VACUUM", [])?;
        }

        Ok(CleanupResponse {
            deleted_logs: deleted_logs as u64,
        })
    }
}

impl PromptLogger for UsageTracker {
    fn log_prompt(&self, envelope: &ResponseEnvelope, _prompt: &str, _response: &str) -> Result<()> {
        self.log_envelope(envelope)
    }
}

/// Per-million-token prices in USD, `(input, output)`
fn default_pricing() -> HashMap<&'static str, (f64, f64)> {
    [
        ("gpt-4o", (5.0, 15.0)),
        ("gpt-4o-mini", (0.15, 0.60)),
        ("claude-3-5-sonnet", (3.0, 15.0)),
        ("claude-3-5-haiku", (0.80, 4.0)),
        ("deepseek/deepseek-coder", (0.14, 0.28)),
    ]
    .into()
}

/// Estimated cost of one request; unknown models are free
pub fn calculate_cost(_provider: &str, model: &str, input_tokens: u32, output_tokens: u32) -> f64 {
    let pricing = default_pricing();
    // Dated snapshots (claude-3-5-sonnet-20241022) share the family price
    let price = pricing.get(model).or_else(|| {
        pricing
            .iter()
            .filter(|(family, _)| model.starts_with(*family))
            .max_by_key(|(family, _)| family.len())
            .map(|(_, price)| price)
    });

    match price {
        Some((input, output)) => {
            input * f64::from(input_tokens) / 1_000_000.0
                + output * f64::from(output_tokens) / 1_000_000.0
        }
        None => 0.0,
    }
}

// Data structures

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageSummary {
    pub request_count: u64,
    pub failed_count: u64,
    pub cached_count: u64,
    pub fallback_count: u64,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub db_size_human: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelUsage {
    pub model: String,
    pub provider: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cost: f64,
    pub request_count: i64,
    pub failure_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskUsage {
    pub task_type: String,
    pub tokens: i64,
    pub request_count: i64,
    pub avg_fallbacks: f64,
    pub avg_latency_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageLogEntry {
    pub id: i64,
    pub trace_id: String,
    pub timestamp: String,
    pub task_type: String,
    pub provider: String,
    pub model: String,
    pub fallbacks_used: i64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub success: bool,
    pub cached: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CleanupRequest {
    pub older_than_days: Option<u32>,
    pub session_ids: Option<Vec<String>>,
    #[serde(default)]
    pub delete_all: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupResponse {
    pub deleted_logs: u64,
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}
