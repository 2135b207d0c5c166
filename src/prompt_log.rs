//! Prompt logging
//!
//! Every completion, successful or not, is handed to the registered
//! [`PromptLogger`]s. Logging is best effort: a logger error is reported via
//! tracing and never fails the completion.
//!
//! The JSONL logger writes one redacted line per completion to
//! `prompts.jsonl`, rotating into `prompts.1.jsonl` .. `prompts.N.jsonl`.

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::LoggingConfig;
use crate::llm::ResponseEnvelope;

const LOG_FILE: &str = "prompts.jsonl";

/// Receives every completion envelope together with its text
pub trait PromptLogger: Send + Sync {
    fn log_prompt(&self, envelope: &ResponseEnvelope, prompt: &str, response: &str) -> Result<()>;
}

/// Run every logger, reporting failures without propagating them
pub fn log_quietly(
    loggers: &[Arc<dyn PromptLogger>],
    envelope: &ResponseEnvelope,
    prompt: &str,
    response: &str,
) {
    for logger in loggers {
        if let Err(e) = logger.log_prompt(envelope, prompt, response) {
            tracing::warn!(trace_id = %envelope.trace_id, "prompt logging failed: {e:#}");
        }
    }
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPromptLogger;

impl PromptLogger for NullPromptLogger {
    fn log_prompt(&self, _: &ResponseEnvelope, _: &str, _: &str) -> Result<()> {
        Ok(())
    }
}

static REDACTIONS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        // API keys
        (r"sk-[a-zA-Z0-9_-]{20,}", "sk-[REDACTED]"),
        (r"key-[a-zA-Z0-9]{20,}", "key-[REDACTED]"),
        // Bearer tokens
        (r"Bearer [a-zA-Z0-9._-]+", "Bearer [REDACTED]"),
        // Environment variable assignments
        (
            r"(?i)(api_key|secret|token|password|auth)=\S+",
            "$1=[REDACTED]",
        ),
    ]
    .into_iter()
    .filter_map(|(pattern, replacement)| Regex::new(pattern).ok().map(|re| (re, replacement)))
    .collect()
});

/// Mask credentials that leaked into prompt or response text
pub fn redact(input: &str) -> String {
    REDACTIONS
        .iter()
        .fold(input.to_string(), |text, (pattern, replacement)| {
            pattern.replace_all(&text, *replacement).into_owned()
        })
}

#[derive(Serialize)]
struct PromptLogLine<'a> {
    #[serde(flatten)]
    envelope: &'a ResponseEnvelope,
    prompt: String,
    response: String,
}

/// Append-only JSONL log with size-based rotation
pub struct JsonlPromptLogger {
    dir: PathBuf,
    max_file_size: u64,
    max_rotated_files: usize,
    file: Mutex<File>,
    current_size: AtomicU64,
}

impl JsonlPromptLogger {
    pub fn new(dir: impl Into<PathBuf>, max_file_size: u64, max_rotated_files: usize) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create prompt log directory {}", dir.display()))?;
        let file = open_append(&dir.join(LOG_FILE))?;
        let current_size = file.metadata().map(|m| m.len()).unwrap_or(0);

        Ok(Self {
            dir,
            max_file_size,
            max_rotated_files,
            file: Mutex::new(file),
            current_size: AtomicU64::new(current_size),
        })
    }

    pub fn from_config(dir: impl Into<PathBuf>, config: &LoggingConfig) -> Result<Self> {
        Self::new(dir, config.max_file_size, config.max_rotated_files)
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(LOG_FILE)
    }

    fn rotated_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("prompts.{index}.jsonl"))
    }

    /// prompts.jsonl -> prompts.1.jsonl -> ... -> prompts.N.jsonl (dropped)
    fn rotate(&self, file: &mut File) -> Result<()> {
        let current = self.path();
        if self.max_rotated_files > 0 {
            let oldest = self.rotated_path(self.max_rotated_files);
            if oldest.exists() {
                std::fs::remove_file(&oldest)?;
            }
            for i in (1..self.max_rotated_files).rev() {
                let from = self.rotated_path(i);
                if from.exists() {
                    std::fs::rename(&from, self.rotated_path(i + 1))?;
                }
            }
            std::fs::rename(&current, self.rotated_path(1))?;
        } else {
            std::fs::remove_file(&current)?;
        }

        *file = open_append(&current)?;
        self.current_size.store(0, Ordering::Relaxed);
        Ok(())
    }
}

fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open prompt log {}", path.display()))
}

impl PromptLogger for JsonlPromptLogger {
    fn log_prompt(&self, envelope: &ResponseEnvelope, prompt: &str, response: &str) -> Result<()> {
        let line = serde_json::to_string(&PromptLogLine {
            envelope,
            prompt: redact(prompt),
            response: redact(response),
        })?;

        let mut file = self
            .file
            .lock()
            .map_err(|_| anyhow::anyhow!("prompt log lock poisoned"))?;
        writeln!(file, "{line}")?;

        let written = line.len() as u64 + 1;
        let size = self.current_size.fetch_add(written, Ordering::Relaxed) + written;
        if size >= self.max_file_size {
            self.rotate(&mut file)?;
        }
        Ok(())
    }
}
