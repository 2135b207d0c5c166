//! CLI command handlers
//!
//! Wires configuration, storage, providers and the bridge together for the
//! `chatbridge` binary.

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tabled::{settings::Style, Table, Tabled};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::bridge::{ChatBridge, SendReport};
use crate::config::Config;
use crate::core::{
    ChatEvent, ChatMode, EventBus, EventKind, Feature, Message, MessageStatus, NotificationLevel,
    Subscription,
};
use crate::delivery::{FlushReport, MessageQueue, SendOutcome};
use crate::llm::{registry_from_config, FallbackChains, ModelRouter};
use crate::prompt_log::JsonlPromptLogger;
use crate::storage::usage::CleanupRequest;
use crate::storage::{LocalStorage, SqliteStore, UsageTracker};

/// Options shared by `chat` and `send`
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub session: String,
    pub mode: ChatMode,
    pub provider: Option<String>,
    pub sim: bool,
}

/// Storage handles opened from `[storage]`
struct AppContext {
    config: Config,
    store: Arc<SqliteStore>,
    storage: Arc<LocalStorage>,
    usage: Arc<UsageTracker>,
}

impl AppContext {
    fn open(config: Config) -> Result<Self> {
        let data_dir = config.storage.data_dir();
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

        let store = SqliteStore::open(config.storage.database_path())
            .context("Failed to open message database")?;
        let storage = open_local_storage(&config)?;
        let usage = UsageTracker::new(&data_dir).context("Failed to initialize usage tracker")?;

        Ok(Self {
            config,
            store: Arc::new(store),
            storage: Arc::new(storage),
            usage: Arc::new(usage),
        })
    }

    fn router(&self, sim: bool) -> Result<ModelRouter> {
        let registry = registry_from_config(&self.config.llm, sim);
        if registry.is_empty() {
            tracing::warn!("No LLM provider configured; set an API key or pass --sim");
        }

        let mut router = ModelRouter::from_config(&self.config.llm, registry)
            .context("Invalid fallback chain configuration")?
            .with_logger(self.usage.clone());
        if self.config.logging.prompt_log {
            let dir = self.config.prompt_log_dir();
            match JsonlPromptLogger::from_config(&dir, &self.config.logging) {
                Ok(logger) => router = router.with_logger(Arc::new(logger)),
                Err(e) => tracing::warn!("Prompt log disabled: {e:#}"),
            }
        }
        Ok(router)
    }

    fn bridge(&self, opts: &SessionOptions) -> Result<ChatBridge> {
        let router = self.router(opts.sim)?;
        let default_provider = self
            .config
            .llm
            .default_provider
            .clone()
            .filter(|name| router.registry().contains(name));

        let bridge = ChatBridge::builder(&opts.session)
            .store(self.store.clone())
            .storage(self.storage.clone())
            .router(Arc::new(router))
            .provider(default_provider)
            .chat_settings(self.config.chat.settings())
            .retry_config(self.config.retry.clone())
            .features(self.config.features.clone())
            .mode(opts.mode)
            .rate_window(Some(Duration::from_secs(
                self.config.chat.rate_limit_window_secs,
            )))
            .user_settings(&*self.store, &self.config.chat.user_id)
            .context("Failed to load user settings")?
            .build();

        if let Some(name) = opts.provider.as_deref() {
            bridge
                .set_provider(Some(name))
                .with_context(|| format!("Provider {name} is not available"))?;
        }
        Ok(bridge)
    }
}

fn open_local_storage(config: &Config) -> Result<LocalStorage> {
    let storage = LocalStorage::open(config.storage.local_dir(), &config.storage.prefix)
        .context("Failed to open local storage")?;
    Ok(storage.with_version(config.storage.version))
}

/// Print notifications to stderr for as long as the handle lives
fn print_notifications(bridge: &ChatBridge) -> Subscription {
    bridge.on(EventKind::Notification, |event| {
        if let ChatEvent::Notification { level, message } = event {
            let line = match level {
                NotificationLevel::Info => message.blue(),
                NotificationLevel::Warning => message.yellow(),
                NotificationLevel::Error => message.red(),
            };
            eprintln!("{line}");
        }
    })
}

fn status_label(status: MessageStatus) -> colored::ColoredString {
    match status {
        MessageStatus::Sent => "sent".green(),
        MessageStatus::Pending => "pending".yellow(),
        MessageStatus::Error => "error".red(),
        MessageStatus::Failed => "failed".red().bold(),
    }
}

fn print_report(report: &SendReport) {
    match &report.outcome {
        SendOutcome::Sent(_) => {}
        SendOutcome::Queued(_) => println!("{}", "(queued, will send when back online)".yellow()),
        SendOutcome::RetryScheduled { delay, .. } => println!(
            "{}",
            format!("(delivery failed, retrying in {}ms)", delay.as_millis()).yellow()
        ),
    }

    if let (Some(reply), Some(envelope)) = (&report.reply, &report.envelope) {
        println!("{}", reply.content);
        let mut meta = format!(
            "[{} via {}, fallbacks: {}, tokens: {}",
            envelope.model, envelope.provider, envelope.fallbacks_used, envelope.total_tokens
        );
        if envelope.estimated {
            meta.push_str(" (estimated)");
        }
        if envelope.cached {
            meta.push_str(", cached");
        }
        meta.push(']');
        println!("{}", meta.dimmed());
    }
}

fn print_flush(report: &FlushReport) {
    println!(
        "{} {} sent, {} failed, {} remaining",
        "Queue replayed:".cyan(),
        report.sent,
        report.failed,
        report.remaining
    );
}

fn print_history(messages: &[Message]) {
    for message in messages {
        println!(
            "{} {:>9} [{}] {}",
            message.created_at.format("%H:%M:%S").to_string().dimmed(),
            message.role.as_str(),
            status_label(message.status),
            message.content
        );
    }
}

/// One-shot send
pub async fn run_send(config: Config, message: &str, opts: SessionOptions) -> Result<()> {
    let ctx = AppContext::open(config)?;
    let bridge = ctx.bridge(&opts)?;
    let _notifications = print_notifications(&bridge);

    let report = bridge.send_message(message).await;
    bridge.shutdown();
    print_report(&report?);
    Ok(())
}

/// Line-oriented chat loop
pub async fn run_chat(config: Config, opts: SessionOptions) -> Result<()> {
    let ctx = AppContext::open(config)?;
    let bridge = ctx.bridge(&opts)?;
    let _notifications = print_notifications(&bridge);

    let history = bridge.load_history().await;
    println!(
        "{} session {} ({} messages), mode {}. Type /help for commands.",
        "chatbridge".bold().cyan(),
        opts.session,
        history.len(),
        bridge.get_current_mode()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(command) = line.strip_prefix('/') {
            if !handle_command(&bridge, command).await? {
                break;
            }
            continue;
        }
        match bridge.send_message(line).await {
            Ok(report) => print_report(&report),
            Err(e) => eprintln!("{} {}", "error:".red().bold(), e),
        }
    }

    bridge.shutdown();
    Ok(())
}

/// Returns `false` when the loop should stop
async fn handle_command(bridge: &ChatBridge, command: &str) -> Result<bool> {
    let mut parts = command.split_whitespace();
    let name = parts.next().unwrap_or_default();
    let arg = parts.next();

    match (name, arg) {
        ("quit" | "exit", _) => return Ok(false),
        ("help", _) => {
            println!("/mode <chat|code|image|assistant>  /provider <name|none>  /feature <name>");
            println!("/offline  /online  /history  /retry <id>  /clear  /quit");
        }
        ("mode", Some(mode)) => match mode.parse::<ChatMode>() {
            Ok(mode) => {
                bridge.set_mode(mode);
                println!("mode: {mode}");
            }
            Err(e) => eprintln!("{}", e.red()),
        },
        ("provider", Some(name)) => {
            let provider = (name != "none").then_some(name);
            match bridge.set_provider(provider) {
                Ok(()) => println!("provider: {}", provider.unwrap_or("chain order")),
                Err(e) => eprintln!("{}", e.to_string().red()),
            }
        }
        ("feature", Some(name)) => match name.parse::<Feature>() {
            Ok(feature) => {
                let enabled = bridge.toggle_feature(feature);
                println!("{feature}: {}", if enabled { "on" } else { "off" });
            }
            Err(e) => eprintln!("{}", e.red()),
        },
        ("offline", _) => {
            bridge.set_online(false).await;
            println!("{}", "offline".yellow());
        }
        ("online", _) => {
            if let Some(report) = bridge.set_online(true).await {
                print_flush(&report);
            }
        }
        ("history", _) => print_history(&bridge.get_messages()),
        ("retry", Some(id)) => match bridge.retry_message(id).await {
            Ok(outcome) => println!("{} {}", id, status_label(outcome.message().status)),
            Err(e) => eprintln!("{}", e.to_string().red()),
        },
        ("clear", _) => {
            let removed = bridge.clear_messages().await?;
            println!("cleared {removed} messages");
        }
        _ => eprintln!("{}", format!("unknown command: /{command}").red()),
    }
    Ok(true)
}

/// Print fallback chains with the provider of every model
pub fn run_chains(config: &Config, format: &str) -> Result<()> {
    let chains = FallbackChains::with_overrides(&config.llm.chains, &config.llm.models)
        .context("Invalid fallback chain configuration")?;

    if format == "json" {
        let output: serde_json::Map<String, serde_json::Value> = chains
            .iter()
            .map(|(task, models)| {
                let entries: Vec<serde_json::Value> = models
                    .iter()
                    .map(|m| {
                        serde_json::json!({
                            "model": m,
                            "provider": chains.provider_for(m),
                        })
                    })
                    .collect();
                (task.to_string(), serde_json::Value::Array(entries))
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    #[derive(Tabled)]
    struct ChainRow {
        #[tabled(rename = "Task")]
        task: String,
        #[tabled(rename = "#")]
        level: usize,
        #[tabled(rename = "Model")]
        model: String,
        #[tabled(rename = "Provider")]
        provider: String,
    }

    let rows: Vec<ChainRow> = chains
        .iter()
        .flat_map(|(task, models)| {
            let chains = &chains;
            models.iter().enumerate().map(move |(level, model)| ChainRow {
                task: task.to_string(),
                level,
                model: model.clone(),
                provider: chains.provider_for(model).unwrap_or("?").to_string(),
            })
        })
        .collect();

    println!("\n{}", "=== FALLBACK CHAINS ===".bold().cyan());
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    Ok(())
}

/// Show the offline queue of a session
pub fn run_queue(config: &Config, session: &str, format: &str) -> Result<()> {
    let storage = Arc::new(open_local_storage(config)?);
    let queue = MessageQueue::new(storage, EventBus::new(), session);
    let queued = queue.queued_messages();

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&queued)?);
        return Ok(());
    }
    if queued.is_empty() {
        println!("No queued messages for session {session}");
        return Ok(());
    }

    #[derive(Tabled)]
    struct QueueRow {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "Status")]
        status: String,
        #[tabled(rename = "Attempts")]
        attempts: u32,
        #[tabled(rename = "Queued At")]
        timestamp: String,
        #[tabled(rename = "Content")]
        content: String,
    }

    let rows: Vec<QueueRow> = queued
        .into_iter()
        .map(|q| QueueRow {
            id: q.id,
            status: format!("{:?}", q.status).to_lowercase(),
            attempts: q.attempts,
            timestamp: q.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            content: q.content.chars().take(60).collect(),
        })
        .collect();

    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    Ok(())
}

/// Usage summary by model and task type
pub fn run_usage(config: &Config, format: &str, cleanup_days: Option<u32>) -> Result<()> {
    let data_dir = config.storage.data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let tracker = UsageTracker::new(&data_dir).context("Failed to initialize usage tracker")?;

    if let Some(days) = cleanup_days {
        println!(
            "{}",
            format!("Cleaning up logs older than {} days...", days).yellow()
        );
        let result = tracker.cleanup(CleanupRequest {
            older_than_days: Some(days),
            ..Default::default()
        })?;
        println!("{} {} logs deleted", "✓".green(), result.deleted_logs);
        return Ok(());
    }

    let summary = tracker.get_summary()?;
    let models = tracker.get_usage_by_model()?;
    let tasks = tracker.get_usage_by_task()?;

    if format == "json" {
        let output = serde_json::json!({
            "summary": summary,
            "by_model": models,
            "by_task": tasks,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("\n{}", "=== USAGE SUMMARY ===".bold().cyan());

    #[derive(Tabled)]
    struct SummaryRow {
        #[tabled(rename = "Metric")]
        metric: &'static str,
        #[tabled(rename = "Value")]
        value: String,
    }

    let summary_rows = vec![
        SummaryRow {
            metric: "Requests",
            value: summary.request_count.to_string(),
        },
        SummaryRow {
            metric: "Failed",
            value: summary.failed_count.to_string(),
        },
        SummaryRow {
            metric: "Cache Hits",
            value: summary.cached_count.to_string(),
        },
        SummaryRow {
            metric: "Fell Back",
            value: summary.fallback_count.to_string(),
        },
        SummaryRow {
            metric: "Total Tokens",
            value: summary.total_tokens.to_string(),
        },
        SummaryRow {
            metric: "Total Cost",
            value: format!("${:.4}", summary.total_cost),
        },
        SummaryRow {
            metric: "Database Size",
            value: summary.db_size_human.clone(),
        },
    ];
    let mut table = Table::new(summary_rows);
    table.with(Style::rounded());
    println!("{table}");

    if !models.is_empty() {
        println!("\n{}", "=== USAGE BY MODEL ===".bold().cyan());

        #[derive(Tabled)]
        struct ModelRow {
            #[tabled(rename = "Provider")]
            provider: String,
            #[tabled(rename = "Model")]
            model: String,
            #[tabled(rename = "Requests")]
            requests: i64,
            #[tabled(rename = "Failures")]
            failures: i64,
            #[tabled(rename = "Input Tokens")]
            input_tokens: i64,
            #[tabled(rename = "Output Tokens")]
            output_tokens: i64,
            #[tabled(rename = "Cost")]
            cost: String,
        }

        let rows: Vec<ModelRow> = models
            .iter()
            .map(|m| ModelRow {
                provider: m.provider.clone(),
                model: m.model.clone(),
                requests: m.request_count,
                failures: m.failure_count,
                input_tokens: m.input_tokens,
                output_tokens: m.output_tokens,
                cost: format!("${:.4}", m.cost),
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
    }

    if !tasks.is_empty() {
        println!("\n{}", "=== USAGE BY TASK ===".bold().cyan());

        #[derive(Tabled)]
        struct TaskRow {
            #[tabled(rename = "Task")]
            task: String,
            #[tabled(rename = "Requests")]
            requests: i64,
            #[tabled(rename = "Tokens")]
            tokens: i64,
            #[tabled(rename = "Avg Fallbacks")]
            avg_fallbacks: String,
            #[tabled(rename = "Avg Latency")]
            avg_latency: String,
        }

        let rows: Vec<TaskRow> = tasks
            .iter()
            .map(|t| TaskRow {
                task: t.task_type.clone(),
                requests: t.request_count,
                tokens: t.tokens,
                avg_fallbacks: format!("{:.2}", t.avg_fallbacks),
                avg_latency: format!("{:.0}ms", t.avg_latency_ms),
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
    }

    Ok(())
}

/// Print the config path and effective config; `init` writes defaults
pub fn run_config(config: &Config, init: bool) -> Result<()> {
    let path: PathBuf = Config::config_path()?;
    if init {
        if path.exists() {
            println!("{} {}", "Config already exists:".yellow(), path.display());
        } else {
            let written = Config::default().save()?;
            println!("{} {}", "✓ Wrote".green(), written.display());
        }
        return Ok(());
    }

    println!("{} {}", "Config file:".bold(), path.display());
    println!("{} {}", "Data dir:".bold(), config.storage.data_dir().display());
    println!();
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}
