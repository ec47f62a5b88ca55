//! # Queue Engine CLI
//!
//! Command-line interface for the queue engine.
//!
//! This module provides CLI commands for:
//! - Configuration validation and display
//! - Replaying scripted queue operations against an in-process registry
//!
//! ## Replay scripts
//!
//! A replay script is a YAML document with a list of steps. Each step names
//! its operation with `op` and carries that operation's arguments:
//!
//! ```yaml
//! steps:
//!   - op: post
//!     queue: orders
//!     bodies: ["first", "second"]
//!     save_as: posted
//!   - op: get
//!     queue: orders
//!     max: 1
//!   - op: sleep
//!     seconds: 60
//!   - op: delete
//!     queue: orders
//!     id: $posted[1]
//! ```
//!
//! Replays run against a manually advanced clock: `sleep` moves time forward
//! instantly. IDs saved with `save_as` are referenced as `$name` (first ID) or
//! `$name[index]`. Each step prints one JSON line with its result or error.

use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use queue_engine_core::{
    Clock, ConfigurationError, DeliveryMode, EngineConfig, HttpPushTransport, ManualClock, Message,
    MessageId, PostOptions, QueueError, QueueRegistry, QueueUpdate, Timestamp, ValidationError,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

// ============================================================================
// CLI Structure
// ============================================================================

/// Queue Engine CLI - reservation-based message queues with push delivery
#[derive(Parser)]
#[command(name = "queue-engine")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Reservation-based message queue engine")]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "QE_CONFIG_FILE")]
    pub config: Option<PathBuf>,

    /// Logging level, overriding the configured one
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long)]
    pub json_logs: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Validate configuration
    Config {
        /// Show resolved configuration
        #[arg(short, long)]
        show: bool,

        /// Output format for configuration
        #[arg(short = 'f', long, default_value = "yaml")]
        format: ConfigFormat,
    },

    /// Execute a replay script
    Replay {
        /// Script file (YAML)
        script: PathBuf,

        /// Exit successfully even when steps fail
        #[arg(long)]
        allow_errors: bool,
    },
}

/// Configuration format options
#[derive(Clone, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum ConfigFormat {
    /// YAML format
    Yaml,
    /// JSON format
    Json,
}

// ============================================================================
// CLI Error Types
// ============================================================================

/// CLI-specific errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Invalid script {path}: {message}")]
    InvalidScript { path: PathBuf, message: String },

    #[error("Command failed: {message}")]
    CommandFailed { message: String },

    #[error("Invalid argument: {arg} - {message}")]
    InvalidArgument { arg: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Output error: {0}")]
    Output(#[from] serde_json::Error),
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 1,
            Self::InvalidScript { .. } => 2,
            Self::CommandFailed { .. } => 3,
            Self::InvalidArgument { .. } => 4,
            Self::Io(_) => 5,
            Self::Queue(_) => 6,
            Self::Output(_) => 7,
        }
    }
}

// ============================================================================
// Replay Script Types
// ============================================================================

/// Parsed replay script
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayScript {
    pub steps: Vec<Step>,
}

impl ReplayScript {
    /// Read and parse a script file
    pub fn from_file(path: &Path) -> Result<Self, CliError> {
        let contents = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&contents).map_err(|e| CliError::InvalidScript {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }
}

fn default_count() -> usize {
    1
}

/// A single queue operation in a replay script
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    Post {
        queue: String,
        bodies: Vec<String>,
        #[serde(default)]
        delay: i64,
        #[serde(default)]
        timeout: Option<i64>,
        #[serde(default)]
        save_as: Option<String>,
    },
    Get {
        queue: String,
        #[serde(default = "default_count")]
        max: usize,
        #[serde(default)]
        save_as: Option<String>,
    },
    Peek {
        queue: String,
        #[serde(default = "default_count")]
        count: usize,
    },
    Delete {
        queue: String,
        id: String,
    },
    Release {
        queue: String,
        id: String,
        #[serde(default)]
        delay: i64,
    },
    Touch {
        queue: String,
        id: String,
    },
    Clear {
        queue: String,
    },
    Size {
        queue: String,
    },
    Info {
        queue: String,
    },
    Update {
        queue: String,
        #[serde(default)]
        push_type: Option<DeliveryMode>,
        #[serde(default)]
        retries: Option<u32>,
    },
    Subscribe {
        queue: String,
        endpoint: String,
    },
    Unsubscribe {
        queue: String,
        endpoint: String,
    },
    DeleteQueue {
        queue: String,
    },
    PushStatus {
        queue: String,
        id: String,
    },
    Acknowledge {
        queue: String,
        id: String,
        endpoint: String,
    },
    Sleep {
        seconds: i64,
    },
}

impl Step {
    /// Operation name as written in scripts
    pub fn op(&self) -> &'static str {
        match self {
            Self::Post { .. } => "post",
            Self::Get { .. } => "get",
            Self::Peek { .. } => "peek",
            Self::Delete { .. } => "delete",
            Self::Release { .. } => "release",
            Self::Touch { .. } => "touch",
            Self::Clear { .. } => "clear",
            Self::Size { .. } => "size",
            Self::Info { .. } => "info",
            Self::Update { .. } => "update",
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
            Self::DeleteQueue { .. } => "delete_queue",
            Self::PushStatus { .. } => "push_status",
            Self::Acknowledge { .. } => "acknowledge",
            Self::Sleep { .. } => "sleep",
        }
    }
}

/// One line of replay output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub step: usize,
    pub op: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Totals of a finished replay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplaySummary {
    pub executed: usize,
    pub failed: usize,
}

// ============================================================================
// Main Entry Point
// ============================================================================

/// Main CLI entry point
pub async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();

    let config = EngineConfig::load(cli.config.as_deref())?;

    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    initialize_logging(&level, cli.json_logs || config.logging.json_format)?;

    let mut stdout = std::io::stdout().lock();
    match cli.command {
        Commands::Config { show, format } => {
            execute_config_command(&config, show, format, &mut stdout)
        }
        Commands::Replay {
            script,
            allow_errors,
        } => execute_replay_command(&script, allow_errors, config, &mut stdout).await,
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// Initialize logging; diagnostics go to stderr so stdout stays parseable
fn initialize_logging(level: &str, json: bool) -> Result<(), CliError> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let result = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };

    result.map_err(|e| CliError::CommandFailed {
        message: format!("failed to initialize logging: {}", e),
    })
}

/// Validate configuration and optionally print it
pub fn execute_config_command(
    config: &EngineConfig,
    show: bool,
    format: ConfigFormat,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    config.validate()?;

    if !show {
        writeln!(out, "Configuration is valid")?;
        return Ok(());
    }

    let rendered = match format {
        ConfigFormat::Yaml => {
            serde_yaml::to_string(config).map_err(|e| CliError::CommandFailed {
                message: format!("failed to render configuration: {}", e),
            })?
        }
        ConfigFormat::Json => serde_json::to_string_pretty(config)?,
    };
    writeln!(out, "{}", rendered.trim_end())?;
    Ok(())
}

async fn execute_replay_command(
    script_path: &Path,
    allow_errors: bool,
    config: EngineConfig,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let script = ReplayScript::from_file(script_path)?;
    info!(
        script = %script_path.display(),
        steps = script.steps.len(),
        "Replaying script"
    );

    let transport =
        HttpPushTransport::new(std::time::Duration::from_secs(config.push.request_timeout_seconds))?;
    let clock = ManualClock::new(Timestamp::now());
    let registry = QueueRegistry::with_components(config, Arc::new(clock.clone()), Arc::new(transport));

    let summary = run_replay(&script, &registry, &clock, out).await?;
    info!(
        executed = summary.executed,
        failed = summary.failed,
        "Replay finished"
    );

    if summary.failed > 0 && !allow_errors {
        return Err(CliError::CommandFailed {
            message: format!("{} of {} steps failed", summary.failed, summary.executed),
        });
    }
    Ok(())
}

/// Execute every step of `script`, writing one JSON line per step
///
/// Step failures are reported in the output and counted; only output errors
/// abort the replay.
pub async fn run_replay(
    script: &ReplayScript,
    registry: &QueueRegistry,
    clock: &ManualClock,
    out: &mut dyn Write,
) -> Result<ReplaySummary, CliError> {
    let mut saved: HashMap<String, Vec<MessageId>> = HashMap::new();
    let mut failed = 0;

    for (index, step) in script.steps.iter().enumerate() {
        let outcome = match execute_step(step, registry, clock, &mut saved).await {
            Ok(result) => StepOutcome {
                step: index,
                op: step.op().to_string(),
                result: Some(result),
                error: None,
            },
            Err(error) => {
                warn!(step = index, op = step.op(), error = %error, "Replay step failed");
                failed += 1;
                StepOutcome {
                    step: index,
                    op: step.op().to_string(),
                    result: None,
                    error: Some(error.to_string()),
                }
            }
        };
        writeln!(out, "{}", serde_json::to_string(&outcome)?)?;
    }

    Ok(ReplaySummary {
        executed: script.steps.len(),
        failed,
    })
}

async fn execute_step(
    step: &Step,
    registry: &QueueRegistry,
    clock: &ManualClock,
    saved: &mut HashMap<String, Vec<MessageId>>,
) -> Result<serde_json::Value, CliError> {
    debug!(op = step.op(), "Executing replay step");

    let value = match step {
        Step::Post {
            queue,
            bodies,
            delay,
            timeout,
            save_as,
        } => {
            let mut options = PostOptions::new().with_delay(seconds("delay", *delay)?);
            if let Some(timeout) = timeout {
                options = options.with_timeout(seconds("timeout", *timeout)?);
            }
            let bodies = bodies.iter().map(|b| Bytes::from(b.clone())).collect();
            let ids = registry.queue(queue)?.post(bodies, options).await?;
            if let Some(name) = save_as {
                saved.insert(name.clone(), ids.clone());
            }
            serde_json::to_value(ids)?
        }
        Step::Get {
            queue,
            max,
            save_as,
        } => {
            let messages = registry.queue(queue)?.get(*max).await?;
            if let Some(name) = save_as {
                saved.insert(name.clone(), messages.iter().map(|m| m.id.clone()).collect());
            }
            serde_json::to_value(messages_json(&messages))?
        }
        Step::Peek { queue, count } => {
            let messages = registry.queue(queue)?.peek(*count).await?;
            serde_json::to_value(messages_json(&messages))?
        }
        Step::Delete { queue, id } => {
            let id = resolve_id(saved, id)?;
            serde_json::Value::Bool(registry.queue(queue)?.delete(&id).await)
        }
        Step::Release { queue, id, delay } => {
            let id = resolve_id(saved, id)?;
            let message = registry
                .queue(queue)?
                .release(&id, seconds("delay", *delay)?)
                .await?;
            message_json(&message)
        }
        Step::Touch { queue, id } => {
            let id = resolve_id(saved, id)?;
            message_json(&registry.queue(queue)?.touch(&id).await?)
        }
        Step::Clear { queue } => serde_json::json!(registry.queue(queue)?.clear().await),
        Step::Size { queue } => serde_json::json!(registry.queue(queue)?.size().await),
        Step::Info { queue } => serde_json::to_value(registry.queue(queue)?.info().await)?,
        Step::Update {
            queue,
            push_type,
            retries,
        } => {
            let update = QueueUpdate {
                push_type: *push_type,
                retries: *retries,
            };
            serde_json::to_value(registry.queue(queue)?.update(update).await?)?
        }
        Step::Subscribe { queue, endpoint } => {
            serde_json::to_value(registry.queue(queue)?.subscribe(endpoint).await?)?
        }
        Step::Unsubscribe { queue, endpoint } => {
            serde_json::Value::Bool(registry.queue(queue)?.unsubscribe(endpoint).await?)
        }
        Step::DeleteQueue { queue } => {
            registry.delete_queue(queue).await?;
            serde_json::Value::Bool(true)
        }
        Step::PushStatus { queue, id } => {
            let id = resolve_id(saved, id)?;
            let message = registry.queue(queue)?.get_push_message(&id).await?;
            serde_json::json!({
                "message": message_json(&message.message),
                "push_type": message.push_type,
                "subscriptions": message.subscriptions,
                "completed_at": message.completed_at,
            })
        }
        Step::Acknowledge {
            queue,
            id,
            endpoint,
        } => {
            let id = resolve_id(saved, id)?;
            serde_json::Value::Bool(registry.queue(queue)?.acknowledge(&id, endpoint).await?)
        }
        Step::Sleep { seconds: secs } => {
            clock.advance(seconds("seconds", *secs)?);
            serde_json::json!({ "now": clock.now() })
        }
    };

    Ok(value)
}

fn seconds(arg: &str, value: i64) -> Result<chrono::Duration, CliError> {
    chrono::Duration::try_seconds(value).ok_or_else(|| CliError::InvalidArgument {
        arg: arg.to_string(),
        message: format!("{} seconds is out of range", value),
    })
}

/// Resolve `$name`, `$name[index]` or a literal message ID
fn resolve_id(
    saved: &HashMap<String, Vec<MessageId>>,
    raw: &str,
) -> Result<MessageId, CliError> {
    let Some(reference) = raw.strip_prefix('$') else {
        return raw.parse().map_err(|e: ValidationError| {
            CliError::InvalidArgument {
                arg: "id".to_string(),
                message: e.to_string(),
            }
        });
    };

    let (name, index) = match reference.split_once('[') {
        Some((name, rest)) => {
            let index = rest
                .strip_suffix(']')
                .and_then(|i| i.parse::<usize>().ok())
                .ok_or_else(|| CliError::InvalidArgument {
                    arg: "id".to_string(),
                    message: format!("malformed reference '{}'", raw),
                })?;
            (name, index)
        }
        None => (reference, 0),
    };

    saved
        .get(name)
        .and_then(|ids| ids.get(index))
        .cloned()
        .ok_or_else(|| CliError::InvalidArgument {
            arg: "id".to_string(),
            message: format!("no saved message for '{}'", raw),
        })
}

/// Message rendering with the body as text, or base64 when it is not UTF-8
fn message_json(message: &Message) -> serde_json::Value {
    let (body, encoding) = match message.body_str() {
        Some(text) => (text.to_string(), "utf8"),
        None => (general_purpose::STANDARD.encode(&message.body), "base64"),
    };
    serde_json::json!({
        "id": message.id,
        "body": body,
        "body_encoding": encoding,
        "state": message.state,
        "timeout_seconds": message.timeout.num_seconds(),
        "reserved_count": message.reserved_count,
        "enqueued_at": message.enqueued_at,
        "reservation_expires_at": message.reservation_expires_at,
    })
}

fn messages_json(messages: &[Message]) -> Vec<serde_json::Value> {
    messages.iter().map(message_json).collect()
}
