//! `tasksync`: offline-first task manager.
//!
//! Every change is stored locally and queued; `tasksync sync` reconciles
//! the queue with a `tasksync-server`. Configuration via CLI flags,
//! environment variables, or config file (`~/.config/tasksync/config.toml`).
//!
//! ```bash
//! # Work offline
//! cargo run --bin tasksync -- add "Write report" -d "quarterly numbers"
//! cargo run --bin tasksync -- list
//!
//! # Reconcile with a server
//! cargo run --bin tasksync -- --remote-url http://127.0.0.1:8787 sync
//!
//! # Keep reconciling until Ctrl-C
//! TASKSYNC_REMOTE_URL=http://127.0.0.1:8787 cargo run --bin tasksync -- sync --watch
//! ```

use std::future::Future;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;

use tasksync::config::{CliArgs, ClientConfig, Command};
use tasksync::store::{NewTask, SqliteStore, Task, TaskPatch, TaskStore};
use tasksync::sync::{SyncEngine, SyncResult};
use tasksync::transport::http::HttpTransport;
use tasksync_proto::task::TaskId;

type CliError = Box<dyn std::error::Error + Send + Sync>;

/// Exit status of a `sync` run that left failures behind.
const SYNC_FAILED_STATUS: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Logs go to a file so stdout stays clean for command output. The guard
    // is dropped when `main` returns, flushing the writer before exit.
    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());

    let command = cli.command.clone().unwrap_or(Command::Status);
    match run(command, &config).await {
        Ok(status) => ExitCode::from(status),
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize file-based logging.
///
/// Returns a [`WorkerGuard`] that must be held until shutdown to ensure all
/// buffered log entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("tasksync.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

/// Run one subcommand and return the process exit status.
async fn run(command: Command, config: &ClientConfig) -> Result<u8, CliError> {
    let store = SqliteStore::open(&config.database_path)?;
    tracing::debug!(path = %config.database_path.display(), "store opened");

    match command {
        Command::Add { title, description } => {
            let task = store.create_task(NewTask { title, description }).await?;
            println!("{}", task.id);
        }
        Command::Update {
            id,
            title,
            description,
            completed,
        } => {
            let patch = TaskPatch {
                title,
                description: description.map(|d| if d.is_empty() { None } else { Some(d) }),
                completed,
            };
            match store.update_task(&parse_id(&id)?, patch).await? {
                Some(task) => print_task_line(&task),
                None => return Err(format!("no such task: {id}").into()),
            }
        }
        Command::Delete { id } => {
            if !store.delete_task(&parse_id(&id)?).await? {
                return Err(format!("no such task: {id}").into());
            }
        }
        Command::List { all } => {
            for task in store.list_tasks(all).await? {
                print_task_line(&task);
            }
        }
        Command::Show { id } => {
            let task = store
                .get_task(&parse_id(&id)?)
                .await?
                .ok_or_else(|| format!("no such task: {id}"))?;
            print_task_details(&task);
        }
        Command::Retry { id } => {
            let task = store
                .retry_task(&parse_id(&id)?)
                .await?
                .ok_or_else(|| format!("no such task: {id}"))?;
            print_task_line(&task);
        }
        Command::Sync { json, watch } => {
            let engine = build_engine(&store, config)?;
            if watch {
                let shutdown = shutdown_on(tokio::signal::ctrl_c());
                engine
                    .run_periodic(config.sync_interval, shutdown, |result| {
                        print_sync_result(result, json);
                    })
                    .await?;
            } else {
                let result = engine.sync().await?;
                print_sync_result(&result, json);
                return Ok(sync_exit_status(&result));
            }
        }
        Command::Status => {
            let engine = build_engine(&store, config)?;
            let status = engine.status().await?;
            println!("remote:    {}", config.remote_url);
            println!("pending:   {}", status.pending);
            match status.last_sync_at {
                Some(at) => println!("last sync: {}", at.to_rfc3339()),
                None => println!("last sync: never"),
            }
        }
    }
    Ok(0)
}

/// Resolve when `signal` fires. A signal that cannot be listened for is
/// logged and never resolves, so watch mode keeps running until killed.
async fn shutdown_on(signal: impl Future<Output = std::io::Result<()>>) {
    if let Err(e) = signal.await {
        tracing::error!(error = %e, "cannot listen for Ctrl-C, watch mode runs until killed");
        eprintln!("Warning: cannot listen for Ctrl-C ({e}); stop the process to end watch mode");
        std::future::pending::<()>().await;
    }
}

const fn sync_exit_status(result: &SyncResult) -> u8 {
    if result.success { 0 } else { SYNC_FAILED_STATUS }
}

fn build_engine(
    store: &SqliteStore,
    config: &ClientConfig,
) -> Result<SyncEngine<SqliteStore, SqliteStore, HttpTransport>, CliError> {
    let transport = HttpTransport::new(&config.remote_url)?;
    Ok(SyncEngine::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        transport,
        config.sync_settings(),
    ))
}

fn parse_id(raw: &str) -> Result<TaskId, CliError> {
    raw.parse()
        .map_err(|e| format!("invalid task id {raw:?}: {e}").into())
}

fn print_task_line(task: &Task) {
    let mark = if task.completed { "x" } else { " " };
    let deleted = if task.deleted { " (deleted)" } else { "" };
    println!(
        "{} [{mark}] {}{deleted}  <{}>",
        task.id, task.title, task.sync_status
    );
}

fn print_task_details(task: &Task) {
    println!("id:          {}", task.id);
    println!("title:       {}", task.title);
    if let Some(description) = &task.description {
        println!("description: {description}");
    }
    println!("completed:   {}", task.completed);
    println!("deleted:     {}", task.deleted);
    println!("created:     {}", task.created_at.to_rfc3339());
    println!("updated:     {}", task.updated_at.to_rfc3339());
    println!("sync status: {}", task.sync_status);
    if let Some(server_id) = &task.server_id {
        println!("server id:   {server_id}");
    }
    if let Some(at) = task.last_synced_at {
        println!("last synced: {}", at.to_rfc3339());
    }
    if let Some(error) = &task.last_error {
        println!("last error:  {error}");
    }
}

fn print_sync_result(result: &SyncResult, json: bool) {
    if json {
        match serde_json::to_string_pretty(result) {
            Ok(body) => println!("{body}"),
            Err(e) => eprintln!("failed to encode result: {e}"),
        }
        return;
    }

    println!(
        "sync {}: {} synced, {} failed",
        if result.success { "succeeded" } else { "failed" },
        result.synced,
        result.failed
    );
    for failure in &result.errors {
        match (failure.task_id, failure.operation) {
            (Some(id), Some(op)) => println!("  {id} {op}: {}", failure.error),
            _ => println!("  {}", failure.error),
        }
    }
}
