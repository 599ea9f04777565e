//! Inspection CLI for the shopfloor workflow engine.
//!
//! Read-side tooling over a shopfloor database: list projects, orders and
//! tasks, show progress rollups and release readiness, and stream change
//! events as they happen. `migrate` and `status` talk to the store directly
//! so they can report schema state without starting the engine.
//!
//! # Usage
//!
//! ```text
//! shopfloor --db /var/lib/shopfloor/state.db projects
//! shopfloor --config shopfloor.toml readiness alpha <order-id>
//! shopfloor watch --project alpha
//! ```

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::{ColoredString, Colorize};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use shopfloor::hub::Scope;
use shopfloor::store::Store;
use shopfloor::store::domain::StatusColor;
use shopfloor::store::migrations::TARGET_VERSION;
use shopfloor::workflow::ReadinessState;
use shopfloor::{ChangeEvent, ChangeSource, Engine, EngineConfig};

#[derive(Parser, Debug)]
#[command(name = "shopfloor", about = "Inspect and operate a shopfloor workflow database")]
struct Cli {
    /// TOML config file. Wins over --db when given.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database file.
    #[arg(long, global = true, default_value = "shopfloor.db")]
    db: PathBuf,

    /// Print JSON instead of formatted text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply pending schema migrations
    Migrate,
    /// Report store location and schema version
    Status,
    /// List projects
    Projects,
    /// List orders of a project
    Orders { project: String },
    /// List tasks of an order, with dependency blocking
    Tasks { project: String, order: String },
    /// Show the progress rollup of a project
    Progress { project: String },
    /// Assess release readiness of an order
    Readiness { project: String, order: String },
    /// Stream change events until interrupted
    Watch {
        /// Limit to one project.
        #[arg(long)]
        project: Option<String>,
        /// Limit to one order within --project.
        #[arg(long, requires = "project")]
        order: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::with_store_path(cli.db.clone()),
    };

    match &cli.command {
        Commands::Migrate => migrate(&config).await,
        Commands::Status => status(&config).await,
        command => {
            let engine = Engine::start(config)
                .await
                .context("failed to start engine")?;
            let result = dispatch(command, &engine, cli.json).await;
            engine.stop().await;
            result
        }
    }
}

/// Store location for the commands that bypass the engine.
fn store_path(config: &EngineConfig) -> Result<&std::path::Path> {
    config
        .store
        .path
        .as_deref()
        .context("migrate and status need a file-backed store ([store] path or --db)")
}

async fn migrate(config: &EngineConfig) -> Result<()> {
    let path = store_path(config)?;
    let store = Store::open(path, config.store.busy_timeout(), true)?;
    let report = store.migrate().await?;
    if report.applied.is_empty() {
        println!("schema already at version {}", report.version);
    } else {
        println!(
            "applied migrations {:?}, schema now at version {}",
            report.applied, report.version
        );
    }
    Ok(())
}

async fn status(config: &EngineConfig) -> Result<()> {
    let path = store_path(config)?;
    // No create: status must never materialize an empty database.
    let store = Store::open(path, config.store.busy_timeout(), false)?;
    let version = store.version().await?;
    println!("store:   {}", path.display());
    println!("schema:  version {version} (target {TARGET_VERSION})");
    if version < TARGET_VERSION {
        println!("pending: run `shopfloor migrate`");
    }
    Ok(())
}

async fn dispatch(command: &Commands, engine: &Engine, json: bool) -> Result<()> {
    match command {
        Commands::Migrate | Commands::Status => unreachable!("handled before engine start"),
        Commands::Projects => projects(engine, json).await,
        Commands::Orders { project } => orders(engine, project, json).await,
        Commands::Tasks { project, order } => tasks(engine, project, order, json).await,
        Commands::Progress { project } => progress(engine, project, json).await,
        Commands::Readiness { project, order } => readiness(engine, project, order, json).await,
        Commands::Watch { project, order } => watch(engine, project, order, json).await,
    }
}

async fn projects(engine: &Engine, json: bool) -> Result<()> {
    let projects = engine.projects().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&projects)?);
        return Ok(());
    }
    if engine.is_read_only() {
        println!("{}", "read-only: serving from legacy state".yellow());
    }
    for project in &projects {
        println!(
            "{:<24} {:<14} {}",
            project.public_id,
            paint(project.status.label(), project.status.color()),
            project.name
        );
    }
    Ok(())
}

async fn orders(engine: &Engine, project: &str, json: bool) -> Result<()> {
    let orders = engine.orders(project).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&orders)?);
        return Ok(());
    }
    for order in &orders {
        println!(
            "#{:<4} {:<40} {:<16} {:<8} {}",
            order.number,
            order.public_id,
            paint(order.status.label(), order.status.color()),
            order.priority.label(),
            order.title
        );
    }
    Ok(())
}

async fn tasks(engine: &Engine, project: &str, order: &str, json: bool) -> Result<()> {
    let statuses = engine.dependency_status(project, None, Some(order)).await?;
    let tasks = engine.tasks(order).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&tasks)?);
        return Ok(());
    }
    let blocked: HashMap<&str, bool> = statuses
        .iter()
        .map(|s| (s.task_id.as_str(), s.is_blocked))
        .collect();
    for task in &tasks {
        let gate = if blocked.get(task.public_id.as_str()).copied().unwrap_or(false) {
            "waiting".red()
        } else {
            "".normal()
        };
        println!(
            "#{:<4} {:<40} {:<12} {:<8} {} {}",
            task.number,
            task.public_id,
            paint(task.status.label(), task.status.color()),
            task.priority.label(),
            task.title,
            gate
        );
    }
    Ok(())
}

async fn progress(engine: &Engine, project: &str, json: bool) -> Result<()> {
    let state = engine.project_state(project).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&state.progress)?);
        return Ok(());
    }
    println!(
        "{} {} {:>3}%  ({}/{} tasks completed)",
        project,
        bar(state.progress.percentage),
        state.progress.percentage,
        state.progress.totals.completed,
        state.progress.totals.total
    );
    for order in &state.progress.orders {
        println!(
            "  #{:<4} {} {:>3}%  {:<16} {}",
            order_number(&state, &order.order_id),
            bar(order.percentage),
            order.percentage,
            paint(order.status.label(), order.status.color()),
            order.title
        );
    }
    Ok(())
}

async fn readiness(engine: &Engine, project: &str, order: &str, json: bool) -> Result<()> {
    let readiness = engine.order_release_readiness(project, order).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&readiness)?);
        return Ok(());
    }
    let (label, color) = match readiness.state {
        ReadinessState::Ready => ("ready", StatusColor::Green),
        ReadinessState::Warning => ("warning", StatusColor::Yellow),
        ReadinessState::Blocked => ("blocked", StatusColor::Red),
    };
    println!("order {} is {}", readiness.order_id, paint(label, color));
    for reason in &readiness.reasons {
        println!("  - {reason}");
    }
    Ok(())
}

async fn watch(
    engine: &Engine,
    project: &Option<String>,
    order: &Option<String>,
    json: bool,
) -> Result<()> {
    let scope = match (project, order) {
        (Some(project), Some(order)) => Scope::order(project, order),
        (Some(project), None) => Scope::project(project),
        _ => Scope::all(),
    };
    let mut rx = engine.subscribe(scope);
    tracing::info!("watching for change events, interrupt to stop");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = rx.recv() => match event {
                Ok(event) => print_event(&event, json)?,
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!("event stream lagged, {skipped} events dropped");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
    Ok(())
}

fn print_event(event: &ChangeEvent, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }
    let scope = match &event.order_id {
        Some(order) => format!("{}/{}", event.project_id, order),
        None => event.project_id.clone(),
    };
    println!(
        "{:>6}  {:<10}  {:<24}  {:<22} {}",
        event.seq,
        source_label(event.source),
        scope,
        event.kind.name(),
        event.kind.target_id()
    );
    Ok(())
}

fn source_label(source: ChangeSource) -> &'static str {
    match source {
        ChangeSource::Repository => "repository",
        ChangeSource::Runner => "runner",
        ChangeSource::Refresh => "refresh",
    }
}

fn order_number(state: &shopfloor::ProjectState, order_id: &str) -> i64 {
    state
        .orders
        .iter()
        .find(|o| o.public_id == order_id)
        .map(|o| o.number)
        .unwrap_or(0)
}

fn paint(label: &str, color: StatusColor) -> ColoredString {
    match color {
        StatusColor::Grey => label.dimmed(),
        StatusColor::Blue => label.blue(),
        StatusColor::Green => label.green(),
        StatusColor::Yellow => label.yellow(),
        StatusColor::Orange => label.truecolor(255, 165, 0),
        StatusColor::Red => label.red(),
        StatusColor::Purple => label.magenta(),
    }
}

fn bar(percentage: u8) -> String {
    let filled = usize::from(percentage) / 5;
    format!("[{}{}]", "#".repeat(filled), "-".repeat(20 - filled))
}
