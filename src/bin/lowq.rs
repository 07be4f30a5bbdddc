//! lowq CLI: push work, start workers, inspect a queue.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use lowq::telemetry::init_logging;
use lowq::{CommandProcessor, QueueConfig, TaskQueue, Worker, WorkerExit};

#[derive(Parser)]
#[command(name = "lowq", about = "Durable single-worker task queue")]
struct Cli {
    /// Queue database (overrides LOWQ_DB and the config file)
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Add items to the backlog
    Push {
        /// Items to enqueue; identical items already pending are skipped
        #[arg(required = true)]
        items: Vec<String>,
        /// Start a worker after pushing
        #[arg(long, requires = "exec")]
        start: bool,
        /// Shell command run per item (with --start)
        #[arg(long, requires = "start")]
        exec: Option<String>,
    },
    /// Start a detached worker
    Start {
        /// Shell command run per item; the item is in $LOWQ_ITEM
        #[arg(long)]
        exec: Option<String>,
    },
    /// Drain the backlog in the foreground
    Drain {
        /// Shell command run per item; the item is in $LOWQ_ITEM
        #[arg(long)]
        exec: Option<String>,
    },
    /// Detached worker entry point
    #[command(hide = true)]
    Worker {
        #[arg(long)]
        exec: Option<String>,
    },
    /// Show whether a worker is active and what is pending
    Status {
        /// Maximum pending items to list
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = match load_config(&cli) {
        Ok(config) => config,
        // Detached workers always exit cleanly; stderr is the log file.
        Err(e) if matches!(cli.command, Command::Worker { .. }) => {
            eprintln!("lowq worker: {e:#}");
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    // A second subscriber can only fail to install; keep going without it.
    let _ = init_logging(&config.log_level);

    match cli.command {
        Command::Push { items, start, exec } => {
            cmd_push(config, items, start.then_some(exec).flatten())
        }
        Command::Start { exec } => cmd_start(config, required_exec(exec)?),
        Command::Drain { exec } => cmd_drain(config, required_exec(exec)?),
        Command::Worker { exec } => {
            cmd_worker(config, exec);
            Ok(())
        }
        Command::Status { limit } => cmd_status(config, limit),
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<QueueConfig> {
    let config = match (&cli.config, &cli.db) {
        (Some(file), db) => {
            let mut config = QueueConfig::from_file(file)?;
            if let Some(db) = db {
                config.path = db.clone();
            }
            config
        }
        (None, Some(db)) => QueueConfig::new(db).with_env_overrides()?,
        (None, None) => QueueConfig::from_env()?,
    };
    config.validate()?;
    Ok(config)
}

fn required_exec(exec: Option<String>) -> anyhow::Result<String> {
    exec.ok_or_else(|| {
        lowq::Error::Config("a processing command is required (--exec)".to_string()).into()
    })
}

fn worker_command(queue: &TaskQueue, exec: &str) -> anyhow::Result<lowq::WorkerCommand> {
    Ok(queue.worker_command()?.arg("--exec").arg(exec))
}

fn cmd_push(config: QueueConfig, items: Vec<String>, start: Option<String>) -> anyhow::Result<()> {
    let queue = TaskQueue::new(config)?;
    let report = match start {
        Some(exec) => queue.submit(items, &worker_command(&queue, &exec)?)?,
        None => queue.push(items)?,
    };
    println!(
        "Pushed: {} new, {} duplicate",
        report.inserted, report.duplicates
    );
    Ok(())
}

fn cmd_start(config: QueueConfig, exec: String) -> anyhow::Result<()> {
    let queue = TaskQueue::new(config)?;
    let pid = queue.start(&worker_command(&queue, &exec)?)?;
    println!("Worker started: pid {pid}");
    Ok(())
}

fn cmd_drain(config: QueueConfig, exec: String) -> anyhow::Result<()> {
    let processor = CommandProcessor::new(exec, &config.path);
    match Worker::<String, _>::new(config, processor)?.run()? {
        WorkerExit::LostRace => println!("Another worker is active."),
        WorkerExit::Drained { processed } => println!("Drained: {processed} item(s)"),
        WorkerExit::Released {
            processed,
            entry,
            error,
        } => {
            println!("Stopped after {processed} item(s): {entry} failed: {error}");
        }
        WorkerExit::MarkerLost { processed } => {
            println!("Stopped after {processed} item(s): status marker was removed");
        }
    }
    Ok(())
}

/// Runs detached: nothing to report to, so every outcome ends in exit 0.
fn cmd_worker(config: QueueConfig, exec: Option<String>) {
    let result = required_exec(exec).and_then(|exec| {
        let processor = CommandProcessor::new(exec, &config.path);
        Ok(Worker::<String, _>::new(config, processor)?.run()?)
    });
    if let Err(e) = result {
        tracing::error!(error = %e, "worker failed");
    }
}

fn cmd_status(config: QueueConfig, limit: usize) -> anyhow::Result<()> {
    let queue = TaskQueue::new(config)?;
    let status = queue.status()?;

    println!("Active:   {}", if status.active { "yes" } else { "no" });
    println!("Pending:  {}", status.pending);

    if status.pending > 0 {
        println!("---");
        for (id, item) in queue.peek::<String>(limit)? {
            println!("{:<8}  {}", id.to_string(), item);
        }
    }
    Ok(())
}
