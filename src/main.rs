// mirror - Inspect a ledger mirror, or populate one from a simulated ledger

use chrono::DateTime;
use clap::{Parser, Subcommand};
use ledger_mirror::artifact::{Attachment, MemoryUploader};
use ledger_mirror::ledger::{EventStream, InMemoryLedger, LedgerClient, LedgerConfig};
use ledger_mirror::model::{Address, RewardId, TaskId, TaskStatus};
use ledger_mirror::reconcile::{ReconcileError, Reconciler, ResyncError};
use ledger_mirror::service::{NewReward, NewTask, Services};
use ledger_mirror::storage::{AppealQuery, MirrorStore, StoreError, TaskQuery};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "mirror")]
#[command(about = "Ledger/mirror reconciliation for tasks, points and rewards")]
struct Cli {
    /// Mirror database directory
    #[arg(short, long, env = "MIRROR_DATA_DIR", default_value = "mirror-data")]
    data_dir: PathBuf,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a scripted workload against an in-memory ledger and mirror it
    Simulate {
        /// Number of members
        #[arg(long, default_value_t = 3)]
        members: usize,
        /// Number of tasks per member
        #[arg(long, default_value_t = 2)]
        tasks: usize,
    },
    /// List mirrored tasks, newest first
    Tasks {
        #[arg(long)]
        status: Option<TaskStatus>,
        #[arg(long)]
        assignee: Option<Address>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// List mirrored rewards
    Rewards,
    /// List mirrored appeals
    Appeals {
        /// Only unresolved appeals
        #[arg(long)]
        pending: bool,
    },
    /// Points history of a user
    History { user: Address },
    /// Mirror balance of a user
    Balance { user: Address },
    /// Rewards a user has redeemed
    Exchanges { user: Address },
    /// Resync checkpoints per event stream
    Checkpoints,
    /// Storage statistics
    Stats,
}

#[derive(Error, Debug)]
enum CliError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error(transparent)]
    Resync(#[from] ResyncError),

    #[error("Failed to render output: {0}")]
    Output(#[from] serde_json::Error),
}

fn render_time(timestamp: u64) -> String {
    DateTime::from_timestamp(timestamp as i64, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| timestamp.to_string())
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "command failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let store = MirrorStore::open(&cli.data_dir)?;
    let json = cli.json;

    match cli.command {
        Command::Simulate { members, tasks } => {
            simulate(Arc::new(store), members, tasks, json).await?;
        }
        Command::Tasks {
            status,
            assignee,
            limit,
        } => {
            let query = TaskQuery {
                status,
                assignee,
                creator: None,
                limit,
            };
            let tasks = store.list_tasks(&query)?;
            if json {
                return print_json(&tasks);
            }
            for t in tasks {
                println!(
                    "{:>5}  {:<10} {:>4} pts  {:<44} {}",
                    t.id.0,
                    t.status,
                    t.points,
                    t.assignee.map(|a| a.to_string()).unwrap_or_else(|| "-".into()),
                    t.title
                );
            }
        }
        Command::Rewards => {
            let rewards = store.list_rewards()?;
            if json {
                return print_json(&rewards);
            }
            for r in rewards {
                println!(
                    "{:>5}  {:<9} cost {:>5}  stock {:>4}  {}",
                    r.id.0, r.status, r.points_cost, r.stock, r.name
                );
            }
        }
        Command::Appeals { pending } => {
            let query = if pending {
                AppealQuery::pending()
            } else {
                AppealQuery::new()
            };
            let appeals = store.list_appeals(&query)?;
            if json {
                return print_json(&appeals);
            }
            for a in appeals {
                let state = match (a.resolved, a.approved) {
                    (false, _) => "pending",
                    (true, true) => "approved",
                    (true, false) => "denied",
                };
                println!(
                    "{:>5}  {:<8} {:>5} pts  {}  {}",
                    a.id.0,
                    state,
                    a.points_change,
                    render_time(a.timestamp()),
                    a.reason
                );
            }
        }
        Command::History { user } => {
            let rows = store.points_history(&user)?;
            if json {
                return print_json(&rows);
            }
            for row in rows {
                println!(
                    "{:>4}  {:+6}  {:<7} {}  {}",
                    row.sequence,
                    row.record.points_change,
                    format!("{:?}", row.record.kind).to_lowercase(),
                    render_time(row.record.timestamp()),
                    row.record.title
                );
            }
        }
        Command::Balance { user } => {
            let balance = store.balance(&user)?;
            if json {
                return print_json(&serde_json::json!({ "user": user, "balance": balance }));
            }
            println!("{} {}", user, balance);
        }
        Command::Exchanges { user } => {
            let rewards = store.exchanged_rewards(&user)?;
            if json {
                return print_json(&rewards);
            }
            for r in rewards {
                println!(
                    "{}  {:>5} pts  {}",
                    render_time(r.timestamp),
                    r.points_cost,
                    r.name
                );
            }
        }
        Command::Checkpoints => {
            let checkpoints = store.checkpoints()?;
            if json {
                return print_json(&checkpoints);
            }
            for (stream, block) in checkpoints {
                println!("{:<8} {}", stream, block);
            }
        }
        Command::Stats => {
            let stats = store.stats()?;
            if json {
                return print_json(&stats);
            }
            println!("keys       {}", stats.key_count);
            println!("disk bytes {}", stats.disk_size_bytes);
            println!("tasks      {}", stats.tasks);
            println!("rewards    {}", stats.rewards);
            println!("appeals    {}", stats.appeals);
            println!("exchanges  {}", stats.exchanges);
            println!("points     {}", stats.points_rows);
            println!("checkpoint {}", stats.checkpoints);
        }
    }

    Ok(())
}

/// Drive every workflow once per member against a fresh in-memory ledger
async fn simulate(store: Arc<MirrorStore>, members: usize, tasks: usize, json: bool) -> Result<(), CliError> {
    // A fresh ledger restarts at block 0; rows from an earlier run would outrank it
    for stream in EventStream::ALL {
        store.clear_stream(stream)?;
    }

    let admin = Address::random();
    let ledger = Arc::new(InMemoryLedger::with_config(admin.clone(), LedgerConfig::new()));
    let reconciler = Reconciler::new(ledger.clone(), store.clone());
    let services = Services::new(reconciler.clone(), Arc::new(MemoryUploader::new()));
    let members: Vec<Address> = (0..members).map(|_| Address::random()).collect();
    info!(%admin, members = members.len(), "simulation started");

    for member in &members {
        for n in 0..tasks {
            let outcome = services
                .tasks
                .create(&admin, NewTask::new(&format!("Task {} for {}", n, member), "", 10 + n as u64 * 5, 0))
                .await?;
            let task_id: TaskId = outcome
                .created_task_id()
                .ok_or_else(|| ReconcileError::InvalidInput("no task id in receipt".to_string()))?;

            services.tasks.assign(task_id, member).await?;
            let photo = Attachment::new("photo.jpg", "image/jpeg", format!("photo of {}", task_id).into_bytes());
            services.tasks.submit(task_id, member, "done", vec![photo]).await?;
            if n % 3 == 2 {
                services.tasks.reject(&admin, task_id).await?;
            } else {
                services.tasks.approve(&admin, task_id).await?;
            }
        }
    }

    let outcome = services
        .rewards
        .create(&admin, NewReward::new("Club mug", "Ceramic mug", 15, members.len() as u64 / 2 + 1))
        .await?;
    let reward_id: RewardId = outcome
        .created_reward_id()
        .ok_or_else(|| ReconcileError::InvalidInput("no reward id in receipt".to_string()))?;

    for member in &members {
        match services.rewards.exchange(member, reward_id).await {
            Ok(_) => info!(%member, "exchanged"),
            Err(e) => info!(%member, error = %e, "exchange refused"),
        }
        services
            .appeals
            .create(member, 5, "approval missed a bonus")
            .await?;
    }

    reconciler.resync().run_all().await?;
    let drift = reconciler.resync().verify().await?;
    let head = ledger.head_block().await.map_err(ReconcileError::from)?;
    store.flush()?;

    if json {
        return print_json(&serde_json::json!({
            "head_block": head,
            "members": members,
            "drift": drift,
            "stats": store.stats()?,
        }));
    }

    println!("head block {}", head);
    for member in &members {
        println!("{}  balance {}", member, store.balance(member)?);
    }
    if drift.is_clean() {
        println!("mirror matches ledger ({} checks)", drift.checked);
    } else {
        for d in &drift.drifts {
            println!("drift {}: ledger {} mirror {}", d.subject, d.ledger, d.mirror);
        }
    }
    Ok(())
}
