//! `swarmkernel` — single CLI surface over the coordination kernel
//! (spec §6.3). Every subcommand maps its `SwarmError` to the matching
//! exit code via `SwarmError::exit_code()`; nothing panics on a bad
//! argument or a missing record.

use clap::{Parser, Subcommand};
use swarmkernel::{
    AgentFilter, CoordinationConfig, Priority, SwarmKernel, WorkFilter, WorkResult, WorkStatus,
};

#[derive(Parser)]
#[command(name = "swarmkernel", version, about = "File-backed agent coordination kernel")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fast-path claim: appends to the hot, line-delimited store.
    Claim {
        #[arg(long)]
        agent_id: String,
        #[arg(long)]
        work_type: String,
        #[arg(long)]
        description: String,
        #[arg(long, default_value = "medium")]
        priority: String,
        #[arg(long)]
        team: String,
    },
    /// Slow-path claim: inserts straight into the canonical store.
    ClaimSlow {
        #[arg(long)]
        agent_id: String,
        #[arg(long)]
        work_type: String,
        #[arg(long)]
        description: String,
        #[arg(long, default_value = "medium")]
        priority: String,
        #[arg(long)]
        team: String,
    },
    /// Records monotonic progress on an existing claim.
    Progress {
        #[arg(long)]
        work_id: String,
        #[arg(long)]
        percent: u8,
    },
    /// Transitions a claim into a terminal state.
    Complete {
        #[arg(long)]
        work_id: String,
        #[arg(long, default_value = "success")]
        result: String,
        #[arg(long)]
        velocity_points: Option<u32>,
    },
    /// Idempotent agent upsert.
    Register {
        #[arg(long)]
        agent_id: String,
        #[arg(long)]
        team: String,
        #[arg(long, default_value_t = 50)]
        capacity: u8,
        #[arg(long)]
        specialization: String,
    },
    /// Merged canonical + fast view, optionally filtered.
    ListWork {
        #[arg(long)]
        team: Option<String>,
        #[arg(long)]
        status: Option<String>,
    },
    /// Fast-count substring scan over the append-only store.
    ListWorkFast {
        #[arg(long)]
        contains: String,
    },
    /// Lists registered agents.
    ListAgents {
        #[arg(long)]
        team: Option<String>,
        /// Only agents silent longer than this many hours.
        #[arg(long)]
        stale_hours: Option<i64>,
    },
    /// Runs TTL pruning, archival, fast-file compaction, telemetry rotation.
    Optimize,
    /// Writes and prints `system_health_report.json`.
    Health,
    /// Prints one freshly generated id.
    GenerateId {
        #[arg(long, default_value = "work")]
        kind: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let kernel = SwarmKernel::new(CoordinationConfig::from_env());

    let exit_code = match run(cli.command, &kernel).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("error: {e}");
            e.exit_code()
        }
    };
    std::process::exit(exit_code);
}

async fn run(command: Command, kernel: &SwarmKernel) -> swarmkernel::SwarmResult<()> {
    match command {
        Command::Claim { agent_id, work_type, description, priority, team } => {
            let priority = parse_priority(&priority)?;
            let claim = kernel.claim_engine.claim(&agent_id, &work_type, &description, priority, &team).await?;
            print_json(&claim);
        }
        Command::ClaimSlow { agent_id, work_type, description, priority, team } => {
            let priority = parse_priority(&priority)?;
            let claim =
                kernel.claim_engine.claim_slow(&agent_id, &work_type, &description, priority, &team).await?;
            print_json(&claim);
        }
        Command::Progress { work_id, percent } => {
            let claim = kernel.claim_engine.progress(&work_id, percent).await?;
            print_json(&claim);
        }
        Command::Complete { work_id, result, velocity_points } => {
            let result = WorkResult::parse(&result).ok_or_else(|| swarmkernel::SwarmError::InvalidArgument {
                field: "result",
                reason: format!("{result} is not one of success|failed|blocked"),
            })?;
            let claim = kernel.claim_engine.complete(&work_id, result, velocity_points).await?;
            print_json(&claim);
        }
        Command::Register { agent_id, team, capacity, specialization } => {
            let record = kernel.agents.register_or_update(agent_id, team, capacity, specialization).await?;
            print_json(&record);
        }
        Command::ListWork { team, status } => {
            let filter = WorkFilter {
                team,
                status: status.as_deref().and_then(parse_status),
                priority: None,
                since: None,
            };
            let claims = kernel.query.list(&filter)?;
            print_json(&claims);
        }
        Command::ListWorkFast { contains } => {
            let count = kernel.query.count_fast(&contains)?;
            println!("{count}");
        }
        Command::ListAgents { team, stale_hours } => {
            let agents = if let Some(hours) = stale_hours {
                kernel.agents.stale_since(chrono::Utc::now() - chrono::Duration::hours(hours))?
            } else {
                kernel.agents.list(&AgentFilter { team, status: None })?
            };
            print_json(&agents);
        }
        Command::Optimize => {
            let report = kernel.retention.optimize().await?;
            print_json(&report);
        }
        Command::Health => {
            let report = kernel.health.assess().await?;
            print_json(&report);
        }
        Command::GenerateId { kind } => {
            let kind = match kind.as_str() {
                "agent" => swarmkernel::IdKind::Agent,
                "work" => swarmkernel::IdKind::Work,
                "trace" => swarmkernel::IdKind::Trace,
                "span" => swarmkernel::IdKind::Span,
                other => {
                    return Err(swarmkernel::SwarmError::InvalidArgument {
                        field: "kind",
                        reason: format!("{other} is not one of agent|work|trace|span"),
                    })
                }
            };
            println!("{}", kernel.id_gen.new_id(kind));
        }
    }
    Ok(())
}

fn parse_priority(s: &str) -> swarmkernel::SwarmResult<Priority> {
    Priority::parse(s).ok_or_else(|| swarmkernel::SwarmError::InvalidArgument {
        field: "priority",
        reason: format!("{s} is not one of low|medium|high|critical"),
    })
}

fn parse_status(s: &str) -> Option<WorkStatus> {
    match s.to_ascii_lowercase().as_str() {
        "active" => Some(WorkStatus::Active),
        "in_progress" | "inprogress" => Some(WorkStatus::InProgress),
        "completed" => Some(WorkStatus::Completed),
        "failed" => Some(WorkStatus::Failed),
        _ => None,
    }
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(e) => eprintln!("failed to serialize output: {e}"),
    }
}
