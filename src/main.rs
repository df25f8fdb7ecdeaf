use clap::{Parser, Subcommand};
use dotenv::dotenv;
use kinetic_runs::adk::context::CallContext;
use kinetic_runs::kinetic::plan::{compile, PlanLoader};
use kinetic_runs::kinetic::recruit::{AgentRecruiter, RecruitPayload, RecruiterConfig};
use kinetic_runs::kinetic::sidecar::validator::sidecar_schema;
use kinetic_runs::kinetic::sidecar::{normalize, scan, FsSidecarStore, ScanFilter, ValidateOptions};

use serde_json::{json, Value};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use uuid::Uuid;

type CliResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compile a plan and print its execution order
    Compile {
        /// Path to the plan file (JSON or YAML)
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Normalize raw LLM call metadata into a sidecar
    Normalize {
        /// Path to the raw metadata JSON
        #[arg(short, long)]
        file: PathBuf,

        #[arg(long)]
        run_id: Option<String>,

        #[arg(long)]
        node_id: Option<String>,
    },
    /// Validate persisted sidecars
    Validate {
        /// Only a run UUID, or only sidecars started after an RFC 3339 timestamp
        #[arg(long)]
        since: Option<ScanFilter>,

        /// Deprecated fields and model mismatches fail validation
        #[arg(long)]
        strict: bool,

        /// Also validate files without a version field
        #[arg(long)]
        all: bool,

        /// Sidecar root directory
        #[arg(long, env = "SIDECAR_ROOT", default_value = "artifacts")]
        root: PathBuf,
    },
    /// Print the sidecar JSON Schema
    Schema,
    /// Recruit an agent from the configured endpoint
    Recruit {
        #[arg(short, long)]
        role: String,

        #[arg(short, long)]
        domain: Option<String>,

        #[arg(long)]
        run_id: Option<Uuid>,

        /// Sidecar root directory
        #[arg(long, env = "SIDECAR_ROOT", default_value = "artifacts")]
        root: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();

    match run(args.command).await {
        Ok(code) => code,
        Err(e) => {
            log::error!("{}", e);
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands) -> CliResult<ExitCode> {
    match command {
        Commands::Compile { file } => {
            let plan = PlanLoader::new().load(&file)?;
            let graph = compile(&plan)?;

            let nodes: Vec<Value> = graph
                .topological_order()
                .into_iter()
                .filter_map(|id| graph.get(id))
                .map(|node| {
                    json!({
                        "id": node.id,
                        "type": node.kind,
                        "deps": node.deps,
                        "successors": node.successors,
                    })
                })
                .collect();
            let roots: Vec<&str> = graph.roots().into_iter().map(|n| n.id.as_str()).collect();
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({ "roots": roots, "order": nodes }))?
            );
        }
        Commands::Normalize {
            file,
            run_id,
            node_id,
        } => {
            let raw: Value = serde_json::from_slice(&std::fs::read(&file)?)?;
            let sidecar = normalize(&raw, run_id.as_deref(), node_id.as_deref());
            for warning in &sidecar.warnings {
                log::warn!("{}: {}", file.display(), warning);
            }
            println!("{}", serde_json::to_string_pretty(&sidecar)?);
        }
        Commands::Validate {
            since,
            strict,
            all,
            root,
        } => {
            let options = ValidateOptions {
                strict,
                include_all: all,
                filter: since,
            };
            let summary = scan(&root, &options);
            summary.write_report(&mut std::io::stdout().lock())?;
            if summary.has_failures() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Schema => {
            println!("{}", serde_json::to_string_pretty(&sidecar_schema())?);
        }
        Commands::Recruit {
            role,
            domain,
            run_id,
            root,
        } => {
            let config = RecruiterConfig::from_env()?;
            let recruiter = AgentRecruiter::new(config, Arc::new(FsSidecarStore::new(root)));

            let mut payload = RecruitPayload::new(role);
            payload.domain = domain;
            let mut ctx = CallContext::new();
            if let Some(run_id) = run_id {
                ctx = ctx.with_run(run_id);
            }

            let recruitment = recruiter.recruit(&ctx, &payload).await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "agent_id": recruitment.agent_id,
                    "request_id": ctx.request_id,
                    "sidecar": recruitment.sidecar_path,
                }))?
            );
        }
    }

    Ok(ExitCode::SUCCESS)
}
