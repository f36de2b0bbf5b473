use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use seeder::logging;
use seeder::telemetry;
use seeder::{
    verify, FixedClock, LoadedPlan, MemoryStore, MongoStore, ReconciliationPlan, Reconciler,
    SeedInsertError, SeederConfig,
};
use tracing::{error, info, warn};

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
#[clap(propagate_version = true)]
struct Cli {
    /// configuration file path (TOML); created with commented defaults if missing
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// Print debug information
    #[clap(long)]
    debug: bool,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct PlanArgs {
    /// Plan file, defaults to the configured plan
    #[clap(short, long)]
    plan: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ClockArgs {
    /// Evaluate relative timestamps against this RFC 3339 instant instead of the current time
    #[clap(long, value_parser = parse_instant)]
    now: Option<DateTime<Utc>>,
}

#[derive(Subcommand)]
enum Commands {
    /// Drop, recreate, index and seed the planned collections
    Run {
        #[clap(flatten)]
        plan: PlanArgs,

        #[clap(flatten)]
        clock: ClockArgs,

        /// Target database, overrides the plan and the configuration
        #[clap(short, long)]
        database: Option<String>,
    },

    /// Validate the plan and rehearse the run in memory without connecting
    Check {
        #[clap(flatten)]
        plan: PlanArgs,

        #[clap(flatten)]
        clock: ClockArgs,
    },

    /// Compare the live database with the plan
    Verify {
        #[clap(flatten)]
        plan: PlanArgs,

        /// Target database, overrides the plan and the configuration
        #[clap(short, long)]
        database: Option<String>,
    },
}

fn parse_instant(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("invalid RFC 3339 timestamp '{}': {}", s, e))
}

fn load_plan(config: &SeederConfig, args: &PlanArgs) -> Result<LoadedPlan> {
    let path = args
        .plan
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.plan));
    let loaded = ReconciliationPlan::from_path(&path)
        .with_context(|| format!("failed to load plan {}", path.display()))?;
    info!(
        plan = %path.display(),
        collections = loaded.plan.collections().len(),
        indexes = loaded.plan.index_count(),
        seeds = loaded.plan.seed_count(),
        rejected = loaded.rejected.len(),
        "plan loaded"
    );
    report_plan_rejections(&loaded.rejected);
    Ok(loaded)
}

fn report_plan_rejections(rejected: &[SeedInsertError]) {
    if rejected.is_empty() {
        return;
    }
    eprintln!("{} seed entries rejected while reading the plan:", rejected.len());
    for rejection in rejected {
        eprintln!("  - {}", rejection);
    }
}

fn target_database(config: &SeederConfig, plan: &ReconciliationPlan, flag: Option<String>) -> String {
    flag.or_else(|| plan.database().map(str::to_string))
        .unwrap_or_else(|| config.database.clone())
}

async fn run(config: &SeederConfig, plan: PlanArgs, clock: ClockArgs, database: Option<String>) -> Result<ExitCode> {
    let LoadedPlan { plan, rejected } = load_plan(config, &plan)?;
    let database = target_database(config, &plan, database);
    info!(uri = %config.redacted_uri(), database = %database, "connecting");
    let store = MongoStore::connect(config, &database)
        .await
        .with_context(|| format!("failed to connect to {}", config.redacted_uri()))?;

    let reconciler = match clock.now {
        Some(now) => Reconciler::new(&store).with_clock(FixedClock(now)),
        None => Reconciler::new(&store),
    };
    let mut report = reconciler
        .run(&plan)
        .await
        .with_context(|| format!("reconciliation of '{}' aborted", store.database_name()))?;
    report.absorb_plan_rejections(rejected);
    println!("{}", report);
    Ok(ExitCode::SUCCESS)
}

async fn check(config: &SeederConfig, plan: PlanArgs, clock: ClockArgs) -> Result<ExitCode> {
    let LoadedPlan { plan, rejected } = load_plan(config, &plan)?;
    let store = MemoryStore::new();
    let reconciler = match clock.now {
        Some(now) => Reconciler::new(&store).with_clock(FixedClock(now)),
        None => Reconciler::new(&store),
    };
    let mut report = reconciler.run(&plan).await.context("rehearsal aborted")?;
    report.absorb_plan_rejections(rejected);
    println!("{}", report);
    if report.records_rejected() > 0 {
        warn!(rejected = report.records_rejected(), "plan would reject seed records");
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

async fn verify_live(config: &SeederConfig, plan: PlanArgs, database: Option<String>) -> Result<ExitCode> {
    let LoadedPlan { plan, .. } = load_plan(config, &plan)?;
    let database = target_database(config, &plan, database);
    let store = MongoStore::connect(config, &database)
        .await
        .with_context(|| format!("failed to connect to {}", config.redacted_uri()))?;
    let report = verify(&plan, &store)
        .await
        .with_context(|| format!("failed to inspect '{}'", database))?;
    println!("{}", report);
    Ok(if report.is_clean() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    logging::set_panic_hook();

    let config = match SeederConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    let tracer = config.jaeger_agent_endpoint.as_deref().and_then(|endpoint| {
        match telemetry::init_tracer(&config.service_name, endpoint) {
            Ok(tracer) => Some(tracer),
            Err(e) => {
                eprintln!("Failed to initialize tracer: {:?}", e);
                None
            }
        }
    });
    logging::init_logging_with_fallback(cli.debug, tracer);

    let outcome = match cli.command {
        Commands::Run {
            plan,
            clock,
            database,
        } => run(&config, plan, clock, database).await,
        Commands::Check { plan, clock } => check(&config, plan, clock).await,
        Commands::Verify { plan, database } => verify_live(&config, plan, database).await,
    };
    telemetry::shutdown_tracer();

    match outcome {
        Ok(code) => code,
        Err(e) => {
            error!(error = %format!("{:#}", e), "seeder failed");
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
