//! factroll - fact-batched rolling rollouts
//!
//! ## Commands
//!
//! - `run`: roll a revision out to a node group, one fact-value batch at a time
//! - `plan`: resolve the group and print the batches a rollout would use
//!
//! Puppet Enterprise endpoints come from `PE_SERVER` / `PE_TOKEN` (see
//! `PeConfig::from_env`); every flag can also be set through a `FACTROLL_*`
//! environment variable.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{info, warn, Level};

use factroll_core::{
    render_summary, run_rollout, write_report_json, BatchPlan, ConfigError, FactGrouper,
    MissingFactPolicy, RolloutConfig, RolloutFailure, RolloutReport, TargetResolver,
};
use factroll_platform::{
    ApprovalGate, AutoApprove, BoundedApproval, FileApprovalGate, GitRemote, PeClient, Platform,
    PlatformError,
};

#[derive(Parser)]
#[command(name = "factroll")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Fact-batched rolling rollouts for Puppet Enterprise", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true, env = "FACTROLL_VERBOSE")]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true, env = "FACTROLL_LOG_JSON")]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Roll a revision out to a node group
    Run(RunArgs),

    /// Resolve the group and print the batch plan without changing anything
    Plan(TargetArgs),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum MissingFact {
    Fail,
    Exclude,
}

impl From<MissingFact> for MissingFactPolicy {
    fn from(value: MissingFact) -> Self {
        match value {
            MissingFact::Fail => MissingFactPolicy::Fail,
            MissingFact::Exclude => MissingFactPolicy::Exclude,
        }
    }
}

#[derive(Args, Debug, Clone)]
struct TargetArgs {
    /// Node group to roll out to
    #[arg(long, env = "FACTROLL_GROUP")]
    group: String,

    /// Fact whose values define the batches (dotted for structured facts)
    #[arg(long, env = "FACTROLL_FACT")]
    fact: String,

    /// What to do with nodes that have no value for the fact
    #[arg(long, value_enum, default_value_t = MissingFact::Fail, env = "FACTROLL_MISSING_FACT")]
    missing_fact: MissingFact,

    /// Write the result as JSON to this path
    #[arg(long, env = "FACTROLL_REPORT")]
    report: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
struct RunArgs {
    #[command(flatten)]
    target: TargetArgs,

    /// Commit to roll out
    #[arg(long, env = "FACTROLL_REVISION")]
    revision: String,

    /// Persistent branch to move to the revision once every batch passed
    #[arg(long, env = "FACTROLL_BRANCH")]
    branch: String,

    /// Apply in trial mode only
    #[arg(long, env = "FACTROLL_NOOP")]
    noop: bool,

    /// After a clean trial rollout, enforce on every batch
    #[arg(long, env = "FACTROLL_ENFORCE_AFTER_NOOP")]
    enforce_after_noop: bool,

    /// Seconds to wait between batches
    #[arg(long, default_value_t = 0, env = "FACTROLL_BATCH_DELAY_SECS")]
    batch_delay_secs: u64,

    /// Fail instead of deploying directly when the group has no nodes
    #[arg(long, env = "FACTROLL_FAIL_IF_NO_NODES")]
    fail_if_no_nodes: bool,

    /// Identifier used in temporary branch names (generated if omitted)
    #[arg(long, env = "FACTROLL_ROLLOUT_ID")]
    rollout_id: Option<String>,

    /// Prefix for temporary branch names
    #[arg(long, default_value = "", env = "FACTROLL_BRANCH_PREFIX")]
    branch_prefix: String,

    /// Local clone of the control repository
    #[arg(long, default_value = ".", env = "FACTROLL_GIT_DIR")]
    git_dir: PathBuf,

    /// Remote that hosts the control repository
    #[arg(long, default_value = "origin", env = "FACTROLL_GIT_REMOTE")]
    git_remote: String,

    /// Wait for `<dir>/<environment>.approved` before touching anything
    #[arg(long, env = "FACTROLL_APPROVAL_DIR")]
    approval_dir: Option<PathBuf>,

    /// Give up waiting for approval after this many seconds
    #[arg(long, env = "FACTROLL_APPROVAL_TIMEOUT_SECS")]
    approval_timeout_secs: Option<u64>,
}

impl RunArgs {
    fn to_config(&self) -> Result<RolloutConfig, ConfigError> {
        let mut builder = RolloutConfig::builder(
            &self.revision,
            &self.target.group,
            &self.branch,
            &self.target.fact,
        )
        .noop(self.noop)
        .post_noop_enforce(self.enforce_after_noop)
        .batch_delay(Duration::from_secs(self.batch_delay_secs))
        .fail_if_no_nodes(self.fail_if_no_nodes)
        .missing_fact_policy(self.target.missing_fact.into())
        .branch_prefix(&self.branch_prefix);
        if let Some(id) = &self.rollout_id {
            builder = builder.rollout_id(id);
        }
        builder.build()
    }

    fn approval_gate(&self) -> Arc<dyn ApprovalGate> {
        let gate: Arc<dyn ApprovalGate> = match &self.approval_dir {
            Some(dir) => Arc::new(FileApprovalGate::new(dir)),
            None => Arc::new(AutoApprove),
        };
        match self.approval_timeout_secs {
            Some(secs) => Arc::new(BoundedApproval::new(gate, Duration::from_secs(secs))),
            None => gate,
        }
    }
}

/// Exit status for a failed command: 2 for configuration problems, 1 for
/// everything else.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    if err.downcast_ref::<ConfigError>().is_some() {
        return 2;
    }
    if let Some(PlatformError::Config(_)) = err.downcast_ref::<PlatformError>() {
        return 2;
    }
    1
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    factroll_core::init_tracing(cli.json, level);

    let result = match cli.command {
        Commands::Run(args) => cmd_run(&args).await,
        Commands::Plan(args) => cmd_plan(&args).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(exit_code_for(&err))
        }
    }
}

fn pe_client() -> Result<Arc<PeClient>> {
    let client = PeClient::from_env().context("Failed to configure Puppet Enterprise client")?;
    Ok(Arc::new(client))
}

async fn cmd_run(args: &RunArgs) -> Result<()> {
    let config = args.to_config()?;
    let pe = pe_client()?;
    let scm = Arc::new(GitRemote::new(&args.git_dir).with_remote(&args.git_remote));
    let platform = Platform::new(
        pe.clone(),
        args.approval_gate(),
        pe.clone(),
        scm,
        pe.clone(),
        pe,
    );

    info!(
        rollout_id = %config.rollout_id(),
        group = %config.target_group(),
        revision = %config.revision().short(),
        "starting rollout"
    );
    let report = execute_rollout(platform, &config, args.target.report.as_deref()).await?;
    println!("{}", render_summary(&report));
    Ok(())
}

/// Run the rollout and write the JSON report, on success or failure.
async fn execute_rollout(
    platform: Platform,
    config: &RolloutConfig,
    report_path: Option<&Path>,
) -> Result<RolloutReport> {
    match run_rollout(platform, config).await {
        Ok(report) => {
            if let Some(path) = report_path {
                write_report_json(path, &report)?;
            }
            Ok(report)
        }
        Err(failure) => {
            if let Some(path) = report_path {
                if let Err(e) = write_report_json(path, &failure_document(&failure)) {
                    warn!(
                        path = %path.display(),
                        error = %format!("{e:#}"),
                        "could not write failure report"
                    );
                }
            }
            Err(failure.into())
        }
    }
}

fn failure_document(failure: &RolloutFailure) -> serde_json::Value {
    serde_json::json!({
        "status": "failed",
        "message": failure.to_string(),
        "failure": failure,
    })
}

async fn cmd_plan(args: &TargetArgs) -> Result<()> {
    let pe = pe_client()?;
    let plan = build_plan(pe.as_ref(), args).await?;
    if let Some(path) = &args.report {
        write_report_json(path, &plan)?;
    }
    print!("{}", render_plan(&args.group, &plan));
    Ok(())
}

async fn build_plan(pe: &PeClient, args: &TargetArgs) -> Result<BatchPlan> {
    let resolver = TargetResolver::new(pe, &AutoApprove);
    let target = resolver.resolve(&args.group).await?;
    if target.is_empty() {
        return Ok(BatchPlan {
            fact: args.fact.clone(),
            ..Default::default()
        });
    }
    let plan = FactGrouper::new(pe, args.missing_fact.into())
        .group(&target.nodes, &args.fact)
        .await?;
    Ok(plan)
}

fn render_plan(group: &str, plan: &BatchPlan) -> String {
    let mut out = String::new();
    if plan.is_empty() {
        out.push_str(&format!("{group}: no nodes, a rollout would deploy directly\n"));
        return out;
    }
    out.push_str(&format!(
        "{group}: {} batch(es) by {}, {} node(s)\n",
        plan.len(),
        plan.fact,
        plan.node_count()
    ));
    for (i, batch) in plan.batches.iter().enumerate() {
        out.push_str(&format!(
            "  {}. {} ({}): {}\n",
            i + 1,
            batch.key,
            batch.nodes.len(),
            batch.nodes.join(", ")
        ));
    }
    if !plan.excluded_nodes.is_empty() {
        out.push_str(&format!("  excluded: {}\n", plan.excluded_nodes.join(", ")));
    }
    out
}
