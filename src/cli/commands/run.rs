use std::sync::Arc;
use std::time::Instant;

use console::style;
use futures::FutureExt;

use super::{print_banner, select_bundles, spinner, staging_store, target_name};
use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::jobs::{verify_job, wait_until_complete, HttpJobService, JobDetails, JobRef, JobService};
use crate::provider::create_provider;
use crate::session::{with_session, RemoteExecutionSession};
use crate::submit::{discover_bundles, JobBundle, SubmitCli};
use crate::utils::format_duration;
use crate::worker::{build_target_spec, install_chain, resolve_artifacts, ResolvedArtifacts};

/// Owned state the session body runs with.
struct RunContext {
    config: HarnessConfig,
    artifacts: ResolvedArtifacts,
    bundles: Vec<JobBundle>,
    farm_id: String,
    queue_id: String,
    jobs: Arc<dyn JobService>,
    submit: SubmitCli,
}

struct BundleOutcome {
    name: String,
    job_id: Option<String>,
    result: Result<JobDetails>,
}

pub async fn execute(config: HarnessConfig, only: Option<String>) -> Result<()> {
    let (farm_id, queue_id) = config.farm_and_queue()?;
    let (farm_id, queue_id) = (farm_id.to_string(), queue_id.to_string());
    let bundles = select_bundles(discover_bundles(&config.bundles_dir)?, only.as_deref())?;
    let artifacts = resolve_artifacts(&config)?;

    let endpoint = config.jobs_endpoint.as_deref().unwrap_or_default();
    let jobs: Arc<dyn JobService> =
        Arc::new(HttpJobService::new(endpoint, config.jobs_token.clone())?);
    let provider = create_provider(&config)?;
    let store = staging_store(&config)?;
    let spec = build_target_spec(&target_name("worker"), &config, &artifacts);

    print_banner();
    println!(
        "  {} {} {}",
        style("●").cyan().bold(),
        style(&spec.name).white().bold(),
        style(format!("({}, {})", provider.name(), config.region)).dim()
    );
    println!("  {}       {}", style("Bundles").dim(), bundles.len());
    println!("  {}         {}", style("Queue").dim(), queue_id);
    println!();

    let started = Instant::now();
    let ctx = RunContext {
        submit: SubmitCli::new(&config.submit_cli),
        config,
        artifacts,
        bundles,
        farm_id,
        queue_id,
        jobs,
    };

    let outcomes = with_session(provider, store, spec, move |session| {
        async move { run_workload(session, &ctx).await }.boxed()
    })
    .await?;

    print_summary(&outcomes, started);

    let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
    if failed > 0 {
        return Err(HarnessError::Other(anyhow::anyhow!(
            "{} of {} job bundles failed",
            failed,
            outcomes.len()
        )));
    }
    Ok(())
}

async fn run_workload(
    session: &mut RemoteExecutionSession,
    ctx: &RunContext,
) -> Result<Vec<BundleOutcome>> {
    let target = session
        .target()
        .ok_or_else(|| HarnessError::InvalidState("session has no target".to_string()))?;
    let target_id = target.id().to_string();
    println!(
        "  {} Worker {} is up {}",
        style("✓").green().bold(),
        style(&target_id).cyan(),
        style(format!(
            "({}, {} files mapped{})",
            target.ip(),
            target.file_mappings().len(),
            target
                .network()
                .subnet_id
                .as_deref()
                .map(|s| format!(", subnet {}", s))
                .unwrap_or_default()
        ))
        .dim()
    );

    let chain = install_chain(&target_id, &ctx.config, &ctx.artifacts);
    let pb = spinner("Configuring worker...");
    let installed = session.run_chain(&chain, ctx.config.install_policy()).await;
    pb.finish_and_clear();
    let result = installed?;
    tracing::debug!("Configure script output:\n{}", result.stdout);
    println!("  {} Worker configured", style("✓").green().bold());
    println!();

    let mut outcomes = Vec::with_capacity(ctx.bundles.len());
    for bundle in &ctx.bundles {
        let (job_id, result) = submit_and_verify(ctx, bundle).await;
        match &result {
            Ok(_) => println!("  {} {}", style("✓").green().bold(), bundle.name),
            Err(e) => println!("  {} {}: {}", style("✕").red().bold(), bundle.name, e),
        }
        outcomes.push(BundleOutcome {
            name: bundle.name.clone(),
            job_id,
            result,
        });
    }
    Ok(outcomes)
}

async fn submit_and_verify(ctx: &RunContext, bundle: &JobBundle) -> (Option<String>, Result<JobDetails>) {
    let template = match bundle.load_template() {
        Ok(template) => template,
        Err(e) => return (None, Err(e)),
    };
    if let Some(name) = template.get("name").and_then(|n| n.as_str()) {
        tracing::debug!("Bundle {} declares job '{}'", bundle.name, name);
    }

    let job_id = match ctx.submit.submit(bundle, &ctx.farm_id, &ctx.queue_id).await {
        Ok(job_id) => job_id,
        Err(e) => return (None, Err(e)),
    };
    let job = JobRef::new(&ctx.farm_id, &ctx.queue_id, &job_id);

    let pb = spinner(format!("Waiting for {} ({})...", bundle.name, job_id));
    let waited = wait_until_complete(ctx.jobs.as_ref(), &job, ctx.config.job_policy()).await;
    pb.finish_and_clear();

    let result = async {
        let details = waited?;
        let logs = ctx.jobs.get_logs(&job).await?;
        tracing::debug!("Job {} produced {} log events", job.job_id, logs.event_count());
        verify_job(&details, &logs)?;
        Ok::<_, HarnessError>(details)
    }
    .await;
    (Some(job_id), result)
}

fn print_summary(outcomes: &[BundleOutcome], started: Instant) {
    println!();
    println!("  {}", style("Summary").bold());
    for outcome in outcomes {
        let mark = if outcome.result.is_ok() {
            style("passed").green()
        } else {
            style("failed").red()
        };
        println!(
            "  {:<32} {:<8} {}",
            outcome.name,
            mark,
            style(outcome.job_id.as_deref().unwrap_or("-")).dim()
        );
    }
    println!();
    println!(
        "  {} {}",
        style("Elapsed").dim(),
        format_duration(started.elapsed().as_secs())
    );
}
