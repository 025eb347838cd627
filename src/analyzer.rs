//! Analyzer worker: per-job state machine (spec.md 4.3). Loop shape
//! generalized from `frames.rs::run_frame_worker`'s claim-N / `JoinSet`
//! refill / drain-on-claim-failure pattern.

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio::task::JoinSet;

use crate::aggregator::{self, FrameVote};
use crate::broker;
use crate::cache::Cache;
use crate::config::{Config, ExtractionMode};
use crate::db;
use crate::errors::AnalyzerError;
use crate::extractor::{self, ExtractorConfig};
use crate::http_client::InferenceClient;
use crate::models::{self, AnalysisJob, AnalysisRecord};
use crate::resolver_client::ResolverClient;

pub struct AnalyzerContext {
    pub pool: PgPool,
    pub cache: Cache,
    pub inference: InferenceClient,
    pub resolver: Option<ResolverClient>,
    pub extractor_config: ExtractorConfig,
    pub config: Config,
}

fn worker_concurrency() -> usize {
    std::env::var("ANALYZER_WORKER_CONCURRENCY")
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|&n: &usize| n > 0)
        .unwrap_or(4)
}

fn poll_interval() -> Duration {
    std::env::var("ANALYZER_POLL_INTERVAL_MS")
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_millis(500))
}

/// Drives the analyzer main loop: claim a batch from the broker, process
/// each job concurrently up to `worker_concurrency()`, refilling as slots
/// free up.
pub async fn run_analyzer_worker(ctx: Arc<AnalyzerContext>) {
    let concurrency = worker_concurrency();
    let mut interval = tokio::time::interval(poll_interval());
    let mut tasks: JoinSet<()> = JoinSet::new();

    loop {
        interval.tick().await;

        let available = concurrency.saturating_sub(tasks.len());
        if available > 0 {
            match broker::claim_jobs(&ctx.pool, available as i64).await {
                Ok(claimed) if claimed.is_empty() => {}
                Ok(claimed) => {
                    for (job_id, job) in claimed {
                        let ctx = ctx.clone();
                        tasks.spawn(async move {
                            if let Err(e) = process_job(&ctx, job_id, &job).await {
                                eprintln!("[analyzer] job {job_id} ({}:{}) failed: {e}", job.platform, job.video_id);
                                let _ = broker::requeue(&ctx.pool, job_id).await;
                            } else {
                                let _ = broker::mark_done(&ctx.pool, job_id).await;
                            }
                        });
                    }
                }
                Err(e) => eprintln!("[analyzer] claim failed: {e}"),
            }
        }

        while tasks.len() >= concurrency {
            tasks.join_next().await;
        }
    }
}

/// Runs the full per-job lifecycle: claim -> extract -> infer -> aggregate
/// -> persist -> cache snapshot -> stamp.
pub async fn process_job(ctx: &AnalyzerContext, job_id: i64, job: &AnalysisJob) -> Result<(), AnalyzerError> {
    let target_frames = ctx.config.infer_target_frames;
    let key = models::dedup_key(&job.platform, &job.video_id, target_frames);

    // Step 1: claim.
    let acquired = ctx.cache.claim(&key, ctx.config.idempotency_ttl_seconds).await?;
    if !acquired {
        println!("[analyzer] skip {}:{} (job {job_id}): already claimed or stamped", job.platform, job.video_id);
        return Ok(());
    }

    match run_pipeline(ctx, job).await {
        Ok(record) => {
            // Step 5: persist.
            db::persist_record(&ctx.pool, &record).await?;

            // Step 6: cache snapshot.
            let snapshot_key = models::snapshot_key(&job.platform, &job.video_id);
            if let Err(e) = ctx.cache.set_json(&snapshot_key, &record, 3600).await {
                eprintln!("[analyzer] snapshot cache write failed for {}:{}: {e}", job.platform, job.video_id);
            }

            // Step 7: stamp.
            ctx.cache.stamp(&key, ctx.config.idempotency_stamp_ttl_seconds).await?;
            Ok(())
        }
        Err(e) => {
            ctx.cache.release(&key).await?;
            Err(e)
        }
    }
}

async fn run_pipeline(ctx: &AnalyzerContext, job: &AnalysisJob) -> Result<AnalysisRecord, AnalyzerError> {
    let target_frames = ctx.config.infer_target_frames;

    // Steps 2+3: extract, then infer. The resolver path does both in one
    // request (spec.md 6: resolver contract returns the inference result
    // directly); the in-process path runs the local extractor then calls
    // the inference client itself.
    let (inference, frames_count) = match ctx.config.extraction_mode {
        ExtractionMode::InProcess => {
            let frames = extractor::extract(
                &job.url,
                target_frames,
                ctx.config.frame_extract_timeout,
                &ctx.extractor_config,
            )
            .await?;
            let inference = ctx.inference.infer(&frames).await?;
            let frames_count = frames.len();
            (inference, frames_count)
        }
        ExtractionMode::Resolver => {
            let resolver = ctx.resolver.as_ref().expect("resolver mode requires a configured resolver client");
            resolver
                .analyze(&job.url, job.title.as_deref(), job.channel.as_deref(), target_frames, ctx.config.frame_extract_timeout)
                .await?
        }
    };

    // Step 4: aggregate.
    let votes: Vec<FrameVote> = inference
        .results
        .iter()
        .map(|r| FrameVote { real: r.real(), artificial: r.artificial() })
        .collect();
    let verdict = aggregator::aggregate(&votes, job.title.as_deref(), job.channel.as_deref());

    Ok(AnalysisRecord {
        platform: job.platform.clone(),
        video_id: job.video_id.clone(),
        title: job.title.clone(),
        channel: job.channel.clone(),
        published_at: job.published_at,
        region: job.region.clone(),
        source_url: job.url.clone(),
        views_per_hour: job.views_per_hour,
        verdict,
        frames_count,
        batch_time_ms: inference.batch_time_ms,
        frame_policy: models::frame_policy(target_frames),
    })
}
