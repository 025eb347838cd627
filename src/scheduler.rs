//! Periodic jobs: `wake_inference` (keep a scale-to-zero inference service
//! warm) and `run_discovery_job` (sweep discovery providers, after
//! confirming the inference service is awake). Both run on the same
//! apalis/apalis-cron/apalis-sql stack `thumbnails.rs::run_thumbnail_worker`
//! already uses for its own scheduled batch job (spec.md 4.4).

use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use apalis::prelude::*;
use apalis_cron::{CronStream, Schedule};
use apalis_sql::postgres::PostgresStorage;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::config::Config;
use crate::discovery::{self, ProviderRegistry};
use crate::http_client::InferenceClient;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WakeInferenceJob {
    pub scheduled_at: chrono::DateTime<chrono::Utc>,
}

impl From<chrono::DateTime<chrono::Utc>> for WakeInferenceJob {
    fn from(dt: chrono::DateTime<chrono::Utc>) -> Self {
        WakeInferenceJob { scheduled_at: dt }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryCronJob {
    pub scheduled_at: chrono::DateTime<chrono::Utc>,
}

impl From<chrono::DateTime<chrono::Utc>> for DiscoveryCronJob {
    fn from(dt: chrono::DateTime<chrono::Utc>) -> Self {
        DiscoveryCronJob { scheduled_at: dt }
    }
}

#[derive(Clone)]
pub struct SchedulerContext {
    pub pool: PgPool,
    pub inference: InferenceClient,
    pub registry: Arc<ProviderRegistry>,
    pub config: Arc<Config>,
    /// Consecutive `run_discovery_job` retries since the last successful
    /// wake, reset to 0 on success (spec.md 4.4).
    retry_count: Arc<AtomicU32>,
}

async fn process_wake_inference(_job: WakeInferenceJob, ctx: Data<SchedulerContext>) -> Result<(), Error> {
    match ctx.inference.health_check(ctx.config.health_check_timeout).await {
        Ok(()) => {}
        Err(e) => eprintln!("[scheduler] wake_inference failed: {e}"),
    }
    Ok(())
}

/// Calls `wake_inference` first; on failure, sleeps `discovery_retry_delay_seconds`
/// and rechecks, up to `discovery_max_retries` consecutive failures, matching
/// spec.md 4.4's "reschedules itself after `discovery_retry_delay_seconds`"
/// rule and spec.md 6's `DISCOVERY_RETRY_DELAY_SECONDS` env var.
async fn process_discovery_job(_job: DiscoveryCronJob, ctx: Data<SchedulerContext>) -> Result<(), Error> {
    loop {
        if ctx.inference.health_check(ctx.config.health_check_timeout).await.is_ok() {
            ctx.retry_count.store(0, Ordering::SeqCst);
            break;
        }

        let attempts = ctx.retry_count.fetch_add(1, Ordering::SeqCst) + 1;
        if attempts > ctx.config.discovery_max_retries {
            eprintln!("[scheduler] inference still cold after {attempts} attempts; sweeping anyway");
            break;
        }
        eprintln!(
            "[scheduler] inference cold (attempt {attempts}/{}); retrying in {}s",
            ctx.config.discovery_max_retries, ctx.config.discovery_retry_delay_seconds
        );
        tokio::time::sleep(Duration::from_secs(ctx.config.discovery_retry_delay_seconds)).await;
    }

    match discovery::run_sweep(&ctx.pool, &ctx.registry, &ctx.config).await {
        Ok(enqueued) => {
            if enqueued > 0 {
                println!("[scheduler] discovery sweep enqueued {enqueued} jobs");
            }
        }
        Err(e) => eprintln!("[scheduler] discovery sweep failed: {e}"),
    }
    Ok(())
}

/// Builds a 6-field (sec min hour dom month dow) cron expression that fires
/// every `interval_seconds`. The `cron` crate's seconds field only accepts
/// 0-59, the same bound `thumbnails.rs`'s `THUMBNAIL_CRON_SECONDS` guard
/// enforces; intervals of a minute or more are expressed in the minutes
/// field instead, so e.g. 120 fires every two minutes rather than silently
/// collapsing to "every minute" (spec.md 4.4).
fn interval_cron_expr(interval_seconds: u64) -> String {
    let interval_seconds = interval_seconds.max(1);
    if interval_seconds <= 59 {
        format!("*/{interval_seconds} * * * * *")
    } else {
        let minutes = (interval_seconds / 60).max(1).min(59);
        format!("0 */{minutes} * * * *")
    }
}

/// Starts both cron workers under one `Monitor`, each with its own
/// apalis-sql storage table keyed by job type (as `PostgresStorage<T>` does
/// for `thumbnails.rs`'s `ThumbnailJob`).
pub async fn run_scheduler(pool: PgPool, inference: InferenceClient, registry: ProviderRegistry, config: Config) {
    let ctx = SchedulerContext {
        pool: pool.clone(),
        inference,
        registry: Arc::new(registry),
        config: Arc::new(config),
        retry_count: Arc::new(AtomicU32::new(0)),
    };

    PostgresStorage::setup(&pool).await.expect("failed to set up apalis storage");

    let wake_schedule_expr = interval_cron_expr(ctx.config.health_check_interval_seconds);
    let wake_schedule = Schedule::from_str(&wake_schedule_expr).expect("invalid wake_inference schedule");
    let wake_storage: PostgresStorage<WakeInferenceJob> = PostgresStorage::new(pool.clone());
    let wake_backend = CronStream::new(wake_schedule).pipe_to_storage(wake_storage);
    let wake_worker = WorkerBuilder::new("wake-inference")
        .data(ctx.clone())
        .backend(wake_backend)
        .build_fn(process_wake_inference);

    let discovery_schedule_expr = interval_cron_expr(ctx.config.discovery_interval_seconds);
    let discovery_schedule = Schedule::from_str(&discovery_schedule_expr).expect("invalid run_discovery_job schedule");
    let discovery_storage: PostgresStorage<DiscoveryCronJob> = PostgresStorage::new(pool.clone());
    let discovery_backend = CronStream::new(discovery_schedule).pipe_to_storage(discovery_storage);
    let discovery_worker = WorkerBuilder::new("run-discovery-job")
        .data(ctx.clone())
        .backend(discovery_backend)
        .build_fn(process_discovery_job);

    println!(
        "[scheduler] wake_inference every {}s, run_discovery_job every {}s",
        ctx.config.health_check_interval_seconds, ctx.config.discovery_interval_seconds
    );

    Monitor::new()
        .register(wake_worker)
        .register(discovery_worker)
        .run()
        .await
        .expect("scheduler monitor failed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_minute_intervals_use_the_seconds_field() {
        assert_eq!(interval_cron_expr(30), "*/30 * * * * *");
        assert_eq!(interval_cron_expr(59), "*/59 * * * * *");
    }

    #[test]
    fn minute_and_longer_intervals_use_the_minutes_field() {
        assert_eq!(interval_cron_expr(60), "0 */1 * * * *");
        assert_eq!(interval_cron_expr(120), "0 */2 * * * *");
    }

    #[test]
    fn zero_is_clamped_to_the_smallest_valid_interval() {
        assert_eq!(interval_cron_expr(0), "*/1 * * * * *");
    }

    #[test]
    fn every_interval_parses_as_a_valid_schedule() {
        for seconds in [1, 30, 59, 60, 90, 120, 3600] {
            Schedule::from_str(&interval_cron_expr(seconds)).expect("valid cron expression");
        }
    }
}
