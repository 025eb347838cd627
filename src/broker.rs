//! SQL-backed priority queue standing in for the external broker
//! (spec.md 6). Claim/release use the same `FOR UPDATE SKIP LOCKED` idiom
//! the teacher already uses twice for its own claim tables
//! (`frames.rs::claim_frame_captures`, `thumbnails.rs::claim_thumbnail_captures`).

use sqlx::PgPool;

use crate::models::AnalysisJob;

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: i64,
    platform: String,
    video_id: String,
    url: String,
    title: Option<String>,
    channel: Option<String>,
    published_at: Option<chrono::DateTime<chrono::Utc>>,
    region: Option<String>,
    views_per_hour: Option<f64>,
    priority: i16,
}

impl JobRow {
    fn into_job(self) -> (i64, AnalysisJob) {
        (
            self.id,
            AnalysisJob {
                platform: self.platform,
                video_id: self.video_id,
                url: self.url,
                title: self.title,
                channel: self.channel,
                published_at: self.published_at,
                region: self.region,
                views_per_hour: self.views_per_hour,
                priority: self.priority,
            },
        )
    }
}

/// Enqueue a job at the given priority. Mirrors `scripts/enqueue.py`'s
/// `enqueue_task`, minus the Celery transport.
pub async fn enqueue(pool: &PgPool, job: &AnalysisJob) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO analysis_jobs (
            platform, video_id, url, title, channel, published_at, region, views_per_hour, priority
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(&job.platform)
    .bind(&job.video_id)
    .bind(&job.url)
    .bind(&job.title)
    .bind(&job.channel)
    .bind(job.published_at)
    .bind(&job.region)
    .bind(job.views_per_hour)
    .bind(job.priority)
    .execute(pool)
    .await?;

    Ok(())
}

/// Claim up to `limit` undone jobs, highest priority and oldest first,
/// skipping rows another worker already holds.
pub async fn claim_jobs(pool: &PgPool, limit: i64) -> Result<Vec<(i64, AnalysisJob)>, sqlx::Error> {
    let rows: Vec<JobRow> = sqlx::query_as(
        r#"
        WITH claimed AS (
            SELECT id FROM analysis_jobs
            WHERE NOT done AND claimed_at IS NULL
            ORDER BY priority DESC, enqueued_at ASC
            LIMIT $1
            FOR UPDATE SKIP LOCKED
        )
        UPDATE analysis_jobs
        SET claimed_at = now(), attempts = attempts + 1
        WHERE id IN (SELECT id FROM claimed)
        RETURNING id, platform, video_id, url, title, channel, published_at, region, views_per_hour, priority
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(JobRow::into_job).collect())
}

/// Mark a job permanently done (success, or a failure the broker should not
/// redeliver because the claim/stamp mechanism already governs retries).
pub async fn mark_done(pool: &PgPool, id: i64) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE analysis_jobs SET done = TRUE WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Release a claimed job back to the queue so another worker can pick it
/// up on the next poll.
pub async fn requeue(pool: &PgPool, id: i64) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE analysis_jobs SET claimed_at = NULL WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}
