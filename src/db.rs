//! Persistence: pool setup, schema migration, and the two upserts.
//!
//! Functions take a generic `Executor<'e, Database = Postgres>` so they work
//! identically against a bare `&PgPool` or a `&mut Transaction`, the same
//! convention `domain/captures.rs` used in the teacher.
//!
//! ```ignore
//! let mut tx = pool.begin().await?;
//! upsert_video(&mut *tx, &record).await?;
//! upsert_analysis(&mut *tx, &record).await?;
//! tx.commit().await?;
//! ```

use sqlx::{Executor, PgPool, Postgres};

use crate::models::AnalysisRecord;

pub async fn connect(database_url: &str) -> Result<PgPool, sqlx::Error> {
    let pool = PgPool::connect(database_url).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    Ok(pool)
}

/// Upsert into `videos`. Non-key metadata is COALESCE-preserved: a `NULL`
/// in the incoming row leaves the existing value untouched.
pub async fn upsert_video<'e, E>(executor: E, record: &AnalysisRecord) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO videos (
            platform, video_id, first_seen_at, last_seen_at,
            title, channel, published_at, region, source_url, views_per_hour
        )
        VALUES ($1, $2, now(), now(), $3, $4, $5, $6, $7, $8)
        ON CONFLICT (platform, video_id) DO UPDATE SET
            last_seen_at = now(),
            title = COALESCE(EXCLUDED.title, videos.title),
            channel = COALESCE(EXCLUDED.channel, videos.channel),
            published_at = COALESCE(EXCLUDED.published_at, videos.published_at),
            region = COALESCE(EXCLUDED.region, videos.region),
            source_url = EXCLUDED.source_url,
            views_per_hour = COALESCE(EXCLUDED.views_per_hour, videos.views_per_hour)
        "#,
    )
    .bind(&record.platform)
    .bind(&record.video_id)
    .bind(&record.title)
    .bind(&record.channel)
    .bind(record.published_at)
    .bind(&record.region)
    .bind(&record.source_url)
    .bind(record.views_per_hour)
    .execute(executor)
    .await?;

    Ok(())
}

/// Upsert into `analyses`. Full replace of every non-key column.
pub async fn upsert_analysis<'e, E>(executor: E, record: &AnalysisRecord) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let features = serde_json::to_value(&record.verdict.features)
        .unwrap_or(serde_json::Value::Null);

    sqlx::query(
        r#"
        INSERT INTO analyses (
            platform, video_id, analyzed_at, label, confidence, reason,
            features, model_version, frame_policy, batch_time_ms, frames_count, source_url
        )
        VALUES ($1, $2, now(), $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ON CONFLICT (platform, video_id) DO UPDATE SET
            analyzed_at = now(),
            label = EXCLUDED.label,
            confidence = EXCLUDED.confidence,
            reason = EXCLUDED.reason,
            features = EXCLUDED.features,
            model_version = EXCLUDED.model_version,
            frame_policy = EXCLUDED.frame_policy,
            batch_time_ms = EXCLUDED.batch_time_ms,
            frames_count = EXCLUDED.frames_count,
            source_url = EXCLUDED.source_url
        "#,
    )
    .bind(&record.platform)
    .bind(&record.video_id)
    .bind(record.verdict.label.as_str())
    .bind(record.verdict.confidence)
    .bind(&record.verdict.reason)
    .bind(features)
    .bind(crate::models::MODEL_VERSION)
    .bind(&record.frame_policy)
    .bind(record.batch_time_ms)
    .bind(record.frames_count as i32)
    .bind(&record.source_url)
    .execute(executor)
    .await?;

    Ok(())
}

/// Persist an analysis record in a single transaction: video first, then
/// the analysis row, per spec.md 4.3 step 5.
pub async fn persist_record(pool: &PgPool, record: &AnalysisRecord) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    upsert_video(&mut *tx, record).await?;
    upsert_analysis(&mut *tx, record).await?;
    tx.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Label, Verdict, VerdictFeatures, VoteShare};

    fn sample_record() -> AnalysisRecord {
        AnalysisRecord {
            platform: "youtube".into(),
            video_id: "abc".into(),
            title: Some("title".into()),
            channel: None,
            published_at: None,
            region: None,
            source_url: "https://www.youtube.com/shorts/abc".into(),
            views_per_hour: Some(12.5),
            verdict: Verdict {
                label: Label::Verified,
                confidence: 0.8,
                reason: "default_real".into(),
                vote_share: VoteShare::default(),
                features: VerdictFeatures::default(),
            },
            frames_count: 16,
            batch_time_ms: 120.0,
            frame_policy: "even_16".into(),
        }
    }

    #[test]
    fn features_serialize_to_json_object() {
        let record = sample_record();
        let value = serde_json::to_value(&record.verdict.features).unwrap();
        assert!(value.is_object());
    }
}
