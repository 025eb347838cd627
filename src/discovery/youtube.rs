//! YouTube discovery provider: two-phase `search.list` + `videos.list`,
//! per-region paging, views-per-hour ranking (spec.md 4.6). Grounded on
//! `original_source/.../providers/youtube.py` for exact constants and the
//! `views_per_hour` formula.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::Value;

use crate::config::Config;
use crate::discovery::DiscoveryProvider;
use crate::errors::DiscoveryError;
use crate::models::VideoCandidate;
use crate::retry::{retry_with_backoff, BackoffPolicy};

const SEARCH_URL: &str = "https://www.googleapis.com/youtube/v3/search";
const VIDEOS_URL: &str = "https://www.googleapis.com/youtube/v3/videos";

pub struct YoutubeProvider {
    http: Client,
    api_key: String,
    regions: Vec<String>,
    max_results: u32,
    max_pages_per_sweep: u32,
    request_timeout: Duration,
    search_query: String,
    top_per_region: u32,
    polite_delay: Duration,
    hours_back: i64,
}

impl YoutubeProvider {
    pub fn new(config: &Config) -> Self {
        YoutubeProvider {
            http: Client::new(),
            api_key: config.youtube_api_key.clone().unwrap_or_default(),
            regions: config.youtube_regions.clone(),
            max_results: config.youtube_max_results.min(50),
            max_pages_per_sweep: config.youtube_max_pages_per_sweep,
            request_timeout: config.youtube_request_timeout,
            search_query: config.youtube_search_query.clone(),
            top_per_region: config.youtube_top_per_region,
            polite_delay: Duration::from_secs_f64(config.youtube_polite_delay_seconds.max(0.0)),
            hours_back: config.youtube_hours_back,
        }
    }

    /// `search.list` -> candidate video ids + next page token. 429/5xx are
    /// retried up to 3 times with backoff; 401/403 abort immediately
    /// (spec.md 4.6).
    async fn search_short_ids(
        &self,
        region: &str,
        published_after: &str,
        page_token: Option<&str>,
    ) -> Result<(Vec<String>, Option<String>), DiscoveryError> {
        retry_with_backoff(
            BackoffPolicy::youtube_default(),
            || self.search_short_ids_once(region, published_after, page_token),
            |e| matches!(e, DiscoveryError::Transient(_)),
        )
        .await
    }

    async fn search_short_ids_once(
        &self,
        region: &str,
        published_after: &str,
        page_token: Option<&str>,
    ) -> Result<(Vec<String>, Option<String>), DiscoveryError> {
        let mut query = vec![
            ("key", self.api_key.as_str()),
            ("part", "snippet"),
            ("type", "video"),
            ("q", self.search_query.as_str()),
            ("videoDuration", "short"),
            ("order", "viewCount"),
            ("publishedAfter", published_after),
            ("regionCode", region),
        ];
        let max_results = self.max_results.to_string();
        query.push(("maxResults", max_results.as_str()));
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }

        let response = self
            .http
            .get(SEARCH_URL)
            .query(&query)
            .timeout(self.request_timeout)
            .send()
            .await?;

        let code = response.status().as_u16();
        if code == 401 || code == 403 {
            let body = response.text().await.unwrap_or_default();
            return Err(DiscoveryError::Auth(format!("search.list {code}: {}", truncate(&body, 160))));
        }
        if code == 429 || code >= 500 {
            let body = response.text().await.unwrap_or_default();
            return Err(DiscoveryError::Transient(format!("search.list {code}: {}", truncate(&body, 160))));
        }
        let status = response.status();
        let body: Value = response.json().await.map_err(|e| DiscoveryError::Malformed(e.to_string()))?;
        if !status.is_success() {
            return Err(DiscoveryError::Malformed(format!("search.list returned {status}: {body}")));
        }

        let items = body.get("items").and_then(|v| v.as_array()).cloned().unwrap_or_default();
        let mut ids = Vec::new();
        for item in &items {
            if let Some(id) = item.get("id").and_then(|i| i.get("videoId")).and_then(|v| v.as_str()) {
                if !ids.contains(&id.to_string()) {
                    ids.push(id.to_string());
                }
            }
        }
        let next_token = body.get("nextPageToken").and_then(|v| v.as_str()).map(|s| s.to_string());
        Ok((ids, next_token))
    }

    /// `videos.list` batch enrich, `snippet,contentDetails,statistics`.
    /// 429/5xx retried up to 3 times with backoff; 401/403 abort immediately
    /// (spec.md 4.6).
    async fn enrich_videos(&self, ids: &[String]) -> Result<Vec<Value>, DiscoveryError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        retry_with_backoff(
            BackoffPolicy::youtube_default(),
            || self.enrich_videos_once(ids),
            |e| matches!(e, DiscoveryError::Transient(_)),
        )
        .await
    }

    async fn enrich_videos_once(&self, ids: &[String]) -> Result<Vec<Value>, DiscoveryError> {
        let id_param = ids.iter().take(50).cloned().collect::<Vec<_>>().join(",");
        let response = self
            .http
            .get(VIDEOS_URL)
            .query(&[
                ("key", self.api_key.as_str()),
                ("part", "snippet,contentDetails,statistics"),
                ("id", id_param.as_str()),
                ("maxResults", "50"),
            ])
            .timeout(self.request_timeout)
            .send()
            .await?;

        let code = response.status().as_u16();
        if code == 401 || code == 403 {
            let body = response.text().await.unwrap_or_default();
            return Err(DiscoveryError::Auth(format!("videos.list {code}: {}", truncate(&body, 160))));
        }
        if code == 429 || code >= 500 {
            let body = response.text().await.unwrap_or_default();
            return Err(DiscoveryError::Transient(format!("videos.list {code}: {}", truncate(&body, 160))));
        }
        let status = response.status();
        let body: Value = response.json().await.map_err(|e| DiscoveryError::Malformed(e.to_string()))?;
        if !status.is_success() {
            return Err(DiscoveryError::Malformed(format!("videos.list returned {status}: {body}")));
        }

        Ok(body.get("items").and_then(|v| v.as_array()).cloned().unwrap_or_default())
    }

    async fn sweep_region(&self, region: &str, published_after: &str) -> Vec<Value> {
        let mut all_items = Vec::new();
        let mut page_token: Option<String> = None;
        let mut pages = 0;

        while pages < self.max_pages_per_sweep && (all_items.len() as u32) < self.top_per_region {
            let (ids, next_token) =
                match self.search_short_ids(region, published_after, page_token.as_deref()).await {
                    Ok(v) => v,
                    Err(e) => {
                        eprintln!("[youtube] [{region}] search error: {e}");
                        break;
                    }
                };
            if ids.is_empty() {
                break;
            }
            match self.enrich_videos(&ids).await {
                Ok(items) => all_items.extend(items),
                Err(e) => {
                    eprintln!("[youtube] [{region}] enrich error: {e}");
                    break;
                }
            }
            pages += 1;
            page_token = next_token;
            if page_token.is_none() {
                break;
            }
            if !self.polite_delay.is_zero() {
                tokio::time::sleep(self.polite_delay).await;
            }
        }

        all_items.sort_by(|a, b| views_per_hour(b).partial_cmp(&views_per_hour(a)).unwrap_or(std::cmp::Ordering::Equal));
        all_items.truncate(self.top_per_region as usize);
        all_items
    }
}

#[async_trait]
impl DiscoveryProvider for YoutubeProvider {
    fn name(&self) -> &'static str {
        "youtube"
    }

    async fn discover_since(
        &self,
        since: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<VideoCandidate>, DiscoveryError> {
        if self.api_key.is_empty() {
            return Err(DiscoveryError::Auth("YOUTUBE_API_KEY not configured".to_string()));
        }

        let published_after = iso_published_after(since, self.hours_back);
        let mut candidates = Vec::new();
        let mut seen = std::collections::HashSet::new();

        for region in &self.regions {
            for item in self.sweep_region(region, &published_after).await {
                let video_id = match item.get("id").and_then(|v| v.as_str()) {
                    Some(id) => id.to_string(),
                    None => continue,
                };
                let key = (region.clone(), video_id.clone());
                if !seen.insert(key) {
                    continue;
                }
                candidates.push(build_candidate(&item, region));
            }
        }

        candidates.sort_by(|a, b| b.views_per_hour.partial_cmp(&a.views_per_hour).unwrap_or(std::cmp::Ordering::Equal));
        if limit > 0 {
            candidates.truncate(limit as usize);
        }
        Ok(candidates)
    }
}

/// Truncates at a char boundary at or before byte `n`, never splitting a
/// multibyte character.
fn truncate(s: &str, n: usize) -> &str {
    if s.len() <= n {
        return s;
    }
    let mut end = n;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s.get(..end).unwrap_or(s)
}

fn iso_published_after(since: Option<DateTime<Utc>>, hours_back: i64) -> String {
    let cutoff = since.unwrap_or_else(|| Utc::now() - chrono::Duration::hours(hours_back));
    cutoff.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

fn safe_int(v: Option<&Value>) -> u64 {
    v.and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok())
        .or_else(|| v.and_then(|v| v.as_u64()))
        .unwrap_or(0)
}

/// `views_per_hour = view_count / max(hours_since_published, 1)`.
fn views_per_hour(item: &Value) -> f64 {
    let view_count = safe_int(item.get("statistics").and_then(|s| s.get("viewCount"))) as f64;
    let hours = hours_since_published(item);
    if hours <= 0.0 {
        view_count
    } else {
        view_count / hours
    }
}

fn hours_since_published(item: &Value) -> f64 {
    let published_at = item.get("snippet").and_then(|s| s.get("publishedAt")).and_then(|v| v.as_str());
    let Some(published_at) = published_at else { return 1.0 };
    match DateTime::parse_from_rfc3339(published_at) {
        Ok(dt) => ((Utc::now() - dt.with_timezone(&Utc)).num_seconds() as f64 / 3600.0).max(1.0),
        Err(_) => 1.0,
    }
}

fn build_candidate(item: &Value, region: &str) -> VideoCandidate {
    let snippet = item.get("snippet");
    let video_id = item.get("id").and_then(|v| v.as_str()).unwrap_or_default().to_string();
    let title = snippet.and_then(|s| s.get("title")).and_then(|v| v.as_str()).map(|s| s.to_string());
    let channel = snippet.and_then(|s| s.get("channelTitle")).and_then(|v| v.as_str()).map(|s| s.to_string());
    let published_at = snippet
        .and_then(|s| s.get("publishedAt"))
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc));

    VideoCandidate {
        platform: "youtube".to_string(),
        url: format!("https://www.youtube.com/shorts/{video_id}"),
        video_id,
        title,
        channel,
        region: Some(region.to_string()),
        published_at,
        view_count: safe_int(item.get("statistics").and_then(|s| s.get("viewCount"))),
        views_per_hour: views_per_hour(item),
    }
}

/// Title/channel for a single video, for heuristics input when a deep-scan
/// job arrives with no richer client-supplied metadata. Mirrors the
/// original's `video_utils.get_video_info`, reusing the same `videos.list`
/// plumbing as the sweep's enrich phase.
pub struct VideoMetadata {
    pub title: Option<String>,
    pub channel: Option<String>,
}

pub async fn fetch_video_metadata(
    config: &Config,
    video_id: &str,
) -> Result<Option<VideoMetadata>, DiscoveryError> {
    let Some(api_key) = config.youtube_api_key.as_deref() else {
        return Ok(None);
    };
    let http = Client::new();
    let response = http
        .get(VIDEOS_URL)
        .query(&[("key", api_key), ("part", "snippet"), ("id", video_id)])
        .timeout(config.youtube_request_timeout)
        .send()
        .await?;

    if response.status().as_u16() == 401 || response.status().as_u16() == 403 {
        let body = response.text().await.unwrap_or_default();
        return Err(DiscoveryError::Auth(format!("videos.list: {}", truncate(&body, 160))));
    }
    let status = response.status();
    let body: Value = response.json().await.map_err(|e| DiscoveryError::Malformed(e.to_string()))?;
    if !status.is_success() {
        return Err(DiscoveryError::Malformed(format!("videos.list returned {status}: {body}")));
    }

    let item = body.get("items").and_then(|v| v.as_array()).and_then(|items| items.first());
    let Some(item) = item else { return Ok(None) };
    let snippet = item.get("snippet");
    Ok(Some(VideoMetadata {
        title: snippet.and_then(|s| s.get("title")).and_then(|v| v.as_str()).map(|s| s.to_string()),
        channel: snippet.and_then(|s| s.get("channelTitle")).and_then(|v| v.as_str()).map(|s| s.to_string()),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn views_per_hour_floors_at_one_hour() {
        let item = json!({
            "statistics": {"viewCount": "3600"},
            "snippet": {"publishedAt": Utc::now().to_rfc3339()},
        });
        assert!((views_per_hour(&item) - 3600.0).abs() < 1.0);
    }

    #[test]
    fn views_per_hour_missing_published_at_defaults_to_one_hour() {
        let item = json!({"statistics": {"viewCount": "120"}, "snippet": {}});
        assert_eq!(views_per_hour(&item), 120.0);
    }

    #[test]
    fn truncate_does_not_split_a_multibyte_char() {
        let s = "a".repeat(159) + "\u{1F600}";
        assert_eq!(truncate(&s, 160), "a".repeat(159));
    }

    #[test]
    fn truncate_leaves_short_strings_untouched() {
        assert_eq!(truncate("hello", 160), "hello");
    }

    #[test]
    fn iso_published_after_honors_hours_back_when_since_absent() {
        let formatted = iso_published_after(None, 48);
        let cutoff = chrono::DateTime::parse_from_rfc3339(&formatted.replace('Z', "+00:00")).unwrap();
        let expected = Utc::now() - chrono::Duration::hours(48);
        assert!((cutoff.with_timezone(&Utc) - expected).num_seconds().abs() < 5);
    }
}
