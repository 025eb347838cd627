//! Discovery provider registry + sweep (spec.md 4.5/4.6, 9 Design Notes).
//!
//! The original pipeline registers providers with a decorator onto a global
//! `dict` (`providers/__init__.py::PROVIDERS`). Per spec.md 9 ("decorator-
//! based task registration becomes explicit wiring"), this becomes a trait
//! plus a registry built explicitly at startup from `Box<dyn
//! DiscoveryProvider>` entries, matching the `Worker` object pattern the
//! spec's Design Notes ask for generally.

pub mod youtube;

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::broker;
use crate::config::Config;
use crate::errors::DiscoveryError;
use crate::models::{AnalysisJob, VideoCandidate};

use async_trait::async_trait;

#[async_trait]
pub trait DiscoveryProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Return ranked candidates published since `since` (or no lower bound
    /// if `None`), capped to `limit`.
    async fn discover_since(
        &self,
        since: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<VideoCandidate>, DiscoveryError>;
}

/// Explicit registry of providers, built once at startup rather than via a
/// global/lazy-static table (spec.md 9).
pub struct ProviderRegistry {
    providers: Vec<Box<dyn DiscoveryProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        ProviderRegistry { providers: Vec::new() }
    }

    pub fn register(mut self, provider: Box<dyn DiscoveryProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Build the registry from configuration: exactly one provider
    /// (YouTube) is wired up today, matching spec.md 9's instruction to
    /// preserve the registry shape without inventing unrequested providers.
    pub fn from_config(config: &Config) -> Self {
        let mut registry = ProviderRegistry::new();
        if config.youtube_api_key.is_some() {
            registry = registry.register(Box::new(youtube::YoutubeProvider::new(config)));
        } else {
            println!("[discovery] YOUTUBE_API_KEY not set; YouTube provider disabled");
        }
        registry
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Run one discovery sweep: query every registered provider, dedup by
/// `(platform, video_id)` preferring the higher `views_per_hour`, sort
/// descending by `views_per_hour`, truncate, enqueue. Provider failures are
/// logged and skipped; they never fail the sweep (spec.md 4.5 step 1).
pub async fn run_sweep(
    pool: &sqlx::PgPool,
    registry: &ProviderRegistry,
    config: &Config,
) -> Result<usize, DiscoveryError> {
    let since = config
        .discovery_since_hours
        .map(|hours| Utc::now() - chrono::Duration::hours(hours));

    let mut raw_candidates = Vec::new();
    for provider in &registry.providers {
        match provider.discover_since(since, config.discovery_limit_per_provider).await {
            Ok(items) => {
                println!("[discovery] provider '{}' returned {} candidates", provider.name(), items.len());
                raw_candidates.extend(items);
            }
            Err(e) => eprintln!("[discovery] provider '{}' failed: {e}", provider.name()),
        }
    }

    let mut best_by_key: HashMap<(String, String), VideoCandidate> = HashMap::new();
    for candidate in raw_candidates {
        let key = candidate.key();
        match best_by_key.get(&key) {
            Some(existing) if existing.views_per_hour >= candidate.views_per_hour => {}
            _ => {
                best_by_key.insert(key, candidate);
            }
        }
    }

    let mut ranked: Vec<VideoCandidate> = best_by_key.into_values().collect();
    ranked.sort_by(|a, b| b.views_per_hour.partial_cmp(&a.views_per_hour).unwrap_or(std::cmp::Ordering::Equal));
    ranked.truncate(config.discovery_total_limit as usize);

    let mut enqueued = 0;
    for candidate in ranked {
        let job: AnalysisJob = (candidate, config.discovery_priority).into();
        if let Err(e) = broker::enqueue(pool, &job).await {
            eprintln!("[discovery] failed to enqueue {}:{}: {e}", job.platform, job.video_id);
            continue;
        }
        enqueued += 1;
    }

    Ok(enqueued)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str, vph: f64) -> VideoCandidate {
        VideoCandidate {
            platform: "youtube".to_string(),
            video_id: id.to_string(),
            url: format!("https://www.youtube.com/shorts/{id}"),
            title: None,
            channel: None,
            region: None,
            published_at: None,
            view_count: 0,
            views_per_hour: vph,
        }
    }

    #[test]
    fn dedup_prefers_higher_views_per_hour() {
        let mut best: HashMap<(String, String), VideoCandidate> = HashMap::new();
        for c in [candidate("abc", 10.0), candidate("abc", 50.0), candidate("abc", 5.0)] {
            let key = c.key();
            match best.get(&key) {
                Some(existing) if existing.views_per_hour >= c.views_per_hour => {}
                _ => {
                    best.insert(key, c);
                }
            }
        }
        assert_eq!(best.len(), 1);
        assert_eq!(best[&("youtube".to_string(), "abc".to_string())].views_per_hour, 50.0);
    }
}
