//! Insights service
//!
//! Derived per-tracker summaries (entry counts, date range, numeric field
//! statistics) behind an injectable TTL cache keyed by the requested
//! tracker-id set. Any entry mutation invalidates every cached key that
//! contains the mutated tracker: writers call
//! [`InsightsCache::invalidate_tracker`] before the TTL has a say.

use crate::config::INSIGHTS_CACHE_TTL_SECS;
use crate::database::{EntityKind, Repository};
use crate::error::Result;
use crate::fields::FieldType;
use crate::services::permissions::{ObservationContext, PermissionsService};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Numeric summary for one number/rating field
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldSummary {
    pub field_id: String,
    pub label: String,
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

/// Derived insights for one tracker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackerInsights {
    pub tracker_id: String,
    pub entry_count: usize,
    pub first_entry: Option<NaiveDate>,
    pub last_entry: Option<NaiveDate>,
    pub field_summaries: Vec<FieldSummary>,
}

struct CachedInsights {
    computed_at: Instant,
    tracker_ids: Vec<String>,
    insights: Vec<TrackerInsights>,
}

/// Injectable TTL cache for derived insights.
///
/// Cloning shares the underlying store, so the entries service and the
/// insights service operate on the same cache instance.
#[derive(Clone)]
pub struct InsightsCache {
    inner: Arc<RwLock<HashMap<String, CachedInsights>>>,
    ttl: Duration,
}

impl InsightsCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    pub fn with_default_ttl() -> Self {
        Self::new(Duration::from_secs(INSIGHTS_CACHE_TTL_SECS))
    }

    async fn get(&self, key: &str) -> Option<Vec<TrackerInsights>> {
        let store = self.inner.read().await;
        store
            .get(key)
            .filter(|cached| cached.computed_at.elapsed() < self.ttl)
            .map(|cached| cached.insights.clone())
    }

    async fn put(&self, key: String, tracker_ids: Vec<String>, insights: Vec<TrackerInsights>) {
        let mut store = self.inner.write().await;
        store.insert(
            key,
            CachedInsights {
                computed_at: Instant::now(),
                tracker_ids,
                insights,
            },
        );
    }

    /// Drop every cached result that covers the given tracker. Called on
    /// every entry mutation for that tracker.
    pub async fn invalidate_tracker(&self, tracker_id: &str) {
        let mut store = self.inner.write().await;
        store.retain(|_, cached| !cached.tracker_ids.iter().any(|id| id == tracker_id));
    }
}

/// Service computing derived insights over tracker entries
#[derive(Clone)]
pub struct InsightsService {
    repo: Repository,
    permissions: PermissionsService,
    cache: InsightsCache,
}

impl InsightsService {
    pub fn new(repo: Repository, permissions: PermissionsService, cache: InsightsCache) -> Self {
        Self {
            repo,
            permissions,
            cache,
        }
    }

    /// Compute insights for the visible subset of the given trackers.
    /// Trackers the principal cannot view are silently omitted.
    pub async fn tracker_insights(
        &self,
        acting: &str,
        tracker_ids: &[String],
        context: Option<&ObservationContext>,
    ) -> Result<Vec<TrackerInsights>> {
        let mut sorted: Vec<String> = tracker_ids.to_vec();
        sorted.sort();
        sorted.dedup();
        let key = format!("{}:{}", acting, sorted.join(","));

        if let Some(cached) = self.cache.get(&key).await {
            tracing::debug!("Insights cache hit for {}", key);
            return Ok(cached);
        }

        let mut insights = Vec::new();
        for tracker_id in &sorted {
            let permissions = self
                .permissions
                .resolve(EntityKind::Tracker, tracker_id, acting, context)
                .await?;
            if !permissions.can_view {
                continue;
            }
            insights.push(self.compute(tracker_id).await?);
        }

        self.cache.put(key, sorted, insights.clone()).await;
        Ok(insights)
    }

    async fn compute(&self, tracker_id: &str) -> Result<TrackerInsights> {
        let tracker = match self.repo.get_tracker(tracker_id).await? {
            Some(tracker) => tracker,
            None => {
                return Ok(TrackerInsights {
                    tracker_id: tracker_id.to_string(),
                    entry_count: 0,
                    first_entry: None,
                    last_entry: None,
                    field_summaries: Vec::new(),
                })
            }
        };

        let schema = tracker.schema_snapshot()?;
        let entries = self.repo.list_entries(tracker_id, None, None).await?;

        let entry_count = entries.len();
        let first_entry = entries.iter().map(|e| e.entry_date).min();
        let last_entry = entries.iter().map(|e| e.entry_date).max();

        let mut field_summaries = Vec::new();
        for field in &schema {
            if !matches!(field.field_type, FieldType::Number | FieldType::Rating) {
                continue;
            }

            let mut samples: Vec<f64> = Vec::new();
            for entry in &entries {
                let values = entry.values()?;
                if let Some(n) = values.get(&field.id).and_then(|v| v.as_f64()) {
                    if n.is_finite() {
                        samples.push(n);
                    }
                }
            }

            if samples.is_empty() {
                continue;
            }

            let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
            let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let mean = samples.iter().sum::<f64>() / samples.len() as f64;

            field_summaries.push(FieldSummary {
                field_id: field.id.clone(),
                label: field.label.clone(),
                count: samples.len(),
                min,
                max,
                mean,
            });
        }

        Ok(TrackerInsights {
            tracker_id: tracker_id.to_string(),
            entry_count,
            first_entry,
            last_entry,
            field_summaries,
        })
    }
}
