//! Entries service
//!
//! Entry lifecycle for trackers. Entries are append-mostly: daily
//! granularity permits one entry per (tracker, owner, date), and updates
//! merge the incoming partial value map into the stored one before
//! re-validating the merged result against the tracker's schema snapshot.
//!
//! Every operation runs the same three-phase pipeline: resolve
//! permissions, validate, persist. Validation always happens before any
//! write.

use crate::database::{EntityKind, Granularity, Repository, TrackerEntry};
use crate::error::{AppError, Result};
use crate::fields::{merge_values, validate_entry_values};
use crate::services::insights::InsightsCache;
use crate::services::permissions::{ObservationContext, PermissionsService};
use chrono::NaiveDate;
use serde_json::{Map, Value};

/// Service for managing tracker entries
#[derive(Clone)]
pub struct EntriesService {
    repo: Repository,
    permissions: PermissionsService,
    cache: InsightsCache,
}

impl EntriesService {
    pub fn new(repo: Repository, permissions: PermissionsService, cache: InsightsCache) -> Self {
        Self {
            repo,
            permissions,
            cache,
        }
    }

    /// Create an entry for a tracker on a date.
    ///
    /// Daily granularity rejects a second entry for the same
    /// (tracker, owner, date) with a conflict directing the caller to
    /// update instead; the persistence-layer unique index backs this up
    /// against concurrent creates.
    pub async fn create_entry(
        &self,
        acting: &str,
        tracker_id: &str,
        entry_date: NaiveDate,
        values: Map<String, Value>,
        notes: Option<&str>,
        context: Option<&ObservationContext>,
    ) -> Result<TrackerEntry> {
        let permissions = self
            .permissions
            .resolve(EntityKind::Tracker, tracker_id, acting, context)
            .await?;

        if !permissions.can_edit {
            return Err(AppError::Permission(format!(
                "no edit rights on tracker {}",
                tracker_id
            )));
        }

        let tracker = self
            .repo
            .get_tracker(tracker_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("tracker {}", tracker_id)))?;

        if tracker.granularity == Granularity::Daily {
            let existing = self
                .repo
                .get_daily_entry(tracker_id, acting, entry_date)
                .await?;
            if existing.is_some() {
                return Err(AppError::Conflict(format!(
                    "an entry already exists for tracker {} on {}; update it instead",
                    tracker_id, entry_date
                )));
            }
        }

        let schema = tracker.schema_snapshot()?;
        validate_entry_values(&schema, &values)?;

        let entry = self
            .repo
            .create_entry(
                tracker_id,
                acting,
                entry_date,
                tracker.granularity,
                &serde_json::to_string(&values)?,
                notes,
            )
            .await?;

        self.cache.invalidate_tracker(tracker_id).await;

        tracing::info!("Created entry {} on tracker {}", entry.id, tracker_id);
        Ok(entry)
    }

    /// Update an entry with a partial value map.
    ///
    /// The incoming map is shallow-merged into the stored one (new keys
    /// overwrite, unspecified keys are retained) and the merged result is
    /// re-validated. A partial update can therefore never un-satisfy a
    /// required field by omission, nor dodge validation.
    pub async fn update_entry(
        &self,
        acting: &str,
        entry_id: &str,
        values: Map<String, Value>,
        notes: Option<&str>,
        context: Option<&ObservationContext>,
    ) -> Result<TrackerEntry> {
        let entry = self
            .repo
            .get_entry(entry_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("entry {}", entry_id)))?;

        let permissions = self
            .permissions
            .resolve(EntityKind::Tracker, &entry.tracker_id, acting, context)
            .await?;

        if !permissions.can_edit {
            return Err(AppError::Permission(format!(
                "no edit rights on tracker {}",
                entry.tracker_id
            )));
        }

        let tracker = self
            .repo
            .get_tracker(&entry.tracker_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("tracker {}", entry.tracker_id)))?;

        let merged = merge_values(&entry.values()?, &values);
        let schema = tracker.schema_snapshot()?;
        validate_entry_values(&schema, &merged)?;

        let updated = self
            .repo
            .update_entry(entry_id, &serde_json::to_string(&merged)?, notes)
            .await?;

        self.cache.invalidate_tracker(&entry.tracker_id).await;

        tracing::debug!("Updated entry {} on tracker {}", entry_id, entry.tracker_id);
        Ok(updated)
    }

    /// Get an entry the principal may see, or None
    pub async fn get_entry(
        &self,
        acting: &str,
        entry_id: &str,
        context: Option<&ObservationContext>,
    ) -> Result<Option<TrackerEntry>> {
        let entry = match self.repo.get_entry(entry_id).await? {
            Some(entry) => entry,
            None => return Ok(None),
        };

        let permissions = self
            .permissions
            .resolve(EntityKind::Tracker, &entry.tracker_id, acting, context)
            .await?;

        Ok(permissions.can_view.then_some(entry))
    }

    /// List entries for a tracker, optionally bounded by date. Returns an
    /// empty list when the principal has no view access; existence must
    /// not leak.
    pub async fn list_entries(
        &self,
        acting: &str,
        tracker_id: &str,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
        context: Option<&ObservationContext>,
    ) -> Result<Vec<TrackerEntry>> {
        let permissions = self
            .permissions
            .resolve(EntityKind::Tracker, tracker_id, acting, context)
            .await?;

        if !permissions.can_view {
            return Ok(Vec::new());
        }

        self.repo.list_entries(tracker_id, from, to).await
    }
}
