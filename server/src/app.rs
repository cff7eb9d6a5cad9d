//! Application state and initialization
//!
//! Bundles every service around one repository so embedders (and the
//! integration tests) have a single entry point.

use crate::database::Repository;
use crate::services::{
    AnnotationsService, EntriesService, InsightsCache, InsightsService, PermissionsService,
    RemindersService, SharingService, TemplatesService, TrackersService,
};
use sqlx::SqlitePool;

/// Central application state holding all services
#[derive(Clone)]
pub struct Studio {
    pub repo: Repository,
    pub permissions: PermissionsService,
    pub templates: TemplatesService,
    pub trackers: TrackersService,
    pub entries: EntriesService,
    pub reminders: RemindersService,
    pub sharing: SharingService,
    pub annotations: AnnotationsService,
    pub insights: InsightsService,
}

impl Studio {
    /// Wire all services around an initialized pool
    pub fn new(pool: SqlitePool) -> Self {
        let repo = Repository::new(pool);
        let permissions = PermissionsService::new(repo.clone());
        let templates = TemplatesService::new(repo.clone(), permissions.clone());
        let trackers = TrackersService::new(repo.clone(), permissions.clone(), templates.clone());
        let cache = InsightsCache::with_default_ttl();
        let entries = EntriesService::new(repo.clone(), permissions.clone(), cache.clone());
        let reminders = RemindersService::new(repo.clone(), permissions.clone());
        let sharing = SharingService::new(repo.clone(), permissions.clone());
        let annotations = AnnotationsService::new(repo.clone());
        let insights = InsightsService::new(repo.clone(), permissions.clone(), cache);

        tracing::info!("Tracker Studio services initialized");

        Self {
            repo,
            permissions,
            templates,
            trackers,
            entries,
            reminders,
            sharing,
            annotations,
            insights,
        }
    }
}
