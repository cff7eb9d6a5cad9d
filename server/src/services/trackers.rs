//! Trackers service
//!
//! Tracker lifecycle: creation from a template or a raw schema, metadata
//! updates, archival, and owner-controlled list ordering. The schema
//! snapshot is copied by value at creation time and never changes
//! afterwards, even if the source template is edited.

use crate::config::MAX_NAME_LENGTH;
use crate::database::{
    EntityKind, Granularity, NewTracker, Repository, Tracker, UpdateTrackerRequest,
};
use crate::error::{AppError, Result};
use crate::fields::{validate_field_schema, FieldDef, ValidationError};
use crate::services::permissions::{ObservationContext, PermissionsService};
use crate::services::templates::TemplatesService;

/// Service for managing trackers
#[derive(Clone)]
pub struct TrackersService {
    repo: Repository,
    permissions: PermissionsService,
    templates: TemplatesService,
}

impl TrackersService {
    pub fn new(repo: Repository, permissions: PermissionsService, templates: TemplatesService) -> Self {
        Self {
            repo,
            permissions,
            templates,
        }
    }

    /// Create a tracker from a template the principal can see.
    ///
    /// The template's current field schema is copied by value into the
    /// tracker's snapshot; later template edits never propagate.
    pub async fn create_from_template(
        &self,
        acting: &str,
        template_id: &str,
        name: Option<&str>,
        granularity: Granularity,
        icon: Option<&str>,
        color: Option<&str>,
    ) -> Result<Tracker> {
        let template = self
            .templates
            .get_template(acting, template_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("template {}", template_id)))?;

        let name = name.unwrap_or(&template.name);
        validate_name(name)?;

        tracing::info!(
            "Creating tracker \"{}\" from template {} for {}",
            name,
            template_id,
            acting
        );

        self.repo
            .create_tracker(NewTracker {
                owner_id: acting.to_string(),
                template_id: Some(template_id.to_string()),
                name: name.to_string(),
                description: template.description.clone(),
                field_schema_json: template.field_schema_json.clone(),
                granularity,
                icon: icon.map(|i| i.to_string()),
                color: color.map(|c| c.to_string()),
            })
            .await
    }

    /// Create a tracker from a raw field schema
    #[allow(clippy::too_many_arguments)]
    pub async fn create_tracker(
        &self,
        acting: &str,
        name: &str,
        description: Option<&str>,
        fields: &[FieldDef],
        granularity: Granularity,
        icon: Option<&str>,
        color: Option<&str>,
    ) -> Result<Tracker> {
        validate_name(name)?;
        validate_field_schema(fields)?;

        tracing::info!("Creating tracker \"{}\" for {}", name, acting);

        self.repo
            .create_tracker(NewTracker {
                owner_id: acting.to_string(),
                template_id: None,
                name: name.to_string(),
                description: description.map(|d| d.to_string()),
                field_schema_json: serde_json::to_string(fields)?,
                granularity,
                icon: icon.map(|i| i.to_string()),
                color: color.map(|c| c.to_string()),
            })
            .await
    }

    /// Get a tracker the principal may see, or None. Existence never
    /// leaks to principals without view access.
    pub async fn get_tracker(
        &self,
        acting: &str,
        id: &str,
        context: Option<&ObservationContext>,
    ) -> Result<Option<Tracker>> {
        let permissions = self
            .permissions
            .resolve(EntityKind::Tracker, id, acting, context)
            .await?;

        if !permissions.can_view {
            return Ok(None);
        }

        self.repo.get_tracker(id).await
    }

    /// List the principal's own active trackers in display order
    pub async fn list_trackers(&self, acting: &str) -> Result<Vec<Tracker>> {
        self.repo.list_trackers_for_owner(acting).await
    }

    /// Update tracker metadata (name, description, chart config, icon,
    /// color). Requires edit rights; archived trackers are read-only
    /// even to their owner.
    pub async fn update_tracker(
        &self,
        acting: &str,
        id: &str,
        req: UpdateTrackerRequest,
    ) -> Result<Tracker> {
        let permissions = self
            .permissions
            .resolve(EntityKind::Tracker, id, acting, None)
            .await?;

        if !permissions.can_edit {
            return Err(AppError::Permission(format!(
                "no edit rights on tracker {}",
                id
            )));
        }

        if let Some(name) = &req.name {
            validate_name(name)?;
        }

        tracing::debug!("Updating tracker: {}", id);
        self.repo.update_tracker_meta(id, &req).await
    }

    /// Archive a tracker. Owner-only (grants never confer management)
    /// and irreversible through this API: the tracker becomes read-only
    /// for everyone, including the owner.
    pub async fn archive_tracker(&self, acting: &str, id: &str) -> Result<()> {
        let permissions = self
            .permissions
            .resolve(EntityKind::Tracker, id, acting, None)
            .await?;

        if !permissions.can_manage {
            return Err(AppError::Permission(format!(
                "only the owner may archive tracker {}",
                id
            )));
        }
        if !permissions.can_edit {
            // can_manage with no can_edit means the archival gate already fired
            return Err(AppError::Conflict(format!("tracker {} is already archived", id)));
        }

        tracing::info!("Archiving tracker: {}", id);
        self.repo.archive_tracker(id).await
    }

    /// Rewrite the display order of the principal's trackers to match
    /// the given id sequence. All listed trackers must be owned by them.
    pub async fn reorder_trackers(&self, acting: &str, ordered_ids: &[String]) -> Result<()> {
        for id in ordered_ids {
            let tracker = self
                .repo
                .get_tracker(id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("tracker {}", id)))?;

            if tracker.owner_id != acting {
                return Err(AppError::Permission(format!(
                    "tracker {} is not owned by the acting user",
                    id
                )));
            }
        }

        for (position, id) in ordered_ids.iter().enumerate() {
            self.repo.set_display_order(id, position as i64).await?;
        }

        tracing::debug!("Reordered {} trackers for {}", ordered_ids.len(), acting);
        Ok(())
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(ValidationError::single("name", None, "name must not be blank").into());
    }
    if name.chars().count() > MAX_NAME_LENGTH {
        return Err(ValidationError::single(
            "name",
            None,
            format!("name must be at most {} characters", MAX_NAME_LENGTH),
        )
        .into());
    }
    Ok(())
}
