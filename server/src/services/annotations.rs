//! Annotations service
//!
//! Context events (life-state annotations) and interpretations
//! (user-authored reflection notes) anchored to trackers and date ranges.
//! They never gate permissions and never touch tracker data; every
//! mutation requires the record's owner to be the acting principal.

use crate::database::{ContextEvent, Interpretation, Repository};
use crate::error::{AppError, Result};
use crate::fields::ValidationError;
use chrono::NaiveDate;

/// Service for managing context events and interpretations
#[derive(Clone)]
pub struct AnnotationsService {
    repo: Repository,
}

impl AnnotationsService {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    /// Create a context event, optionally anchored to a tracker the
    /// acting principal owns.
    pub async fn create_context_event(
        &self,
        acting: &str,
        tracker_id: Option<&str>,
        title: &str,
        description: Option<&str>,
        starts_on: NaiveDate,
        ends_on: Option<NaiveDate>,
    ) -> Result<ContextEvent> {
        if title.trim().is_empty() {
            return Err(ValidationError::single("title", None, "title must not be blank").into());
        }
        validate_range(starts_on, ends_on)?;

        if let Some(tracker_id) = tracker_id {
            self.check_owned_tracker(acting, tracker_id).await?;
        }

        tracing::debug!("Creating context event for {}", acting);
        self.repo
            .create_context_event(acting, tracker_id, title, description, starts_on, ends_on)
            .await
    }

    pub async fn list_context_events(&self, acting: &str) -> Result<Vec<ContextEvent>> {
        self.repo.list_context_events(acting).await
    }

    pub async fn delete_context_event(&self, acting: &str, id: &str) -> Result<()> {
        let event = self
            .repo
            .get_context_event(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("context event {}", id)))?;

        if event.owner_id != acting {
            return Err(AppError::Permission(format!(
                "context event {} is not owned by the acting user",
                id
            )));
        }

        self.repo.delete_context_event(id).await
    }

    /// Create an interpretation over a tracker the acting principal owns
    pub async fn create_interpretation(
        &self,
        acting: &str,
        tracker_id: &str,
        body: &str,
        starts_on: NaiveDate,
        ends_on: Option<NaiveDate>,
    ) -> Result<Interpretation> {
        if body.trim().is_empty() {
            return Err(ValidationError::single("body", None, "body must not be blank").into());
        }
        validate_range(starts_on, ends_on)?;
        self.check_owned_tracker(acting, tracker_id).await?;

        tracing::debug!("Creating interpretation on tracker {}", tracker_id);
        self.repo
            .create_interpretation(acting, tracker_id, body, starts_on, ends_on)
            .await
    }

    pub async fn list_interpretations(
        &self,
        acting: &str,
        tracker_id: &str,
    ) -> Result<Vec<Interpretation>> {
        self.repo.list_interpretations(acting, tracker_id).await
    }

    pub async fn update_interpretation(
        &self,
        acting: &str,
        id: &str,
        body: &str,
    ) -> Result<Interpretation> {
        if body.trim().is_empty() {
            return Err(ValidationError::single("body", None, "body must not be blank").into());
        }

        let interpretation = self
            .repo
            .get_interpretation(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("interpretation {}", id)))?;

        if interpretation.owner_id != acting {
            return Err(AppError::Permission(format!(
                "interpretation {} is not owned by the acting user",
                id
            )));
        }

        self.repo.update_interpretation_body(id, body).await
    }

    pub async fn delete_interpretation(&self, acting: &str, id: &str) -> Result<()> {
        let interpretation = self
            .repo
            .get_interpretation(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("interpretation {}", id)))?;

        if interpretation.owner_id != acting {
            return Err(AppError::Permission(format!(
                "interpretation {} is not owned by the acting user",
                id
            )));
        }

        self.repo.delete_interpretation(id).await
    }

    async fn check_owned_tracker(&self, acting: &str, tracker_id: &str) -> Result<()> {
        let tracker = self
            .repo
            .get_tracker(tracker_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("tracker {}", tracker_id)))?;

        if tracker.owner_id != acting {
            return Err(AppError::Permission(format!(
                "tracker {} is not owned by the acting user",
                tracker_id
            )));
        }

        Ok(())
    }
}

fn validate_range(starts_on: NaiveDate, ends_on: Option<NaiveDate>) -> Result<()> {
    if let Some(ends_on) = ends_on {
        if ends_on < starts_on {
            return Err(ValidationError::single(
                "ends_on",
                None,
                "end date must not precede the start date",
            )
            .into());
        }
    }
    Ok(())
}
