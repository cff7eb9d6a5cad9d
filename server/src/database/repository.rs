//! Repository layer for database operations
//!
//! This module provides CRUD operations for all entities plus the
//! entitlement-store lookups (grants, observation links, group membership)
//! consumed by the permission resolution engine. Queries return only
//! non-revoked rows unless stated otherwise.

use super::models::*;
use crate::error::{AppError, Result};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

/// Repository for database operations
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // ===== Profiles & groups =====

    /// Create a principal profile
    pub async fn create_profile(&self, id: &str, display_name: &str, is_admin: bool) -> Result<Profile> {
        let now = Utc::now();

        let profile = sqlx::query_as::<_, Profile>(
            r#"
            INSERT INTO profiles (id, display_name, is_admin, created_at)
            VALUES (?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(display_name)
        .bind(is_admin)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!("Created profile: {}", id);
        Ok(profile)
    }

    pub async fn get_profile(&self, id: &str) -> Result<Option<Profile>> {
        let profile = sqlx::query_as::<_, Profile>("SELECT * FROM profiles WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(profile)
    }

    pub async fn is_admin(&self, id: &str) -> Result<bool> {
        let is_admin: Option<bool> = sqlx::query_scalar("SELECT is_admin FROM profiles WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(is_admin.unwrap_or(false))
    }

    pub async fn create_group(&self, name: &str) -> Result<Group> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        let group = sqlx::query_as::<_, Group>(
            r#"
            INSERT INTO groups (id, name, created_at)
            VALUES (?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(name)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(group)
    }

    pub async fn add_group_member(&self, group_id: &str, user_id: &str) -> Result<()> {
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO group_members (group_id, user_id, created_at)
            VALUES (?, ?, ?)
            ON CONFLICT(group_id, user_id) DO NOTHING
            "#,
        )
        .bind(group_id)
        .bind(user_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Principal/Group Directory: resolve the groups a principal belongs to
    pub async fn resolve_groups_for(&self, user_id: &str) -> Result<Vec<String>> {
        let groups: Vec<String> =
            sqlx::query_scalar("SELECT group_id FROM group_members WHERE user_id = ?")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;

        Ok(groups)
    }

    // ===== Project membership =====

    pub async fn set_project_role(&self, project_id: &str, user_id: &str, role: Role) -> Result<()> {
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO project_members (project_id, user_id, role, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(project_id, user_id) DO UPDATE SET role = excluded.role
            "#,
        )
        .bind(project_id)
        .bind(user_id)
        .bind(role)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn project_role(&self, project_id: &str, user_id: &str) -> Result<Option<Role>> {
        let role: Option<Role> = sqlx::query_scalar(
            "SELECT role FROM project_members WHERE project_id = ? AND user_id = ?",
        )
        .bind(project_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(role)
    }

    // ===== Templates =====

    pub async fn create_template(&self, req: NewTemplate) -> Result<Template> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        let template = sqlx::query_as::<_, Template>(
            r#"
            INSERT INTO templates (id, owner_id, name, description, scope, locked,
                                   field_schema_json, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(&req.owner_id)
        .bind(&req.name)
        .bind(&req.description)
        .bind(req.scope)
        .bind(req.locked)
        .bind(&req.field_schema_json)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!("Created template: {}", id);
        Ok(template)
    }

    pub async fn get_template(&self, id: &str) -> Result<Option<Template>> {
        let template = sqlx::query_as::<_, Template>("SELECT * FROM templates WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(template)
    }

    /// List active templates visible to a principal: global ones plus their own
    pub async fn list_templates_for(&self, user_id: &str) -> Result<Vec<Template>> {
        let templates = sqlx::query_as::<_, Template>(
            r#"
            SELECT * FROM templates
            WHERE archived_at IS NULL AND (scope = 'global' OR owner_id = ?)
            ORDER BY scope DESC, name ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(templates)
    }

    pub async fn update_template_meta(
        &self,
        id: &str,
        name: Option<&str>,
        description: Option<&str>,
        field_schema_json: Option<&str>,
    ) -> Result<Template> {
        let now = Utc::now();

        // Build dynamic update query
        let mut query = "UPDATE templates SET updated_at = ?".to_string();
        let mut params: Vec<String> = vec![now.to_rfc3339()];

        if let Some(name) = name {
            query.push_str(", name = ?");
            params.push(name.to_string());
        }
        if let Some(description) = description {
            query.push_str(", description = ?");
            params.push(description.to_string());
        }
        if let Some(schema) = field_schema_json {
            query.push_str(", field_schema_json = ?");
            params.push(schema.to_string());
        }

        query.push_str(" WHERE id = ? AND archived_at IS NULL");
        params.push(id.to_string());

        let mut q = sqlx::query(&query);
        for param in &params {
            q = q.bind(param);
        }

        let rows_affected = q.execute(&self.pool).await?.rows_affected();

        if rows_affected == 0 {
            return Err(AppError::NotFound(format!("template {}", id)));
        }

        self.get_template(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("template {}", id)))
    }

    pub async fn set_template_locked(&self, id: &str, locked: bool) -> Result<()> {
        sqlx::query("UPDATE templates SET locked = ?, updated_at = ? WHERE id = ?")
            .bind(locked)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Promote a template to global scope: force-lock and clear the owner
    pub async fn promote_template(&self, id: &str) -> Result<Template> {
        let rows = sqlx::query(
            r#"
            UPDATE templates
            SET scope = 'global', locked = 1, owner_id = NULL, updated_at = ?
            WHERE id = ? AND archived_at IS NULL
            "#,
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows == 0 {
            return Err(AppError::NotFound(format!("template {}", id)));
        }

        self.get_template(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("template {}", id)))
    }

    pub async fn archive_template(&self, id: &str) -> Result<()> {
        let rows = sqlx::query(
            "UPDATE templates SET archived_at = ? WHERE id = ? AND archived_at IS NULL",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows == 0 {
            return Err(AppError::NotFound(format!("template {}", id)));
        }

        tracing::debug!("Archived template: {}", id);
        Ok(())
    }

    /// True when the owner already has an active template with this name
    pub async fn template_name_taken(&self, owner_id: &str, name: &str) -> Result<bool> {
        let taken: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM templates
                WHERE owner_id = ? AND name = ? AND archived_at IS NULL
            )
            "#,
        )
        .bind(owner_id)
        .bind(name)
        .fetch_one(&self.pool)
        .await?;

        Ok(taken)
    }

    // ===== Trackers =====

    pub async fn create_tracker(&self, req: NewTracker) -> Result<Tracker> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        // Owner-controlled list ordering: new trackers go last
        let next_order: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(display_order), -1) + 1 FROM trackers WHERE owner_id = ?",
        )
        .bind(&req.owner_id)
        .fetch_one(&self.pool)
        .await?;

        let tracker = sqlx::query_as::<_, Tracker>(
            r#"
            INSERT INTO trackers (id, owner_id, template_id, name, description,
                                  field_schema_json, granularity, display_order,
                                  icon, color, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(&req.owner_id)
        .bind(&req.template_id)
        .bind(&req.name)
        .bind(&req.description)
        .bind(&req.field_schema_json)
        .bind(req.granularity)
        .bind(next_order)
        .bind(&req.icon)
        .bind(&req.color)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!("Created tracker: {} for owner: {}", id, req.owner_id);
        Ok(tracker)
    }

    pub async fn get_tracker(&self, id: &str) -> Result<Option<Tracker>> {
        let tracker = sqlx::query_as::<_, Tracker>("SELECT * FROM trackers WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(tracker)
    }

    pub async fn list_trackers_for_owner(&self, owner_id: &str) -> Result<Vec<Tracker>> {
        let trackers = sqlx::query_as::<_, Tracker>(
            r#"
            SELECT * FROM trackers
            WHERE owner_id = ? AND archived_at IS NULL
            ORDER BY display_order ASC
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(trackers)
    }

    /// Update tracker metadata. The schema snapshot is deliberately not
    /// updatable here: once created it never changes.
    pub async fn update_tracker_meta(&self, id: &str, req: &UpdateTrackerRequest) -> Result<Tracker> {
        let now = Utc::now();

        let mut query = "UPDATE trackers SET updated_at = ?".to_string();
        let mut params: Vec<String> = vec![now.to_rfc3339()];

        if let Some(name) = &req.name {
            query.push_str(", name = ?");
            params.push(name.clone());
        }
        if let Some(description) = &req.description {
            query.push_str(", description = ?");
            params.push(description.clone());
        }
        if let Some(chart) = &req.chart_config_json {
            query.push_str(", chart_config_json = ?");
            params.push(chart.clone());
        }
        if let Some(icon) = &req.icon {
            query.push_str(", icon = ?");
            params.push(icon.clone());
        }
        if let Some(color) = &req.color {
            query.push_str(", color = ?");
            params.push(color.clone());
        }

        query.push_str(" WHERE id = ? AND archived_at IS NULL");
        params.push(id.to_string());

        let mut q = sqlx::query(&query);
        for param in &params {
            q = q.bind(param);
        }

        let rows_affected = q.execute(&self.pool).await?.rows_affected();

        if rows_affected == 0 {
            return Err(AppError::NotFound(format!("tracker {}", id)));
        }

        self.get_tracker(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("tracker {}", id)))
    }

    pub async fn set_display_order(&self, id: &str, display_order: i64) -> Result<()> {
        sqlx::query("UPDATE trackers SET display_order = ?, updated_at = ? WHERE id = ?")
            .bind(display_order)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Soft-archive a tracker. Irreversible through the normal API.
    pub async fn archive_tracker(&self, id: &str) -> Result<()> {
        let rows = sqlx::query(
            "UPDATE trackers SET archived_at = ? WHERE id = ? AND archived_at IS NULL",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows == 0 {
            return Err(AppError::Conflict(format!("tracker {} is already archived", id)));
        }

        tracing::debug!("Archived tracker: {}", id);
        Ok(())
    }

    /// Entitlement store: owner and archival state in one lookup
    pub async fn get_entity_state(
        &self,
        kind: EntityKind,
        id: &str,
    ) -> Result<Option<(Option<String>, bool)>> {
        let row: Option<(Option<String>, Option<String>)> = match kind {
            EntityKind::Tracker => {
                sqlx::query_as("SELECT owner_id, archived_at FROM trackers WHERE id = ?")
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await?
            }
            EntityKind::Template => {
                sqlx::query_as("SELECT owner_id, archived_at FROM templates WHERE id = ?")
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await?
            }
        };

        Ok(row.map(|(owner, archived_at)| (owner, archived_at.is_some())))
    }

    // ===== Entries =====

    #[allow(clippy::too_many_arguments)]
    pub async fn create_entry(
        &self,
        tracker_id: &str,
        owner_id: &str,
        entry_date: NaiveDate,
        granularity: Granularity,
        values_json: &str,
        notes: Option<&str>,
    ) -> Result<TrackerEntry> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        let result = sqlx::query_as::<_, TrackerEntry>(
            r#"
            INSERT INTO tracker_entries (id, tracker_id, owner_id, entry_date,
                                         granularity, values_json, notes,
                                         created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(tracker_id)
        .bind(owner_id)
        .bind(entry_date)
        .bind(granularity)
        .bind(values_json)
        .bind(notes)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(entry) => {
                tracing::debug!("Created entry: {} for tracker: {}", id, tracker_id);
                Ok(entry)
            }
            // The partial unique index catches concurrent daily creates that
            // both passed the application-level pre-check.
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(AppError::Conflict(format!(
                    "an entry already exists for tracker {} on {}; update it instead",
                    tracker_id, entry_date
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_entry(&self, id: &str) -> Result<Option<TrackerEntry>> {
        let entry = sqlx::query_as::<_, TrackerEntry>("SELECT * FROM tracker_entries WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(entry)
    }

    /// The daily entry for (tracker, owner, date), if present
    pub async fn get_daily_entry(
        &self,
        tracker_id: &str,
        owner_id: &str,
        entry_date: NaiveDate,
    ) -> Result<Option<TrackerEntry>> {
        let entry = sqlx::query_as::<_, TrackerEntry>(
            r#"
            SELECT * FROM tracker_entries
            WHERE tracker_id = ? AND owner_id = ? AND entry_date = ? AND granularity = 'daily'
            "#,
        )
        .bind(tracker_id)
        .bind(owner_id)
        .bind(entry_date)
        .fetch_optional(&self.pool)
        .await?;

        Ok(entry)
    }

    pub async fn list_entries(
        &self,
        tracker_id: &str,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<TrackerEntry>> {
        let mut query = "SELECT * FROM tracker_entries WHERE tracker_id = ?".to_string();
        let mut dates: Vec<NaiveDate> = Vec::new();

        if let Some(from) = from {
            query.push_str(" AND entry_date >= ?");
            dates.push(from);
        }
        if let Some(to) = to {
            query.push_str(" AND entry_date <= ?");
            dates.push(to);
        }
        query.push_str(" ORDER BY entry_date DESC, created_at DESC");

        let mut q = sqlx::query_as::<_, TrackerEntry>(&query).bind(tracker_id);
        for date in dates {
            q = q.bind(date);
        }

        let entries = q.fetch_all(&self.pool).await?;

        Ok(entries)
    }

    pub async fn update_entry(
        &self,
        id: &str,
        values_json: &str,
        notes: Option<&str>,
    ) -> Result<TrackerEntry> {
        let now = Utc::now();

        let mut query = "UPDATE tracker_entries SET updated_at = ?, values_json = ?".to_string();
        if notes.is_some() {
            query.push_str(", notes = ?");
        }
        query.push_str(" WHERE id = ?");

        let mut q = sqlx::query(&query).bind(now).bind(values_json);
        if let Some(notes) = notes {
            q = q.bind(notes);
        }

        let rows_affected = q.bind(id).execute(&self.pool).await?.rows_affected();

        if rows_affected == 0 {
            return Err(AppError::NotFound(format!("entry {}", id)));
        }

        self.get_entry(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("entry {}", id)))
    }

    // ===== Grants =====

    pub async fn create_grant(
        &self,
        entity_type: EntityKind,
        entity_id: &str,
        subject_type: SubjectType,
        subject_id: &str,
        role: Role,
        granted_by: &str,
    ) -> Result<Grant> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        let grant = sqlx::query_as::<_, Grant>(
            r#"
            INSERT INTO grants (id, entity_type, entity_id, subject_type, subject_id,
                                role, granted_by, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(entity_type)
        .bind(entity_id)
        .bind(subject_type)
        .bind(subject_id)
        .bind(role)
        .bind(granted_by)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!("Created grant: {} on {} {}", id, entity_type.as_str(), entity_id);
        Ok(grant)
    }

    pub async fn get_grant(&self, id: &str) -> Result<Option<Grant>> {
        let grant = sqlx::query_as::<_, Grant>("SELECT * FROM grants WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(grant)
    }

    pub async fn revoke_grant(&self, id: &str) -> Result<()> {
        let rows = sqlx::query("UPDATE grants SET revoked_at = ? WHERE id = ? AND revoked_at IS NULL")
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if rows == 0 {
            return Err(AppError::NotFound(format!("grant {}", id)));
        }

        tracing::debug!("Revoked grant: {}", id);
        Ok(())
    }

    /// Entitlement store: all active grants addressed to a user directly
    /// or to any of the given groups.
    pub async fn list_active_grants(
        &self,
        entity_type: EntityKind,
        entity_id: &str,
        user_id: &str,
        group_ids: &[String],
    ) -> Result<Vec<Grant>> {
        let mut query = String::from(
            r#"
            SELECT * FROM grants
            WHERE entity_type = ? AND entity_id = ? AND revoked_at IS NULL
              AND ((subject_type = 'user' AND subject_id = ?)
            "#,
        );

        if !group_ids.is_empty() {
            let placeholders = vec!["?"; group_ids.len()].join(", ");
            query.push_str(&format!(
                " OR (subject_type = 'group' AND subject_id IN ({}))",
                placeholders
            ));
        }
        query.push(')');

        let mut q = sqlx::query_as::<_, Grant>(&query)
            .bind(entity_type)
            .bind(entity_id)
            .bind(user_id);
        for group_id in group_ids {
            q = q.bind(group_id);
        }

        let grants = q.fetch_all(&self.pool).await?;

        Ok(grants)
    }

    // ===== Observation links =====

    pub async fn create_observation_link(
        &self,
        tracker_id: &str,
        observer_user_id: &str,
        context_type: ContextType,
        context_id: &str,
        granted_by: &str,
    ) -> Result<ObservationLink> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        let link = sqlx::query_as::<_, ObservationLink>(
            r#"
            INSERT INTO observation_links (id, tracker_id, observer_user_id,
                                           context_type, context_id, granted_by, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(tracker_id)
        .bind(observer_user_id)
        .bind(context_type)
        .bind(context_id)
        .bind(granted_by)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!("Created observation link: {} on tracker: {}", id, tracker_id);
        Ok(link)
    }

    /// Look up a link for the tuple regardless of revocation state.
    /// Re-granting restores this row instead of inserting a duplicate.
    pub async fn find_observation_link(
        &self,
        tracker_id: &str,
        observer_user_id: &str,
        context_type: ContextType,
        context_id: &str,
    ) -> Result<Option<ObservationLink>> {
        let link = sqlx::query_as::<_, ObservationLink>(
            r#"
            SELECT * FROM observation_links
            WHERE tracker_id = ? AND observer_user_id = ?
              AND context_type = ? AND context_id = ?
            "#,
        )
        .bind(tracker_id)
        .bind(observer_user_id)
        .bind(context_type)
        .bind(context_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(link)
    }

    /// Entitlement store: the active link for (tracker, observer, context)
    pub async fn find_active_observation_link(
        &self,
        tracker_id: &str,
        observer_user_id: &str,
        context_type: ContextType,
        context_id: &str,
    ) -> Result<Option<ObservationLink>> {
        let link = self
            .find_observation_link(tracker_id, observer_user_id, context_type, context_id)
            .await?;

        Ok(link.filter(|l| l.revoked_at.is_none()))
    }

    pub async fn set_observation_link_revoked(&self, id: &str, revoked: bool) -> Result<()> {
        let revoked_at = if revoked { Some(Utc::now()) } else { None };

        sqlx::query("UPDATE observation_links SET revoked_at = ? WHERE id = ?")
            .bind(revoked_at)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ===== Reminders =====

    pub async fn create_reminder(&self, req: NewReminder) -> Result<TrackerReminder> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let days_json = serde_json::to_string(&req.days_of_week)?;

        let reminder = sqlx::query_as::<_, TrackerReminder>(
            r#"
            INSERT INTO tracker_reminders (id, tracker_id, owner_id, kind,
                                           days_of_week_json, time_of_day, enabled,
                                           created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(&req.tracker_id)
        .bind(&req.owner_id)
        .bind(req.kind)
        .bind(&days_json)
        .bind(&req.time_of_day)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!("Created reminder: {} for tracker: {}", id, req.tracker_id);
        Ok(reminder)
    }

    pub async fn get_reminder(&self, id: &str) -> Result<Option<TrackerReminder>> {
        let reminder =
            sqlx::query_as::<_, TrackerReminder>("SELECT * FROM tracker_reminders WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(reminder)
    }

    pub async fn set_reminder_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let rows = sqlx::query(
            "UPDATE tracker_reminders SET enabled = ?, updated_at = ? WHERE id = ?",
        )
        .bind(enabled)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows == 0 {
            return Err(AppError::NotFound(format!("reminder {}", id)));
        }

        Ok(())
    }

    pub async fn list_enabled_reminders(&self) -> Result<Vec<TrackerReminder>> {
        let reminders = sqlx::query_as::<_, TrackerReminder>(
            "SELECT * FROM tracker_reminders WHERE enabled = 1 ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(reminders)
    }

    /// True when the owner already has an entry-prompt reminder on the tracker
    pub async fn has_entry_prompt_reminder(&self, tracker_id: &str, owner_id: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM tracker_reminders
                WHERE tracker_id = ? AND owner_id = ? AND kind = 'entry_prompt' AND enabled = 1
            )
            "#,
        )
        .bind(tracker_id)
        .bind(owner_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    pub async fn record_reminder_firing(
        &self,
        reminder_id: &str,
        owner_id: &str,
        fired_on: NaiveDate,
    ) -> Result<ReminderFiring> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        let firing = sqlx::query_as::<_, ReminderFiring>(
            r#"
            INSERT INTO reminder_firings (id, reminder_id, owner_id, fired_on, fired_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(reminder_id)
        .bind(owner_id)
        .bind(fired_on)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(firing)
    }

    pub async fn count_firings_for_day(&self, owner_id: &str, day: NaiveDate) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM reminder_firings WHERE owner_id = ? AND fired_on = ?",
        )
        .bind(owner_id)
        .bind(day)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    pub async fn has_fired_today(&self, reminder_id: &str, day: NaiveDate) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM reminder_firings WHERE reminder_id = ? AND fired_on = ?
            )
            "#,
        )
        .bind(reminder_id)
        .bind(day)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    // ===== Share links =====

    pub async fn create_share_link(
        &self,
        template_id: &str,
        token_hash: &str,
        created_by: &str,
        expires_at: Option<DateTime<Utc>>,
        max_uses: Option<i64>,
    ) -> Result<ShareLink> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        let link = sqlx::query_as::<_, ShareLink>(
            r#"
            INSERT INTO share_links (id, template_id, token_hash, created_by,
                                     created_at, expires_at, max_uses, use_count)
            VALUES (?, ?, ?, ?, ?, ?, ?, 0)
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(template_id)
        .bind(token_hash)
        .bind(created_by)
        .bind(now)
        .bind(expires_at)
        .bind(max_uses)
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!("Created share link: {} for template: {}", id, template_id);
        Ok(link)
    }

    pub async fn get_share_link(&self, id: &str) -> Result<Option<ShareLink>> {
        let link = sqlx::query_as::<_, ShareLink>("SELECT * FROM share_links WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(link)
    }

    pub async fn find_share_link_by_hash(&self, token_hash: &str) -> Result<Option<ShareLink>> {
        let link = sqlx::query_as::<_, ShareLink>("SELECT * FROM share_links WHERE token_hash = ?")
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await?;

        Ok(link)
    }

    pub async fn revoke_share_link(&self, id: &str) -> Result<()> {
        let rows = sqlx::query(
            "UPDATE share_links SET revoked_at = ? WHERE id = ? AND revoked_at IS NULL",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows == 0 {
            return Err(AppError::NotFound(format!("share link {}", id)));
        }

        Ok(())
    }

    /// Optimistic use-count increment: the WHERE guard loses the race when
    /// another redemption got there first. Zero rows affected is a conflict
    /// the caller retries after re-reading.
    pub async fn increment_share_link_uses(&self, id: &str, expected_count: i64) -> Result<bool> {
        let rows = sqlx::query(
            "UPDATE share_links SET use_count = use_count + 1 WHERE id = ? AND use_count = ?",
        )
        .bind(id)
        .bind(expected_count)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows == 1)
    }

    // ===== Context events & interpretations =====

    #[allow(clippy::too_many_arguments)]
    pub async fn create_context_event(
        &self,
        owner_id: &str,
        tracker_id: Option<&str>,
        title: &str,
        description: Option<&str>,
        starts_on: NaiveDate,
        ends_on: Option<NaiveDate>,
    ) -> Result<ContextEvent> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        let event = sqlx::query_as::<_, ContextEvent>(
            r#"
            INSERT INTO context_events (id, owner_id, tracker_id, title, description,
                                        starts_on, ends_on, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(owner_id)
        .bind(tracker_id)
        .bind(title)
        .bind(description)
        .bind(starts_on)
        .bind(ends_on)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(event)
    }

    pub async fn get_context_event(&self, id: &str) -> Result<Option<ContextEvent>> {
        let event = sqlx::query_as::<_, ContextEvent>("SELECT * FROM context_events WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(event)
    }

    pub async fn list_context_events(&self, owner_id: &str) -> Result<Vec<ContextEvent>> {
        let events = sqlx::query_as::<_, ContextEvent>(
            "SELECT * FROM context_events WHERE owner_id = ? ORDER BY starts_on DESC",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }

    pub async fn delete_context_event(&self, id: &str) -> Result<()> {
        let rows = sqlx::query("DELETE FROM context_events WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if rows == 0 {
            return Err(AppError::NotFound(format!("context event {}", id)));
        }

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create_interpretation(
        &self,
        owner_id: &str,
        tracker_id: &str,
        body: &str,
        starts_on: NaiveDate,
        ends_on: Option<NaiveDate>,
    ) -> Result<Interpretation> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        let interpretation = sqlx::query_as::<_, Interpretation>(
            r#"
            INSERT INTO interpretations (id, owner_id, tracker_id, body,
                                         starts_on, ends_on, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(owner_id)
        .bind(tracker_id)
        .bind(body)
        .bind(starts_on)
        .bind(ends_on)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(interpretation)
    }

    pub async fn get_interpretation(&self, id: &str) -> Result<Option<Interpretation>> {
        let interpretation =
            sqlx::query_as::<_, Interpretation>("SELECT * FROM interpretations WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(interpretation)
    }

    pub async fn list_interpretations(&self, owner_id: &str, tracker_id: &str) -> Result<Vec<Interpretation>> {
        let interpretations = sqlx::query_as::<_, Interpretation>(
            r#"
            SELECT * FROM interpretations
            WHERE owner_id = ? AND tracker_id = ?
            ORDER BY starts_on DESC
            "#,
        )
        .bind(owner_id)
        .bind(tracker_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(interpretations)
    }

    pub async fn update_interpretation_body(&self, id: &str, body: &str) -> Result<Interpretation> {
        let rows = sqlx::query("UPDATE interpretations SET body = ?, updated_at = ? WHERE id = ?")
            .bind(body)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if rows == 0 {
            return Err(AppError::NotFound(format!("interpretation {}", id)));
        }

        self.get_interpretation(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("interpretation {}", id)))
    }

    pub async fn delete_interpretation(&self, id: &str) -> Result<()> {
        let rows = sqlx::query("DELETE FROM interpretations WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if rows == 0 {
            return Err(AppError::NotFound(format!("interpretation {}", id)));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::schema::initialize_database;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn create_test_repo() -> Repository {
        let pool = SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap();

        initialize_database(&pool).await.unwrap();

        Repository::new(pool)
    }

    fn schema_json() -> String {
        r#"[{"id":"mood","label":"Mood","type":"rating"}]"#.to_string()
    }

    async fn seed_tracker(repo: &Repository, owner: &str) -> Tracker {
        repo.create_profile(owner, owner, false).await.ok();
        repo.create_tracker(NewTracker {
            owner_id: owner.to_string(),
            template_id: None,
            name: "Mood".to_string(),
            description: None,
            field_schema_json: schema_json(),
            granularity: Granularity::Daily,
            icon: None,
            color: None,
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_daily_duplicate_maps_to_conflict() {
        let repo = create_test_repo().await;
        let tracker = seed_tracker(&repo, "alice").await;
        let date = NaiveDate::from_ymd_opt(2026, 8, 7).unwrap();

        repo.create_entry(&tracker.id, "alice", date, Granularity::Daily, "{}", None)
            .await
            .unwrap();

        let err = repo
            .create_entry(&tracker.id, "alice", date, Granularity::Daily, "{}", None)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_session_granularity_allows_multiple_per_date() {
        let repo = create_test_repo().await;
        repo.create_profile("alice", "Alice", false).await.unwrap();
        let tracker = repo
            .create_tracker(NewTracker {
                owner_id: "alice".to_string(),
                template_id: None,
                name: "Workouts".to_string(),
                description: None,
                field_schema_json: schema_json(),
                granularity: Granularity::Session,
                icon: None,
                color: None,
            })
            .await
            .unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 8, 7).unwrap();

        repo.create_entry(&tracker.id, "alice", date, Granularity::Session, "{}", None)
            .await
            .unwrap();
        repo.create_entry(&tracker.id, "alice", date, Granularity::Session, "{}", None)
            .await
            .unwrap();

        let entries = repo.list_entries(&tracker.id, None, None).await.unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[tokio::test]
    async fn test_group_grants_resolve() {
        let repo = create_test_repo().await;
        let tracker = seed_tracker(&repo, "alice").await;
        repo.create_profile("bob", "Bob", false).await.unwrap();

        let group = repo.create_group("household").await.unwrap();
        repo.add_group_member(&group.id, "bob").await.unwrap();

        repo.create_grant(
            EntityKind::Tracker,
            &tracker.id,
            SubjectType::Group,
            &group.id,
            Role::Viewer,
            "alice",
        )
        .await
        .unwrap();

        let groups = repo.resolve_groups_for("bob").await.unwrap();
        let grants = repo
            .list_active_grants(EntityKind::Tracker, &tracker.id, "bob", &groups)
            .await
            .unwrap();

        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].role, Role::Viewer);
    }

    #[tokio::test]
    async fn test_revoked_grants_are_excluded() {
        let repo = create_test_repo().await;
        let tracker = seed_tracker(&repo, "alice").await;
        repo.create_profile("bob", "Bob", false).await.unwrap();

        let grant = repo
            .create_grant(
                EntityKind::Tracker,
                &tracker.id,
                SubjectType::User,
                "bob",
                Role::Editor,
                "alice",
            )
            .await
            .unwrap();

        repo.revoke_grant(&grant.id).await.unwrap();

        let grants = repo
            .list_active_grants(EntityKind::Tracker, &tracker.id, "bob", &[])
            .await
            .unwrap();
        assert!(grants.is_empty());
    }

    #[tokio::test]
    async fn test_share_link_optimistic_increment() {
        let repo = create_test_repo().await;
        repo.create_profile("alice", "Alice", false).await.unwrap();
        let template = repo
            .create_template(NewTemplate {
                owner_id: Some("alice".to_string()),
                name: "Sleep".to_string(),
                description: None,
                scope: TemplateScope::User,
                locked: false,
                field_schema_json: schema_json(),
            })
            .await
            .unwrap();

        let link = repo
            .create_share_link(&template.id, "hash", "alice", None, Some(2))
            .await
            .unwrap();

        assert!(repo.increment_share_link_uses(&link.id, 0).await.unwrap());
        // Stale expected count loses the race
        assert!(!repo.increment_share_link_uses(&link.id, 0).await.unwrap());
        assert!(repo.increment_share_link_uses(&link.id, 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_entity_state_lookup() {
        let repo = create_test_repo().await;
        let tracker = seed_tracker(&repo, "alice").await;

        let state = repo
            .get_entity_state(EntityKind::Tracker, &tracker.id)
            .await
            .unwrap();
        assert_eq!(state, Some((Some("alice".to_string()), false)));

        repo.archive_tracker(&tracker.id).await.unwrap();
        let state = repo
            .get_entity_state(EntityKind::Tracker, &tracker.id)
            .await
            .unwrap();
        assert_eq!(state, Some((Some("alice".to_string()), true)));

        let missing = repo.get_entity_state(EntityKind::Tracker, "nope").await.unwrap();
        assert!(missing.is_none());
    }
}
