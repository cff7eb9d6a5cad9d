//! Database models
//!
//! Rust structs representing database entities.
//! All models use serde for serialization to API consumers.

use crate::error::Result;
use crate::fields::FieldDef;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

/// Sharing roles, ordered weakest to strongest.
///
/// The derived ordering backs max-role selection and ceiling clamping:
/// viewer < commenter < editor < owner.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Role {
    Viewer,
    Commenter,
    Editor,
    Owner,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Viewer => "viewer",
            Role::Commenter => "commenter",
            Role::Editor => "editor",
            Role::Owner => "owner",
        }
    }
}

/// Entity kinds that carry grants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum EntityKind {
    Tracker,
    Template,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Tracker => "tracker",
            EntityKind::Template => "template",
        }
    }
}

/// Grant subject kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum SubjectType {
    User,
    Group,
}

/// Contexts an observation link can be scoped to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ContextType {
    GuardrailsProject,
    Team,
    Household,
}

/// Entry granularity. Daily permits one entry per (tracker, owner, date);
/// the others permit many.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Granularity {
    Daily,
    Session,
    Event,
    Range,
}

/// Template scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum TemplateScope {
    User,
    Global,
}

/// Reminder kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ReminderKind {
    EntryPrompt,
    Reflection,
}

/// A principal known to the system
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Profile {
    pub id: String,
    pub display_name: String,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
}

/// A subject group for grants
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Group {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Structure-only tracker definition. Never holds data.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Template {
    pub id: String,
    /// None for global templates, which are ownerless
    pub owner_id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub scope: TemplateScope,
    pub locked: bool,
    /// JSON-encoded ordered list of field definitions
    pub field_schema_json: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub archived_at: Option<DateTime<Utc>>,
}

impl Template {
    pub fn field_schema(&self) -> Result<Vec<FieldDef>> {
        Ok(serde_json::from_str(&self.field_schema_json)?)
    }
}

/// A live tracker instance with an immutable schema snapshot
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Tracker {
    pub id: String,
    pub owner_id: String,
    pub template_id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    /// JSON-encoded schema snapshot, frozen at creation time
    pub field_schema_json: String,
    pub granularity: Granularity,
    pub display_order: i64,
    pub chart_config_json: Option<String>,
    pub icon: Option<String>,
    pub color: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub archived_at: Option<DateTime<Utc>>,
}

impl Tracker {
    pub fn schema_snapshot(&self) -> Result<Vec<FieldDef>> {
        Ok(serde_json::from_str(&self.field_schema_json)?)
    }

    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }
}

/// One data record for a tracker
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TrackerEntry {
    pub id: String,
    pub tracker_id: String,
    pub owner_id: String,
    pub entry_date: NaiveDate,
    pub granularity: Granularity,
    /// JSON-encoded field-id → value map
    pub values_json: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TrackerEntry {
    pub fn values(&self) -> Result<serde_json::Map<String, Value>> {
        Ok(serde_json::from_str(&self.values_json)?)
    }
}

/// An explicit, revocable share of a role to a user or group
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Grant {
    pub id: String,
    pub entity_type: EntityKind,
    pub entity_id: String,
    pub subject_type: SubjectType,
    pub subject_id: String,
    pub role: Role,
    pub granted_by: String,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

/// A consent-based, context-scoped, read-only access link
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ObservationLink {
    pub id: String,
    pub tracker_id: String,
    pub observer_user_id: String,
    pub context_type: ContextType,
    pub context_id: String,
    pub granted_by: String,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

/// A reminder attached to a tracker
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TrackerReminder {
    pub id: String,
    pub tracker_id: String,
    pub owner_id: String,
    pub kind: ReminderKind,
    /// JSON-encoded list of scheduled weekdays, 0 = Monday … 6 = Sunday
    pub days_of_week_json: String,
    /// Scheduled time of day, "HH:MM"
    pub time_of_day: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TrackerReminder {
    pub fn days_of_week(&self) -> Result<Vec<u8>> {
        Ok(serde_json::from_str(&self.days_of_week_json)?)
    }

    pub fn scheduled_time(&self) -> Option<NaiveTime> {
        NaiveTime::parse_from_str(&self.time_of_day, "%H:%M").ok()
    }
}

/// Record of a fired reminder, used by the batch job's per-day cap
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ReminderFiring {
    pub id: String,
    pub reminder_id: String,
    pub owner_id: String,
    pub fired_on: NaiveDate,
    pub fired_at: DateTime<Utc>,
}

/// A template share link. The token itself is never stored, only its hash.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ShareLink {
    pub id: String,
    pub template_id: String,
    pub token_hash: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub max_uses: Option<i64>,
    pub use_count: i64,
    pub revoked_at: Option<DateTime<Utc>>,
}

/// A life-state annotation anchored to a tracker or date range.
/// Never gates permissions.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ContextEvent {
    pub id: String,
    pub owner_id: String,
    pub tracker_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub starts_on: NaiveDate,
    pub ends_on: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A user-authored reflection note over a tracker date range
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Interpretation {
    pub id: String,
    pub owner_id: String,
    pub tracker_id: String,
    pub body: String,
    pub starts_on: NaiveDate,
    pub ends_on: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Create tracker request (repository-level)
#[derive(Debug, Clone)]
pub struct NewTracker {
    pub owner_id: String,
    pub template_id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub field_schema_json: String,
    pub granularity: Granularity,
    pub icon: Option<String>,
    pub color: Option<String>,
}

/// Update tracker request. None fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateTrackerRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub chart_config_json: Option<String>,
    pub icon: Option<String>,
    pub color: Option<String>,
}

/// Create template request (repository-level)
#[derive(Debug, Clone)]
pub struct NewTemplate {
    pub owner_id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub scope: TemplateScope,
    pub locked: bool,
    pub field_schema_json: String,
}

/// Create reminder request (repository-level)
#[derive(Debug, Clone)]
pub struct NewReminder {
    pub tracker_id: String,
    pub owner_id: String,
    pub kind: ReminderKind,
    pub days_of_week: Vec<u8>,
    pub time_of_day: String,
}
