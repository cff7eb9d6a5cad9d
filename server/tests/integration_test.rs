//! Integration tests for the Tracker Studio backend
//!
//! These tests verify end-to-end functionality including:
//! - Template → tracker → entry lifecycle
//! - Permission resolution across sharing and observation paths
//! - Share-link import workflows

use chrono::NaiveDate;
use serde_json::json;
use sqlx::SqlitePool;
use tempfile::TempDir;
use tracker_studio::app::Studio;
use tracker_studio::database::{create_pool, ContextType, EntityKind, Granularity, Role, SubjectType};
use tracker_studio::error::AppError;
use tracker_studio::fields::{FieldDef, FieldType};
use tracker_studio::services::ObservationContext;

/// Helper to create a test database with schema
async fn create_test_db() -> (SqlitePool, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");

    let pool = create_pool(&db_path).await.unwrap();

    (pool, temp_dir)
}

async fn create_test_studio() -> (Studio, TempDir) {
    let (pool, temp_dir) = create_test_db().await;
    let studio = Studio::new(pool);

    studio.repo.create_profile("alice", "Alice", false).await.unwrap();
    studio.repo.create_profile("bob", "Bob", false).await.unwrap();
    studio.repo.create_profile("carol", "Carol", false).await.unwrap();

    (studio, temp_dir)
}

fn mood_schema() -> Vec<FieldDef> {
    vec![
        FieldDef {
            id: "mood".to_string(),
            label: "Mood".to_string(),
            field_type: FieldType::Rating,
            required: true,
            rules: None,
            default: None,
        },
        FieldDef {
            id: "note".to_string(),
            label: "Note".to_string(),
            field_type: FieldType::Text,
            required: false,
            rules: None,
            default: None,
        },
    ]
}

fn values(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
    value.as_object().unwrap().clone()
}

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

#[tokio::test]
async fn test_template_tracker_entry_lifecycle() {
    let (studio, _temp) = create_test_studio().await;

    // Template → tracker with schema snapshot
    let template = studio
        .templates
        .create_template("alice", "Daily Mood", None, &mood_schema())
        .await
        .unwrap();

    let tracker = studio
        .trackers
        .create_from_template("alice", &template.id, None, Granularity::Daily, None, None)
        .await
        .unwrap();

    // Entry create, duplicate-conflict, merge-update
    let entry = studio
        .entries
        .create_entry(
            "alice",
            &tracker.id,
            date("2026-08-07"),
            values(json!({"mood": 4, "note": "good day"})),
            None,
            None,
        )
        .await
        .unwrap();

    let err = studio
        .entries
        .create_entry(
            "alice",
            &tracker.id,
            date("2026-08-07"),
            values(json!({"mood": 2})),
            None,
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    let updated = studio
        .entries
        .update_entry("alice", &entry.id, values(json!({"mood": 5})), None, None)
        .await
        .unwrap();
    let stored = updated.values().unwrap();
    assert_eq!(stored.get("mood"), Some(&json!(5)));
    assert_eq!(stored.get("note"), Some(&json!("good day")));

    // Template edits never reach the tracker's snapshot
    let replacement = vec![FieldDef {
        id: "energy".to_string(),
        label: "Energy".to_string(),
        field_type: FieldType::Rating,
        required: false,
        rules: None,
        default: None,
    }];
    studio
        .templates
        .update_template("alice", &template.id, None, None, Some(&replacement))
        .await
        .unwrap();

    let reloaded = studio
        .trackers
        .get_tracker("alice", &tracker.id, None)
        .await
        .unwrap()
        .unwrap();
    let snapshot = reloaded.schema_snapshot().unwrap();
    assert_eq!(snapshot[0].id, "mood");

    // Entries keep validating against the snapshot, not the template
    let err = studio
        .entries
        .create_entry(
            "alice",
            &tracker.id,
            date("2026-08-08"),
            values(json!({"energy": 3})),
            None,
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test]
async fn test_rating_bounds_scenario() {
    let (studio, _temp) = create_test_studio().await;

    let tracker = studio
        .trackers
        .create_tracker(
            "alice",
            "Mood",
            None,
            &[FieldDef {
                id: "mood".to_string(),
                label: "Mood".to_string(),
                field_type: FieldType::Rating,
                required: false,
                rules: None,
                default: None,
            }],
            Granularity::Daily,
            None,
            None,
        )
        .await
        .unwrap();

    // Rating 6 fails without any explicit min/max rule; 3 succeeds
    let err = studio
        .entries
        .create_entry("alice", &tracker.id, date("2026-08-07"), values(json!({"mood": 6})), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    studio
        .entries
        .create_entry("alice", &tracker.id, date("2026-08-07"), values(json!({"mood": 3})), None, None)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_viewer_grant_scenario() {
    let (studio, _temp) = create_test_studio().await;

    let tracker = studio
        .trackers
        .create_tracker("alice", "Mood", None, &mood_schema(), Granularity::Daily, None, None)
        .await
        .unwrap();

    studio
        .permissions
        .create_grant(
            EntityKind::Tracker,
            &tracker.id,
            SubjectType::User,
            "bob",
            Role::Viewer,
            "alice",
        )
        .await
        .unwrap();

    studio
        .entries
        .create_entry("alice", &tracker.id, date("2026-08-07"), values(json!({"mood": 4})), None, None)
        .await
        .unwrap();

    // Viewer can list but not create
    let listed = studio
        .entries
        .list_entries("bob", &tracker.id, None, None, None)
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);

    let err = studio
        .entries
        .create_entry("bob", &tracker.id, date("2026-08-08"), values(json!({"mood": 4})), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Permission(_)));
}

#[tokio::test]
async fn test_observation_context_scenario() {
    let (studio, _temp) = create_test_studio().await;

    let tracker = studio
        .trackers
        .create_tracker("alice", "Mood", None, &mood_schema(), Granularity::Daily, None, None)
        .await
        .unwrap();

    let context = ObservationContext {
        context_type: ContextType::GuardrailsProject,
        context_id: "project-1".to_string(),
    };
    studio
        .permissions
        .create_observation_link(&tracker.id, "carol", &context, "alice")
        .await
        .unwrap();

    studio
        .entries
        .create_entry("alice", &tracker.id, date("2026-08-07"), values(json!({"mood": 4})), None, None)
        .await
        .unwrap();

    // Without the context: indistinguishable from nonexistence
    assert!(studio
        .trackers
        .get_tracker("carol", &tracker.id, None)
        .await
        .unwrap()
        .is_none());
    assert!(studio
        .entries
        .list_entries("carol", &tracker.id, None, None, None)
        .await
        .unwrap()
        .is_empty());

    // With the context: read-only
    assert!(studio
        .trackers
        .get_tracker("carol", &tracker.id, Some(&context))
        .await
        .unwrap()
        .is_some());
    assert_eq!(
        studio
            .entries
            .list_entries("carol", &tracker.id, None, None, Some(&context))
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn test_archival_lockout_end_to_end() {
    let (studio, _temp) = create_test_studio().await;

    let tracker = studio
        .trackers
        .create_tracker("alice", "Mood", None, &mood_schema(), Granularity::Daily, None, None)
        .await
        .unwrap();

    studio
        .permissions
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

    studio.trackers.archive_tracker("alice", &tracker.id).await.unwrap();

    // Non-owners lose all access, including formerly granted editors
    assert!(studio
        .trackers
        .get_tracker("bob", &tracker.id, None)
        .await
        .unwrap()
        .is_none());

    // The owner keeps read access but cannot write
    assert!(studio
        .trackers
        .get_tracker("alice", &tracker.id, None)
        .await
        .unwrap()
        .is_some());
    let err = studio
        .entries
        .create_entry("alice", &tracker.id, date("2026-08-07"), values(json!({"mood": 3})), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Permission(_)));
}

#[tokio::test]
async fn test_share_link_import_workflow() {
    let (studio, _temp) = create_test_studio().await;

    let template = studio
        .templates
        .create_template("alice", "Sleep Tracker", None, &mood_schema())
        .await
        .unwrap();

    // Bob already owns a template with the same name
    studio
        .templates
        .create_template("bob", "Sleep Tracker", None, &mood_schema())
        .await
        .unwrap();

    let issued = studio
        .sharing
        .create_share_link("alice", &template.id, None, Some(5))
        .await
        .unwrap();

    let imported = studio.sharing.import_template("bob", &issued.token).await.unwrap();
    assert_eq!(imported.name, "Sleep Tracker (1)");
    assert_eq!(imported.owner_id.as_deref(), Some("bob"));

    // The imported copy is fully independent: bob builds a tracker on it
    let tracker = studio
        .trackers
        .create_from_template("bob", &imported.id, None, Granularity::Daily, None, None)
        .await
        .unwrap();
    assert_eq!(tracker.owner_id, "bob");
}

#[tokio::test]
async fn test_insights_invalidate_on_write() {
    let (studio, _temp) = create_test_studio().await;

    let tracker = studio
        .trackers
        .create_tracker("alice", "Mood", None, &mood_schema(), Granularity::Daily, None, None)
        .await
        .unwrap();

    studio
        .entries
        .create_entry("alice", &tracker.id, date("2026-08-01"), values(json!({"mood": 2})), None, None)
        .await
        .unwrap();

    let ids = vec![tracker.id.clone()];
    let before = studio.insights.tracker_insights("alice", &ids, None).await.unwrap();
    assert_eq!(before[0].entry_count, 1);
    assert_eq!(before[0].field_summaries[0].mean, 2.0);

    // A write must invalidate the cached result immediately
    studio
        .entries
        .create_entry("alice", &tracker.id, date("2026-08-02"), values(json!({"mood": 4})), None, None)
        .await
        .unwrap();

    let after = studio.insights.tracker_insights("alice", &ids, None).await.unwrap();
    assert_eq!(after[0].entry_count, 2);
    assert_eq!(after[0].field_summaries[0].mean, 3.0);
    assert_eq!(after[0].first_entry, Some(date("2026-08-01")));
    assert_eq!(after[0].last_entry, Some(date("2026-08-02")));
}

#[tokio::test]
async fn test_insights_omit_invisible_trackers() {
    let (studio, _temp) = create_test_studio().await;

    let mine = studio
        .trackers
        .create_tracker("alice", "Mine", None, &mood_schema(), Granularity::Daily, None, None)
        .await
        .unwrap();
    let theirs = studio
        .trackers
        .create_tracker("bob", "Theirs", None, &mood_schema(), Granularity::Daily, None, None)
        .await
        .unwrap();

    let insights = studio
        .insights
        .tracker_insights("alice", &[mine.id.clone(), theirs.id.clone()], None)
        .await
        .unwrap();

    assert_eq!(insights.len(), 1);
    assert_eq!(insights[0].tracker_id, mine.id);
}

#[tokio::test]
async fn test_revoked_grant_stops_resolving() {
    let (studio, _temp) = create_test_studio().await;

    let tracker = studio
        .trackers
        .create_tracker("alice", "Mood", None, &mood_schema(), Granularity::Daily, None, None)
        .await
        .unwrap();

    let grant = studio
        .permissions
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

    assert!(studio
        .trackers
        .get_tracker("bob", &tracker.id, None)
        .await
        .unwrap()
        .is_some());

    studio.permissions.revoke_grant(&grant.id, "alice").await.unwrap();

    assert!(studio
        .trackers
        .get_tracker("bob", &tracker.id, None)
        .await
        .unwrap()
        .is_none());
}
