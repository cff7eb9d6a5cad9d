//! Templates service
//!
//! Template lifecycle: creation, scope and lock rules, promotion to
//! global scope, duplication with name-conflict resolution, archival.
//! Templates are structure-only; they never hold data.

use crate::config::{MAX_DUPLICATE_NAME_ATTEMPTS, MAX_NAME_LENGTH};
use crate::database::{EntityKind, NewTemplate, Repository, Template, TemplateScope};
use crate::error::{AppError, Result};
use crate::fields::{validate_field_schema, FieldDef, ValidationError};
use crate::services::permissions::PermissionsService;
use chrono::Utc;

/// Service for managing templates
#[derive(Clone)]
pub struct TemplatesService {
    repo: Repository,
    permissions: PermissionsService,
}

impl TemplatesService {
    pub fn new(repo: Repository, permissions: PermissionsService) -> Self {
        Self { repo, permissions }
    }

    /// Create a user-scoped template
    pub async fn create_template(
        &self,
        acting: &str,
        name: &str,
        description: Option<&str>,
        fields: &[FieldDef],
    ) -> Result<Template> {
        validate_name(name)?;
        validate_field_schema(fields)?;

        tracing::info!("Creating template \"{}\" for {}", name, acting);

        self.repo
            .create_template(NewTemplate {
                owner_id: Some(acting.to_string()),
                name: name.to_string(),
                description: description.map(|d| d.to_string()),
                scope: TemplateScope::User,
                locked: false,
                field_schema_json: serde_json::to_string(fields)?,
            })
            .await
    }

    /// Get a template the principal may see, or None.
    ///
    /// Global templates are ownerless and browsable by everyone while
    /// active; user templates require ownership or a grant.
    pub async fn get_template(&self, acting: &str, id: &str) -> Result<Option<Template>> {
        let template = match self.repo.get_template(id).await? {
            Some(template) => template,
            None => return Ok(None),
        };

        if template.scope == TemplateScope::Global {
            return Ok((template.archived_at.is_none()).then_some(template));
        }

        let permissions = self
            .permissions
            .resolve(EntityKind::Template, id, acting, None)
            .await?;

        Ok(permissions.can_view.then_some(template))
    }

    /// List active templates visible to the principal
    pub async fn list_templates(&self, acting: &str) -> Result<Vec<Template>> {
        self.repo.list_templates_for(acting).await
    }

    /// Update a template's name, description, or field schema.
    ///
    /// Global templates are admin-only. Locked user templates reject
    /// mutation until unlocked by their owner.
    pub async fn update_template(
        &self,
        acting: &str,
        id: &str,
        name: Option<&str>,
        description: Option<&str>,
        fields: Option<&[FieldDef]>,
    ) -> Result<Template> {
        let template = self
            .repo
            .get_template(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("template {}", id)))?;

        self.check_mutable(acting, &template).await?;

        if let Some(name) = name {
            validate_name(name)?;
        }
        let schema_json = match fields {
            Some(fields) => {
                validate_field_schema(fields)?;
                Some(serde_json::to_string(fields)?)
            }
            None => None,
        };

        tracing::debug!("Updating template: {}", id);
        self.repo
            .update_template_meta(id, name, description, schema_json.as_deref())
            .await
    }

    /// Lock or unlock a user template. Owner-only; global templates are
    /// permanently locked.
    pub async fn set_locked(&self, acting: &str, id: &str, locked: bool) -> Result<Template> {
        let template = self
            .repo
            .get_template(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("template {}", id)))?;

        if template.scope == TemplateScope::Global {
            return Err(AppError::Permission(
                "global templates are always locked".to_string(),
            ));
        }
        if template.owner_id.as_deref() != Some(acting) {
            return Err(AppError::Permission(format!(
                "only the owner may lock or unlock template {}",
                id
            )));
        }

        self.repo.set_template_locked(id, locked).await?;
        self.repo
            .get_template(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("template {}", id)))
    }

    /// Soft-archive a template. It stays referenced by existing trackers.
    pub async fn archive_template(&self, acting: &str, id: &str) -> Result<()> {
        let template = self
            .repo
            .get_template(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("template {}", id)))?;

        if template.scope == TemplateScope::Global {
            if !self.repo.is_admin(acting).await? {
                return Err(AppError::Permission(
                    "only an admin may archive a global template".to_string(),
                ));
            }
        } else if template.owner_id.as_deref() != Some(acting) {
            return Err(AppError::Permission(format!(
                "only the owner may archive template {}",
                id
            )));
        }

        tracing::info!("Archiving template: {}", id);
        self.repo.archive_template(id).await
    }

    /// Promote a user template to global scope. Admin-only and
    /// one-directional: the template is force-locked and its owner cleared.
    pub async fn promote_template(&self, acting: &str, id: &str) -> Result<Template> {
        if !self.repo.is_admin(acting).await? {
            return Err(AppError::Permission(
                "only an admin may promote a template to global scope".to_string(),
            ));
        }

        let template = self
            .repo
            .get_template(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("template {}", id)))?;

        if template.scope == TemplateScope::Global {
            return Err(AppError::Conflict(format!("template {} is already global", id)));
        }
        if template.archived_at.is_some() {
            return Err(AppError::Conflict(format!("template {} is archived", id)));
        }

        tracing::info!("Promoting template {} to global scope", id);
        self.repo.promote_template(id).await
    }

    /// Duplicate a template the principal can see into a fresh
    /// user-scoped, unlocked copy owned by them.
    pub async fn duplicate_template(&self, acting: &str, id: &str) -> Result<Template> {
        let source = self
            .get_template(acting, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("template {}", id)))?;

        let name = resolve_duplicate_name(&self.repo, acting, &source.name).await?;

        tracing::info!("Duplicating template {} as \"{}\" for {}", id, name, acting);

        self.repo
            .create_template(NewTemplate {
                owner_id: Some(acting.to_string()),
                name,
                description: source.description.clone(),
                scope: TemplateScope::User,
                locked: false,
                field_schema_json: source.field_schema_json.clone(),
            })
            .await
    }

    async fn check_mutable(&self, acting: &str, template: &Template) -> Result<()> {
        if template.archived_at.is_some() {
            return Err(AppError::Conflict(format!(
                "template {} is archived and read-only",
                template.id
            )));
        }

        if template.scope == TemplateScope::Global {
            if self.repo.is_admin(acting).await? {
                return Ok(());
            }
            return Err(AppError::Permission(
                "global templates may only be changed by an admin".to_string(),
            ));
        }

        if template.owner_id.as_deref() != Some(acting) {
            return Err(AppError::Permission(format!(
                "only the owner may change template {}",
                template.id
            )));
        }
        if template.locked {
            return Err(AppError::Permission(format!(
                "template {} is locked",
                template.id
            )));
        }

        Ok(())
    }
}

/// Resolve a name conflict for a newly owned template copy: the base
/// name, then "Name (1)" … "Name (99)", then a timestamp suffix.
pub(crate) async fn resolve_duplicate_name(
    repo: &Repository,
    owner_id: &str,
    base: &str,
) -> Result<String> {
    if !repo.template_name_taken(owner_id, base).await? {
        return Ok(base.to_string());
    }

    for attempt in 1..=MAX_DUPLICATE_NAME_ATTEMPTS {
        let candidate = format!("{} ({})", base, attempt);
        if !repo.template_name_taken(owner_id, &candidate).await? {
            return Ok(candidate);
        }
    }

    Ok(format!("{} ({})", base, Utc::now().format("%Y%m%d%H%M%S")))
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::initialize_database;
    use crate::fields::FieldType;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn create_test_service() -> (TemplatesService, Repository) {
        let pool = SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap();

        initialize_database(&pool).await.unwrap();

        let repo = Repository::new(pool);
        let permissions = PermissionsService::new(repo.clone());
        (TemplatesService::new(repo.clone(), permissions), repo)
    }

    fn mood_schema() -> Vec<FieldDef> {
        vec![FieldDef {
            id: "mood".to_string(),
            label: "Mood".to_string(),
            field_type: FieldType::Rating,
            required: false,
            rules: None,
            default: None,
        }]
    }

    #[tokio::test]
    async fn test_create_and_get_template() {
        let (service, repo) = create_test_service().await;
        repo.create_profile("alice", "Alice", false).await.unwrap();

        let template = service
            .create_template("alice", "Sleep Tracker", None, &mood_schema())
            .await
            .unwrap();

        assert_eq!(template.scope, TemplateScope::User);
        assert!(!template.locked);

        let fetched = service.get_template("alice", &template.id).await.unwrap();
        assert!(fetched.is_some());

        // Another user's private template is invisible
        repo.create_profile("bob", "Bob", false).await.unwrap();
        let hidden = service.get_template("bob", &template.id).await.unwrap();
        assert!(hidden.is_none());
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_schema() {
        let (service, repo) = create_test_service().await;
        repo.create_profile("alice", "Alice", false).await.unwrap();

        let err = service
            .create_template("alice", "Broken", None, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_locked_template_rejects_update() {
        let (service, repo) = create_test_service().await;
        repo.create_profile("alice", "Alice", false).await.unwrap();

        let template = service
            .create_template("alice", "Sleep", None, &mood_schema())
            .await
            .unwrap();
        service.set_locked("alice", &template.id, true).await.unwrap();

        let err = service
            .update_template("alice", &template.id, Some("New Name"), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Permission(_)));

        service.set_locked("alice", &template.id, false).await.unwrap();
        let updated = service
            .update_template("alice", &template.id, Some("New Name"), None, None)
            .await
            .unwrap();
        assert_eq!(updated.name, "New Name");
    }

    #[tokio::test]
    async fn test_promotion_is_admin_only_and_clears_owner() {
        let (service, repo) = create_test_service().await;
        repo.create_profile("alice", "Alice", false).await.unwrap();
        repo.create_profile("root", "Root", true).await.unwrap();

        let template = service
            .create_template("alice", "Habits", None, &mood_schema())
            .await
            .unwrap();

        let err = service
            .promote_template("alice", &template.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Permission(_)));

        let promoted = service.promote_template("root", &template.id).await.unwrap();
        assert_eq!(promoted.scope, TemplateScope::Global);
        assert!(promoted.locked);
        assert!(promoted.owner_id.is_none());

        // Now everyone can see it, but the former owner can no longer edit it
        repo.create_profile("bob", "Bob", false).await.unwrap();
        assert!(service.get_template("bob", &template.id).await.unwrap().is_some());

        let err = service
            .update_template("alice", &template.id, Some("Mine"), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Permission(_)));
    }

    #[tokio::test]
    async fn test_duplicate_resolves_name_conflicts() {
        let (service, repo) = create_test_service().await;
        repo.create_profile("alice", "Alice", false).await.unwrap();

        let original = service
            .create_template("alice", "Sleep Tracker", None, &mood_schema())
            .await
            .unwrap();

        let copy = service.duplicate_template("alice", &original.id).await.unwrap();
        assert_eq!(copy.name, "Sleep Tracker (1)");
        assert_eq!(copy.scope, TemplateScope::User);
        assert!(!copy.locked);

        let second = service.duplicate_template("alice", &original.id).await.unwrap();
        assert_eq!(second.name, "Sleep Tracker (2)");
    }

    #[tokio::test]
    async fn test_duplicate_of_global_is_owned_and_unlocked() {
        let (service, repo) = create_test_service().await;
        repo.create_profile("alice", "Alice", false).await.unwrap();
        repo.create_profile("root", "Root", true).await.unwrap();

        let template = service
            .create_template("alice", "Water", None, &mood_schema())
            .await
            .unwrap();
        service.promote_template("root", &template.id).await.unwrap();

        repo.create_profile("bob", "Bob", false).await.unwrap();
        let copy = service.duplicate_template("bob", &template.id).await.unwrap();

        assert_eq!(copy.owner_id.as_deref(), Some("bob"));
        assert_eq!(copy.scope, TemplateScope::User);
        assert!(!copy.locked);
    }

    #[tokio::test]
    async fn test_archived_template_is_hidden_and_immutable() {
        let (service, repo) = create_test_service().await;
        repo.create_profile("alice", "Alice", false).await.unwrap();

        let template = service
            .create_template("alice", "Old", None, &mood_schema())
            .await
            .unwrap();
        service.archive_template("alice", &template.id).await.unwrap();

        let listed = service.list_templates("alice").await.unwrap();
        assert!(listed.is_empty());

        let err = service
            .update_template("alice", &template.id, Some("Revived"), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }
}
