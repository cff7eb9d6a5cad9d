//! Permission resolution engine
//!
//! Combines ownership, sharing grants, consent-based observation links,
//! and archival state into a single access decision per
//! (entity, principal, optional context) tuple. Every mutating service
//! resolves through here before touching the database; nothing about
//! permissions is cached between calls.

use crate::database::{
    ContextType, EntityKind, Grant, ObservationLink, Repository, Role, SubjectType,
};
use crate::error::{AppError, Result};
use crate::fields::ValidationError;
use serde::{Deserialize, Serialize};

/// Where an access decision came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessSource {
    Ownership,
    Grant,
    Observation,
}

/// The role a principal effectively holds on an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessRole {
    Owner,
    Editor,
    Commenter,
    Viewer,
    Observer,
}

impl From<Role> for AccessRole {
    fn from(role: Role) -> Self {
        match role {
            Role::Owner => AccessRole::Owner,
            Role::Editor => AccessRole::Editor,
            Role::Commenter => AccessRole::Commenter,
            Role::Viewer => AccessRole::Viewer,
        }
    }
}

/// One resolved access decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Permissions {
    pub can_view: bool,
    pub can_edit: bool,
    pub can_manage: bool,
    pub is_owner: bool,
    pub role: Option<AccessRole>,
    pub access_source: Option<AccessSource>,
}

impl Permissions {
    /// No access at all
    pub fn none() -> Self {
        Self {
            can_view: false,
            can_edit: false,
            can_manage: false,
            is_owner: false,
            role: None,
            access_source: None,
        }
    }

    /// Full rights for the owner of a live entity
    pub fn owner() -> Self {
        Self {
            can_view: true,
            can_edit: true,
            can_manage: true,
            is_owner: true,
            role: Some(AccessRole::Owner),
            access_source: Some(AccessSource::Ownership),
        }
    }

    /// The owner of an archived entity keeps read access and the ability
    /// to manage (e.g. sharing), but may no longer edit.
    pub fn archived_owner() -> Self {
        Self {
            can_view: true,
            can_edit: false,
            can_manage: true,
            is_owner: true,
            role: Some(AccessRole::Owner),
            access_source: Some(AccessSource::Ownership),
        }
    }

    /// Rights conferred by the strongest active grant. Grants never
    /// confer management; commenter and viewer are view-only for trackers.
    pub fn from_grant(role: Role) -> Self {
        Self {
            can_view: true,
            can_edit: role >= Role::Editor,
            can_manage: false,
            is_owner: false,
            role: Some(role.into()),
            access_source: Some(AccessSource::Grant),
        }
    }

    /// Read-only rights from a context-scoped observation link
    pub fn observer() -> Self {
        Self {
            can_view: true,
            can_edit: false,
            can_manage: false,
            is_owner: false,
            role: Some(AccessRole::Observer),
            access_source: Some(AccessSource::Observation),
        }
    }
}

/// The context an observation-aware call arrived through
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservationContext {
    pub context_type: ContextType,
    pub context_id: String,
}

/// Outcome of the ceiling-clamped resolver for project-scoped entities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScopedResolution {
    pub role: Option<Role>,
    /// True when a candidate role exceeded the project ceiling and was
    /// clamped down. Surfaced for audit/debugging.
    pub clamped: bool,
}

/// Ceiling-clamped role resolution for project-scoped entities.
///
/// Project membership is both the gate (no project role means no entity
/// access) and the ceiling: the maximum of project role, creator rights,
/// and entity grants is clamped back down to the project role.
pub fn resolve_scoped_role(
    project_role: Option<Role>,
    creator_role: Option<Role>,
    grant_roles: &[Role],
) -> ScopedResolution {
    let ceiling = match project_role {
        Some(role) => role,
        None => {
            return ScopedResolution {
                role: None,
                clamped: false,
            }
        }
    };

    let mut candidate = ceiling;
    if let Some(creator) = creator_role {
        candidate = candidate.max(creator);
    }
    if let Some(best_grant) = grant_roles.iter().copied().max() {
        candidate = candidate.max(best_grant);
    }

    ScopedResolution {
        role: Some(candidate.min(ceiling)),
        clamped: candidate > ceiling,
    }
}

/// Service resolving access decisions and managing grants and
/// observation links
#[derive(Clone)]
pub struct PermissionsService {
    repo: Repository,
}

impl PermissionsService {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    /// Resolve the acting principal's permissions on an entity.
    ///
    /// Resolution order, first match wins:
    /// 1. archival gate, 2. ownership, 3. direct/group grants,
    /// 4. observation link (only when a context was supplied), 5. deny.
    pub async fn resolve(
        &self,
        kind: EntityKind,
        entity_id: &str,
        principal: &str,
        context: Option<&ObservationContext>,
    ) -> Result<Permissions> {
        // Unknown entity resolves to no access, not an error
        let (owner_id, archived) = match self.repo.get_entity_state(kind, entity_id).await? {
            Some(state) => state,
            None => return Ok(Permissions::none()),
        };

        let is_owner = owner_id.as_deref() == Some(principal);

        if archived {
            return Ok(if is_owner {
                Permissions::archived_owner()
            } else {
                Permissions::none()
            });
        }

        if is_owner {
            return Ok(Permissions::owner());
        }

        let group_ids = self.repo.resolve_groups_for(principal).await?;
        let grants = self
            .repo
            .list_active_grants(kind, entity_id, principal, &group_ids)
            .await?;

        if let Some(role) = grants.iter().map(|g| g.role).max() {
            return Ok(Permissions::from_grant(role));
        }

        if kind == EntityKind::Tracker {
            if let Some(ctx) = context {
                let link = self
                    .repo
                    .find_active_observation_link(
                        entity_id,
                        principal,
                        ctx.context_type,
                        &ctx.context_id,
                    )
                    .await?;
                if link.is_some() {
                    return Ok(Permissions::observer());
                }
            }
        }

        Ok(Permissions::none())
    }

    /// Ceiling-clamped resolution for an entity that lives inside a
    /// project. The creator defaults to editor rights unless revoked.
    pub async fn resolve_scoped(
        &self,
        project_id: &str,
        entity_kind: EntityKind,
        entity_id: &str,
        creator_id: Option<&str>,
        creator_rights_revoked: bool,
        principal: &str,
    ) -> Result<ScopedResolution> {
        let project_role = self.repo.project_role(project_id, principal).await?;

        let creator_role = match creator_id {
            Some(creator) if creator == principal && !creator_rights_revoked => Some(Role::Editor),
            _ => None,
        };

        let group_ids = self.repo.resolve_groups_for(principal).await?;
        let grants = self
            .repo
            .list_active_grants(entity_kind, entity_id, principal, &group_ids)
            .await?;
        let grant_roles: Vec<Role> = grants.iter().map(|g| g.role).collect();

        Ok(resolve_scoped_role(project_role, creator_role, &grant_roles))
    }

    /// Share an entity with a user or group. Only the owner may manage
    /// sharing; the check runs fresh on every call.
    pub async fn create_grant(
        &self,
        kind: EntityKind,
        entity_id: &str,
        subject_type: SubjectType,
        subject_id: &str,
        role: Role,
        acting: &str,
    ) -> Result<Grant> {
        let permissions = self.resolve(kind, entity_id, acting, None).await?;
        if !permissions.can_manage {
            return Err(AppError::Permission(format!(
                "only the owner may share {} {}",
                kind.as_str(),
                entity_id
            )));
        }

        tracing::info!(
            "Granting {} on {} {} to {} {}",
            role.as_str(),
            kind.as_str(),
            entity_id,
            match subject_type {
                SubjectType::User => "user",
                SubjectType::Group => "group",
            },
            subject_id
        );

        self.repo
            .create_grant(kind, entity_id, subject_type, subject_id, role, acting)
            .await
    }

    /// Revoke a grant. Owner-only, checked against the grant's entity.
    pub async fn revoke_grant(&self, grant_id: &str, acting: &str) -> Result<()> {
        let grant = self
            .repo
            .get_grant(grant_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("grant {}", grant_id)))?;

        let permissions = self
            .resolve(grant.entity_type, &grant.entity_id, acting, None)
            .await?;
        if !permissions.can_manage {
            return Err(AppError::Permission(format!(
                "only the owner may revoke sharing on {} {}",
                grant.entity_type.as_str(),
                grant.entity_id
            )));
        }

        self.repo.revoke_grant(grant_id).await
    }

    /// Create (or restore) a consent-based observation link.
    ///
    /// Owner-only. Self-observation is rejected here, at creation time.
    /// Re-granting a revoked (tracker, observer, context) tuple restores
    /// the existing row rather than inserting a duplicate.
    pub async fn create_observation_link(
        &self,
        tracker_id: &str,
        observer_user_id: &str,
        context: &ObservationContext,
        acting: &str,
    ) -> Result<ObservationLink> {
        let tracker = self
            .repo
            .get_tracker(tracker_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("tracker {}", tracker_id)))?;

        if tracker.owner_id != acting {
            return Err(AppError::Permission(format!(
                "only the owner may manage observation links on tracker {}",
                tracker_id
            )));
        }

        if observer_user_id == tracker.owner_id {
            return Err(ValidationError::single(
                "observer_user_id",
                None,
                "the owner cannot observe their own tracker",
            )
            .into());
        }

        if let Some(existing) = self
            .repo
            .find_observation_link(
                tracker_id,
                observer_user_id,
                context.context_type,
                &context.context_id,
            )
            .await?
        {
            if existing.revoked_at.is_some() {
                tracing::info!("Restoring revoked observation link: {}", existing.id);
                self.repo
                    .set_observation_link_revoked(&existing.id, false)
                    .await?;
            }
            return self
                .repo
                .find_observation_link(
                    tracker_id,
                    observer_user_id,
                    context.context_type,
                    &context.context_id,
                )
                .await?
                .ok_or_else(|| AppError::NotFound(format!("observation link on {}", tracker_id)));
        }

        self.repo
            .create_observation_link(
                tracker_id,
                observer_user_id,
                context.context_type,
                &context.context_id,
                acting,
            )
            .await
    }

    /// Revoke an observation link. Owner-only.
    pub async fn revoke_observation_link(
        &self,
        tracker_id: &str,
        observer_user_id: &str,
        context: &ObservationContext,
        acting: &str,
    ) -> Result<()> {
        let tracker = self
            .repo
            .get_tracker(tracker_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("tracker {}", tracker_id)))?;

        if tracker.owner_id != acting {
            return Err(AppError::Permission(format!(
                "only the owner may manage observation links on tracker {}",
                tracker_id
            )));
        }

        let link = self
            .repo
            .find_active_observation_link(
                tracker_id,
                observer_user_id,
                context.context_type,
                &context.context_id,
            )
            .await?
            .ok_or_else(|| AppError::NotFound(format!("observation link on {}", tracker_id)))?;

        self.repo.set_observation_link_revoked(&link.id, true).await
    }
}
