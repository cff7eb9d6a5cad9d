//! Template sharing service
//!
//! Share links carry an opaque token handed out exactly once at creation;
//! only its SHA-256 hash is stored. Validity is checked in a fixed order
//! (revoked, then expired, then use limit), and redeeming a link always
//! creates an owned copy of the template, never a reference.

use crate::config::SHARE_TOKEN_BYTES;
use crate::database::{
    EntityKind, NewTemplate, Repository, ShareLink, Template, TemplateScope,
};
use crate::error::{AppError, Result};
use crate::services::permissions::PermissionsService;
use crate::services::templates::resolve_duplicate_name;
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// A freshly created share link together with its cleartext token.
/// The token is not recoverable afterwards.
#[derive(Debug, Clone)]
pub struct IssuedShareLink {
    pub link: ShareLink,
    pub token: String,
}

/// Service for issuing and redeeming template share links
#[derive(Clone)]
pub struct SharingService {
    repo: Repository,
    permissions: PermissionsService,
}

impl SharingService {
    pub fn new(repo: Repository, permissions: PermissionsService) -> Self {
        Self { repo, permissions }
    }

    /// Issue a share link for a template. Owner-only.
    pub async fn create_share_link(
        &self,
        acting: &str,
        template_id: &str,
        expires_at: Option<DateTime<Utc>>,
        max_uses: Option<i64>,
    ) -> Result<IssuedShareLink> {
        let resolved = self
            .permissions
            .resolve(EntityKind::Template, template_id, acting, None)
            .await?;

        if !resolved.can_manage {
            return Err(AppError::Permission(format!(
                "only the owner may share template {}",
                template_id
            )));
        }

        let token = generate_token();
        let token_hash = hash_token(&token);

        let link = self
            .repo
            .create_share_link(template_id, &token_hash, acting, expires_at, max_uses)
            .await?;

        tracing::info!("Issued share link {} for template {}", link.id, template_id);

        Ok(IssuedShareLink { link, token })
    }

    /// Revoke a share link. Requires management rights on its template.
    pub async fn revoke_share_link(&self, acting: &str, link_id: &str) -> Result<()> {
        let link = self
            .repo
            .get_share_link(link_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("share link {}", link_id)))?;

        let resolved = self
            .permissions
            .resolve(EntityKind::Template, &link.template_id, acting, None)
            .await?;

        if !resolved.can_manage {
            return Err(AppError::Permission(format!(
                "only the owner may revoke sharing on template {}",
                link.template_id
            )));
        }

        self.repo.revoke_share_link(link_id).await
    }

    /// Redeem a share token, importing the template as a fresh copy
    /// owned by the acting principal.
    ///
    /// Validity order: not revoked, then not expired, then under the use
    /// limit. The use-count increment is optimistic; losing the race is a
    /// conflict the caller may retry.
    pub async fn import_template(&self, acting: &str, token: &str) -> Result<Template> {
        let token_hash = hash_token(token);

        let link = self
            .repo
            .find_share_link_by_hash(&token_hash)
            .await?
            .ok_or_else(|| AppError::NotFound("share link".to_string()))?;

        if link.revoked_at.is_some() {
            return Err(AppError::Permission("share link has been revoked".to_string()));
        }
        if let Some(expires_at) = link.expires_at {
            if Utc::now() >= expires_at {
                return Err(AppError::Permission("share link has expired".to_string()));
            }
        }
        if let Some(max_uses) = link.max_uses {
            if link.use_count >= max_uses {
                return Err(AppError::Permission(
                    "share link has reached its use limit".to_string(),
                ));
            }
        }

        let source = self
            .repo
            .get_template(&link.template_id)
            .await?
            .filter(|t| t.archived_at.is_none())
            .ok_or_else(|| {
                AppError::NotFound(format!("template {} is no longer available", link.template_id))
            })?;

        // Claim a use before copying; a lost race means someone else
        // consumed the count we read.
        if !self
            .repo
            .increment_share_link_uses(&link.id, link.use_count)
            .await?
        {
            return Err(AppError::Conflict(
                "share link was redeemed concurrently; retry".to_string(),
            ));
        }

        let name = resolve_duplicate_name(&self.repo, acting, &source.name).await?;

        tracing::info!(
            "Importing template {} as \"{}\" for {} via share link {}",
            source.id,
            name,
            acting,
            link.id
        );

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
}

fn generate_token() -> String {
    let mut bytes = vec![0u8; SHARE_TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}
