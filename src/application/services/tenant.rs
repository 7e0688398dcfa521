use serde_json::{json, Value};
use tracing::instrument;

use crate::domain::clock::delta_seconds;
use crate::domain::ports::Repositories;
use crate::domain::{DomainError, StatusEnum, User, UserTenant, UserTenantRole};

pub const NO_AUTHORIZATION: &str = "No authorization.";

/// Team membership: who belongs to which tenant, and invitations.
pub struct TenantService {
    repos: Repositories,
}

impl TenantService {
    pub fn new(repos: Repositories) -> Self {
        Self { repos }
    }

    pub async fn memberships(&self, user_id: &str) -> Result<Vec<UserTenant>, DomainError> {
        let user = user_id.to_string();
        let mut rows = self
            .repos
            .user_tenants
            .find(&|ut: &UserTenant| ut.user_id == user && ut.status == StatusEnum::Valid)
            .await?;
        rows.sort_by_key(|ut| ut.stamp.create_time);
        Ok(rows)
    }

    pub async fn membership(
        &self,
        user_id: &str,
        tenant_id: &str,
    ) -> Result<Option<UserTenant>, DomainError> {
        Ok(self
            .memberships(user_id)
            .await?
            .into_iter()
            .find(|ut| ut.tenant_id == tenant_id))
    }

    /// Tenants the user works in. Pending invitations do not count.
    pub async fn member_tenant_ids(&self, user_id: &str) -> Result<Vec<String>, DomainError> {
        Ok(self
            .memberships(user_id)
            .await?
            .into_iter()
            .filter(|ut| ut.role.is_member())
            .map(|ut| ut.tenant_id)
            .collect())
    }

    pub async fn is_member(&self, user_id: &str, tenant_id: &str) -> Result<bool, DomainError> {
        Ok(self
            .membership(user_id, tenant_id)
            .await?
            .is_some_and(|ut| ut.role.is_member()))
    }

    /// The user's own tenant when they have one, else the earliest joined.
    pub async fn first_tenant_id(&self, user_id: &str) -> Result<Option<String>, DomainError> {
        let rows = self.memberships(user_id).await?;
        let owned = rows.iter().find(|ut| ut.role == UserTenantRole::Owner);
        Ok(owned.or(rows.first()).map(|ut| ut.tenant_id.clone()))
    }

    fn ensure_owner(user_id: &str, tenant_id: &str) -> Result<(), DomainError> {
        if user_id != tenant_id {
            return Err(DomainError::unauthorized(NO_AUTHORIZATION));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn list_members(&self, user_id: &str, tenant_id: &str) -> Result<Vec<Value>, DomainError> {
        Self::ensure_owner(user_id, tenant_id)?;

        let tenant = tenant_id.to_string();
        let rows = self
            .repos
            .user_tenants
            .find(&|ut: &UserTenant| {
                ut.tenant_id == tenant
                    && ut.status == StatusEnum::Valid
                    && ut.role != UserTenantRole::Owner
            })
            .await?;

        let mut members = Vec::with_capacity(rows.len());
        for ut in rows {
            let Some(user) = self.repos.users.get(&ut.user_id).await? else {
                continue;
            };
            members.push(json!({
                "id": ut.id,
                "user_id": user.id,
                "email": user.email,
                "nickname": user.nickname,
                "avatar": user.avatar,
                "role": ut.role,
                "status": ut.status,
                "update_date": ut.stamp.update_date,
                "delta_seconds": delta_seconds(&ut.stamp.update_date),
            }));
        }
        Ok(members)
    }

    #[instrument(skip(self))]
    pub async fn invite(&self, user_id: &str, tenant_id: &str, email: &str) -> Result<Value, DomainError> {
        Self::ensure_owner(user_id, tenant_id)?;

        let wanted = email.to_string();
        let invitee = self
            .repos
            .users
            .find_one(&|u: &User| u.email == wanted)
            .await?
            .ok_or_else(|| DomainError::not_found("User not found."))?;

        let (invitee_id, tenant) = (invitee.id.clone(), tenant_id.to_string());
        let existing = self
            .repos
            .user_tenants
            .find_one(&|ut: &UserTenant| ut.user_id == invitee_id && ut.tenant_id == tenant)
            .await?;
        if let Some(ut) = existing {
            return Err(DomainError::conflict(match ut.role {
                UserTenantRole::Normal => format!("{email} is already in the team."),
                UserTenantRole::Owner => format!("{email} is the owner of the team."),
                role => format!(
                    "{email} is in the team, but the role: {} is invalid.",
                    role.as_str()
                ),
            }));
        }

        self.repos
            .user_tenants
            .save(&UserTenant::new(&invitee.id, tenant_id, UserTenantRole::Invite, user_id))
            .await?;
        tracing::info!(tenant_id, invitee = %invitee.id, "user invited");

        Ok(json!({
            "id": invitee.id,
            "avatar": invitee.avatar,
            "email": invitee.email,
            "nickname": invitee.nickname,
        }))
    }

    /// The tenant owner may remove anyone; members may remove themselves.
    #[instrument(skip(self))]
    pub async fn remove_member(
        &self,
        user_id: &str,
        tenant_id: &str,
        member_id: &str,
    ) -> Result<(), DomainError> {
        if user_id != tenant_id && user_id != member_id {
            return Err(DomainError::unauthorized(NO_AUTHORIZATION));
        }
        let (tenant, member) = (tenant_id.to_string(), member_id.to_string());
        self.repos
            .user_tenants
            .delete_where(&|ut: &UserTenant| ut.tenant_id == tenant && ut.user_id == member)
            .await?;
        Ok(())
    }

    /// Tenants the user belongs to or is invited into.
    pub async fn joined(&self, user_id: &str) -> Result<Vec<Value>, DomainError> {
        let mut out = Vec::new();
        for ut in self.memberships(user_id).await? {
            let Some(tenant) = self.repos.tenants.get(&ut.tenant_id).await? else {
                continue;
            };
            let owner = self.repos.users.get(&tenant.id).await?;
            out.push(json!({
                "tenant_id": tenant.id,
                "name": tenant.name,
                "role": ut.role,
                "nickname": owner.as_ref().map(|u| u.nickname.clone()),
                "email": owner.as_ref().map(|u| u.email.clone()),
                "avatar": owner.as_ref().and_then(|u| u.avatar.clone()),
                "update_date": tenant.stamp.update_date,
                "delta_seconds": delta_seconds(&tenant.stamp.update_date),
            }));
        }
        Ok(out)
    }

    /// Accepts an invitation.
    #[instrument(skip(self))]
    pub async fn agree(&self, user_id: &str, tenant_id: &str) -> Result<(), DomainError> {
        let (user, tenant) = (user_id.to_string(), tenant_id.to_string());
        let rows = self
            .repos
            .user_tenants
            .find(&|ut: &UserTenant| ut.user_id == user && ut.tenant_id == tenant)
            .await?;
        for mut ut in rows {
            ut.role = UserTenantRole::Normal;
            ut.stamp.touch();
            self.repos.user_tenants.save(&ut).await?;
        }
        Ok(())
    }
}
