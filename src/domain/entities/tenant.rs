use serde::{Deserialize, Serialize};

use super::{new_id, StatusEnum};
use crate::domain::clock::Stamp;
use crate::domain::ports::Entity;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub nickname: String,
    #[serde(default)]
    pub avatar: Option<String>,
    pub password_hash: String,
    #[serde(default)]
    pub status: StatusEnum,
    #[serde(flatten)]
    pub stamp: Stamp,
}

impl User {
    pub fn new(
        email: impl Into<String>,
        nickname: impl Into<String>,
        password_hash: impl Into<String>,
    ) -> Self {
        Self {
            id: new_id(),
            email: email.into(),
            nickname: nickname.into(),
            avatar: None,
            password_hash: password_hash.into(),
            status: StatusEnum::Valid,
            stamp: Stamp::now(),
        }
    }

    /// Public fields only; the password hash never leaves the service.
    pub fn profile(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "email": self.email,
            "nickname": self.nickname,
            "avatar": self.avatar,
        })
    }
}

/// Every user owns exactly one tenant sharing the user's id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: String,
    pub name: String,
    pub llm_id: String,
    pub embd_id: String,
    #[serde(default)]
    pub asr_id: String,
    #[serde(default)]
    pub img2txt_id: String,
    #[serde(default)]
    pub rerank_id: String,
    #[serde(default)]
    pub tts_id: Option<String>,
    #[serde(default)]
    pub parser_ids: String,
    #[serde(default)]
    pub credit: i64,
    #[serde(default)]
    pub status: StatusEnum,
    #[serde(flatten)]
    pub stamp: Stamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserTenantRole {
    Owner,
    Admin,
    Normal,
    Invite,
}

impl UserTenantRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Admin => "admin",
            Self::Normal => "normal",
            Self::Invite => "invite",
        }
    }

    /// Pending invitations do not grant access to the tenant's data.
    pub fn is_member(&self) -> bool {
        !matches!(self, Self::Invite)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserTenant {
    pub id: String,
    pub user_id: String,
    pub tenant_id: String,
    pub role: UserTenantRole,
    #[serde(default)]
    pub invited_by: String,
    #[serde(default)]
    pub status: StatusEnum,
    #[serde(flatten)]
    pub stamp: Stamp,
}

impl UserTenant {
    pub fn new(
        user_id: impl Into<String>,
        tenant_id: impl Into<String>,
        role: UserTenantRole,
        invited_by: impl Into<String>,
    ) -> Self {
        Self {
            id: new_id(),
            user_id: user_id.into(),
            tenant_id: tenant_id.into(),
            role,
            invited_by: invited_by.into(),
            status: StatusEnum::Valid,
            stamp: Stamp::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiToken {
    pub tenant_id: String,
    pub token: String,
    #[serde(default)]
    pub beta: Option<String>,
    #[serde(default)]
    pub dialog_id: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    pub create_time: i64,
    pub create_date: String,
    pub update_time: Option<i64>,
    pub update_date: Option<String>,
}

impl Entity for User {
    const TABLE: &'static str = "user";

    fn id(&self) -> &str {
        &self.id
    }

    fn touch(&mut self) {
        self.stamp.touch();
    }
}

impl Entity for Tenant {
    const TABLE: &'static str = "tenant";

    fn id(&self) -> &str {
        &self.id
    }

    fn touch(&mut self) {
        self.stamp.touch();
    }
}

impl Entity for UserTenant {
    const TABLE: &'static str = "user_tenant";

    fn id(&self) -> &str {
        &self.id
    }

    fn touch(&mut self) {
        self.stamp.touch();
    }
}

impl Entity for ApiToken {
    const TABLE: &'static str = "api_token";

    fn id(&self) -> &str {
        &self.token
    }

    fn touch(&mut self) {
        let stamp = Stamp::now();
        self.update_time = Some(stamp.update_time);
        self.update_date = Some(stamp.update_date);
    }
}
