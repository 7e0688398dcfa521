use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::instrument;

use super::file::FileService;
use crate::application::DefaultModels;
use crate::domain::clock::Stamp;
use crate::domain::ports::Repositories;
use crate::domain::{DomainError, StatusEnum, Tenant, User, UserTenant, UserTenantRole};

/// Chunking methods offered to every new tenant.
pub const PARSER_IDS: &str = "naive:General,qa:Q&A,resume:Resume,manual:Manual,table:Table,\
paper:Paper,book:Book,laws:Laws,presentation:Presentation,picture:Picture,one:One,\
audio:Audio,email:Email,tag:Tag";

#[cfg(not(test))]
const HASH_COST: u32 = bcrypt::DEFAULT_COST;
#[cfg(test)]
const HASH_COST: u32 = 4;

#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub jwt_secret: String,
    pub token_ttl_hours: i64,
    pub default_models: DefaultModels,
}

/// JWT claims: `sub` is the user id.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    pub iat: usize,
}

pub struct UserService {
    repos: Repositories,
    files: Arc<FileService>,
    settings: AuthSettings,
}

impl UserService {
    pub fn new(repos: Repositories, files: Arc<FileService>, settings: AuthSettings) -> Self {
        Self {
            repos,
            files,
            settings,
        }
    }

    async fn by_email(&self, email: &str) -> Result<Option<User>, DomainError> {
        let wanted = email.to_string();
        self.repos
            .users
            .find_one(&|u: &User| u.email == wanted)
            .await
    }

    /// Creates the user together with their own tenant and root folder.
    #[instrument(skip(self, password))]
    pub async fn register(&self, email: &str, password: &str, nickname: &str) -> Result<User, DomainError> {
        if self.by_email(email).await?.is_some() {
            return Err(DomainError::conflict(format!(
                "Email: {email} has already registered!"
            )));
        }

        let hash = bcrypt::hash(password, HASH_COST)
            .map_err(|e| DomainError::internal(format!("password hashing failed: {e}")))?;
        let user = User::new(email, nickname, hash);
        self.repos.users.save(&user).await?;

        let models = &self.settings.default_models;
        let tenant = Tenant {
            id: user.id.clone(),
            name: format!("{nickname}'s Kingdom"),
            llm_id: models.llm_id.clone(),
            embd_id: models.embd_id.clone(),
            asr_id: models.asr_id.clone(),
            img2txt_id: models.img2txt_id.clone(),
            rerank_id: models.rerank_id.clone(),
            tts_id: None,
            parser_ids: PARSER_IDS.to_string(),
            credit: 512,
            status: StatusEnum::Valid,
            stamp: Stamp::now(),
        };
        self.repos.tenants.save(&tenant).await?;
        self.repos
            .user_tenants
            .save(&UserTenant::new(&user.id, &tenant.id, UserTenantRole::Owner, &user.id))
            .await?;
        self.files.root_folder(&tenant.id).await?;

        tracing::info!(user_id = %user.id, "user registered");
        Ok(user)
    }

    /// Checks credentials and returns a signed token with the profile.
    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> Result<(String, Value), DomainError> {
        let user = self
            .by_email(email)
            .await?
            .ok_or_else(|| DomainError::unauthorized(format!("Email: {email} is not registered!")))?;
        let matches = bcrypt::verify(password, &user.password_hash).unwrap_or(false);
        if !matches {
            return Err(DomainError::unauthorized("Email and password do not match!"));
        }
        let token = self.issue_token(&user.id)?;
        Ok((token, user.profile()))
    }

    pub fn issue_token(&self, user_id: &str) -> Result<String, DomainError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            exp: (now + Duration::hours(self.settings.token_ttl_hours)).timestamp() as usize,
            iat: now.timestamp() as usize,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.settings.jwt_secret.as_bytes()),
        )
        .map_err(|e| DomainError::internal(e.to_string()))
    }

    fn verify_token(&self, token: &str) -> Option<Claims> {
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.settings.jwt_secret.as_bytes()),
            &Validation::default(),
        )
        .map(|data| data.claims)
        .ok()
    }

    pub async fn info(&self, user_id: &str) -> Result<Value, DomainError> {
        let user = self
            .repos
            .users
            .get(user_id)
            .await?
            .ok_or_else(|| DomainError::not_found("User not found."))?;
        let mut profile = user.profile();
        profile["is_active"] = json!(user.status == StatusEnum::Valid);
        Ok(profile)
    }

    /// Resolves a bearer credential: a session JWT, or an API token standing
    /// for its tenant's owner.
    pub async fn authenticate(&self, token: &str) -> Result<User, DomainError> {
        let user_id = match self.verify_token(token) {
            Some(claims) => claims.sub,
            None => self
                .repos
                .api_tokens
                .get(token)
                .await?
                .map(|t| t.tenant_id)
                .ok_or_else(|| DomainError::unauthorized("Invalid credentials"))?,
        };
        self.repos
            .users
            .get(&user_id)
            .await?
            .filter(|u| u.status == StatusEnum::Valid)
            .ok_or_else(|| DomainError::unauthorized("Invalid credentials"))
    }
}
