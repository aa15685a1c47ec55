// ── Authentication ──
//
// Two orthogonal credentials: user passwords that mint short-lived JWTs,
// and long-lived service tokens presented as `<id>_<secret>`. Secrets are
// hashed before they reach the store. Every verification failure
// collapses into `AuthError::Unauthorized` so callers cannot tell a bad
// password from an unknown user or an expired token.

mod jwt;
mod login;
mod password;
mod request;
mod service_token;

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;

pub use jwt::{Claims, JwtIssuer, MIN_EXPIRY};
pub use login::{AUTH_COOKIE, LoginRequest, LoginResponse};
pub use password::{hash_secret, verify_dummy, verify_secret};
pub use request::{OPEN_PATHS, USER_ID_HEADER, extract_token, is_open_path};
pub use service_token::{NewServiceToken, SECRET_LEN, TOKEN_ID_LEN};

use crate::api::EntityApi;
use crate::context::CoreContext;
use crate::error::CoreError;
use crate::model::{ServiceToken, User};

#[derive(Debug, Error)]
pub enum AuthError {
    /// The single outward-facing failure.
    #[error("unauthorized")]
    Unauthorized,

    #[error("secret hashing failed: {0}")]
    Hashing(String),
}

/// Entry point for everything credential-related. Cheap to clone.
#[derive(Clone)]
pub struct AuthService {
    users: EntityApi<User>,
    tokens: EntityApi<ServiceToken>,
    jwt: Arc<JwtIssuer>,
}

impl AuthService {
    pub fn new(ctx: Arc<CoreContext>) -> Self {
        let jwt = Arc::new(JwtIssuer::new(&ctx.config.auth));
        Self {
            users: EntityApi::new(Arc::clone(&ctx)),
            tokens: EntityApi::new(ctx),
            jwt,
        }
    }

    pub fn jwt(&self) -> &JwtIssuer {
        &self.jwt
    }

    pub fn users(&self) -> &EntityApi<User> {
        &self.users
    }

    /// Save a user. `plain_password` is hashed when given; otherwise the
    /// stored hash is kept.
    pub async fn save_user(
        &self,
        mut user: User,
        plain_password: Option<&str>,
    ) -> Result<User, CoreError> {
        if user.username.trim().is_empty() {
            return Err(CoreError::validation("username is required"));
        }
        match plain_password {
            Some(plain) if !plain.is_empty() => user.password = hash_secret(plain)?,
            _ if !user.id.is_empty() => {
                if let Ok(existing) = self.users.get_by_id(&user.id).await {
                    user.password = existing.password;
                }
            }
            _ => {}
        }
        self.users.save(user).await
    }

    /// Check a token the way an inbound request would: JWT first, then
    /// service token. Returns the authenticated user id.
    pub async fn verify_token(&self, token: &str) -> Result<String, AuthError> {
        let now = Utc::now();
        if let Ok(claims) = self.jwt.verify(token, now) {
            return Ok(claims.user_id);
        }
        self.verify_service_token(token, now)
            .await
            .map(|token| token.user_id)
    }
}
