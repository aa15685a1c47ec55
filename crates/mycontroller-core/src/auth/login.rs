// ── Login ──
//
// Username/password or a service token in, JWT out. The same JWT goes
// back in the body and in the `__mc_auth` cookie.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{AuthError, AuthService, verify_dummy, verify_secret};
use crate::storage::Filter;

pub const AUTH_COOKIE: &str = "__mc_auth";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// A service token (`<id>_<secret>`), used instead of a password.
    #[serde(default)]
    pub token: String,
    /// Humantime duration, e.g. `"30m"`. Empty means the default expiry.
    #[serde(default)]
    pub expires_in: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub user_id: String,
    pub full_name: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl LoginResponse {
    /// `Set-Cookie` value carrying the JWT.
    pub fn cookie(&self) -> String {
        format!(
            "{AUTH_COOKIE}={}; Path=/; Expires={}; HttpOnly; SameSite=Strict",
            self.token,
            self.expires_at.format("%a, %d %b %Y %H:%M:%S GMT"),
        )
    }
}

impl AuthService {
    pub async fn login(&self, request: &LoginRequest) -> Result<LoginResponse, AuthError> {
        let now = Utc::now();
        let expires_in = if request.expires_in.trim().is_empty() {
            None
        } else {
            Some(humantime::parse_duration(request.expires_in.trim()).map_err(|e| {
                debug!(error = %e, "bad expiresIn");
                AuthError::Unauthorized
            })?)
        };

        let user = if request.token.is_empty() {
            let user = match self
                .users
                .get(&[Filter::eq("username", request.username.as_str())])
                .await
            {
                Ok(user) => user,
                Err(_) => {
                    verify_dummy(&request.password);
                    debug!(username = %request.username, "unknown user");
                    return Err(AuthError::Unauthorized);
                }
            };
            if !verify_secret(&request.password, &user.password) {
                debug!(username = %request.username, "password mismatch");
                return Err(AuthError::Unauthorized);
            }
            user
        } else {
            let token = self.verify_service_token(&request.token, now).await?;
            self.users
                .get_by_id(&token.user_id)
                .await
                .map_err(|_| AuthError::Unauthorized)?
        };

        let (token, expires_at) = self.jwt.issue(&user.id, &user.full_name, expires_in, now)?;
        info!(user = %user.username, "login succeeded");
        Ok(LoginResponse {
            user_id: user.id,
            full_name: user.full_name,
            token,
            expires_at,
        })
    }
}
