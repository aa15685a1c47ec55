// ── Service tokens ──

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use tracing::{debug, info};

use super::{AuthError, AuthService, hash_secret, verify_secret};
use crate::error::CoreError;
use crate::model::{ServiceToken, TokenHash};
use crate::storage::Filter;

pub const TOKEN_ID_LEN: usize = 21;
pub const SECRET_LEN: usize = 32;

/// A freshly created token. `presented` is the only copy of the secret.
#[derive(Debug, Clone)]
pub struct NewServiceToken {
    pub token: ServiceToken,
    pub presented: String,
}

fn random_alphanumeric(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

impl AuthService {
    /// Create a token for `user_id`. The caller sees `<id>_<secret>` once;
    /// only the hash is stored.
    pub async fn create_service_token(
        &self,
        mut token: ServiceToken,
    ) -> Result<NewServiceToken, CoreError> {
        if token.user_id.is_empty() {
            return Err(CoreError::validation("service token needs a user id"));
        }
        // Refuse tokens for users that don't exist.
        self.users.get_by_id(&token.user_id).await?;

        let id = random_alphanumeric(TOKEN_ID_LEN);
        let secret = random_alphanumeric(SECRET_LEN);
        token.token = TokenHash {
            id: id.clone(),
            hash: hash_secret(&secret)?,
        };
        token.created_on = Some(Utc::now());
        let token = self.tokens.save(token).await?;
        info!(token = %token.id, user = %token.user_id, "service token created");

        Ok(NewServiceToken {
            token,
            presented: format!("{id}_{secret}"),
        })
    }

    pub fn service_tokens(&self) -> &crate::api::EntityApi<ServiceToken> {
        &self.tokens
    }

    /// Split on the first `_`, look the id up, check expiry, compare hash.
    pub(crate) async fn verify_service_token(
        &self,
        presented: &str,
        now: DateTime<Utc>,
    ) -> Result<ServiceToken, AuthError> {
        let Some((id, secret)) = presented.split_once('_') else {
            return Err(AuthError::Unauthorized);
        };
        if id.is_empty() || secret.is_empty() {
            return Err(AuthError::Unauthorized);
        }

        let token = self
            .tokens
            .get(&[Filter::eq("token.id", id)])
            .await
            .map_err(|e| {
                debug!(error = %e, "service token lookup failed");
                AuthError::Unauthorized
            })?;
        if token.is_expired(now) {
            debug!(token = %token.id, "service token expired");
            return Err(AuthError::Unauthorized);
        }
        if !verify_secret(secret, &token.token.hash) {
            return Err(AuthError::Unauthorized);
        }
        Ok(token)
    }
}
