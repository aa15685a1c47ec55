// ── Credentials-bearing entities ──
//
// Both collections hold one-way hashes only. Plaintext passwords and
// service-token secrets never reach the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Collection, Labels, impl_entity};

/// An operator account. `password` is the stored hash; use
/// [`User::redacted`] before handing a user to anything outside the core.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub modified_on: Option<DateTime<Utc>>,
}

impl_entity!(User, Collection::User);

impl User {
    /// Copy without the password hash.
    pub fn redacted(&self) -> Self {
        Self {
            password: String::new(),
            ..self.clone()
        }
    }
}

/// Public id plus the hash of the secret half of a service token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenHash {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub hash: String,
}

/// A long-lived credential presented as `<token.id>_<secret>`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceToken {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub token: TokenHash,
    #[serde(default)]
    pub never_expire: bool,
    #[serde(default)]
    pub expires_on: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_on: Option<DateTime<Utc>>,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub modified_on: Option<DateTime<Utc>>,
}

impl_entity!(ServiceToken, Collection::ServiceToken);

impl ServiceToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        if self.never_expire {
            return false;
        }
        self.expires_on.is_none_or(|at| at < now)
    }
}
