// ── HS256 access tokens ──
//
// Compact JWS: base64url(header).base64url(claims).base64url(hmac).
// The signing key is `<secret>_<hostId>`, so rotating either one
// invalidates every outstanding token.

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, TimeDelta, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::debug;

use super::AuthError;
use crate::config::AuthConfig;

type HmacSha256 = Hmac<Sha256>;

/// Shortest lifetime a caller may ask for.
pub const MIN_EXPIRY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    pub user_id: String,
    pub full_name: String,
    pub authorized: bool,
    /// Unix seconds.
    pub expires_at: i64,
}

#[derive(Serialize, Deserialize)]
struct Header {
    alg: String,
    typ: String,
}

pub struct JwtIssuer {
    key: SecretString,
    default_expiry: Duration,
}

impl JwtIssuer {
    pub fn new(config: &AuthConfig) -> Self {
        let key = format!("{}_{}", config.jwt_secret.expose_secret(), config.host_id);
        Self {
            key: SecretString::from(key),
            default_expiry: config.default_expiry,
        }
    }

    fn mac(&self) -> Result<HmacSha256, AuthError> {
        HmacSha256::new_from_slice(self.key.expose_secret().as_bytes())
            .map_err(|e| AuthError::Hashing(e.to_string()))
    }

    /// Mint a token. `expires_in` falls back to the default and is
    /// raised to [`MIN_EXPIRY`] when shorter.
    pub fn issue(
        &self,
        user_id: &str,
        full_name: &str,
        expires_in: Option<Duration>,
        now: DateTime<Utc>,
    ) -> Result<(String, DateTime<Utc>), AuthError> {
        let lifetime = expires_in.unwrap_or(self.default_expiry).max(MIN_EXPIRY);
        let lifetime =
            TimeDelta::from_std(lifetime).map_err(|e| AuthError::Hashing(e.to_string()))?;
        let expires_at = now + lifetime;

        let header = Header {
            alg: "HS256".into(),
            typ: "JWT".into(),
        };
        let claims = Claims {
            user_id: user_id.to_owned(),
            full_name: full_name.to_owned(),
            authorized: true,
            expires_at: expires_at.timestamp(),
        };
        let signing_input = format!("{}.{}", segment(&header)?, segment(&claims)?);

        let mut mac = self.mac()?;
        mac.update(signing_input.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok((format!("{signing_input}.{signature}"), expires_at))
    }

    /// Check signature, algorithm and expiry. Every failure is the same
    /// opaque error; the reason is only logged.
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, AuthError> {
        let reject = |reason: &str| {
            debug!(reason, "jwt rejected");
            AuthError::Unauthorized
        };

        let mut parts = token.split('.');
        let (Some(header), Some(payload), Some(signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(reject("malformed"));
        };

        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| reject("signature encoding"))?;
        let mut mac = self.mac()?;
        mac.update(header.as_bytes());
        mac.update(b".");
        mac.update(payload.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| reject("bad signature"))?;

        let header: Header = URL_SAFE_NO_PAD
            .decode(header)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .ok_or_else(|| reject("header"))?;
        if header.alg != "HS256" {
            return Err(reject("algorithm"));
        }

        let claims: Claims = URL_SAFE_NO_PAD
            .decode(payload)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .ok_or_else(|| reject("claims"))?;
        if !claims.authorized {
            return Err(reject("not authorized"));
        }
        if claims.expires_at <= now.timestamp() {
            return Err(reject("expired"));
        }
        Ok(claims)
    }
}

fn segment<T: Serialize>(value: &T) -> Result<String, AuthError> {
    let json = serde_json::to_vec(value).map_err(|e| AuthError::Hashing(e.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn issuer(secret: &str, host: &str) -> JwtIssuer {
        JwtIssuer::new(&AuthConfig {
            jwt_secret: SecretString::from(secret.to_owned()),
            host_id: host.into(),
            ..AuthConfig::default()
        })
    }

    #[test]
    fn issue_then_verify() {
        let jwt = issuer("s3cret", "host-a");
        let now = Utc::now();
        let (token, expires) = jwt.issue("u1", "Admin", None, now).unwrap();
        assert_eq!(expires, now + TimeDelta::hours(24));

        let claims = jwt.verify(&token, now).unwrap();
        assert_eq!(claims.user_id, "u1");
        assert_eq!(claims.full_name, "Admin");
        assert!(claims.authorized);
    }

    #[test]
    fn expired_token_is_rejected() {
        let jwt = issuer("s3cret", "host-a");
        let now = Utc::now();
        let (token, expires) = jwt
            .issue("u1", "", Some(Duration::from_secs(60)), now)
            .unwrap();
        assert!(jwt.verify(&token, expires - TimeDelta::seconds(1)).is_ok());
        assert!(matches!(
            jwt.verify(&token, expires),
            Err(AuthError::Unauthorized)
        ));
    }

    #[test]
    fn expiry_has_a_floor() {
        let jwt = issuer("s3cret", "host-a");
        let now = Utc::now();
        let (_, expires) = jwt
            .issue("u1", "", Some(Duration::from_millis(10)), now)
            .unwrap();
        assert_eq!(expires - now, TimeDelta::seconds(2));
    }

    #[test]
    fn other_host_cannot_verify() {
        let now = Utc::now();
        let (token, _) = issuer("s3cret", "host-a").issue("u1", "", None, now).unwrap();
        assert!(issuer("s3cret", "host-b").verify(&token, now).is_err());
        assert!(issuer("rotated", "host-a").verify(&token, now).is_err());
    }

    #[test]
    fn tampered_claims_are_rejected() {
        let jwt = issuer("s3cret", "host-a");
        let now = Utc::now();
        let (token, _) = jwt.issue("u1", "", None, now).unwrap();
        let mut parts: Vec<&str> = token.split('.').collect();
        let forged = URL_SAFE_NO_PAD.encode(
            br#"{"userId":"admin","fullName":"","authorized":true,"expiresAt":9999999999}"#,
        );
        parts[1] = &forged;
        assert!(jwt.verify(&parts.join("."), now).is_err());
        assert!(jwt.verify("a.b", now).is_err());
    }
}
