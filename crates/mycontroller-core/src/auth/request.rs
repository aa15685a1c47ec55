// ── Inbound request validation ──
//
// Token lookup order: `Authorization: Bearer <t>`, raw `Authorization`,
// the `access_token` query parameter, then the `__mc_auth` cookie. Paths
// outside `/api` and the allow-listed endpoints pass without a token.

use http::header::{AUTHORIZATION, COOKIE};
use http::{HeaderValue, Request};
use tracing::debug;

use super::{AUTH_COOKIE, AuthError, AuthService};

/// Header the validator owns. Anything the caller sent is discarded.
pub const USER_ID_HEADER: &str = "x-user-id";

pub const OPEN_PATHS: &[&str] = &["/api/status", "/api/user/login"];

pub fn is_open_path(path: &str) -> bool {
    if !path.starts_with("/api") {
        return true;
    }
    let path = path.trim_end_matches('/');
    OPEN_PATHS.contains(&path)
}

pub fn extract_token<B>(request: &Request<B>) -> Option<String> {
    let headers = request.headers();

    if let Some(value) = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        let value = value.trim();
        let token = value
            .strip_prefix("Bearer ")
            .or_else(|| value.strip_prefix("bearer "))
            .unwrap_or(value)
            .trim();
        if !token.is_empty() {
            return Some(token.to_owned());
        }
    }

    if let Some(query) = request.uri().query() {
        let found = url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, value)| key == "access_token" && !value.is_empty())
            .map(|(_, value)| value.into_owned());
        if found.is_some() {
            return found;
        }
    }

    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == AUTH_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_owned())
}

impl AuthService {
    /// Validate `request` in place. On success the authenticated user id
    /// is written to [`USER_ID_HEADER`] and returned; open paths return
    /// `None`.
    pub async fn authenticate<B>(
        &self,
        request: &mut Request<B>,
    ) -> Result<Option<String>, AuthError> {
        request.headers_mut().remove(USER_ID_HEADER);

        if is_open_path(request.uri().path()) {
            return Ok(None);
        }

        let Some(token) = extract_token(request) else {
            debug!(path = %request.uri().path(), "no token presented");
            return Err(AuthError::Unauthorized);
        };
        let user_id = self.verify_token(&token).await?;

        let value = HeaderValue::from_str(&user_id).map_err(|_| AuthError::Unauthorized)?;
        request.headers_mut().insert(USER_ID_HEADER, value);
        Ok(Some(user_id))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::context::test_support::context;
    use crate::model::{ServiceToken, User};
    use chrono::{TimeDelta, Utc};

    fn get(uri: &str) -> Request<()> {
        Request::builder().uri(uri).body(()).unwrap()
    }

    #[test]
    fn open_paths() {
        assert!(is_open_path("/api/status"));
        assert!(is_open_path("/api/user/login/"));
        assert!(is_open_path("/index.html"));
        assert!(!is_open_path("/api/gateway"));
        assert!(!is_open_path("/api/status/extra"));
    }

    #[test]
    fn token_sources_in_order() {
        let bearer = Request::builder()
            .uri("/api/x?access_token=query")
            .header(AUTHORIZATION, "Bearer abc")
            .body(())
            .unwrap();
        assert_eq!(extract_token(&bearer).as_deref(), Some("abc"));

        let raw = Request::builder()
            .uri("/api/x")
            .header(AUTHORIZATION, "rawtoken")
            .body(())
            .unwrap();
        assert_eq!(extract_token(&raw).as_deref(), Some("rawtoken"));

        assert_eq!(
            extract_token(&get("/api/x?a=1&access_token=q%2Bv")).as_deref(),
            Some("q+v")
        );

        let cookie = Request::builder()
            .uri("/api/x")
            .header(COOKIE, "theme=dark; __mc_auth=jwt")
            .body(())
            .unwrap();
        assert_eq!(extract_token(&cookie).as_deref(), Some("jwt"));

        assert_eq!(extract_token(&get("/api/x")), None);
    }

    async fn auth_with_user(dir: &std::path::Path) -> (AuthService, User) {
        let auth = AuthService::new(context(dir));
        let user = auth
            .save_user(
                User {
                    username: "admin".into(),
                    ..User::default()
                },
                Some("pw"),
            )
            .await
            .unwrap();
        (auth, user)
    }

    #[tokio::test]
    async fn jwt_request_gets_user_header() {
        let dir = tempfile::tempdir().unwrap();
        let (auth, user) = auth_with_user(dir.path()).await;
        let (jwt, _) = auth.jwt().issue(&user.id, "", None, Utc::now()).unwrap();

        let mut request = Request::builder()
            .uri("/api/gateway")
            .header(AUTHORIZATION, format!("Bearer {jwt}"))
            .header(USER_ID_HEADER, "spoofed")
            .body(())
            .unwrap();
        let id = auth.authenticate(&mut request).await.unwrap();
        assert_eq!(id.as_deref(), Some(user.id.as_str()));
        assert_eq!(request.headers()[USER_ID_HEADER], user.id.as_str());
    }

    #[tokio::test]
    async fn service_token_request_and_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let (auth, user) = auth_with_user(dir.path()).await;
        let created = auth
            .create_service_token(ServiceToken {
                user_id: user.id.clone(),
                expires_on: Some(Utc::now() + TimeDelta::days(1)),
                ..ServiceToken::default()
            })
            .await
            .unwrap();

        let mut request = get(&format!("/api/node?access_token={}", created.presented));
        assert_eq!(
            auth.authenticate(&mut request).await.unwrap().as_deref(),
            Some(user.id.as_str())
        );

        let mut expired = created.token.clone();
        expired.expires_on = Some(Utc::now() - TimeDelta::days(1));
        auth.service_tokens().save(expired).await.unwrap();
        let mut request = get(&format!("/api/node?access_token={}", created.presented));
        assert!(auth.authenticate(&mut request).await.is_err());
    }

    #[tokio::test]
    async fn spoofed_header_is_cleared_on_failure_and_open_paths() {
        let dir = tempfile::tempdir().unwrap();
        let (auth, _) = auth_with_user(dir.path()).await;

        let mut open = Request::builder()
            .uri("/api/status")
            .header(USER_ID_HEADER, "spoofed")
            .body(())
            .unwrap();
        assert_eq!(auth.authenticate(&mut open).await.unwrap(), None);
        assert!(open.headers().get(USER_ID_HEADER).is_none());

        let mut bad = Request::builder()
            .uri("/api/gateway")
            .header(AUTHORIZATION, "Bearer garbage")
            .header(USER_ID_HEADER, "spoofed")
            .body(())
            .unwrap();
        assert!(matches!(
            auth.authenticate(&mut bad).await,
            Err(AuthError::Unauthorized)
        ));
        assert!(bad.headers().get(USER_ID_HEADER).is_none());
    }
}
