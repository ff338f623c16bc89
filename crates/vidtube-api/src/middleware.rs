use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};
use tracing::debug;

use vidtube_db::Database;
use vidtube_types::api::TokenKind;
use vidtube_types::models::PublicUser;

use crate::auth::{ACCESS_COOKIE, AppState};
use crate::error::{ApiError, run_blocking};
use crate::tokens::TokenCodec;

/// The authenticated caller, attached to request extensions by `require_auth`.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub PublicUser);

/// Access token from the `accessToken` cookie, falling back to
/// `Authorization: Bearer`.
pub fn extract_access_token(headers: &HeaderMap) -> Option<String> {
    let jar = CookieJar::from_headers(headers);
    let from_cookie = jar
        .get(ACCESS_COOKIE)
        .map(|c| c.value().trim().to_string())
        .filter(|v| !v.is_empty());

    from_cookie.or_else(|| {
        headers
            .typed_get::<Authorization<Bearer>>()
            .map(|auth| auth.token().trim().to_string())
            .filter(|v| !v.is_empty())
    })
}

#[derive(Clone)]
pub struct Authenticator {
    db: Arc<Database>,
    tokens: TokenCodec,
}

impl Authenticator {
    pub fn new(db: Arc<Database>, tokens: TokenCodec) -> Self {
        Self { db, tokens }
    }

    /// Resolve an access token to the user it names. Every failure, including
    /// an account that no longer exists, is `Unauthenticated`.
    pub fn authenticate(&self, token: Option<&str>) -> Result<CurrentUser, ApiError> {
        let token = token.ok_or(ApiError::Unauthenticated)?;
        let claims = self.tokens.verify(token, TokenKind::Access).map_err(|e| {
            debug!("Rejected access token: {}", e);
            ApiError::Unauthenticated
        })?;

        let user = self
            .db
            .get_user_by_id(&claims.sub.to_string())?
            .ok_or(ApiError::Unauthenticated)?;
        Ok(CurrentUser(user.public()))
    }
}

/// Reject requests without a valid access token; otherwise attach `CurrentUser`.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_access_token(req.headers());
    let authenticator = state.authenticator.clone();
    let user = run_blocking(move || authenticator.authenticate(token.as_deref())).await?;

    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokens::TokenConfig;
    use axum::http::{HeaderValue, header};
    use chrono::Duration;
    use vidtube_db::models::NewUser;

    fn codec(access_ttl: Duration) -> TokenCodec {
        TokenCodec::new(
            TokenConfig {
                secret: "access".into(),
                ttl: access_ttl,
            },
            TokenConfig {
                secret: "refresh".into(),
                ttl: Duration::days(10),
            },
        )
    }

    fn seeded_db(id: &str) -> Arc<Database> {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.create_user(&NewUser {
            id,
            username: "alice",
            email: "alice@example.com",
            full_name: "Alice",
            password_hash: "hash",
            avatar_url: "https://cdn.example.com/a.png",
            cover_image_url: None,
        })
        .unwrap();
        db
    }

    #[test]
    fn cookie_wins_over_bearer_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; accessToken=from-cookie"),
        );
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));
        assert_eq!(extract_access_token(&headers).as_deref(), Some("from-cookie"));

        headers.remove(header::COOKIE);
        assert_eq!(extract_access_token(&headers).as_deref(), Some("from-header"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(extract_access_token(&headers), None);
    }

    #[test]
    fn valid_token_resolves_public_user() {
        let id = uuid::Uuid::new_v4();
        let tokens = codec(Duration::minutes(15));
        let auth = Authenticator::new(seeded_db(&id.to_string()), tokens.clone());

        let token = tokens.issue_access(id).unwrap();
        let CurrentUser(user) = auth.authenticate(Some(&token)).unwrap();
        assert_eq!(user.id, id);
        assert_eq!(user.username, "alice");
    }

    #[test]
    fn missing_expired_refresh_and_orphaned_tokens_are_rejected() {
        let id = uuid::Uuid::new_v4();
        let expired = codec(Duration::seconds(-120));
        let auth = Authenticator::new(seeded_db(&id.to_string()), expired.clone());

        assert!(matches!(auth.authenticate(None), Err(ApiError::Unauthenticated)));

        let stale = expired.issue_access(id).unwrap();
        assert!(matches!(auth.authenticate(Some(&stale)), Err(ApiError::Unauthenticated)));

        let refresh = expired.issue_refresh(id).unwrap();
        assert!(matches!(auth.authenticate(Some(&refresh)), Err(ApiError::Unauthenticated)));

        let live = codec(Duration::minutes(15));
        let auth = Authenticator::new(seeded_db(&id.to_string()), live.clone());
        let deleted_account = live.issue_access(uuid::Uuid::new_v4()).unwrap();
        assert!(matches!(
            auth.authenticate(Some(&deleted_account)),
            Err(ApiError::Unauthenticated)
        ));
    }
}
