use chrono::{Duration, Utc};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use uuid::Uuid;

use vidtube_types::api::{Claims, TokenKind};

use crate::error::ApiError;

/// Signing configuration for one token kind.
#[derive(Clone)]
pub struct TokenConfig {
    pub secret: String,
    pub ttl: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("token malformed")]
    Malformed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Clone)]
struct SigningScope {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl SigningScope {
    fn new(config: &TokenConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.secret.as_bytes()),
            ttl: config.ttl,
        }
    }
}

/// Issues and verifies short-lived access tokens and long-lived refresh tokens.
#[derive(Clone)]
pub struct TokenCodec {
    access: SigningScope,
    refresh: SigningScope,
}

impl TokenCodec {
    pub fn new(access: TokenConfig, refresh: TokenConfig) -> Self {
        Self {
            access: SigningScope::new(&access),
            refresh: SigningScope::new(&refresh),
        }
    }

    fn scope(&self, kind: TokenKind) -> &SigningScope {
        match kind {
            TokenKind::Access => &self.access,
            TokenKind::Refresh => &self.refresh,
        }
    }

    fn issue(&self, kind: TokenKind, user_id: Uuid) -> anyhow::Result<String> {
        let scope = self.scope(kind);
        let now = Utc::now();
        let claims = Claims {
            sub: user_id,
            kind,
            jti: Uuid::new_v4(),
            iat: now.timestamp(),
            exp: (now + scope.ttl).timestamp(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &scope.encoding)?;
        Ok(token)
    }

    pub fn issue_access(&self, user_id: Uuid) -> anyhow::Result<String> {
        self.issue(TokenKind::Access, user_id)
    }

    pub fn issue_refresh(&self, user_id: Uuid) -> anyhow::Result<String> {
        self.issue(TokenKind::Refresh, user_id)
    }

    /// Issue both tokens or neither.
    pub fn issue_pair(&self, user_id: Uuid) -> Result<TokenPair, ApiError> {
        let access_token = self.issue_access(user_id)?;
        let refresh_token = self.issue_refresh(user_id)?;
        Ok(TokenPair {
            access_token,
            refresh_token,
        })
    }

    /// Check signature, expiry and kind. A token signed for the other kind
    /// fails as `Malformed`.
    pub fn verify(&self, token: &str, expected: TokenKind) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        let data = decode::<Claims>(token, &self.scope(expected).decoding, &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Malformed,
            })?;

        if data.claims.kind != expected {
            return Err(TokenError::Malformed);
        }
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(secret: &str, ttl: Duration) -> TokenConfig {
        TokenConfig {
            secret: secret.to_string(),
            ttl,
        }
    }

    fn codec() -> TokenCodec {
        TokenCodec::new(
            config("access-secret", Duration::minutes(15)),
            config("refresh-secret", Duration::days(10)),
        )
    }

    #[test]
    fn issued_tokens_carry_identity_and_kind() {
        let codec = codec();
        let user_id = Uuid::new_v4();
        let pair = codec.issue_pair(user_id).unwrap();

        let access = codec.verify(&pair.access_token, TokenKind::Access).unwrap();
        assert_eq!(access.sub, user_id);
        assert_eq!(access.kind, TokenKind::Access);
        assert!(access.exp > access.iat);

        let refresh = codec.verify(&pair.refresh_token, TokenKind::Refresh).unwrap();
        assert_eq!(refresh.sub, user_id);
        assert!(refresh.exp - refresh.iat > access.exp - access.iat);
    }

    #[test]
    fn tokens_minted_back_to_back_differ() {
        let codec = codec();
        let user_id = Uuid::new_v4();
        assert_ne!(
            codec.issue_refresh(user_id).unwrap(),
            codec.issue_refresh(user_id).unwrap()
        );
    }

    #[test]
    fn kinds_do_not_cross() {
        let codec = codec();
        let pair = codec.issue_pair(Uuid::new_v4()).unwrap();
        assert_eq!(
            codec.verify(&pair.access_token, TokenKind::Refresh).unwrap_err(),
            TokenError::Malformed
        );
        assert_eq!(
            codec.verify(&pair.refresh_token, TokenKind::Access).unwrap_err(),
            TokenError::Malformed
        );
    }

    #[test]
    fn kind_claim_is_checked_even_with_a_shared_secret() {
        let shared = TokenCodec::new(
            config("same", Duration::minutes(15)),
            config("same", Duration::days(10)),
        );
        let refresh = shared.issue_refresh(Uuid::new_v4()).unwrap();
        assert_eq!(
            shared.verify(&refresh, TokenKind::Access).unwrap_err(),
            TokenError::Malformed
        );
    }

    #[test]
    fn expired_token_is_reported_as_expired() {
        let codec = TokenCodec::new(
            config("access-secret", Duration::seconds(-120)),
            config("refresh-secret", Duration::days(10)),
        );
        let token = codec.issue_access(Uuid::new_v4()).unwrap();
        assert_eq!(
            codec.verify(&token, TokenKind::Access).unwrap_err(),
            TokenError::Expired
        );
    }

    #[test]
    fn foreign_signature_and_garbage_are_malformed() {
        let other = TokenCodec::new(
            config("someone-else", Duration::minutes(15)),
            config("someone-else-2", Duration::days(10)),
        );
        let forged = other.issue_access(Uuid::new_v4()).unwrap();
        let codec = codec();
        for token in [forged.as_str(), "not.a.jwt", ""] {
            let err = codec.verify(token, TokenKind::Access).unwrap_err();
            assert_eq!(err, TokenError::Malformed, "{token:?}");
        }
    }
}
