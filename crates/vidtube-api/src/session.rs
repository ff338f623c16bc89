use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use vidtube_db::Database;
use vidtube_db::models::NewUser;
use vidtube_types::api::{ChangePasswordRequest, LoginRequest, TokenKind};
use vidtube_types::models::PublicUser;

use crate::credentials::{hash_password, spend_verification, verify_password};
use crate::error::ApiError;
use crate::tokens::{TokenCodec, TokenPair};

const MIN_PASSWORD_LEN: usize = 8;

/// Per-user session state, as recorded by the single stored refresh token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Anonymous,
    Authenticated { refresh_token: String },
}

impl SessionState {
    pub fn from_stored(refresh_token: Option<String>) -> Self {
        match refresh_token {
            Some(refresh_token) => SessionState::Authenticated { refresh_token },
            None => SessionState::Anonymous,
        }
    }

    /// Only the exact stored token is accepted; anything else was rotated
    /// away or revoked.
    pub fn accepts(&self, presented: &str) -> bool {
        matches!(self, SessionState::Authenticated { refresh_token } if refresh_token == presented)
    }

    pub fn login(pair: &TokenPair) -> Self {
        SessionState::Authenticated {
            refresh_token: pair.refresh_token.clone(),
        }
    }

    pub fn logout(self) -> Self {
        SessionState::Anonymous
    }

    pub fn rotate(self, presented: &str, pair: &TokenPair) -> Result<Self, ApiError> {
        if !self.accepts(presented) {
            return Err(ApiError::StaleRefreshToken);
        }
        Ok(Self::login(pair))
    }

    pub fn refresh_token(&self) -> Option<&str> {
        match self {
            SessionState::Authenticated { refresh_token } => Some(refresh_token),
            SessionState::Anonymous => None,
        }
    }
}

/// Registration input after media has been uploaded.
pub struct NewAccount {
    pub full_name: String,
    pub email: String,
    pub username: String,
    pub password: String,
    pub avatar_url: String,
    pub cover_image_url: Option<String>,
}

pub struct LoginOutcome {
    pub user: PublicUser,
    pub tokens: TokenPair,
}

/// Check registration fields before anything is uploaded or stored.
pub fn validate_registration(
    full_name: &str,
    email: &str,
    username: &str,
    password: &str,
) -> Result<(), ApiError> {
    if [full_name, email, username, password]
        .iter()
        .any(|field| field.trim().is_empty())
    {
        return Err(ApiError::Validation("All fields are required".into()));
    }
    validate_email(email)?;

    let username = username.trim().to_lowercase();
    if username.len() < 3 || username.len() > 32 {
        return Err(ApiError::Validation("Username must be 3 to 32 characters".into()));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '.')
    {
        return Err(ApiError::Validation(
            "Username may only contain letters, digits, '_' and '.'".into(),
        ));
    }
    validate_password(password)
}

pub fn validate_email(email: &str) -> Result<(), ApiError> {
    let valid = matches!(email.trim().split_once('@'),
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() && !domain.contains('@'));
    if !valid {
        return Err(ApiError::Validation("Email address is invalid".into()));
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<(), ApiError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::Validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

/// Login, logout, refresh rotation and password changes. Owns the rule that a
/// user has at most one valid refresh token at a time.
#[derive(Clone)]
pub struct SessionManager {
    db: Arc<Database>,
    tokens: TokenCodec,
}

impl SessionManager {
    pub fn new(db: Arc<Database>, tokens: TokenCodec) -> Self {
        Self { db, tokens }
    }

    pub fn register(&self, account: NewAccount) -> Result<PublicUser, ApiError> {
        validate_registration(
            &account.full_name,
            &account.email,
            &account.username,
            &account.password,
        )?;

        let email = account.email.trim().to_lowercase();
        let username = account.username.trim().to_lowercase();
        if self.db.user_exists(&email, &username)? {
            return Err(ApiError::Conflict(
                "User already exists with this email or username".into(),
            ));
        }

        let password_hash = hash_password(&account.password)?;
        let user_id = Uuid::new_v4().to_string();
        self.db
            .create_user(&NewUser {
                id: &user_id,
                username: &username,
                email: &email,
                full_name: account.full_name.trim(),
                password_hash: &password_hash,
                avatar_url: &account.avatar_url,
                cover_image_url: account.cover_image_url.as_deref(),
            })
            .map_err(|e| {
                if vidtube_db::is_constraint_violation(&e) {
                    ApiError::Conflict("User already exists with this email or username".into())
                } else {
                    ApiError::Upstream(e)
                }
            })?;

        let user = self
            .db
            .get_user_by_id(&user_id)?
            .ok_or_else(|| anyhow::anyhow!("user {} missing right after insert", user_id))?;

        info!("Registered {} ({})", user.username, user.id);
        Ok(user.public())
    }

    pub fn login(&self, req: &LoginRequest) -> Result<LoginOutcome, ApiError> {
        let email = non_blank(req.email.as_deref()).map(str::to_lowercase);
        let username = non_blank(req.username.as_deref()).map(str::to_lowercase);
        if email.is_none() && username.is_none() {
            return Err(ApiError::Validation("Email or username is required".into()));
        }

        let Some(user) = self
            .db
            .find_user_by_login(email.as_deref(), username.as_deref())?
        else {
            spend_verification(&req.password);
            return Err(ApiError::InvalidCredentials);
        };

        if !verify_password(&req.password, &user.password) {
            warn!("Failed login for {}", user.username);
            return Err(ApiError::InvalidCredentials);
        }

        let public = user.public();
        let tokens = self.tokens.issue_pair(public.id)?;
        let state = SessionState::login(&tokens);

        if !self.db.set_refresh_token(&user.id, state.refresh_token())? {
            return Err(ApiError::InvalidCredentials);
        }

        info!("{} ({}) logged in", public.username, public.id);
        Ok(LoginOutcome {
            user: public,
            tokens,
        })
    }

    pub fn logout(&self, user_id: Uuid) -> Result<(), ApiError> {
        let state = SessionState::from_stored(self.db.get_refresh_token(&user_id.to_string())?);
        if state == SessionState::Anonymous {
            return Ok(());
        }
        self.db.set_refresh_token(&user_id.to_string(), state.logout().refresh_token())?;
        info!("User {} logged out", user_id);
        Ok(())
    }

    /// Exchange a refresh token for a new pair. The presented token stops
    /// working as soon as this succeeds.
    pub fn refresh(&self, presented: &str) -> Result<TokenPair, ApiError> {
        let claims = self
            .tokens
            .verify(presented, TokenKind::Refresh)
            .map_err(|_| ApiError::Unauthenticated)?;
        let user_id = claims.sub.to_string();

        let user = self
            .db
            .get_user_by_id(&user_id)?
            .ok_or(ApiError::Unauthenticated)?;

        let tokens = self.tokens.issue_pair(claims.sub)?;
        let next = SessionState::from_stored(user.refresh_token).rotate(presented, &tokens)?;

        let new_token = next
            .refresh_token()
            .ok_or_else(|| anyhow::anyhow!("rotation produced an anonymous session"))?;
        if !self.db.swap_refresh_token(&user_id, presented, new_token)? {
            warn!("Refresh token for {} was rotated concurrently", user_id);
            return Err(ApiError::StaleRefreshToken);
        }

        info!("Rotated session for {}", user.username);
        Ok(tokens)
    }

    pub fn change_password(
        &self,
        user_id: Uuid,
        req: &ChangePasswordRequest,
    ) -> Result<(), ApiError> {
        if req.new_password != req.confirm_password {
            return Err(ApiError::Validation(
                "New password and confirmation do not match".into(),
            ));
        }
        validate_password(&req.new_password)?;

        let user = self
            .db
            .get_user_by_id(&user_id.to_string())?
            .ok_or(ApiError::Unauthenticated)?;

        if !verify_password(&req.old_password, &user.password) {
            return Err(ApiError::InvalidCredentials);
        }

        let password_hash = hash_password(&req.new_password)?;
        self.db.update_password(&user.id, &password_hash)?;
        info!("Password changed for {}", user.username);
        Ok(())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
