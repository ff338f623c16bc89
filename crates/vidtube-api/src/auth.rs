use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Multipart, State},
    http::StatusCode,
    response::IntoResponse,
};
use axum_extra::extract::WithRejection;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use tracing::warn;

use vidtube_db::Database;
use vidtube_types::api::{
    ChangePasswordRequest, LoginRequest, LoginResponse, RefreshRequest, TokenPairResponse,
};
use vidtube_types::models::PublicUser;

use crate::error::{ApiError, run_blocking};
use crate::media::{MediaStorage, StagedFile, stage_field};
use crate::middleware::{Authenticator, CurrentUser};
use crate::profile::ProfileAggregator;
use crate::response::ApiResponse;
use crate::session::{NewAccount, SessionManager, validate_registration};
use crate::tokens::TokenPair;

pub const ACCESS_COOKIE: &str = "accessToken";
pub const REFRESH_COOKIE: &str = "refreshToken";

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub sessions: SessionManager,
    pub authenticator: Authenticator,
    pub profiles: ProfileAggregator,
    pub media: MediaStorage,
    pub upload_tmp_dir: PathBuf,
    pub secure_cookies: bool,
}

impl AppStateInner {
    fn session_cookie(&self, name: &'static str, value: String) -> Cookie<'static> {
        Cookie::build((name, value))
            .http_only(true)
            .secure(self.secure_cookies)
            .same_site(SameSite::Lax)
            .path("/")
            .build()
    }

    fn with_session_cookies(&self, jar: CookieJar, tokens: &TokenPair) -> CookieJar {
        jar.add(self.session_cookie(ACCESS_COOKIE, tokens.access_token.clone()))
            .add(self.session_cookie(REFRESH_COOKIE, tokens.refresh_token.clone()))
    }

    /// Expired copies of both cookies, sent even when the request carried none
    /// (a Bearer-only client still gets a clean slate).
    fn without_session_cookies(&self, jar: CookieJar) -> CookieJar {
        let mut access = self.session_cookie(ACCESS_COOKIE, String::new());
        access.make_removal();
        let mut refresh = self.session_cookie(REFRESH_COOKIE, String::new());
        refresh.make_removal();
        jar.add(access).add(refresh)
    }
}

#[derive(Default)]
struct RegistrationForm {
    full_name: String,
    email: String,
    username: String,
    password: String,
    avatar: Option<StagedFile>,
    cover_image: Option<StagedFile>,
}

impl RegistrationForm {
    fn staged(&self) -> impl Iterator<Item = &StagedFile> {
        self.avatar.iter().chain(self.cover_image.iter())
    }
}

async fn read_registration_form(
    tmp_dir: &std::path::Path,
    mut multipart: Multipart,
    form: &mut RegistrationForm,
) -> Result<(), ApiError> {
    while let Some(field) = multipart.next_field().await.map_err(ApiError::from)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "avatar" if form.avatar.is_none() => {
                form.avatar = Some(stage_field(tmp_dir, field).await?)
            }
            "coverImage" if form.cover_image.is_none() => {
                form.cover_image = Some(stage_field(tmp_dir, field).await?)
            }
            "fullName" => form.full_name = field.text().await.map_err(ApiError::from)?,
            "email" => form.email = field.text().await.map_err(ApiError::from)?,
            "username" | "userName" => form.username = field.text().await.map_err(ApiError::from)?,
            "password" => form.password = field.text().await.map_err(ApiError::from)?,
            other => warn!("Ignoring unexpected registration field '{}'", other),
        }
    }
    Ok(())
}

/// POST /users/register: multipart form with the account fields, a required
/// `avatar` image and an optional `coverImage`.
pub async fn register(
    State(state): State<AppState>,
    WithRejection(multipart, _): WithRejection<Multipart, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    let mut form = RegistrationForm::default();
    let result = register_from_form(&state, multipart, &mut form).await;

    // Staged files are normally consumed by the upload; sweep leftovers on failure.
    if result.is_err() {
        for staged in form.staged() {
            staged.discard().await;
        }
    }
    result
}

async fn register_from_form(
    state: &AppState,
    multipart: Multipart,
    form: &mut RegistrationForm,
) -> Result<ApiResponse<PublicUser>, ApiError> {
    read_registration_form(&state.upload_tmp_dir, multipart, form).await?;

    validate_registration(&form.full_name, &form.email, &form.username, &form.password)?;
    let avatar = form
        .avatar
        .as_ref()
        .ok_or_else(|| ApiError::Validation("Avatar image is required".into()))?;

    let db = state.db.clone();
    let email = form.email.trim().to_lowercase();
    let username = form.username.trim().to_lowercase();
    if run_blocking(move || Ok(db.user_exists(&email, &username)?)).await? {
        return Err(ApiError::Conflict(
            "User already exists with this email or username".into(),
        ));
    }

    let avatar_url = state.media.upload(&avatar.path).await?.url;
    let cover_image_url = match &form.cover_image {
        Some(cover) => Some(state.media.upload(&cover.path).await?.url),
        None => None,
    };

    let account = NewAccount {
        full_name: std::mem::take(&mut form.full_name),
        email: std::mem::take(&mut form.email),
        username: std::mem::take(&mut form.username),
        password: std::mem::take(&mut form.password),
        avatar_url,
        cover_image_url,
    };
    let sessions = state.sessions.clone();
    let user = run_blocking(move || sessions.register(account)).await?;

    Ok(ApiResponse::new(
        StatusCode::CREATED,
        user,
        "User registered successfully",
    ))
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    WithRejection(Json(req), _): WithRejection<Json<LoginRequest>, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    let sessions = state.sessions.clone();
    let outcome = run_blocking(move || sessions.login(&req)).await?;

    let jar = state.with_session_cookies(jar, &outcome.tokens);
    Ok((
        jar,
        ApiResponse::ok(
            LoginResponse {
                user: outcome.user,
                access_token: outcome.tokens.access_token,
                refresh_token: outcome.tokens.refresh_token,
            },
            "User logged in successfully",
        ),
    ))
}

pub async fn logout(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    jar: CookieJar,
) -> Result<impl IntoResponse, ApiError> {
    let sessions = state.sessions.clone();
    run_blocking(move || sessions.logout(user.id)).await?;

    Ok((
        state.without_session_cookies(jar),
        ApiResponse::ok(serde_json::json!({}), "User logged out successfully"),
    ))
}

/// POST /users/refresh-token: the refresh token comes from its cookie or,
/// failing that, from a JSON body `{ "refreshToken": ... }`.
pub async fn refresh_token(
    State(state): State<AppState>,
    jar: CookieJar,
    WithRejection(body, _): WithRejection<Bytes, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    let from_cookie = jar
        .get(REFRESH_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty());

    let presented = match from_cookie {
        Some(token) => token,
        None => {
            let req: RefreshRequest = if body.is_empty() {
                RefreshRequest::default()
            } else {
                serde_json::from_slice(&body)
                    .map_err(|_| ApiError::Validation("Malformed JSON body".into()))?
            };
            req.refresh_token
                .filter(|v| !v.trim().is_empty())
                .ok_or(ApiError::Unauthenticated)?
        }
    };

    let sessions = state.sessions.clone();
    let tokens = run_blocking(move || sessions.refresh(&presented)).await?;

    let jar = state.with_session_cookies(jar, &tokens);
    Ok((
        jar,
        ApiResponse::ok(
            TokenPairResponse {
                access_token: tokens.access_token,
                refresh_token: tokens.refresh_token,
            },
            "Access token refreshed",
        ),
    ))
}

pub async fn change_password(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    WithRejection(Json(req), _): WithRejection<Json<ChangePasswordRequest>, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    let sessions = state.sessions.clone();
    run_blocking(move || sessions.change_password(user.id, &req)).await?;

    Ok(ApiResponse::ok(
        serde_json::json!({}),
        "Password changed successfully",
    ))
}
