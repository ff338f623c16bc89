use axum::{
    Extension, Json,
    extract::{Multipart, Path, State},
    response::IntoResponse,
};
use axum_extra::extract::WithRejection;
use tracing::info;
use uuid::Uuid;

use vidtube_types::api::UpdateAccountRequest;
use vidtube_types::models::PublicUser;

use crate::auth::AppState;
use crate::error::{ApiError, run_blocking};
use crate::media::{StagedFile, stage_field};
use crate::middleware::CurrentUser;
use crate::response::ApiResponse;
use crate::session::validate_email;

pub async fn current_user(
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> impl IntoResponse {
    ApiResponse::ok(user, "Current user fetched successfully")
}

pub async fn update_account(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    WithRejection(Json(req), _): WithRejection<Json<UpdateAccountRequest>, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    let full_name = req
        .full_name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty());
    let email = req
        .email
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty());
    if full_name.is_none() && email.is_none() {
        return Err(ApiError::Validation("Full name or email is required".into()));
    }
    if let Some(email) = &email {
        validate_email(email)?;
    }

    let db = state.db.clone();
    let updated = run_blocking(move || {
        let id = user.id.to_string();
        if let Some(email) = &email {
            if let Some(owner) = db.get_user_by_email(email)? {
                if owner.id != id {
                    return Err(ApiError::Conflict("Email is already in use".into()));
                }
            }
        }
        db.update_account(&id, full_name.as_deref(), email.as_deref())
            .map_err(|e| {
                if vidtube_db::is_constraint_violation(&e) {
                    ApiError::Conflict("Email is already in use".into())
                } else {
                    ApiError::Upstream(e)
                }
            })?;
        fetch_public(&db, &id)
    })
    .await?;

    Ok(ApiResponse::ok(updated, "Account details updated successfully"))
}

#[derive(Clone, Copy)]
enum ImageSlot {
    Avatar,
    CoverImage,
}

impl ImageSlot {
    fn field(self) -> &'static str {
        match self {
            ImageSlot::Avatar => "avatar",
            ImageSlot::CoverImage => "coverImage",
        }
    }
}

/// Stage the first `slot` file of the form. Whatever was staged stays in
/// `staged` even when a later part of the form fails to parse.
async fn read_image_form(
    tmp_dir: &std::path::Path,
    mut multipart: Multipart,
    slot: ImageSlot,
    staged: &mut Option<StagedFile>,
) -> Result<(), ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(ApiError::from)?
    {
        if field.name() == Some(slot.field()) && staged.is_none() {
            *staged = Some(stage_field(tmp_dir, field).await?);
        }
    }
    Ok(())
}

async fn replace_image(
    state: AppState,
    user: PublicUser,
    multipart: Multipart,
    slot: ImageSlot,
) -> Result<PublicUser, ApiError> {
    let mut staged = None;
    if let Err(e) = read_image_form(&state.upload_tmp_dir, multipart, slot, &mut staged).await {
        if let Some(staged) = &staged {
            staged.discard().await;
        }
        return Err(e);
    }
    let staged = staged
        .ok_or_else(|| ApiError::Validation(format!("{} file is missing", slot.field())))?;

    let url = state.media.upload(&staged.path).await?.url;

    let db = state.db.clone();
    run_blocking(move || {
        let id = user.id.to_string();
        match slot {
            ImageSlot::Avatar => db.update_avatar(&id, &url)?,
            ImageSlot::CoverImage => db.update_cover_image(&id, &url)?,
        };
        info!("Updated {} for {}", slot.field(), user.username);
        fetch_public(&db, &id)
    })
    .await
}

pub async fn update_avatar(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    WithRejection(multipart, _): WithRejection<Multipart, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    let updated = replace_image(state, user, multipart, ImageSlot::Avatar).await?;
    Ok(ApiResponse::ok(updated, "Avatar updated successfully"))
}

pub async fn update_cover_image(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    WithRejection(multipart, _): WithRejection<Multipart, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    let updated = replace_image(state, user, multipart, ImageSlot::CoverImage).await?;
    Ok(ApiResponse::ok(updated, "Cover image updated successfully"))
}

/// GET /users/c/{username}
pub async fn channel_profile(
    State(state): State<AppState>,
    WithRejection(Path(username), _): WithRejection<Path<String>, ApiError>,
    Extension(CurrentUser(requester)): Extension<CurrentUser>,
) -> Result<impl IntoResponse, ApiError> {
    let profiles = state.profiles.clone();
    let profile =
        run_blocking(move || profiles.channel_profile(&username, Some(requester.id))).await?;
    Ok(ApiResponse::ok(profile, "Channel profile fetched successfully"))
}

pub async fn watch_history(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Result<impl IntoResponse, ApiError> {
    let profiles = state.profiles.clone();
    let history = run_blocking(move || profiles.watch_history(user.id)).await?;
    Ok(ApiResponse::ok(history, "Watch history fetched successfully"))
}

/// POST /users/history/{video_id}: move the video to the head of the history.
pub async fn record_watch(
    State(state): State<AppState>,
    WithRejection(Path(video_id), _): WithRejection<Path<Uuid>, ApiError>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    run_blocking(move || {
        let video_id = video_id.to_string();
        if !db.video_exists(&video_id)? {
            return Err(ApiError::NotFound("Video".into()));
        }
        db.record_watch(&user.id.to_string(), &video_id)?;
        Ok(())
    })
    .await?;

    Ok(ApiResponse::ok(serde_json::json!({}), "Watch recorded"))
}

fn fetch_public(db: &vidtube_db::Database, id: &str) -> Result<PublicUser, ApiError> {
    db.get_user_by_id(id)?
        .map(|row| row.public())
        .ok_or(ApiError::Unauthenticated)
}
