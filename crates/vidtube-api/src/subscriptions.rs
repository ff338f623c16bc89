use axum::{
    Extension,
    extract::{Path, State},
    response::IntoResponse,
};
use axum_extra::extract::WithRejection;
use tracing::info;
use uuid::Uuid;

use vidtube_types::api::SubscriptionToggleResponse;

use crate::auth::AppState;
use crate::error::{ApiError, run_blocking};
use crate::middleware::CurrentUser;
use crate::response::ApiResponse;

pub async fn toggle_subscription(
    State(state): State<AppState>,
    WithRejection(Path(channel_id), _): WithRejection<Path<Uuid>, ApiError>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Result<impl IntoResponse, ApiError> {
    if channel_id == user.id {
        return Err(ApiError::Validation("You cannot subscribe to your own channel".into()));
    }

    let db = state.db.clone();
    let subscription_id = Uuid::new_v4();
    let subscribed = run_blocking(move || {
        let channel = channel_id.to_string();
        if db.get_user_by_id(&channel)?.is_none() {
            return Err(ApiError::NotFound("Channel".into()));
        }
        Ok(db.toggle_subscription(&subscription_id.to_string(), &user.id.to_string(), &channel)?)
    })
    .await?;

    info!(
        "{} {} channel {}",
        user.username,
        if subscribed { "subscribed to" } else { "unsubscribed from" },
        channel_id
    );

    let message = if subscribed { "Subscribed" } else { "Unsubscribed" };
    Ok(ApiResponse::ok(SubscriptionToggleResponse { subscribed }, message))
}
