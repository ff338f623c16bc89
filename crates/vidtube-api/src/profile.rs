use std::sync::Arc;

use uuid::Uuid;

use vidtube_db::Database;
use vidtube_types::models::{ChannelProfile, WatchHistoryEntry};

use crate::error::ApiError;

/// Read-only views computed from users, subscriptions and videos.
#[derive(Clone)]
pub struct ProfileAggregator {
    db: Arc<Database>,
}

impl ProfileAggregator {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn channel_profile(
        &self,
        username: &str,
        requester: Option<Uuid>,
    ) -> Result<ChannelProfile, ApiError> {
        let username = username.trim().to_lowercase();
        if username.is_empty() {
            return Err(ApiError::Validation("Username is required".into()));
        }

        let requester = requester.map(|id| id.to_string());
        let row = self
            .db
            .get_channel_profile(&username, requester.as_deref())?
            .ok_or_else(|| ApiError::NotFound("Channel".into()))?;
        Ok(row.into_profile())
    }

    pub fn watch_history(&self, user_id: Uuid) -> Result<Vec<WatchHistoryEntry>, ApiError> {
        let rows = self.db.get_watch_history(&user_id.to_string())?;
        Ok(rows.into_iter().map(|row| row.into_entry()).collect())
    }
}
