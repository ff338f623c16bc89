//! Database row types. These map directly to SQLite rows.
//! Distinct from vidtube-types API models to keep the DB layer independent.

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use vidtube_types::models::{ChannelProfile, OwnerSummary, PublicUser, WatchHistoryEntry};

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub password: String,
    pub avatar_url: String,
    pub cover_image_url: Option<String>,
    pub refresh_token: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl UserRow {
    pub fn public(&self) -> PublicUser {
        PublicUser {
            id: parse_id(&self.id, "user"),
            username: self.username.clone(),
            email: self.email.clone(),
            full_name: self.full_name.clone(),
            avatar: self.avatar_url.clone(),
            cover_image: self.cover_image_url.clone(),
            created_at: parse_timestamp(&self.created_at),
            updated_at: parse_timestamp(&self.updated_at),
        }
    }
}

pub struct NewUser<'a> {
    pub id: &'a str,
    pub username: &'a str,
    pub email: &'a str,
    pub full_name: &'a str,
    pub password_hash: &'a str,
    pub avatar_url: &'a str,
    pub cover_image_url: Option<&'a str>,
}

pub struct NewVideo<'a> {
    pub id: &'a str,
    pub owner_id: &'a str,
    pub title: &'a str,
    pub description: &'a str,
    pub video_url: &'a str,
    pub thumbnail_url: &'a str,
    pub duration_secs: f64,
}

/// A user row with its subscription-graph aggregates.
pub struct ChannelRow {
    pub id: String,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub avatar_url: String,
    pub cover_image_url: Option<String>,
    pub subscriber_count: i64,
    pub subscribed_to_count: i64,
    pub is_subscribed: bool,
}

impl ChannelRow {
    pub fn into_profile(self) -> ChannelProfile {
        ChannelProfile {
            id: parse_id(&self.id, "channel"),
            username: self.username,
            email: self.email,
            full_name: self.full_name,
            avatar: self.avatar_url,
            cover_image: self.cover_image_url,
            subscriber_count: self.subscriber_count.max(0) as u64,
            subscribed_to_count: self.subscribed_to_count.max(0) as u64,
            is_subscribed: self.is_subscribed,
        }
    }
}

/// One watch-history entry joined with its video and the video's owner.
pub struct WatchHistoryRow {
    pub video_id: String,
    pub title: String,
    pub description: String,
    pub video_url: String,
    pub thumbnail_url: String,
    pub duration_secs: f64,
    pub views: i64,
    pub created_at: String,
    pub owner_id: String,
    pub owner_username: String,
    pub owner_full_name: String,
    pub owner_avatar_url: String,
}

impl WatchHistoryRow {
    pub fn into_entry(self) -> WatchHistoryEntry {
        WatchHistoryEntry {
            id: parse_id(&self.video_id, "video"),
            title: self.title,
            description: self.description,
            video_url: self.video_url,
            thumbnail_url: self.thumbnail_url,
            duration_secs: self.duration_secs,
            views: self.views.max(0) as u64,
            created_at: parse_timestamp(&self.created_at),
            owner: OwnerSummary {
                id: parse_id(&self.owner_id, "owner"),
                username: self.owner_username,
                full_name: self.owner_full_name,
                avatar: self.owner_avatar_url,
            },
        }
    }
}

pub(crate) fn parse_id(raw: &str, what: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} id '{}': {}", what, raw, e);
        Uuid::default()
    })
}

/// SQLite stores `datetime('now')` as "YYYY-MM-DD HH:MM:SS" without a timezone;
/// RFC 3339 values are accepted too.
pub fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}': {}", raw, e);
            DateTime::default()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sqlite_and_rfc3339_timestamps() {
        let sqlite = parse_timestamp("2024-05-01 12:30:00");
        let rfc = parse_timestamp("2024-05-01T12:30:00Z");
        assert_eq!(sqlite, rfc);
        assert_eq!(sqlite.timestamp(), 1_714_566_600);
    }

    #[test]
    fn corrupt_timestamp_falls_back_to_epoch() {
        assert_eq!(parse_timestamp("yesterday"), DateTime::<Utc>::default());
    }
}
