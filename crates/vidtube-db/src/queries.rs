use crate::Database;
use crate::models::{ChannelRow, NewUser, NewVideo, UserRow, WatchHistoryRow};
use anyhow::Result;
use rusqlite::{Connection, Row};

const USER_COLUMNS: &str = "id, username, email, full_name, password, avatar_url, cover_image_url, \
     refresh_token, created_at, updated_at";

impl Database {
    // -- Users --

    pub fn create_user(&self, user: &NewUser<'_>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users
                     (id, username, email, full_name, password, avatar_url, cover_image_url)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    user.id,
                    user.username,
                    user.email,
                    user.full_name,
                    user.password_hash,
                    user.avatar_url,
                    user.cover_image_url,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id = ?1", [id]))
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email = ?1", [email]))
    }

    /// Look a user up by email or username, whichever is given.
    /// An email match wins when both are given and point at different users.
    pub fn find_user_by_login(
        &self,
        email: Option<&str>,
        username: Option<&str>,
    ) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {USER_COLUMNS} FROM users
                 WHERE email = ?1 OR username = ?2
                 ORDER BY (email = ?1) DESC
                 LIMIT 1"
            );
            let row = conn
                .query_row(&sql, rusqlite::params![email, username], map_user)
                .optional()?;
            Ok(row)
        })
    }

    pub fn user_exists(&self, email: &str, username: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let exists = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM users WHERE email = ?1 OR username = ?2)",
                [email, username],
                |row| row.get(0),
            )?;
            Ok(exists)
        })
    }

    pub fn update_password(&self, id: &str, password_hash: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET password = ?2, updated_at = datetime('now') WHERE id = ?1",
                [id, password_hash],
            )?;
            Ok(changed == 1)
        })
    }

    /// Update whichever profile fields are given; `None` leaves a field as is.
    pub fn update_account(
        &self,
        id: &str,
        full_name: Option<&str>,
        email: Option<&str>,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users
                 SET full_name = COALESCE(?2, full_name),
                     email = COALESCE(?3, email),
                     updated_at = datetime('now')
                 WHERE id = ?1",
                rusqlite::params![id, full_name, email],
            )?;
            Ok(changed == 1)
        })
    }

    pub fn update_avatar(&self, id: &str, url: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET avatar_url = ?2, updated_at = datetime('now') WHERE id = ?1",
                [id, url],
            )?;
            Ok(changed == 1)
        })
    }

    pub fn update_cover_image(&self, id: &str, url: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET cover_image_url = ?2, updated_at = datetime('now') WHERE id = ?1",
                [id, url],
            )?;
            Ok(changed == 1)
        })
    }

    // -- Session records --

    pub fn get_refresh_token(&self, user_id: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let token = conn
                .query_row(
                    "SELECT refresh_token FROM users WHERE id = ?1",
                    [user_id],
                    |row| row.get::<_, Option<String>>(0),
                )
                .optional()?;
            Ok(token.flatten())
        })
    }

    /// Overwrite (or clear, with `None`) the stored refresh token.
    /// Returns false if no such user exists.
    pub fn set_refresh_token(&self, user_id: &str, token: Option<&str>) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET refresh_token = ?2 WHERE id = ?1",
                rusqlite::params![user_id, token],
            )?;
            Ok(changed == 1)
        })
    }

    /// Replace the stored refresh token only if it still equals `expected`.
    /// A single conditional UPDATE, so concurrent callers presenting the same
    /// token cannot both win.
    pub fn swap_refresh_token(&self, user_id: &str, expected: &str, new: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET refresh_token = ?3 WHERE id = ?1 AND refresh_token = ?2",
                [user_id, expected, new],
            )?;
            Ok(changed == 1)
        })
    }

    // -- Videos --

    pub fn insert_video(&self, video: &NewVideo<'_>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO videos
                     (id, owner_id, title, description, video_url, thumbnail_url, duration_secs)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    video.id,
                    video.owner_id,
                    video.title,
                    video.description,
                    video.video_url,
                    video.thumbnail_url,
                    video.duration_secs,
                ],
            )?;
            Ok(())
        })
    }

    pub fn video_exists(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let exists = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM videos WHERE id = ?1)",
                [id],
                |row| row.get(0),
            )?;
            Ok(exists)
        })
    }

    // -- Watch history --

    /// Put `video_id` at the head of the user's history, dropping any older
    /// entry for the same video.
    pub fn record_watch(&self, user_id: &str, video_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "DELETE FROM watch_history WHERE user_id = ?1 AND video_id = ?2",
                [user_id, video_id],
            )?;
            tx.execute(
                "INSERT INTO watch_history (user_id, video_id) VALUES (?1, ?2)",
                [user_id, video_id],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    /// History entries joined with their video and its owner, most recent first.
    /// Entries whose video row is gone are skipped.
    pub fn get_watch_history(&self, user_id: &str) -> Result<Vec<WatchHistoryRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT v.id, v.title, v.description, v.video_url, v.thumbnail_url,
                        v.duration_secs, v.views, v.created_at,
                        o.id, o.username, o.full_name, o.avatar_url
                 FROM watch_history h
                 JOIN videos v ON v.id = h.video_id
                 JOIN users o ON o.id = v.owner_id
                 WHERE h.user_id = ?1
                 ORDER BY h.seq DESC",
            )?;

            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(WatchHistoryRow {
                        video_id: row.get(0)?,
                        title: row.get(1)?,
                        description: row.get(2)?,
                        video_url: row.get(3)?,
                        thumbnail_url: row.get(4)?,
                        duration_secs: row.get(5)?,
                        views: row.get(6)?,
                        created_at: row.get(7)?,
                        owner_id: row.get(8)?,
                        owner_username: row.get(9)?,
                        owner_full_name: row.get(10)?,
                        owner_avatar_url: row.get(11)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Subscriptions --

    /// Toggle a subscription edge: removes if it exists, inserts if not.
    /// Returns true when the edge now exists.
    pub fn toggle_subscription(
        &self,
        id: &str,
        subscriber_id: &str,
        channel_id: &str,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let existing: Option<String> = tx
                .query_row(
                    "SELECT id FROM subscriptions WHERE subscriber_id = ?1 AND channel_id = ?2",
                    [subscriber_id, channel_id],
                    |row| row.get(0),
                )
                .optional()?;

            let subscribed = if let Some(existing_id) = existing {
                tx.execute("DELETE FROM subscriptions WHERE id = ?1", [&existing_id])?;
                false
            } else {
                tx.execute(
                    "INSERT INTO subscriptions (id, subscriber_id, channel_id) VALUES (?1, ?2, ?3)",
                    [id, subscriber_id, channel_id],
                )?;
                true
            };
            tx.commit()?;
            Ok(subscribed)
        })
    }

    /// Resolve a channel by username and compute its subscription aggregates.
    /// `is_subscribed` is false when there is no requester.
    pub fn get_channel_profile(
        &self,
        username: &str,
        requester_id: Option<&str>,
    ) -> Result<Option<ChannelRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT u.id, u.username, u.email, u.full_name, u.avatar_url, u.cover_image_url,
                            (SELECT COUNT(*) FROM subscriptions s WHERE s.channel_id = u.id),
                            (SELECT COUNT(*) FROM subscriptions s WHERE s.subscriber_id = u.id),
                            EXISTS(SELECT 1 FROM subscriptions s
                                   WHERE s.channel_id = u.id AND s.subscriber_id = ?2)
                     FROM users u
                     WHERE u.username = ?1",
                    rusqlite::params![username, requester_id],
                    |row| {
                        Ok(ChannelRow {
                            id: row.get(0)?,
                            username: row.get(1)?,
                            email: row.get(2)?,
                            full_name: row.get(3)?,
                            avatar_url: row.get(4)?,
                            cover_image_url: row.get(5)?,
                            subscriber_count: row.get(6)?,
                            subscribed_to_count: row.get(7)?,
                            is_subscribed: row.get(8)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }
}

fn query_user<P: rusqlite::Params>(
    conn: &Connection,
    filter: &str,
    params: P,
) -> Result<Option<UserRow>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {filter}");
    let row = conn.query_row(&sql, params, map_user).optional()?;
    Ok(row)
}

fn map_user(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        full_name: row.get(3)?,
        password: row.get(4)?,
        avatar_url: row.get(5)?,
        cover_image_url: row.get(6)?,
        refresh_token: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::is_constraint_violation;

    fn seed_user(db: &Database, id: &str, username: &str) {
        db.create_user(&NewUser {
            id,
            username,
            email: &format!("{username}@example.com"),
            full_name: username,
            password_hash: "not-a-real-hash",
            avatar_url: "https://cdn.example.com/a.png",
            cover_image_url: None,
        })
        .unwrap();
    }

    fn seed_video(db: &Database, id: &str, owner_id: &str, title: &str) {
        db.insert_video(&NewVideo {
            id,
            owner_id,
            title,
            description: "",
            video_url: "https://cdn.example.com/v.mp4",
            thumbnail_url: "https://cdn.example.com/t.png",
            duration_secs: 12.5,
        })
        .unwrap();
    }

    #[test]
    fn duplicate_username_is_a_constraint_violation() {
        let db = Database::open_in_memory().unwrap();
        seed_user(&db, "u1", "alice");

        let err = db
            .create_user(&NewUser {
                id: "u2",
                username: "alice",
                email: "other@example.com",
                full_name: "Other",
                password_hash: "x",
                avatar_url: "a",
                cover_image_url: None,
            })
            .unwrap_err();
        assert!(is_constraint_violation(&err));
    }

    #[test]
    fn find_user_by_login_matches_either_identifier() {
        let db = Database::open_in_memory().unwrap();
        seed_user(&db, "u1", "alice");
        seed_user(&db, "u2", "bob");

        let by_email = db.find_user_by_login(Some("alice@example.com"), None).unwrap().unwrap();
        assert_eq!(by_email.id, "u1");
        let by_name = db.find_user_by_login(None, Some("bob")).unwrap().unwrap();
        assert_eq!(by_name.id, "u2");
        let both = db.find_user_by_login(Some("alice@example.com"), Some("bob")).unwrap().unwrap();
        assert_eq!(both.id, "u1");
        assert!(db.find_user_by_login(Some("nobody@example.com"), None).unwrap().is_none());
        assert!(db.find_user_by_login(None, None).unwrap().is_none());
    }

    #[test]
    fn swap_refresh_token_only_replaces_matching_value() {
        let db = Database::open_in_memory().unwrap();
        seed_user(&db, "u1", "alice");
        assert_eq!(db.get_refresh_token("u1").unwrap(), None);

        assert!(db.set_refresh_token("u1", Some("r1")).unwrap());
        assert!(!db.swap_refresh_token("u1", "wrong", "r2").unwrap());
        assert_eq!(db.get_refresh_token("u1").unwrap().as_deref(), Some("r1"));

        assert!(db.swap_refresh_token("u1", "r1", "r2").unwrap());
        assert!(!db.swap_refresh_token("u1", "r1", "r3").unwrap());
        assert_eq!(db.get_refresh_token("u1").unwrap().as_deref(), Some("r2"));

        assert!(db.set_refresh_token("u1", None).unwrap());
        assert!(!db.swap_refresh_token("u1", "r2", "r4").unwrap());
        assert!(!db.set_refresh_token("missing", Some("r")).unwrap());
    }

    #[test]
    fn channel_profile_counts_edges() {
        let db = Database::open_in_memory().unwrap();
        for (id, name) in [("c", "chan"), ("a", "ann"), ("b", "ben"), ("d", "dee"), ("x", "xav")] {
            seed_user(&db, id, name);
        }
        for (i, sub) in ["a", "b", "d"].iter().enumerate() {
            assert!(db.toggle_subscription(&format!("s{i}"), sub, "c").unwrap());
        }
        assert!(db.toggle_subscription("s9", "c", "x").unwrap());

        let profile = db.get_channel_profile("chan", Some("a")).unwrap().unwrap();
        assert_eq!(profile.subscriber_count, 3);
        assert_eq!(profile.subscribed_to_count, 1);
        assert!(profile.is_subscribed);

        assert!(!db.get_channel_profile("chan", Some("x")).unwrap().unwrap().is_subscribed);
        assert!(!db.get_channel_profile("chan", None).unwrap().unwrap().is_subscribed);
        assert!(db.get_channel_profile("nobody", None).unwrap().is_none());

        // Toggling again removes the edge.
        assert!(!db.toggle_subscription("s10", "a", "c").unwrap());
        let profile = db.get_channel_profile("chan", Some("a")).unwrap().unwrap();
        assert_eq!(profile.subscriber_count, 2);
        assert!(!profile.is_subscribed);
    }

    #[test]
    fn watch_history_is_most_recent_first_and_skips_missing_videos() {
        let db = Database::open_in_memory().unwrap();
        seed_user(&db, "viewer", "viewer");
        seed_user(&db, "owner", "owner");
        seed_video(&db, "v1", "owner", "first");
        seed_video(&db, "v2", "owner", "second");

        assert!(db.get_watch_history("viewer").unwrap().is_empty());

        db.record_watch("viewer", "v1").unwrap();
        db.record_watch("viewer", "v2").unwrap();
        db.record_watch("viewer", "gone").unwrap();
        let titles: Vec<String> = db
            .get_watch_history("viewer")
            .unwrap()
            .into_iter()
            .map(|r| r.title)
            .collect();
        assert_eq!(titles, vec!["second", "first"]);

        // Re-watching moves the video back to the head without duplicating it.
        db.record_watch("viewer", "v1").unwrap();
        let rows = db.get_watch_history("viewer").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].title, "first");
        assert_eq!(rows[0].owner_username, "owner");
    }
}
