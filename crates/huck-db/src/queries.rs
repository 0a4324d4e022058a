use crate::Database;
use crate::models::{ChannelRow, MessageJoinRow, ProfileRow, ReactionRow, format_timestamp};
use anyhow::Result;
use rusqlite::Connection;

use huck_types::models::{MessageRow, Reaction};

/// Outcome of an idempotent reaction intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReactionChange {
    Inserted(Reaction),
    Deleted(Reaction),
    Unchanged,
}

impl Database {
    // -- Profiles --

    /// Return the profile named `username`, creating it with `new_id` and
    /// `color` if none exists. Runs under the connection lock, so two callers
    /// racing on the same name both get the same row.
    pub fn lookup_or_create_profile(
        &self,
        new_id: &str,
        username: &str,
        color: &str,
    ) -> Result<(ProfileRow, bool)> {
        self.with_conn(|conn| {
            if let Some(existing) = query_profile(conn, "username", username)? {
                return Ok((existing, false));
            }
            conn.execute(
                "INSERT INTO profiles (id, username, color) VALUES (?1, ?2, ?3)",
                (new_id, username, color),
            )?;
            Ok((
                ProfileRow {
                    id: new_id.to_string(),
                    username: username.to_string(),
                    color: color.to_string(),
                },
                true,
            ))
        })
    }

    pub fn get_profile(&self, id: &str) -> Result<Option<ProfileRow>> {
        self.with_conn(|conn| query_profile(conn, "id", id))
    }

    // -- Channels --

    pub fn list_channels(&self) -> Result<Vec<ChannelRow>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT id, name, description FROM channels ORDER BY name")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(ChannelRow {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        description: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Returns false when the name is already taken.
    pub fn create_channel(&self, id: &str, name: &str, description: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO channels (id, name, description) VALUES (?1, ?2, ?3)",
                (id, name, description),
            )?;
            Ok(inserted == 1)
        })
    }

    pub fn channel_exists(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| exists(conn, "SELECT 1 FROM channels WHERE id = ?1", id))
    }

    // -- Messages --

    pub fn insert_message(&self, row: &MessageRow) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, channel_id, user_id, content, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                (
                    row.id.to_string(),
                    row.channel_id.to_string(),
                    row.user_id.to_string(),
                    &row.content,
                    format_timestamp(row.created_at),
                ),
            )?;
            Ok(())
        })
    }

    pub fn message_exists(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| exists(conn, "SELECT 1 FROM messages WHERE id = ?1", id))
    }

    /// All messages of a channel with their authors, oldest first.
    pub fn get_messages(&self, channel_id: &str) -> Result<Vec<MessageJoinRow>> {
        self.with_conn(|conn| query_messages(conn, channel_id))
    }

    // -- Reactions --

    /// Returns false when the `(message, user, emoji)` triple already exists.
    pub fn insert_reaction(&self, reaction: &Reaction) -> Result<bool> {
        self.with_conn(|conn| insert_reaction_row(conn, reaction))
    }

    /// Delete by primary key. Returns the removed row, if there was one.
    pub fn delete_reaction(&self, id: &str) -> Result<Option<ReactionRow>> {
        self.with_conn(|conn| {
            let Some(row) = query_reaction(conn, "id = ?1", &[&id])? else {
                return Ok(None);
            };
            conn.execute("DELETE FROM reactions WHERE id = ?1", [id])?;
            Ok(Some(row))
        })
    }

    /// Bring the `(message, user, emoji)` triple to the requested state.
    /// `new_id` is used only when a row has to be inserted.
    pub fn set_reaction(
        &self,
        new_id: &str,
        message_id: &str,
        user_id: &str,
        emoji_code: &str,
        present: bool,
    ) -> Result<ReactionChange> {
        self.with_conn(|conn| {
            let existing = query_reaction(
                conn,
                "message_id = ?1 AND user_id = ?2 AND emoji_code = ?3",
                &[&message_id, &user_id, &emoji_code],
            )?;

            match (existing, present) {
                (Some(_), true) | (None, false) => Ok(ReactionChange::Unchanged),
                (Some(row), false) => {
                    conn.execute("DELETE FROM reactions WHERE id = ?1", [&row.id])?;
                    Ok(ReactionChange::Deleted(row.into_model()?))
                }
                (None, true) => {
                    let reaction = ReactionRow {
                        id: new_id.to_string(),
                        message_id: message_id.to_string(),
                        user_id: user_id.to_string(),
                        emoji_code: emoji_code.to_string(),
                    }
                    .into_model()?;
                    insert_reaction_row(conn, &reaction)?;
                    Ok(ReactionChange::Inserted(reaction))
                }
            }
        })
    }

    /// Batch-fetch reactions for a set of message IDs.
    pub fn get_reactions_for_messages(&self, message_ids: &[String]) -> Result<Vec<ReactionRow>> {
        if message_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> =
                (1..=message_ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT id, message_id, user_id, emoji_code FROM reactions WHERE message_id IN ({}) ORDER BY rowid",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::types::ToSql> = message_ids
                .iter()
                .map(|id| id as &dyn rusqlite::types::ToSql)
                .collect();

            let rows = stmt
                .query_map(params.as_slice(), reaction_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }
}

fn query_profile(conn: &Connection, column: &str, value: &str) -> Result<Option<ProfileRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT id, username, color FROM profiles WHERE {column} = ?1"
    ))?;

    let row = stmt
        .query_row([value], |row| {
            Ok(ProfileRow {
                id: row.get(0)?,
                username: row.get(1)?,
                color: row.get(2)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn query_messages(conn: &Connection, channel_id: &str) -> Result<Vec<MessageJoinRow>> {
    // JOIN profiles to fetch the author in a single query (eliminates N+1)
    let mut stmt = conn.prepare(
        "SELECT m.id, m.channel_id, m.user_id, m.content, m.created_at, p.username, p.color
         FROM messages m
         LEFT JOIN profiles p ON m.user_id = p.id
         WHERE m.channel_id = ?1
         ORDER BY m.created_at ASC, m.id ASC",
    )?;

    let rows = stmt
        .query_map([channel_id], |row| {
            Ok(MessageJoinRow {
                id: row.get(0)?,
                channel_id: row.get(1)?,
                user_id: row.get(2)?,
                content: row.get(3)?,
                created_at: row.get(4)?,
                author_username: row.get(5)?,
                author_color: row.get(6)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn query_reaction(
    conn: &Connection,
    filter: &str,
    params: &[&dyn rusqlite::types::ToSql],
) -> Result<Option<ReactionRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT id, message_id, user_id, emoji_code FROM reactions WHERE {filter}"
    ))?;
    Ok(stmt.query_row(params, reaction_from_row).optional()?)
}

fn insert_reaction_row(conn: &Connection, reaction: &Reaction) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO reactions (id, message_id, user_id, emoji_code) VALUES (?1, ?2, ?3, ?4)",
        (
            reaction.id.to_string(),
            reaction.message_id.to_string(),
            reaction.user_id.to_string(),
            &reaction.emoji_code,
        ),
    )?;
    Ok(inserted == 1)
}

fn reaction_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ReactionRow> {
    Ok(ReactionRow {
        id: row.get(0)?,
        message_id: row.get(1)?,
        user_id: row.get(2)?,
        emoji_code: row.get(3)?,
    })
}

fn exists(conn: &Connection, sql: &str, id: &str) -> Result<bool> {
    let found: Option<i64> = conn.query_row(sql, [id], |row| row.get(0)).optional()?;
    Ok(found.is_some())
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
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    const GENERAL: &str = "00000000-0000-0000-0000-000000000001";

    fn seeded() -> (Database, String) {
        let db = Database::open_in_memory().unwrap();
        let (profile, created) = db
            .lookup_or_create_profile(&Uuid::new_v4().to_string(), "kenshiro", "text-red-500")
            .unwrap();
        assert!(created);
        (db, profile.id)
    }

    fn message(user_id: &str, id: u128, millis: i64) -> MessageRow {
        MessageRow {
            id: Uuid::from_u128(id),
            channel_id: GENERAL.parse().unwrap(),
            user_id: user_id.parse().unwrap(),
            content: format!("m{id}"),
            created_at: Utc.timestamp_millis_opt(millis).unwrap(),
        }
    }

    #[test]
    fn lookup_or_create_returns_existing_profile() {
        let (db, id) = seeded();
        let (again, created) = db
            .lookup_or_create_profile(&Uuid::new_v4().to_string(), "kenshiro", "text-blue-500")
            .unwrap();
        assert!(!created);
        assert_eq!(again.id, id);
        assert_eq!(again.color, "text-red-500");

        // Case-sensitive match key
        let (other, created) = db
            .lookup_or_create_profile(&Uuid::new_v4().to_string(), "Kenshiro", "text-blue-500")
            .unwrap();
        assert!(created);
        assert_ne!(other.id, id);
    }

    #[test]
    fn channels_are_listed_by_name() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.create_channel(&Uuid::new_v4().to_string(), "alpha", "").unwrap());
        assert!(!db.create_channel(&Uuid::new_v4().to_string(), "alpha", "").unwrap());
        let names: Vec<String> = db.list_channels().unwrap().into_iter().map(|c| c.name).collect();
        assert_eq!(names, ["alpha", "general", "huckathon-dev", "random"]);
    }

    #[test]
    fn messages_come_back_in_creation_order_with_authors() {
        let (db, user) = seeded();
        db.insert_message(&message(&user, 2, 20)).unwrap();
        db.insert_message(&message(&user, 1, 10)).unwrap();
        db.insert_message(&message(&user, 3, 10)).unwrap();

        let rows: Vec<_> = db
            .get_messages(GENERAL)
            .unwrap()
            .into_iter()
            .map(|r| r.into_model().unwrap())
            .collect();
        let ids: Vec<u128> = rows.iter().map(|m| m.id.as_u128()).collect();
        assert_eq!(ids, [1, 3, 2]);
        assert_eq!(rows[0].author.username, "kenshiro");
    }

    #[test]
    fn reaction_triple_is_unique() {
        let (db, user) = seeded();
        db.insert_message(&message(&user, 1, 10)).unwrap();
        let reaction = |id: u128| Reaction {
            id: Uuid::from_u128(id),
            message_id: Uuid::from_u128(1),
            user_id: user.parse().unwrap(),
            emoji_code: "👍".into(),
        };
        assert!(db.insert_reaction(&reaction(100)).unwrap());
        assert!(!db.insert_reaction(&reaction(101)).unwrap());

        let removed = db.delete_reaction(&Uuid::from_u128(100).to_string()).unwrap();
        assert!(removed.is_some());
        assert!(db.delete_reaction(&Uuid::from_u128(100).to_string()).unwrap().is_none());
    }

    #[test]
    fn set_reaction_is_idempotent() {
        let (db, user) = seeded();
        db.insert_message(&message(&user, 1, 10)).unwrap();
        let msg = Uuid::from_u128(1).to_string();
        let set = |id: u128, present| {
            db.set_reaction(&Uuid::from_u128(id).to_string(), &msg, &user, "🎉", present)
                .unwrap()
        };

        assert!(matches!(set(200, true), ReactionChange::Inserted(r) if r.id.as_u128() == 200));
        assert_eq!(set(201, true), ReactionChange::Unchanged);
        assert!(matches!(set(202, false), ReactionChange::Deleted(r) if r.id.as_u128() == 200));
        assert_eq!(set(203, false), ReactionChange::Unchanged);
        assert!(db.get_reactions_for_messages(&[msg]).unwrap().is_empty());
    }
}
