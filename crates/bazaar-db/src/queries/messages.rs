use anyhow::Result;
use rusqlite::{Connection, Row};

use super::{OptionalExt, now_timestamp};
use crate::Database;
use crate::models::{ConversationRow, ConversationSummaryRow, MessageRow};

const MESSAGE_COLUMNS: &str =
    "id, conversation_id, sender_id, recipient_id, content, read, created_at";

impl Database {
    /// Appends a message, creating the conversation for this pair of users
    /// (and listing, if any) on first contact. Returns the stored message.
    pub fn append_message(
        &self,
        message_id: &str,
        new_conversation_id: &str,
        sender_id: &str,
        recipient_id: &str,
        listing_id: Option<&str>,
        content: &str,
    ) -> Result<MessageRow> {
        // Participants are stored ordered so (a, b) and (b, a) find the same row
        let (user_a, user_b) = if sender_id <= recipient_id {
            (sender_id, recipient_id)
        } else {
            (recipient_id, sender_id)
        };
        let now = now_timestamp();

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let existing: Option<String> = tx
                .query_row(
                    "SELECT id FROM conversations
                     WHERE user_a = ?1 AND user_b = ?2 AND listing_id IS ?3",
                    rusqlite::params![user_a, user_b, listing_id],
                    |row| row.get(0),
                )
                .optional()?;

            let conversation_id = match existing {
                Some(id) => {
                    tx.execute("UPDATE conversations SET updated_at = ?2 WHERE id = ?1", (&id, &now))?;
                    id
                }
                None => {
                    tx.execute(
                        "INSERT INTO conversations (id, user_a, user_b, listing_id, created_at, updated_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                        rusqlite::params![new_conversation_id, user_a, user_b, listing_id, now],
                    )?;
                    new_conversation_id.to_string()
                }
            };

            tx.execute(
                "INSERT INTO messages (id, conversation_id, sender_id, recipient_id, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![message_id, conversation_id, sender_id, recipient_id, content, now],
            )?;

            tx.commit()?;

            Ok(MessageRow {
                id: message_id.to_string(),
                conversation_id,
                sender_id: sender_id.to_string(),
                recipient_id: recipient_id.to_string(),
                content: content.to_string(),
                read: false,
                created_at: now.clone(),
            })
        })
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, user_a, user_b FROM conversations WHERE id = ?1",
                    [id],
                    |row| {
                        Ok(ConversationRow {
                            id: row.get(0)?,
                            user_a: row.get(1)?,
                            user_b: row.get(2)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    /// The user's conversations, most recently active first.
    pub fn conversations_for_user(&self, user_id: &str) -> Result<Vec<ConversationSummaryRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.listing_id, l.title, c.updated_at,
                        u.id, u.name, u.avatar, u.rating, u.review_count,
                        (SELECT COUNT(*) FROM messages m
                         WHERE m.conversation_id = c.id AND m.recipient_id = ?1 AND m.read = 0)
                 FROM conversations c
                 JOIN users u ON u.id = CASE WHEN c.user_a = ?1 THEN c.user_b ELSE c.user_a END
                 LEFT JOIN listings l ON l.id = c.listing_id
                 WHERE c.user_a = ?1 OR c.user_b = ?1
                 ORDER BY c.updated_at DESC, c.rowid DESC",
            )?;

            let mut rows = stmt
                .query_map([user_id], |row| {
                    Ok(ConversationSummaryRow {
                        id: row.get(0)?,
                        listing_id: row.get(1)?,
                        listing_title: row.get(2)?,
                        updated_at: row.get(3)?,
                        other_id: row.get(4)?,
                        other_name: row.get(5)?,
                        other_avatar: row.get(6)?,
                        other_rating: row.get(7)?,
                        other_review_count: row.get(8)?,
                        unread_count: row.get(9)?,
                        last_message: None,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            for row in &mut rows {
                row.last_message = query_last_message(conn, &row.id)?;
            }

            Ok(rows)
        })
    }

    /// Messages of a conversation, oldest first.
    pub fn get_conversation_messages(&self, conversation_id: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE conversation_id = ?1
                 ORDER BY created_at ASC, rowid ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([conversation_id], map_message)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Marks every message addressed to `recipient_id` in the conversation as read.
    pub fn mark_conversation_read(&self, conversation_id: &str, recipient_id: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET read = 1
                 WHERE conversation_id = ?1 AND recipient_id = ?2 AND read = 0",
                (conversation_id, recipient_id),
            )?;
            Ok(changed)
        })
    }

    pub fn unread_message_count(&self, user_id: &str) -> Result<i64> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE recipient_id = ?1 AND read = 0",
                [user_id],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }
}

fn query_last_message(conn: &Connection, conversation_id: &str) -> Result<Option<MessageRow>> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages
         WHERE conversation_id = ?1
         ORDER BY created_at DESC, rowid DESC
         LIMIT 1"
    );
    let row = conn.query_row(&sql, [conversation_id], map_message).optional()?;
    Ok(row)
}

fn map_message(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        recipient_id: row.get(3)?,
        content: row.get(4)?,
        read: row.get(5)?,
        created_at: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewUser;

    const ANN: &str = "00000000-0000-4000-8000-0000000000a1";
    const BEN: &str = "00000000-0000-4000-8000-0000000000b2";

    fn db_with_users() -> Database {
        let db = Database::open_in_memory().unwrap();
        for (id, email) in [(ANN, "ann@example.com"), (BEN, "ben@example.com")] {
            db.create_user(&NewUser {
                id,
                name: email,
                email,
                password_hash: "hash",
                location: None,
                phone: None,
            })
            .unwrap();
        }
        db
    }

    #[test]
    fn replies_reuse_the_conversation() {
        let db = db_with_users();

        let first = db.append_message("m1", "c1", ANN, BEN, None, "Is it available?").unwrap();
        let reply = db.append_message("m2", "c2", BEN, ANN, None, "Yes").unwrap();
        assert_eq!(first.conversation_id, "c1");
        assert_eq!(reply.conversation_id, "c1");
        assert!(db.get_conversation("c2").unwrap().is_none());

        let convs = db.conversations_for_user(ANN).unwrap();
        assert_eq!(convs.len(), 1);
        assert_eq!(convs[0].other_id, BEN);
        assert_eq!(convs[0].unread_count, 1);
        assert_eq!(convs[0].last_message.as_ref().unwrap().content, "Yes");
    }

    #[test]
    fn marking_read_only_touches_the_recipient() {
        let db = db_with_users();
        db.append_message("m1", "c1", ANN, BEN, None, "Hi").unwrap();
        db.append_message("m2", "c1", BEN, ANN, None, "Hello").unwrap();

        assert_eq!(db.unread_message_count(BEN).unwrap(), 1);
        assert_eq!(db.mark_conversation_read("c1", BEN).unwrap(), 1);
        assert_eq!(db.unread_message_count(BEN).unwrap(), 0);
        assert_eq!(db.unread_message_count(ANN).unwrap(), 1);

        let messages = db.get_conversation_messages("c1").unwrap();
        let contents: Vec<_> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["Hi", "Hello"]);
    }
}
