use rusqlite::{params, Connection};

use crate::database::{now_timestamp, parse_timestamp, Database};
use crate::error::{Result, StoreError};
use crate::models::ChatMessage;

const MESSAGE_COLUMNS: &str = "id, sender, receiver, body, timestamp, is_read";

impl Database {
    /// Persist a message. The body is stored verbatim.
    pub fn store_message(&self, sender: &str, receiver: &str, body: &str) -> Result<ChatMessage> {
        if sender.eq_ignore_ascii_case(receiver) {
            return Err(StoreError::Invalid("cannot message yourself".into()));
        }

        let conn = self.conn()?;
        let timestamp = now_timestamp();
        conn.execute(
            "INSERT INTO chat_messages (sender, receiver, body, timestamp, is_read)
             VALUES (?1, ?2, ?3, ?4, 0)",
            params![sender, receiver, body, timestamp],
        )?;
        let id = conn.last_insert_rowid();

        tracing::debug!(id, from = %sender, to = %receiver, "stored message");

        Ok(ChatMessage {
            id,
            sender: sender.to_string(),
            receiver: receiver.to_string(),
            body: body.to_string(),
            timestamp: parse_timestamp(4, &timestamp)?,
            is_read: false,
        })
    }

    /// Unread messages addressed to `receiver`, oldest first. Nothing is
    /// marked read.
    pub fn unread_messages(&self, receiver: &str) -> Result<Vec<ChatMessage>> {
        select_unread(&self.conn()?, receiver, None)
    }

    /// Fetch the unread messages for `receiver` (optionally only those from
    /// `from`) and mark exactly those read, in one transaction.
    pub fn take_unread(&self, receiver: &str, from: Option<&str>) -> Result<Vec<ChatMessage>> {
        self.write_tx(|tx| {
            let mut messages = select_unread(tx, receiver, from)?;
            {
                let mut stmt = tx.prepare("UPDATE chat_messages SET is_read = 1 WHERE id = ?1")?;
                for message in &mut messages {
                    stmt.execute(params![message.id])?;
                    message.is_read = true;
                }
            }
            Ok(messages)
        })
    }

    /// The last `limit` messages exchanged between `a` and `b`, in
    /// `(timestamp, id)` order. A limit of 0 returns the whole conversation.
    pub fn chat_history(&self, a: &str, b: &str, limit: u32) -> Result<Vec<ChatMessage>> {
        let limit: i64 = if limit == 0 { -1 } else { i64::from(limit) };
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM (
                 SELECT {MESSAGE_COLUMNS} FROM chat_messages
                 WHERE (sender = ?1 AND receiver = ?2) OR (sender = ?2 AND receiver = ?1)
                 ORDER BY timestamp DESC, id DESC
                 LIMIT ?3
             )
             ORDER BY timestamp ASC, id ASC"
        ))?;
        let rows = stmt.query_map(params![a, b, limit], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Mark messages to `receiver` read, optionally only those from `from`.
    /// Returns how many changed; repeating the call changes nothing.
    pub fn mark_read(&self, receiver: &str, from: Option<&str>) -> Result<usize> {
        let conn = self.conn()?;
        let affected = match from {
            Some(sender) => conn.execute(
                "UPDATE chat_messages SET is_read = 1
                 WHERE receiver = ?1 AND sender = ?2 AND is_read = 0",
                params![receiver, sender],
            )?,
            None => conn.execute(
                "UPDATE chat_messages SET is_read = 1 WHERE receiver = ?1 AND is_read = 0",
                params![receiver],
            )?,
        };
        Ok(affected)
    }

    /// Everyone `user` has exchanged messages with, most recent first.
    pub fn conversation_partners(&self, user: &str) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT partner FROM (
                 SELECT CASE WHEN sender = ?1 THEN receiver ELSE sender END AS partner,
                        MAX(timestamp) AS last_seen
                 FROM chat_messages
                 WHERE sender = ?1 OR receiver = ?1
                 GROUP BY partner
             )
             ORDER BY last_seen DESC",
        )?;
        let rows = stmt.query_map(params![user], |row| row.get::<_, String>(0))?;

        let mut partners = Vec::new();
        for row in rows {
            partners.push(row?);
        }
        Ok(partners)
    }

    pub fn has_unread_from(&self, receiver: &str, sender: &str) -> Result<bool> {
        let exists = self.conn()?.query_row(
            "SELECT EXISTS(
                 SELECT 1 FROM chat_messages
                 WHERE receiver = ?1 AND sender = ?2 AND is_read = 0
             )",
            params![receiver, sender],
            |row| row.get(0),
        )?;
        Ok(exists)
    }
}

fn select_unread(conn: &Connection, receiver: &str, from: Option<&str>) -> Result<Vec<ChatMessage>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM chat_messages
         WHERE receiver = ?1 AND is_read = 0 AND (?2 IS NULL OR sender = ?2)
         ORDER BY timestamp ASC, id ASC"
    ))?;
    let rows = stmt.query_map(params![receiver, from], row_to_message)?;

    let mut messages = Vec::new();
    for row in rows {
        messages.push(row?);
    }
    Ok(messages)
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatMessage> {
    let timestamp: String = row.get(4)?;
    Ok(ChatMessage {
        id: row.get(0)?,
        sender: row.get(1)?,
        receiver: row.get(2)?,
        body: row.get(3)?,
        timestamp: parse_timestamp(4, &timestamp)?,
        is_read: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_support::temp_db;

    #[test]
    fn test_history_contains_exactly_the_pair() {
        let (_dir, db) = temp_db();
        db.store_message("alice", "bob", "hi bob").unwrap();
        db.store_message("carol", "bob", "unrelated").unwrap();
        db.store_message("bob", "alice", "hi alice").unwrap();
        db.store_message("alice", "carol", "also unrelated").unwrap();
        db.store_message("alice", "bob", "how much?").unwrap();

        let history = db.chat_history("bob", "alice", 0).unwrap();
        let bodies: Vec<_> = history.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["hi bob", "hi alice", "how much?"]);
        assert!(history
            .windows(2)
            .all(|w| (w[0].timestamp, w[0].id) < (w[1].timestamp, w[1].id)));
    }

    #[test]
    fn test_history_limit_keeps_the_newest() {
        let (_dir, db) = temp_db();
        for i in 0..5 {
            db.store_message("alice", "bob", &format!("m{i}")).unwrap();
        }
        let history = db.chat_history("alice", "bob", 2).unwrap();
        let bodies: Vec<_> = history.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["m3", "m4"]);
    }

    #[test]
    fn test_take_unread_returns_each_message_once() {
        let (_dir, db) = temp_db();
        db.store_message("alice", "bob", "one").unwrap();
        db.store_message("carol", "bob", "two").unwrap();

        let from_alice = db.take_unread("bob", Some("alice")).unwrap();
        assert_eq!(from_alice.len(), 1);
        assert!(from_alice[0].is_read);

        let rest = db.take_unread("bob", None).unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].sender, "carol");

        assert!(db.take_unread("bob", None).unwrap().is_empty());
    }

    #[test]
    fn test_mark_read_is_idempotent() {
        let (_dir, db) = temp_db();
        db.store_message("alice", "bob", "one").unwrap();
        db.store_message("alice", "bob", "two").unwrap();
        assert!(db.has_unread_from("bob", "alice").unwrap());

        assert_eq!(db.mark_read("bob", Some("alice")).unwrap(), 2);
        assert_eq!(db.mark_read("bob", Some("alice")).unwrap(), 0);
        assert_eq!(db.mark_read("bob", None).unwrap(), 0);
        assert!(!db.has_unread_from("bob", "alice").unwrap());
        assert!(db.unread_messages("bob").unwrap().is_empty());
    }

    #[test]
    fn test_conversation_partners() {
        let (_dir, db) = temp_db();
        db.store_message("alice", "bob", "hi").unwrap();
        db.store_message("carol", "alice", "hey").unwrap();
        db.store_message("bob", "alice", "yo").unwrap();

        let partners = db.conversation_partners("alice").unwrap();
        assert_eq!(partners, vec!["bob".to_string(), "carol".to_string()]);
        assert!(db.conversation_partners("dave").unwrap().is_empty());
    }

    #[test]
    fn test_self_message_rejected() {
        let (_dir, db) = temp_db();
        assert!(matches!(
            db.store_message("alice", "Alice", "me"),
            Err(StoreError::Invalid(_))
        ));
    }
}
