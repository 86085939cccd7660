use anyhow::Result;
use rusqlite::{params, Connection, Row};
use uuid::Uuid;

use super::queue::{enqueue_on, queue_payload};
use crate::db::{
    connection::{ChangeKind, Database, Table},
    helpers::{format_datetime, invalid_data, parse_datetime},
    models::{ChatRole, ChatTurn, QueueKind, RowOrigin, StoredRow},
};

fn row_to_turn(row: &Row) -> rusqlite::Result<StoredRow<ChatTurn>> {
    let timestamp: String = row.get("timestamp")?;
    let origin: String = row.get("origin")?;
    let role: String = row.get("role")?;

    Ok(StoredRow {
        id: row.get("id")?,
        uid: row.get("uid")?,
        origin: RowOrigin::parse(&origin).map_err(invalid_data)?,
        record: ChatTurn {
            video_id: row.get("video_id")?,
            role: ChatRole::parse(&role).map_err(invalid_data)?,
            text: row.get("text")?,
            timestamp: parse_datetime(&timestamp, "timestamp").map_err(invalid_data)?,
        },
    })
}

fn insert_turn(
    conn: &Connection,
    uid: &str,
    turn: &ChatTurn,
    origin: RowOrigin,
    or_ignore: bool,
) -> Result<usize> {
    let verb = if or_ignore {
        "INSERT OR IGNORE"
    } else {
        "INSERT"
    };
    let changed = conn.execute(
        &format!(
            "{verb} INTO chats (uid, video_id, role, text, timestamp, origin)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
        ),
        params![
            uid,
            turn.video_id,
            turn.role.as_str(),
            turn.text,
            format_datetime(&turn.timestamp),
            origin.as_str(),
        ],
    )?;
    Ok(changed)
}

impl Database {
    /// Stores a chat turn and queues it for the remote store.
    pub async fn record_chat_turn(&self, turn: ChatTurn) -> Result<StoredRow<ChatTurn>> {
        let stored = self
            .execute(move |conn| {
                let uid = Uuid::new_v4().to_string();
                let payload = queue_payload(&uid, &turn)?;

                let tx = conn.transaction()?;
                insert_turn(&tx, &uid, &turn, RowOrigin::Local, false)?;
                let id = tx.last_insert_rowid();
                enqueue_on(&tx, QueueKind::SaveChat, &payload)?;
                tx.commit()?;

                Ok(StoredRow {
                    id,
                    uid,
                    origin: RowOrigin::Local,
                    record: turn,
                })
            })
            .await?;

        self.publish(
            &[Table::Chats, Table::Queue],
            ChangeKind::Inserted,
            RowOrigin::Local,
        );
        Ok(stored)
    }

    /// Stores a turn that only makes sense on this device, such as an error
    /// explanation shown in place of an assistant reply.
    pub async fn record_unsynced_chat_turn(&self, turn: ChatTurn) -> Result<StoredRow<ChatTurn>> {
        let stored = self
            .execute(move |conn| {
                let uid = Uuid::new_v4().to_string();
                insert_turn(conn, &uid, &turn, RowOrigin::Local, false)?;
                Ok(StoredRow {
                    id: conn.last_insert_rowid(),
                    uid,
                    origin: RowOrigin::Local,
                    record: turn,
                })
            })
            .await?;

        self.publish(&[Table::Chats], ChangeKind::Inserted, RowOrigin::Local);
        Ok(stored)
    }

    pub async fn merge_remote_chat_turn(
        &self,
        uid: &str,
        turn: ChatTurn,
    ) -> Result<Option<StoredRow<ChatTurn>>> {
        let uid = uid.to_string();
        let merged = self
            .execute(move |conn| {
                if insert_turn(conn, &uid, &turn, RowOrigin::Remote, true)? == 0 {
                    return Ok(None);
                }
                Ok(Some(StoredRow {
                    id: conn.last_insert_rowid(),
                    uid,
                    origin: RowOrigin::Remote,
                    record: turn,
                }))
            })
            .await?;

        if merged.is_some() {
            self.publish(&[Table::Chats], ChangeKind::Inserted, RowOrigin::Remote);
        }
        Ok(merged)
    }

    /// Full conversation for a video, oldest turn first.
    pub async fn chat_history(&self, video_id: &str) -> Result<Vec<StoredRow<ChatTurn>>> {
        let video_id = video_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, uid, video_id, role, text, timestamp, origin
                 FROM chats
                 WHERE video_id = ?1
                 ORDER BY timestamp ASC, id ASC",
            )?;
            let turns = stmt
                .query_map(params![video_id], row_to_turn)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(turns)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{at, temp_database};
    use super::*;

    fn turn(role: ChatRole, text: &str, minute: u32) -> ChatTurn {
        ChatTurn {
            video_id: "abc".into(),
            role,
            text: text.into(),
            timestamp: at(14, minute),
        }
    }

    #[tokio::test]
    async fn history_is_chronological_with_roles() {
        let (_dir, db) = temp_database();
        db.record_chat_turn(turn(ChatRole::User, "what is this?", 0))
            .await
            .unwrap();
        db.record_chat_turn(turn(ChatRole::Assistant, "a lesson", 1))
            .await
            .unwrap();

        let history = db.chat_history("abc").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].record.role, ChatRole::User);
        assert_eq!(history[1].record.text, "a lesson");
        assert_eq!(db.queue_len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn unsynced_turns_stay_local() {
        let (_dir, db) = temp_database();
        db.record_unsynced_chat_turn(turn(ChatRole::Assistant, "Connection error", 0))
            .await
            .unwrap();
        assert_eq!(db.chat_history("abc").await.unwrap().len(), 1);
        assert_eq!(db.queue_len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn remote_turns_merge_once() {
        let (_dir, db) = temp_database();
        let remote = turn(ChatRole::User, "hola", 2);
        assert!(db
            .merge_remote_chat_turn("c-1", remote.clone())
            .await
            .unwrap()
            .is_some());
        assert!(db
            .merge_remote_chat_turn("c-1", remote)
            .await
            .unwrap()
            .is_none());
        let history = db.chat_history("abc").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].origin, RowOrigin::Remote);
        assert_eq!(db.queue_len().await.unwrap(), 0);
    }
}
