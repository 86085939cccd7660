use anyhow::{anyhow, bail, Result};
use chrono::Utc;
use rusqlite::{params, Connection, Row};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::db::{
    connection::{ChangeKind, Database, Table},
    helpers::{format_datetime, invalid_data, parse_datetime, to_u32},
    models::{QueueItem, QueueKind, RowOrigin},
};

/// The queued form of a record: its JSON with the row's `uid` alongside.
pub(super) fn queue_payload<T: Serialize>(uid: &str, record: &T) -> Result<Value> {
    let mut value = serde_json::to_value(record)?;
    match value.as_object_mut() {
        Some(map) => {
            map.insert("uid".into(), Value::String(uid.to_string()));
            Ok(value)
        }
        None => bail!("queued records must serialize to a JSON object"),
    }
}

/// Appends a queue row on an open connection or transaction.
pub(super) fn enqueue_on(conn: &Connection, kind: QueueKind, payload: &Value) -> Result<i64> {
    conn.execute(
        "INSERT INTO queue (kind, payload_json, created_at) VALUES (?1, ?2, ?3)",
        params![
            kind.as_str(),
            serde_json::to_string(payload)?,
            format_datetime(&Utc::now())
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn row_to_item(row: &Row) -> rusqlite::Result<QueueItem> {
    let kind: String = row.get("kind")?;
    let payload_json: String = row.get("payload_json")?;
    let created_at: String = row.get("created_at")?;
    let attempts: i64 = row.get("attempts")?;

    Ok(QueueItem {
        id: row.get("id")?,
        kind: QueueKind::parse(&kind).map_err(invalid_data)?,
        payload: serde_json::from_str(&payload_json).map_err(invalid_data)?,
        created_at: parse_datetime(&created_at, "created_at").map_err(invalid_data)?,
        attempts: to_u32(attempts, "attempts").map_err(invalid_data)?,
        last_error: row.get("last_error")?,
    })
}

impl Database {
    /// Records an intent to write `payload` remotely. A payload without a
    /// `uid` is given a fresh one so the remote put stays idempotent.
    pub async fn enqueue(&self, kind: QueueKind, mut payload: Value) -> Result<i64> {
        let map = payload
            .as_object_mut()
            .ok_or_else(|| anyhow!("queue payload must be a JSON object"))?;
        if !map.get("uid").is_some_and(Value::is_string) {
            map.insert("uid".into(), Value::String(Uuid::new_v4().to_string()));
        }

        let id = self
            .execute(move |conn| enqueue_on(conn, kind, &payload))
            .await?;
        self.publish(&[Table::Queue], ChangeKind::Inserted, RowOrigin::Local);
        Ok(id)
    }

    /// All pending items in insertion order.
    pub async fn pending_queue(&self) -> Result<Vec<QueueItem>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, kind, payload_json, created_at, attempts, last_error
                 FROM queue
                 ORDER BY id ASC",
            )?;
            let items = stmt
                .query_map([], row_to_item)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(items)
        })
        .await
    }

    /// Removes an item after the remote store accepted it. Returns whether a
    /// row was actually removed.
    pub async fn delete_queue_item(&self, id: i64) -> Result<bool> {
        let removed = self
            .execute(move |conn| Ok(conn.execute("DELETE FROM queue WHERE id = ?1", params![id])?))
            .await?;
        if removed > 0 {
            self.publish(&[Table::Queue], ChangeKind::Deleted, RowOrigin::Local);
        }
        Ok(removed > 0)
    }

    pub async fn mark_queue_failure(&self, id: i64, error: &str) -> Result<()> {
        let error = error.to_string();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE queue
                 SET attempts = attempts + 1,
                     last_error = ?1
                 WHERE id = ?2",
                params![error, id],
            )?;
            Ok(())
        })
        .await?;
        self.publish(&[Table::Queue], ChangeKind::Updated, RowOrigin::Local);
        Ok(())
    }

    pub async fn queue_len(&self) -> Result<u64> {
        self.execute(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM queue", [], |row| row.get(0))?;
            Ok(u64::try_from(count)?)
        })
        .await
    }
}
