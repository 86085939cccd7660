use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use crate::db::{
    connection::{ChangeKind, Database, Table},
    helpers::format_datetime,
    models::{RowOrigin, SummaryRecord},
};

impl Database {
    /// One summary per video; a newer summary replaces the old one.
    pub async fn upsert_summary(&self, summary: SummaryRecord) -> Result<()> {
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO summaries (video_id, bullet_points_json, terms_json, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(video_id) DO UPDATE SET
                     bullet_points_json = excluded.bullet_points_json,
                     terms_json = excluded.terms_json,
                     updated_at = excluded.updated_at",
                params![
                    summary.video_id,
                    serde_json::to_string(&summary.bullet_points)?,
                    serde_json::to_string(&summary.terms)?,
                    format_datetime(&Utc::now()),
                ],
            )?;
            Ok(())
        })
        .await?;

        self.publish(&[Table::Summaries], ChangeKind::Updated, RowOrigin::Local);
        Ok(())
    }

    pub async fn get_summary(&self, video_id: &str) -> Result<Option<SummaryRecord>> {
        let video_id = video_id.to_string();
        self.execute(move |conn| {
            let row: Option<(String, String)> = conn
                .query_row(
                    "SELECT bullet_points_json, terms_json FROM summaries WHERE video_id = ?1",
                    params![video_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            let Some((points, terms)) = row else {
                return Ok(None);
            };
            Ok(Some(SummaryRecord {
                video_id,
                bullet_points: serde_json::from_str(&points)?,
                terms: serde_json::from_str(&terms)?,
            }))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::temp_database;
    use crate::db::models::{SummaryRecord, Term};

    fn summary(points: &[&str]) -> SummaryRecord {
        SummaryRecord {
            video_id: "abc".into(),
            bullet_points: points.iter().map(|point| point.to_string()).collect(),
            terms: vec![Term {
                term: "verb".into(),
                def: "an action word".into(),
            }],
        }
    }

    #[tokio::test]
    async fn upsert_keeps_one_summary_per_video() {
        let (_dir, db) = temp_database();
        assert!(db.get_summary("abc").await.unwrap().is_none());

        db.upsert_summary(summary(&["old"])).await.unwrap();
        db.upsert_summary(summary(&["new", "points"])).await.unwrap();

        let stored = db.get_summary("abc").await.unwrap().unwrap();
        assert_eq!(stored.bullet_points, vec!["new", "points"]);
        assert_eq!(stored.terms.len(), 1);
    }
}
