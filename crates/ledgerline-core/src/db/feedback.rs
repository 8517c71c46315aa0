//! Feedback log operations

use rusqlite::{params, Row};

use super::{now_string, parse_datetime, Database};
use crate::error::Result;
use crate::models::{Feedback, FeedbackStats, NewFeedback};

const FEEDBACK_COLUMNS: &str = "id, transaction_id, predicted_category_id, corrected_category_id, \
     accepted, text, created_at";

fn feedback_from_row(row: &Row<'_>) -> rusqlite::Result<Feedback> {
    let created_at: String = row.get(6)?;
    Ok(Feedback {
        id: row.get(0)?,
        transaction_id: row.get(1)?,
        predicted_category_id: row.get(2)?,
        corrected_category_id: row.get(3)?,
        accepted: row.get(4)?,
        text: row.get(5)?,
        created_at: parse_datetime(&created_at),
    })
}

impl Database {
    /// Append a feedback entry
    ///
    /// When the entry confirms a label, that category becomes the applied
    /// category for the transaction and takes precedence over later
    /// automatic applications.
    pub fn append_feedback(&self, feedback: &NewFeedback) -> Result<Feedback> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let now = now_string();

        tx.execute(
            r#"
            INSERT INTO feedback (
                transaction_id, predicted_category_id, corrected_category_id, accepted, text, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                feedback.transaction_id,
                feedback.predicted_category_id,
                feedback.corrected_category_id,
                feedback.accepted,
                feedback.text,
                now,
            ],
        )?;
        let id = tx.last_insert_rowid();

        let stored = Feedback {
            id,
            transaction_id: feedback.transaction_id.clone(),
            predicted_category_id: feedback.predicted_category_id,
            corrected_category_id: feedback.corrected_category_id,
            accepted: feedback.accepted,
            text: feedback.text.clone(),
            created_at: parse_datetime(&now),
        };

        if let Some(category_id) = stored.label() {
            tx.execute(
                r#"
                INSERT INTO applied_categories (transaction_id, category_id, source, applied_at)
                VALUES (?1, ?2, 'feedback', ?3)
                ON CONFLICT(transaction_id) DO UPDATE SET
                    category_id = excluded.category_id,
                    source = 'feedback',
                    applied_at = excluded.applied_at
                "#,
                params![stored.transaction_id, category_id, now],
            )?;
        }

        tx.commit()?;
        Ok(stored)
    }

    /// Feedback entries, newest first
    pub fn list_feedback(&self, limit: i64, offset: i64) -> Result<Vec<Feedback>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM feedback ORDER BY id DESC LIMIT ? OFFSET ?",
            FEEDBACK_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let feedback = stmt
            .query_map(params![limit, offset], feedback_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(feedback)
    }

    /// Entries with id above `watermark`, oldest first
    pub fn feedback_after(&self, watermark: i64) -> Result<Vec<Feedback>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM feedback WHERE id > ? ORDER BY id", FEEDBACK_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let feedback = stmt
            .query_map(params![watermark], feedback_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(feedback)
    }

    pub fn count_feedback_after(&self, watermark: i64) -> Result<i64> {
        let conn = self.conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM feedback WHERE id > ?",
            params![watermark],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn max_feedback_id(&self) -> Result<i64> {
        let conn = self.conn()?;
        let id = conn.query_row("SELECT COALESCE(MAX(id), 0) FROM feedback", [], |row| {
            row.get(0)
        })?;
        Ok(id)
    }

    pub fn feedback_stats(&self) -> Result<FeedbackStats> {
        let conn = self.conn()?;
        let (total, accepted, corrected): (i64, i64, i64) = conn.query_row(
            r#"
            SELECT
                COUNT(*),
                COALESCE(SUM(CASE WHEN accepted THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN corrected_category_id IS NOT NULL
                    AND corrected_category_id IS NOT predicted_category_id THEN 1 ELSE 0 END), 0)
            FROM feedback
            "#,
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        drop(conn);

        let watermark = self
            .latest_model_version()?
            .map(|m| m.feedback_watermark)
            .unwrap_or(0);

        Ok(FeedbackStats {
            total,
            accepted,
            corrected,
            since_latest_model: self.count_feedback_after(watermark)?,
        })
    }
}
