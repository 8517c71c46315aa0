//! Prediction history, current predictions and applied categories

use std::collections::HashMap;

use rusqlite::{params, OptionalExtension, Row};

use super::{now_string, parse_datetime, Database};
use crate::error::Result;
use crate::models::{
    CategorizationResult, CategoryId, ModelOutput, Outcome, Prediction, PredictionSource,
};

/// A result plus the feature snapshot it was made from
#[derive(Debug, Clone)]
pub struct PredictionRecord {
    pub result: CategorizationResult,
    /// Classifier tokens
    pub text: String,
    pub fingerprint: String,
}

const PREDICTION_COLUMNS: &str = "p.id, p.transaction_id, p.category_id, p.confidence, \
     p.alternatives, p.model_version, p.source, p.outcome, p.rule_id, p.text, p.fingerprint, p.created_at";

fn prediction_from_row(row: &Row<'_>) -> rusqlite::Result<Prediction> {
    let alternatives: String = row.get(4)?;
    let source: Option<String> = row.get(6)?;
    let outcome: String = row.get(7)?;
    let created_at: String = row.get(11)?;

    Ok(Prediction {
        id: row.get(0)?,
        transaction_id: row.get(1)?,
        category_id: row.get(2)?,
        confidence: row.get(3)?,
        alternatives: serde_json::from_str(&alternatives).unwrap_or_default(),
        model_version: row.get(5)?,
        source: source.and_then(|s| s.parse::<PredictionSource>().ok()),
        outcome: outcome.parse().unwrap_or(Outcome::Unresolved),
        rule_id: row.get(8)?,
        text: row.get(9)?,
        fingerprint: row.get(10)?,
        created_at: parse_datetime(&created_at),
    })
}

impl Database {
    /// Persist one processed chunk atomically
    ///
    /// Appends to the prediction history, moves each transaction's current
    /// prediction, records AUTO_APPLIED categories (never overriding a
    /// category confirmed by feedback), and logs raw model outputs.
    pub fn save_chunk(&self, records: &[PredictionRecord], outputs: &[ModelOutput]) -> Result<()> {
        if records.is_empty() && outputs.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let now = now_string();

        {
            let mut insert_prediction = tx.prepare(
                r#"
                INSERT INTO predictions (
                    transaction_id, category_id, confidence, alternatives, model_version,
                    source, outcome, rule_id, text, fingerprint, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                "#,
            )?;
            let mut set_current = tx.prepare(
                r#"
                INSERT INTO current_predictions (transaction_id, prediction_id) VALUES (?1, ?2)
                ON CONFLICT(transaction_id) DO UPDATE SET prediction_id = excluded.prediction_id
                "#,
            )?;
            let mut apply = tx.prepare(
                r#"
                INSERT INTO applied_categories (transaction_id, category_id, source, applied_at)
                VALUES (?1, ?2, 'auto', ?3)
                ON CONFLICT(transaction_id) DO UPDATE SET
                    category_id = excluded.category_id,
                    applied_at = excluded.applied_at
                WHERE applied_categories.source != 'feedback'
                "#,
            )?;

            for record in records {
                let r = &record.result;
                insert_prediction.execute(params![
                    r.transaction_id,
                    r.category_id,
                    r.confidence,
                    serde_json::to_string(&r.alternatives)?,
                    r.model_version,
                    r.source.map(|s| s.as_str()),
                    r.outcome.as_str(),
                    r.rule_id,
                    record.text,
                    record.fingerprint,
                    now,
                ])?;
                let prediction_id = tx.last_insert_rowid();
                set_current.execute(params![r.transaction_id, prediction_id])?;

                if r.outcome == Outcome::AutoApplied {
                    if let Some(category_id) = r.category_id {
                        apply.execute(params![r.transaction_id, category_id, now])?;
                    }
                }
            }

            let mut insert_output = tx.prepare(
                r#"
                INSERT INTO model_outputs (
                    transaction_id, model_version, category_id, confidence, latency_us, served, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )?;
            for output in outputs {
                insert_output.execute(params![
                    output.transaction_id,
                    output.model_version,
                    output.category_id,
                    output.confidence,
                    output.latency_us,
                    output.served,
                    now,
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    pub fn current_prediction(&self, transaction_id: &str) -> Result<Option<Prediction>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM current_predictions c JOIN predictions p ON p.id = c.prediction_id \
             WHERE c.transaction_id = ?",
            PREDICTION_COLUMNS
        );
        conn.query_row(&sql, params![transaction_id], prediction_from_row)
            .optional()
            .map_err(Into::into)
    }

    /// Every prediction made for a transaction, oldest first
    pub fn prediction_history(&self, transaction_id: &str) -> Result<Vec<Prediction>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM predictions p WHERE p.transaction_id = ? ORDER BY p.id",
            PREDICTION_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let predictions = stmt
            .query_map(params![transaction_id], prediction_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(predictions)
    }

    /// Current predictions waiting for review, newest first
    pub fn review_queue(&self, limit: i64) -> Result<Vec<Prediction>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM current_predictions c JOIN predictions p ON p.id = c.prediction_id \
             WHERE p.outcome = 'QUEUED_FOR_REVIEW' ORDER BY p.id DESC LIMIT ?",
            PREDICTION_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let predictions = stmt
            .query_map(params![limit], prediction_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(predictions)
    }

    pub fn applied_category(&self, transaction_id: &str) -> Result<Option<CategoryId>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT category_id FROM applied_categories WHERE transaction_id = ?",
            params![transaction_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(Into::into)
    }

    /// Latest output of `model_version` for each transaction that received
    /// feedback after `feedback_watermark`
    pub fn outputs_for_feedback(
        &self,
        model_version: i64,
        feedback_watermark: i64,
    ) -> Result<HashMap<String, CategoryId>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT o.transaction_id, o.category_id
            FROM model_outputs o
            WHERE o.model_version = ?1
              AND o.transaction_id IN (SELECT transaction_id FROM feedback WHERE id > ?2)
            ORDER BY o.id
            "#,
        )?;
        let rows = stmt.query_map(params![model_version, feedback_watermark], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, CategoryId>(1)?))
        })?;

        let mut latest = HashMap::new();
        for row in rows {
            let (transaction_id, category_id) = row?;
            latest.insert(transaction_id, category_id);
        }
        Ok(latest)
    }
}
