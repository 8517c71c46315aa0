//! Model version storage

use rusqlite::{params, OptionalExtension, Row};
use tracing::info;

use super::{now_string, parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{ModelStatus, ModelVersion, NewModelVersion, RetiredReason, RolloutEventKind};

pub(super) const MODEL_COLUMNS: &str = "id, trained_at, training_sample_count, validation_accuracy, \
     baseline_accuracy, status, rollout_percent, feedback_watermark, retired_reason, retired_at";

pub(super) fn model_from_row(row: &Row<'_>) -> rusqlite::Result<ModelVersion> {
    let trained_at: String = row.get(1)?;
    let status: String = row.get(5)?;
    let retired_reason: Option<String> = row.get(8)?;
    let retired_at: Option<String> = row.get(9)?;

    Ok(ModelVersion {
        id: row.get(0)?,
        trained_at: parse_datetime(&trained_at),
        training_sample_count: row.get(2)?,
        validation_accuracy: row.get(3)?,
        baseline_accuracy: row.get(4)?,
        status: status.parse().unwrap_or(ModelStatus::Retired),
        rollout_percent: row.get(6)?,
        feedback_watermark: row.get(7)?,
        retired_reason: retired_reason.and_then(|r| r.parse::<RetiredReason>().ok()),
        retired_at: retired_at.map(|s| parse_datetime(&s)),
    })
}

impl Database {
    /// Register a new shadow candidate
    ///
    /// Any earlier unpromoted candidate is retired as replaced, so there is
    /// at most one candidate at a time.
    pub fn insert_candidate_model(&self, new: &NewModelVersion) -> Result<ModelVersion> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let now = now_string();

        let replaced: Vec<(i64, String, u8)> = {
            let mut stmt = tx.prepare(
                "SELECT id, status, rollout_percent FROM model_versions \
                 WHERE status IN ('shadow', 'partial')",
            )?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };
        for (id, status, percent) in &replaced {
            tx.execute(
                "UPDATE model_versions SET status = 'retired', rollout_percent = 0, \
                 retired_reason = ?1, retired_at = ?2 WHERE id = ?3",
                params![RetiredReason::Replaced.as_str(), now, id],
            )?;
            tx.execute(
                r#"
                INSERT INTO rollout_events (model_version, kind, from_status, to_status, rollout_percent, reason, created_at)
                VALUES (?1, ?2, ?3, 'retired', ?4, ?5, ?6)
                "#,
                params![
                    id,
                    RolloutEventKind::Retired.as_str(),
                    status,
                    percent,
                    RetiredReason::Replaced.as_str(),
                    now,
                ],
            )?;
        }

        tx.execute(
            r#"
            INSERT INTO model_versions (
                trained_at, training_sample_count, validation_accuracy, baseline_accuracy,
                status, rollout_percent, feedback_watermark, artifact
            ) VALUES (?1, ?2, ?3, ?4, 'shadow', 0, ?5, ?6)
            "#,
            params![
                now,
                new.training_sample_count,
                new.validation_accuracy,
                new.baseline_accuracy,
                new.feedback_watermark,
                new.artifact,
            ],
        )?;
        let id = tx.last_insert_rowid();

        tx.execute(
            r#"
            INSERT INTO rollout_events (model_version, kind, from_status, to_status, rollout_percent, reason, created_at)
            VALUES (?1, ?2, NULL, 'shadow', 0, NULL, ?3)
            "#,
            params![id, RolloutEventKind::Created.as_str(), now],
        )?;

        tx.commit()?;
        info!(
            "Registered model v{} as shadow ({} samples, validation accuracy {:.3})",
            id, new.training_sample_count, new.validation_accuracy
        );

        self.get_model_version(id)
    }

    pub fn get_model_version(&self, id: i64) -> Result<ModelVersion> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM model_versions WHERE id = ?", MODEL_COLUMNS);
        conn.query_row(&sql, params![id], model_from_row)
            .optional()?
            .ok_or_else(|| Error::NotFound(format!("model version {}", id)))
    }

    /// All versions, newest first
    pub fn list_model_versions(&self) -> Result<Vec<ModelVersion>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM model_versions ORDER BY id DESC", MODEL_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let models = stmt
            .query_map([], model_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(models)
    }

    fn model_where(&self, clause: &str) -> Result<Option<ModelVersion>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM model_versions WHERE {} ORDER BY id DESC LIMIT 1",
            MODEL_COLUMNS, clause
        );
        conn.query_row(&sql, [], model_from_row)
            .optional()
            .map_err(Into::into)
    }

    pub fn active_model_version(&self) -> Result<Option<ModelVersion>> {
        self.model_where("status = 'active'")
    }

    /// The version under evaluation (shadow or partial), if any
    pub fn candidate_model_version(&self) -> Result<Option<ModelVersion>> {
        self.model_where("status IN ('shadow', 'partial')")
    }

    pub fn latest_model_version(&self) -> Result<Option<ModelVersion>> {
        self.model_where("1 = 1")
    }

    /// Most recently superseded version (the last-known-good fallback)
    pub fn last_superseded_model_version(&self) -> Result<Option<ModelVersion>> {
        self.model_where("status = 'retired' AND retired_reason = 'superseded'")
    }

    pub fn model_artifact(&self, id: i64) -> Result<String> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT artifact FROM model_versions WHERE id = ?",
            params![id],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| Error::NotFound(format!("model version {}", id)))
    }
}
