//! Model status transitions and the rollout event log

use rusqlite::{params, OptionalExtension, TransactionBehavior};

use super::{now_string, parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{ModelStatus, ModelVersion, RetiredReason, RolloutEvent, RolloutEventKind};

/// One status change to apply to a model version
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub model_version: i64,
    /// Status the version must still hold for the change to apply
    pub from_status: ModelStatus,
    pub kind: RolloutEventKind,
    pub to_status: ModelStatus,
    pub rollout_percent: u8,
    /// Required when `to_status` is retired
    pub retired_reason: Option<RetiredReason>,
    pub reason: Option<String>,
}

impl StatusChange {
    pub fn retire(
        version: &ModelVersion,
        kind: RolloutEventKind,
        reason: RetiredReason,
        detail: Option<String>,
    ) -> Self {
        Self {
            model_version: version.id,
            from_status: version.status,
            kind,
            to_status: ModelStatus::Retired,
            rollout_percent: 0,
            retired_reason: Some(reason),
            reason: Some(detail.unwrap_or_else(|| reason.as_str().to_string())),
        }
    }
}

impl Database {
    /// Apply status changes atomically, appending one event per change
    ///
    /// Every change is checked against its expected `from_status`; if any
    /// version has moved on, nothing is applied.
    pub fn apply_status_changes(&self, changes: &[StatusChange]) -> Result<Vec<RolloutEvent>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = now_string();
        let mut events = Vec::with_capacity(changes.len());

        for change in changes {
            let from: Option<String> = tx
                .query_row(
                    "SELECT status FROM model_versions WHERE id = ?",
                    params![change.model_version],
                    |row| row.get(0),
                )
                .optional()?;
            let from = from.ok_or_else(|| {
                Error::NotFound(format!("model version {}", change.model_version))
            })?;
            let conflict = || Error::TransitionConflict {
                version: change.model_version,
                expected: change.from_status.to_string(),
                actual: from.clone(),
            };
            if from != change.from_status.as_str() {
                return Err(conflict());
            }

            let updated = if change.to_status == ModelStatus::Retired {
                tx.execute(
                    "UPDATE model_versions SET status = 'retired', rollout_percent = 0, \
                     retired_reason = ?1, retired_at = ?2 WHERE id = ?3 AND status = ?4",
                    params![
                        change.retired_reason.map(|r| r.as_str()),
                        now,
                        change.model_version,
                        change.from_status.as_str(),
                    ],
                )?
            } else {
                tx.execute(
                    "UPDATE model_versions SET status = ?1, rollout_percent = ?2, \
                     retired_reason = NULL, retired_at = NULL WHERE id = ?3 AND status = ?4",
                    params![
                        change.to_status.as_str(),
                        change.rollout_percent,
                        change.model_version,
                        change.from_status.as_str(),
                    ],
                )?
            };
            if updated != 1 {
                return Err(conflict());
            }

            tx.execute(
                r#"
                INSERT INTO rollout_events (model_version, kind, from_status, to_status, rollout_percent, reason, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
                params![
                    change.model_version,
                    change.kind.as_str(),
                    from,
                    change.to_status.as_str(),
                    change.rollout_percent,
                    change.reason,
                    now,
                ],
            )?;

            events.push(RolloutEvent {
                id: tx.last_insert_rowid(),
                model_version: change.model_version,
                kind: change.kind,
                from_status: from.parse().ok(),
                to_status: change.to_status,
                rollout_percent: change.rollout_percent,
                reason: change.reason.clone(),
                created_at: parse_datetime(&now),
            });
        }

        tx.commit()?;
        Ok(events)
    }

    /// Rollout events, newest first
    pub fn list_rollout_events(&self, limit: i64) -> Result<Vec<RolloutEvent>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, model_version, kind, from_status, to_status, rollout_percent, reason, created_at
            FROM rollout_events
            ORDER BY id DESC
            LIMIT ?
            "#,
        )?;
        let events = stmt
            .query_map(params![limit], |row| {
                let kind: String = row.get(2)?;
                let from_status: Option<String> = row.get(3)?;
                let to_status: String = row.get(4)?;
                let created_at: String = row.get(7)?;
                Ok(RolloutEvent {
                    id: row.get(0)?,
                    model_version: row.get(1)?,
                    kind: kind.parse().unwrap_or(RolloutEventKind::Advanced),
                    from_status: from_status.and_then(|s| s.parse().ok()),
                    to_status: to_status.parse().unwrap_or(ModelStatus::Retired),
                    rollout_percent: row.get(5)?,
                    reason: row.get(6)?,
                    created_at: parse_datetime(&created_at),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(events)
    }
}
