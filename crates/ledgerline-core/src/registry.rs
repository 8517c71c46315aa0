//! Model registry: the single owner of loaded classifiers
//!
//! The first caller loads the serving models from the store and publishes
//! them; concurrent callers wait on the same [`OnceCell`]. After that, the
//! published `Arc`s are only ever replaced wholesale by [`ModelRegistry::refresh`],
//! so a batch holding a [`RegistrySnapshot`] never sees a torn model.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::OnceCell;
use tracing::{error, info, warn};

use crate::classifier::Classifier;
use crate::db::{Database, StatusChange};
use crate::error::{Error, Result};
use crate::models::{ModelStatus, ModelVersion, RetiredReason, RolloutEventKind};

/// A loaded classifier with the version metadata it was published under
#[derive(Debug)]
pub struct ServingModel {
    pub version: ModelVersion,
    pub classifier: Arc<Classifier>,
}

impl ServingModel {
    pub fn id(&self) -> i64 {
        self.version.id
    }
}

/// Models in effect for one batch
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    pub active: Option<Arc<ServingModel>>,
    /// Shadow or partial candidate
    pub candidate: Option<Arc<ServingModel>>,
}

#[derive(Debug, Default)]
struct Slots {
    active: RwLock<Option<Arc<ServingModel>>>,
    candidate: RwLock<Option<Arc<ServingModel>>>,
}

pub struct ModelRegistry {
    db: Database,
    slots: OnceCell<Slots>,
}

impl ModelRegistry {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            slots: OnceCell::new(),
        }
    }

    async fn slots(&self) -> Result<&Slots> {
        self.slots
            .get_or_try_init(|| async {
                let db = self.db.clone();
                let (active, candidate) =
                    tokio::task::spawn_blocking(move || load_serving(&db, &HashMap::new())).await??;
                log_published(&active, &candidate);
                Ok::<_, Error>(Slots {
                    active: RwLock::new(active),
                    candidate: RwLock::new(candidate),
                })
            })
            .await
    }

    /// Models to use for one batch, loading them on first use
    ///
    /// A store failure during the first load leaves the registry empty
    /// (rules-only classification) and is retried on the next call.
    pub async fn snapshot(&self) -> RegistrySnapshot {
        match self.slots().await {
            Ok(slots) => RegistrySnapshot {
                active: read_slot(&slots.active),
                candidate: read_slot(&slots.candidate),
            },
            Err(e) => {
                error!("Model registry unavailable, classifying with rules only: {}", e);
                RegistrySnapshot::default()
            }
        }
    }

    /// Re-read serving state from the store and swap the published models
    ///
    /// Classifiers that are already loaded are reused; only their metadata
    /// (status, rollout percent) is refreshed.
    pub async fn refresh(&self) -> Result<RegistrySnapshot> {
        let slots = self.slots().await?;

        let mut loaded: HashMap<i64, Arc<Classifier>> = HashMap::new();
        for slot in [&slots.active, &slots.candidate] {
            if let Some(model) = read_slot(slot) {
                loaded.insert(model.id(), model.classifier.clone());
            }
        }

        let db = self.db.clone();
        let (active, candidate) =
            tokio::task::spawn_blocking(move || load_serving(&db, &loaded)).await??;

        log_published(&active, &candidate);
        write_slot(&slots.active, active.clone());
        write_slot(&slots.candidate, candidate.clone());
        Ok(RegistrySnapshot { active, candidate })
    }
}

fn read_slot(slot: &RwLock<Option<Arc<ServingModel>>>) -> Option<Arc<ServingModel>> {
    match slot.read() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

fn write_slot(slot: &RwLock<Option<Arc<ServingModel>>>, value: Option<Arc<ServingModel>>) {
    let mut guard = match slot.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    *guard = value;
}

fn log_published(active: &Option<Arc<ServingModel>>, candidate: &Option<Arc<ServingModel>>) {
    info!(
        "Serving models: active={}, candidate={}",
        active
            .as_ref()
            .map(|m| format!("v{}", m.id()))
            .unwrap_or_else(|| "none".to_string()),
        candidate
            .as_ref()
            .map(|m| format!("v{} ({} {}%)", m.id(), m.version.status, m.version.rollout_percent))
            .unwrap_or_else(|| "none".to_string()),
    );
}

type Serving = (Option<Arc<ServingModel>>, Option<Arc<ServingModel>>);

/// Load the active and candidate models from the store
///
/// An active artifact that fails to load is retired and the last superseded
/// version is reactivated in its place; a candidate that fails to load is
/// retired.
fn load_serving(db: &Database, loaded: &HashMap<i64, Arc<Classifier>>) -> Result<Serving> {
    let mut active = None;
    while let Some(version) = db.active_model_version()? {
        match load_classifier(db, &version, loaded) {
            Ok(classifier) => {
                active = Some(Arc::new(ServingModel {
                    version,
                    classifier,
                }));
                break;
            }
            Err(e) => {
                warn!("Active model v{} failed to load: {}", version.id, e);
                let mut changes = vec![StatusChange::retire(
                    &version,
                    RolloutEventKind::LoadFailed,
                    RetiredReason::LoadFailure,
                    Some(e.to_string()),
                )];
                if let Some(previous) = db.last_superseded_model_version()? {
                    warn!("Reverting to last-known-good model v{}", previous.id);
                    changes.push(StatusChange {
                        model_version: previous.id,
                        from_status: previous.status,
                        kind: RolloutEventKind::RolledBack,
                        to_status: ModelStatus::Active,
                        rollout_percent: 100,
                        retired_reason: None,
                        reason: Some(format!("v{} failed to load", version.id)),
                    });
                }
                db.apply_status_changes(&changes)?;
            }
        }
    }

    let candidate = match db.candidate_model_version()? {
        Some(version) => match load_classifier(db, &version, loaded) {
            Ok(classifier) => Some(Arc::new(ServingModel {
                version,
                classifier,
            })),
            Err(e) => {
                warn!("Candidate model v{} failed to load: {}", version.id, e);
                db.apply_status_changes(&[StatusChange::retire(
                    &version,
                    RolloutEventKind::LoadFailed,
                    RetiredReason::LoadFailure,
                    Some(e.to_string()),
                )])?;
                None
            }
        },
        None => None,
    };

    Ok((active, candidate))
}

fn load_classifier(
    db: &Database,
    version: &ModelVersion,
    loaded: &HashMap<i64, Arc<Classifier>>,
) -> Result<Arc<Classifier>> {
    if let Some(classifier) = loaded.get(&version.id) {
        return Ok(classifier.clone());
    }
    let artifact = db.model_artifact(version.id)?;
    Ok(Arc::new(Classifier::from_json(&artifact)?))
}
