//! The work-order store boundary (§6): "writes Scene Score and
//! Enhancement Outcome records keyed by scene_id; read-your-write not
//! required by the core."
//!
//! Like [`crate::settings::SettingsStore`], this is an external
//! collaborator the core calls out to rather than owns. Durability,
//! indexing, and any read path belong to the editor's own persistence
//! layer; the core only needs somewhere to hand a finished record after
//! `analyze`/`enhance` complete. A failing write is logged and does not
//! fail the enclosing RPC call — recording is a side effect, not part of
//! the result the caller is waiting on.

use crate::model::{EnhancementOutcome, SceneScore};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

/// Errors raised by a `WorkOrderStore` implementation.
#[derive(Debug, thiserror::Error)]
pub enum WorkOrderError {
    #[error("failed to write work order for scene '{scene_id}': {message}")]
    Write { scene_id: String, message: String },
}

pub type WorkOrderResult<T> = Result<T, WorkOrderError>;

/// The external work-order persistence boundary consumed by the core.
/// Writes are fire-and-forget from the core's perspective: no op on
/// [`crate::error::CraftResult`] depends on a successful write here.
pub trait WorkOrderStore: Send + Sync {
    fn write_score(&self, scene_id: &str, score: &SceneScore) -> WorkOrderResult<()>;
    fn write_enhancement(&self, scene_id: &str, outcome: &EnhancementOutcome) -> WorkOrderResult<()>;
}

/// A non-durable in-memory store, useful for tests and for callers that
/// have not wired an editor-owned backing store yet.
#[derive(Default)]
pub struct InMemoryWorkOrderStore {
    scores: RwLock<HashMap<String, SceneScore>>,
    enhancements: RwLock<HashMap<String, EnhancementOutcome>>,
}

impl InMemoryWorkOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_score(&self, scene_id: &str) -> Option<SceneScore> {
        self.scores.read().unwrap().get(scene_id).cloned()
    }

    pub fn get_enhancement(&self, scene_id: &str) -> Option<EnhancementOutcome> {
        self.enhancements.read().unwrap().get(scene_id).cloned()
    }
}

impl WorkOrderStore for InMemoryWorkOrderStore {
    fn write_score(&self, scene_id: &str, score: &SceneScore) -> WorkOrderResult<()> {
        self.scores.write().unwrap().insert(scene_id.to_string(), score.clone());
        Ok(())
    }

    fn write_enhancement(&self, scene_id: &str, outcome: &EnhancementOutcome) -> WorkOrderResult<()> {
        self.enhancements
            .write()
            .unwrap()
            .insert(scene_id.to_string(), outcome.clone());
        Ok(())
    }
}

/// Records a Scene Score without failing the caller when the store
/// errors — recording is best-effort per the §7 propagation rule that
/// only LLM sub-operations fail the enclosing call.
pub fn record_score(store: Option<&dyn WorkOrderStore>, scene_id: &str, score: &SceneScore) {
    if let Some(store) = store {
        if let Err(err) = store.write_score(scene_id, score) {
            tracing::warn!(scene_id, error = %err, "work order store failed to record scene score");
        }
    }
}

/// Records an Enhancement Outcome without failing the caller, mirroring
/// [`record_score`].
pub fn record_enhancement(store: Option<&dyn WorkOrderStore>, scene_id: &str, outcome: &EnhancementOutcome) {
    if let Some(store) = store {
        if let Err(err) = store.write_enhancement(scene_id, outcome) {
            tracing::warn!(scene_id, error = %err, "work order store failed to record enhancement outcome");
        }
    }
}

/// A durable, append-only store: one JSON line per record, written to a
/// file per record kind. Matches the spec's "read-your-write not
/// required" note — this store supports append only, no overwrite or
/// read-back, which is sufficient for the editor's own indexer to tail.
pub struct JsonlWorkOrderStore {
    scores_path: PathBuf,
    enhancements_path: PathBuf,
    lock: Mutex<()>,
}

#[derive(serde::Serialize)]
struct ScoreRecord<'a> {
    scene_id: &'a str,
    score: &'a SceneScore,
}

#[derive(serde::Serialize)]
struct EnhancementRecord<'a> {
    scene_id: &'a str,
    outcome: &'a EnhancementOutcome,
}

impl JsonlWorkOrderStore {
    pub fn new(scores_path: impl AsRef<Path>, enhancements_path: impl AsRef<Path>) -> Self {
        Self {
            scores_path: scores_path.as_ref().to_path_buf(),
            enhancements_path: enhancements_path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    fn append_line(&self, path: &Path, scene_id: &str, line: &str) -> WorkOrderResult<()> {
        let to_err = |e: std::io::Error| WorkOrderError::Write {
            scene_id: scene_id.to_string(),
            message: format!("{}: {e}", path.display()),
        };
        let _guard = self.lock.lock().unwrap();
        let mut file = OpenOptions::new().create(true).append(true).open(path).map_err(to_err)?;
        writeln!(file, "{line}").map_err(to_err)
    }
}

impl WorkOrderStore for JsonlWorkOrderStore {
    fn write_score(&self, scene_id: &str, score: &SceneScore) -> WorkOrderResult<()> {
        let line = serde_json::to_string(&ScoreRecord { scene_id, score }).expect("SceneScore always serializes");
        self.append_line(&self.scores_path, scene_id, &line)
    }

    fn write_enhancement(&self, scene_id: &str, outcome: &EnhancementOutcome) -> WorkOrderResult<()> {
        let line =
            serde_json::to_string(&EnhancementRecord { scene_id, outcome }).expect("EnhancementOutcome always serializes");
        self.append_line(&self.enhancements_path, scene_id, &line)
    }
}
