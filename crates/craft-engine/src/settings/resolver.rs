//! The Settings Resolver (§4.1): three-tier dotted-path lookup with
//! strict typed validation on write and no silent coercion.

use super::schema::{FieldSpec, FieldType, SettingsSchema};
use super::store::{SettingsStore, StoreError};
use crate::error::{CraftError, ErrorKind};
use crate::events::{CraftEvent, SharedEventBus};
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

/// Which scope a `set` targets (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsScope {
    Project,
    Global,
}

/// Raised on `set` when the value fails type, range, or choice validation,
/// or on `get`/`set` against an undeclared path. Never silently coerced
/// (§4.1, §7 `InvalidSetting`).
#[derive(Debug, thiserror::Error)]
pub enum InvalidSetting {
    #[error("unknown settings path '{0}'")]
    UnknownPath(String),
    #[error("path '{path}' expects {expected:?}, got {actual}")]
    TypeMismatch {
        path: String,
        expected: FieldType,
        actual: Value,
    },
    #[error("path '{path}' value {value} is outside allowed range [{min}, {max}]")]
    OutOfRange {
        path: String,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("path '{path}' value '{value}' is not one of the allowed choices {choices:?}")]
    NotInChoiceSet {
        path: String,
        value: String,
        choices: &'static [&'static str],
    },
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl From<InvalidSetting> for CraftError {
    fn from(err: InvalidSetting) -> Self {
        CraftError::new(ErrorKind::InvalidSetting, err.to_string())
    }
}

/// A copy-on-write snapshot of one project's resolved settings, so
/// concurrent reads never block on an in-progress write (§4.1, §5).
#[derive(Debug, Clone, Default)]
struct ProjectSnapshot {
    project_values: HashMap<String, Value>,
}

/// Three-tier settings resolver: project -> global -> compiled default.
pub struct SettingsResolver {
    schema: SettingsSchema,
    global_store: Arc<dyn SettingsStore>,
    project_store_factory: Box<dyn Fn(&str) -> Arc<dyn SettingsStore> + Send + Sync>,
    snapshots: RwLock<HashMap<String, ProjectSnapshot>>,
    global_snapshot: RwLock<HashMap<String, Value>>,
    write_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    event_bus: Option<SharedEventBus>,
}

impl SettingsResolver {
    pub fn new(
        global_store: Arc<dyn SettingsStore>,
        project_store_factory: impl Fn(&str) -> Arc<dyn SettingsStore> + Send + Sync + 'static,
    ) -> Result<Self, InvalidSetting> {
        let global_snapshot = global_store.read_all()?;
        Ok(Self {
            schema: SettingsSchema::build(),
            global_store,
            project_store_factory: Box::new(project_store_factory),
            snapshots: RwLock::new(HashMap::new()),
            global_snapshot: RwLock::new(global_snapshot),
            write_locks: Mutex::new(HashMap::new()),
            event_bus: None,
        })
    }

    pub fn with_event_bus(mut self, bus: SharedEventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    fn spec(&self, path: &str) -> Result<&FieldSpec, InvalidSetting> {
        self.schema
            .get(path)
            .ok_or_else(|| InvalidSetting::UnknownPath(path.to_string()))
    }

    fn ensure_project_snapshot(&self, project_id: &str) -> Result<(), InvalidSetting> {
        if self.snapshots.read().unwrap().contains_key(project_id) {
            return Ok(());
        }
        let store = (self.project_store_factory)(project_id);
        let values = store.read_all()?;
        self.snapshots.write().unwrap().insert(
            project_id.to_string(),
            ProjectSnapshot {
                project_values: values,
            },
        );
        Ok(())
    }

    /// Resolve a dotted path: project value, else global, else compiled
    /// default (§4.1). `project_id = None` skips the project tier.
    pub fn get(&self, path: &str, project_id: Option<&str>) -> Result<Value, InvalidSetting> {
        let spec = self.spec(path)?;

        if let Some(project_id) = project_id {
            self.ensure_project_snapshot(project_id)?;
            let snapshots = self.snapshots.read().unwrap();
            if let Some(snapshot) = snapshots.get(project_id) {
                if let Some(value) = snapshot.project_values.get(path) {
                    return Ok(value.clone());
                }
            }
        }

        if let Some(value) = self.global_snapshot.read().unwrap().get(path) {
            return Ok(value.clone());
        }

        Ok(spec.default.clone())
    }

    /// Typed convenience accessor for number-valued paths.
    pub fn get_number(&self, path: &str, project_id: Option<&str>) -> Result<f64, InvalidSetting> {
        let value = self.get(path, project_id)?;
        value
            .as_f64()
            .ok_or_else(|| InvalidSetting::TypeMismatch {
                path: path.to_string(),
                expected: FieldType::Number,
                actual: value,
            })
    }

    /// Typed convenience accessor for string-valued paths.
    pub fn get_string(&self, path: &str, project_id: Option<&str>) -> Result<String, InvalidSetting> {
        let value = self.get(path, project_id)?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| InvalidSetting::TypeMismatch {
                path: path.to_string(),
                expected: FieldType::String,
                actual: value,
            })
    }

    /// Typed convenience accessor for bool-valued paths.
    pub fn get_bool(&self, path: &str, project_id: Option<&str>) -> Result<bool, InvalidSetting> {
        let value = self.get(path, project_id)?;
        value
            .as_bool()
            .ok_or_else(|| InvalidSetting::TypeMismatch {
                path: path.to_string(),
                expected: FieldType::Bool,
                actual: value,
            })
    }

    fn validate(&self, spec: &FieldSpec, value: &Value) -> Result<(), InvalidSetting> {
        match spec.field_type {
            FieldType::Bool => {
                if !value.is_boolean() {
                    return Err(InvalidSetting::TypeMismatch {
                        path: spec.path.to_string(),
                        expected: spec.field_type,
                        actual: value.clone(),
                    });
                }
            }
            FieldType::Number => {
                let n = value.as_f64().ok_or_else(|| InvalidSetting::TypeMismatch {
                    path: spec.path.to_string(),
                    expected: spec.field_type,
                    actual: value.clone(),
                })?;
                if let Some((min, max)) = spec.range {
                    if n < min || n > max {
                        return Err(InvalidSetting::OutOfRange {
                            path: spec.path.to_string(),
                            value: n,
                            min,
                            max,
                        });
                    }
                }
            }
            FieldType::String => {
                let s = value.as_str().ok_or_else(|| InvalidSetting::TypeMismatch {
                    path: spec.path.to_string(),
                    expected: spec.field_type,
                    actual: value.clone(),
                })?;
                if let Some(choices) = spec.choices {
                    if !choices.contains(&s) {
                        return Err(InvalidSetting::NotInChoiceSet {
                            path: spec.path.to_string(),
                            value: s.to_string(),
                            choices,
                        });
                    }
                }
            }
            FieldType::StringList => {
                let arr = value.as_array().ok_or_else(|| InvalidSetting::TypeMismatch {
                    path: spec.path.to_string(),
                    expected: spec.field_type,
                    actual: value.clone(),
                })?;
                for element in arr {
                    if !element.is_string() {
                        return Err(InvalidSetting::TypeMismatch {
                            path: spec.path.to_string(),
                            expected: spec.field_type,
                            actual: value.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    fn write_lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.write_locks.lock().unwrap();
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Validate and durably write a setting at the given scope (§4.1).
    /// Writes to the same project are serialized; concurrent writes to
    /// different projects proceed independently.
    pub fn set(
        &self,
        path: &str,
        value: Value,
        scope: SettingsScope,
        project_id: Option<&str>,
    ) -> Result<(), InvalidSetting> {
        let spec = self.spec(path)?;
        self.validate(spec, &value)?;

        match scope {
            SettingsScope::Global => {
                let lock = self.write_lock_for("__global__");
                let _guard = lock.lock().unwrap();
                self.global_store.write_one(path, value.clone())?;
                self.global_snapshot
                    .write()
                    .unwrap()
                    .insert(path.to_string(), value);
            }
            SettingsScope::Project => {
                let project_id = project_id.ok_or_else(|| {
                    InvalidSetting::UnknownPath(format!(
                        "project scope write to '{path}' requires a project_id"
                    ))
                })?;
                let lock = self.write_lock_for(project_id);
                let _guard = lock.lock().unwrap();
                self.ensure_project_snapshot(project_id)?;
                let store = (self.project_store_factory)(project_id);
                store.write_one(path, value.clone())?;
                self.snapshots
                    .write()
                    .unwrap()
                    .entry(project_id.to_string())
                    .or_default()
                    .project_values
                    .insert(path.to_string(), value);
            }
        }

        if let Some(bus) = &self.event_bus {
            let _ = bus.publish(CraftEvent::SettingsChanged {
                path: path.to_string(),
                project_id: project_id.map(str::to_string),
                timestamp: Utc::now(),
            });
        }

        Ok(())
    }

    /// Invalidate a cached project snapshot, forcing the next `get` to
    /// reload from the project store (e.g. after an external write).
    pub fn invalidate_project(&self, project_id: &str) {
        self.snapshots.write().unwrap().remove(project_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::store::InMemorySettingsStore;

    fn resolver() -> SettingsResolver {
        let global = Arc::new(InMemorySettingsStore::new());
        SettingsResolver::new(global, |_project_id| {
            Arc::new(InMemorySettingsStore::new()) as Arc<dyn SettingsStore>
        })
        .unwrap()
    }

    #[test]
    fn falls_back_to_compiled_default_when_nothing_set() {
        let r = resolver();
        let v = r.get_number("enhancement.action_prompt_threshold", Some("p1")).unwrap();
        assert_eq!(v, 85.0);
    }

    #[test]
    fn project_value_wins_over_global_and_default() {
        let r = resolver();
        r.set(
            "enhancement.action_prompt_threshold",
            serde_json::json!(90.0),
            SettingsScope::Global,
            None,
        )
        .unwrap();
        r.set(
            "enhancement.action_prompt_threshold",
            serde_json::json!(95.0),
            SettingsScope::Project,
            Some("p1"),
        )
        .unwrap();

        assert_eq!(
            r.get_number("enhancement.action_prompt_threshold", Some("p1")).unwrap(),
            95.0
        );
        // A different project without its own override falls back to global.
        assert_eq!(
            r.get_number("enhancement.action_prompt_threshold", Some("p2")).unwrap(),
            90.0
        );
    }

    #[test]
    fn global_wins_over_default_when_no_project_value() {
        let r = resolver();
        r.set(
            "router.quality_tier",
            serde_json::json!("premium"),
            SettingsScope::Global,
            None,
        )
        .unwrap();
        assert_eq!(
            r.get_string("router.quality_tier", Some("p1")).unwrap(),
            "premium"
        );
    }

    #[test]
    fn rejects_type_mismatch_without_coercion() {
        let r = resolver();
        let err = r
            .set(
                "enhancement.action_prompt_threshold",
                serde_json::json!("not a number"),
                SettingsScope::Global,
                None,
            )
            .unwrap_err();
        assert!(matches!(err, InvalidSetting::TypeMismatch { .. }));
    }

    #[test]
    fn rejects_out_of_range_number() {
        let r = resolver();
        let err = r
            .set(
                "enhancement.action_prompt_threshold",
                serde_json::json!(150.0),
                SettingsScope::Global,
                None,
            )
            .unwrap_err();
        assert!(matches!(err, InvalidSetting::OutOfRange { .. }));
    }

    #[test]
    fn rejects_choice_not_in_closed_set() {
        let r = resolver();
        let err = r
            .set(
                "router.quality_tier",
                serde_json::json!("ultra"),
                SettingsScope::Global,
                None,
            )
            .unwrap_err();
        assert!(matches!(err, InvalidSetting::NotInChoiceSet { .. }));
    }

    #[test]
    fn rejects_unknown_path() {
        let r = resolver();
        let err = r.get("not.a.real.path", None).unwrap_err();
        assert!(matches!(err, InvalidSetting::UnknownPath(_)));
    }

    #[test]
    fn project_scope_write_without_project_id_fails() {
        let r = resolver();
        let err = r
            .set(
                "router.quality_tier",
                serde_json::json!("budget"),
                SettingsScope::Project,
                None,
            )
            .unwrap_err();
        assert!(matches!(err, InvalidSetting::UnknownPath(_)));
    }

    #[test]
    fn invalidate_forces_reload() {
        let r = resolver();
        r.ensure_project_snapshot("p1").unwrap();
        r.invalidate_project("p1");
        // Reload succeeds without panicking and the cache is repopulated lazily.
        assert_eq!(
            r.get_number("enhancement.action_prompt_threshold", Some("p1")).unwrap(),
            85.0
        );
    }
}
