// src/session/store.rs - Resumption pointers: scenario id -> session id
//
// One JSON file per profile. Written atomically (temp file + rename) so a
// crash mid-write never leaves a half-written pointer file behind.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::infra::errors::SimError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionPointer {
    pub session_id: String,
    pub saved_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PointerFile {
    #[serde(default)]
    pointers: BTreeMap<String, SessionPointer>,
}

pub struct SessionStore {
    path: Option<PathBuf>,
    pointers: Mutex<BTreeMap<String, SessionPointer>>,
}

impl SessionStore {
    /// Open a file-backed store. A missing file is an empty store; an
    /// unreadable one is logged and replaced on the next write.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let pointers = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<PointerFile>(&content) {
                Ok(file) => file.pointers,
                Err(e) => {
                    tracing::warn!("Ignoring corrupt pointer file {}: {e}", path.display());
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                tracing::warn!("Failed to read pointer file {}: {e}", path.display());
                BTreeMap::new()
            }
        };
        tracing::debug!("Loaded {} session pointer(s)", pointers.len());

        Self {
            path: Some(path),
            pointers: Mutex::new(pointers),
        }
    }

    /// Store that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            pointers: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get(&self, scenario_id: &str) -> Option<SessionPointer> {
        self.lock().get(scenario_id).cloned()
    }

    pub fn put(&self, scenario_id: &str, session_id: &str) -> Result<(), SimError> {
        let mut pointers = self.lock();
        pointers.insert(
            scenario_id.to_string(),
            SessionPointer {
                session_id: session_id.to_string(),
                saved_at: Utc::now(),
            },
        );
        self.persist(&pointers)
    }

    /// Remove the pointer for a scenario. Returns whether one existed.
    pub fn clear(&self, scenario_id: &str) -> Result<bool, SimError> {
        let mut pointers = self.lock();
        if pointers.remove(scenario_id).is_none() {
            return Ok(false);
        }
        self.persist(&pointers)?;
        Ok(true)
    }

    /// Remove every pointer. Returns how many were dropped.
    pub fn clear_all(&self) -> Result<usize, SimError> {
        let mut pointers = self.lock();
        let dropped = pointers.len();
        pointers.clear();
        self.persist(&pointers)?;
        Ok(dropped)
    }

    pub fn entries(&self) -> Vec<(String, SessionPointer)> {
        self.lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, SessionPointer>> {
        self.pointers.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn persist(&self, pointers: &BTreeMap<String, SessionPointer>) -> Result<(), SimError> {
        let Some(ref dst) = self.path else {
            return Ok(());
        };
        let file = PointerFile {
            pointers: pointers.clone(),
        };
        write_atomic(dst, &serde_json::to_vec_pretty(&file)?)
    }
}

fn write_atomic(dst: &Path, bytes: &[u8]) -> Result<(), SimError> {
    let dir = dst.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;

    let name = dst
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "pointers.json".into());
    let tmp = dir.join(format!(".{name}.tmp"));

    let mut f = std::fs::File::create(&tmp)?;
    f.write_all(bytes)?;
    f.sync_all()?;
    drop(f);

    std::fs::rename(&tmp, dst)?;
    Ok(())
}
