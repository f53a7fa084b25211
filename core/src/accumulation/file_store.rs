use crate::accumulation::model::{DriftHistory, HistoryKey};
use crate::accumulation::store::{pick_accumulating, DriftHistoryStore};
use crate::error::{CoreError, CoreResult};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use walkdir::WalkDir;

/// Histories as pretty JSON files, `<root>/<workspace_id>/<history_id>.json`.
///
/// Conditional writes are serialized through a process-local lock; the
/// directory must not be shared between processes.
pub struct JsonDirHistoryStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonDirHistoryStore {
    pub fn open(root: impl AsRef<Path>) -> CoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn lock(&self) -> CoreResult<MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| CoreError::Store("history store lock poisoned".to_string()))
    }

    fn path_for(&self, workspace_id: &str, history_id: &str) -> CoreResult<PathBuf> {
        check_segment("workspace id", workspace_id)?;
        check_segment("history id", history_id)?;
        Ok(self
            .root
            .join(workspace_id)
            .join(format!("{}.json", history_id)))
    }

    fn read(&self, path: &Path) -> CoreResult<Option<DriftHistory>> {
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(path)?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    fn write(&self, history: &DriftHistory) -> CoreResult<()> {
        let path = self.path_for(&history.workspace_id, &history.id)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(history)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn scan(&self, workspace_id: &str) -> CoreResult<Vec<DriftHistory>> {
        check_segment("workspace id", workspace_id)?;
        let dir = self.root.join(workspace_id);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for e in WalkDir::new(&dir).min_depth(1).max_depth(1).sort_by_file_name() {
            let e =
                e.map_err(|err| {
                    CoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, err))
                })?;
            let p = e.path();
            if !e.file_type().is_file() || p.extension().and_then(|x| x.to_str()) != Some("json") {
                continue;
            }
            if let Some(h) = self.read(p)? {
                out.push(h);
            }
        }
        Ok(out)
    }
}

fn check_segment(what: &str, value: &str) -> CoreResult<()> {
    let ok = !value.is_empty()
        && value != "."
        && value != ".."
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if ok {
        Ok(())
    } else {
        Err(CoreError::InvalidInput(format!(
            "{} {:?} is not usable as a file name",
            what, value
        )))
    }
}

impl DriftHistoryStore for JsonDirHistoryStore {
    fn find_accumulating(&self, key: &HistoryKey) -> CoreResult<Option<DriftHistory>> {
        let rows = self.scan(&key.workspace_id)?;
        Ok(pick_accumulating(rows.iter(), key).cloned())
    }

    fn get(&self, workspace_id: &str, history_id: &str) -> CoreResult<Option<DriftHistory>> {
        let path = self.path_for(workspace_id, history_id)?;
        self.read(&path)
    }

    fn insert_if_absent(&self, history: DriftHistory) -> CoreResult<DriftHistory> {
        let _guard = self.lock()?;
        let rows = self.scan(&history.workspace_id)?;
        if let Some(existing) = pick_accumulating(rows.iter(), &history.key()) {
            return Ok(existing.clone());
        }
        if self.path_for(&history.workspace_id, &history.id)?.exists() {
            return Err(CoreError::Store(format!(
                "drift history {} already exists",
                history.id
            )));
        }
        self.write(&history)?;
        Ok(history)
    }

    fn update_if_version(
        &self,
        history: &DriftHistory,
        expected_version: u64,
    ) -> CoreResult<Option<DriftHistory>> {
        let _guard = self.lock()?;
        let path = self.path_for(&history.workspace_id, &history.id)?;
        let Some(stored) = self.read(&path)? else {
            return Err(CoreError::HistoryNotFound {
                workspace_id: history.workspace_id.clone(),
                history_id: history.id.clone(),
            });
        };
        if stored.version != expected_version {
            return Ok(None);
        }
        let mut next = history.clone();
        next.version = expected_version + 1;
        self.write(&next)?;
        Ok(Some(next))
    }

    fn list(&self, workspace_id: &str) -> CoreResult<Vec<DriftHistory>> {
        self.scan(workspace_id)
    }
}
