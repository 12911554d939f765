// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Call record stores.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use pickledb::{PickleDb, PickleDbDumpPolicy, SerializationMethod};
use tracing::warn;

use trunk_core::call::{Call, CallRepository, Page, PageRequest, RepositoryError};

const CALL_PREFIX: &str = "call:";
const NEXT_ID_KEY: &str = "meta:next_id";

/// Sort, then cut one page out of the matching calls.
fn paginate(mut matches: Vec<Call>, page: PageRequest) -> Page<Call> {
    matches.sort_by(|a, b| a.event_time.cmp(&b.event_time).then(a.id.cmp(&b.id)));
    let total_elements = matches.len();
    let content = matches
        .into_iter()
        .skip(page.page.saturating_mul(page.size))
        .take(page.size)
        .collect();
    Page {
        content,
        total_elements,
    }
}

#[derive(Default)]
struct MemoryState {
    next_id: u64,
    calls: BTreeMap<u64, Call>,
}

/// Process-local call store.
#[derive(Default)]
pub struct MemoryCallRepository {
    state: Mutex<MemoryState>,
}

impl MemoryCallRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .calls
            .len()
    }

    pub fn get(&self, id: u64) -> Option<Call> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .calls
            .get(&id)
            .cloned()
    }
}

impl CallRepository for MemoryCallRepository {
    fn save(&self, call: &mut Call) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if call.id == 0 {
            state.next_id += 1;
            call.id = state.next_id;
        }
        state.calls.insert(call.id, call.clone());
        Ok(())
    }

    fn delete(&self, call: &Call) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .calls
            .remove(&call.id)
            .map(|_| ())
            .ok_or(RepositoryError::NotFound(call.id))
    }

    fn find_calls_by_event_time_between_order_by_event_time(
        &self,
        start: u64,
        end: u64,
        page: PageRequest,
    ) -> Result<Page<Call>, RepositoryError> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let matches = state
            .calls
            .values()
            .filter(|c| (start..=end).contains(&c.event_time))
            .cloned()
            .collect();
        Ok(paginate(matches, page))
    }
}

/// Call store persisted to a pickledb JSON file.
pub struct PickleCallRepository {
    db: Arc<RwLock<PickleDb>>,
    path: PathBuf,
}

impl PickleCallRepository {
    /// Open the store at `path`, creating it when missing or unreadable.
    pub fn open(path: &Path) -> Self {
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!("Could not create {}: {}", parent.display(), e);
            }
        }
        let db = if path.exists() {
            PickleDb::load(path, PickleDbDumpPolicy::AutoDump, SerializationMethod::Json)
                .unwrap_or_else(|e| {
                    warn!("Call store {} unreadable ({}), starting empty", path.display(), e);
                    PickleDb::new(path, PickleDbDumpPolicy::AutoDump, SerializationMethod::Json)
                })
        } else {
            PickleDb::new(path, PickleDbDumpPolicy::AutoDump, SerializationMethod::Json)
        };
        Self {
            db: Arc::new(RwLock::new(db)),
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, id: u64) -> Option<Call> {
        let db = self.db.read().unwrap_or_else(|e| e.into_inner());
        db.get::<Call>(&call_key(id))
    }
}

fn call_key(id: u64) -> String {
    format!("{CALL_PREFIX}{id}")
}

fn storage_error(err: pickledb::error::Error) -> RepositoryError {
    RepositoryError::Storage(err.to_string())
}

impl CallRepository for PickleCallRepository {
    fn save(&self, call: &mut Call) -> Result<(), RepositoryError> {
        let mut db = self.db.write().unwrap_or_else(|e| e.into_inner());
        if call.id == 0 {
            let id = db.get::<u64>(NEXT_ID_KEY).unwrap_or(0) + 1;
            db.set(NEXT_ID_KEY, &id).map_err(storage_error)?;
            call.id = id;
        }
        db.set(&call_key(call.id), &*call).map_err(storage_error)
    }

    fn delete(&self, call: &Call) -> Result<(), RepositoryError> {
        let mut db = self.db.write().unwrap_or_else(|e| e.into_inner());
        match db.rem(&call_key(call.id)) {
            Ok(true) => Ok(()),
            Ok(false) => Err(RepositoryError::NotFound(call.id)),
            Err(e) => Err(storage_error(e)),
        }
    }

    fn find_calls_by_event_time_between_order_by_event_time(
        &self,
        start: u64,
        end: u64,
        page: PageRequest,
    ) -> Result<Page<Call>, RepositoryError> {
        let db = self.db.read().unwrap_or_else(|e| e.into_inner());
        let matches = db
            .iter()
            .filter(|kv| kv.get_key().starts_with(CALL_PREFIX))
            .filter_map(|kv| kv.get_value::<Call>())
            .filter(|c| (start..=end).contains(&c.event_time))
            .collect();
        Ok(paginate(matches, page))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(event_time: u64) -> Call {
        Call {
            event_time,
            complete: true,
            ..Call::default()
        }
    }

    fn exercise(repo: &dyn CallRepository) {
        let mut saved = Vec::new();
        for t in [300, 100, 200, 100] {
            let mut c = call(t);
            repo.save(&mut c).unwrap();
            assert!(c.id > 0);
            saved.push(c);
        }

        let page = repo
            .find_calls_by_event_time_between_order_by_event_time(0, 250, PageRequest::of(0, 2))
            .unwrap();
        assert_eq!(page.total_elements, 3);
        let times: Vec<u64> = page.content.iter().map(|c| c.event_time).collect();
        assert_eq!(times, vec![100, 100]);

        let page = repo
            .find_calls_by_event_time_between_order_by_event_time(0, 250, PageRequest::of(1, 2))
            .unwrap();
        assert_eq!(page.content.len(), 1);
        assert_eq!(page.content[0].event_time, 200);

        // Updating keeps the id.
        let mut first = saved[0].clone();
        first.duration = 4.5;
        repo.save(&mut first).unwrap();
        assert_eq!(first.id, saved[0].id);

        repo.delete(&saved[1]).unwrap();
        assert!(matches!(
            repo.delete(&saved[1]),
            Err(RepositoryError::NotFound(_))
        ));
        let page = repo
            .find_calls_by_event_time_between_order_by_event_time(0, u64::MAX, PageRequest::of(0, 100))
            .unwrap();
        assert_eq!(page.total_elements, 3);
        assert!(page.content.iter().any(|c| c.duration == 4.5));
    }

    #[test]
    fn test_memory_repository() {
        let repo = MemoryCallRepository::new();
        exercise(&repo);
        assert_eq!(repo.len(), 3);
    }

    #[test]
    fn test_pickle_repository_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store").join("calls.db");
        {
            let repo = PickleCallRepository::open(&path);
            exercise(&repo);
        }
        let repo = PickleCallRepository::open(&path);
        let page = repo
            .find_calls_by_event_time_between_order_by_event_time(0, u64::MAX, PageRequest::of(0, 10))
            .unwrap();
        assert_eq!(page.total_elements, 3);

        // Ids keep counting after a reopen.
        let mut c = call(50);
        repo.save(&mut c).unwrap();
        assert_eq!(c.id, 5);
        assert_eq!(repo.get(5).map(|c| c.event_time), Some(50));
    }

    #[test]
    fn test_pickle_repository_creates_nested_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a").join("b").join("calls.db");
        let repo = PickleCallRepository::open(&path);
        assert!(path.parent().unwrap().is_dir());
        let mut c = call(1);
        repo.save(&mut c).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_pickle_repository_with_blocked_parent_reports_save_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let repo = PickleCallRepository::open(&blocker.join("calls.db"));
        let mut c = call(1);
        assert!(matches!(repo.save(&mut c), Err(RepositoryError::Storage(_))));
    }
}
