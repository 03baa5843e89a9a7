//! Recently opened documents, most recent first.

use crate::error::PersistError;
use crate::models::PdfSource;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, warn};

pub const DEFAULT_RECENT_CAPACITY: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecentFile {
    pub doc_id: String,
    pub doc_name: String,
    /// Kept for the running process only; never written out.
    pub source: PdfSource,
}

/// What survives a restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRecentFile {
    pub doc_id: String,
    pub doc_name: String,
}

impl From<&RecentFile> for StoredRecentFile {
    fn from(file: &RecentFile) -> Self {
        Self {
            doc_id: file.doc_id.clone(),
            doc_name: file.doc_name.clone(),
        }
    }
}

impl From<StoredRecentFile> for RecentFile {
    fn from(stored: StoredRecentFile) -> Self {
        Self {
            doc_id: stored.doc_id,
            doc_name: stored.doc_name,
            source: PdfSource::Absent,
        }
    }
}

pub trait RecentFilesPersistence: Send + Sync {
    fn load(&self) -> Result<Vec<StoredRecentFile>, PersistError>;
    fn save(&self, files: &[StoredRecentFile]) -> Result<(), PersistError>;
}

/// Stores the list as a JSON array in one file. A missing file is an empty list.
#[derive(Debug, Clone)]
pub struct JsonFilePersistence {
    path: PathBuf,
}

impl JsonFilePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RecentFilesPersistence for JsonFilePersistence {
    fn load(&self) -> Result<Vec<StoredRecentFile>, PersistError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn save(&self, files: &[StoredRecentFile]) -> Result<(), PersistError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_vec_pretty(files)?)?;
        Ok(())
    }
}

/// Bounded recency list keyed by `doc_id`. Loaded once, saved after every change.
pub struct RecentFiles<P> {
    persistence: P,
    capacity: usize,
    entries: VecDeque<RecentFile>,
}

impl<P: RecentFilesPersistence> RecentFiles<P> {
    /// An unreadable store starts the list empty rather than failing.
    pub fn load(persistence: P, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let entries = match persistence.load() {
            Ok(stored) => stored.into_iter().take(capacity).map(RecentFile::from).collect(),
            Err(error) => {
                warn!(%error, "could not read recent files, starting empty");
                VecDeque::new()
            }
        };

        Self {
            persistence,
            capacity,
            entries,
        }
    }

    /// Moves `file` to the front, replacing any entry with the same id.
    pub fn add(&mut self, file: RecentFile) -> Result<(), PersistError> {
        self.entries.retain(|entry| entry.doc_id != file.doc_id);
        self.entries.push_front(file);
        while self.entries.len() > self.capacity {
            if let Some(evicted) = self.entries.pop_back() {
                debug!(doc_id = %evicted.doc_id, "evicted recent file");
            }
        }
        self.save()
    }

    pub fn get(&self, doc_id: &str) -> Option<&RecentFile> {
        self.entries.iter().find(|entry| entry.doc_id == doc_id)
    }

    pub fn list(&self) -> impl Iterator<Item = &RecentFile> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn save(&self) -> Result<(), PersistError> {
        let stored = self
            .entries
            .iter()
            .map(StoredRecentFile::from)
            .collect::<Vec<_>>();
        self.persistence.save(&stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Shares its contents so tests can inspect what was saved.
    #[derive(Clone, Default)]
    struct MemoryPersistence {
        saved: Arc<Mutex<Vec<StoredRecentFile>>>,
    }

    impl RecentFilesPersistence for MemoryPersistence {
        fn load(&self) -> Result<Vec<StoredRecentFile>, PersistError> {
            Ok(self.saved.lock().expect("lock").clone())
        }

        fn save(&self, files: &[StoredRecentFile]) -> Result<(), PersistError> {
            *self.saved.lock().expect("lock") = files.to_vec();
            Ok(())
        }
    }

    fn file(id: &str) -> RecentFile {
        RecentFile {
            doc_id: id.to_string(),
            doc_name: format!("{id}.pdf"),
            source: PdfSource::Local(vec![1, 2, 3]),
        }
    }

    fn ids<P: RecentFilesPersistence>(recent: &RecentFiles<P>) -> Vec<String> {
        recent.list().map(|entry| entry.doc_id.clone()).collect()
    }

    #[test]
    fn readding_moves_to_front_without_duplicates() {
        let mut recent = RecentFiles::load(MemoryPersistence::default(), 5);
        for id in ["a", "b", "c"] {
            recent.add(file(id)).expect("saved");
        }
        recent.add(file("a")).expect("saved");
        assert_eq!(ids(&recent), vec!["a", "c", "b"]);
    }

    #[test]
    fn capacity_evicts_the_oldest() {
        let persistence = MemoryPersistence::default();
        let mut recent = RecentFiles::load(persistence.clone(), 2);
        for id in ["a", "b", "c"] {
            recent.add(file(id)).expect("saved");
        }
        assert_eq!(ids(&recent), vec!["c", "b"]);

        let saved = persistence.saved.lock().expect("lock").clone();
        assert_eq!(
            saved,
            vec![
                StoredRecentFile {
                    doc_id: "c".to_string(),
                    doc_name: "c.pdf".to_string(),
                },
                StoredRecentFile {
                    doc_id: "b".to_string(),
                    doc_name: "b.pdf".to_string(),
                },
            ]
        );
    }

    #[test]
    fn sources_are_not_restored() {
        let persistence = MemoryPersistence::default();
        let mut recent = RecentFiles::load(persistence.clone(), 5);
        recent.add(file("a")).expect("saved");

        let reloaded = RecentFiles::load(persistence, 5);
        let entry = reloaded.get("a").expect("entry survives");
        assert_eq!(entry.doc_name, "a.pdf");
        assert!(entry.source.is_absent());
    }

    #[test]
    fn json_file_round_trips_ids_and_names() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state").join("recent.json");

        let mut recent = RecentFiles::load(JsonFilePersistence::new(&path), 5);
        assert!(recent.is_empty());
        recent.add(file("a")).expect("saved");
        recent.add(file("b")).expect("saved");

        let raw = fs::read_to_string(&path).expect("file written");
        assert!(raw.contains("\"docId\": \"b\""));
        assert!(!raw.contains("source"));

        let reloaded = RecentFiles::load(JsonFilePersistence::new(&path), 5);
        assert_eq!(ids(&reloaded), vec!["b", "a"]);
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("recent.json");
        fs::write(&path, "not json").expect("write");

        let recent = RecentFiles::load(JsonFilePersistence::new(&path), 5);
        assert_eq!(recent.len(), 0);
    }
}
