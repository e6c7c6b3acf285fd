//! Durable alert store.
//!
//! The whole collection is the unit of persistence: it is rewritten in full
//! after every mutation. Mutations are serialized twice over. An in-process
//! mutex orders writers inside one agent, and an advisory lock on
//! `<store>.lock` orders writers across processes (the running agent and the
//! review CLI). Under that lock the snapshot on disk is reloaded before the
//! change is applied, so no process rewrites the file from a stale copy.
//! A failed write leaves the in-memory state as it was, so memory never runs
//! ahead of disk. Reads are served from the copy taken at the last open or
//! mutation.

use crate::alerts::types::{Alert, AlertFilter, NewAlert};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

/// Alert collection backed by a single JSON file.
#[derive(Debug)]
pub struct AlertStore {
    path: Option<PathBuf>,
    alerts: Mutex<Vec<Alert>>,
    /// Ids handed out by `reserve_id` and not yet used by `add`
    reserved: Mutex<HashSet<String>>,
}

impl AlertStore {
    /// Open the store persisted at `path`.
    ///
    /// Nothing is written until the first mutation. A missing file means an
    /// empty store. An unreadable or corrupt file is treated as a first run
    /// and the store starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let alerts = match load_alerts(&path) {
            Ok(Some(alerts)) => {
                tracing::info!(path = %path.display(), count = alerts.len(), "Loaded alerts");
                alerts
            }
            Ok(None) => Vec::new(),
            Err(e) => {
                tracing::warn!(path = %path.display(), "Could not load alerts, starting empty: {e}");
                Vec::new()
            }
        };

        Self {
            path: Some(path),
            alerts: Mutex::new(alerts),
            reserved: Mutex::new(HashSet::new()),
        }
    }

    /// A store that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            alerts: Mutex::new(Vec::new()),
            reserved: Mutex::new(HashSet::new()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Pick the id of an alert that is about to be raised, so evidence can be
    /// named after it before the record exists. Pass it back through
    /// `NewAlert::with_id`.
    pub fn reserve_id(&self) -> String {
        let alerts = self.lock();
        let mut reserved = self.lock_reserved();
        let id = fresh_id(&alerts, &reserved);
        reserved.insert(id.clone());
        id
    }

    /// Record a new alert and persist it before returning its id.
    ///
    /// A reserved id is consumed whether or not the write succeeds.
    pub fn add(&self, new: NewAlert) -> Result<String, StoreError> {
        let requested = new.id.clone();
        let result = self.mutate(|alerts| {
            let id = match requested.as_deref() {
                Some(id) if !alerts.iter().any(|a| a.id == id) => id.to_string(),
                Some(id) => {
                    tracing::warn!(alert_id = %id, "Reserved id already taken, picking another");
                    fresh_id(alerts, &self.lock_reserved())
                }
                None => fresh_id(alerts, &self.lock_reserved()),
            };
            let timestamp = next_timestamp(alerts, Utc::now());
            alerts.push(Alert {
                id: id.clone(),
                timestamp,
                kind: new.kind,
                description: new.description,
                video_path: new.video_path,
                audio_path: new.audio_path,
                is_false_positive: false,
                feedback: String::new(),
            });
            Some(id)
        });

        if let Some(id) = &requested {
            self.lock_reserved().remove(id);
        }

        let id = result?.unwrap_or_default();
        tracing::info!(alert_id = %id, kind = %new.kind, "Alert recorded");
        Ok(id)
    }

    /// All alerts, newest first.
    pub fn get_all(&self) -> Vec<Alert> {
        self.query(&AlertFilter::default())
    }

    /// Alerts matching `filter`, newest first.
    pub fn query(&self, filter: &AlertFilter) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = self
            .lock()
            .iter()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        alerts.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        alerts
    }

    pub fn get_by_id(&self, id: &str) -> Option<Alert> {
        self.lock().iter().find(|a| a.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Flag an alert as a false positive with reviewer feedback.
    ///
    /// Returns `Ok(false)` if no alert has this id.
    pub fn mark_false_positive(&self, id: &str, feedback: &str) -> Result<bool, StoreError> {
        let marked = self.mutate(|alerts| {
            let alert = alerts.iter_mut().find(|a| a.id == id)?;
            alert.is_false_positive = true;
            alert.feedback = feedback.to_string();
            Some(())
        })?;

        if marked.is_some() {
            tracing::info!(alert_id = %id, "Alert marked as false positive");
        }
        Ok(marked.is_some())
    }

    /// Remove an alert and, best effort, its evidence files.
    ///
    /// Files still referenced by another alert are kept. Returns `Ok(false)`
    /// if no alert has this id.
    pub fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let outcome = self.mutate(|alerts| {
            let index = alerts.iter().position(|a| a.id == id)?;
            let removed = alerts.remove(index);
            let still_used: HashSet<PathBuf> = alerts
                .iter()
                .flat_map(|a| a.evidence_paths().cloned())
                .collect();
            let orphaned: Vec<PathBuf> = removed
                .evidence_paths()
                .filter(|p| !still_used.contains(*p))
                .cloned()
                .collect();
            Some(orphaned)
        })?;

        let Some(orphaned) = outcome else {
            return Ok(false);
        };
        for path in &orphaned {
            if !path.exists() {
                continue;
            }
            if let Err(e) = std::fs::remove_file(path) {
                tracing::warn!(alert_id = %id, path = %path.display(), "Could not delete evidence: {e}");
            }
        }

        tracing::info!(alert_id = %id, "Alert deleted");
        Ok(true)
    }

    /// Apply `change` to the latest snapshot and persist it.
    ///
    /// `change` returns `None` to abort without writing. The in-memory copy is
    /// replaced only after the write succeeds.
    fn mutate<R>(&self, change: impl FnOnce(&mut Vec<Alert>) -> Option<R>) -> Result<Option<R>, StoreError> {
        let mut alerts = self.lock();
        let _file_lock = self.lock_file()?;
        self.reload(&mut alerts);

        let mut next = alerts.clone();
        let Some(result) = change(&mut next) else {
            return Ok(None);
        };
        self.persist(&next)?;
        *alerts = next;
        Ok(Some(result))
    }

    /// Replace `alerts` with the snapshot on disk, if it can be read.
    fn reload(&self, alerts: &mut Vec<Alert>) {
        let Some(path) = &self.path else {
            return;
        };
        match load_alerts(path) {
            Ok(Some(on_disk)) => *alerts = on_disk,
            Ok(None) => alerts.clear(),
            Err(e) => {
                tracing::warn!(path = %path.display(), "Could not reload alerts, keeping cached copy: {e}");
            }
        }
    }

    fn persist(&self, alerts: &[Alert]) -> Result<(), StoreError> {
        match &self.path {
            Some(path) => write_snapshot(path, alerts),
            None => Ok(()),
        }
    }

    fn lock_file(&self) -> Result<Option<StoreFileLock>, StoreError> {
        match &self.path {
            Some(path) => StoreFileLock::acquire(path).map(Some),
            None => Ok(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Alert>> {
        self.alerts.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_reserved(&self) -> MutexGuard<'_, HashSet<String>> {
        self.reserved.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Exclusive advisory lock on `<store>.lock`, released on drop.
struct StoreFileLock {
    file: File,
}

impl StoreFileLock {
    fn acquire(store_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = store_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Io(e.to_string()))?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(sibling_path(store_path, ".lock"))
            .map_err(|e| StoreError::Io(e.to_string()))?;
        FileExt::lock_exclusive(&file).map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(Self { file })
    }
}

impl Drop for StoreFileLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Thread-safe shared alert store.
pub type SharedAlertStore = Arc<AlertStore>;

/// Open a shared alert store persisted at `path`.
pub fn open_shared_store(path: impl Into<PathBuf>) -> SharedAlertStore {
    Arc::new(AlertStore::open(path))
}

/// Short random id not used in `alerts` nor already reserved.
fn fresh_id(alerts: &[Alert], reserved: &HashSet<String>) -> String {
    loop {
        let id = Uuid::new_v4().simple().to_string()[..8].to_string();
        if !reserved.contains(&id) && !alerts.iter().any(|a| a.id == id) {
            return id;
        }
    }
}

/// `now`, nudged forward if needed so timestamps strictly increase.
fn next_timestamp(alerts: &[Alert], now: DateTime<Utc>) -> DateTime<Utc> {
    match alerts.iter().map(|a| a.timestamp).max() {
        Some(latest) if latest >= now => latest + chrono::Duration::microseconds(1),
        _ => now,
    }
}

fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn load_alerts(path: &Path) -> Result<Option<Vec<Alert>>, StoreError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path).map_err(|e| StoreError::Io(e.to_string()))?;
    let alerts = serde_json::from_str(&content).map_err(|e| StoreError::Parse(e.to_string()))?;
    Ok(Some(alerts))
}

/// Write the full collection to a temp file and rename it over `path`.
fn write_snapshot(path: &Path, alerts: &[Alert]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| StoreError::Io(e.to_string()))?;
    }

    let json = serde_json::to_string_pretty(alerts).map_err(|e| StoreError::Serialize(e.to_string()))?;

    let tmp = sibling_path(path, ".tmp");
    std::fs::write(&tmp, json).map_err(|e| StoreError::Io(e.to_string()))?;
    std::fs::rename(&tmp, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        StoreError::Io(e.to_string())
    })
}

/// Alert store errors.
#[derive(Debug)]
pub enum StoreError {
    Io(String),
    Parse(String),
    Serialize(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "IO error: {e}"),
            StoreError::Parse(e) => write!(f, "Parse error: {e}"),
            StoreError::Serialize(e) => write!(f, "Serialize error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::types::AlertKind;

    fn theft(description: &str) -> NewAlert {
        NewAlert::new(AlertKind::ObjectTheft, description)
    }

    #[test]
    fn test_add_then_get() {
        let store = AlertStore::in_memory();
        let id = store.add(theft("laptop missing")).unwrap();

        let alert = store.get_by_id(&id).unwrap();
        assert_eq!(alert.id.len(), 8);
        assert_eq!(alert.kind, AlertKind::ObjectTheft);
        assert!(!alert.is_false_positive);
        assert!(alert.feedback.is_empty());
    }

    #[test]
    fn test_mark_false_positive_is_sticky() {
        let store = AlertStore::in_memory();
        let id = store.add(theft("cup missing")).unwrap();

        assert!(store.mark_false_positive(&id, "note").unwrap());
        let alert = store.get_by_id(&id).unwrap();
        assert!(alert.is_false_positive);
        assert_eq!(alert.feedback, "note");

        assert!(store.mark_false_positive(&id, "").unwrap());
        assert!(store.get_by_id(&id).unwrap().is_false_positive);

        assert!(!store.mark_false_positive("missing0", "x").unwrap());
    }

    #[test]
    fn test_delete() {
        let store = AlertStore::in_memory();
        let id = store.add(theft("mouse missing")).unwrap();

        assert!(store.delete(&id).unwrap());
        assert!(store.get_by_id(&id).is_none());
        assert!(!store.delete(&id).unwrap());
        assert!(!store.delete("unknown0").unwrap());
    }

    #[test]
    fn test_get_all_newest_first() {
        let store = AlertStore::in_memory();
        let ids: Vec<String> = (0..5)
            .map(|i| store.add(theft(&format!("item {i}"))).unwrap())
            .collect();

        let listed: Vec<String> = store.get_all().into_iter().map(|a| a.id).collect();
        let expected: Vec<String> = ids.into_iter().rev().collect();
        assert_eq!(listed, expected);
    }

    #[test]
    fn test_timestamps_strictly_increase() {
        let now = Utc::now();
        let store = AlertStore::in_memory();
        store.add(theft("a")).unwrap();
        let latest = store.get_all()[0].timestamp;

        assert!(next_timestamp(&store.lock(), latest) > latest);
        assert_eq!(next_timestamp(&[], now), now);
    }

    #[test]
    fn test_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alerts.json");

        let store = AlertStore::open(&path);
        let id = store.add(theft("bottle missing")).unwrap();
        assert!(path.exists());
        store.mark_false_positive(&id, "staff took it").unwrap();
        drop(store);

        let reopened = AlertStore::open(&path);
        let alert = reopened.get_by_id(&id).unwrap();
        assert!(alert.is_false_positive);
        assert_eq!(alert.feedback, "staff took it");
    }

    #[test]
    fn test_sorts_unordered_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alerts.json");
        std::fs::write(
            &path,
            r#"[
  {"id": "aaaaaaaa", "timestamp": "2024-01-01T10:00:00Z", "alert_type": "object_theft",
   "description": "old", "video_path": null, "audio_path": null, "is_false_positive": false, "feedback": ""},
  {"id": "bbbbbbbb", "timestamp": "2024-03-01T10:00:00Z", "alert_type": "offensive_language",
   "description": "new", "video_path": null, "audio_path": null}
]"#,
        )
        .unwrap();

        let store = AlertStore::open(&path);
        let ids: Vec<String> = store.get_all().into_iter().map(|a| a.id).collect();
        assert_eq!(ids, vec!["bbbbbbbb", "aaaaaaaa"]);
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alerts.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = AlertStore::open(&path);
        assert!(store.is_empty());
    }

    #[test]
    fn test_failed_write_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alerts.json");
        let store = AlertStore::open(&path);
        let kept = store.add(theft("kept")).unwrap();

        // Replace the store file with a directory so the rename fails.
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();

        assert!(store.add(theft("lost")).is_err());
        assert_eq!(store.len(), 1);

        assert!(store.mark_false_positive(&kept, "x").is_err());
        assert!(!store.get_by_id(&kept).unwrap().is_false_positive);

        assert!(store.delete(&kept).is_err());
        assert!(store.get_by_id(&kept).is_some());
    }

    #[test]
    fn test_delete_removes_evidence() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("clip.gif");
        std::fs::write(&video, b"GIF89a").unwrap();
        let gone = dir.path().join("never-written.wav");

        let store = AlertStore::open(dir.path().join("alerts.json"));
        let id = store
            .add(
                theft("chair missing")
                    .with_video(Some(video.clone()))
                    .with_audio(Some(gone)),
            )
            .unwrap();

        assert!(store.delete(&id).unwrap());
        assert!(!video.exists());
    }

    #[test]
    fn test_open_does_not_create_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alerts.json");

        let store = AlertStore::open(&path);
        assert!(store.is_empty());
        assert!(store.get_by_id("aaaaaaaa").is_none());
        assert!(!store.mark_false_positive("aaaaaaaa", "x").unwrap());
        assert!(!path.exists());
    }

    #[test]
    fn test_reserved_id_is_used() {
        let store = AlertStore::in_memory();
        let first = store.reserve_id();
        let second = store.reserve_id();
        assert_ne!(first, second);

        let id = store.add(theft("bag missing").with_id(first.clone())).unwrap();
        assert_eq!(id, first);
        assert_eq!(store.get_by_id(&first).unwrap().description, "bag missing");
    }

    #[test]
    fn test_delete_keeps_shared_evidence() {
        let dir = tempfile::tempdir().unwrap();
        let clip = dir.path().join("shared.wav");
        std::fs::write(&clip, b"RIFF").unwrap();

        let store = AlertStore::open(dir.path().join("alerts.json"));
        let first = store.add(theft("a").with_audio(Some(clip.clone()))).unwrap();
        let second = store.add(theft("b").with_audio(Some(clip.clone()))).unwrap();

        assert!(store.delete(&first).unwrap());
        assert!(clip.exists(), "still referenced by {second}");

        assert!(store.delete(&second).unwrap());
        assert!(!clip.exists());
    }

    #[test]
    fn test_second_store_on_same_file_sees_review_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alerts.json");

        let agent = AlertStore::open(&path);
        let reviewed = agent.add(theft("laptop missing")).unwrap();
        let removed = agent.add(theft("phone missing")).unwrap();

        let review = AlertStore::open(&path);
        assert!(review.mark_false_positive(&reviewed, "staff moved it").unwrap());
        assert!(review.delete(&removed).unwrap());

        // The agent's cached copy is stale; its next write must not undo the review.
        let newer = agent.add(theft("bottle missing")).unwrap();
        assert!(agent.get_by_id(&removed).is_none());

        let reopened = AlertStore::open(&path);
        assert_eq!(reopened.len(), 2);
        assert!(reopened.get_by_id(&removed).is_none());
        assert!(reopened.get_by_id(&newer).is_some());
        let marked = reopened.get_by_id(&reviewed).unwrap();
        assert!(marked.is_false_positive);
        assert_eq!(marked.feedback, "staff moved it");
    }
}
