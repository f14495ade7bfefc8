//! Session Store (§4.11): one JSON file per session under a configured
//! directory, named by session id, written with an atomic write idiom
//! (write to a sibling temp file, `sync_data`, rename over the target) so
//! a crash mid-write never corrupts a prior snapshot. Holds only the
//! metadata in `ca_domain::session::SessionRecord` — conversation text
//! stays in the process-lifetime Conversation Store.

use std::path::{Path, PathBuf};

use ca_domain::error::{Error, Result};
use ca_domain::session::{SessionOrigin, SessionRecord};
use ca_domain::stream::Usage;
use chrono::Utc;
use tokio::fs;
use tokio::io::AsyncWriteExt;

pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    /// Open (creating if needed) a session store rooted at `dir`.
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{session_id}.json"))
    }

    async fn read(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        let path = self.path_for(session_id);
        match fs::read_to_string(&path).await {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Atomic write: temp sibling file, fsync, rename into place.
    async fn write(&self, record: &SessionRecord) -> Result<()> {
        let path = self.path_for(&record.session_id);
        let tmp_name = format!(".{}.{}.tmp", record.session_id, uuid::Uuid::new_v4().as_simple());
        let tmp_path = path.with_file_name(tmp_name);

        let json = serde_json::to_string_pretty(record)?;

        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(json.as_bytes()).await?;
        file.flush().await?;
        file.sync_data().await?;

        if let Err(e) = fs::rename(&tmp_path, &path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(Error::Io(e));
        }
        Ok(())
    }

    /// Load the record for `session_id`, creating and persisting a fresh
    /// one with the given origin if none exists.
    pub async fn get_or_create(&self, session_id: &str, origin: SessionOrigin) -> Result<SessionRecord> {
        if let Some(record) = self.read(session_id).await? {
            return Ok(record);
        }
        let record = SessionRecord::new(session_id, origin, Utc::now());
        self.write(&record).await?;
        Ok(record)
    }

    /// Apply a token-usage delta and bump `turn_count`/`last_active_at`.
    pub async fn record_usage(&self, session_id: &str, delta: &Usage) -> Result<SessionRecord> {
        let mut record = self
            .read(session_id)
            .await?
            .ok_or_else(|| Error::Internal(format!("no session record for '{session_id}'")))?;
        record.record_usage(delta, Utc::now());
        self.write(&record).await?;
        Ok(record)
    }

    /// Bump `last_active_at` without recording usage.
    pub async fn touch(&self, session_id: &str) -> Result<SessionRecord> {
        let mut record = self
            .read(session_id)
            .await?
            .ok_or_else(|| Error::Internal(format!("no session record for '{session_id}'")))?;
        record.touch(Utc::now());
        self.write(&record).await?;
        Ok(record)
    }

    /// Enumerate every known session record, newest-active-first.
    pub async fn list(&self) -> Result<Vec<SessionRecord>> {
        let mut entries = fs::read_dir(&self.dir).await?;
        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if stem.starts_with('.') {
                continue;
            }
            if let Some(record) = self.read(stem).await? {
                records.push(record);
            }
        }
        records.sort_by(|a, b| b.last_active_at.cmp(&a.last_active_at));
        Ok(records)
    }

    /// Drop the on-disk record for `session_id`. The in-memory Conversation
    /// Store's `clear()` is the authority on conversation contents; this
    /// only removes the persisted metadata. A missing record is not an
    /// error.
    pub async fn reset(&self, session_id: &str) -> Result<()> {
        let path = self.path_for(session_id);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_or_create_persists_new_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path()).await.unwrap();

        let record = store.get_or_create("s1", SessionOrigin::Cli).await.unwrap();
        assert_eq!(record.session_id, "s1");
        assert_eq!(record.turn_count, 0);
        assert!(dir.path().join("s1.json").exists());
    }

    #[tokio::test]
    async fn get_or_create_returns_existing_record_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path()).await.unwrap();

        let first = store.get_or_create("s1", SessionOrigin::Cli).await.unwrap();
        let second = store.get_or_create("s1", SessionOrigin::Http).await.unwrap();
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(second.origin, ca_domain::session::SessionOrigin::Cli);
    }

    #[tokio::test]
    async fn record_usage_accumulates_tokens_and_turn_count() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path()).await.unwrap();
        store.get_or_create("s1", SessionOrigin::Cli).await.unwrap();

        let delta = Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        };
        let updated = store.record_usage("s1", &delta).await.unwrap();
        assert_eq!(updated.turn_count, 1);
        assert_eq!(updated.token_usage.total_tokens, 15);

        let updated = store.record_usage("s1", &delta).await.unwrap();
        assert_eq!(updated.turn_count, 2);
        assert_eq!(updated.token_usage.total_tokens, 30);
    }

    #[tokio::test]
    async fn record_usage_on_unknown_session_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path()).await.unwrap();
        let err = store
            .record_usage("nope", &Usage::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }

    #[tokio::test]
    async fn list_returns_newest_active_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path()).await.unwrap();
        store.get_or_create("old", SessionOrigin::Cli).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.get_or_create("new", SessionOrigin::Cli).await.unwrap();
        store.touch("new").await.unwrap();

        let all = store.list().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].session_id, "new");
    }

    #[tokio::test]
    async fn reset_removes_record_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path()).await.unwrap();
        store.get_or_create("s1", SessionOrigin::Cli).await.unwrap();

        store.reset("s1").await.unwrap();
        assert!(!dir.path().join("s1.json").exists());
        store.reset("s1").await.unwrap();
    }
}
