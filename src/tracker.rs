// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Durable per-hostname record of the last certificate attempt.
//!
//! Records survive restarts so the issuance cooldown holds across
//! deployments. They are created on the first attempt for a hostname and
//! only ever overwritten afterwards; nothing deletes them.
//!
//! # Directory Structure
//!
//! ```text
//! certificate-dir/
//! └── hosts/
//!     ├── mta-sts.example.com   # RFC 3339 timestamp of the last attempt
//!     └── mta-sts.example.org
//! ```

use crate::hostname;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Subdirectory of the certificate directory that holds attempt records.
pub const HOSTS_DIR: &str = "hosts";

/// Attempt store failures. The gatekeeper treats all of them as a denial.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Hostname {0:?} cannot be used as a storage key")]
    InvalidHostname(String),

    #[error("Attempt store I/O error for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Hostname → last-attempt timestamp store.
#[async_trait]
pub trait AttemptTracker: Send + Sync {
    /// Timestamp of the last recorded attempt, if any.
    async fn last_attempt(&self, host: &str) -> Result<Option<DateTime<Utc>>, TrackerError>;

    /// Create or overwrite the record for `host`.
    async fn record_attempt(&self, host: &str, at: DateTime<Utc>) -> Result<(), TrackerError>;

    /// Create the record for `host` only if none exists.
    ///
    /// Returns `false` when another caller already holds a record.
    async fn claim(&self, host: &str, at: DateTime<Utc>) -> Result<bool, TrackerError>;
}

fn storage_key(host: &str) -> Result<String, TrackerError> {
    hostname::storage_key(host).ok_or_else(|| TrackerError::InvalidHostname(host.to_string()))
}

/// Filesystem-backed tracker, one file per hostname.
#[derive(Debug, Clone)]
pub struct FsAttemptTracker {
    dir: PathBuf,
}

impl FsAttemptTracker {
    /// Tracker rooted at `<certificate_dir>/hosts`. The directory is created
    /// on first write.
    pub fn new(certificate_dir: &Path) -> Self {
        Self {
            dir: certificate_dir.join(HOSTS_DIR),
        }
    }

    /// Directory holding the records.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn io_error(path: &Path) -> impl FnOnce(io::Error) -> TrackerError + '_ {
        move |source| TrackerError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    async fn ensure_dir(&self) -> Result<(), TrackerError> {
        match fs::metadata(&self.dir).await {
            Ok(_) => return Ok(()),
            Err(e) if e.kind() != io::ErrorKind::NotFound => {
                return Err(Self::io_error(&self.dir)(e));
            }
            Err(_) => {}
        }

        fs::create_dir_all(&self.dir)
            .await
            .map_err(Self::io_error(&self.dir))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.dir, std::fs::Permissions::from_mode(0o700))
                .await
                .map_err(Self::io_error(&self.dir))?;
        }

        info!(dir = %self.dir.display(), "Created attempt record directory");
        Ok(())
    }
}

#[async_trait]
impl AttemptTracker for FsAttemptTracker {
    async fn last_attempt(&self, host: &str) -> Result<Option<DateTime<Utc>>, TrackerError> {
        let path = self.dir.join(storage_key(host)?);

        let contents = match fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Self::io_error(&path)(e)),
        };

        if let Ok(at) = DateTime::parse_from_rfc3339(contents.trim()) {
            return Ok(Some(at.with_timezone(&Utc)));
        }

        // Empty or foreign contents: the file's mtime is the attempt time.
        let modified = fs::metadata(&path)
            .await
            .and_then(|meta| meta.modified())
            .map_err(Self::io_error(&path))?;
        debug!(path = %path.display(), "Attempt record has no timestamp, using mtime");
        Ok(Some(DateTime::<Utc>::from(modified)))
    }

    async fn record_attempt(&self, host: &str, at: DateTime<Utc>) -> Result<(), TrackerError> {
        let path = self.dir.join(storage_key(host)?);
        self.ensure_dir().await?;
        fs::write(&path, at.to_rfc3339())
            .await
            .map_err(Self::io_error(&path))
    }

    async fn claim(&self, host: &str, at: DateTime<Utc>) -> Result<bool, TrackerError> {
        let path = self.dir.join(storage_key(host)?);
        self.ensure_dir().await?;

        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(Self::io_error(&path)(e)),
        };

        file.write_all(at.to_rfc3339().as_bytes())
            .await
            .map_err(Self::io_error(&path))?;
        file.flush().await.map_err(Self::io_error(&path))?;
        Ok(true)
    }
}

/// In-memory tracker. Records do not survive the process.
#[derive(Debug, Default)]
pub struct MemoryAttemptTracker {
    records: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl MemoryAttemptTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of hostnames with a record.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl AttemptTracker for MemoryAttemptTracker {
    async fn last_attempt(&self, host: &str) -> Result<Option<DateTime<Utc>>, TrackerError> {
        let key = storage_key(host)?;
        Ok(self.records.read().await.get(&key).copied())
    }

    async fn record_attempt(&self, host: &str, at: DateTime<Utc>) -> Result<(), TrackerError> {
        let key = storage_key(host)?;
        self.records.write().await.insert(key, at);
        Ok(())
    }

    async fn claim(&self, host: &str, at: DateTime<Utc>) -> Result<bool, TrackerError> {
        let key = storage_key(host)?;
        let mut records = self.records.write().await;
        if records.contains_key(&key) {
            return Ok(false);
        }
        records.insert(key, at);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_missing_record_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        let tracker = FsAttemptTracker::new(tmp.path());

        assert!(tracker.last_attempt("mta-sts.example.com").await.unwrap().is_none());
        // Reading does not create the directory.
        assert!(!tracker.dir().exists());
    }

    #[tokio::test]
    async fn test_record_then_read() {
        let tmp = tempfile::tempdir().unwrap();
        let tracker = FsAttemptTracker::new(tmp.path());
        let at = Utc::now() - Duration::hours(3);

        tracker.record_attempt("MTA-STS.Example.com", at).await.unwrap();

        let stored = tracker.last_attempt("mta-sts.example.com").await.unwrap().unwrap();
        assert_eq!(stored.timestamp(), at.timestamp());
        assert!(tmp.path().join(HOSTS_DIR).join("mta-sts.example.com").is_file());
    }

    #[tokio::test]
    async fn test_record_overwrites() {
        let tmp = tempfile::tempdir().unwrap();
        let tracker = FsAttemptTracker::new(tmp.path());
        let first = Utc::now() - Duration::days(2);
        let second = Utc::now();

        tracker.record_attempt("a.example.com", first).await.unwrap();
        tracker.record_attempt("a.example.com", second).await.unwrap();

        let stored = tracker.last_attempt("a.example.com").await.unwrap().unwrap();
        assert_eq!(stored.timestamp(), second.timestamp());
    }

    #[tokio::test]
    async fn test_untimestamped_file_uses_mtime() {
        let tmp = tempfile::tempdir().unwrap();
        let tracker = FsAttemptTracker::new(tmp.path());
        std::fs::create_dir_all(tracker.dir()).unwrap();
        std::fs::write(tracker.dir().join("old.example.com"), b"").unwrap();

        let stored = tracker.last_attempt("old.example.com").await.unwrap().unwrap();
        let age = Utc::now() - stored;
        assert!(age < Duration::minutes(1), "mtime should be recent, got {age}");
    }

    #[tokio::test]
    async fn test_claim_is_create_if_absent() {
        let tmp = tempfile::tempdir().unwrap();
        let tracker = FsAttemptTracker::new(tmp.path());
        let now = Utc::now();

        assert!(tracker.claim("b.example.com", now).await.unwrap());
        assert!(!tracker.claim("b.example.com", now).await.unwrap());
        assert!(tracker.last_attempt("b.example.com").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_traversal_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let tracker = FsAttemptTracker::new(tmp.path());

        let err = tracker
            .record_attempt("../../etc/passwd", Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, TrackerError::InvalidHostname(_)));
        assert!(tracker.last_attempt("..").await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_directory_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let tracker = FsAttemptTracker::new(tmp.path());
        tracker.record_attempt("c.example.com", Utc::now()).await.unwrap();

        let mode = std::fs::metadata(tracker.dir()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    #[tokio::test]
    async fn test_memory_tracker() {
        let tracker = MemoryAttemptTracker::new();
        let now = Utc::now();

        assert!(tracker.is_empty().await);
        assert!(tracker.claim("d.example.com", now).await.unwrap());
        assert!(!tracker.claim("D.EXAMPLE.COM.", now).await.unwrap());
        assert_eq!(tracker.len().await, 1);
        assert_eq!(tracker.last_attempt("d.example.com").await.unwrap(), Some(now));
    }
}
