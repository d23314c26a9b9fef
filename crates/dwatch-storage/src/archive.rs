use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::fs;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ArchivedPage {
    pub content_hash: String,
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
    pub byte_size: usize,
    pub deduplicated: bool,
}

/// Hash-addressed archive of raw upstream page bodies, one directory per session.
#[derive(Debug, Clone)]
pub struct PageArchive {
    root: PathBuf,
}

impl PageArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    pub fn page_relative_path(
        &self,
        fetched_at: DateTime<Utc>,
        session: u32,
        cursor: u32,
        content_hash: &str,
    ) -> PathBuf {
        let day = fetched_at.format("%Y%m%d").to_string();
        PathBuf::from(format!("session-{session}"))
            .join(day)
            .join(format!("start-{cursor:06}-{content_hash}.json"))
    }

    /// Writes through a temp file and rename; identical bodies land on the same path.
    pub async fn store_page(
        &self,
        fetched_at: DateTime<Utc>,
        session: u32,
        cursor: u32,
        bytes: &[u8],
    ) -> anyhow::Result<ArchivedPage> {
        let content_hash = Self::sha256_hex(bytes);
        let relative_path = self.page_relative_path(fetched_at, session, cursor, &content_hash);
        let absolute_path = self.root.join(&relative_path);
        let parent = absolute_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());

        fs::create_dir_all(&parent)
            .await
            .with_context(|| format!("creating archive directory {}", parent.display()))?;

        let archived = |deduplicated| ArchivedPage {
            content_hash: content_hash.clone(),
            relative_path: relative_path.clone(),
            absolute_path: absolute_path.clone(),
            byte_size: bytes.len(),
            deduplicated,
        };

        if fs::try_exists(&absolute_path)
            .await
            .with_context(|| format!("checking archive path {}", absolute_path.display()))?
        {
            return Ok(archived(true));
        }

        let written = write_new(&parent, &absolute_path, bytes)
            .await
            .with_context(|| format!("archiving page body to {}", absolute_path.display()))?;
        Ok(archived(!written))
    }
}

/// Stages `bytes` next to `target` and renames it into place. Returns `false`
/// when a concurrent writer got there first; the staged file never survives.
async fn write_new(dir: &Path, target: &Path, bytes: &[u8]) -> std::io::Result<bool> {
    let staged = dir.join(format!(".{}.partial", Uuid::new_v4()));
    let moved = match fs::write(&staged, bytes).await {
        Ok(()) => fs::rename(&staged, target).await,
        Err(err) => Err(err),
    };
    if moved.is_err() {
        let _ = fs::remove_file(&staged).await;
    }
    match moved {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn page_hashing_is_stable() {
        let hash = PageArchive::sha256_hex(b"hello world");
        assert_eq!(
            hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[tokio::test]
    async fn identical_pages_are_deduplicated() {
        let dir = tempdir().expect("tempdir");
        let archive = PageArchive::new(dir.path());
        let fetched_at = DateTime::parse_from_rfc3339("2026-02-24T12:00:00Z")
            .expect("ts")
            .with_timezone(&Utc);

        let first = archive
            .store_page(fetched_at, 215, 1, br#"{"numberOfRecords":0}"#)
            .await
            .expect("first store");
        let second = archive
            .store_page(fetched_at, 215, 1, br#"{"numberOfRecords":0}"#)
            .await
            .expect("second store");

        assert!(!first.deduplicated);
        assert!(second.deduplicated);
        assert_eq!(first.relative_path, second.relative_path);
        assert!(first
            .relative_path
            .starts_with(Path::new("session-215").join("20260224")));
        assert!(first.absolute_path.exists());
    }

    #[tokio::test]
    async fn archive_leaves_no_partial_files_behind() {
        let dir = tempdir().expect("tempdir");
        let archive = PageArchive::new(dir.path());
        let stored = archive
            .store_page(Utc::now(), 213, 101, br#"{"numberOfRecords":1}"#)
            .await
            .expect("store");

        let parent = stored.absolute_path.parent().expect("parent");
        let names = std::fs::read_dir(parent)
            .expect("read dir")
            .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        assert_eq!(names.len(), 1);
        assert!(names[0].starts_with("start-000101-"));
        assert_eq!(std::fs::read(&stored.absolute_path).expect("read"), br#"{"numberOfRecords":1}"#);
    }
}
