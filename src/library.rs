//! In-memory listing of the files under the media root.
//!
//! The listing is a cache with an explicit refresh policy: rescans when
//! a read finds it older than the TTL, invalidation after uploads, and
//! an optional periodic rescan task.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::media;

/// One entry in the library listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaFile {
    /// File name without directories.
    pub name: String,
    /// Path relative to the media root, forward slashes.
    pub path: String,
    /// Size in bytes at scan time.
    pub size: u64,
}

/// Cached recursive listing of the media files under a root directory.
pub struct Library {
    root: PathBuf,
    ttl: Duration,
    cache: RwLock<Cache>,
}

#[derive(Default)]
struct Cache {
    files: Vec<MediaFile>,
    refreshed_at: Option<Instant>,
}

impl Library {
    pub fn new(root: PathBuf, ttl: Duration) -> Self {
        Library {
            root,
            ttl,
            cache: RwLock::new(Cache::default()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Current listing, rescanning first when the cache is stale.
    pub async fn list(&self) -> io::Result<Vec<MediaFile>> {
        {
            let cache = self.cache.read().await;
            if let Some(at) = cache.refreshed_at {
                if at.elapsed() < self.ttl {
                    return Ok(cache.files.clone());
                }
            }
        }

        self.refresh().await
    }

    /// Drops the cached listing so the next read rescans.
    pub async fn invalidate(&self) {
        self.cache.write().await.refreshed_at = None;
    }

    /// Rescans the media root and replaces the cached listing.
    pub async fn refresh(&self) -> io::Result<Vec<MediaFile>> {
        let root = self.root.clone();
        let files = task::spawn_blocking(move || scan(&root))
            .await
            .map_err(io::Error::other)??;

        let mut cache = self.cache.write().await;
        cache.files = files.clone();
        cache.refreshed_at = Some(Instant::now());
        debug!(count = files.len(), "media library refreshed");

        Ok(files)
    }

    /// Rescans on a fixed interval. Spawn as a background task.
    pub async fn refresh_periodically(self: Arc<Self>, every: Duration) {
        let mut ticker = tokio::time::interval(every);
        // the first tick fires immediately and the startup scan already
        // happened; skip it
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if let Err(err) = self.refresh().await {
                warn!(%err, "periodic media rescan failed");
            }
        }
    }
}

fn scan(root: &Path) -> io::Result<Vec<MediaFile>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(root) {
        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        if !media::is_media_file(path) {
            continue;
        }

        let rel = path.strip_prefix(root).unwrap_or(path);
        let size = entry.metadata().map_err(io::Error::from)?.len();

        files.push(MediaFile {
            name: entry.file_name().to_string_lossy().into_owned(),
            path: rel.to_string_lossy().replace('\\', "/"),
            size,
        });
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::Duration;

    use super::*;

    fn populate(root: &Path) {
        fs::create_dir_all(root.join("shows")).unwrap();
        fs::write(root.join("intro.mp4"), b"0123456789").unwrap();
        fs::write(root.join("shows/pilot.mkv"), b"abcdef").unwrap();
        fs::write(root.join("notes.txt"), b"not media").unwrap();
    }

    #[tokio::test]
    async fn test_list_finds_media_recursively() {
        let dir = tempfile::tempdir().unwrap();
        populate(dir.path());

        let library = Library::new(dir.path().to_path_buf(), Duration::from_secs(300));
        let files = library.list().await.unwrap();

        assert_eq!(
            vec![
                MediaFile {
                    name: "intro.mp4".into(),
                    path: "intro.mp4".into(),
                    size: 10,
                },
                MediaFile {
                    name: "pilot.mkv".into(),
                    path: "shows/pilot.mkv".into(),
                    size: 6,
                },
            ],
            files
        );
    }

    #[tokio::test]
    async fn test_cache_serves_until_invalidated() {
        let dir = tempfile::tempdir().unwrap();
        populate(dir.path());

        let library = Library::new(dir.path().to_path_buf(), Duration::from_secs(300));
        assert_eq!(2, library.list().await.unwrap().len());

        // a new file is invisible until the cache is dropped
        fs::write(dir.path().join("extra.webm"), b"xyz").unwrap();
        assert_eq!(2, library.list().await.unwrap().len());

        library.invalidate().await;
        assert_eq!(3, library.list().await.unwrap().len());
    }

    #[tokio::test]
    async fn test_zero_ttl_always_rescans() {
        let dir = tempfile::tempdir().unwrap();
        populate(dir.path());

        let library = Library::new(dir.path().to_path_buf(), Duration::ZERO);
        assert_eq!(2, library.list().await.unwrap().len());

        fs::write(dir.path().join("extra.webm"), b"xyz").unwrap();
        assert_eq!(3, library.list().await.unwrap().len());
    }

    #[tokio::test]
    async fn test_missing_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let library = Library::new(dir.path().join("nope"), Duration::ZERO);
        assert!(library.list().await.is_err());
    }
}
