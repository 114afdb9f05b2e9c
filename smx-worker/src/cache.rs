//! Content-addressed source-audio download cache
//!
//! Cache entries are keyed by `sha256(scheme://host/path)` (query and
//! fragment excluded) with the URL's audio extension as suffix, `.wav`
//! otherwise. Writers download to a unique `.tmp-` file and atomically
//! rename; readers hard-link out of the cache, falling back to a byte copy
//! when linking fails. Eviction is size- and count-bounded, oldest-first by
//! modification time, and best-effort.

use smx_common::{hash, Error, Result};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Extensions kept verbatim on cache entries.
const KNOWN_AUDIO_SUFFIXES: &[&str] = &["wav", "mp3", "flac", "ogg", "aac", "m4a", "aif", "aiff"];

/// Marker embedded in in-flight download names; pruning skips these.
const TEMP_MARKER: &str = ".tmp-";

/// Overall budget for one source download.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);

/// Content-addressed download cache with bounded eviction
pub struct SourceCache {
    root: PathBuf,
    max_bytes: u64,
    max_files: u64,
    client: reqwest::Client,
    prune_lock: Mutex<()>,
}

impl SourceCache {
    /// Open (and create) the cache at `root`. A cap of 0 disables that
    /// eviction dimension.
    pub fn new(root: PathBuf, max_bytes: u64, max_files: u64) -> Result<Self> {
        std::fs::create_dir_all(&root)?;
        let client = reqwest::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build download client: {e}")))?;

        Ok(Self {
            root,
            max_bytes,
            max_files,
            client,
            prune_lock: Mutex::new(()),
        })
    }

    /// Cache file path for a source URL.
    pub fn cache_path(&self, source_url: &str) -> Result<PathBuf> {
        let parsed = url::Url::parse(source_url)
            .map_err(|e| Error::Validation(format!("invalid source URL {source_url}: {e}")))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| Error::Validation(format!("source URL has no host: {source_url}")))?;

        let key_input = format!("{}://{}{}", parsed.scheme(), host, parsed.path());
        let digest = hash::sha256_hex(key_input.as_bytes());
        let suffix = url_suffix(parsed.path());

        Ok(self.root.join(format!("{digest}.{suffix}")))
    }

    /// Ensure the source audio behind `source_url` is materialized at `dest`.
    ///
    /// Cache hits (existing entry with size > 0) are linked or copied out
    /// without touching the network. Misses download to a unique temp file,
    /// atomically publish it, prune, then link or copy.
    pub async fn stage(&self, source_url: &str, dest: &Path) -> Result<()> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let cache_path = self.cache_path(source_url)?;

        if let Ok(meta) = tokio::fs::metadata(&cache_path).await {
            if meta.is_file() && meta.len() > 0 {
                debug!(cache = %cache_path.display(), "Source cache hit");
                link_or_copy(&cache_path, dest)?;
                return Ok(());
            }
        }

        let temp_path = self.download_to_temp(source_url, &cache_path).await?;
        tokio::fs::rename(&temp_path, &cache_path).await?;

        self.prune().await;
        link_or_copy(&cache_path, dest)?;
        Ok(())
    }

    /// Stream the source into a unique temp file next to its cache slot.
    async fn download_to_temp(&self, source_url: &str, cache_path: &Path) -> Result<PathBuf> {
        let file_name = cache_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::Internal(format!("bad cache path {}", cache_path.display())))?;
        let temp_path = self.root.join(format!(
            "{file_name}{TEMP_MARKER}{}-{}",
            std::process::id(),
            uuid::Uuid::new_v4()
        ));

        let mut response = self
            .client
            .get(source_url)
            .send()
            .await
            .map_err(|e| Error::Download(format!("GET {source_url}: {e}")))?
            .error_for_status()
            .map_err(|e| Error::Download(format!("GET {source_url}: {e}")))?;

        let mut file = tokio::fs::File::create(&temp_path).await?;
        let mut total_bytes: u64 = 0;

        loop {
            let chunk = match response.chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) => {
                    drop(file);
                    let _ = tokio::fs::remove_file(&temp_path).await;
                    return Err(Error::Download(format!("stream from {source_url}: {e}")));
                }
            };
            total_bytes += chunk.len() as u64;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        drop(file);

        if total_bytes == 0 {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(Error::EmptySource(source_url.to_string()));
        }

        debug!(url = %source_url, bytes = total_bytes, "Source download complete");
        Ok(temp_path)
    }

    /// Evict oldest entries until both caps are respected. Never raises.
    pub async fn prune(&self) {
        let _guard = self.prune_lock.lock().await;

        let root = self.root.clone();
        let max_bytes = self.max_bytes;
        let max_files = self.max_files;

        let result = tokio::task::spawn_blocking(move || prune_blocking(&root, max_bytes, max_files))
            .await;
        if let Err(e) = result {
            warn!(error = %e, "Cache prune task failed");
        }
    }
}

/// Synchronous prune body; runs on the blocking pool under the cache lock.
fn prune_blocking(root: &Path, max_bytes: u64, max_files: u64) {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(error = %e, "Cache prune: cannot enumerate cache root");
            return;
        }
    };

    let mut files: Vec<(PathBuf, SystemTime, u64)> = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name();
        if name.to_string_lossy().contains(TEMP_MARKER) {
            continue;
        }
        let Ok(meta) = entry.metadata() else { continue };
        if !meta.is_file() {
            continue;
        }
        let mtime = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        files.push((entry.path(), mtime, meta.len()));
    }

    files.sort_by_key(|(_, mtime, _)| *mtime);

    let mut file_count = files.len() as u64;
    let mut total_bytes: u64 = files.iter().map(|(_, _, len)| len).sum();
    let mut oldest_first = files.into_iter();

    while (max_files > 0 && file_count > max_files) || (max_bytes > 0 && total_bytes > max_bytes) {
        let Some((path, _, len)) = oldest_first.next() else { break };
        if let Err(e) = std::fs::remove_file(&path) {
            warn!(path = %path.display(), error = %e, "Cache prune: deletion skipped");
        } else {
            debug!(path = %path.display(), "Cache prune: evicted");
        }
        file_count -= 1;
        total_bytes = total_bytes.saturating_sub(len);
    }
}

/// Suffix for a URL path: kept when it is a known audio extension.
fn url_suffix(url_path: &str) -> String {
    let ext = Path::new(url_path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();
    if KNOWN_AUDIO_SUFFIXES.contains(&ext.as_str()) {
        ext
    } else {
        "wav".to_string()
    }
}

/// Hard-link `src` to `dest`, falling back to a byte copy (cross-device
/// links, filesystems without link support).
fn link_or_copy(src: &Path, dest: &Path) -> Result<()> {
    if dest.exists() {
        std::fs::remove_file(dest)?;
    }
    if std::fs::hard_link(src, dest).is_err() {
        std::fs::copy(src, dest)?;
    }
    Ok(())
}
