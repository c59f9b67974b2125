//! Filesystem side of a request: staging directory, final naming, and the
//! move into place.
//!
//! Attempts only ever write inside a per-request staging directory. The
//! final filename is created by a rename after success, so it never points
//! at partial data.

use crate::core::error::AppResult;
use crate::download::backend::Metadata;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

const STAGING_PREFIX: &str = ".ladder-";

/// Renders a naming template. Recognized: `%(title)s`, `%(id)s`,
/// `%(uploader)s`, `%(ext)s`. The extension is appended when the template
/// has no `%(ext)s`. The result is a single sanitized file name.
pub fn render_name(template: &str, metadata: &Metadata, ext: &str) -> String {
    let mut name = template
        .replace("%(title)s", &metadata.title)
        .replace("%(id)s", &metadata.id)
        .replace("%(uploader)s", metadata.uploader.as_deref().unwrap_or("unknown"));

    if name.contains("%(ext)s") {
        name = name.replace("%(ext)s", ext);
    } else if !ext.is_empty() {
        name = format!("{}.{}", name, ext);
    }

    let sanitized = sanitize_filename::sanitize(name.trim());
    if sanitized.is_empty() || sanitized.starts_with('.') {
        format!("download{}", sanitized)
    } else {
        sanitized
    }
}

/// Appends ` (n)` before the extension.
fn numbered(path: &Path, n: usize) -> PathBuf {
    let stem = path.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
    let file_name = match path.extension() {
        Some(ext) => format!("{} ({}).{}", stem, n, ext.to_string_lossy()),
        None => format!("{} ({})", stem, n),
    };
    path.with_file_name(file_name)
}

/// Whether a produced file is usable: exists, is a file, and is non-empty.
pub async fn is_valid_output(path: &Path) -> bool {
    match tokio::fs::metadata(path).await {
        Ok(meta) => meta.is_file() && meta.len() > 0,
        Err(_) => false,
    }
}

/// Private working directory for one request.
#[derive(Debug)]
pub struct StagingArea {
    dir: PathBuf,
}

impl StagingArea {
    /// Creates `<output_dir>/.ladder-<uuid>` (and `output_dir` if missing).
    pub async fn create(output_dir: &Path) -> AppResult<Self> {
        let dir = output_dir.join(format!("{}{}", STAGING_PREFIX, uuid::Uuid::new_v4()));
        fs_err::tokio::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Drops leftovers of a failed attempt.
    pub async fn reset(&self) -> AppResult<()> {
        if tokio::fs::try_exists(&self.dir).await.unwrap_or(false) {
            fs_err::tokio::remove_dir_all(&self.dir).await?;
        }
        fs_err::tokio::create_dir_all(&self.dir).await?;
        Ok(())
    }

    /// Removes the staging directory; failures are only logged.
    pub async fn cleanup(self) {
        if let Err(e) = fs_err::tokio::remove_dir_all(&self.dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("Failed to remove staging dir {}: {}", self.dir.display(), e);
            }
        }
    }
}

/// Per-destination locks shared by every request of one engine, so two
/// requests never move a file onto the same path at once.
#[derive(Debug, Default)]
pub struct DestinationLocks {
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl DestinationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, path: &Path) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            // Forget paths nobody is holding
            locks.retain(|_, l| Arc::strong_count(l) > 1);
            Arc::clone(locks.entry(path.to_path_buf()).or_default())
        };
        lock.lock_owned().await
    }

    /// Moves `staged` into `output_dir` under the rendered name, picking a
    /// ` (n)` suffix if the name is taken. Holds the directory lock and the
    /// chosen path's lock while renaming. Returns the final path.
    pub async fn finalize(
        &self,
        staged: &Path,
        output_dir: &Path,
        template: &str,
        metadata: &Metadata,
    ) -> AppResult<PathBuf> {
        let ext = staged
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_default();
        let base = output_dir.join(render_name(template, metadata, &ext));

        // Picking a free name and renaming onto it is one step per directory:
        // the suffixed name may be another request's base name.
        let _dir_guard = self.acquire(output_dir).await;

        let mut target = base.clone();
        let mut n = 1;
        while tokio::fs::try_exists(&target).await.unwrap_or(false) {
            target = numbered(&base, n);
            n += 1;
        }

        let _target_guard = self.acquire(&target).await;
        fs_err::tokio::rename(staged, &target).await?;
        log::info!("Saved {}", target.display());
        Ok(target)
    }
}
