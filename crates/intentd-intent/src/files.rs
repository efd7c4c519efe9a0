//! Intent files on disk: writing new ones and archiving processed ones.
//!
//! The intents, archive and rejected directories are append/move-only.
//! Writers publish through a hidden temporary file plus rename so the watcher
//! never observes a half-written document, and every destination name is
//! unique so concurrent producers never overwrite each other.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::Utc;

use crate::dispatcher::{DispatchResult, IntentSink};
use crate::error::{IntentError, Result};
use crate::intent::{Intent, IntentDocument};

/// Name allocation attempts before giving up.
const NAME_ATTEMPTS: u32 = 100;

/// Suffix of the sidecar file holding a rejection reason.
pub const ERROR_SIDECAR_SUFFIX: &str = ".error.txt";

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Writes intents as JSON files into the intents directory.
///
/// Used by producers that hand off to the watcher instead of calling the
/// dispatcher directly.
#[derive(Debug)]
pub struct IntentFileWriter {
    dir: PathBuf,
    seq: AtomicU32,
}

impl IntentFileWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            seq: AtomicU32::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `intent` as `<yyyymmddTHHMMSS>_<intent>_<seq:03>.json`.
    pub fn write(&self, intent: &Intent) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir).map_err(|e| IntentError::io(&self.dir, e))?;
        let body = serde_json::to_vec_pretty(&IntentDocument::from_intent(intent))?;
        let stem = file_safe(&intent.name);

        for _ in 0..NAME_ATTEMPTS {
            let timestamp = Utc::now().format("%Y%m%dT%H%M%S");
            let seq = self.seq.fetch_add(1, Ordering::Relaxed) % 1000;
            let file_name = format!("{timestamp}_{stem}_{seq:03}.json");
            let destination = self.dir.join(&file_name);
            if destination.exists() {
                continue;
            }

            let temp = self.dir.join(format!(".{file_name}.tmp"));
            let mut file = match OpenOptions::new().write(true).create_new(true).open(&temp) {
                Ok(file) => file,
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(IntentError::io(&temp, e)),
            };
            file.write_all(&body)
                .and_then(|()| file.sync_all())
                .map_err(|e| IntentError::io(&temp, e))?;
            drop(file);

            if destination.exists() {
                let _ = fs::remove_file(&temp);
                continue;
            }
            fs::rename(&temp, &destination).map_err(|e| IntentError::io(&destination, e))?;
            tracing::debug!(path = %destination.display(), intent = %intent.name, "intent file written");
            return Ok(destination);
        }

        Err(IntentError::Internal(format!(
            "unable to allocate a unique intent file name in {} after {NAME_ATTEMPTS} attempts",
            self.dir.display()
        )))
    }
}

impl IntentSink for IntentFileWriter {
    fn submit(&self, intent: Intent) -> DispatchResult {
        match self.write(&intent) {
            Ok(path) => DispatchResult::Deferred { path },
            Err(e) => {
                tracing::warn!(intent = %intent.name, error = %e, "failed to write intent file");
                DispatchResult::Rejected { reason: e.to_string() }
            }
        }
    }
}

fn file_safe(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') { c } else { '_' })
        .collect()
}

// ---------------------------------------------------------------------------
// Archive
// ---------------------------------------------------------------------------

/// Moves processed intent files to the archive directory and malformed ones
/// to the rejected directory.  Nothing is ever deleted.
#[derive(Debug, Clone)]
pub struct IntentArchive {
    archive_dir: PathBuf,
    rejected_dir: PathBuf,
}

impl IntentArchive {
    pub fn new(archive_dir: impl Into<PathBuf>, rejected_dir: impl Into<PathBuf>) -> Self {
        Self {
            archive_dir: archive_dir.into(),
            rejected_dir: rejected_dir.into(),
        }
    }

    pub fn archive_dir(&self) -> &Path {
        &self.archive_dir
    }

    pub fn rejected_dir(&self) -> &Path {
        &self.rejected_dir
    }

    /// Create both directories.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.archive_dir, &self.rejected_dir] {
            fs::create_dir_all(dir).map_err(|e| IntentError::io(dir, e))?;
        }
        Ok(())
    }

    /// Move a processed intent file into the archive.
    pub fn archive(&self, path: &Path) -> Result<PathBuf> {
        let destination = move_unique(path, &self.archive_dir)?;
        tracing::info!(from = %path.display(), to = %destination.display(), "intent file archived");
        Ok(destination)
    }

    /// Move a malformed intent file into the rejected directory with a
    /// sibling `<file>.error.txt` holding `reason`.
    pub fn reject(&self, path: &Path, reason: &str) -> Result<PathBuf> {
        let destination = move_unique(path, &self.rejected_dir)?;
        let sidecar = sidecar_path(&destination);
        fs::write(&sidecar, format!("{reason}\n")).map_err(|e| IntentError::io(&sidecar, e))?;
        tracing::warn!(from = %path.display(), to = %destination.display(), reason, "intent file rejected");
        Ok(destination)
    }
}

/// `<file>.error.txt` next to `path`.
pub fn sidecar_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(ERROR_SIDECAR_SUFFIX);
    path.with_file_name(name)
}

fn move_unique(path: &Path, dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dir).map_err(|e| IntentError::io(dir, e))?;
    let destination = unique_destination(path, dir)?;
    if let Err(rename_err) = fs::rename(path, &destination) {
        // Cross-device moves cannot rename.
        fs::copy(path, &destination).map_err(|_| IntentError::io(path, rename_err))?;
        fs::remove_file(path).map_err(|e| IntentError::io(path, e))?;
    }
    Ok(destination)
}

fn unique_destination(path: &Path, dir: &Path) -> Result<PathBuf> {
    let file_name = path.file_name().ok_or_else(|| IntentError::InvalidIntent {
        reason: format!("not a file path: {}", path.display()),
    })?;
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return Ok(candidate);
    }

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    (1..=10_000)
        .map(|n| dir.join(format!("{stem}-{n}{extension}")))
        .find(|p| !p.exists())
        .ok_or_else(|| IntentError::Internal(format!("no free name for {} in {}", path.display(), dir.display())))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
