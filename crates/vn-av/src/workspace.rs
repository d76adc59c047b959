//! Per-job workspace with atomic finalization.
//!
//! A [`Workspace`] owns an exclusive hidden temporary directory created next
//! to the destination, so the finished output can be renamed into place in
//! one step. Dropping a workspace that was never finalized deletes the
//! directory together with any partial output.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use vn_core::Error;

/// Prefix of the hidden per-job directory.
const TEMP_PREFIX: &str = ".vidnorm-";

/// Workspace for one normalization job.
///
/// # Example
///
/// ```no_run
/// use vn_av::Workspace;
/// use std::path::Path;
///
/// let ws = Workspace::for_destination(
///     Path::new("/media/in.mkv"),
///     Path::new("/media/in.normalized.mp4"),
/// ).unwrap();
/// // ... write the result to ws.output() ...
/// let final_path = ws.finalize().unwrap();
/// ```
#[derive(Debug)]
pub struct Workspace {
    temp_dir: TempDir,
    destination: PathBuf,
}

impl Workspace {
    /// Create a workspace whose output will be moved to `destination`.
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] if `destination` names the source file or
    ///   has no file name.
    /// - [`Error::Io`] if the destination directory cannot be created or
    ///   the temp dir cannot be created in it.
    pub fn for_destination(source: &Path, destination: &Path) -> vn_core::Result<Self> {
        if same_path(source, destination) {
            return Err(Error::Validation(format!(
                "destination {} would overwrite the source",
                destination.display()
            )));
        }
        if destination.file_name().is_none() {
            return Err(Error::Validation(format!(
                "destination {} has no file name",
                destination.display()
            )));
        }

        let parent = match destination.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent)?;

        let temp_dir = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempdir_in(&parent)?;

        tracing::debug!(
            workspace = %temp_dir.path().display(),
            destination = %destination.display(),
            "workspace created"
        );

        Ok(Self {
            temp_dir,
            destination: destination.to_path_buf(),
        })
    }

    /// Where [`finalize`](Self::finalize) will place the output.
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Path to the temporary directory.
    pub fn temp_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    /// The temporary output path (keeps the destination's extension so
    /// ffmpeg can infer the muxer).
    pub fn output(&self) -> PathBuf {
        let name = match self.destination.extension() {
            Some(ext) => format!("output.{}", ext.to_string_lossy()),
            None => "output".to_string(),
        };
        self.temp_dir.path().join(name)
    }

    /// Remove a partial output so a retry starts from a clean slate.
    pub fn reset_output(&self) -> vn_core::Result<()> {
        match std::fs::remove_file(self.output()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Move the output to the destination and return the destination.
    ///
    /// The temp dir shares the destination's directory, so this is a single
    /// rename and the destination never holds a partial file. The temp
    /// directory is removed either way.
    ///
    /// # Errors
    ///
    /// Returns an error if the output file does not exist or the rename
    /// fails. The workspace is discarded in both cases.
    pub fn finalize(self) -> vn_core::Result<PathBuf> {
        let output = self.output();
        if !output.exists() {
            return Err(Error::pipeline(
                "finalize",
                format!("output file does not exist: {}", output.display()),
            ));
        }

        std::fs::rename(&output, &self.destination).map_err(|e| {
            Error::pipeline(
                "finalize",
                format!("failed to rename output to {}: {e}", self.destination.display()),
            )
        })?;

        tracing::debug!(destination = %self.destination.display(), "workspace finalized");
        Ok(self.destination.clone())
    }

    /// Discard the workspace and any partial output.
    pub fn discard(self) {
        let path = self.temp_dir.path().to_path_buf();
        match self.temp_dir.close() {
            Ok(()) => tracing::debug!(workspace = %path.display(), "workspace discarded"),
            Err(e) => tracing::warn!("Failed to remove workspace {}: {e}", path.display()),
        }
    }
}

/// Whether two paths name the same file, resolving the parent directory
/// when the second does not exist yet.
fn same_path(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    let canon = |p: &Path| -> Option<PathBuf> {
        if let Ok(c) = p.canonicalize() {
            return Some(c);
        }
        let parent = p.parent().filter(|d| !d.as_os_str().is_empty())?;
        Some(parent.canonicalize().ok()?.join(p.file_name()?))
    };
    match (canon(a), canon(b)) {
        (Some(ca), Some(cb)) => ca == cb,
        _ => false,
    }
}
