use std::ffi::OsString;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Places new file content over an existing file.
///
/// Split in two steps so that a failure between them leaves the target
/// untouched: [`stage`](FileReplacer::stage) writes a sibling temp file,
/// [`replace`](FileReplacer::replace) moves it over the target.
pub trait FileReplacer: Send + Sync {
    /// The temp file used when staging content for `target`.
    fn temp_path(&self, target: &Path) -> PathBuf;

    /// Write `bytes` to the temp file of `target` and return its path.
    fn stage(&self, target: &Path, bytes: &[u8]) -> io::Result<PathBuf>;

    /// Move `temp` over `target`. Returns `false` on failure, in which case
    /// `target` is unchanged.
    fn replace(&self, temp: &Path, target: &Path) -> bool;
}

/// [`FileReplacer`] using a same-directory temp file and `rename`.
///
/// The temp file sits next to the target, so the rename never crosses a
/// filesystem boundary and readers see either the old or the new file.
/// The temp name is fixed per target (`<name><suffix>`), which lets a later
/// attempt remove what a crashed one left behind.
#[derive(Debug, Clone)]
pub struct AtomicFileReplacer {
    suffix: String,
}

impl AtomicFileReplacer {
    pub fn new(suffix: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into(),
        }
    }
}

impl Default for AtomicFileReplacer {
    fn default() -> Self {
        Self::new(".temp")
    }
}

impl FileReplacer for AtomicFileReplacer {
    fn temp_path(&self, target: &Path) -> PathBuf {
        let mut name: OsString = target.file_name().map(OsString::from).unwrap_or_default();
        name.push(&self.suffix);
        target.with_file_name(name)
    }

    fn stage(&self, target: &Path, bytes: &[u8]) -> io::Result<PathBuf> {
        let temp = self.temp_path(target);

        if temp.exists() {
            log::debug!("Removing stale temp file {}", temp.display());
            fs::remove_file(&temp)?;
        }

        let mut f = fs::File::create(&temp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
        drop(f);

        // Keep the original's permissions; best effort, the content matters more
        if let Ok(meta) = fs::metadata(target) {
            if let Err(e) = fs::set_permissions(&temp, meta.permissions()) {
                log::debug!("Could not copy permissions to {}: {e}", temp.display());
            }
        }

        Ok(temp)
    }

    fn replace(&self, temp: &Path, target: &Path) -> bool {
        match fs::rename(temp, target) {
            Ok(()) => true,
            Err(e) => {
                log::error!(
                    "Failed to move {} over {}: {e}",
                    temp.display(),
                    target.display()
                );
                false
            }
        }
    }
}
