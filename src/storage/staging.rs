//! Temporary files that only become visible through an atomic rename.
//!
//! A [`TempFile`] lives next to its eventual destination under a hidden,
//! `.part`-suffixed name. Dropping it without calling [`TempFile::persist`]
//! removes it from disk, so a failed or abandoned transfer leaves nothing
//! behind.
use std::{
    fs::{self, File, OpenOptions},
    io,
    path::{Path, PathBuf},
    process,
    sync::atomic::{AtomicU64, Ordering},
};

use log::trace;

const TEMP_SUFFIX: &str = ".part";

/// Longest slice of the label kept in a temporary name, in bytes. Keeps the
/// name under the usual 255-byte limit whatever the destination is called.
const MAX_LABEL_LEN: usize = 64;

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Process id that created the temporary `name`, if it has the
/// `.<label>.<pid>-<seq>.part` shape written by [`TempFile::create_in`].
pub(crate) fn temp_owner(name: &str) -> Option<u32> {
    let stem = name.strip_prefix('.')?.strip_suffix(TEMP_SUFFIX)?;
    let (_label, tag) = stem.rsplit_once('.')?;
    let (pid, seq) = tag.split_once('-')?;
    if seq.is_empty() || !seq.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    pid.parse().ok()
}

fn short_label(label: &str) -> &str {
    if label.len() <= MAX_LABEL_LEN {
        return label;
    }
    let mut end = MAX_LABEL_LEN;
    while !label.is_char_boundary(end) {
        end -= 1;
    }
    &label[..end]
}

#[derive(Debug)]
pub struct TempFile {
    path: PathBuf,
    file: Option<File>,
    persisted: bool,
}

impl TempFile {
    /// Create a fresh, empty temporary file in `dir`. `label` only makes the
    /// name easier to recognise; uniqueness comes from pid and a counter.
    pub fn create_in(dir: &Path, label: &str) -> io::Result<Self> {
        let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let path = dir.join(format!(
            ".{}.{}-{seq}{TEMP_SUFFIX}",
            short_label(label),
            process::id()
        ));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;
        trace!("created temporary file {}", path.display());

        Ok(Self {
            path,
            file: Some(file),
            persisted: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Borrow the open handle. Fails while it is taken by
    /// [`TempFile::take_file`].
    pub fn file_mut(&mut self) -> io::Result<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::other("temporary file handle is taken"))
    }

    /// Move the handle out, e.g. to hand it to an async runtime.
    pub fn take_file(&mut self) -> Option<File> {
        self.file.take()
    }

    pub fn restore_file(&mut self, file: File) {
        self.file = Some(file);
    }

    /// Flush to disk and rename onto `target`, replacing whatever was there.
    pub fn persist(mut self, target: &Path) -> io::Result<()> {
        if let Some(file) = self.file.take() {
            file.sync_all()?;
        }
        fs::rename(&self.path, target)?;
        self.persisted = true;
        if let Err(e) = sync_parent(target) {
            log::warn!("could not sync directory of {}: {e}", target.display());
        }
        trace!("persisted {} as {}", self.path.display(), target.display());
        Ok(())
    }
}

/// Make a rename into `target`'s directory durable.
#[cfg(unix)]
fn sync_parent(target: &Path) -> io::Result<()> {
    match target.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => File::open(dir)?.sync_all(),
        _ => File::open(".")?.sync_all(),
    }
}

#[cfg(not(unix))]
fn sync_parent(_target: &Path) -> io::Result<()> {
    Ok(())
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if self.persisted {
            return;
        }
        drop(self.file.take());
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                log::warn!("failed to discard {}: {e}", self.path.display());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempdir::TempDir;

    use super::*;

    #[test]
    fn dropped_temp_file_is_removed() {
        let temp = TempDir::new("staging").unwrap();
        let mut staged = TempFile::create_in(temp.path(), "a.txt").unwrap();
        staged.file_mut().unwrap().write_all(b"partial").unwrap();
        let path = staged.path().to_path_buf();
        assert!(path.exists());

        drop(staged);
        assert!(!path.exists());
    }

    #[test]
    fn persist_renames_onto_target() {
        let temp = TempDir::new("staging").unwrap();
        let target = temp.path().join("a.txt");
        fs::write(&target, b"old").unwrap();

        let mut staged = TempFile::create_in(temp.path(), "a.txt").unwrap();
        staged.file_mut().unwrap().write_all(b"new").unwrap();
        let temp_path = staged.path().to_path_buf();
        staged.persist(&target).unwrap();

        assert_eq!(fs::read(&target).unwrap(), b"new");
        assert!(!temp_path.exists());
    }

    #[test]
    fn temp_names_are_hidden_and_unique() {
        let temp = TempDir::new("staging").unwrap();
        let a = TempFile::create_in(temp.path(), "x").unwrap();
        let b = TempFile::create_in(temp.path(), "x").unwrap();

        assert_ne!(a.path(), b.path());
        let name = a.path().file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with('.'));
        assert_eq!(temp_owner(name), Some(process::id()));
    }

    #[test]
    fn long_labels_are_shortened() {
        let temp = TempDir::new("staging").unwrap();
        let label = format!("x{}.txt", "é".repeat(124));
        let mut staged = TempFile::create_in(temp.path(), &label).unwrap();
        staged.file_mut().unwrap().write_all(b"hi").unwrap();

        let target = temp.path().join(&label);
        staged.persist(&target).unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"hi");
    }

    #[test]
    fn taken_handle_is_an_error() {
        let temp = TempDir::new("staging").unwrap();
        let mut staged = TempFile::create_in(temp.path(), "a").unwrap();
        let file = staged.take_file().unwrap();
        assert!(staged.file_mut().is_err());

        staged.restore_file(file);
        assert!(staged.file_mut().is_ok());
    }

    #[test]
    fn owner_requires_the_full_shape() {
        assert_eq!(temp_owner(".a.txt.42-7.part"), Some(42));
        assert_eq!(temp_owner(".notes.part"), None);
        assert_eq!(temp_owner(".a.x-7.part"), None);
        assert_eq!(temp_owner(".a.42-.part"), None);
        assert_eq!(temp_owner("a.txt.42-7.part"), None);
    }
}
