//! Queryable view of the files hosted in the storage root.
//!
//! The catalog keeps no index of its own: every query scans the storage
//! root. Uploads only ever reach the root through an atomic rename of a
//! hidden temporary file, and hidden names are never reported, so a scan
//! can not observe a file that is still being written.
use std::{
    fs,
    path::{Path, PathBuf},
    process,
    time::{Duration, SystemTime},
};

use log::{debug, info, warn};

use crate::{ExchangeError, logging::LogContext};

use super::{
    pattern,
    staging::{TempFile, temp_owner},
};

/// Longest filename accepted over the wire, in bytes.
pub const MAX_FILENAME_LEN: usize = 255;

/// Temporaries untouched for this long belong to no live transfer; active
/// ones are written at least once per idle timeout.
pub const STALE_TEMP_AGE: Duration = Duration::from_secs(60 * 60);

/// A fully stored file.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct FileRecord {
    pub name: String,
    pub size: u64,
}

impl FileRecord {
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
        }
    }
}

/// Check that `name` is a plain filename that can be used on the wire and
/// can not escape the storage root.
pub fn validate_filename(name: &str) -> Result<(), ExchangeError> {
    let reason = if name.is_empty() {
        Some("filename is empty")
    } else if name.len() > MAX_FILENAME_LEN {
        Some("filename is too long")
    } else if name == "." || name == ".." {
        Some("filename refers to a directory")
    } else if name.starts_with('.') {
        Some("hidden filenames are reserved")
    } else if name.contains(['/', '\\']) {
        Some("filename contains a path separator")
    } else if name.chars().any(|c| c.is_whitespace() || c.is_control()) {
        Some("filename contains whitespace or control characters")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(ExchangeError::ProtocolError(format!(
            "invalid filename '{}': {reason}",
            name.escape_debug()
        ))),
        None => Ok(()),
    }
}

#[derive(Debug, Clone)]
pub struct Catalog {
    root: PathBuf,
    ctx: LogContext,
}

impl Catalog {
    /// Open (creating if needed) the storage root.
    ///
    /// Fails with [`ExchangeError::StorageError`] if the root can not be
    /// created, is not a directory, or is not writable. Temporaries left
    /// behind by an earlier run and idle for [`STALE_TEMP_AGE`] are removed.
    pub fn open(root: impl Into<PathBuf>, ctx: LogContext) -> Result<Self, ExchangeError> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|e| ExchangeError::storage(format!("create {}", root.display()), e))?;
        if !root.is_dir() {
            return Err(ExchangeError::StorageError(format!(
                "{} is not a directory",
                root.display()
            )));
        }

        // Writability probe; removed again on drop.
        TempFile::create_in(&root, "probe")
            .map_err(|e| ExchangeError::storage(format!("write to {}", root.display()), e))?;

        let catalog = Self { root, ctx };
        catalog.sweep_stale(STALE_TEMP_AGE)?;
        info!("{} storage root set to {}", catalog.ctx, catalog.root.display());
        Ok(catalog)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Every stored file, ordered by filename.
    pub fn list_all(&self) -> Result<Vec<FileRecord>, ExchangeError> {
        let entries = fs::read_dir(&self.root)
            .map_err(|e| ExchangeError::storage("read storage root", e))?;

        let mut records = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| ExchangeError::storage("read directory entry", e))?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if validate_filename(&name).is_err() {
                continue;
            }
            let file_type = entry
                .file_type()
                .map_err(|e| ExchangeError::storage(format!("stat {name}"), e))?;
            if !file_type.is_file() {
                continue;
            }
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                // Replaced or removed between readdir and stat.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(ExchangeError::storage(format!("stat {name}"), e)),
            };
            records.push(FileRecord::new(name, metadata.len()));
        }

        records.sort();
        debug!("{} catalog holds {} files", self.ctx, records.len());
        Ok(records)
    }

    /// Stored files whose name matches the wildcard `pattern`, in filename order.
    pub fn search(&self, pattern: &str) -> Result<Vec<FileRecord>, ExchangeError> {
        Ok(self
            .list_all()?
            .into_iter()
            .filter(|record| pattern::matches(pattern, &record.name))
            .collect())
    }

    pub fn contains(&self, filename: &str) -> bool {
        self.resolve_path(filename).is_ok()
    }

    /// Path of a stored file, or [`ExchangeError::FileNotFound`].
    pub fn resolve_path(&self, filename: &str) -> Result<PathBuf, ExchangeError> {
        let not_found = || ExchangeError::FileNotFound(filename.to_string());
        validate_filename(filename).map_err(|_| not_found())?;

        let path = self.root.join(filename);
        match fs::symlink_metadata(&path) {
            Ok(metadata) if metadata.is_file() => Ok(path),
            _ => Err(not_found()),
        }
    }

    /// Where an upload of `filename` ends up once it completes.
    pub fn destination(&self, filename: &str) -> Result<PathBuf, ExchangeError> {
        validate_filename(filename)?;
        Ok(self.root.join(filename))
    }

    /// Remove temporaries written by other processes and untouched for at
    /// least `min_age`. Names without the pid and sequence tag are left alone.
    fn sweep_stale(&self, min_age: Duration) -> Result<(), ExchangeError> {
        let entries = fs::read_dir(&self.root)
            .map_err(|e| ExchangeError::storage(format!("read {}", self.root.display()), e))?;
        let now = SystemTime::now();

        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            match temp_owner(name) {
                Some(pid) if pid != process::id() => {}
                _ => continue,
            }
            let idle = entry
                .metadata()
                .and_then(|metadata| metadata.modified())
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or_default();
            if idle < min_age {
                debug!("{} keeping recent temporary file {name}", self.ctx);
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => debug!("{} removed stale temporary file {name}", self.ctx),
                Err(e) => warn!("{} could not remove stale {name}: {e}", self.ctx),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempdir::TempDir;

    use super::*;

    fn catalog_with(files: &[(&str, &[u8])]) -> (TempDir, Catalog) {
        let temp = TempDir::new("catalog").unwrap();
        for (name, content) in files {
            fs::write(temp.path().join(name), content).unwrap();
        }
        let catalog = Catalog::open(temp.path(), LogContext::new("test")).unwrap();
        (temp, catalog)
    }

    #[test]
    fn list_all_is_sorted_and_sized() {
        let (_temp, catalog) = catalog_with(&[("b.txt", b"bb"), ("a.mp4", b"a"), ("c.mp4", b"")]);

        let records = catalog.list_all().unwrap();
        assert_eq!(
            records,
            vec![
                FileRecord::new("a.mp4", 1),
                FileRecord::new("b.txt", 2),
                FileRecord::new("c.mp4", 0),
            ]
        );
    }

    #[test]
    fn repeated_listing_is_stable() {
        let (_temp, catalog) = catalog_with(&[("x", b"1"), ("y", b"22")]);
        assert_eq!(catalog.list_all().unwrap(), catalog.list_all().unwrap());
    }

    #[test]
    fn search_filters_with_wildcards() {
        let (_temp, catalog) = catalog_with(&[("a.mp4", b"1"), ("b.txt", b"2"), ("c.mp4", b"3")]);

        let names: Vec<_> = catalog
            .search("*.mp4")
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["a.mp4", "c.mp4"]);
    }

    #[test]
    fn temporaries_and_directories_are_invisible() {
        let (temp, catalog) = catalog_with(&[("real.bin", b"1")]);
        let _inflight = TempFile::create_in(temp.path(), "real.bin").unwrap();
        fs::create_dir(temp.path().join("subdir")).unwrap();

        assert_eq!(catalog.list_all().unwrap(), vec![FileRecord::new("real.bin", 1)]);
        assert!(!catalog.contains("subdir"));
    }

    #[test]
    fn resolve_path_rejects_missing_and_traversal() {
        let (_temp, catalog) = catalog_with(&[("here.txt", b"1")]);

        assert!(catalog.resolve_path("here.txt").is_ok());
        assert!(matches!(
            catalog.resolve_path("gone.txt"),
            Err(ExchangeError::FileNotFound(_))
        ));
        assert!(matches!(
            catalog.resolve_path("../here.txt"),
            Err(ExchangeError::FileNotFound(_))
        ));
    }

    #[test]
    fn sweep_removes_only_idle_tagged_temporaries() {
        let temp = TempDir::new("catalog").unwrap();
        let foreign = temp.path().join(".old.txt.1-1.part");
        let untagged = temp.path().join(".notes.part");
        fs::write(&foreign, b"junk").unwrap();
        fs::write(&untagged, b"keep").unwrap();

        // Fresh temporaries may belong to another server on the same root.
        let catalog = Catalog::open(temp.path(), LogContext::new("test")).unwrap();
        assert!(foreign.exists());

        catalog.sweep_stale(Duration::ZERO).unwrap();
        assert!(!foreign.exists());
        assert!(untagged.exists());
    }

    #[test]
    fn sweep_spares_own_temporaries() {
        let (temp, catalog) = catalog_with(&[]);
        let inflight = TempFile::create_in(temp.path(), "upload.bin").unwrap();

        catalog.sweep_stale(Duration::ZERO).unwrap();
        assert!(inflight.path().exists());
    }

    #[test]
    fn open_fails_on_file_root() {
        let temp = TempDir::new("catalog").unwrap();
        let file = temp.path().join("not-a-dir");
        fs::write(&file, b"").unwrap();

        let err = Catalog::open(&file, LogContext::new("test")).unwrap_err();
        assert!(matches!(err, ExchangeError::StorageError(_)));
    }

    #[test]
    fn filename_validation() {
        assert!(validate_filename("report.pdf").is_ok());
        for bad in ["", ".", "..", ".hidden", "a/b", "..\\x", "a b", "tab\t"] {
            assert!(validate_filename(bad).is_err(), "{bad:?} accepted");
        }
        assert!(validate_filename(&"x".repeat(MAX_FILENAME_LEN + 1)).is_err());
    }
}
