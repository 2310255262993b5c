//! Server-side file storage.
//!
//! The storage root is the only state the server keeps. [`Catalog`] answers
//! queries about it by scanning the directory, [`pattern`] implements the
//! wildcard matching used by SEARCH, and [`TempFile`] is how new content
//! reaches the root: written under a hidden name, then renamed into place.
mod catalog;
pub mod pattern;
mod staging;

pub use catalog::{Catalog, FileRecord, MAX_FILENAME_LEN, validate_filename};
pub use staging::TempFile;
