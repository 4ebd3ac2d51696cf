//! The user's documents and their on-disk snapshot.
//!
//! The whole library is one JSON array under the data directory. It is read
//! once at startup and rewritten only when [`Library::save`] is called.

use crate::error::{ReaderError, ReaderResult};
use crate::model::Book;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const LIBRARY_FILE_NAME: &str = "lingoflow_vault_v2.json";

#[derive(Debug, Clone)]
pub struct Library {
    path: PathBuf,
    books: Vec<Book>,
}

impl Library {
    /// An empty library that will save to `path`.
    pub fn empty(path: PathBuf) -> Self {
        Self {
            path,
            books: Vec::new(),
        }
    }

    pub fn snapshot_path(data_dir: &Path) -> PathBuf {
        data_dir.join(LIBRARY_FILE_NAME)
    }

    /// Load the snapshot from `data_dir`. A missing or unreadable snapshot
    /// yields an empty library.
    pub fn load(data_dir: &Path) -> Self {
        Self::load_from(Self::snapshot_path(data_dir))
    }

    pub fn load_from(path: PathBuf) -> Self {
        let data = match fs::read_to_string(&path) {
            Ok(data) => data,
            Err(err) => {
                debug!(path = %path.display(), "No library snapshot: {err}");
                return Self::empty(path);
            }
        };
        match serde_json::from_str::<Vec<Book>>(&data) {
            Ok(books) => {
                info!(path = %path.display(), books = books.len(), "Loaded library");
                Self { path, books }
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    "Library snapshot is corrupt; starting empty: {err}"
                );
                Self::empty(path)
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Newest first.
    pub fn books(&self) -> &[Book] {
        &self.books
    }

    pub fn len(&self) -> usize {
        self.books.len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Book> {
        self.books.iter().find(|book| book.id == id)
    }

    /// Insert at the front. A book with the same id is replaced.
    pub fn add(&mut self, book: Book) {
        self.books.retain(|existing| existing.id != book.id);
        self.books.insert(0, book);
    }

    pub fn remove(&mut self, id: &str) -> ReaderResult<Book> {
        let idx = self
            .books
            .iter()
            .position(|book| book.id == id)
            .ok_or_else(|| ReaderError::UnknownDocument(id.to_string()))?;
        Ok(self.books.remove(idx))
    }

    /// Overwrite the snapshot with the current contents.
    pub fn save(&self) -> ReaderResult<()> {
        let persistence = |what: &str, err: &dyn std::fmt::Display| {
            ReaderError::Persistence(format!("{what} {}: {err}", self.path.display()))
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| persistence("creating directory for", &err))?;
        }
        let contents =
            serde_json::to_string_pretty(&self.books).map_err(|err| persistence("encoding", &err))?;
        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, contents).map_err(|err| persistence("writing", &err))?;
        fs::rename(&temp_path, &self.path).map_err(|err| {
            let _ = fs::remove_file(&temp_path);
            persistence("replacing", &err)
        })?;
        debug!(path = %self.path.display(), books = self.books.len(), "Saved library");
        Ok(())
    }
}
