//! Temporary source edits for hot-reload checks

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::error::{E2eError, E2eResult};

#[derive(Debug)]
struct Edit {
    path: PathBuf,
    original: String,
}

/// Applies text transforms to files under the app directory and restores
/// them. Edits are undone in reverse order; anything still edited when the
/// editor is dropped is restored then.
#[derive(Debug)]
pub struct FileEditor {
    root: PathBuf,
    stack: Mutex<Vec<Edit>>,
}

impl FileEditor {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            stack: Mutex::new(Vec::new()),
        }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Rewrite `path` with `transform` applied to its content
    pub fn edit_file<F>(&self, path: impl AsRef<Path>, transform: F) -> E2eResult<()>
    where
        F: FnOnce(&str) -> String,
    {
        let path = self.resolve(path.as_ref());
        let original = std::fs::read_to_string(&path)?;
        let edited = transform(&original);

        if edited == original {
            warn!("Edit of {} changed nothing", path.display());
        }

        std::fs::write(&path, edited)?;
        info!("Edited {}", path.display());
        self.stack.lock().push(Edit { path, original });
        Ok(())
    }

    /// Restore the file touched by the most recent edit
    pub fn edit_file_revert(&self) -> E2eResult<()> {
        let edit = self.stack.lock().pop().ok_or(E2eError::NothingToRevert)?;
        std::fs::write(&edit.path, &edit.original)?;
        info!("Reverted {}", edit.path.display());
        Ok(())
    }

    /// Restore every outstanding edit
    pub fn revert_all(&self) -> E2eResult<()> {
        while !self.stack.lock().is_empty() {
            self.edit_file_revert()?;
        }
        Ok(())
    }

    pub fn pending(&self) -> usize {
        self.stack.lock().len()
    }
}

impl Drop for FileEditor {
    fn drop(&mut self) {
        if let Err(e) = self.revert_all() {
            warn!("Failed to revert edited files: {}", e);
        }
    }
}
