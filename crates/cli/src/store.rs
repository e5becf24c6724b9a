//! On-disk placement for a stack of reftable files.
//!
//! Spec §1 declares "concrete file-system placement... and
//! transactional fsync ordering" out of scope for the core, leaving it
//! to the hosting application. This module is that application-level
//! choice for the demo shell: a directory holding one file per table
//! plus a `tables.list` manifest naming them oldest-first, the same
//! shape `git`'s own reftable backend uses.

use anyhow::{Context, Result};
use reftable::{FileBlockSource, TableReader};
use reftable_config::WriterOptions;
use reftable_stack::{Compactor, Stack};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Manages the `tables.list` manifest and table files under one
/// directory.
pub struct TableStack {
    dir: PathBuf,
}

impl TableStack {
    /// Opens (creating if necessary) the stack directory at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating reftable stack directory {}", dir.display()))?;
        let store = Self { dir };
        if !store.list_path().exists() {
            fs::write(store.list_path(), "")?;
        }
        Ok(store)
    }

    fn list_path(&self) -> PathBuf {
        self.dir.join("tables.list")
    }

    /// Table file names, oldest first, as recorded in `tables.list`.
    fn table_names(&self) -> Result<Vec<String>> {
        let text = fs::read_to_string(self.list_path())?;
        Ok(text.lines().map(str::to_string).filter(|l| !l.is_empty()).collect())
    }

    /// Opens every listed table and returns the stack they form.
    pub fn load(&self) -> Result<Stack<FileBlockSource>> {
        let mut tables = Vec::new();
        for name in self.table_names()? {
            let path = self.dir.join(&name);
            let source = FileBlockSource::open(&path)
                .with_context(|| format!("opening reftable {}", path.display()))?;
            tables.push(Arc::new(TableReader::open(source)?));
        }
        Ok(Stack::new(tables))
    }

    /// Writes `bytes` as a new table named after `update_index` and
    /// appends it to the manifest, becoming the stack's newest member.
    pub fn publish(&self, update_index: u64, bytes: &[u8]) -> Result<PathBuf> {
        let name = format!("{update_index:020}.ref");
        let path = self.dir.join(&name);
        fs::write(&path, bytes)?;
        let mut names = self.table_names()?;
        names.push(name);
        fs::write(self.list_path(), names.join("\n") + "\n")?;
        Ok(path)
    }

    /// Folds every table currently in the stack into one new table,
    /// deleting the originals and rewriting the manifest to name only
    /// the replacement.
    pub fn compact_all(&self, options: &WriterOptions) -> Result<PathBuf> {
        let stack = self.load()?;
        let names = self.table_names()?;
        let mut compactor: Compactor<FileBlockSource> = Compactor::new();
        for (table, name) in stack.tables().iter().zip(names.iter()).rev() {
            let size = fs::metadata(self.dir.join(name)).map(|m| m.len()).unwrap_or(0);
            compactor.add_first(Arc::clone(table), size);
        }
        let bytes = compactor.compact(Vec::new(), options, false)?;
        let max_update_index = stack.max_update_index();
        let new_path = self.publish(max_update_index, &bytes)?;

        for name in names {
            let path = self.dir.join(&name);
            if path != new_path {
                let _ = fs::remove_file(path);
            }
        }
        // `publish` appended the new table without removing the old
        // names; rewrite the manifest so it names only the survivor.
        let new_name = new_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        fs::write(self.list_path(), new_name + "\n")?;
        Ok(new_path)
    }

    /// Directory backing this stack.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
