//! Reads playbook files and owns the temporary files a run creates.

use anyhow::Context;
use serde::de::DeserializeOwned;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Loads YAML data and tracks temporary files.
///
/// Temporary files (generated plays, credential variable files) live in one private directory
/// that is created on first use. [Loader::cleanup_all_tmp_files] removes it; so does dropping
/// the [Loader], but runs call the method explicitly so that removal failures get logged.
#[derive(Debug, Default)]
pub struct Loader {
    tmp_dir: Option<TempDir>,
    tmp_files: Vec<PathBuf>,
}

impl Loader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads and deserializes the YAML file at `path`.
    pub fn load_from_file<T: DeserializeOwned>(&self, path: impl AsRef<Path>) -> anyhow::Result<T> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_yaml::from_str(&text)
            .with_context(|| format!("failed to parse YAML in {}", path.display()))
    }

    /// Writes `contents` to a new temporary file whose name ends in `suffix`, readable only by
    /// the current user. Returns the file's path.
    pub fn write_tmp_file(&mut self, suffix: &str, contents: &[u8]) -> anyhow::Result<PathBuf> {
        let mut file = tempfile::Builder::new()
            .suffix(suffix)
            .tempfile_in(self.tmp_dir()?)
            .context("failed to create a temporary file")?;
        file.write_all(contents)
            .context("failed to write a temporary file")?;
        let (_, path) = file
            .keep()
            .context("failed to persist a temporary file")?;

        self.tmp_files.push(path.clone());
        Ok(path)
    }

    /// Writes `contents` to `<subdir>/<file_name>` inside the temporary directory, for files the
    /// engine finds by name. Returns the file's path.
    pub fn write_named_tmp_file(
        &mut self,
        subdir: &str,
        file_name: &str,
        contents: &[u8],
    ) -> anyhow::Result<PathBuf> {
        let dir = self.tmp_dir()?.join(subdir);
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
        let path = dir.join(file_name);
        fs::write(&path, contents)
            .with_context(|| format!("failed to write {}", path.display()))?;

        self.tmp_files.push(path.clone());
        Ok(path)
    }

    /// The private temporary directory, created on first use.
    fn tmp_dir(&mut self) -> anyhow::Result<&Path> {
        let dir = match self.tmp_dir.take() {
            Some(dir) => dir,
            None => TempDir::with_prefix("playrun-")
                .context("failed to create a temporary directory")?,
        };
        Ok(self.tmp_dir.insert(dir).path())
    }

    /// Paths of the temporary files that currently exist.
    pub fn tmp_files(&self) -> &[PathBuf] {
        &self.tmp_files
    }

    /// Removes every temporary file this loader created. Safe to call repeatedly.
    pub fn cleanup_all_tmp_files(&mut self) {
        self.tmp_files.clear();
        if let Some(dir) = self.tmp_dir.take() {
            let path = dir.path().to_path_buf();
            if let Err(err) = dir.close() {
                tracing::warn!(path = %path.display(), %err, "failed to remove temporary files");
            }
        }
    }
}
