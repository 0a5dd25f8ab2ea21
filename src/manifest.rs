use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{BuildError, Result};

pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Parser,
    Transformer,
}

/// One rendered output file. `name` is rooted at `/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestFileItem {
    pub name: String,
    pub contents: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<FileKind>,
}

impl ManifestFileItem {
    pub fn new(name: impl Into<String>, contents: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            contents: contents.into(),
            kind: None,
        }
    }

    pub fn parser(name: impl Into<String>, contents: impl Into<String>) -> Self {
        Self {
            kind: Some(FileKind::Parser),
            ..Self::new(name, contents)
        }
    }

    pub fn transformer(name: impl Into<String>, contents: impl Into<String>) -> Self {
        Self {
            kind: Some(FileKind::Transformer),
            ..Self::new(name, contents)
        }
    }
}

/// Accumulated files for a session. A later item with the same name
/// replaces the earlier one in place.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    files: Vec<ManifestFileItem>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read `manifest.json` from `dir`, or start empty when there is none.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(MANIFEST_FILE);
        if !path.exists() {
            return Ok(Self::new());
        }
        let text = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(MANIFEST_FILE);
        std::fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(path)
    }

    pub fn apply(&mut self, delta: impl IntoIterator<Item = ManifestFileItem>) {
        for item in delta {
            match self.files.iter_mut().find(|f| f.name == item.name) {
                Some(existing) => *existing = item,
                None => self.files.push(item),
            }
        }
    }

    pub fn files(&self) -> &[ManifestFileItem] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }
}

/// Resolve a `/`-rooted file name beneath `dir`. Only plain path segments
/// are accepted.
fn output_path(dir: &Path, name: &str) -> Result<PathBuf> {
    let relative = Path::new(name.trim_start_matches('/'));
    let plain = relative
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !plain || relative.as_os_str().is_empty() {
        return Err(BuildError::InvalidPath(name.to_string()));
    }
    Ok(dir.join(relative))
}

/// Write files beneath `dir`, creating parent directories as needed.
/// Nothing is written if any name would escape `dir`.
pub fn write_files(dir: &Path, files: &[ManifestFileItem]) -> Result<Vec<PathBuf>> {
    let paths = files
        .iter()
        .map(|file| output_path(dir, &file.name))
        .collect::<Result<Vec<_>>>()?;
    let mut written = Vec::with_capacity(files.len());
    for (file, path) in files.iter().zip(paths) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, &file.contents)?;
        written.push(path);
    }
    info!("Wrote {} files to {}", written.len(), dir.display());
    Ok(written)
}
