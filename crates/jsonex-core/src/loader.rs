//! File loading for `$require`.
//!
//! Required files are identified by a virtual absolute path (`/a/b.json`)
//! resolved lexically against the requiring file's directory. The loader is
//! handed the physical location, which is that identity placed under `root`.

use crate::error::LoadError;
use serde_json::Value as Json;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

pub trait Loader {
    /// Read and parse the document stored at `path`.
    fn load(&self, path: &Path) -> Result<Json, LoadError>;
}

/// Reads UTF-8 JSON files from disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsLoader;

impl Loader for FsLoader {
    fn load(&self, path: &Path) -> Result<Json, LoadError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Serves documents from memory. Paths are normalized on insert and lookup,
/// so `/a/./b.json` and `/a/b.json` name the same entry.
#[derive(Debug, Clone, Default)]
pub struct MemoryLoader {
    files: HashMap<PathBuf, Json>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl AsRef<Path>, document: Json) {
        self.files.insert(normalize(path.as_ref()), document);
    }

    pub fn with(mut self, path: impl AsRef<Path>, document: Json) -> Self {
        self.insert(path, document);
        self
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl Loader for MemoryLoader {
    fn load(&self, path: &Path) -> Result<Json, LoadError> {
        self.files
            .get(&normalize(path))
            .cloned()
            .ok_or_else(|| LoadError::NotFound(path.to_path_buf()))
    }
}

/// Resolve `target` against `dir` into an absolute identity. `..` never climbs
/// above `/`.
pub fn resolve(dir: &Path, target: &str) -> PathBuf {
    let target = Path::new(target);
    if target.has_root() {
        normalize(target)
    } else {
        normalize(&dir.join(target))
    }
}

/// Physical location of the file identified by `id` under `root`.
pub fn locate(root: &Path, id: &Path) -> PathBuf {
    root.join(id.strip_prefix("/").unwrap_or(id))
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::from("/");
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::ParentDir => {
                out.pop();
            }
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
    out
}
