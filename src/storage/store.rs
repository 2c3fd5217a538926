//! JSON key-value store
//!
//! The whole store is one JSON object kept in memory and rewritten on every
//! change. Writes go through a temp file in the same directory and a rename.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{OcrError, Result};

/// File-backed key-value store
#[derive(Debug)]
pub struct ProgressStore {
    path: PathBuf,
    data: Map<String, Value>,
}

impl ProgressStore {
    /// Open the store at `path`, starting empty if the file does not exist
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let data = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            if content.trim().is_empty() {
                Map::new()
            } else {
                match serde_json::from_str::<Value>(&content)? {
                    Value::Object(map) => map,
                    _ => {
                        return Err(OcrError::Storage(format!(
                            "{} does not contain a JSON object",
                            path.display()
                        )))
                    }
                }
            }
        } else {
            Map::new()
        };

        debug!("Opened progress store {} ({} keys)", path.display(), data.len());
        Ok(Self { path, data })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and deserialize the value under `key`
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.data.get(key) {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    /// Replace the value under `key`
    pub fn set<T: Serialize>(&mut self, key: &str, value: &T) -> Result<()> {
        self.data.insert(key.to_string(), serde_json::to_value(value)?);
        self.flush()
    }

    /// Append to the list under `key`, creating it if needed
    pub fn append<T: Serialize>(&mut self, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        match self.data.entry(key.to_string()).or_insert_with(|| Value::Array(Vec::new())) {
            Value::Array(items) => items.push(value),
            _ => return Err(OcrError::Storage(format!("key '{}' is not a list", key))),
        }
        self.flush()
    }

    /// Remove `key`, returning whether it existed
    pub fn remove(&mut self, key: &str) -> Result<bool> {
        if self.data.remove(key).is_none() {
            return Ok(false);
        }
        self.flush()?;
        Ok(true)
    }

    /// Keys starting with `prefix`
    pub fn keys_with_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.data.keys().map(String::as_str).filter(move |k| k.starts_with(prefix))
    }

    fn flush(&self) -> Result<()> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        serde_json::to_writer_pretty(&mut tmp, &self.data)?;
        tmp.write_all(b"\n")?;
        tmp.persist(&self.path).map_err(|e| OcrError::Io(e.error))?;
        Ok(())
    }
}
