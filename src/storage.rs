//! Durable archive for fetched documents and crawl checkpoints.
//!
//! Layout under the data directory:
//! - `docs/<doc_id>.doc`: URL line, `key:value` metadata lines, a `---`
//!   delimiter, then the raw body bytes
//! - `checkpoints/latest.ckpt`: `key=value` per line
//! - `index/`: binary segments written by the indexer

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed document file: {0}")]
    Malformed(String),
}

pub struct Storage {
    data_dir: PathBuf,
}

impl Storage {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Result<Self, StorageError> {
        let data_dir = data_dir.as_ref().to_path_buf();
        fs::create_dir_all(data_dir.join("docs"))?;
        fs::create_dir_all(data_dir.join("checkpoints"))?;
        fs::create_dir_all(data_dir.join("index"))?;
        Ok(Self { data_dir })
    }

    pub fn index_dir(&self) -> PathBuf {
        self.data_dir.join("index")
    }

    fn document_path(&self, doc_id: u64) -> PathBuf {
        self.data_dir.join("docs").join(format!("{doc_id}.doc"))
    }

    pub fn save_document(
        &self,
        doc_id: u64,
        url: &str,
        body: &[u8],
        metadata: &HashMap<String, String>,
    ) -> Result<(), StorageError> {
        let mut file = fs::File::create(self.document_path(doc_id))?;

        writeln!(file, "{url}")?;
        // Sorted keys keep the file stable across runs
        let mut keys: Vec<&String> = metadata.keys().collect();
        keys.sort();
        for key in keys {
            writeln!(file, "{key}:{}", metadata[key])?;
        }
        writeln!(file, "---")?;
        file.write_all(body)?;

        Ok(())
    }

    /// Load the body of an archived document, or `None` when absent.
    pub fn load_document(&self, doc_id: u64) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.document_path(doc_id);
        if !path.exists() {
            return Ok(None);
        }

        let raw = fs::read(&path)?;
        let delimiter = b"---\n";
        let body_start = raw
            .windows(delimiter.len())
            .position(|window| window == delimiter)
            .ok_or_else(|| {
                StorageError::Malformed(format!("document {doc_id} has no body delimiter"))
            })?
            + delimiter.len();

        Ok(Some(raw[body_start..].to_vec()))
    }

    pub fn save_checkpoint(&self, state: &HashMap<String, String>) -> Result<(), StorageError> {
        let path = self.data_dir.join("checkpoints").join("latest.ckpt");
        let mut file = fs::File::create(path)?;

        let mut keys: Vec<&String> = state.keys().collect();
        keys.sort();
        for key in keys {
            writeln!(file, "{key}={}", state[key])?;
        }

        Ok(())
    }

    pub fn load_checkpoint(&self) -> Result<Option<HashMap<String, String>>, StorageError> {
        let path = self.data_dir.join("checkpoints").join("latest.ckpt");
        if !path.exists() {
            return Ok(None);
        }

        let mut state = HashMap::new();
        for line in fs::read_to_string(path)?.lines() {
            if let Some((key, value)) = line.split_once('=') {
                state.insert(key.to_string(), value.to_string());
            }
        }

        Ok(Some(state))
    }

    pub fn list_documents(&self) -> Result<Vec<u64>, StorageError> {
        let mut doc_ids = Vec::new();
        for entry in fs::read_dir(self.data_dir.join("docs"))? {
            let path = entry?.path();
            if path.extension().map(|e| e == "doc").unwrap_or(false) {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    if let Ok(doc_id) = stem.parse::<u64>() {
                        doc_ids.push(doc_id);
                    }
                }
            }
        }
        doc_ids.sort_unstable();
        Ok(doc_ids)
    }
}
