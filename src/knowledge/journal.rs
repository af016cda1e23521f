//! NDJSON journal backing a persistent knowledge store.

use super::KnowledgeEntry;
use crate::error::{FlowError, Result};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub(super) enum JournalRecord {
    Put { entry: KnowledgeEntry },
    Delete { id: String },
}

pub(super) struct Journal {
    path: PathBuf,
    file: Mutex<File>,
}

impl Journal {
    pub(super) fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                FlowError::UserError(format!(
                    "failed to create directory '{}': {}",
                    parent.display(),
                    e
                ))
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| {
                FlowError::UserError(format!(
                    "failed to open knowledge journal '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    /// Read every record. Lines that fail to parse are skipped with a warning.
    pub(super) fn replay(path: &Path) -> Result<Vec<JournalRecord>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(path).map_err(|e| {
            FlowError::UserError(format!(
                "failed to read knowledge journal '{}': {}",
                path.display(),
                e
            ))
        })?;

        let mut records = Vec::new();
        for (lineno, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| {
                FlowError::UserError(format!("failed to read knowledge journal: {}", e))
            })?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(record) => records.push(record),
                Err(e) => warn!(
                    path = %path.display(),
                    line = lineno + 1,
                    error = %e,
                    "skipping unreadable knowledge journal line"
                ),
            }
        }
        Ok(records)
    }

    pub(super) fn append(&self, record: &JournalRecord) -> Result<()> {
        let line = serde_json::to_string(record).map_err(|e| {
            FlowError::UserError(format!("failed to serialize journal record: {}", e))
        })?;
        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        writeln!(file, "{}", line)
            .and_then(|_| file.sync_data())
            .map_err(|e| {
                FlowError::UserError(format!(
                    "failed to append to knowledge journal '{}': {}",
                    self.path.display(),
                    e
                ))
            })
    }
}
