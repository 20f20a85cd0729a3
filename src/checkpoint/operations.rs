//! Bounded log of file mutations with the data needed to revert each one.

use std::io;
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Write,
    Delete,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Write => write!(f, "write"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// How to put a path back the way it was before an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum UndoData {
    /// The path did not exist before.
    Remove,
    /// Previous bytes, base64 encoded on disk.
    Restore {
        #[serde(with = "base64_bytes")]
        content: Vec<u8>,
    },
}

impl UndoData {
    pub fn from_previous(previous: Option<&[u8]>) -> Self {
        match previous {
            Some(bytes) => Self::Restore {
                content: bytes.to_vec(),
            },
            None => Self::Remove,
        }
    }

    pub(crate) async fn apply(&self, path: &Path) -> io::Result<()> {
        match self {
            Self::Remove => match tokio::fs::remove_file(path).await {
                Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
                _ => Ok(()),
            },
            Self::Restore { content } => {
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(path, content).await
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub id: String,
    pub kind: OperationKind,
    pub path: PathBuf,
    pub timestamp: DateTime<Utc>,
    pub undo_data: UndoData,
}

impl Operation {
    pub fn new(kind: OperationKind, path: PathBuf, undo_data: UndoData) -> Self {
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            kind,
            path,
            timestamp: Utc::now(),
            undo_data,
        }
    }
}

/// On-disk shape of `operations.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub(crate) struct OperationLog {
    /// Oldest first.
    pub operations: Vec<Operation>,
    /// Recorded since the last checkpoint was created.
    pub since_checkpoint: usize,
}

impl OperationLog {
    /// Appends and prunes the oldest entries beyond `cap`.
    pub fn push(&mut self, op: Operation, cap: usize) {
        self.operations.push(op);
        self.since_checkpoint += 1;
        if self.operations.len() > cap {
            let excess = self.operations.len() - cap;
            self.operations.drain(..excess);
        }
    }

    pub fn pop(&mut self) -> Option<Operation> {
        let op = self.operations.pop()?;
        self.since_checkpoint = self.since_checkpoint.saturating_sub(1);
        Some(op)
    }

    /// Newest first.
    pub fn recent(&self, limit: Option<usize>) -> Vec<Operation> {
        let iter = self.operations.iter().rev().cloned();
        match limit {
            Some(n) => iter.take(n).collect(),
            None => iter.collect(),
        }
    }
}

mod base64_bytes {
    use super::{Engine, STANDARD};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
