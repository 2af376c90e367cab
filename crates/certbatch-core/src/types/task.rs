use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::certificate::CertificateInfo;
use crate::error::CertError;

/// Lifecycle of a task: every chunk pending, some done, all done
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// No chunk has produced an artifact yet
    Pending,
    /// Some chunks are done, some are not
    InProgress,
    /// Every chunk has an artifact location
    Complete,
}

impl TaskStatus {
    /// Derive the status from chunk counters.
    #[must_use]
    pub const fn from_counts(chunks_total: u32, chunks_pending: u32) -> Self {
        if chunks_pending == 0 {
            Self::Complete
        } else if chunks_pending >= chunks_total {
            Self::Pending
        } else {
            Self::InProgress
        }
    }

    /// Returns true once every chunk is done
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        matches!(self, Self::Complete)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::InProgress => write!(f, "IN_PROGRESS"),
            Self::Complete => write!(f, "COMPLETE"),
        }
    }
}

/// Status of a single chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChunkStatus {
    /// Waiting for a worker
    Pending,
    /// Archive uploaded
    Complete,
}

/// Task-level bookkeeping, written once at planning time and updated
/// together with the chunk that completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    /// Opaque task id
    pub task_id: String,

    /// When the task was planned
    pub batch_date: DateTime<Utc>,

    /// Number of chunks the task was split into
    pub chunks_total: u32,

    /// Chunks that have no artifact yet
    pub chunks_pending: u32,

    /// Current status
    pub status: TaskStatus,

    /// CA alias every chunk is issued against
    pub ca_alias: String,

    /// Subject template, already merged with environment defaults
    pub cert_info: CertificateInfo,
}

impl TaskRecord {
    /// Public view of this record
    #[must_use]
    pub fn summary(&self) -> TaskSummary {
        TaskSummary {
            task_id: self.task_id.clone(),
            status: self.status,
            batch_date: self.batch_date,
            chunks_total: self.chunks_total,
            chunks_pending: self.chunks_pending,
        }
    }
}

/// One unit of work within a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkRecord {
    /// Owning task
    pub task_id: String,

    /// 1-based position within the task
    pub chunk_id: u32,

    /// Number of identities in this chunk
    pub quantity: u64,

    /// Chunk status
    pub status: ChunkStatus,

    /// Artifact key, set once the archive is uploaded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    /// Copied from the task
    pub batch_date: DateTime<Utc>,
}

impl ChunkRecord {
    /// New record in the `PENDING` state.
    #[must_use]
    pub fn pending(
        task_id: impl Into<String>,
        chunk_id: u32,
        quantity: u64,
        batch_date: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            chunk_id,
            quantity,
            status: ChunkStatus::Pending,
            location: None,
            batch_date,
        }
    }

    /// A chunk is done when it has a non-empty location
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.location.as_deref().is_some_and(|l| !l.is_empty())
    }
}

/// Result of a status query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSummary {
    /// Task id
    pub task_id: String,
    /// Current status
    pub status: TaskStatus,
    /// When the task was planned
    pub batch_date: DateTime<Utc>,
    /// Number of chunks
    pub chunks_total: u32,
    /// Chunks without an artifact
    pub chunks_pending: u32,
}

/// Work item dispatched per chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkRequest {
    /// Subject and naming template
    pub cert_info: CertificateInfo,
    /// Owning task
    pub task_id: String,
    /// 1-based chunk id
    pub chunk_id: u32,
    /// Identities to issue in this chunk
    pub quantity: u64,
    /// CA alias to issue against
    pub ca_alias: String,
}

/// How the caller wants to retrieve a finished batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DownloadType {
    /// One merged archive written to a local file
    #[default]
    Archive,
    /// One time-limited URL per chunk archive
    SignedUrl,
}

impl FromStr for DownloadType {
    type Err = CertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "signedUrl" | "signed-url" | "signed_url" => Ok(Self::SignedUrl),
            "archive" | "zip" => Ok(Self::Archive),
            other => Err(CertError::invalid(format!("unknown download type '{other}'"))),
        }
    }
}

/// Result of a download request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CertificateDownload {
    /// Path of the merged archive
    Archive(PathBuf),
    /// Retrieval URLs, in chunk order
    SignedUrls(Vec<String>),
}
