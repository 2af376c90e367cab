//! certbatch: chunked batch issuance of X.509 device certificates.
//!
//! A request for N device identities is split into fixed-size chunks.
//! Each chunk is dispatched as an independent work item, issued against
//! one of three CA backends, packaged as a ZIP archive and uploaded under
//! a deterministic key. Finished chunks are later handed out as signed
//! URLs or merged into a single archive.
//!
//! # Architecture
//!
//! ```text
//! create_task ─► TaskPlanner ─► ChunkStore (PENDING records)
//!                    │
//!                    └─► WorkQueue ─► WorkerPool ─► ChunkWorker ─► ObjectStore
//!                                                        │
//!                                                        └─► ChunkStore (location, task status)
//!
//! get_task ─────────► ChunkStore
//! get_certificates ─► ResultAggregator ─► signed URLs | merged archive
//! delete_batch ─────► BatchCleaner
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! let (queue, mut receiver) = ChannelQueue::new();
//! let service = BatchService::new(config, backends, store, objects, Arc::new(queue))?;
//!
//! let task_id = service.create_task(1000, "factory", cert_info).await?;
//! WorkerPool::new(service.worker(), 4).drain(&mut receiver).await;
//!
//! let download = service.get_certificates(&task_id, DownloadType::Archive).await?;
//! ```

pub mod aggregator;
pub mod archive;
pub mod cleaner;
pub mod config;
pub mod dispatch;
pub mod planner;
pub mod service;
pub mod storage;
pub mod store;
pub mod worker;

// Re-exports for convenience.
pub use aggregator::ResultAggregator;
pub use cleaner::BatchCleaner;
pub use config::{PrivateCaConfig, ServiceConfig};
pub use dispatch::{ChannelQueue, PoolReport, QueueReceiver, WorkQueue, WorkerPool};
pub use planner::{plan_chunks, TaskPlanner};
pub use service::BatchService;
pub use storage::{FsObjectStore, MemoryObjectStore, ObjectStore};
pub use store::{ChunkStore, FileChunkStore, MemoryChunkStore};
pub use worker::ChunkWorker;

pub use certbatch_core::{CertError, Result};
