//! distorage-node: storage node serving store/get/delete over WebSocket
//!
//! Layering, bottom up:
//!   store    — chunk record format, ownership checks, filesystem backend
//!   service  — per-connection handler: id check, preamble, operation
//!   server   — axum routes and the WebSocket frame adapter
//!   announce — long-lived registration with the directory service
//!   metrics  — request counters, connection gauge, /metrics + /healthz

pub mod announce;
pub mod metrics;
pub mod server;
pub mod service;
pub mod store;

pub use metrics::NodeMetrics;
pub use service::{NodeService, Outcome};
pub use store::{verify_record, ChunkStore, FsChunkStore, MemoryChunkStore, RecordError};
