//! distorage-client: the owner's side of distorage
//!
//! Files are encrypted whole with the client's file key, cut into
//! fixed-size chunks, and each chunk is stored on several nodes picked from
//! a directory snapshot. A local JSON registry remembers where everything
//! went.

pub mod cleanup;
pub mod connector;
pub mod directory;
pub mod engine;
pub mod registry;
pub mod remote;

pub use cleanup::CleanupReport;
pub use connector::{NodeConnector, WsConnector};
pub use directory::{Directory, HttpDirectory, NodeMap, StaticDirectory};
pub use engine::{
    DeleteReport, DownloadReport, Engine, EngineSettings, ProgressFn, UploadReport,
};
pub use registry::FileRegistry;
pub use remote::NodeClient;
