//! Cleanup sweep: finish purging soft-deleted files
//!
//! Every unavailable descriptor gets another delete attempt against its
//! leftover replicas. Entries with nothing left are dropped. Safe to run as
//! often as wanted; a file with no remaining replicas is removed on the
//! first pass that sees it.

use tracing::{debug, info, warn};
use uuid::Uuid;

use distorage_core::DistorageResult;

use crate::connector::NodeConnector;
use crate::directory::Directory;
use crate::engine::Engine;
use crate::registry::FileRegistry;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Soft-deleted entries that were looked at
    pub examined: usize,
    /// Entries removed from the registry during this pass
    pub removed: usize,
}

impl<D: Directory, C: NodeConnector> Engine<D, C> {
    pub async fn cleanup(&self, registry: &mut FileRegistry) -> DistorageResult<CleanupReport> {
        let pending: Vec<Uuid> = registry
            .read_all()
            .iter()
            .filter(|(_, descriptor)| !descriptor.available)
            .map(|(id, _)| *id)
            .collect();

        let mut report = CleanupReport {
            examined: pending.len(),
            ..Default::default()
        };
        if pending.is_empty() {
            debug!("cleanup: nothing pending");
            return Ok(report);
        }

        let nodes = self.snapshot().await?;
        for id in pending {
            let descriptor = registry.get(&id)?.clone();
            if self.settle(&id, descriptor, &nodes, registry).await? {
                report.removed += 1;
                info!(file_id = %id, "cleanup: file fully purged");
            } else {
                let left = registry.get(&id)?.replica_count();
                warn!(file_id = %id, replicas = left, "cleanup: replicas still pending");
            }
        }
        Ok(report)
    }
}
