//! Best-effort durability for block records
//!
//! Rooms enqueue lifecycle changes without waiting; a single writer task
//! drains the queue in order, so a slow or failing store cannot hold up a
//! room's tick and a block's delete never overtakes its insert.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::room::{Block, BlockId};

use super::client::{eq, StoreClient};

const TABLE: &str = "messages";

/// Pending writes before new ones are dropped
const QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Serialize)]
struct BlockRow {
    id: BlockId,
    room: String,
    text: String,
    x: f32,
    y: f32,
    user_id: String,
    color1: String,
    color2: String,
    opacity: u8,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct OpacityPatch {
    opacity: u8,
}

#[derive(Debug)]
enum ArchiveOp {
    Created(BlockRow),
    Opacity { id: BlockId, opacity: u8 },
    Removed(BlockId),
}

/// Mirrors block lifecycle into the store
#[derive(Clone, Default)]
pub struct BlockArchive {
    queue: Option<mpsc::Sender<ArchiveOp>>,
}

impl BlockArchive {
    /// Start the writer task when a store is configured
    pub fn new(remote: Option<StoreClient>) -> Self {
        let Some(remote) = remote else {
            return Self::disabled();
        };
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        tokio::spawn(run_writer(remote, rx));
        Self { queue: Some(tx) }
    }

    /// Archive that drops every write
    pub fn disabled() -> Self {
        Self { queue: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.queue.is_some()
    }

    pub fn record_created(&self, block: &Block) {
        if !self.is_enabled() {
            return;
        }
        self.enqueue(ArchiveOp::Created(BlockRow {
            id: block.id,
            room: block.room.clone(),
            text: block.text.clone(),
            x: block.x,
            y: block.y,
            user_id: block.user_id.clone(),
            color1: block.color1.clone(),
            color2: block.color2.clone(),
            opacity: block.opacity,
            created_at: Utc::now(),
        }));
    }

    pub fn record_opacity(&self, id: BlockId, opacity: u8) {
        self.enqueue(ArchiveOp::Opacity { id, opacity });
    }

    pub fn record_removed(&self, id: BlockId) {
        self.enqueue(ArchiveOp::Removed(id));
    }

    fn enqueue(&self, op: ArchiveOp) {
        let Some(queue) = &self.queue else {
            return;
        };
        match queue.try_send(op) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(op)) => {
                warn!(?op, "Archive queue full, dropping write");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("Archive writer stopped");
            }
        }
    }

    #[cfg(test)]
    fn with_queue(capacity: usize) -> (Self, mpsc::Receiver<ArchiveOp>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { queue: Some(tx) }, rx)
    }
}

async fn run_writer(remote: StoreClient, mut rx: mpsc::Receiver<ArchiveOp>) {
    while let Some(op) = rx.recv().await {
        match op {
            ArchiveOp::Created(row) => {
                if let Err(e) = remote.insert(TABLE, &row).await {
                    error!(block_id = %row.id, error = %e, "Failed to archive block");
                }
            }
            ArchiveOp::Opacity { id, opacity } => {
                if let Err(e) = remote
                    .update(TABLE, &[eq("id", id)], &OpacityPatch { opacity })
                    .await
                {
                    error!(block_id = %id, error = %e, "Failed to archive opacity");
                }
            }
            ArchiveOp::Removed(id) => {
                if let Err(e) = remote.delete(TABLE, &[eq("id", id)]).await {
                    error!(block_id = %id, error = %e, "Failed to delete archived block");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block() -> Block {
        Block::new(
            "r".into(),
            "u".into(),
            "hello".into(),
            10.0,
            20.0,
            "#aabbcc".into(),
            "#abc".into(),
        )
    }

    #[tokio::test]
    async fn test_lifecycle_writes_keep_their_order() {
        let (archive, mut rx) = BlockArchive::with_queue(8);
        let b = block();

        archive.record_created(&b);
        archive.record_opacity(b.id, 90);
        archive.record_removed(b.id);
        drop(archive);

        assert!(matches!(rx.recv().await, Some(ArchiveOp::Created(row)) if row.id == b.id));
        assert!(matches!(rx.recv().await, Some(ArchiveOp::Opacity { id, opacity: 90 }) if id == b.id));
        assert!(matches!(rx.recv().await, Some(ArchiveOp::Removed(id)) if id == b.id));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_full_queue_drops_instead_of_blocking() {
        let (archive, mut rx) = BlockArchive::with_queue(1);

        let id = block().id;

        archive.record_opacity(id, 80);
        archive.record_removed(id);

        assert!(matches!(rx.try_recv(), Ok(ArchiveOp::Opacity { opacity: 80, .. })));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_disabled_archive_ignores_writes() {
        let archive = BlockArchive::disabled();
        assert!(!archive.is_enabled());
        let b = block();
        archive.record_created(&b);
        archive.record_removed(b.id);
    }
}
