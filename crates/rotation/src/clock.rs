use models::BlockIndex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Single-valued view of the chain's last finalized block, supplied
/// by the finalization engine.
#[async_trait::async_trait]
pub trait BlockClock: Send + Sync + 'static {
    async fn current_block(&self) -> anyhow::Result<BlockIndex>;
}

/// A hand-driven clock for tests and local tooling.
#[derive(Default)]
pub struct ManualClock(AtomicU64);

impl ManualClock {
    pub fn at(block: BlockIndex) -> Self {
        Self(AtomicU64::new(block))
    }

    pub fn set(&self, block: BlockIndex) {
        self.0.store(block, Ordering::SeqCst);
    }

    pub fn advance(&self, blocks: u64) {
        self.0.fetch_add(blocks, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl BlockClock for ManualClock {
    async fn current_block(&self) -> anyhow::Result<BlockIndex> {
        Ok(self.0.load(Ordering::SeqCst))
    }
}
