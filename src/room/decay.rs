//! Same-owner opacity decay
//!
//! Every accepted post fades the author's earlier blocks by a fixed step.
//! A block whose opacity reaches zero is evicted; this is the only way block
//! records are reclaimed.

use super::block::Block;
use super::BlockId;

/// Decision produced for one existing block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecayEvent {
    OpacityChanged { id: BlockId, opacity: u8 },
    Evict { id: BlockId },
}

impl DecayEvent {
    pub fn id(&self) -> BlockId {
        match self {
            Self::OpacityChanged { id, .. } | Self::Evict { id } => *id,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DecayPolicy {
    step: u8,
}

impl DecayPolicy {
    pub fn new(step: u8) -> Self {
        Self { step }
    }

    /// Map the arrival of `new_block` onto the existing blocks.
    ///
    /// Blocks from other owners (and the new block itself) produce no event.
    pub fn on_create<'a>(
        &self,
        new_block: &Block,
        existing: impl IntoIterator<Item = &'a Block>,
    ) -> Vec<DecayEvent> {
        existing
            .into_iter()
            .filter(|b| b.user_id == new_block.user_id && b.id != new_block.id)
            .map(|b| {
                let opacity = b.opacity.saturating_sub(self.step);
                if opacity == 0 {
                    DecayEvent::Evict { id: b.id }
                } else {
                    DecayEvent::OpacityChanged { id: b.id, opacity }
                }
            })
            .collect()
    }
}

impl Default for DecayPolicy {
    fn default() -> Self {
        Self::new(10)
    }
}
