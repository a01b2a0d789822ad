//! Block records and the per-room block store

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::decay::DecayEvent;
use super::{BlockId, RoomId, UserId};

/// Opacity assigned to every freshly created block
pub const FULL_OPACITY: u8 = 100;

/// One shared, ownable, decaying text block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    #[serde(rename = "_id")]
    pub id: BlockId,
    pub room: RoomId,
    pub text: String,
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub angle: f32,
    pub user_id: UserId,
    pub color1: String,
    pub color2: String,
    /// 0..=100, only ever decreases after creation
    pub opacity: u8,
    /// Character count of the text
    pub length: usize,
}

impl Block {
    pub fn new(
        room: RoomId,
        user_id: UserId,
        text: String,
        x: f32,
        y: f32,
        color1: String,
        color2: String,
    ) -> Self {
        let length = text.chars().count();
        Self {
            id: Uuid::new_v4(),
            room,
            text,
            x,
            y,
            angle: 0.0,
            user_id,
            color1,
            color2,
            opacity: FULL_OPACITY,
            length,
        }
    }
}

/// Blocks of one room, keyed by id, remembering creation order
#[derive(Debug, Default)]
pub struct BlockStore {
    blocks: HashMap<BlockId, Block>,
    order: Vec<BlockId>,
}

impl BlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, block: Block) {
        if self.blocks.insert(block.id, block.clone()).is_none() {
            self.order.push(block.id);
        }
    }

    pub fn get(&self, id: &BlockId) -> Option<&Block> {
        self.blocks.get(id)
    }

    pub fn remove(&mut self, id: &BlockId) -> Option<Block> {
        let removed = self.blocks.remove(id)?;
        self.order.retain(|b| b != id);
        Some(removed)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Blocks authored by `user_id`, oldest first
    pub fn owned_by<'a>(&'a self, user_id: &'a str) -> impl Iterator<Item = &'a Block> + 'a {
        self.iter().filter(move |b| b.user_id == user_id)
    }

    /// All blocks, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &Block> {
        self.order.iter().filter_map(|id| self.blocks.get(id))
    }

    /// Cloned snapshot for late joiners
    pub fn snapshot(&self) -> Vec<Block> {
        self.iter().cloned().collect()
    }

    /// Apply one decay decision. Returns false if the block is already gone.
    pub fn apply_decay(&mut self, event: &DecayEvent) -> bool {
        match event {
            DecayEvent::OpacityChanged { id, opacity } => match self.blocks.get_mut(id) {
                Some(block) => {
                    // Opacity never increases after creation
                    block.opacity = (*opacity).min(block.opacity);
                    true
                }
                None => false,
            },
            DecayEvent::Evict { id } => self.remove(id).is_some(),
        }
    }

    /// Write a simulated or relayed pose back into the record
    pub fn set_pose(&mut self, id: &BlockId, x: f32, y: f32, angle: f32) -> bool {
        match self.blocks.get_mut(id) {
            Some(block) => {
                block.x = x;
                block.y = y;
                block.angle = angle;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(user: &str, text: &str) -> Block {
        Block::new(
            "room".into(),
            user.into(),
            text.into(),
            10.0,
            20.0,
            "#111".into(),
            "#222".into(),
        )
    }

    #[test]
    fn test_snapshot_keeps_creation_order() {
        let mut store = BlockStore::new();
        let a = block("a", "first");
        let b = block("b", "second");
        let c = block("a", "third");
        store.insert(a.clone());
        store.insert(b.clone());
        store.insert(c.clone());

        let texts: Vec<_> = store.snapshot().into_iter().map(|b| b.text).collect();
        assert_eq!(texts, vec!["first", "second", "third"]);

        let owned: Vec<_> = store.owned_by("a").map(|b| b.id).collect();
        assert_eq!(owned, vec![a.id, c.id]);
    }

    #[test]
    fn test_apply_decay_never_raises_opacity() {
        let mut store = BlockStore::new();
        let mut b = block("a", "hi");
        b.opacity = 50;
        store.insert(b.clone());

        assert!(store.apply_decay(&DecayEvent::OpacityChanged { id: b.id, opacity: 80 }));
        assert_eq!(store.get(&b.id).unwrap().opacity, 50);

        assert!(store.apply_decay(&DecayEvent::OpacityChanged { id: b.id, opacity: 40 }));
        assert_eq!(store.get(&b.id).unwrap().opacity, 40);
    }

    #[test]
    fn test_evict_removes_record() {
        let mut store = BlockStore::new();
        let b = block("a", "bye");
        store.insert(b.clone());

        assert!(store.apply_decay(&DecayEvent::Evict { id: b.id }));
        assert!(store.is_empty());
        assert!(!store.apply_decay(&DecayEvent::Evict { id: b.id }));
    }

    #[test]
    fn test_length_counts_chars() {
        let b = block("a", "héllo\nwörld");
        assert_eq!(b.length, 11);
        assert_eq!(b.opacity, FULL_OPACITY);
    }
}
