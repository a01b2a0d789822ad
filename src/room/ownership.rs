//! Single-owner mutation rule
//!
//! Identity is whatever `userId` the connection asserted on join. There is no
//! cryptographic binding, so this is a trust boundary rather than a security
//! control.

use tracing::warn;

use super::block::Block;
use super::RoomError;

/// True iff `actor` may move, throw or remove `block`
pub fn may_mutate(actor: &str, block: &Block) -> bool {
    actor == block.user_id
}

/// Same rule as [`may_mutate`], reported as an error and logged for diagnostics
pub fn check(actor: &str, block: &Block) -> Result<(), RoomError> {
    if may_mutate(actor, block) {
        return Ok(());
    }

    warn!(
        actor = %actor,
        owner = %block.user_id,
        block_id = %block.id,
        "Dropping mutation from non-owner"
    );
    Err(RoomError::OwnershipViolation {
        actor: actor.to_string(),
        block_id: block.id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_owner_may_mutate() {
        let block = Block::new(
            "room".into(),
            "alice".into(),
            "hello".into(),
            0.0,
            0.0,
            "#000".into(),
            "#fff".into(),
        );

        assert!(may_mutate("alice", &block));
        assert!(!may_mutate("bob", &block));
        assert!(!may_mutate("", &block));
        assert!(!may_mutate("Alice", &block));

        assert!(check("alice", &block).is_ok());
        assert_eq!(
            check("bob", &block),
            Err(RoomError::OwnershipViolation {
                actor: "bob".into(),
                block_id: block.id,
            })
        );
    }
}
