//! Position broadcast pacing and delta filtering

use std::collections::HashMap;

use crate::ws::protocol::{PositionUpdate, ServerMsg};

use super::physics::BodyPose;
use super::BlockId;

/// Movement below this (px) is not re-broadcast
const POSITION_EPSILON: f32 = 0.05;
/// Rotation below this (rad) is not re-broadcast
const ANGLE_EPSILON: f32 = 0.001;

/// Decides which ticks broadcast and which poses changed enough to send
pub struct SnapshotBuilder {
    /// Tick counter since last broadcast
    ticks_since_snapshot: u32,
    /// Broadcast interval in ticks
    snapshot_interval: u32,
    /// Last pose sent per block
    last_sent: HashMap<BlockId, BodyPose>,
}

impl SnapshotBuilder {
    pub fn new(snapshot_interval: u32) -> Self {
        Self {
            ticks_since_snapshot: 0,
            snapshot_interval: snapshot_interval.max(1),
            last_sent: HashMap::new(),
        }
    }

    /// Check if this tick should broadcast
    pub fn should_send(&mut self) -> bool {
        self.ticks_since_snapshot += 1;
        if self.ticks_since_snapshot >= self.snapshot_interval {
            self.ticks_since_snapshot = 0;
            true
        } else {
            false
        }
    }

    /// Build `updatePosition` messages for poses that moved since last sent.
    ///
    /// All messages come from the same slice, i.e. one tick's output.
    pub fn build(&mut self, poses: &[BodyPose]) -> Vec<ServerMsg> {
        let mut updates = Vec::new();

        for pose in poses {
            let changed = match self.last_sent.get(&pose.id) {
                Some(prev) => {
                    (prev.x - pose.x).abs() > POSITION_EPSILON
                        || (prev.y - pose.y).abs() > POSITION_EPSILON
                        || (prev.angle - pose.angle).abs() > ANGLE_EPSILON
                }
                None => true,
            };

            if changed {
                self.last_sent.insert(pose.id, *pose);
                updates.push(ServerMsg::UpdatePosition(PositionUpdate {
                    id: pose.id,
                    x: pose.x,
                    y: pose.y,
                    angle: pose.angle,
                }));
            }
        }

        updates
    }

    /// Drop the remembered pose; the block is re-sent on the next broadcast if it still exists
    pub fn forget(&mut self, id: &BlockId) {
        self.last_sent.remove(id);
    }
}
