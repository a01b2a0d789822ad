//! Server-authoritative block physics
//!
//! One [`PhysicsWorld`] per room. Bodies are axis-aligned boxes sized from
//! their text; rotation is visual only and driven by collision spin.

use std::collections::{BTreeMap, HashMap};

use super::artifacts::Artifact;
use super::block::Block;
use super::{BlockId, ConnectionId};

/// Tunable constants for block motion
#[derive(Debug, Clone, Copy)]
pub struct BodyStats {
    /// Downward acceleration (px/s^2)
    pub gravity: f32,
    /// Per-step linear velocity retention
    pub drag: f32,
    /// Per-step angular velocity retention
    pub angular_drag: f32,
    /// Bounce factor against walls and other blocks
    pub restitution: f32,
    /// Tangential velocity retention on floor contact
    pub floor_friction: f32,
    /// Fraction of the pointer offset closed per step by a drag handle
    pub drag_stiffness: f32,
    /// Hard cap on speed (px/s)
    pub max_speed: f32,
}

impl Default for BodyStats {
    fn default() -> Self {
        Self {
            gravity: 900.0,
            drag: 0.99,
            angular_drag: 0.96,
            restitution: 0.3,
            floor_friction: 0.9,
            drag_stiffness: 0.35,
            max_speed: 2500.0,
        }
    }
}

/// Box dimensions derived from block text (same rule the renderer uses)
pub fn body_size(text: &str) -> (f32, f32) {
    let lines: Vec<&str> = text.split('\n').collect();
    let longest = lines.iter().map(|l| l.chars().count()).max().unwrap_or(0);
    let width = (10.0 * longest as f32).max(50.0);
    let height = 25.0 * lines.len() as f32 + 20.0;
    (width, height)
}

/// A simulated block
#[derive(Debug, Clone)]
pub struct Body {
    pub id: BlockId,
    pub x: f32,
    pub y: f32,
    pub angle: f32,
    pub vel_x: f32,
    pub vel_y: f32,
    pub angular_vel: f32,
    pub half_width: f32,
    pub half_height: f32,
}

impl Body {
    pub fn from_block(block: &Block) -> Self {
        let (width, height) = body_size(&block.text);
        Self {
            id: block.id,
            x: block.x,
            y: block.y,
            angle: block.angle,
            vel_x: 0.0,
            vel_y: 0.0,
            angular_vel: 0.0,
            half_width: width / 2.0,
            half_height: height / 2.0,
        }
    }
}

/// Pose of one body after a step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyPose {
    pub id: BlockId,
    pub x: f32,
    pub y: f32,
    pub angle: f32,
}

/// Temporary pointer binding held by one connection
#[derive(Debug, Clone, Copy)]
pub struct DragHandle {
    pub block_id: BlockId,
    pub target_x: f32,
    pub target_y: f32,
    /// Pointer position relative to the body center at grab time
    pub offset_x: f32,
    pub offset_y: f32,
}

/// Simulation world for one room
pub struct PhysicsWorld {
    width: f32,
    height: f32,
    stats: BodyStats,
    /// Ordered so collision resolution is reproducible
    bodies: BTreeMap<BlockId, Body>,
    emitters: Vec<Artifact>,
    drags: HashMap<ConnectionId, DragHandle>,
}

impl PhysicsWorld {
    pub fn new(width: f32, height: f32, emitters: Vec<Artifact>) -> Self {
        Self {
            width,
            height,
            stats: BodyStats::default(),
            bodies: BTreeMap::new(),
            emitters,
            drags: HashMap::new(),
        }
    }

    pub fn body(&self, id: &BlockId) -> Option<&Body> {
        self.bodies.get(id)
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    pub fn drag_count(&self) -> usize {
        self.drags.len()
    }

    pub fn add_body(&mut self, block: &Block) {
        let mut body = Body::from_block(block);
        self.contain(&mut body);
        self.bodies.insert(body.id, body);
    }

    /// Drop a body and any handle still holding it
    pub fn remove_body(&mut self, id: &BlockId) -> bool {
        self.drags.retain(|_, h| h.block_id != *id);
        self.bodies.remove(id).is_some()
    }

    /// One-shot corrective teleport. Clears velocity.
    pub fn set_position(&mut self, id: &BlockId, x: f32, y: f32) -> bool {
        let Some(mut body) = self.bodies.remove(id) else {
            return false;
        };
        body.x = x;
        body.y = y;
        body.vel_x = 0.0;
        body.vel_y = 0.0;
        body.angular_vel = 0.0;
        self.contain(&mut body);
        self.bodies.insert(body.id, body);
        true
    }

    /// Throw impulse: replaces the body's velocity
    pub fn apply_velocity(&mut self, id: &BlockId, vel_x: f32, vel_y: f32) -> bool {
        let max_speed = self.stats.max_speed;
        match self.bodies.get_mut(id) {
            Some(body) => {
                body.vel_x = vel_x.clamp(-max_speed, max_speed);
                body.vel_y = vel_y.clamp(-max_speed, max_speed);
                true
            }
            None => false,
        }
    }

    /// Bind a drag handle. A connection holds at most one handle.
    pub fn start_drag(&mut self, connection_id: ConnectionId, id: &BlockId, x: f32, y: f32) -> bool {
        if !x.is_finite() || !y.is_finite() {
            return false;
        }
        let Some(body) = self.bodies.get(id) else {
            return false;
        };
        self.drags.insert(
            connection_id,
            DragHandle {
                block_id: *id,
                target_x: x,
                target_y: y,
                offset_x: x - body.x,
                offset_y: y - body.y,
            },
        );
        true
    }

    pub fn drag_move(&mut self, connection_id: &ConnectionId, x: f32, y: f32) -> bool {
        if !x.is_finite() || !y.is_finite() {
            return false;
        }
        match self.drags.get_mut(connection_id) {
            Some(handle) => {
                handle.target_x = x;
                handle.target_y = y;
                true
            }
            None => false,
        }
    }

    /// Release the connection's handle, if any
    pub fn end_drag(&mut self, connection_id: &ConnectionId) -> Option<DragHandle> {
        self.drags.remove(connection_id)
    }

    /// Advance the world by `dt` seconds and return every body's pose
    pub fn step(&mut self, dt: f32) -> Vec<BodyPose> {
        self.apply_drags(dt);
        self.integrate(dt);
        self.resolve_collisions();
        self.collide_emitters();

        let mut bodies = std::mem::take(&mut self.bodies);
        for body in bodies.values_mut() {
            self.contain(body);
        }
        self.bodies = bodies;

        self.poses()
    }

    pub fn poses(&self) -> Vec<BodyPose> {
        self.bodies
            .values()
            .map(|b| BodyPose {
                id: b.id,
                x: b.x,
                y: b.y,
                angle: b.angle,
            })
            .collect()
    }

    fn apply_drags(&mut self, dt: f32) {
        let stiffness = self.stats.drag_stiffness;
        for handle in self.drags.values() {
            if let Some(body) = self.bodies.get_mut(&handle.block_id) {
                let goal_x = handle.target_x - handle.offset_x;
                let goal_y = handle.target_y - handle.offset_y;
                // Velocity that closes `stiffness` of the gap this step
                body.vel_x = (goal_x - body.x) * stiffness / dt;
                body.vel_y = (goal_y - body.y) * stiffness / dt;
                body.angular_vel *= 0.5;
            }
        }
    }

    fn integrate(&mut self, dt: f32) {
        let stats = self.stats;
        for body in self.bodies.values_mut() {
            let dragged = self.drags.values().any(|h| h.block_id == body.id);

            if !dragged {
                let lift: f32 = self.emitters.iter().map(|e| e.lift_at(body.x, body.y)).sum();
                body.vel_y += (stats.gravity - lift) * dt;
                body.vel_x *= stats.drag;
                body.vel_y *= stats.drag;
            }

            let speed = (body.vel_x * body.vel_x + body.vel_y * body.vel_y).sqrt();
            if !speed.is_finite() {
                body.vel_x = 0.0;
                body.vel_y = 0.0;
            } else if speed > stats.max_speed {
                let scale = stats.max_speed / speed;
                body.vel_x *= scale;
                body.vel_y *= scale;
            }

            body.x += body.vel_x * dt;
            body.y += body.vel_y * dt;
            body.angle = (body.angle + body.angular_vel * dt).rem_euclid(std::f32::consts::TAU);
            body.angular_vel *= stats.angular_drag;
        }
    }

    /// Push overlapping boxes apart along the axis of least penetration
    fn resolve_collisions(&mut self) {
        let restitution = self.stats.restitution;
        let ids: Vec<BlockId> = self.bodies.keys().copied().collect();

        for i in 0..ids.len() {
            for j in (i + 1)..ids.len() {
                let (Some(a), Some(b)) = (self.bodies.get(&ids[i]), self.bodies.get(&ids[j]))
                else {
                    continue;
                };
                let Some(contact) = overlap(a, b) else {
                    continue;
                };
                let (mut a, mut b) = (a.clone(), b.clone());
                separate(&mut a, &mut b, contact, restitution);
                self.bodies.insert(a.id, a);
                self.bodies.insert(b.id, b);
            }
        }
    }

    /// Emitters are fixed: overlapping blocks are pushed fully out and bounce
    fn collide_emitters(&mut self) {
        let restitution = self.stats.restitution;
        for body in self.bodies.values_mut() {
            for emitter in &self.emitters {
                let Some(contact) = box_overlap(
                    (emitter.x, emitter.y, emitter.width / 2.0, emitter.height / 2.0),
                    (body.x, body.y, body.half_width, body.half_height),
                ) else {
                    continue;
                };

                body.x += contact.nx * contact.depth;
                body.y += contact.ny * contact.depth;

                let into = body.vel_x * contact.nx + body.vel_y * contact.ny;
                if into < 0.0 {
                    body.vel_x -= (1.0 + restitution) * into * contact.nx;
                    body.vel_y -= (1.0 + restitution) * into * contact.ny;
                }
            }
        }
    }

    /// Keep a body inside the four walls, bouncing off them
    fn contain(&self, body: &mut Body) {
        let stats = self.stats;
        let min_x = body.half_width;
        let max_x = (self.width - body.half_width).max(min_x);
        let min_y = body.half_height;
        let max_y = (self.height - body.half_height).max(min_y);

        if body.x < min_x {
            body.x = min_x;
            body.vel_x = body.vel_x.abs() * stats.restitution;
        } else if body.x > max_x {
            body.x = max_x;
            body.vel_x = -body.vel_x.abs() * stats.restitution;
        }

        if body.y < min_y {
            body.y = min_y;
            body.vel_y = body.vel_y.abs() * stats.restitution;
        } else if body.y > max_y {
            body.y = max_y;
            body.vel_y = -body.vel_y.abs() * stats.restitution;
            body.vel_x *= stats.floor_friction;
        }
    }
}

/// Contact normal (pointing from a to b) and penetration depth
#[derive(Debug, Clone, Copy)]
struct Contact {
    nx: f32,
    ny: f32,
    depth: f32,
}

fn overlap(a: &Body, b: &Body) -> Option<Contact> {
    box_overlap(
        (a.x, a.y, a.half_width, a.half_height),
        (b.x, b.y, b.half_width, b.half_height),
    )
}

/// Boxes given as (center x, center y, half width, half height)
fn box_overlap(a: (f32, f32, f32, f32), b: (f32, f32, f32, f32)) -> Option<Contact> {
    let dx = b.0 - a.0;
    let dy = b.1 - a.1;
    let px = a.2 + b.2 - dx.abs();
    let py = a.3 + b.3 - dy.abs();

    if px <= 0.0 || py <= 0.0 {
        return None;
    }

    if px < py {
        let nx = if dx < 0.0 { -1.0 } else { 1.0 };
        Some(Contact { nx, ny: 0.0, depth: px })
    } else {
        let ny = if dy < 0.0 { -1.0 } else { 1.0 };
        Some(Contact { nx: 0.0, ny, depth: py })
    }
}

fn separate(a: &mut Body, b: &mut Body, contact: Contact, restitution: f32) {
    // Equal mass: each body takes half the correction
    let push = contact.depth / 2.0;
    a.x -= contact.nx * push;
    a.y -= contact.ny * push;
    b.x += contact.nx * push;
    b.y += contact.ny * push;

    let rel_vel = (b.vel_x - a.vel_x) * contact.nx + (b.vel_y - a.vel_y) * contact.ny;
    if rel_vel >= 0.0 {
        return;
    }

    let impulse = -(1.0 + restitution) * rel_vel / 2.0;
    a.vel_x -= impulse * contact.nx;
    a.vel_y -= impulse * contact.ny;
    b.vel_x += impulse * contact.nx;
    b.vel_y += impulse * contact.ny;

    // Off-center hits spin the boxes a little
    let lever = if contact.nx == 0.0 { b.x - a.x } else { b.y - a.y };
    let spin = (impulse * lever * 0.0005).clamp(-3.0, 3.0);
    a.angular_vel -= spin;
    b.angular_vel += spin;
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn block_at(text: &str, x: f32, y: f32) -> Block {
        Block::new(
            "room".into(),
            "owner".into(),
            text.into(),
            x,
            y,
            "#000".into(),
            "#fff".into(),
        )
    }

    #[test]
    fn test_body_size_from_text() {
        assert_eq!(body_size("hi"), (50.0, 45.0));
        assert_eq!(body_size("a much longer line"), (180.0, 45.0));
        assert_eq!(body_size("one\ntwo\nthree"), (50.0, 95.0));
    }

    #[test]
    fn test_bodies_fall_and_rest_on_floor() {
        let mut world = PhysicsWorld::new(800.0, 600.0, Vec::new());
        let block = block_at("hi", 400.0, 100.0);
        world.add_body(&block);

        for _ in 0..600 {
            world.step(1.0 / 60.0);
        }

        let body = world.body(&block.id).unwrap();
        assert!((body.y - (600.0 - body.half_height)).abs() < 1.0);
        assert!(body.x >= body.half_width && body.x <= 800.0 - body.half_width);
    }

    #[test]
    fn test_bodies_stay_inside_walls_when_thrown() {
        let mut world = PhysicsWorld::new(800.0, 600.0, Vec::new());
        let block = block_at("throw me", 400.0, 300.0);
        world.add_body(&block);
        assert!(world.apply_velocity(&block.id, -5000.0, -5000.0));

        for _ in 0..120 {
            for pose in world.step(1.0 / 60.0) {
                let body = world.body(&pose.id).unwrap();
                assert!(pose.x >= body.half_width - 1e-3);
                assert!(pose.x <= 800.0 - body.half_width + 1e-3);
                assert!(pose.y >= body.half_height - 1e-3);
                assert!(pose.y <= 600.0 - body.half_height + 1e-3);
            }
        }
    }

    #[test]
    fn test_stacked_blocks_do_not_overlap() {
        let mut world = PhysicsWorld::new(800.0, 600.0, Vec::new());
        let lower = block_at("lower", 400.0, 500.0);
        let upper = block_at("upper", 400.0, 480.0);
        world.add_body(&lower);
        world.add_body(&upper);

        for _ in 0..600 {
            world.step(1.0 / 60.0);
        }

        let a = world.body(&lower.id).unwrap();
        let b = world.body(&upper.id).unwrap();
        let gap = (a.y - b.y).abs() - (a.half_height + b.half_height);
        let side = (a.x - b.x).abs() - (a.half_width + b.half_width);
        assert!(gap > -2.0 || side > -2.0);
    }

    #[test]
    fn test_emitter_lifts_bodies_above_it() {
        let emitter = Artifact {
            index: 0,
            x: 400.0,
            y: 580.0,
            width: 200.0,
            height: 20.0,
            zone_height: 400.0,
            strength: 3000.0,
        };
        let mut world = PhysicsWorld::new(800.0, 600.0, vec![emitter]);
        let lifted = block_at("up", 400.0, 500.0);
        world.add_body(&lifted);

        world.step(1.0 / 60.0);
        assert!(world.body(&lifted.id).unwrap().vel_y < 0.0);
    }

    #[test]
    fn test_blocks_land_on_emitters() {
        let emitter = Artifact {
            index: 0,
            x: 400.0,
            y: 580.0,
            width: 200.0,
            height: 20.0,
            zone_height: 1.0,
            strength: 0.0,
        };
        let mut world = PhysicsWorld::new(800.0, 600.0, vec![emitter]);
        let block = block_at("hi", 400.0, 100.0);
        world.add_body(&block);

        for _ in 0..600 {
            world.step(1.0 / 60.0);
        }

        let body = world.body(&block.id).unwrap();
        let emitter_top = 570.0;
        assert!((body.y + body.half_height - emitter_top).abs() < 1.5);
    }

    #[test]
    fn test_non_finite_pointer_is_ignored() {
        let mut world = PhysicsWorld::new(800.0, 600.0, Vec::new());
        let held = block_at("held", 200.0, 500.0);
        let other = block_at("other", 260.0, 500.0);
        world.add_body(&held);
        world.add_body(&other);
        let conn = Uuid::new_v4();

        assert!(!world.start_drag(conn, &held.id, f32::INFINITY, 10.0));
        assert!(world.start_drag(conn, &held.id, 200.0, 500.0));
        assert!(!world.drag_move(&conn, f32::INFINITY, f32::INFINITY));
        assert!(!world.drag_move(&conn, f32::NAN, 10.0));

        for _ in 0..30 {
            for pose in world.step(1.0 / 60.0) {
                assert!(pose.x.is_finite() && pose.y.is_finite() && pose.angle.is_finite());
            }
        }
    }

    #[test]
    fn test_teleport_and_drag_lifecycle() {
        let mut world = PhysicsWorld::new(800.0, 600.0, Vec::new());
        let block = block_at("drag", 200.0, 200.0);
        world.add_body(&block);
        let conn = Uuid::new_v4();

        assert!(world.set_position(&block.id, 300.0, 250.0));
        let body = world.body(&block.id).unwrap();
        assert_eq!((body.x, body.y), (300.0, 250.0));

        assert!(world.start_drag(conn, &block.id, 310.0, 250.0));
        assert!(world.drag_move(&conn, 510.0, 150.0));
        for _ in 0..60 {
            world.step(1.0 / 60.0);
        }
        let body = world.body(&block.id).unwrap();
        assert!((body.x - 500.0).abs() < 2.0);
        assert!((body.y - 150.0).abs() < 2.0);

        assert!(world.end_drag(&conn).is_some());
        assert_eq!(world.drag_count(), 0);
        assert!(!world.drag_move(&conn, 0.0, 0.0));
    }

    #[test]
    fn test_removing_body_releases_its_handles() {
        let mut world = PhysicsWorld::new(800.0, 600.0, Vec::new());
        let block = block_at("gone", 200.0, 200.0);
        world.add_body(&block);
        world.start_drag(Uuid::new_v4(), &block.id, 200.0, 200.0);

        assert!(world.remove_body(&block.id));
        assert_eq!(world.drag_count(), 0);
        assert_eq!(world.body_count(), 0);
        assert!(!world.set_position(&block.id, 1.0, 1.0));
        assert!(!world.apply_velocity(&block.id, 1.0, 1.0));
    }
}
