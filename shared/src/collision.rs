//! Static collision world used by character movement, ground probes and projectile hits.
//!
//! Characters are feet-anchored axis-aligned boxes. Movement is swept one axis
//! at a time (vertical first, then X, then Z), which resolves sliding along
//! walls without any iterative solver. Both replicas run the exact same sweep,
//! so collision never introduces divergence between prediction and authority.

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Gap left between a swept body and the surface it stopped against.
const SKIN: f32 = 1e-4;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self {
            min: min.min(max),
            max: min.max(max),
        }
    }

    pub fn from_center(center: Vec3, half_extents: Vec3) -> Self {
        Self::new(center - half_extents, center + half_extents)
    }

    pub fn translated(&self, offset: Vec3) -> Self {
        Self {
            min: self.min + offset,
            max: self.max + offset,
        }
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Strict overlap test; touching faces do not count.
    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.x < other.max.x
            && self.max.x > other.min.x
            && self.min.y < other.max.y
            && self.max.y > other.min.y
            && self.min.z < other.max.z
            && self.max.z > other.min.z
    }

    pub fn contains(&self, point: Vec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    /// Parametric entry of the segment `p0 -> p1` into the box, in `[0, 1]`.
    pub fn segment_enter(&self, p0: Vec3, p1: Vec3) -> Option<f32> {
        let d = p1 - p0;
        let mut tmin = 0.0f32;
        let mut tmax = 1.0f32;
        for axis in 0..3 {
            let start = p0[axis];
            let dir = d[axis];
            if dir.abs() < 1e-6 {
                if start < self.min[axis] || start > self.max[axis] {
                    return None;
                }
            } else {
                let inv = 1.0 / dir;
                let mut t0 = (self.min[axis] - start) * inv;
                let mut t1 = (self.max[axis] - start) * inv;
                if t0 > t1 {
                    std::mem::swap(&mut t0, &mut t1);
                }
                tmin = tmin.max(t0);
                tmax = tmax.min(t1);
                if tmin > tmax {
                    return None;
                }
            }
        }
        Some(tmin)
    }

    /// True when the two boxes overlap on every axis except `axis`.
    fn overlaps_except(&self, other: &Aabb, axis: usize) -> bool {
        (0..3)
            .filter(|&k| k != axis)
            .all(|k| self.min[k] < other.max[k] && self.max[k] > other.min[k])
    }
}

/// Character collider, anchored at the feet.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BodyShape {
    pub radius: f32,
    pub height: f32,
}

impl BodyShape {
    pub fn aabb_at(&self, feet: Vec3) -> Aabb {
        Aabb::new(
            feet - Vec3::new(self.radius, 0.0, self.radius),
            feet + Vec3::new(self.radius, self.height, self.radius),
        )
    }
}

impl Default for BodyShape {
    fn default() -> Self {
        Self {
            radius: 0.4,
            height: 1.8,
        }
    }
}

/// Outcome of a swept move.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepResult {
    pub position: Vec3,
    /// Downward motion was stopped by a surface.
    pub grounded: bool,
    /// Upward motion was stopped by a surface.
    pub hit_ceiling: bool,
    pub blocked_x: bool,
    pub blocked_z: bool,
}

/// Collision queries the simulation needs from the world.
pub trait CollisionWorld {
    /// Moves `shape` from `feet` by `displacement`, sliding along whatever it hits.
    fn sweep(&self, shape: &BodyShape, feet: Vec3, displacement: Vec3) -> SweepResult;

    /// Distance to the first surface along a normalized ray, if any within `max_distance`.
    fn raycast(&self, origin: Vec3, direction: Vec3, max_distance: f32) -> Option<f32>;

    /// Fraction of the segment `p0 -> p1` travelled before the first static hit.
    fn segment(&self, p0: Vec3, p1: Vec3) -> Option<f32> {
        let delta = p1 - p0;
        let length = delta.length();
        if length <= f32::EPSILON {
            return None;
        }
        self.raycast(p0, delta / length, length)
            .map(|distance| distance / length)
    }
}

/// Floor plane plus a list of static boxes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StaticWorld {
    pub floor_y: Option<f32>,
    pub boxes: Vec<Aabb>,
}

impl StaticWorld {
    pub fn new(floor_y: Option<f32>, boxes: Vec<Aabb>) -> Self {
        Self { floor_y, boxes }
    }

    /// The walled arena every replica loads.
    pub fn arena() -> Self {
        let half = crate::ARENA_HALF_SIZE;
        let wall = 1.0;
        let height = 6.0;
        let boxes = vec![
            // Perimeter
            Aabb::new(
                Vec3::new(-half - wall, 0.0, -half - wall),
                Vec3::new(half + wall, height, -half),
            ),
            Aabb::new(
                Vec3::new(-half - wall, 0.0, half),
                Vec3::new(half + wall, height, half + wall),
            ),
            Aabb::new(
                Vec3::new(-half - wall, 0.0, -half),
                Vec3::new(-half, height, half),
            ),
            Aabb::new(
                Vec3::new(half, 0.0, -half),
                Vec3::new(half + wall, height, half),
            ),
            // Cover
            Aabb::new(Vec3::new(-6.0, 0.0, -1.0), Vec3::new(-4.0, 2.5, 1.0)),
            Aabb::new(Vec3::new(4.0, 0.0, -1.0), Vec3::new(6.0, 2.5, 1.0)),
            Aabb::new(Vec3::new(-1.5, 0.0, 8.0), Vec3::new(1.5, 1.0, 10.0)),
        ];
        Self::new(Some(0.0), boxes)
    }

    fn sweep_axis(&self, body: &Aabb, axis: usize, delta: f32) -> f32 {
        if delta == 0.0 {
            return 0.0;
        }

        let mut allowed = delta;
        for solid in &self.boxes {
            if !body.overlaps_except(solid, axis) {
                continue;
            }
            if delta > 0.0 && body.max[axis] <= solid.min[axis] + SKIN {
                let gap = (solid.min[axis] - body.max[axis] - SKIN).max(0.0);
                allowed = allowed.min(gap);
            } else if delta < 0.0 && body.min[axis] >= solid.max[axis] - SKIN {
                let gap = (solid.max[axis] - body.min[axis] + SKIN).min(0.0);
                allowed = allowed.max(gap);
            }
        }

        if axis == 1 && delta < 0.0 {
            if let Some(floor) = self.floor_y {
                allowed = allowed.max((floor - body.min.y).min(0.0));
            }
        }

        allowed
    }
}

impl CollisionWorld for StaticWorld {
    fn sweep(&self, shape: &BodyShape, feet: Vec3, displacement: Vec3) -> SweepResult {
        let mut body = shape.aabb_at(feet);
        let mut moved = Vec3::ZERO;
        let mut blocked = [false; 3];

        for axis in [1usize, 0, 2] {
            let wanted = displacement[axis];
            let allowed = self.sweep_axis(&body, axis, wanted);
            blocked[axis] = allowed != wanted;
            let mut step = Vec3::ZERO;
            step[axis] = allowed;
            body = body.translated(step);
            moved[axis] = allowed;
        }

        SweepResult {
            position: feet + moved,
            grounded: blocked[1] && displacement.y < 0.0,
            hit_ceiling: blocked[1] && displacement.y > 0.0,
            blocked_x: blocked[0],
            blocked_z: blocked[2],
        }
    }

    fn raycast(&self, origin: Vec3, direction: Vec3, max_distance: f32) -> Option<f32> {
        let end = origin + direction * max_distance;
        let mut nearest: Option<f32> = None;

        if let Some(floor) = self.floor_y {
            if direction.y < 0.0 && origin.y >= floor {
                let distance = (origin.y - floor) / -direction.y;
                if distance <= max_distance {
                    nearest = Some(distance);
                }
            }
        }

        for solid in &self.boxes {
            if let Some(t) = solid.segment_enter(origin, end) {
                let distance = t * max_distance;
                if nearest.map_or(true, |n| distance < n) {
                    nearest = Some(distance);
                }
            }
        }

        nearest
    }
}
