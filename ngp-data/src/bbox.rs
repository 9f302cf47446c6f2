//! Axis-aligned bounding boxes in engine coordinate space.

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// An axis-aligned bounding box.
///
/// Serialized as `{ "p_min": [x, y, z], "p_max": [x, y, z] }`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub p_min: Vec3,
    pub p_max: Vec3,
}

impl BoundingBox {
    pub fn new(p_min: Vec3, p_max: Vec3) -> Self {
        Self { p_min, p_max }
    }

    /// Edge lengths along each axis.
    pub fn size(&self) -> Vec3 {
        self.p_max - self.p_min
    }

    pub fn center(&self) -> Vec3 {
        (self.p_min + self.p_max) * 0.5
    }

    /// True when the box has positive extent on every axis.
    pub fn is_valid(&self) -> bool {
        self.p_max.cmpgt(self.p_min).all()
    }

    pub fn contains(&self, point: Vec3) -> bool {
        point.cmpge(self.p_min).all() && point.cmple(self.p_max).all()
    }
}
