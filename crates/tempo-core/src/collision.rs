//! Broad-phase spatial index and narrow-phase rectangle resolution
//!
//! Collision lives on the x/y plane. The broad phase is a uniform grid that
//! answers "which colliders might touch these bounds on these layers"; the
//! narrow phase intersects the actual rectangles and computes a manifold to
//! push the moving body back out.
//!
//! Each side of the connection owns its own [`SpatialGrid`]; the client
//! builds one from the same map data so replays hit the same geometry.

use crate::{Arena, EntityId, FloatRect, Vec2};
use bitflags::bitflags;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Broad-phase layer mask
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct CollisionLayer: u32 {
        const WORLD = 0b0001;
        const HAZARD = 0b0010;
        const TRIGGER = 0b0100;
        const BODY = 0b1000;
    }
}

/// What a rectangle is made of, which decides how contact is resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CollisionMaterial {
    /// Blocks movement
    Solid,
    /// Another player's body
    Body,
    /// The underside probe of a player
    Foot,
    /// Kills on contact
    Hazard,
    /// Sends the player back to spawn
    Teleport,
}

impl CollisionMaterial {
    /// Bit used in an entity's collision flags
    pub fn bit(self) -> u16 {
        1 << (self as u16)
    }
}

/// A rectangle attached to a collider, relative to the collider position
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CollisionRect {
    pub material: CollisionMaterial,
    pub bounds: FloatRect,
}

/// A static piece of world geometry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collider {
    /// World position the rectangles are relative to
    pub position: Vec2,
    /// Layers this collider is visible on
    pub layer: CollisionLayer,
    /// Rectangles making up the collider
    pub rects: Vec<CollisionRect>,
}

impl Collider {
    /// A single solid block
    pub fn solid(bounds: FloatRect) -> Self {
        Self {
            position: Vec2::ZERO,
            layer: CollisionLayer::WORLD,
            rects: vec![CollisionRect {
                material: CollisionMaterial::Solid,
                bounds,
            }],
        }
    }

    /// A single rectangle of the given material on the matching layer
    pub fn with_material(bounds: FloatRect, material: CollisionMaterial) -> Self {
        let layer = match material {
            CollisionMaterial::Solid => CollisionLayer::WORLD,
            CollisionMaterial::Hazard => CollisionLayer::HAZARD,
            CollisionMaterial::Teleport => CollisionLayer::TRIGGER,
            CollisionMaterial::Body | CollisionMaterial::Foot => CollisionLayer::BODY,
        };
        Self {
            position: Vec2::ZERO,
            layer,
            rects: vec![CollisionRect { material, bounds }],
        }
    }

    /// Rectangles translated into world space
    pub fn world_rects(&self) -> impl Iterator<Item = CollisionRect> + '_ {
        self.rects.iter().map(move |r| CollisionRect {
            material: r.material,
            bounds: r.bounds.translated(self.position),
        })
    }

    /// World-space bounds of every rectangle
    pub fn world_bounds(&self) -> Option<FloatRect> {
        self.world_rects()
            .map(|r| r.bounds)
            .reduce(|acc, r| acc.union(&r))
    }
}

/// Separation needed to resolve an overlap
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Manifold {
    /// Direction to move the first rectangle
    pub normal: Vec2,
    /// Distance to move along the normal
    pub penetration: f32,
}

/// Compute the manifold pushing `a` out of `b` along the axis of least overlap
pub fn calc_manifold(a: &FloatRect, b: &FloatRect, overlap: &FloatRect) -> Manifold {
    let a_center = a.center();
    let b_center = b.center();

    if overlap.width < overlap.height {
        let x = if a_center.x < b_center.x { -1.0 } else { 1.0 };
        Manifold {
            normal: Vec2::new(x, 0.0),
            penetration: overlap.width,
        }
    } else {
        let y = if a_center.y < b_center.y { -1.0 } else { 1.0 };
        Manifold {
            normal: Vec2::new(0.0, y),
            penetration: overlap.height,
        }
    }
}

type Cell = (i32, i32);

/// Uniform grid broad phase over static colliders
#[derive(Debug, Clone)]
pub struct SpatialGrid {
    cell_size: f32,
    colliders: Arena<Collider>,
    cells: IndexMap<Cell, Vec<EntityId>>,
}

impl SpatialGrid {
    /// Create an empty grid. `cell_size` must be positive.
    pub fn new(cell_size: f32) -> Self {
        assert!(cell_size > 0.0, "Cell size must be greater than 0");
        Self {
            cell_size,
            colliders: Arena::new(),
            cells: IndexMap::new(),
        }
    }

    /// Build a grid holding the given colliders
    pub fn from_colliders(cell_size: f32, colliders: impl IntoIterator<Item = Collider>) -> Self {
        let mut grid = Self::new(cell_size);
        for collider in colliders {
            grid.insert(collider);
        }
        grid
    }

    fn cell_range(&self, bounds: &FloatRect) -> (Cell, Cell) {
        let min = (
            (bounds.left / self.cell_size).floor() as i32,
            (bounds.bottom / self.cell_size).floor() as i32,
        );
        let max = (
            (bounds.right() / self.cell_size).floor() as i32,
            (bounds.top() / self.cell_size).floor() as i32,
        );
        (min, max)
    }

    /// Insert a collider, returning its handle
    pub fn insert(&mut self, collider: Collider) -> EntityId {
        let bounds = collider.world_bounds();
        let id = self.colliders.insert(collider);
        if let Some(bounds) = bounds {
            let (min, max) = self.cell_range(&bounds);
            for x in min.0..=max.0 {
                for y in min.1..=max.1 {
                    self.cells.entry((x, y)).or_default().push(id);
                }
            }
        }
        id
    }

    /// Remove a collider from the grid
    pub fn remove(&mut self, id: EntityId) -> Option<Collider> {
        let collider = self.colliders.remove(id)?;
        for ids in self.cells.values_mut() {
            ids.retain(|&c| c != id);
        }
        Some(collider)
    }

    /// Get a collider by handle
    pub fn get(&self, id: EntityId) -> Option<&Collider> {
        self.colliders.get(id)
    }

    /// Broad phase: colliders on `layers` whose bounds overlap `bounds`
    ///
    /// Results are sorted by handle so callers resolve contacts in the same
    /// order on every run.
    pub fn query(&self, bounds: &FloatRect, layers: CollisionLayer) -> Vec<EntityId> {
        let (min, max) = self.cell_range(bounds);
        let mut found = Vec::new();
        for x in min.0..=max.0 {
            for y in min.1..=max.1 {
                if let Some(ids) = self.cells.get(&(x, y)) {
                    found.extend_from_slice(ids);
                }
            }
        }
        found.sort_unstable();
        found.dedup();
        found.retain(|id| {
            self.colliders.get(*id).is_some_and(|c| {
                c.layer.intersects(layers)
                    && c.world_bounds().is_some_and(|b| b.intersects(bounds))
            })
        });
        found
    }

    /// Number of colliders in the grid
    pub fn len(&self) -> usize {
        self.colliders.len()
    }

    /// Check if the grid holds no colliders
    pub fn is_empty(&self) -> bool {
        self.colliders.is_empty()
    }
}

impl Default for SpatialGrid {
    fn default() -> Self {
        Self::new(4.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_filters_layer_and_bounds() {
        let mut grid = SpatialGrid::new(2.0);
        let floor = grid.insert(Collider::solid(FloatRect::new(-10.0, -1.0, 20.0, 1.0)));
        let spikes = grid.insert(Collider::with_material(
            FloatRect::new(3.0, 0.0, 1.0, 0.5),
            CollisionMaterial::Hazard,
        ));
        grid.insert(Collider::solid(FloatRect::new(50.0, 50.0, 1.0, 1.0)));

        let probe = FloatRect::new(2.5, -0.5, 2.0, 2.0);
        assert_eq!(grid.query(&probe, CollisionLayer::WORLD), vec![floor]);
        assert_eq!(grid.query(&probe, CollisionLayer::HAZARD), vec![spikes]);
        assert_eq!(
            grid.query(&probe, CollisionLayer::WORLD | CollisionLayer::HAZARD),
            vec![floor, spikes]
        );
    }

    #[test]
    fn test_query_deduplicates_multi_cell_colliders() {
        let mut grid = SpatialGrid::new(1.0);
        let big = grid.insert(Collider::solid(FloatRect::new(0.0, 0.0, 5.0, 5.0)));
        let found = grid.query(&FloatRect::new(0.5, 0.5, 3.0, 3.0), CollisionLayer::all());
        assert_eq!(found, vec![big]);
    }

    #[test]
    fn test_remove() {
        let mut grid = SpatialGrid::new(1.0);
        let id = grid.insert(Collider::solid(FloatRect::new(0.0, 0.0, 1.0, 1.0)));
        assert!(grid.remove(id).is_some());
        assert!(grid.query(&FloatRect::new(0.0, 0.0, 1.0, 1.0), CollisionLayer::all()).is_empty());
        assert!(grid.is_empty());
    }

    #[test]
    fn test_manifold_prefers_shallow_axis() {
        // Body sinking slightly into a floor below it
        let body = FloatRect::new(0.0, -0.1, 1.0, 2.0);
        let floor = FloatRect::new(-5.0, -1.0, 10.0, 1.0);
        let overlap = body.intersection(&floor).unwrap();
        let m = calc_manifold(&body, &floor, &overlap);
        assert_eq!(m.normal, Vec2::new(0.0, 1.0));
        assert!((m.penetration - 0.1).abs() < 1e-6);

        // Body pressing into a wall on its right
        let wall = FloatRect::new(0.9, -5.0, 1.0, 10.0);
        let overlap = body.intersection(&wall).unwrap();
        let m = calc_manifold(&body, &wall, &overlap);
        assert_eq!(m.normal, Vec2::new(-1.0, 0.0));
    }

    #[test]
    fn test_material_bits_distinct() {
        let bits = [
            CollisionMaterial::Solid.bit(),
            CollisionMaterial::Body.bit(),
            CollisionMaterial::Foot.bit(),
            CollisionMaterial::Hazard.bit(),
            CollisionMaterial::Teleport.bit(),
        ];
        let combined = bits.iter().fold(0u16, |acc, b| acc | b);
        assert_eq!(combined.count_ones(), 5);
    }
}
