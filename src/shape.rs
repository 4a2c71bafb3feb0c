//! Shape records and canvas-level validation.
//!
//! A [`Shape`] is the immutable payload of an operation: an owner, a kind,
//! an svg-like description, and fill/stroke colors (either may be the
//! `transparent` sentinel). Validation enforces canvas bounds, the
//! single-simple-closed-curve rule for filled shapes, and the cross-owner
//! overlap policy.

use crate::error::{ChainError, Result};
use crate::geometry::Component;
use crate::svg::{parse_svg, ShapeKind};
use lru::LruCache;
use md5::{Digest, Md5};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::sync::Mutex;

pub const TRANSPARENT: &str = "transparent";

/// Parsed-component cache. Overlap checks re-parse every shape already on
/// the canvas, so hot descriptions are kept around; parse results are
/// immutable and safe to share.
static COMPONENT_CACHE: Lazy<Mutex<LruCache<(ShapeKind, String), Vec<Component>>>> =
    Lazy::new(|| Mutex::new(LruCache::new(NonZeroUsize::new(256).expect("nonzero"))));

fn cached_components(kind: ShapeKind, svg: &str) -> Result<Vec<Component>> {
    if let Ok(mut cache) = COMPONENT_CACHE.lock() {
        if let Some(components) = cache.get(&(kind, svg.to_string())) {
            return Ok(components.clone());
        }
        let components = parse_svg(svg, kind)?;
        cache.put((kind, svg.to_string()), components.clone());
        return Ok(components);
    }
    parse_svg(svg, kind)
}

/// An immutable shape drawn by an art client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape {
    /// Hex public key of the shape owner.
    pub owner: String,
    pub kind: ShapeKind,
    pub svg: String,
    pub fill: String,
    pub stroke: String,
}

/// The drawn-shape set a new shape is validated against.
#[derive(Debug, Clone, Default)]
pub struct Canvas {
    pub shapes: Vec<Shape>,
    pub x_max: u32,
    pub y_max: u32,
}

impl Shape {
    pub fn is_filled(&self) -> bool {
        self.fill != TRANSPARENT
    }

    pub fn has_stroke(&self) -> bool {
        self.stroke != TRANSPARENT
    }

    /// Geometric decomposition of the description.
    pub fn components(&self) -> Result<Vec<Component>> {
        cached_components(self.kind, &self.svg)
    }

    /// Ink cost: fill- and stroke-weighted area, rounded up to whole pixels.
    pub fn area(&self) -> Result<u64> {
        let components = self.components()?;

        if !self.is_fill_valid(&components) {
            return Err(ChainError::InvalidSvg(self.svg.clone()));
        }

        let area: f64 = components
            .iter()
            .map(|c| c.area(self.is_filled(), self.has_stroke()))
            .sum();

        Ok(area.ceil() as u64)
    }

    /// Validate this shape against a canvas snapshot.
    pub fn validate(&self, canvas: &Canvas) -> Result<()> {
        let components = self.components()?;

        if !self.within_canvas(canvas, &components) {
            return Err(ChainError::OutOfBounds);
        }

        if (!self.has_stroke() && !self.is_filled()) || !self.is_fill_valid(&components) {
            return Err(ChainError::InvalidSvg(self.svg.clone()));
        }

        if self.illegal_overlap(canvas, &components)? {
            return Err(ChainError::ShapeOverlap(self.svg.clone()));
        }

        Ok(())
    }

    fn within_canvas(&self, canvas: &Canvas, components: &[Component]) -> bool {
        let x_max = f64::from(canvas.x_max);
        let y_max = f64::from(canvas.y_max);
        components
            .iter()
            .all(|c| c.is_bounded_by(0.0, x_max, 0.0, y_max))
    }

    /// A filled shape must decompose into exactly one simple closed curve.
    fn is_fill_valid(&self, components: &[Component]) -> bool {
        if !self.is_filled() {
            return true;
        }
        components.len() == 1 && components[0].is_simple_closed()
    }

    /// Whether any component pair with a different-owner canvas shape
    /// intersects on a border or contains the other, fill-weighted.
    /// Same-owner overlap is allowed.
    fn illegal_overlap(&self, canvas: &Canvas, new_comps: &[Component]) -> Result<bool> {
        for old_shape in &canvas.shapes {
            if old_shape.owner == self.owner {
                continue;
            }

            let old_comps = old_shape.components()?;
            let old_fill = old_shape.is_filled();
            let new_fill = self.is_filled();

            for old in &old_comps {
                for new in new_comps {
                    if new.intersects_border(old)
                        || new.contains_point(&old.sample_point(), new_fill)
                        || old.contains_point(&new.sample_point(), old_fill)
                    {
                        return Ok(true);
                    }
                }
            }
        }

        Ok(false)
    }

    /// Deterministic digest of description + fill + stroke.
    pub fn content_hash(&self) -> [u8; 16] {
        let mut hasher = Md5::new();
        hasher.update(self.svg.as_bytes());
        hasher.update(self.fill.as_bytes());
        hasher.update(self.stroke.as_bytes());
        hasher.finalize().into()
    }

    /// Comma-separated rendering of kind, description, fill and stroke.
    pub fn svg_fields(&self) -> String {
        let kind = match self.kind {
            ShapeKind::Path => "PATH",
            ShapeKind::Circle => "CIRC",
        };
        format!("{},{},{},{}", kind, self.svg, self.fill, self.stroke)
    }

    /// Rendering of a deleted shape: both colors rewritten to white.
    pub fn erased(&self) -> Shape {
        Shape {
            fill: "white".to_string(),
            stroke: "white".to_string(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_TRIANGLES_SVG: &str = "M 5 20 L 10 30 L 0 35 Z M 3 8 L 7 5 L 2 5 Z";
    const NON_CONVEX_POLY_SVG: &str = "M 1 1 h 130 L 101 41 h -100 v -20 h 60 v -10 h -60 z";
    const HOURGLASS_SVG: &str = "M 5 5 L 0 10 L 10 10 L 5 15 z";

    fn path_shape(owner: &str, svg: &str, fill: &str, stroke: &str) -> Shape {
        Shape {
            owner: owner.to_string(),
            kind: ShapeKind::Path,
            svg: svg.to_string(),
            fill: fill.to_string(),
            stroke: stroke.to_string(),
        }
    }

    fn circle_shape(owner: &str, svg: &str, fill: &str, stroke: &str) -> Shape {
        Shape {
            kind: ShapeKind::Circle,
            ..path_shape(owner, svg, fill, stroke)
        }
    }

    fn canvas_1500x1000() -> Canvas {
        Canvas {
            shapes: Vec::new(),
            x_max: 1500,
            y_max: 1000,
        }
    }

    #[test]
    fn test_polygon_area_fill_and_stroke() {
        let filled = path_shape("owner1", NON_CONVEX_POLY_SVG, "red", TRANSPARENT);
        assert_eq!(filled.area().unwrap(), 4000);

        let stroked = path_shape("owner1", NON_CONVEX_POLY_SVG, TRANSPARENT, "red");
        assert_eq!(stroked.area().unwrap(), 440);

        let both = path_shape("owner1", NON_CONVEX_POLY_SVG, "red", "red");
        assert_eq!(both.area().unwrap(), 4440);
    }

    #[test]
    fn test_two_triangles_stroked_area() {
        let shape = path_shape("owner1", TWO_TRIANGLES_SVG, TRANSPARENT, "red");
        assert_eq!(shape.area().unwrap(), 52);
    }

    #[test]
    fn test_circle_area() {
        let filled = circle_shape("owner1", "r 5 cx 7 cy 9", "red", TRANSPARENT);
        assert_eq!(filled.area().unwrap(), 79);

        let both = circle_shape("owner1", "r 5 cx 7 cy 9", "red", "blue");
        assert_eq!(both.area().unwrap(), 110);
    }

    #[test]
    fn test_filled_hourglass_rejected() {
        let canvas = canvas_1500x1000();

        let filled = path_shape("owner1", HOURGLASS_SVG, "blue", TRANSPARENT);
        assert!(matches!(
            filled.validate(&canvas),
            Err(ChainError::InvalidSvg(_))
        ));

        let stroked = path_shape("owner1", HOURGLASS_SVG, TRANSPARENT, "blue");
        assert!(stroked.validate(&canvas).is_ok());
    }

    #[test]
    fn test_filled_multi_component_rejected() {
        let canvas = canvas_1500x1000();
        let shape = path_shape("owner1", TWO_TRIANGLES_SVG, "black", TRANSPARENT);
        assert!(matches!(
            shape.validate(&canvas),
            Err(ChainError::InvalidSvg(_))
        ));
    }

    #[test]
    fn test_all_transparent_rejected() {
        let canvas = canvas_1500x1000();
        let shape = path_shape("owner1", "M 10 10 v 5 h 8 z", TRANSPARENT, TRANSPARENT);
        assert!(matches!(
            shape.validate(&canvas),
            Err(ChainError::InvalidSvg(_))
        ));
    }

    #[test]
    fn test_out_of_bounds_rejected() {
        let canvas = canvas_1500x1000();
        let shape = path_shape("owner1", "M 1400 900 h 200 v 50 z", TRANSPARENT, "red");
        assert!(matches!(
            shape.validate(&canvas),
            Err(ChainError::OutOfBounds)
        ));

        let circle = circle_shape("owner1", "cx 2 cy 3 r 5", TRANSPARENT, "red");
        assert!(matches!(
            circle.validate(&canvas),
            Err(ChainError::OutOfBounds)
        ));
    }

    #[test]
    fn test_identical_svg_other_owner_overlaps() {
        let mut canvas = canvas_1500x1000();

        let first = path_shape("owner1", "M 10 10 v 5 h 8 z", "red", "blue");
        assert!(first.validate(&canvas).is_ok());
        canvas.shapes.push(first);

        let second = path_shape("owner2", "M 10 10 v 5 h 8 z", "green", "yellow");
        assert!(matches!(
            second.validate(&canvas),
            Err(ChainError::ShapeOverlap(_))
        ));
    }

    #[test]
    fn test_same_owner_overlap_allowed() {
        let mut canvas = canvas_1500x1000();

        let first = path_shape("owner1", "M 10 10 v 5 h 8 z", "red", "blue");
        canvas.shapes.push(first);

        let second = path_shape("owner1", "M 10 10 v 5 h 8 z", "green", "yellow");
        assert!(second.validate(&canvas).is_ok());
    }

    #[test]
    fn test_overlap_with_filled_polygon_interior() {
        let mut canvas = canvas_1500x1000();
        canvas
            .shapes
            .push(path_shape("owner1", NON_CONVEX_POLY_SVG, TRANSPARENT, "red"));

        // crosses the outline
        let crossing = path_shape("owner2", "M 20 10 L 30 40", TRANSPARENT, "blue");
        assert!(matches!(
            crossing.validate(&canvas),
            Err(ChainError::ShapeOverlap(_))
        ));

        // sits between the folds of the outline without touching it
        let tucked = path_shape("owner2", "M 80 30 L 120 8", TRANSPARENT, "red");
        assert!(tucked.validate(&canvas).is_ok());

        // once the polygon is filled, the tucked segment is contained
        canvas.shapes[0].fill = "red".to_string();
        assert!(matches!(
            tucked.validate(&canvas),
            Err(ChainError::ShapeOverlap(_))
        ));
    }

    #[test]
    fn test_overlap_with_circle() {
        let mut canvas = Canvas {
            shapes: Vec::new(),
            x_max: 1000,
            y_max: 1500,
        };
        canvas
            .shapes
            .push(circle_shape("owner1", "r 5 cx 7 cy 9", TRANSPARENT, "red"));

        // segment crossing the circle boundary
        let crossing = path_shape("owner2", "M 0 0 L 50 50", TRANSPARENT, "red");
        assert!(matches!(
            crossing.validate(&canvas),
            Err(ChainError::ShapeOverlap(_))
        ));

        // fully inside a transparent circle is fine
        let inside = path_shape("owner2", "M 6 6 L 10 10", TRANSPARENT, "red");
        assert!(inside.validate(&canvas).is_ok());

        // inside a filled circle is containment
        canvas.shapes[0].fill = "red".to_string();
        assert!(matches!(
            inside.validate(&canvas),
            Err(ChainError::ShapeOverlap(_))
        ));

        // circle intersecting circle
        let other = circle_shape("owner2", "cx 15 cy 10 r 8", TRANSPARENT, "red");
        assert!(matches!(
            other.validate(&canvas),
            Err(ChainError::ShapeOverlap(_))
        ));
    }

    #[test]
    fn test_content_hash_distinguishes_shapes() {
        let a = path_shape("owner2", "M 1 2 L 3 4", "transparentz", "purple");
        let b = path_shape("owner2", "M 400 500 v 1", TRANSPARENT, "green");
        assert_ne!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn test_content_hash_ignores_owner() {
        let a = path_shape("owner1", "M 1 2 L 3 4", "red", "blue");
        let b = path_shape("owner2", "M 1 2 L 3 4", "red", "blue");
        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn test_area_is_stable_across_calls() {
        let shape = path_shape("owner1", NON_CONVEX_POLY_SVG, "red", "red");
        let first = shape.area().unwrap();
        for _ in 0..5 {
            assert_eq!(shape.area().unwrap(), first);
        }
    }

    #[test]
    fn test_erased_rendering() {
        let shape = path_shape("owner1", "M 1 1 h 4", "red", "blue");
        let erased = shape.erased();
        assert_eq!(erased.fill, "white");
        assert_eq!(erased.stroke, "white");
        assert_eq!(erased.svg, shape.svg);
    }
}
