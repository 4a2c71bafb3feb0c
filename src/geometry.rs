//! Geometric primitives for canvas shapes.
//!
//! A parsed shape description decomposes into [`Component`]s: isolated
//! points, groups of connected line segments, or circles. Components know
//! how to intersect, contain points, measure area and check bounds; the
//! validator builds the overlap policy on top of these operations.

use serde::{Deserialize, Serialize};

/// Tolerance for floating-point comparisons.
pub const GEOMETRIC_EPSILON: f64 = 1e-6;

/// The fixed exterior point rays are cast toward for containment parity.
const RAY_EXTERIOR: (f64, f64) = (-1.0, -1.0);

pub fn float_eq(a: f64, b: f64) -> bool {
    (a - b).abs() < GEOMETRIC_EPSILON
}

pub fn float_leq(a: f64, b: f64) -> bool {
    a - GEOMETRIC_EPSILON <= b + GEOMETRIC_EPSILON
}

pub fn float_geq(a: f64, b: f64) -> bool {
    float_leq(b, a)
}

fn distance(x1: f64, x2: f64, y1: f64, y2: f64) -> f64 {
    ((x1 - x2).powi(2) + (y1 - y2).powi(2)).sqrt()
}

// ----------------------------------------------------------------------------
// Point
// ----------------------------------------------------------------------------

/// A 2D point. Equality and hashing are bit-exact so points can key the
/// parser's adjacency map; use [`Point::approx_eq`] for tolerant comparison.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        // Normalize negative zero so bit-equality matches arithmetic equality.
        let x = if x == 0.0 { 0.0 } else { x };
        let y = if y == 0.0 { 0.0 } else { y };
        Point { x, y }
    }

    /// Tolerant equality on both coordinates.
    pub fn approx_eq(&self, other: &Point) -> bool {
        float_eq(self.x, other.x) && float_eq(self.y, other.y)
    }

    /// Whether this point lies within the bounding box spanned by `a` and `b`.
    pub fn is_between(&self, a: &Point, b: &Point) -> bool {
        ((float_leq(self.x, a.x) && float_geq(self.x, b.x))
            || (float_leq(self.x, b.x) && float_geq(self.x, a.x)))
            && ((float_leq(self.y, a.y) && float_geq(self.y, b.y))
                || (float_leq(self.y, b.y) && float_geq(self.y, a.y)))
    }

    pub fn is_bounded_by(&self, x_min: f64, x_max: f64, y_min: f64, y_max: f64) -> bool {
        self.x >= x_min && self.x <= x_max && self.y >= y_min && self.y <= y_max
    }
}

impl PartialEq for Point {
    fn eq(&self, other: &Self) -> bool {
        self.x.to_bits() == other.x.to_bits() && self.y.to_bits() == other.y.to_bits()
    }
}

impl Eq for Point {}

impl std::hash::Hash for Point {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.x.to_bits().hash(state);
        self.y.to_bits().hash(state);
    }
}

// ----------------------------------------------------------------------------
// Segment
// ----------------------------------------------------------------------------

/// A line segment with its slope and y-intercept precomputed. A vertical
/// segment stores the sentinel slope `1/ε` instead of infinity so downstream
/// formulas stay branch-free.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: Point,
    pub end: Point,
    pub y_int: f64,
    pub slope: f64,
}

impl Segment {
    pub fn new(p1: Point, p2: Point) -> Self {
        let mut delta_x = p2.x - p1.x;
        if delta_x == 0.0 {
            // slope cannot be undefined; replace with 1/epsilon instead
            delta_x = GEOMETRIC_EPSILON;
        }
        let slope = (p2.y - p1.y) / delta_x;
        let y_int = p1.y - slope * p1.x;
        Segment {
            start: p1,
            end: p2,
            y_int,
            slope,
        }
    }

    pub fn y_at(&self, x: f64) -> f64 {
        self.slope * x + self.y_int
    }

    /// Whether a point lies on the segment.
    pub fn intersects_point(&self, p: &Point) -> bool {
        p.is_between(&self.start, &self.end) && float_eq((p.y - self.y_int) / self.slope, p.x)
    }

    /// Whether two segments intersect at any point. Parallel segments never
    /// intersect under this test, collinear overlap included.
    pub fn intersects_with(&self, other: &Segment) -> bool {
        if self.slope == other.slope {
            return false;
        }

        let x = (other.y_int - self.y_int) / (self.slope - other.slope);
        let p = Point::new(x, self.y_at(x));

        p.is_between(&self.start, &self.end) && p.is_between(&other.start, &other.end)
    }

    /// Whether two segments cross each other away from their endpoints.
    pub fn crosses(&self, other: &Segment) -> bool {
        self.intersects_with(other)
            && !self.start.approx_eq(&other.start)
            && !self.start.approx_eq(&other.end)
            && !self.end.approx_eq(&other.start)
            && !self.end.approx_eq(&other.end)
    }

    pub fn length(&self) -> f64 {
        distance(self.start.x, self.end.x, self.start.y, self.end.y)
    }
}

// ----------------------------------------------------------------------------
// Group
// ----------------------------------------------------------------------------

/// An ordered run of connected segments extracted from a path description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub segments: Vec<Segment>,
}

impl Group {
    /// Shoelace area when filled plus total segment length when stroked.
    pub fn area(&self, fill: bool, stroke: bool) -> f64 {
        let mut area = 0.0;

        if fill {
            // Shoelace: A = |sum(x[i]*y[i+1] - y[i]*x[i+1])| / 2
            let mut signed = 0.0;
            for s in &self.segments {
                signed += s.start.x * s.end.y - s.start.y * s.end.x;
            }
            area += signed.abs() / 2.0;
        }

        if stroke {
            area += self.segments.iter().map(Segment::length).sum::<f64>();
        }

        area
    }

    /// Ray parity containment. Assumes the group is a simple closed curve.
    pub fn contains_point(&self, point: &Point, fill: bool) -> bool {
        if !fill {
            return false;
        }

        let ray = Segment::new(*point, Point::new(RAY_EXTERIOR.0, RAY_EXTERIOR.1));
        let crossings = self
            .segments
            .iter()
            .filter(|seg| ray.intersects_with(seg))
            .count();

        // point is inside the closed curve if the ray crosses an odd number
        // of borders
        crossings % 2 != 0
    }

    pub fn is_bounded_by(&self, x_min: f64, x_max: f64, y_min: f64, y_max: f64) -> bool {
        self.segments.iter().all(|seg| {
            seg.start.is_bounded_by(x_min, x_max, y_min, y_max)
                && seg.end.is_bounded_by(x_min, x_max, y_min, y_max)
        })
    }

    /// True when the last segment's end meets the first segment's start and
    /// no two segments cross away from an endpoint.
    pub fn is_simple_closed(&self) -> bool {
        let size = self.segments.len();
        if size == 0 {
            return false;
        }

        let first = &self.segments[0].start;
        let last = &self.segments[size - 1].end;
        if !first.approx_eq(last) {
            return false;
        }

        for i in 0..size {
            for j in (i + 1)..size {
                if self.segments[i].crosses(&self.segments[j]) {
                    return false;
                }
            }
        }

        true
    }
}

// ----------------------------------------------------------------------------
// Circle
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Circle {
    pub x: f64,
    pub y: f64,
    pub r: f64,
}

impl Circle {
    /// Number of distinct intersection points between the circle's boundary
    /// and a segment, found by solving the quadratic in x on the segment's
    /// line equation and keeping roots that land on the segment.
    fn boundary_crossings(&self, seg: &Segment) -> usize {
        let a = 1.0 + seg.slope * seg.slope;
        let b = 2.0 * seg.slope * (seg.y_int - self.y) - 2.0 * self.x;
        let c = self.x * self.x + (seg.y_int - self.y) * (seg.y_int - self.y) - self.r * self.r;

        let discriminant = b * b - 4.0 * a * c;
        if discriminant < 0.0 {
            return 0;
        }

        let sqrt_d = discriminant.sqrt();
        let x1 = (-b + sqrt_d) / (2.0 * a);
        let x2 = (-b - sqrt_d) / (2.0 * a);

        let mut crossings = 0;
        if seg.intersects_point(&Point::new(x1, seg.y_at(x1))) {
            crossings += 1;
        }
        if !float_eq(x1, x2) && seg.intersects_point(&Point::new(x2, seg.y_at(x2))) {
            crossings += 1;
        }
        crossings
    }

    /// Whether a segment touches the circle's boundary.
    pub fn intersects_segment(&self, seg: &Segment) -> bool {
        self.boundary_crossings(seg) > 0
    }

    /// Whether a point lies on the circumference.
    pub fn intersects_point(&self, p: &Point) -> bool {
        float_eq(self.r, distance(self.x, p.x, self.y, p.y))
    }

    /// Distance-radius test for two circle boundaries touching.
    pub fn intersects_circle(&self, other: &Circle) -> bool {
        let d = distance(self.x, other.x, self.y, other.y);
        // separate and non-touching, or one strictly inside the other
        float_leq(d, self.r + other.r) && float_geq(d, (self.r - other.r).abs())
    }

    pub fn area(&self, fill: bool, stroke: bool) -> f64 {
        let mut area = 0.0;
        if fill {
            area += self.r * self.r * std::f64::consts::PI;
        }
        if stroke {
            area += 2.0 * self.r * std::f64::consts::PI;
        }
        area
    }

    /// Ray parity containment against the circle boundary.
    pub fn contains_point(&self, point: &Point, fill: bool) -> bool {
        if !fill {
            return false;
        }

        let ray = Segment::new(*point, Point::new(RAY_EXTERIOR.0, RAY_EXTERIOR.1));
        self.boundary_crossings(&ray) % 2 != 0
    }

    pub fn is_bounded_by(&self, x_min: f64, x_max: f64, y_min: f64, y_max: f64) -> bool {
        float_leq(x_min, self.x - self.r)
            && float_geq(x_max, self.x + self.r)
            && float_leq(y_min, self.y - self.r)
            && float_geq(y_max, self.y + self.r)
    }
}

// ----------------------------------------------------------------------------
// Component
// ----------------------------------------------------------------------------

/// The geometric decomposition of a shape description. The set of component
/// kinds is fixed, so this is a closed variant rather than a trait object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Component {
    Point(Point),
    Group(Group),
    Circle(Circle),
}

impl Component {
    /// True iff any boundary point is shared with `other`.
    pub fn intersects_border(&self, other: &Component) -> bool {
        match (self, other) {
            (Component::Point(a), Component::Point(b)) => a.approx_eq(b),
            (Component::Point(p), Component::Group(g))
            | (Component::Group(g), Component::Point(p)) => {
                g.segments.iter().any(|seg| seg.intersects_point(p))
            }
            (Component::Point(p), Component::Circle(c))
            | (Component::Circle(c), Component::Point(p)) => c.intersects_point(p),
            (Component::Group(a), Component::Group(b)) => a
                .segments
                .iter()
                .any(|s1| b.segments.iter().any(|s2| s1.intersects_with(s2))),
            (Component::Group(g), Component::Circle(c))
            | (Component::Circle(c), Component::Group(g)) => {
                g.segments.iter().any(|seg| c.intersects_segment(seg))
            }
            (Component::Circle(a), Component::Circle(b)) => a.intersects_circle(b),
        }
    }

    /// Area in pixels, fill-weighted and stroke-weighted.
    pub fn area(&self, fill: bool, stroke: bool) -> f64 {
        match self {
            Component::Point(_) => 0.0,
            Component::Group(g) => g.area(fill, stroke),
            Component::Circle(c) => c.area(fill, stroke),
        }
    }

    /// Whether `point` lies in the filled interior. Never true without fill.
    pub fn contains_point(&self, point: &Point, fill: bool) -> bool {
        match self {
            Component::Point(p) => p.approx_eq(point),
            Component::Group(g) => g.contains_point(point, fill),
            Component::Circle(c) => c.contains_point(point, fill),
        }
    }

    pub fn is_bounded_by(&self, x_min: f64, x_max: f64, y_min: f64, y_max: f64) -> bool {
        match self {
            Component::Point(p) => p.is_bounded_by(x_min, x_max, y_min, y_max),
            Component::Group(g) => g.is_bounded_by(x_min, x_max, y_min, y_max),
            Component::Circle(c) => c.is_bounded_by(x_min, x_max, y_min, y_max),
        }
    }

    pub fn is_simple_closed(&self) -> bool {
        match self {
            Component::Point(_) => false,
            Component::Group(g) => g.is_simple_closed(),
            Component::Circle(_) => true,
        }
    }

    /// Any point belonging to the component, used as a containment probe.
    pub fn sample_point(&self) -> Point {
        match self {
            Component::Point(p) => *p,
            Component::Group(g) => g.segments[0].start,
            Component::Circle(c) => Point::new(c.x, c.y),
        }
    }
}

// ----------------------------------------------------------------------------
// Testing
// ----------------------------------------------------------------------------
