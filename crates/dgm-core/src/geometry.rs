//! Geometry primitives shared by the data model and the route planner.
//!
//! Coordinates follow the screen convention: origin top-left, +x to the
//! right, +y downward. `North` therefore points toward smaller `y`.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Fixed precision used to normalize coordinates before hashing.
pub const KEY_PRECISION: f64 = 1000.0;

/// Coordinates closer than this are considered equal.
pub const EPSILON: f64 = 1e-6;

// ─── Point ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn manhattan(&self, other: Point) -> f64 {
        (self.x - other.x).abs() + (self.y - other.y).abs()
    }

    /// Step `distance` units from this point along `dir`.
    pub fn step(&self, dir: Direction, distance: f64) -> Point {
        let (ux, uy) = dir.unit();
        Point::new(self.x + ux * distance, self.y + uy * distance)
    }

    pub fn approx_eq(&self, other: Point) -> bool {
        (self.x - other.x).abs() <= EPSILON && (self.y - other.y).abs() <= EPSILON
    }
}

// ─── Rect ────────────────────────────────────────────────────────────────

/// Axis-aligned rectangle: shape geometry and routing obstacles.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Finite coordinates and non-negative size.
    pub fn is_valid(&self) -> bool {
        self.x.is_finite()
            && self.y.is_finite()
            && self.width.is_finite()
            && self.height.is_finite()
            && self.width >= 0.0
            && self.height >= 0.0
    }

    /// Point-in-rect test that counts the boundary as inside.
    pub fn contains_inclusive(&self, p: Point) -> bool {
        p.x >= self.x && p.x <= self.right() && p.y >= self.y && p.y <= self.bottom()
    }

    /// Grow the rectangle by `margin` on every side.
    pub fn inflate(&self, margin: f64) -> Rect {
        Rect::new(
            self.x - margin,
            self.y - margin,
            self.width + margin * 2.0,
            self.height + margin * 2.0,
        )
    }

    pub fn translate(&self, dx: f64, dy: f64) -> Rect {
        Rect::new(self.x + dx, self.y + dy, self.width, self.height)
    }

    /// A point on the side facing `side`, at fraction `t` (0..=1) along it.
    /// Horizontal sides run left → right, vertical sides top → bottom.
    pub fn side_point(&self, side: Direction, t: f64) -> Point {
        let t = t.clamp(0.0, 1.0);
        match side {
            Direction::North => Point::new(self.x + self.width * t, self.y),
            Direction::South => Point::new(self.x + self.width * t, self.bottom()),
            Direction::West => Point::new(self.x, self.y + self.height * t),
            Direction::East => Point::new(self.right(), self.y + self.height * t),
        }
    }
}

// ─── Direction ───────────────────────────────────────────────────────────

/// One of the four compass headings an orthogonal segment can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Direction {
    North,
    East,
    South,
    West,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::North,
        Direction::East,
        Direction::South,
        Direction::West,
    ];

    pub fn clockwise(self) -> Direction {
        match self {
            Direction::North => Direction::East,
            Direction::East => Direction::South,
            Direction::South => Direction::West,
            Direction::West => Direction::North,
        }
    }

    pub fn counter_clockwise(self) -> Direction {
        match self {
            Direction::North => Direction::West,
            Direction::West => Direction::South,
            Direction::South => Direction::East,
            Direction::East => Direction::North,
        }
    }

    pub fn reverse(self) -> Direction {
        match self {
            Direction::North => Direction::South,
            Direction::South => Direction::North,
            Direction::East => Direction::West,
            Direction::West => Direction::East,
        }
    }

    pub fn is_vertical(self) -> bool {
        matches!(self, Direction::North | Direction::South)
    }

    pub fn is_horizontal(self) -> bool {
        !self.is_vertical()
    }

    /// Unit vector in screen coordinates.
    pub fn unit(self) -> (f64, f64) {
        match self {
            Direction::North => (0.0, -1.0),
            Direction::East => (1.0, 0.0),
            Direction::South => (0.0, 1.0),
            Direction::West => (-1.0, 0.0),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::North => "north",
            Direction::East => "east",
            Direction::South => "south",
            Direction::West => "west",
        }
    }

    pub fn parse(s: &str) -> Option<Direction> {
        match s {
            "north" | "n" | "top" => Some(Direction::North),
            "east" | "e" | "right" => Some(Direction::East),
            "south" | "s" | "bottom" => Some(Direction::South),
            "west" | "w" | "left" => Some(Direction::West),
            _ => None,
        }
    }
}

/// The headings that move `from` closer to `to`, by coordinate comparison.
/// Horizontal heading first; empty when the points coincide.
pub fn directions_toward(from: Point, to: Point) -> SmallVec<[Direction; 2]> {
    let mut dirs = SmallVec::new();
    if to.x > from.x + EPSILON {
        dirs.push(Direction::East);
    } else if to.x < from.x - EPSILON {
        dirs.push(Direction::West);
    }
    if to.y > from.y + EPSILON {
        dirs.push(Direction::South);
    } else if to.y < from.y - EPSILON {
        dirs.push(Direction::North);
    }
    dirs
}

/// Heading of an axis-aligned segment, `None` for diagonal or zero-length.
pub fn segment_direction(a: Point, b: Point) -> Option<Direction> {
    let dirs = directions_toward(a, b);
    if dirs.len() == 1 { Some(dirs[0]) } else { None }
}

// ─── Node identity ───────────────────────────────────────────────────────

/// Hashable identity of a routing node.
///
/// Coordinates are rounded to `1 / KEY_PRECISION` so two candidates that
/// differ only by floating-point jitter collapse into one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey {
    pub x: i64,
    pub y: i64,
}

impl NodeKey {
    pub fn from_point(p: Point) -> Self {
        Self {
            x: normalize(p.x),
            y: normalize(p.y),
        }
    }

    pub fn to_point(self) -> Point {
        Point::new(self.x as f64 / KEY_PRECISION, self.y as f64 / KEY_PRECISION)
    }
}

fn normalize(v: f64) -> i64 {
    (v * KEY_PRECISION).round() as i64
}

// ─── Intersection tests ──────────────────────────────────────────────────

/// Does the axis-aligned segment `a → b` touch `rect`?
///
/// Compares the segment's bounding interval against the rectangle with
/// inclusive bounds: a segment running exactly along an edge intersects.
pub fn segment_intersects_rect(a: Point, b: Point, rect: &Rect) -> bool {
    let min_x = a.x.min(b.x);
    let max_x = a.x.max(b.x);
    let min_y = a.y.min(b.y);
    let max_y = a.y.max(b.y);
    max_x >= rect.x && min_x <= rect.right() && max_y >= rect.y && min_y <= rect.bottom()
}

/// True when any segment of `path` touches any rectangle in `obstacles`.
pub fn path_intersects_any(path: &[Point], obstacles: &[Rect]) -> bool {
    path.windows(2)
        .any(|w| obstacles.iter().any(|r| segment_intersects_rect(w[0], w[1], r)))
}

/// Drop duplicate and collinear interior waypoints.
pub fn simplify_path(points: &[Point]) -> Vec<Point> {
    let mut out: Vec<Point> = Vec::with_capacity(points.len());
    for &p in points {
        if out.last().is_some_and(|last| last.approx_eq(p)) {
            continue;
        }
        if out.len() >= 2 {
            let a = out[out.len() - 2];
            let b = out[out.len() - 1];
            let same_x = (a.x - b.x).abs() <= EPSILON && (b.x - p.x).abs() <= EPSILON;
            let same_y = (a.y - b.y).abs() <= EPSILON && (b.y - p.y).abs() <= EPSILON;
            if same_x || same_y {
                out.pop();
            }
        }
        out.push(p);
    }
    out
}

/// Number of direction changes along an orthogonal path.
pub fn bend_count(points: &[Point]) -> usize {
    let headings: Vec<Direction> = points
        .windows(2)
        .filter_map(|w| segment_direction(w[0], w[1]))
        .collect();
    headings.windows(2).filter(|w| w[0] != w[1]).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_helpers() {
        for d in Direction::ALL {
            assert_eq!(d.clockwise().counter_clockwise(), d);
            assert_eq!(d.reverse().reverse(), d);
            assert_eq!(d.clockwise().clockwise(), d.reverse());
        }
        assert_eq!(Direction::North.clockwise(), Direction::East);
        assert_eq!(Direction::West.counter_clockwise(), Direction::South);
    }

    #[test]
    fn directions_toward_by_comparison() {
        let o = Point::new(0.0, 0.0);
        assert_eq!(
            directions_toward(o, Point::new(5.0, -5.0)).as_slice(),
            &[Direction::East, Direction::North]
        );
        assert_eq!(
            directions_toward(o, Point::new(0.0, 3.0)).as_slice(),
            &[Direction::South]
        );
        assert!(directions_toward(o, o).is_empty());
    }

    #[test]
    fn node_key_absorbs_jitter() {
        let a = NodeKey::from_point(Point::new(10.0, 20.0));
        let b = NodeKey::from_point(Point::new(10.000_000_1, 19.999_999_9));
        assert_eq!(a, b);
        assert_ne!(a, NodeKey::from_point(Point::new(10.01, 20.0)));
    }

    #[test]
    fn grazing_an_edge_counts_as_intersection() {
        let r = Rect::new(10.0, 10.0, 10.0, 10.0);
        // Runs exactly along the top edge
        assert!(segment_intersects_rect(
            Point::new(0.0, 10.0),
            Point::new(30.0, 10.0),
            &r
        ));
        // Just above
        assert!(!segment_intersects_rect(
            Point::new(0.0, 9.9),
            Point::new(30.0, 9.9),
            &r
        ));
        // Ends exactly on the left edge
        assert!(segment_intersects_rect(
            Point::new(0.0, 15.0),
            Point::new(10.0, 15.0),
            &r
        ));
    }

    #[test]
    fn simplify_removes_collinear_points() {
        let path = [
            Point::new(0.0, 0.0),
            Point::new(5.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 8.0),
        ];
        let simple = simplify_path(&path);
        assert_eq!(
            simple,
            vec![
                Point::new(0.0, 0.0),
                Point::new(10.0, 0.0),
                Point::new(10.0, 8.0)
            ]
        );
        assert_eq!(bend_count(&simple), 1);
    }

    #[test]
    fn side_points() {
        let r = Rect::new(0.0, 0.0, 100.0, 50.0);
        assert_eq!(r.side_point(Direction::East, 0.5), Point::new(100.0, 25.0));
        assert_eq!(r.side_point(Direction::North, 0.25), Point::new(25.0, 0.0));
    }
}
