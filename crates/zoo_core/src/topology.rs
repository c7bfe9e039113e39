//! Grid coordinates and neighborhood topologies.
//!
//! A direction is an index into a fixed, clockwise neighborhood ordering.
//! Rotating left steps counter-clockwise, rotating right steps clockwise, and
//! the back direction is half a turn away.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Neg, Sub};

/// A grid coordinate or a relative offset between two cells.
///
/// `y` grows downwards, so north is `(0, -1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn is_zero(&self) -> bool {
        self.x == 0 && self.y == 0
    }
}

impl Add for Point {
    type Output = Point;

    fn add(self, rhs: Point) -> Point {
        Point::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Point {
    type Output = Point;

    fn sub(self, rhs: Point) -> Point {
        Point::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Neg for Point {
    type Output = Point;

    fn neg(self) -> Point {
        Point::new(-self.x, -self.y)
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.x, self.y)
    }
}

/// Index into a topology's neighborhood ordering.
pub type Direction = usize;

const SQUARE4_NAMES: [&str; 4] = ["n", "e", "s", "w"];
const SQUARE4_OFFSETS: [Point; 4] = [
    Point::new(0, -1),
    Point::new(1, 0),
    Point::new(0, 1),
    Point::new(-1, 0),
];

// Axial coordinates stored on a square array.
const HEX6_NAMES: [&str; 6] = ["n", "ne", "se", "s", "sw", "nw"];
const HEX6_OFFSETS: [Point; 6] = [
    Point::new(0, -1),
    Point::new(1, -1),
    Point::new(1, 0),
    Point::new(0, 1),
    Point::new(-1, 1),
    Point::new(-1, 0),
];

const SQUARE8_NAMES: [&str; 8] = ["n", "ne", "e", "se", "s", "sw", "w", "nw"];
const SQUARE8_OFFSETS: [Point; 8] = [
    Point::new(0, -1),
    Point::new(1, -1),
    Point::new(1, 0),
    Point::new(1, 1),
    Point::new(0, 1),
    Point::new(-1, 1),
    Point::new(-1, 0),
    Point::new(-1, -1),
];

/// Neighborhood shape of a board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Topology {
    /// 4-connected (von Neumann).
    #[default]
    Square4,
    /// 6-connected hexagonal lattice in axial coordinates.
    Hex6,
    /// 8-connected (Moore).
    Square8,
}

impl Topology {
    /// Number of neighbor directions.
    pub fn neighbor_count(&self) -> usize {
        self.offsets().len()
    }

    /// Offsets in direction order.
    pub fn offsets(&self) -> &'static [Point] {
        match self {
            Topology::Square4 => &SQUARE4_OFFSETS,
            Topology::Hex6 => &HEX6_OFFSETS,
            Topology::Square8 => &SQUARE8_OFFSETS,
        }
    }

    /// Direction names in direction order.
    pub fn names(&self) -> &'static [&'static str] {
        match self {
            Topology::Square4 => &SQUARE4_NAMES,
            Topology::Hex6 => &HEX6_NAMES,
            Topology::Square8 => &SQUARE8_NAMES,
        }
    }

    /// Offset of a direction. Wraps out-of-range indices.
    pub fn offset(&self, dir: Direction) -> Point {
        let offsets = self.offsets();
        offsets[dir % offsets.len()]
    }

    /// Name of a direction. Wraps out-of-range indices.
    pub fn dir_name(&self, dir: Direction) -> &'static str {
        let names = self.names();
        names[dir % names.len()]
    }

    /// Look up a direction by name.
    pub fn dir_by_name(&self, name: &str) -> Option<Direction> {
        self.names().iter().position(|&n| n == name)
    }

    /// Direction pointing the other way.
    pub fn back(&self, dir: Direction) -> Direction {
        let n = self.neighbor_count();
        (dir + n / 2) % n
    }

    /// Rotate counter-clockwise by `steps` neighborhood positions.
    pub fn left(&self, dir: Direction, steps: usize) -> Direction {
        let n = self.neighbor_count();
        (dir + n - steps % n) % n
    }

    /// Rotate clockwise by `steps` neighborhood positions.
    pub fn right(&self, dir: Direction, steps: usize) -> Direction {
        let n = self.neighbor_count();
        (dir + steps) % n
    }

    /// Map a lattice offset to Euclidean coordinates for geometric tests.
    pub fn cartesian(&self, offset: Point) -> (f64, f64) {
        match self {
            Topology::Hex6 => {
                let q = offset.x as f64;
                let r = offset.y as f64;
                (q + r / 2.0, r * 3f64.sqrt() / 2.0)
            }
            _ => (offset.x as f64, offset.y as f64),
        }
    }

    /// Euclidean length of an offset.
    pub fn length(&self, offset: Point) -> f64 {
        let (x, y) = self.cartesian(offset);
        (x * x + y * y).sqrt()
    }

    /// Turning angle in degrees, in [0, 180], between two consecutive offsets.
    ///
    /// Returns `None` if either offset is zero-length.
    pub fn turn_angle(&self, previous: Point, current: Point) -> Option<f64> {
        if previous.is_zero() || current.is_zero() {
            return None;
        }
        let (ax, ay) = self.cartesian(previous);
        let (bx, by) = self.cartesian(current);
        let cross = ax * by - ay * bx;
        let dot = ax * bx + ay * by;
        Some(cross.atan2(dot).abs().to_degrees())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_square4_back_and_rotation() {
        let t = Topology::Square4;
        let n = t.dir_by_name("n").unwrap();
        assert_eq!(t.dir_name(t.back(n)), "s");
        assert_eq!(t.dir_name(t.left(n, 1)), "w");
        assert_eq!(t.dir_name(t.right(n, 1)), "e");
        assert_eq!(t.dir_name(t.right(n, 2)), "s");
    }

    #[test]
    fn test_offsets_cancel_with_back() {
        for t in [Topology::Square4, Topology::Hex6, Topology::Square8] {
            for d in 0..t.neighbor_count() {
                assert_eq!(t.offset(d) + t.offset(t.back(d)), Point::default());
            }
        }
    }

    #[test]
    fn test_square8_names() {
        let t = Topology::Square8;
        assert_eq!(t.neighbor_count(), 8);
        assert_eq!(t.dir_name(t.left(0, 1)), "nw");
        assert_eq!(t.dir_name(t.right(0, 3)), "se");
    }

    #[test]
    fn test_turn_angle() {
        let t = Topology::Square4;
        let east = Point::new(1, 0);
        let south = Point::new(0, 1);
        assert!((t.turn_angle(east, east).unwrap() - 0.0).abs() < 1e-9);
        assert!((t.turn_angle(east, south).unwrap() - 90.0).abs() < 1e-9);
        assert!((t.turn_angle(east, -east).unwrap() - 180.0).abs() < 1e-9);
        assert_eq!(t.turn_angle(Point::default(), east), None);
    }

    #[test]
    fn test_hex_lengths_are_uniform() {
        let t = Topology::Hex6;
        for &o in t.offsets() {
            assert!((t.length(o) - 1.0).abs() < 1e-9);
        }
    }
}
