//! Grid cells and their bond maps.
//!
//! Every bond map stores, per bond name, the offset from this cell to the
//! bond partner. A bond `K` from A to B is recorded as `outgoing[K] = B - A`
//! at A and `incoming[K] = A - B` at B. Bonds to off-grid partners are only
//! recorded on the on-grid side.

use super::particle::ParticleId;
use super::topology::Point;
use std::collections::BTreeMap;

/// Named bonds at one cell, each mapped to the offset of its partner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CellBonds {
    pub outgoing: BTreeMap<String, Point>,
    pub incoming: BTreeMap<String, Point>,
}

impl CellBonds {
    pub fn is_empty(&self) -> bool {
        self.outgoing.is_empty() && self.incoming.is_empty()
    }
}

/// One grid position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    pub particle: ParticleId,
    /// Bumped on every committed write; fences remote replies.
    pub write_count: u64,
    pub bonds: CellBonds,
}

impl Cell {
    pub fn new(particle: ParticleId) -> Self {
        Self {
            particle,
            write_count: 0,
            bonds: CellBonds::default(),
        }
    }
}

/// Rectangular array of cells, indexed `x + y * width`.
#[derive(Debug, Clone)]
pub struct Grid {
    width: usize,
    height: usize,
    cells: Vec<Cell>,
}

impl Grid {
    /// Create a grid with every cell holding `particle`.
    pub fn new(width: usize, height: usize, particle: ParticleId) -> Self {
        Self {
            width,
            height,
            cells: vec![Cell::new(particle); width * height],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    fn index(&self, p: Point) -> Option<usize> {
        if p.x < 0 || p.y < 0 {
            return None;
        }
        let (x, y) = (p.x as usize, p.y as usize);
        if x < self.width && y < self.height {
            Some(x + y * self.width)
        } else {
            None
        }
    }

    pub fn contains(&self, p: Point) -> bool {
        self.index(p).is_some()
    }

    pub fn get(&self, p: Point) -> Option<&Cell> {
        self.index(p).map(|i| &self.cells[i])
    }

    pub fn get_mut(&mut self, p: Point) -> Option<&mut Cell> {
        self.index(p).map(move |i| &mut self.cells[i])
    }

    /// Every on-grid coordinate in row-major order.
    pub fn points(&self) -> impl Iterator<Item = Point> {
        let (w, h) = (self.width as i32, self.height as i32);
        (0..h).flat_map(move |y| (0..w).map(move |x| Point::new(x, y)))
    }

    pub fn iter(&self) -> impl Iterator<Item = (Point, &Cell)> + '_ {
        self.points().zip(self.cells.iter())
    }

    /// Every bond `(from, to, name)` recorded as outgoing at an on-grid cell.
    pub fn bonds(&self) -> Vec<(Point, Point, String)> {
        self.iter()
            .flat_map(|(p, cell)| {
                cell.bonds
                    .outgoing
                    .iter()
                    .map(move |(name, &offset)| (p, p + offset, name.clone()))
            })
            .collect()
    }

    /// Drop every bond at `p`, along with the mirror entries at its
    /// on-grid partners. Returns the partners touched.
    pub fn remove_bonds(&mut self, p: Point) -> Vec<Point> {
        let Some(cell) = self.get_mut(p) else {
            return Vec::new();
        };
        let bonds = std::mem::take(&mut cell.bonds);
        let mut partners = Vec::new();
        for (name, offset) in bonds.outgoing {
            let partner = p + offset;
            if let Some(other) = self.get_mut(partner) {
                if other.bonds.incoming.get(&name) == Some(&-offset) {
                    other.bonds.incoming.remove(&name);
                    partners.push(partner);
                }
            }
        }
        for (name, offset) in bonds.incoming {
            let partner = p + offset;
            if let Some(other) = self.get_mut(partner) {
                if other.bonds.outgoing.get(&name) == Some(&-offset) {
                    other.bonds.outgoing.remove(&name);
                    partners.push(partner);
                }
            }
        }
        partners
    }

    /// Check that every bond between two on-grid cells is mirrored at its
    /// partner. Returns a description of the first violation.
    pub fn check_bond_consistency(&self) -> Result<(), String> {
        for (p, cell) in self.iter() {
            for (name, &offset) in &cell.bonds.outgoing {
                let partner = p + offset;
                if let Some(other) = self.get(partner) {
                    if other.bonds.incoming.get(name) != Some(&-offset) {
                        return Err(format!(
                            "outgoing '{}' {} -> {} has no incoming mirror",
                            name, p, partner
                        ));
                    }
                }
            }
            for (name, &offset) in &cell.bonds.incoming {
                let partner = p + offset;
                if let Some(other) = self.get(partner) {
                    if other.bonds.outgoing.get(name) != Some(&-offset) {
                        return Err(format!(
                            "incoming '{}' {} <- {} has no outgoing mirror",
                            name, p, partner
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}
