//! SpatialActivitySampler - hierarchical weighted sampler over a square grid.
//!
//! A complete quad-tree over a `2^K x 2^K` grid. Level `K` holds the per-cell
//! activity rates; every node above holds the sum over its quadrant, so the
//! root holds the total rate. Point updates and weighted draws are both
//! O(K).

use super::rng::ZooRng;
use super::topology::Point;

/// Quad-tree of activity rates.
///
/// Indexing at each level follows the grid convention `x + y * width`.
#[derive(Debug, Clone)]
pub struct SpatialActivitySampler {
    /// Number of levels below the root.
    depth: usize,
    /// Side length of the leaf level.
    size: usize,
    /// levels[l] has side length 2^l.
    levels: Vec<Vec<f64>>,
}

impl SpatialActivitySampler {
    /// Create a sampler over a `size x size` grid with all rates zero.
    ///
    /// # Panics
    /// Panics if `size` is not a power of two.
    pub fn new(size: usize) -> Self {
        assert!(
            size.is_power_of_two(),
            "quad-tree size must be a power of two, got {}",
            size
        );
        let depth = size.trailing_zeros() as usize;
        let levels = (0..=depth)
            .map(|l| vec![0.0; 1usize << (2 * l)])
            .collect();
        Self {
            depth,
            size,
            levels,
        }
    }

    /// Smallest sampler covering a `width x height` grid.
    pub fn covering(width: usize, height: usize) -> Self {
        Self::new(width.max(height).max(1).next_power_of_two())
    }

    /// Side length of the leaf level.
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    fn leaf_index(&self, p: Point) -> Option<(usize, usize)> {
        if p.x < 0 || p.y < 0 {
            return None;
        }
        let (x, y) = (p.x as usize, p.y as usize);
        if x < self.size && y < self.size {
            Some((x, y))
        } else {
            None
        }
    }

    /// Current rate stored at a leaf, or 0 outside the grid.
    pub fn rate(&self, p: Point) -> f64 {
        match self.leaf_index(p) {
            Some((x, y)) => self.levels[self.depth][x + y * self.size],
            None => 0.0,
        }
    }

    /// Set the rate of one cell and propagate the delta to every ancestor.
    ///
    /// Ancestor sums are clamped at zero to absorb floating-point drift.
    /// Returns false if `p` is outside the grid.
    pub fn update(&mut self, p: Point, rate: f64) -> bool {
        let Some((x, y)) = self.leaf_index(p) else {
            return false;
        };
        let rate = rate.max(0.0);
        let leaf = x + y * self.size;
        let delta = rate - self.levels[self.depth][leaf];
        self.levels[self.depth][leaf] = rate;
        if delta == 0.0 {
            return true;
        }

        for level in (0..self.depth).rev() {
            let shift = self.depth - level;
            let side = 1usize << level;
            let idx = (x >> shift) + (y >> shift) * side;
            let node = &mut self.levels[level][idx];
            *node = (*node + delta).max(0.0);
        }
        true
    }

    /// Total rate over the grid (the root's sum).
    pub fn top_rate(&self) -> f64 {
        self.levels[0][0]
    }

    /// Draw a cell with probability proportional to its rate.
    ///
    /// Returns `None` when every rate is zero. At each level the descent
    /// picks one of four children weighted by their sums; if the draw is
    /// exhausted by rounding, the last child with a positive sum is taken.
    pub fn sample(&self, rng: &mut dyn ZooRng) -> Option<Point> {
        if self.top_rate() <= 0.0 {
            return None;
        }

        let (mut x, mut y) = (0usize, 0usize);
        for level in 1..=self.depth {
            let side = 1usize << level;
            let children = [
                (2 * x, 2 * y),
                (2 * x + 1, 2 * y),
                (2 * x, 2 * y + 1),
                (2 * x + 1, 2 * y + 1),
            ];
            let weights = children.map(|(cx, cy)| self.levels[level][cx + cy * side]);
            let total: f64 = weights.iter().sum();
            if total <= 0.0 {
                return None;
            }

            let mut draw = rng.next_double() * total;
            let mut chosen = None;
            for (i, &w) in weights.iter().enumerate() {
                if w <= 0.0 {
                    continue;
                }
                chosen = Some(i);
                if draw < w {
                    break;
                }
                draw -= w;
            }
            let (cx, cy) = children[chosen?];
            x = cx;
            y = cy;
        }

        Some(Point::new(x as i32, y as i32))
    }

    /// Reset every rate to zero.
    pub fn clear(&mut self) {
        for level in &mut self.levels {
            level.fill(0.0);
        }
    }
}
