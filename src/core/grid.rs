use std::fmt::Write as _;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A cell's discrete value. 0 means "empty".
pub type CellValue = u8;

/// Number of distinct cell symbols the engine tracks: the first `ALPHABET`
/// values are summarized in context keys and used to normalize numeric
/// features.
pub const ALPHABET: usize = 5;

/// Histogram width of a context key, one bin per tracked symbol.
pub const HIST_BINS: usize = ALPHABET;

/// A flat, row-major h×w buffer with toroidal adjacency on all 8 neighbors.
///
/// Indexing is `(row, col)`; out-of-range coordinates are only accepted by
/// the wrapping accessors, everything else is bounds-checked by the
/// underlying `Vec`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Grid<T> {
    width: usize,
    height: usize,
    cells: Vec<T>,
}

impl<T: Default + Clone> Grid<T> {
    /// Create a grid filled with `T::default()`.
    ///
    /// Panics on zero dimensions; the engine rejects those earlier at
    /// configuration time.
    pub fn new(width: usize, height: usize) -> Self {
        assert!(width > 0 && height > 0, "grid dimensions must be nonzero");
        Self {
            width,
            height,
            cells: vec![T::default(); width * height],
        }
    }

    /// Reset every cell to `T::default()`.
    pub fn clear(&mut self) {
        self.cells.fill(T::default());
    }
}

impl<T> Grid<T> {
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn same_size<U>(&self, other: &Grid<U>) -> bool {
        self.width == other.width && self.height == other.height
    }

    #[inline]
    fn index(&self, row: usize, col: usize) -> usize {
        debug_assert!(row < self.height && col < self.width);
        row * self.width + col
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> &T {
        &self.cells[self.index(row, col)]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, value: T) {
        let i = self.index(row, col);
        self.cells[i] = value;
    }

    /// Toroidal lookup: `row`/`col` offsets may be one step outside the
    /// grid and wrap around to the opposite edge.
    #[inline]
    pub fn get_wrapped(&self, row: isize, col: isize) -> &T {
        let h = self.height as isize;
        let w = self.width as isize;
        let r = row.rem_euclid(h) as usize;
        let c = col.rem_euclid(w) as usize;
        &self.cells[r * self.width + c]
    }

    pub fn as_slice(&self) -> &[T] {
        &self.cells
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.cells
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.cells.iter()
    }
}

impl Grid<CellValue> {
    /// Histogram of the 8 toroidal neighbors' values over the first
    /// `HIST_BINS` alphabet symbols. Values outside the summarized prefix
    /// are not counted.
    pub fn neighbor_histogram(&self, row: usize, col: usize) -> [u8; HIST_BINS] {
        let mut bins = [0u8; HIST_BINS];
        let r = row as isize;
        let c = col as isize;
        for dr in -1isize..=1 {
            for dc in -1isize..=1 {
                if dr == 0 && dc == 0 {
                    continue;
                }
                let v = *self.get_wrapped(r + dr, c + dc) as usize;
                if v < HIST_BINS {
                    bins[v] += 1;
                }
            }
        }
        bins
    }

    /// Serialized local-neighborhood summary: the cell's own value and the
    /// neighbor histogram, joined with `|`. Used purely as a bookkeeping
    /// key for exploration counts, never as numeric network input.
    pub fn context_key(&self, row: usize, col: usize) -> String {
        let bins = self.neighbor_histogram(row, col);
        let mut key = String::with_capacity(2 * (HIST_BINS + 1));
        let _ = write!(key, "{}", self.get(row, col));
        for b in bins {
            let _ = write!(key, "|{b}");
        }
        key
    }

    /// Numeric feature vector for approximator-backed learners: the cell's
    /// own value scaled by the alphabet size, then the neighbor histogram
    /// scaled by the neighbor count.
    pub fn feature_vector(&self, row: usize, col: usize) -> Vec<f64> {
        let bins = self.neighbor_histogram(row, col);
        let mut features = Vec::with_capacity(HIST_BINS + 1);
        features.push(f64::from(*self.get(row, col)) / ALPHABET as f64);
        for b in bins {
            features.push(f64::from(b) / 8.0);
        }
        features
    }
}
