//! World partitioning: country rectangles, neighbor ranks and the initial
//! split of the population between countries.

use crate::config::Config;

pub const NUM_DIRECTIONS: usize = 8;

/// Direction towards one of the up to 8 neighbors of a country.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    North,
    NorthEast,
    East,
    SouthEast,
    South,
    SouthWest,
    West,
    NorthWest,
}

impl Direction {
    pub const ALL: [Direction; NUM_DIRECTIONS] = [
        Direction::North,
        Direction::NorthEast,
        Direction::East,
        Direction::SouthEast,
        Direction::South,
        Direction::SouthWest,
        Direction::West,
        Direction::NorthWest,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Column and row deltas of the neighboring tile in this direction.
    ///
    /// North is the direction of increasing `y` (increasing row).
    pub fn offsets(self) -> (i64, i64) {
        match self {
            Direction::North => (0, 1),
            Direction::NorthEast => (1, 1),
            Direction::East => (1, 0),
            Direction::SouthEast => (1, -1),
            Direction::South => (0, -1),
            Direction::SouthWest => (-1, -1),
            Direction::West => (-1, 0),
            Direction::NorthWest => (-1, 1),
        }
    }

    /// Composite direction from per-axis crossings, each in `{-1, 0, 1}`.
    ///
    /// Returns `None` when neither axis crossed.
    pub fn from_offsets(dx: i64, dy: i64) -> Option<Self> {
        match (dx, dy) {
            (0, 1) => Some(Direction::North),
            (1, 1) => Some(Direction::NorthEast),
            (1, 0) => Some(Direction::East),
            (1, -1) => Some(Direction::SouthEast),
            (0, -1) => Some(Direction::South),
            (-1, -1) => Some(Direction::SouthWest),
            (-1, 0) => Some(Direction::West),
            (-1, 1) => Some(Direction::NorthWest),
            _ => None,
        }
    }
}

/// Partition of the world rectangle into a grid of equally sized countries.
///
/// Ranks are assigned row-major: `rank = row * cols + col`.
#[derive(Debug, Clone)]
pub struct Grid {
    pub cols: usize,
    pub rows: usize,
    pub tile_width: f64,
    pub tile_length: f64,
}

impl Grid {
    pub fn new(cfg: &Config) -> Self {
        Self {
            cols: (cfg.world_width / cfg.country_width) as usize,
            rows: (cfg.world_length / cfg.country_length) as usize,
            tile_width: cfg.country_width as f64,
            tile_length: cfg.country_length as f64,
        }
    }

    pub fn num_tiles(&self) -> usize {
        self.cols * self.rows
    }

    /// Rectangle and neighborhood of the country with the given rank.
    pub fn tile(&self, rank: usize) -> Tile {
        let row = rank / self.cols;
        let col = rank % self.cols;

        let mut neighbors = [None; NUM_DIRECTIONS];
        for dir in Direction::ALL {
            let (dx, dy) = dir.offsets();
            let ncol = col as i64 + dx;
            let nrow = row as i64 + dy;
            if (0..self.cols as i64).contains(&ncol) && (0..self.rows as i64).contains(&nrow) {
                neighbors[dir.index()] = Some((nrow * self.cols as i64 + ncol) as usize);
            }
        }

        Tile {
            rank,
            xmin: col as f64 * self.tile_width,
            xmax: (col + 1) as f64 * self.tile_width,
            ymin: row as f64 * self.tile_length,
            ymax: (row + 1) as f64 * self.tile_length,
            neighbors,
        }
    }
}

/// A single country: its rectangle (`xmin`, `ymin` inclusive, `xmax`, `ymax`
/// exclusive) and the ranks of its neighbors, `None` at the world border.
#[derive(Debug, Clone)]
pub struct Tile {
    pub rank: usize,
    pub xmin: f64,
    pub xmax: f64,
    pub ymin: f64,
    pub ymax: f64,
    pub neighbors: [Option<usize>; NUM_DIRECTIONS],
}

impl Tile {
    pub fn neighbor(&self, dir: Direction) -> Option<usize> {
        self.neighbors[dir.index()]
    }
}

/// Uniformly distribute a population between countries.
///
/// Every country gets `population / count` individuals, and the first
/// country also gets the remaining `population % count`.
pub fn distribute_uniform(population: u64, count: usize) -> Vec<u64> {
    let mut res = vec![population / count as u64; count];
    res[0] += population % count as u64;
    res
}

/// Starting id of each country: exclusive prefix sum of the counts.
pub fn starting_ids(counts: &[u64]) -> Vec<u64> {
    let mut ids = Vec::with_capacity(counts.len());
    let mut next = 0;
    for &count in counts {
        ids.push(next);
        next += count;
    }
    ids
}
