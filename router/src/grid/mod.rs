pub mod dense;

pub use dense::DenseGrid;

use crate::utils::conversion::GridConverter;
use eda_common::geom::coord::GridCoord;
use eda_common::geom::point::Point;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Dir {
    East,
    West,
    North,
    South,
    Up,
    Down,
}

impl Dir {
    pub const ALL: [Dir; 6] = [
        Dir::East,
        Dir::West,
        Dir::North,
        Dir::South,
        Dir::Up,
        Dir::Down,
    ];

    pub fn opposite(self) -> Dir {
        match self {
            Dir::East => Dir::West,
            Dir::West => Dir::East,
            Dir::North => Dir::South,
            Dir::South => Dir::North,
            Dir::Up => Dir::Down,
            Dir::Down => Dir::Up,
        }
    }

    pub fn is_via(self) -> bool {
        matches!(self, Dir::Up | Dir::Down)
    }

    pub fn is_horizontal(self) -> bool {
        matches!(self, Dir::East | Dir::West)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CostKind {
    RouteShape,
    FixedShape,
    /// Decaying history left behind by DRC markers.
    Marker,
}

/// The search-facing view of a worker's 3-D grid graph. Via counters of the
/// edge between `z` and `z + 1` live on the lower cell.
pub trait RoutingGrid: Sync + Send {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn layers(&self) -> u8;
    fn converter(&self) -> &GridConverter;

    fn point(&self, c: GridCoord) -> Point {
        self.converter().to_world(c)
    }

    fn step(&self, c: GridCoord, dir: Dir) -> Option<GridCoord> {
        match dir {
            Dir::East if c.x + 1 < self.width() => Some(GridCoord::new(c.x + 1, c.y, c.z)),
            Dir::West if c.x > 0 => Some(GridCoord::new(c.x - 1, c.y, c.z)),
            Dir::North if c.y + 1 < self.height() => Some(GridCoord::new(c.x, c.y + 1, c.z)),
            Dir::South if c.y > 0 => Some(GridCoord::new(c.x, c.y - 1, c.z)),
            Dir::Up if c.z + 1 < self.layers() => Some(c.with_z(c.z + 1)),
            Dir::Down if c.z > 0 => Some(c.with_z(c.z - 1)),
            _ => None,
        }
    }

    fn is_blocked(&self, c: GridCoord, dir: Dir) -> bool;
    fn set_blocked(&mut self, c: GridCoord, dir: Dir);
    fn reset_blocked(&mut self, c: GridCoord, dir: Dir);

    fn cost(&self, c: GridCoord, kind: CostKind, via: bool) -> u32;
    fn add_cost(&mut self, c: GridCoord, kind: CostKind, via: bool);
    fn sub_cost(&mut self, c: GridCoord, kind: CostKind, via: bool);

    /// Multiplies every marker history counter by `factor`.
    fn decay_history(&mut self, factor: f32);
}
