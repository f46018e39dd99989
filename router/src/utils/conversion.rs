use eda_common::geom::coord::GridCoord;
use eda_common::geom::point::{Coord, Point};
use eda_common::geom::rect::Rect;

/// Maps world coordinates onto the non-uniform index space of a worker grid.
/// Both axes are sorted, deduplicated coordinate lists.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GridConverter {
    xs: Vec<Coord>,
    ys: Vec<Coord>,
}

impl GridConverter {
    pub fn new(mut xs: Vec<Coord>, mut ys: Vec<Coord>) -> Self {
        xs.sort_unstable();
        xs.dedup();
        ys.sort_unstable();
        ys.dedup();
        Self { xs, ys }
    }

    pub fn grid_w(&self) -> u32 {
        self.xs.len() as u32
    }

    pub fn grid_h(&self) -> u32 {
        self.ys.len() as u32
    }

    pub fn x_at(&self, i: u32) -> Coord {
        self.xs[i as usize]
    }

    pub fn y_at(&self, j: u32) -> Coord {
        self.ys[j as usize]
    }

    /// Exact lookup; `None` when `p` is not a grid point.
    pub fn to_grid(&self, p: Point, layer: u8) -> Option<GridCoord> {
        let x = self.xs.binary_search(&p.x).ok()?;
        let y = self.ys.binary_search(&p.y).ok()?;
        Some(GridCoord::new(x as u32, y as u32, layer))
    }

    pub fn nearest(&self, p: Point, layer: u8) -> Option<GridCoord> {
        let x = nearest_index(&self.xs, p.x)?;
        let y = nearest_index(&self.ys, p.y)?;
        Some(GridCoord::new(x, y, layer))
    }

    pub fn to_world(&self, g: GridCoord) -> Point {
        Point::new(self.xs[g.x as usize], self.ys[g.y as usize])
    }

    /// Inclusive index range of grid columns inside `[lo, hi]`.
    pub fn x_range(&self, lo: Coord, hi: Coord) -> Option<(u32, u32)> {
        index_range(&self.xs, lo, hi)
    }

    pub fn y_range(&self, lo: Coord, hi: Coord) -> Option<(u32, u32)> {
        index_range(&self.ys, lo, hi)
    }

    /// Inclusive `(x0, x1, y0, y1)` index ranges covered by `r`.
    pub fn rect_range(&self, r: &Rect) -> Option<(u32, u32, u32, u32)> {
        let (x0, x1) = self.x_range(r.min.x, r.max.x)?;
        let (y0, y1) = self.y_range(r.min.y, r.max.y)?;
        Some((x0, x1, y0, y1))
    }
}

fn index_range(axis: &[Coord], lo: Coord, hi: Coord) -> Option<(u32, u32)> {
    let start = axis.partition_point(|&c| c < lo);
    let end = axis.partition_point(|&c| c <= hi);
    if start >= end {
        None
    } else {
        Some((start as u32, (end - 1) as u32))
    }
}

fn nearest_index(axis: &[Coord], v: Coord) -> Option<u32> {
    if axis.is_empty() {
        return None;
    }
    let i = axis.partition_point(|&c| c < v);
    let best = if i == 0 {
        0
    } else if i == axis.len() {
        axis.len() - 1
    } else if v - axis[i - 1] <= axis[i] - v {
        i - 1
    } else {
        i
    };
    Some(best as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_and_nearest_lookup() {
        let c = GridConverter::new(vec![300, 100, 200, 100], vec![0, 50]);
        assert_eq!(c.grid_w(), 3);
        assert_eq!(c.to_grid(Point::new(200, 50), 2), Some(GridCoord::new(1, 1, 2)));
        assert_eq!(c.to_grid(Point::new(210, 50), 0), None);
        assert_eq!(c.nearest(Point::new(260, 10), 0), Some(GridCoord::new(2, 0, 0)));
        assert_eq!(c.to_world(GridCoord::new(2, 1, 0)), Point::new(300, 50));
    }

    #[test]
    fn ranges_are_inclusive() {
        let c = GridConverter::new(vec![0, 100, 200, 300], vec![0]);
        assert_eq!(c.x_range(100, 200), Some((1, 2)));
        assert_eq!(c.x_range(101, 199), None);
        assert_eq!(c.x_range(-50, 1000), Some((0, 3)));
    }
}
