use super::point::{Coord, Point};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub min: Point,
    pub max: Point,
}

impl Rect {
    pub fn new(a: Point, b: Point) -> Self {
        Self {
            min: Point::new(a.x.min(b.x), a.y.min(b.y)),
            max: Point::new(a.x.max(b.x), a.y.max(b.y)),
        }
    }

    pub fn from_coords(xl: Coord, yl: Coord, xh: Coord, yh: Coord) -> Self {
        Self::new(Point::new(xl, yl), Point::new(xh, yh))
    }

    pub fn from_point(p: Point) -> Self {
        Self { min: p, max: p }
    }

    pub fn width(&self) -> Coord {
        self.max.x - self.min.x
    }
    pub fn height(&self) -> Coord {
        self.max.y - self.min.y
    }
    pub fn min_dxdy(&self) -> Coord {
        self.width().min(self.height())
    }
    pub fn max_dxdy(&self) -> Coord {
        self.width().max(self.height())
    }
    pub fn area(&self) -> i64 {
        self.width() * self.height()
    }

    pub fn center(&self) -> Point {
        Point::new(
            (self.min.x + self.max.x) / 2,
            (self.min.y + self.max.y) / 2,
        )
    }

    /// Interiors share area.
    pub fn overlaps(&self, other: &Rect) -> bool {
        self.min.x < other.max.x
            && self.max.x > other.min.x
            && self.min.y < other.max.y
            && self.max.y > other.min.y
    }

    /// Closed intersection; touching edges count.
    pub fn intersects(&self, other: &Rect) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
    }

    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.min.x && p.x <= self.max.x && p.y >= self.min.y && p.y <= self.max.y
    }

    pub fn contains_rect(&self, other: &Rect) -> bool {
        self.contains(other.min) && self.contains(other.max)
    }

    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        if !self.intersects(other) {
            return None;
        }
        Some(Rect {
            min: Point::new(self.min.x.max(other.min.x), self.min.y.max(other.min.y)),
            max: Point::new(self.max.x.min(other.max.x), self.max.y.min(other.max.y)),
        })
    }

    pub fn bloat(&self, d: Coord) -> Rect {
        Rect {
            min: Point::new(self.min.x - d, self.min.y - d),
            max: Point::new(self.max.x + d, self.max.y + d),
        }
    }

    pub fn translate(&self, by: Point) -> Rect {
        Rect {
            min: self.min.translate(by.x, by.y),
            max: self.max.translate(by.x, by.y),
        }
    }

    pub fn merge(&self, other: &Rect) -> Rect {
        Rect {
            min: Point::new(self.min.x.min(other.min.x), self.min.y.min(other.min.y)),
            max: Point::new(self.max.x.max(other.max.x), self.max.y.max(other.max.y)),
        }
    }
}

pub fn pt2box_dist_sq(p: Point, r: &Rect) -> i64 {
    let dx = (r.min.x - p.x).max(p.x - r.max.x).max(0);
    let dy = (r.min.y - p.y).max(p.y - r.max.y).max(0);
    dx * dx + dy * dy
}

/// Squared edge distance plus the signed x and y gaps. A negative gap is the
/// projected overlap (parallel run length) in that axis.
pub fn box2box_dist_sq(a: &Rect, b: &Rect) -> (i64, Coord, Coord) {
    let dx = (b.min.x - a.max.x).max(a.min.x - b.max.x);
    let dy = (b.min.y - a.max.y).max(a.min.y - b.max.y);
    let cx = dx.max(0);
    let cy = dy.max(0);
    (cx * cx + cy * cy, dx, dy)
}
