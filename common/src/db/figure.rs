use crate::db::indices::ViaDefId;
use crate::db::tech::Tech;
use crate::geom::point::{Coord, Point};
use crate::geom::rect::Rect;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndStyle {
    /// The wire stops exactly at its end point.
    Truncate,
    /// The wire extends past its end point by the given amount.
    Extend(Coord),
}

impl EndStyle {
    pub fn ext(&self) -> Coord {
        match *self {
            EndStyle::Truncate => 0,
            EndStyle::Extend(e) => e,
        }
    }
    pub fn is_truncated(&self) -> bool {
        matches!(self, EndStyle::Truncate)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegStyle {
    pub begin: EndStyle,
    pub end: EndStyle,
    pub width: Coord,
}

impl SegStyle {
    pub fn extended(width: Coord) -> Self {
        Self {
            begin: EndStyle::Extend(width / 2),
            end: EndStyle::Extend(width / 2),
            width,
        }
    }
}

/// Axis-aligned wire. `begin` is always the lower end.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathSeg {
    pub layer: u8,
    pub begin: Point,
    pub end: Point,
    pub style: SegStyle,
    pub tapered: bool,
}

impl PathSeg {
    pub fn new(layer: u8, a: Point, b: Point, style: SegStyle) -> Self {
        if b < a {
            Self {
                layer,
                begin: b,
                end: a,
                style: SegStyle {
                    begin: style.end,
                    end: style.begin,
                    width: style.width,
                },
                tapered: false,
            }
        } else {
            Self {
                layer,
                begin: a,
                end: b,
                style,
                tapered: false,
            }
        }
    }

    pub fn is_horizontal(&self) -> bool {
        self.begin.y == self.end.y
    }

    pub fn is_orthogonal(&self) -> bool {
        self.begin.x == self.end.x || self.begin.y == self.end.y
    }

    /// Coordinate of the track the wire runs on.
    pub fn track(&self) -> Coord {
        if self.is_horizontal() {
            self.begin.y
        } else {
            self.begin.x
        }
    }

    pub fn low(&self) -> Coord {
        if self.is_horizontal() {
            self.begin.x
        } else {
            self.begin.y
        }
    }

    pub fn high(&self) -> Coord {
        if self.is_horizontal() {
            self.end.x
        } else {
            self.end.y
        }
    }

    pub fn length(&self) -> Coord {
        self.begin.manhattan(&self.end)
    }

    pub fn point_at(&self, along: Coord) -> Point {
        if self.is_horizontal() {
            Point::new(along, self.begin.y)
        } else {
            Point::new(self.begin.x, along)
        }
    }

    pub fn set_span(&mut self, lo: Coord, hi: Coord) {
        self.begin = self.point_at(lo);
        self.end = self.point_at(hi);
    }

    /// `p` lies on the wire's centerline strictly between its end points.
    pub fn contains_inside(&self, p: Point) -> bool {
        if self.is_horizontal() {
            p.y == self.begin.y && p.x > self.begin.x && p.x < self.end.x
        } else {
            p.x == self.begin.x && p.y > self.begin.y && p.y < self.end.y
        }
    }

    pub fn bbox(&self) -> Rect {
        let hw = self.style.width / 2;
        let b = self.style.begin.ext();
        let e = self.style.end.ext();
        if self.is_horizontal() {
            Rect::from_coords(
                self.begin.x - b,
                self.begin.y - hw,
                self.end.x + e,
                self.end.y + hw,
            )
        } else {
            Rect::from_coords(
                self.begin.x - hw,
                self.begin.y - b,
                self.end.x + hw,
                self.end.y + e,
            )
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Via {
    pub def: ViaDefId,
    pub origin: Point,
    pub bottom_connected: bool,
    pub top_connected: bool,
    pub tapered: bool,
}

impl Via {
    pub fn new(def: ViaDefId, origin: Point) -> Self {
        Self {
            def,
            origin,
            bottom_connected: false,
            top_connected: false,
            tapered: false,
        }
    }

    pub fn bottom_z(&self, tech: &Tech) -> u8 {
        tech.via(self.def).bottom_z()
    }

    pub fn layer1_box(&self, tech: &Tech) -> Rect {
        tech.via(self.def).bottom.translate(self.origin)
    }

    pub fn layer2_box(&self, tech: &Tech) -> Rect {
        tech.via(self.def).top.translate(self.origin)
    }

    pub fn cut_box(&self, tech: &Tech) -> Rect {
        tech.via(self.def).cut.translate(self.origin)
    }
}

/// Rectangular metal added at `origin` to satisfy area rules.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    pub layer: u8,
    pub origin: Point,
    pub offset: Rect,
}

impl Patch {
    pub fn bbox(&self) -> Rect {
        self.offset.translate(self.origin)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnFig {
    Seg(PathSeg),
    Via(Via),
    Patch(Patch),
}

impl ConnFig {
    /// Every (layer, rectangle) of metal the figure occupies.
    pub fn shapes(&self, tech: &Tech) -> Vec<(u8, Rect)> {
        match self {
            ConnFig::Seg(s) => vec![(s.layer, s.bbox())],
            ConnFig::Patch(p) => vec![(p.layer, p.bbox())],
            ConnFig::Via(v) => {
                let z = v.bottom_z(tech);
                vec![(z, v.layer1_box(tech)), (z + 1, v.layer2_box(tech))]
            }
        }
    }

    pub fn bbox(&self, tech: &Tech) -> Rect {
        match self {
            ConnFig::Seg(s) => s.bbox(),
            ConnFig::Patch(p) => p.bbox(),
            ConnFig::Via(v) => v.layer1_box(tech).merge(&v.layer2_box(tech)),
        }
    }

    /// Point used to decide which route box owns the figure.
    pub fn anchor(&self) -> Point {
        match self {
            ConnFig::Seg(s) => s.begin,
            ConnFig::Via(v) => v.origin,
            ConnFig::Patch(p) => p.origin,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_normalizes_and_swaps_styles() {
        let style = SegStyle {
            begin: EndStyle::Truncate,
            end: EndStyle::Extend(5),
            width: 10,
        };
        let s = PathSeg::new(0, Point::new(100, 0), Point::new(0, 0), style);
        assert_eq!(s.begin, Point::new(0, 0));
        assert_eq!(s.style.begin, EndStyle::Extend(5));
        assert_eq!(s.style.end, EndStyle::Truncate);
        assert_eq!(s.bbox(), Rect::from_coords(-5, -5, 100, 5));
    }

    #[test]
    fn vertical_span_helpers() {
        let s = PathSeg::new(1, Point::new(7, 10), Point::new(7, 50), SegStyle::extended(4));
        assert!(!s.is_horizontal());
        assert_eq!((s.track(), s.low(), s.high()), (7, 10, 50));
        assert!(s.contains_inside(Point::new(7, 20)));
        assert!(!s.contains_inside(Point::new(7, 50)));
    }
}
