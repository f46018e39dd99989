//! Ownership of design geometry by a worker's route box.
//!
//! A point belongs to the box when it lies in `[min, max)` on both axes, with
//! the upper bound closed on the die edge, so abutting boxes never both own
//! the same via, patch or pin. A wire is owned where its centerline runs
//! through the box; pieces outside stay untouched and every place where they
//! meet the closed box becomes a boundary terminal of the worker.

use eda_common::db::core::{AccessPoint, Design, Guide, TrackAxis};
use eda_common::db::figure::{ConnFig, EndStyle, PathSeg};
use eda_common::db::indices::NetId;
use eda_common::db::tech::Tech;
use eda_common::geom::point::{Coord, Point};
use eda_common::geom::rect::Rect;
use std::collections::VecDeque;

fn in_half_open(v: Coord, lo: Coord, hi: Coord, die_hi: Coord) -> bool {
    v >= lo && (v < hi || (hi >= die_hi && v <= hi))
}

pub fn owns_point(route_box: &Rect, die: &Rect, p: Point) -> bool {
    in_half_open(p.x, route_box.min.x, route_box.max.x, die.max.x)
        && in_half_open(p.y, route_box.min.y, route_box.max.y, die.max.y)
}

#[derive(Debug, PartialEq, Eq)]
pub struct Clipped {
    pub inside: Option<PathSeg>,
    pub outside: Vec<PathSeg>,
}

/// Cuts `seg` at the route box. Cut ends are truncated on both sides so the
/// pieces abut exactly.
pub fn clip_seg(seg: &PathSeg, route_box: &Rect, die: &Rect) -> Clipped {
    let whole = Clipped {
        inside: None,
        outside: vec![*seg],
    };
    if !seg.is_orthogonal() {
        return whole;
    }
    let (track_ok, alo, ahi) = if seg.is_horizontal() {
        (
            in_half_open(seg.track(), route_box.min.y, route_box.max.y, die.max.y),
            route_box.min.x,
            route_box.max.x,
        )
    } else {
        (
            in_half_open(seg.track(), route_box.min.x, route_box.max.x, die.max.x),
            route_box.min.y,
            route_box.max.y,
        )
    };
    if !track_ok {
        return whole;
    }
    let (lo, hi) = (seg.low(), seg.high());
    let (clo, chi) = (lo.max(alo), hi.min(ahi));
    if clo > chi || (clo == chi && lo != hi) {
        return whole;
    }

    let mut inside = *seg;
    inside.set_span(clo, chi);
    if clo != lo {
        inside.style.begin = EndStyle::Truncate;
    }
    if chi != hi {
        inside.style.end = EndStyle::Truncate;
    }
    let mut outside = Vec::new();
    if lo < clo {
        let mut piece = *seg;
        piece.set_span(lo, clo);
        piece.style.end = EndStyle::Truncate;
        outside.push(piece);
    }
    if chi < hi {
        let mut piece = *seg;
        piece.set_span(chi, hi);
        piece.style.begin = EndStyle::Truncate;
        outside.push(piece);
    }
    Clipped {
        inside: Some(inside),
        outside,
    }
}

/// Splits a net's figures into `(owned, outside)`.
pub fn split_figures(figs: &[ConnFig], route_box: &Rect, die: &Rect) -> (Vec<ConnFig>, Vec<ConnFig>) {
    let mut owned = Vec::new();
    let mut outside = Vec::new();
    for fig in figs {
        match fig {
            ConnFig::Seg(s) => {
                let clipped = clip_seg(s, route_box, die);
                owned.extend(clipped.inside.map(ConnFig::Seg));
                outside.extend(clipped.outside.into_iter().map(ConnFig::Seg));
            }
            _ if owns_point(route_box, die, fig.anchor()) => owned.push(*fig),
            _ => outside.push(*fig),
        }
    }
    (owned, outside)
}

/// Terminals where outside geometry meets the closed route box. Each group
/// is one electrical point; a via contributes both of its layers.
pub fn boundary_points(tech: &Tech, outside: &[ConnFig], route_box: &Rect) -> Vec<Vec<AccessPoint>> {
    let mut groups = Vec::new();
    for fig in outside {
        match fig {
            ConnFig::Seg(s) if s.is_orthogonal() => {
                let (plo, phi, alo, ahi) = if s.is_horizontal() {
                    (route_box.min.y, route_box.max.y, route_box.min.x, route_box.max.x)
                } else {
                    (route_box.min.x, route_box.max.x, route_box.min.y, route_box.max.y)
                };
                if s.track() < plo || s.track() > phi {
                    continue;
                }
                let (clo, chi) = (s.low().max(alo), s.high().min(ahi));
                if clo > chi {
                    continue;
                }
                for along in [clo, chi] {
                    add_group(
                        &mut groups,
                        vec![AccessPoint {
                            point: s.point_at(along),
                            layer: s.layer,
                        }],
                    );
                }
            }
            ConnFig::Via(v) if route_box.contains(v.origin) => {
                let z = v.bottom_z(tech);
                let ap = |layer| AccessPoint {
                    point: v.origin,
                    layer,
                };
                add_group(&mut groups, vec![ap(z), ap(z + 1)]);
            }
            _ => {}
        }
    }
    groups.sort();
    groups
}

fn add_group(groups: &mut Vec<Vec<AccessPoint>>, mut merged: Vec<AccessPoint>) {
    let mut i = 0;
    while i < groups.len() {
        if groups[i].iter().any(|a| merged.contains(a)) {
            merged.extend(groups.swap_remove(i));
        } else {
            i += 1;
        }
    }
    merged.sort_unstable();
    merged.dedup();
    groups.push(merged);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Side {
    Left,
    Right,
    Bottom,
    Top,
}

/// Where the net's guides leave the route box toward a terminal outside it.
/// At most one crossing per box side, snapped to a track of the guide layer.
/// Abutting boxes pick the same point for a shared edge.
pub fn guide_crossings(design: &Design, net: NetId, route_box: &Rect) -> Vec<AccessPoint> {
    let guides = &design.net(net).guides;
    let die = &design.die;
    let mut out = Vec::new();
    for side in [Side::Left, Side::Right, Side::Bottom, Side::Top] {
        let vertical_edge = matches!(side, Side::Left | Side::Right);
        let edge = match side {
            Side::Left => route_box.min.x,
            Side::Right => route_box.max.x,
            Side::Bottom => route_box.min.y,
            Side::Top => route_box.max.y,
        };
        let (die_lo, die_hi) = if vertical_edge {
            (die.min.x, die.max.x)
        } else {
            (die.min.y, die.max.y)
        };
        if edge <= die_lo || edge >= die_hi {
            continue;
        }
        let (rlo, rhi) = if vertical_edge {
            (route_box.min.y, route_box.max.y)
        } else {
            (route_box.min.x, route_box.max.x)
        };
        let across = |g: &Guide| {
            if vertical_edge {
                (g.rect.min.x, g.rect.max.x)
            } else {
                (g.rect.min.y, g.rect.max.y)
            }
        };
        let along = |g: &Guide| {
            if vertical_edge {
                (g.rect.min.y, g.rect.max.y)
            } else {
                (g.rect.min.x, g.rect.max.x)
            }
        };
        let low_side = |g: &Guide| {
            let (lo, hi) = across(g);
            lo < edge && hi >= edge
        };
        let high_side = |g: &Guide| {
            let (lo, hi) = across(g);
            hi > edge && lo <= edge
        };
        let (toward, away): (&dyn Fn(&Guide) -> bool, &dyn Fn(&Guide) -> bool) = match side {
            Side::Left | Side::Bottom => (&high_side, &low_side),
            Side::Right | Side::Top => (&low_side, &high_side),
        };

        let mut best: Option<((bool, u8, Coord), AccessPoint)> = None;
        for g in guides.iter().filter(|g| (g.layer as usize) < design.num_layers() && toward(g)) {
            for (hi_idx, h) in guides.iter().enumerate() {
                if h.layer != g.layer || !away(h) {
                    continue;
                }
                let ((glo, ghi), (hlo, hhi)) = (along(g), along(h));
                let lo = glo.max(hlo).max(rlo);
                let hi = ghi.min(hhi).min(rhi);
                if lo > hi {
                    continue;
                }
                let axis = if vertical_edge { TrackAxis::Y } else { TrackAxis::X };
                let tracks = design.track_coords(Some(g.layer), axis, lo, hi);
                let Some(&c) = tracks.get(tracks.len() / 2) else {
                    continue;
                };
                let wrong_way = design.tech.layer(g.layer).is_horizontal() != vertical_edge;
                let key = (wrong_way, g.layer, c);
                if best.as_ref().is_some_and(|(k, _)| *k <= key) {
                    continue;
                }
                if !reaches_outside_pin(design, net, hi_idx, route_box) {
                    continue;
                }
                let point = if vertical_edge {
                    Point::new(edge, c)
                } else {
                    Point::new(c, edge)
                };
                best = Some((key, AccessPoint { point, layer: g.layer }));
            }
        }
        out.extend(best.map(|(_, ap)| ap));
    }
    out
}

/// Breadth-first walk over guides that leave the box, looking for a real
/// terminal the box does not own.
fn reaches_outside_pin(design: &Design, net: NetId, start: usize, route_box: &Rect) -> bool {
    let guides = &design.net(net).guides;
    let targets: Vec<Point> = design
        .terminal_pins(net)
        .iter()
        .filter_map(|p| design.pin(*p).access_points.first())
        .map(|ap| ap.point)
        .filter(|p| !owns_point(route_box, &design.die, *p))
        .collect();
    if targets.is_empty() {
        return false;
    }
    let mut seen = vec![false; guides.len()];
    let mut queue = VecDeque::from([start]);
    seen[start] = true;
    while let Some(i) = queue.pop_front() {
        let g = &guides[i];
        if targets.iter().any(|p| g.rect.contains(*p)) {
            return true;
        }
        for (j, h) in guides.iter().enumerate() {
            if seen[j] || route_box.contains_rect(&h.rect) || h.layer.abs_diff(g.layer) > 1 || !h.rect.intersects(&g.rect) {
                continue;
            }
            seen[j] = true;
            queue.push_back(j);
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use eda_common::db::core::PinKind;
    use eda_common::db::figure::SegStyle;

    fn die() -> Rect {
        Rect::from_coords(0, 0, 4000, 2000)
    }

    fn hseg(x0: Coord, x1: Coord, y: Coord) -> PathSeg {
        PathSeg::new(0, Point::new(x0, y), Point::new(x1, y), SegStyle::extended(100))
    }

    #[test]
    fn crossing_wire_is_cut_with_truncated_ends() {
        let left = Rect::from_coords(0, 0, 2000, 2000);
        let c = clip_seg(&hseg(1000, 3000, 500), &left, &die());
        let inside = c.inside.expect("inside piece");
        assert_eq!((inside.low(), inside.high()), (1000, 2000));
        assert_eq!(inside.style.begin, EndStyle::Extend(50));
        assert_eq!(inside.style.end, EndStyle::Truncate);
        assert_eq!(c.outside.len(), 1);
        assert_eq!((c.outside[0].low(), c.outside[0].high()), (2000, 3000));
        assert_eq!(c.outside[0].style.begin, EndStyle::Truncate);
    }

    #[test]
    fn abutting_boxes_never_share_an_anchor() {
        let left = Rect::from_coords(0, 0, 2000, 2000);
        let right = Rect::from_coords(2000, 0, 4000, 2000);
        let p = Point::new(2000, 500);
        assert!(!owns_point(&left, &die(), p));
        assert!(owns_point(&right, &die(), p));
        assert!(owns_point(&right, &die(), Point::new(4000, 2000)));
        // a wire that only touches the left box is not owned by it
        let touch = clip_seg(&hseg(2000, 3000, 500), &left, &die());
        assert!(touch.inside.is_none());
    }

    #[test]
    fn touching_geometry_becomes_boundary_terminals() {
        let tech = Tech::standard(2, 200, 100, 100);
        let left = Rect::from_coords(0, 0, 2000, 2000);
        let outside = vec![ConnFig::Seg(hseg(2000, 3000, 500)), ConnFig::Seg(hseg(2500, 3000, 900))];
        let groups = boundary_points(&tech, &outside, &left);
        assert_eq!(
            groups,
            vec![vec![AccessPoint {
                point: Point::new(2000, 500),
                layer: 0
            }]]
        );
    }

    #[test]
    fn crossing_points_agree_across_a_shared_edge() {
        let mut d = Design::new("x", Tech::standard(2, 200, 100, 100), die(), 1000);
        d.add_uniform_tracks(100);
        let n = d.add_net("n");
        for (name, x) in [("a", 500), ("b", 3500)] {
            d.add_pin(
                n,
                name,
                PinKind::InstTerm,
                vec![AccessPoint {
                    point: Point::new(x, 500),
                    layer: 0,
                }],
                vec![],
            );
        }
        for i in 0..4 {
            let rect = d.gcell_box(i, 0);
            d.net_mut(n).guides.push(Guide { layer: 0, rect });
        }
        let left = Rect::from_coords(0, 0, 2000, 2000);
        let right = Rect::from_coords(2000, 0, 4000, 2000);
        let a = guide_crossings(&d, n, &left);
        let b = guide_crossings(&d, n, &right);
        assert_eq!(a.len(), 1);
        assert_eq!(a, b);
        assert_eq!(a[0].point.x, 2000);
    }
}
