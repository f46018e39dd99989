use crate::worker::cost::{eol_boxes, spacing_violated};
use eda_common::db::figure::ConnFig;
use eda_common::db::indices::NetId;
use eda_common::db::marker::{Marker, Owner, RuleKind};
use eda_common::db::tech::Tech;
use eda_common::geom::point::Coord;
use eda_common::geom::rect::{Rect, box2box_dist_sq};
use eda_common::geom::rtree::SpatialIndex;
use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShapeRole {
    /// Straight wire; `horizontal` is its running direction.
    Wire { horizontal: bool },
    /// Via pad or patch.
    Metal,
    Cut,
    /// Pin geometry or blockage; never moved by the router.
    Fixed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DrcShape {
    /// Routing layer, or cut layer for `ShapeRole::Cut`.
    pub layer: u8,
    pub rect: Rect,
    pub owner: Owner,
    pub net: Option<NetId>,
    pub role: ShapeRole,
}

impl DrcShape {
    pub fn from_figure(tech: &Tech, fig: &ConnFig, net: NetId) -> Vec<DrcShape> {
        let owner = Owner::Net(net);
        let mk = |layer, rect, role| DrcShape {
            layer,
            rect,
            owner,
            net: Some(net),
            role,
        };
        match fig {
            ConnFig::Seg(s) => vec![mk(
                s.layer,
                s.bbox(),
                ShapeRole::Wire {
                    horizontal: s.is_horizontal(),
                },
            )],
            ConnFig::Patch(p) => vec![mk(p.layer, p.bbox(), ShapeRole::Metal)],
            ConnFig::Via(v) => {
                let z = v.bottom_z(tech);
                vec![
                    mk(z, v.layer1_box(tech), ShapeRole::Metal),
                    mk(z + 1, v.layer2_box(tech), ShapeRole::Metal),
                    mk(z, v.cut_box(tech), ShapeRole::Cut),
                ]
            }
        }
    }

    pub fn fixed(layer: u8, rect: Rect, owner: Owner, net: Option<NetId>) -> Self {
        Self {
            layer,
            rect,
            owner,
            net,
            role: ShapeRole::Fixed,
        }
    }

    fn is_routed(&self) -> bool {
        self.role != ShapeRole::Fixed
    }

    /// Owner used for victim/aggressor attribution.
    fn blame(&self) -> Owner {
        self.net.map(Owner::Net).unwrap_or(self.owner)
    }

    fn same_net(&self, other: &DrcShape) -> bool {
        self.net.is_some() && self.net == other.net
    }
}

/// The rule-checking collaborator a worker consults after every change.
pub trait DrcChecker {
    /// Restricts reporting to violations involving `net`; `None` checks all.
    fn set_target_net(&mut self, net: Option<NetId>);
    fn main(&mut self, shapes: &[DrcShape]);
    fn markers(&self) -> &[Marker];
}

pub struct GeometricDrc<'a> {
    tech: &'a Tech,
    drc_box: Rect,
    target: Option<NetId>,
    markers: Vec<Marker>,
}

impl<'a> GeometricDrc<'a> {
    pub fn new(tech: &'a Tech, drc_box: Rect) -> Self {
        Self {
            tech,
            drc_box,
            target: None,
            markers: Vec::new(),
        }
    }

    fn involves_target(&self, a: &DrcShape, b: Option<&DrcShape>) -> bool {
        match self.target {
            None => true,
            Some(t) => a.net == Some(t) || b.is_some_and(|b| b.net == Some(t)),
        }
    }

    fn push_pair(&mut self, rule: RuleKind, layer: u8, bbox: Rect, a: &DrcShape, b: &DrcShape, on_cut: bool) {
        if !bbox.intersects(&self.drc_box) {
            return;
        }
        // the target net is the aggressor
        let (victim, aggressor) = if self.target.is_some() && a.net == self.target {
            (b, a)
        } else {
            (a, b)
        };
        let mut m = Marker::new(rule, layer, bbox)
            .with_victim(victim.blame())
            .with_aggressor(aggressor.blame());
        if on_cut {
            m = m.on_cut();
        }
        self.push(m);
    }

    fn push(&mut self, m: Marker) {
        if let Some(existing) = self.markers.iter_mut().find(|e| e.same_site(&m)) {
            for v in m.victims {
                if !existing.victims.contains(&v) {
                    existing.victims.push(v);
                }
            }
            for a in m.aggressors {
                if !existing.aggressors.contains(&a) {
                    existing.aggressors.push(a);
                }
            }
        } else {
            self.markers.push(m);
        }
    }

    fn check_metal(&mut self, shapes: &[DrcShape], metal: &SpatialIndex<usize>) {
        for (i, a) in shapes.iter().enumerate() {
            if a.role == ShapeRole::Cut || a.layer as usize >= self.tech.num_layers() {
                continue;
            }
            let layer = self.tech.layer(a.layer);
            let reach = layer
                .spacing
                .max_value()
                .max(layer.corner_spacing.unwrap_or(0));
            for (_, j) in metal.query(a.rect.bloat(reach), a.layer) {
                if j <= i {
                    continue;
                }
                let b = &shapes[j];
                if (!a.is_routed() && !b.is_routed()) || a.same_net(b) || !self.involves_target(a, Some(b)) {
                    continue;
                }
                if a.rect.overlaps(&b.rect) {
                    let bbox = a.rect.intersection(&b.rect).unwrap_or(a.rect);
                    self.push_pair(RuleKind::Short, a.layer, bbox, a, b, false);
                    continue;
                }
                if spacing_violated(layer, &a.rect, &b.rect, 0) {
                    let (_, dx, dy) = box2box_dist_sq(&a.rect, &b.rect);
                    let rule = if dx > 0 && dy > 0 && layer.corner_spacing.is_some() {
                        RuleKind::CornerSpacing
                    } else {
                        RuleKind::MetalSpacing
                    };
                    self.push_pair(rule, a.layer, gap_box(&a.rect, &b.rect), a, b, false);
                }
            }
        }
    }

    fn check_eol(&mut self, shapes: &[DrcShape], metal: &SpatialIndex<usize>) {
        for a in shapes {
            let ShapeRole::Wire { horizontal } = a.role else {
                continue;
            };
            if a.layer as usize >= self.tech.num_layers() {
                continue;
            }
            let layer = self.tech.layer(a.layer);
            let Some(rule) = layer.eol else {
                continue;
            };
            if horizontal != layer.is_horizontal() || a.rect.min_dxdy() >= rule.width {
                continue;
            }
            for eol in eol_boxes(&a.rect, horizontal, rule.space, rule.within) {
                for (_, j) in metal.query(eol, a.layer) {
                    let b = &shapes[j];
                    if a.same_net(b) || !b.rect.overlaps(&eol) || !self.involves_target(a, Some(b)) {
                        continue;
                    }
                    // already a short
                    if b.rect.overlaps(&a.rect) {
                        continue;
                    }
                    let bbox = eol.intersection(&b.rect).unwrap_or(eol);
                    self.push_pair(RuleKind::EolSpacing, a.layer, bbox, a, b, false);
                }
            }
        }
    }

    fn check_cuts(&mut self, shapes: &[DrcShape], cuts: &SpatialIndex<usize>) {
        for (i, a) in shapes.iter().enumerate() {
            if a.role != ShapeRole::Cut {
                continue;
            }
            let Some(cut_layer) = self.tech.cut(a.layer) else {
                continue;
            };
            let reach = cut_layer.max_cut_spacing();
            for (_, j) in cuts.query(a.rect.bloat(reach), a.layer) {
                if j <= i {
                    continue;
                }
                let b = &shapes[j];
                if a.same_net(b) || !self.involves_target(a, Some(b)) {
                    continue;
                }
                let (edge_d2, dx, dy) = box2box_dist_sq(&a.rect, &b.rect);
                let c2c = a.rect.center().dist_sq(&b.rect.center());
                let has_prl = dx < 0 || dy < 0;
                if a.rect.overlaps(&b.rect) || cut_layer.spacing.iter().any(|r| r.is_violated(edge_d2, c2c, has_prl)) {
                    self.push_pair(RuleKind::CutSpacing, a.layer, gap_box(&a.rect, &b.rect), a, b, true);
                }
            }

            if let Some(s) = cut_layer.inter_layer_spacing {
                for (_, j) in cuts.query(a.rect.bloat(s), a.layer + 1) {
                    let b = &shapes[j];
                    if a.rect.center() == b.rect.center() || !self.involves_target(a, Some(b)) {
                        continue;
                    }
                    if box2box_dist_sq(&a.rect, &b.rect).0 < s * s {
                        self.push_pair(RuleKind::InterLayerCutSpacing, a.layer, gap_box(&a.rect, &b.rect), a, b, true);
                    }
                }
            }

            if let Some(s) = cut_layer.max_spacing {
                if !self.involves_target(a, None) || !a.rect.intersects(&self.drc_box) {
                    continue;
                }
                let center = a.rect.center();
                let has_neighbor = cuts
                    .query(a.rect.bloat(s), a.layer)
                    .into_iter()
                    .any(|(_, j)| j != i && shapes[j].rect.center().dist_sq(&center) <= s * s);
                if !has_neighbor {
                    self.push(Marker::new(RuleKind::MaxSpacing, a.layer, a.rect).on_cut().with_victim(a.blame()));
                }
            }
        }
    }

    fn check_min_area(&mut self, shapes: &[DrcShape], metal: &SpatialIndex<usize>) {
        let n = shapes.len();
        let mut parent: Vec<usize> = (0..n).collect();
        for (i, a) in shapes.iter().enumerate() {
            if a.role == ShapeRole::Cut || a.net.is_none() {
                continue;
            }
            for (_, j) in metal.query(a.rect, a.layer) {
                if j != i && shapes[j].net == a.net && shapes[j].rect.intersects(&a.rect) {
                    union(&mut parent, i, j);
                }
            }
        }
        let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (i, a) in shapes.iter().enumerate() {
            if a.role != ShapeRole::Cut && a.net.is_some() {
                groups.entry(find(&mut parent, i)).or_default().push(i);
            }
        }
        for members in groups.values() {
            let first = &shapes[members[0]];
            if first.layer as usize >= self.tech.num_layers() {
                continue;
            }
            if !members.iter().any(|&m| shapes[m].is_routed()) || !self.involves_target(first, None) {
                continue;
            }
            let rects: Vec<Rect> = members.iter().map(|&m| shapes[m].rect).collect();
            let min_area = self.tech.layer(first.layer).min_area;
            if union_area(&rects) < min_area {
                let bbox = rects
                    .iter()
                    .copied()
                    .reduce(|a, b| a.merge(&b))
                    .unwrap_or(first.rect);
                if bbox.intersects(&self.drc_box) {
                    self.push(Marker::new(RuleKind::MinArea, first.layer, bbox).with_victim(first.blame()));
                }
            }
        }
    }
}

impl DrcChecker for GeometricDrc<'_> {
    fn set_target_net(&mut self, net: Option<NetId>) {
        self.target = net;
    }

    fn main(&mut self, shapes: &[DrcShape]) {
        self.markers.clear();
        let num_layers = self.tech.num_layers();
        let mut metal_items = Vec::new();
        let mut cut_items = Vec::new();
        for (i, s) in shapes.iter().enumerate() {
            if s.role == ShapeRole::Cut {
                cut_items.push((s.layer, s.rect, i));
            } else {
                metal_items.push((s.layer, s.rect, i));
            }
        }
        let metal = SpatialIndex::bulk_load(num_layers, metal_items);
        let cuts = SpatialIndex::bulk_load(self.tech.cut_layers.len(), cut_items);

        self.check_metal(shapes, &metal);
        self.check_eol(shapes, &metal);
        self.check_cuts(shapes, &cuts);
        self.check_min_area(shapes, &metal);
    }

    fn markers(&self) -> &[Marker] {
        &self.markers
    }
}

/// Region between two rectangles, or their overlap when they touch.
fn gap_box(a: &Rect, b: &Rect) -> Rect {
    let span = |alo: Coord, ahi: Coord, blo: Coord, bhi: Coord| {
        if ahi < blo {
            (ahi, blo)
        } else if bhi < alo {
            (bhi, alo)
        } else {
            (alo.max(blo), ahi.min(bhi))
        }
    };
    let (xl, xh) = span(a.min.x, a.max.x, b.min.x, b.max.x);
    let (yl, yh) = span(a.min.y, a.max.y, b.min.y, b.max.y);
    Rect::from_coords(xl, yl, xh, yh)
}

pub(crate) fn find(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

pub(crate) fn union(parent: &mut [usize], a: usize, b: usize) {
    let ra = find(parent, a);
    let rb = find(parent, b);
    if ra != rb {
        parent[ra.max(rb)] = ra.min(rb);
    }
}

/// Exact area of a union of rectangles.
pub fn union_area(rects: &[Rect]) -> i64 {
    let mut xs: Vec<Coord> = rects.iter().flat_map(|r| [r.min.x, r.max.x]).collect();
    xs.sort_unstable();
    xs.dedup();
    let mut area = 0;
    for w in xs.windows(2) {
        let (x0, x1) = (w[0], w[1]);
        let mut spans: Vec<(Coord, Coord)> = rects
            .iter()
            .filter(|r| r.min.x <= x0 && r.max.x >= x1 && r.height() > 0)
            .map(|r| (r.min.y, r.max.y))
            .collect();
        spans.sort_unstable();
        let mut covered = 0;
        let mut cur: Option<(Coord, Coord)> = None;
        for (lo, hi) in spans {
            match cur {
                Some((clo, chi)) if lo <= chi => cur = Some((clo, chi.max(hi))),
                Some((clo, chi)) => {
                    covered += chi - clo;
                    cur = Some((lo, hi));
                }
                None => cur = Some((lo, hi)),
            }
        }
        if let Some((clo, chi)) = cur {
            covered += chi - clo;
        }
        area += covered * (x1 - x0);
    }
    area
}

#[cfg(test)]
mod tests {
    use super::*;
    use eda_common::db::figure::{PathSeg, SegStyle, Via};
    use eda_common::geom::point::Point;

    fn tech() -> Tech {
        Tech::standard(2, 200, 100, 100)
    }

    fn wire(net: u32, y: Coord, x0: Coord, x1: Coord) -> Vec<DrcShape> {
        let seg = PathSeg::new(0, Point::new(x0, y), Point::new(x1, y), SegStyle::extended(100));
        DrcShape::from_figure(&tech(), &ConnFig::Seg(seg), NetId(net))
    }

    fn run(shapes: &[DrcShape], target: Option<NetId>) -> Vec<Marker> {
        let t = tech();
        let mut drc = GeometricDrc::new(&t, Rect::from_coords(-10_000, -10_000, 10_000, 10_000));
        drc.set_target_net(target);
        drc.main(shapes);
        drc.markers().to_vec()
    }

    #[test]
    fn union_area_counts_overlap_once() {
        let a = Rect::from_coords(0, 0, 10, 10);
        let b = Rect::from_coords(5, 5, 15, 15);
        assert_eq!(union_area(&[a, b]), 175);
        assert_eq!(union_area(&[a, a]), 100);
    }

    #[test]
    fn crossing_nets_short() {
        let mut shapes = wire(0, 0, 0, 2000);
        shapes.extend(wire(1, 50, 1000, 3000));
        let m = run(&shapes, None);
        assert!(m.iter().any(|m| m.rule == RuleKind::Short));
    }

    #[test]
    fn close_parallel_wires_violate_spacing_and_target_is_aggressor() {
        let mut shapes = wire(0, 0, 0, 2000);
        shapes.extend(wire(1, 150, 0, 2000));
        let m = run(&shapes, Some(NetId(1)));
        let spc = m.iter().find(|m| m.rule == RuleKind::MetalSpacing).expect("spacing marker");
        assert_eq!(spc.aggressors, vec![Owner::Net(NetId(1))]);
        assert_eq!(spc.victims, vec![Owner::Net(NetId(0))]);
    }

    #[test]
    fn same_net_overlap_is_clean() {
        let mut shapes = wire(0, 0, 0, 2000);
        shapes.extend(wire(0, 0, 200, 800));
        assert!(run(&shapes, None).is_empty());
    }

    #[test]
    fn tiny_island_violates_min_area() {
        let t = tech();
        let via = Via::new(t.default_via_id(0).expect("via"), Point::new(0, 0));
        let shapes = DrcShape::from_figure(&t, &ConnFig::Via(via), NetId(0));
        let m = run(&shapes, None);
        assert_eq!(m.iter().filter(|m| m.rule == RuleKind::MinArea).count(), 2);
    }

    #[test]
    fn cut_spacing_between_nets() {
        let t = tech();
        let id = t.default_via_id(0).expect("via");
        let mut shapes = DrcShape::from_figure(&t, &ConnFig::Via(Via::new(id, Point::new(0, 0))), NetId(0));
        shapes.extend(DrcShape::from_figure(&t, &ConnFig::Via(Via::new(id, Point::new(120, 0))), NetId(1)));
        let m = run(&shapes, None);
        assert!(m.iter().any(|m| m.rule == RuleKind::CutSpacing && m.on_cut));
    }
}
