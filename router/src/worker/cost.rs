//! Translation of placed or removed metal into grid cost deltas.
//!
//! Every operation first collects the exact set of affected `(cell, via)`
//! slots and only then touches the grid, so an add followed by the matching
//! subtract leaves every counter where it started.

use crate::grid::{CostKind, DenseGrid, RoutingGrid};
use eda_common::db::figure::{ConnFig, PathSeg, Via};
use eda_common::db::marker::Marker;
use eda_common::db::tech::{NonDefaultRule, RoutingLayer, Tech};
use eda_common::geom::coord::GridCoord;
use eda_common::geom::point::{Coord, Point};
use eda_common::geom::rect::{Rect, box2box_dist_sq};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CostOp {
    AddRouteShape,
    SubRouteShape,
    AddFixedShape,
    SubFixedShape,
}

impl CostOp {
    fn kind(self) -> CostKind {
        match self {
            CostOp::AddRouteShape | CostOp::SubRouteShape => CostKind::RouteShape,
            CostOp::AddFixedShape | CostOp::SubFixedShape => CostKind::FixedShape,
        }
    }

    fn is_add(self) -> bool {
        matches!(self, CostOp::AddRouteShape | CostOp::AddFixedShape)
    }
}

type Slot = (GridCoord, bool);

/// Adds or removes the cost footprint of one connection figure.
pub fn mod_path_cost(
    grid: &mut DenseGrid,
    tech: &Tech,
    fig: &ConnFig,
    ndr: Option<&NonDefaultRule>,
    op: CostOp,
    modify_eol: bool,
    modify_cut: bool,
) {
    let mut slots = Vec::new();
    match fig {
        ConnFig::Seg(seg) => seg_slots(grid, tech, seg, ndr, modify_eol, &mut slots),
        ConnFig::Via(via) => via_slots(grid, tech, via, ndr, modify_cut, &mut slots),
        ConnFig::Patch(p) => {
            let extra = ndr.map(|r| r.spacing(p.layer)).unwrap_or(0);
            spacing_slots(grid, tech, p.layer, &p.bbox(), extra, &mut slots);
        }
    }
    apply(grid, slots, op);
}

/// Cost footprint of a blockage or pin shape.
pub fn mod_fixed_shape_cost(grid: &mut DenseGrid, tech: &Tech, layer: u8, rect: &Rect, op: CostOp) {
    let mut slots = Vec::new();
    spacing_slots(grid, tech, layer, rect, 0, &mut slots);
    apply(grid, slots, op);
}

/// Blocks every edge of cells whose centre lies inside `rect` on `layer`.
pub fn block_region(grid: &mut DenseGrid, layer: u8, rect: &Rect) {
    if layer >= grid.layers() {
        return;
    }
    let Some((x0, x1, y0, y1)) = grid.converter().rect_range(rect) else {
        return;
    };
    for y in y0..=y1 {
        for x in x0..=x1 {
            grid.block_all(GridCoord::new(x, y, layer));
        }
    }
}

/// Marker history around a violation, on the marker's layer.
pub fn add_marker_cost(grid: &mut DenseGrid, tech: &Tech, marker: &Marker) {
    let z = marker.layer;
    if z as usize >= tech.num_layers() || z >= grid.layers() {
        return;
    }
    let halo = tech.layer(z).pitch;
    let Some((x0, x1, y0, y1)) = grid.converter().rect_range(&marker.bbox.bloat(halo)) else {
        return;
    };
    for y in y0..=y1 {
        for x in x0..=x1 {
            let c = GridCoord::new(x, y, z);
            if !marker.on_cut {
                grid.add_cost(c, CostKind::Marker, false);
            }
            if z + 1 < grid.layers() {
                grid.add_cost(c, CostKind::Marker, true);
            }
        }
    }
}

fn apply(grid: &mut DenseGrid, mut slots: Vec<Slot>, op: CostOp) {
    slots.sort_unstable();
    slots.dedup();
    let kind = op.kind();
    for (c, via) in slots {
        if op.is_add() {
            grid.add_cost(c, kind, via);
        } else {
            grid.sub_cost(c, kind, via);
        }
    }
}

fn seg_slots(
    grid: &DenseGrid,
    tech: &Tech,
    seg: &PathSeg,
    ndr: Option<&NonDefaultRule>,
    modify_eol: bool,
    out: &mut Vec<Slot>,
) {
    if seg.layer as usize >= tech.num_layers() {
        return;
    }
    let extra = if seg.tapered {
        0
    } else {
        ndr.map(|r| r.spacing(seg.layer)).unwrap_or(0)
    };
    let bbox = seg.bbox();
    spacing_slots(grid, tech, seg.layer, &bbox, extra, out);

    let layer = tech.layer(seg.layer);
    if !modify_eol || seg.begin == seg.end || seg.is_horizontal() != layer.is_horizontal() {
        return;
    }
    if let Some(rule) = layer.eol {
        if seg.style.width < rule.width {
            for eol_box in eol_boxes(&bbox, seg.is_horizontal(), rule.space, rule.within) {
                overlap_slots(grid, tech, seg.layer, &eol_box, out);
            }
        }
    }
}

/// The two end-of-line test regions in front of a wire's short edges.
pub fn eol_boxes(bbox: &Rect, horizontal: bool, space: Coord, within: Coord) -> [Rect; 2] {
    if horizontal {
        [
            Rect::from_coords(bbox.min.x - space, bbox.min.y - within, bbox.min.x, bbox.max.y + within),
            Rect::from_coords(bbox.max.x, bbox.min.y - within, bbox.max.x + space, bbox.max.y + within),
        ]
    } else {
        [
            Rect::from_coords(bbox.min.x - within, bbox.min.y - space, bbox.max.x + within, bbox.min.y),
            Rect::from_coords(bbox.min.x - within, bbox.max.y, bbox.max.x + within, bbox.max.y + space),
        ]
    }
}

fn via_slots(
    grid: &DenseGrid,
    tech: &Tech,
    via: &Via,
    ndr: Option<&NonDefaultRule>,
    modify_cut: bool,
    out: &mut Vec<Slot>,
) {
    let def = tech.via(via.def);
    let (bz, tz) = (def.bottom_z(), def.top_z());
    if tz as usize >= tech.num_layers() {
        return;
    }
    let extra = |z: u8| {
        if via.tapered {
            0
        } else {
            ndr.map(|r| r.spacing(z)).unwrap_or(0)
        }
    };
    spacing_slots(grid, tech, bz, &via.layer1_box(tech), extra(bz), out);
    spacing_slots(grid, tech, tz, &via.layer2_box(tech), extra(tz), out);

    if let Some(origin) = grid.converter().to_grid(via.origin, bz) {
        if tech.layer(bz).via_forbidden_through && bz > 0 {
            out.push((origin.with_z(bz - 1), true));
        }
        if tech.layer(tz).via_forbidden_through && (tz as usize) + 1 < tech.num_layers() {
            out.push((origin.with_z(tz), true));
        }
    }

    if modify_cut {
        cut_spacing_slots(grid, tech, via, out);
    }
}

/// Spacing footprint of `shape` on layer `z`: planar wire candidates on `z`
/// plus via pad candidates landing on `z` from below or above.
fn spacing_slots(grid: &DenseGrid, tech: &Tech, z: u8, shape: &Rect, extra: Coord, out: &mut Vec<Slot>) {
    if z as usize >= tech.num_layers() || z >= grid.layers() {
        return;
    }
    let layer = tech.layer(z);
    let hw = layer.width / 2;
    let wire = Rect::from_coords(-hw, -hw, hw, hw);
    candidate_slots(grid, layer, shape, &wire, extra, z, false, out);

    if (z as usize) + 1 < tech.num_layers() {
        if let Some(def) = tech.default_via(z) {
            candidate_slots(grid, layer, shape, &def.bottom, extra, z, true, out);
        }
    }
    if z > 0 {
        if let Some(def) = tech.default_via(z - 1) {
            candidate_slots(grid, layer, shape, &def.top, extra, z - 1, true, out);
        }
    }
}

/// Cells where a candidate shape (`cand` around the cell centre)
/// would violate spacing against `shape`. Hits are stored on `store_z`.
#[allow(clippy::too_many_arguments)]
fn candidate_slots(
    grid: &DenseGrid,
    layer: &RoutingLayer,
    shape: &Rect,
    cand: &Rect,
    extra: Coord,
    store_z: u8,
    via: bool,
    out: &mut Vec<Slot>,
) {
    let reach = layer.spacing.max_value().max(extra).max(layer.corner_spacing.unwrap_or(0))
        + cand.max.x.max(cand.max.y).max(-cand.min.x).max(-cand.min.y);
    let Some((x0, x1, y0, y1)) = grid.converter().rect_range(&shape.bloat(reach)) else {
        return;
    };
    let conv = grid.converter();
    for y in y0..=y1 {
        for x in x0..=x1 {
            let p = Point::new(conv.x_at(x), conv.y_at(y));
            let placed = cand.translate(p);
            if spacing_violated(layer, shape, &placed, extra) {
                out.push((GridCoord::new(x, y, store_z), via));
            }
        }
    }
}

/// Two same-layer rectangles of different nets would be too close.
pub fn spacing_violated(layer: &RoutingLayer, a: &Rect, b: &Rect, extra: Coord) -> bool {
    if a.overlaps(b) {
        return true;
    }
    let (d2, dx, dy) = box2box_dist_sq(a, b);
    if dx <= 0 || dy <= 0 {
        let prl = (-dx).max(-dy).max(0);
        let req = layer.spacing.find(a.min_dxdy(), b.min_dxdy(), prl).max(extra);
        d2 < req * req
    } else {
        let req = layer
            .corner_spacing
            .unwrap_or_else(|| layer.spacing.min_value())
            .max(extra);
        d2 < req * req
    }
}

/// Cells whose planar wire or via pads strictly overlap `region` on `z`.
fn overlap_slots(grid: &DenseGrid, tech: &Tech, z: u8, region: &Rect, out: &mut Vec<Slot>) {
    let layer = tech.layer(z);
    let hw = layer.width / 2;
    let Some((x0, x1, y0, y1)) = grid.converter().rect_range(&region.bloat(hw)) else {
        return;
    };
    let conv = grid.converter();
    let up_pad = if (z as usize) + 1 < tech.num_layers() {
        tech.default_via(z).map(|d| d.bottom)
    } else {
        None
    };
    let down_pad = if z > 0 { tech.default_via(z - 1).map(|d| d.top) } else { None };
    for y in y0..=y1 {
        for x in x0..=x1 {
            let p = Point::new(conv.x_at(x), conv.y_at(y));
            let c = GridCoord::new(x, y, z);
            if Rect::from_coords(p.x - hw, p.y - hw, p.x + hw, p.y + hw).overlaps(region) {
                out.push((c, false));
            }
            if up_pad.is_some_and(|pad| pad.translate(p).overlaps(region)) {
                out.push((c, true));
            }
            if down_pad.is_some_and(|pad| pad.translate(p).overlaps(region)) {
                out.push((c.with_z(z - 1), true));
            }
        }
    }
}

fn cut_spacing_slots(grid: &DenseGrid, tech: &Tech, via: &Via, out: &mut Vec<Slot>) {
    let cz = tech.via(via.def).cut_z;
    let cut = via.cut_box(tech);
    let Some(cut_layer) = tech.cut(cz) else {
        return;
    };

    if !cut_layer.spacing.is_empty() {
        if let Some(def) = tech.default_via(cz) {
            let reach = cut_layer.max_cut_spacing() + def.cut.max_dxdy();
            scan_cuts(grid, &cut, reach, &def.cut, cz, |placed, center| {
                if center == via.origin {
                    return false;
                }
                let (edge_d2, dx, dy) = box2box_dist_sq(&cut, placed);
                let c2c = center.dist_sq(&cut.center());
                let has_prl = dx < 0 || dy < 0;
                cut_layer
                    .spacing
                    .iter()
                    .any(|r| r.is_violated(edge_d2, c2c, has_prl))
            }, out);
        }
    }

    // cut layer above
    if let (Some(s), Some(def)) = (cut_layer.inter_layer_spacing, tech.default_via(cz + 1)) {
        if tech.cut(cz + 1).is_some() {
            scan_cuts(grid, &cut, s + def.cut.max_dxdy(), &def.cut, cz + 1, |placed, center| {
                center != via.origin && box2box_dist_sq(&cut, placed).0 < s * s
            }, out);
        }
    }
    // cut layer below
    if cz > 0 {
        let below = tech.cut(cz - 1).and_then(|c| c.inter_layer_spacing);
        if let (Some(s), Some(def)) = (below, tech.default_via(cz - 1)) {
            scan_cuts(grid, &cut, s + def.cut.max_dxdy(), &def.cut, cz - 1, |placed, center| {
                center != via.origin && box2box_dist_sq(&cut, placed).0 < s * s
            }, out);
        }
    }
}

fn scan_cuts<F>(grid: &DenseGrid, cut: &Rect, reach: Coord, cand: &Rect, store_z: u8, hit: F, out: &mut Vec<Slot>)
where
    F: Fn(&Rect, Point) -> bool,
{
    if store_z >= grid.layers() {
        return;
    }
    let conv = grid.converter();
    let Some((x0, x1, y0, y1)) = conv.rect_range(&cut.bloat(reach)) else {
        return;
    };
    for y in y0..=y1 {
        for x in x0..=x1 {
            let p = Point::new(conv.x_at(x), conv.y_at(y));
            if hit(&cand.translate(p), p) {
                out.push((GridCoord::new(x, y, store_z), true));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::conversion::GridConverter;
    use eda_common::db::figure::{Patch, SegStyle};
    use eda_common::db::tech::{CutSpacingRule, EolRule};
    use rstest::rstest;

    fn tech() -> Tech {
        let mut t = Tech::standard(3, 200, 100, 100);
        t.routing_layers[0].eol = Some(EolRule {
            space: 150,
            width: 120,
            within: 40,
        });
        t.routing_layers[0].corner_spacing = Some(120);
        t.cut_layers[0].inter_layer_spacing = Some(150);
        t.cut_layers[0].spacing.push(CutSpacingRule::CenterToCenter { spacing: 300 });
        t
    }

    fn grid() -> DenseGrid {
        let xs: Vec<Coord> = (0..20).map(|i| i * 100).collect();
        DenseGrid::new(GridConverter::new(xs.clone(), xs), 3)
    }

    fn figures(t: &Tech) -> Vec<ConnFig> {
        let via = t.default_via_id(0).expect("via");
        vec![
            ConnFig::Seg(PathSeg::new(0, Point::new(200, 500), Point::new(1400, 500), SegStyle::extended(100))),
            ConnFig::Seg(PathSeg::new(1, Point::new(700, 100), Point::new(700, 1500), SegStyle::extended(100))),
            ConnFig::Via(Via::new(via, Point::new(700, 500))),
            ConnFig::Patch(Patch {
                layer: 2,
                origin: Point::new(900, 900),
                offset: Rect::from_coords(-50, -50, 250, 50),
            }),
        ]
    }

    #[rstest]
    #[case(0, CostOp::AddRouteShape, CostOp::SubRouteShape)]
    #[case(1, CostOp::AddRouteShape, CostOp::SubRouteShape)]
    #[case(2, CostOp::AddFixedShape, CostOp::SubFixedShape)]
    #[case(3, CostOp::AddRouteShape, CostOp::SubRouteShape)]
    fn add_then_sub_restores_grid(#[case] which: usize, #[case] add: CostOp, #[case] sub: CostOp) {
        let t = tech();
        let fig = figures(&t)[which];
        let mut g = grid();
        // unrelated background cost must survive untouched
        g.add_cost(GridCoord::new(3, 5, 0), CostKind::RouteShape, false);
        let before = g.clone();
        mod_path_cost(&mut g, &t, &fig, None, add, true, true);
        assert_ne!(g, before);
        mod_path_cost(&mut g, &t, &fig, None, sub, true, true);
        assert_eq!(g, before);
    }

    fn wide_rule() -> NonDefaultRule {
        NonDefaultRule {
            name: "wide".to_string(),
            widths: vec![250; 3],
            spacings: vec![150; 3],
            vias: vec![None; 2],
        }
    }

    #[rstest]
    #[case(false)]
    #[case(true)]
    fn ndr_add_then_sub_restores_grid(#[case] tapered: bool) {
        let t = tech();
        let rule = wide_rule();
        let mut seg = PathSeg::new(0, Point::new(200, 500), Point::new(1400, 500), SegStyle::extended(250));
        seg.tapered = tapered;
        let mut via = Via::new(t.default_via_id(0).expect("via"), Point::new(700, 500));
        via.tapered = tapered;

        for fig in [ConnFig::Seg(seg), ConnFig::Via(via)] {
            let mut g = grid();
            let before = g.clone();
            mod_path_cost(&mut g, &t, &fig, Some(&rule), CostOp::AddRouteShape, true, true);
            let mut plain = grid();
            mod_path_cost(&mut plain, &t, &fig, None, CostOp::AddRouteShape, true, true);
            // tapered pieces ignore the rule's extra spacing
            assert_eq!(g == plain, tapered, "{fig:?}");
            mod_path_cost(&mut g, &t, &fig, Some(&rule), CostOp::SubRouteShape, true, true);
            assert_eq!(g, before, "{fig:?}");
        }
    }

    #[test]
    fn corner_spacing_applies_only_diagonally() {
        let t = tech();
        let planar = |g: &DenseGrid, x: u32, y: u32| g.cost(GridCoord::new(x, y, 0), CostKind::FixedShape, false);
        let diag_shape = Rect::from_coords(450, 450, 570, 570);

        // the cell at (700, 700) sits 80 x 80 off the corner: ~113, inside 120 but past the table's 100
        let mut g = grid();
        mod_fixed_shape_cost(&mut g, &t, 0, &diag_shape, CostOp::AddFixedShape);
        assert_eq!(planar(&g, 7, 7), 1);

        let mut no_corner = t.clone();
        no_corner.routing_layers[0].corner_spacing = None;
        let mut g = grid();
        mod_fixed_shape_cost(&mut g, &no_corner, 0, &diag_shape, CostOp::AddFixedShape);
        assert_eq!(planar(&g, 7, 7), 0);

        // an edge-facing gap of 110 is inside the corner value but clears the table
        let mut g = grid();
        mod_fixed_shape_cost(&mut g, &t, 0, &Rect::from_coords(450, 450, 540, 550), CostOp::AddFixedShape);
        assert_eq!(planar(&g, 7, 5), 0);
        assert_eq!(planar(&g, 6, 5), 1);
    }

    #[test]
    fn wire_footprint_respects_spacing() {
        let t = tech();
        let mut g = grid();
        let seg = ConnFig::Seg(PathSeg::new(0, Point::new(200, 500), Point::new(1400, 500), SegStyle::extended(100)));
        mod_path_cost(&mut g, &t, &seg, None, CostOp::AddRouteShape, false, false);
        let at = |x: u32, y: u32| g.cost(GridCoord::new(x, y, 0), CostKind::RouteShape, false);
        // on the wire and one track over (edges touch) cost, two over is clear
        assert_eq!(at(8, 5), 1);
        assert_eq!(at(8, 6), 1);
        assert_eq!(at(8, 7), 0);
    }

    #[test]
    fn eol_region_is_marked_beyond_line_end() {
        let t = tech();
        let mut with_eol = grid();
        let mut without = grid();
        let seg = ConnFig::Seg(PathSeg::new(0, Point::new(200, 500), Point::new(1000, 500), SegStyle::extended(100)));
        mod_path_cost(&mut with_eol, &t, &seg, None, CostOp::AddRouteShape, true, false);
        mod_path_cost(&mut without, &t, &seg, None, CostOp::AddRouteShape, false, false);
        // end edge at x = 1050; a wire centred at x = 1200 starts at 1150 < 1050 + 150
        let c = GridCoord::new(12, 5, 0);
        assert_eq!(without.cost(c, CostKind::RouteShape, false), 0);
        assert_eq!(with_eol.cost(c, CostKind::RouteShape, false), 1);
    }

    #[test]
    fn cut_spacing_skips_the_via_itself() {
        let t = tech();
        let mut g = grid();
        let via = ConnFig::Via(Via::new(t.default_via_id(0).expect("via"), Point::new(700, 500)));
        mod_path_cost(&mut g, &t, &via, None, CostOp::AddRouteShape, false, true);
        // centre-to-centre 200 < 300 on the same cut layer
        assert_eq!(g.cost(GridCoord::new(9, 5, 0), CostKind::RouteShape, true), 1);
        // inter-layer: a V2 cut one track away is within 150 of the V1 cut edge
        assert_eq!(g.cost(GridCoord::new(8, 5, 1), CostKind::RouteShape, true), 1);
        // a stacked V2 cut is not an inter-layer violation, but pad spacing still costs it
        assert!(g.cost(GridCoord::new(7, 5, 1), CostKind::RouteShape, true) >= 1);
    }

    #[test]
    fn hard_region_blocks_all_edges() {
        let mut g = grid();
        block_region(&mut g, 0, &Rect::from_coords(500, 500, 500, 500));
        let c = GridCoord::new(5, 5, 0);
        for dir in crate::grid::Dir::ALL {
            assert!(g.is_blocked(c, dir));
        }
    }
}
