use super::Worker;
use super::cost::{CostOp, mod_fixed_shape_cost, mod_path_cost};
use crate::algo::astar::{AStar, GuideMask, NoGuide, SearchCosts, SearchRequest};
use crate::drc::{find, union, union_area};
use crate::error::{Result, RouteError};
use crate::grid::{CostKind, RoutingGrid};
use eda_common::db::core::AccessPoint;
use eda_common::db::figure::{ConnFig, EndStyle, Patch, PathSeg, SegStyle, Via};
use eda_common::db::indices::ViaDefId;
use eda_common::geom::coord::GridCoord;
use eda_common::geom::point::{Coord, Point};
use eda_common::geom::rect::{Rect, pt2box_dist_sq};
use std::cmp::Reverse;
use std::collections::BTreeSet;

impl Worker<'_> {
    /// Rips up `n`, routes it again from scratch and leaves the new
    /// geometry's cost on the grid.
    pub(super) fn route_net(&mut self, n: usize, astar: &mut AStar) -> Result<()> {
        let design = self.design;
        let tech = &design.tech;
        let ndr = self.ndr(n);
        let old = std::mem::take(&mut self.nets[n].figures);
        for fig in &old {
            mod_path_cost(&mut self.grid, tech, fig, ndr, CostOp::SubRouteShape, true, true);
        }
        self.mod_own_costs(n, false);

        let mut figures = self.maze_route(n, astar)?;
        let patches = self.min_area_patches(n, &figures);
        figures.extend(patches);

        for fig in &figures {
            mod_path_cost(&mut self.grid, tech, fig, ndr, CostOp::AddRouteShape, true, true);
        }
        self.mod_own_costs(n, true);
        self.nets[n].figures = figures;
        self.nets[n].num_reroutes += 1;
        Ok(())
    }

    /// Costs a net would otherwise see as obstacles of its own: its pin
    /// shapes, access reservations and halo geometry.
    fn mod_own_costs(&mut self, n: usize, add: bool) {
        let design = self.design;
        let tech = &design.tech;
        let ext_box = self.item.ext_box;
        let (fixed_op, route_op) = if add {
            (CostOp::AddFixedShape, CostOp::AddRouteShape)
        } else {
            (CostOp::SubFixedShape, CostOp::SubRouteShape)
        };
        for p in self.nets[n].pins.iter().filter_map(|p| p.pin) {
            for (layer, rect) in &design.pin(p).shapes {
                if rect.intersects(&ext_box) {
                    mod_fixed_shape_cost(&mut self.grid, tech, *layer, rect, fixed_op);
                }
            }
        }
        self.reserve_access(n, route_op);
        let ndr = self.ndr(n);
        for fig in &self.nets[n].ext_figures {
            mod_path_cost(&mut self.grid, tech, fig, ndr, route_op, true, true);
        }
    }

    /// Grows a tree from the pin farthest from the terminal centroid, each
    /// time searching to the unconnected pin nearest the tree's bounding box.
    fn maze_route(&self, n: usize, astar: &mut AStar) -> Result<Vec<ConnFig>> {
        let design = self.design;
        let tech = &design.tech;
        let net = &self.nets[n];
        let route_box = self.item.route_box;
        let conv = self.grid.converter();

        let terminals: Vec<(usize, Vec<GridCoord>)> = net
            .pins
            .iter()
            .enumerate()
            .filter_map(|(i, p)| {
                let cells: Vec<GridCoord> = p
                    .aps
                    .iter()
                    .filter(|ap| route_box.contains(ap.point))
                    .filter_map(|ap| conv.to_grid(ap.point, ap.layer))
                    .collect();
                (!cells.is_empty()).then_some((i, cells))
            })
            .collect();
        if terminals.len() < 2 {
            return Ok(Vec::new());
        }

        let first_point = |cells: &[GridCoord]| self.grid.point(cells[0]);
        let count = terminals.len() as i64;
        let (sx, sy) = terminals.iter().fold((0i64, 0i64), |(x, y), (_, cells)| {
            let p = first_point(cells);
            (x + p.x, y + p.y)
        });
        let centroid = Point::new(sx / count, sy / count);
        let start = terminals
            .iter()
            .enumerate()
            .min_by_key(|(k, (_, cells))| (Reverse(first_point(cells).dist_sq(&centroid)), *k))
            .map(|(k, _)| k)
            .unwrap_or(0);

        let args = self.args();
        let costs = SearchCosts {
            drc: args.drc_cost,
            marker: args.marker_cost,
            fixed: args.fixed_cost,
            via: self.cfg.via_cost,
            wrong_way: self.cfg.wrong_way_cost,
            guide: if args.follow_guide { self.cfg.guide_cost } else { 0 },
        };
        let mask = args.follow_guide.then(|| {
            let all: Vec<GridCoord> = terminals.iter().flat_map(|(_, c)| c.iter().copied()).collect();
            GuideMask::build(&self.grid, &design.net(net.id).guides, &all)
        });

        let mut component: Vec<GridCoord> = terminals[start].1.clone();
        let mut in_component: BTreeSet<GridCoord> = component.iter().copied().collect();
        let mut comp_box = bbox_of(component.iter().map(|c| self.grid.point(*c)));
        let mut connected = vec![false; terminals.len()];
        connected[start] = true;
        let mut paths = Vec::new();

        while let Some(next) = (0..terminals.len())
            .filter(|&k| !connected[k])
            .min_by_key(|&k| (pt2box_dist_sq(first_point(&terminals[k].1), &comp_box), k))
        {
            let (pin, dests) = &terminals[next];
            let req = SearchRequest {
                sources: &component,
                dests,
                bounds: self.bounds,
                margin: self.cfg.window_margin,
                max_expansions: self.cfg.max_expansions,
                costs,
            };
            let found = match &mask {
                Some(mask) => astar.find_path(&self.grid, tech, &req, mask),
                None => astar.find_path(&self.grid, tech, &req, &NoGuide),
            };
            let Some(path) = found else {
                return Err(RouteError::SearchFailed {
                    net: design.net(net.id).name.clone(),
                    pin: net.pins[*pin].name.clone(),
                    sources: component.iter().map(|c| (self.grid.point(*c), c.z)).collect(),
                    route_box,
                });
            };
            for c in &path {
                if in_component.insert(*c) {
                    component.push(*c);
                    comp_box = comp_box.merge(&Rect::from_point(self.grid.point(*c)));
                }
            }
            for (k, (_, cells)) in terminals.iter().enumerate() {
                if !connected[k] && cells.iter().any(|c| in_component.contains(c)) {
                    connected[k] = true;
                }
            }
            connected[next] = true;
            paths.push(path);
        }

        self.paths_to_figures(n, &paths)
    }

    fn paths_to_figures(&self, n: usize, paths: &[Vec<GridCoord>]) -> Result<Vec<ConnFig>> {
        let mut runs: BTreeSet<(u8, Point, Point)> = BTreeSet::new();
        let mut vias: BTreeSet<(u8, Point)> = BTreeSet::new();
        for path in paths {
            let mut i = 0;
            while i + 1 < path.len() {
                let a = path[i];
                let b = path[i + 1];
                if a.z != b.z {
                    vias.insert((a.z.min(b.z), self.grid.point(a)));
                    i += 1;
                    continue;
                }
                let horizontal = a.y == b.y;
                let mut j = i + 1;
                while j + 1 < path.len() {
                    let c = path[j + 1];
                    let straight = if horizontal { c.y == a.y } else { c.x == a.x };
                    if c.z != a.z || !straight {
                        break;
                    }
                    j += 1;
                }
                let (p, q) = (self.grid.point(a), self.grid.point(path[j]));
                runs.insert((a.z, p.min(q), p.max(q)));
                i = j;
            }
        }

        let mut figures = Vec::new();
        for (z, a, b) in runs {
            figures.extend(self.make_segs(n, z, a, b).into_iter().map(ConnFig::Seg));
        }
        for (cut_z, origin) in vias {
            figures.push(ConnFig::Via(self.make_via(n, cut_z, origin)?));
        }
        Ok(figures)
    }

    fn touches_own_pin(&self, n: usize, p: Point, layer: u8) -> bool {
        self.nets[n]
            .pins
            .iter()
            .filter_map(|pin| pin.pin)
            .any(|pin| self.design.pin(pin).touches(p, layer))
    }

    fn is_boundary_ap(&self, n: usize, p: Point, layer: u8) -> bool {
        let ap = AccessPoint { point: p, layer };
        self.nets[n]
            .pins
            .iter()
            .filter(|pin| pin.is_boundary())
            .any(|pin| pin.aps.contains(&ap))
    }

    /// The wire from `a` to `b`, split into tapered pieces where it runs
    /// near a pin when the net has a wider non-default width.
    fn make_segs(&self, n: usize, z: u8, a: Point, b: Point) -> Vec<PathSeg> {
        let tech = &self.design.tech;
        let layer = tech.layer(z);
        let width = self.ndr(n).and_then(|r| r.width(z)).unwrap_or(layer.width);
        let end_style = |p: Point, w: Coord| {
            if self.touches_own_pin(n, p, z) || self.is_boundary_ap(n, p, z) {
                EndStyle::Truncate
            } else {
                EndStyle::Extend(w / 2)
            }
        };
        let whole = PathSeg::new(z, a, b, SegStyle::extended(width));
        if width == layer.width {
            let style = SegStyle {
                begin: end_style(whole.begin, width),
                end: end_style(whole.end, width),
                width,
            };
            return vec![PathSeg::new(z, whole.begin, whole.end, style)];
        }

        let tapers: Vec<Rect> = self.nets[n]
            .pins
            .iter()
            .filter(|p| !p.is_boundary())
            .flat_map(|p| p.aps.iter())
            .filter(|ap| ap.layer == z)
            .map(|ap| Rect::from_point(ap.point).bloat(2 * layer.pitch))
            .collect();
        let (lo, hi) = (whole.low(), whole.high());
        let mut cuts = vec![lo, hi];
        for t in &tapers {
            let (tlo, thi) = if whole.is_horizontal() {
                (t.min.x, t.max.x)
            } else {
                (t.min.y, t.max.y)
            };
            let on_track = if whole.is_horizontal() {
                t.min.y <= whole.track() && whole.track() <= t.max.y
            } else {
                t.min.x <= whole.track() && whole.track() <= t.max.x
            };
            if on_track {
                cuts.extend([tlo, thi].into_iter().filter(|c| *c > lo && *c < hi));
            }
        }
        cuts.sort_unstable();
        cuts.dedup();

        let mut segs = Vec::new();
        for w in cuts.windows(2) {
            let (p, q) = (whole.point_at(w[0]), whole.point_at(w[1]));
            let mid = whole.point_at((w[0] + w[1]) / 2);
            let tapered = tapers.iter().any(|t| t.contains(mid));
            let piece_width = if tapered { layer.width } else { width };
            let begin = if w[0] == lo {
                end_style(p, piece_width)
            } else {
                EndStyle::Truncate
            };
            let end = if w[1] == hi {
                end_style(q, piece_width)
            } else {
                EndStyle::Truncate
            };
            let mut seg = PathSeg::new(
                z,
                p,
                q,
                SegStyle {
                    begin,
                    end,
                    width: piece_width,
                },
            );
            seg.tapered = tapered;
            segs.push(seg);
        }
        segs
    }

    /// The net's via for `cut_z`, upgraded to a multi-cut definition when
    /// it lands on a pin shape wide enough to require one.
    fn make_via(&self, n: usize, cut_z: u8, origin: Point) -> Result<Via> {
        let design = self.design;
        let tech = &design.tech;
        let default = self
            .ndr(n)
            .and_then(|r| r.via(cut_z))
            .or_else(|| tech.default_via_id(cut_z))
            .ok_or_else(|| RouteError::Geometry(format!("no via definition for cut layer {cut_z}")))?;

        let mut def: ViaDefId = default;
        for z in [cut_z, cut_z + 1] {
            let Some(rule) = tech.layer(z).min_cut else {
                continue;
            };
            let wide = self.nets[n]
                .pins
                .iter()
                .filter_map(|p| p.pin)
                .flat_map(|p| design.pin(p).shapes.iter())
                .any(|(l, r)| *l == z && r.contains(origin) && r.min_dxdy() >= rule.width);
            if wide {
                def = tech.multi_cut_via_id(cut_z, rule.num_cuts).unwrap_or(def);
            }
        }

        let mut via = Via::new(def, origin);
        via.bottom_connected = self.touches_own_pin(n, origin, cut_z);
        via.top_connected = self.touches_own_pin(n, origin, cut_z + 1);
        Ok(via)
    }

    /// Patches extending new metal that, together with the net's pins and
    /// halo geometry it touches, falls short of the layer's minimum area.
    fn min_area_patches(&self, n: usize, figures: &[ConnFig]) -> Vec<ConnFig> {
        let design = self.design;
        let tech = &design.tech;
        let mfg = tech.manufacturing_grid.max(1);
        let net = &self.nets[n];
        let mut patches = Vec::new();

        for z in 0..design.num_layers() as u8 {
            let layer = tech.layer(z);
            // (shape, index of the new figure it came from)
            let mut shapes: Vec<(Rect, Option<usize>)> = Vec::new();
            for (i, fig) in figures.iter().enumerate() {
                shapes.extend(fig.shapes(tech).into_iter().filter(|(l, _)| *l == z).map(|(_, r)| (r, Some(i))));
            }
            if shapes.is_empty() {
                continue;
            }
            for p in net.pins.iter().filter_map(|p| p.pin) {
                shapes.extend(design.pin(p).shapes.iter().filter(|(l, _)| *l == z).map(|(_, r)| (*r, None)));
            }
            for fig in &net.ext_figures {
                shapes.extend(fig.shapes(tech).into_iter().filter(|(l, _)| *l == z).map(|(_, r)| (r, None)));
            }

            let mut parent: Vec<usize> = (0..shapes.len()).collect();
            for i in 0..shapes.len() {
                for j in i + 1..shapes.len() {
                    if shapes[i].0.intersects(&shapes[j].0) {
                        union(&mut parent, i, j);
                    }
                }
            }
            let mut roots: Vec<usize> = (0..shapes.len()).map(|i| find(&mut parent, i)).collect();
            roots.sort_unstable();
            roots.dedup();

            for root in roots {
                let members: Vec<usize> = (0..shapes.len()).filter(|&i| find(&mut parent, i) == root).collect();
                let ends: Vec<Point> = members
                    .iter()
                    .filter_map(|&i| shapes[i].1)
                    .flat_map(|f| fig_points(&figures[f], z, tech))
                    .collect();
                let (Some(&lo), Some(&hi)) = (ends.iter().min(), ends.iter().max()) else {
                    continue;
                };
                let rects: Vec<Rect> = members.iter().map(|&i| shapes[i].0).collect();
                let area = union_area(&rects);
                if area >= layer.min_area {
                    continue;
                }
                let width = layer.width.max(1);
                let hw = width / 2;
                let gap = layer.min_area - area;
                let steps = (gap + width - 1) / width;
                let len = (steps + mfg - 1) / mfg * mfg;
                let candidates = if layer.is_horizontal() {
                    [
                        Patch {
                            layer: z,
                            origin: hi,
                            offset: Rect::from_coords(-hw, -hw, hw + len, hw),
                        },
                        Patch {
                            layer: z,
                            origin: lo,
                            offset: Rect::from_coords(-hw - len, -hw, hw, hw),
                        },
                    ]
                } else {
                    [
                        Patch {
                            layer: z,
                            origin: hi,
                            offset: Rect::from_coords(-hw, -hw, hw, hw + len),
                        },
                        Patch {
                            layer: z,
                            origin: lo,
                            offset: Rect::from_coords(-hw, -hw - len, hw, hw),
                        },
                    ]
                };
                let best = candidates
                    .into_iter()
                    .filter(|p| self.item.route_box.contains_rect(&p.bbox()))
                    .enumerate()
                    .min_by_key(|(k, p)| (self.patch_cost(p), *k))
                    .map(|(_, p)| p);
                match best {
                    Some(p) => patches.push(ConnFig::Patch(p)),
                    None => log::debug!("no room for a min-area patch of net {} on layer {z}", net.id.0),
                }
            }
        }
        patches
    }

    fn patch_cost(&self, patch: &Patch) -> u64 {
        let Some((x0, x1, y0, y1)) = self.grid.converter().rect_range(&patch.bbox()) else {
            return 0;
        };
        let mut sum = 0u64;
        for y in y0..=y1 {
            for x in x0..=x1 {
                let c = GridCoord::new(x, y, patch.layer);
                sum += [CostKind::RouteShape, CostKind::FixedShape, CostKind::Marker]
                    .into_iter()
                    .map(|k| self.grid.cost(c, k, false) as u64)
                    .sum::<u64>();
            }
        }
        sum
    }
}

fn bbox_of(points: impl Iterator<Item = Point>) -> Rect {
    points
        .map(Rect::from_point)
        .reduce(|a, b| a.merge(&b))
        .unwrap_or_default()
}

/// Centerline end points of a figure on layer `z`.
fn fig_points(fig: &ConnFig, z: u8, tech: &eda_common::db::tech::Tech) -> Vec<Point> {
    match fig {
        ConnFig::Seg(s) if s.layer == z => vec![s.begin, s.end],
        ConnFig::Via(v) if v.bottom_z(tech) == z || v.bottom_z(tech) + 1 == z => vec![v.origin],
        ConnFig::Patch(p) if p.layer == z => vec![p.origin],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::super::index::DesignIndex;
    use super::super::{WorkItem, Worker};
    use crate::algo::astar::AStar;
    use crate::detailed_router::strategy::default_strategies;
    use crate::error::RouteError;
    use crate::grid::RoutingGrid;
    use eda_common::db::core::{AccessPoint, Design, PinKind};
    use eda_common::db::figure::ConnFig;
    use eda_common::db::tech::Tech;
    use eda_common::geom::point::Point;
    use eda_common::geom::rect::Rect;
    use eda_common::util::config::DetailedRoutingConfig;

    fn design(pins: &[(&str, Point, u8)]) -> Design {
        let mut d = Design::new("r", Tech::standard(3, 200, 100, 100), Rect::from_coords(0, 0, 4000, 4000), 2000);
        d.add_uniform_tracks(100);
        let n = d.add_net("n0");
        for &(name, p, z) in pins {
            d.add_pin(
                n,
                name,
                PinKind::InstTerm,
                vec![AccessPoint { point: p, layer: z }],
                vec![(z, Rect::from_point(p).bloat(50))],
            );
        }
        d
    }

    fn item(d: &Design) -> WorkItem {
        WorkItem {
            id: 0,
            iter: 0,
            route_box: d.die,
            ext_box: d.die.bloat(2000),
            drc_box: d.die.bloat(500),
            args: default_strategies(&DetailedRoutingConfig::default())[0],
        }
    }

    #[test]
    fn blocked_pin_names_pin_and_sources() {
        let d = design(&[("a", Point::new(300, 500), 0), ("b", Point::new(3700, 500), 0)]);
        let cfg = DetailedRoutingConfig::default();
        let it = item(&d);
        let index = DesignIndex::build(&d);
        let mut w = Worker::new(&d, &index, &cfg, &it).expect("grid");
        let b = w.grid.converter().to_grid(Point::new(3700, 500), 0).expect("on grid");
        w.grid.block_all(b);
        match w.route_net(0, &mut AStar::new()) {
            Err(RouteError::SearchFailed { net, pin, sources, .. }) => {
                assert_eq!(net, "n0");
                assert_eq!(pin, "b");
                assert_eq!(sources, vec![(Point::new(300, 500), 0)]);
            }
            other => panic!("expected a search failure, got {other:?}"),
        }
    }

    #[test]
    fn l_shaped_route_uses_one_via() {
        let d = design(&[("a", Point::new(300, 500), 0), ("b", Point::new(3700, 3500), 0)]);
        let cfg = DetailedRoutingConfig::default();
        let it = item(&d);
        let index = DesignIndex::build(&d);
        let mut w = Worker::new(&d, &index, &cfg, &it).expect("grid");
        w.route_net(0, &mut AStar::new()).expect("routed");
        let figs = &w.nets[0].figures;
        let vias = figs.iter().filter(|f| matches!(f, ConnFig::Via(_))).count();
        assert!(vias >= 2, "a vertical leg on a horizontal layer needs a layer change: {figs:?}");
        assert_eq!(w.nets[0].num_reroutes, 1);
    }

    #[test]
    fn single_pin_net_gets_no_geometry() {
        let d = design(&[("a", Point::new(300, 500), 0)]);
        let cfg = DetailedRoutingConfig::default();
        let it = item(&d);
        let index = DesignIndex::build(&d);
        let mut w = Worker::new(&d, &index, &cfg, &it).expect("grid");
        w.route_net(0, &mut AStar::new()).expect("nothing to do");
        assert!(w.nets[0].figures.is_empty());
    }
}
