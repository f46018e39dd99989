//! One tile of search and repair: a private grid over the ext box, the nets
//! whose geometry the route box owns, and the route queue that reroutes them
//! until the tile is clean or every net has spent its reroute budget.

pub mod boundary;
pub mod cost;
pub mod index;
pub mod queue;
pub mod route;

use crate::algo::astar::{AStar, IndexBox};
use crate::detailed_router::strategy::{RipupMode, SearchRepairArgs};
use crate::drc::{DrcChecker, DrcShape, GeometricDrc};
use crate::error::Result;
use crate::grid::DenseGrid;
use crate::utils::conversion::GridConverter;
use boundary::{boundary_points, guide_crossings, owns_point, split_figures};
use cost::{CostOp, add_marker_cost, block_region, mod_fixed_shape_cost, mod_path_cost};
use eda_common::db::core::{AccessPoint, Design, PinKind, TrackAxis};
use eda_common::db::figure::{ConnFig, Via};
use eda_common::db::indices::{NdrId, NetId, PinId};
use eda_common::db::marker::{Marker, Owner, RuleKind};
use eda_common::db::tech::NonDefaultRule;
use eda_common::geom::rect::Rect;
use eda_common::util::config::DetailedRoutingConfig;
use index::DesignIndex;
use queue::RouteQueue;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Everything a worker needs besides the design itself.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: usize,
    pub iter: usize,
    pub route_box: Rect,
    pub ext_box: Rect,
    pub drc_box: Rect,
    pub args: SearchRepairArgs,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkResult {
    pub id: usize,
    pub route_box: Rect,
    /// Final owned geometry of every net the worker rerouted.
    pub nets: Vec<(NetId, Vec<ConnFig>)>,
    /// Violations intersecting the route box after routing.
    pub markers: Vec<Marker>,
    pub initial_markers: usize,
    pub committed: bool,
    pub congested: bool,
}

impl WorkResult {
    fn empty(item: &WorkItem) -> Self {
        Self {
            id: item.id,
            route_box: item.route_box,
            nets: Vec::new(),
            markers: Vec::new(),
            initial_markers: 0,
            committed: false,
            congested: false,
        }
    }
}

/// A terminal inside the worker: a design pin, or a point where the net's
/// geometry outside the route box meets it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkerPin {
    pub name: String,
    pub pin: Option<PinId>,
    pub aps: Vec<AccessPoint>,
}

impl WorkerPin {
    pub fn is_boundary(&self) -> bool {
        self.pin.is_none()
    }
}

#[derive(Clone, Debug)]
pub struct WorkerNet {
    pub id: NetId,
    pub pins: Vec<WorkerPin>,
    /// Geometry owned by the route box; replaced on every reroute.
    pub figures: Vec<ConnFig>,
    /// The net's geometry in the halo, read-only.
    pub ext_figures: Vec<ConnFig>,
    pub num_reroutes: u32,
    pub n_ripup_avoids: u32,
    pub ndr: Option<NdrId>,
}

pub struct Worker<'a> {
    design: &'a Design,
    cfg: &'a DetailedRoutingConfig,
    item: &'a WorkItem,
    grid: DenseGrid,
    bounds: IndexBox,
    nets: Vec<WorkerNet>,
    net_index: HashMap<NetId, usize>,
    /// Halo geometry of nets the worker does not route.
    other_figs: Vec<(NetId, ConnFig)>,
    pins: Vec<PinId>,
    obstructions: Vec<u32>,
    markers: Vec<Marker>,
    queue: RouteQueue,
}

/// Runs one tile to completion.
pub fn run_worker(
    design: &Design,
    index: &DesignIndex,
    cfg: &DetailedRoutingConfig,
    item: &WorkItem,
    astar: &mut AStar,
) -> Result<WorkResult> {
    match Worker::new(design, index, cfg, item) {
        Some(worker) => worker.search_repair(astar),
        None => Ok(WorkResult::empty(item)),
    }
}

impl<'a> Worker<'a> {
    /// `None` when the route box holds no grid point.
    pub fn new(
        design: &'a Design,
        index: &DesignIndex,
        cfg: &'a DetailedRoutingConfig,
        item: &'a WorkItem,
    ) -> Option<Self> {
        let tech = &design.tech;
        let (route_box, ext_box) = (item.route_box, item.ext_box);

        let pins: Vec<PinId> = index.pins_in(&ext_box).into_iter().collect();
        let mut owned_pins: BTreeMap<NetId, Vec<PinId>> = BTreeMap::new();
        for &p in &pins {
            let pin = design.pin(p);
            if pin.kind == PinKind::Floating {
                continue;
            }
            if pin
                .access_points
                .first()
                .is_some_and(|ap| owns_point(&route_box, &design.die, ap.point))
            {
                owned_pins.entry(pin.net).or_default().push(p);
            }
        }
        let crossings: BTreeMap<NetId, Vec<AccessPoint>> = if item.iter == 0 {
            index
                .guide_nets(&route_box)
                .into_iter()
                .map(|n| (n, guide_crossings(design, n, &route_box)))
                .filter(|(_, c)| !c.is_empty())
                .collect()
        } else {
            BTreeMap::new()
        };

        let mut net_ids: BTreeSet<NetId> = index.fig_nets(&ext_box);
        net_ids.extend(owned_pins.keys().copied());
        net_ids.extend(crossings.keys().copied());

        let mut nets = Vec::new();
        let mut other_figs = Vec::new();
        for id in net_ids {
            let data = design.net(id);
            let in_ext: Vec<ConnFig> = data
                .figures
                .iter()
                .filter(|f| f.bbox(tech).intersects(&ext_box))
                .copied()
                .collect();
            let (owned, outside) = split_figures(&in_ext, &route_box, &design.die);
            let net_pins = owned_pins.remove(&id).unwrap_or_default();
            let net_crossings = crossings.get(&id);
            if owned.is_empty() && net_pins.is_empty() && net_crossings.is_none() {
                other_figs.extend(outside.into_iter().map(|f| (id, f)));
                continue;
            }

            let mut groups = boundary_points(tech, &outside, &route_box);
            for ap in net_crossings.into_iter().flatten() {
                if !groups.iter().any(|g| g.contains(ap)) {
                    groups.push(vec![*ap]);
                }
            }
            let mut worker_pins: Vec<WorkerPin> = net_pins
                .iter()
                .map(|&p| WorkerPin {
                    name: design.pin(p).name.clone(),
                    pin: Some(p),
                    aps: design.pin(p).access_points.clone(),
                })
                .collect();
            worker_pins.extend(groups.into_iter().map(|aps| WorkerPin {
                name: format!("{}@z{}", aps[0].point, aps[0].layer),
                pin: None,
                aps,
            }));
            nets.push(WorkerNet {
                id,
                pins: worker_pins,
                figures: owned,
                ext_figures: outside,
                num_reroutes: 0,
                n_ripup_avoids: 0,
                ndr: data.ndr,
            });
        }

        let mut xs = design.track_coords(None, TrackAxis::X, ext_box.min.x, ext_box.max.x);
        let mut ys = design.track_coords(None, TrackAxis::Y, ext_box.min.y, ext_box.max.y);
        for ap in nets.iter().flat_map(|n| n.pins.iter()).flat_map(|p| p.aps.iter()) {
            if ext_box.contains(ap.point) {
                xs.push(ap.point.x);
                ys.push(ap.point.y);
            }
        }
        let conv = GridConverter::new(xs, ys);
        let (x0, x1, y0, y1) = conv.rect_range(&route_box)?;
        let grid = DenseGrid::new(conv, design.num_layers() as u8);

        let net_index = nets.iter().enumerate().map(|(i, n)| (n.id, i)).collect();
        let mut worker = Self {
            design,
            cfg,
            item,
            grid,
            bounds: IndexBox {
                min_x: x0,
                max_x: x1,
                min_y: y0,
                max_y: y1,
            },
            nets,
            net_index,
            other_figs,
            pins,
            obstructions: index.obstructions_in(&ext_box).into_iter().collect(),
            markers: Vec::new(),
            queue: RouteQueue::default(),
        };
        worker.init_costs();
        Some(worker)
    }

    pub fn nets(&self) -> &[WorkerNet] {
        &self.nets
    }

    pub fn grid(&self) -> &DenseGrid {
        &self.grid
    }

    fn args(&self) -> &SearchRepairArgs {
        &self.item.args
    }

    fn ndr(&self, n: usize) -> Option<&'a NonDefaultRule> {
        let design = self.design;
        self.nets[n].ndr.map(|id| design.tech.ndr(id))
    }

    fn init_costs(&mut self) {
        let tech = &self.design.tech;
        for n in 0..self.nets.len() {
            let ndr = self.ndr(n);
            let net = &self.nets[n];
            for fig in net.figures.iter().chain(net.ext_figures.iter()) {
                mod_path_cost(&mut self.grid, tech, fig, ndr, CostOp::AddRouteShape, true, true);
            }
        }
        for (id, fig) in &self.other_figs {
            let ndr = self.design.net(*id).ndr.map(|r| tech.ndr(r));
            mod_path_cost(&mut self.grid, tech, fig, ndr, CostOp::AddRouteShape, true, true);
        }
        for &p in &self.pins {
            for (layer, rect) in &self.design.pin(p).shapes {
                if rect.intersects(&self.item.ext_box) {
                    mod_fixed_shape_cost(&mut self.grid, tech, *layer, rect, CostOp::AddFixedShape);
                }
            }
        }
        for &o in &self.obstructions {
            let obs = &self.design.obstructions[o as usize];
            if obs.hard {
                block_region(&mut self.grid, obs.layer, &obs.rect);
            }
            mod_fixed_shape_cost(&mut self.grid, tech, obs.layer, &obs.rect, CostOp::AddFixedShape);
        }
        for n in 0..self.nets.len() {
            self.reserve_access(n, CostOp::AddRouteShape);
        }
    }

    /// Virtual via on the primary access point of every design pin of `n`,
    /// so other nets keep clear of it.
    fn reserve_access(&mut self, n: usize, op: CostOp) {
        let tech = &self.design.tech;
        let vias: Vec<ConnFig> = self.nets[n]
            .pins
            .iter()
            .filter(|p| !p.is_boundary())
            .filter_map(|p| p.aps.first())
            .filter_map(|ap| access_via(self.design, ap))
            .collect();
        for via in &vias {
            mod_path_cost(&mut self.grid, tech, via, None, op, false, true);
        }
    }

    /// Every shape the checker sees: worker and halo geometry, pins and
    /// blockages in the ext box.
    fn drc_shapes(&self) -> Vec<DrcShape> {
        let tech = &self.design.tech;
        let mut shapes = Vec::new();
        for net in &self.nets {
            for fig in net.figures.iter().chain(net.ext_figures.iter()) {
                shapes.extend(DrcShape::from_figure(tech, fig, net.id));
            }
        }
        for (id, fig) in &self.other_figs {
            shapes.extend(DrcShape::from_figure(tech, fig, *id));
        }
        for &p in &self.pins {
            let pin = self.design.pin(p);
            for (layer, rect) in &pin.shapes {
                if rect.intersects(&self.item.ext_box) {
                    shapes.push(DrcShape::fixed(*layer, *rect, Owner::Pin(p), Some(pin.net)));
                }
            }
        }
        for &o in &self.obstructions {
            let obs = &self.design.obstructions[o as usize];
            shapes.push(DrcShape::fixed(obs.layer, obs.rect, Owner::Obstruction(o), None));
        }
        shapes
    }

    fn run_drc(&self, target: Option<NetId>) -> Vec<Marker> {
        let mut drc = GeometricDrc::new(&self.design.tech, self.item.drc_box);
        drc.set_target_net(target);
        drc.main(&self.drc_shapes());
        drc.markers().to_vec()
    }

    fn in_route_box(&self, markers: &[Marker]) -> Vec<Marker> {
        markers
            .iter()
            .filter(|m| m.bbox.intersects(&self.item.route_box))
            .cloned()
            .collect()
    }

    /// Boundary crossings on one side reach the configured share of that
    /// side's tracks on an upper layer.
    fn congested(&self) -> bool {
        let cfg = self.cfg;
        let iter = self.item.iter;
        if iter < cfg.congestion_iter_begin || iter > cfg.congestion_iter_end {
            return false;
        }
        let r = &self.item.route_box;
        let first_layer = cfg.congestion_min_layer.saturating_sub(1);
        for z in first_layer..self.design.num_layers() as u8 {
            let boundary: Vec<AccessPoint> = self
                .nets
                .iter()
                .flat_map(|n| n.pins.iter())
                .filter(|p| p.is_boundary())
                .flat_map(|p| p.aps.iter().copied())
                .filter(|ap| ap.layer == z)
                .collect();
            let sides = [
                (r.min.x, true),
                (r.max.x, true),
                (r.min.y, false),
                (r.max.y, false),
            ];
            for (edge, vertical) in sides {
                let crossings = boundary
                    .iter()
                    .filter(|ap| if vertical { ap.point.x == edge } else { ap.point.y == edge })
                    .count();
                let tracks = if vertical {
                    self.design.track_coords(Some(z), TrackAxis::Y, r.min.y, r.max.y).len()
                } else {
                    self.design.track_coords(Some(z), TrackAxis::X, r.min.x, r.max.x).len()
                };
                if tracks > 0 && crossings as f64 >= cfg.congestion_threshold * tracks as f64 {
                    return true;
                }
            }
        }
        false
    }

    pub fn search_repair(mut self, astar: &mut AStar) -> Result<WorkResult> {
        let congested = self.congested();
        self.markers = self.run_drc(None);
        let route_box = self.item.route_box;
        self.markers.extend(
            self.design
                .markers
                .iter()
                .filter(|m| m.rule == RuleKind::Connectivity && m.bbox.intersects(&route_box))
                .cloned(),
        );
        let initial = self.in_route_box(&self.markers).len();
        let tech = &self.design.tech;
        for m in &self.markers {
            add_marker_cost(&mut self.grid, tech, m);
        }

        if self.args().ripup_mode == RipupMode::ViaSwap {
            self.via_swap();
        } else {
            self.init_queue();
            self.drain_queue(astar)?;
        }

        let best = self.in_route_box(&self.run_drc(None));
        let committed = self.args().ripup_mode == RipupMode::All || self.item.iter == 0 || best.len() < initial;
        log::debug!(
            "worker {} {:?}: {} nets, markers {} -> {}{}",
            self.item.id,
            route_box,
            self.nets.len(),
            initial,
            best.len(),
            if committed { "" } else { " (discarded)" }
        );
        Ok(WorkResult {
            id: self.item.id,
            route_box,
            nets: self
                .nets
                .iter()
                .filter(|n| n.num_reroutes > 0)
                .map(|n| (n.id, n.figures.clone()))
                .collect(),
            markers: best,
            initial_markers: initial,
            committed,
            congested,
        })
    }
}

/// Default via reserving an access point, landing on the layer above when
/// there is one.
fn access_via(design: &Design, ap: &AccessPoint) -> Option<ConnFig> {
    let layers = design.num_layers();
    if layers < 2 || ap.layer as usize >= layers {
        return None;
    }
    let cut_z = if (ap.layer as usize) + 1 < layers {
        ap.layer
    } else {
        ap.layer - 1
    };
    design
        .tech
        .default_via_id(cut_z)
        .map(|def| ConnFig::Via(Via::new(def, ap.point)))
}
