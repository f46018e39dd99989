//! Outer search-and-repair loop: walks the strategy table, cuts the die into
//! tiles, runs batches of workers and merges what they commit.

pub mod debug;
pub mod dispatch;
pub mod max_spacing;
pub mod metrics;
pub mod strategy;
pub mod tiles;

use self::debug::DebugDumper;
use self::dispatch::{DesignUpdate, Dispatcher};
use self::metrics::{IterationMetrics, MetricsSink, log_violation_report};
use self::strategy::{ClipSizer, FlowState, RipupMode, SearchRepairArgs, all_becomes_incr, decide_flow, default_strategies};
use self::tiles::{check_batch_isolation, make_batches, make_tiles, pack_isolated};
use crate::connectivity;
use crate::error::{Result, RouteError};
use crate::worker::boundary::split_figures;
use crate::worker::index::DesignIndex;
use crate::worker::{WorkItem, WorkResult};
use eda_common::db::core::Design;
use eda_common::db::figure::ConnFig;
use eda_common::db::indices::NetId;
use eda_common::geom::rect::Rect;
use eda_common::util::config::DetailedRoutingConfig;
use eda_common::util::profiler::ScopedTimer;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Cost multipliers probed on every STUBBORN cluster.
const STUBBORN_COST_VARIANTS: [u32; 3] = [1, 2, 4];

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Iterations actually executed, skipped ones included.
    pub iterations: usize,
    pub violations: usize,
    pub metrics: IterationMetrics,
}

#[derive(Debug, Default)]
struct BatchStats {
    work: usize,
    improved: bool,
    congested: bool,
}

impl BatchStats {
    fn absorb(&mut self, other: BatchStats) {
        self.work += other.work;
        self.improved |= other.improved;
        self.congested |= other.congested;
    }
}

struct Orchestrator<'a, 'd> {
    cfg: &'a DetailedRoutingConfig,
    dispatcher: &'d mut dyn Dispatcher,
    dumper: Option<DebugDumper>,
    next_id: usize,
}

/// Runs the whole loop. Stops after `cfg.end_iteration` iterations, as soon
/// as no violation is left, or when `abort` is raised between iterations.
///
/// A search failure aborts immediately. Nets still disconnected at the end
/// come back as [`RouteError::Connectivity`] after the final metrics went out.
pub fn run(
    design: &mut Design,
    cfg: &DetailedRoutingConfig,
    dispatcher: &mut dyn Dispatcher,
    sink: &mut dyn MetricsSink,
    abort: Option<&AtomicBool>,
) -> Result<RunSummary> {
    let _t = ScopedTimer::new("detailed routing");
    log::info!(
        "Starting Detailed Routing: {} nets, {} layers, {}x{} gcells",
        design.num_nets(),
        design.num_layers(),
        design.gcell.nx,
        design.gcell.ny
    );

    let dumper = DebugDumper::from_config(cfg);
    if let Some(d) = &dumper {
        d.dump_globals(design)?;
    }
    let mut orch = Orchestrator {
        cfg,
        dispatcher,
        dumper,
        next_id: 0,
    };

    let has_fixed = design.nets.iter().any(|n| n.is_fixed);
    let has_initial = design.nets.iter().any(|n| n.has_initial_routing);
    let mut strategies = default_strategies(cfg);
    strategies.truncate(cfg.end_iteration);

    let mut sizer = ClipSizer::default();
    let mut flow = FlowState::Optimization;
    let mut improved = true;
    let mut congested = false;
    let mut max_spacing_done = false;
    let mut routed_once = false;
    let mut iterations = 0;

    for (iter, base) in strategies.iter().enumerate() {
        if abort.is_some_and(|a| a.load(Ordering::Relaxed)) {
            log::warn!("Detailed routing aborted before iteration {}", iter);
            break;
        }
        let start = Instant::now();
        let mut args = *base;
        if args.ripup_mode == RipupMode::All && all_becomes_incr(iter, has_fixed, has_initial, cfg.incremental) {
            args.ripup_mode = RipupMode::Incr;
        }
        sizer.adapt(&mut args, congested, cfg.max_clip_size_increase);
        let before = orch.dumper.as_ref().map(|_| snapshot(design));
        let num_markers = design.markers.len();
        iterations = iter + 1;

        let stats = if routed_once && num_markers == 0 && !max_spacing_done && design.tech.has_max_spacing() {
            max_spacing_done = true;
            let lonely = max_spacing::lonely_vias(design);
            log::info!("Iter {}: max spacing pass over {} lonely vias", iter, lonely.len());
            let batches = max_spacing::repair_batches(design, cfg, &lonely, iter, args);
            orch.run_batches(design, batches, iter)?
        } else {
            let incremental_work = design
                .nets
                .iter()
                .any(|n| !n.has_initial_routing && !n.is_fixed && n.figures.is_empty() && n.pins.len() >= 2);
            flow = decide_flow(iter, &args, num_markers, incremental_work, improved, flow, cfg.stubborn_trigger);
            match flow {
                FlowState::Skip => {
                    log::info!("Iter {} ({}): skipped", iter, args.ripup_mode.name());
                    if num_markers == 0 && !design.tech.has_max_spacing() {
                        break;
                    }
                    continue;
                }
                FlowState::Optimization => orch.optimization(design, iter, args)?,
                FlowState::Stubborn => orch.stubborn(design, iter, args)?,
                FlowState::Guides => orch.guides(design, iter, args)?,
            }
        };
        routed_once = true;
        improved = stats.improved;
        congested = stats.congested;

        let disconnected = connectivity::run(design, cfg.feedthrough_penalty);
        log::info!(
            "Iter {} ({}, {:?}): Violations: {}, Work: {}, Disconnected: {}, Time: {}ms",
            iter,
            args.ripup_mode.name(),
            flow,
            design.num_markers(),
            stats.work,
            disconnected,
            start.elapsed().as_millis()
        );
        log_violation_report(design);
        sink.record(&IterationMetrics::collect(design, iter));
        if let (Some(d), Some(before)) = (&orch.dumper, &before) {
            d.dump_update(iter, &DesignUpdate::diff(before, design))?;
        }

        let max_spacing_pending = !max_spacing_done && design.tech.has_max_spacing();
        if design.markers.is_empty() && !max_spacing_pending {
            log::info!("Converged at iter {}!", iter);
            break;
        }
    }

    verify_unrouted(design, cfg.feedthrough_penalty);
    let metrics = IterationMetrics::collect(design, iterations.saturating_sub(1));
    sink.finish(&metrics);

    let failed: Vec<String> = design
        .nets
        .iter()
        .filter(|n| n.disconnected)
        .map(|n| n.name.clone())
        .collect();
    if !failed.is_empty() {
        return Err(RouteError::Connectivity { nets: failed });
    }
    Ok(RunSummary {
        iterations,
        violations: design.markers.len(),
        metrics,
    })
}

/// Nets no worker ever touched are invisible to the per-iteration check.
/// Routable ones with no geometry at all get verified once at the end.
fn verify_unrouted(design: &mut Design, feedthrough_penalty: u32) {
    let pending: Vec<NetId> = (0..design.nets.len())
        .map(NetId::new)
        .filter(|&id| {
            let n = design.net(id);
            !n.is_fixed && !n.modified && n.figures.is_empty() && design.terminal_pins(id).len() >= 2
        })
        .collect();
    if pending.is_empty() {
        return;
    }
    for &id in &pending {
        design.net_mut(id).modified = true;
    }
    let disconnected = connectivity::run(design, feedthrough_penalty);
    log::info!(
        "Final check of {} untouched nets: {} disconnected overall",
        pending.len(),
        disconnected
    );
}

fn snapshot(design: &Design) -> Vec<Vec<ConnFig>> {
    design.nets.iter().map(|n| n.figures.clone()).collect()
}

/// Smallest gcell-aligned box covering `r`, clipped to the die.
fn snap_to_gcells(design: &Design, r: &Rect) -> Option<Rect> {
    let g = &design.gcell;
    let ix = |x: i64| ((x - g.origin.x) / g.step_x.max(1)).clamp(0, g.nx as i64 - 1) as u32;
    let iy = |y: i64| ((y - g.origin.y) / g.step_y.max(1)).clamp(0, g.ny as i64 - 1) as u32;
    let lo = g.cell_box(ix(r.min.x), iy(r.min.y)).min;
    let hi = g.cell_box(ix(r.max.x), iy(r.max.y)).max;
    Rect::new(lo, hi).intersection(&design.die)
}

fn span_in_gcells(design: &Design, r: &Rect) -> u32 {
    let g = &design.gcell;
    let w = (r.width() + g.step_x - 1) / g.step_x.max(1);
    let h = (r.height() + g.step_y - 1) / g.step_y.max(1);
    w.max(h) as u32
}

/// Merges gcell-snapped boxes around `seeds` while the merged box stays
/// within `max_span` gcells.
fn cluster_boxes(design: &Design, seeds: &[Rect], max_span: u32) -> Vec<Rect> {
    let mut clusters: Vec<Rect> = Vec::new();
    for seed in seeds {
        let Some(b) = snap_to_gcells(design, seed) else {
            continue;
        };
        let slot = clusters
            .iter()
            .position(|c| span_in_gcells(design, &c.merge(&b)) <= max_span);
        match slot {
            Some(k) => clusters[k] = clusters[k].merge(&b),
            None => clusters.push(b),
        }
    }
    clusters
}

impl Orchestrator<'_, '_> {
    fn item(&mut self, iter: usize, route_box: Rect, args: SearchRepairArgs) -> WorkItem {
        let id = self.next_id;
        self.next_id += 1;
        WorkItem {
            id,
            iter,
            route_box,
            ext_box: route_box.bloat(self.cfg.mt_safe_dist),
            drc_box: route_box.bloat(self.cfg.drc_safe_dist),
            args,
        }
    }

    /// Checkerboard of regular tiles over the whole die.
    fn optimization(&mut self, design: &mut Design, iter: usize, args: SearchRepairArgs) -> Result<BatchStats> {
        let tiles = make_tiles(design, args.size, args.offset);
        let batches: Vec<Vec<WorkItem>> = make_batches(&tiles, self.cfg.batch_size)
            .into_iter()
            .map(|batch| batch.into_iter().map(|i| self.item(iter, tiles[i].route_box, args)).collect())
            .collect();
        self.run_batches(design, batches, iter)
    }

    /// Small clusters around the remaining markers, each probed with several
    /// cost weightings and grown by one gcell ring per round while markers
    /// remain, up to the wavefront cap.
    fn stubborn(&mut self, design: &mut Design, iter: usize, args: SearchRepairArgs) -> Result<BatchStats> {
        let seeds: Vec<Rect> = design.markers.iter().map(|m| m.bbox).collect();
        let mut clusters = cluster_boxes(design, &seeds, self.cfg.stubborn_max_cluster);
        log::info!("Iter {}: {} stubborn clusters", iter, clusters.len());
        let step = design.gcell.step_x.max(design.gcell.step_y);
        let mut stats = BatchStats::default();

        while !clusters.is_empty() {
            let mut grown: Vec<Rect> = Vec::new();
            for batch in pack_isolated(&clusters, self.cfg.batch_size, self.cfg.mt_safe_dist) {
                let mut best: Vec<Option<WorkResult>> = batch.iter().map(|_| None).collect();
                for mult in STUBBORN_COST_VARIANTS {
                    let variant = args.with_costs(mult);
                    let items: Vec<WorkItem> = batch.iter().map(|&k| self.item(iter, clusters[k], variant)).collect();
                    for (slot, r) in best.iter_mut().zip(self.dispatch(design, &items, iter)?) {
                        stats.work += 1;
                        stats.congested |= r.congested;
                        let better = r.committed && slot.as_ref().is_none_or(|b| r.markers.len() < b.markers.len());
                        if better {
                            *slot = Some(r);
                        }
                    }
                }

                for (&k, result) in batch.iter().zip(best) {
                    let cluster = clusters[k];
                    let remaining = match result {
                        Some(r) => {
                            stats.improved |= r.markers.len() < r.initial_markers;
                            merge_result(design, &r);
                            r.markers.len()
                        }
                        None => design.markers.iter().filter(|m| m.bbox.intersects(&cluster)).count(),
                    };
                    if remaining == 0 {
                        continue;
                    }
                    if let Some(next) = cluster.bloat(step).intersection(&design.die)
                        && next != cluster
                        && span_in_gcells(design, &next) <= self.cfg.stubborn_wavefront_max
                        && !grown.contains(&next)
                    {
                        grown.push(next);
                    }
                }
            }
            clusters = grown;
        }
        Ok(stats)
    }

    /// Restores the original guides of nets near the markers and reroutes
    /// inside the guide boxes that meet a marker.
    fn guides(&mut self, design: &mut Design, iter: usize, args: SearchRepairArgs) -> Result<BatchStats> {
        let mut seeds = Vec::new();
        let mut restored = BTreeSet::new();
        for (i, net) in design.nets.iter().enumerate() {
            for g in &net.orig_guides {
                if design.markers.iter().any(|m| m.bbox.intersects(&g.rect)) {
                    seeds.push(g.rect);
                    restored.insert(NetId::new(i));
                }
            }
        }
        for &id in &restored {
            let net = design.net_mut(id);
            net.guides = net.orig_guides.clone();
        }
        let mut boxes = cluster_boxes(design, &seeds, self.cfg.stubborn_wavefront_max);
        boxes.dedup();
        log::info!("Iter {}: rerouting {} nets inside {} original guide clusters", iter, restored.len(), boxes.len());

        let args = SearchRepairArgs {
            follow_guide: true,
            ripup_mode: RipupMode::Drc,
            ..args
        };
        let batches: Vec<Vec<WorkItem>> = pack_isolated(&boxes, self.cfg.batch_size, self.cfg.mt_safe_dist)
            .into_iter()
            .map(|batch| batch.into_iter().map(|k| self.item(iter, boxes[k], args)).collect())
            .collect();
        self.run_batches(design, batches, iter)
    }

    /// Dispatches and merges batches strictly one after another.
    fn run_batches(&mut self, design: &mut Design, batches: Vec<Vec<WorkItem>>, iter: usize) -> Result<BatchStats> {
        let mut stats = BatchStats::default();
        for batch in batches {
            let boxes: Vec<Rect> = batch.iter().map(|w| w.route_box).collect();
            if let Err((a, b)) = check_batch_isolation(&boxes, self.cfg.mt_safe_dist) {
                log::warn!(
                    "Iter {}: tiles {:?} and {:?} are closer than the safe distance; running the batch one tile at a time",
                    iter,
                    boxes[a],
                    boxes[b]
                );
                for item in batch {
                    stats.absorb(self.run_batch(design, std::slice::from_ref(&item), iter)?);
                }
                continue;
            }
            stats.absorb(self.run_batch(design, &batch, iter)?);
        }
        Ok(stats)
    }

    fn run_batch(&mut self, design: &mut Design, items: &[WorkItem], iter: usize) -> Result<BatchStats> {
        let results = self.dispatch(design, items, iter)?;
        let mut stats = BatchStats {
            work: results.len(),
            ..Default::default()
        };
        for r in &results {
            stats.congested |= r.congested;
            if !r.committed {
                continue;
            }
            stats.improved |= r.markers.len() < r.initial_markers;
            merge_result(design, r);
        }
        Ok(stats)
    }

    fn dispatch(&mut self, design: &Design, items: &[WorkItem], iter: usize) -> Result<Vec<WorkResult>> {
        if let Some(d) = &self.dumper {
            d.dump_workers(iter, items)?;
        }
        let index = DesignIndex::build(design);
        self.dispatcher.dispatch(design, &index, items, iter)
    }
}

/// Replaces each rerouted net's geometry inside the route box with the
/// worker's and swaps in the worker's view of the markers there.
fn merge_result(design: &mut Design, r: &WorkResult) {
    let die = design.die;
    for (id, figs) in &r.nets {
        let net = design.net_mut(*id);
        let (_, mut kept) = split_figures(&net.figures, &r.route_box, &die);
        kept.extend(figs.iter().copied());
        net.figures = kept;
        net.modified = true;
    }
    design.markers.retain(|m| !m.bbox.intersects(&r.route_box));
    for m in &r.markers {
        if !design.markers.iter().any(|o| o.same_site(m)) {
            design.markers.push(m.clone());
        }
    }
}
