use crate::grid::{CostKind, Dir, RoutingGrid};
use eda_common::db::core::Guide;
use eda_common::db::tech::Tech;
use eda_common::geom::coord::GridCoord;
use eda_common::geom::point::{Coord, Point};
use eda_common::geom::rect::Rect;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

#[derive(Copy, Clone, Eq, PartialEq)]
struct State {
    f_score: i64,
    g_score: i64,
    index: u32,
}

impl Ord for State {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .f_score
            .cmp(&self.f_score)
            .then_with(|| self.g_score.cmp(&other.g_score))
            .then_with(|| other.index.cmp(&self.index))
    }
}

impl PartialOrd for State {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

pub trait GuideOracle {
    fn is_in_guide(&self, c: GridCoord) -> bool;
}

pub struct NoGuide;
impl GuideOracle for NoGuide {
    fn is_in_guide(&self, _c: GridCoord) -> bool {
        true
    }
}

/// Per-net guide membership over a worker grid.
pub struct GuideMask {
    width: u32,
    height: u32,
    bits: Vec<bool>,
}

impl GuideMask {
    /// Cells inside any of `guides` on their layer, plus every cell of
    /// `always`, are in guide.
    pub fn build<G: RoutingGrid + ?Sized>(grid: &G, guides: &[Guide], always: &[GridCoord]) -> Self {
        let (w, h, layers) = (grid.width(), grid.height(), grid.layers());
        let mut bits = vec![false; (w as usize) * (h as usize) * (layers as usize)];
        let conv = grid.converter();
        for g in guides.iter().filter(|g| g.layer < layers) {
            let Some((x0, x1, y0, y1)) = conv.rect_range(&g.rect) else {
                continue;
            };
            for y in y0..=y1 {
                for x in x0..=x1 {
                    bits[(g.layer as usize * h as usize + y as usize) * w as usize + x as usize] = true;
                }
            }
        }
        for c in always.iter().filter(|c| c.z < layers) {
            bits[(c.z as usize * h as usize + c.y as usize) * w as usize + c.x as usize] = true;
        }
        Self {
            width: w,
            height: h,
            bits,
        }
    }
}

impl GuideOracle for GuideMask {
    #[inline(always)]
    fn is_in_guide(&self, c: GridCoord) -> bool {
        let idx = (c.z as usize * self.height as usize + c.y as usize) * self.width as usize + c.x as usize;
        self.bits.get(idx).copied().unwrap_or(false)
    }
}

/// Edge-cost weights of one search.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SearchCosts {
    pub drc: u32,
    pub marker: u32,
    pub fixed: u32,
    pub via: u32,
    pub wrong_way: u32,
    pub guide: u32,
}

/// Inclusive grid index box the search may never leave.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexBox {
    pub min_x: u32,
    pub max_x: u32,
    pub min_y: u32,
    pub max_y: u32,
}

pub struct SearchRequest<'a> {
    pub sources: &'a [GridCoord],
    pub dests: &'a [GridCoord],
    pub bounds: IndexBox,
    pub margin: u32,
    pub max_expansions: u32,
    pub costs: SearchCosts,
}

#[derive(Clone, Copy)]
struct RoutingWindow {
    min_x: u32,
    max_x: u32,
    min_y: u32,
    max_y: u32,
    width: u32,
    height: u32,
    layers: u8,
}

impl RoutingWindow {
    fn around(points: &[GridCoord], margin: u32, bounds: IndexBox, layers: u8) -> Self {
        let mut min_x = u32::MAX;
        let mut max_x = 0;
        let mut min_y = u32::MAX;
        let mut max_y = 0;
        for p in points {
            min_x = min_x.min(p.x);
            max_x = max_x.max(p.x);
            min_y = min_y.min(p.y);
            max_y = max_y.max(p.y);
        }
        let min_x = min_x.saturating_sub(margin).max(bounds.min_x);
        let max_x = max_x.saturating_add(margin).min(bounds.max_x);
        let min_y = min_y.saturating_sub(margin).max(bounds.min_y);
        let max_y = max_y.saturating_add(margin).min(bounds.max_y);
        Self::from_bounds(
            IndexBox {
                min_x,
                max_x: max_x.max(min_x),
                min_y,
                max_y: max_y.max(min_y),
            },
            layers,
        )
    }

    fn from_bounds(b: IndexBox, layers: u8) -> Self {
        Self {
            min_x: b.min_x,
            max_x: b.max_x,
            min_y: b.min_y,
            max_y: b.max_y,
            width: b.max_x - b.min_x + 1,
            height: b.max_y - b.min_y + 1,
            layers,
        }
    }

    fn same_as(&self, b: IndexBox) -> bool {
        self.min_x == b.min_x && self.max_x == b.max_x && self.min_y == b.min_y && self.max_y == b.max_y
    }

    fn size(&self) -> usize {
        (self.width as usize) * (self.height as usize) * (self.layers as usize)
    }

    #[inline(always)]
    fn contains(&self, c: GridCoord) -> bool {
        c.x >= self.min_x && c.x <= self.max_x && c.y >= self.min_y && c.y <= self.max_y && c.z < self.layers
    }
    #[inline(always)]
    fn get_local_idx(&self, c: GridCoord) -> usize {
        let lx = c.x - self.min_x;
        let ly = c.y - self.min_y;
        let lz = c.z as u32;
        (lz * self.width * self.height + ly * self.width + lx) as usize
    }
    #[inline(always)]
    fn get_coord(&self, idx: u32) -> GridCoord {
        let plane_size = self.width * self.height;
        let z = (idx / plane_size) as u8;
        let rem = idx % plane_size;
        let y = rem / self.width + self.min_y;
        let x = rem % self.width + self.min_x;
        GridCoord::new(x, y, z)
    }
}

#[derive(Clone)]
pub struct AStar {
    parents: Vec<u32>,
    g_score: Vec<i64>,
    visited_tag: Vec<u32>,
    current_tag: u32,
    capacity: usize,
    pub last_expansions: u32,
}

impl Default for AStar {
    fn default() -> Self {
        Self::new()
    }
}

impl AStar {
    pub fn new() -> Self {
        let cap = 100_000;
        Self {
            parents: vec![u32::MAX; cap],
            g_score: vec![i64::MAX; cap],
            visited_tag: vec![0; cap],
            current_tag: 1,
            capacity: cap,
            last_expansions: 0,
        }
    }
    fn ensure_capacity(&mut self, size: usize) {
        if size > self.capacity {
            self.capacity = size.max(self.capacity * 2);
            self.parents.resize(self.capacity, u32::MAX);
            self.g_score.resize(self.capacity, i64::MAX);
            self.visited_tag.resize(self.capacity, 0);
        }
    }
    fn reset_window(&mut self) {
        self.current_tag = self.current_tag.wrapping_add(1);
        if self.current_tag == 0 {
            self.visited_tag.fill(0);
            self.current_tag = 1;
        }
    }

    /// Cheapest path from any source to any destination, both inclusive.
    /// Tries a window around the terminals first, then the whole bounds.
    pub fn find_path<G: RoutingGrid + ?Sized, O: GuideOracle>(
        &mut self,
        grid: &G,
        tech: &Tech,
        req: &SearchRequest<'_>,
        oracle: &O,
    ) -> Option<Vec<GridCoord>> {
        if req.sources.is_empty() || req.dests.is_empty() {
            return None;
        }
        let mut terminals = req.sources.to_vec();
        terminals.extend_from_slice(req.dests);
        let window = RoutingWindow::around(&terminals, req.margin, req.bounds, grid.layers());
        if let Some(path) = self.search_window(grid, tech, req, oracle, window) {
            return Some(path);
        }
        if window.same_as(req.bounds) {
            return None;
        }
        log::debug!("windowed search failed; retrying over the full route box");
        self.search_window(
            grid,
            tech,
            req,
            oracle,
            RoutingWindow::from_bounds(req.bounds, grid.layers()),
        )
    }

    fn search_window<G: RoutingGrid + ?Sized, O: GuideOracle>(
        &mut self,
        grid: &G,
        tech: &Tech,
        req: &SearchRequest<'_>,
        oracle: &O,
        window: RoutingWindow,
    ) -> Option<Vec<GridCoord>> {
        self.ensure_capacity(window.size());
        self.reset_window();

        let mut dests: Vec<GridCoord> = req.dests.iter().copied().filter(|d| window.contains(*d)).collect();
        dests.sort_unstable();
        dests.dedup();
        let dest_box = dests
            .iter()
            .map(|d| Rect::from_point(grid.point(*d)))
            .reduce(|a, b| a.merge(&b))?;

        let mut heap = BinaryHeap::new();
        for &start in req.sources {
            if !window.contains(start) {
                continue;
            }
            let start_local = window.get_local_idx(start);
            if self.visited_tag[start_local] == self.current_tag {
                continue;
            }
            self.g_score[start_local] = 0;
            self.visited_tag[start_local] = self.current_tag;
            self.parents[start_local] = u32::MAX;
            heap.push(State {
                f_score: heuristic(grid.point(start), &dest_box),
                g_score: 0,
                index: start_local as u32,
            });
        }

        let mut expansions = 0;
        while let Some(State { g_score, index, .. }) = heap.pop() {
            let curr_local = index as usize;
            if g_score > self.g_score[curr_local] {
                continue;
            }
            let position = window.get_coord(index);
            if dests.binary_search(&position).is_ok() {
                self.last_expansions = expansions;
                return Some(self.reconstruct_path(position, &window));
            }

            expansions += 1;
            if expansions > req.max_expansions {
                self.last_expansions = expansions;
                return None;
            }

            for dir in Dir::ALL {
                let Some(neighbor) = grid.step(position, dir) else {
                    continue;
                };
                if !window.contains(neighbor) || grid.is_blocked(position, dir) {
                    continue;
                }
                let tentative_g = g_score + edge_cost(grid, tech, position, neighbor, dir, &req.costs, oracle);
                let neighbor_local = window.get_local_idx(neighbor);

                if self.visited_tag[neighbor_local] != self.current_tag
                    || tentative_g < self.g_score[neighbor_local]
                {
                    self.parents[neighbor_local] = curr_local as u32;
                    self.g_score[neighbor_local] = tentative_g;
                    self.visited_tag[neighbor_local] = self.current_tag;
                    heap.push(State {
                        f_score: tentative_g + heuristic(grid.point(neighbor), &dest_box),
                        g_score: tentative_g,
                        index: neighbor_local as u32,
                    });
                }
            }
        }
        self.last_expansions = expansions;
        None
    }

    fn reconstruct_path(&self, end: GridCoord, window: &RoutingWindow) -> Vec<GridCoord> {
        let mut path = Vec::new();
        let mut curr_local = window.get_local_idx(end);
        loop {
            path.push(window.get_coord(curr_local as u32));
            let parent = self.parents[curr_local];
            if parent == u32::MAX {
                break;
            }
            curr_local = parent as usize;
        }
        path.reverse();
        path
    }
}

/// Planar distance to the destination box; every DBU of travel costs at least 1.
#[inline(always)]
fn heuristic(p: Point, dest_box: &Rect) -> i64 {
    let dx = (dest_box.min.x - p.x).max(p.x - dest_box.max.x).max(0);
    let dy = (dest_box.min.y - p.y).max(p.y - dest_box.max.y).max(0);
    dx + dy
}

/// Cost of moving from `from` to its neighbour `to` along `dir`.
pub fn edge_cost<G: RoutingGrid + ?Sized, O: GuideOracle>(
    grid: &G,
    tech: &Tech,
    from: GridCoord,
    to: GridCoord,
    dir: Dir,
    costs: &SearchCosts,
    oracle: &O,
) -> i64 {
    let (len, base, probe) = if dir.is_via() {
        let lower = if dir == Dir::Up { from } else { to };
        let pitch: Coord = tech.layer(lower.z).pitch.max(1);
        (pitch, costs.via as i64 * pitch, lower)
    } else {
        let len = grid.point(from).manhattan(&grid.point(to));
        let wrong_way = dir.is_horizontal() != tech.layer(from.z).is_horizontal();
        let mult = if wrong_way { costs.wrong_way as i64 } else { 1 };
        (len, len * mult, to)
    };
    let via = dir.is_via();
    let mut cost = base;
    if grid.cost(probe, CostKind::RouteShape, via) > 0 {
        cost += len * costs.drc as i64;
    }
    if grid.cost(probe, CostKind::Marker, via) > 0 {
        cost += len * costs.marker as i64;
    }
    if grid.cost(probe, CostKind::FixedShape, via) > 0 {
        cost += len * costs.fixed as i64;
    }
    if !oracle.is_in_guide(to) {
        cost += len * costs.guide as i64;
    }
    cost
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::DenseGrid;
    use crate::utils::conversion::GridConverter;

    fn costs() -> SearchCosts {
        SearchCosts {
            drc: 8,
            marker: 32,
            fixed: 8,
            via: 4,
            wrong_way: 8,
            guide: 4,
        }
    }

    fn setup(layers: usize) -> (DenseGrid, Tech) {
        let xs: Vec<Coord> = (0..=10).map(|i| i * 200).collect();
        let grid = DenseGrid::new(GridConverter::new(xs, vec![0, 200, 400]), layers as u8);
        (grid, Tech::standard(layers, 200, 100, 100))
    }

    fn full(grid: &DenseGrid) -> IndexBox {
        IndexBox {
            min_x: 0,
            max_x: grid.width() - 1,
            min_y: 0,
            max_y: grid.height() - 1,
        }
    }

    #[test]
    fn straight_path_on_preferred_direction() {
        let (grid, tech) = setup(2);
        let src = [GridCoord::new(0, 0, 0)];
        let dst = [GridCoord::new(10, 0, 0)];
        let req = SearchRequest {
            sources: &src,
            dests: &dst,
            bounds: full(&grid),
            margin: 2,
            max_expansions: 10_000,
            costs: costs(),
        };
        let path = AStar::new().find_path(&grid, &tech, &req, &NoGuide).expect("path");
        assert_eq!(path.len(), 11);
        assert!(path.iter().all(|c| c.y == 0 && c.z == 0));
    }

    #[test]
    fn fully_blocked_cell_cuts_the_only_track() {
        let xs: Vec<Coord> = (0..=10).map(|i| i * 200).collect();
        let mut grid = DenseGrid::new(GridConverter::new(xs, vec![0]), 1);
        let tech = Tech::standard(1, 200, 100, 100);
        grid.block_all(GridCoord::new(5, 0, 0));
        let src = [GridCoord::new(0, 0, 0)];
        let dst = [GridCoord::new(10, 0, 0)];
        let req = SearchRequest {
            sources: &src,
            dests: &dst,
            bounds: full(&grid),
            margin: 2,
            max_expansions: 10_000,
            costs: costs(),
        };
        assert!(AStar::new().find_path(&grid, &tech, &req, &NoGuide).is_none());
    }

    #[test]
    fn route_shape_cost_pushes_path_off_track() {
        let (mut grid, tech) = setup(2);
        for x in 1..10 {
            grid.add_cost(GridCoord::new(x, 0, 0), CostKind::RouteShape, false);
        }
        let src = [GridCoord::new(0, 0, 0)];
        let dst = [GridCoord::new(10, 0, 0)];
        let mut c = costs();
        c.drc = 1000;
        let req = SearchRequest {
            sources: &src,
            dests: &dst,
            bounds: full(&grid),
            margin: 2,
            max_expansions: 100_000,
            costs: c,
        };
        let path = AStar::new().find_path(&grid, &tech, &req, &NoGuide).expect("path");
        assert!(path.iter().any(|p| p.y != 0 || p.z != 0));
    }

    #[test]
    fn search_never_leaves_bounds() {
        let (mut grid, tech) = setup(1);
        grid.block_all(GridCoord::new(5, 0, 0));
        let src = [GridCoord::new(0, 0, 0)];
        let dst = [GridCoord::new(10, 0, 0)];
        let bounds = IndexBox {
            min_x: 0,
            max_x: 10,
            min_y: 0,
            max_y: 0,
        };
        let req = SearchRequest {
            sources: &src,
            dests: &dst,
            bounds,
            margin: 4,
            max_expansions: 100_000,
            costs: costs(),
        };
        assert!(AStar::new().find_path(&grid, &tech, &req, &NoGuide).is_none());
    }
}
