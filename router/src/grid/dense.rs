use super::{CostKind, Dir, RoutingGrid};
use crate::utils::conversion::GridConverter;
use eda_common::geom::coord::GridCoord;
use std::collections::BTreeSet;

/// Added to a cell's marker history per marker hit.
pub const MARKER_HISTORY_STEP: u16 = 10;

const BLOCK_EAST: u8 = 1;
const BLOCK_NORTH: u8 = 1 << 1;
const BLOCK_UP: u8 = 1 << 2;

// 14 bytes per cell
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
struct GridNode {
    route_planar: u16,
    route_via: u16,
    fixed_planar: u16,
    fixed_via: u16,
    marker_planar: u16,
    marker_via: u16,
    /// East/North/Up blocked bits. West/South/Down are read from the neighbour.
    blocked: u8,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DenseGrid {
    width: u32,
    height: u32,
    layers: u8,
    nodes: Vec<GridNode>,
    conv: GridConverter,
    history: BTreeSet<usize>,
}

impl DenseGrid {
    pub fn new(conv: GridConverter, layers: u8) -> Self {
        let width = conv.grid_w();
        let height = conv.grid_h();
        let size = (width as usize) * (height as usize) * (layers as usize);

        if size > 50_000_000 {
            log::warn!(
                "Allocating large DenseGrid: {} elements. Ensure sufficient RAM.",
                size
            );
        }

        Self {
            width,
            height,
            layers,
            nodes: vec![GridNode::default(); size],
            conv,
            history: BTreeSet::new(),
        }
    }

    #[inline(always)]
    pub fn index(&self, coord: GridCoord) -> usize {
        (coord.z as usize) * (self.width as usize) * (self.height as usize)
            + (coord.y as usize) * (self.width as usize)
            + (coord.x as usize)
    }

    fn in_bounds(&self, c: GridCoord) -> bool {
        c.x < self.width && c.y < self.height && c.z < self.layers
    }

    /// Maps a direction onto the cell and bit that store it.
    fn edge_slot(&self, c: GridCoord, dir: Dir) -> Option<(usize, u8)> {
        let (owner, bit) = match dir {
            Dir::East => (c, BLOCK_EAST),
            Dir::North => (c, BLOCK_NORTH),
            Dir::Up => (c, BLOCK_UP),
            Dir::West => (self.step(c, Dir::West)?, BLOCK_EAST),
            Dir::South => (self.step(c, Dir::South)?, BLOCK_NORTH),
            Dir::Down => (self.step(c, Dir::Down)?, BLOCK_UP),
        };
        if !self.in_bounds(owner) || self.step(c, dir).is_none() {
            return None;
        }
        Some((self.index(owner), bit))
    }

    /// Blocks every edge touching `c`.
    pub fn block_all(&mut self, c: GridCoord) {
        for dir in Dir::ALL {
            self.set_blocked(c, dir);
        }
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }
}

impl RoutingGrid for DenseGrid {
    fn width(&self) -> u32 {
        self.width
    }
    fn height(&self) -> u32 {
        self.height
    }
    fn layers(&self) -> u8 {
        self.layers
    }
    fn converter(&self) -> &GridConverter {
        &self.conv
    }

    fn is_blocked(&self, c: GridCoord, dir: Dir) -> bool {
        match self.edge_slot(c, dir) {
            Some((idx, bit)) => self.nodes[idx].blocked & bit != 0,
            None => true,
        }
    }

    fn set_blocked(&mut self, c: GridCoord, dir: Dir) {
        if let Some((idx, bit)) = self.edge_slot(c, dir) {
            self.nodes[idx].blocked |= bit;
        }
    }

    fn reset_blocked(&mut self, c: GridCoord, dir: Dir) {
        if let Some((idx, bit)) = self.edge_slot(c, dir) {
            self.nodes[idx].blocked &= !bit;
        }
    }

    #[inline(always)]
    fn cost(&self, c: GridCoord, kind: CostKind, via: bool) -> u32 {
        let n = &self.nodes[self.index(c)];
        let v = match (kind, via) {
            (CostKind::RouteShape, false) => n.route_planar,
            (CostKind::RouteShape, true) => n.route_via,
            (CostKind::FixedShape, false) => n.fixed_planar,
            (CostKind::FixedShape, true) => n.fixed_via,
            (CostKind::Marker, false) => n.marker_planar,
            (CostKind::Marker, true) => n.marker_via,
        };
        v as u32
    }

    fn add_cost(&mut self, c: GridCoord, kind: CostKind, via: bool) {
        if !self.in_bounds(c) {
            return;
        }
        let idx = self.index(c);
        let n = &mut self.nodes[idx];
        match (kind, via) {
            (CostKind::RouteShape, false) => n.route_planar = n.route_planar.saturating_add(1),
            (CostKind::RouteShape, true) => n.route_via = n.route_via.saturating_add(1),
            (CostKind::FixedShape, false) => n.fixed_planar = n.fixed_planar.saturating_add(1),
            (CostKind::FixedShape, true) => n.fixed_via = n.fixed_via.saturating_add(1),
            (CostKind::Marker, false) => {
                n.marker_planar = n.marker_planar.saturating_add(MARKER_HISTORY_STEP);
                self.history.insert(idx);
            }
            (CostKind::Marker, true) => {
                n.marker_via = n.marker_via.saturating_add(MARKER_HISTORY_STEP);
                self.history.insert(idx);
            }
        }
    }

    fn sub_cost(&mut self, c: GridCoord, kind: CostKind, via: bool) {
        if !self.in_bounds(c) {
            return;
        }
        let idx = self.index(c);
        let n = &mut self.nodes[idx];
        match (kind, via) {
            (CostKind::RouteShape, false) => n.route_planar = n.route_planar.saturating_sub(1),
            (CostKind::RouteShape, true) => n.route_via = n.route_via.saturating_sub(1),
            (CostKind::FixedShape, false) => n.fixed_planar = n.fixed_planar.saturating_sub(1),
            (CostKind::FixedShape, true) => n.fixed_via = n.fixed_via.saturating_sub(1),
            (CostKind::Marker, false) => {
                n.marker_planar = n.marker_planar.saturating_sub(MARKER_HISTORY_STEP)
            }
            (CostKind::Marker, true) => {
                n.marker_via = n.marker_via.saturating_sub(MARKER_HISTORY_STEP)
            }
        }
    }

    fn decay_history(&mut self, factor: f32) {
        let mut cleared = Vec::new();
        for &idx in &self.history {
            let n = &mut self.nodes[idx];
            n.marker_planar = (n.marker_planar as f32 * factor) as u16;
            n.marker_via = (n.marker_via as f32 * factor) as u16;
            if n.marker_planar == 0 && n.marker_via == 0 {
                cleared.push(idx);
            }
        }
        for idx in cleared {
            self.history.remove(&idx);
        }
    }
}
