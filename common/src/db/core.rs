use crate::db::figure::ConnFig;
use crate::db::indices::*;
use crate::db::marker::Marker;
use crate::db::tech::Tech;
use crate::geom::point::{Coord, Point};
use crate::geom::rect::Rect;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackAxis {
    /// Vertical track lines at x = start + k * step.
    X,
    /// Horizontal track lines at y = start + k * step.
    Y,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrackPattern {
    pub layer: u8,
    pub axis: TrackAxis,
    pub start: Coord,
    pub step: Coord,
    pub count: u32,
}

impl TrackPattern {
    pub fn coords_in(&self, lo: Coord, hi: Coord) -> impl Iterator<Item = Coord> + '_ {
        let step = self.step.max(1);
        let first = if lo <= self.start {
            0
        } else {
            (lo - self.start + step - 1) / step
        };
        (first..self.count as Coord)
            .map(move |k| self.start + k * step)
            .take_while(move |&c| c <= hi)
    }

    /// Track coordinate closest to `c`.
    pub fn snap(&self, c: Coord) -> Coord {
        let step = self.step.max(1);
        let k = ((c - self.start) as f64 / step as f64).round() as Coord;
        self.start + k.clamp(0, self.count.saturating_sub(1) as Coord) * step
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GCellGrid {
    pub origin: Point,
    pub step_x: Coord,
    pub step_y: Coord,
    pub nx: u32,
    pub ny: u32,
}

impl GCellGrid {
    pub fn cell_box(&self, i: u32, j: u32) -> Rect {
        let xl = self.origin.x + i as Coord * self.step_x;
        let yl = self.origin.y + j as Coord * self.step_y;
        Rect::from_coords(xl, yl, xl + self.step_x, yl + self.step_y)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PinKind {
    InstTerm,
    BlockTerm,
    /// No backing terminal; only keeps guide continuity.
    Floating,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccessPoint {
    pub point: Point,
    pub layer: u8,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PinData {
    pub name: String,
    pub net: NetId,
    pub kind: PinKind,
    pub access_points: Vec<AccessPoint>,
    pub shapes: Vec<(u8, Rect)>,
}

impl PinData {
    pub fn touches(&self, p: Point, layer: u8) -> bool {
        self.access_points
            .iter()
            .any(|ap| ap.point == p && ap.layer == layer)
            || self
                .shapes
                .iter()
                .any(|(l, r)| *l == layer && r.contains(p))
    }

    pub fn bbox(&self) -> Option<Rect> {
        self.access_points
            .iter()
            .map(|ap| Rect::from_point(ap.point))
            .chain(self.shapes.iter().map(|(_, r)| *r))
            .reduce(|a, b| a.merge(&b))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guide {
    pub layer: u8,
    pub rect: Rect,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NetData {
    pub name: String,
    pub pins: Vec<PinId>,
    pub figures: Vec<ConnFig>,
    pub guides: Vec<Guide>,
    pub orig_guides: Vec<Guide>,
    pub is_fixed: bool,
    pub is_clock: bool,
    pub is_supply: bool,
    pub ndr: Option<NdrId>,
    pub has_initial_routing: bool,
    pub priority: u32,
    /// Touched since the last connectivity check.
    pub modified: bool,
    /// Last connectivity check failed.
    pub disconnected: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Obstruction {
    pub layer: u8,
    pub rect: Rect,
    /// Hard blockages cannot be crossed at all; soft ones only cost.
    pub hard: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Design {
    pub name: String,
    pub tech: Tech,
    pub die: Rect,
    pub gcell: GCellGrid,
    pub tracks: Vec<TrackPattern>,
    pub nets: Vec<NetData>,
    pub pins: Vec<PinData>,
    pub obstructions: Vec<Obstruction>,
    pub markers: Vec<Marker>,
    pub net_name_map: HashMap<String, NetId>,
}

impl Design {
    pub fn new(name: &str, tech: Tech, die: Rect, gcell_step: Coord) -> Self {
        let step = gcell_step.max(1);
        let nx = ((die.width() + step - 1) / step).max(1) as u32;
        let ny = ((die.height() + step - 1) / step).max(1) as u32;
        Self {
            name: name.to_string(),
            tech,
            die,
            gcell: GCellGrid {
                origin: die.min,
                step_x: step,
                step_y: step,
                nx,
                ny,
            },
            tracks: Vec::new(),
            nets: Vec::new(),
            pins: Vec::new(),
            obstructions: Vec::new(),
            markers: Vec::new(),
            net_name_map: HashMap::new(),
        }
    }

    pub fn num_nets(&self) -> usize {
        self.nets.len()
    }

    pub fn num_layers(&self) -> usize {
        self.tech.num_layers()
    }

    pub fn net(&self, id: NetId) -> &NetData {
        &self.nets[id.index()]
    }

    pub fn net_mut(&mut self, id: NetId) -> &mut NetData {
        &mut self.nets[id.index()]
    }

    pub fn pin(&self, id: PinId) -> &PinData {
        &self.pins[id.index()]
    }

    pub fn add_net(&mut self, name: &str) -> NetId {
        let id = NetId::new(self.nets.len());
        self.nets.push(NetData {
            name: name.to_string(),
            ..Default::default()
        });
        self.net_name_map.insert(name.to_string(), id);
        id
    }

    pub fn add_pin(
        &mut self,
        net: NetId,
        name: &str,
        kind: PinKind,
        access_points: Vec<AccessPoint>,
        shapes: Vec<(u8, Rect)>,
    ) -> PinId {
        let id = PinId::new(self.pins.len());
        self.pins.push(PinData {
            name: name.to_string(),
            net,
            kind,
            access_points,
            shapes,
        });
        self.nets[net.index()].pins.push(id);
        id
    }

    pub fn add_obstruction(&mut self, layer: u8, rect: Rect, hard: bool) {
        self.obstructions.push(Obstruction { layer, rect, hard });
    }

    pub fn add_tracks(&mut self, layer: u8, axis: TrackAxis, start: Coord, step: Coord, count: u32) {
        self.tracks.push(TrackPattern {
            layer,
            axis,
            start,
            step,
            count,
        });
    }

    /// Adds preferred-direction tracks on every layer plus the orthogonal
    /// pattern, both anchored at `offset` from the die origin.
    pub fn add_uniform_tracks(&mut self, offset: Coord) {
        for z in 0..self.num_layers() {
            let pitch = self.tech.layer(z as u8).pitch.max(1);
            let nx = ((self.die.width() - offset) / pitch + 1).max(1) as u32;
            let ny = ((self.die.height() - offset) / pitch + 1).max(1) as u32;
            self.add_tracks(z as u8, TrackAxis::X, self.die.min.x + offset, pitch, nx);
            self.add_tracks(z as u8, TrackAxis::Y, self.die.min.y + offset, pitch, ny);
        }
    }

    pub fn track_coords(&self, layer: Option<u8>, axis: TrackAxis, lo: Coord, hi: Coord) -> Vec<Coord> {
        let mut out: Vec<Coord> = self
            .tracks
            .iter()
            .filter(|t| t.axis == axis && layer.is_none_or(|l| t.layer == l))
            .flat_map(|t| t.coords_in(lo, hi))
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    pub fn track_pattern(&self, layer: u8, axis: TrackAxis) -> Option<&TrackPattern> {
        self.tracks
            .iter()
            .find(|t| t.layer == layer && t.axis == axis)
    }

    pub fn gcell_box(&self, i: u32, j: u32) -> Rect {
        self.gcell.cell_box(i, j)
    }

    pub fn num_markers(&self) -> usize {
        self.markers.len()
    }

    /// Pins that count for electrical completeness.
    pub fn terminal_pins(&self, net: NetId) -> Vec<PinId> {
        self.net(net)
            .pins
            .iter()
            .copied()
            .filter(|p| self.pin(*p).kind != PinKind::Floating)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_clip_to_range() {
        let t = TrackPattern {
            layer: 0,
            axis: TrackAxis::X,
            start: 100,
            step: 200,
            count: 10,
        };
        let got: Vec<Coord> = t.coords_in(250, 1000).collect();
        assert_eq!(got, vec![300, 500, 700, 900]);
        assert_eq!(t.snap(640), 700);
        assert_eq!(t.snap(-500), 100);
    }

    #[test]
    fn nets_and_pins_link_both_ways() {
        let mut d = Design::new("t", Tech::standard(2, 200, 100, 100), Rect::from_coords(0, 0, 2000, 2000), 1000);
        assert_eq!((d.gcell.nx, d.gcell.ny), (2, 2));
        let n = d.add_net("a");
        let p = d.add_pin(
            n,
            "p",
            PinKind::Floating,
            vec![AccessPoint {
                point: Point::new(0, 0),
                layer: 0,
            }],
            vec![],
        );
        assert_eq!(d.pin(p).net, n);
        assert_eq!(d.net(n).pins, vec![p]);
        assert!(d.terminal_pins(n).is_empty());
        assert_eq!(d.net_name_map["a"], n);
    }
}
