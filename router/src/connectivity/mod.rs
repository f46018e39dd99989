//! Post-route connectivity verification and repair.
//!
//! Every modified net is rebuilt as a graph of figures and pins joined at
//! shared (layer, point) nodes. A greedy shortest-path traversal from the
//! first pin must reach every other pin. On success the geometry is trimmed
//! to what the traversal used; on failure the net is flagged and left as is.

pub mod merge;

use eda_common::db::core::{AccessPoint, Design};
use eda_common::db::figure::{ConnFig, EndStyle, PathSeg};
use eda_common::db::indices::{NetId, PinId};
use eda_common::db::marker::{Marker, Owner, RuleKind};
use eda_common::db::tech::Tech;
use eda_common::geom::point::Point;
use eda_common::geom::rect::Rect;
use eda_common::util::profiler::ScopedTimer;
use merge::merge_colinear;
use priority_queue::PriorityQueue;
use rayon::prelude::*;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};

/// Outcome of checking one net.
#[derive(Clone, Debug)]
pub struct NetCheck {
    pub net: NetId,
    pub figures: Vec<ConnFig>,
    pub markers: Vec<Marker>,
    pub connected: bool,
    /// Descriptions of the objects the traversal never reached.
    pub unvisited: Vec<String>,
}

/// Checks and repairs every modified net, writing results back into the
/// design. Returns the number of nets left disconnected.
pub fn run(design: &mut Design, feedthrough_penalty: u32) -> usize {
    let _t = ScopedTimer::new("connectivity check");
    let modified: Vec<NetId> = (0..design.nets.len())
        .map(NetId::new)
        .filter(|&n| design.net(n).modified)
        .collect();
    let checks: Vec<NetCheck> = {
        let d: &Design = design;
        modified
            .par_iter()
            .map(|&n| check_net(d, n, feedthrough_penalty))
            .collect()
    };

    for c in checks {
        if !c.connected {
            log::error!(
                "net {} is disconnected; unvisited: {}",
                design.net(c.net).name,
                c.unvisited.join(", ")
            );
        }
        for m in c.markers {
            if !design.markers.iter().any(|o| o.same_site(&m)) {
                design.markers.push(m);
            }
        }
        let net = design.net_mut(c.net);
        net.figures = c.figures;
        net.disconnected = !c.connected;
        net.modified = false;
    }
    design.nets.iter().filter(|n| n.disconnected).count()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Obj {
    Fig(usize),
    Pin(usize),
}

struct NetGraph {
    objs: Vec<Obj>,
    adj: Vec<BTreeSet<usize>>,
    /// Nodes each object touches.
    nodes: Vec<BTreeSet<(u8, Point)>>,
}

/// Verifies one net against the design's current geometry.
pub fn check_net(design: &Design, id: NetId, feedthrough_penalty: u32) -> NetCheck {
    let tech = &design.tech;
    let net = design.net(id);

    let mut segs = Vec::new();
    let mut others = Vec::new();
    let mut skipped = Vec::new();
    for fig in &net.figures {
        match fig {
            ConnFig::Seg(s) if s.begin == s.end || !s.is_orthogonal() => {
                log::warn!("net {}: skipping degenerate wire {:?}", net.name, s);
                skipped.push(*fig);
            }
            ConnFig::Seg(s) => segs.push(*s),
            _ => others.push(*fig),
        }
    }
    let (merged, _) = merge_colinear(&segs);
    let mut figs: Vec<ConnFig> = merged.into_iter().map(ConnFig::Seg).collect();
    figs.extend(others.iter().filter(|f| !matches!(f, ConnFig::Patch(_))).copied());
    let patches: Vec<ConnFig> = others.into_iter().filter(|f| matches!(f, ConnFig::Patch(_))).collect();

    let pins: Vec<PinId> = design.terminal_pins(id);
    let mut result = NetCheck {
        net: id,
        figures: Vec::new(),
        markers: Vec::new(),
        connected: true,
        unvisited: Vec::new(),
    };
    if pins.len() < 2 {
        result.figures = figs;
        result.figures.extend(patches);
        result.figures.extend(skipped);
        return result;
    }

    let graph = build_graph(design, &figs, &pins);
    let visited = traverse(&graph, feedthrough_penalty);

    let unreached: Vec<usize> = (0..pins.len()).filter(|&p| !visited[figs.len() + p]).collect();
    if !unreached.is_empty() {
        result.connected = false;
        for &p in &unreached {
            let pin = design.pin(pins[p]);
            for ap in pin.access_points.iter().take(1) {
                result.markers.push(
                    Marker::new(RuleKind::Connectivity, ap.layer, Rect::from_point(ap.point))
                        .with_victim(Owner::Net(id))
                        .with_aggressor(Owner::Pin(pins[p])),
                );
            }
        }
        result.unvisited = graph
            .objs
            .iter()
            .enumerate()
            .filter(|(i, _)| !visited[*i])
            .map(|(_, o)| match o {
                Obj::Fig(f) => format!("{:?}", figs[*f]),
                Obj::Pin(p) => format!("pin {}", design.pin(pins[*p]).name),
            })
            .collect();
        result.figures = net.figures.clone();
        return result;
    }

    let (figures, markers) = repair(design, id, &figs, &pins, &graph, &visited);
    let live: BTreeSet<(u8, Point)> = figures.iter().flat_map(|f| centerline_nodes(tech, f)).collect();
    let kept: Vec<ConnFig> = patches
        .into_iter()
        .filter(|p| match p {
            ConnFig::Patch(patch) => {
                live.contains(&(patch.layer, patch.origin)) || on_live_wire(&figures, patch.layer, patch.origin)
            }
            _ => true,
        })
        .collect();
    result.figures = figures;
    result.figures.extend(kept);
    result.figures.extend(skipped);
    result.markers = markers;
    result
}

fn on_live_wire(figs: &[ConnFig], layer: u8, p: Point) -> bool {
    figs.iter().any(|f| matches!(f, ConnFig::Seg(s) if s.layer == layer && s.contains_inside(p)))
}

/// Nodes on the centerline of a figure: wire ends and both faces of a via.
fn centerline_nodes(tech: &Tech, fig: &ConnFig) -> Vec<(u8, Point)> {
    match fig {
        ConnFig::Seg(s) => vec![(s.layer, s.begin), (s.layer, s.end)],
        ConnFig::Via(v) => {
            let z = v.bottom_z(tech);
            vec![(z, v.origin), (z + 1, v.origin)]
        }
        ConnFig::Patch(p) => vec![(p.layer, p.origin)],
    }
}

fn build_graph(design: &Design, figs: &[ConnFig], pins: &[PinId]) -> NetGraph {
    let tech = &design.tech;
    let mut node_map: BTreeMap<(u8, Point), Vec<usize>> = BTreeMap::new();
    let mut objs: Vec<Obj> = (0..figs.len()).map(Obj::Fig).collect();
    objs.extend((0..pins.len()).map(Obj::Pin));

    for (i, f) in figs.iter().enumerate() {
        for node in centerline_nodes(tech, f) {
            node_map.entry(node).or_default().push(i);
        }
    }
    for pin in pins {
        for ap in &design.pin(*pin).access_points {
            node_map.entry((ap.layer, ap.point)).or_default();
        }
    }
    // Wires passing through a node mid-span touch it too.
    let keys: Vec<(u8, Point)> = node_map.keys().copied().collect();
    for (z, p) in &keys {
        for (i, f) in figs.iter().enumerate() {
            if let ConnFig::Seg(s) = f
                && s.layer == *z
                && s.contains_inside(*p)
                && let Some(v) = node_map.get_mut(&(*z, *p))
            {
                v.push(i);
            }
        }
    }

    let mut nodes: Vec<BTreeSet<(u8, Point)>> = vec![BTreeSet::new(); objs.len()];
    let mut adj: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); objs.len()];
    for (node, members) in &node_map {
        for (a, &i) in members.iter().enumerate() {
            nodes[i].insert(*node);
            for &j in &members[a + 1..] {
                if i != j {
                    adj[i].insert(j);
                    adj[j].insert(i);
                }
            }
        }
        let (z, p) = *node;
        for (k, pin) in pins.iter().enumerate() {
            if !design.pin(*pin).touches(p, z) {
                continue;
            }
            let owner = figs.len() + k;
            nodes[owner].insert(*node);
            for &i in members {
                if touches_pin_at(tech, &figs[i], z, p) {
                    adj[i].insert(owner);
                    adj[owner].insert(i);
                }
            }
        }
    }
    NetGraph { objs, adj, nodes }
}

/// A figure meets a pin at a node when it ends there with a hard stop, when
/// the via face there is marked connected, or when it runs through mid-span.
fn touches_pin_at(tech: &Tech, fig: &ConnFig, z: u8, p: Point) -> bool {
    match fig {
        ConnFig::Seg(s) => {
            (s.begin == p && s.style.begin.is_truncated())
                || (s.end == p && s.style.end.is_truncated())
                || s.contains_inside(p)
        }
        ConnFig::Via(v) => {
            let bottom = v.bottom_z(tech);
            (z == bottom && v.bottom_connected) || (z == bottom + 1 && v.top_connected)
        }
        ConnFig::Patch(_) => false,
    }
}

/// Greedy multi-target shortest-path walk from the first pin. Entering a pin
/// costs the feedthrough penalty on top of the unit step.
fn traverse(graph: &NetGraph, feedthrough_penalty: u32) -> Vec<bool> {
    let n = graph.objs.len();
    let is_pin = |i: usize| matches!(graph.objs[i], Obj::Pin(_));
    let mut visited = vec![false; n];
    let Some(first) = (0..n).find(|&i| is_pin(i)) else {
        return visited;
    };
    visited[first] = true;

    loop {
        let mut queue: PriorityQueue<usize, (Reverse<u32>, Reverse<usize>)> = PriorityQueue::new();
        let mut dist = vec![u32::MAX; n];
        let mut parent = vec![usize::MAX; n];
        for i in (0..n).filter(|&i| visited[i]) {
            dist[i] = 0;
            queue.push(i, (Reverse(0), Reverse(i)));
        }
        let mut reached = None;
        while let Some((i, (Reverse(d), _))) = queue.pop() {
            if is_pin(i) && !visited[i] {
                reached = Some(i);
                break;
            }
            for &j in &graph.adj[i] {
                let step = if is_pin(j) { 1 + feedthrough_penalty } else { 1 };
                let nd = d.saturating_add(step);
                if nd < dist[j] {
                    dist[j] = nd;
                    parent[j] = i;
                    queue.push(j, (Reverse(nd), Reverse(j)));
                }
            }
        }
        let Some(mut at) = reached else {
            return visited;
        };
        while !visited[at] {
            visited[at] = true;
            at = parent[at];
        }
        if (0..n).filter(|&i| is_pin(i)).all(|i| visited[i]) {
            return visited;
        }
    }
}

/// Keeps what the traversal used: unused figures go, wires are split where a
/// pin sits mid-span, and wire ends reaching past every used node are pulled
/// back to the last one.
fn repair(
    design: &Design,
    id: NetId,
    figs: &[ConnFig],
    pins: &[PinId],
    graph: &NetGraph,
    visited: &[bool],
) -> (Vec<ConnFig>, Vec<Marker>) {
    let tech = &design.tech;
    let mut markers = Vec::new();
    let mut out = Vec::new();
    let pin_aps: Vec<AccessPoint> = pins
        .iter()
        .flat_map(|p| design.pin(*p).access_points.iter().copied())
        .collect();

    for (i, fig) in figs.iter().enumerate() {
        if !visited[i] {
            let layer = fig.shapes(tech).first().map_or(0, |(z, _)| *z);
            let bbox = fig.bbox(tech);
            markers.push(
                Marker::new(RuleKind::Connectivity, layer, bbox).with_victim(Owner::Net(id)),
            );
            continue;
        }
        let ConnFig::Seg(s) = fig else {
            out.push(*fig);
            continue;
        };

        // Extent confirmed by nodes shared with other used objects.
        let shared: Vec<i64> = graph.nodes[i]
            .iter()
            .filter(|node| node.0 == s.layer)
            .filter(|node| {
                graph.adj[i]
                    .iter()
                    .any(|&j| visited[j] && graph.nodes[j].contains(node))
            })
            .map(|(_, p)| if s.is_horizontal() { p.x } else { p.y })
            .collect();
        let mut seg = *s;
        if let (Some(&lo), Some(&hi)) = (shared.iter().min(), shared.iter().max())
            && lo < hi
            && (lo > s.low() || hi < s.high())
        {
            let before = seg.bbox();
            seg.set_span(lo, hi);
            if lo > s.low() {
                seg.style.begin = end_style_at(design, pins, &seg, seg.begin);
            }
            if hi < s.high() {
                seg.style.end = end_style_at(design, pins, &seg, seg.end);
            }
            log::debug!("net {}: shrinking wire {:?} to [{lo}, {hi}]", design.net(id).name, s);
            markers.push(Marker::new(RuleKind::Connectivity, s.layer, before).with_victim(Owner::Net(id)));
        }
        out.extend(split_at_pins(&seg, &pin_aps).into_iter().map(ConnFig::Seg));
    }
    (out, markers)
}

fn end_style_at(design: &Design, pins: &[PinId], seg: &PathSeg, p: Point) -> EndStyle {
    if pins.iter().any(|pin| design.pin(*pin).touches(p, seg.layer)) {
        EndStyle::Truncate
    } else {
        EndStyle::Extend(seg.style.width / 2)
    }
}

/// Splits a wire at every access point strictly inside its span, each half
/// ending on the pin with a hard stop.
fn split_at_pins(seg: &PathSeg, aps: &[AccessPoint]) -> Vec<PathSeg> {
    let mut cuts: Vec<i64> = aps
        .iter()
        .filter(|ap| ap.layer == seg.layer && seg.contains_inside(ap.point))
        .map(|ap| if seg.is_horizontal() { ap.point.x } else { ap.point.y })
        .collect();
    if cuts.is_empty() {
        return vec![*seg];
    }
    cuts.sort_unstable();
    cuts.dedup();
    let mut bounds = vec![seg.low()];
    bounds.extend(cuts);
    bounds.push(seg.high());
    bounds
        .windows(2)
        .map(|w| {
            let mut piece = *seg;
            piece.set_span(w[0], w[1]);
            if w[0] != seg.low() {
                piece.style.begin = EndStyle::Truncate;
            }
            if w[1] != seg.high() {
                piece.style.end = EndStyle::Truncate;
            }
            piece
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use eda_common::db::core::PinKind;
    use eda_common::db::figure::{SegStyle, Via};
    use eda_common::geom::point::Coord;

    fn design(pins: &[Point]) -> Design {
        let mut d = Design::new("c", Tech::standard(2, 200, 100, 100), Rect::from_coords(0, 0, 4000, 4000), 2000);
        let n = d.add_net("n0");
        for (i, &p) in pins.iter().enumerate() {
            d.add_pin(
                n,
                &format!("p{i}"),
                PinKind::InstTerm,
                vec![AccessPoint { point: p, layer: 0 }],
                vec![(0, Rect::from_point(p).bloat(50))],
            );
        }
        d
    }

    fn wire(x0: Coord, x1: Coord, truncate_begin: bool, truncate_end: bool) -> ConnFig {
        let mut style = SegStyle::extended(100);
        if truncate_begin {
            style.begin = EndStyle::Truncate;
        }
        if truncate_end {
            style.end = EndStyle::Truncate;
        }
        ConnFig::Seg(PathSeg::new(0, Point::new(x0, 100), Point::new(x1, 100), style))
    }

    #[test]
    fn duplicate_wire_collapses_without_markers() {
        let d = {
            let mut d = design(&[Point::new(0, 100), Point::new(1000, 100)]);
            d.net_mut(NetId(0)).figures = vec![wire(0, 1000, true, true), wire(200, 800, false, false)];
            d
        };
        let c = check_net(&d, NetId(0), 5);
        assert!(c.connected);
        assert!(c.markers.is_empty(), "{:?}", c.markers);
        assert_eq!(c.figures, vec![wire(0, 1000, true, true)]);
    }

    #[test]
    fn gap_leaves_net_disconnected_with_marker_at_pin() {
        let mut d = design(&[Point::new(0, 100), Point::new(1000, 100)]);
        let figs = vec![wire(0, 400, true, false), wire(600, 1000, false, true)];
        d.net_mut(NetId(0)).figures = figs.clone();
        let c = check_net(&d, NetId(0), 5);
        assert!(!c.connected);
        assert_eq!(c.figures, figs);
        assert_eq!(c.markers.len(), 1);
        assert_eq!(c.markers[0].rule, RuleKind::Connectivity);
        assert_eq!(c.markers[0].bbox, Rect::from_point(Point::new(1000, 100)));
        assert!(c.unvisited.iter().any(|u| u == "pin p1"));
    }

    #[test]
    fn extended_end_does_not_reach_pin() {
        let mut d = design(&[Point::new(0, 100), Point::new(1000, 100)]);
        d.net_mut(NetId(0)).figures = vec![wire(0, 1000, true, false)];
        assert!(!check_net(&d, NetId(0), 5).connected);
    }

    #[test]
    fn stray_stub_is_removed_with_marker() {
        let mut d = design(&[Point::new(0, 100), Point::new(1000, 100)]);
        let stub = ConnFig::Seg(PathSeg::new(0, Point::new(2000, 900), Point::new(2400, 900), SegStyle::extended(100)));
        d.net_mut(NetId(0)).figures = vec![wire(0, 1000, true, true), stub];
        let c = check_net(&d, NetId(0), 5);
        assert!(c.connected);
        assert_eq!(c.figures, vec![wire(0, 1000, true, true)]);
        assert_eq!(c.markers.len(), 1);
    }

    #[test]
    fn wire_through_middle_pin_is_split() {
        let mut d = design(&[Point::new(0, 100), Point::new(500, 100), Point::new(1000, 100)]);
        d.net_mut(NetId(0)).figures = vec![wire(0, 1000, true, true)];
        let c = check_net(&d, NetId(0), 5);
        assert!(c.connected);
        assert_eq!(c.figures, vec![wire(0, 500, true, true), wire(500, 1000, true, true)]);
    }

    #[test]
    fn dangling_end_is_pulled_back_to_the_via() {
        let mut d = design(&[Point::new(0, 100), Point::new(1000, 1100)]);
        let tech = d.tech.clone();
        let def = tech.default_via_id(0).expect("via");
        let mut down = Via::new(def, Point::new(1000, 1100));
        down.bottom_connected = true;
        let mut up = Via::new(def, Point::new(600, 100));
        up.bottom_connected = false;
        let riser = ConnFig::Seg(PathSeg::new(1, Point::new(600, 100), Point::new(600, 1100), SegStyle::extended(100)));
        let top = ConnFig::Seg(PathSeg::new(1, Point::new(600, 1100), Point::new(1000, 1100), SegStyle::extended(100)));
        d.net_mut(NetId(0)).figures = vec![wire(0, 900, true, false), ConnFig::Via(up), riser, top, ConnFig::Via(down)];
        let c = check_net(&d, NetId(0), 5);
        assert!(c.connected, "{:?}", c.unvisited);
        assert!(c.figures.contains(&wire(0, 600, true, false)), "{:?}", c.figures);
        assert_eq!(c.markers.len(), 1);
    }

    #[test]
    fn run_flags_and_clears_modified() {
        let mut d = design(&[Point::new(0, 100), Point::new(1000, 100)]);
        d.net_mut(NetId(0)).figures = vec![wire(0, 400, true, false)];
        d.net_mut(NetId(0)).modified = true;
        assert_eq!(run(&mut d, 5), 1);
        assert!(d.net(NetId(0)).disconnected);
        assert!(!d.net(NetId(0)).modified);
        assert_eq!(d.markers.len(), 1);
    }
}
