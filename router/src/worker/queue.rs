use super::Worker;
use super::cost::{CostOp, add_marker_cost, mod_path_cost};
use crate::algo::astar::AStar;
use crate::detailed_router::strategy::RipupMode;
use crate::error::Result;
use crate::grid::RoutingGrid;
use eda_common::db::figure::ConnFig;
use eda_common::db::indices::ViaDefId;
use eda_common::db::marker::{Marker, Owner};
use std::cmp::Reverse;
use std::collections::{BTreeSet, VecDeque};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueEntry {
    /// Worker-local net index.
    pub net: usize,
    /// Reroute count of the net when the entry was queued; older entries are
    /// stale once the net has been rerouted again.
    pub token: u32,
    /// Reroute, or only re-check against the rules.
    pub route: bool,
}

#[derive(Debug, Default)]
pub struct RouteQueue {
    entries: VecDeque<QueueEntry>,
}

impl RouteQueue {
    pub fn push(&mut self, entry: QueueEntry) {
        self.entries.push_back(entry);
    }

    pub fn pop(&mut self) -> Option<QueueEntry> {
        self.entries.pop_front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Worker<'_> {
    pub(super) fn can_ripup(&self, n: usize) -> bool {
        let net = &self.nets[n];
        let data = self.design.net(net.id);
        let args = self.args();
        !data.is_fixed
            && !data.is_supply
            && net.num_reroutes < args.maze_end_iter
            && (args.ripup_mode != RipupMode::Incr || !data.has_initial_routing)
    }

    fn push_route(&mut self, n: usize) {
        if self.can_ripup(n) {
            let token = self.nets[n].num_reroutes;
            self.queue.push(QueueEntry {
                net: n,
                token,
                route: true,
            });
        }
    }

    fn push_check(&mut self, n: usize) {
        let token = self.nets[n].num_reroutes;
        self.queue.push(QueueEntry {
            net: n,
            token,
            route: false,
        });
    }

    pub(super) fn init_queue(&mut self) {
        match self.args().ripup_mode {
            RipupMode::All | RipupMode::Incr => {
                let mut order: Vec<usize> = (0..self.nets.len()).collect();
                order.sort_by_key(|&n| {
                    let net = &self.nets[n];
                    let data = self.design.net(net.id);
                    let area = net
                        .pins
                        .iter()
                        .filter_map(|p| p.aps.first())
                        .map(|ap| eda_common::geom::rect::Rect::from_point(ap.point))
                        .reduce(|a, b| a.merge(&b))
                        .map(|r| r.area())
                        .unwrap_or(0);
                    (Reverse(data.priority), net.pins.len(), area, net.id)
                });
                for n in order {
                    self.push_route(n);
                }
            }
            RipupMode::Drc => {
                for m in self.markers.clone() {
                    self.update_from_marker(&m, true);
                }
            }
            RipupMode::NearDrc => {
                let tech = &self.design.tech;
                let mut seen = BTreeSet::new();
                let mut order = Vec::new();
                for m in &self.markers {
                    let halo = if (m.layer as usize) < tech.num_layers() {
                        2 * tech.layer(m.layer).pitch
                    } else {
                        0
                    };
                    let near = m.bbox.bloat(halo);
                    for (n, net) in self.nets.iter().enumerate() {
                        let touches = net.figures.iter().any(|f| f.bbox(tech).intersects(&near))
                            || net.pins.iter().flat_map(|p| p.aps.iter()).any(|ap| near.contains(ap.point));
                        if touches && seen.insert(n) {
                            order.push(n);
                        }
                    }
                }
                for n in order {
                    self.push_route(n);
                }
            }
            RipupMode::ViaSwap => {}
        }
    }

    /// Queues the owners of a violation. A victim sharing the violation with
    /// other nets is only re-checked until its avoid budget runs out.
    pub(super) fn update_from_marker(&mut self, marker: &Marker, checks_allowed: bool) {
        let mut owners: Vec<usize> = Vec::new();
        for n in marker
            .srcs()
            .iter()
            .filter_map(|o| o.net())
            .filter_map(|id| self.net_index.get(&id).copied())
        {
            if !owners.contains(&n) {
                owners.push(n);
            }
        }
        if owners.len() == 1 {
            self.push_route(owners[0]);
            return;
        }
        let mut checks = Vec::new();
        for n in owners {
            let victim = marker.victims.contains(&Owner::Net(self.nets[n].id));
            if checks_allowed && victim && self.nets[n].n_ripup_avoids < self.cfg.max_ripup_avoids {
                self.nets[n].n_ripup_avoids += 1;
                checks.push(n);
            } else {
                self.push_route(n);
            }
        }
        for n in checks {
            self.push_check(n);
        }
    }

    pub(super) fn drain_queue(&mut self, astar: &mut AStar) -> Result<()> {
        while let Some(entry) = self.queue.pop() {
            let n = entry.net;
            if entry.token != self.nets[n].num_reroutes {
                continue;
            }
            if entry.route {
                if !self.can_ripup(n) {
                    continue;
                }
                self.route_net(n, astar)?;
            }
            let id = self.nets[n].id;
            let found = self.run_drc(Some(id));
            self.markers.retain(|m| !m.involves_net(id));
            let tech = &self.design.tech;
            for m in &found {
                add_marker_cost(&mut self.grid, tech, m);
            }
            for m in &found {
                self.update_from_marker(m, entry.route);
            }
            self.markers.extend(found);
            if entry.route {
                let decay = self.args().marker_decay;
                self.grid.decay_history(decay);
            }
        }
        Ok(())
    }

    /// Tries the other via definitions of every via under a violation and
    /// keeps the one with the fewest violations. A via that no alternative
    /// improves falls back to the default definition.
    pub(super) fn via_swap(&mut self) {
        let design = self.design;
        let tech = &design.tech;
        let markers = self.markers.clone();
        for n in 0..self.nets.len() {
            if !self.can_ripup(n) {
                continue;
            }
            let id = self.nets[n].id;
            for f in 0..self.nets[n].figures.len() {
                let ConnFig::Via(via) = self.nets[n].figures[f] else {
                    continue;
                };
                let bbox = ConnFig::Via(via).bbox(tech);
                if !markers.iter().any(|m| m.bbox.intersects(&bbox)) {
                    continue;
                }
                let cut_z = via.bottom_z(tech);
                let alternatives: Vec<ViaDefId> = (0..tech.vias.len())
                    .map(ViaDefId::new)
                    .filter(|d| *d != via.def && tech.via(*d).cut_z == cut_z)
                    .collect();
                let mut best = (self.run_drc(Some(id)).len(), via.def);
                for (tries, &alt) in alternatives.iter().enumerate() {
                    if tries as u32 >= self.args().maze_end_iter {
                        break;
                    }
                    self.replace_via_def(n, f, alt);
                    let count = self.run_drc(Some(id)).len();
                    if count < best.0 {
                        best = (count, alt);
                    }
                }
                let chosen = if best.1 == via.def && best.0 > 0 {
                    tech.default_via_id(cut_z).unwrap_or(via.def)
                } else {
                    best.1
                };
                self.replace_via_def(n, f, chosen);
                if chosen != via.def {
                    self.nets[n].num_reroutes += 1;
                }
            }
        }
    }

    fn replace_via_def(&mut self, n: usize, f: usize, def: ViaDefId) {
        let tech = &self.design.tech;
        let ndr = self.ndr(n);
        let old = self.nets[n].figures[f];
        let ConnFig::Via(mut via) = old else {
            return;
        };
        if via.def == def {
            return;
        }
        mod_path_cost(&mut self.grid, tech, &old, ndr, CostOp::SubRouteShape, true, true);
        via.def = def;
        let new = ConnFig::Via(via);
        mod_path_cost(&mut self.grid, tech, &new, ndr, CostOp::AddRouteShape, true, true);
        self.nets[n].figures[f] = new;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_is_fifo() {
        let mut q = RouteQueue::default();
        for net in 0..3 {
            q.push(QueueEntry {
                net,
                token: 0,
                route: true,
            });
        }
        assert_eq!(q.len(), 3);
        assert_eq!(q.pop().map(|e| e.net), Some(0));
        assert_eq!(q.pop().map(|e| e.net), Some(1));
        assert_eq!(q.pop().map(|e| e.net), Some(2));
        assert!(q.is_empty());
    }
}
