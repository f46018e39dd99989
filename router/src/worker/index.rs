use eda_common::db::core::Design;
use eda_common::db::indices::{NetId, PinId};
use eda_common::geom::rect::Rect;
use eda_common::geom::rtree::SpatialIndex;
use std::collections::BTreeSet;

/// Region queries over the design, rebuilt whenever merged geometry changes.
pub struct DesignIndex {
    figs: SpatialIndex<NetId>,
    pins: SpatialIndex<PinId>,
    obstructions: SpatialIndex<u32>,
    guides: SpatialIndex<NetId>,
    num_layers: u8,
}

impl DesignIndex {
    pub fn build(design: &Design) -> Self {
        let tech = &design.tech;
        let num_layers = design.num_layers();
        let mut figs = Vec::new();
        let mut guides = Vec::new();
        for (i, net) in design.nets.iter().enumerate() {
            let id = NetId::new(i);
            for fig in &net.figures {
                for (layer, rect) in fig.shapes(tech) {
                    figs.push((layer, rect, id));
                }
            }
            for g in &net.guides {
                guides.push((g.layer, g.rect, id));
            }
        }
        let mut pins = Vec::new();
        for (i, pin) in design.pins.iter().enumerate() {
            let id = PinId::new(i);
            for (layer, rect) in &pin.shapes {
                pins.push((*layer, *rect, id));
            }
            for ap in &pin.access_points {
                pins.push((ap.layer, Rect::from_point(ap.point), id));
            }
        }
        let obstructions = design
            .obstructions
            .iter()
            .enumerate()
            .map(|(i, o)| (o.layer, o.rect, i as u32))
            .collect();
        Self {
            figs: SpatialIndex::bulk_load(num_layers, figs),
            pins: SpatialIndex::bulk_load(num_layers, pins),
            obstructions: SpatialIndex::bulk_load(num_layers, obstructions),
            guides: SpatialIndex::bulk_load(num_layers, guides),
            num_layers: num_layers as u8,
        }
    }

    fn collect<T: Clone + PartialEq + Ord>(&self, index: &SpatialIndex<T>, region: &Rect) -> BTreeSet<T> {
        (0..self.num_layers)
            .flat_map(|z| index.query(*region, z))
            .map(|(_, item)| item)
            .collect()
    }

    /// Nets with routed metal touching `region`.
    pub fn fig_nets(&self, region: &Rect) -> BTreeSet<NetId> {
        self.collect(&self.figs, region)
    }

    pub fn pins_in(&self, region: &Rect) -> BTreeSet<PinId> {
        self.collect(&self.pins, region)
    }

    pub fn obstructions_in(&self, region: &Rect) -> BTreeSet<u32> {
        self.collect(&self.obstructions, region)
    }

    pub fn guide_nets(&self, region: &Rect) -> BTreeSet<NetId> {
        self.collect(&self.guides, region)
    }
}
