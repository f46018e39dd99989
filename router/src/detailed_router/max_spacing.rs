use super::strategy::{RipupMode, SearchRepairArgs};
use super::tiles::pack_isolated;
use crate::worker::WorkItem;
use eda_common::db::core::Design;
use eda_common::db::figure::ConnFig;
use eda_common::db::indices::NetId;
use eda_common::geom::point::Point;
use eda_common::geom::rect::Rect;
use eda_common::geom::rtree::SpatialIndex;
use eda_common::util::config::DetailedRoutingConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LonelyVia {
    pub net: NetId,
    pub cut_z: u8,
    pub origin: Point,
}

/// Vias with no other cut on their cut layer within that layer's maximum
/// via spacing.
pub fn lonely_vias(design: &Design) -> Vec<LonelyVia> {
    let tech = &design.tech;
    let mut vias = Vec::new();
    for (i, net) in design.nets.iter().enumerate() {
        for fig in &net.figures {
            if let ConnFig::Via(v) = fig {
                vias.push((NetId::new(i), v.bottom_z(tech), v.origin, v.cut_box(tech)));
            }
        }
    }
    let index = SpatialIndex::bulk_load(
        tech.cut_layers.len(),
        vias.iter().enumerate().map(|(k, (_, z, _, cut))| (*z, *cut, k)).collect(),
    );
    vias.iter()
        .enumerate()
        .filter_map(|(k, &(net, cut_z, origin, _))| {
            let max = tech.cut(cut_z)?.max_spacing?;
            match index.nearest_within(origin, cut_z, max, |&other| other != k) {
                Some(_) => None,
                None => Some(LonelyVia { net, cut_z, origin }),
            }
        })
        .collect()
}

/// Work items around every lonely via, rerouting the owners of the
/// violations there, grouped into batches whose tiles stay isolated.
pub fn repair_batches(
    design: &Design,
    cfg: &DetailedRoutingConfig,
    lonely: &[LonelyVia],
    iter: usize,
    args: SearchRepairArgs,
) -> Vec<Vec<WorkItem>> {
    let g = &design.gcell;
    let mut boxes: Vec<Rect> = Vec::new();
    for v in lonely {
        let i = ((v.origin.x - g.origin.x) / g.step_x.max(1)).clamp(0, g.nx as i64 - 1) as u32;
        let j = ((v.origin.y - g.origin.y) / g.step_y.max(1)).clamp(0, g.ny as i64 - 1) as u32;
        let cell = g.cell_box(i, j);
        let Some(route_box) = cell.bloat(g.step_x.max(g.step_y)).intersection(&design.die) else {
            continue;
        };
        if !boxes.contains(&route_box) {
            boxes.push(route_box);
        }
    }

    let args = SearchRepairArgs {
        ripup_mode: RipupMode::Drc,
        ..args
    };
    pack_isolated(&boxes, cfg.batch_size, cfg.mt_safe_dist)
        .into_iter()
        .map(|batch| {
            batch
                .into_iter()
                .map(|k| WorkItem {
                    id: k,
                    iter,
                    route_box: boxes[k],
                    ext_box: boxes[k].bloat(cfg.mt_safe_dist),
                    drc_box: boxes[k].bloat(cfg.drc_safe_dist),
                    args,
                })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detailed_router::strategy::default_strategies;
    use crate::detailed_router::tiles::check_batch_isolation;
    use eda_common::db::figure::Via;
    use eda_common::db::tech::Tech;

    fn design(origins: &[Point]) -> Design {
        let mut tech = Tech::standard(3, 200, 100, 100);
        tech.cut_layers[0].max_spacing = Some(1000);
        let mut d = Design::new("ms", tech, Rect::from_coords(0, 0, 20000, 20000), 2000);
        let n = d.add_net("n");
        let def = d.tech.default_via_id(0).expect("via");
        for &o in origins {
            d.net_mut(n).figures.push(ConnFig::Via(Via::new(def, o)));
        }
        d
    }

    #[test]
    fn finds_only_isolated_cuts() {
        let d = design(&[Point::new(1000, 1000), Point::new(1500, 1000), Point::new(9000, 9000)]);
        let lonely = lonely_vias(&d);
        assert_eq!(lonely.len(), 1);
        assert_eq!(lonely[0].origin, Point::new(9000, 9000));
    }

    #[test]
    fn cut_layers_without_the_rule_are_ignored() {
        let mut d = design(&[]);
        d.tech.cut_layers[0].max_spacing = None;
        let def = d.tech.default_via_id(1).expect("via");
        d.net_mut(NetId(0)).figures.push(ConnFig::Via(Via::new(def, Point::new(100, 100))));
        assert!(lonely_vias(&d).is_empty());
    }

    #[test]
    fn repair_batches_keep_tiles_apart() {
        let d = design(&[Point::new(1000, 1000), Point::new(3000, 1000), Point::new(15000, 15000)]);
        let cfg = DetailedRoutingConfig::default();
        let lonely = lonely_vias(&d);
        assert_eq!(lonely.len(), 3);
        let batches = repair_batches(&d, &cfg, &lonely, 9, default_strategies(&cfg)[9]);
        assert_eq!(batches.iter().map(Vec::len).sum::<usize>(), 3);
        for b in &batches {
            let rects: Vec<Rect> = b.iter().map(|w| w.route_box).collect();
            assert!(check_batch_isolation(&rects, cfg.mt_safe_dist).is_ok());
            assert!(b.iter().all(|w| w.args.ripup_mode == RipupMode::Drc));
        }
        assert!(batches.len() >= 2);
    }
}
