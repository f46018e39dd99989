use crate::db::core::Design;
use crate::db::indices::NetId;
use crate::geom::rect::Rect;
use crate::geom::rtree::SpatialIndex;
use rayon::prelude::*;

/// Final sign-off before a routed design may be persisted.
pub fn run(db: &Design) -> Result<(), String> {
    log::info!("Starting Design Verification (shorts / opens)");

    let (shorts_result, opens_result) = rayon::join(|| check_shorts(db), || check_opens(db));

    let mut valid = true;
    let mut msgs = Vec::new();

    match shorts_result {
        Err(e) => {
            log::error!("\x1b[31mFAIL\x1b[0m: Short Circuits Detected");
            log::error!("{}", e);
            msgs.push(e);
            valid = false;
        }
        Ok(_) => log::info!("\x1b[32mPASS\x1b[0m: No shorts between nets."),
    }

    match opens_result {
        Err(e) => {
            log::error!("\x1b[31mFAIL\x1b[0m: Open Net (Disconnected) Detected");
            log::error!("{}", e);
            msgs.push(e);
            valid = false;
        }
        Ok(_) => log::info!("\x1b[32mPASS\x1b[0m: All nets are fully connected."),
    }

    if valid {
        log::info!("\x1b[32mSUCCESS\x1b[0m: ROUTING IS CLEAN");
        Ok(())
    } else {
        Err(msgs.join("; "))
    }
}

fn net_shapes(db: &Design, id: NetId) -> Vec<(u8, Rect)> {
    let net = db.net(id);
    let mut shapes: Vec<(u8, Rect)> = net
        .figures
        .iter()
        .flat_map(|f| f.shapes(&db.tech))
        .collect();
    for &pin in &net.pins {
        shapes.extend(db.pin(pin).shapes.iter().copied());
    }
    shapes
}

fn check_shorts(db: &Design) -> Result<(), String> {
    let items: Vec<(u8, Rect, u32)> = (0..db.num_nets())
        .flat_map(|i| {
            net_shapes(db, NetId::new(i))
                .into_iter()
                .map(move |(l, r)| (l, r, i as u32))
        })
        .collect();
    let index = SpatialIndex::bulk_load(db.num_layers(), items.clone());

    let shorts: Vec<String> = items
        .par_iter()
        .filter_map(|&(layer, rect, owner)| {
            index
                .query(rect, layer)
                .into_iter()
                .find(|(other, o)| *o > owner && other.overlaps(&rect))
                .map(|(other, o)| {
                    format!(
                        "'{}' x '{}' on {} at {:?}",
                        db.nets[owner as usize].name,
                        db.nets[o as usize].name,
                        db.tech.layer(layer).name,
                        rect.intersection(&other).unwrap_or(rect)
                    )
                })
        })
        .collect();

    if shorts.is_empty() {
        Ok(())
    } else {
        Err(format!("{} short(s): {}", shorts.len(), shorts.join(", ")))
    }
}

fn check_opens(db: &Design) -> Result<(), String> {
    let open: Vec<&str> = db
        .nets
        .par_iter()
        .enumerate()
        .filter(|(i, net)| {
            let terms = db.terminal_pins(NetId::new(*i)).len();
            net.disconnected || (terms >= 2 && net.figures.is_empty())
        })
        .map(|(_, net)| net.name.as_str())
        .collect();

    if open.is_empty() {
        Ok(())
    } else {
        Err(format!("{} open net(s): {}", open.len(), open.join(", ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::core::{AccessPoint, PinKind};
    use crate::db::figure::{ConnFig, PathSeg, SegStyle};
    use crate::db::tech::Tech;
    use crate::geom::point::Point;

    fn two_net_design() -> Design {
        let mut d = Design::new("chk", Tech::standard(2, 200, 100, 100), Rect::from_coords(0, 0, 4000, 4000), 2000);
        for name in ["a", "b"] {
            d.add_net(name);
        }
        d
    }

    #[test]
    fn overlapping_wires_of_two_nets_are_a_short() {
        let mut d = two_net_design();
        let seg = |y| ConnFig::Seg(PathSeg::new(0, Point::new(0, y), Point::new(1000, y), SegStyle::extended(100)));
        d.nets[0].figures.push(seg(0));
        d.nets[1].figures.push(seg(50));
        assert!(check_shorts(&d).is_err());
        d.nets[1].figures[0] = seg(400);
        assert!(check_shorts(&d).is_ok());
    }

    #[test]
    fn unrouted_multi_pin_net_is_open() {
        let mut d = two_net_design();
        let n = NetId::new(0);
        for x in [0, 1000] {
            d.add_pin(
                n,
                &format!("p{x}"),
                PinKind::BlockTerm,
                vec![AccessPoint {
                    point: Point::new(x, 0),
                    layer: 0,
                }],
                vec![],
            );
        }
        assert!(check_opens(&d).is_err());
        assert!(run(&d).is_err());
    }
}
