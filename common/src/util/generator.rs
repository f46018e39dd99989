use crate::db::core::{AccessPoint, Design, Guide, PinKind};
use crate::db::tech::{LayerDirection, Tech};
use crate::geom::point::{Coord, Point};
use crate::geom::rect::Rect;
use crate::util::config::GeneratorConfig;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;

/// Builds a seeded random benchmark: a square die of `cfg.gcells` gcells per
/// side, uniform tracks, and `num_nets` nets of 2-4 M1 pins each with
/// L-shaped guides on the first vertical and horizontal layers above M1.
pub fn generate_design(cfg: &GeneratorConfig, num_nets: usize) -> Design {
    let mut rng = StdRng::seed_from_u64(cfg.seed);

    let pitch = cfg.pitch.max(10);
    let width = pitch / 2;
    let layers = cfg.layers.max(2);
    let gcell_step = pitch * cfg.tracks_per_gcell.max(2);
    let side = gcell_step * cfg.gcells.max(1) as Coord;

    let tech = Tech::standard(layers, pitch, width, width);
    let die = Rect::from_coords(0, 0, side, side);
    let mut db = Design::new("random", tech, die, gcell_step);
    db.add_uniform_tracks(pitch / 2);

    log::info!(
        "Generating Benchmark: {} nets, {} layers, Die: {}x{} ({}x{} gcells)",
        num_nets,
        layers,
        side,
        side,
        db.gcell.nx,
        db.gcell.ny
    );

    let tracks = (side / pitch) as i64;
    let mut used: HashSet<(i64, i64)> = HashSet::new();
    let v_layer = (1..layers as u8)
        .find(|&z| db.tech.layer(z).direction == LayerDirection::Vertical)
        .unwrap_or(1);
    let h_layer = (1..layers as u8)
        .find(|&z| db.tech.layer(z).direction == LayerDirection::Horizontal)
        .unwrap_or(0);

    for n in 0..num_nets {
        let net = db.add_net(&format!("net{}", n));
        let num_pins = rng.gen_range(2..=4);
        let mut pts = Vec::new();
        let mut attempts = 0;
        while pts.len() < num_pins && attempts < 200 {
            attempts += 1;
            // keep one free track between pins of different nets
            let tx = rng.gen_range(1..tracks - 1);
            let ty = rng.gen_range(1..tracks - 1);
            if (-1..=1).any(|dx| (-1..=1).any(|dy| used.contains(&(tx + dx, ty + dy)))) {
                continue;
            }
            used.insert((tx, ty));
            pts.push(Point::new(pitch / 2 + tx * pitch, pitch / 2 + ty * pitch));
        }

        for (k, p) in pts.iter().enumerate() {
            let hw = width / 2;
            db.add_pin(
                net,
                &format!("net{}/p{}", n, k),
                PinKind::InstTerm,
                vec![AccessPoint { point: *p, layer: 0 }],
                vec![(0, Rect::from_coords(p.x - hw, p.y - hw, p.x + hw, p.y + hw))],
            );
        }

        let guides = star_guides(&db, &pts, v_layer, h_layer);
        let data = db.net_mut(net);
        data.orig_guides = guides.clone();
        data.guides = guides;
    }
    db
}

fn gcell_of(db: &Design, p: Point) -> (u32, u32) {
    let i = ((p.x - db.gcell.origin.x) / db.gcell.step_x).clamp(0, db.gcell.nx as Coord - 1);
    let j = ((p.y - db.gcell.origin.y) / db.gcell.step_y).clamp(0, db.gcell.ny as Coord - 1);
    (i as u32, j as u32)
}

fn span_box(db: &Design, a: (u32, u32), b: (u32, u32)) -> Rect {
    db.gcell_box(a.0.min(b.0), a.1.min(b.1))
        .merge(&db.gcell_box(a.0.max(b.0), a.1.max(b.1)))
}

fn star_guides(db: &Design, pts: &[Point], v_layer: u8, h_layer: u8) -> Vec<Guide> {
    let Some(&root) = pts.first() else {
        return Vec::new();
    };
    let r = gcell_of(db, root);
    let mut guides = Vec::new();
    for p in pts {
        let g = gcell_of(db, *p);
        for layer in 0..=v_layer.max(h_layer) {
            guides.push(Guide {
                layer,
                rect: db.gcell_box(g.0, g.1),
            });
        }
        if g == r {
            continue;
        }
        let corner = (g.0, r.1);
        guides.push(Guide {
            layer: h_layer,
            rect: span_box(db, r, corner),
        });
        guides.push(Guide {
            layer: v_layer,
            rect: span_box(db, corner, g),
        });
        for layer in [v_layer, h_layer] {
            guides.push(Guide {
                layer,
                rect: db.gcell_box(corner.0, corner.1),
            });
        }
    }
    guides
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_is_deterministic_per_seed() {
        let cfg = GeneratorConfig::default();
        let a = generate_design(&cfg, 12);
        let b = generate_design(&cfg, 12);
        assert_eq!(a.pins.len(), b.pins.len());
        for (pa, pb) in a.pins.iter().zip(&b.pins) {
            assert_eq!(pa.access_points, pb.access_points);
        }
    }

    #[test]
    fn every_net_has_pins_inside_guides() {
        let d = generate_design(&GeneratorConfig::default(), 20);
        for net in &d.nets {
            assert!(net.pins.len() >= 2);
            for &p in &net.pins {
                let ap = d.pin(p).access_points[0];
                assert!(d.die.contains(ap.point));
                assert!(net.guides.iter().any(|g| g.layer == 0 && g.rect.contains(ap.point)));
            }
        }
    }
}
