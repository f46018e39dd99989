use eda_common::db::core::{AccessPoint, Design, Guide, PinKind};
use eda_common::db::figure::ConnFig;
use eda_common::db::indices::NetId;
use eda_common::db::marker::RuleKind;
use eda_common::db::tech::Tech;
use eda_common::geom::point::Point;
use eda_common::geom::rect::Rect;
use eda_common::util::config::{DetailedRoutingConfig, GeneratorConfig};
use eda_common::util::generator::generate_design;
use eda_router::detailed_router::metrics::VecSink;
use eda_router::detailed_router::strategy::default_strategies;
use eda_router::detailed_router::tiles::{check_batch_isolation, make_batches, make_tiles};
use eda_router::error::RouteError;
use eda_router::{route, route_with};

fn empty_design(layers: usize) -> Design {
    let mut d = Design::new("scenario", Tech::standard(layers, 200, 100, 100), Rect::from_coords(0, 0, 4000, 4000), 2000);
    d.add_uniform_tracks(100);
    d
}

fn add_pin(d: &mut Design, net: NetId, name: &str, p: Point) {
    d.add_pin(
        net,
        name,
        PinKind::InstTerm,
        vec![AccessPoint { point: p, layer: 0 }],
        vec![(0, Rect::from_point(p).bloat(50))],
    );
}

/// Pins reachable from the first pin through overlapping metal of the net,
/// computed without the router's own connectivity graph.
fn reached_pins(d: &Design, id: NetId) -> usize {
    let net = d.net(id);
    let mut shapes: Vec<(u8, Rect)> = net.figures.iter().flat_map(|f| f.shapes(&d.tech)).collect();
    let first_pin = shapes.len();
    for &p in &net.pins {
        shapes.push(d.pin(p).shapes[0]);
    }
    let mut seen = vec![false; shapes.len()];
    let mut stack = vec![first_pin];
    seen[first_pin] = true;
    while let Some(i) = stack.pop() {
        let (li, ri) = shapes[i];
        for (j, &(lj, rj)) in shapes.iter().enumerate() {
            let via_pair = i < first_pin && j < first_pin && same_via(net.figures.as_slice(), d, i, j);
            if !seen[j] && ((li == lj && ri.intersects(&rj)) || via_pair) {
                seen[j] = true;
                stack.push(j);
            }
        }
    }
    seen[first_pin..].iter().filter(|s| **s).count()
}

/// Whether shapes `i` and `j` are the two pads of one via.
fn same_via(figs: &[ConnFig], d: &Design, i: usize, j: usize) -> bool {
    let mut k = 0;
    for f in figs {
        let n = f.shapes(&d.tech).len();
        if i >= k && i < k + n && j >= k && j < k + n {
            return matches!(f, ConnFig::Via(_));
        }
        k += n;
    }
    false
}

#[test]
fn straight_two_pin_net_routes_without_markers() {
    let mut d = empty_design(3);
    let n = d.add_net("n0");
    add_pin(&mut d, n, "a", Point::new(100, 100));
    add_pin(&mut d, n, "b", Point::new(2100, 100));

    let cfg = DetailedRoutingConfig::default();
    let mut sink = VecSink::default();
    let summary = route_with(&mut d, &cfg, &mut sink, None).expect("routed");

    assert_eq!(summary.violations, 0);
    assert_eq!(summary.iterations, 1);
    assert!(d.markers.is_empty(), "{:?}", d.markers);
    let figs = &d.net(n).figures;
    assert_eq!(figs.len(), 1, "{figs:?}");
    let ConnFig::Seg(s) = figs[0] else {
        panic!("expected a wire, got {:?}", figs[0]);
    };
    assert_eq!(s.layer, 0);
    assert_eq!((s.begin, s.end), (Point::new(100, 100), Point::new(2100, 100)));
    assert_eq!(sink.records.len(), 1);
    assert_eq!(sink.last.as_ref().map(|m| (m.drc_count, m.wirelength)), Some((0, 2000)));
}

#[test]
fn walled_in_pin_aborts_with_pin_and_sources() {
    let mut d = empty_design(2);
    let n = d.add_net("n0");
    add_pin(&mut d, n, "a", Point::new(300, 300));
    add_pin(&mut d, n, "b", Point::new(2100, 2100));
    for z in 0..2 {
        d.add_obstruction(z, Rect::from_coords(1700, 1700, 2500, 1700), true);
        d.add_obstruction(z, Rect::from_coords(1700, 2500, 2500, 2500), true);
        d.add_obstruction(z, Rect::from_coords(1700, 1700, 1700, 2500), true);
        d.add_obstruction(z, Rect::from_coords(2500, 1700, 2500, 2500), true);
    }

    let err = route(&mut d, &DetailedRoutingConfig::default()).expect_err("no path into the ring");
    match &err {
        RouteError::SearchFailed { net, pin, sources, .. } => {
            assert_eq!(net, "n0");
            assert_eq!(pin, "b");
            assert!(sources.contains(&(Point::new(300, 300), 0)), "{sources:?}");
        }
        other => panic!("unexpected error {other}"),
    }
    let msg = err.to_string();
    assert!(msg.contains("'b'") && msg.contains("(300, 300)@z0"), "{msg}");
}

#[test]
fn unfixable_violation_stops_at_iteration_limit() {
    let mut d = empty_design(3);
    let n = d.add_net("n0");
    add_pin(&mut d, n, "a", Point::new(300, 300));
    add_pin(&mut d, n, "b", Point::new(2100, 300));
    d.add_obstruction(0, Rect::from_coords(1900, 100, 2300, 500), false);

    let cfg = DetailedRoutingConfig {
        end_iteration: 5,
        ..Default::default()
    };
    let mut sink = VecSink::default();
    let summary = route_with(&mut d, &cfg, &mut sink, None).expect("connected");

    assert_eq!(summary.iterations, 5);
    assert!(summary.violations > 0);
    assert!(d.markers.iter().any(|m| m.rule == RuleKind::Short));
    assert_eq!(sink.records.len(), 5);
}

#[test]
fn optimization_batches_never_touch() {
    let cfg = DetailedRoutingConfig::default();
    let d = Design::new("big", Tech::standard(2, 200, 100, 100), Rect::from_coords(0, 0, 80_000, 80_000), 2000);
    for args in default_strategies(&cfg) {
        let tiles = make_tiles(&d, args.size, args.offset);
        for batch in make_batches(&tiles, cfg.batch_size) {
            let boxes: Vec<Rect> = batch.iter().map(|&i| tiles[i].route_box).collect();
            assert_eq!(
                check_batch_isolation(&boxes, cfg.mt_safe_dist),
                Ok(()),
                "size {} offset {}",
                args.size,
                args.offset
            );
        }
    }
}

#[test]
fn connected_nets_reach_every_pin() {
    let gen_cfg = GeneratorConfig {
        gcells: 4,
        layers: 3,
        seed: 7,
        ..Default::default()
    };
    let mut d = generate_design(&gen_cfg, 6);
    let cfg = DetailedRoutingConfig {
        end_iteration: 8,
        ..Default::default()
    };
    // Leftover disconnections surface as an error; the property only covers
    // nets the verifier accepted.
    match route(&mut d, &cfg) {
        Ok(_) | Err(RouteError::Connectivity { .. }) => {}
        Err(e) => panic!("routing failed: {e}"),
    }

    for (i, net) in d.nets.iter().enumerate() {
        if net.pins.len() < 2 || net.disconnected {
            continue;
        }
        assert_eq!(reached_pins(&d, NetId::new(i)), net.pins.len(), "net {}", net.name);
    }
    assert!(d.nets.iter().any(|n| !n.disconnected && !n.figures.is_empty()));
}

#[test]
fn max_spacing_pass_waits_for_initial_routing() {
    let mut d = Design::new("wide", Tech::standard(3, 200, 100, 100), Rect::from_coords(0, 0, 32_000, 4000), 2000);
    d.add_uniform_tracks(100);
    d.tech.cut_layers[0].max_spacing = Some(5000);
    let n = d.add_net("n0");
    add_pin(&mut d, n, "a", Point::new(1100, 100));
    add_pin(&mut d, n, "b", Point::new(30_100, 100));
    let guides: Vec<Guide> = (0..3).map(|layer| Guide { layer, rect: d.die }).collect();
    d.net_mut(n).orig_guides = guides.clone();
    d.net_mut(n).guides = guides;

    let mut sink = VecSink::default();
    let summary = route_with(&mut d, &DetailedRoutingConfig::default(), &mut sink, None).expect("routed");

    assert!(!d.net(n).figures.is_empty());
    assert!(!d.net(n).disconnected);
    assert_eq!(reached_pins(&d, n), 2);
    // One routing iteration, then the lonely-via pass.
    assert!(summary.iterations >= 2, "{summary:?}");
    assert_eq!(sink.records.len(), summary.iterations);
}

#[test]
fn untouched_multi_pin_net_is_reported() {
    let mut d = empty_design(3);
    let routed = d.add_net("routed");
    add_pin(&mut d, routed, "a", Point::new(100, 100));
    add_pin(&mut d, routed, "b", Point::new(2100, 100));
    let stray = d.add_net("stray");
    add_pin(&mut d, stray, "c", Point::new(100, 3100));
    add_pin(&mut d, stray, "d", Point::new(3100, 3100));
    d.net_mut(stray).is_supply = true;

    match route(&mut d, &DetailedRoutingConfig::default()) {
        Err(RouteError::Connectivity { nets }) => assert_eq!(nets, vec!["stray".to_string()]),
        other => panic!("expected a connectivity error, got {other:?}"),
    }
    assert!(d.net(stray).disconnected);
    assert!(!d.net(routed).disconnected);
}
