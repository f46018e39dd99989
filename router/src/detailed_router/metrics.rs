use eda_common::db::core::Design;
use eda_common::db::figure::ConnFig;
use eda_common::db::marker::RuleKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationMetrics {
    pub iter: usize,
    pub drc_count: usize,
    /// Total wire length in DBU.
    pub wirelength: i64,
    pub single_cut_vias: usize,
    pub multi_cut_vias: usize,
}

impl IterationMetrics {
    pub fn collect(design: &Design, iter: usize) -> Self {
        let mut m = Self {
            iter,
            drc_count: design.markers.len(),
            ..Default::default()
        };
        for fig in design.nets.iter().flat_map(|n| n.figures.iter()) {
            match fig {
                ConnFig::Seg(s) => m.wirelength += s.length(),
                ConnFig::Via(v) if design.tech.via(v.def).num_cuts > 1 => m.multi_cut_vias += 1,
                ConnFig::Via(_) => m.single_cut_vias += 1,
                ConnFig::Patch(_) => {}
            }
        }
        m
    }
}

/// Receives metrics after every iteration and once at the end of the run.
pub trait MetricsSink: Send {
    fn record(&mut self, metrics: &IterationMetrics);

    fn finish(&mut self, metrics: &IterationMetrics) {
        self.record(metrics);
    }
}

pub struct LogSink;

impl MetricsSink for LogSink {
    fn record(&mut self, m: &IterationMetrics) {
        log::info!(
            "Iter {} metrics: drc {}, wirelength {}, vias {} single-cut / {} multi-cut",
            m.iter,
            m.drc_count,
            m.wirelength,
            m.single_cut_vias,
            m.multi_cut_vias
        );
    }

    fn finish(&mut self, m: &IterationMetrics) {
        log::info!(
            "Final: drc {}, wirelength {}, vias {} single-cut / {} multi-cut",
            m.drc_count,
            m.wirelength,
            m.single_cut_vias,
            m.multi_cut_vias
        );
    }
}

/// Keeps every record, for callers that inspect the run afterwards.
#[derive(Debug, Default)]
pub struct VecSink {
    pub records: Vec<IterationMetrics>,
    pub last: Option<IterationMetrics>,
}

impl MetricsSink for VecSink {
    fn record(&mut self, m: &IterationMetrics) {
        self.records.push(m.clone());
    }

    fn finish(&mut self, m: &IterationMetrics) {
        self.last = Some(m.clone());
    }
}

/// Violation counts by rule and layer.
pub fn violation_report(design: &Design) -> BTreeMap<(RuleKind, u8), usize> {
    let mut out = BTreeMap::new();
    for m in &design.markers {
        *out.entry((m.rule, m.layer)).or_insert(0) += 1;
    }
    out
}

pub fn log_violation_report(design: &Design) {
    let report = violation_report(design);
    if report.is_empty() {
        return;
    }
    log::info!("  {:<12} {:>6} {:>8}", "rule", "layer", "count");
    for ((rule, layer), count) in report {
        log::info!("  {:<12} {:>6} {:>8}", rule.name(), layer, count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eda_common::db::figure::{PathSeg, SegStyle, Via};
    use eda_common::db::indices::NetId;
    use eda_common::db::marker::Marker;
    use eda_common::db::tech::Tech;
    use eda_common::geom::point::Point;
    use eda_common::geom::rect::Rect;

    #[test]
    fn counts_wire_and_via_kinds() {
        let mut d = Design::new("m", Tech::standard(3, 200, 100, 100), Rect::from_coords(0, 0, 4000, 4000), 2000);
        let n = d.add_net("n");
        let single = d.tech.default_via_id(0).expect("default via");
        let double = d.tech.multi_cut_via_id(1, 2).expect("2-cut via");
        let net = d.net_mut(n);
        net.figures.push(ConnFig::Seg(PathSeg::new(0, Point::new(0, 0), Point::new(500, 0), SegStyle::extended(100))));
        net.figures.push(ConnFig::Seg(PathSeg::new(1, Point::new(500, 0), Point::new(500, 300), SegStyle::extended(100))));
        net.figures.push(ConnFig::Via(Via::new(single, Point::new(500, 0))));
        net.figures.push(ConnFig::Via(Via::new(double, Point::new(500, 300))));
        d.markers.push(Marker::new(RuleKind::Short, 0, Rect::from_coords(0, 0, 1, 1)));
        d.markers.push(Marker::new(RuleKind::Short, 0, Rect::from_coords(5, 5, 6, 6)));
        d.markers.push(Marker::new(RuleKind::MinArea, 1, Rect::from_coords(5, 5, 6, 6)));

        let m = IterationMetrics::collect(&d, 3);
        assert_eq!(m.wirelength, 800);
        assert_eq!((m.single_cut_vias, m.multi_cut_vias), (1, 1));
        assert_eq!(m.drc_count, 3);
        let report = violation_report(&d);
        assert_eq!(report[&(RuleKind::Short, 0)], 2);
        assert_eq!(report[&(RuleKind::MinArea, 1)], 1);
        assert_eq!(d.net(NetId(0)).figures.len(), 4);
    }
}
