use eda_common::db::figure::{EndStyle, PathSeg};
use eda_common::geom::point::Coord;
use std::collections::BTreeMap;

/// Wires sharing a layer, direction, track and width.
type TrackKey = (u8, bool, Coord, Coord);

/// Collapses overlapping wires on the same track into one wire per maximal
/// covered span. Wires that only abut stay separate. Returns the merged
/// wires and whether anything changed.
pub fn merge_colinear(segs: &[PathSeg]) -> (Vec<PathSeg>, bool) {
    let mut tracks: BTreeMap<TrackKey, Vec<PathSeg>> = BTreeMap::new();
    for s in segs {
        tracks
            .entry((s.layer, s.is_horizontal(), s.track(), s.style.width))
            .or_default()
            .push(*s);
    }

    let mut out = Vec::with_capacity(segs.len());
    let mut changed = false;
    for (_, mut run) in tracks {
        run.sort_by_key(|s| (s.low(), s.high()));
        let mut cluster: Vec<PathSeg> = Vec::new();
        let mut hi = Coord::MIN;
        for s in run {
            if !cluster.is_empty() && s.low() >= hi {
                changed |= cluster.len() > 1;
                out.push(fuse(&cluster));
                cluster.clear();
            }
            hi = if cluster.is_empty() { s.high() } else { hi.max(s.high()) };
            cluster.push(s);
        }
        if !cluster.is_empty() {
            changed |= cluster.len() > 1;
            out.push(fuse(&cluster));
        }
    }
    (out, changed)
}

/// One wire covering every member; each end keeps the style of the member
/// reaching furthest, preferring the longer extension on ties.
fn fuse(cluster: &[PathSeg]) -> PathSeg {
    let first = cluster[0];
    if cluster.len() == 1 {
        return first;
    }
    let lo = cluster.iter().map(|s| s.low()).min().unwrap_or(first.low());
    let hi = cluster.iter().map(|s| s.high()).max().unwrap_or(first.high());
    let begin = pick(cluster.iter().filter(|s| s.low() == lo).map(|s| s.style.begin));
    let end = pick(cluster.iter().filter(|s| s.high() == hi).map(|s| s.style.end));
    let mut fused = first;
    fused.set_span(lo, hi);
    fused.style.begin = begin;
    fused.style.end = end;
    fused.tapered = cluster.iter().all(|s| s.tapered);
    fused
}

fn pick(styles: impl Iterator<Item = EndStyle>) -> EndStyle {
    styles.max_by_key(|e| e.ext()).unwrap_or(EndStyle::Truncate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use eda_common::db::figure::SegStyle;
    use eda_common::geom::point::Point;
    use rstest::rstest;

    fn seg(x0: Coord, x1: Coord) -> PathSeg {
        PathSeg::new(0, Point::new(x0, 0), Point::new(x1, 0), SegStyle::extended(2))
    }

    #[test]
    fn overlapping_spans_become_one() {
        let (out, changed) = merge_colinear(&[seg(0, 10), seg(5, 15)]);
        assert!(changed);
        assert_eq!(out.len(), 1);
        assert_eq!((out[0].low(), out[0].high()), (0, 15));
        assert_eq!(out[0].style.begin, EndStyle::Extend(1));
        assert_eq!(out[0].style.end, EndStyle::Extend(1));
    }

    #[test]
    fn contained_duplicate_collapses() {
        let (out, changed) = merge_colinear(&[seg(0, 10), seg(2, 8)]);
        assert!(changed);
        assert_eq!(out, vec![seg(0, 10)]);
    }

    #[rstest]
    #[case::abutting(seg(0, 10), seg(10, 20))]
    #[case::disjoint(seg(0, 10), seg(12, 20))]
    #[case::other_track(seg(0, 10), PathSeg::new(0, Point::new(5, 4), Point::new(15, 4), SegStyle::extended(2)))]
    #[case::other_layer(seg(0, 10), PathSeg::new(1, Point::new(5, 0), Point::new(15, 0), SegStyle::extended(2)))]
    fn separate_wires_stay_apart(#[case] a: PathSeg, #[case] b: PathSeg) {
        let (out, changed) = merge_colinear(&[a, b]);
        assert!(!changed);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn truncated_end_survives_when_it_reaches_furthest() {
        let mut a = seg(0, 10);
        a.style.begin = EndStyle::Truncate;
        let (out, _) = merge_colinear(&[a, seg(3, 12)]);
        assert_eq!(out[0].style.begin, EndStyle::Truncate);
        assert_eq!(out[0].style.end, EndStyle::Extend(1));
    }
}
