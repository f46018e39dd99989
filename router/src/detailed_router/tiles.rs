use eda_common::db::core::Design;
use eda_common::geom::point::Coord;
use eda_common::geom::rect::Rect;

/// One route box of an iteration, aligned to the gcell grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tile {
    pub x_idx: u32,
    pub y_idx: u32,
    pub route_box: Rect,
}

impl Tile {
    pub fn ext_box(&self, mt_safe_dist: Coord) -> Rect {
        self.route_box.bloat(mt_safe_dist)
    }

    pub fn drc_box(&self, drc_safe_dist: Coord) -> Rect {
        self.route_box.bloat(drc_safe_dist)
    }

    pub fn batch_key(&self) -> u32 {
        (self.x_idx % 2) * 2 + self.y_idx % 2
    }
}

/// Gcell index boundaries of tiles `size` gcells wide, starting `offset`
/// gcells before the origin so the tiling shifts between iterations.
fn cuts(n: u32, size: u32, offset: i32) -> Vec<u32> {
    let size = size.max(1) as i64;
    let mut out = vec![0u32];
    let mut at = offset as i64 + size;
    while at < n as i64 {
        if at > 0 {
            out.push(at as u32);
        }
        at += size;
    }
    out.push(n);
    out.dedup();
    out
}

/// Tiles covering the die, row-major from the lower left.
pub fn make_tiles(design: &Design, size: u32, offset: i32) -> Vec<Tile> {
    let g = &design.gcell;
    let xs = cuts(g.nx, size, offset);
    let ys = cuts(g.ny, size, offset);
    let mut tiles = Vec::with_capacity((xs.len() - 1) * (ys.len() - 1));
    for (yi, yw) in ys.windows(2).enumerate() {
        for (xi, xw) in xs.windows(2).enumerate() {
            let lo = g.cell_box(xw[0], yw[0]).min;
            let hi = g.cell_box(xw[1] - 1, yw[1] - 1).max;
            let route_box = Rect::new(lo, hi);
            let Some(route_box) = route_box.intersection(&design.die) else {
                continue;
            };
            tiles.push(Tile {
                x_idx: xi as u32,
                y_idx: yi as u32,
                route_box,
            });
        }
    }
    tiles
}

/// Groups tiles by index parity so no two tiles of a batch touch, then caps
/// each batch at `batch_size` tiles.
pub fn make_batches(tiles: &[Tile], batch_size: usize) -> Vec<Vec<usize>> {
    let mut groups: [Vec<usize>; 4] = Default::default();
    for (i, t) in tiles.iter().enumerate() {
        groups[t.batch_key() as usize].push(i);
    }
    groups
        .into_iter()
        .filter(|g| !g.is_empty())
        .flat_map(|g| g.chunks(batch_size.max(1)).map(<[usize]>::to_vec).collect::<Vec<_>>())
        .collect()
}

/// No tile's halo reaches another tile's route box. Workers write only inside
/// their route box and read their halo, so this keeps a batch's results
/// independent of each other.
pub fn check_batch_isolation(boxes: &[Rect], safe_dist: Coord) -> Result<(), (usize, usize)> {
    for (i, a) in boxes.iter().enumerate() {
        let halo = a.bloat(safe_dist);
        for (j, b) in boxes.iter().enumerate().skip(i + 1) {
            if halo.intersects(b) || b.bloat(safe_dist).intersects(a) {
                return Err((i, j));
            }
        }
    }
    Ok(())
}

/// First-fit packing of arbitrary boxes into batches that pass
/// [`check_batch_isolation`]. Returns indices into `boxes`.
pub fn pack_isolated(boxes: &[Rect], batch_size: usize, safe_dist: Coord) -> Vec<Vec<usize>> {
    let mut batches: Vec<Vec<usize>> = Vec::new();
    for (i, b) in boxes.iter().enumerate() {
        let slot = batches.iter().position(|batch| {
            batch.len() < batch_size.max(1)
                && batch
                    .iter()
                    .all(|&j| check_batch_isolation(&[boxes[j], *b], safe_dist).is_ok())
        });
        match slot {
            Some(s) => batches[s].push(i),
            None => batches.push(vec![i]),
        }
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use eda_common::db::tech::Tech;
    use rstest::rstest;

    fn design(gcells: Coord) -> Design {
        Design::new("t", Tech::standard(2, 200, 100, 100), Rect::from_coords(0, 0, gcells * 1000, gcells * 1000), 1000)
    }

    #[rstest]
    #[case(10, 3, 0, vec![0, 3, 6, 9, 10])]
    #[case(10, 3, -2, vec![0, 1, 4, 7, 10])]
    #[case(10, 20, 0, vec![0, 10])]
    #[case(4, 7, -5, vec![0, 2, 4])]
    fn cut_positions(#[case] n: u32, #[case] size: u32, #[case] offset: i32, #[case] expected: Vec<u32>) {
        assert_eq!(cuts(n, size, offset), expected);
    }

    #[test]
    fn tiles_cover_die_without_overlap() {
        let d = design(10);
        let tiles = make_tiles(&d, 3, -1);
        let area: i64 = tiles.iter().map(|t| t.route_box.area()).sum();
        assert_eq!(area, d.die.area());
        for (i, a) in tiles.iter().enumerate() {
            for b in &tiles[i + 1..] {
                assert!(!a.route_box.overlaps(&b.route_box));
            }
        }
    }

    #[test]
    fn batches_are_isolated_when_tiles_outsize_the_halo() {
        let d = design(30);
        let tiles = make_tiles(&d, 7, 0);
        for batch in make_batches(&tiles, 1024) {
            let boxes: Vec<Rect> = batch.iter().map(|&i| tiles[i].route_box).collect();
            assert_eq!(check_batch_isolation(&boxes, 2000), Ok(()));
        }
    }

    #[test]
    fn small_tiles_fail_isolation() {
        let d = design(10);
        let tiles = make_tiles(&d, 1, 0);
        let batches = make_batches(&tiles, 1024);
        let boxes: Vec<Rect> = batches[0].iter().map(|&i| tiles[i].route_box).collect();
        assert!(check_batch_isolation(&boxes, 2000).is_err());
    }

    #[test]
    fn packing_separates_neighbours() {
        let boxes = [
            Rect::from_coords(0, 0, 1000, 1000),
            Rect::from_coords(1500, 0, 2500, 1000),
            Rect::from_coords(9000, 9000, 10000, 10000),
        ];
        assert_eq!(pack_isolated(&boxes, 8, 2000), vec![vec![0, 2], vec![1]]);
        assert_eq!(pack_isolated(&boxes, 1, 2000).len(), 3);
    }

    #[test]
    fn batches_respect_size_cap() {
        let d = design(30);
        let tiles = make_tiles(&d, 3, 0);
        let batches = make_batches(&tiles, 5);
        assert!(batches.iter().all(|b| b.len() <= 5));
        assert_eq!(batches.iter().map(Vec::len).sum::<usize>(), tiles.len());
    }
}
