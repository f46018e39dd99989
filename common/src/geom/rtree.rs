use super::point::{Coord, Point};
use super::rect::Rect;
use rstar::{AABB, PointDistance, RTree, RTreeObject};

/// Per-layer R-tree mapping rectangles to owning objects.
pub struct SpatialIndex<T> {
    layers: Vec<RTree<IndexedRect<T>>>,
}

#[derive(Clone, Debug, PartialEq)]
struct IndexedRect<T> {
    rect: Rect,
    item: T,
}

impl<T> RTreeObject for IndexedRect<T> {
    type Envelope = AABB<[Coord; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(
            [self.rect.min.x, self.rect.min.y],
            [self.rect.max.x, self.rect.max.y],
        )
    }
}

impl<T> PointDistance for IndexedRect<T> {
    fn distance_2(&self, point: &[Coord; 2]) -> Coord {
        self.envelope().distance_2(point)
    }
}

impl<T: Clone + PartialEq> SpatialIndex<T> {
    pub fn new(num_layers: usize) -> Self {
        Self {
            layers: (0..num_layers).map(|_| RTree::new()).collect(),
        }
    }

    pub fn bulk_load(num_layers: usize, items: Vec<(u8, Rect, T)>) -> Self {
        let mut per_layer: Vec<Vec<IndexedRect<T>>> = (0..num_layers).map(|_| Vec::new()).collect();
        for (layer, rect, item) in items {
            if let Some(bucket) = per_layer.get_mut(layer as usize) {
                bucket.push(IndexedRect { rect, item });
            }
        }
        Self {
            layers: per_layer.into_iter().map(RTree::bulk_load).collect(),
        }
    }

    pub fn insert(&mut self, layer: u8, rect: Rect, item: T) {
        if let Some(tree) = self.layers.get_mut(layer as usize) {
            tree.insert(IndexedRect { rect, item });
        }
    }

    pub fn remove(&mut self, layer: u8, rect: Rect, item: &T) -> bool {
        match self.layers.get_mut(layer as usize) {
            Some(tree) => tree
                .remove(&IndexedRect {
                    rect,
                    item: item.clone(),
                })
                .is_some(),
            None => false,
        }
    }

    pub fn query(&self, rect: Rect, layer: u8) -> Vec<(Rect, T)> {
        let Some(tree) = self.layers.get(layer as usize) else {
            return Vec::new();
        };
        let aabb = AABB::from_corners([rect.min.x, rect.min.y], [rect.max.x, rect.max.y]);
        tree.locate_in_envelope_intersecting(&aabb)
            .map(|e| (e.rect, e.item.clone()))
            .collect()
    }

    /// Closest entry on `layer` within `max_dist` of `p` that `keep` accepts.
    pub fn nearest_within<F>(&self, p: Point, layer: u8, max_dist: Coord, keep: F) -> Option<(Rect, T)>
    where
        F: Fn(&T) -> bool,
    {
        let tree = self.layers.get(layer as usize)?;
        let limit = max_dist * max_dist;
        tree.nearest_neighbor_iter_with_distance_2(&[p.x, p.y])
            .take_while(|(_, d2)| *d2 <= limit)
            .find(|(e, _)| keep(&e.item))
            .map(|(e, _)| (e.rect, e.item.clone()))
    }

    pub fn len(&self) -> usize {
        self.layers.iter().map(|t| t.size()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_is_layer_scoped() {
        let mut idx = SpatialIndex::new(2);
        idx.insert(0, Rect::from_coords(0, 0, 10, 10), 1usize);
        idx.insert(1, Rect::from_coords(0, 0, 10, 10), 2usize);
        let hits = idx.query(Rect::from_coords(5, 5, 6, 6), 1);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].1, 2);
        assert!(idx.remove(1, Rect::from_coords(0, 0, 10, 10), &2));
        assert!(idx.query(Rect::from_coords(5, 5, 6, 6), 1).is_empty());
    }

    #[test]
    fn nearest_respects_radius_and_filter() {
        let mut idx = SpatialIndex::new(1);
        idx.insert(0, Rect::from_point(Point::new(0, 0)), 0usize);
        idx.insert(0, Rect::from_point(Point::new(30, 0)), 1usize);
        idx.insert(0, Rect::from_point(Point::new(100, 0)), 2usize);
        let hit = idx.nearest_within(Point::new(0, 0), 0, 50, |&i| i != 0);
        assert_eq!(hit.map(|h| h.1), Some(1));
        assert!(idx.nearest_within(Point::new(0, 0), 0, 20, |&i| i != 0).is_none());
    }
}
