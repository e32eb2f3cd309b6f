use std::cmp::Ordering;

use crate::buffer::PointStore;
use crate::sort::SortableList;

/// Marks a distance cache slot as not yet computed. Impossible as a true
/// squared distance.
const UNKNOWN: f32 = -1.0;

/// Depth-ordering adapter over a task's written point records.
///
/// Comparisons rank points farther from the reference first, giving the
/// back-to-front traversal that alpha blending needs. Squared distances are
/// computed lazily and cached per index so multi-pass sorts reuse them;
/// `update_origin` drops the whole cache. Single-writer only: not safe
/// against concurrent sorts.
#[derive(Clone)]
pub struct CloudList {
    points: PointStore,
    distances: Vec<f32>,
    origin_x: f32,
    origin_y: f32,
    origin_z: f32,
    compares: usize,
    swaps: usize,
}

impl CloudList {
    pub fn new(points: PointStore) -> Self {
        let len = points.lock().len();
        let mut list = Self {
            points,
            distances: vec![UNKNOWN; len],
            origin_x: 0.0,
            origin_y: 0.0,
            origin_z: 0.0,
            compares: 0,
            swaps: 0,
        };
        list.update_origin(0.0, 0.0, 0.0);
        list
    }

    /// Current virtual reference point.
    pub fn origin(&self) -> [f32; 3] {
        [self.origin_x, self.origin_y, self.origin_z]
    }

    /// Comparison and exchange counts since construction, for sort
    /// diagnostics.
    pub fn stats(&self) -> (usize, usize) {
        (self.compares, self.swaps)
    }

    /// Replace the reference point and invalidate every cached distance.
    /// Must only be called between sorts, never during one.
    pub fn update_origin(&mut self, x: f32, y: f32, z: f32) {
        self.origin_x = x;
        self.origin_y = y;
        self.origin_z = z;
        self.distances.fill(UNKNOWN);
    }

    fn calculate_distance(&self, i: usize) -> f32 {
        let points = self.points.lock();
        let point = points[i];

        // The reference sits far below the cloud layer, so the ranking is
        // dominated by height, then lateral spread.
        // TODO: use the origin fields once the render path passes a real
        // sort origin per frame.
        let x = point.x;
        let y = -100.0 - point.y;
        let z = point.z;

        x * x + y * y + z * z
    }

    fn cached_distance(&mut self, i: usize) -> f32 {
        let cached = self.distances[i];
        if cached != UNKNOWN {
            return cached;
        }
        let computed = self.calculate_distance(i);
        self.distances[i] = computed;
        computed
    }
}

impl SortableList for CloudList {
    fn len(&self) -> usize {
        self.distances.len()
    }

    fn compare(&mut self, i: usize, j: usize) -> Ordering {
        self.compares += 1;
        let dist_i = self.cached_distance(i);
        let dist_j = self.cached_distance(j);
        dist_j.total_cmp(&dist_i)
    }

    fn swap(&mut self, i: usize, j: usize) {
        self.swaps += 1;
        self.distances.swap(i, j);
        self.points.lock().swap(i, j);
    }
}
