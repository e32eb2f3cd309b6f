//! Double-buffered cloud geometry storage.
//!
//! The front half is what the renderer draws, the back half is what the
//! running generation task writes. `swap` exchanges the two, publishing a
//! finished batch of geometry in one step.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use parking_lot::Mutex;

/// One cloud point as uploaded to the instance buffer.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct CloudPoint {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl CloudPoint {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// Shared handle to one half of the double buffer.
///
/// An ordering adapter built over the write half keeps addressing the same
/// records after the halves swap, so sorting reorders what is rendered.
pub type PointStore = Arc<Mutex<Vec<CloudPoint>>>;

struct Halves {
    front: PointStore,
    back: PointStore,
}

// Instanced vertex counts for the two cloud geometries: textured boxes in
// fancy mode, camera-facing quads otherwise.
const BOX_VERTICES: u32 = 36;
const QUAD_VERTICES: u32 = 6;

/// Double-buffered cloud point store.
pub struct Buffer {
    capacity: usize,
    fancy: bool,
    persistent: bool,
    halves: Mutex<Halves>,
    swap_count: AtomicU32,
}

impl Buffer {
    /// `capacity` is the per-axis grid extent; each half reserves room for
    /// a full capacity x capacity grid.
    pub fn new(capacity: usize, fancy: bool, persistent: bool) -> Self {
        let reserve = capacity.saturating_mul(capacity);
        Self {
            capacity,
            fancy,
            persistent,
            halves: Mutex::new(Halves {
                front: Arc::new(Mutex::new(Vec::with_capacity(reserve))),
                back: Arc::new(Mutex::new(Vec::with_capacity(reserve))),
            }),
            swap_count: AtomicU32::new(0),
        }
    }

    /// Whether a buffer with these parameters would need a reallocation.
    pub fn has_changed(&self, capacity: usize, fancy: bool, persistent: bool) -> bool {
        self.capacity != capacity || self.fancy != fancy || self.persistent != persistent
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn fancy(&self) -> bool {
        self.fancy
    }

    pub fn persistent(&self) -> bool {
        self.persistent
    }

    /// Drop everything written to the back half since the last clear.
    pub fn clear(&self) {
        self.halves.lock().back.lock().clear();
    }

    /// Append one point record to the back half.
    pub fn put(&self, point: CloudPoint) {
        self.halves.lock().back.lock().push(point);
    }

    /// Shared view of the records written since the last clear.
    pub fn write_view(&self) -> PointStore {
        Arc::clone(&self.halves.lock().back)
    }

    /// Number of points currently in the back half.
    pub fn write_len(&self) -> usize {
        self.halves.lock().back.lock().len()
    }

    /// Exchange front and back halves, publishing the written geometry.
    pub fn swap(&self) {
        let mut halves = self.halves.lock();
        let halves = &mut *halves;
        std::mem::swap(&mut halves.front, &mut halves.back);
        self.swap_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Number of swaps since allocation. Zero means the buffer has never
    /// been populated.
    pub fn swap_count(&self) -> u32 {
        self.swap_count.load(Ordering::Acquire)
    }

    /// Vertices per rendered instance for the current geometry format.
    pub fn instance_vertex_count(&self) -> u32 {
        if self.fancy {
            BOX_VERTICES
        } else {
            QUAD_VERTICES
        }
    }

    /// Snapshot of the front (rendered) half.
    pub fn front_points(&self) -> Vec<CloudPoint> {
        self.halves.lock().front.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_and_swap_publishes_points() {
        let buffer = Buffer::new(4, false, false);
        buffer.put(CloudPoint::new(1.0, 2.0, 3.0));
        buffer.put(CloudPoint::new(4.0, 5.0, 6.0));
        assert_eq!(buffer.write_len(), 2);
        assert!(buffer.front_points().is_empty());

        buffer.swap();
        assert_eq!(buffer.swap_count(), 1);
        assert_eq!(buffer.front_points().len(), 2);
        assert_eq!(buffer.write_len(), 0);
    }

    #[test]
    fn test_clear_only_affects_back_half() {
        let buffer = Buffer::new(4, false, false);
        buffer.put(CloudPoint::new(1.0, 0.0, 0.0));
        buffer.swap();
        buffer.put(CloudPoint::new(2.0, 0.0, 0.0));
        buffer.clear();
        assert_eq!(buffer.write_len(), 0);
        assert_eq!(buffer.front_points().len(), 1);
    }

    #[test]
    fn test_write_view_tracks_records_across_swap() {
        let buffer = Buffer::new(4, false, false);
        buffer.put(CloudPoint::new(7.0, 8.0, 9.0));
        let view = buffer.write_view();
        buffer.swap();
        // The handle still addresses the same records, now on the front half.
        assert_eq!(view.lock()[0], CloudPoint::new(7.0, 8.0, 9.0));
        assert_eq!(buffer.front_points()[0], CloudPoint::new(7.0, 8.0, 9.0));
    }

    #[test]
    fn test_has_changed() {
        let buffer = Buffer::new(16, true, false);
        assert!(!buffer.has_changed(16, true, false));
        assert!(buffer.has_changed(32, true, false));
        assert!(buffer.has_changed(16, false, false));
        assert!(buffer.has_changed(16, true, true));
    }

    #[test]
    fn test_instance_vertex_count_follows_format() {
        assert_eq!(Buffer::new(1, true, false).instance_vertex_count(), 36);
        assert_eq!(Buffer::new(1, false, false).instance_vertex_count(), 6);
    }
}
