use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::buffer::{Buffer, CloudPoint};
use crate::config::Config;
use crate::generator::cloud_list::CloudList;
use crate::sampler::CloudSampler;

/// Process-wide task id counter. Initialized once at startup, never reset.
static NEXT_ID: AtomicU32 = AtomicU32::new(1);

#[derive(Default)]
struct TaskResult {
    cloud_count: u32,
    cloud_list: Option<CloudList>,
}

/// One cloud generation job bound to a chunk coordinate, a config snapshot
/// and a cloudiness level.
///
/// A task runs at most once. Generator slots may alias the same task
/// through `Arc`; everything observable after completion is immutable.
pub struct Task {
    id: u32,
    chunk_x: i32,
    chunk_z: i32,
    config: Config,
    cloudiness: f32,
    buffer: Arc<Buffer>,
    sampler: Arc<dyn CloudSampler>,
    started: AtomicBool,
    cancelled: AtomicBool,
    completed: AtomicBool,
    // Rendezvous for cancellation: the flag flips once the sampling loop
    // has returned, whether it completed or acknowledged a cancel.
    rendezvous: Mutex<bool>,
    finished: Condvar,
    result: Mutex<TaskResult>,
}

impl Task {
    pub fn new(
        chunk_x: i32,
        chunk_z: i32,
        config: Config,
        cloudiness: f32,
        buffer: Arc<Buffer>,
        sampler: Arc<dyn CloudSampler>,
    ) -> Self {
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            chunk_x,
            chunk_z,
            config,
            cloudiness,
            buffer,
            sampler,
            started: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            completed: AtomicBool::new(false),
            rendezvous: Mutex::new(false),
            finished: Condvar::new(),
            result: Mutex::new(TaskResult::default()),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn chunk_x(&self) -> i32 {
        self.chunk_x
    }

    pub fn chunk_z(&self) -> i32 {
        self.chunk_z
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cloudiness(&self) -> f32 {
        self.cloudiness
    }

    pub fn completed(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn buffer(&self) -> &Arc<Buffer> {
        &self.buffer
    }

    pub fn instance_vertex_count(&self) -> u32 {
        self.buffer.instance_vertex_count()
    }

    /// Points written by this task. Zero until completed.
    pub fn cloud_count(&self) -> u32 {
        self.result.lock().cloud_count
    }

    /// Ordering adapter over the written records. `None` until completed.
    ///
    /// The returned list shares the underlying records with the buffer, so
    /// sorting it reorders what is rendered; the distance cache is private
    /// to each returned list.
    pub fn cloud_list(&self) -> Option<CloudList> {
        self.result.lock().cloud_list.clone()
    }

    /// Request cancellation and block until the sampling loop has stopped
    /// writing.
    ///
    /// No-op on a completed task; a repeated request returns immediately.
    /// The loop checks the flag once per outer grid row, so the wait is
    /// bounded by the cost of one row of sampling. A task that has not
    /// started yet cannot have written anything and will abort on entry,
    /// so there is nothing to wait for.
    pub fn cancel(&self) {
        let mut done = self.rendezvous.lock();
        if self.completed.load(Ordering::SeqCst) {
            return;
        }
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        log::warn!("cloud generation task {} cancelled", self.id);
        if !self.started.load(Ordering::SeqCst) {
            return;
        }
        while !*done {
            self.finished.wait(&mut done);
        }
    }

    /// Execute the sampling loop. Idempotent: a second invocation returns
    /// immediately.
    pub fn run(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.cancelled.load(Ordering::SeqCst) {
            self.finish(false);
            return;
        }

        let distance = self.config.block_distance() as f64;
        let spacing = self.config.spacing;
        let chunk_size = self.config.chunk_size;

        let half_grid_ceil = (distance / spacing).ceil() as i32;
        let half_grid_floor = (distance / spacing).floor() as i32;

        // Snap the chunk origin down to the spacing grid so samples line up
        // across chunk borders.
        let origin_x = self.chunk_x * chunk_size;
        let origin_z = self.chunk_z * chunk_size;
        let aligned_origin_x = (origin_x as f64 / spacing).floor() * spacing;
        let aligned_origin_z = (origin_z as f64 / spacing).floor() * spacing;

        self.buffer.clear();

        let mut count = 0u32;
        for grid_x in -half_grid_floor..half_grid_ceil {
            for grid_z in -half_grid_floor..half_grid_ceil {
                let sample_x = (grid_x as f64 * spacing + aligned_origin_x).floor() as i32;
                let sample_z = (grid_z as f64 * spacing + aligned_origin_z).floor() as i32;
                let density =
                    self.sampler
                        .sample(sample_x, sample_z, self.cloudiness, self.config.fuzziness);
                if density <= 0.0 {
                    continue;
                }

                let x = (sample_x - self.chunk_x * chunk_size) as f32
                    + self.sampler.jitter_x(sample_x, sample_z)
                        * self.config.jitter
                        * spacing as f32;
                // Denser points rise higher: quadratic falloff toward the
                // cloud fringe.
                let y = self.config.spread_y * density * density;
                let z = (sample_z - self.chunk_z * chunk_size) as f32
                    + self.sampler.jitter_z(sample_x, sample_z)
                        * self.config.jitter
                        * spacing as f32;

                self.buffer.put(CloudPoint::new(x, y, z));
                count += 1;
            }
            // One cancellation check per row keeps the abort path cheap.
            if self.cancelled.load(Ordering::SeqCst) {
                self.finish(false);
                return;
            }
        }

        {
            let mut result = self.result.lock();
            result.cloud_count = count;
            result.cloud_list = Some(CloudList::new(self.buffer.write_view()));
        }
        self.finish(true);
    }

    fn finish(&self, completed: bool) {
        let mut done = self.rendezvous.lock();
        if completed {
            self.completed.store(true, Ordering::SeqCst);
        }
        *done = true;
        self.finished.notify_all();
    }
}
