use std::sync::Arc;

use glam::Vec3;
use parking_lot::Mutex;

use crate::buffer::Buffer;
use crate::config::Config;
use crate::generator::cloud_list::CloudList;
use crate::generator::dispatch::JobExecutor;
use crate::generator::task::Task;
use crate::sampler::{CloudSampler, NoiseSampler};

/// How far the cloudiness level must move before geometry is considered
/// stale.
const CLOUDINESS_HYSTERESIS: f32 = 0.05;

struct State {
    origin_x: f64,
    origin_z: f64,
    buffer: Arc<Buffer>,
    queued: Option<Arc<Task>>,
    running: Option<Arc<Task>>,
    completed: Option<Arc<Task>>,
    swapped: Option<Arc<Task>>,
}

/// Orchestrates cloud geometry regeneration around a moving viewpoint.
///
/// Holds up to four task references (queued, running, completed, swapped;
/// completed and swapped often alias) plus the drifting origin, all behind
/// one lock so callers never observe a torn lifecycle state. Sampling runs
/// on a dedicated worker thread; nothing here blocks except the bounded
/// cancellation wait when a running job is superseded.
pub struct Generator {
    state: Arc<Mutex<State>>,
    sampler: Arc<dyn CloudSampler>,
    executor: JobExecutor,
}

// Truncating division: chunks straddling the negative axes share
// coordinate 0 with their positive neighbors.
fn floor_cloud_chunk(coord: f64, chunk_size: i32) -> i32 {
    coord as i32 / chunk_size
}

fn calc_buffer_size(options: &Config) -> usize {
    let distance = options.block_distance() as f64;
    let spacing = options.spacing;
    // Covers the full diameter even when the radius is not an exact
    // multiple of the spacing.
    ((distance / spacing).floor() + (distance / spacing).ceil()) as usize
}

impl Generator {
    pub fn new(options: &Config, fancy: bool) -> Self {
        Self::with_sampler(options, fancy, Arc::new(NoiseSampler::default()))
    }

    pub fn with_sampler(options: &Config, fancy: bool, sampler: Arc<dyn CloudSampler>) -> Self {
        let buffer = Arc::new(Buffer::new(
            calc_buffer_size(options),
            fancy,
            options.persistent_buffers,
        ));
        Self {
            state: Arc::new(Mutex::new(State {
                origin_x: 0.0,
                origin_z: 0.0,
                buffer,
                queued: None,
                running: None,
                completed: None,
                swapped: None,
            })),
            sampler,
            executor: JobExecutor::new(),
        }
    }

    pub fn can_generate(&self) -> bool {
        self.state.lock().queued.is_some()
    }

    pub fn can_swap(&self) -> bool {
        let state = self.state.lock();
        match (&state.completed, &state.swapped) {
            (Some(completed), Some(swapped)) => !Arc::ptr_eq(completed, swapped),
            (Some(_), None) => true,
            _ => false,
        }
    }

    pub fn can_render(&self) -> bool {
        self.state.lock().completed.is_some()
    }

    pub fn generating(&self) -> bool {
        self.state.lock().running.is_some()
    }

    /// Drop every task slot, cancelling the running job if there is one.
    pub fn clear(&self) {
        Self::clear_slots(&mut self.state.lock());
    }

    fn clear_slots(state: &mut State) {
        state.queued = None;
        if let Some(running) = state.running.take() {
            running.cancel();
        }
        state.completed = None;
        state.swapped = None;
    }

    /// Replace the buffer unconditionally and drop all task slots.
    pub fn allocate(&self, options: &Config, fancy: bool) {
        let mut state = self.state.lock();
        state.buffer = Arc::new(Buffer::new(
            calc_buffer_size(options),
            fancy,
            options.persistent_buffers,
        ));
        Self::clear_slots(&mut state);
    }

    /// Replace the buffer only when capacity, geometry format or
    /// persistence mode differ. Stale geometry is never carried across an
    /// incompatible buffer, so a replacement also drops all task slots.
    /// Returns whether a reallocation happened.
    pub fn reallocate(&self, options: &Config, fancy: bool) -> bool {
        let mut state = self.state.lock();
        let size = calc_buffer_size(options);
        if state
            .buffer
            .has_changed(size, fancy, options.persistent_buffers)
        {
            state.buffer = Arc::new(Buffer::new(size, fancy, options.persistent_buffers));
            Self::clear_slots(&mut state);
            return true;
        }
        false
    }

    /// Advance the drifting origin and queue a regeneration task when the
    /// current geometry has gone stale.
    ///
    /// Staleness means: the viewpoint crossed into another cloud chunk, a
    /// geometry-affecting config field changed, cloudiness moved past the
    /// hysteresis band, or the buffer has never been populated and nothing
    /// is in flight to populate it.
    pub fn update(&self, camera: Vec3, time_delta: f32, options: &Config, cloudiness: f32) {
        let mut state = self.state.lock();

        // Wind only drifts the layer along x; z stays pinned.
        state.origin_x -= time_delta as f64 * options.wind_speed as f64;
        state.origin_z = 0.0;

        let world_origin_x = camera.x as f64 - state.origin_x;
        let world_origin_z = camera.z as f64 - state.origin_z;

        let chunk_x = floor_cloud_chunk(world_origin_x, options.chunk_size);
        let chunk_z = floor_cloud_chunk(world_origin_z, options.chunk_size);

        let update_geometry = {
            let prev_task = state
                .queued
                .as_ref()
                .or(state.running.as_ref())
                .or(state.completed.as_ref());
            match prev_task {
                Some(prev) => {
                    let chunk_changed = prev.chunk_x() != chunk_x || prev.chunk_z() != chunk_z;

                    // Wind speed only moves the origin, it never invalidates
                    // generated geometry.
                    let prev_options = prev.config();
                    let options_changed = options.fuzziness != prev_options.fuzziness
                        || options.chunk_size != prev_options.chunk_size
                        || options.spread_y != prev_options.spread_y
                        || options.spacing != prev_options.spacing
                        || options.jitter != prev_options.jitter
                        || options.distance != prev_options.distance;

                    let cloudiness_changed =
                        (cloudiness - prev.cloudiness()).abs() > CLOUDINESS_HYSTERESIS;

                    let buffer_cleared = state.buffer.swap_count() == 0
                        && state.queued.is_none()
                        && state.running.is_none()
                        && state.completed.as_ref().map_or(true, |completed| {
                            state
                                .swapped
                                .as_ref()
                                .is_some_and(|swapped| Arc::ptr_eq(completed, swapped))
                        });

                    chunk_changed || options_changed || cloudiness_changed || buffer_cleared
                }
                None => true,
            }
        };

        if update_geometry {
            let task = Arc::new(Task::new(
                chunk_x,
                chunk_z,
                options.clone(),
                cloudiness,
                Arc::clone(&state.buffer),
                Arc::clone(&self.sampler),
            ));
            log::debug!(
                "queued cloud task {} for chunk ({}, {})",
                task.id(),
                chunk_x,
                chunk_z
            );
            state.queued = Some(task);
        }
    }

    /// Promote the queued task to running and execute it.
    ///
    /// A running task is cancelled first, so at most one sampling loop is
    /// ever in flight. With `force_sync` the task runs on the calling
    /// thread; otherwise it is dispatched to the worker and its completion
    /// continuation merges the result back under the state lock, but only
    /// if it is still the recognized running task.
    pub fn generate(&self, force_sync: bool) {
        let mut state = self.state.lock();
        let Some(queued) = state.queued.take() else {
            log::warn!("generate called with no queued task");
            return;
        };
        if let Some(running) = state.running.take() {
            running.cancel();
        }
        state.running = Some(Arc::clone(&queued));

        if force_sync {
            queued.run();
            if queued.completed() {
                state.completed = Some(Arc::clone(&queued));
            }
            state.running = None;
            return;
        }

        let task_id = queued.id();
        let state_handle = Arc::clone(&self.state);
        self.executor.dispatch(
            queued,
            Box::new(move || {
                let mut state = state_handle.lock();
                let recognized = state
                    .running
                    .as_ref()
                    .is_some_and(|running| running.id() == task_id);
                if !recognized {
                    // Superseded while sampling; the result is discarded.
                    return;
                }
                if let Some(running) = state.running.take() {
                    if running.completed() {
                        state.completed = Some(running);
                    }
                }
            }),
        );
    }

    /// Publish the completed task: swap the buffer halves and mark the task
    /// as the rendered one.
    pub fn swap(&self) {
        let mut state = self.state.lock();
        let completed = match &state.completed {
            Some(completed) => Arc::clone(completed),
            None => {
                log::warn!("swap called with no completed task");
                return;
            }
        };
        if state
            .swapped
            .as_ref()
            .is_some_and(|swapped| Arc::ptr_eq(swapped, &completed))
        {
            log::warn!("swap called with already swapped task");
            return;
        }
        completed.buffer().swap();
        state.swapped = Some(completed);
    }

    /// Vertices per rendered instance. Zero until a task has been swapped
    /// in.
    pub fn instance_vertex_count(&self) -> u32 {
        self.state
            .lock()
            .swapped
            .as_ref()
            .map_or(0, |task| task.instance_vertex_count())
    }

    /// Camera-relative world x of the rendered geometry's origin.
    pub fn render_origin_x(&self, camera_x: f64) -> f64 {
        let state = self.state.lock();
        match &state.swapped {
            Some(task) => {
                (task.chunk_x() * task.config().chunk_size) as f64 - camera_x + state.origin_x
            }
            None => 0.0,
        }
    }

    /// Camera-relative world z of the rendered geometry's origin.
    pub fn render_origin_z(&self, camera_z: f64) -> f64 {
        let state = self.state.lock();
        match &state.swapped {
            Some(task) => {
                (task.chunk_z() * task.config().chunk_size) as f64 - camera_z + state.origin_z
            }
            None => 0.0,
        }
    }

    /// Points in the rendered geometry. Zero until a task has been swapped
    /// in.
    pub fn cloud_count(&self) -> u32 {
        self.state
            .lock()
            .swapped
            .as_ref()
            .map_or(0, |task| task.cloud_count())
    }

    /// Ordering adapter over the rendered geometry, for the depth sort.
    pub fn cloud_list(&self) -> Option<CloudList> {
        self.state
            .lock()
            .swapped
            .as_ref()
            .and_then(|task| task.cloud_list())
    }

    /// The current geometry buffer.
    pub fn buffer(&self) -> Arc<Buffer> {
        Arc::clone(&self.state.lock().buffer)
    }
}

impl Drop for Generator {
    fn drop(&mut self) {
        // Cancel any in-flight job so the executor join below stays
        // bounded.
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sort::SortableList;
    use std::thread;
    use std::time::{Duration, Instant};

    struct UniformSampler;

    impl CloudSampler for UniformSampler {
        fn sample(&self, _x: i32, _z: i32, _cloudiness: f32, _fuzziness: f32) -> f32 {
            1.0
        }

        fn jitter_x(&self, _x: i32, _z: i32) -> f32 {
            0.0
        }

        fn jitter_z(&self, _x: i32, _z: i32) -> f32 {
            0.0
        }
    }

    fn test_config() -> Config {
        Config {
            chunk_size: 64,
            spacing: 4.0,
            distance: 32.0,
            spread_y: 10.0,
            jitter: 0.0,
            fuzziness: 0.25,
            wind_speed: 0.0,
            persistent_buffers: false,
        }
    }

    fn uniform_generator(options: &Config) -> Generator {
        Generator::with_sampler(options, false, Arc::new(UniformSampler))
    }

    fn wait_until(generator: &Generator, predicate: impl Fn(&Generator) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !predicate(generator) {
            assert!(Instant::now() < deadline, "timed out waiting on generator");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_first_update_queues_a_task() {
        let options = test_config();
        let generator = uniform_generator(&options);
        assert!(!generator.can_generate());

        generator.update(Vec3::ZERO, 0.05, &options, 0.7);
        assert!(generator.can_generate());
        assert!(!generator.can_render());
    }

    #[test]
    fn test_staleness_detection_is_idempotent() {
        let options = test_config();
        let generator = uniform_generator(&options);

        generator.update(Vec3::ZERO, 0.05, &options, 0.7);
        generator.generate(true);
        generator.swap();
        let generated = generator.cloud_count();

        // Same chunk, same config, same cloudiness: no new work.
        for _ in 0..10 {
            generator.update(Vec3::ZERO, 0.05, &options, 0.7);
            assert!(!generator.can_generate());
        }
        assert_eq!(generator.cloud_count(), generated);
    }

    #[test]
    fn test_cloudiness_hysteresis() {
        let options = test_config();
        let generator = uniform_generator(&options);

        generator.update(Vec3::ZERO, 0.05, &options, 0.70);
        generator.generate(true);
        generator.swap();

        generator.update(Vec3::ZERO, 0.05, &options, 0.74);
        assert!(!generator.can_generate(), "0.04 is inside the band");

        generator.update(Vec3::ZERO, 0.05, &options, 0.76);
        assert!(generator.can_generate(), "0.06 is outside the band");
    }

    #[test]
    fn test_chunk_crossing_triggers_regeneration() {
        let options = test_config();
        let generator = uniform_generator(&options);

        generator.update(Vec3::ZERO, 0.05, &options, 0.7);
        generator.generate(true);
        generator.swap();

        generator.update(Vec3::new(10.0, 0.0, 0.0), 0.05, &options, 0.7);
        assert!(!generator.can_generate(), "still inside chunk 0");

        generator.update(Vec3::new(70.0, 0.0, 0.0), 0.05, &options, 0.7);
        assert!(generator.can_generate(), "crossed into chunk 1");
    }

    #[test]
    fn test_geometry_config_change_triggers_regeneration() {
        let options = test_config();
        let generator = uniform_generator(&options);

        generator.update(Vec3::ZERO, 0.05, &options, 0.7);
        generator.generate(true);
        generator.swap();

        // Wind speed is not a geometry field.
        let windier = Config {
            wind_speed: 9.0,
            ..options.clone()
        };
        generator.update(Vec3::ZERO, 0.0, &windier, 0.7);
        assert!(!generator.can_generate());

        let fuzzier = Config {
            fuzziness: 0.5,
            ..options.clone()
        };
        generator.update(Vec3::ZERO, 0.0, &fuzzier, 0.7);
        assert!(generator.can_generate());
    }

    #[test]
    fn test_sync_pipeline_produces_full_grid() {
        // distance=32, spacing=4: 16x16 grid, uniform density fills all 256.
        let options = test_config();
        let generator = uniform_generator(&options);

        generator.update(Vec3::ZERO, 0.05, &options, 0.7);
        generator.generate(true);
        assert!(generator.can_render());
        assert!(generator.can_swap());
        assert_eq!(generator.cloud_count(), 0, "not visible until swapped");

        generator.swap();
        assert_eq!(generator.cloud_count(), 256);
        assert_eq!(generator.instance_vertex_count(), 6);
        assert_eq!(generator.cloud_list().unwrap().len(), 256);
    }

    #[test]
    fn test_async_pipeline_completes() {
        let options = test_config();
        let generator = uniform_generator(&options);

        generator.update(Vec3::ZERO, 0.05, &options, 0.7);
        generator.generate(false);
        assert!(!generator.can_generate());

        wait_until(&generator, |g| g.can_render());
        assert!(!generator.generating());

        generator.swap();
        assert_eq!(generator.cloud_count(), 256);
    }

    #[test]
    fn test_generate_without_queued_task_is_noop() {
        let options = test_config();
        let generator = uniform_generator(&options);
        generator.generate(true);
        assert!(!generator.can_render());
        assert!(!generator.generating());
    }

    #[test]
    fn test_double_swap_is_noop() {
        let options = test_config();
        let generator = uniform_generator(&options);

        generator.update(Vec3::ZERO, 0.05, &options, 0.7);
        generator.generate(true);
        generator.swap();

        let buffer = generator.buffer();
        let swaps_before = buffer.swap_count();
        let count_before = generator.cloud_count();

        generator.swap();
        assert_eq!(buffer.swap_count(), swaps_before);
        assert_eq!(generator.cloud_count(), count_before);
    }

    #[test]
    fn test_swap_after_regeneration_republishes() {
        let options = test_config();
        let generator = uniform_generator(&options);

        generator.update(Vec3::ZERO, 0.05, &options, 0.7);
        generator.generate(true);
        generator.swap();
        assert!(!generator.can_swap());

        // Crossing a chunk boundary queues fresh geometry, which swaps
        // again once completed.
        generator.update(Vec3::new(70.0, 0.0, 0.0), 0.05, &options, 0.7);
        generator.generate(true);
        assert!(generator.can_swap());
        generator.swap();
        assert_eq!(generator.buffer().swap_count(), 2);
    }

    #[test]
    fn test_render_origins_zero_without_swapped_task() {
        let options = test_config();
        let generator = uniform_generator(&options);
        assert_eq!(generator.render_origin_x(123.0), 0.0);
        assert_eq!(generator.render_origin_z(-55.0), 0.0);
        assert_eq!(generator.instance_vertex_count(), 0);
        assert_eq!(generator.cloud_count(), 0);
    }

    #[test]
    fn test_render_origin_is_camera_relative() {
        let options = test_config();
        let generator = uniform_generator(&options);

        let camera = Vec3::new(100.0, 192.0, 7.0);
        generator.update(camera, 0.0, &options, 0.7);
        generator.generate(true);
        generator.swap();

        // Camera at x=100 with chunk size 64 puts the origin chunk at 1.
        assert_eq!(generator.render_origin_x(100.0), 64.0 - 100.0);
        assert_eq!(generator.render_origin_z(7.0), 0.0 - 7.0);
    }

    #[test]
    fn test_origin_drifts_with_wind() {
        let options = Config {
            wind_speed: 2.0,
            ..test_config()
        };
        let generator = uniform_generator(&options);

        generator.update(Vec3::ZERO, 0.0, &options, 0.7);
        generator.generate(true);
        generator.swap();
        let base = generator.render_origin_x(0.0);

        // Ten seconds of wind at 2 blocks per second shifts the rendered
        // origin by -20 even though no regeneration happened.
        generator.update(Vec3::ZERO, 10.0, &options, 0.7);
        assert_eq!(generator.render_origin_x(0.0), base - 20.0);
    }

    #[test]
    fn test_reallocate_clears_slots_only_on_change() {
        let options = test_config();
        let generator = uniform_generator(&options);

        generator.update(Vec3::ZERO, 0.05, &options, 0.7);
        generator.generate(true);
        generator.swap();

        assert!(!generator.reallocate(&options, false));
        assert!(generator.can_render(), "no change keeps the slots");

        let wider = Config {
            distance: 64.0,
            ..options.clone()
        };
        assert!(generator.reallocate(&wider, false));
        assert!(!generator.can_render());
        assert!(!generator.can_generate());
        assert_eq!(generator.cloud_count(), 0);
    }

    #[test]
    fn test_clear_resets_lifecycle() {
        let options = test_config();
        let generator = uniform_generator(&options);

        generator.update(Vec3::ZERO, 0.05, &options, 0.7);
        generator.generate(true);
        generator.swap();
        generator.clear();

        assert!(!generator.can_generate());
        assert!(!generator.can_render());
        assert!(!generator.can_swap());
        assert_eq!(generator.cloud_count(), 0);

        // The next update notices the empty lifecycle and requeues.
        generator.update(Vec3::ZERO, 0.05, &options, 0.7);
        assert!(generator.can_generate());
    }

    #[test]
    fn test_superseding_a_running_task() {
        // A sampler slow enough that the first task is still running when
        // the second generate call lands.
        struct SlowSampler;
        impl CloudSampler for SlowSampler {
            fn sample(&self, _x: i32, _z: i32, _c: f32, _f: f32) -> f32 {
                thread::sleep(Duration::from_micros(200));
                1.0
            }
            fn jitter_x(&self, _x: i32, _z: i32) -> f32 {
                0.0
            }
            fn jitter_z(&self, _x: i32, _z: i32) -> f32 {
                0.0
            }
        }

        let options = test_config();
        let generator = Generator::with_sampler(&options, false, Arc::new(SlowSampler));

        generator.update(Vec3::ZERO, 0.05, &options, 0.7);
        generator.generate(false);

        // Queue a replacement for a different chunk and supersede.
        generator.update(Vec3::new(70.0, 0.0, 0.0), 0.05, &options, 0.7);
        assert!(generator.can_generate());
        generator.generate(false);

        wait_until(&generator, |g| g.can_render());
        generator.swap();
        assert_eq!(generator.cloud_count(), 256);
        assert_eq!(generator.render_origin_x(0.0), 64.0);
    }
}
