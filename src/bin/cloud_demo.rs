//! Runs one generation cycle and logs what it produced.

use anyhow::Result;
use glam::Vec3;

use cloud_engine::{sort, Config, Generator, SortableList};

fn main() -> Result<()> {
    env_logger::init();

    let options = Config::default();
    let generator = Generator::new(&options, true);
    let camera = Vec3::new(0.0, 192.0, 0.0);

    generator.update(camera, 0.05, &options, 0.7);
    generator.generate(true);
    generator.swap();

    log::info!(
        "generated {} cloud points ({} vertices per instance)",
        generator.cloud_count(),
        generator.instance_vertex_count()
    );
    log::info!(
        "render origin: ({:.1}, {:.1})",
        generator.render_origin_x(camera.x as f64),
        generator.render_origin_z(camera.z as f64)
    );

    if let Some(mut list) = generator.cloud_list() {
        sort::sort(&mut list);
        let (compares, swaps) = list.stats();
        log::info!(
            "depth-sorted {} points back to front ({} compares, {} swaps)",
            list.len(),
            compares,
            swaps
        );
    }

    Ok(())
}
