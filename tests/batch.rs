extern crate easel;
extern crate rand;

use easel::prelude::*;

fn shader(id: u32, samplers: usize) -> ResourceEvent {
    ResourceEvent::Created(Resource::Shader(ShaderResource {
        id: ShaderId(id),
        sources: ShaderSources::default(),
        layout: ShaderLayout {
            samplers: (0..samplers).map(|v| format!("u_Texture{}", v)).collect(),
            ..Default::default()
        },
    }))
}

fn image(id: u32, w: u32, h: u32) -> ResourceEvent {
    ResourceEvent::Created(Resource::Image(ImageResource {
        id: ImageId(id),
        dimensions: easel::math::Vector2::new(w, h),
        pixels: vec![255; (w * h * 4) as usize],
    }))
}

fn quad() -> GeometryParams {
    GeometryParams {
        vertices: vec![Vertex::default(); 4],
        indices: Some(vec![0, 1, 2, 2, 3, 0]),
        ..Default::default()
    }
}

fn renderer() -> Renderer {
    let mut r = Renderer::headless(VideoConfig::default());
    r.handle_resource_event(&shader(0, 0)).unwrap();
    r
}

#[test]
fn same_state_quads_merge_into_one_drawcall() {
    let mut r = renderer();
    let batcher = r.create_batcher(BatcherParams::default());

    for depth in &[1.0, 0.0] {
        let g = r.create_geometry(quad()).unwrap();
        r.geometry_mut(g).unwrap().set_depth(*depth);
        r.add_geometry(batcher, g).unwrap();
    }

    let info = r.draw().unwrap();
    assert_eq!(info.drawcalls, 1);
    // Two quads, 6 indices each, triangles.
    assert_eq!(info.primitives, 4);
}

#[test]
fn shader_override_splits_commands() {
    let mut r = renderer();
    r.handle_resource_event(&shader(1, 0)).unwrap();
    let batcher = r.create_batcher(BatcherParams::default());

    let a = r.create_geometry(quad()).unwrap();
    let b = r.create_geometry(quad()).unwrap();
    r.geometry_mut(b).unwrap().set_shader(ShaderId(1));
    r.add_geometry(batcher, a).unwrap();
    r.add_geometry(batcher, b).unwrap();

    let info = r.draw().unwrap();
    assert_eq!(info.drawcalls, 2);
}

#[test]
fn distinct_textures_split_commands() {
    let mut r = renderer();
    r.handle_resource_event(&shader(1, 1)).unwrap();
    r.handle_resource_event(&image(1, 2, 2)).unwrap();
    r.handle_resource_event(&image(2, 2, 2)).unwrap();

    let batcher = r.create_batcher(BatcherParams {
        shader: ShaderId(1),
        ..Default::default()
    });

    for id in &[1u32, 2, 1] {
        let g = r.create_geometry(quad()).unwrap();
        r.geometry_mut(g).unwrap().set_textures(vec![ImageId(*id)]);
        r.add_geometry(batcher, g).unwrap();
    }

    // Sorted by depth (all equal) in insertion order: 1, 2, 1 — merging
    // never crosses a state boundary.
    let info = r.draw().unwrap();
    assert_eq!(info.drawcalls, 3);
}

#[test]
fn batching_is_deterministic_across_insertion_order() {
    use rand::{Rng, SeedableRng};

    // Two renderers receive the same geometries in different insertion
    // orders; the emitted frames must not differ.
    let depths: Vec<f32> = (0..16).map(|v| v as f32).collect();
    let mut shuffled = depths.clone();
    let mut rng = rand::XorShiftRng::from_seed([7u8; 16]);
    rng.shuffle(&mut shuffled);

    let frame_info = |order: &[f32]| {
        let mut r = renderer();
        r.handle_resource_event(&shader(1, 0)).unwrap();
        let batcher = r.create_batcher(BatcherParams::default());

        for &depth in order {
            let g = r.create_geometry(quad()).unwrap();
            {
                let mut g = r.geometry_mut(g).unwrap();
                g.set_depth(depth);
                // Alternate shaders so the sort produces several commands.
                if (depth as u32) % 2 == 0 {
                    g.set_shader(ShaderId(1));
                }
            }
            r.add_geometry(batcher, g).unwrap();
        }

        let info = r.draw().unwrap();
        (info.drawcalls, info.primitives)
    };

    assert_eq!(frame_info(&depths), frame_info(&shuffled));
}

#[test]
fn rebatching_unchanged_scene_is_stable() {
    let mut r = renderer();
    let batcher = r.create_batcher(BatcherParams::default());

    let g = r.create_geometry(quad()).unwrap();
    r.add_geometry(batcher, g).unwrap();

    let first = r.draw().unwrap();
    let second = r.draw().unwrap();
    assert_eq!(first.drawcalls, second.drawcalls);
    assert_eq!(first.primitives, second.primitives);
}

#[test]
fn oversized_geometry_fails_the_frame() {
    let config = VideoConfig {
        vertex_capacity: 64,
        ..Default::default()
    };
    let mut r = Renderer::headless(config);
    r.handle_resource_event(&shader(0, 0)).unwrap();

    let batcher = r.create_batcher(BatcherParams::default());
    let g = r.create_geometry(quad()).unwrap();
    r.add_geometry(batcher, g).unwrap();

    match r.draw() {
        Err(Error::GeometryTooLarge(..)) => (),
        other => panic!("expected GeometryTooLarge, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn accumulated_frame_overflow_is_reported() {
    // Each quad fits a range on its own; two commands together exhaust it.
    let config = VideoConfig {
        vertex_capacity: 200,
        ..Default::default()
    };
    let mut r = Renderer::headless(config);
    r.handle_resource_event(&shader(0, 0)).unwrap();
    r.handle_resource_event(&shader(1, 0)).unwrap();

    let batcher = r.create_batcher(BatcherParams::default());
    let a = r.create_geometry(quad()).unwrap();
    let b = r.create_geometry(quad()).unwrap();
    r.geometry_mut(b).unwrap().set_shader(ShaderId(1));
    r.add_geometry(batcher, a).unwrap();
    r.add_geometry(batcher, b).unwrap();

    match r.draw() {
        Err(Error::FrameCapacityExhausted(..)) => (),
        other => panic!(
            "expected FrameCapacityExhausted, got {:?}",
            other.map(|_| ())
        ),
    }
}

#[test]
fn batchers_are_ordered_by_target_depth_shader() {
    let mut r = renderer();
    r.handle_resource_event(&image(7, 4, 4)).unwrap();

    // A texture-target batcher and two backbuffer batchers with distinct
    // depths; all must batch and submit in one frame.
    let texture = r.create_batcher(BatcherParams {
        target: RenderTarget::Texture(ImageId(7)),
        depth: 0.0,
        ..Default::default()
    });
    let far = r.create_batcher(BatcherParams {
        depth: 1.0,
        ..Default::default()
    });
    let near = r.create_batcher(BatcherParams {
        depth: 0.0,
        ..Default::default()
    });

    let g1 = r.create_geometry(quad()).unwrap();
    r.add_geometry(near, g1).unwrap();
    let g2 = r.create_geometry(quad()).unwrap();
    r.add_geometry(far, g2).unwrap();
    let g3 = r.create_geometry(quad()).unwrap();
    r.add_geometry(texture, g3).unwrap();

    let info = r.draw().unwrap();
    assert_eq!(info.drawcalls, 3);
    assert_eq!(info.alive_batchers, 3);
}
