extern crate easel;
extern crate env_logger;

use easel::math::Vector2;
use easel::prelude::*;
use easel::video::backends::headless::HeadlessBackend;

fn init() {
    let _ = env_logger::try_init();
}

fn image_event(id: u32) -> ImageResource {
    ImageResource {
        id: ImageId(id),
        dimensions: Vector2::new(2, 2),
        pixels: vec![0; 16],
    }
}

fn shader_event(id: u32, samplers: usize) -> ShaderResource {
    ShaderResource {
        id: ShaderId(id),
        sources: ShaderSources::default(),
        layout: ShaderLayout {
            samplers: (0..samplers).map(|v| format!("u_Texture{}", v)).collect(),
            ..Default::default()
        },
    }
}

fn headless(r: &Renderer) -> &HeadlessBackend {
    r.backend().as_any().downcast_ref().unwrap()
}

#[test]
fn image_reference_counting() {
    init();
    let mut r = Renderer::headless(VideoConfig::default());

    // Two independent loads of the same image id.
    r.handle_resource_event(&ResourceEvent::Created(Resource::Image(image_event(3))))
        .unwrap();
    r.handle_resource_event(&ResourceEvent::Created(Resource::Image(image_event(3))))
        .unwrap();
    assert_eq!(headless(&r).image_refs(ImageId(3)), 2);

    // Removing one keeps the texture object allocated.
    r.handle_resource_event(&ResourceEvent::Removed(Resource::Image(image_event(3))))
        .unwrap();
    assert!(headless(&r).is_image_alive(ImageId(3)));

    // Removing the second deallocates it exactly once.
    r.handle_resource_event(&ResourceEvent::Removed(Resource::Image(image_event(3))))
        .unwrap();
    assert!(!headless(&r).is_image_alive(ImageId(3)));

    // A third removal is a caller error.
    match r.handle_resource_event(&ResourceEvent::Removed(Resource::Image(image_event(3)))) {
        Err(Error::ImageInvalid(id)) => assert_eq!(id, ImageId(3)),
        other => panic!("expected ImageInvalid, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn duplicate_shader_is_fatal() {
    init();
    let mut r = Renderer::headless(VideoConfig::default());

    r.handle_resource_event(&ResourceEvent::Created(Resource::Shader(shader_event(5, 0))))
        .unwrap();
    match r.handle_resource_event(&ResourceEvent::Created(Resource::Shader(shader_event(5, 0))))
    {
        Err(Error::ShaderDuplicated(id)) => assert_eq!(id, ShaderId(5)),
        other => panic!("expected ShaderDuplicated, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn malformed_image_is_rejected() {
    init();
    let mut r = Renderer::headless(VideoConfig::default());

    let broken = ImageResource {
        id: ImageId(9),
        dimensions: Vector2::new(4, 4),
        pixels: vec![0; 3],
    };
    match r.handle_resource_event(&ResourceEvent::Created(Resource::Image(broken))) {
        Err(Error::ImageMalformed(id, _)) => assert_eq!(id, ImageId(9)),
        other => panic!("expected ImageMalformed, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn missing_textures_for_shader_slots_is_fatal() {
    init();
    let mut r = Renderer::headless(VideoConfig::default());
    r.handle_resource_event(&ResourceEvent::Created(Resource::Shader(shader_event(0, 1))))
        .unwrap();

    let batcher = r.create_batcher(BatcherParams::default());
    let g = r
        .create_geometry(GeometryParams {
            vertices: vec![Vertex::default(); 3],
            ..Default::default()
        })
        .unwrap();
    r.add_geometry(batcher, g).unwrap();

    match r.draw() {
        Err(Error::TextureSlotMismatch(id, wanted, got)) => {
            assert_eq!(id, ShaderId(0));
            assert_eq!((wanted, got), (1, 0));
        }
        other => panic!(
            "expected TextureSlotMismatch, got {:?}",
            other.map(|_| ())
        ),
    }
}

#[test]
fn frames_advance_the_ring() {
    init();
    let mut r = Renderer::headless(VideoConfig::default());
    r.handle_resource_event(&ResourceEvent::Created(Resource::Shader(shader_event(0, 0))))
        .unwrap();

    for _ in 0..7 {
        r.draw().unwrap();
    }
    assert_eq!(headless(&r).frames(), 7);
}

#[test]
fn static_geometry_residency_follows_mutation() {
    init();
    let mut r = Renderer::headless(VideoConfig::default());
    r.handle_resource_event(&ResourceEvent::Created(Resource::Shader(shader_event(0, 0))))
        .unwrap();

    let batcher = r.create_batcher(BatcherParams::default());
    let g = r
        .create_geometry(GeometryParams {
            vertices: vec![Vertex::default(); 4],
            hint: UploadHint::Static,
            ..Default::default()
        })
        .unwrap();
    r.add_geometry(batcher, g).unwrap();

    r.draw().unwrap();
    assert!(headless(&r).is_retained(g));

    // Mutation evicts the retained range; the next frame re-uploads.
    r.geometry_mut(g).unwrap().set_depth(2.0);
    r.draw().unwrap();
    assert!(headless(&r).is_retained(g));
}

#[test]
fn empty_frames_draw_cleanly() {
    init();
    let mut r = Renderer::headless(VideoConfig::default());

    let info = r.draw().unwrap();
    assert_eq!(info.drawcalls, 0);
    assert_eq!(info.primitives, 0);

    r.clear();
    let info = r.draw().unwrap();
    assert_eq!(info.alive_batchers, 0);
    assert_eq!(info.alive_geometries, 0);
}

#[test]
fn resize_reaches_the_backend() {
    init();
    let mut r = Renderer::headless(VideoConfig::default());
    r.handle_display_event(DisplayEvent::SizeChanged(Vector2::new(1024, 768)))
        .unwrap();
    assert_eq!(headless(&r).dimensions(), Vector2::new(1024, 768));
}
