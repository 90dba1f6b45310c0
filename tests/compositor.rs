use bevy_ecs::entity::Entity;
use glam::Vec3;

use capture_compositor::backend::{BackendCommand, HeadlessBackend};
use capture_compositor::compositor::{
    DefaultRenderer, PassDescriptor, RenderView, RenderViewSettings, RendererSettings,
    ViewportRect, ViewportSpec, ViewportValue, FADE_OUT_EPSILON,
};
use capture_compositor::engine::{Component, ComponentId, Engine, RecordingPicking, ViewCommand};
use capture_compositor::scene::{Camera, Material, MaterialKind, Mesh, Transform};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn engine(width: u32, height: u32) -> Engine {
    init_logging();
    let renderer = DefaultRenderer::new(
        Box::new(HeadlessBackend::new(width, height)),
        RendererSettings::default(),
    );
    Engine::new(renderer, Box::new(RecordingPicking::new()))
}

fn headless(engine: &mut Engine) -> &mut HeadlessBackend {
    engine
        .renderer_mut()
        .backend_mut()
        .as_any_mut()
        .downcast_mut::<HeadlessBackend>()
        .unwrap()
}

fn add_view(engine: &mut Engine, settings: RenderViewSettings) -> (Entity, ComponentId) {
    let entity = engine.scene_mut().spawn(Transform::default());
    let camera = Camera::perspective(45.0, 1.0, 0.1, 500.0).with_position(Vec3::new(0.0, 0.0, 5.0));
    engine.scene_mut().world.entity_mut(entity).insert(camera);
    let id = engine
        .add_component(entity, Box::new(RenderView::new(settings)), true)
        .unwrap();
    (entity, id)
}

fn view(engine: &Engine, id: ComponentId) -> &RenderView {
    engine.component::<RenderView>(id).unwrap()
}

fn canvas_renders(commands: &[BackendCommand]) -> usize {
    commands
        .iter()
        .filter(|command| matches!(command, BackendCommand::Render { target: None, .. }))
        .count()
}

// ---------------------------------------------------------------------------
// Viewports
// ---------------------------------------------------------------------------

#[test]
fn percent_viewport_follows_the_canvas() {
    let mut engine = engine(400, 200);
    let settings = RenderViewSettings {
        viewport_left: ViewportValue::Percent(50.0),
        viewport_bottom: ViewportValue::Pixels(0),
        viewport_width: ViewportValue::Percent(50.0),
        viewport_height: ViewportValue::Percent(100.0),
        ..Default::default()
    };
    let (entity, id) = add_view(&mut engine, settings);
    assert_eq!(view(&engine, id).viewport(), ViewportRect::new(200.0, 0.0, 200.0, 200.0));

    engine.resize(800, 300);
    assert_eq!(view(&engine, id).viewport(), ViewportRect::new(400.0, 0.0, 400.0, 300.0));
    let camera = engine.scene().camera(entity).unwrap();
    assert!((camera.projection_matrix().x_axis.x * (400.0 / 300.0)
        - camera.projection_matrix().y_axis.y)
        .abs()
        < 1e-4);

    engine.resize(400, 200);
    assert_eq!(view(&engine, id).viewport(), ViewportRect::new(200.0, 0.0, 200.0, 200.0));
}

#[test]
fn animated_viewport_reaches_its_target() {
    let mut engine = engine(200, 100);
    let (_, id) = add_view(&mut engine, RenderViewSettings::default());

    let quarter = ViewportSpec::parse("0", "0", "50%", "50%").unwrap();
    engine
        .send_view_command(
            id,
            &ViewCommand::SetViewport {
                viewport: quarter,
                animation_time: Some(1.0),
            },
        )
        .unwrap();
    assert!(view(&engine, id).is_animating());

    engine.frame(0.5);
    assert_eq!(view(&engine, id).viewport(), ViewportRect::new(0.0, 0.0, 150.0, 75.0));
    engine.frame(0.5);
    assert_eq!(view(&engine, id).viewport(), ViewportRect::new(0.0, 0.0, 100.0, 50.0));
    assert!(!view(&engine, id).is_animating());
}

// ---------------------------------------------------------------------------
// Pass list
// ---------------------------------------------------------------------------

#[test]
fn head_pass_draws_first_with_its_override() {
    let mut engine = engine(200, 100);
    add_view(&mut engine, RenderViewSettings::default());

    let scene = engine.scene_mut();
    let surface = scene.materials.insert(Material::new("surface", MaterialKind::Simple));
    let outline = scene
        .materials
        .insert(Material::new("outline", MaterialKind::Custom("outline".into())));
    let parent = scene.spawn(Transform::default());
    scene.attach_mesh(parent, Mesh::cuboid(1.0), Some(surface), "box");

    engine
        .renderer_mut()
        .add_render_pass(PassDescriptor::new("Outline").with_override_material(outline), -1);
    let passes = engine.renderer().passes().passes();
    assert_eq!(passes[0].name, "Outline");
    assert!(passes[0].clear);
    assert!(!passes[1].clear);

    headless(&mut engine).take_commands();
    engine.frame(0.016);

    let materials: Vec<_> = headless(&mut engine)
        .take_commands()
        .into_iter()
        .filter_map(|command| match command {
            BackendCommand::Render { target: None, draws, .. } => {
                Some(draws.iter().map(|draw| draw.material).collect::<Vec<_>>())
            }
            _ => None,
        })
        .collect();
    assert_eq!(materials, vec![vec![Some(outline)], vec![Some(surface)]]);
    // the override only lasts for its pass
    assert_eq!(engine.scene().override_material, None);
}

// ---------------------------------------------------------------------------
// Fades
// ---------------------------------------------------------------------------

#[test]
fn fade_in_from_disabled() {
    let mut engine = engine(200, 100);
    let (_, id) = add_view(&mut engine, RenderViewSettings::default());
    engine
        .send_view_command(id, &ViewCommand::DisableRenderView { fade: None })
        .unwrap();
    assert!(!view(&engine, id).is_enabled());

    engine
        .send_view_command(id, &ViewCommand::EnableRenderView { fade: Some(1.0) })
        .unwrap();
    assert_eq!(view(&engine, id).opacity(), 0.0);

    let mut opacities = Vec::new();
    for _ in 0..3 {
        engine.frame(0.5);
        opacities.push(view(&engine, id).opacity());
    }
    assert_eq!(opacities, vec![0.25, 1.0, 1.0]);
    assert!(!view(&engine, id).fade().is_fading());
}

#[test]
fn fade_out_draws_epsilon_then_stops() {
    let mut engine = engine(200, 100);
    let (_, id) = add_view(&mut engine, RenderViewSettings::default());
    engine.frame(0.016);

    engine
        .send_view_command(id, &ViewCommand::DisableRenderView { fade: Some(1.0) })
        .unwrap();
    headless(&mut engine).take_commands();

    let mut drawn = Vec::new();
    for _ in 0..4 {
        engine.frame(0.5);
        let commands = headless(&mut engine).take_commands();
        drawn.push((canvas_renders(&commands), view(&engine, id).opacity()));
    }
    assert_eq!(
        drawn,
        vec![(1, 0.5), (1, FADE_OUT_EPSILON), (0, 0.0), (0, 0.0)]
    );
    assert!(!view(&engine, id).is_enabled());
}

#[test]
fn partial_view_keeps_the_canvas_opaque() {
    let mut engine = engine(200, 100);
    let settings = RenderViewSettings {
        viewport_width: ViewportValue::Percent(50.0),
        ..Default::default()
    };
    let (_, id) = add_view(&mut engine, settings);
    engine
        .send_view_command(id, &ViewCommand::DisableRenderView { fade: Some(1.0) })
        .unwrap();
    engine.frame(0.5);
    assert_eq!(view(&engine, id).opacity(), 0.5);
    assert_eq!(engine.renderer().backend().canvas_opacity(), 1.0);
}

#[test]
fn full_canvas_view_carries_its_opacity() {
    let mut engine = engine(200, 100);
    let (_, id) = add_view(&mut engine, RenderViewSettings::default());
    engine
        .send_view_command(id, &ViewCommand::DisableRenderView { fade: Some(1.0) })
        .unwrap();
    engine.frame(0.5);
    assert_eq!(view(&engine, id).opacity(), 0.5);
    assert_eq!(engine.renderer().backend().canvas_opacity(), 0.5);
}
