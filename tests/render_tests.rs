//! Pipeline integration tests for the render manager.
//!
//! Each test builds a full pipeline (synthetic media, render target, surface
//! render and headless context) and drives it through the public API.
//!
//! # Test Categories
//!
//! - **Frame Tests**: tile selection and compositing for a rendered frame
//! - **Lifecycle Tests**: initialization failures, resize, end of stream
//! - **Viewport Tests**: cross-thread pose updates
//!
//! ```bash
//! cargo test --test render_tests
//! ```

mod common;

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rstest::rstest;

use common::{cubemap_stream, erp_stream, render_config, Collaborators, Harness, Projection};
use panorama_render::backend::{BackendCommand, PassTarget};
use panorama_render::media::{QualityLevel, SyntheticConfig};
use panorama_render::projection::CubeFace;
use panorama_render::{
    ProjectionFormat, RenderError, RenderManager, RenderStatus, RenderTarget, TargetState,
    TransformType,
};

// ============================================================================
// Frame Tests
// ============================================================================

/// The first frame selects the tiles ahead and presents once.
#[rstest]
#[case::erp(Projection::Erp)]
#[case::cubemap(Projection::Cubemap)]
fn test_first_frame(#[case] projection: Projection) {
    let mut h = Harness::new(render_config(), projection.stream());
    assert_eq!(h.manager.projection_format(), Some(projection.format()));

    assert_eq!(h.manager.render(0), Ok(RenderStatus::Success));
    assert_eq!(h.target().state(), TargetState::Ready);
    assert!(h.target().texture_of_r2s().is_some());
    assert!(h.target().is_all_high_quality_in_view());
    assert_eq!(h.context().presented_frames(), 1);

    let ahead = match projection {
        Projection::Erp => 1,
        Projection::Cubemap => CubeFace::NegativeZ.index(),
    };
    assert!(h.selected(0).contains(&ahead));
    assert_eq!(
        h.manager.status_and_pose().unwrap().status,
        RenderStatus::Success
    );
}

/// Looking straight ahead at an eight-tile picture needs the four central tiles.
#[test]
fn test_front_view_selects_central_tiles() {
    let mut h = Harness::new(render_config(), erp_stream(vec![QualityLevel::full(0, 1)]));
    h.manager.set_viewport(0.0, 0.0).unwrap();
    h.manager.render(0).unwrap();

    let target = h.target();
    assert_eq!(h.selected(0), BTreeSet::from([1, 2, 5, 6]));
    assert!(target.is_all_high_quality_in_view());
    assert_eq!(target.quality_ranking_info().main_quality_ranking, 0);
    assert_eq!(target.quality_ranking_info().num_quality, 1);
    assert_eq!(
        target.transform_type().keys().copied().collect::<Vec<_>>(),
        vec![1, 2, 5, 6]
    );
}

/// Compositing goes to the target framebuffer, the surface draw to the screen.
#[test]
fn test_frame_command_stream() {
    let mut h = Harness::new(render_config(), erp_stream(vec![QualityLevel::full(0, 1)]));
    h.take_commands();
    h.manager.render(0).unwrap();
    let r2s = h.target().texture_of_r2s().unwrap();
    let commands = h.take_commands();

    let passes: Vec<PassTarget> = commands
        .iter()
        .filter_map(|c| match c {
            BackendCommand::BeginPass { target, .. } => Some(*target),
            _ => None,
        })
        .collect();
    assert_eq!(passes.len(), 2);
    assert!(matches!(passes[0], PassTarget::Framebuffer(_)));
    assert_eq!(passes[1], PassTarget::Screen);

    let regions = commands
        .iter()
        .filter(|c| matches!(c, BackendCommand::DrawRegion(_)))
        .count();
    assert_eq!(regions, 4);
    assert!(commands
        .iter()
        .any(|c| matches!(c, BackendCommand::CopyTexture { dst, .. } if *dst == r2s)));
    assert!(matches!(
        commands.iter().rev().find(|c| matches!(c, BackendCommand::DrawMesh(_))),
        Some(BackendCommand::DrawMesh(draw)) if draw.texture == r2s
    ));
    assert_eq!(commands.last(), Some(&BackendCommand::EndPass));
}

/// Looking down where only the low level is offered blends the sharp tiles in.
#[test]
fn test_low_quality_in_view_blends() {
    let mut h = Harness::new(
        render_config(),
        erp_stream(vec![
            QualityLevel::partial(0, 1, 0..4),
            QualityLevel::partial(1, 2, 4..8).with_transform(TransformType::Rotate90),
        ]),
    );
    h.manager.set_viewport(0.0, -45.0).unwrap();

    let start = Instant::now();
    h.manager.render_at(0, start).unwrap();
    assert!(!h.target().is_all_high_quality_in_view());
    assert!(h.selected(1).is_superset(&BTreeSet::from([5, 6])));
    assert_eq!(h.target().avg_changed_time(), 0.0);
    assert!(h
        .target()
        .transform_type()
        .values()
        .any(|t| *t == TransformType::Rotate90));

    let mut previous = 0.0;
    for frame in 1..5u32 {
        h.manager
            .render_at(frame as u64, start + Duration::from_millis(16) * frame)
            .unwrap();
        let elapsed = h.target().avg_changed_time();
        assert!(elapsed > previous);
        previous = elapsed;
    }

    // A new direction changes the tiles in view and restarts the fade.
    h.manager.set_viewport(0.0, 50.0).unwrap();
    h.manager
        .render_at(5, start + Duration::from_millis(100))
        .unwrap();
    assert_eq!(h.target().avg_changed_time(), 0.0);
    assert!(h.target().is_all_high_quality_in_view());
}

/// Identical inputs give identical selections and transform maps.
#[test]
fn test_selection_is_deterministic() {
    let levels = || {
        vec![
            QualityLevel::partial(0, 1, [1, 2, 5, 6]),
            QualityLevel::full(1, 2).with_transform(TransformType::MirrorHorizontal),
        ]
    };
    let mut a = Harness::new(render_config(), erp_stream(levels()));
    let mut b = Harness::new(render_config(), erp_stream(levels()));

    for (pts, (yaw, pitch)) in [(0.0, 0.0), (75.0, 10.0), (-150.0, -30.0), (179.0, 60.0)]
        .into_iter()
        .enumerate()
    {
        for h in [&mut a, &mut b] {
            h.manager.set_viewport(yaw, pitch).unwrap();
            h.manager.render(pts as u64).unwrap();
        }
        assert_eq!(
            a.target().quality_ranking_info(),
            b.target().quality_ranking_info()
        );
        assert_eq!(a.target().transform_type(), b.target().transform_type());
    }
}

/// A frame whose tiles are missing is skipped and the last picture kept.
#[test]
fn test_unavailable_tile_skips_frame() {
    let mut h = Harness::new(render_config(), erp_stream(vec![QualityLevel::full(0, 1)]));
    h.manager.render(0).unwrap();
    let r2s = h.target().texture_of_r2s();
    let info = h.target().quality_ranking_info().clone();

    h.factory_mut().set_tile_available(0, 1, false);
    let err = h.manager.render(1).unwrap_err();
    assert!(matches!(err, RenderError::TileUnavailable(_)));
    assert!(err.is_transient());
    assert!(h.manager.is_initialized());
    assert_eq!(h.target().texture_of_r2s(), r2s);
    assert_eq!(h.target().quality_ranking_info(), &info);
    assert_eq!(h.context().presented_frames(), 1);
    assert_eq!(
        h.manager.status_and_pose().unwrap().status,
        RenderStatus::TileUnavailable
    );

    h.factory_mut().set_tile_available(0, 1, true);
    assert_eq!(h.manager.render(2), Ok(RenderStatus::Success));
    assert_eq!(h.context().presented_frames(), 2);
}

/// A lower-quality copy covers for a missing sharp tile.
#[test]
fn test_unavailable_tile_substituted() {
    let mut h = Harness::new(
        render_config(),
        erp_stream(vec![QualityLevel::full(0, 1), QualityLevel::full(1, 2)]),
    );
    h.manager.render(0).unwrap();
    assert!(h.target().is_all_high_quality_in_view());

    h.factory_mut().set_tile_available(0, 1, false);
    h.manager.render(1).unwrap();
    assert!(!h.selected(0).contains(&1));
    assert!(h.selected(1).contains(&1));
    assert!(!h.target().is_all_high_quality_in_view());
}

// ============================================================================
// Lifecycle Tests
// ============================================================================

#[rstest]
#[case::no_source(0)]
#[case::no_factory(1)]
#[case::no_context(2)]
fn test_initialize_requires_every_collaborator(#[case] missing: usize) {
    let config = render_config();
    let collaborators = Collaborators::new(erp_stream(vec![QualityLevel::full(0, 1)]), &config);
    let counts = collaborators.counts.clone();
    let (mut source, mut factory, mut context) = collaborators.boxed();
    match missing {
        0 => source = None,
        1 => factory = None,
        _ => context = None,
    }

    let mut manager = RenderManager::new(config);
    let err = manager.initialize(source, factory, context).unwrap_err();
    assert_eq!(err.status(), RenderStatus::InvalidArgument);
    assert!(!manager.is_initialized());
    assert_eq!(counts.all(), (0, 0, 0));
}

#[test]
fn test_initialize_unsupported_format() {
    let config = render_config();
    let collaborators = Collaborators::new(
        SyntheticConfig {
            projection_tag: 7,
            ..erp_stream(vec![QualityLevel::full(0, 1)])
        },
        &config,
    );
    let counts = collaborators.counts.clone();
    let (source, factory, context) = collaborators.boxed();

    let mut manager = RenderManager::new(config);
    let err = manager.initialize(source, factory, context).unwrap_err();
    assert_eq!(err, RenderError::UnsupportedFormat(7));
    assert_eq!(counts.all(), (0, 0, 0));
}

#[test]
fn test_initialize_twice() {
    let config = render_config();
    let mut h = Harness::new(config.clone(), erp_stream(vec![QualityLevel::full(0, 1)]));
    let (source, factory, context) = Collaborators::new(cubemap_stream(), &config).boxed();
    assert_eq!(
        h.manager.initialize(source, factory, context),
        Err(RenderError::AlreadyInitialized)
    );
    // The running pipeline is untouched.
    assert_eq!(h.manager.render(0), Ok(RenderStatus::Success));
    assert_eq!(
        h.manager.projection_format(),
        Some(ProjectionFormat::Equirectangular)
    );
}

/// Running out of textures while building the target leaves nothing behind.
#[rstest]
#[case::erp(Projection::Erp)]
#[case::cubemap(Projection::Cubemap)]
fn test_initialize_resource_failure_releases_everything(#[case] projection: Projection) {
    let config = render_config();
    let mut collaborators = Collaborators::new(projection.stream(), &config);
    collaborators
        .context
        .inner_mut()
        .inner_mut()
        .set_texture_budget(Some(1));
    let counts = collaborators.counts.clone();
    let (source, factory, context) = collaborators.boxed();

    let mut manager = RenderManager::new(config);
    let err = manager.initialize(source, factory, context).unwrap_err();
    assert_eq!(err.status(), RenderStatus::ResourceError);
    assert!(!manager.is_initialized());
    assert_eq!(counts.all(), (0, 0, 0));
}

/// A resource error mid-stream tears the pipeline down.
#[test]
fn test_resource_error_during_render_shuts_down() {
    let mut h = Harness::new(render_config(), erp_stream(vec![QualityLevel::full(0, 1)]));
    // Composite and R2S textures exist; the factory's first upload cannot.
    let live = h.counts.textures();
    h.backend_mut().set_texture_budget(Some(live));

    let err = h.manager.render(0).unwrap_err();
    assert_eq!(err.status(), RenderStatus::ResourceError);
    assert!(!h.manager.is_initialized());
    assert_eq!(h.manager.render(1), Err(RenderError::NotInitialized));
    assert_eq!(h.counts.all(), (0, 0, 0));
}

#[rstest]
#[case::erp(Projection::Erp)]
#[case::cubemap(Projection::Cubemap)]
fn test_resize_does_not_leak(#[case] projection: Projection) {
    let mut h = Harness::new(render_config(), projection.stream());
    h.manager.render(0).unwrap();
    let before = h.counts.all();
    let old_r2s = h.target().texture_of_r2s().unwrap();

    h.manager.resize_target(200, 100).unwrap();
    assert_eq!(h.target().state(), TargetState::TargetReady);
    assert!(!h.backend().is_texture_live(old_r2s));
    assert_eq!(h.counts.all(), before);

    h.manager.render(1).unwrap();
    let new_r2s = h.target().texture_of_r2s().unwrap();
    assert_eq!(h.backend().texture_size(new_r2s), Some((200, 100)));
    assert_eq!(h.counts.all(), before);

    assert!(matches!(
        h.manager.resize_target(0, 100),
        Err(RenderError::InvalidArgument(_))
    ));
}

/// Rendering after the stream ends does no GPU work.
#[rstest]
#[case::erp(Projection::Erp)]
#[case::cubemap(Projection::Cubemap)]
fn test_end_of_stream(#[case] projection: Projection) {
    let stream = SyntheticConfig {
        frame_count: Some(2),
        ..projection.stream()
    };
    let mut h = Harness::new(render_config(), stream);
    assert_eq!(h.manager.render(0), Ok(RenderStatus::Success));
    assert_eq!(h.manager.render(1), Ok(RenderStatus::Success));
    assert!(h.manager.is_eos());

    h.take_commands();
    assert_eq!(h.manager.render(2), Ok(RenderStatus::EndOfStream));
    assert_eq!(h.manager.render(3), Ok(RenderStatus::EndOfStream));
    assert!(h.take_commands().is_empty());
    assert_eq!(h.context().presented_frames(), 2);
    assert_eq!(
        h.manager.status_and_pose().unwrap().status,
        RenderStatus::EndOfStream
    );
}

/// Switching the stream's projection rebuilds the target and surface render.
#[test]
fn test_projection_change_rebuilds_pipeline() {
    let stream = SyntheticConfig {
        picture_width: 600,
        picture_height: 400,
        cols: 3,
        rows: 2,
        ..Default::default()
    };
    let mut h = Harness::new(render_config(), stream);
    h.manager.render(0).unwrap();
    let old_r2s = h.target().texture_of_r2s().unwrap();

    h.control.set_projection_tag(1);
    assert_eq!(h.manager.render(1), Ok(RenderStatus::Success));
    assert_eq!(h.manager.projection_format(), Some(ProjectionFormat::Cubemap));
    assert_eq!(h.target().format(), ProjectionFormat::Cubemap);
    assert!(!h.backend().is_texture_live(old_r2s));
    assert!(h.selected(0).contains(&CubeFace::NegativeZ.index()));

    // One video texture, composite and R2S; tile quad and cube mesh.
    assert_eq!(h.counts.all(), (3, 1, 4));

    h.control.set_projection_tag(7);
    assert_eq!(h.manager.render(2), Err(RenderError::UnsupportedFormat(7)));
    assert!(h.manager.is_initialized());
}

#[test]
fn test_failed_projection_change_keeps_pipeline() {
    // 800x400 in a 4x2 grid has no valid cubemap layout.
    let mut h = Harness::new(render_config(), erp_stream(vec![QualityLevel::full(0, 1)]));
    h.manager.render(0).unwrap();
    let r2s = h.target().texture_of_r2s().unwrap();
    let live = h.counts.all();

    h.control.set_projection_tag(1);
    assert!(matches!(
        h.manager.render(1),
        Err(RenderError::InvalidArgument(_))
    ));
    assert!(h.manager.is_initialized());
    assert_eq!(
        h.manager.projection_format(),
        Some(ProjectionFormat::Equirectangular)
    );
    assert_eq!(h.target().state(), TargetState::Ready);
    assert!(h.backend().is_texture_live(r2s));
    assert_eq!(h.counts.all(), live);

    h.control.set_projection_tag(0);
    assert_eq!(h.manager.render(2), Ok(RenderStatus::Success));
    assert_eq!(h.manager.render(3), Ok(RenderStatus::Success));
    assert_eq!(h.target().texture_of_r2s(), Some(r2s));
    assert_eq!(h.counts.all(), live);
}

#[test]
fn test_initialize_rejects_invalid_config() {
    let mut config = render_config();
    config.blend.duration_secs = 0.0;
    let collaborators = Collaborators::new(erp_stream(vec![QualityLevel::full(0, 1)]), &config);
    let counts = collaborators.counts.clone();
    let (source, factory, context) = collaborators.boxed();

    let mut manager = RenderManager::new(config);
    let err = manager.initialize(source, factory, context).unwrap_err();
    assert_eq!(err.status(), RenderStatus::InvalidArgument);
    assert!(!manager.is_initialized());
    assert_eq!(counts.all(), (0, 0, 0));
}

#[test]
fn test_shutdown_and_reinitialize() {
    let config = render_config();
    let mut h = Harness::new(config.clone(), erp_stream(vec![QualityLevel::full(0, 1)]));
    h.manager.render(0).unwrap();
    let handle = h.manager.viewport_handle().unwrap();

    h.manager.shutdown();
    assert_eq!(h.counts.all(), (0, 0, 0));
    assert!(h.manager.viewport_handle().is_none());
    // Handles outlive the pipeline.
    handle.change_viewport(30.0, 0.0);

    let (source, factory, context) = Collaborators::new(cubemap_stream(), &config).boxed();
    h.manager.initialize(source, factory, context).unwrap();
    assert_eq!(h.manager.render(0), Ok(RenderStatus::Success));
}

// ============================================================================
// Viewport Tests
// ============================================================================

#[test]
fn test_viewport_calls_before_initialize() {
    let manager = RenderManager::new(render_config());
    assert_eq!(manager.get_viewport(), Err(RenderError::NotInitialized));
    assert_eq!(
        manager.change_viewport(1.0, 2.0),
        Err(RenderError::NotInitialized)
    );
    assert_eq!(
        manager.set_viewport(1.0, 2.0),
        Err(RenderError::NotInitialized)
    );
}

#[test]
fn test_non_finite_viewport() {
    let h = Harness::new(render_config(), erp_stream(vec![QualityLevel::full(0, 1)]));
    let pose = h.manager.set_viewport(20.0, 10.0).unwrap();
    assert!(matches!(
        h.manager.set_viewport(f32::NAN, 0.0),
        Err(RenderError::InvalidArgument(_))
    ));
    assert_eq!(h.manager.change_viewport(0.0, f32::INFINITY), Ok(pose));
    assert_eq!(h.manager.get_viewport(), Ok(pose));
}

/// Readers never observe a half-written pose.
#[test]
fn test_concurrent_viewport_updates() {
    let h = Harness::new(render_config(), erp_stream(vec![QualityLevel::full(0, 1)]));
    let handle = h.manager.viewport_handle().unwrap();
    let stop = Arc::new(AtomicBool::new(false));

    let writers: Vec<_> = (0..4)
        .map(|w| {
            let handle = Arc::clone(&handle);
            thread::spawn(move || {
                for i in 0..2000 {
                    // Yaw stays inside (-180, 180) and pitch inside the clamp.
                    let yaw = ((i * 7 + w * 13) % 160) as f32;
                    handle.change_viewport(yaw, yaw / 2.0);
                }
            })
        })
        .collect();

    let reader = {
        let handle = Arc::clone(&handle);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let mut last_generation = 0;
            let mut reads = 0u64;
            while !stop.load(Ordering::Acquire) {
                let state = handle.status_and_pose();
                assert_eq!(state.pose.pitch, state.pose.yaw / 2.0);
                assert!(state.generation >= last_generation);
                last_generation = state.generation;
                reads += 1;
            }
            reads
        })
    };

    for writer in writers {
        writer.join().unwrap();
    }
    stop.store(true, Ordering::Release);
    assert!(reader.join().unwrap() > 0);
    assert_eq!(handle.status_and_pose().generation, 8000);
}

/// Rendering on one thread while another moves the viewport.
#[test]
fn test_render_while_sensor_updates() {
    let mut h = Harness::new(render_config(), erp_stream(vec![QualityLevel::full(0, 1)]));
    let handle = h.manager.viewport_handle().unwrap();
    let stop = Arc::new(AtomicBool::new(false));

    let sensor = {
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let mut yaw = 0.0f32;
            while !stop.load(Ordering::Acquire) {
                yaw += 3.0;
                handle.change_viewport(yaw, 0.0);
                thread::yield_now();
            }
        })
    };

    for pts in 0..50 {
        assert_eq!(h.manager.render(pts), Ok(RenderStatus::Success));
        assert!(h.target().quality_ranking_info().tile_count() > 0);
    }
    stop.store(true, Ordering::Release);
    sensor.join().unwrap();
    assert_eq!(h.context().presented_frames(), 50);
}
