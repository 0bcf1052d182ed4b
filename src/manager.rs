//! Render manager: the host-facing entry point of the render core.
//!
//! The manager owns the pipeline built by [`RenderManager::initialize`]:
//! the media collaborators, the render context, the viewport manager, the
//! surface render and the render target. `render` drives one frame on the
//! render thread; viewport calls may come from any thread, either through
//! the manager or through a [`ViewportHandle`].

use std::sync::Arc;
use std::time::Instant;

use crate::backend::RenderBackend;
use crate::config::RenderConfig;
use crate::context::RenderContext;
use crate::error::{RenderError, RenderResult, RenderStatus};
use crate::media::{MediaInfo, MediaSource, RenderSourceFactory};
use crate::projection::ProjectionFormat;
use crate::surface::SurfaceRender;
use crate::target::{ProjectionTarget, RenderTarget};
use crate::viewport::{Pose, PoseState, ViewportHandle, ViewportManager};

struct Pipeline {
    source: Box<dyn MediaSource>,
    factory: Box<dyn RenderSourceFactory>,
    context: Box<dyn RenderContext>,
    format: ProjectionFormat,
    viewport: ViewportHandle,
    surface: SurfaceRender,
    target: ProjectionTarget,
    last_pts: Option<u64>,
    frames: u64,
}

/// Select the surface render for a projection format tag.
fn create_render(tag: i32, backend: &mut dyn RenderBackend) -> RenderResult<SurfaceRender> {
    SurfaceRender::new(ProjectionFormat::from_tag(tag)?, backend)
}

/// Select, initialize and allocate the render target for a projection
/// format tag. Nothing stays allocated on failure.
fn create_render_target(
    tag: i32,
    config: &RenderConfig,
    media: MediaInfo,
    backend: &mut dyn RenderBackend,
    factory: &dyn RenderSourceFactory,
) -> RenderResult<ProjectionTarget> {
    let mut target = ProjectionTarget::new(ProjectionFormat::from_tag(tag)?, config, media);
    let created = target
        .initialize(backend, factory)
        .and_then(|_| target.create_render_target(backend));
    match created {
        Ok(()) => Ok(target),
        Err(e) => {
            target.release(backend);
            Err(e)
        }
    }
}

/// Surface render and render target for `tag`, or neither.
fn create_pair(
    tag: i32,
    config: &RenderConfig,
    media: MediaInfo,
    backend: &mut dyn RenderBackend,
    factory: &dyn RenderSourceFactory,
) -> RenderResult<(SurfaceRender, ProjectionTarget)> {
    let mut surface = create_render(tag, backend)?;
    match create_render_target(tag, config, media, backend, factory) {
        Ok(target) => Ok((surface, target)),
        Err(e) => {
            surface.release(backend);
            Err(e)
        }
    }
}

impl Pipeline {
    fn render_frame(&mut self, config: &RenderConfig, pts: u64, now: Instant) -> RenderResult<()> {
        let tag = self.source.projection_format();
        if tag != self.format.tag() {
            self.rebuild(config, tag)?;
        }

        let output_size = self.context.output_size();
        let backend = self.context.backend();
        self.factory.update(backend, pts)?;

        let viewport = self.viewport.viewport();
        self.target.update_at(backend, &*self.factory, &viewport, now)?;
        let texture = self
            .target
            .texture_of_r2s()
            .ok_or(RenderError::NotInitialized)?;
        self.surface
            .render(backend, texture, &viewport, output_size, config.clear_color)?;
        self.context.present()?;
        self.frames += 1;
        Ok(())
    }

    /// Swap the surface render and render target for a new projection format.
    ///
    /// The current pair stays in place until the new one is fully built.
    fn rebuild(&mut self, config: &RenderConfig, tag: i32) -> RenderResult<()> {
        let format = ProjectionFormat::from_tag(tag)?;
        log::info!(
            "Projection format changed from {} to {}, rebuilding render target",
            self.format.name(),
            format.name()
        );
        let media = self.source.media_info();
        let backend = self.context.backend();
        let (surface, target) = create_pair(tag, config, media, backend, &*self.factory)?;

        let mut old_surface = std::mem::replace(&mut self.surface, surface);
        let mut old_target = std::mem::replace(&mut self.target, target);
        old_target.release(backend);
        old_surface.release(backend);
        self.format = format;
        Ok(())
    }

    /// Release in reverse order of creation.
    fn teardown(&mut self) {
        let backend = self.context.backend();
        self.target.release(backend);
        self.surface.release(backend);
        self.factory.release(backend);
        log::info!("Render pipeline torn down after {} frames", self.frames);
    }
}

/// Orchestrates per-frame rendering of a tiled panoramic stream.
pub struct RenderManager {
    config: RenderConfig,
    pipeline: Option<Pipeline>,
}

static_assertions::assert_impl_all!(RenderManager: Send);

impl RenderManager {
    pub fn new(config: RenderConfig) -> Self {
        Self {
            config,
            pipeline: None,
        }
    }

    /// Build the pipeline for `source`.
    ///
    /// Every collaborator is required. On failure nothing created here is
    /// retained.
    pub fn initialize(
        &mut self,
        source: Option<Box<dyn MediaSource>>,
        factory: Option<Box<dyn RenderSourceFactory>>,
        context: Option<Box<dyn RenderContext>>,
    ) -> RenderResult<()> {
        if self.pipeline.is_some() {
            return Err(RenderError::AlreadyInitialized);
        }
        self.config
            .validate()
            .map_err(|e| RenderError::InvalidArgument(e.to_string()))?;
        let source = source
            .ok_or_else(|| RenderError::InvalidArgument("media source is missing".into()))?;
        let mut factory = factory.ok_or_else(|| {
            RenderError::InvalidArgument("render source factory is missing".into())
        })?;
        let mut context = context
            .ok_or_else(|| RenderError::InvalidArgument("render context is missing".into()))?;

        let tag = source.projection_format();
        let format = ProjectionFormat::from_tag(tag)?;
        let media = source.media_info();
        let viewport = Arc::new(ViewportManager::new(
            self.config.h_fov,
            self.config.v_fov,
            self.config.max_pitch,
        ));

        let backend = context.backend();
        let (surface, target) = match create_pair(tag, &self.config, media, backend, &*factory) {
            Ok(pair) => pair,
            Err(e) => {
                factory.release(backend);
                log::error!("Render pipeline initialization failed: {}", e);
                return Err(e);
            }
        };

        log::info!(
            "Render pipeline initialized: {} {}x{} on {} backend",
            format.name(),
            media.projected_width,
            media.projected_height,
            backend.name()
        );
        self.pipeline = Some(Pipeline {
            source,
            factory,
            context,
            format,
            viewport,
            surface,
            target,
            last_pts: None,
            frames: 0,
        });
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.pipeline.is_some()
    }

    /// Render the frame for `pts`.
    pub fn render(&mut self, pts: u64) -> RenderResult<RenderStatus> {
        self.render_at(pts, Instant::now())
    }

    /// [`RenderManager::render`] with an explicit frame time.
    ///
    /// After end of stream this does no backend work and reports
    /// [`RenderStatus::EndOfStream`]. Resource errors tear the pipeline
    /// down; it has to be initialized again.
    pub fn render_at(&mut self, pts: u64, now: Instant) -> RenderResult<RenderStatus> {
        let pipeline = self.pipeline.as_mut().ok_or(RenderError::NotInitialized)?;

        if pipeline.source.is_eos() {
            pipeline.viewport.set_status(RenderStatus::EndOfStream);
            return Ok(RenderStatus::EndOfStream);
        }
        if let Some(last) = pipeline.last_pts {
            if pts < last {
                log::warn!("Presentation timestamp went backwards: {} after {}", pts, last);
            }
        }
        pipeline.last_pts = Some(pts);

        match pipeline.render_frame(&self.config, pts, now) {
            Ok(()) => {
                pipeline.viewport.set_status(RenderStatus::Success);
                Ok(RenderStatus::Success)
            }
            Err(e) => {
                pipeline.viewport.set_status(e.status());
                if e.is_transient() {
                    log::warn!("Skipping frame at pts {}: {}", pts, e);
                } else if e.status() == RenderStatus::ResourceError {
                    log::error!("Render failed at pts {}: {}", pts, e);
                    self.shutdown();
                } else {
                    log::error!("Render failed at pts {}: {}", pts, e);
                }
                Err(e)
            }
        }
    }

    /// Whether the media source is exhausted. False before initialization.
    pub fn is_eos(&self) -> bool {
        self.pipeline
            .as_ref()
            .is_some_and(|pipeline| pipeline.source.is_eos())
    }

    fn viewport_manager(&self) -> RenderResult<&ViewportManager> {
        self.pipeline
            .as_ref()
            .map(|pipeline| pipeline.viewport.as_ref())
            .ok_or(RenderError::NotInitialized)
    }

    /// Sensor/input update; non-finite samples are dropped.
    pub fn change_viewport(&self, yaw: f32, pitch: f32) -> RenderResult<Pose> {
        Ok(self.viewport_manager()?.change_viewport(yaw, pitch))
    }

    pub fn set_viewport(&self, yaw: f32, pitch: f32) -> RenderResult<Pose> {
        self.viewport_manager()?.set_viewport(yaw, pitch)
    }

    pub fn get_viewport(&self) -> RenderResult<Pose> {
        Ok(self.viewport_manager()?.get_viewport())
    }

    pub fn status_and_pose(&self) -> RenderResult<PoseState> {
        Ok(self.viewport_manager()?.status_and_pose())
    }

    /// Handle for input threads; stays valid after shutdown.
    pub fn viewport_handle(&self) -> Option<ViewportHandle> {
        self.pipeline
            .as_ref()
            .map(|pipeline| Arc::clone(&pipeline.viewport))
    }

    pub fn render_config(&self) -> &RenderConfig {
        &self.config
    }

    pub fn projection_format(&self) -> Option<ProjectionFormat> {
        self.pipeline.as_ref().map(|pipeline| pipeline.format)
    }

    pub fn render_target(&self) -> Option<&ProjectionTarget> {
        self.pipeline.as_ref().map(|pipeline| &pipeline.target)
    }

    pub fn render_source_factory(&self) -> Option<&dyn RenderSourceFactory> {
        self.pipeline.as_ref().map(|pipeline| &*pipeline.factory)
    }

    pub fn render_source_factory_mut(
        &mut self,
    ) -> Option<&mut (dyn RenderSourceFactory + 'static)> {
        self.pipeline.as_mut().map(|pipeline| &mut *pipeline.factory)
    }

    pub fn render_context(&self) -> Option<&dyn RenderContext> {
        self.pipeline.as_ref().map(|pipeline| &*pipeline.context)
    }

    pub fn render_context_mut(&mut self) -> Option<&mut (dyn RenderContext + 'static)> {
        self.pipeline.as_mut().map(|pipeline| &mut *pipeline.context)
    }

    /// Rebuild the composite surfaces at a new size.
    pub fn resize_target(&mut self, width: u32, height: u32) -> RenderResult<()> {
        let pipeline = self.pipeline.as_mut().ok_or(RenderError::NotInitialized)?;
        let backend = pipeline.context.backend();
        pipeline.target.resize(backend, width, height)
    }

    /// Tear the pipeline down. The manager can be initialized again.
    pub fn shutdown(&mut self) {
        if let Some(mut pipeline) = self.pipeline.take() {
            pipeline.teardown();
        }
    }
}

impl Drop for RenderManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;
    use crate::context::HeadlessContext;
    use crate::media::{SyntheticConfig, SyntheticSource};

    fn small_config() -> RenderConfig {
        RenderConfig {
            target_width: 200,
            target_height: 100,
            viewport_samples: 8,
            ..Default::default()
        }
    }

    fn collaborators(
        config: SyntheticConfig,
    ) -> (
        Option<Box<dyn MediaSource>>,
        Option<Box<dyn RenderSourceFactory>>,
        Option<Box<dyn RenderContext>>,
    ) {
        let (source, factory) = SyntheticSource::new(config).unwrap();
        (
            Some(Box::new(source)),
            Some(Box::new(factory)),
            Some(Box::new(HeadlessContext::new(DummyBackend::new(), 320, 240))),
        )
    }

    fn small_stream() -> SyntheticConfig {
        SyntheticConfig {
            picture_width: 400,
            picture_height: 200,
            ..Default::default()
        }
    }

    #[test]
    fn test_not_initialized() {
        let mut manager = RenderManager::new(small_config());
        assert_eq!(manager.render(0), Err(RenderError::NotInitialized));
        assert_eq!(manager.get_viewport(), Err(RenderError::NotInitialized));
        assert!(!manager.is_eos());
        assert!(manager.viewport_handle().is_none());
        assert_eq!(manager.render_config(), &small_config());
    }

    #[test]
    fn test_render_frame() {
        let mut manager = RenderManager::new(small_config());
        let (source, factory, context) = collaborators(small_stream());
        manager.initialize(source, factory, context).unwrap();

        manager.set_viewport(10.0, 5.0).unwrap();
        assert_eq!(manager.render(0), Ok(RenderStatus::Success));
        let state = manager.status_and_pose().unwrap();
        assert_eq!(state.status, RenderStatus::Success);
        assert_eq!(state.pose, Pose::new(10.0, 5.0));

        let context = manager
            .render_context()
            .and_then(|c| c.as_any().downcast_ref::<HeadlessContext<DummyBackend>>())
            .unwrap();
        assert_eq!(context.presented_frames(), 1);
    }

    #[test]
    fn test_shutdown_releases_everything() {
        let mut manager = RenderManager::new(small_config());
        let (source, factory, context) = collaborators(small_stream());
        manager.initialize(source, factory, context).unwrap();
        manager.render(0).unwrap();

        let pipeline = manager.pipeline.as_mut().unwrap();
        pipeline.teardown();
        let backend = pipeline
            .context
            .as_any()
            .downcast_ref::<HeadlessContext<DummyBackend>>()
            .unwrap()
            .inner();
        assert_eq!(backend.texture_count(), 0);
        assert_eq!(backend.framebuffer_count(), 0);
        assert_eq!(backend.buffer_count(), 0);

        manager.shutdown();
        assert!(!manager.is_initialized());
    }
}
