//! Common utilities for render pipeline integration tests.
//!
//! Every test drives a [`RenderManager`] over a synthetic stream on the
//! dummy backend. The backend is wrapped so that live handle counts stay
//! observable after the manager has dropped its context.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use panorama_render::backend::{
    BackendCommand, BackendResult, BufferDescriptor, BufferHandle, DummyBackend,
    FramebufferHandle, MeshDraw, PassTarget, RegionDraw, RenderBackend, TextureDescriptor,
    TextureHandle,
};
use panorama_render::media::{
    QualityLevel, SyntheticConfig, SyntheticControl, SyntheticFactory, SyntheticSource,
};
use panorama_render::{
    HeadlessContext, MediaSource, ProjectionFormat, ProjectionTarget, RenderConfig,
    RenderContext, RenderManager, RenderSourceFactory, RenderTarget,
};

// ============================================================================
// Projection Enumeration
// ============================================================================

/// Projection formats the pipeline tests run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    Erp,
    Cubemap,
}

impl Projection {
    pub fn format(self) -> ProjectionFormat {
        match self {
            Projection::Erp => ProjectionFormat::Equirectangular,
            Projection::Cubemap => ProjectionFormat::Cubemap,
        }
    }

    /// Single-quality stream laid out for this projection.
    pub fn stream(self) -> SyntheticConfig {
        match self {
            Projection::Erp => erp_stream(vec![QualityLevel::full(0, 1)]),
            Projection::Cubemap => cubemap_stream(),
        }
    }
}

/// 800x400 picture in a 4x2 grid.
pub fn erp_stream(levels: Vec<QualityLevel>) -> SyntheticConfig {
    SyntheticConfig {
        picture_width: 800,
        picture_height: 400,
        levels,
        ..Default::default()
    }
}

/// 600x400 picture with one tile per cube face.
pub fn cubemap_stream() -> SyntheticConfig {
    SyntheticConfig {
        projection_tag: 1,
        picture_width: 600,
        picture_height: 400,
        cols: 3,
        rows: 2,
        ..Default::default()
    }
}

pub fn render_config() -> RenderConfig {
    RenderConfig {
        target_width: 400,
        target_height: 200,
        output_width: 320,
        output_height: 240,
        viewport_samples: 16,
        ..Default::default()
    }
}

// ============================================================================
// Tracking Backend
// ============================================================================

/// Live handle counts shared with the test.
#[derive(Debug, Clone, Default)]
pub struct LiveCounts {
    textures: Arc<AtomicUsize>,
    framebuffers: Arc<AtomicUsize>,
    buffers: Arc<AtomicUsize>,
}

impl LiveCounts {
    pub fn textures(&self) -> usize {
        self.textures.load(Ordering::Acquire)
    }

    pub fn framebuffers(&self) -> usize {
        self.framebuffers.load(Ordering::Acquire)
    }

    pub fn buffers(&self) -> usize {
        self.buffers.load(Ordering::Acquire)
    }

    /// (textures, framebuffers, buffers)
    pub fn all(&self) -> (usize, usize, usize) {
        (self.textures(), self.framebuffers(), self.buffers())
    }
}

/// Dummy backend publishing its live handle counts after every change.
#[derive(Debug)]
pub struct TrackingBackend {
    inner: DummyBackend,
    counts: LiveCounts,
}

impl TrackingBackend {
    pub fn new(inner: DummyBackend) -> (Self, LiveCounts) {
        let counts = LiveCounts::default();
        let backend = Self {
            inner,
            counts: counts.clone(),
        };
        (backend, counts)
    }

    pub fn inner(&self) -> &DummyBackend {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut DummyBackend {
        &mut self.inner
    }

    fn publish(&self) {
        self.counts
            .textures
            .store(self.inner.texture_count(), Ordering::Release);
        self.counts
            .framebuffers
            .store(self.inner.framebuffer_count(), Ordering::Release);
        self.counts
            .buffers
            .store(self.inner.buffer_count(), Ordering::Release);
    }
}

impl RenderBackend for TrackingBackend {
    fn name(&self) -> &'static str {
        "tracking dummy"
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        let result = self.inner.create_texture(desc);
        self.publish();
        result
    }

    fn write_texture(
        &mut self,
        texture: TextureHandle,
        data: &[u8],
        width: u32,
        height: u32,
    ) -> BackendResult<()> {
        self.inner.write_texture(texture, data, width, height)
    }

    fn copy_texture(&mut self, src: TextureHandle, dst: TextureHandle) -> BackendResult<()> {
        self.inner.copy_texture(src, dst)
    }

    fn create_framebuffer(&mut self, color: TextureHandle) -> BackendResult<FramebufferHandle> {
        let result = self.inner.create_framebuffer(color);
        self.publish();
        result
    }

    fn create_buffer_init(
        &mut self,
        desc: &BufferDescriptor,
        data: &[u8],
    ) -> BackendResult<BufferHandle> {
        let result = self.inner.create_buffer_init(desc, data);
        self.publish();
        result
    }

    fn begin_pass(&mut self, target: PassTarget, clear: Option<[f32; 4]>) -> BackendResult<()> {
        self.inner.begin_pass(target, clear)
    }

    fn draw_region(&mut self, draw: &RegionDraw) -> BackendResult<()> {
        self.inner.draw_region(draw)
    }

    fn draw_mesh(&mut self, draw: &MeshDraw) -> BackendResult<()> {
        self.inner.draw_mesh(draw)
    }

    fn end_pass(&mut self) -> BackendResult<()> {
        self.inner.end_pass()
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.inner.destroy_texture(texture);
        self.publish();
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        self.inner.destroy_framebuffer(framebuffer);
        self.publish();
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.inner.destroy_buffer(buffer);
        self.publish();
    }
}

pub type TestContext = HeadlessContext<TrackingBackend>;

/// Route `log` output through the test harness; repeated calls are fine.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ============================================================================
// Harness
// ============================================================================

/// Collaborators for one stream, not yet handed to a manager.
pub struct Collaborators {
    pub source: SyntheticSource,
    pub factory: SyntheticFactory,
    pub context: TestContext,
    pub counts: LiveCounts,
}

impl Collaborators {
    pub fn new(stream: SyntheticConfig, config: &RenderConfig) -> Self {
        init_logging();
        let (source, factory) =
            SyntheticSource::new(stream).expect("synthetic stream should be valid");
        let (backend, counts) = TrackingBackend::new(DummyBackend::new());
        let context = HeadlessContext::new(backend, config.output_width, config.output_height);
        Self {
            source,
            factory,
            context,
            counts,
        }
    }

    pub fn boxed(
        self,
    ) -> (
        Option<Box<dyn MediaSource>>,
        Option<Box<dyn RenderSourceFactory>>,
        Option<Box<dyn RenderContext>>,
    ) {
        (
            Some(Box::new(self.source)),
            Some(Box::new(self.factory)),
            Some(Box::new(self.context)),
        )
    }
}

/// An initialized manager with handles into its collaborators.
pub struct Harness {
    pub manager: RenderManager,
    pub control: SyntheticControl,
    pub counts: LiveCounts,
}

impl Harness {
    pub fn new(config: RenderConfig, stream: SyntheticConfig) -> Self {
        let collaborators = Collaborators::new(stream, &config);
        let control = collaborators.source.control();
        let counts = collaborators.counts.clone();
        let (source, factory, context) = collaborators.boxed();

        let mut manager = RenderManager::new(config);
        manager
            .initialize(source, factory, context)
            .expect("pipeline should initialize");
        Self {
            manager,
            control,
            counts,
        }
    }

    pub fn context(&self) -> &TestContext {
        self.manager
            .render_context()
            .and_then(|c| c.as_any().downcast_ref::<TestContext>())
            .expect("test context")
    }

    pub fn backend(&self) -> &DummyBackend {
        self.context().inner().inner()
    }

    pub fn backend_mut(&mut self) -> &mut DummyBackend {
        self.manager
            .render_context_mut()
            .and_then(|c| c.as_any_mut().downcast_mut::<TestContext>())
            .expect("test context")
            .inner_mut()
            .inner_mut()
    }

    pub fn take_commands(&mut self) -> Vec<BackendCommand> {
        self.backend_mut().take_commands()
    }

    pub fn factory_mut(&mut self) -> &mut SyntheticFactory {
        self.manager
            .render_source_factory_mut()
            .and_then(|f| f.as_any_mut().downcast_mut::<SyntheticFactory>())
            .expect("synthetic factory")
    }

    pub fn target(&self) -> &ProjectionTarget {
        self.manager.render_target().expect("render target")
    }

    /// Tile ids selected at `ranking` in the last frame.
    pub fn selected(&self, ranking: i32) -> BTreeSet<u32> {
        self.target()
            .quality_ranking_info()
            .tiles_at(ranking)
            .iter()
            .map(|t| t.tile_id)
            .collect()
    }
}
