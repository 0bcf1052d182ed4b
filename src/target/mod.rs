//! Render targets
//!
//! A render target owns the mapping from the transmitted tile layout to the
//! composite picture for one projection format. Every frame it picks the
//! tiles the viewport needs, composites them into an off-screen surface and
//! resolves that surface into the render-to-screen (R2S) texture.
//!
//! The supported formats form a closed set, wrapped by [`ProjectionTarget`].

mod blend;
mod common;
pub mod cubemap;
pub mod erp;
mod selection;

use std::collections::BTreeMap;
use std::time::Instant;

use crate::backend::{RenderBackend, TextureHandle};
use crate::config::RenderConfig;
use crate::error::RenderResult;
use crate::media::{MediaInfo, RenderSourceFactory};
use crate::projection::ProjectionFormat;
use crate::tiles::{QualityRankingInfo, TransformType};
use crate::viewport::Viewport;

pub use common::TargetCore;
pub use cubemap::CubemapRenderTarget;
pub use erp::ErpRenderTarget;

/// Lifecycle of a render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetState {
    Created,
    Initialized,
    TargetReady,
    Ready,
    Destroyed,
}

impl TargetState {
    pub fn name(&self) -> &'static str {
        match self {
            TargetState::Created => "created",
            TargetState::Initialized => "initialized",
            TargetState::TargetReady => "target ready",
            TargetState::Ready => "ready",
            TargetState::Destroyed => "destroyed",
        }
    }
}

/// Capability shared by all projection-specific render targets.
///
/// Driven from the render thread only.
pub trait RenderTarget {
    fn core(&self) -> &TargetCore;

    /// Bind to the factory's tile layout and allocate fixed geometry.
    fn initialize(
        &mut self,
        backend: &mut dyn RenderBackend,
        factory: &dyn RenderSourceFactory,
    ) -> RenderResult<()>;

    /// Allocate the composite surface and R2S texture, releasing old ones.
    fn create_render_target(&mut self, backend: &mut dyn RenderBackend) -> RenderResult<()>;

    /// Rebuild the surfaces at a new size.
    fn resize(&mut self, backend: &mut dyn RenderBackend, width: u32, height: u32)
        -> RenderResult<()>;

    /// [`RenderTarget::update`] with an explicit frame time.
    fn update_at(
        &mut self,
        backend: &mut dyn RenderBackend,
        factory: &dyn RenderSourceFactory,
        viewport: &Viewport,
        now: Instant,
    ) -> RenderResult<()>;

    /// Refresh tile selection and the R2S texture for `viewport`.
    fn update(
        &mut self,
        backend: &mut dyn RenderBackend,
        factory: &dyn RenderSourceFactory,
        viewport: &Viewport,
    ) -> RenderResult<()> {
        self.update_at(backend, factory, viewport, Instant::now())
    }

    /// Free all GPU handles.
    fn release(&mut self, backend: &mut dyn RenderBackend);

    fn format(&self) -> ProjectionFormat {
        self.core().format()
    }

    fn state(&self) -> TargetState {
        self.core().state()
    }

    fn texture_of_r2s(&self) -> Option<TextureHandle> {
        self.core().texture_of_r2s()
    }

    fn transform_type(&self) -> &BTreeMap<u32, TransformType> {
        self.core().transform_type()
    }

    fn quality_ranking_info(&self) -> &QualityRankingInfo {
        self.core().quality_ranking_info()
    }

    fn is_all_high_quality_in_view(&self) -> bool {
        self.core().is_all_high_quality_in_view()
    }

    fn avg_changed_time(&self) -> f32 {
        self.core().avg_changed_time()
    }
}

/// Render target for one of the supported projection formats.
#[derive(Debug)]
pub enum ProjectionTarget {
    Erp(ErpRenderTarget),
    Cubemap(CubemapRenderTarget),
}

impl ProjectionTarget {
    pub fn new(format: ProjectionFormat, config: &RenderConfig, media: MediaInfo) -> Self {
        match format {
            ProjectionFormat::Equirectangular => {
                ProjectionTarget::Erp(ErpRenderTarget::new(config, media))
            }
            ProjectionFormat::Cubemap => {
                ProjectionTarget::Cubemap(CubemapRenderTarget::new(config, media))
            }
        }
    }
}

impl RenderTarget for ProjectionTarget {
    fn core(&self) -> &TargetCore {
        match self {
            ProjectionTarget::Erp(target) => target.core(),
            ProjectionTarget::Cubemap(target) => target.core(),
        }
    }

    fn initialize(
        &mut self,
        backend: &mut dyn RenderBackend,
        factory: &dyn RenderSourceFactory,
    ) -> RenderResult<()> {
        match self {
            ProjectionTarget::Erp(target) => target.initialize(backend, factory),
            ProjectionTarget::Cubemap(target) => target.initialize(backend, factory),
        }
    }

    fn create_render_target(&mut self, backend: &mut dyn RenderBackend) -> RenderResult<()> {
        match self {
            ProjectionTarget::Erp(target) => target.create_render_target(backend),
            ProjectionTarget::Cubemap(target) => target.create_render_target(backend),
        }
    }

    fn resize(
        &mut self,
        backend: &mut dyn RenderBackend,
        width: u32,
        height: u32,
    ) -> RenderResult<()> {
        match self {
            ProjectionTarget::Erp(target) => target.resize(backend, width, height),
            ProjectionTarget::Cubemap(target) => target.resize(backend, width, height),
        }
    }

    fn update_at(
        &mut self,
        backend: &mut dyn RenderBackend,
        factory: &dyn RenderSourceFactory,
        viewport: &Viewport,
        now: Instant,
    ) -> RenderResult<()> {
        match self {
            ProjectionTarget::Erp(target) => target.update_at(backend, factory, viewport, now),
            ProjectionTarget::Cubemap(target) => target.update_at(backend, factory, viewport, now),
        }
    }

    fn release(&mut self, backend: &mut dyn RenderBackend) {
        match self {
            ProjectionTarget::Erp(target) => target.release(backend),
            ProjectionTarget::Cubemap(target) => target.release(backend),
        }
    }
}

static_assertions::assert_impl_all!(ProjectionTarget: Send);
static_assertions::assert_not_impl_any!(ProjectionTarget: Sync);
