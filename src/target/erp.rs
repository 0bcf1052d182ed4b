//! Equirectangular render target.

use std::time::Instant;

use crate::backend::RenderBackend;
use crate::config::RenderConfig;
use crate::error::RenderResult;
use crate::media::{MediaInfo, RenderSourceFactory};
use crate::projection::ProjectionFormat;
use crate::viewport::Viewport;

use super::{RenderTarget, TargetCore};

/// Composites tiles of an equirectangular picture.
///
/// Yaw maps linearly onto x and pitch onto y; the picture wraps at its left
/// and right edges, so tiles on the seam are hit from both sides.
#[derive(Debug)]
pub struct ErpRenderTarget {
    core: TargetCore,
}

impl ErpRenderTarget {
    pub fn new(config: &RenderConfig, media: MediaInfo) -> Self {
        if media.projected_width != media.projected_height * 2 {
            log::warn!(
                "Equirectangular picture is {}x{}, expected a 2:1 aspect",
                media.projected_width,
                media.projected_height
            );
        }
        Self {
            core: TargetCore::new(ProjectionFormat::Equirectangular, config, media),
        }
    }
}

impl RenderTarget for ErpRenderTarget {
    fn core(&self) -> &TargetCore {
        &self.core
    }

    fn initialize(
        &mut self,
        backend: &mut dyn RenderBackend,
        factory: &dyn RenderSourceFactory,
    ) -> RenderResult<()> {
        self.core.initialize(backend, factory)
    }

    fn create_render_target(&mut self, backend: &mut dyn RenderBackend) -> RenderResult<()> {
        self.core.create_render_target(backend)
    }

    fn resize(
        &mut self,
        backend: &mut dyn RenderBackend,
        width: u32,
        height: u32,
    ) -> RenderResult<()> {
        self.core.resize(backend, width, height)
    }

    fn update_at(
        &mut self,
        backend: &mut dyn RenderBackend,
        factory: &dyn RenderSourceFactory,
        viewport: &Viewport,
        now: Instant,
    ) -> RenderResult<()> {
        let (width, height) = self.core.picture_size();
        self.core.update(backend, factory, viewport, now, |dir| {
            ProjectionFormat::Equirectangular.project(dir, width, height)
        })
    }

    fn release(&mut self, backend: &mut dyn RenderBackend) {
        self.core.release(backend);
    }
}
