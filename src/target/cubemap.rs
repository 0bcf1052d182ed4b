//! Cubemap render target.
//!
//! The projected picture holds the six cube faces in a 3x2 layout; see
//! [`CubeFace`] for the order. Every tile must lie inside a single face and
//! carry that face's index as its `face_id`.

use std::time::Instant;

use crate::backend::RenderBackend;
use crate::config::RenderConfig;
use crate::error::{RenderError, RenderResult};
use crate::media::{MediaInfo, RenderSourceFactory};
use crate::projection::{CubeFace, ProjectionFormat};
use crate::tiles::{Rect, TileInformation};
use crate::viewport::Viewport;

use super::{RenderTarget, TargetCore};

#[derive(Debug)]
pub struct CubemapRenderTarget {
    core: TargetCore,
}

impl CubemapRenderTarget {
    pub fn new(config: &RenderConfig, media: MediaInfo) -> Self {
        Self {
            core: TargetCore::new(ProjectionFormat::Cubemap, config, media),
        }
    }

    /// Rectangle of a face inside the projected picture.
    pub fn face_rect(&self, face: CubeFace) -> Rect {
        let (width, height) = self.core.picture_size();
        let (face_w, face_h) = (width / 3, height / 2);
        let (col, row) = face.layout_cell();
        Rect::new(col * face_w, row * face_h, face_w, face_h)
    }

    fn check_layout(&self) -> RenderResult<()> {
        let (width, height) = self.core.picture_size();
        if width % 3 != 0 || height % 2 != 0 {
            return Err(RenderError::InvalidArgument(format!(
                "cubemap picture {width}x{height} does not split into 3x2 faces"
            )));
        }
        for tile in self.core.tiles() {
            self.check_tile(tile)?;
        }
        Ok(())
    }

    fn check_tile(&self, tile: &TileInformation) -> RenderResult<()> {
        let face = CubeFace::ALL
            .get(tile.face_id as usize)
            .copied()
            .ok_or_else(|| {
                RenderError::InvalidArgument(format!(
                    "tile {}/{}: face id {} out of range",
                    tile.video_id, tile.tile_id, tile.face_id
                ))
            })?;
        let face_rect = self.face_rect(face);
        let rect = tile.projected_rect();
        let inside = rect.left >= face_rect.left
            && rect.top >= face_rect.top
            && rect.right() <= face_rect.right()
            && rect.bottom() <= face_rect.bottom();
        if !inside {
            return Err(RenderError::InvalidArgument(format!(
                "tile {}/{}: region {:?} is not inside face {:?}",
                tile.video_id, tile.tile_id, rect, face
            )));
        }
        Ok(())
    }
}

impl RenderTarget for CubemapRenderTarget {
    fn core(&self) -> &TargetCore {
        &self.core
    }

    fn initialize(
        &mut self,
        backend: &mut dyn RenderBackend,
        factory: &dyn RenderSourceFactory,
    ) -> RenderResult<()> {
        self.core.initialize(backend, factory)?;
        if let Err(e) = self.check_layout() {
            self.core.release(backend);
            return Err(e);
        }
        Ok(())
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
            ProjectionFormat::Cubemap.project(dir, width, height)
        })
    }

    fn release(&mut self, backend: &mut dyn RenderBackend) {
        self.core.release(backend);
    }
}
