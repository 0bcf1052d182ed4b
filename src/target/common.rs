//! State shared by every render target variant.

use std::cell::Cell;
use std::collections::{BTreeMap, BTreeSet};
use std::marker::PhantomData;
use std::time::Instant;

use glam::Vec3;

use crate::backend::{
    FramebufferHandle, MeshBuffers, MeshData, PassTarget, RegionDraw, RenderBackend,
    TextureDescriptor, TextureHandle,
};
use crate::config::RenderConfig;
use crate::error::{RenderError, RenderResult};
use crate::media::{MediaInfo, RenderSourceFactory};
use crate::projection::ProjectionFormat;
use crate::tiles::{QualityRankingInfo, TileInformation, TransformType};
use crate::viewport::Viewport;

use super::blend::BlendTimer;
use super::selection::{self, Candidate, Selection, SelectionParams};
use super::TargetState;

/// GPU handles and selection state of one render target.
///
/// Only the render thread touches a target, so the core is `Send` but
/// deliberately not `Sync`.
#[derive(Debug)]
pub struct TargetCore {
    format: ProjectionFormat,
    state: TargetState,
    picture_size: (u32, u32),
    target_size: (u32, u32),
    viewport_samples: u32,
    coverage_grid: (u32, u32),
    clear_color: [f32; 4],

    candidates: Vec<Candidate>,
    main_quality_ranking: i32,
    quad: Option<MeshBuffers>,

    fbo_on_screen: Option<FramebufferHandle>,
    composite_texture: Option<TextureHandle>,
    texture_of_r2s: Option<TextureHandle>,

    transform_type: BTreeMap<u32, TransformType>,
    quality_ranking_info: QualityRankingInfo,
    in_view: BTreeSet<(i32, u32, u32)>,
    is_all_high_quality_in_view: bool,
    blend: BlendTimer,

    _not_sync: PhantomData<Cell<()>>,
}

static_assertions::assert_impl_all!(TargetCore: Send);
static_assertions::assert_not_impl_any!(TargetCore: Sync);

impl TargetCore {
    pub(crate) fn new(format: ProjectionFormat, config: &RenderConfig, media: MediaInfo) -> Self {
        Self {
            format,
            state: TargetState::Created,
            picture_size: (media.projected_width, media.projected_height),
            target_size: (config.target_width, config.target_height),
            viewport_samples: config.viewport_samples,
            coverage_grid: (config.coverage_grid_x, config.coverage_grid_y),
            clear_color: config.clear_color,
            candidates: Vec::new(),
            main_quality_ranking: 0,
            quad: None,
            fbo_on_screen: None,
            composite_texture: None,
            texture_of_r2s: None,
            transform_type: BTreeMap::new(),
            quality_ranking_info: QualityRankingInfo::default(),
            in_view: BTreeSet::new(),
            is_all_high_quality_in_view: false,
            blend: BlendTimer::new(&config.blend),
            _not_sync: PhantomData,
        }
    }

    pub fn format(&self) -> ProjectionFormat {
        self.format
    }

    pub fn state(&self) -> TargetState {
        self.state
    }

    pub fn picture_size(&self) -> (u32, u32) {
        self.picture_size
    }

    pub fn target_size(&self) -> (u32, u32) {
        self.target_size
    }

    pub fn texture_of_r2s(&self) -> Option<TextureHandle> {
        self.texture_of_r2s
    }

    pub fn fbo_on_screen(&self) -> Option<FramebufferHandle> {
        self.fbo_on_screen
    }

    pub fn transform_type(&self) -> &BTreeMap<u32, TransformType> {
        &self.transform_type
    }

    pub fn quality_ranking_info(&self) -> &QualityRankingInfo {
        &self.quality_ranking_info
    }

    pub fn is_all_high_quality_in_view(&self) -> bool {
        self.is_all_high_quality_in_view
    }

    pub fn avg_changed_time(&self) -> f32 {
        self.blend.avg_changed_time()
    }

    pub fn main_quality_ranking(&self) -> i32 {
        self.main_quality_ranking
    }

    /// Every tile the sources offer.
    pub fn tiles(&self) -> impl Iterator<Item = &TileInformation> {
        self.candidates.iter().map(|c| &c.tile)
    }

    fn expect_state(&self, allowed: &[TargetState], expected: &'static str) -> RenderResult<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(RenderError::InvalidState {
                expected,
                found: self.state.name(),
            })
        }
    }

    /// Read the tile layout from the factory and upload the tile quad.
    pub(crate) fn initialize(
        &mut self,
        backend: &mut dyn RenderBackend,
        factory: &dyn RenderSourceFactory,
    ) -> RenderResult<()> {
        self.expect_state(&[TargetState::Created], "created")?;

        let descriptors = factory.source_descriptors();
        if descriptors.is_empty() {
            return Err(RenderError::InvalidArgument(
                "render source factory offers no source descriptors".into(),
            ));
        }

        let (width, height) = self.picture_size;
        let mut candidates = Vec::new();
        let mut seen = BTreeSet::new();
        for descriptor in &descriptors {
            for tile in &descriptor.tiles {
                tile.validate(width, height)?;
                if tile.video_id != descriptor.video_id {
                    return Err(RenderError::InvalidArgument(format!(
                        "tile {}/{} listed under video {}",
                        tile.video_id, tile.tile_id, descriptor.video_id
                    )));
                }
                if !seen.insert(tile.key()) {
                    return Err(RenderError::InvalidArgument(format!(
                        "tile {}/{} described twice",
                        tile.video_id, tile.tile_id
                    )));
                }
                candidates.push(Candidate {
                    ranking: descriptor.quality_ranking,
                    tile: *tile,
                });
            }
        }
        if candidates.is_empty() {
            return Err(RenderError::InvalidArgument(
                "source descriptors carry no tiles".into(),
            ));
        }
        selection::sort_candidates(&mut candidates);

        self.quad = Some(MeshData::unit_quad().upload(backend, "tile quad")?);
        self.main_quality_ranking = candidates[0].ranking;
        self.candidates = candidates;
        self.state = TargetState::Initialized;
        log::debug!(
            "{} target initialized: {} videos, {} tiles, main ranking {}",
            self.format.name(),
            descriptors.len(),
            self.candidates.len(),
            self.main_quality_ranking
        );
        Ok(())
    }

    /// (Re)allocate the composite surface and the render-to-screen texture.
    pub(crate) fn create_render_target(
        &mut self,
        backend: &mut dyn RenderBackend,
    ) -> RenderResult<()> {
        self.expect_state(
            &[TargetState::Initialized, TargetState::TargetReady, TargetState::Ready],
            "initialized",
        )?;
        self.release_surfaces(backend);
        self.state = TargetState::Initialized;

        let (width, height) = self.target_size;
        let composite =
            backend.create_texture(&TextureDescriptor::render_target("composite", width, height))?;
        let fbo = match backend.create_framebuffer(composite) {
            Ok(fbo) => fbo,
            Err(e) => {
                backend.destroy_texture(composite);
                return Err(e.into());
            }
        };
        let r2s = match backend.create_texture(&TextureDescriptor::render_target(
            "render to screen",
            width,
            height,
        )) {
            Ok(texture) => texture,
            Err(e) => {
                backend.destroy_framebuffer(fbo);
                backend.destroy_texture(composite);
                return Err(e.into());
            }
        };

        self.composite_texture = Some(composite);
        self.fbo_on_screen = Some(fbo);
        self.texture_of_r2s = Some(r2s);
        self.in_view.clear();
        self.blend.reset();
        self.state = TargetState::TargetReady;
        log::info!(
            "{} render target created at {}x{}",
            self.format.name(),
            width,
            height
        );
        Ok(())
    }

    pub(crate) fn resize(
        &mut self,
        backend: &mut dyn RenderBackend,
        width: u32,
        height: u32,
    ) -> RenderResult<()> {
        if width == 0 || height == 0 {
            return Err(RenderError::InvalidArgument(format!(
                "render target size {width}x{height} must be non-zero"
            )));
        }
        self.expect_state(&[TargetState::TargetReady, TargetState::Ready], "target ready")?;
        self.target_size = (width, height);
        self.create_render_target(backend)
    }

    /// Select tiles for `viewport` and composite them into the R2S texture.
    ///
    /// On error the previous selection and texture stay in place.
    pub(crate) fn update(
        &mut self,
        backend: &mut dyn RenderBackend,
        factory: &dyn RenderSourceFactory,
        viewport: &Viewport,
        now: Instant,
        project: impl Fn(Vec3) -> (f32, f32),
    ) -> RenderResult<()> {
        self.expect_state(&[TargetState::TargetReady, TargetState::Ready], "target ready")?;
        let (Some(fbo), Some(composite), Some(r2s), Some(quad)) = (
            self.fbo_on_screen,
            self.composite_texture,
            self.texture_of_r2s,
            self.quad,
        ) else {
            return Err(RenderError::NotInitialized);
        };

        let rays = viewport.sample_directions(self.viewport_samples);
        let params = SelectionParams {
            candidates: &self.candidates,
            main_ranking: self.main_quality_ranking,
            picture: self.picture_size,
            coverage_grid: self.coverage_grid,
        };
        let selection = selection::select(&params, &rays, project, |tile| {
            factory.tile_texture(tile.video_id, tile.tile_id).is_some()
        })?;

        let changed = selection.in_view != self.in_view;
        let mut blend = self.blend.clone();
        blend.advance(changed, now);

        self.composite(backend, factory, &selection, &blend, fbo, quad)?;
        backend.copy_texture(composite, r2s)?;

        // Higher-quality entries are inserted last and win on tile id collisions.
        let mut transforms = BTreeMap::new();
        for (_, tiles) in selection.info.composite_order() {
            for tile in tiles {
                if let Some(previous) = transforms.insert(tile.tile_id, tile.transform_type) {
                    if previous != tile.transform_type {
                        log::debug!(
                            "Tile id {} selected from several videos with different transforms",
                            tile.tile_id
                        );
                    }
                }
            }
        }

        log::trace!(
            "Viewport ({:.1}, {:.1}): {} tiles in view over {} levels, all high: {}",
            viewport.pose.yaw,
            viewport.pose.pitch,
            selection.in_view.len(),
            selection.info.num_quality,
            selection.all_high
        );
        self.transform_type = transforms;
        self.quality_ranking_info = selection.info;
        self.in_view = selection.in_view;
        self.is_all_high_quality_in_view = selection.all_high;
        self.blend = blend;
        self.state = TargetState::Ready;
        Ok(())
    }

    fn composite(
        &self,
        backend: &mut dyn RenderBackend,
        factory: &dyn RenderSourceFactory,
        selection: &Selection,
        blend: &BlendTimer,
        fbo: FramebufferHandle,
        quad: MeshBuffers,
    ) -> RenderResult<()> {
        backend.begin_pass(PassTarget::Framebuffer(fbo), Some(self.clear_color))?;
        let drawn = self.draw_tiles(backend, factory, selection, blend, quad);
        let ended = backend.end_pass();
        drawn?;
        ended?;
        Ok(())
    }

    fn draw_tiles(
        &self,
        backend: &mut dyn RenderBackend,
        factory: &dyn RenderSourceFactory,
        selection: &Selection,
        blend: &BlendTimer,
        quad: MeshBuffers,
    ) -> RenderResult<()> {
        let sx = self.target_size.0 as f32 / self.picture_size.0 as f32;
        let sy = self.target_size.1 as f32 / self.picture_size.1 as f32;
        let fading = !selection.all_high;

        for (ranking, tiles) in selection.info.composite_order() {
            for tile in tiles {
                let source = factory
                    .tile_texture(tile.video_id, tile.tile_id)
                    .ok_or_else(|| {
                        RenderError::TileUnavailable(format!(
                            "tile {}/{} lost its texture",
                            tile.video_id, tile.tile_id
                        ))
                    })?;
                let opacity = if fading
                    && ranking == self.main_quality_ranking
                    && !selection.background.contains(&tile.key())
                {
                    blend.opacity()
                } else {
                    1.0
                };
                backend.draw_region(&RegionDraw {
                    quad,
                    source,
                    source_size: tile.packed_picture_size(),
                    source_rect: tile.packed_rect(),
                    target_rect: tile.projected_rect().scaled(sx, sy),
                    transform: tile.transform_type,
                    opacity,
                })?;
            }
        }
        Ok(())
    }

    fn release_surfaces(&mut self, backend: &mut dyn RenderBackend) {
        if let Some(fbo) = self.fbo_on_screen.take() {
            backend.destroy_framebuffer(fbo);
        }
        if let Some(texture) = self.composite_texture.take() {
            backend.destroy_texture(texture);
        }
        if let Some(texture) = self.texture_of_r2s.take() {
            backend.destroy_texture(texture);
        }
    }

    /// Free every GPU handle. The target cannot be used afterwards.
    pub(crate) fn release(&mut self, backend: &mut dyn RenderBackend) {
        if self.state == TargetState::Destroyed {
            return;
        }
        self.release_surfaces(backend);
        if let Some(quad) = self.quad.take() {
            quad.destroy(backend);
        }
        self.transform_type.clear();
        self.in_view.clear();
        self.state = TargetState::Destroyed;
        log::debug!("{} render target released", self.format.name());
    }

    /// Whether any GPU handle is still held.
    pub fn holds_resources(&self) -> bool {
        self.quad.is_some()
            || self.fbo_on_screen.is_some()
            || self.composite_texture.is_some()
            || self.texture_of_r2s.is_some()
    }
}

impl Drop for TargetCore {
    fn drop(&mut self) {
        if self.holds_resources() {
            log::warn!(
                "{} render target dropped without release; GPU handles leaked",
                self.format.name()
            );
        }
    }
}
