//! Synthetic grid-tiled media for tests and the headless binary.
//!
//! The projected picture is cut into a `cols x rows` grid. Every
//! [`QualityLevel`] becomes one video carrying some or all grid tiles,
//! downscaled and packed with a region-wise transform.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;

use crate::backend::{RenderBackend, TextureDescriptor, TextureHandle};
use crate::error::{RenderError, RenderResult};
use crate::tiles::{Rect, TileInformation, TransformType};

use super::{FrameUpdate, MediaInfo, MediaSource, RenderSourceFactory, SourceDescriptor};

/// One quality level, delivered as its own video.
#[derive(Debug, Clone, PartialEq)]
pub struct QualityLevel {
    pub ranking: i32,
    /// Downscale divisor applied when packing.
    pub scale: u32,
    /// Grid tiles carried by this level; `None` carries all of them.
    pub tiles: Option<Vec<u32>>,
    pub transform: TransformType,
}

impl QualityLevel {
    pub fn full(ranking: i32, scale: u32) -> Self {
        Self {
            ranking,
            scale,
            tiles: None,
            transform: TransformType::Identity,
        }
    }

    pub fn partial(ranking: i32, scale: u32, tiles: impl IntoIterator<Item = u32>) -> Self {
        Self {
            ranking,
            scale,
            tiles: Some(tiles.into_iter().collect()),
            transform: TransformType::Identity,
        }
    }

    pub fn with_transform(mut self, transform: TransformType) -> Self {
        self.transform = transform;
        self
    }

    fn carries(&self, tile_id: u32) -> bool {
        self.tiles
            .as_ref()
            .map_or(true, |tiles| tiles.contains(&tile_id))
    }
}

/// Layout and timing of a synthetic stream.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticConfig {
    pub projection_tag: i32,
    pub picture_width: u32,
    pub picture_height: u32,
    pub cols: u32,
    pub rows: u32,
    pub levels: Vec<QualityLevel>,
    /// Frames before end of stream; `None` never ends.
    pub frame_count: Option<u64>,
    /// Timestamp units per frame.
    pub frame_duration: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            projection_tag: 0,
            picture_width: 3840,
            picture_height: 1920,
            cols: 4,
            rows: 2,
            levels: vec![QualityLevel::full(0, 1)],
            frame_count: None,
            frame_duration: 1,
        }
    }
}

impl SyntheticConfig {
    pub fn tile_count(&self) -> u32 {
        self.cols * self.rows
    }

    /// Projected rectangle of grid tile `tile_id` (row-major).
    pub fn tile_rect(&self, tile_id: u32) -> Rect {
        let tile_w = self.picture_width / self.cols;
        let tile_h = self.picture_height / self.rows;
        let col = tile_id % self.cols;
        let row = tile_id / self.cols;
        Rect::new(col * tile_w, row * tile_h, tile_w, tile_h)
    }
}

#[derive(Debug)]
struct ControlState {
    projection_tag: AtomicI32,
    frames_delivered: AtomicU64,
    finished: AtomicBool,
}

/// Shared state between a synthetic source and its factory.
///
/// Tests use it to switch the projection format mid-stream or end it early.
#[derive(Debug, Clone)]
pub struct SyntheticControl {
    state: Arc<ControlState>,
    frame_count: Option<u64>,
}

impl SyntheticControl {
    fn new(projection_tag: i32, frame_count: Option<u64>) -> Self {
        Self {
            state: Arc::new(ControlState {
                projection_tag: AtomicI32::new(projection_tag),
                frames_delivered: AtomicU64::new(0),
                finished: AtomicBool::new(false),
            }),
            frame_count,
        }
    }

    pub fn projection_tag(&self) -> i32 {
        self.state.projection_tag.load(Ordering::Acquire)
    }

    pub fn set_projection_tag(&self, tag: i32) {
        self.state.projection_tag.store(tag, Ordering::Release);
    }

    pub fn frames_delivered(&self) -> u64 {
        self.state.frames_delivered.load(Ordering::Acquire)
    }

    /// End the stream now.
    pub fn finish(&self) {
        self.state.finished.store(true, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.state.finished.load(Ordering::Acquire)
            || self
                .frame_count
                .is_some_and(|count| self.frames_delivered() >= count)
    }

    fn frame_delivered(&self) {
        self.state.frames_delivered.fetch_add(1, Ordering::AcqRel);
    }
}

/// Media source side of a synthetic stream.
#[derive(Debug)]
pub struct SyntheticSource {
    info: MediaInfo,
    control: SyntheticControl,
}

impl SyntheticSource {
    /// Build a source and the factory feeding it.
    pub fn new(config: SyntheticConfig) -> RenderResult<(SyntheticSource, SyntheticFactory)> {
        if config.cols == 0 || config.rows == 0 || config.levels.is_empty() {
            return Err(RenderError::InvalidArgument(
                "synthetic stream needs a non-empty grid and at least one level".into(),
            ));
        }
        if config.frame_duration == 0 {
            return Err(RenderError::InvalidArgument(
                "synthetic frame duration must be non-zero".into(),
            ));
        }
        let control = SyntheticControl::new(config.projection_tag, config.frame_count);
        let source = SyntheticSource {
            info: MediaInfo {
                projected_width: config.picture_width,
                projected_height: config.picture_height,
            },
            control: control.clone(),
        };
        let factory = SyntheticFactory::new(config, control);
        Ok((source, factory))
    }

    pub fn control(&self) -> SyntheticControl {
        self.control.clone()
    }
}

impl MediaSource for SyntheticSource {
    fn projection_format(&self) -> i32 {
        self.control.projection_tag()
    }

    fn media_info(&self) -> MediaInfo {
        self.info
    }

    fn is_eos(&self) -> bool {
        self.control.is_finished()
    }
}

#[derive(Debug)]
struct VideoTexture {
    handle: TextureHandle,
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

/// Render source factory side of a synthetic stream.
#[derive(Debug)]
pub struct SyntheticFactory {
    config: SyntheticConfig,
    control: SyntheticControl,
    textures: HashMap<u32, VideoTexture>,
    unavailable: HashSet<(u32, u32)>,
    last_frame: Option<u64>,
}

impl SyntheticFactory {
    fn new(config: SyntheticConfig, control: SyntheticControl) -> Self {
        Self {
            config,
            control,
            textures: HashMap::new(),
            unavailable: HashSet::new(),
            last_frame: None,
        }
    }

    pub fn config(&self) -> &SyntheticConfig {
        &self.config
    }

    /// Mark a tile as having (or not having) data for upcoming frames.
    pub fn set_tile_available(&mut self, video_id: u32, tile_id: u32, available: bool) {
        if available {
            self.unavailable.remove(&(video_id, tile_id));
        } else {
            self.unavailable.insert((video_id, tile_id));
        }
    }

    /// Number of textures currently held.
    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    fn face_of(&self, rect: Rect) -> u32 {
        if self.control.projection_tag() != 1 {
            return 0;
        }
        let face_w = (self.config.picture_width / 3).max(1);
        let face_h = (self.config.picture_height / 2).max(1);
        let col = ((rect.left + rect.width / 2) / face_w).min(2);
        let row = ((rect.top + rect.height / 2) / face_h).min(1);
        row * 3 + col
    }

    fn describe(&self, video_id: u32, level: &QualityLevel) -> SourceDescriptor {
        let scale = level.scale.max(1);
        let cell_w = (self.config.picture_width / self.config.cols / scale).max(1);
        let cell_h = (self.config.picture_height / self.config.rows / scale).max(1);
        let (packed_cell_w, packed_cell_h) = if level.transform.swaps_axes() {
            (cell_h, cell_w)
        } else {
            (cell_w, cell_h)
        };
        let packed_width = packed_cell_w * self.config.cols;
        let packed_height = packed_cell_h * self.config.rows;

        let tiles = (0..self.config.tile_count())
            .filter(|tile_id| level.carries(*tile_id))
            .map(|tile_id| {
                let rect = self.config.tile_rect(tile_id);
                let col = tile_id % self.config.cols;
                let row = tile_id / self.config.cols;
                TileInformation {
                    video_id,
                    tile_id,
                    proj_reg_left: rect.left,
                    proj_reg_top: rect.top,
                    proj_reg_width: rect.width,
                    proj_reg_height: rect.height,
                    packed_reg_left: (col * packed_cell_w) as u16,
                    packed_reg_top: (row * packed_cell_h) as u16,
                    packed_reg_width: packed_cell_w as u16,
                    packed_reg_height: packed_cell_h as u16,
                    packed_pic_width: packed_width as u16,
                    packed_pic_height: packed_height as u16,
                    transform_type: level.transform,
                    face_id: self.face_of(rect),
                }
            })
            .collect();

        SourceDescriptor {
            video_id,
            quality_ranking: level.ranking,
            packed_width,
            packed_height,
            tiles,
        }
    }

    fn ensure_textures(&mut self, backend: &mut dyn RenderBackend) -> RenderResult<()> {
        if !self.textures.is_empty() {
            return Ok(());
        }
        for descriptor in self.source_descriptors() {
            let desc = TextureDescriptor::sampled(
                &format!("synthetic video {}", descriptor.video_id),
                descriptor.packed_width,
                descriptor.packed_height,
            );
            let handle = match backend.create_texture(&desc) {
                Ok(handle) => handle,
                Err(e) => {
                    self.release(backend);
                    return Err(e.into());
                }
            };
            let shade = (descriptor.quality_ranking.clamp(0, 7) as u8) * 32;
            let pixels = [255 - shade, shade, 128, 255].repeat(
                (descriptor.packed_width * descriptor.packed_height) as usize,
            );
            self.textures.insert(
                descriptor.video_id,
                VideoTexture {
                    handle,
                    width: descriptor.packed_width,
                    height: descriptor.packed_height,
                    pixels,
                },
            );
        }
        log::debug!("Synthetic factory created {} textures", self.textures.len());
        Ok(())
    }
}

impl RenderSourceFactory for SyntheticFactory {
    fn source_descriptors(&self) -> Vec<SourceDescriptor> {
        self.config
            .levels
            .iter()
            .enumerate()
            .map(|(index, level)| self.describe(index as u32, level))
            .collect()
    }

    fn update(&mut self, backend: &mut dyn RenderBackend, pts: u64) -> RenderResult<FrameUpdate> {
        self.ensure_textures(backend)?;

        let frame = pts / self.config.frame_duration;
        if self.last_frame == Some(frame) {
            return Ok(FrameUpdate::Repeat);
        }
        for texture in self.textures.values() {
            backend.write_texture(texture.handle, &texture.pixels, texture.width, texture.height)?;
        }
        self.last_frame = Some(frame);
        self.control.frame_delivered();
        log::trace!("Synthetic frame {} uploaded (pts {})", frame, pts);
        Ok(FrameUpdate::NewFrame)
    }

    fn tile_texture(&self, video_id: u32, tile_id: u32) -> Option<TextureHandle> {
        if self.unavailable.contains(&(video_id, tile_id)) {
            return None;
        }
        let level = self.config.levels.get(video_id as usize)?;
        if tile_id >= self.config.tile_count() || !level.carries(tile_id) {
            return None;
        }
        self.textures.get(&video_id).map(|t| t.handle)
    }

    fn release(&mut self, backend: &mut dyn RenderBackend) {
        for (_, texture) in self.textures.drain() {
            backend.destroy_texture(texture.handle);
        }
        self.last_frame = None;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
