//! Tile layout data model.
//!
//! A transmitted picture is split into tiles. Each tile covers a rectangle
//! of the projected picture and was packed, possibly rotated or mirrored,
//! into a rectangle of a packed picture. [`QualityRankingInfo`] groups the
//! tiles picked for a viewport by quality ranking.

use std::collections::BTreeMap;

use crate::error::{RenderError, RenderResult};

/// Integer pixel rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(left: u32, top: u32, width: u32, height: u32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub fn right(&self) -> u64 {
        self.left as u64 + self.width as u64
    }

    pub fn bottom(&self) -> u64 {
        self.top as u64 + self.height as u64
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Half-open containment test.
    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.left as f32
            && y >= self.top as f32
            && x < self.right() as f32
            && y < self.bottom() as f32
    }

    /// Whether this rectangle lies inside `[0, width) x [0, height)`.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.right() <= width as u64 && self.bottom() <= height as u64
    }

    /// Scale by independent factors, snapping edges to whole pixels.
    pub fn scaled(&self, sx: f32, sy: f32) -> Rect {
        let left = (self.left as f32 * sx).round() as u32;
        let top = (self.top as f32 * sy).round() as u32;
        let right = (self.right() as f32 * sx).round() as u32;
        let bottom = (self.bottom() as f32 * sy).round() as u32;
        Rect::new(
            left,
            top,
            right.saturating_sub(left),
            bottom.saturating_sub(top),
        )
    }
}

/// Region-wise packing transform applied to a tile when it was packed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub enum TransformType {
    #[default]
    Identity,
    MirrorHorizontal,
    Rotate180,
    Rotate180Mirrored,
    Rotate90Mirrored,
    Rotate90,
    Rotate270Mirrored,
    Rotate270,
}

impl TransformType {
    /// Decode the wire value (0..=7).
    pub fn from_u8(value: u8) -> RenderResult<Self> {
        Ok(match value {
            0 => TransformType::Identity,
            1 => TransformType::MirrorHorizontal,
            2 => TransformType::Rotate180,
            3 => TransformType::Rotate180Mirrored,
            4 => TransformType::Rotate90Mirrored,
            5 => TransformType::Rotate90,
            6 => TransformType::Rotate270Mirrored,
            7 => TransformType::Rotate270,
            other => {
                return Err(RenderError::InvalidArgument(format!(
                    "transform type {other} is out of range"
                )))
            }
        })
    }

    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// Whether packing swapped the width and height of the region.
    pub fn swaps_axes(&self) -> bool {
        matches!(
            self,
            TransformType::Rotate90Mirrored
                | TransformType::Rotate90
                | TransformType::Rotate270Mirrored
                | TransformType::Rotate270
        )
    }

    /// Map a normalized position inside the projected region to the
    /// normalized position inside the packed region holding its texel.
    ///
    /// Sampling through this mapping undoes the packing transform.
    pub fn map_uv(&self, u: f32, v: f32) -> (f32, f32) {
        match self {
            TransformType::Identity => (u, v),
            TransformType::MirrorHorizontal => (1.0 - u, v),
            TransformType::Rotate180 => (1.0 - u, 1.0 - v),
            TransformType::Rotate180Mirrored => (u, 1.0 - v),
            TransformType::Rotate90Mirrored => (v, u),
            TransformType::Rotate90 => (v, 1.0 - u),
            TransformType::Rotate270Mirrored => (1.0 - v, 1.0 - u),
            TransformType::Rotate270 => (1.0 - v, u),
        }
    }
}

/// One transmitted tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileInformation {
    pub video_id: u32,
    pub tile_id: u32,
    pub proj_reg_left: u32,
    pub proj_reg_top: u32,
    pub proj_reg_width: u32,
    pub proj_reg_height: u32,
    pub packed_reg_left: u16,
    pub packed_reg_top: u16,
    pub packed_reg_width: u16,
    pub packed_reg_height: u16,
    pub packed_pic_width: u16,
    pub packed_pic_height: u16,
    pub transform_type: TransformType,
    pub face_id: u32,
}

impl TileInformation {
    pub fn projected_rect(&self) -> Rect {
        Rect::new(
            self.proj_reg_left,
            self.proj_reg_top,
            self.proj_reg_width,
            self.proj_reg_height,
        )
    }

    pub fn packed_rect(&self) -> Rect {
        Rect::new(
            self.packed_reg_left as u32,
            self.packed_reg_top as u32,
            self.packed_reg_width as u32,
            self.packed_reg_height as u32,
        )
    }

    pub fn packed_picture_size(&self) -> (u32, u32) {
        (self.packed_pic_width as u32, self.packed_pic_height as u32)
    }

    /// Identity of a tile across sources.
    pub fn key(&self) -> (u32, u32) {
        (self.video_id, self.tile_id)
    }

    /// Check both rectangle invariants against the projected picture size.
    pub fn validate(&self, picture_width: u32, picture_height: u32) -> RenderResult<()> {
        let packed = self.packed_rect();
        let (packed_width, packed_height) = self.packed_picture_size();
        if packed.is_empty() || !packed.fits_within(packed_width, packed_height) {
            return Err(RenderError::InvalidArgument(format!(
                "tile {}/{}: packed region {:?} outside {}x{} packed picture",
                self.video_id, self.tile_id, packed, self.packed_pic_width, self.packed_pic_height
            )));
        }
        let projected = self.projected_rect();
        if projected.is_empty() || !projected.fits_within(picture_width, picture_height) {
            return Err(RenderError::InvalidArgument(format!(
                "tile {}/{}: projected region {:?} outside {}x{} picture",
                self.video_id, self.tile_id, projected, picture_width, picture_height
            )));
        }
        Ok(())
    }
}

/// Tiles selected for one viewport, keyed by quality ranking.
///
/// Lower ranking values denote higher quality.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QualityRankingInfo {
    pub main_quality_ranking: i32,
    pub num_quality: i32,
    pub quality_selection: BTreeMap<i32, Vec<TileInformation>>,
}

impl QualityRankingInfo {
    pub fn new(main_quality_ranking: i32) -> Self {
        Self {
            main_quality_ranking,
            ..Default::default()
        }
    }

    /// Add a tile at `ranking`, keeping each level ordered by tile key.
    ///
    /// Returns `false` when the tile was already selected.
    pub fn insert(&mut self, ranking: i32, tile: TileInformation) -> bool {
        if self.contains(&tile) {
            return false;
        }
        let level = self.quality_selection.entry(ranking).or_default();
        let pos = level
            .binary_search_by_key(&tile.key(), |t| t.key())
            .unwrap_or_else(|p| p);
        level.insert(pos, tile);
        self.num_quality = self.quality_selection.len() as i32;
        true
    }

    pub fn contains(&self, tile: &TileInformation) -> bool {
        self.quality_selection
            .values()
            .any(|level| level.iter().any(|t| t.key() == tile.key()))
    }

    pub fn tiles_at(&self, ranking: i32) -> &[TileInformation] {
        self.quality_selection
            .get(&ranking)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Total number of selected tiles.
    pub fn tile_count(&self) -> usize {
        self.quality_selection.values().map(Vec::len).sum()
    }

    /// Levels from lowest to highest quality, the order tiles are composited in.
    pub fn composite_order(&self) -> impl Iterator<Item = (i32, &[TileInformation])> {
        self.quality_selection
            .iter()
            .rev()
            .map(|(rank, tiles)| (*rank, tiles.as_slice()))
    }
}
