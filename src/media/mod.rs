//! Media collaborators consumed by the render core.
//!
//! Demuxing and decoding live behind these traits. A [`MediaSource`]
//! describes the stream, a [`RenderSourceFactory`] turns decoded planes into
//! tile textures the render target can sample.

pub mod synthetic;

use std::any::Any;

use crate::backend::{RenderBackend, TextureHandle};
use crate::error::RenderResult;
use crate::tiles::TileInformation;

pub use synthetic::{
    QualityLevel, SyntheticConfig, SyntheticControl, SyntheticFactory, SyntheticSource,
};

/// Stream-level properties of a media source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaInfo {
    /// Size of the full projected picture.
    pub projected_width: u32,
    pub projected_height: u32,
}

/// A demuxed panoramic stream.
pub trait MediaSource: Send {
    /// Raw projection format tag of the stream.
    fn projection_format(&self) -> i32;

    fn media_info(&self) -> MediaInfo;

    /// Whether every frame has been consumed.
    fn is_eos(&self) -> bool;
}

/// One decodable video of the stream and the tiles it carries.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDescriptor {
    pub video_id: u32,
    pub quality_ranking: i32,
    pub packed_width: u32,
    pub packed_height: u32,
    pub tiles: Vec<TileInformation>,
}

/// Result of asking the factory for the frame at a timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameUpdate {
    /// New planes were uploaded.
    NewFrame,
    /// The textures still hold the frame for this timestamp.
    Repeat,
}

/// Supplies decoded tile textures keyed by `(video_id, tile_id)`.
pub trait RenderSourceFactory: Send {
    fn source_descriptors(&self) -> Vec<SourceDescriptor>;

    /// Upload the planes for `pts`.
    fn update(&mut self, backend: &mut dyn RenderBackend, pts: u64) -> RenderResult<FrameUpdate>;

    /// Texture holding the packed picture that carries this tile, if the
    /// tile has data for the current frame.
    fn tile_texture(&self, video_id: u32, tile_id: u32) -> Option<TextureHandle>;

    /// Free every texture the factory created.
    fn release(&mut self, backend: &mut dyn RenderBackend);

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}
