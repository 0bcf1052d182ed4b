//! Core backend abstraction traits
//!
//! These traits define the interface every GPU backend implements for the
//! render core: texture/framebuffer/buffer lifetime, region compositing and
//! the final textured-mesh draw.

use crate::backend::types::*;
use crate::tiles::{Rect, TransformType};
use glam::Mat4;
use thiserror::Error;

/// Backend error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("failed to initialize backend: {0}")]
    InitializationFailed(String),
    #[error("failed to create texture: {0}")]
    TextureCreationFailed(String),
    #[error("failed to create buffer: {0}")]
    BufferCreationFailed(String),
    #[error("failed to create framebuffer: {0}")]
    FramebufferCreationFailed(String),
    #[error("unknown {kind} handle {id}")]
    InvalidHandle { kind: &'static str, id: u64 },
    #[error("invalid pass state: {0}")]
    InvalidPass(String),
    #[error("out of GPU memory")]
    OutOfMemory,
    #[error("GPU device lost")]
    DeviceLost,
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Handle to a GPU texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(pub(crate) u64);

/// Handle to a GPU buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub(crate) u64);

/// Handle to an off-screen framebuffer (one color attachment)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FramebufferHandle(pub(crate) u64);

impl TextureHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl BufferHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl FramebufferHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl MeshBuffers {
    /// Destroy both buffers
    pub fn destroy(self, backend: &mut dyn RenderBackend) {
        backend.destroy_buffer(self.vertex_buffer);
        backend.destroy_buffer(self.index_buffer);
    }
}

/// Destination of a render pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassTarget {
    /// An off-screen framebuffer
    Framebuffer(FramebufferHandle),
    /// The backend's presentation surface
    Screen,
}

/// Uploaded indexed geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshBuffers {
    pub vertex_buffer: BufferHandle,
    pub index_buffer: BufferHandle,
    pub index_count: u32,
}

/// Composite one packed region of a source texture into the current pass.
///
/// `source_rect` is expressed in texels of a source picture of `source_size`;
/// `target_rect` in pixels of the pass target. Backends sample the source
/// through [`TransformType::map_uv`] so the packing transform is undone.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionDraw {
    /// Unit quad the region is rasterized with
    pub quad: MeshBuffers,
    pub source: TextureHandle,
    pub source_size: (u32, u32),
    pub source_rect: Rect,
    pub target_rect: Rect,
    pub transform: TransformType,
    pub opacity: f32,
}

/// Indexed textured mesh draw
#[derive(Debug, Clone, PartialEq)]
pub struct MeshDraw {
    pub mesh: MeshBuffers,
    pub texture: TextureHandle,
    pub view_proj: Mat4,
}

/// Main render backend trait
///
/// Backends are driven from the render thread only; none of these methods
/// are expected to be reentrant.
pub trait RenderBackend {
    /// Backend name for diagnostics
    fn name(&self) -> &'static str;

    // Resource creation

    /// Create a texture
    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle>;

    /// Write tightly packed pixel data covering the whole texture
    fn write_texture(
        &mut self,
        texture: TextureHandle,
        data: &[u8],
        width: u32,
        height: u32,
    ) -> BackendResult<()>;

    /// Copy the full contents of `src` into `dst` (same size and format)
    fn copy_texture(&mut self, src: TextureHandle, dst: TextureHandle) -> BackendResult<()>;

    /// Create a framebuffer rendering into `color`
    fn create_framebuffer(&mut self, color: TextureHandle) -> BackendResult<FramebufferHandle>;

    /// Create a buffer with initial data
    fn create_buffer_init(
        &mut self,
        desc: &BufferDescriptor,
        data: &[u8],
    ) -> BackendResult<BufferHandle>;

    // Command recording

    /// Begin a render pass, optionally clearing the target
    fn begin_pass(&mut self, target: PassTarget, clear: Option<[f32; 4]>) -> BackendResult<()>;

    /// Composite a region into the current pass
    fn draw_region(&mut self, draw: &RegionDraw) -> BackendResult<()>;

    /// Draw a textured mesh into the current pass
    fn draw_mesh(&mut self, draw: &MeshDraw) -> BackendResult<()>;

    /// End the current pass and submit it
    fn end_pass(&mut self) -> BackendResult<()>;

    // Resource cleanup

    /// Destroy a texture
    fn destroy_texture(&mut self, texture: TextureHandle);

    /// Destroy a framebuffer (the color texture is not destroyed)
    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle);

    /// Destroy a buffer
    fn destroy_buffer(&mut self, buffer: BufferHandle);
}
