//! Dummy render backend for testing and headless runs.
//!
//! This backend doesn't touch a GPU. It hands out opaque handles, keeps
//! track of which of them are alive and records every command it receives,
//! so the render core can be exercised and inspected without hardware.

use std::collections::{HashMap, HashSet};

use super::traits::*;
use super::types::*;

/// A command recorded by [`DummyBackend`].
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCommand {
    WriteTexture(TextureHandle),
    CopyTexture {
        src: TextureHandle,
        dst: TextureHandle,
    },
    BeginPass {
        target: PassTarget,
        clear: Option<[f32; 4]>,
    },
    DrawRegion(RegionDraw),
    DrawMesh(MeshDraw),
    EndPass,
}

#[derive(Debug, Clone, Copy)]
struct TextureInfo {
    width: u32,
    height: u32,
}

/// Dummy render backend.
#[derive(Debug, Default)]
pub struct DummyBackend {
    next_id: u64,
    textures: HashMap<TextureHandle, TextureInfo>,
    framebuffers: HashMap<FramebufferHandle, TextureHandle>,
    buffers: HashSet<BufferHandle>,
    commands: Vec<BackendCommand>,
    in_pass: bool,
    texture_budget: Option<usize>,
}

impl DummyBackend {
    /// Create a new dummy backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Limit the number of simultaneously live textures.
    ///
    /// Once the limit is reached `create_texture` fails with
    /// [`BackendError::OutOfMemory`].
    pub fn set_texture_budget(&mut self, budget: Option<usize>) {
        self.texture_budget = budget;
    }

    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Whether a texture handle is currently alive.
    pub fn is_texture_live(&self, texture: TextureHandle) -> bool {
        self.textures.contains_key(&texture)
    }

    /// Whether a framebuffer handle is currently alive.
    pub fn is_framebuffer_live(&self, framebuffer: FramebufferHandle) -> bool {
        self.framebuffers.contains_key(&framebuffer)
    }

    /// Number of live textures.
    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    /// Number of live framebuffers.
    pub fn framebuffer_count(&self) -> usize {
        self.framebuffers.len()
    }

    /// Number of live buffers.
    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Size of a live texture.
    pub fn texture_size(&self, texture: TextureHandle) -> Option<(u32, u32)> {
        self.textures.get(&texture).map(|t| (t.width, t.height))
    }

    /// All commands recorded so far.
    pub fn commands(&self) -> &[BackendCommand] {
        &self.commands
    }

    /// Drain the recorded commands.
    pub fn take_commands(&mut self) -> Vec<BackendCommand> {
        std::mem::take(&mut self.commands)
    }

    fn check_texture(&self, texture: TextureHandle) -> BackendResult<TextureInfo> {
        self.textures
            .get(&texture)
            .copied()
            .ok_or(BackendError::InvalidHandle {
                kind: "texture",
                id: texture.0,
            })
    }

    fn check_buffer(&self, buffer: BufferHandle) -> BackendResult<()> {
        if self.buffers.contains(&buffer) {
            Ok(())
        } else {
            Err(BackendError::InvalidHandle {
                kind: "buffer",
                id: buffer.0,
            })
        }
    }

    fn check_in_pass(&self) -> BackendResult<()> {
        if self.in_pass {
            Ok(())
        } else {
            Err(BackendError::InvalidPass("draw outside of a pass".into()))
        }
    }
}

impl RenderBackend for DummyBackend {
    fn name(&self) -> &'static str {
        "Dummy"
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        if desc.width == 0 || desc.height == 0 {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?}: texture dimensions cannot be zero",
                desc.label
            )));
        }
        if let Some(budget) = self.texture_budget {
            if self.textures.len() >= budget {
                log::trace!("DummyBackend: texture budget {} exhausted", budget);
                return Err(BackendError::OutOfMemory);
            }
        }

        let handle = TextureHandle(self.allocate_id());
        self.textures.insert(
            handle,
            TextureInfo {
                width: desc.width,
                height: desc.height,
            },
        );
        log::trace!(
            "DummyBackend: creating texture {:?} ({}x{}) -> {:?}",
            desc.label,
            desc.width,
            desc.height,
            handle
        );
        Ok(handle)
    }

    fn write_texture(
        &mut self,
        texture: TextureHandle,
        data: &[u8],
        width: u32,
        height: u32,
    ) -> BackendResult<()> {
        let info = self.check_texture(texture)?;
        if info.width != width || info.height != height {
            return Err(BackendError::InvalidPass(format!(
                "write of {width}x{height} into {}x{} texture",
                info.width, info.height
            )));
        }
        log::trace!(
            "DummyBackend: write_texture {:?} len={}",
            texture,
            data.len()
        );
        self.commands.push(BackendCommand::WriteTexture(texture));
        Ok(())
    }

    fn copy_texture(&mut self, src: TextureHandle, dst: TextureHandle) -> BackendResult<()> {
        let a = self.check_texture(src)?;
        let b = self.check_texture(dst)?;
        if (a.width, a.height) != (b.width, b.height) {
            return Err(BackendError::InvalidPass(format!(
                "copy between {}x{} and {}x{} textures",
                a.width, a.height, b.width, b.height
            )));
        }
        self.commands.push(BackendCommand::CopyTexture { src, dst });
        Ok(())
    }

    fn create_framebuffer(&mut self, color: TextureHandle) -> BackendResult<FramebufferHandle> {
        self.check_texture(color)
            .map_err(|e| BackendError::FramebufferCreationFailed(e.to_string()))?;
        let handle = FramebufferHandle(self.allocate_id());
        self.framebuffers.insert(handle, color);
        log::trace!("DummyBackend: creating framebuffer {:?}", handle);
        Ok(handle)
    }

    fn create_buffer_init(
        &mut self,
        desc: &BufferDescriptor,
        data: &[u8],
    ) -> BackendResult<BufferHandle> {
        if data.is_empty() {
            return Err(BackendError::BufferCreationFailed(format!(
                "{:?}: buffer size cannot be zero",
                desc.label
            )));
        }
        let handle = BufferHandle(self.allocate_id());
        self.buffers.insert(handle);
        log::trace!(
            "DummyBackend: creating buffer {:?} (size: {})",
            desc.label,
            data.len()
        );
        Ok(handle)
    }

    fn begin_pass(&mut self, target: PassTarget, clear: Option<[f32; 4]>) -> BackendResult<()> {
        if self.in_pass {
            return Err(BackendError::InvalidPass("pass already open".into()));
        }
        if let PassTarget::Framebuffer(fb) = target {
            if !self.framebuffers.contains_key(&fb) {
                return Err(BackendError::InvalidHandle {
                    kind: "framebuffer",
                    id: fb.0,
                });
            }
        }
        self.in_pass = true;
        self.commands.push(BackendCommand::BeginPass { target, clear });
        Ok(())
    }

    fn draw_region(&mut self, draw: &RegionDraw) -> BackendResult<()> {
        self.check_in_pass()?;
        self.check_texture(draw.source)?;
        self.check_buffer(draw.quad.vertex_buffer)?;
        self.check_buffer(draw.quad.index_buffer)?;
        self.commands.push(BackendCommand::DrawRegion(draw.clone()));
        Ok(())
    }

    fn draw_mesh(&mut self, draw: &MeshDraw) -> BackendResult<()> {
        self.check_in_pass()?;
        self.check_texture(draw.texture)?;
        self.check_buffer(draw.mesh.vertex_buffer)?;
        self.check_buffer(draw.mesh.index_buffer)?;
        self.commands.push(BackendCommand::DrawMesh(draw.clone()));
        Ok(())
    }

    fn end_pass(&mut self) -> BackendResult<()> {
        if !self.in_pass {
            return Err(BackendError::InvalidPass("no open pass".into()));
        }
        self.in_pass = false;
        self.commands.push(BackendCommand::EndPass);
        Ok(())
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if self.textures.remove(&texture).is_none() {
            log::warn!("DummyBackend: destroying unknown texture {:?}", texture);
        }
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        if self.framebuffers.remove(&framebuffer).is_none() {
            log::warn!("DummyBackend: destroying unknown framebuffer {:?}", framebuffer);
        }
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if !self.buffers.remove(&buffer) {
            log::warn!("DummyBackend: destroying unknown buffer {:?}", buffer);
        }
    }
}
