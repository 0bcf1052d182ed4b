//! wgpu backend implementation
//!
//! Runs on a headless device. The screen pass target is an off-screen
//! texture of the output size, so frames can be read back or copied out.
//! Draws are buffered per pass and encoded when the pass ends.

use crate::backend::traits::*;
use crate::backend::types::*;
use bytemuck::{Pod, Zeroable};
use std::collections::HashMap;
use wgpu::util::DeviceExt;

const REGION_SHADER: &str = include_str!("region.wgsl");
const MESH_SHADER: &str = include_str!("mesh.wgsl");

/// Per-draw uniform of the region shader
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct RegionUniform {
    target_rect: [f32; 4],
    source_rect: [f32; 4],
    target_size: [f32; 2],
    opacity: f32,
    transform: u32,
}

/// Buffered pass command
#[derive(Clone)]
enum PassCommand {
    Region(RegionDraw),
    Mesh(MeshDraw),
}

/// Pending pass with buffered commands
struct PendingPass {
    target: PassTarget,
    clear: Option<[f32; 4]>,
    commands: Vec<PassCommand>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum PipelineKind {
    Region,
    Mesh,
}

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
    format: TextureFormat,
}

/// wgpu backend implementation
pub struct WgpuBackend {
    #[allow(dead_code)]
    instance: wgpu::Instance,
    #[allow(dead_code)]
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,
    screen: GpuTexture,

    // Resource storage
    textures: HashMap<u64, GpuTexture>,
    framebuffers: HashMap<u64, u64>,
    buffers: HashMap<u64, wgpu::Buffer>,
    next_id: u64,

    // Shared pipeline state
    sampler: wgpu::Sampler,
    texture_layout: wgpu::BindGroupLayout,
    uniform_layout: wgpu::BindGroupLayout,
    pipelines: HashMap<(PipelineKind, wgpu::TextureFormat), wgpu::RenderPipeline>,

    pending_pass: Option<PendingPass>,
}

impl WgpuBackend {
    fn convert_texture_format(format: TextureFormat) -> wgpu::TextureFormat {
        match format {
            TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
            TextureFormat::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
            TextureFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
            TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        }
    }

    fn convert_buffer_usage(usage: BufferUsage) -> wgpu::BufferUsages {
        let mut result = wgpu::BufferUsages::empty();
        if usage.contains(BufferUsage::COPY_DST) {
            result |= wgpu::BufferUsages::COPY_DST;
        }
        if usage.contains(BufferUsage::INDEX) {
            result |= wgpu::BufferUsages::INDEX;
        }
        if usage.contains(BufferUsage::VERTEX) {
            result |= wgpu::BufferUsages::VERTEX;
        }
        if usage.contains(BufferUsage::UNIFORM) {
            result |= wgpu::BufferUsages::UNIFORM;
        }
        result
    }

    fn convert_texture_usage(usage: TextureUsage) -> wgpu::TextureUsages {
        let mut result = wgpu::TextureUsages::empty();
        if usage.contains(TextureUsage::COPY_SRC) {
            result |= wgpu::TextureUsages::COPY_SRC;
        }
        if usage.contains(TextureUsage::COPY_DST) {
            result |= wgpu::TextureUsages::COPY_DST;
        }
        if usage.contains(TextureUsage::TEXTURE_BINDING) {
            result |= wgpu::TextureUsages::TEXTURE_BINDING;
        }
        if usage.contains(TextureUsage::RENDER_ATTACHMENT) {
            result |= wgpu::TextureUsages::RENDER_ATTACHMENT;
        }
        result
    }

    /// Create a backend on the first available adapter, without a window.
    pub fn new_headless(width: u32, height: u32) -> BackendResult<Self> {
        pollster::block_on(Self::new_async(width, height))
    }

    pub async fn new_async(width: u32, height: u32) -> BackendResult<Self> {
        if width == 0 || height == 0 {
            return Err(BackendError::InitializationFailed(format!(
                "output size {width}x{height} must be non-zero"
            )));
        }

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| BackendError::InitializationFailed("No suitable adapter found".into()))?;

        let adapter_info = adapter.get_info();
        log::info!(
            "Selected GPU: {} ({:?} backend)",
            adapter_info.name,
            adapter_info.backend
        );

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Panorama Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                },
                None,
            )
            .await
            .map_err(|e| BackendError::InitializationFailed(e.to_string()))?;

        let screen = Self::allocate_texture(
            &device,
            &TextureDescriptor {
                label: Some("screen".into()),
                width,
                height,
                format: TextureFormat::Rgba8Unorm,
                usage: TextureUsage::RENDER_ATTACHMENT | TextureUsage::COPY_SRC,
            },
        );

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("panorama sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("texture layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("uniform layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        Ok(Self {
            instance,
            adapter,
            device,
            queue,
            screen,
            textures: HashMap::new(),
            framebuffers: HashMap::new(),
            buffers: HashMap::new(),
            next_id: 1,
            sampler,
            texture_layout,
            uniform_layout,
            pipelines: HashMap::new(),
            pending_pass: None,
        })
    }

    fn allocate_texture(device: &wgpu::Device, desc: &TextureDescriptor) -> GpuTexture {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: desc.label.as_deref(),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: Self::convert_texture_format(desc.format),
            usage: Self::convert_texture_usage(desc.usage),
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        GpuTexture {
            texture,
            view,
            width: desc.width,
            height: desc.height,
            format: desc.format,
        }
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn texture(&self, texture: TextureHandle) -> BackendResult<&GpuTexture> {
        self.textures.get(&texture.0).ok_or(BackendError::InvalidHandle {
            kind: "texture",
            id: texture.0,
        })
    }

    fn buffer(&self, buffer: BufferHandle) -> BackendResult<&wgpu::Buffer> {
        self.buffers.get(&buffer.0).ok_or(BackendError::InvalidHandle {
            kind: "buffer",
            id: buffer.0,
        })
    }

    fn target_texture(&self, target: PassTarget) -> BackendResult<&GpuTexture> {
        match target {
            PassTarget::Screen => Ok(&self.screen),
            PassTarget::Framebuffer(fb) => {
                let color = self
                    .framebuffers
                    .get(&fb.0)
                    .ok_or(BackendError::InvalidHandle {
                        kind: "framebuffer",
                        id: fb.0,
                    })?;
                self.texture(TextureHandle(*color))
            }
        }
    }

    /// Off-screen texture standing in for the presentation surface
    pub fn screen_texture(&self) -> &wgpu::Texture {
        &self.screen.texture
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    fn ensure_pipeline(&mut self, kind: PipelineKind, format: wgpu::TextureFormat) {
        if self.pipelines.contains_key(&(kind, format)) {
            return;
        }
        let (label, source, blend, cull_mode) = match kind {
            PipelineKind::Region => (
                "region pipeline",
                REGION_SHADER,
                Some(wgpu::BlendState::ALPHA_BLENDING),
                None,
            ),
            // The camera sits inside the geometry.
            PipelineKind::Mesh => ("mesh pipeline", MESH_SHADER, None, None),
        };

        let shader = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });

        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(label),
                bind_group_layouts: &[&self.texture_layout, &self.uniform_layout],
                push_constant_ranges: &[],
            });

        let attributes = wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x2];
        let vertex_buffers = [wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Vertex>() as u64,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &attributes,
        }];

        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &shader,
                    entry_point: "vs_main",
                    buffers: &vertex_buffers,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &shader,
                    entry_point: "fs_main",
                    targets: &[Some(wgpu::ColorTargetState {
                        format,
                        blend,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    cull_mode,
                    ..Default::default()
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
            });

        log::debug!("Created {} for {:?}", label, format);
        self.pipelines.insert((kind, format), pipeline);
    }

    fn texture_bind_group(&self, texture: &GpuTexture) -> wgpu::BindGroup {
        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: None,
            layout: &self.texture_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&texture.view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        })
    }

    fn uniform_bind_group(&self, contents: &[u8]) -> wgpu::BindGroup {
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("draw uniform"),
                contents,
                usage: wgpu::BufferUsages::UNIFORM,
            });
        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: None,
            layout: &self.uniform_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: buffer.as_entire_binding(),
            }],
        })
    }

    /// Bind groups for one buffered command, in pass order.
    fn prepare(
        &self,
        command: &PassCommand,
        target_size: (u32, u32),
    ) -> BackendResult<(PipelineKind, MeshBuffers, wgpu::BindGroup, wgpu::BindGroup)> {
        match command {
            PassCommand::Region(draw) => {
                let source = self.texture(draw.source)?;
                let (sw, sh) = (draw.source_size.0.max(1) as f32, draw.source_size.1.max(1) as f32);
                let uniform = RegionUniform {
                    target_rect: [
                        draw.target_rect.left as f32,
                        draw.target_rect.top as f32,
                        draw.target_rect.width as f32,
                        draw.target_rect.height as f32,
                    ],
                    source_rect: [
                        draw.source_rect.left as f32 / sw,
                        draw.source_rect.top as f32 / sh,
                        draw.source_rect.width as f32 / sw,
                        draw.source_rect.height as f32 / sh,
                    ],
                    target_size: [target_size.0 as f32, target_size.1 as f32],
                    opacity: draw.opacity,
                    transform: draw.transform.as_u8() as u32,
                };
                Ok((
                    PipelineKind::Region,
                    draw.quad,
                    self.texture_bind_group(source),
                    self.uniform_bind_group(bytemuck::bytes_of(&uniform)),
                ))
            }
            PassCommand::Mesh(draw) => {
                let texture = self.texture(draw.texture)?;
                let view_proj = draw.view_proj.to_cols_array();
                Ok((
                    PipelineKind::Mesh,
                    draw.mesh,
                    self.texture_bind_group(texture),
                    self.uniform_bind_group(bytemuck::cast_slice(&view_proj)),
                ))
            }
        }
    }

    fn record(&mut self, command: PassCommand) -> BackendResult<()> {
        let pending = self
            .pending_pass
            .as_mut()
            .ok_or_else(|| BackendError::InvalidPass("draw outside of a pass".into()))?;
        pending.commands.push(command);
        Ok(())
    }
}

impl RenderBackend for WgpuBackend {
    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        if desc.width == 0 || desc.height == 0 {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?}: texture dimensions cannot be zero",
                desc.label
            )));
        }
        let max = self.device.limits().max_texture_dimension_2d;
        if desc.width > max || desc.height > max {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?}: {}x{} exceeds the device limit of {}",
                desc.label, desc.width, desc.height, max
            )));
        }

        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let texture = Self::allocate_texture(&self.device, desc);
        if pollster::block_on(self.device.pop_error_scope()).is_some() {
            return Err(BackendError::OutOfMemory);
        }

        let id = self.allocate_id();
        self.textures.insert(id, texture);
        Ok(TextureHandle(id))
    }

    fn write_texture(
        &mut self,
        texture: TextureHandle,
        data: &[u8],
        width: u32,
        height: u32,
    ) -> BackendResult<()> {
        let tex = self.texture(texture)?;
        let bytes_per_row = width * tex.format.bytes_per_pixel();
        if tex.width != width
            || tex.height != height
            || (data.len() as u64) < bytes_per_row as u64 * height as u64
        {
            return Err(BackendError::InvalidPass(format!(
                "write of {width}x{height} ({} bytes) into {}x{} texture",
                data.len(),
                tex.width,
                tex.height
            )));
        }
        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &tex.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn copy_texture(&mut self, src: TextureHandle, dst: TextureHandle) -> BackendResult<()> {
        let a = self.texture(src)?;
        let b = self.texture(dst)?;
        if (a.width, a.height, a.format) != (b.width, b.height, b.format) {
            return Err(BackendError::InvalidPass(format!(
                "copy between {}x{} and {}x{} textures",
                a.width, a.height, b.width, b.height
            )));
        }
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("copy texture"),
            });
        encoder.copy_texture_to_texture(
            a.texture.as_image_copy(),
            b.texture.as_image_copy(),
            wgpu::Extent3d {
                width: a.width,
                height: a.height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn create_framebuffer(&mut self, color: TextureHandle) -> BackendResult<FramebufferHandle> {
        self.texture(color)
            .map_err(|e| BackendError::FramebufferCreationFailed(e.to_string()))?;
        let id = self.allocate_id();
        self.framebuffers.insert(id, color.0);
        Ok(FramebufferHandle(id))
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
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: desc.label.as_deref(),
                contents: data,
                usage: Self::convert_buffer_usage(desc.usage),
            });

        let id = self.allocate_id();
        self.buffers.insert(id, buffer);
        Ok(BufferHandle(id))
    }

    fn begin_pass(&mut self, target: PassTarget, clear: Option<[f32; 4]>) -> BackendResult<()> {
        if self.pending_pass.is_some() {
            return Err(BackendError::InvalidPass("pass already open".into()));
        }
        self.target_texture(target)?;
        self.pending_pass = Some(PendingPass {
            target,
            clear,
            commands: Vec::new(),
        });
        Ok(())
    }

    fn draw_region(&mut self, draw: &RegionDraw) -> BackendResult<()> {
        self.record(PassCommand::Region(draw.clone()))
    }

    fn draw_mesh(&mut self, draw: &MeshDraw) -> BackendResult<()> {
        self.record(PassCommand::Mesh(draw.clone()))
    }

    fn end_pass(&mut self) -> BackendResult<()> {
        let pending = self
            .pending_pass
            .take()
            .ok_or_else(|| BackendError::InvalidPass("no open pass".into()))?;

        let (format, target_size) = {
            let target = self.target_texture(pending.target)?;
            (
                Self::convert_texture_format(target.format),
                (target.width, target.height),
            )
        };
        self.ensure_pipeline(PipelineKind::Region, format);
        self.ensure_pipeline(PipelineKind::Mesh, format);

        // Everything the pass borrows has to outlive it.
        let prepared = pending
            .commands
            .iter()
            .map(|command| self.prepare(command, target_size))
            .collect::<BackendResult<Vec<_>>>()?;

        let target = self.target_texture(pending.target)?;
        let load = match pending.clear {
            Some(color) => wgpu::LoadOp::Clear(wgpu::Color {
                r: color[0] as f64,
                g: color[1] as f64,
                b: color[2] as f64,
                a: color[3] as f64,
            }),
            None => wgpu::LoadOp::Load,
        };

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("panorama pass"),
            });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("panorama pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            for (kind, mesh, textures, uniforms) in &prepared {
                let Some(pipeline) = self.pipelines.get(&(*kind, format)) else {
                    continue;
                };
                let (Some(vertices), Some(indices)) = (
                    self.buffers.get(&mesh.vertex_buffer.0),
                    self.buffers.get(&mesh.index_buffer.0),
                ) else {
                    log::warn!("Skipping draw with released mesh buffers");
                    continue;
                };
                render_pass.set_pipeline(pipeline);
                render_pass.set_bind_group(0, textures, &[]);
                render_pass.set_bind_group(1, uniforms, &[]);
                render_pass.set_vertex_buffer(0, vertices.slice(..));
                render_pass.set_index_buffer(indices.slice(..), wgpu::IndexFormat::Uint32);
                render_pass.draw_indexed(0..mesh.index_count, 0, 0..1);
            }
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        match self.textures.remove(&texture.0) {
            Some(tex) => tex.texture.destroy(),
            None => log::warn!("WgpuBackend: destroying unknown texture {:?}", texture),
        }
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        if self.framebuffers.remove(&framebuffer.0).is_none() {
            log::warn!("WgpuBackend: destroying unknown framebuffer {:?}", framebuffer);
        }
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        match self.buffers.remove(&buffer.0) {
            Some(buf) => buf.destroy(),
            None => log::warn!("WgpuBackend: destroying unknown buffer {:?}", buffer),
        }
    }
}
