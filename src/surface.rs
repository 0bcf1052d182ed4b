//! Surface render: draws the render-to-screen texture onto projection
//! geometry seen from the sphere center.

use glam::Vec2;

use crate::backend::{
    MeshBuffers, MeshData, MeshDraw, PassTarget, RenderBackend, TextureHandle, Vertex,
};
use crate::error::{RenderError, RenderResult};
use crate::projection::{self, CubeFace, ProjectionFormat};
use crate::viewport::Viewport;

const SPHERE_SEGMENTS: u32 = 64;
const SPHERE_RINGS: u32 = 32;

/// UV sphere whose texture coordinates follow the equirectangular mapping.
pub fn sphere_mesh(segments: u32, rings: u32) -> MeshData {
    let mut mesh = MeshData::default();
    for ring in 0..=rings {
        let v = ring as f32 / rings as f32;
        let pitch = 90.0 - v * 180.0;
        for segment in 0..=segments {
            let u = segment as f32 / segments as f32;
            let yaw = 180.0 - u * 360.0;
            mesh.vertices.push(Vertex::new(
                projection::direction(yaw, pitch),
                Vec2::new(u, v),
            ));
        }
    }

    let stride = segments + 1;
    for ring in 0..rings {
        for segment in 0..segments {
            let a = ring * stride + segment;
            let b = a + stride;
            mesh.indices.extend_from_slice(&[a, b, a + 1, a + 1, b, b + 1]);
        }
    }
    mesh
}

/// Unit cube with texture coordinates into the 3x2 face layout.
pub fn cube_mesh() -> MeshData {
    let mut mesh = MeshData::default();
    for face in CubeFace::ALL {
        let (col, row) = face.layout_cell();
        let base = mesh.vertices.len() as u32;
        for (u, v) in [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)] {
            let dir = face.direction(u, v);
            // Push the corner out to the cube surface.
            let position = dir / dir.abs().max_element();
            let uv = Vec2::new((col as f32 + u) / 3.0, (row as f32 + v) / 2.0);
            mesh.vertices.push(Vertex::new(position, uv));
        }
        mesh.indices
            .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }
    mesh
}

/// Final draw of the composited picture to the screen.
#[derive(Debug)]
pub struct SurfaceRender {
    format: ProjectionFormat,
    mesh: Option<MeshBuffers>,
}

impl SurfaceRender {
    pub fn new(format: ProjectionFormat, backend: &mut dyn RenderBackend) -> RenderResult<Self> {
        let data = match format {
            ProjectionFormat::Equirectangular => sphere_mesh(SPHERE_SEGMENTS, SPHERE_RINGS),
            ProjectionFormat::Cubemap => cube_mesh(),
        };
        let mesh = data.upload(backend, format.name())?;
        log::debug!(
            "Surface render for {}: {} vertices, {} indices",
            format.name(),
            data.vertices.len(),
            data.indices.len()
        );
        Ok(Self {
            format,
            mesh: Some(mesh),
        })
    }

    pub fn format(&self) -> ProjectionFormat {
        self.format
    }

    /// Draw `texture` for `viewport` into the screen target.
    pub fn render(
        &self,
        backend: &mut dyn RenderBackend,
        texture: TextureHandle,
        viewport: &Viewport,
        output_size: (u32, u32),
        clear_color: [f32; 4],
    ) -> RenderResult<()> {
        let Some(mesh) = self.mesh else {
            return Err(RenderError::NotInitialized);
        };
        let aspect = output_size.0.max(1) as f32 / output_size.1.max(1) as f32;
        let draw = MeshDraw {
            mesh,
            texture,
            view_proj: viewport.view_proj(aspect),
        };

        backend.begin_pass(PassTarget::Screen, Some(clear_color))?;
        let drawn = backend.draw_mesh(&draw);
        let ended = backend.end_pass();
        drawn?;
        ended?;
        Ok(())
    }

    pub fn release(&mut self, backend: &mut dyn RenderBackend) {
        if let Some(mesh) = self.mesh.take() {
            mesh.destroy(backend);
        }
    }

    pub fn is_released(&self) -> bool {
        self.mesh.is_none()
    }
}

impl Drop for SurfaceRender {
    fn drop(&mut self) {
        if self.mesh.is_some() {
            log::warn!("Surface render dropped without release; mesh buffers leaked");
        }
    }
}
