//! Render context: the backend plus the presentation surface it draws to.

use std::any::Any;

use crate::backend::{BackendResult, RenderBackend};

/// Access to the backend and display for the render thread.
pub trait RenderContext: Send {
    /// The backend all GPU work goes through.
    fn backend(&mut self) -> &mut dyn RenderBackend;

    /// Size of the presentation surface in pixels.
    fn output_size(&self) -> (u32, u32);

    /// Show the frame drawn to [`PassTarget::Screen`](crate::backend::PassTarget).
    fn present(&mut self) -> BackendResult<()>;

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Context without a window; presenting only counts frames.
#[derive(Debug)]
pub struct HeadlessContext<B> {
    backend: B,
    output_size: (u32, u32),
    presented_frames: u64,
}

impl<B: RenderBackend> HeadlessContext<B> {
    pub fn new(backend: B, width: u32, height: u32) -> Self {
        log::info!(
            "Headless render context on {} backend ({}x{})",
            backend.name(),
            width,
            height
        );
        Self {
            backend,
            output_size: (width, height),
            presented_frames: 0,
        }
    }

    /// Concrete backend, for inspection.
    pub fn inner(&self) -> &B {
        &self.backend
    }

    pub fn inner_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn presented_frames(&self) -> u64 {
        self.presented_frames
    }
}

impl<B: RenderBackend + Send + 'static> RenderContext for HeadlessContext<B> {
    fn backend(&mut self) -> &mut dyn RenderBackend {
        &mut self.backend
    }

    fn output_size(&self) -> (u32, u32) {
        self.output_size
    }

    fn present(&mut self) -> BackendResult<()> {
        self.presented_frames += 1;
        log::trace!("Presented frame {}", self.presented_frames);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
