//! Backend abstraction layer
//!
//! Provides the [`RenderBackend`] trait the render core talks to, the
//! headless [`DummyBackend`] and, with the `wgpu-backend` feature, a
//! headless wgpu implementation.

pub mod dummy;
pub mod traits;
pub mod types;

#[cfg(feature = "wgpu-backend")]
pub mod wgpu_backend;

pub use dummy::*;
pub use traits::*;
pub use types::*;

#[cfg(feature = "wgpu-backend")]
pub use wgpu_backend::WgpuBackend;
