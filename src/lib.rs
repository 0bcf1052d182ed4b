//! Panorama Render - viewport-adaptive rendering core for tiled 360° video
//!
//! Given a presentation timestamp and the current viewing direction, the
//! core picks the tiles of a tiled panoramic stream that the viewport needs,
//! composites them by quality ranking into a render-to-screen texture and
//! draws that texture onto the projection geometry.
//!
//! # Layout
//! - [`manager`]: [`RenderManager`], the host-facing orchestrator
//! - [`target`]: render targets for the supported projection formats
//! - [`viewport`]: the lock-guarded pose shared with input threads
//! - [`backend`]: the GPU boundary, with a dummy backend and an optional wgpu one
//! - [`media`]: media source and render source factory collaborators
//!
//! # Threads
//! One render thread owns the manager and calls `initialize`/`render`. Input
//! and sensor threads update the pose through a [`ViewportHandle`].

pub mod backend;
pub mod config;
pub mod context;
pub mod error;
pub mod manager;
pub mod media;
pub mod projection;
pub mod surface;
pub mod target;
pub mod tiles;
pub mod viewport;

pub use config::{BlendConfig, ConfigError, RenderConfig};
pub use context::{HeadlessContext, RenderContext};
pub use error::{RenderError, RenderResult, RenderStatus};
pub use manager::RenderManager;
pub use media::{FrameUpdate, MediaInfo, MediaSource, RenderSourceFactory, SourceDescriptor};
pub use projection::ProjectionFormat;
pub use target::{ProjectionTarget, RenderTarget, TargetState};
pub use tiles::{QualityRankingInfo, Rect, TileInformation, TransformType};
pub use viewport::{Pose, PoseState, Viewport, ViewportHandle, ViewportManager};
