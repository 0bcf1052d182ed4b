//! Viewport state shared between the render thread and input threads.
//!
//! The pose (yaw, pitch) is the only value both sides touch. It lives in a
//! small lock-guarded [`PoseState`] so a reader always sees a pair written
//! by a single call; the lock is never held across GPU work.

use std::sync::Arc;

use glam::{Mat4, Quat, Vec3};
use parking_lot::Mutex;

use crate::error::{RenderError, RenderResult, RenderStatus};

/// Viewing direction in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Pose {
    pub yaw: f32,
    pub pitch: f32,
}

impl Pose {
    pub fn new(yaw: f32, pitch: f32) -> Self {
        Self { yaw, pitch }
    }

    pub fn is_finite(&self) -> bool {
        self.yaw.is_finite() && self.pitch.is_finite()
    }

    /// Rotation taking camera space (looking down -Z) to world space.
    pub fn orientation(&self) -> Quat {
        Quat::from_rotation_y(self.yaw.to_radians())
            * Quat::from_rotation_x(self.pitch.to_radians())
    }

    pub fn forward(&self) -> Vec3 {
        self.orientation() * Vec3::NEG_Z
    }
}

/// A pose together with the field of view it is seen through.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub pose: Pose,
    /// Horizontal field of view in degrees.
    pub h_fov: f32,
    /// Vertical field of view in degrees.
    pub v_fov: f32,
}

impl Viewport {
    pub fn new(yaw: f32, pitch: f32, h_fov: f32, v_fov: f32) -> Self {
        Self {
            pose: Pose::new(yaw, pitch),
            h_fov,
            v_fov,
        }
    }

    /// World-space directions of `samples x samples` rays through the cell
    /// centers of the view plane.
    pub fn sample_directions(&self, samples: u32) -> Vec<Vec3> {
        let n = samples.max(1);
        let orientation = self.pose.orientation();
        let tan_h = (self.h_fov.to_radians() * 0.5).tan();
        let tan_v = (self.v_fov.to_radians() * 0.5).tan();

        let mut rays = Vec::with_capacity((n * n) as usize);
        for j in 0..n {
            let v = 1.0 - (j as f32 + 0.5) / n as f32 * 2.0;
            for i in 0..n {
                let u = (i as f32 + 0.5) / n as f32 * 2.0 - 1.0;
                let camera = Vec3::new(u * tan_h, v * tan_v, -1.0).normalize();
                rays.push(orientation * camera);
            }
        }
        rays
    }

    /// View-projection matrix for a camera at the sphere center.
    pub fn view_proj(&self, aspect: f32) -> Mat4 {
        let view = Mat4::from_quat(self.pose.orientation().inverse());
        let proj = Mat4::perspective_rh(self.v_fov.to_radians(), aspect, 0.05, 100.0);
        proj * view
    }
}

/// Wrap a yaw angle into [-180, 180).
pub fn normalize_yaw(yaw: f32) -> f32 {
    let wrapped = (yaw + 180.0).rem_euclid(360.0) - 180.0;
    // rem_euclid can round up to exactly 360 for tiny negative inputs.
    if wrapped >= 180.0 {
        wrapped - 360.0
    } else {
        wrapped
    }
}

/// Pose plus bookkeeping, always read and written as one value.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PoseState {
    pub pose: Pose,
    /// Incremented on every accepted write.
    pub generation: u64,
    /// Status of the most recent render call.
    pub status: RenderStatus,
}

/// Owns the logical viewing direction and the field of view.
#[derive(Debug)]
pub struct ViewportManager {
    h_fov: f32,
    v_fov: f32,
    max_pitch: f32,
    state: Mutex<PoseState>,
}

/// Shared handle used by input and sensor threads.
pub type ViewportHandle = Arc<ViewportManager>;

static_assertions::assert_impl_all!(ViewportManager: Send, Sync);
static_assertions::assert_impl_all!(ViewportHandle: Send, Sync);

impl ViewportManager {
    pub fn new(h_fov: f32, v_fov: f32, max_pitch: f32) -> Self {
        Self {
            h_fov,
            v_fov,
            max_pitch: max_pitch.abs().min(90.0),
            state: Mutex::new(PoseState::default()),
        }
    }

    pub fn h_fov(&self) -> f32 {
        self.h_fov
    }

    pub fn v_fov(&self) -> f32 {
        self.v_fov
    }

    pub fn max_pitch(&self) -> f32 {
        self.max_pitch
    }

    /// Canonical form of a pose: yaw wrapped, pitch clamped.
    pub fn normalize(&self, pose: Pose) -> Pose {
        Pose {
            yaw: normalize_yaw(pose.yaw),
            pitch: pose.pitch.clamp(-self.max_pitch, self.max_pitch),
        }
    }

    /// Authoritative absolute set. Non-finite input is rejected and leaves
    /// the pose unchanged.
    pub fn set_viewport(&self, yaw: f32, pitch: f32) -> RenderResult<Pose> {
        let pose = Pose::new(yaw, pitch);
        if !pose.is_finite() {
            return Err(RenderError::InvalidArgument(format!(
                "viewport ({yaw}, {pitch}) is not finite"
            )));
        }
        Ok(self.store(pose))
    }

    /// Sensor/input path. Non-finite samples are treated as jitter and
    /// dropped; the returned pose is the one in effect afterwards.
    pub fn change_viewport(&self, yaw: f32, pitch: f32) -> Pose {
        let pose = Pose::new(yaw, pitch);
        if !pose.is_finite() {
            log::debug!("Dropping non-finite viewport sample ({}, {})", yaw, pitch);
            return self.get_viewport();
        }
        self.store(pose)
    }

    fn store(&self, pose: Pose) -> Pose {
        let pose = self.normalize(pose);
        let mut state = self.state.lock();
        state.pose = pose;
        state.generation += 1;
        pose
    }

    pub fn get_viewport(&self) -> Pose {
        self.state.lock().pose
    }

    /// Pose, generation and last render status in one read.
    pub fn status_and_pose(&self) -> PoseState {
        *self.state.lock()
    }

    pub fn set_status(&self, status: RenderStatus) {
        self.state.lock().status = status;
    }

    /// Current pose seen through the configured field of view.
    pub fn viewport(&self) -> Viewport {
        Viewport {
            pose: self.get_viewport(),
            h_fov: self.h_fov,
            v_fov: self.v_fov,
        }
    }
}
