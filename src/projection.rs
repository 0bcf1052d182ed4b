//! Projection formats and sphere-to-picture mapping.
//!
//! Directions use a right-handed frame with +Y up. Yaw 0 / pitch 0 looks
//! down -Z, positive yaw turns left and positive pitch looks up.

use glam::Vec3;

use crate::error::{RenderError, RenderResult};

/// Mapping from viewing directions to a flat picture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProjectionFormat {
    Equirectangular,
    Cubemap,
}

/// Cube faces in 3x2 layout order: row 0 holds +X, -X, +Y; row 1 holds -Y, +Z, -Z.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CubeFace {
    PositiveX = 0,
    NegativeX = 1,
    PositiveY = 2,
    NegativeY = 3,
    PositiveZ = 4,
    NegativeZ = 5,
}

impl CubeFace {
    pub const ALL: [CubeFace; 6] = [
        CubeFace::PositiveX,
        CubeFace::NegativeX,
        CubeFace::PositiveY,
        CubeFace::NegativeY,
        CubeFace::PositiveZ,
        CubeFace::NegativeZ,
    ];

    pub fn index(&self) -> u32 {
        *self as u32
    }

    /// Column and row of this face in the 3x2 layout.
    pub fn layout_cell(&self) -> (u32, u32) {
        (self.index() % 3, self.index() / 3)
    }

    /// Dominant-axis face of a direction and the face-local UV in [0, 1].
    pub fn from_direction(dir: Vec3) -> (CubeFace, f32, f32) {
        let abs = dir.abs();
        let (face, sc, tc, ma) = if abs.x >= abs.y && abs.x >= abs.z {
            if dir.x > 0.0 {
                (CubeFace::PositiveX, -dir.z, -dir.y, abs.x)
            } else {
                (CubeFace::NegativeX, dir.z, -dir.y, abs.x)
            }
        } else if abs.y >= abs.z {
            if dir.y > 0.0 {
                (CubeFace::PositiveY, dir.x, dir.z, abs.y)
            } else {
                (CubeFace::NegativeY, dir.x, -dir.z, abs.y)
            }
        } else if dir.z > 0.0 {
            (CubeFace::PositiveZ, dir.x, -dir.y, abs.z)
        } else {
            (CubeFace::NegativeZ, -dir.x, -dir.y, abs.z)
        };
        let u = (sc / ma + 1.0) * 0.5;
        let v = (tc / ma + 1.0) * 0.5;
        (face, u, v)
    }

    /// Direction through face-local UV; inverse of [`CubeFace::from_direction`].
    pub fn direction(&self, u: f32, v: f32) -> Vec3 {
        let sc = u * 2.0 - 1.0;
        let tc = v * 2.0 - 1.0;
        let dir = match self {
            CubeFace::PositiveX => Vec3::new(1.0, -tc, -sc),
            CubeFace::NegativeX => Vec3::new(-1.0, -tc, sc),
            CubeFace::PositiveY => Vec3::new(sc, 1.0, tc),
            CubeFace::NegativeY => Vec3::new(sc, -1.0, -tc),
            CubeFace::PositiveZ => Vec3::new(sc, -tc, 1.0),
            CubeFace::NegativeZ => Vec3::new(-sc, -tc, -1.0),
        };
        dir.normalize()
    }
}

impl ProjectionFormat {
    /// Decode a media-source projection tag (0 = equirectangular, 1 = cubemap).
    pub fn from_tag(tag: i32) -> RenderResult<Self> {
        match tag {
            0 => Ok(ProjectionFormat::Equirectangular),
            1 => Ok(ProjectionFormat::Cubemap),
            other => Err(RenderError::UnsupportedFormat(other)),
        }
    }

    pub fn tag(&self) -> i32 {
        match self {
            ProjectionFormat::Equirectangular => 0,
            ProjectionFormat::Cubemap => 1,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ProjectionFormat::Equirectangular => "equirectangular",
            ProjectionFormat::Cubemap => "cubemap",
        }
    }

    /// Project a unit direction onto a `width` x `height` picture.
    ///
    /// The result always lies inside `[0, width) x [0, height)`.
    pub fn project(&self, dir: Vec3, width: u32, height: u32) -> (f32, f32) {
        let (w, h) = (width as f32, height as f32);
        let (x, y) = match self {
            ProjectionFormat::Equirectangular => {
                let (yaw, pitch) = yaw_pitch_of(dir);
                let mut x = (0.5 - yaw / 360.0) * w;
                if x >= w {
                    x -= w;
                }
                if x < 0.0 {
                    x += w;
                }
                (x, (0.5 - pitch / 180.0) * h)
            }
            ProjectionFormat::Cubemap => {
                let (face, u, v) = CubeFace::from_direction(dir);
                let (col, row) = face.layout_cell();
                let face_w = w / 3.0;
                let face_h = h / 2.0;
                // u or v reach 1.0 on face edges; stay inside the face's cell.
                (
                    col as f32 * face_w + clamp_below(u * face_w, face_w),
                    row as f32 * face_h + clamp_below(v * face_h, face_h),
                )
            }
        };
        (clamp_below(x, w), clamp_below(y, h))
    }
}

fn clamp_below(value: f32, limit: f32) -> f32 {
    let max = (limit - limit * f32::EPSILON).max(0.0);
    value.clamp(0.0, max)
}

/// Unit direction for a yaw/pitch pair in degrees.
pub fn direction(yaw_degrees: f32, pitch_degrees: f32) -> Vec3 {
    let yaw = yaw_degrees.to_radians();
    let pitch = pitch_degrees.to_radians();
    Vec3::new(
        -yaw.sin() * pitch.cos(),
        pitch.sin(),
        -yaw.cos() * pitch.cos(),
    )
}

/// Yaw/pitch in degrees of a direction; yaw in [-180, 180].
pub fn yaw_pitch_of(dir: Vec3) -> (f32, f32) {
    let dir = dir.normalize();
    let yaw = (-dir.x).atan2(-dir.z).to_degrees();
    let pitch = dir.y.clamp(-1.0, 1.0).asin().to_degrees();
    (yaw, pitch)
}
