//! Render error and status types.

use thiserror::Error;

use crate::backend::BackendError;

/// Status kinds reported to the host application.
///
/// Every [`RenderError`] maps onto exactly one status, and a successful
/// call reports [`RenderStatus::Success`] (or [`RenderStatus::EndOfStream`]
/// once the media source is exhausted).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RenderStatus {
    #[default]
    Success,
    NotInitialized,
    AlreadyInitialized,
    UnsupportedFormat,
    ResourceError,
    InvalidArgument,
    TileUnavailable,
    EndOfStream,
}

impl RenderStatus {
    /// Stable numeric code for hosts that need a plain integer.
    pub fn code(&self) -> u32 {
        match self {
            RenderStatus::Success => 0,
            RenderStatus::NotInitialized => 1,
            RenderStatus::AlreadyInitialized => 2,
            RenderStatus::UnsupportedFormat => 3,
            RenderStatus::ResourceError => 4,
            RenderStatus::InvalidArgument => 5,
            RenderStatus::TileUnavailable => 6,
            RenderStatus::EndOfStream => 7,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RenderStatus::Success | RenderStatus::EndOfStream)
    }
}

/// Errors produced by the render core.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RenderError {
    #[error("render pipeline is not initialized")]
    NotInitialized,
    #[error("render pipeline is already initialized")]
    AlreadyInitialized,
    #[error("unsupported projection format tag: {0}")]
    UnsupportedFormat(i32),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("no tile data available: {0}")]
    TileUnavailable(String),
    #[error("render target is {found}, operation requires {expected}")]
    InvalidState {
        expected: &'static str,
        found: &'static str,
    },
    #[error("GPU resource error: {0}")]
    Resource(#[from] BackendError),
}

impl RenderError {
    /// The host-visible status kind for this error.
    pub fn status(&self) -> RenderStatus {
        match self {
            RenderError::NotInitialized | RenderError::InvalidState { .. } => {
                RenderStatus::NotInitialized
            }
            RenderError::AlreadyInitialized => RenderStatus::AlreadyInitialized,
            RenderError::UnsupportedFormat(_) => RenderStatus::UnsupportedFormat,
            RenderError::InvalidArgument(_) => RenderStatus::InvalidArgument,
            RenderError::TileUnavailable(_) => RenderStatus::TileUnavailable,
            RenderError::Resource(_) => RenderStatus::ResourceError,
        }
    }

    /// Transient errors leave the pipeline usable; the frame is skipped.
    pub fn is_transient(&self) -> bool {
        matches!(self, RenderError::TileUnavailable(_))
    }
}

pub type RenderResult<T> = Result<T, RenderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RenderError::UnsupportedFormat(7);
        assert_eq!(err.to_string(), "unsupported projection format tag: 7");

        let err = RenderError::Resource(BackendError::OutOfMemory);
        assert_eq!(err.to_string(), "GPU resource error: out of GPU memory");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            RenderError::from(BackendError::DeviceLost).status(),
            RenderStatus::ResourceError
        );
        assert_eq!(
            RenderError::TileUnavailable("tile 3".into()).status(),
            RenderStatus::TileUnavailable
        );
        assert_eq!(
            RenderError::InvalidState {
                expected: "ready",
                found: "created"
            }
            .status(),
            RenderStatus::NotInitialized
        );
        assert!(RenderError::TileUnavailable(String::new()).is_transient());
        assert!(!RenderError::NotInitialized.is_transient());
    }

    #[test]
    fn test_status_codes_are_distinct() {
        let all = [
            RenderStatus::Success,
            RenderStatus::NotInitialized,
            RenderStatus::AlreadyInitialized,
            RenderStatus::UnsupportedFormat,
            RenderStatus::ResourceError,
            RenderStatus::InvalidArgument,
            RenderStatus::TileUnavailable,
            RenderStatus::EndOfStream,
        ];
        let mut codes: Vec<u32> = all.iter().map(|s| s.code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), all.len());
    }
}
