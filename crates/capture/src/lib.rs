//! Capture Library for the Authentication Core
//!
//! Provides the sample types and device seams the biometric matchers consume:
//! - Video frames from a user-facing camera
//! - Audio clips from a microphone
//! - `Capability` wiring for collaborators that may not be configured
//! - Cooperative cancellation for long-running capture loops

pub mod audio;
pub mod capability;
pub mod frame;
pub mod replay;

pub use audio::AudioClip;
pub use capability::Capability;
pub use frame::VideoFrame;
pub use replay::{ReplayCamera, ReplayMicrophone};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Capture error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("Failed to open device: {0}")]
    Open(String),

    #[error("Streaming error: {0}")]
    Stream(String),

    #[error("Capture timeout")]
    Timeout,

    #[error("Stream exhausted")]
    Exhausted,

    #[error("Device not configured: {0}")]
    NotConfigured(String),
}

/// Failure reported by an opaque collaborator (encoder, landmark model)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct BackendError(pub String);

impl BackendError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// An open camera stream.
///
/// Dropping the stream releases the underlying device. Callers rely on this
/// for guaranteed release on timeout, error, or cancellation.
pub trait FrameStream: Send {
    /// Block until the next frame is available
    fn next_frame(&mut self) -> Result<VideoFrame, CaptureError>;
}

/// A camera that can be opened for streaming
pub trait CameraDevice: Send + Sync {
    fn open(&self) -> Result<Box<dyn FrameStream>, CaptureError>;
}

/// A microphone that records fixed-duration clips
pub trait Microphone: Send + Sync {
    fn record(&self, duration: Duration) -> Result<AudioClip, CaptureError>;
}

/// Shared cancellation flag checked by blocking capture loops
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Whether both handles share one flag
    pub fn same_as(&self, other: &CancelFlag) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Guard that cancels this flag when dropped
    pub fn drop_guard(&self) -> CancelOnDrop {
        CancelOnDrop(Some(self.clone()))
    }
}

/// Cancels its flag when dropped, e.g. when an awaiting future is abandoned
#[derive(Debug)]
pub struct CancelOnDrop(Option<CancelFlag>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if let Some(flag) = self.0.take() {
            flag.cancel();
        }
    }
}
