//! Replay devices
//!
//! Cameras and microphones that play back prerecorded samples. Used for
//! offline evaluation of recorded sessions and for deterministic tests.

use crate::{AudioClip, CameraDevice, CaptureError, FrameStream, Microphone, VideoFrame};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

/// Camera that replays a fixed frame sequence
pub struct ReplayCamera {
    frames: Arc<[VideoFrame]>,
    looping: bool,
    frame_interval: Option<Duration>,
    opened: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
}

impl ReplayCamera {
    pub fn new(frames: Vec<VideoFrame>) -> Self {
        Self {
            frames: frames.into(),
            looping: false,
            frame_interval: None,
            opened: Arc::new(AtomicUsize::new(0)),
            released: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Restart from the first frame once the sequence is exhausted
    pub fn looping(mut self) -> Self {
        self.looping = true;
        self
    }

    /// Sleep between frames to emulate a real frame rate
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = Some(interval);
        self
    }

    /// Number of streams opened so far
    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Number of streams released (dropped) so far
    pub fn release_count(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

impl CameraDevice for ReplayCamera {
    fn open(&self) -> Result<Box<dyn FrameStream>, CaptureError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        debug!("Replay camera opened ({} frames)", self.frames.len());
        Ok(Box::new(ReplayStream {
            frames: Arc::clone(&self.frames),
            position: 0,
            looping: self.looping,
            frame_interval: self.frame_interval,
            released: Arc::clone(&self.released),
        }))
    }
}

struct ReplayStream {
    frames: Arc<[VideoFrame]>,
    position: usize,
    looping: bool,
    frame_interval: Option<Duration>,
    released: Arc<AtomicUsize>,
}

impl FrameStream for ReplayStream {
    fn next_frame(&mut self) -> Result<VideoFrame, CaptureError> {
        if self.position >= self.frames.len() {
            if !self.looping || self.frames.is_empty() {
                return Err(CaptureError::Exhausted);
            }
            self.position = 0;
        }

        if let Some(interval) = self.frame_interval {
            std::thread::sleep(interval);
        }

        let frame = self.frames[self.position].clone();
        self.position += 1;
        Ok(frame)
    }
}

impl Drop for ReplayStream {
    fn drop(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
        debug!("Replay camera released");
    }
}

/// Microphone that hands out prerecorded clips in order.
///
/// The last clip is repeated once the queue drains.
pub struct ReplayMicrophone {
    clips: Mutex<VecDeque<AudioClip>>,
    last: Mutex<Option<AudioClip>>,
}

impl ReplayMicrophone {
    pub fn new(clips: Vec<AudioClip>) -> Self {
        Self {
            clips: Mutex::new(clips.into()),
            last: Mutex::new(None),
        }
    }
}

impl Microphone for ReplayMicrophone {
    fn record(&self, _duration: Duration) -> Result<AudioClip, CaptureError> {
        let mut clips = self
            .clips
            .lock()
            .map_err(|e| CaptureError::Stream(format!("Lock error: {}", e)))?;
        let mut last = self
            .last
            .lock()
            .map_err(|e| CaptureError::Stream(format!("Lock error: {}", e)))?;

        match clips.pop_front() {
            Some(clip) => {
                *last = Some(clip.clone());
                Ok(clip)
            }
            None => last.clone().ok_or(CaptureError::Exhausted),
        }
    }
}
