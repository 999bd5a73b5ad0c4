//! Playback controller seam.
//!
//! The lock client starts and stops playback through this trait and never
//! lets the player touch lock state.

use parking_lot::Mutex;

/// Player driven by the lock client. `stop` must be idempotent.
pub trait PlaybackController: Send + Sync {
    fn play(&self, url: &str);
    fn stop(&self);
}

/// Player that only logs; used by the CLI.
#[derive(Debug, Default)]
pub struct TracingPlayback {
    label: String,
}

impl TracingPlayback {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl PlaybackController for TracingPlayback {
    fn play(&self, url: &str) {
        tracing::info!("[{}] Playing {}", self.label, url);
    }

    fn stop(&self) {
        tracing::info!("[{}] Playback stopped", self.label);
    }
}

/// One call made on a [`RecordingPlayback`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackCall {
    Play(String),
    Stop,
}

/// Player that remembers every call, for tests and simulations.
#[derive(Debug, Default)]
pub struct RecordingPlayback {
    calls: Mutex<Vec<PlaybackCall>>,
}

impl RecordingPlayback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<PlaybackCall> {
        self.calls.lock().clone()
    }

    pub fn stop_count(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| **call == PlaybackCall::Stop)
            .count()
    }

    /// URL of the most recent `play` not followed by a `stop`.
    pub fn now_playing(&self) -> Option<String> {
        match self.calls.lock().last() {
            Some(PlaybackCall::Play(url)) => Some(url.clone()),
            _ => None,
        }
    }
}

impl PlaybackController for RecordingPlayback {
    fn play(&self, url: &str) {
        self.calls.lock().push(PlaybackCall::Play(url.to_string()));
    }

    fn stop(&self) {
        self.calls.lock().push(PlaybackCall::Stop);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_tracks_now_playing() {
        let playback = RecordingPlayback::new();
        assert_eq!(playback.now_playing(), None);

        playback.play("http://provider/live/1.ts");
        assert_eq!(
            playback.now_playing().as_deref(),
            Some("http://provider/live/1.ts")
        );

        playback.stop();
        playback.stop();
        assert_eq!(playback.now_playing(), None);
        assert_eq!(playback.stop_count(), 2);
    }
}
