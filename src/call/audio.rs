//! Audio cue flags
//!
//! The engine plays no audio itself; it exposes flags the client's audio
//! layer observes. The machine guarantees cues are stopped before call state
//! is reset, so no observer can see an Idle call with a ringing cue.

use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Default)]
pub struct AudioCues {
    ringtone: AtomicBool,
}

impl AudioCues {
    /// Raise the local ringtone cue (inbound calls only; outbound calls rely
    /// on carrier ringback).
    pub fn start_ringtone(&self) {
        self.ringtone.store(true, Ordering::SeqCst);
        tracing::debug!("ringtone cue raised");
    }

    /// Drop every cue.
    pub fn stop_all(&self) {
        if self.ringtone.swap(false, Ordering::SeqCst) {
            tracing::debug!("ringtone cue dropped");
        }
    }

    pub fn ringtone_playing(&self) -> bool {
        self.ringtone.load(Ordering::SeqCst)
    }
}
