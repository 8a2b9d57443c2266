//! Platform audio output layer.
//!
//! The worker thread owns exactly one [`SoundDriver`] and talks to it through
//! integer handles, so the engine logic stays independent of the output
//! library. [`rodio::RodioDriver`] plays through the default output device;
//! [`null::NullDriver`] simulates playback for headless use and tests.

pub mod null;
pub mod rodio;

use crate::types::Vec3;

/// Handle to one playback channel inside a driver.
pub type VoiceId = usize;

/// Handle to one block of decoded PCM uploaded to a driver.
///
/// `BufferId::NULL` marks a decode failure; binding or queuing it is a no-op
/// that plays silence for the covered range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferId(pub(crate) usize);

impl BufferId {
    pub const NULL: BufferId = BufferId(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// Playback state of one voice, as reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    /// Created, never played.
    Initial,
    Playing,
    Paused,
    /// Finished or explicitly stopped.
    Stopped,
}

/// The operations the engine needs from a platform audio backend.
///
/// All positions are in the driver's native (right-handed) coordinates.
/// Voices created with no bound or queued content report `Stopped` after
/// `play`.
pub trait SoundDriver {
    /// Uploads interleaved i16 PCM. The buffer lives until the driver is
    /// dropped.
    fn create_buffer(&mut self, channels: u16, sample_rate: u32, pcm: &[i16]) -> BufferId;

    /// Allocates a playback channel, or `None` if the backend is out of
    /// voices.
    fn create_voice(&mut self) -> Option<VoiceId>;
    fn destroy_voice(&mut self, voice: VoiceId);

    /// Binds a whole buffer for non-streamed playback.
    fn bind_buffer(&mut self, voice: VoiceId, buffer: BufferId);
    /// Enables native looping of the bound buffer.
    fn set_looping(&mut self, voice: VoiceId, looping: bool);

    /// Appends a buffer to the voice's streaming queue.
    fn queue_buffer(&mut self, voice: VoiceId, buffer: BufferId);
    /// Number of queued buffers fully played so far.
    fn buffers_processed(&mut self, voice: VoiceId) -> usize;
    /// Removes `count` processed buffers from the head of the queue.
    fn unqueue_processed(&mut self, voice: VoiceId, count: usize);

    /// Seeks within the bound buffer, in sample frames.
    fn set_sample_offset(&mut self, voice: VoiceId, offset: u64);

    fn play(&mut self, voice: VoiceId);
    fn pause(&mut self, voice: VoiceId);
    fn stop(&mut self, voice: VoiceId);
    fn state(&mut self, voice: VoiceId) -> VoiceState;

    fn set_gain(&mut self, voice: VoiceId, gain: f32);
    fn set_pitch(&mut self, voice: VoiceId, pitch: f32);
    /// Positions the voice in world space and enables distance attenuation.
    fn set_pos_vel(&mut self, voice: VoiceId, pos: Vec3, vel: Vec3);
    /// Pins the voice to the listener (no attenuation).
    fn set_relative(&mut self, voice: VoiceId);

    fn set_listener(&mut self, pos: Vec3, vel: Vec3, at: Vec3, up: Vec3);
    fn set_listener_gain(&mut self, gain: f32);

    /// Advances simulated time. Real-time backends ignore this.
    fn step(&mut self, _dtime: f32) {}
}
