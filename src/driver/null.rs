//! Driver that simulates playback without an audio device.
//!
//! Buffers record only their shape (channels, rate, frame count); voices
//! advance through their content when [`SoundDriver::step`] is called with
//! simulated time. Playback position, looping, queue consumption and
//! end-of-content stops all behave like a real backend, which makes this the
//! workhorse for headless servers and for the integration tests.

use std::collections::{HashMap, VecDeque};

use super::{BufferId, SoundDriver, VoiceId, VoiceState};
use crate::types::Vec3;

struct NullBuffer {
    frames: u64,
    sample_rate: u32,
}

struct NullVoice {
    state: VoiceState,
    looping: bool,
    pitch: f32,
    /// Whole-buffer binding for non-streamed playback.
    bound: Option<BufferId>,
    /// Streaming queue. Entries below `processed` are fully played but not
    /// yet unqueued.
    queue: VecDeque<BufferId>,
    processed: usize,
    /// Playback position in frames, within the bound buffer or the entry at
    /// `queue[processed]`.
    pos_frames: f64,
}

impl NullVoice {
    fn new() -> Self {
        NullVoice {
            state: VoiceState::Initial,
            looping: false,
            pitch: 1.0,
            bound: None,
            queue: VecDeque::new(),
            processed: 0,
            pos_frames: 0.0,
        }
    }
}

/// Simulated audio backend. See the module docs.
pub struct NullDriver {
    buffers: HashMap<usize, NullBuffer>,
    next_buffer: usize,
    voices: HashMap<VoiceId, NullVoice>,
    next_voice: VoiceId,
}

impl NullDriver {
    pub fn new() -> Self {
        NullDriver {
            buffers: HashMap::new(),
            next_buffer: 1,
            voices: HashMap::new(),
            next_voice: 0,
        }
    }

    fn advance_voice(
        voice: &mut NullVoice,
        buffers: &HashMap<usize, NullBuffer>,
        dtime: f32,
    ) {
        let mut seconds_left = dtime as f64;
        while seconds_left > 0.0 {
            let (frames, rate) = if let Some(bound) = voice.bound {
                let buf = &buffers[&bound.0];
                (buf.frames, buf.sample_rate)
            } else if let Some(&front) = voice.queue.get(voice.processed) {
                let buf = &buffers[&front.0];
                (buf.frames, buf.sample_rate)
            } else {
                // Queue underrun (or empty voice).
                voice.state = VoiceState::Stopped;
                return;
            };

            let frames_left = frames as f64 - voice.pos_frames;
            let frames_per_sec = rate as f64 * voice.pitch as f64;
            let secs_needed = frames_left / frames_per_sec;

            if seconds_left < secs_needed {
                voice.pos_frames += seconds_left * frames_per_sec;
                return;
            }

            seconds_left -= secs_needed;
            voice.pos_frames = 0.0;
            if voice.bound.is_some() {
                if !voice.looping {
                    voice.state = VoiceState::Stopped;
                    return;
                }
            } else {
                voice.processed += 1;
            }
        }
    }
}

impl Default for NullDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl SoundDriver for NullDriver {
    fn create_buffer(&mut self, channels: u16, sample_rate: u32, pcm: &[i16]) -> BufferId {
        let id = self.next_buffer;
        self.next_buffer += 1;
        self.buffers.insert(
            id,
            NullBuffer {
                frames: (pcm.len() / channels.max(1) as usize) as u64,
                sample_rate,
            },
        );
        BufferId(id)
    }

    fn create_voice(&mut self) -> Option<VoiceId> {
        let id = self.next_voice;
        self.next_voice += 1;
        self.voices.insert(id, NullVoice::new());
        Some(id)
    }

    fn destroy_voice(&mut self, voice: VoiceId) {
        self.voices.remove(&voice);
    }

    fn bind_buffer(&mut self, voice: VoiceId, buffer: BufferId) {
        if buffer.is_null() {
            return;
        }
        if let Some(v) = self.voices.get_mut(&voice) {
            v.bound = Some(buffer);
        }
    }

    fn set_looping(&mut self, voice: VoiceId, looping: bool) {
        if let Some(v) = self.voices.get_mut(&voice) {
            v.looping = looping;
        }
    }

    fn queue_buffer(&mut self, voice: VoiceId, buffer: BufferId) {
        if buffer.is_null() {
            return;
        }
        if let Some(v) = self.voices.get_mut(&voice) {
            v.queue.push_back(buffer);
        }
    }

    fn buffers_processed(&mut self, voice: VoiceId) -> usize {
        self.voices.get(&voice).map_or(0, |v| v.processed)
    }

    fn unqueue_processed(&mut self, voice: VoiceId, count: usize) {
        if let Some(v) = self.voices.get_mut(&voice) {
            let count = count.min(v.processed);
            for _ in 0..count {
                v.queue.pop_front();
            }
            v.processed -= count;
        }
    }

    fn set_sample_offset(&mut self, voice: VoiceId, offset: u64) {
        if let Some(v) = self.voices.get_mut(&voice) {
            v.pos_frames = offset as f64;
        }
    }

    fn play(&mut self, voice: VoiceId) {
        if let Some(v) = self.voices.get_mut(&voice) {
            if v.bound.is_none() && v.queue.is_empty() {
                v.state = VoiceState::Stopped;
            } else {
                v.state = VoiceState::Playing;
            }
        }
    }

    fn pause(&mut self, voice: VoiceId) {
        if let Some(v) = self.voices.get_mut(&voice) {
            if v.state == VoiceState::Playing {
                v.state = VoiceState::Paused;
            }
        }
    }

    fn stop(&mut self, voice: VoiceId) {
        if let Some(v) = self.voices.get_mut(&voice) {
            v.state = VoiceState::Stopped;
        }
    }

    fn state(&mut self, voice: VoiceId) -> VoiceState {
        self.voices.get(&voice).map_or(VoiceState::Stopped, |v| v.state)
    }

    // Simulated playback is silent; gains and positions are accepted and
    // dropped.
    fn set_gain(&mut self, _voice: VoiceId, _gain: f32) {}

    fn set_pitch(&mut self, voice: VoiceId, pitch: f32) {
        if let Some(v) = self.voices.get_mut(&voice) {
            v.pitch = pitch.max(0.001);
        }
    }

    fn set_pos_vel(&mut self, _voice: VoiceId, _pos: Vec3, _vel: Vec3) {}

    fn set_relative(&mut self, _voice: VoiceId) {}

    fn set_listener(&mut self, _pos: Vec3, _vel: Vec3, _at: Vec3, _up: Vec3) {}

    fn set_listener_gain(&mut self, _gain: f32) {}

    fn step(&mut self, dtime: f32) {
        for voice in self.voices.values_mut() {
            if voice.state == VoiceState::Playing {
                Self::advance_voice(voice, &self.buffers, dtime);
            }
        }
    }
}
