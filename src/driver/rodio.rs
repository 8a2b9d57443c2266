//! Audio output through rodio.
//!
//! One `Sink` per voice. rodio gives no event when a queued `SamplesBuffer`
//! finishes, so processed-buffer counts are estimated from wall-clock time
//! and the known sample rate, with `Sink::empty()` as the ground truth for
//! "everything ran out".
//!
//! rodio has no spatialization; world positions and listener transforms are
//! accepted and ignored, so positional voices play unattenuated. Distance
//! models belong in a future backend.

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use log::{error, warn};
use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, OutputStreamHandle, Sink, Source};

use super::{BufferId, SoundDriver, VoiceId, VoiceState};
use crate::types::Vec3;

struct PcmBuffer {
    channels: u16,
    sample_rate: u32,
    samples: Vec<i16>,
}

impl PcmBuffer {
    fn frames(&self) -> u64 {
        (self.samples.len() / self.channels.max(1) as usize) as u64
    }
}

struct RodioVoice {
    sink: Option<Sink>,
    state: VoiceState,
    looping: bool,
    gain: f32,
    pitch: f32,
    bound: Option<BufferId>,
    /// Streaming queue; entries below `processed` are played but not yet
    /// unqueued.
    queued: VecDeque<(BufferId, u64)>,
    processed: usize,
    /// Seek to apply when the sink is next built.
    pending_offset: u64,
    /// Sample rate of the first queued or bound buffer.
    sample_rate: u32,
    play_start: Option<Instant>,
    frames_before_pause: u64,
    frames_consumed: u64,
}

impl RodioVoice {
    fn new() -> Self {
        RodioVoice {
            sink: None,
            state: VoiceState::Initial,
            looping: false,
            gain: 1.0,
            pitch: 1.0,
            bound: None,
            queued: VecDeque::new(),
            processed: 0,
            pending_offset: 0,
            sample_rate: 0,
            play_start: None,
            frames_before_pause: 0,
            frames_consumed: 0,
        }
    }

    /// Wall-clock estimate of frames played since the sink was built.
    fn frames_played(&self) -> u64 {
        let live = match self.play_start {
            Some(start) if self.sample_rate != 0 => {
                (start.elapsed().as_secs_f64() * self.sample_rate as f64 * self.pitch as f64)
                    as u64
            }
            _ => 0,
        };
        self.frames_before_pause + live
    }

    /// Advances `processed` past queue entries the estimate says are done.
    fn update_processed(&mut self) {
        let target = self.frames_played().saturating_sub(self.frames_consumed);
        let mut consumed = 0u64;
        while let Some(&(_, frames)) = self.queued.get(self.processed) {
            if consumed + frames > target {
                break;
            }
            consumed += frames;
            self.processed += 1;
        }
        self.frames_consumed += consumed;
    }

    fn mark_all_processed(&mut self) {
        self.processed = self.queued.len();
        self.play_start = None;
        self.frames_before_pause = 0;
        self.frames_consumed = 0;
    }
}

/// Plays through the default output device.
///
/// Must be created on the thread that will own it: `OutputStream` is not
/// `Send`.
pub struct RodioDriver {
    // Dropping the stream kills all sinks.
    _stream: OutputStream,
    handle: OutputStreamHandle,
    buffers: HashMap<usize, PcmBuffer>,
    next_buffer: usize,
    voices: HashMap<VoiceId, RodioVoice>,
    next_voice: VoiceId,
    listener_gain: f32,
}

impl RodioDriver {
    /// Opens the default output device.
    pub fn new() -> Option<Self> {
        let (stream, handle) = match OutputStream::try_default() {
            Ok(pair) => pair,
            Err(e) => {
                error!("Failed to open audio output device: {}", e);
                return None;
            }
        };
        Some(RodioDriver {
            _stream: stream,
            handle,
            buffers: HashMap::new(),
            next_buffer: 1,
            voices: HashMap::new(),
            next_voice: 0,
            listener_gain: 1.0,
        })
    }

    fn source_for(&self, buffer: BufferId, skip_frames: u64) -> Option<SamplesBuffer<i16>> {
        let buf = self.buffers.get(&buffer.0)?;
        let skip = (skip_frames as usize * buf.channels as usize).min(buf.samples.len());
        Some(SamplesBuffer::new(
            buf.channels,
            buf.sample_rate,
            buf.samples[skip..].to_vec(),
        ))
    }

    fn build_sink(&mut self, voice: VoiceId) {
        let Some(v) = self.voices.get(&voice) else {
            return;
        };
        if v.bound.is_none() && v.queued.is_empty() {
            if let Some(v) = self.voices.get_mut(&voice) {
                v.state = VoiceState::Stopped;
            }
            return;
        }

        let sink = match Sink::try_new(&self.handle) {
            Ok(sink) => sink,
            Err(e) => {
                warn!("Failed to create playback sink: {}", e);
                if let Some(v) = self.voices.get_mut(&voice) {
                    v.state = VoiceState::Stopped;
                }
                return;
            }
        };

        let v = &self.voices[&voice];
        sink.set_volume(v.gain * self.listener_gain);
        sink.set_speed(v.pitch);

        if let Some(bound) = v.bound {
            if let Some(source) = self.source_for(bound, v.pending_offset) {
                if v.looping {
                    sink.append(source);
                    // Subsequent passes start from the beginning.
                    if let Some(full) = self.source_for(bound, 0) {
                        sink.append(full.repeat_infinite());
                    }
                } else {
                    sink.append(source);
                }
            }
        } else {
            let pending: Vec<BufferId> =
                v.queued.iter().skip(v.processed).map(|&(id, _)| id).collect();
            for id in pending {
                if let Some(source) = self.source_for(id, 0) {
                    sink.append(source);
                }
            }
        }

        if let Some(v) = self.voices.get_mut(&voice) {
            v.sink = Some(sink);
            v.state = VoiceState::Playing;
            v.play_start = Some(Instant::now());
            v.frames_before_pause = 0;
            v.frames_consumed = 0;
            v.pending_offset = 0;
        }
    }
}

impl SoundDriver for RodioDriver {
    fn create_buffer(&mut self, channels: u16, sample_rate: u32, pcm: &[i16]) -> BufferId {
        let id = self.next_buffer;
        self.next_buffer += 1;
        self.buffers.insert(
            id,
            PcmBuffer {
                channels,
                sample_rate,
                samples: pcm.to_vec(),
            },
        );
        BufferId(id)
    }

    fn create_voice(&mut self) -> Option<VoiceId> {
        let id = self.next_voice;
        self.next_voice += 1;
        self.voices.insert(id, RodioVoice::new());
        Some(id)
    }

    fn destroy_voice(&mut self, voice: VoiceId) {
        if let Some(mut v) = self.voices.remove(&voice) {
            if let Some(sink) = v.sink.take() {
                sink.stop();
            }
        }
    }

    fn bind_buffer(&mut self, voice: VoiceId, buffer: BufferId) {
        if buffer.is_null() {
            return;
        }
        let rate = self.buffers.get(&buffer.0).map(|b| b.sample_rate);
        if let Some(v) = self.voices.get_mut(&voice) {
            v.bound = Some(buffer);
            if let Some(rate) = rate {
                v.sample_rate = rate;
            }
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
        let Some(buf) = self.buffers.get(&buffer.0) else {
            return;
        };
        let frames = buf.frames();
        let rate = buf.sample_rate;
        let source = SamplesBuffer::new(buf.channels, buf.sample_rate, buf.samples.clone());

        if let Some(v) = self.voices.get_mut(&voice) {
            if v.sample_rate == 0 {
                v.sample_rate = rate;
            }
            v.queued.push_back((buffer, frames));
            if v.state == VoiceState::Playing {
                if let Some(ref sink) = v.sink {
                    sink.append(source);
                }
            }
        }
    }

    fn buffers_processed(&mut self, voice: VoiceId) -> usize {
        let Some(v) = self.voices.get_mut(&voice) else {
            return 0;
        };
        let drained = v.sink.as_ref().map_or(false, |s| s.empty());
        if drained {
            v.mark_all_processed();
        } else {
            v.update_processed();
        }
        v.processed
    }

    fn unqueue_processed(&mut self, voice: VoiceId, count: usize) {
        if let Some(v) = self.voices.get_mut(&voice) {
            let count = count.min(v.processed);
            for _ in 0..count {
                v.queued.pop_front();
            }
            v.processed -= count;
        }
    }

    fn set_sample_offset(&mut self, voice: VoiceId, offset: u64) {
        if let Some(v) = self.voices.get_mut(&voice) {
            v.pending_offset = offset;
        }
    }

    fn play(&mut self, voice: VoiceId) {
        let Some(v) = self.voices.get_mut(&voice) else {
            return;
        };

        if v.sink.as_ref().map_or(false, |s| s.is_paused()) {
            if let Some(ref sink) = v.sink {
                sink.play();
            }
            v.state = VoiceState::Playing;
            v.play_start = Some(Instant::now());
            return;
        }
        if v.sink.as_ref().map_or(false, |s| !s.empty()) {
            // Already playing.
            return;
        }

        // Never started, or the sink drained (stream underrun); rebuild it
        // from the content not yet played.
        if let Some(sink) = v.sink.take() {
            sink.stop();
        }
        self.build_sink(voice);
    }

    fn pause(&mut self, voice: VoiceId) {
        if let Some(v) = self.voices.get_mut(&voice) {
            if v.state != VoiceState::Playing {
                return;
            }
            if let Some(ref sink) = v.sink {
                sink.pause();
            }
            v.frames_before_pause = v.frames_played();
            v.play_start = None;
            v.state = VoiceState::Paused;
        }
    }

    fn stop(&mut self, voice: VoiceId) {
        if let Some(v) = self.voices.get_mut(&voice) {
            if let Some(sink) = v.sink.take() {
                sink.stop();
            }
            v.mark_all_processed();
            v.state = VoiceState::Stopped;
        }
    }

    fn state(&mut self, voice: VoiceId) -> VoiceState {
        let Some(v) = self.voices.get_mut(&voice) else {
            return VoiceState::Stopped;
        };
        if let Some(ref sink) = v.sink {
            if sink.empty() {
                v.state = VoiceState::Stopped;
                v.play_start = None;
            } else if sink.is_paused() {
                v.state = VoiceState::Paused;
            } else {
                v.state = VoiceState::Playing;
            }
        }
        v.state
    }

    fn set_gain(&mut self, voice: VoiceId, gain: f32) {
        let listener_gain = self.listener_gain;
        if let Some(v) = self.voices.get_mut(&voice) {
            v.gain = gain;
            if let Some(ref sink) = v.sink {
                sink.set_volume(gain * listener_gain);
            }
        }
    }

    fn set_pitch(&mut self, voice: VoiceId, pitch: f32) {
        if let Some(v) = self.voices.get_mut(&voice) {
            v.pitch = pitch;
            if let Some(ref sink) = v.sink {
                sink.set_speed(pitch);
            }
        }
    }

    fn set_pos_vel(&mut self, _voice: VoiceId, _pos: Vec3, _vel: Vec3) {}

    fn set_relative(&mut self, _voice: VoiceId) {}

    fn set_listener(&mut self, _pos: Vec3, _vel: Vec3, _at: Vec3, _up: Vec3) {}

    fn set_listener_gain(&mut self, gain: f32) {
        self.listener_gain = gain;
        for v in self.voices.values() {
            if let Some(ref sink) = v.sink {
                sink.set_volume(v.gain * gain);
            }
        }
    }
}
