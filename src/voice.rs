//! One playing instance of a sound.
//!
//! A voice owns a driver playback channel for its lifetime. Streamed voices
//! keep at most two buffers queued ahead of the play cursor and are refilled
//! by the worker's stream stepping; short sounds bind their single buffer up
//! front and use the driver's native looping.

use log::warn;

use crate::data::OpenSound;
use crate::driver::{SoundDriver, VoiceId, VoiceState};
use crate::types::{PlaySpec, Vec3};

#[derive(Debug, Clone, Copy)]
struct FadeState {
    step: f32,
    target_gain: f32,
}

pub(crate) struct Voice {
    pub(crate) driver_voice: VoiceId,
    /// Index of the backing sound in the worker's open-sound arena.
    pub(crate) sound: usize,
    /// Stream offset of the first sample not yet sent to the driver.
    next_sample_pos: u64,
    looping: bool,
    positional: bool,
    streaming: bool,
    /// When true, a stopped driver voice means playback finished (rather
    /// than "not started yet" or "starved between refills").
    stopped_means_finished: bool,
    gain: f32,
    fade: Option<FadeState>,
}

impl Voice {
    /// Creates a voice and primes the driver channel: binds or queues the
    /// first buffers, applies position, volume and pitch. Does not start
    /// playback.
    pub(crate) fn new(
        driver_voice: VoiceId,
        sound_idx: usize,
        sound: &mut OpenSound,
        driver: &mut dyn SoundDriver,
        spec: &PlaySpec,
        pos_vel: Option<(Vec3, Vec3)>,
    ) -> Voice {
        let info = sound.info();
        let len_seconds = info.length_seconds;
        let len_samples = info.length_samples;

        let mut voice = Voice {
            driver_voice,
            sound: sound_idx,
            next_sample_pos: len_samples,
            looping: spec.looping,
            positional: pos_vel.is_some(),
            streaming: sound.is_streaming(),
            stopped_means_finished: true,
            gain: 0.0,
            fade: None,
        };

        // Resolve the requested start time: negative counts from the end,
        // past-the-end means no sound, looping wraps modulo the duration.
        let mut start_time = spec.start_time;
        if len_seconds <= 0.0 {
            return voice;
        }
        if !spec.looping {
            if start_time < 0.0 {
                start_time = (start_time + len_seconds).max(0.0);
            } else if start_time >= len_seconds {
                // No sound; the voice is finished as soon as it "plays".
                return voice;
            }
        } else {
            start_time -= (start_time / len_seconds).floor() * len_seconds;
        }

        voice.next_sample_pos =
            (((start_time / len_seconds) * len_samples as f32) as u64).min(len_samples);
        if voice.looping && voice.next_sample_pos == len_samples {
            voice.next_sample_pos = 0;
        }

        if !voice.streaming {
            // Binding NULL (after a failed decode) is a no-op; the voice
            // then stops immediately on play.
            let at = sound.get_or_load_buffer_at(driver, voice.next_sample_pos);
            voice.next_sample_pos = at.end;
            driver.bind_buffer(driver_voice, at.buffer);
            driver.set_sample_offset(driver_voice, at.offset_in_buffer);
            driver.set_looping(driver_voice, voice.looping);
        } else {
            // Prime two buffers. Native looping can't be used since more
            // buffers get queued later; looping is done at refill time.
            let first = sound.get_or_load_buffer_at(driver, voice.next_sample_pos);
            voice.next_sample_pos = first.end;
            if voice.looping && voice.next_sample_pos == len_samples {
                voice.next_sample_pos = 0;
            }
            let second = sound.get_or_load_buffer_at(driver, voice.next_sample_pos);
            voice.next_sample_pos = second.end;
            debug_assert_eq!(second.offset_in_buffer, 0);

            driver.queue_buffer(driver_voice, first.buffer);
            driver.queue_buffer(driver_voice, second.buffer);
            driver.set_sample_offset(driver_voice, first.offset_in_buffer);

            voice.stopped_means_finished = false;
        }

        match pos_vel {
            Some((pos, vel)) => voice.update_pos_vel(driver, pos, vel),
            None => driver.set_relative(driver_voice),
        }
        voice.set_gain(driver, spec.volume);
        driver.set_pitch(driver_voice, spec.pitch);

        voice
    }

    pub(crate) fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub(crate) fn is_positional(&self) -> bool {
        self.positional
    }

    pub(crate) fn gain(&self) -> f32 {
        self.gain
    }

    pub(crate) fn set_gain(&mut self, driver: &mut dyn SoundDriver, gain: f32) {
        self.gain = gain;
        driver.set_gain(self.driver_voice, gain);
    }

    pub(crate) fn update_pos_vel(&mut self, driver: &mut dyn SoundDriver, pos: Vec3, vel: Vec3) {
        driver.set_pos_vel(self.driver_voice, pos, vel);
    }

    /// Finished playing (as opposed to not yet started or starved).
    pub(crate) fn is_dead(&self, driver: &mut dyn SoundDriver) -> bool {
        self.stopped_means_finished && driver.state(self.driver_voice) == VoiceState::Stopped
    }

    /// Marks the voice finished and stops the driver channel.
    pub(crate) fn stop(&mut self, driver: &mut dyn SoundDriver) {
        self.stopped_means_finished = true;
        driver.stop(self.driver_voice);
    }

    /// Unqueues finished stream buffers and decodes replacements.
    ///
    /// Returns false once the voice is dead or the stream end is reached
    /// without looping.
    pub(crate) fn step_stream(
        &mut self,
        sound: &mut OpenSound,
        driver: &mut dyn SoundDriver,
    ) -> bool {
        if self.is_dead(driver) {
            return false;
        }

        let processed = driver.buffers_processed(self.driver_voice);
        if processed == 0 {
            return true;
        }
        // At most 2 buffers are ever queued.
        debug_assert!(processed <= 2);
        driver.unqueue_processed(self.driver_voice, processed);

        let len_samples = sound.info().length_samples;
        for _ in 0..processed {
            if self.next_sample_pos == len_samples {
                // Reached the end.
                if self.looping {
                    self.next_sample_pos = 0;
                } else {
                    self.stopped_means_finished = true;
                    return false;
                }
            }

            let at = sound.get_or_load_buffer_at(driver, self.next_sample_pos);
            self.next_sample_pos = at.end;
            debug_assert_eq!(at.offset_in_buffer, 0);
            driver.queue_buffer(self.driver_voice, at.buffer);

            // Restart if the queue ran empty and the driver stopped.
            if driver.state(self.driver_voice) == VoiceState::Stopped {
                driver.play(self.driver_voice);
                warn!("Stream queue ran empty for \"{}\"", sound.info().name);
            }
        }

        true
    }

    /// Starts or redirects a fade. `step` is gain change per second; its
    /// sign is normalized toward the target. Returns true if the voice was
    /// not already fading.
    pub(crate) fn fade(&mut self, step: f32, target_gain: f32) -> bool {
        let already_fading = self.fade.is_some();

        let target_gain = target_gain.max(0.0); // 0.0 if NaN
        let step = if target_gain - self.gain > 0.0 {
            step.abs()
        } else {
            -step.abs()
        };

        self.fade = Some(FadeState { step, target_gain });

        !already_fading
    }

    /// Advances an active fade. Returns true while the fade continues.
    ///
    /// Paused voices hold their fade; a fade reaching zero gain stops the
    /// voice for good.
    pub(crate) fn do_fade(&mut self, dtime: f32, driver: &mut dyn SoundDriver) -> bool {
        let Some(fade) = self.fade else {
            return false;
        };
        if self.is_dead(driver) {
            self.fade = None;
            return false;
        }
        if driver.state(self.driver_voice) == VoiceState::Paused {
            return true;
        }

        let mut gain = self.gain + fade.step * dtime;
        if fade.step < 0.0 {
            gain = gain.max(fade.target_gain);
        } else {
            gain = gain.min(fade.target_gain);
        }

        if gain <= 0.0 {
            self.stopped_means_finished = true;
            driver.stop(self.driver_voice);
            self.fade = None;
            return false;
        }

        self.set_gain(driver, gain);

        if gain == fade.target_gain {
            self.fade = None;
            false
        } else {
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::UnopenedSound;
    use crate::decoder::NullDecoder;
    use crate::driver::null::NullDriver;

    /// Mono sound at 100 Hz, `seconds` long.
    fn open_sound(seconds: f32, driver: &mut NullDriver) -> OpenSound {
        let dec = NullDecoder::new("test", 1, 100, (seconds * 100.0) as u64);
        UnopenedSound::Source(Box::new(dec))
            .open("test", driver)
            .unwrap()
    }

    fn spec() -> PlaySpec {
        PlaySpec::new("test".to_string())
    }

    #[test]
    fn test_single_sound_plays_to_end() {
        let mut driver = NullDriver::new();
        let mut sound = open_sound(2.0, &mut driver);
        let dv = driver.create_voice().unwrap();
        let mut voice = Voice::new(dv, 0, &mut sound, &mut driver, &spec(), None);

        driver.play(dv);
        assert!(!voice.is_dead(&mut driver));
        driver.step(1.9);
        assert!(!voice.is_dead(&mut driver));
        driver.step(0.2);
        assert!(voice.is_dead(&mut driver));
    }

    #[test]
    fn test_start_time_past_end_is_finished_immediately() {
        let mut driver = NullDriver::new();
        let mut sound = open_sound(2.0, &mut driver);
        let dv = driver.create_voice().unwrap();
        let mut play = spec();
        play.start_time = 5.0;
        let voice = Voice::new(dv, 0, &mut sound, &mut driver, &play, None);

        driver.play(dv);
        assert!(voice.is_dead(&mut driver));
    }

    #[test]
    fn test_negative_start_time_counts_from_end() {
        let mut driver = NullDriver::new();
        let mut sound = open_sound(2.0, &mut driver);
        let dv = driver.create_voice().unwrap();
        let mut play = spec();
        play.start_time = -0.5;
        let voice = Voice::new(dv, 0, &mut sound, &mut driver, &play, None);

        driver.play(dv);
        driver.step(0.4);
        assert!(!voice.is_dead(&mut driver));
        driver.step(0.2);
        assert!(voice.is_dead(&mut driver));
    }

    #[test]
    fn test_looping_start_time_wraps() {
        let mut driver = NullDriver::new();
        let mut sound = open_sound(2.0, &mut driver);
        let dv = driver.create_voice().unwrap();
        let mut play = spec();
        play.looping = true;
        play.start_time = 5.0; // wraps to 1.0
        let voice = Voice::new(dv, 0, &mut sound, &mut driver, &play, None);

        driver.play(dv);
        driver.step(10.0);
        assert!(!voice.is_dead(&mut driver));
    }

    #[test]
    fn test_stream_refill_and_finish() {
        let mut driver = NullDriver::new();
        // 10 s at 100 Hz streams in 1 s buffers.
        let mut sound = open_sound(10.0, &mut driver);
        assert!(sound.is_streaming());
        let dv = driver.create_voice().unwrap();
        let mut voice = Voice::new(dv, 0, &mut sound, &mut driver, &spec(), None);

        driver.play(dv);
        // Step through the whole sound in small increments, refilling as the
        // worker would.
        for _ in 0..97 {
            driver.step(0.1);
            voice.step_stream(&mut sound, &mut driver);
            assert!(!voice.is_dead(&mut driver));
        }
        driver.step(0.5);
        // Final refill hits the end of the stream.
        while voice.step_stream(&mut sound, &mut driver) {
            driver.step(0.5);
        }
        driver.step(2.0);
        assert!(voice.is_dead(&mut driver));
    }

    #[test]
    fn test_looping_stream_never_dies() {
        let mut driver = NullDriver::new();
        let mut sound = open_sound(4.0, &mut driver);
        assert!(sound.is_streaming());
        let dv = driver.create_voice().unwrap();
        let mut play = spec();
        play.looping = true;
        let mut voice = Voice::new(dv, 0, &mut sound, &mut driver, &play, None);

        driver.play(dv);
        for _ in 0..100 {
            driver.step(0.3);
            assert!(voice.step_stream(&mut sound, &mut driver));
        }
        assert!(!voice.is_dead(&mut driver));
    }

    #[test]
    fn test_fade_out_stops_voice() {
        let mut driver = NullDriver::new();
        let mut sound = open_sound(2.0, &mut driver);
        let dv = driver.create_voice().unwrap();
        let mut play = spec();
        play.looping = true;
        let mut voice = Voice::new(dv, 0, &mut sound, &mut driver, &play, None);
        driver.play(dv);

        // Positive step toward a lower target still fades down.
        assert!(voice.fade(2.0, 0.0));
        assert!(voice.do_fade(0.25, &mut driver));
        assert!((voice.gain() - 0.5).abs() < 1e-6);

        assert!(!voice.do_fade(0.3, &mut driver));
        assert!(voice.is_dead(&mut driver));
    }

    #[test]
    fn test_fade_in_reaches_target_and_ends() {
        let mut driver = NullDriver::new();
        let mut sound = open_sound(2.0, &mut driver);
        let dv = driver.create_voice().unwrap();
        let mut play = spec();
        play.looping = true;
        play.volume = 0.1;
        let mut voice = Voice::new(dv, 0, &mut sound, &mut driver, &play, None);
        driver.play(dv);

        voice.fade(1.0, 1.0);
        assert!(voice.do_fade(0.5, &mut driver));
        assert!((voice.gain() - 0.6).abs() < 1e-6);
        // Overshoot clamps to the target and the fade ends.
        assert!(!voice.do_fade(10.0, &mut driver));
        assert!((voice.gain() - 1.0).abs() < 1e-6);
        assert!(!voice.is_dead(&mut driver));
    }

    #[test]
    fn test_fade_holds_while_paused() {
        let mut driver = NullDriver::new();
        let mut sound = open_sound(2.0, &mut driver);
        let dv = driver.create_voice().unwrap();
        let mut play = spec();
        play.looping = true;
        let mut voice = Voice::new(dv, 0, &mut sound, &mut driver, &play, None);
        driver.play(dv);
        driver.pause(dv);

        voice.fade(-1.0, 0.0);
        assert!(voice.do_fade(5.0, &mut driver));
        assert!((voice.gain() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_retarget_fade_reports_not_new() {
        let mut driver = NullDriver::new();
        let mut sound = open_sound(2.0, &mut driver);
        let dv = driver.create_voice().unwrap();
        let mut play = spec();
        play.looping = true;
        let mut voice = Voice::new(dv, 0, &mut sound, &mut driver, &play, None);
        driver.play(dv);

        assert!(voice.fade(-1.0, 0.5));
        assert!(!voice.fade(-1.0, 0.2));
    }
}
