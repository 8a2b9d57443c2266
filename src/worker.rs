//! The audio worker thread.
//!
//! Owns the driver and all sound data. Receives [`Command`]s from the
//! facade, reports finished voices back as [`Event`]s. Time advances only
//! through `Command::Step`, so the worker is fully deterministic given its
//! command stream.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, Sender};

use log::{debug, error, info, warn};
use rand::Rng;

use crate::data::{OpenSound, UnopenedSound};
use crate::driver::{SoundDriver, VoiceState};
use crate::messages::{Command, Event};
use crate::types::{PlaySpec, SoundHandle, Vec3, REMOVE_DEAD_VOICES_INTERVAL, STREAM_BIGSTEP_SECS};
use crate::voice::Voice;

/// Locates sound files on disk when a requested group has no loaded
/// members. Every returned path is loaded (keyed by its path string) and
/// added to the group.
pub trait FallbackPathProvider: Send {
    fn fallback_paths(&self, group_name: &str) -> Vec<PathBuf>;
}

pub(crate) struct Worker {
    driver: Box<dyn SoundDriver>,
    events: Sender<Event>,
    fallback: Option<Box<dyn FallbackPathProvider>>,

    /// Sounds registered but not yet decoded.
    unopened: HashMap<String, UnopenedSound>,
    /// Opened sounds; voices refer to them by index.
    open: Vec<OpenSound>,
    open_by_name: HashMap<String, usize>,
    /// Group name to member sound names.
    groups: HashMap<String, Vec<String>>,

    voices: HashMap<SoundHandle, Voice>,
    /// Streaming voices due for refill in the current and next bigstep.
    /// Stale handles are skipped on pop.
    streaming_current: Vec<SoundHandle>,
    streaming_next: Vec<SoundHandle>,
    stream_timer: f32,
    /// Voices with an active fade.
    fading: Vec<SoundHandle>,

    time_until_reap: f32,
    paused: bool,
    warned_positional_stereo: std::collections::HashSet<String>,
}

impl Worker {
    pub(crate) fn new(
        driver: Box<dyn SoundDriver>,
        events: Sender<Event>,
        fallback: Option<Box<dyn FallbackPathProvider>>,
    ) -> Worker {
        Worker {
            driver,
            events,
            fallback,
            unopened: HashMap::new(),
            open: Vec::new(),
            open_by_name: HashMap::new(),
            groups: HashMap::new(),
            voices: HashMap::new(),
            streaming_current: Vec::new(),
            streaming_next: Vec::new(),
            stream_timer: STREAM_BIGSTEP_SECS,
            fading: Vec::new(),
            time_until_reap: REMOVE_DEAD_VOICES_INTERVAL,
            paused: false,
            warned_positional_stereo: std::collections::HashSet::new(),
        }
    }

    /// Blocks on the command channel until `PleaseStop` or facade drop, then
    /// acknowledges with `Event::Stopped`.
    pub(crate) fn run(mut self, commands: Receiver<Command>) {
        info!("Audio worker started");

        loop {
            match commands.recv() {
                Ok(Command::PleaseStop) => break,
                Ok(cmd) => self.handle_command(cmd),
                // Facade dropped without PleaseStop.
                Err(_) => break,
            }
        }

        for (_, mut voice) in self.voices.drain() {
            voice.stop(self.driver.as_mut());
            self.driver.destroy_voice(voice.driver_voice);
        }

        info!("Audio worker stopped");
        let _ = self.events.send(Event::Stopped);
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::PauseAll => self.pause_all(),
            Command::ResumeAll => self.resume_all(),
            Command::SetListener { pos, vel, at, up } => {
                // World coordinates are left-handed; the driver is
                // right-handed. Mirror the x-axis exactly once, here at the
                // boundary.
                self.driver.set_listener(
                    pos.mirror_x(),
                    vel.mirror_x(),
                    at.mirror_x(),
                    up.mirror_x(),
                );
            }
            Command::SetListenerGain { gain } => self.driver.set_listener_gain(gain),
            Command::LoadFile { name, path } => {
                self.unopened.insert(name, UnopenedSound::File(path));
            }
            Command::LoadBytes { name, data } => {
                self.unopened.insert(name, UnopenedSound::Bytes(data));
            }
            Command::LoadSource { name, decoder } => {
                self.unopened.insert(name, UnopenedSound::Source(decoder));
            }
            Command::AddToGroup { group, sound } => self.add_to_group(&sound, &group),
            Command::Play { handle, spec } => self.play_sound_generic(handle, spec, None),
            Command::PlayAt {
                handle,
                spec,
                pos,
                vel,
            } => {
                self.play_sound_generic(handle, spec, Some((pos.mirror_x(), vel.mirror_x())));
            }
            Command::Stop { handle } => self.stop_sound(handle),
            Command::Fade {
                handle,
                step,
                target_gain,
            } => self.fade_sound(handle, step, target_gain),
            Command::UpdatePosVel { handle, pos, vel } => {
                if let Some(voice) = self.voices.get_mut(&handle) {
                    voice.update_pos_vel(self.driver.as_mut(), pos.mirror_x(), vel.mirror_x());
                }
            }
            Command::Step { dtime } => self.step(dtime),
            // Handled in run().
            Command::PleaseStop => unreachable!(),
        }
    }

    fn step(&mut self, dtime: f32) {
        self.driver.step(dtime);

        self.time_until_reap -= dtime;
        if self.time_until_reap <= 0.0 {
            if !self.voices.is_empty() {
                debug!(
                    "Audio worker: {} playing voices, {} unopen sounds, {} open sounds, {} groups",
                    self.voices.len(),
                    self.unopened.len(),
                    self.open.len(),
                    self.groups.len()
                );
            }

            let num_removed = self.remove_dead_voices();
            if num_removed != 0 {
                debug!("Audio worker: removed {} finished voices", num_removed);
            }

            self.time_until_reap = REMOVE_DEAD_VOICES_INTERVAL;
        }

        self.do_fades(dtime);
        self.step_streams(dtime);
    }

    fn step_streams(&mut self, dtime: f32) {
        // Spread the refills of one bigstep across the steps within it.
        let num_issued = self.streaming_current.len().min(
            (self.streaming_current.len() as f32 * dtime / self.stream_timer).ceil() as usize,
        );

        for _ in 0..num_issued {
            let Some(handle) = self.streaming_current.pop() else {
                break;
            };

            let Some(voice) = self.voices.get_mut(&handle) else {
                continue;
            };
            let sound = &mut self.open[voice.sound];
            if !voice.step_stream(sound, self.driver.as_mut()) {
                continue;
            }

            // Still live and streaming; revisit next bigstep.
            self.streaming_next.push(handle);
        }

        self.stream_timer -= dtime;
        if self.stream_timer <= 0.0 {
            self.stream_timer = STREAM_BIGSTEP_SECS;
            std::mem::swap(&mut self.streaming_current, &mut self.streaming_next);
        }
    }

    fn do_fades(&mut self, dtime: f32) {
        let mut i = 0;
        while i < self.fading.len() {
            let handle = self.fading[i];
            let keep = match self.voices.get_mut(&handle) {
                Some(voice) => voice.do_fade(dtime, self.driver.as_mut()),
                None => false,
            };
            if keep {
                i += 1;
            } else {
                self.fading.swap_remove(i);
            }
        }
    }

    fn remove_dead_voices(&mut self) -> usize {
        let Worker { voices, driver, .. } = self;
        let dead: Vec<SoundHandle> = voices
            .iter()
            .filter(|(_, v)| v.is_dead(driver.as_mut()))
            .map(|(&h, _)| h)
            .collect();

        for handle in &dead {
            if let Some(voice) = self.voices.remove(handle) {
                self.driver.destroy_voice(voice.driver_voice);
            }
            self.report_removed(*handle);
        }
        dead.len()
    }

    fn pause_all(&mut self) {
        for voice in self.voices.values() {
            self.driver.pause(voice.driver_voice);
        }
        self.paused = true;
    }

    fn resume_all(&mut self) {
        // Only paused voices; a voice that finished stays finished.
        for voice in self.voices.values() {
            if self.driver.state(voice.driver_voice) == VoiceState::Paused {
                self.driver.play(voice.driver_voice);
            }
        }
        self.paused = false;
    }

    fn add_to_group(&mut self, sound_name: &str, group_name: &str) {
        self.groups
            .entry(group_name.to_owned())
            .or_default()
            .push(sound_name.to_owned());
    }

    /// Checked registration, used for fallback loading.
    fn load_sound_file(&mut self, name: &str, path: &Path) -> bool {
        if self.open_by_name.contains_key(name) || self.unopened.contains_key(name) {
            return false;
        }
        if !path.is_file() {
            return false;
        }
        self.unopened
            .insert(name.to_owned(), UnopenedSound::File(path.to_owned()));
        true
    }

    /// Opens a sound by name, decoding it if this is the first use.
    fn open_single_sound(&mut self, name: &str) -> Option<usize> {
        if let Some(&idx) = self.open_by_name.get(name) {
            return Some(idx);
        }

        let unopened = self.unopened.remove(name)?;
        let opened = unopened.open(name, self.driver.as_mut())?;
        let idx = self.open.len();
        self.open.push(opened);
        self.open_by_name.insert(name.to_owned(), idx);
        Some(idx)
    }

    /// Picks a random openable member of a group. Members that fail to open
    /// are dropped from the group.
    fn loaded_sound_name_from_group(&mut self, group_name: &str) -> Option<String> {
        loop {
            let (i, candidate) = {
                let members = self.groups.get(group_name)?;
                if members.is_empty() {
                    return None;
                }
                let i = rand::thread_rng().gen_range(0..members.len());
                (i, members[i].clone())
            };

            if self.open_single_sound(&candidate).is_some() {
                return Some(candidate);
            }

            // Doesn't exist or won't decode; heal the group and retry.
            if let Some(members) = self.groups.get_mut(group_name) {
                members.swap_remove(i);
            }
        }
    }

    fn get_or_load_sound_name_from_group(&mut self, group_name: &str) -> Option<String> {
        if let Some(name) = self.loaded_sound_name_from_group(group_name) {
            return Some(name);
        }

        let paths = match &self.fallback {
            Some(provider) => provider.fallback_paths(group_name),
            None => return None,
        };
        for path in paths {
            let name = path.to_string_lossy().into_owned();
            if self.load_sound_file(&name, &path) {
                self.add_to_group(&name, group_name);
            }
        }
        self.loaded_sound_name_from_group(group_name)
    }

    fn play_sound_generic(
        &mut self,
        handle: SoundHandle,
        mut spec: PlaySpec,
        pos_vel: Option<(Vec3, Vec3)>,
    ) {
        debug_assert_ne!(handle, 0);
        debug_assert!(!self.voices.contains_key(&handle));

        if spec.group.is_empty() {
            self.report_removed(handle);
            return;
        }

        let sound_name = if spec.use_local_fallback {
            self.get_or_load_sound_name_from_group(&spec.group)
        } else {
            self.loaded_sound_name_from_group(&spec.group)
        };
        let Some(sound_name) = sound_name else {
            info!("Sound group \"{}\" not found", spec.group);
            self.report_removed(handle);
            return;
        };

        // Sanitize.
        spec.volume = spec.volume.max(0.0);
        let fade_target = spec.volume;
        if spec.fade_in > 0.0 {
            spec.volume = 0.0;
        }
        if !(spec.pitch > 0.0) {
            warn!("Illegal pitch value: {}", spec.pitch);
            spec.pitch = 1.0;
        }
        if !spec.start_time.is_finite() {
            warn!("Illegal start_time value: {}", spec.start_time);
            spec.start_time = 0.0;
        }

        debug!("Creating voice for \"{}\"", sound_name);

        // Opened above when the group member was picked.
        let Some(sound_idx) = self.open_single_sound(&sound_name) else {
            error!("Sound \"{}\" disappeared", sound_name);
            self.report_removed(handle);
            return;
        };

        if self.open[sound_idx].info().channels == 2
            && pos_vel.is_some()
            && self.warned_positional_stereo.insert(sound_name.clone())
        {
            warn!("Playing positional stereo sound \"{}\"", sound_name);
        }

        let Some(driver_voice) = self.driver.create_voice() else {
            // Out of voices.
            self.report_removed(handle);
            return;
        };

        let voice = Voice::new(
            driver_voice,
            sound_idx,
            &mut self.open[sound_idx],
            self.driver.as_mut(),
            &spec,
            pos_vel,
        );

        self.driver.play(driver_voice);
        if self.paused {
            self.driver.pause(driver_voice);
        }

        if voice.is_streaming() {
            self.streaming_next.push(handle);
        }
        self.voices.insert(handle, voice);

        if spec.fade_in > 0.0 {
            self.fade_sound(handle, spec.fade_in, fade_target);
        }
    }

    fn stop_sound(&mut self, handle: SoundHandle) {
        if let Some(mut voice) = self.voices.remove(&handle) {
            voice.stop(self.driver.as_mut());
            self.driver.destroy_voice(voice.driver_voice);
            self.report_removed(handle);
        }
    }

    fn fade_sound(&mut self, handle: SoundHandle, step: f32, target_gain: f32) {
        if step == 0.0 {
            return;
        }
        let Some(voice) = self.voices.get_mut(&handle) else {
            return;
        };
        if voice.fade(step, target_gain) {
            self.fading.push(handle);
        }
    }

    fn report_removed(&self, handle: SoundHandle) {
        let _ = self.events.send(Event::SoundRemoved { handle });
    }
}
