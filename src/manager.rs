//! Public facade over the audio worker thread.
//!
//! All operations are forwarded as [`Command`]s and return immediately; the
//! worker answers with [`Event`]s that [`SoundManager::step`] drains. The
//! facade owns sound handles: it hands them out, tracks their owner counts,
//! and collects the worker's removal notifications for the caller.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread::JoinHandle;

use log::info;
use parking_lot::Mutex;

use crate::decoder::Decoder;
use crate::driver::null::NullDriver;
use crate::driver::rodio::RodioDriver;
use crate::driver::SoundDriver;
use crate::error::Error;
use crate::messages::{Command, Event};
use crate::types::{PlaySpec, SoundHandle, Vec3};
use crate::worker::{FallbackPathProvider, Worker};

/// Facade state behind the lock: the event inbox and handle bookkeeping.
struct Inner {
    events: Receiver<Event>,
    /// Names registered so far; duplicate loads are rejected here without a
    /// round-trip.
    known_names: HashSet<String>,
    /// Handle to owner count. A handle is reusable once its count drops to
    /// zero.
    occupied: HashMap<SoundHandle, u32>,
    next_handle: SoundHandle,
    /// Handles allocated by the facade itself for fire-and-forget playback;
    /// freed automatically when their removal notification arrives.
    internal_handles: HashSet<SoundHandle>,
    /// Removal notifications not yet collected by the caller.
    removed: Vec<SoundHandle>,
    worker_stopped: bool,
}

/// Handle-based, thread-backed sound engine facade.
///
/// Dropping the manager shuts the worker down: it sends `PleaseStop`, drains
/// events until the worker acknowledges, then joins the thread.
pub struct SoundManager {
    commands: Sender<Command>,
    inner: Mutex<Inner>,
    worker: Option<JoinHandle<()>>,
}

impl SoundManager {
    /// Spawns the worker thread. `driver_factory` runs on that thread (audio
    /// outputs are typically not `Send`); if it returns `None` the worker
    /// quits immediately and the next [`step`](Self::step) reports
    /// [`Error::WorkerStopped`].
    pub fn new(
        driver_factory: impl FnOnce() -> Option<Box<dyn SoundDriver>> + Send + 'static,
        fallback: Option<Box<dyn FallbackPathProvider>>,
    ) -> SoundManager {
        let (command_tx, command_rx) = mpsc::channel();
        let (event_tx, event_rx) = mpsc::channel();

        let worker = std::thread::Builder::new()
            .name("audio-worker".to_owned())
            .spawn(move || match driver_factory() {
                Some(driver) => Worker::new(driver, event_tx, fallback).run(command_rx),
                None => {
                    let _ = event_tx.send(Event::Stopped);
                }
            })
            .ok();

        SoundManager {
            commands: command_tx,
            inner: Mutex::new(Inner {
                events: event_rx,
                known_names: HashSet::new(),
                occupied: HashMap::new(),
                next_handle: 1,
                internal_handles: HashSet::new(),
                removed: Vec::new(),
                worker_stopped: false,
            }),
            worker,
        }
    }

    /// Plays through the default output device.
    pub fn with_output(fallback: Option<Box<dyn FallbackPathProvider>>) -> SoundManager {
        Self::new(
            || RodioDriver::new().map(|d| Box::new(d) as Box<dyn SoundDriver>),
            fallback,
        )
    }

    /// Simulated playback without an audio device.
    pub fn headless() -> SoundManager {
        Self::new(|| Some(Box::new(NullDriver::new()) as Box<dyn SoundDriver>), None)
    }

    fn allocate(inner: &mut Inner, owners: u32) -> SoundHandle {
        while inner.next_handle == 0 || inner.occupied.contains_key(&inner.next_handle) {
            inner.next_handle = inner.next_handle.wrapping_add(1);
        }
        let handle = inner.next_handle;
        inner.next_handle = inner.next_handle.wrapping_add(1);
        inner.occupied.insert(handle, owners);
        handle
    }

    /// Reserves a fresh handle, never 0, with `owners` owners. The handle
    /// becomes reusable once [`free_handle`](Self::free_handle) has been
    /// called `owners` times.
    pub fn allocate_handle(&self, owners: u32) -> SoundHandle {
        Self::allocate(&mut self.inner.lock(), owners)
    }

    /// Releases `owners` ownerships of `handle`.
    pub fn free_handle(&self, handle: SoundHandle, owners: u32) {
        let mut inner = self.inner.lock();
        if let Some(count) = inner.occupied.get_mut(&handle) {
            *count = count.saturating_sub(owners);
            if *count == 0 {
                inner.occupied.remove(&handle);
            }
        }
    }

    /// Registers a sound to be lazily loaded from `path`. Returns false if
    /// the name is already taken or the path is not a file.
    pub fn load_file(&self, name: &str, path: PathBuf) -> bool {
        {
            let mut inner = self.inner.lock();
            if inner.known_names.contains(name) {
                return false;
            }
            // Coarse check; decode problems surface at first play.
            if !path.is_file() {
                return false;
            }
            inner.known_names.insert(name.to_owned());
        }
        let _ = self.commands.send(Command::LoadFile {
            name: name.to_owned(),
            path,
        });
        true
    }

    /// Registers a sound from in-memory Ogg Vorbis data. Returns false if
    /// the name is already taken or `data` is empty.
    pub fn load_bytes(&self, name: &str, data: Vec<u8>) -> bool {
        {
            let mut inner = self.inner.lock();
            if inner.known_names.contains(name) || data.is_empty() {
                return false;
            }
            inner.known_names.insert(name.to_owned());
        }
        let _ = self.commands.send(Command::LoadBytes {
            name: name.to_owned(),
            data,
        });
        true
    }

    /// Registers a sound backed by a caller-supplied decoder. Returns false
    /// if the name is already taken.
    pub fn load_source(&self, name: &str, decoder: Box<dyn Decoder>) -> bool {
        {
            let mut inner = self.inner.lock();
            if inner.known_names.contains(name) {
                return false;
            }
            inner.known_names.insert(name.to_owned());
        }
        let _ = self.commands.send(Command::LoadSource {
            name: name.to_owned(),
            decoder,
        });
        true
    }

    /// Adds a loaded sound to a group. Playing a group picks a random
    /// member.
    pub fn add_to_group(&self, sound_name: &str, group_name: &str) {
        let _ = self.commands.send(Command::AddToGroup {
            group: group_name.to_owned(),
            sound: sound_name.to_owned(),
        });
    }

    /// Resolves handle 0 to a fresh facade-owned handle.
    fn resolve_handle(&self, handle: SoundHandle) -> SoundHandle {
        if handle != 0 {
            return handle;
        }
        let mut inner = self.inner.lock();
        let handle = Self::allocate(&mut inner, 1);
        inner.internal_handles.insert(handle);
        handle
    }

    /// Starts non-positional playback of a group under `handle` (0 for
    /// fire-and-forget). Returns the handle actually used.
    pub fn play(&self, handle: SoundHandle, spec: PlaySpec) -> SoundHandle {
        let handle = self.resolve_handle(handle);
        let _ = self.commands.send(Command::Play { handle, spec });
        handle
    }

    /// Starts positional playback at `pos` (world coordinates) moving with
    /// `vel`.
    pub fn play_at(
        &self,
        handle: SoundHandle,
        spec: PlaySpec,
        pos: Vec3,
        vel: Vec3,
    ) -> SoundHandle {
        let handle = self.resolve_handle(handle);
        let _ = self.commands.send(Command::PlayAt {
            handle,
            spec,
            pos,
            vel,
        });
        handle
    }

    /// Stops a playing sound. The removal is reported like any other.
    pub fn stop(&self, handle: SoundHandle) {
        let _ = self.commands.send(Command::Stop { handle });
    }

    /// Fades a playing sound toward `target_gain` by `step` gain per second
    /// (sign is normalized). Reaching zero gain stops the sound.
    pub fn fade(&self, handle: SoundHandle, step: f32, target_gain: f32) {
        let _ = self.commands.send(Command::Fade {
            handle,
            step,
            target_gain,
        });
    }

    /// Moves a positional sound.
    pub fn update_pos_vel(&self, handle: SoundHandle, pos: Vec3, vel: Vec3) {
        let _ = self.commands.send(Command::UpdatePosVel { handle, pos, vel });
    }

    /// Pauses all voices. Sounds started while paused begin paused.
    pub fn pause_all(&self) {
        let _ = self.commands.send(Command::PauseAll);
    }

    pub fn resume_all(&self) {
        let _ = self.commands.send(Command::ResumeAll);
    }

    /// Positions the listener (world coordinates): position, velocity, look
    /// direction, up vector.
    pub fn set_listener(&self, pos: Vec3, vel: Vec3, at: Vec3, up: Vec3) {
        let _ = self.commands.send(Command::SetListener { pos, vel, at, up });
    }

    pub fn set_listener_gain(&self, gain: f32) {
        let _ = self.commands.send(Command::SetListenerGain { gain });
    }

    /// Advances worker time and collects its notifications.
    ///
    /// Returns [`Error::WorkerStopped`] if the worker quit unexpectedly
    /// (for example because no audio device could be opened).
    pub fn step(&self, dtime: f32) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        if inner.worker_stopped {
            return Err(Error::WorkerStopped);
        }
        self.commands
            .send(Command::Step { dtime })
            .map_err(|_| Error::WorkerStopped)?;

        loop {
            match inner.events.try_recv() {
                Ok(Event::SoundRemoved { handle }) => {
                    if inner.internal_handles.remove(&handle) {
                        // Fire-and-forget: nobody is watching this handle.
                        if let Some(count) = inner.occupied.get_mut(&handle) {
                            *count -= 1;
                            if *count == 0 {
                                inner.occupied.remove(&handle);
                            }
                        }
                    } else {
                        inner.removed.push(handle);
                    }
                }
                Ok(Event::Stopped) | Err(TryRecvError::Disconnected) => {
                    inner.worker_stopped = true;
                    return Err(Error::WorkerStopped);
                }
                Err(TryRecvError::Empty) => break,
            }
        }
        Ok(())
    }

    /// Handles of sounds that finished or were stopped since the last call.
    /// The caller should [`free_handle`](Self::free_handle) them.
    pub fn take_removed_sounds(&self) -> Vec<SoundHandle> {
        std::mem::take(&mut self.inner.lock().removed)
    }
}

impl Drop for SoundManager {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::PleaseStop);

        let inner = self.inner.get_mut();
        if !inner.worker_stopped {
            // Drain until the worker acknowledges; removals arriving during
            // shutdown are dropped with it.
            loop {
                match inner.events.recv() {
                    Ok(Event::Stopped) | Err(_) => break,
                    Ok(Event::SoundRemoved { .. }) => {}
                }
            }
        }

        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        info!("Sound manager shut down");
    }
}
