//! Message protocol between the [`SoundManager`](crate::SoundManager) facade
//! and the audio worker thread.

use std::path::PathBuf;

use crate::decoder::Decoder;
use crate::types::{PlaySpec, SoundHandle, Vec3};

/// Commands sent to the worker. Fire-and-forget; results come back as
/// [`Event`]s.
pub(crate) enum Command {
    /// Pauses every playing voice.
    PauseAll,
    /// Resumes every paused voice.
    ResumeAll,

    SetListener {
        pos: Vec3,
        vel: Vec3,
        at: Vec3,
        up: Vec3,
    },
    SetListenerGain {
        gain: f32,
    },

    /// Registers a sound loaded lazily from a file.
    LoadFile {
        name: String,
        path: PathBuf,
    },
    /// Registers a sound from in-memory Ogg data.
    LoadBytes {
        name: String,
        data: Vec<u8>,
    },
    /// Registers a sound with a caller-supplied decoder.
    LoadSource {
        name: String,
        decoder: Box<dyn Decoder>,
    },
    /// Adds a loaded sound to a group; group members are picked at random
    /// when the group is played.
    AddToGroup {
        group: String,
        sound: String,
    },

    Play {
        handle: SoundHandle,
        spec: PlaySpec,
    },
    PlayAt {
        handle: SoundHandle,
        spec: PlaySpec,
        pos: Vec3,
        vel: Vec3,
    },
    Stop {
        handle: SoundHandle,
    },
    Fade {
        handle: SoundHandle,
        step: f32,
        target_gain: f32,
    },
    UpdatePosVel {
        handle: SoundHandle,
        pos: Vec3,
        vel: Vec3,
    },

    /// Advances worker time: streams, fades, dead-voice reaping.
    Step {
        dtime: f32,
    },

    /// Begin shutdown; the worker stops all voices and acknowledges with
    /// [`Event::Stopped`].
    PleaseStop,
}

/// Notifications from the worker.
pub(crate) enum Event {
    /// A voice finished or was stopped; its handle can be reused once the
    /// facade has seen this.
    SoundRemoved { handle: SoundHandle },
    /// Worker acknowledged shutdown (or aborted at startup); no further
    /// events follow.
    Stopped,
}
