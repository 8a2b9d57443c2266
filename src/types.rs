//! Core types and tuning constants for the playback engine.

/// Identifies a playing (or requested) sound to the caller.
///
/// `0` is reserved for fire-and-forget sounds that are never referenced
/// again. Positive handles are allocated by [`SoundManager::allocate_handle`]
/// and reference-counted on the caller side only.
///
/// [`SoundManager::allocate_handle`]: crate::SoundManager::allocate_handle
pub type SoundHandle = i32;

// Tuning constants, in seconds.

/// Interval between scans for finished voices.
pub const REMOVE_DEAD_VOICES_INTERVAL: f32 = 2.0;

/// Maximum duration a sound can have and still be decoded into a single
/// resident buffer at open time. Anything longer is streamed.
pub const MAX_SINGLE_BUFFER_SECS: f32 = 3.0;

/// Minimum duration of one decoded buffer in a streamed sound.
pub const MIN_STREAM_BUFFER_SECS: f32 = 1.0;

/// Duration of one streaming big-step. Every streaming voice is serviced at
/// least once per big-step, so at most `2 * STREAM_BIGSTEP_SECS` pass between
/// two refills of the same voice.
pub const STREAM_BIGSTEP_SECS: f32 = 0.3;

// With two buffers enqueued, at least one untouched full buffer remains after
// a refill. The worst-case gap between refills must fit inside it.
const _: () = assert!(MIN_STREAM_BUFFER_SECS > 2.0 * STREAM_BIGSTEP_SECS);
// There is no benefit in streaming if we can't queue more than 2 buffers.
const _: () = assert!(MAX_SINGLE_BUFFER_SECS >= 2.0 * MIN_STREAM_BUFFER_SECS);

/// A point or direction in the caller's coordinate space.
///
/// All positional vectors cross the public boundary in the caller's (left-
/// handed) convention. The worker mirrors the x axis exactly once, at its
/// boundary, to match the platform driver's right-handed convention.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 { x: 0.0, y: 0.0, z: 0.0 };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Vec3 { x, y, z }
    }

    /// Transforms between the caller's left-handed space and the driver's
    /// right-handed space (its own inverse).
    pub fn mirror_x(self) -> Self {
        Vec3 { x: -self.x, ..self }
    }
}

/// Parameters of a play request.
#[derive(Debug, Clone)]
pub struct PlaySpec {
    /// Name of the sound group to pick a concrete sound from.
    pub group: String,
    /// Loop forever instead of finishing at the end.
    pub looping: bool,
    /// Playback gain. Clamped to `>= 0`.
    pub volume: f32,
    /// If `> 0`, start at gain 0 and fade toward `volume` with this
    /// step-per-second.
    pub fade_in: f32,
    /// Playback speed multiplier. Non-positive or NaN values reset to 1.
    pub pitch: f32,
    /// Look for local sound files if the group is unknown.
    pub use_local_fallback: bool,
    /// Start offset in seconds. Negative values count from the end for
    /// non-looping sounds; looping sounds take it modulo the duration.
    pub start_time: f32,
}

impl PlaySpec {
    pub fn new(group: impl Into<String>) -> Self {
        PlaySpec {
            group: group.into(),
            ..Default::default()
        }
    }
}

impl Default for PlaySpec {
    fn default() -> Self {
        PlaySpec {
            group: String::new(),
            looping: false,
            volume: 1.0,
            fade_in: 0.0,
            pitch: 1.0,
            use_local_fallback: false,
            start_time: 0.0,
        }
    }
}
