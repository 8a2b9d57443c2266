//! chorus — a streaming audio playback engine.
//!
//! Sounds are registered by name, grouped, and played by handle through the
//! [`SoundManager`] facade. All decoding and playback happens on a dedicated
//! worker thread: commands are fire-and-forget, results come back as
//! notifications drained by [`SoundManager::step`].
//!
//! Short sounds decode fully up front; long sounds stream, decoding ahead of
//! the play cursor into cached buffer regions so loops never decode the same
//! range twice. Voices support looping, fading, pitch, and world-space
//! positioning with a left-handed to right-handed axis mirror at the driver
//! boundary.
//!
//! ```no_run
//! use chorus::{PlaySpec, SoundManager};
//!
//! let mgr = SoundManager::with_output(None);
//! mgr.load_file("bell", "sounds/bell.ogg".into());
//! mgr.add_to_group("bell", "bells");
//! mgr.play(0, PlaySpec::new("bells".to_owned()));
//! for _ in 0..100 {
//!     mgr.step(0.05)?;
//!     std::thread::sleep(std::time::Duration::from_millis(50));
//! }
//! # Ok::<(), chorus::Error>(())
//! ```

pub mod decoder;
pub mod driver;

mod data;
mod error;
mod manager;
mod messages;
mod types;
mod voice;
mod worker;

pub use error::Error;
pub use manager::SoundManager;
pub use types::{
    PlaySpec, SoundHandle, Vec3, MAX_SINGLE_BUFFER_SECS, MIN_STREAM_BUFFER_SECS,
    REMOVE_DEAD_VOICES_INTERVAL, STREAM_BIGSTEP_SECS,
};
pub use worker::FallbackPathProvider;
