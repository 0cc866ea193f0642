//! Play Standard MIDI Files as emulated keyboard input for virtual pianos,
//! or as raw MIDI to an output port.

pub mod clock;
pub mod config;
pub mod error;
pub mod keymap;
pub mod notify;
pub mod output;
pub mod player;
pub mod session;
pub mod timeline;

pub use config::{Config, ConfigStore};
pub use error::{InvalidRequest, PlayerError, Result};
pub use notify::{CallbackResult, NoteEvent};
pub use player::{Command, Player};
pub use session::{PlaybackStatus, Settings};
pub use timeline::{MidiFile, MidiInfo, RawKind, RawMessage, TimedEvent, Timeline, TimelineSource};
