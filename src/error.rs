use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    #[error("Malformed MIDI input: {0}")]
    MalformedInput(String),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("MIDI output device unavailable: {0}")]
    OutputDeviceUnavailable(String),

    #[error("Failed to {action}: {reason}")]
    ActionDispatch { action: String, reason: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(#[from] InvalidRequest),

    #[error("Config error: {0}")]
    Config(String),
}

/// Requests rejected before any state is touched.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InvalidRequest {
    #[error("tempo {0}% is outside 25..=200")]
    TempoOutOfRange(f64),

    #[error("already playing")]
    AlreadyPlaying,

    #[error("not currently playing")]
    NotPlaying,

    #[error("playback is not paused")]
    NotPaused,

    #[error("seek position {position:.2}s is outside 0..={duration:.2}s")]
    SeekOutOfRange { position: f64, duration: f64 },

    #[error("no MIDI file loaded")]
    NoFileLoaded,

    #[error("unknown command '{0}'")]
    UnknownCommand(String),
}

pub type Result<T> = std::result::Result<T, PlayerError>;
