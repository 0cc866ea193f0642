use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::InvalidRequest;

/// Transport commands reachable from keyboard bindings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Start the current file, or resume it if paused
    Play,
    /// Pause, or resume if already paused
    Pause,
    Stop,
    /// Tempo down 10%
    SlowDown,
    /// Tempo up 10%
    SpeedUp,
    ToggleSustain,
    ToggleVelocity,
}

impl Command {
    pub const ALL: [Command; 7] = [
        Command::Play,
        Command::Pause,
        Command::Stop,
        Command::SlowDown,
        Command::SpeedUp,
        Command::ToggleSustain,
        Command::ToggleVelocity,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Command::Play => "play",
            Command::Pause => "pause",
            Command::Stop => "stop",
            Command::SlowDown => "slow_down",
            Command::SpeedUp => "speed_up",
            Command::ToggleSustain => "toggle_sustain",
            Command::ToggleVelocity => "toggle_velocity",
        }
    }

    /// Resolve a hotkey through a `key -> command name` binding table.
    /// Unknown keys give `None`; keys bound to unknown commands are an error.
    pub fn from_binding(
        bindings: &BTreeMap<String, String>,
        key: &str,
    ) -> Option<Result<Command, InvalidRequest>> {
        bindings
            .get(&key.to_ascii_lowercase())
            .map(|name| name.parse())
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Command {
    type Err = InvalidRequest;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Command::ALL
            .into_iter()
            .find(|c| c.name() == s)
            .ok_or_else(|| InvalidRequest::UnknownCommand(s.to_string()))
    }
}
