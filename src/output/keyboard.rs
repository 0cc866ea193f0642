use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::keymap::Modifier;

/// Key sent when the sustain pedal goes down
pub const SUSTAIN_KEY: Key = Key::Space;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    Char(char),
    Modifier(Modifier),
    Space,
}

impl From<Modifier> for Key {
    fn from(modifier: Modifier) -> Self {
        Key::Modifier(modifier)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Char(c) => write!(f, "{}", c),
            Key::Modifier(Modifier::Shift) => write!(f, "shift"),
            Key::Modifier(Modifier::Ctrl) => write!(f, "ctrl"),
            Key::Modifier(Modifier::Alt) => write!(f, "alt"),
            Key::Space => write!(f, "space"),
        }
    }
}

/// OS-level key injection. Constructed on the dispatcher thread, so
/// implementations don't need to be `Send`.
pub trait KeyboardBackend {
    fn press(&mut self, key: Key) -> Result<()>;
    fn release(&mut self, key: Key) -> Result<()>;
}

/// Dry-run backend: logs every key instead of injecting it
pub struct LoggingKeyboard;

impl KeyboardBackend for LoggingKeyboard {
    fn press(&mut self, key: Key) -> Result<()> {
        tracing::debug!("key down: {}", key);
        Ok(())
    }

    fn release(&mut self, key: Key) -> Result<()> {
        tracing::debug!("key up: {}", key);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStroke {
    Down(Key),
    Up(Key),
}

/// Backend that keeps every stroke in a shared log
#[derive(Clone, Default)]
pub struct RecordingKeyboard {
    log: Arc<Mutex<Vec<KeyStroke>>>,
}

impl RecordingKeyboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn strokes(&self) -> Vec<KeyStroke> {
        self.log.lock().clone()
    }

    /// Keys pressed and not yet released, in press order
    pub fn held(&self) -> Vec<Key> {
        let mut held: Vec<Key> = Vec::new();
        for stroke in self.log.lock().iter() {
            match stroke {
                KeyStroke::Down(key) => held.push(*key),
                KeyStroke::Up(key) => {
                    if let Some(i) = held.iter().rposition(|k| k == key) {
                        held.remove(i);
                    }
                }
            }
        }
        held
    }
}

impl KeyboardBackend for RecordingKeyboard {
    fn press(&mut self, key: Key) -> Result<()> {
        self.log.lock().push(KeyStroke::Down(key));
        Ok(())
    }

    fn release(&mut self, key: Key) -> Result<()> {
        self.log.lock().push(KeyStroke::Up(key));
        Ok(())
    }
}

#[cfg(feature = "enigo")]
pub struct EnigoKeyboard {
    enigo: enigo::Enigo,
}

#[cfg(feature = "enigo")]
impl EnigoKeyboard {
    pub fn new() -> Result<Self> {
        let enigo = enigo::Enigo::new(&enigo::Settings::default()).map_err(|e| {
            crate::error::PlayerError::ActionDispatch {
                action: "connect to the input system".into(),
                reason: e.to_string(),
            }
        })?;
        Ok(Self { enigo })
    }

    fn key(&mut self, key: Key, direction: enigo::Direction) -> Result<()> {
        use enigo::Keyboard as _;

        let mapped = match key {
            Key::Char(c) => enigo::Key::Unicode(c),
            Key::Modifier(Modifier::Shift) => enigo::Key::Shift,
            Key::Modifier(Modifier::Ctrl) => enigo::Key::Control,
            Key::Modifier(Modifier::Alt) => enigo::Key::Alt,
            Key::Space => enigo::Key::Space,
        };
        self.enigo
            .key(mapped, direction)
            .map_err(|e| crate::error::PlayerError::ActionDispatch {
                action: format!("{:?} {}", direction, key),
                reason: e.to_string(),
            })
    }
}

#[cfg(feature = "enigo")]
impl KeyboardBackend for EnigoKeyboard {
    fn press(&mut self, key: Key) -> Result<()> {
        self.key(key, enigo::Direction::Press)
    }

    fn release(&mut self, key: Key) -> Result<()> {
        self.key(key, enigo::Direction::Release)
    }
}

/// Best available backend for this build
pub fn system_keyboard() -> Box<dyn KeyboardBackend> {
    #[cfg(feature = "enigo")]
    {
        match EnigoKeyboard::new() {
            Ok(keyboard) => return Box::new(keyboard),
            Err(e) => tracing::warn!("{}, key actions will only be logged", e),
        }
    }

    #[cfg(not(feature = "enigo"))]
    {
        tracing::info!("Built without key injection, key actions will only be logged");
    }

    Box::new(LoggingKeyboard)
}
