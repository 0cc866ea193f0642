mod dispatcher;
mod keyboard;
mod midi;

pub use dispatcher::{ActionQueue, OutputAction, OutputDispatcher, PortLease};
pub use keyboard::{Key, KeyStroke, KeyboardBackend, LoggingKeyboard, RecordingKeyboard, SUSTAIN_KEY, system_keyboard};
pub use midi::{MidiPort, MidirPort, PortOpener, list_output_devices, midir_opener};

#[cfg(feature = "enigo")]
pub use keyboard::EnigoKeyboard;
