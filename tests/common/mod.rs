#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::Receiver;
use parking_lot::Mutex;

use keyplay::output::{KeyStroke, MidiPort, PortOpener, RecordingKeyboard};
use keyplay::{CallbackResult, NoteEvent, Player, PlayerError, RawKind, RawMessage, Timeline};

pub fn on(delta: f64, note: u8, velocity: u8) -> RawMessage {
    RawMessage::new(
        delta,
        RawKind::NoteOn {
            channel: 0,
            note,
            velocity,
        },
    )
}

pub fn off(delta: f64, note: u8) -> RawMessage {
    RawMessage::new(
        delta,
        RawKind::NoteOff {
            channel: 0,
            note,
            velocity: 0,
        },
    )
}

pub fn cc(delta: f64, control: u8, value: u8) -> RawMessage {
    RawMessage::new(
        delta,
        RawKind::ControlChange {
            channel: 0,
            control,
            value,
        },
    )
}

pub fn timeline(messages: Vec<RawMessage>, duration: f64) -> Timeline {
    Timeline::build(messages, duration).unwrap()
}

/// Raw MIDI port that records what it was sent
#[derive(Clone, Default)]
pub struct TestPort {
    pub sent: Arc<Mutex<Vec<Vec<u8>>>>,
    pub closed: Arc<Mutex<bool>>,
}

struct OpenPort(TestPort);

impl MidiPort for OpenPort {
    fn name(&self) -> &str {
        "test port"
    }

    fn send(&mut self, message: &[u8]) -> keyplay::Result<()> {
        self.0.sent.lock().push(message.to_vec());
        Ok(())
    }
}

impl Drop for OpenPort {
    fn drop(&mut self) {
        *self.0.closed.lock() = true;
    }
}

impl TestPort {
    pub fn opener(&self) -> PortOpener {
        let port = self.clone();
        Arc::new(move |_device: Option<&str>| -> keyplay::Result<Box<dyn MidiPort>> {
            *port.closed.lock() = false;
            Ok(Box::new(OpenPort(port.clone())))
        })
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().clone()
    }
}

pub fn unavailable_opener() -> PortOpener {
    Arc::new(|device: Option<&str>| -> keyplay::Result<Box<dyn MidiPort>> {
        Err(PlayerError::OutputDeviceUnavailable(format!(
            "no output port named '{}'",
            device.unwrap_or_default()
        )))
    })
}

pub struct Harness {
    pub player: Player,
    pub keyboard: RecordingKeyboard,
    pub events: Receiver<NoteEvent>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_opener(unavailable_opener())
    }

    pub fn with_opener(open_port: PortOpener) -> Self {
        let keyboard = RecordingKeyboard::new();
        let backend = keyboard.clone();
        let player = Player::with_backends(None, move || Box::new(backend), open_port);

        let (tx, events) = crossbeam::channel::unbounded();
        player.set_note_callback(move |event: &NoteEvent| -> CallbackResult {
            tx.send(event.clone())?;
            Ok(())
        });

        Self {
            player,
            keyboard,
            events,
        }
    }

    /// Drop the player so every queued stroke has been executed
    pub fn finish(self) -> (Vec<KeyStroke>, RecordingKeyboard, Vec<NoteEvent>) {
        let Harness {
            player,
            keyboard,
            events,
        } = self;
        drop(player);
        let strokes = keyboard.strokes();
        (strokes, keyboard, drain(&events))
    }
}

/// Everything received until the stream goes quiet
pub fn drain(events: &Receiver<NoteEvent>) -> Vec<NoteEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.recv_timeout(Duration::from_millis(200)) {
        out.push(event);
    }
    out
}

pub fn notes(events: &[NoteEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            NoteEvent::CurrentNote { note } => Some(note.clone()),
            _ => None,
        })
        .collect()
}

pub fn positions(events: &[NoteEvent]) -> Vec<(f64, f64)> {
    events
        .iter()
        .filter_map(|e| match e {
            NoteEvent::PositionUpdate { position, duration } => Some((*position, *duration)),
            _ => None,
        })
        .collect()
}

/// Poll `cond` for up to two seconds
pub fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}
