use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use crossbeam::channel::Sender;
use parking_lot::Mutex;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NoteEvent {
    PositionUpdate { position: f64, duration: f64 },
    /// Empty label once nothing is playing
    CurrentNote { note: String },
    PlaybackPaused,
    PlaybackResumed,
    SustainChange { enabled: bool },
    VelocityChange { enabled: bool },
    TempoChange { tempo: f64 },
}

pub type CallbackResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;
pub type NoteCallback = Box<dyn FnMut(&NoteEvent) -> CallbackResult + Send>;

/// Cheap cloneable handle for emitting events
#[derive(Clone)]
pub struct NoteSender(Sender<NoteEvent>);

impl NoteSender {
    pub fn emit(&self, event: NoteEvent) {
        let _ = self.0.send(event);
    }
}

pub struct Notifier {
    tx: Sender<NoteEvent>,
    callback: Arc<Mutex<Option<NoteCallback>>>,
}

impl Notifier {
    pub fn spawn() -> Self {
        let (tx, rx) = crossbeam::channel::unbounded::<NoteEvent>();
        let callback: Arc<Mutex<Option<NoteCallback>>> = Arc::new(Mutex::new(None));

        let relay_callback = callback.clone();
        std::thread::spawn(move || {
            for event in rx.iter() {
                let mut guard = relay_callback.lock();
                let Some(cb) = guard.as_mut() else {
                    continue;
                };
                match catch_unwind(AssertUnwindSafe(|| cb(&event))) {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::warn!("Note callback error: {}", e),
                    Err(_) => tracing::warn!("Note callback panicked on {:?}", event),
                }
            }
        });

        Self { tx, callback }
    }

    pub fn sender(&self) -> NoteSender {
        NoteSender(self.tx.clone())
    }

    pub fn emit(&self, event: NoteEvent) {
        let _ = self.tx.send(event);
    }

    /// Replace the callback; `None` drops events until a new one is set
    pub fn set_callback(&self, callback: Option<NoteCallback>) {
        *self.callback.lock() = callback;
    }
}
