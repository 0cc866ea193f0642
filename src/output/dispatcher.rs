use std::fmt;
use std::thread::JoinHandle;

use crossbeam::channel::{Receiver, Sender};
use tracing::{debug, info, warn};

use super::keyboard::{Key, KeyboardBackend};
use super::midi::MidiPort;
use crate::error::PlayerError;

pub enum OutputAction {
    Press(Key),
    Release(Key),
    RawMidi(Vec<u8>),
    /// Route subsequent `RawMidi` actions to this port
    AttachPort(Box<dyn MidiPort>),
    /// Close the attached port
    DetachPort,
}

impl fmt::Debug for OutputAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputAction::Press(key) => write!(f, "Press({})", key),
            OutputAction::Release(key) => write!(f, "Release({})", key),
            OutputAction::RawMidi(bytes) => write!(f, "RawMidi({:02X?})", bytes),
            OutputAction::AttachPort(port) => write!(f, "AttachPort({})", port.name()),
            OutputAction::DetachPort => write!(f, "DetachPort"),
        }
    }
}

/// Producer side of the dispatcher FIFO
#[derive(Clone)]
pub struct ActionQueue(Sender<OutputAction>);

impl ActionQueue {
    /// A queue with no worker behind it, for driving the loop directly
    pub fn unbounded() -> (Self, Receiver<OutputAction>) {
        let (tx, rx) = crossbeam::channel::unbounded();
        (Self(tx), rx)
    }

    pub fn push(&self, action: OutputAction) {
        if self.0.send(action).is_err() {
            warn!("Output dispatcher is gone, dropping action");
        }
    }

    pub fn press(&self, key: Key) {
        self.push(OutputAction::Press(key));
    }

    pub fn release(&self, key: Key) {
        self.push(OutputAction::Release(key));
    }

    pub fn send_midi(&self, bytes: &[u8]) {
        self.push(OutputAction::RawMidi(bytes.to_vec()));
    }
}

/// A raw output port lent to the dispatcher for one playback pass.
/// Dropping the lease closes the port.
pub struct PortLease {
    queue: ActionQueue,
    name: String,
}

impl PortLease {
    pub fn attach(queue: &ActionQueue, port: Box<dyn MidiPort>) -> Self {
        let name = port.name().to_string();
        queue.push(OutputAction::AttachPort(port));
        Self {
            queue: queue.clone(),
            name,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn send(&self, bytes: &[u8]) {
        self.queue.send_midi(bytes);
    }
}

impl Drop for PortLease {
    fn drop(&mut self) {
        self.queue.push(OutputAction::DetachPort);
    }
}

pub struct OutputDispatcher {
    queue: ActionQueue,
    worker: Option<JoinHandle<()>>,
}

impl OutputDispatcher {
    /// Start the worker. The keyboard backend is built on the worker thread.
    pub fn spawn<F>(make_keyboard: F) -> Self
    where
        F: FnOnce() -> Box<dyn KeyboardBackend> + Send + 'static,
    {
        let (queue, rx) = ActionQueue::unbounded();
        let worker = std::thread::spawn(move || {
            let keyboard = make_keyboard();
            dispatch_loop(rx, keyboard);
        });

        Self {
            queue,
            worker: Some(worker),
        }
    }

    pub fn queue(&self) -> ActionQueue {
        self.queue.clone()
    }
}

impl Drop for OutputDispatcher {
    /// Drains everything already queued before returning. Every other
    /// `ActionQueue` clone must be gone by now or this waits for it.
    fn drop(&mut self) {
        self.queue = ActionQueue::unbounded().0;
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn dispatch_loop(rx: Receiver<OutputAction>, mut keyboard: Box<dyn KeyboardBackend>) {
    let mut port: Option<Box<dyn MidiPort>> = None;

    for action in rx.iter() {
        let result = match action {
            OutputAction::Press(key) => keyboard.press(key),
            OutputAction::Release(key) => keyboard.release(key),
            OutputAction::RawMidi(bytes) => match port.as_mut() {
                Some(port) => port.send(&bytes),
                None => Err(PlayerError::ActionDispatch {
                    action: format!("send {:02X?}", bytes),
                    reason: "no MIDI output port attached".into(),
                }),
            },
            OutputAction::AttachPort(new_port) => {
                info!("Routing raw MIDI to {}", new_port.name());
                port = Some(new_port);
                Ok(())
            }
            OutputAction::DetachPort => {
                if let Some(old) = port.take() {
                    debug!("Detaching MIDI output {}", old.name());
                }
                Ok(())
            }
        };

        if let Err(e) = result {
            warn!("{}", e);
        }
    }
}
