use std::sync::Arc;

use midir::{MidiOutput, MidiOutputConnection};
use tracing::info;

use crate::error::{PlayerError, Result};

const CLIENT_NAME: &str = "keyplay";

/// Destination for raw MIDI bytes. Dropping the port closes it.
pub trait MidiPort: Send {
    fn name(&self) -> &str;
    fn send(&mut self, message: &[u8]) -> Result<()>;
}

/// Opens a port by device name; `None` picks the first available one
pub type PortOpener = Arc<dyn Fn(Option<&str>) -> Result<Box<dyn MidiPort>> + Send + Sync>;

pub struct MidirPort {
    name: String,
    conn: MidiOutputConnection,
}

impl MidirPort {
    pub fn open(device: Option<&str>) -> Result<Self> {
        let midi_out = MidiOutput::new(CLIENT_NAME)
            .map_err(|e| PlayerError::OutputDeviceUnavailable(e.to_string()))?;

        let ports = midi_out.ports();
        let port = match device {
            Some(wanted) => ports
                .iter()
                .find(|p| midi_out.port_name(p).is_ok_and(|name| name == wanted)),
            None => ports.first(),
        }
        .ok_or_else(|| {
            PlayerError::OutputDeviceUnavailable(match device {
                Some(wanted) => format!("no output port named '{}'", wanted),
                None => "no output ports available".into(),
            })
        })?;

        let name = midi_out.port_name(port).unwrap_or_default();
        let conn = midi_out
            .connect(port, "keyplay-out")
            .map_err(|e| PlayerError::OutputDeviceUnavailable(e.to_string()))?;

        info!("Opened MIDI output: {}", name);
        Ok(Self { name, conn })
    }
}

impl MidiPort for MidirPort {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&mut self, message: &[u8]) -> Result<()> {
        self.conn
            .send(message)
            .map_err(|e| PlayerError::ActionDispatch {
                action: format!("send {:02X?} to {}", message, self.name),
                reason: e.to_string(),
            })
    }
}

impl Drop for MidirPort {
    fn drop(&mut self) {
        info!("Closed MIDI output port {}", self.name);
    }
}

pub fn midir_opener() -> PortOpener {
    Arc::new(|device: Option<&str>| -> Result<Box<dyn MidiPort>> {
        Ok(Box::new(MidirPort::open(device)?))
    })
}

/// Names of the MIDI output ports currently available
pub fn list_output_devices() -> Result<Vec<String>> {
    let midi_out = MidiOutput::new(CLIENT_NAME)
        .map_err(|e| PlayerError::OutputDeviceUnavailable(e.to_string()))?;

    Ok(midi_out
        .ports()
        .iter()
        .filter_map(|port| midi_out.port_name(port).ok())
        .collect())
}
