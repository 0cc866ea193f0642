//! Timeline construction for playback

use std::path::{Path, PathBuf};

use midly::{MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};

use crate::error::{PlayerError, Result};

/// Microseconds per quarter note until the first tempo event (120 BPM)
const DEFAULT_TEMPO_US: u32 = 500_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    NoteOn,
    NoteOff,
    ControlChange,
}

/// A playback event at an absolute time in seconds
#[derive(Debug, Clone, PartialEq)]
pub struct TimedEvent {
    pub time: f64,
    pub kind: EventKind,
    pub channel: u8,
    pub note: u8,
    pub velocity: u8,
    pub control: u8,
    pub value: u8,
}

impl TimedEvent {
    /// Note off, or note on with velocity 0
    pub fn is_release(&self) -> bool {
        match self.kind {
            EventKind::NoteOff => true,
            EventKind::NoteOn => self.velocity == 0,
            EventKind::ControlChange => false,
        }
    }

    /// Re-encode the original channel message
    pub fn to_midi_bytes(&self) -> [u8; 3] {
        let channel = self.channel & 0x0F;
        match self.kind {
            EventKind::NoteOn => [0x90 | channel, self.note, self.velocity],
            EventKind::NoteOff => [0x80 | channel, self.note, self.velocity],
            EventKind::ControlChange => [0xB0 | channel, self.control, self.value],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RawKind {
    NoteOn { channel: u8, note: u8, velocity: u8 },
    NoteOff { channel: u8, note: u8, velocity: u8 },
    ControlChange { channel: u8, control: u8, value: u8 },
    /// Anything else (meta, sysex, pitch bend...). Only its delta matters.
    Other,
}

/// One message of a raw stream, `delta` seconds after the previous one
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    pub delta: f64,
    pub kind: RawKind,
}

impl RawMessage {
    pub fn new(delta: f64, kind: RawKind) -> Self {
        Self { delta, kind }
    }
}

/// Accumulates a raw message stream into a [`Timeline`]
#[derive(Debug, Default)]
pub struct TimelineBuilder {
    clock: f64,
    events: Vec<TimedEvent>,
}

impl TimelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: RawMessage) -> Result<()> {
        if !message.delta.is_finite() || message.delta < 0.0 {
            return Err(PlayerError::MalformedInput(format!(
                "invalid time delta {} after {:.3}s",
                message.delta, self.clock
            )));
        }
        self.clock += message.delta;

        let time = self.clock;
        let event = match message.kind {
            RawKind::NoteOn {
                channel,
                note,
                velocity,
            } => TimedEvent {
                time,
                kind: EventKind::NoteOn,
                channel,
                note,
                velocity,
                control: 0,
                value: 0,
            },
            RawKind::NoteOff {
                channel,
                note,
                velocity,
            } => TimedEvent {
                time,
                kind: EventKind::NoteOff,
                channel,
                note,
                velocity,
                control: 0,
                value: 0,
            },
            RawKind::ControlChange {
                channel,
                control,
                value,
            } => TimedEvent {
                time,
                kind: EventKind::ControlChange,
                channel,
                note: 0,
                velocity: 0,
                control,
                value,
            },
            RawKind::Other => return Ok(()),
        };
        self.events.push(event);
        Ok(())
    }

    /// `total_duration` is the source's own length, which may run past the
    /// last kept event.
    pub fn finish(self, total_duration: f64) -> Timeline {
        Timeline {
            events: self.events,
            duration: total_duration.max(0.0),
        }
    }
}

/// Absolute-time ordered playback events plus the source's total length
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Timeline {
    events: Vec<TimedEvent>,
    duration: f64,
}

impl Timeline {
    pub fn build(
        messages: impl IntoIterator<Item = RawMessage>,
        total_duration: f64,
    ) -> Result<Self> {
        let mut builder = TimelineBuilder::new();
        for message in messages {
            builder.push(message)?;
        }
        Ok(builder.finish(total_duration))
    }

    pub fn events(&self) -> &[TimedEvent] {
        &self.events
    }

    /// Events at or after `offset` seconds
    pub fn events_from(&self, offset: f64) -> &[TimedEvent] {
        let start = self.events.partition_point(|e| e.time < offset);
        &self.events[start..]
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Something the player can (re)build a timeline from. Every playback pass
/// calls `load` again, so sources must yield the same timeline each time.
pub trait TimelineSource: Send + Sync {
    fn load(&self) -> Result<Timeline>;

    fn describe(&self) -> String;
}

impl TimelineSource for Timeline {
    fn load(&self) -> Result<Timeline> {
        Ok(self.clone())
    }

    fn describe(&self) -> String {
        format!("in-memory timeline ({} events)", self.events.len())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MidiInfo {
    pub duration: f64,
    pub tracks: usize,
    /// None for SMPTE-timed files
    pub ticks_per_beat: Option<u16>,
    pub note_count: usize,
}

/// A Standard MIDI File on disk
#[derive(Debug, Clone)]
pub struct MidiFile {
    path: PathBuf,
}

impl MidiFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn info(&self) -> Result<MidiInfo> {
        let bytes = self.read()?;
        let smf = parse(&bytes)?;
        let (messages, duration) = flatten(&smf);
        let note_count = messages
            .iter()
            .filter(|m| matches!(m.kind, RawKind::NoteOn { velocity, .. } if velocity > 0))
            .count();
        let ticks_per_beat = match smf.header.timing {
            Timing::Metrical(ppq) => Some(ppq.as_int()),
            Timing::Timecode(..) => None,
        };

        Ok(MidiInfo {
            duration,
            tracks: smf.tracks.len(),
            ticks_per_beat,
            note_count,
        })
    }

    fn read(&self) -> Result<Vec<u8>> {
        std::fs::read(&self.path).map_err(|source| PlayerError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

impl TimelineSource for MidiFile {
    fn load(&self) -> Result<Timeline> {
        let bytes = self.read()?;
        timeline_from_smf(&bytes)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Parse SMF bytes straight into a timeline
pub fn timeline_from_smf(bytes: &[u8]) -> Result<Timeline> {
    let smf = parse(bytes)?;
    let (messages, duration) = flatten(&smf);
    Timeline::build(messages, duration)
}

fn parse(bytes: &[u8]) -> Result<Smf<'_>> {
    Smf::parse(bytes).map_err(|e| PlayerError::MalformedInput(e.to_string()))
}

/// Merge all tracks into one raw stream with second deltas. Returns the
/// stream and the time of its last message.
fn flatten(smf: &Smf<'_>) -> (Vec<RawMessage>, f64) {
    let mut merged: Vec<(u64, &TrackEventKind<'_>)> = Vec::new();
    for track in &smf.tracks {
        let mut tick = 0u64;
        for event in track {
            tick += event.delta.as_int() as u64;
            merged.push((tick, &event.kind));
        }
    }
    // stable: ties keep track order, then in-track order
    merged.sort_by_key(|(tick, _)| *tick);

    let mut tempo = DEFAULT_TEMPO_US;
    let mut last_tick = 0u64;
    let mut elapsed = 0.0;
    let mut messages = Vec::with_capacity(merged.len());

    for (tick, kind) in merged {
        let delta = seconds_per_tick(smf.header.timing, tempo) * (tick - last_tick) as f64;
        last_tick = tick;
        elapsed += delta;

        if let TrackEventKind::Meta(MetaMessage::Tempo(t)) = kind {
            tempo = t.as_int();
        }
        messages.push(RawMessage::new(delta, raw_kind(kind)));
    }

    (messages, elapsed)
}

fn seconds_per_tick(timing: Timing, tempo_us: u32) -> f64 {
    match timing {
        Timing::Metrical(ppq) => tempo_us as f64 / 1_000_000.0 / ppq.as_int().max(1) as f64,
        Timing::Timecode(fps, subframes) => 1.0 / (fps.as_f32() as f64 * subframes.max(1) as f64),
    }
}

fn raw_kind(kind: &TrackEventKind<'_>) -> RawKind {
    let TrackEventKind::Midi { channel, message } = kind else {
        return RawKind::Other;
    };
    let channel = channel.as_int();
    match *message {
        MidiMessage::NoteOn { key, vel } => RawKind::NoteOn {
            channel,
            note: key.as_int(),
            velocity: vel.as_int(),
        },
        MidiMessage::NoteOff { key, vel } => RawKind::NoteOff {
            channel,
            note: key.as_int(),
            velocity: vel.as_int(),
        },
        MidiMessage::Controller { controller, value } => RawKind::ControlChange {
            channel,
            control: controller.as_int(),
            value: value.as_int(),
        },
        _ => RawKind::Other,
    }
}
