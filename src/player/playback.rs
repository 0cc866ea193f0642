//! The playback loop: one attempt thread per play/resume

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread::JoinHandle;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use super::keys::KeyState;
use crate::clock::PlaybackClock;
use crate::keymap::{describe, map_note, map_velocity, note_name};
use crate::notify::{NoteEvent, NoteSender};
use crate::output::{ActionQueue, PortLease, PortOpener};
use crate::session::{PlaybackStatus, Session, Settings};
use crate::timeline::{EventKind, TimedEvent, Timeline, TimelineSource};

/// Minimum playback-time advance between position updates
const POSITION_UPDATE_INTERVAL: f64 = 0.1;

const SUSTAIN_CONTROLLER: u8 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum Request {
    Pause = 1,
    Stop = 2,
}

/// Stop/pause flag for one attempt
#[derive(Debug, Default)]
pub(crate) struct AttemptControl(AtomicU8);

impl AttemptControl {
    pub fn request(&self, request: Request) {
        self.0.store(request as u8, Ordering::Release);
    }

    fn pending(&self) -> Option<Request> {
        match self.0.load(Ordering::Acquire) {
            1 => Some(Request::Pause),
            2 => Some(Request::Stop),
            _ => None,
        }
    }
}

pub(crate) enum StartAt {
    Position(f64),
    /// Wherever the previous attempt paused
    Resume,
}

pub(crate) struct Attempt {
    pub source: Arc<dyn TimelineSource>,
    /// Already-built timeline for the first pass
    pub timeline: Option<Timeline>,
    pub start: StartAt,
    pub control: Arc<AttemptControl>,
}

#[derive(Clone)]
pub(crate) struct PlaybackContext {
    pub session: Arc<Session>,
    pub queue: ActionQueue,
    pub notes: NoteSender,
    pub open_port: PortOpener,
}

enum PassEnd {
    Completed,
    Seek(f64),
    Paused,
    Stopped,
}

/// Entry point of the attempt thread. `previous` is the attempt this one
/// replaces; it is joined first so its paused position is final.
pub(crate) fn run_attempt(ctx: PlaybackContext, attempt: Attempt, previous: Option<JoinHandle<()>>) {
    if let Some(previous) = previous {
        let _ = previous.join();
    }

    let Attempt {
        source,
        mut timeline,
        start,
        control,
    } = attempt;

    let mut offset = match start {
        StartAt::Position(position) => position,
        StartAt::Resume => {
            let position = ctx.session.paused_position();
            info!("Resuming from {:.2}s", position);
            ctx.session.set_paused_position(0.0);
            position
        }
    };

    let mut keys = KeyState::new(ctx.queue.clone());

    loop {
        let timeline = match timeline.take() {
            Some(timeline) => timeline,
            None => match source.load() {
                Ok(timeline) => timeline,
                Err(e) => {
                    error!("MIDI playback error: {}", e);
                    ctx.session.replace_status(PlaybackStatus::Idle);
                    ctx.notes.emit(NoteEvent::CurrentNote {
                        note: String::new(),
                    });
                    return;
                }
            },
        };

        let duration = timeline.duration();
        ctx.session.set_duration(duration);
        let from = offset.clamp(0.0, duration);

        let mut pass = Pass {
            ctx: &ctx,
            control: &control,
            keys: &mut keys,
            sounding: RawNotes::default(),
        };

        match pass.run(&timeline, from, &source.describe()) {
            PassEnd::Seek(target) => {
                info!("Seeking during playback to {:.2}s", target);
                offset = target;
            }
            PassEnd::Completed => {
                ctx.notes.emit(NoteEvent::CurrentNote {
                    note: String::new(),
                });
                ctx.notes.emit(NoteEvent::PositionUpdate {
                    position: duration,
                    duration,
                });
                match control.pending() {
                    // stopped right as the timeline ran out
                    Some(Request::Stop) => reset_position(&ctx.session),
                    Some(Request::Pause) => {
                        ctx.session.set_position(duration);
                        ctx.session.set_paused_position(duration);
                        if ctx.session.status() == PlaybackStatus::Idle {
                            reset_position(&ctx.session);
                        }
                    }
                    None => {
                        ctx.session.set_position(duration);
                        if !ctx
                            .session
                            .transition(PlaybackStatus::Playing, PlaybackStatus::Idle)
                        {
                            match ctx.session.status() {
                                PlaybackStatus::Paused => ctx.session.set_paused_position(duration),
                                _ => reset_position(&ctx.session),
                            }
                        }
                    }
                }
                info!("Playback finished");
                return;
            }
            PassEnd::Paused => {
                let position = ctx.session.position();
                ctx.session.set_paused_position(position);
                if ctx.session.status() == PlaybackStatus::Idle {
                    // stopped before the pause took effect
                    reset_position(&ctx.session);
                }
                info!("Playback paused at {:.2}s", position);
                return;
            }
            PassEnd::Stopped => {
                let position = ctx.session.position();
                ctx.notes.emit(NoteEvent::CurrentNote {
                    note: String::new(),
                });
                ctx.notes.emit(NoteEvent::PositionUpdate { position, duration });
                reset_position(&ctx.session);
                info!("Playback stopped at {:.2}s", position);
                return;
            }
        }
    }
}

fn reset_position(session: &Session) {
    session.set_position(0.0);
    session.set_paused_position(0.0);
}

/// Notes and sustain sent to a raw output, so they can be silenced on exit
#[derive(Default)]
struct RawNotes {
    notes: BTreeSet<(u8, u8)>,
    sustain_channels: BTreeSet<u8>,
}

impl RawNotes {
    fn silence(&mut self, lease: &PortLease) {
        for (channel, note) in std::mem::take(&mut self.notes) {
            lease.send(&[0x80 | channel, note, 0]);
        }
        for channel in std::mem::take(&mut self.sustain_channels) {
            lease.send(&[0xB0 | channel, SUSTAIN_CONTROLLER, 0]);
        }
    }
}

struct Pass<'a> {
    ctx: &'a PlaybackContext,
    control: &'a AttemptControl,
    keys: &'a mut KeyState,
    sounding: RawNotes,
}

impl Pass<'_> {
    fn run(&mut self, timeline: &Timeline, from: f64, name: &str) -> PassEnd {
        let ctx = self.ctx;
        let session = &ctx.session;
        let settings = session.settings();

        let lease = if settings.use_midi_output {
            match (ctx.open_port)(settings.midi_device.as_deref()) {
                Ok(port) => Some(PortLease::attach(&ctx.queue, port)),
                Err(e) => {
                    warn!("{}, falling back to keyboard mode", e);
                    None
                }
            }
        } else {
            None
        };

        // a change requested before this pass began is already in tempo()
        session.take_tempo_change();
        let tempo = session.tempo();
        info!(
            "Playing {} at {}% speed from {:.2}s using {}",
            name,
            tempo,
            from,
            match &lease {
                Some(lease) => format!("MIDI output {}", lease.name()),
                None => "keyboard simulation".to_string(),
            }
        );

        session.set_position(from);
        let mut clock = PlaybackClock::start(Instant::now(), from, tempo);
        let end = self.walk(timeline.events_from(from), &mut clock, lease.as_ref(), from);

        self.keys.release_all();
        session.set_sustain_pressed(false);
        if let Some(lease) = &lease {
            self.sounding.silence(lease);
        }
        end
    }

    fn walk(
        &mut self,
        events: &[TimedEvent],
        clock: &mut PlaybackClock,
        lease: Option<&PortLease>,
        from: f64,
    ) -> PassEnd {
        let ctx = self.ctx;
        let session = &ctx.session;
        let duration = session.duration();
        let mut last_update = from;

        for event in events {
            if let Some(end) = self.wait_for(event.time, clock) {
                return end;
            }
            if let Some(end) = self.requested_end() {
                return end;
            }

            session.set_position(event.time);
            if event.time - last_update >= POSITION_UPDATE_INTERVAL {
                ctx.notes.emit(NoteEvent::PositionUpdate {
                    position: event.time,
                    duration,
                });
                last_update = event.time;
            }

            match lease {
                Some(lease) => self.dispatch_raw(event, lease),
                None => self.dispatch_keys(event, &session.settings()),
            }
        }

        PassEnd::Completed
    }

    fn requested_end(&self) -> Option<PassEnd> {
        match self.control.pending()? {
            Request::Stop => Some(PassEnd::Stopped),
            Request::Pause => Some(PassEnd::Paused),
        }
    }

    /// Sleep until `time` is due, handling requests as they arrive
    fn wait_for(&self, time: f64, clock: &mut PlaybackClock) -> Option<PassEnd> {
        let session = &self.ctx.session;
        loop {
            if let Some(end) = self.requested_end() {
                return Some(end);
            }

            if let Some(target) = session.take_seek() {
                return Some(PassEnd::Seek(target));
            }

            if let Some(tempo) = session.take_tempo_change() {
                let now = Instant::now();
                clock.rebase(now, tempo);
                info!(
                    "Applied tempo change to {}% at position {:.2}s",
                    tempo,
                    clock.position_at(now)
                );
            }

            let deadline = clock.deadline(time);
            if Instant::now() >= deadline {
                return None;
            }
            session.wait_until(deadline);
        }
    }

    fn dispatch_keys(&mut self, event: &TimedEvent, settings: &Settings) {
        match event.kind {
            EventKind::NoteOn if event.velocity > 0 => {
                let Some(mapping) = map_note(event.note) else {
                    debug!("Note {} is outside the keyboard layout", event.note);
                    return;
                };
                let velocity_key = map_velocity(event.velocity, settings.velocity_enabled);
                let label = describe(event.note, &mapping, velocity_key);
                debug!(
                    "Note ON: {} ({}, vel={})",
                    label, event.note, event.velocity
                );
                self.keys.press_note(
                    event.note,
                    mapping,
                    velocity_key,
                    settings.no_doubles,
                    settings.hold_keys,
                );
                self.ctx.notes.emit(NoteEvent::CurrentNote { note: label });
            }
            EventKind::NoteOn | EventKind::NoteOff => {
                debug!("Note OFF: {} ({})", note_name(event.note), event.note);
                self.keys.release_note(event.note);
            }
            EventKind::ControlChange if event.control == SUSTAIN_CONTROLLER => {
                let pressed = event.value >= 64;
                if self.keys.set_sustain(pressed, settings.sustain_enabled) {
                    self.ctx.session.set_sustain_pressed(pressed);
                    debug!("Sustain {}", if pressed { "ON" } else { "OFF" });
                }
            }
            EventKind::ControlChange => {}
        }
    }

    fn dispatch_raw(&mut self, event: &TimedEvent, lease: &PortLease) {
        let bytes = event.to_midi_bytes();
        match event.kind {
            EventKind::NoteOn if event.velocity > 0 => {
                lease.send(&bytes);
                self.sounding.notes.insert((event.channel, event.note));
                debug!(
                    "MIDI OUT: {} ({}, vel={})",
                    note_name(event.note),
                    event.note,
                    event.velocity
                );
                self.ctx.notes.emit(NoteEvent::CurrentNote {
                    note: format!("{} → MIDI Out", note_name(event.note)),
                });
            }
            EventKind::NoteOn | EventKind::NoteOff => {
                lease.send(&bytes);
                self.sounding.notes.remove(&(event.channel, event.note));
                debug!("MIDI OUT: {} ({}) OFF", note_name(event.note), event.note);
            }
            EventKind::ControlChange if event.control == SUSTAIN_CONTROLLER => {
                lease.send(&bytes);
                let pressed = event.value >= 64;
                if pressed {
                    self.sounding.sustain_channels.insert(event.channel);
                } else {
                    self.sounding.sustain_channels.remove(&event.channel);
                }
                self.ctx.session.set_sustain_pressed(pressed);
                debug!("MIDI OUT: Sustain {}", if pressed { "ON" } else { "OFF" });
            }
            EventKind::ControlChange => {}
        }
    }
}
