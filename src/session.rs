use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::time::Instant;

use arc_swap::ArcSwap;
use crossbeam::channel::{Receiver, RecvTimeoutError, Sender};

use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PlaybackStatus {
    Idle = 0,
    Playing = 1,
    Paused = 2,
}

impl PlaybackStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => PlaybackStatus::Playing,
            2 => PlaybackStatus::Paused,
            _ => PlaybackStatus::Idle,
        }
    }
}

/// Playback options, swapped wholesale and read once per event
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub sustain_enabled: bool,
    pub velocity_enabled: bool,
    pub no_doubles: bool,
    pub hold_keys: bool,
    pub use_midi_output: bool,
    pub midi_device: Option<String>,
    pub target_window: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            sustain_enabled: false,
            velocity_enabled: false,
            no_doubles: true,
            hold_keys: false,
            use_midi_output: false,
            midi_device: None,
            target_window: None,
        }
    }
}

impl From<&Config> for Settings {
    fn from(config: &Config) -> Self {
        Self {
            sustain_enabled: config.sustain_enabled,
            velocity_enabled: config.velocity_enabled,
            no_doubles: config.no_doubles,
            hold_keys: config.hold_keys,
            use_midi_output: config.use_midi_output,
            midi_device: config.midi_device.clone(),
            target_window: config.target_window.clone(),
        }
    }
}

/// f64 stored as bits
#[derive(Debug)]
struct AtomicF64(AtomicU64);

impl AtomicF64 {
    fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Release);
    }
}

const NO_SEEK: u64 = u64::MAX;

pub struct Session {
    status: AtomicU8,
    position: AtomicF64,
    paused_position: AtomicF64,
    duration: AtomicF64,
    tempo: AtomicF64,
    tempo_changed: AtomicBool,
    pending_seek: AtomicU64,
    sustain_pressed: AtomicBool,
    settings: ArcSwap<Settings>,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
}

impl Session {
    pub fn new(settings: Settings, tempo: f64) -> Self {
        let (wake_tx, wake_rx) = crossbeam::channel::bounded(1);
        Self {
            status: AtomicU8::new(PlaybackStatus::Idle as u8),
            position: AtomicF64::new(0.0),
            paused_position: AtomicF64::new(0.0),
            duration: AtomicF64::new(0.0),
            tempo: AtomicF64::new(tempo),
            tempo_changed: AtomicBool::new(false),
            pending_seek: AtomicU64::new(NO_SEEK),
            sustain_pressed: AtomicBool::new(false),
            settings: ArcSwap::from_pointee(settings),
            wake_tx,
            wake_rx,
        }
    }

    pub fn status(&self) -> PlaybackStatus {
        PlaybackStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn is_playing(&self) -> bool {
        self.status() == PlaybackStatus::Playing
    }

    pub fn is_paused(&self) -> bool {
        self.status() == PlaybackStatus::Paused
    }

    /// Atomically move `from` -> `to`; false if the status was something else
    pub fn transition(&self, from: PlaybackStatus, to: PlaybackStatus) -> bool {
        self.status
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Unconditionally set the status, returning the previous one
    pub fn replace_status(&self, status: PlaybackStatus) -> PlaybackStatus {
        PlaybackStatus::from_u8(self.status.swap(status as u8, Ordering::AcqRel))
    }

    pub fn position(&self) -> f64 {
        self.position.load()
    }

    pub fn set_position(&self, position: f64) {
        self.position.store(position);
    }

    pub fn paused_position(&self) -> f64 {
        self.paused_position.load()
    }

    pub fn set_paused_position(&self, position: f64) {
        self.paused_position.store(position);
    }

    pub fn duration(&self) -> f64 {
        self.duration.load()
    }

    pub fn set_duration(&self, duration: f64) {
        self.duration.store(duration);
    }

    pub fn tempo(&self) -> f64 {
        self.tempo.load()
    }

    /// Set the tempo for the next playback pass without flagging a change
    pub fn set_tempo(&self, tempo: f64) {
        self.tempo.store(tempo);
        self.tempo_changed.store(false, Ordering::Release);
    }

    /// Set the tempo and flag the running loop to rebase onto it
    pub fn request_tempo(&self, tempo: f64) {
        self.tempo.store(tempo);
        self.tempo_changed.store(true, Ordering::Release);
        self.wake();
    }

    pub fn take_tempo_change(&self) -> Option<f64> {
        self.tempo_changed
            .swap(false, Ordering::AcqRel)
            .then(|| self.tempo())
    }

    pub fn request_seek(&self, position: f64) {
        self.pending_seek.store(position.to_bits(), Ordering::Release);
        self.wake();
    }

    pub fn take_seek(&self) -> Option<f64> {
        match self.pending_seek.swap(NO_SEEK, Ordering::AcqRel) {
            NO_SEEK => None,
            bits => Some(f64::from_bits(bits)),
        }
    }

    pub fn clear_requests(&self) {
        self.pending_seek.store(NO_SEEK, Ordering::Release);
        self.tempo_changed.store(false, Ordering::Release);
    }

    pub fn sustain_pressed(&self) -> bool {
        self.sustain_pressed.load(Ordering::Acquire)
    }

    pub fn set_sustain_pressed(&self, pressed: bool) {
        self.sustain_pressed.store(pressed, Ordering::Release);
    }

    pub fn settings(&self) -> Arc<Settings> {
        self.settings.load_full()
    }

    pub fn update_settings(&self, f: impl Fn(&mut Settings)) -> Arc<Settings> {
        let mut next = (*self.settings.load_full()).clone();
        f(&mut next);
        let next = Arc::new(next);
        self.settings.store(next.clone());
        next
    }

    /// Interrupt a pending `wait_until`. Extra wakes collapse into one.
    pub fn wake(&self) {
        let _ = self.wake_tx.try_send(());
    }

    /// Sleep until `deadline`; returns true if woken early
    pub fn wait_until(&self, deadline: Instant) -> bool {
        match self.wake_rx.recv_deadline(deadline) {
            Ok(()) => true,
            Err(RecvTimeoutError::Timeout) => false,
            Err(RecvTimeoutError::Disconnected) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_transitions() {
        let session = Session::new(Settings::default(), 100.0);
        assert_eq!(session.status(), PlaybackStatus::Idle);

        assert!(session.transition(PlaybackStatus::Idle, PlaybackStatus::Playing));
        assert!(!session.transition(PlaybackStatus::Idle, PlaybackStatus::Playing));
        assert!(session.is_playing() && !session.is_paused());

        assert!(session.transition(PlaybackStatus::Playing, PlaybackStatus::Paused));
        assert!(session.is_paused() && !session.is_playing());

        assert_eq!(
            session.replace_status(PlaybackStatus::Idle),
            PlaybackStatus::Paused
        );
    }

    #[test]
    fn test_seek_request_is_taken_once() {
        let session = Session::new(Settings::default(), 100.0);
        assert_eq!(session.take_seek(), None);

        session.request_seek(12.5);
        assert_eq!(session.take_seek(), Some(12.5));
        assert_eq!(session.take_seek(), None);
    }

    #[test]
    fn test_seek_to_zero_is_a_request() {
        let session = Session::new(Settings::default(), 100.0);
        session.request_seek(0.0);
        assert_eq!(session.take_seek(), Some(0.0));
    }

    #[test]
    fn test_tempo_change_flag() {
        let session = Session::new(Settings::default(), 100.0);
        session.set_tempo(80.0);
        assert_eq!(session.take_tempo_change(), None);

        session.request_tempo(50.0);
        assert_eq!(session.take_tempo_change(), Some(50.0));
        assert_eq!(session.take_tempo_change(), None);
        assert_eq!(session.tempo(), 50.0);
    }

    #[test]
    fn test_wake_interrupts_wait() {
        let session = Session::new(Settings::default(), 100.0);
        session.wake();
        session.wake();
        let start = Instant::now();
        assert!(session.wait_until(start + Duration::from_secs(5)));
        assert!(start.elapsed() < Duration::from_secs(1));
        // the two wakes collapsed into one
        assert!(!session.wait_until(Instant::now() + Duration::from_millis(10)));
    }

    #[test]
    fn test_settings_swap() {
        let session = Session::new(Settings::default(), 100.0);
        let before = session.settings();
        session.update_settings(|s| s.hold_keys = true);
        assert!(!before.hold_keys);
        assert!(session.settings().hold_keys);
    }
}
