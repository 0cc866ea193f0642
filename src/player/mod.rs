mod command;
mod keys;
mod playback;

pub use command::Command;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::clock::{MAX_TEMPO, MIN_TEMPO};
use crate::config::{Config, ConfigStore};
use crate::error::{InvalidRequest, Result};
use crate::notify::{CallbackResult, NoteEvent, Notifier};
use crate::output::{KeyboardBackend, OutputDispatcher, PortOpener, midir_opener, system_keyboard};
use crate::session::{PlaybackStatus, Session, Settings};
use crate::timeline::{MidiFile, MidiInfo, Timeline, TimelineSource};
use playback::{Attempt, AttemptControl, PlaybackContext, Request, StartAt};

struct ActiveAttempt {
    control: Arc<AttemptControl>,
    thread: JoinHandle<()>,
}

/// Plays timelines as emulated key strokes (or raw MIDI).
///
/// All operations return immediately; their effects arrive through the
/// note callback. Requests that make no sense in the current state are
/// rejected with [`InvalidRequest`] and change nothing.
pub struct Player {
    session: Arc<Session>,
    notifier: Notifier,
    store: Mutex<Option<ConfigStore>>,
    current: Mutex<Option<Arc<dyn TimelineSource>>>,
    active: Mutex<Option<ActiveAttempt>>,
    open_port: PortOpener,
    // last: dropped after every queue clone above is gone
    dispatcher: OutputDispatcher,
}

impl Player {
    /// Player using the system keyboard backend and midir for raw output
    pub fn new(store: Option<ConfigStore>) -> Self {
        Self::with_backends(store, system_keyboard, midir_opener())
    }

    pub fn with_backends<F>(store: Option<ConfigStore>, make_keyboard: F, open_port: PortOpener) -> Self
    where
        F: FnOnce() -> Box<dyn KeyboardBackend> + Send + 'static,
    {
        let config = store
            .as_ref()
            .map(|s| s.config().clone())
            .unwrap_or_default();
        let tempo = if valid_tempo(config.tempo) {
            config.tempo
        } else {
            warn!("Ignoring configured tempo {}%", config.tempo);
            100.0
        };

        Self {
            session: Arc::new(Session::new(Settings::from(&config), tempo)),
            notifier: Notifier::spawn(),
            store: Mutex::new(store),
            current: Mutex::new(None),
            active: Mutex::new(None),
            open_port,
            dispatcher: OutputDispatcher::spawn(make_keyboard),
        }
    }

    /// Make `path` the current file. Stops anything playing.
    pub fn load(&self, path: impl AsRef<Path>) -> Result<MidiInfo> {
        let file = MidiFile::new(path.as_ref());
        let info = file.info()?;

        if self.session.status() != PlaybackStatus::Idle {
            self.stop()?;
        }
        *self.current.lock() = Some(Arc::new(file));
        self.session.set_duration(info.duration);
        self.session.set_position(0.0);
        self.session.set_paused_position(0.0);
        info!(
            "Loaded {} ({:.2}s, {} notes)",
            path.as_ref().display(),
            info.duration,
            info.note_count
        );
        Ok(info)
    }

    /// Play `path` from the start, or resume it at `tempo` if paused
    pub fn play(&self, path: impl AsRef<Path>, tempo: f64) -> Result<()> {
        let path: PathBuf = path.as_ref().to_path_buf();
        self.play_source(Arc::new(MidiFile::new(path)), tempo)
    }

    pub fn play_timeline(&self, timeline: Timeline, tempo: f64) -> Result<()> {
        self.play_source(Arc::new(timeline), tempo)
    }

    pub fn play_source(&self, source: Arc<dyn TimelineSource>, tempo: f64) -> Result<()> {
        check_tempo(tempo)?;
        match self.session.status() {
            PlaybackStatus::Playing => return Err(InvalidRequest::AlreadyPlaying.into()),
            PlaybackStatus::Paused => return self.resume_source(source, Some(tempo)),
            PlaybackStatus::Idle => {}
        }

        // parse before touching any state
        let timeline = source.load()?;

        let mut active = self.active.lock();
        if !self
            .session
            .transition(PlaybackStatus::Idle, PlaybackStatus::Playing)
        {
            return Err(InvalidRequest::AlreadyPlaying.into());
        }
        self.session.clear_requests();
        self.session.set_tempo(tempo);
        self.session.set_duration(timeline.duration());
        self.session.set_position(0.0);
        self.session.set_paused_position(0.0);
        *self.current.lock() = Some(source.clone());

        info!("Playback started: {} at {}%", source.describe(), tempo);
        self.spawn_attempt(&mut active, source, Some(timeline), StartAt::Position(0.0));
        Ok(())
    }

    pub fn pause(&self) -> Result<()> {
        let active = self.active.lock();
        if !self
            .session
            .transition(PlaybackStatus::Playing, PlaybackStatus::Paused)
        {
            return Err(InvalidRequest::NotPlaying.into());
        }
        if let Some(active) = active.as_ref() {
            active.control.request(Request::Pause);
        }
        self.session.wake();
        self.notifier.emit(NoteEvent::PlaybackPaused);
        Ok(())
    }

    /// Continue a paused playback of `path` from where it paused
    pub fn resume(&self, path: impl AsRef<Path>) -> Result<()> {
        self.resume_source(Arc::new(MidiFile::new(path.as_ref())), None)
    }

    fn resume_source(&self, source: Arc<dyn TimelineSource>, tempo: Option<f64>) -> Result<()> {
        let mut active = self.active.lock();
        if !self
            .session
            .transition(PlaybackStatus::Paused, PlaybackStatus::Playing)
        {
            return Err(InvalidRequest::NotPaused.into());
        }
        self.session.clear_requests();
        if let Some(tempo) = tempo {
            self.session.set_tempo(tempo);
        }
        *self.current.lock() = Some(source.clone());

        self.spawn_attempt(&mut active, source, None, StartAt::Resume);
        self.notifier.emit(NoteEvent::PlaybackResumed);
        Ok(())
    }

    pub fn stop(&self) -> Result<()> {
        let active = self.active.lock();
        match self.session.replace_status(PlaybackStatus::Idle) {
            PlaybackStatus::Idle => Err(InvalidRequest::NotPlaying.into()),
            PlaybackStatus::Playing => {
                // the loop releases everything and reports the final position
                if let Some(active) = active.as_ref() {
                    active.control.request(Request::Stop);
                }
                self.session.wake();
                Ok(())
            }
            PlaybackStatus::Paused => {
                // keys were released when the pause took effect
                self.notifier.emit(NoteEvent::CurrentNote {
                    note: String::new(),
                });
                self.notifier.emit(NoteEvent::PositionUpdate {
                    position: self.session.position(),
                    duration: self.session.duration(),
                });
                self.session.set_position(0.0);
                self.session.set_paused_position(0.0);
                info!("Playback stopped");
                Ok(())
            }
        }
    }

    pub fn seek(&self, position: f64) -> Result<()> {
        if !self.session.is_playing() {
            return Err(InvalidRequest::NotPlaying.into());
        }
        let duration = self.session.duration();
        if !(0.0..=duration).contains(&position) {
            return Err(InvalidRequest::SeekOutOfRange { position, duration }.into());
        }
        self.session.request_seek(position);
        Ok(())
    }

    pub fn update_tempo(&self, tempo: f64) -> Result<()> {
        check_tempo(tempo)?;
        if self.session.is_playing() {
            self.session.request_tempo(tempo);
            info!("Tempo updated to {}% during playback", tempo);
        } else {
            self.session.set_tempo(tempo);
            info!("Tempo set to {}% for next playback", tempo);
        }
        self.persist(|c| c.tempo = tempo);
        self.notifier.emit(NoteEvent::TempoChange { tempo });
        Ok(())
    }

    pub fn set_sustain_enabled(&self, enabled: bool) {
        self.session.update_settings(|s| s.sustain_enabled = enabled);
        self.persist(|c| c.sustain_enabled = enabled);
        info!("Sustain {}", if enabled { "enabled" } else { "disabled" });
        self.notifier.emit(NoteEvent::SustainChange { enabled });
    }

    pub fn set_velocity_enabled(&self, enabled: bool) {
        self.session.update_settings(|s| s.velocity_enabled = enabled);
        self.persist(|c| c.velocity_enabled = enabled);
        info!(
            "Velocity mapping {}",
            if enabled { "enabled" } else { "disabled" }
        );
        self.notifier.emit(NoteEvent::VelocityChange { enabled });
    }

    /// Takes effect from the next playback pass
    pub fn set_use_midi_output(&self, enabled: bool, device: Option<String>) {
        self.session.update_settings(|s| {
            s.use_midi_output = enabled;
            s.midi_device = device.clone();
        });
        self.persist(|c| {
            c.use_midi_output = enabled;
            c.midi_device = device.clone();
        });
        info!(
            "MIDI output {}{}",
            if enabled { "enabled" } else { "disabled" },
            device.map(|d| format!(" ({})", d)).unwrap_or_default()
        );
    }

    pub fn set_no_doubles(&self, enabled: bool) {
        self.session.update_settings(|s| s.no_doubles = enabled);
        self.persist(|c| c.no_doubles = enabled);
    }

    pub fn set_hold_keys(&self, enabled: bool) {
        self.session.update_settings(|s| s.hold_keys = enabled);
        self.persist(|c| c.hold_keys = enabled);
    }

    /// Recorded and persisted; key strokes still go to the focused window
    pub fn set_target_window(&self, window: Option<String>) {
        self.session
            .update_settings(|s| s.target_window = window.clone());
        self.persist(|c| c.target_window = window.clone());
        match &window {
            Some(title) => info!("Target window: {}", title),
            None => info!("Window targeting disabled"),
        }
    }

    pub fn set_note_callback<F>(&self, callback: F)
    where
        F: FnMut(&NoteEvent) -> CallbackResult + Send + 'static,
    {
        self.notifier.set_callback(Some(Box::new(callback)));
    }

    pub fn clear_note_callback(&self) {
        self.notifier.set_callback(None);
    }

    pub fn execute(&self, command: Command) -> Result<()> {
        match command {
            Command::Play => match self.session.status() {
                PlaybackStatus::Playing => Err(InvalidRequest::AlreadyPlaying.into()),
                _ => {
                    let source = self.current_source()?;
                    self.play_source(source, self.session.tempo())
                }
            },
            Command::Pause => match self.session.status() {
                PlaybackStatus::Paused => self.resume_source(self.current_source()?, None),
                _ => self.pause(),
            },
            Command::Stop => self.stop(),
            Command::SlowDown => self.update_tempo((self.tempo() - 10.0).max(MIN_TEMPO)),
            Command::SpeedUp => self.update_tempo((self.tempo() + 10.0).min(MAX_TEMPO)),
            Command::ToggleSustain => {
                self.set_sustain_enabled(!self.settings().sustain_enabled);
                Ok(())
            }
            Command::ToggleVelocity => {
                self.set_velocity_enabled(!self.settings().velocity_enabled);
                Ok(())
            }
        }
    }

    pub fn status(&self) -> PlaybackStatus {
        self.session.status()
    }

    pub fn position(&self) -> f64 {
        self.session.position()
    }

    pub fn duration(&self) -> f64 {
        self.session.duration()
    }

    pub fn tempo(&self) -> f64 {
        self.session.tempo()
    }

    pub fn sustain_pressed(&self) -> bool {
        self.session.sustain_pressed()
    }

    pub fn settings(&self) -> Arc<Settings> {
        self.session.settings()
    }

    pub fn config(&self) -> Option<Config> {
        self.store.lock().as_ref().map(|s| s.config().clone())
    }

    /// Block until nothing is playing; false on timeout
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        while self.session.status() == PlaybackStatus::Playing {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return false;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        true
    }

    fn current_source(&self) -> Result<Arc<dyn TimelineSource>> {
        self.current
            .lock()
            .clone()
            .ok_or_else(|| InvalidRequest::NoFileLoaded.into())
    }

    /// Caller holds the `active` lock across the status change and this call
    fn spawn_attempt(
        &self,
        active: &mut Option<ActiveAttempt>,
        source: Arc<dyn TimelineSource>,
        timeline: Option<Timeline>,
        start: StartAt,
    ) {
        let control = Arc::new(AttemptControl::default());
        let attempt = Attempt {
            source,
            timeline,
            start,
            control: control.clone(),
        };
        let ctx = PlaybackContext {
            session: self.session.clone(),
            queue: self.dispatcher.queue(),
            notes: self.notifier.sender(),
            open_port: self.open_port.clone(),
        };

        let previous = active.take().map(|a| a.thread);
        let thread = std::thread::spawn(move || playback::run_attempt(ctx, attempt, previous));
        *active = Some(ActiveAttempt { control, thread });
    }

    fn persist(&self, f: impl FnOnce(&mut Config)) {
        if let Some(store) = self.store.lock().as_mut() {
            if let Err(e) = store.update(f) {
                warn!("Could not save config: {}", e);
            }
        }
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        let _ = self.stop();
        if let Some(active) = self.active.get_mut().take() {
            let _ = active.thread.join();
        }
    }
}

fn valid_tempo(tempo: f64) -> bool {
    (MIN_TEMPO..=MAX_TEMPO).contains(&tempo)
}

fn check_tempo(tempo: f64) -> Result<()> {
    if valid_tempo(tempo) {
        Ok(())
    } else {
        Err(InvalidRequest::TempoOutOfRange(tempo).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::RecordingKeyboard;
    use crate::timeline::{RawKind, RawMessage};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn player(store: Option<ConfigStore>) -> Player {
        Player::with_backends(store, || Box::new(RecordingKeyboard::new()), midir_opener())
    }

    /// Notes at 0s and 8s, ten seconds long
    fn long_note() -> Timeline {
        let on = |note| RawKind::NoteOn {
            channel: 0,
            note,
            velocity: 100,
        };
        Timeline::build(
            [
                RawMessage::new(0.0, on(60)),
                RawMessage::new(8.0, on(62)),
                RawMessage::new(2.0, RawKind::Other),
            ],
            10.0,
        )
        .unwrap()
    }

    /// Counts how often it is loaded
    struct CountingSource {
        timeline: Timeline,
        loads: AtomicUsize,
    }

    impl TimelineSource for CountingSource {
        fn load(&self) -> Result<Timeline> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(self.timeline.clone())
        }

        fn describe(&self) -> String {
            "counting".into()
        }
    }

    #[test]
    fn test_out_of_range_configured_tempo_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.ron");
        let mut store = ConfigStore::open(&path);
        store.update(|c| c.tempo = 500.0).unwrap();

        let player = player(Some(store));
        assert_eq!(player.tempo(), 100.0);
    }

    #[test]
    fn test_seek_rebuilds_timeline() {
        let player = player(None);
        let source = Arc::new(CountingSource {
            timeline: long_note(),
            loads: AtomicUsize::new(0),
        });

        player.play_source(source.clone(), 100.0).unwrap();
        assert_eq!(source.loads.load(Ordering::SeqCst), 1);

        player.seek(9.99).unwrap();
        assert!(player.wait_until_idle(Duration::from_secs(5)));
        assert_eq!(source.loads.load(Ordering::SeqCst), 2);
        assert_eq!(player.position(), 10.0);
    }

    #[test]
    fn test_stop_resets_position() {
        let player = player(None);
        player.play_timeline(long_note(), 100.0).unwrap();
        player.seek(5.0).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while player.position() < 5.0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(player.position(), 5.0);

        player.stop().unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while player.position() != 0.0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(player.position(), 0.0);
        assert_eq!(player.status(), PlaybackStatus::Idle);
    }

    #[test]
    fn test_settings_apply_without_store() {
        let player = player(None);
        player.set_no_doubles(false);
        player.set_target_window(Some("Virtual Piano".into()));
        player.set_use_midi_output(true, Some("Loopback".into()));

        let settings = player.settings();
        assert!(!settings.no_doubles);
        assert_eq!(settings.target_window.as_deref(), Some("Virtual Piano"));
        assert_eq!(settings.midi_device.as_deref(), Some("Loopback"));
        assert!(player.config().is_none());
    }
}
