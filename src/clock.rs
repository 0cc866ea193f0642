use std::time::{Duration, Instant};

pub const MIN_TEMPO: f64 = 25.0;
pub const MAX_TEMPO: f64 = 200.0;

/// Cap on how far ahead a deadline is projected
const MAX_AHEAD: Duration = Duration::from_secs(86_400);

#[derive(Debug, Clone, Copy)]
pub struct PlaybackClock {
    wall_ref: Instant,
    playback_ref: f64,
    /// Percent of original speed
    tempo: f64,
}

impl PlaybackClock {
    /// Start counting from `position` seconds of playback time at `now`
    pub fn start(now: Instant, position: f64, tempo: f64) -> Self {
        Self {
            wall_ref: now,
            playback_ref: position,
            tempo,
        }
    }

    pub fn tempo(&self) -> f64 {
        self.tempo
    }

    /// Playback time reached at `now`
    pub fn position_at(&self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.wall_ref).as_secs_f64();
        self.playback_ref + elapsed * (self.tempo / 100.0)
    }

    /// Wall-clock instant at which playback time `event_time` is due.
    /// Times further out than a day yield a deadline one day ahead; waiting
    /// on it again simply projects the next day.
    pub fn deadline(&self, event_time: f64) -> Instant {
        let ahead = (event_time - self.playback_ref).max(0.0) * (100.0 / self.tempo);
        let ahead = Duration::try_from_secs_f64(ahead)
            .unwrap_or(MAX_AHEAD)
            .min(MAX_AHEAD);
        self.wall_ref.checked_add(ahead).unwrap_or(self.wall_ref)
    }

    /// Re-anchor at `now` and switch to `tempo`. The elapsed span is measured
    /// at the tempo in effect before the change.
    pub fn rebase(&mut self, now: Instant, tempo: f64) {
        self.playback_ref = self.position_at(now);
        self.wall_ref = now;
        self.tempo = tempo;
    }
}
