mod common;

use std::path::PathBuf;
use std::time::Duration;

use approx::assert_relative_eq;
use common::*;
use keyplay::output::{Key, KeyStroke};
use keyplay::{PlaybackStatus, PlayerError};

fn write_smf(dir: &tempfile::TempDir, name: &str, track: &[u8]) -> PathBuf {
    let mut bytes = b"MThd".to_vec();
    bytes.extend_from_slice(&6u32.to_be_bytes());
    bytes.extend_from_slice(&0u16.to_be_bytes());
    bytes.extend_from_slice(&1u16.to_be_bytes());
    bytes.extend_from_slice(&96u16.to_be_bytes());
    bytes.extend_from_slice(b"MTrk");
    bytes.extend_from_slice(&(track.len() as u32).to_be_bytes());
    bytes.extend_from_slice(track);

    let path = dir.path().join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

#[test]
fn test_play_standard_midi_file() {
    let dir = tempfile::tempdir().unwrap();
    #[rustfmt::skip]
    let path = write_smf(&dir, "two.mid", &[
        // 240 BPM
        0x00, 0xFF, 0x51, 0x03, 0x03, 0xD0, 0x90,
        0x00, 0x90, 60, 100,
        0x18, 0x80, 60, 0,
        0x00, 0x90, 62, 100,
        0x18, 0x80, 62, 0,
        0x00, 0xFF, 0x2F, 0x00,
    ]);

    let h = Harness::new();
    let info = h.player.load(&path).unwrap();
    assert_eq!(info.tracks, 1);
    assert_eq!(info.ticks_per_beat, Some(96));
    assert_eq!(info.note_count, 2);
    // 24 ticks at 96 ppq and 0.25s per beat
    assert_relative_eq!(info.duration, 0.125, epsilon = 1e-9);
    assert_relative_eq!(h.player.duration(), 0.125, epsilon = 1e-9);

    h.player.play(&path, 100.0).unwrap();
    assert!(h.player.wait_until_idle(Duration::from_secs(5)));

    let (strokes, _, events) = h.finish();
    assert_eq!(
        strokes,
        vec![
            KeyStroke::Down(Key::Char('t')),
            KeyStroke::Up(Key::Char('t')),
            KeyStroke::Down(Key::Char('y')),
            KeyStroke::Up(Key::Char('y')),
        ]
    );
    assert_eq!(notes(&events), vec!["C4 → T", "D4 → Y", ""]);
}

#[test]
fn test_malformed_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.mid");
    std::fs::write(&path, b"definitely not a midi file").unwrap();

    let h = Harness::new();
    assert!(matches!(
        h.player.play(&path, 100.0),
        Err(PlayerError::MalformedInput(_))
    ));
    assert!(matches!(h.player.load(&path), Err(PlayerError::MalformedInput(_))));
    assert_eq!(h.player.status(), PlaybackStatus::Idle);

    let (strokes, _, _) = h.finish();
    assert!(strokes.is_empty());
}

#[test]
fn test_missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let h = Harness::new();
    match h.player.play(dir.path().join("nope.mid"), 100.0) {
        Err(PlayerError::Io { path, .. }) => assert!(path.ends_with("nope.mid")),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(h.player.status(), PlaybackStatus::Idle);
}
