mod common;

use std::time::Duration;

use common::*;
use keyplay::output::{Key, KeyStroke};

const IDLE_TIMEOUT: Duration = Duration::from_secs(5);

#[test]
fn test_raw_mode_forwards_notes_and_sustain_only() {
    let port = TestPort::default();
    let h = Harness::with_opener(port.opener());
    h.player.set_use_midi_output(true, Some("test port".into()));

    let tl = timeline(
        vec![
            cc(0.0, 64, 127),
            on(0.0, 60, 100),
            // volume: not forwarded
            cc(0.01, 7, 90),
            off(0.01, 60),
            cc(0.0, 64, 0),
        ],
        0.02,
    );
    h.player.play_timeline(tl, 100.0).unwrap();
    assert!(h.player.wait_until_idle(IDLE_TIMEOUT));

    let (strokes, _, events) = h.finish();
    assert!(strokes.is_empty());
    assert_eq!(
        port.sent(),
        vec![
            vec![0xB0, 64, 127],
            vec![0x90, 60, 100],
            vec![0x80, 60, 0],
            vec![0xB0, 64, 0],
        ]
    );
    assert!(*port.closed.lock());
    assert_eq!(notes(&events), vec!["C4 → MIDI Out", ""]);
}

#[test]
fn test_raw_mode_silences_sounding_notes_on_stop() {
    let port = TestPort::default();
    let h = Harness::with_opener(port.opener());
    h.player.set_use_midi_output(true, None);

    let tl = timeline(vec![on(0.0, 60, 100), on(0.0, 64, 80), off(5.0, 60)], 5.0);
    h.player.play_timeline(tl, 100.0).unwrap();
    assert!(eventually(|| port.sent().len() == 2));

    h.player.stop().unwrap();
    assert!(eventually(|| *port.closed.lock()));

    let sent = port.sent();
    assert_eq!(&sent[..2], &[vec![0x90, 60, 100], vec![0x90, 64, 80]]);
    let mut tail = sent[2..].to_vec();
    tail.sort();
    assert_eq!(tail, vec![vec![0x80, 60, 0], vec![0x80, 64, 0]]);
}

#[test]
fn test_unavailable_port_falls_back_to_keys() {
    let h = Harness::new();
    h.player.set_use_midi_output(true, Some("missing".into()));

    h.player
        .play_timeline(timeline(vec![on(0.0, 60, 100), off(0.01, 60)], 0.01), 100.0)
        .unwrap();
    assert!(h.player.wait_until_idle(IDLE_TIMEOUT));

    let (strokes, _, events) = h.finish();
    assert_eq!(
        strokes,
        vec![KeyStroke::Down(Key::Char('t')), KeyStroke::Up(Key::Char('t'))]
    );
    assert_eq!(notes(&events), vec!["C4 → T", ""]);
}

#[test]
fn test_port_is_closed_when_paused() {
    let port = TestPort::default();
    let h = Harness::with_opener(port.opener());
    h.player.set_use_midi_output(true, None);

    let tl = timeline(vec![on(0.0, 60, 100), off(5.0, 60)], 5.0);
    h.player.play_timeline(tl, 100.0).unwrap();
    assert!(eventually(|| port.sent().len() == 1));

    h.player.pause().unwrap();
    assert!(eventually(|| *port.closed.lock()));
    assert_eq!(port.sent().last(), Some(&vec![0x80, 60, 0]));

    h.player.stop().unwrap();
}
