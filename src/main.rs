use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use crossbeam::channel::RecvTimeoutError;
use tracing::{error, info, warn};

use keyplay::output::list_output_devices;
use keyplay::{
    CallbackResult, Command, ConfigStore, InvalidRequest, NoteEvent, PlaybackStatus, Player,
    PlayerError, Result,
};

#[derive(Parser, Debug)]
#[command(name = "keyplay")]
#[command(version, about = "Play MIDI files as keyboard input for virtual pianos")]
struct Args {
    /// Standard MIDI file to play
    #[arg(required_unless_present = "list_devices")]
    file: Option<PathBuf>,

    /// Playback speed in percent (25-200)
    #[arg(short, long)]
    tempo: Option<f64>,

    /// Settings file, created with defaults if missing
    #[arg(short, long, default_value = "keyplay.ron")]
    config: PathBuf,

    /// Send raw MIDI to this output device instead of key strokes
    #[arg(long)]
    midi_out: Option<String>,

    /// Hold keys down until note-off instead of tapping them
    #[arg(long)]
    hold: bool,

    /// Print available MIDI output devices and exit
    #[arg(long)]
    list_devices: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("keyplay=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    if args.list_devices {
        for name in list_output_devices()? {
            println!("{}", name);
        }
        return Ok(());
    }
    let Some(file) = args.file else {
        return Ok(());
    };

    let store = ConfigStore::open(&args.config);
    let bindings = store.config().keyboard_bindings.clone();
    let controls_enabled = store.config().keyboard_controls_enabled;
    let player = Player::new(Some(store));

    player.set_note_callback(|event: &NoteEvent| -> CallbackResult {
        println!("{}", serde_json::to_string(event)?);
        Ok(())
    });

    if let Some(device) = args.midi_out {
        player.set_use_midi_output(true, Some(device));
    }
    if args.hold {
        player.set_hold_keys(true);
    }

    let info = player.load(&file)?;
    info!(
        "{} tracks, {:.2}s, {} notes",
        info.tracks, info.duration, info.note_count
    );
    player.play(&file, args.tempo.unwrap_or_else(|| player.tempo()))?;

    let (tx, rx) = crossbeam::channel::unbounded::<String>();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines().map_while(|l| l.ok()) {
            if tx.send(line).is_err() {
                break;
            }
        }
    });

    loop {
        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if line == "quit" {
                    break;
                }
                let result = match Command::from_binding(&bindings, line) {
                    Some(_) if !controls_enabled => {
                        warn!("Keyboard controls are disabled");
                        Ok(())
                    }
                    Some(command) => command
                        .map_err(PlayerError::from)
                        .and_then(|command| player.execute(command)),
                    None => handle_line(&player, &file, line),
                };
                if let Err(e) = result {
                    warn!("{}", e);
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            // stdin closed: keep playing until done
            Err(RecvTimeoutError::Disconnected) => {
                player.wait_until_idle(Duration::MAX);
                break;
            }
        }

        if player.status() == PlaybackStatus::Idle {
            break;
        }
    }

    Ok(())
}

fn handle_line(player: &Player, file: &Path, line: &str) -> Result<()> {
    let mut parts = line.split_whitespace();
    let verb = parts.next().unwrap_or_default();
    let arg = parts.next();

    match (verb, arg) {
        ("pause", None) => player.pause(),
        ("resume", None) => player.resume(file),
        ("stop", None) => player.stop(),
        ("seek", Some(seconds)) => player.seek(parse_number(seconds)?),
        ("tempo", Some(percent)) => player.update_tempo(parse_number(percent)?),
        ("sustain", Some(state)) => {
            player.set_sustain_enabled(parse_switch(state)?);
            Ok(())
        }
        ("velocity", Some(state)) => {
            player.set_velocity_enabled(parse_switch(state)?);
            Ok(())
        }
        _ => match line.parse::<Command>() {
            Ok(command) => player.execute(command),
            Err(e) => Err(e.into()),
        },
    }
}

fn parse_number(text: &str) -> Result<f64> {
    text.parse()
        .map_err(|_| InvalidRequest::UnknownCommand(text.to_string()).into())
}

fn parse_switch(text: &str) -> Result<bool> {
    match text {
        "on" => Ok(true),
        "off" => Ok(false),
        _ => Err(InvalidRequest::UnknownCommand(text.to_string()).into()),
    }
}
