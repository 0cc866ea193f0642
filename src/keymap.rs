//! Note to keyboard mapping

pub const MAIN_SEQUENCE: &str =
    "1!2@34$5%6^78*9(0qQwWeErtTyYuiIoOpPasSdDfgGhHjJklLzZxcCvVbBnm";
pub const LOW_NOTES: &str = "1234567890qwert";
pub const HIGH_NOTES: &str = "yuiopasdfghj";
pub const VELOCITY_MAP: &str = "1234567890qwertyuiopasdfghjklzxc";

pub const MAIN_START: u8 = 36;

const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Modifier {
    Shift,
    Ctrl,
    Alt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMapping {
    pub key: char,
    pub modifiers: Vec<Modifier>,
}

pub fn main_end() -> u8 {
    MAIN_START + MAIN_SEQUENCE.len() as u8 - 1
}

pub fn map_note(note: u8) -> Option<KeyMapping> {
    let end = main_end();

    if (MAIN_START..=end).contains(&note) {
        let c = MAIN_SEQUENCE.as_bytes()[(note - MAIN_START) as usize] as char;
        return Some(match unshift(c) {
            Some(base) => KeyMapping {
                key: base,
                modifiers: vec![Modifier::Shift],
            },
            None => KeyMapping {
                key: c,
                modifiers: vec![],
            },
        });
    }

    let (table, offset) = if note < MAIN_START {
        (LOW_NOTES, (MAIN_START - note - 1) as usize)
    } else {
        (HIGH_NOTES, (note - end - 1) as usize)
    };
    table.as_bytes().get(offset).map(|&b| KeyMapping {
        key: b as char,
        modifiers: vec![Modifier::Ctrl],
    })
}

/// Key for the alt-modified velocity indicator, if velocity mapping is on
pub fn map_velocity(velocity: u8, enabled: bool) -> Option<char> {
    if !enabled || velocity == 0 {
        return None;
    }
    let index = (velocity as usize / 4).min(VELOCITY_MAP.len() - 1);
    Some(VELOCITY_MAP.as_bytes()[index] as char)
}

/// Base key for characters typed with shift held
fn unshift(c: char) -> Option<char> {
    let base = match c {
        '!' => '1',
        '@' => '2',
        '$' => '4',
        '%' => '5',
        '^' => '6',
        '*' => '8',
        '(' => '9',
        ')' => '0',
        c if c.is_ascii_uppercase() => c.to_ascii_lowercase(),
        _ => return None,
    };
    Some(base)
}

/// Scientific pitch name, middle C (60) is C4
pub fn note_name(note: u8) -> String {
    let octave = note as i32 / 12 - 1;
    format!("{}{}", NOTE_NAMES[note as usize % 12], octave)
}

/// Human readable label such as `C4 → Ctrl+A` or `E4 → Alt+Q+Shift+R`
pub fn describe(note: u8, mapping: &KeyMapping, velocity_key: Option<char>) -> String {
    let mut prefix = String::new();
    if let Some(v) = velocity_key {
        prefix.push_str(&format!("Alt+{}+", v.to_ascii_uppercase()));
    }
    if mapping.modifiers.contains(&Modifier::Ctrl) {
        prefix.push_str("Ctrl+");
    }
    if mapping.modifiers.contains(&Modifier::Shift) {
        prefix.push_str("Shift+");
    }
    format!(
        "{} → {}{}",
        note_name(note),
        prefix,
        mapping.key.to_ascii_uppercase()
    )
}
