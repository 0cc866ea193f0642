use crate::keymap::{KeyMapping, Modifier};
use crate::output::{ActionQueue, Key, SUSTAIN_KEY};

pub(crate) struct KeyState {
    queue: ActionQueue,
    /// note -> mapping, in press order
    held: Vec<(u8, KeyMapping)>,
    sustain_pressed: bool,
}

impl KeyState {
    pub fn new(queue: ActionQueue) -> Self {
        Self {
            queue,
            held: Vec::new(),
            sustain_pressed: false,
        }
    }

    pub fn press_note(
        &mut self,
        note: u8,
        mapping: KeyMapping,
        velocity_key: Option<char>,
        no_doubles: bool,
        hold: bool,
    ) {
        // a retriggered note lets go of its previous press first
        self.release_note(note);

        if no_doubles {
            let doubles: Vec<u8> = self
                .held
                .iter()
                .filter(|(_, held)| held.key == mapping.key)
                .map(|(n, _)| *n)
                .collect();
            for n in doubles {
                self.release_note(n);
            }
        }

        for modifier in &mapping.modifiers {
            self.queue.press(Key::from(*modifier));
        }

        if let Some(v) = velocity_key {
            self.queue.press(Key::from(Modifier::Alt));
            self.queue.press(Key::Char(v));
            self.queue.release(Key::Char(v));
            self.queue.release(Key::from(Modifier::Alt));
        }

        self.queue.press(Key::Char(mapping.key));

        if hold {
            self.held.push((note, mapping));
        } else {
            self.release_mapping(&mapping);
        }
    }

    pub fn release_note(&mut self, note: u8) {
        if let Some(i) = self.held.iter().position(|(n, _)| *n == note) {
            let (_, mapping) = self.held.remove(i);
            self.release_mapping(&mapping);
        }
    }

    /// Let go of every held note and the sustain key
    pub fn release_all(&mut self) {
        for (_, mapping) in std::mem::take(&mut self.held) {
            self.release_mapping(&mapping);
        }
        if self.sustain_pressed {
            self.queue.release(SUSTAIN_KEY);
            self.sustain_pressed = false;
        }
    }

    /// Edge-trigger the sustain key. Returns true when the state changed.
    pub fn set_sustain(&mut self, pressed: bool, enabled: bool) -> bool {
        if !enabled || pressed == self.sustain_pressed {
            return false;
        }
        if pressed {
            self.queue.press(SUSTAIN_KEY);
        } else {
            self.queue.release(SUSTAIN_KEY);
        }
        self.sustain_pressed = pressed;
        true
    }

    #[cfg(test)]
    pub fn held_notes(&self) -> impl Iterator<Item = (u8, char)> + '_ {
        self.held.iter().map(|(n, m)| (*n, m.key))
    }

    fn release_mapping(&self, mapping: &KeyMapping) {
        self.queue.release(Key::Char(mapping.key));
        for modifier in mapping.modifiers.iter().rev() {
            self.queue.release(Key::from(*modifier));
        }
    }
}
