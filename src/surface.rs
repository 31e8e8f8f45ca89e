//! Interaction policy for the surface that shows watermarked pages
//!
//! A display front-end routes pointer, clipboard and keyboard input through
//! these checks and swallows whatever they block.

/// Pointer and clipboard interactions a display surface receives
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SurfaceAction {
    ContextMenu,
    DragStart,
    SelectStart,
    MouseDown,
    Copy,
    Cut,
    Paste,
}

/// Every pointer and clipboard interaction is blocked
#[must_use]
pub fn should_block_action(action: SurfaceAction) -> bool {
    match action {
        SurfaceAction::ContextMenu
        | SurfaceAction::DragStart
        | SurfaceAction::SelectStart
        | SurfaceAction::MouseDown
        | SurfaceAction::Copy
        | SurfaceAction::Cut
        | SurfaceAction::Paste => true,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Key {
    Char(char),
    /// Function key F1..=F24
    F(u8),
    PrintScreen,
    Escape,
    Other,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Modifiers {
    pub ctrl: bool,
    pub shift: bool,
    pub alt: bool,
    /// Cmd on macOS, the Windows key elsewhere
    pub meta: bool,
}

/// A key press together with the modifiers held
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeyChord {
    pub key: Key,
    pub modifiers: Modifiers,
}

impl KeyChord {
    #[must_use]
    pub const fn plain(key: Key) -> Self {
        Self {
            key,
            modifiers: Modifiers {
                ctrl: false,
                shift: false,
                alt: false,
                meta: false,
            },
        }
    }

    #[must_use]
    pub const fn ctrl(c: char) -> Self {
        let mut chord = Self::plain(Key::Char(c));
        chord.modifiers.ctrl = true;
        chord
    }

    #[must_use]
    pub const fn with(mut self, modifiers: Modifiers) -> Self {
        self.modifiers = modifiers;
        self
    }
}

/// Clipboard, save, print and undo shortcuts under Ctrl/Cmd
const COMMAND_KEYS: [char; 8] = ['a', 'c', 'v', 's', 'p', 'x', 'z', 'y'];
/// Developer tools under Ctrl+Shift
const DEVTOOLS_KEYS: [char; 3] = ['i', 'j', 'c'];

/// Whether a key press must be swallowed by the display surface.
///
/// Covers copy/save/print shortcuts, developer tools, view-source,
/// screenshot chords, every function key and Escape.
#[must_use]
pub fn should_block_key(chord: &KeyChord) -> bool {
    let m = chord.modifiers;
    match chord.key {
        Key::Char(c) => {
            let c = c.to_ascii_lowercase();
            ((m.ctrl || m.meta) && COMMAND_KEYS.contains(&c))
                || (m.ctrl && m.shift && DEVTOOLS_KEYS.contains(&c))
                || (m.ctrl && c == 'u')
                || (m.shift && m.meta && c == 's')
        }
        Key::F(n) => (1..=12).contains(&n),
        Key::PrintScreen | Key::Escape => true,
        Key::Other => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mods(ctrl: bool, shift: bool, alt: bool, meta: bool) -> Modifiers {
        Modifiers {
            ctrl,
            shift,
            alt,
            meta,
        }
    }

    #[test]
    fn pointer_and_clipboard_are_always_blocked() {
        for action in [
            SurfaceAction::ContextMenu,
            SurfaceAction::DragStart,
            SurfaceAction::SelectStart,
            SurfaceAction::MouseDown,
            SurfaceAction::Copy,
            SurfaceAction::Cut,
            SurfaceAction::Paste,
        ] {
            assert!(should_block_action(action), "{action:?}");
        }
    }

    #[test]
    fn command_shortcuts_are_blocked() {
        for c in ['a', 'c', 'v', 's', 'p', 'x', 'z', 'y', 'S'] {
            assert!(should_block_key(&KeyChord::ctrl(c)), "ctrl+{c}");
            let cmd = KeyChord::plain(Key::Char(c)).with(mods(false, false, false, true));
            assert!(should_block_key(&cmd), "cmd+{c}");
        }
        assert!(!should_block_key(&KeyChord::ctrl('n')));
    }

    #[test]
    fn devtools_and_view_source_are_blocked() {
        for c in ['I', 'J', 'C'] {
            let chord = KeyChord::plain(Key::Char(c)).with(mods(true, true, false, false));
            assert!(should_block_key(&chord), "ctrl+shift+{c}");
        }
        assert!(should_block_key(&KeyChord::ctrl('U')));
    }

    #[test]
    fn screenshot_chords_are_blocked() {
        assert!(should_block_key(&KeyChord::plain(Key::PrintScreen)));
        assert!(should_block_key(
            &KeyChord::plain(Key::PrintScreen).with(mods(false, false, true, false))
        ));
        assert!(should_block_key(
            &KeyChord::plain(Key::Char('S')).with(mods(false, true, false, true))
        ));
    }

    #[test]
    fn function_keys_and_escape_are_blocked() {
        for n in 1..=12 {
            assert!(should_block_key(&KeyChord::plain(Key::F(n))), "F{n}");
        }
        assert!(!should_block_key(&KeyChord::plain(Key::F(13))));
        assert!(should_block_key(&KeyChord::plain(Key::Escape)));
    }

    #[test]
    fn ordinary_typing_passes_through() {
        assert!(!should_block_key(&KeyChord::plain(Key::Char('a'))));
        assert!(!should_block_key(
            &KeyChord::plain(Key::Char('A')).with(mods(false, true, false, false))
        ));
        assert!(!should_block_key(&KeyChord::plain(Key::Other)));
    }
}
