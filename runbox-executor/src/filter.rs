//! Terminal output cleanup.
//!
//! A pty echoes input and programs may emit cursor movement, colors or window
//! titles. [`ControlFilter`] removes escape sequences and C0 controls (except
//! newline and tab) from a byte stream that arrives in arbitrary chunks, and
//! reassembles UTF-8 characters split across chunk boundaries.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Ground,
    Escape,
    EscapeIntermediate,
    Csi,
    /// OSC, DCS, SOS, PM and APC bodies: skipped up to BEL or ST.
    Str,
    StrEscape,
}

const BEL: u8 = 0x07;
const ESC: u8 = 0x1b;
const CAN: u8 = 0x18;
const SUB: u8 = 0x1a;
const DEL: u8 = 0x7f;

#[derive(Debug)]
pub struct ControlFilter {
    strip: bool,
    state: State,
    /// Bytes of an unfinished UTF-8 character.
    carry: Vec<u8>,
}

impl ControlFilter {
    pub fn new(strip: bool) -> Self {
        Self {
            strip,
            state: State::Ground,
            carry: Vec::new(),
        }
    }

    /// Feeds a chunk and returns the text that is complete so far.
    pub fn push(&mut self, chunk: &[u8]) -> String {
        let mut out = std::mem::take(&mut self.carry);
        if self.strip {
            out.reserve(chunk.len());
            for &b in chunk {
                self.step(b, &mut out);
            }
        } else {
            out.extend_from_slice(chunk);
        }

        let keep = incomplete_tail(&out);
        let split = out.len() - keep;
        self.carry = out.split_off(split);
        String::from_utf8_lossy(&out).into_owned()
    }

    /// Flushes whatever is still pending. A dangling partial character
    /// becomes U+FFFD.
    pub fn finish(&mut self) -> String {
        self.state = State::Ground;
        let rest = std::mem::take(&mut self.carry);
        String::from_utf8_lossy(&rest).into_owned()
    }

    fn step(&mut self, b: u8, out: &mut Vec<u8>) {
        self.state = match self.state {
            State::Ground => match b {
                ESC => State::Escape,
                b'\n' | b'\t' => {
                    out.push(b);
                    State::Ground
                }
                0x00..=0x1f | DEL => State::Ground,
                _ => {
                    out.push(b);
                    State::Ground
                }
            },
            State::Escape => escape(b),
            State::EscapeIntermediate => match b {
                0x20..=0x2f => State::EscapeIntermediate,
                ESC => State::Escape,
                _ => State::Ground,
            },
            State::Csi => match b {
                0x40..=0x7e | CAN | SUB => State::Ground,
                ESC => State::Escape,
                _ => State::Csi,
            },
            State::Str => match b {
                BEL | CAN | SUB => State::Ground,
                ESC => State::StrEscape,
                _ => State::Str,
            },
            State::StrEscape => match b {
                b'\\' => State::Ground,
                _ => escape(b),
            },
        }
    }
}

/// Transition out of a bare ESC.
fn escape(b: u8) -> State {
    match b {
        b'[' => State::Csi,
        b']' | b'P' | b'X' | b'^' | b'_' => State::Str,
        0x20..=0x2f => State::EscapeIntermediate,
        ESC => State::Escape,
        _ => State::Ground,
    }
}

/// Length of an incomplete UTF-8 sequence at the end of `bytes`.
fn incomplete_tail(bytes: &[u8]) -> usize {
    let start = bytes.len().saturating_sub(3);
    for i in (start..bytes.len()).rev() {
        let b = bytes[i];
        if b & 0xc0 == 0x80 {
            continue;
        }
        let width = match b {
            0xc0..=0xdf => 2,
            0xe0..=0xef => 3,
            0xf0..=0xf7 => 4,
            _ => return 0,
        };
        let have = bytes.len() - i;
        return if have < width { have } else { 0 };
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strip_all(chunks: &[&[u8]]) -> String {
        let mut filter = ControlFilter::new(true);
        let mut text = String::new();
        for chunk in chunks {
            text.push_str(&filter.push(chunk));
        }
        text.push_str(&filter.finish());
        text
    }

    #[test]
    fn plain_text_passes() {
        assert_eq!(strip_all(&[b"hello\tworld\n"]), "hello\tworld\n");
    }

    #[test]
    fn colors_and_cursor_moves() {
        let input = b"\x1b[1;31merror\x1b[0m: \x1b[2K\x1b[10;5Hdone\n";
        assert_eq!(strip_all(&[input]), "error: done\n");
    }

    #[test]
    fn window_titles() {
        assert_eq!(strip_all(&[b"\x1b]0;title\x07ok"]), "ok");
        assert_eq!(strip_all(&[b"\x1b]2;title\x1b\\ok"]), "ok");
        assert_eq!(strip_all(&[b"\x1bPq#0;2;0;0;0\x1b\\ok"]), "ok");
    }

    #[test]
    fn other_escapes() {
        // keypad mode, charset selection, private mode
        assert_eq!(strip_all(&[b"\x1b=\x1b(Ba\x1b[?25lb\x1b[?25h"]), "ab");
    }

    #[test]
    fn carriage_returns_and_bells_are_dropped() {
        assert_eq!(strip_all(&[b"Enter a number: 5\r\n\x07got 5\r\n"]), "Enter a number: 5\ngot 5\n");
        assert_eq!(strip_all(&[b"a\x08b\x7fc"]), "abc");
    }

    #[test]
    fn sequences_split_across_chunks() {
        assert_eq!(strip_all(&[b"a\x1b", b"[3", b"1mb\x1b[0", b"m"]), "ab");
        assert_eq!(strip_all(&[b"x\x1b]0;ti", b"tle\x1b", b"\\y"]), "xy");
    }

    #[test]
    fn utf8_split_across_chunks() {
        let bytes = "héllo 世界".as_bytes();
        let mut filter = ControlFilter::new(true);
        let mut text = String::new();
        for b in bytes {
            text.push_str(&filter.push(std::slice::from_ref(b)));
        }
        text.push_str(&filter.finish());
        assert_eq!(text, "héllo 世界");
    }

    #[test]
    fn dangling_partial_character() {
        let mut filter = ControlFilter::new(true);
        assert_eq!(filter.push(&[b'a', 0xe4, 0xb8]), "a");
        assert_eq!(filter.finish(), "\u{fffd}");
    }

    #[test]
    fn pass_through_mode() {
        let mut filter = ControlFilter::new(false);
        assert_eq!(filter.push(b"\x1b[31mred\r\n"), "\x1b[31mred\r\n");
        assert_eq!(filter.push(&"世".as_bytes()[..2]), "");
        assert_eq!(filter.push(&"世".as_bytes()[2..]), "世");
    }

    #[test]
    fn tail_detection() {
        assert_eq!(incomplete_tail(b"abc"), 0);
        assert_eq!(incomplete_tail(&[b'a', 0xe4]), 1);
        assert_eq!(incomplete_tail(&[0xe4, 0xb8]), 2);
        assert_eq!(incomplete_tail("世".as_bytes()), 0);
        assert_eq!(incomplete_tail(&[0xf0, 0x9f, 0x98]), 3);
    }
}
