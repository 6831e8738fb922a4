//! WeeChat color and attribute stripping.
//!
//! Lines delivered by the relay carry WeeChat's internal escape grammar:
//!
//! - `0x19` color codes (foreground, background, both, extended, emphasis,
//!   bar codes, reset and the short two-digit form),
//! - `0x1A` / `0x1B` set and remove attribute, each followed by one char,
//! - `0x1C` reset.
//!
//! [`normalize`] removes every recognised token and copies everything else.
//! Truncated tokens at the end of a line are consumed up to the end of input.

/// Starts a color token.
const COLOR_CHAR: char = '\x19';
/// Sets one attribute (next char).
const SET_ATTR_CHAR: char = '\x1A';
/// Removes one attribute (next char).
const REMOVE_ATTR_CHAR: char = '\x1B';
/// Resets color and attributes.
const RESET_CHAR: char = '\x1C';

const FG_CHAR: char = 'F';
const BG_CHAR: char = 'B';
const FG_BG_CHAR: char = '*';
const EXTENDED_CHAR: char = '@';
const EMPHASIS_CHAR: char = 'E';
const BAR_CHAR: char = 'b';

/// Bold, reverse, italic, underline, keep attributes.
const ATTRIBUTE_CHARS: [char; 5] = ['*', '!', '/', '_', '|'];

/// Bar roles: fg, bg, delimiter, start input, start hidden input,
/// move cursor, start item, start line item.
const BAR_ROLE_CHARS: [char; 8] = ['F', 'B', 'D', '_', '-', '#', 'i', 'l'];

/// Separators between foreground and background (`,` is the pre-2.6 form).
const FG_BG_SEPARATORS: [char; 2] = [',', '~'];

/// Width of an extended color number after `@`.
const EXTENDED_WIDTH: usize = 5;
/// Width of a short color number.
const SHORT_WIDTH: usize = 2;

/// Strip WeeChat escape tokens from a relay line.
pub fn normalize(raw: &str) -> String {
    if !raw.contains(is_marker) {
        return raw.to_string();
    }

    let chars: Vec<char> = raw.chars().collect();
    let mut cursor = Cursor::new(&chars);
    let mut output = String::with_capacity(raw.len());

    while let Some(c) = cursor.peek() {
        cursor.advance(1);
        match c {
            COLOR_CHAR => cursor.skip_color(),
            SET_ATTR_CHAR | REMOVE_ATTR_CHAR => cursor.advance(1),
            RESET_CHAR => {}
            other => output.push(other),
        }
    }

    output
}

fn is_marker(c: char) -> bool {
    matches!(c, COLOR_CHAR | SET_ATTR_CHAR | REMOVE_ATTR_CHAR | RESET_CHAR)
}

/// Bounds-checked scanner over the decoded characters of a line.
struct Cursor<'a> {
    chars: &'a [char],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(chars: &'a [char]) -> Self {
        Self { chars, pos: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    /// Move forward, never past the end of input.
    fn advance(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.chars.len());
    }

    /// True when the next `width` chars exist and are all `0-9`.
    fn digits_ahead(&self, width: usize) -> bool {
        self.chars
            .get(self.pos..self.pos + width)
            .is_some_and(|window| window.iter().all(|c| c.is_ascii_digit()))
    }

    fn skip_attributes(&mut self) {
        while self.peek().is_some_and(|c| ATTRIBUTE_CHARS.contains(&c)) {
            self.advance(1);
        }
    }

    /// A color value: `@` plus five chars, or two chars.
    fn skip_color_value(&mut self) {
        if self.peek() == Some(EXTENDED_CHAR) {
            self.advance(1 + EXTENDED_WIDTH);
        } else {
            self.advance(SHORT_WIDTH);
        }
    }

    /// Consume the remainder of a token whose `0x19` marker was just read.
    fn skip_color(&mut self) {
        let Some(c) = self.peek() else {
            return;
        };

        match c {
            FG_CHAR => {
                self.advance(1);
                self.skip_attributes();
                self.skip_color_value();
            }
            BG_CHAR => {
                self.advance(1);
                self.skip_color_value();
            }
            FG_BG_CHAR => {
                self.advance(1);
                self.skip_attributes();
                self.skip_color_value();
                if self.peek().is_some_and(|c| FG_BG_SEPARATORS.contains(&c)) {
                    self.advance(1);
                    self.skip_color_value();
                }
            }
            EXTENDED_CHAR => {
                self.advance(1);
                if self.digits_ahead(EXTENDED_WIDTH) {
                    self.advance(EXTENDED_WIDTH);
                }
            }
            EMPHASIS_CHAR | RESET_CHAR => self.advance(1),
            BAR_CHAR => {
                self.advance(1);
                if self.peek().is_some_and(|c| BAR_ROLE_CHARS.contains(&c)) {
                    self.advance(1);
                }
            }
            _ => {
                if self.digits_ahead(SHORT_WIDTH) {
                    self.advance(SHORT_WIDTH);
                }
            }
        }
    }
}
