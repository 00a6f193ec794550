//! Decoding of control-coded screen lines into cells.
//!
//! Handles SGR color/attribute sequences, cursor-forward padding, and the
//! SO/SI shift into the DEC special graphics character set. Other control
//! sequences are skipped.

use crate::trace::{Attr, Cell};

const ESC: char = '\x1b';
const SO: char = '\x0e';
const SI: char = '\x0f';
const BEL: char = '\x07';

/// Map a character from the DEC special graphics set to its Unicode glyph.
///
/// Characters outside the set are returned unchanged.
pub fn decode_dec_special(ch: char) -> char {
    match ch {
        '_' => ' ',
        '`' => '◆',
        'a' => '▒',
        'b' => '␉',
        'c' => '␌',
        'd' => '␍',
        'e' => '␊',
        'f' => '°',
        'g' => '±',
        'h' => '␤',
        'i' => '␋',
        'j' => '┘',
        'k' => '┐',
        'l' => '┌',
        'm' => '└',
        'n' => '┼',
        'o' => '⎺',
        'p' => '⎻',
        'q' => '─',
        'r' => '⎼',
        's' => '⎽',
        't' => '├',
        'u' => '┤',
        'v' => '┴',
        'w' => '┬',
        'x' => '│',
        'y' => '≤',
        'z' => '≥',
        '{' => 'π',
        '|' => '≠',
        '}' => '£',
        '~' => '·',
        other => other,
    }
}

/// Decode SO/SI shifted runs of a plain line, dropping the shift bytes.
pub fn decode_shifted(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut dec = false;
    for ch in line.chars() {
        match ch {
            SO => dec = true,
            SI => dec = false,
            '\r' => {}
            c if dec => out.push(decode_dec_special(c)),
            c => out.push(c),
        }
    }
    out
}

/// Current SGR rendition.
#[derive(Debug, Clone, Copy, Default)]
struct Pen {
    fg: Option<u8>,
    bg: Option<u8>,
    attr: Attr,
}

impl Pen {
    fn cell(&self, ch: char) -> Cell {
        Cell {
            ch,
            fg: self.fg,
            bg: self.bg,
            attr: self.attr,
        }
    }

    fn apply_sgr(&mut self, params: &[u16]) {
        if params.is_empty() {
            *self = Pen::default();
            return;
        }
        let mut i = 0;
        while i < params.len() {
            let p = params[i];
            match p {
                0 => *self = Pen::default(),
                1 => self.attr |= Attr::BOLD,
                2 => self.attr |= Attr::DIM,
                4 => self.attr |= Attr::UNDERLINE,
                5 => self.attr |= Attr::BLINK,
                7 => self.attr |= Attr::INVERSE,
                8 => self.attr |= Attr::INVISIBLE,
                22 => self.attr -= Attr::BOLD | Attr::DIM,
                24 => self.attr -= Attr::UNDERLINE,
                25 => self.attr -= Attr::BLINK,
                27 => self.attr -= Attr::INVERSE,
                28 => self.attr -= Attr::INVISIBLE,
                30..=37 => self.fg = Some((p - 30) as u8),
                39 => self.fg = None,
                40..=47 => self.bg = Some((p - 40) as u8),
                49 => self.bg = None,
                90..=97 => self.fg = Some((p - 90 + 8) as u8),
                100..=107 => self.bg = Some((p - 100 + 8) as u8),
                38 | 48 => {
                    // 38;5;n indexed, 38;2;r;g;b truecolor (not representable, skipped)
                    let target = if p == 38 { &mut self.fg } else { &mut self.bg };
                    match params.get(i + 1) {
                        Some(5) => {
                            if let Some(&n) = params.get(i + 2) {
                                *target = Some(n.min(255) as u8);
                            }
                            i += 2;
                        }
                        Some(2) => i += 4,
                        _ => {}
                    }
                }
                _ => {}
            }
            i += 1;
        }
    }
}

fn parse_params(raw: &str) -> Vec<u16> {
    if raw.is_empty() {
        return Vec::new();
    }
    raw.split([';', ':'])
        .map(|p| p.parse::<u16>().unwrap_or(0))
        .collect()
}

/// Decode one control-coded line into cells.
pub fn decode_line(line: &str) -> Vec<Cell> {
    let mut cells = Vec::new();
    let mut pen = Pen::default();
    let mut dec = false;
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            ESC => match chars.next() {
                Some('[') => {
                    let mut params = String::new();
                    let mut final_byte = None;
                    for c in chars.by_ref() {
                        if ('@'..='~').contains(&c) {
                            final_byte = Some(c);
                            break;
                        }
                        params.push(c);
                    }
                    match final_byte {
                        Some('m') => pen.apply_sgr(&parse_params(&params)),
                        Some('C') => {
                            let n = parse_params(&params).first().copied().unwrap_or(1).max(1);
                            for _ in 0..n {
                                cells.push(pen.cell(' '));
                            }
                        }
                        _ => {}
                    }
                }
                Some(']') => {
                    // OSC, terminated by BEL or ST
                    while let Some(c) = chars.next() {
                        if c == BEL {
                            break;
                        }
                        if c == ESC && chars.peek() == Some(&'\\') {
                            chars.next();
                            break;
                        }
                    }
                }
                Some('(') | Some(')') => {
                    // charset designation: ESC ( 0 selects DEC graphics
                    if let Some(set) = chars.next() {
                        dec = set == '0';
                    }
                }
                _ => {}
            },
            SO => dec = true,
            SI => dec = false,
            '\r' | '\n' => {}
            c if c.is_control() => {}
            c => {
                let glyph = if dec { decode_dec_special(c) } else { c };
                cells.push(pen.cell(glyph));
            }
        }
    }
    cells
}

/// Glyphs of a cell row as text.
pub fn cells_to_text(cells: &[Cell]) -> String {
    cells.iter().map(|c| c.ch).collect()
}

/// Remove all control sequences from a line, keeping glyphs as-is.
pub fn strip_ansi(line: &str) -> String {
    cells_to_text(&decode_line(line))
}
