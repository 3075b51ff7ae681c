//! Noms longs (VFAT) et génération des noms courts associés

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use crate::directory::{CASE_LOWER_BASE, CASE_LOWER_EXT, LONG_NAME};
use crate::{Error, Result};

/// Caractères UTF-16 portés par un fragment
pub const CHARS_PER_SLOT: usize = 13;
pub const LAST_LONG_ENTRY: u8 = 0x40;
pub const MAX_NAME_UNITS: usize = 255;
const MAX_SEQUENCE: u8 = 20;

const UNIT_OFFSETS: [usize; CHARS_PER_SLOT] = [1, 3, 5, 7, 9, 14, 16, 18, 20, 22, 24, 28, 30];

/// Fragment de nom long tel que stocké sur le disque
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LfnSlot {
    pub sequence: u8,
    pub last: bool,
    pub checksum: u8,
    pub units: [u16; CHARS_PER_SLOT],
}

impl LfnSlot {
    pub fn parse(raw: &[u8]) -> Self {
        let mut units = [0u16; CHARS_PER_SLOT];
        for (unit, &offset) in units.iter_mut().zip(UNIT_OFFSETS.iter()) {
            *unit = u16::from_le_bytes([raw[offset], raw[offset + 1]]);
        }
        Self {
            sequence: raw[0] & 0x1f,
            last: raw[0] & LAST_LONG_ENTRY != 0,
            checksum: raw[13],
            units,
        }
    }

    pub fn encode(&self, raw: &mut [u8]) {
        raw[0] = self.sequence | if self.last { LAST_LONG_ENTRY } else { 0 };
        raw[11] = LONG_NAME;
        raw[12] = 0;
        raw[13] = self.checksum;
        raw[26] = 0;
        raw[27] = 0;
        for (unit, &offset) in self.units.iter().zip(UNIT_OFFSETS.iter()) {
            raw[offset..offset + 2].copy_from_slice(&unit.to_le_bytes());
        }
    }
}

/// Somme de contrôle du nom court liant les fragments à leur entrée
pub fn short_name_checksum(name: &[u8; 11]) -> u8 {
    name.iter()
        .fold(0u8, |sum, &b| ((sum & 1) << 7).wrapping_add(sum >> 1).wrapping_add(b))
}

/// Reconstitue un nom long à partir des fragments lus dans l'ordre du disque
#[derive(Debug, Default)]
pub struct LongNameBuilder {
    units: Vec<u16>,
    expected: u8,
    checksum: u8,
}

impl LongNameBuilder {
    pub fn reset(&mut self) {
        self.units.clear();
        self.expected = 0;
    }

    pub fn push(&mut self, slot: &LfnSlot) {
        if slot.sequence == 0 || slot.sequence > MAX_SEQUENCE {
            self.reset();
            return;
        }

        if slot.last {
            self.units = vec![0xFFFF; slot.sequence as usize * CHARS_PER_SLOT];
            self.checksum = slot.checksum;
        } else if self.expected == 0
            || slot.sequence + 1 != self.expected
            || slot.checksum != self.checksum
        {
            self.reset();
            return;
        }

        let start = (slot.sequence as usize - 1) * CHARS_PER_SLOT;
        self.units[start..start + CHARS_PER_SLOT].copy_from_slice(&slot.units);
        self.expected = slot.sequence;
    }

    /// Termine la séquence sur l'entrée courte. `None` si la séquence est
    /// incomplète ou n'appartient pas à ce nom court.
    pub fn finish(&mut self, short_name: &[u8; 11]) -> Option<String> {
        let complete = self.expected == 1 && self.checksum == short_name_checksum(short_name);
        let name = complete.then(|| {
            let len = self.units.iter().position(|&u| u == 0x0000).unwrap_or(self.units.len());
            char::decode_utf16(self.units[..len].iter().copied())
                .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
                .collect::<String>()
        });
        self.reset();
        name.filter(|n| !n.is_empty())
    }
}

/// Découpe `name` en fragments, dans l'ordre d'écriture (dernier fragment en tête)
pub fn long_name_slots(name: &str, checksum: u8) -> Vec<LfnSlot> {
    let units: Vec<u16> = name.encode_utf16().collect();
    let count = units.len().div_ceil(CHARS_PER_SLOT);

    (1..=count)
        .rev()
        .map(|sequence| {
            let mut chunk = [0xFFFF; CHARS_PER_SLOT];
            for (i, unit) in chunk.iter_mut().enumerate() {
                let index = (sequence - 1) * CHARS_PER_SLOT + i;
                if index < units.len() {
                    *unit = units[index];
                } else if index == units.len() {
                    *unit = 0x0000;
                }
            }
            LfnSlot {
                sequence: sequence as u8,
                last: sequence == count,
                checksum,
                units: chunk,
            }
        })
        .collect()
}

/// Nombre d'emplacements pour un nom long plus son entrée courte
pub fn slot_count(name: &str) -> usize {
    name.encode_utf16().count().div_ceil(CHARS_PER_SLOT) + 1
}

pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(Error::InvalidName);
    }
    if name.trim_end_matches(['.', ' ']).is_empty() {
        return Err(Error::InvalidName);
    }
    if name.encode_utf16().count() > MAX_NAME_UNITS {
        return Err(Error::InvalidName);
    }
    if name.chars().any(|c| (c as u32) < 0x20 || "\"*/:<>?\\|".contains(c)) {
        return Err(Error::InvalidName);
    }
    Ok(())
}

fn is_short_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || b"$%'-_@~`!(){}^#&".contains(&c)
}

/// Casse d'une partie de nom court : `Some(true)` tout en minuscules,
/// `Some(false)` sans minuscules, `None` si mélangée.
fn uniform_case(part: &[u8]) -> Option<bool> {
    let lower = part.iter().any(|c| c.is_ascii_lowercase());
    let upper = part.iter().any(|c| c.is_ascii_uppercase());
    match (lower, upper) {
        (true, true) => None,
        (lower, _) => Some(lower),
    }
}

/// Nom court exact et drapeaux de casse si `name` tient en 8.3
pub fn short_name_for(name: &str) -> Option<([u8; 11], u8)> {
    let bytes = name.as_bytes();
    if !name.is_ascii() || bytes.first() == Some(&b'.') {
        return None;
    }

    let (base, ext) = match name.rfind('.') {
        Some(dot) => (&bytes[..dot], &bytes[dot + 1..]),
        None => (bytes, &[][..]),
    };
    if base.is_empty() || base.len() > 8 || ext.len() > 3 || (name.contains('.') && ext.is_empty()) {
        return None;
    }
    if !base.iter().chain(ext.iter()).all(|&c| is_short_char(c)) {
        return None;
    }

    let mut flags = 0;
    if uniform_case(base)? {
        flags |= CASE_LOWER_BASE;
    }
    if uniform_case(ext)? {
        flags |= CASE_LOWER_EXT;
    }

    let mut short = [b' '; 11];
    for (dst, src) in short[..8].iter_mut().zip(base) {
        *dst = src.to_ascii_uppercase();
    }
    for (dst, src) in short[8..].iter_mut().zip(ext) {
        *dst = src.to_ascii_uppercase();
    }
    Some((short, flags))
}

/// Nom court de base (sans suffixe ~N) dérivé d'un nom long
pub fn basis_name(name: &str) -> [u8; 11] {
    let name = name.trim_start_matches('.');
    let (base, ext) = match name.rfind('.') {
        Some(dot) => (&name[..dot], &name[dot + 1..]),
        None => (name, ""),
    };

    let convert = |part: &str, out: &mut [u8]| {
        let chars = part
            .chars()
            .filter(|&c| c != ' ' && c != '.')
            .map(|c| match c {
                c if c.is_ascii() && is_short_char(c as u8) => c.to_ascii_uppercase() as u8,
                _ => b'_',
            });
        for (dst, src) in out.iter_mut().zip(chars) {
            *dst = src;
        }
    };

    let mut short = [b' '; 11];
    convert(base, &mut short[..8]);
    convert(ext, &mut short[8..]);
    if short[0] == b' ' {
        short[0] = b'_';
    }
    short
}

/// Ajoute le suffixe `~n` à un nom de base
pub fn with_tail(basis: &[u8; 11], n: u32) -> [u8; 11] {
    let mut digits = [0u8; 10];
    let mut len = 0;
    let mut value = n;
    loop {
        digits[len] = b'0' + (value % 10) as u8;
        len += 1;
        value /= 10;
        if value == 0 {
            break;
        }
    }

    let base_len = basis[..8].iter().rposition(|&b| b != b' ').map_or(0, |p| p + 1);
    let keep = base_len.min(8 - (len + 1));

    let mut short = *basis;
    short[keep] = b'~';
    for i in 0..len {
        short[keep + 1 + i] = digits[len - 1 - i];
    }
    for b in short[keep + 1 + len..8].iter_mut() {
        *b = b' ';
    }
    short
}
