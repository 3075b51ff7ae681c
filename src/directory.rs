//! Codage des entrées de répertoire de 32 octets

use alloc::string::String;
use core::fmt;

use bitflags::bitflags;
use byteorder::{ByteOrder, LittleEndian};

use crate::long_name::LfnSlot;
use crate::DateTime;

bitflags! {
    /// Attributs d'un fichier/dossier
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    #[repr(transparent)]
    pub struct Attributes: u8 {
        const READ_ONLY = 0x01;
        const HIDDEN = 0x02;
        const SYSTEM = 0x04;
        const VOLUME_ID = 0x08;
        const DIRECTORY = 0x10;
        const ARCHIVE = 0x20;
    }
}

/// Combinaison réservée aux fragments de nom long
pub const LONG_NAME: u8 = 0x0F;

pub const ENTRY_SIZE: usize = 32;
pub const DELETED: u8 = 0xE5;
pub const END_OF_DIR: u8 = 0x00;

// octet 12 : casse du nom court (extension NT)
pub const CASE_LOWER_BASE: u8 = 0x08;
pub const CASE_LOWER_EXT: u8 = 0x10;

/// Entrée courte (8.3) décodée
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ShortEntry {
    pub name: [u8; 11],
    pub attributes: Attributes,
    pub case_flags: u8,
    pub created: DateTime,
    pub accessed: u16,
    pub first_cluster: u32,
    pub modified: DateTime,
    pub size: u32,
}

impl ShortEntry {
    pub fn new(name: [u8; 11], attributes: Attributes, first_cluster: u32, now: DateTime) -> Self {
        Self {
            name,
            attributes,
            case_flags: 0,
            created: now,
            accessed: now.fat_date(),
            first_cluster,
            modified: now,
            size: 0,
        }
    }

    pub fn parse(raw: &[u8]) -> Self {
        let mut name = [0u8; 11];
        name.copy_from_slice(&raw[0..11]);

        let high = LittleEndian::read_u16(&raw[20..22]) as u32;
        let low = LittleEndian::read_u16(&raw[26..28]) as u32;

        Self {
            name,
            attributes: Attributes::from_bits_retain(raw[11]),
            case_flags: raw[12],
            created: DateTime::from_fat(
                LittleEndian::read_u16(&raw[16..18]),
                LittleEndian::read_u16(&raw[14..16]),
            ),
            accessed: LittleEndian::read_u16(&raw[18..20]),
            first_cluster: (high << 16) | low,
            modified: DateTime::from_fat(
                LittleEndian::read_u16(&raw[24..26]),
                LittleEndian::read_u16(&raw[22..24]),
            ),
            size: LittleEndian::read_u32(&raw[28..32]),
        }
    }

    pub fn encode(&self, raw: &mut [u8]) {
        raw[0..11].copy_from_slice(&self.name);
        raw[11] = self.attributes.bits();
        raw[12] = self.case_flags;
        raw[13] = 0;
        LittleEndian::write_u16(&mut raw[14..16], self.created.fat_time());
        LittleEndian::write_u16(&mut raw[16..18], self.created.fat_date());
        LittleEndian::write_u16(&mut raw[18..20], self.accessed);
        LittleEndian::write_u16(&mut raw[20..22], (self.first_cluster >> 16) as u16);
        LittleEndian::write_u16(&mut raw[22..24], self.modified.fat_time());
        LittleEndian::write_u16(&mut raw[24..26], self.modified.fat_date());
        LittleEndian::write_u16(&mut raw[26..28], self.first_cluster as u16);
        LittleEndian::write_u32(&mut raw[28..32], self.size);
    }

    pub fn is_directory(&self) -> bool {
        self.attributes.contains(Attributes::DIRECTORY)
    }

    pub fn is_volume_id(&self) -> bool {
        self.attributes.contains(Attributes::VOLUME_ID)
    }

    /// Entrée "."
    pub fn is_dot(&self) -> bool {
        self.name == *b".          "
    }

    /// Entrée ".."
    pub fn is_dot_dot(&self) -> bool {
        self.name == *b"..         "
    }

    /// Convertir le nom en String lisible, casse NT appliquée
    pub fn display_name(&self) -> String {
        short_name_to_string(&self.name, self.case_flags)
    }
}

impl fmt::Debug for ShortEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ShortEntry")
            .field("name", &self.display_name())
            .field("attributes", &self.attributes)
            .field("cluster", &self.first_cluster)
            .field("size", &self.size)
            .finish()
    }
}

/// "README  TXT" -> "README.TXT"
pub fn short_name_to_string(name: &[u8; 11], case_flags: u8) -> String {
    let mut name = *name;
    // 0x05 en tête remplace un vrai 0xE5
    if name[0] == 0x05 {
        name[0] = DELETED;
    }

    let mut out = String::new();
    let mut push = |bytes: &[u8], lower: bool| {
        for &b in bytes {
            let c = b as char;
            out.push(if lower { c.to_ascii_lowercase() } else { c });
        }
    };

    let base = trim_spaces(&name[..8]);
    let ext = trim_spaces(&name[8..]);
    push(base, case_flags & CASE_LOWER_BASE != 0);
    if !ext.is_empty() {
        push(b".", false);
        push(ext, case_flags & CASE_LOWER_EXT != 0);
    }
    out
}

fn trim_spaces(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().rposition(|&b| b != b' ').map_or(0, |p| p + 1);
    &bytes[..end]
}

/// Contenu d'un emplacement de 32 octets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// Fin du répertoire, rien après
    End,
    Deleted,
    LongName(LfnSlot),
    Short(ShortEntry),
}

impl Slot {
    pub fn decode(raw: &[u8]) -> Self {
        match raw[0] {
            END_OF_DIR => Self::End,
            DELETED => Self::Deleted,
            _ if raw[11] & 0x3F == LONG_NAME => Self::LongName(LfnSlot::parse(raw)),
            _ => Self::Short(ShortEntry::parse(raw)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_entry_layout() {
        let now = DateTime::new(2020, 5, 17, 10, 20, 30);
        let mut entry = ShortEntry::new(*b"REPORT  TXT", Attributes::ARCHIVE, 0x0012_0034, now);
        entry.size = 5000;

        let mut raw = [0u8; 32];
        entry.encode(&mut raw);
        assert_eq!(&raw[0..11], b"REPORT  TXT");
        assert_eq!(raw[11], 0x20);
        assert_eq!(&raw[20..22], &[0x12, 0x00]);
        assert_eq!(&raw[26..28], &[0x34, 0x00]);
        assert_eq!(&raw[28..32], &5000u32.to_le_bytes());

        assert_eq!(ShortEntry::parse(&raw), entry);
    }

    #[test]
    fn test_display_name() {
        assert_eq!(short_name_to_string(b"README  TXT", 0), "README.TXT");
        assert_eq!(short_name_to_string(b"MAKEFILE   ", 0), "MAKEFILE");
        assert_eq!(
            short_name_to_string(b"README  TXT", CASE_LOWER_BASE | CASE_LOWER_EXT),
            "readme.txt"
        );
        assert_eq!(short_name_to_string(b"FOO     C  ", CASE_LOWER_EXT), "FOO.c");
    }

    #[test]
    fn test_slot_decode() {
        let mut raw = [0u8; 32];
        assert_eq!(Slot::decode(&raw), Slot::End);

        raw[0] = DELETED;
        assert_eq!(Slot::decode(&raw), Slot::Deleted);

        raw[0] = 0x41;
        raw[11] = LONG_NAME;
        assert!(matches!(Slot::decode(&raw), Slot::LongName(_)));

        raw[0] = b'A';
        raw[11] = Attributes::DIRECTORY.bits();
        match Slot::decode(&raw) {
            Slot::Short(e) => assert!(e.is_directory()),
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn test_dot_entries() {
        let now = DateTime::EPOCH;
        assert!(ShortEntry::new(*b".          ", Attributes::DIRECTORY, 5, now).is_dot());
        assert!(ShortEntry::new(*b"..         ", Attributes::DIRECTORY, 0, now).is_dot_dot());
    }
}
