//! Table de partitions MBR

use alloc::vec;

use byteorder::{ByteOrder, LittleEndian};

use crate::{BlockDevice, Error, Result};

const TABLE_OFFSET: usize = 0x1BE;
const ENTRY_SIZE: usize = 16;
const SIGNATURE_OFFSET: usize = 510;

pub const PARTITION_TYPE_FREE: u8 = 0x00;
pub const PARTITION_TYPE_FAT12: u8 = 0x01;
pub const PARTITION_TYPE_FAT16_32MB: u8 = 0x04;
pub const PARTITION_TYPE_FAT16: u8 = 0x06;
pub const PARTITION_TYPE_FAT32: u8 = 0x0B;
pub const PARTITION_TYPE_FAT32_LBA: u8 = 0x0C;
pub const PARTITION_TYPE_FAT16_LBA: u8 = 0x0E;

/// Quelle partition ouvrir
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionSelector {
    /// Entrée 0 à 3 de la table
    Slot(u8),
    /// Première entrée non vide de type FAT
    FirstFat,
    /// Pas de table : tout le support ("superfloppy")
    Whole,
    /// `FirstFat`, sinon tout le support
    Auto,
}

/// Fenêtre de secteurs sur le support
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    pub start_sector: u32,
    pub sector_count: u32,
    pub kind: u8,
}

impl Partition {
    pub fn is_fat(&self) -> bool {
        matches!(
            self.kind,
            PARTITION_TYPE_FAT12
                | PARTITION_TYPE_FAT16_32MB
                | PARTITION_TYPE_FAT16
                | PARTITION_TYPE_FAT32
                | PARTITION_TYPE_FAT32_LBA
                | PARTITION_TYPE_FAT16_LBA
        )
    }

    pub fn whole_device<D: BlockDevice>(device: &D) -> Self {
        Self {
            start_sector: 0,
            sector_count: device.sector_count(),
            kind: PARTITION_TYPE_FREE,
        }
    }

    /// Lit le secteur 0 et choisit une partition. La table n'est jamais modifiée.
    pub fn open<D: BlockDevice>(device: &mut D, selector: PartitionSelector) -> Result<Self> {
        if selector == PartitionSelector::Whole {
            return Ok(Self::whole_device(device));
        }

        let mut sector = vec![0u8; device.sector_size()];
        device.read_sector(0, &mut sector)?;

        let found = Self::select(&sector, selector);
        match (found, selector) {
            (Some(partition), _) => {
                log::debug!("partition: {:?}", partition);
                Ok(partition)
            }
            (None, PartitionSelector::Auto) => {
                log::debug!("pas de table de partitions valide, support entier");
                Ok(Self::whole_device(device))
            }
            (None, _) => Err(Error::NotFound),
        }
    }

    /// Choisit une entrée dans un secteur 0 déjà lu
    pub fn select(sector: &[u8], selector: PartitionSelector) -> Option<Self> {
        if !has_signature(sector) {
            return None;
        }

        match selector {
            PartitionSelector::Slot(index) => {
                entry(sector, index as usize).filter(|p| p.kind != PARTITION_TYPE_FREE)
            }
            PartitionSelector::FirstFat | PartitionSelector::Auto => (0..4)
                .filter_map(|i| entry(sector, i))
                .find(|p| p.is_fat() && p.sector_count != 0),
            PartitionSelector::Whole => None,
        }
    }
}

fn has_signature(sector: &[u8]) -> bool {
    sector.len() >= 512 && sector[SIGNATURE_OFFSET] == 0x55 && sector[SIGNATURE_OFFSET + 1] == 0xAA
}

fn entry(sector: &[u8], index: usize) -> Option<Partition> {
    if index >= 4 {
        return None;
    }
    let raw = &sector[TABLE_OFFSET + index * ENTRY_SIZE..TABLE_OFFSET + (index + 1) * ENTRY_SIZE];
    Some(Partition {
        kind: raw[4],
        start_sector: LittleEndian::read_u32(&raw[8..12]),
        sector_count: LittleEndian::read_u32(&raw[12..16]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryDevice;

    fn mbr(entries: &[(usize, u8, u32, u32)]) -> MemoryDevice {
        let mut dev = MemoryDevice::new(128, 512);
        let data = dev.as_bytes_mut();
        for &(i, kind, start, count) in entries {
            let base = TABLE_OFFSET + i * ENTRY_SIZE;
            data[base + 4] = kind;
            data[base + 8..base + 12].copy_from_slice(&start.to_le_bytes());
            data[base + 12..base + 16].copy_from_slice(&count.to_le_bytes());
        }
        data[510] = 0x55;
        data[511] = 0xAA;
        dev
    }

    #[test]
    fn test_single_fat16_entry() {
        let mut dev = mbr(&[(0, 0x06, 2048, 65536)]);
        let p = Partition::open(&mut dev, PartitionSelector::Auto).unwrap();
        assert_eq!((p.start_sector, p.sector_count, p.kind), (2048, 65536, 0x06));
    }

    #[test]
    fn test_no_signature_superfloppy() {
        let mut dev = MemoryDevice::new(128, 512);
        let p = Partition::open(&mut dev, PartitionSelector::Auto).unwrap();
        assert_eq!((p.start_sector, p.sector_count), (0, 128));

        assert_eq!(
            Partition::open(&mut dev, PartitionSelector::FirstFat),
            Err(Error::NotFound)
        );
    }

    #[test]
    fn test_slot_selection() {
        let mut dev = mbr(&[(0, 0x83, 64, 10), (2, 0x0C, 80, 40)]);
        let p = Partition::open(&mut dev, PartitionSelector::Slot(0)).unwrap();
        assert_eq!(p.kind, 0x83);

        assert_eq!(
            Partition::open(&mut dev, PartitionSelector::Slot(1)),
            Err(Error::NotFound)
        );

        // la première entrée n'est pas FAT
        let p = Partition::open(&mut dev, PartitionSelector::FirstFat).unwrap();
        assert_eq!(p.start_sector, 80);
    }

    #[test]
    fn test_empty_slot_auto_fallback() {
        let mut dev = mbr(&[]);
        let p = Partition::open(&mut dev, PartitionSelector::Auto).unwrap();
        assert_eq!(p.start_sector, 0);
    }
}
